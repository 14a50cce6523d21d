//! Tokenizer for command templates.
//!
//! Splits template text into literal text, parameter references and block
//! directives. Literal text is left unsplit; word splitting happens while
//! evaluating so quoted regions may span directives.

use std::fmt;

use convforge_common::ContextKind;

/// How an indexed reference picks its sibling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RefIndex {
    /// `%{seq[2].fps}`
    Literal(usize),
    /// `%{seq[i].fps}`, where `i` names a dynamic parameter.
    Dynamic(String),
}

/// A parsed `%{kind.name}` or `%{kind[index].name}` reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ParamRef {
    pub kind: ContextKind,
    pub index: Option<RefIndex>,
    pub name: String,
    /// The reference as written, for diagnostics.
    pub raw: String,
}

impl ParamRef {
    /// Parse the text between `%{` and `}`.
    pub fn parse(body: &str) -> Result<Self, String> {
        let raw = format!("%{{{body}}}");
        let (head, name) = body
            .split_once('.')
            .ok_or_else(|| format!("reference {raw} has no parameter name"))?;

        if name.is_empty() {
            return Err(format!("reference {raw} has an empty parameter name"));
        }

        let (kind_str, index) = match head.split_once('[') {
            Some((kind, idx)) => {
                let idx = idx
                    .strip_suffix(']')
                    .ok_or_else(|| format!("reference {raw} has an unclosed index"))?;
                let index = match idx.parse::<usize>() {
                    Ok(n) => RefIndex::Literal(n),
                    Err(_) if is_identifier(idx) => RefIndex::Dynamic(idx.to_string()),
                    Err(_) => return Err(format!("reference {raw} has an invalid index '{idx}'")),
                };
                (kind, Some(index))
            }
            None => (head, None),
        };

        let kind: ContextKind = kind_str.parse().map_err(|e| format!("{e} in {raw}"))?;
        if index.is_some() && matches!(kind, ContextKind::Dynamic | ContextKind::Tmp) {
            return Err(format!("reference {raw}: {kind} parameters cannot be indexed"));
        }

        Ok(Self {
            kind,
            index,
            name: name.to_string(),
            raw,
        })
    }

    /// Whether this reference reads the dynamic parameter `var`, directly or
    /// as its index.
    pub fn depends_on(&self, var: &str) -> bool {
        (self.kind == ContextKind::Dynamic && self.name == var)
            || matches!(&self.index, Some(RefIndex::Dynamic(v)) if v == var)
    }
}

/// One piece of a directive word.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Piece {
    Text(String),
    Param(ParamRef),
}

/// A single whitespace-delimited word inside a directive or guard, with
/// quotes already removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Word(pub Vec<Piece>);

impl Word {
    fn push_char(&mut self, c: char) {
        match self.0.last_mut() {
            Some(Piece::Text(t)) => t.push(c),
            _ => self.0.push(Piece::Text(c.to_string())),
        }
    }

    /// The literal text of the word, when it contains no references.
    pub fn as_literal(&self) -> Option<String> {
        let mut out = String::new();
        for piece in &self.0 {
            match piece {
                Piece::Text(t) => out.push_str(t),
                Piece::Param(_) => return None,
            }
        }
        Some(out)
    }

    /// References used by this word.
    pub fn refs(&self) -> impl Iterator<Item = &ParamRef> {
        self.0.iter().filter_map(|p| match p {
            Piece::Param(r) => Some(r),
            Piece::Text(_) => None,
        })
    }

    /// Strip a literal prefix from the leading text piece.
    pub fn strip_prefix(&self, prefix: &str) -> Option<Word> {
        let mut pieces = self.0.clone();
        match pieces.first_mut() {
            Some(Piece::Text(t)) if t.starts_with(prefix) => {
                t.drain(..prefix.len());
                if t.is_empty() {
                    pieces.remove(0);
                }
                Some(Word(pieces))
            }
            _ => None,
        }
    }

    /// Split `key=value` at the first `=` of the leading text piece.
    pub fn split_key(&self) -> Option<(String, Word)> {
        let Some(Piece::Text(t)) = self.0.first() else {
            return None;
        };
        let (key, _) = t.split_once('=')?;
        let key = key.to_string();
        let value = self.strip_prefix(&format!("{key}="))?;
        Some((key, value))
    }
}

/// Block directives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Directive {
    /// `%for VAR from=.. to=..%` / `%for VAR count=..%`
    For { var: String, args: Vec<(String, Word)> },
    EndFor,
    /// `%if COND%`, holding the condition's words.
    If(Vec<Word>),
    Else,
    EndIf,
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::For { var, .. } => write!(f, "%for {var}%"),
            Self::EndFor => f.write_str("%endfor%"),
            Self::If(_) => f.write_str("%if%"),
            Self::Else => f.write_str("%else%"),
            Self::EndIf => f.write_str("%endif%"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Token {
    Text(String),
    Param(ParamRef),
    Directive(Directive),
}

/// Tokenize a template.
pub(crate) fn tokenize(src: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut text = String::new();
    let mut rest = src;

    while let Some(pos) = rest.find('%') {
        text.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        if let Some(r) = after.strip_prefix('%') {
            text.push('%');
            rest = r;
            continue;
        }

        if after.starts_with('{') {
            let (body, r) = read_braced(after)?;
            flush(&mut text, &mut tokens);
            tokens.push(Token::Param(ParamRef::parse(body)?));
            rest = r;
            continue;
        }

        if let Some((body, r)) = read_directive(after)? {
            flush(&mut text, &mut tokens);
            tokens.push(Token::Directive(parse_directive(body)?));
            rest = r;
            continue;
        }

        // Not markup: `out%03d.png` keeps its percent sign.
        text.push('%');
        rest = after;
    }

    text.push_str(rest);
    flush(&mut text, &mut tokens);
    Ok(tokens)
}

fn flush(text: &mut String, tokens: &mut Vec<Token>) {
    if !text.is_empty() {
        tokens.push(Token::Text(std::mem::take(text)));
    }
}

/// `after` starts at `{`. Returns the reference body and the remainder.
fn read_braced(after: &str) -> Result<(&str, &str), String> {
    let end = after
        .find('}')
        .ok_or_else(|| format!("unterminated reference '%{}'", after))?;
    Ok((&after[1..end], &after[end + 1..]))
}

/// Recognize a directive right after a `%`.
///
/// Returns the directive body (between the `%` signs) and the remainder.
fn read_directive(after: &str) -> Result<Option<(&str, &str)>, String> {
    for keyword in ["else", "endif", "endfor"] {
        if let Some(r) = after.strip_prefix(keyword).and_then(|r| r.strip_prefix('%')) {
            return Ok(Some((&after[..keyword.len()], r)));
        }
    }

    let opens_block = ["for", "if"].iter().any(|kw| {
        after
            .strip_prefix(kw)
            .and_then(|r| r.chars().next())
            .is_some_and(char::is_whitespace)
    });
    if !opens_block {
        return Ok(None);
    }

    // Find the closing `%`, skipping over embedded `%{...}` references.
    let bytes = after.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            if bytes.get(i + 1) == Some(&b'{') {
                let close = after[i..]
                    .find('}')
                    .ok_or_else(|| format!("unterminated reference in directive '%{after}'"))?;
                i += close + 1;
                continue;
            }
            return Ok(Some((&after[..i], &after[i + 1..])));
        }
        i += 1;
    }
    Err(format!("unterminated directive '%{after}'"))
}

fn parse_directive(body: &str) -> Result<Directive, String> {
    match body {
        "else" => return Ok(Directive::Else),
        "endif" => return Ok(Directive::EndIf),
        "endfor" => return Ok(Directive::EndFor),
        _ => {}
    }

    if let Some(cond) = body.strip_prefix("if") {
        let words = split_words(cond)?;
        return Ok(Directive::If(words));
    }

    let Some(rest) = body.strip_prefix("for") else {
        return Err(format!("unknown directive '%{body}%'"));
    };

    let mut words = split_words(rest)?.into_iter();
    let var = words
        .next()
        .and_then(|w| w.as_literal())
        .filter(|v| is_identifier(v))
        .ok_or_else(|| format!("'%{body}%' needs a loop variable name"))?;

    let mut args = Vec::new();
    for word in words {
        let (key, value) = word
            .split_key()
            .ok_or_else(|| format!("'%{body}%': expected key=value arguments"))?;
        args.push((key, value));
    }

    Ok(Directive::For { var, args })
}

/// Split directive or guard text into words.
///
/// Whitespace separates words; `'..'` and `"..."` group (quotes removed);
/// a backslash escapes the next character; `%{..}` references and `%%`
/// are recognized.
pub(crate) fn split_words(src: &str) -> Result<Vec<Word>, String> {
    let mut words = Vec::new();
    let mut word = Word::default();
    let mut in_word = false;
    let mut quote: Option<char> = None;
    let mut chars = src.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        match c {
            '%' if src[i + 1..].starts_with('{') => {
                let (body, _) = read_braced(&src[i + 1..])?;
                word.0.push(Piece::Param(ParamRef::parse(body)?));
                in_word = true;
                // Skip `{body}`.
                let skip = body.chars().count() + 2;
                for _ in 0..skip {
                    chars.next();
                }
            }
            '%' if src[i + 1..].starts_with('%') => {
                word.push_char('%');
                in_word = true;
                chars.next();
            }
            '\\' if quote != Some('\'') => {
                if let Some((_, next)) = chars.next() {
                    word.push_char(next);
                }
                in_word = true;
            }
            q @ ('\'' | '"') if quote.is_none() => {
                quote = Some(q);
                in_word = true;
            }
            q if quote == Some(q) => quote = None,
            c if c.is_whitespace() && quote.is_none() => {
                if in_word {
                    words.push(std::mem::take(&mut word));
                    in_word = false;
                }
            }
            c => {
                word.push_char(c);
                in_word = true;
            }
        }
    }

    if let Some(q) = quote {
        return Err(format!("unterminated {q} quote in '{src}'"));
    }
    if in_word {
        words.push(word);
    }
    Ok(words)
}

/// Loop variables and dynamic index names: letters, digits, `_`, `-`, `.`.
pub(crate) fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> Token {
        Token::Text(s.to_string())
    }

    #[test]
    fn test_plain_text_and_references() {
        let tokens = tokenize("ffmpeg -i %{resource.essence} out.mov").unwrap();
        assert_eq!(tokens.len(), 3);
        assert_eq!(tokens[0], text("ffmpeg -i "));
        match &tokens[1] {
            Token::Param(r) => {
                assert_eq!(r.kind, ContextKind::Resource);
                assert_eq!(r.name, "essence");
                assert_eq!(r.raw, "%{resource.essence}");
            }
            other => panic!("unexpected token {other:?}"),
        }
    }

    #[test]
    fn test_lone_percent_is_literal() {
        let tokens = tokenize("frames/out%03d.png 100%% done").unwrap();
        assert_eq!(tokens, vec![text("frames/out%03d.png 100% done")]);
    }

    #[test]
    fn test_indexed_references() {
        let r = ParamRef::parse("seq[2].fps").unwrap();
        assert_eq!(r.kind, ContextKind::Sequence);
        assert_eq!(r.index, Some(RefIndex::Literal(2)));

        let r = ParamRef::parse("resource[i].essence").unwrap();
        assert_eq!(r.index, Some(RefIndex::Dynamic("i".into())));
        assert!(r.depends_on("i"));

        assert!(ParamRef::parse("dynamic[0].x").is_err());
        assert!(ParamRef::parse("bogus.x").is_err());
        assert!(ParamRef::parse("seq.").is_err());
        assert!(ParamRef::parse("seq[0.fps").is_err());
    }

    #[test]
    fn test_directives_with_embedded_references() {
        let tokens = tokenize("%for i count=%{resource.num}%-i x%endfor%").unwrap();
        match &tokens[0] {
            Token::Directive(Directive::For { var, args }) => {
                assert_eq!(var, "i");
                assert_eq!(args.len(), 1);
                assert_eq!(args[0].0, "count");
                assert_eq!(args[0].1.refs().count(), 1);
            }
            other => panic!("unexpected token {other:?}"),
        }
        assert_eq!(tokens[1], text("-i x"));
        assert_eq!(tokens[2], Token::Directive(Directive::EndFor));
    }

    #[test]
    fn test_if_else_endif() {
        let tokens = tokenize("%if %{dynamic.hdr}%-hdr%else%-sdr%endif%").unwrap();
        assert!(matches!(&tokens[0], Token::Directive(Directive::If(w)) if w.len() == 1));
        assert_eq!(tokens[2], Token::Directive(Directive::Else));
        assert_eq!(tokens[4], Token::Directive(Directive::EndIf));
    }

    #[test]
    fn test_keyword_prefix_is_not_a_directive() {
        // `%format` is not `%for`.
        let tokens = tokenize("a%format b").unwrap();
        assert_eq!(tokens, vec![text("a%format b")]);
    }

    #[test]
    fn test_unterminated_constructs() {
        assert!(tokenize("x %{seq.fps").is_err());
        assert!(tokenize("%for i count=3").is_err());
        assert!(tokenize("%for count=3%%endfor%").is_err());
    }

    #[test]
    fn test_split_words_quotes_and_escapes() {
        let words = split_words(r#"'a b' c\ d "" %{tmp.x}"#).unwrap();
        assert_eq!(words.len(), 4);
        assert_eq!(words[0].as_literal().unwrap(), "a b");
        assert_eq!(words[1].as_literal().unwrap(), "c d");
        assert_eq!(words[2].as_literal().unwrap(), "");
        assert!(words[3].as_literal().is_none());

        assert!(split_words("'open").is_err());
    }
}
