//! Template evaluation against a context store.

use std::ops::RangeInclusive;

use convforge_common::{ContextKind, Error, Result, Scope};

use super::lexer::{ParamRef, Piece, RefIndex, Word};
use super::parser::{Bound, CompareOp, Condition, ForBlock, Node};
use crate::context::{ContextStore, Selector};

/// Receives evaluated template output.
///
/// Literal template text and substituted values arrive separately so a sink
/// can treat them differently.
pub(crate) trait Sink {
    fn text(&mut self, text: &str);
    fn value(&mut self, value: &str);
}

/// Collects output verbatim.
#[derive(Debug, Default)]
pub(crate) struct StringSink(pub String);

impl Sink for StringSink {
    fn text(&mut self, text: &str) {
        self.0.push_str(text);
    }

    fn value(&mut self, value: &str) {
        self.0.push_str(value);
    }
}

/// Splits output into an argument vector.
///
/// Literal text is split on whitespace and honours quotes and backslash
/// escapes. Substituted values are appended to the current word as-is.
#[derive(Debug, Default)]
pub(crate) struct ArgvBuilder {
    args: Vec<String>,
    current: String,
    in_word: bool,
    quote: Option<char>,
    escape: bool,
}

impl ArgvBuilder {
    pub fn finish(mut self) -> std::result::Result<Vec<String>, String> {
        if let Some(q) = self.quote {
            return Err(format!("unterminated {q} quote"));
        }
        if self.escape {
            self.current.push('\\');
            self.in_word = true;
        }
        self.end_word();
        Ok(self.args)
    }

    fn end_word(&mut self) {
        if self.in_word {
            self.args.push(std::mem::take(&mut self.current));
            self.in_word = false;
        }
    }
}

impl Sink for ArgvBuilder {
    fn text(&mut self, text: &str) {
        for c in text.chars() {
            if self.escape {
                self.current.push(c);
                self.escape = false;
                continue;
            }
            match (self.quote, c) {
                (Some(q), c) if c == q => self.quote = None,
                (Some('"'), '\\') => self.escape = true,
                (Some(_), c) => self.current.push(c),
                (None, '\'' | '"') => {
                    self.quote = Some(c);
                    self.in_word = true;
                }
                (None, '\\') => {
                    self.escape = true;
                    self.in_word = true;
                }
                (None, c) if c.is_whitespace() => self.end_word(),
                (None, c) => {
                    self.current.push(c);
                    self.in_word = true;
                }
            }
        }
    }

    fn value(&mut self, value: &str) {
        self.current.push_str(value);
        self.in_word = true;
    }
}

/// Walks a template tree, resolving references in one scope.
pub(crate) struct Evaluator<'a> {
    store: &'a mut ContextStore,
    scope: &'a Scope,
    template: &'a str,
}

impl<'a> Evaluator<'a> {
    pub fn new(store: &'a mut ContextStore, scope: &'a Scope, template: &'a str) -> Self {
        Self {
            store,
            scope,
            template,
        }
    }

    pub fn eval(&mut self, nodes: &[Node], sink: &mut dyn Sink) -> Result<()> {
        for node in nodes {
            match node {
                Node::Text(t) => sink.text(t),
                Node::Param(r) => {
                    let value = resolve_ref(&*self.store, self.scope, r)?;
                    sink.value(&value);
                }
                Node::If(block) => {
                    let taken =
                        eval_condition(&*self.store, self.scope, self.template, &block.cond)?;
                    let branch = if taken {
                        &block.then
                    } else {
                        &block.otherwise
                    };
                    self.eval(branch, sink)?;
                }
                Node::For(block) => self.eval_for(block, sink)?,
            }
        }
        Ok(())
    }

    fn eval_for(&mut self, block: &ForBlock, sink: &mut dyn Sink) -> Result<()> {
        let from = match &block.from {
            Some(w) => self.integer(w, "from")?,
            None => 0,
        };
        let range = match &block.bound {
            Bound::To(w) => from..=self.integer(w, "to")?,
            Bound::Count(w) => {
                let count = self.integer(w, "count")?;
                if count < 0 {
                    return Err(Error::template(
                        self.template,
                        format!("%for {}% has a negative count {count}", block.var),
                    ));
                }
                count_range(from, count).ok_or_else(|| {
                    Error::template(
                        self.template,
                        format!("%for {}% range from={from} count={count} overflows", block.var),
                    )
                })?
            }
        };

        for i in range {
            self.store.set_dynamic(&block.var, i.to_string());
            self.eval(&block.body, sink)?;
        }
        Ok(())
    }

    fn integer(&self, word: &Word, what: &str) -> Result<i64> {
        let value = eval_word(&*self.store, self.scope, word)?;
        value.trim().parse().map_err(|_| {
            Error::template(
                self.template,
                format!("%for {what}= value '{value}' is not an integer"),
            )
        })
    }
}

/// `count` indices starting at `from`, or `None` when the last index
/// does not fit in an `i64`. `count` must not be negative.
pub(crate) fn count_range(from: i64, count: i64) -> Option<RangeInclusive<i64>> {
    if count == 0 {
        // Empty: start > end.
        return Some(1..=0);
    }
    let end = from.checked_add(count - 1)?;
    Some(from..=end)
}

/// Resolve a single reference; absence is fatal.
pub(crate) fn resolve_ref(store: &ContextStore, scope: &Scope, r: &ParamRef) -> Result<String> {
    let selector = match &r.index {
        None => Selector::Current,
        Some(RefIndex::Literal(n)) => Selector::Index(*n),
        Some(RefIndex::Dynamic(var)) => {
            let raw = store.get_parameter(ContextKind::Dynamic, scope, var).map_err(|nf| {
                Error::param_not_found(r.raw.clone(), format!("index {}", nf))
            })?;
            let n = raw.trim().parse::<usize>().map_err(|_| {
                Error::param_not_found(
                    r.raw.clone(),
                    format!("index %{{dynamic.{var}}} = '{raw}' is not a valid position"),
                )
            })?;
            Selector::Index(n)
        }
    };

    store
        .lookup(r.kind, scope, selector, &r.name)
        .map(|v| v.into_owned())
        .map_err(|nf| nf.with_reference(r.raw.clone()).into())
}

pub(crate) fn eval_word(store: &ContextStore, scope: &Scope, word: &Word) -> Result<String> {
    let mut out = String::new();
    for piece in &word.0 {
        match piece {
            Piece::Text(t) => out.push_str(t),
            Piece::Param(r) => out.push_str(&resolve_ref(store, scope, r)?),
        }
    }
    Ok(out)
}

pub(crate) fn eval_condition(
    store: &ContextStore,
    scope: &Scope,
    template: &str,
    cond: &Condition,
) -> Result<bool> {
    match cond {
        Condition::Truthy { negate, value } => {
            let value = eval_word(store, scope, value)?;
            let truth = parse_bool(&value).ok_or_else(|| {
                Error::template(template, format!("'{value}' is not a boolean value"))
            })?;
            Ok(truth != *negate)
        }
        Condition::Compare { left, op, right } => {
            let equal = eval_word(store, scope, left)? == eval_word(store, scope, right)?;
            Ok(match op {
                CompareOp::Eq => equal,
                CompareOp::Ne => !equal,
            })
        }
    }
}

/// Boolean spelling accepted by conditions.
pub(crate) fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Some(true),
        "false" | "no" | "off" | "0" | "" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(parts: &[(&str, bool)]) -> Vec<String> {
        let mut b = ArgvBuilder::default();
        for (s, is_value) in parts {
            if *is_value {
                b.value(s);
            } else {
                b.text(s);
            }
        }
        b.finish().unwrap()
    }

    #[test]
    fn test_splits_literal_text() {
        assert_eq!(
            argv(&[("  ffmpeg  -y   -i ", false)]),
            vec!["ffmpeg", "-y", "-i"]
        );
    }

    #[test]
    fn test_values_are_never_split() {
        assert_eq!(
            argv(&[("cat ", false), ("/media/My Movie.wav", true)]),
            vec!["cat", "/media/My Movie.wav"]
        );
        assert_eq!(
            argv(&[("-i ", false), ("a b", true), ("_suffix x", false)]),
            vec!["-i", "a b_suffix", "x"]
        );
    }

    #[test]
    fn test_quotes_and_escapes() {
        assert_eq!(
            argv(&[(r#""/opt/my tools/ffmpeg" -vf 'scale=1920:-2' a\ b """#, false)]),
            vec!["/opt/my tools/ffmpeg", "-vf", "scale=1920:-2", "a b", ""]
        );
    }

    #[test]
    fn test_quote_spanning_value() {
        assert_eq!(
            argv(&[("-metadata 'title=", false), ("Big Film", true), ("'", false)]),
            vec!["-metadata", "title=Big Film"]
        );
    }

    #[test]
    fn test_unterminated_quote_fails() {
        let mut b = ArgvBuilder::default();
        b.text("ffmpeg 'oops");
        assert!(b.finish().is_err());
    }

    #[test]
    fn test_booleans() {
        for t in ["true", "YES", "on", "1"] {
            assert_eq!(parse_bool(t), Some(true));
        }
        for f in ["false", "no", "Off", "0", ""] {
            assert_eq!(parse_bool(f), Some(false));
        }
        assert_eq!(parse_bool("maybe"), None);
    }
}
