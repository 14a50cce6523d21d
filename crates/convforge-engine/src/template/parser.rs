//! Block structure for command templates.

use super::lexer::{Directive, ParamRef, Token, Word};

/// Comparison operators usable in conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CompareOp {
    Eq,
    Ne,
}

/// A parsed condition, shared by `%if` blocks and operation guards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Condition {
    /// `VALUE` or `!VALUE`, interpreted as a boolean.
    Truthy { negate: bool, value: Word },
    /// `VALUE == VALUE` or `VALUE != VALUE`.
    Compare {
        left: Word,
        op: CompareOp,
        right: Word,
    },
}

impl Condition {
    pub fn from_words(mut words: Vec<Word>) -> Result<Self, String> {
        match words.len() {
            1 => {
                let word = words.remove(0);
                Ok(match word.strip_prefix("!") {
                    Some(value) => Self::Truthy {
                        negate: true,
                        value,
                    },
                    None => Self::Truthy {
                        negate: false,
                        value: word,
                    },
                })
            }
            3 => {
                let op = match words[1].as_literal().as_deref() {
                    Some("==") => CompareOp::Eq,
                    Some("!=") => CompareOp::Ne,
                    _ => return Err("expected '==' or '!=' in condition".to_string()),
                };
                let right = words.remove(2);
                let left = words.remove(0);
                Ok(Self::Compare { left, op, right })
            }
            0 => Err("empty condition".to_string()),
            n => Err(format!("malformed condition ({n} words)")),
        }
    }
}

impl Condition {
    fn words(&self) -> Vec<&Word> {
        match self {
            Self::Truthy { value, .. } => vec![value],
            Self::Compare { left, right, .. } => vec![left, right],
        }
    }
}

/// Upper bound of a `%for` loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Bound {
    /// Inclusive last index.
    To(Word),
    /// Number of iterations.
    Count(Word),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ForBlock {
    pub var: String,
    pub from: Option<Word>,
    pub bound: Bound,
    pub body: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct IfBlock {
    pub cond: Condition,
    pub then: Vec<Node>,
    pub otherwise: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Node {
    Text(String),
    Param(ParamRef),
    For(ForBlock),
    If(IfBlock),
}

/// Directives that close the block being parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Terminator {
    EndFor,
    Else,
    EndIf,
}

impl Terminator {
    fn as_str(&self) -> &'static str {
        match self {
            Self::EndFor => "%endfor%",
            Self::Else => "%else%",
            Self::EndIf => "%endif%",
        }
    }
}

/// Whether any reference in `nodes` reads the dynamic parameter `var`.
pub(crate) fn references_var(nodes: &[Node], var: &str) -> bool {
    let word_uses = |w: &Word| w.refs().any(|r| r.depends_on(var));
    nodes.iter().any(|node| match node {
        Node::Text(_) => false,
        Node::Param(r) => r.depends_on(var),
        Node::For(block) => {
            let bound = match &block.bound {
                Bound::To(w) | Bound::Count(w) => w,
            };
            block.from.as_ref().is_some_and(word_uses)
                || word_uses(bound)
                || references_var(&block.body, var)
        }
        Node::If(block) => {
            block.cond.words().into_iter().any(word_uses)
                || references_var(&block.then, var)
                || references_var(&block.otherwise, var)
        }
    })
}

/// Build the block tree from a token stream.
pub(crate) fn parse(tokens: Vec<Token>) -> Result<Vec<Node>, String> {
    let mut iter = tokens.into_iter();
    let (nodes, end) = parse_block(&mut iter)?;
    match end {
        None => Ok(nodes),
        Some(t) => Err(format!("unexpected {} without matching opener", t.as_str())),
    }
}

fn parse_block(
    iter: &mut impl Iterator<Item = Token>,
) -> Result<(Vec<Node>, Option<Terminator>), String> {
    let mut nodes = Vec::new();

    while let Some(token) = iter.next() {
        match token {
            Token::Text(t) => nodes.push(Node::Text(t)),
            Token::Param(r) => nodes.push(Node::Param(r)),
            Token::Directive(d) => match d {
                Directive::EndFor => return Ok((nodes, Some(Terminator::EndFor))),
                Directive::Else => return Ok((nodes, Some(Terminator::Else))),
                Directive::EndIf => return Ok((nodes, Some(Terminator::EndIf))),
                Directive::For { var, args } => {
                    let (body, end) = parse_block(iter)?;
                    match end {
                        Some(Terminator::EndFor) => {}
                        Some(t) => {
                            return Err(format!("unexpected {} inside %for {var}%", t.as_str()))
                        }
                        None => return Err(format!("%for {var}% without %endfor%")),
                    }
                    nodes.push(Node::For(for_block(var, args, body)?));
                }
                Directive::If(words) => {
                    let cond = Condition::from_words(words)?;
                    let (then, end) = parse_block(iter)?;
                    let otherwise = match end {
                        Some(Terminator::EndIf) => Vec::new(),
                        Some(Terminator::Else) => {
                            let (otherwise, end) = parse_block(iter)?;
                            if end != Some(Terminator::EndIf) {
                                return Err("%else% without %endif%".to_string());
                            }
                            otherwise
                        }
                        Some(Terminator::EndFor) => {
                            return Err("unexpected %endfor% inside %if%".to_string())
                        }
                        None => return Err("%if% without %endif%".to_string()),
                    };
                    nodes.push(Node::If(IfBlock {
                        cond,
                        then,
                        otherwise,
                    }));
                }
            },
        }
    }

    Ok((nodes, None))
}

fn for_block(var: String, args: Vec<(String, Word)>, body: Vec<Node>) -> Result<ForBlock, String> {
    let mut from = None;
    let mut to = None;
    let mut count = None;

    for (key, value) in args {
        if value.refs().any(|r| r.depends_on(&var)) {
            return Err(format!(
                "bounds of %for {var}% may not reference the loop variable"
            ));
        }
        let slot = match key.as_str() {
            "from" => &mut from,
            "to" => &mut to,
            "count" => &mut count,
            other => return Err(format!("unknown %for argument '{other}'")),
        };
        if slot.replace(value).is_some() {
            return Err(format!("duplicate %for argument '{key}'"));
        }
    }

    let bound = match (to, count) {
        (Some(to), None) => Bound::To(to),
        (None, Some(count)) => Bound::Count(count),
        (Some(_), Some(_)) => return Err(format!("%for {var}% takes either to= or count=")),
        (None, None) => return Err(format!("%for {var}% needs to= or count=")),
    };

    Ok(ForBlock {
        var,
        from,
        bound,
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::super::lexer::tokenize;
    use super::*;

    fn parse_str(src: &str) -> Result<Vec<Node>, String> {
        parse(tokenize(src)?)
    }

    #[test]
    fn test_nested_blocks() {
        let nodes =
            parse_str("a %if %{dynamic.x}%%for i count=2%b%endfor%%else%c%endif% d").unwrap();
        assert_eq!(nodes.len(), 3);
        match &nodes[1] {
            Node::If(block) => {
                assert!(matches!(block.then[0], Node::For(_)));
                assert_eq!(block.otherwise, vec![Node::Text("c".into())]);
            }
            other => panic!("unexpected node {other:?}"),
        }
    }

    #[test]
    fn test_unbalanced_blocks_fail() {
        assert!(parse_str("%endfor%").is_err());
        assert!(parse_str("%if 1%x").is_err());
        assert!(parse_str("%for i count=2%x%endif%").is_err());
        assert!(parse_str("%if 1%x%else%y%endfor%").is_err());
    }

    #[test]
    fn test_loop_bounds_cannot_use_loop_variable() {
        let err = parse_str("%for i from=0 to=%{dynamic.i}%x%endfor%").unwrap_err();
        assert!(err.contains("loop variable"));
    }

    #[test]
    fn test_loop_needs_exactly_one_bound() {
        assert!(parse_str("%for i from=0%x%endfor%").is_err());
        assert!(parse_str("%for i to=1 count=2%x%endfor%").is_err());
        assert!(parse_str("%for i step=2 count=2%x%endfor%").is_err());
    }

    #[test]
    fn test_conditions() {
        let cond = Condition::from_words(super::super::lexer::split_words("!%{tmp.x}").unwrap())
            .unwrap();
        assert!(matches!(cond, Condition::Truthy { negate: true, .. }));

        let cond =
            Condition::from_words(super::super::lexer::split_words("%{seq.type} == audio").unwrap())
                .unwrap();
        assert!(matches!(
            cond,
            Condition::Compare {
                op: CompareOp::Eq,
                ..
            }
        ));

        assert!(Condition::from_words(Vec::new()).is_err());
        assert!(
            Condition::from_words(super::super::lexer::split_words("a < b").unwrap()).is_err()
        );
    }
}
