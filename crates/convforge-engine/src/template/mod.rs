//! Command templates with scoped parameter references, loops and
//! conditionals.
//!
//! # Syntax
//!
//! - `%{kind.name}` substitutes a parameter, where `kind` is one of
//!   `dynamic`, `tmp`, `segm`, `seq` or `resource`;
//! - `%{kind[i].name}` reads a sibling by position (literal or the name of a
//!   dynamic parameter);
//! - `%for VAR from=A to=B%...%endfor%` (inclusive) or
//!   `%for VAR count=N%...%endfor%` repeats its body;
//! - `%if COND%...%else%...%endif%` keeps one branch;
//! - `%%` is a literal percent sign.
//!
//! # Example
//!
//! ```
//! use convforge_common::Scope;
//! use convforge_engine::context::ContextStore;
//! use convforge_engine::template::Template;
//!
//! let mut store = ContextStore::new();
//! store.set_dynamic("input", "/media/My Film.mxf");
//!
//! let template = Template::parse("ffmpeg -i %{dynamic.input} -c copy out.mov").unwrap();
//! let argv = template.resolve_argv(&mut store, &Scope::global()).unwrap();
//! assert_eq!(argv, vec!["ffmpeg", "-i", "/media/My Film.mxf", "-c", "copy", "out.mov"]);
//! ```

mod eval;
mod lexer;
mod parser;

use convforge_common::{Error, Result, Scope};

use crate::context::ContextStore;
pub(crate) use eval::count_range;
pub(crate) use lexer::is_identifier;
use eval::{ArgvBuilder, Evaluator, StringSink};
use parser::{Condition, Node};

/// A parsed command template.
#[derive(Debug, Clone)]
pub struct Template {
    source: String,
    nodes: Vec<Node>,
}

impl Template {
    /// Parse a template, checking block structure and reference syntax.
    pub fn parse(source: &str) -> Result<Self> {
        let nodes = lexer::tokenize(source)
            .and_then(parser::parse)
            .map_err(|msg| Error::template(source, msg))?;
        Ok(Self {
            source: source.to_string(),
            nodes,
        })
    }

    /// The template text as written.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Whether evaluating this template reads `%{dynamic.<var>}`, directly
    /// or as a sibling index.
    pub(crate) fn references_var(&self, var: &str) -> bool {
        parser::references_var(&self.nodes, var)
    }

    /// Resolve into an argument vector. Element 0 is the program.
    ///
    /// Loop variables are written to the dynamic context as a side effect.
    pub fn resolve_argv(&self, store: &mut ContextStore, scope: &Scope) -> Result<Vec<String>> {
        let mut builder = ArgvBuilder::default();
        Evaluator::new(store, scope, &self.source).eval(&self.nodes, &mut builder)?;
        let argv = builder
            .finish()
            .map_err(|msg| Error::template(&self.source, msg))?;
        if argv.is_empty() {
            return Err(Error::template(&self.source, "resolves to an empty command"));
        }
        Ok(argv)
    }

    /// Resolve into a single string, without word splitting.
    ///
    /// Surrounding whitespace is trimmed.
    pub fn render(&self, store: &mut ContextStore, scope: &Scope) -> Result<String> {
        let mut sink = StringSink::default();
        Evaluator::new(store, scope, &self.source).eval(&self.nodes, &mut sink)?;
        Ok(sink.0.trim().to_string())
    }
}

/// An operation guard: a condition deciding whether an operation runs.
#[derive(Debug, Clone)]
pub struct Guard {
    source: String,
    cond: Condition,
}

impl Guard {
    /// Parse `[!]VALUE`, `VALUE == VALUE` or `VALUE != VALUE`.
    pub fn parse(source: &str) -> Result<Self> {
        let cond = lexer::split_words(source)
            .and_then(Condition::from_words)
            .map_err(|msg| Error::template(source, msg))?;
        Ok(Self {
            source: source.to_string(),
            cond,
        })
    }

    /// The guard text as written.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate in a scope. Unresolved references are fatal.
    pub fn evaluate(&self, store: &ContextStore, scope: &Scope) -> Result<bool> {
        eval::eval_condition(store, scope, &self.source, &self.cond)
    }
}

/// Parse and resolve a template in one step.
pub fn resolve_command(
    store: &mut ContextStore,
    scope: &Scope,
    template: &str,
) -> Result<Vec<String>> {
    Template::parse(template)?.resolve_argv(store, scope)
}

/// Parse and evaluate a condition in one step.
pub fn evaluate_condition(store: &ContextStore, scope: &Scope, condition: &str) -> Result<bool> {
    Guard::parse(condition)?.evaluate(store, scope)
}
