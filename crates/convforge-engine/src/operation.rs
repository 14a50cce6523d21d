//! Declarative pipeline description.
//!
//! These types are the decoded form of a pipeline file. They hold template
//! text only; [`crate::ConversionEngine`] parses and checks every template
//! before running anything.

use convforge_common::{CleanupPolicy, SequenceType};
use serde::Deserialize;

/// A named, ordered list of operations.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Pipeline {
    /// Name used in operation identities and logs.
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub operations: Vec<Operation>,
}

/// One declared operation, tagged by `kind`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Operation {
    /// Start one process and wait for it.
    ExecOnce(ExecDecl),
    /// Run nested operations once per segment.
    ExecEachSegment(EachSegmentDecl),
    /// Run nested operations once per sequence.
    ExecEachSequence(EachSequenceDecl),
    /// Run a chain of processes connected by pipes.
    Pipe(PipeDecl),
    /// Evaluate a template into a dynamic or tmp parameter.
    DynamicParameter(DynamicParameterDecl),
    /// Run one of two operation lists.
    If(IfDecl),
    /// Run nested operations once per loop index.
    For(ForDecl),
    /// Derive an ffmpeg `pan` expression for the audio sequences.
    AudioMap(AudioMapDecl),
    /// Any kind this version does not know.
    #[serde(other)]
    Unrecognized,
}

impl Operation {
    /// The `kind` spelling, for messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ExecOnce(_) => "exec-once",
            Self::ExecEachSegment(_) => "exec-each-segment",
            Self::ExecEachSequence(_) => "exec-each-sequence",
            Self::Pipe(_) => "pipe",
            Self::DynamicParameter(_) => "dynamic-parameter",
            Self::If(_) => "if",
            Self::For(_) => "for",
            Self::AudioMap(_) => "audio-map",
            Self::Unrecognized => "unrecognized",
        }
    }
}

/// A single command: also used for pipe stages.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecDecl {
    pub name: String,
    pub template: String,
    /// Output file template; stdout is redirected there.
    #[serde(default)]
    pub output: Option<String>,
    /// Guard; the command is skipped when it evaluates false.
    #[serde(default)]
    pub when: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EachSegmentDecl {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub operations: Vec<Operation>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EachSequenceDecl {
    #[serde(default)]
    pub name: Option<String>,
    /// Only these sequence types; all when empty.
    #[serde(default)]
    pub types: Vec<SequenceType>,
    #[serde(default)]
    pub operations: Vec<Operation>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipeDecl {
    pub name: String,
    #[serde(default)]
    pub when: Option<String>,
    #[serde(default)]
    pub cycles: Vec<CycleDecl>,
    #[serde(default)]
    pub tail: Vec<ExecDecl>,
}

/// How often a cycle group is instantiated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CycleEach {
    /// One group in the pipe's own scope.
    #[default]
    Once,
    /// One group per segment.
    Segment,
    /// One group per sequence.
    Sequence,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CycleDecl {
    #[serde(default)]
    pub each: CycleEach,
    /// With `each = "sequence"`: only these types; all when empty.
    #[serde(default)]
    pub types: Vec<SequenceType>,
    pub stages: Vec<ExecDecl>,
}

/// Which flat store a dynamic-parameter operation writes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamTarget {
    #[default]
    Dynamic,
    Tmp,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DynamicParameterDecl {
    pub name: String,
    /// Template rendered without word splitting.
    pub value: String,
    #[serde(default)]
    pub context: ParamTarget,
    #[serde(default)]
    pub cleanup: CleanupPolicy,
    #[serde(default)]
    pub when: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IfDecl {
    pub condition: String,
    #[serde(default)]
    pub then: Vec<Operation>,
    #[serde(default, rename = "else")]
    pub otherwise: Vec<Operation>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ForDecl {
    pub var: String,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub count: Option<String>,
    #[serde(default)]
    pub operations: Vec<Operation>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AudioMapDecl {
    pub name: String,
    /// Target layout name (template).
    pub layout: String,
    /// Explicit `"T:C"` / `"silence"` entries; default mapping when empty.
    #[serde(default)]
    pub mapping: Vec<String>,
    /// Dynamic parameter receiving the pan expression.
    pub parameter: String,
}
