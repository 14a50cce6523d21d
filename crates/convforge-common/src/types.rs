//! Core type definitions for the conversion hierarchy.
//!
//! This module defines the closed enums used throughout convforge for
//! classifying sequences, parameter stores, and cleanup behaviour, plus the
//! [`Scope`] descriptor that says where a lookup or operation applies.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::ids::{ResourceId, SegmentId, SequenceId};

/// Type of a sequence (virtual track).
///
/// The declaration order is also the iteration order of the sequence
/// context: video sequences first, then audio, then subtitles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SequenceType {
    /// Picture essence.
    Video,
    /// Sound essence.
    Audio,
    /// Timed text.
    Subtitle,
}

impl SequenceType {
    /// All sequence types in iteration order.
    pub const ALL: [SequenceType; 3] = [Self::Video, Self::Audio, Self::Subtitle];
}

impl fmt::Display for SequenceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Video => write!(f, "video"),
            Self::Audio => write!(f, "audio"),
            Self::Subtitle => write!(f, "subtitle"),
        }
    }
}

impl FromStr for SequenceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "video" => Ok(Self::Video),
            "audio" => Ok(Self::Audio),
            "subtitle" | "subtitles" => Ok(Self::Subtitle),
            other => Err(format!("unknown sequence type: {other}")),
        }
    }
}

/// The parameter store a reference or assignment targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextKind {
    /// Run-scoped values computed during the conversion.
    Dynamic,
    /// Transient, pipeline-internal values.
    Tmp,
    /// Segment identity (no stored parameters, only built-ins).
    #[serde(rename = "segm")]
    Segment,
    /// Per-sequence parameters.
    #[serde(rename = "seq")]
    Sequence,
    /// Per-resource parameters.
    Resource,
}

impl ContextKind {
    /// The spelling used in templates (`%{segm.uuid}`, `%{seq.fps}`, ...).
    pub fn template_name(&self) -> &'static str {
        match self {
            Self::Dynamic => "dynamic",
            Self::Tmp => "tmp",
            Self::Segment => "segm",
            Self::Sequence => "seq",
            Self::Resource => "resource",
        }
    }
}

impl fmt::Display for ContextKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.template_name())
    }
}

impl FromStr for ContextKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dynamic" => Ok(Self::Dynamic),
            "tmp" => Ok(Self::Tmp),
            "segm" => Ok(Self::Segment),
            "seq" => Ok(Self::Sequence),
            "resource" => Ok(Self::Resource),
            other => Err(format!("unknown context kind: {other}")),
        }
    }
}

/// What happens to the file named by a parameter when the run ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CleanupPolicy {
    /// Leave the file in place.
    #[default]
    Keep,
    /// Delete the file when the run ends, successful or not.
    DeleteOnExit,
    /// Delete the file only when the run fails.
    DeleteOnFail,
}

impl CleanupPolicy {
    /// Whether a file with this policy must be removed for the given outcome.
    pub fn applies(&self, failed: bool) -> bool {
        match self {
            Self::Keep => false,
            Self::DeleteOnExit => true,
            Self::DeleteOnFail => failed,
        }
    }
}

/// Identifies where a parameter lookup or operation applies.
///
/// A scope with every field empty is the global scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Scope {
    /// Current segment, if any.
    pub segment: Option<SegmentId>,
    /// Current sequence and its type, if any.
    pub sequence: Option<(SequenceType, SequenceId)>,
    /// Current resource, if any.
    pub resource: Option<ResourceId>,
}

impl Scope {
    /// The global scope.
    pub fn global() -> Self {
        Self::default()
    }

    /// Builder: set the segment.
    #[must_use]
    pub fn with_segment(mut self, segment: SegmentId) -> Self {
        self.segment = Some(segment);
        self
    }

    /// Builder: set the sequence.
    #[must_use]
    pub fn with_sequence(mut self, seq_type: SequenceType, sequence: SequenceId) -> Self {
        self.sequence = Some((seq_type, sequence));
        self
    }

    /// Builder: set the resource.
    #[must_use]
    pub fn with_resource(mut self, resource: ResourceId) -> Self {
        self.resource = Some(resource);
        self
    }

    /// Whether no field is set.
    pub fn is_global(&self) -> bool {
        self.segment.is_none() && self.sequence.is_none() && self.resource.is_none()
    }

    /// Type of the sequence in scope.
    pub fn sequence_type(&self) -> Option<SequenceType> {
        self.sequence.map(|(t, _)| t)
    }

    /// Id of the sequence in scope.
    pub fn sequence_id(&self) -> Option<SequenceId> {
        self.sequence.map(|(_, id)| id)
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_global() {
            return write!(f, "global");
        }

        let mut parts = Vec::new();
        if let Some(segment) = self.segment {
            parts.push(format!("segment={segment}"));
        }
        if let Some((seq_type, sequence)) = self.sequence {
            parts.push(format!("{seq_type}={sequence}"));
        }
        if let Some(resource) = self.resource {
            parts.push(format!("resource={resource}"));
        }
        write!(f, "{}", parts.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_type_order() {
        let mut types = vec![SequenceType::Subtitle, SequenceType::Video, SequenceType::Audio];
        types.sort();
        assert_eq!(types, SequenceType::ALL.to_vec());
    }

    #[test]
    fn test_sequence_type_parse() {
        assert_eq!("Audio".parse::<SequenceType>().unwrap(), SequenceType::Audio);
        assert_eq!(
            "subtitles".parse::<SequenceType>().unwrap(),
            SequenceType::Subtitle
        );
        assert!("data".parse::<SequenceType>().is_err());
    }

    #[test]
    fn test_context_kind_template_names() {
        for kind in [
            ContextKind::Dynamic,
            ContextKind::Tmp,
            ContextKind::Segment,
            ContextKind::Sequence,
            ContextKind::Resource,
        ] {
            assert_eq!(kind.template_name().parse::<ContextKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_cleanup_policy_applies() {
        assert!(!CleanupPolicy::Keep.applies(true));
        assert!(CleanupPolicy::DeleteOnExit.applies(false));
        assert!(CleanupPolicy::DeleteOnFail.applies(true));
        assert!(!CleanupPolicy::DeleteOnFail.applies(false));
    }

    #[test]
    fn test_cleanup_policy_serde() {
        let policy: CleanupPolicy = serde_json::from_str("\"delete-on-fail\"").unwrap();
        assert_eq!(policy, CleanupPolicy::DeleteOnFail);
    }

    #[test]
    fn test_scope_display() {
        assert_eq!(Scope::global().to_string(), "global");

        let segment = SegmentId::new();
        let sequence = SequenceId::new();
        let scope = Scope::global()
            .with_segment(segment)
            .with_sequence(SequenceType::Video, sequence);
        assert_eq!(
            scope.to_string(),
            format!("segment={segment} video={sequence}")
        );
        assert_eq!(scope.sequence_id(), Some(sequence));
    }
}
