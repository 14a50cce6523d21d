//! Package scaffold files: the segments, sequences and resources of the
//! package being converted, with their initial parameters.

use anyhow::{Context, Result};
use convforge_common::{
    CleanupPolicy, ContextKind, Error, ResourceId, Scope, SegmentId, SequenceId, SequenceType,
};
use convforge_engine::ContextStore;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Package {
    /// Segments in playback order.
    #[serde(default)]
    pub segments: Vec<SegmentId>,

    #[serde(default)]
    pub sequences: Vec<SequenceEntry>,

    #[serde(default)]
    pub resources: Vec<ResourceEntry>,

    /// Initial dynamic parameters.
    #[serde(default)]
    pub dynamic: BTreeMap<String, ParamValue>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SequenceEntry {
    #[serde(rename = "type")]
    pub seq_type: SequenceType,
    pub id: SequenceId,
    #[serde(default)]
    pub parameters: BTreeMap<String, ParamValue>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResourceEntry {
    pub segment: SegmentId,
    pub sequence: SequenceId,
    #[serde(rename = "type")]
    pub seq_type: SequenceType,
    pub id: ResourceId,
    #[serde(default)]
    pub parameters: BTreeMap<String, ParamValue>,
}

/// A scalar parameter value. Numbers and booleans are stored as text.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Text(String),
    Number(serde_json::Number),
    Bool(bool),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => f.write_str(s),
            Self::Number(n) => write!(f, "{n}"),
            Self::Bool(b) => write!(f, "{b}"),
        }
    }
}

impl Package {
    /// Build the context store for one run.
    pub fn into_store(self) -> Result<ContextStore> {
        let mut store = ContextStore::new();

        for segment in self.segments {
            store.add_segment(segment);
        }

        for seq in self.sequences {
            store.add_sequence(seq.seq_type, seq.id);
            let scope = Scope::global().with_sequence(seq.seq_type, seq.id);
            for (name, value) in seq.parameters {
                store
                    .add_parameter(
                        ContextKind::Sequence,
                        &scope,
                        &name,
                        value.to_string(),
                        CleanupPolicy::Keep,
                    )
                    .map_err(Error::from)?;
            }
        }

        for res in self.resources {
            store
                .add_resource(res.segment, res.seq_type, res.sequence, res.id)
                .with_context(|| format!("Failed to register resource {}", res.id))?;
            let scope = Scope::global()
                .with_segment(res.segment)
                .with_sequence(res.seq_type, res.sequence)
                .with_resource(res.id);
            for (name, value) in res.parameters {
                store
                    .add_parameter(
                        ContextKind::Resource,
                        &scope,
                        &name,
                        value.to_string(),
                        CleanupPolicy::Keep,
                    )
                    .map_err(Error::from)?;
            }
        }

        for (name, value) in self.dynamic {
            store.set_dynamic(&name, value.to_string());
        }

        Ok(store)
    }
}

/// Load a package scaffold from a JSON file.
pub fn load_package(path: &Path) -> Result<Package> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read package file: {:?}", path))?;

    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse package file: {:?}", path))
}
