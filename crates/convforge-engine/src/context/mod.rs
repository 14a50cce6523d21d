//! The hierarchical parameter store consulted by templates.
//!
//! A [`ContextStore`] is created once per conversion run and holds five
//! independent sub-stores:
//!
//! - **dynamic** and **tmp**: flat run-scoped maps, mutable at any point;
//! - **segments**: the ordered segment ids (the master iteration order);
//! - **sequences**: per sequence type, ordered sequence ids with parameters;
//! - **resources**: keyed by (segment, sequence type, sequence), ordered
//!   resource ids with parameters.
//!
//! Lookups are always scoped. A missing binding is reported as a
//! [`NotFound`] value rather than a generic error so callers can choose
//! between a default and a fatal [`Error::ParamNotFound`].

mod params;

pub use params::{Param, ParamMap};

use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use convforge_common::{
    CleanupPolicy, ContextKind, Error, ResourceId, Result, Scope, SegmentId, SequenceId,
    SequenceType,
};

/// Which entry of a level a lookup targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selector {
    /// The entry named by the scope descriptor.
    Current,
    /// The entry at this zero-based position among its siblings.
    Index(usize),
}

/// Why a scoped lookup produced nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotFoundReason {
    /// The scope lacks the level the lookup needs.
    MissingScope(&'static str),
    /// The scope names a segment the store does not know.
    UnknownSegment(SegmentId),
    /// The scope names a sequence the store does not know.
    UnknownSequence(SequenceType, SequenceId),
    /// The scope names a resource the store does not know.
    UnknownResource(ResourceId),
    /// An indexed lookup went past the last sibling.
    IndexOutOfRange { index: usize, len: usize },
    /// The entry exists but has no parameter with this name.
    MissingParameter,
    /// This level does not carry parameters.
    NoParameters(ContextKind),
}

impl fmt::Display for NotFoundReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingScope(level) => write!(f, "no {level} in scope"),
            Self::UnknownSegment(id) => write!(f, "unknown segment {id}"),
            Self::UnknownSequence(t, id) => write!(f, "unknown {t} sequence {id}"),
            Self::UnknownResource(id) => write!(f, "unknown resource {id}"),
            Self::IndexOutOfRange { index, len } => {
                write!(f, "index {index} out of range ({len} entries)")
            }
            Self::MissingParameter => write!(f, "not set"),
            Self::NoParameters(kind) => write!(f, "{kind} context has no stored parameters"),
        }
    }
}

/// An expected absence: the reference and why it did not resolve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotFound {
    /// The reference as a template would spell it.
    pub reference: String,
    /// Why the lookup failed.
    pub reason: NotFoundReason,
}

impl NotFound {
    fn new(kind: ContextKind, name: &str, reason: NotFoundReason) -> Self {
        Self {
            reference: format!("%{{{kind}.{name}}}"),
            reason,
        }
    }

    /// Replace the reference text (e.g. with an indexed spelling).
    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = reference.into();
        self
    }
}

impl fmt::Display for NotFound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.reference, self.reason)
    }
}

impl From<NotFound> for Error {
    fn from(nf: NotFound) -> Self {
        Error::param_not_found(nf.reference, nf.reason.to_string())
    }
}

/// Composite key of the resource context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceKey {
    pub segment: SegmentId,
    pub seq_type: SequenceType,
    pub sequence: SequenceId,
}

#[derive(Debug, Clone)]
struct SequenceEntry {
    id: SequenceId,
    params: ParamMap,
}

#[derive(Debug, Clone)]
struct ResourceEntry {
    id: ResourceId,
    params: ParamMap,
}

/// Names answered by the store itself rather than by stored parameters.
const BUILTIN_UUID: &str = "uuid";
const BUILTIN_INDEX: &str = "index";
const BUILTIN_NUM: &str = "num";
const BUILTIN_TYPE: &str = "type";

/// The hierarchical parameter database for one conversion run.
#[derive(Debug, Clone, Default)]
pub struct ContextStore {
    dynamic: ParamMap,
    tmp: ParamMap,
    segments: Vec<SegmentId>,
    sequences: BTreeMap<SequenceType, Vec<SequenceEntry>>,
    resources: HashMap<ResourceKey, Vec<ResourceEntry>>,
    owners: HashMap<ResourceId, ResourceKey>,
}

impl ContextStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    // ---------------------------------------------------------------------
    // Registration
    // ---------------------------------------------------------------------

    /// Register a segment. Duplicates are ignored.
    pub fn add_segment(&mut self, segment: SegmentId) {
        if !self.segments.contains(&segment) {
            self.segments.push(segment);
        }
    }

    /// Register a sequence. Duplicates are ignored.
    pub fn add_sequence(&mut self, seq_type: SequenceType, sequence: SequenceId) {
        let list = self.sequences.entry(seq_type).or_default();
        if !list.iter().any(|e| e.id == sequence) {
            list.push(SequenceEntry {
                id: sequence,
                params: ParamMap::new(),
            });
        }
    }

    /// Register a resource under its (segment, sequence) pair.
    ///
    /// Both the segment and the sequence must already be registered, and a
    /// resource belongs to exactly one (segment, sequence) pair: registering
    /// it again under another pair is a configuration error.
    pub fn add_resource(
        &mut self,
        segment: SegmentId,
        seq_type: SequenceType,
        sequence: SequenceId,
        resource: ResourceId,
    ) -> Result<()> {
        if !self.segments.contains(&segment) {
            return Err(NotFound::new(
                ContextKind::Resource,
                BUILTIN_UUID,
                NotFoundReason::UnknownSegment(segment),
            )
            .into());
        }
        if !self.sequence_list(seq_type).iter().any(|e| e.id == sequence) {
            return Err(NotFound::new(
                ContextKind::Resource,
                BUILTIN_UUID,
                NotFoundReason::UnknownSequence(seq_type, sequence),
            )
            .into());
        }

        let key = ResourceKey {
            segment,
            seq_type,
            sequence,
        };
        if let Some(owner) = self.owners.get(&resource) {
            if *owner != key {
                return Err(Error::config(format!(
                    "resource {resource} already belongs to segment {} {} sequence {}",
                    owner.segment, owner.seq_type, owner.sequence
                )));
            }
        }
        self.owners.insert(resource, key);

        let list = self.resources.entry(key).or_default();
        if !list.iter().any(|e| e.id == resource) {
            list.push(ResourceEntry {
                id: resource,
                params: ParamMap::new(),
            });
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Parameters
    // ---------------------------------------------------------------------

    /// Add (or replace) a parameter in the store selected by `kind`.
    ///
    /// Dynamic and tmp parameters ignore the scope; sequence and resource
    /// parameters attach to the entry the scope names.
    pub fn add_parameter(
        &mut self,
        kind: ContextKind,
        scope: &Scope,
        name: &str,
        value: impl Into<String>,
        cleanup: CleanupPolicy,
    ) -> std::result::Result<(), NotFound> {
        let param = Param {
            value: value.into(),
            cleanup,
        };

        let map = match kind {
            ContextKind::Dynamic => &mut self.dynamic,
            ContextKind::Tmp => &mut self.tmp,
            ContextKind::Segment => {
                return Err(NotFound::new(
                    kind,
                    name,
                    NotFoundReason::NoParameters(kind),
                ))
            }
            ContextKind::Sequence => self.sequence_params_mut(scope, name)?,
            ContextKind::Resource => self.resource_params_mut(scope, name)?,
        };
        map.insert(name, param);
        Ok(())
    }

    /// Look up a parameter for the entry the scope names.
    pub fn get_parameter(
        &self,
        kind: ContextKind,
        scope: &Scope,
        name: &str,
    ) -> std::result::Result<Cow<'_, str>, NotFound> {
        self.lookup(kind, scope, Selector::Current, name)
    }

    /// Whether [`get_parameter`](Self::get_parameter) would succeed.
    pub fn has_parameter(&self, kind: ContextKind, scope: &Scope, name: &str) -> bool {
        self.get_parameter(kind, scope, name).is_ok()
    }

    /// Scoped lookup with an explicit sibling selector.
    ///
    /// Built-in names (`uuid`, `index`, `num`, and `type` for sequences) are
    /// answered before stored parameters.
    pub fn lookup(
        &self,
        kind: ContextKind,
        scope: &Scope,
        selector: Selector,
        name: &str,
    ) -> std::result::Result<Cow<'_, str>, NotFound> {
        let missing = |reason| NotFound::new(kind, name, reason);

        match kind {
            ContextKind::Dynamic | ContextKind::Tmp => {
                let map = if kind == ContextKind::Dynamic {
                    &self.dynamic
                } else {
                    &self.tmp
                };
                map.value(name)
                    .map(Cow::Borrowed)
                    .ok_or_else(|| missing(NotFoundReason::MissingParameter))
            }
            ContextKind::Segment => {
                if name == BUILTIN_NUM {
                    return Ok(Cow::Owned(self.segments.len().to_string()));
                }
                let (index, id) = self.segment_entry(scope, selector).map_err(missing)?;
                match name {
                    BUILTIN_UUID => Ok(Cow::Owned(id.to_string())),
                    BUILTIN_INDEX => Ok(Cow::Owned(index.to_string())),
                    _ => Err(missing(NotFoundReason::NoParameters(kind))),
                }
            }
            ContextKind::Sequence => {
                let seq_type = scope
                    .sequence_type()
                    .ok_or_else(|| missing(NotFoundReason::MissingScope("sequence")))?;
                if name == BUILTIN_NUM {
                    return Ok(Cow::Owned(self.sequence_list(seq_type).len().to_string()));
                }
                if name == BUILTIN_TYPE {
                    return Ok(Cow::Owned(seq_type.to_string()));
                }
                let (index, entry) = self.sequence_entry(scope, selector).map_err(missing)?;
                match name {
                    BUILTIN_UUID => Ok(Cow::Owned(entry.id.to_string())),
                    BUILTIN_INDEX => Ok(Cow::Owned(index.to_string())),
                    _ => entry
                        .params
                        .value(name)
                        .map(Cow::Borrowed)
                        .ok_or_else(|| missing(NotFoundReason::MissingParameter)),
                }
            }
            ContextKind::Resource => {
                let list = self.resource_list(scope).map_err(missing)?;
                if name == BUILTIN_NUM {
                    return Ok(Cow::Owned(list.len().to_string()));
                }
                let (index, entry) =
                    Self::resource_entry(list, scope, selector).map_err(missing)?;
                match name {
                    BUILTIN_UUID => Ok(Cow::Owned(entry.id.to_string())),
                    BUILTIN_INDEX => Ok(Cow::Owned(index.to_string())),
                    _ => entry
                        .params
                        .value(name)
                        .map(Cow::Borrowed)
                        .ok_or_else(|| missing(NotFoundReason::MissingParameter)),
                }
            }
        }
    }

    /// Set a dynamic parameter that is never cleaned up.
    pub fn set_dynamic(&mut self, name: &str, value: impl Into<String>) {
        self.dynamic.insert(name, Param::keep(value));
    }

    /// Read a dynamic parameter.
    pub fn dynamic_value(&self, name: &str) -> Option<&str> {
        self.dynamic.value(name)
    }

    /// Set a tmp parameter with the given cleanup policy.
    pub fn set_tmp(&mut self, name: &str, value: impl Into<String>, cleanup: CleanupPolicy) {
        self.tmp.insert(
            name,
            Param {
                value: value.into(),
                cleanup,
            },
        );
    }

    /// Every stored entry of a context kind, in insertion order.
    ///
    /// Used by cleanup scans. The segment context has no stored entries.
    pub fn all_parameters(&self, kind: ContextKind) -> Vec<(&str, &Param)> {
        match kind {
            ContextKind::Dynamic => self.dynamic.iter().collect(),
            ContextKind::Tmp => self.tmp.iter().collect(),
            ContextKind::Segment => Vec::new(),
            ContextKind::Sequence => self
                .sequences
                .values()
                .flatten()
                .flat_map(|e| e.params.iter())
                .collect(),
            ContextKind::Resource => {
                let mut out = Vec::new();
                for key in self.resource_keys() {
                    if let Some(list) = self.resources.get(&key) {
                        out.extend(list.iter().flat_map(|e| e.params.iter()));
                    }
                }
                out
            }
        }
    }

    // ---------------------------------------------------------------------
    // Iteration
    // ---------------------------------------------------------------------

    /// Ordered ids of one level, narrowed by the scope.
    ///
    /// - segments: every segment;
    /// - sequences: those of the scope's sequence type, or every sequence;
    /// - resources: those of the scope's segment and sequence.
    pub fn uuids_for(
        &self,
        kind: ContextKind,
        scope: &Scope,
    ) -> std::result::Result<Vec<String>, NotFound> {
        match kind {
            ContextKind::Segment => Ok(self.segments.iter().map(|s| s.to_string()).collect()),
            ContextKind::Sequence => Ok(match scope.sequence_type() {
                Some(t) => self.sequence_ids(t).iter().map(|s| s.to_string()).collect(),
                None => self
                    .sequences()
                    .iter()
                    .map(|(_, s)| s.to_string())
                    .collect(),
            }),
            ContextKind::Resource => {
                let list = self
                    .resource_list(scope)
                    .map_err(|r| NotFound::new(kind, BUILTIN_UUID, r))?;
                Ok(list.iter().map(|e| e.id.to_string()).collect())
            }
            ContextKind::Dynamic | ContextKind::Tmp => Err(NotFound::new(
                kind,
                BUILTIN_UUID,
                NotFoundReason::NoParameters(kind),
            )),
        }
    }

    /// Segment ids in master iteration order.
    pub fn segments(&self) -> &[SegmentId] {
        &self.segments
    }

    /// Every (type, id) sequence pair in sequence context order.
    pub fn sequences(&self) -> Vec<(SequenceType, SequenceId)> {
        self.sequences
            .iter()
            .flat_map(|(t, list)| list.iter().map(move |e| (*t, e.id)))
            .collect()
    }

    /// Sequence ids of one type in order.
    pub fn sequence_ids(&self, seq_type: SequenceType) -> Vec<SequenceId> {
        self.sequence_list(seq_type).iter().map(|e| e.id).collect()
    }

    /// Resource ids of one (segment, sequence) pair in order.
    pub fn resource_ids(
        &self,
        segment: SegmentId,
        seq_type: SequenceType,
        sequence: SequenceId,
    ) -> Vec<ResourceId> {
        let key = ResourceKey {
            segment,
            seq_type,
            sequence,
        };
        self.resources
            .get(&key)
            .map(|list| list.iter().map(|e| e.id).collect())
            .unwrap_or_default()
    }

    // ---------------------------------------------------------------------
    // Invariant checks
    // ---------------------------------------------------------------------

    /// Require every resource of a sequence to report identical values for
    /// each of `names`.
    ///
    /// Resources are compared across all segments in segment order. A value
    /// that is unset on one resource and set on another is a mismatch.
    pub fn check_homogeneous(
        &self,
        seq_type: SequenceType,
        sequence: SequenceId,
        names: &[&str],
    ) -> Result<()> {
        let mut resources: Vec<&ResourceEntry> = Vec::new();
        for &segment in &self.segments {
            let key = ResourceKey {
                segment,
                seq_type,
                sequence,
            };
            if let Some(list) = self.resources.get(&key) {
                resources.extend(list.iter());
            }
        }

        let Some((first, rest)) = resources.split_first() else {
            return Ok(());
        };

        for name in names {
            let expected = first.params.value(name);
            for other in rest {
                let actual = other.params.value(name);
                if actual != expected {
                    return Err(Error::homogeneity(
                        sequence,
                        format!(
                            "{name} differs: resource {} has {}, resource {} has {}",
                            first.id,
                            expected.unwrap_or("<unset>"),
                            other.id,
                            actual.unwrap_or("<unset>"),
                        ),
                    ));
                }
            }
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Internal helpers
    // ---------------------------------------------------------------------

    fn sequence_list(&self, seq_type: SequenceType) -> &[SequenceEntry] {
        self.sequences
            .get(&seq_type)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    fn resource_keys(&self) -> Vec<ResourceKey> {
        let mut keys = Vec::new();
        for &segment in &self.segments {
            for (seq_type, sequence) in self.sequences() {
                let key = ResourceKey {
                    segment,
                    seq_type,
                    sequence,
                };
                if self.resources.contains_key(&key) {
                    keys.push(key);
                }
            }
        }
        keys
    }

    fn segment_entry(
        &self,
        scope: &Scope,
        selector: Selector,
    ) -> std::result::Result<(usize, SegmentId), NotFoundReason> {
        match selector {
            Selector::Current => {
                let id = scope
                    .segment
                    .ok_or(NotFoundReason::MissingScope("segment"))?;
                self.segments
                    .iter()
                    .position(|s| *s == id)
                    .map(|i| (i, id))
                    .ok_or(NotFoundReason::UnknownSegment(id))
            }
            Selector::Index(index) => self
                .segments
                .get(index)
                .map(|id| (index, *id))
                .ok_or(NotFoundReason::IndexOutOfRange {
                    index,
                    len: self.segments.len(),
                }),
        }
    }

    fn sequence_entry(
        &self,
        scope: &Scope,
        selector: Selector,
    ) -> std::result::Result<(usize, &SequenceEntry), NotFoundReason> {
        let (seq_type, id) = scope
            .sequence
            .ok_or(NotFoundReason::MissingScope("sequence"))?;
        let list = self.sequence_list(seq_type);
        match selector {
            Selector::Current => list
                .iter()
                .enumerate()
                .find(|(_, e)| e.id == id)
                .ok_or(NotFoundReason::UnknownSequence(seq_type, id)),
            Selector::Index(index) => list
                .get(index)
                .map(|e| (index, e))
                .ok_or(NotFoundReason::IndexOutOfRange {
                    index,
                    len: list.len(),
                }),
        }
    }

    fn resource_list(&self, scope: &Scope) -> std::result::Result<&[ResourceEntry], NotFoundReason> {
        let segment = scope
            .segment
            .ok_or(NotFoundReason::MissingScope("segment"))?;
        let (seq_type, sequence) = scope
            .sequence
            .ok_or(NotFoundReason::MissingScope("sequence"))?;
        let key = ResourceKey {
            segment,
            seq_type,
            sequence,
        };
        Ok(self
            .resources
            .get(&key)
            .map(Vec::as_slice)
            .unwrap_or_default())
    }

    fn resource_entry<'a>(
        list: &'a [ResourceEntry],
        scope: &Scope,
        selector: Selector,
    ) -> std::result::Result<(usize, &'a ResourceEntry), NotFoundReason> {
        match selector {
            Selector::Current => {
                let id = scope
                    .resource
                    .ok_or(NotFoundReason::MissingScope("resource"))?;
                list.iter()
                    .enumerate()
                    .find(|(_, e)| e.id == id)
                    .ok_or(NotFoundReason::UnknownResource(id))
            }
            Selector::Index(index) => list
                .get(index)
                .map(|e| (index, e))
                .ok_or(NotFoundReason::IndexOutOfRange {
                    index,
                    len: list.len(),
                }),
        }
    }

    fn sequence_params_mut(
        &mut self,
        scope: &Scope,
        name: &str,
    ) -> std::result::Result<&mut ParamMap, NotFound> {
        let missing = |reason| NotFound::new(ContextKind::Sequence, name, reason);
        let (seq_type, id) = scope
            .sequence
            .ok_or_else(|| missing(NotFoundReason::MissingScope("sequence")))?;
        self.sequences
            .get_mut(&seq_type)
            .and_then(|list| list.iter_mut().find(|e| e.id == id))
            .map(|e| &mut e.params)
            .ok_or_else(|| missing(NotFoundReason::UnknownSequence(seq_type, id)))
    }

    fn resource_params_mut(
        &mut self,
        scope: &Scope,
        name: &str,
    ) -> std::result::Result<&mut ParamMap, NotFound> {
        let missing = |reason| NotFound::new(ContextKind::Resource, name, reason);
        let segment = scope
            .segment
            .ok_or_else(|| missing(NotFoundReason::MissingScope("segment")))?;
        let (seq_type, sequence) = scope
            .sequence
            .ok_or_else(|| missing(NotFoundReason::MissingScope("sequence")))?;
        let resource = scope
            .resource
            .ok_or_else(|| missing(NotFoundReason::MissingScope("resource")))?;
        let key = ResourceKey {
            segment,
            seq_type,
            sequence,
        };
        self.resources
            .get_mut(&key)
            .and_then(|list| list.iter_mut().find(|e| e.id == resource))
            .map(|e| &mut e.params)
            .ok_or_else(|| missing(NotFoundReason::UnknownResource(resource)))
    }
}
