//! Typed ID wrappers for the package hierarchy.
//!
//! Segments, sequences, and resources are all identified by UUIDs in the
//! source package. Wrapping each in its own newtype keeps a segment id from
//! being passed where a resource id is expected.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Prefix used by package descriptions for UUID references.
const URN_PREFIX: &str = "urn:uuid:";

/// Generate a newtype ID wrapper over `Uuid`.
///
/// The macro produces a struct with:
/// - `new()` to create a random v4 UUID
/// - `Display` rendering the bare UUID
/// - `FromStr` accepting either a bare UUID or a `urn:uuid:` reference
/// - serde support through the string form
macro_rules! typed_id {
    ($($(#[doc = $doc:expr])* $name:ident),+ $(,)?) => {
        $(
            $(#[doc = $doc])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
            #[serde(try_from = "String", into = "String")]
            pub struct $name(Uuid);

            impl $name {
                /// Create a new random ID.
                #[must_use]
                pub fn new() -> Self {
                    Self(Uuid::new_v4())
                }

                /// Return the inner UUID value.
                #[must_use]
                pub fn as_uuid(&self) -> &Uuid {
                    &self.0
                }
            }

            impl Default for $name {
                fn default() -> Self {
                    Self::new()
                }
            }

            impl fmt::Display for $name {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    write!(f, "{}", self.0)
                }
            }

            impl FromStr for $name {
                type Err = uuid::Error;

                fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                    parse_uuid(s).map(Self)
                }
            }

            impl TryFrom<String> for $name {
                type Error = uuid::Error;

                fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
                    s.parse()
                }
            }

            impl From<$name> for String {
                fn from(id: $name) -> Self {
                    id.to_string()
                }
            }

            impl From<Uuid> for $name {
                fn from(uuid: Uuid) -> Self {
                    Self(uuid)
                }
            }

            impl From<$name> for Uuid {
                fn from(id: $name) -> Self {
                    id.0
                }
            }
        )+
    };
}

typed_id! {
    /// Identifier of a segment (a time-ordered partition of the composition).
    SegmentId,
    /// Identifier of a sequence (one virtual track spanning all segments).
    SequenceId,
    /// Identifier of a resource (the essence backing a sequence in a segment).
    ResourceId,
}

fn parse_uuid(s: &str) -> std::result::Result<Uuid, uuid::Error> {
    let trimmed = s.trim();
    let bare = trimmed.strip_prefix(URN_PREFIX).unwrap_or(trimmed);
    Uuid::parse_str(bare)
}
