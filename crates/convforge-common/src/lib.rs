//! Convforge-Common: Shared types and errors for the conversion engine.
//!
//! This crate provides common functionality used across convforge:
//!
//! - **Typed IDs**: UUID wrappers for segments, sequences, and resources
//! - **Core Types**: Closed enums for sequence types, context kinds, and
//!   cleanup policies, plus the [`Scope`] descriptor
//! - **Error Handling**: The unified [`Error`] type and [`Result`] alias
//!
//! # Examples
//!
//! ```
//! use convforge_common::{Scope, SegmentId, SequenceId, SequenceType};
//!
//! let segment = SegmentId::new();
//! let sequence = SequenceId::new();
//!
//! let scope = Scope::global()
//!     .with_segment(segment)
//!     .with_sequence(SequenceType::Audio, sequence);
//!
//! assert!(!scope.is_global());
//! assert_eq!(scope.sequence_type(), Some(SequenceType::Audio));
//! ```

pub mod error;
pub mod ids;
pub mod types;

pub use error::{Error, Result};
pub use ids::*;
pub use types::*;
