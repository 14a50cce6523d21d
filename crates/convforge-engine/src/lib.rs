//! # convforge-engine
//!
//! Template-driven execution of external media tools.
//!
//! A conversion is described by a [`Pipeline`] of declarative operations
//! (run a command once, run it per segment or per sequence, chain commands
//! through OS pipes, derive parameters) and a [`ContextStore`] describing
//! the package being converted. The [`ConversionEngine`] resolves every
//! command template against the store and runs the resulting processes.
//!
//! ## Example
//!
//! ```
//! use convforge_engine::context::ContextStore;
//! use convforge_engine::template::Template;
//! use convforge_common::Scope;
//!
//! let mut store = ContextStore::new();
//! store.set_dynamic("input", "movie one.mov");
//!
//! let template = Template::parse("ffprobe -i %{dynamic.input}")?;
//! let argv = template.resolve_argv(&mut store, &Scope::global())?;
//! assert_eq!(argv, ["ffprobe", "-i", "movie one.mov"]);
//! # Ok::<(), convforge_common::Error>(())
//! ```

pub mod audio;
pub mod cleanup;
pub mod context;
mod engine;
pub mod exec;
pub mod operation;
pub mod pipe;
pub mod probe;
pub mod template;
pub mod tools;
pub mod workspace;

// Re-exports
pub use cleanup::CleanupReport;
pub use context::ContextStore;
pub use engine::{validate, ConversionEngine};
pub use exec::ExecEnv;
pub use operation::{Operation, Pipeline};
pub use tools::{ToolInfo, ToolRegistry};
pub use workspace::Workspace;
