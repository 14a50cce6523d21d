//! Unified error type for convforge.
//!
//! Every fatal condition raised by the engine funnels into [`Error`]. Expected
//! absence (a parameter lookup that may fall back to a default) is modelled
//! separately by the context store and only becomes
//! [`Error::ParamNotFound`] once a caller decides the absence is fatal.

/// Common error type for convforge.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A template reference has no binding in the current scope.
    #[error("parameter not found: {reference} ({reason})")]
    ParamNotFound {
        /// The reference as written, e.g. `%{seq.fps}`.
        reference: String,
        /// Why the lookup failed.
        reason: String,
    },

    /// A template could not be parsed or evaluated.
    #[error("template error in '{template}': {message}")]
    Template {
        /// The offending template text.
        template: String,
        /// Human-readable description.
        message: String,
    },

    /// The pipeline description or application config is invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// The OS could not start a process.
    #[error("failed to start {program} for {operation}: {source}")]
    Spawn {
        /// Display name of the program.
        program: String,
        /// Operation that tried to start it.
        operation: String,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// An external tool reported failure.
    #[error("{program} exited with {status} in {operation}")]
    ProcessFailed {
        /// Display name of the program.
        program: String,
        /// Operation that started it.
        operation: String,
        /// Exit status description.
        status: String,
    },

    /// Resources of one sequence disagree on a parameter that must match.
    #[error("inhomogeneous sequence {sequence}: {message}")]
    Homogeneity {
        /// The sequence being checked.
        sequence: String,
        /// Which parameter differed and how.
        message: String,
    },

    /// A required external tool is not available.
    #[error("tool not found: {0}")]
    ToolNotFound(String),

    /// Media probing failed.
    #[error("probe error: {0}")]
    Probe(String),

    /// A declared operation failed; carries the operation name and scope.
    #[error("operation {operation} failed at {scope}: {source}")]
    Operation {
        /// Operation display name.
        operation: String,
        /// Scope display (segment/sequence/resource ids).
        scope: String,
        /// The underlying cause.
        #[source]
        source: Box<Error>,
    },

    /// An I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON decoding failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// An internal error occurred.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new ParamNotFound error.
    pub fn param_not_found(reference: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ParamNotFound {
            reference: reference.into(),
            reason: reason.into(),
        }
    }

    /// Create a new Template error.
    pub fn template(template: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Template {
            template: template.into(),
            message: message.into(),
        }
    }

    /// Create a new Config error.
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new Homogeneity error.
    pub fn homogeneity(sequence: impl ToString, message: impl Into<String>) -> Self {
        Self::Homogeneity {
            sequence: sequence.to_string(),
            message: message.into(),
        }
    }

    /// Create a new Internal error.
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Wrap `self` with the operation and scope it occurred in.
    ///
    /// Errors that already carry operation context are returned unchanged so
    /// nested dispatch levels do not stack wrappers.
    pub fn in_operation(self, operation: impl Into<String>, scope: impl ToString) -> Self {
        match self {
            Self::Operation { .. } => self,
            other => Self::Operation {
                operation: operation.into(),
                scope: scope.to_string(),
                source: Box::new(other),
            },
        }
    }

    /// The innermost error, skipping operation wrappers.
    pub fn root_cause(&self) -> &Error {
        match self {
            Self::Operation { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

/// Result type alias using the common Error type.
pub type Result<T> = std::result::Result<T, Error>;
