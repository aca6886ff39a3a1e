//! Error types for rustomo-core.

use crate::params::ParamField;
use thiserror::Error;

/// Result type alias for rustomo operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for rustomo operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// A path expected in the source tree or on disk does not exist.
    #[error("not found: {path}")]
    NotFound { path: String },

    /// A physical source does not fit the slab it was assigned.
    #[error("shape mismatch for {path}: expected {expected:?}, found {found:?}")]
    ShapeMismatch {
        path: String,
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    /// A required acquisition parameter was never seen during the walk.
    #[error("missing acquisition parameter: {0}")]
    MissingParameter(ParamField),

    /// Metadata exists but cannot be interpreted.
    #[error("malformed metadata at {path}: {reason}")]
    MalformedMetadata { path: String, reason: String },

    /// A group already holds a child with this name.
    #[error("duplicate child {name:?} under {parent}")]
    DuplicateChild { parent: String, name: String },

    /// Invalid node handle for the tree it was used with.
    #[error("invalid node id: {0}")]
    InvalidNode(usize),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Returns true when the error only affects a single scan record.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::ShapeMismatch { .. })
    }
}
