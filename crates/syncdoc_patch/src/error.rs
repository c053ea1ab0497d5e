//! Error types for diff/patch operations.

use serde_json::Value;
use thiserror::Error;

/// Result type for patch operations.
pub type PatchResult<T> = Result<T, PatchError>;

/// Errors that can occur while computing or applying patches.
#[derive(Error, Debug)]
pub enum PatchError {
    /// A path string is not a valid slash-delimited pointer.
    #[error("invalid pointer: {0:?}")]
    InvalidPointer(String),

    /// A path did not resolve to an existing location.
    #[error("path not found: {0:?}")]
    PathNotFound(String),

    /// An array segment is not a valid index.
    #[error("invalid array index {index:?} at {path:?}")]
    InvalidIndex {
        /// The offending path.
        path: String,
        /// The segment that failed to parse as an index.
        index: String,
    },

    /// An array index is outside the bounds of the target array.
    #[error("index {index} out of bounds (len {len}) at {path:?}")]
    IndexOutOfBounds {
        /// The offending path.
        path: String,
        /// The resolved index.
        index: usize,
        /// Length of the target array.
        len: usize,
    },

    /// A `test` operation found a value other than the expected one.
    #[error("test failed at {path:?}")]
    TestFailed {
        /// The tested path.
        path: String,
        /// The expected value.
        expected: Value,
        /// The value actually present.
        actual: Value,
    },
}

impl PatchError {
    /// Returns true if this error came from a failed `test` operation.
    pub fn is_test_failure(&self) -> bool {
        matches!(self, PatchError::TestFailed { .. })
    }
}
