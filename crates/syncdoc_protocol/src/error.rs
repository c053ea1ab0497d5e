//! Error types for protocol encoding and validation.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur while building or validating wire messages.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// A message failed structural validation.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// JSON encoding or decoding failed.
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// Payload compression or decompression failed.
    #[error("compression error: {0}")]
    Compression(String),

    /// A snapshot's checksum did not match its contents.
    #[error("snapshot {id} is corrupt: checksum mismatch")]
    SnapshotIntegrity {
        /// The corrupt snapshot's id.
        id: String,
    },
}
