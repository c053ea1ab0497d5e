//! Error types for the sync engine.

use syncdoc_protocol::{ErrorPayload, CODE_AUTH_FAILED, CODE_RATE_LIMITED, CODE_STATE_CONFLICT};
use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that can occur in the sync engine.
#[derive(Error, Debug)]
pub enum EngineError {
    /// The connection failed or dropped; reconnection applies.
    #[error("connection error: {0}")]
    Connection(String),

    /// Authentication was rejected; no reconnect is attempted.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// The server saw a different document version than expected.
    #[error("state conflict: expected version {expected}, received {received}")]
    StateConflict {
        /// Version the server expected.
        expected: u64,
        /// Version it received.
        received: u64,
    },

    /// The server rejected the request for rate limiting.
    #[error("rate limited: {0}")]
    RateLimit(String),

    /// Any other transport-level failure.
    #[error("transport error [{code}]: {message}")]
    Transport {
        /// Server-provided error code.
        code: String,
        /// Error description.
        message: String,
        /// Whether the operation can be retried.
        recoverable: bool,
    },

    /// A patch operation failed, including `test` assertion failures.
    #[error(transparent)]
    Patch(#[from] syncdoc_patch::PatchError),

    /// A protocol-level failure, including snapshot checksum mismatches.
    #[error(transparent)]
    Protocol(#[from] syncdoc_protocol::ProtocolError),

    /// The transport is not connected.
    #[error("not connected")]
    NotConnected,

    /// All reconnection attempts were exhausted.
    #[error("reconnection gave up after {attempts} attempts")]
    ReconnectExhausted {
        /// Number of attempts made.
        attempts: u32,
    },

    /// An outgoing sync failed.
    #[error("sync failed: {0}")]
    SyncFailed(String),

    /// A requested snapshot does not exist.
    #[error("snapshot not found: {0}")]
    SnapshotNotFound(String),
}

impl EngineError {
    /// Returns true if the caller may retry after this error.
    pub fn is_recoverable(&self) -> bool {
        match self {
            EngineError::Connection(_) => true,
            EngineError::StateConflict { .. } => true,
            EngineError::RateLimit(_) => true,
            EngineError::Transport { recoverable, .. } => *recoverable,
            EngineError::SyncFailed(_) => true,
            EngineError::NotConnected => true,
            _ => false,
        }
    }
}

impl From<ErrorPayload> for EngineError {
    fn from(payload: ErrorPayload) -> Self {
        match payload.code.as_str() {
            CODE_AUTH_FAILED => EngineError::Authentication(payload.message),
            CODE_STATE_CONFLICT => {
                let expected = payload
                    .details
                    .as_ref()
                    .and_then(|d| d.get("expected"))
                    .and_then(|v| v.as_u64())
                    .unwrap_or(0);
                let received = payload
                    .details
                    .as_ref()
                    .and_then(|d| d.get("received"))
                    .and_then(|v| v.as_u64())
                    .unwrap_or(0);
                EngineError::StateConflict { expected, received }
            }
            CODE_RATE_LIMITED => EngineError::RateLimit(payload.message),
            code => EngineError::Transport {
                code: code.to_string(),
                message: payload.message,
                recoverable: payload.recoverable,
            },
        }
    }
}
