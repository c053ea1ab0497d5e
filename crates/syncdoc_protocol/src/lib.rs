//! # Syncdoc Protocol
//!
//! Data model and wire envelope for syncdoc.
//!
//! This crate provides:
//! - `Document`, `Delta`, `Snapshot` data types
//! - The `WireMessage` envelope with message kinds, validation,
//!   batching, and opportunistic payload compression
//! - The structured error payload carried over the wire
//!
//! This is a pure protocol crate with no I/O.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod delta;
mod document;
mod envelope;
mod error;
mod snapshot;

pub use delta::Delta;
pub use document::{Document, DocumentMeta, SyncStatus};
pub use envelope::{
    connection_url, ErrorPayload, MessageKind, WireMessage, CODE_AUTH_FAILED, CODE_RATE_LIMITED,
    CODE_STATE_CONFLICT, COMPRESSION_THRESHOLD, PROTOCOL_VERSION,
};
pub use error::{ProtocolError, ProtocolResult};
pub use snapshot::Snapshot;
pub use syncdoc_patch::ChangeRecord;
