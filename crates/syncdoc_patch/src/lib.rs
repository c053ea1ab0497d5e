//! # Syncdoc Patch
//!
//! Structural diff/patch computation for tree-shaped documents.
//!
//! This crate provides:
//! - Slash-delimited path addressing with `~0`/`~1` escaping
//! - `diff` producing a minimal ordered sequence of patch operations
//! - `apply` mutating a document and emitting change records
//! - Order-independent content fingerprinting
//! - A bounded, TTL-evicted delta cache
//!
//! This is a pure algorithms crate with no I/O.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod apply;
mod cache;
mod diff;
mod error;
mod fingerprint;
mod operation;
pub mod pointer;

pub use apply::{apply, ChangeRecord};
pub use cache::DeltaCache;
pub use diff::{diff, diff_with_options, DiffOptions};
pub use error::{PatchError, PatchResult};
pub use fingerprint::{checksum, fingerprint};
pub use operation::PatchOp;
