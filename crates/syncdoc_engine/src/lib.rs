//! Device-to-server document synchronization.
//!
//! The engine keeps a tree-shaped [`Document`](syncdoc_protocol::Document)
//! consistent across devices over an unreliable transport:
//!
//! - [`transport`] — the connection state machine: heartbeats,
//!   reconnection with jittered backoff, batching and offline queueing
//!   over a pluggable [`Socket`].
//! - [`manager`] — the document's single owner: path-addressed
//!   mutation, debounced sync, snapshots and version-windowed deltas.
//! - [`coordinator`] — presence, advisory path locks and conflict
//!   resolution across sibling devices.
//! - [`replay`] — reconstruction of document state from a snapshot
//!   plus a recorded delta history.
//! - [`session`] — durable session state, token refresh scheduling and
//!   device pairing.
//!
//! Everything is driven cooperatively: callers feed inbound frames in
//! and call `tick` with the current `Instant`; no runtime is assumed.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod coordinator;
pub mod error;
pub mod manager;
pub mod observer;
pub mod replay;
pub mod session;
pub mod transport;

pub use config::{
    ConflictStrategy, ConnectionConfig, CoordinatorConfig, HeartbeatConfig, ManagerConfig,
    RetryConfig,
};
pub use coordinator::{
    ConflictResolution, DeviceLock, DevicePresence, PathConflict, PresenceEvent, PresenceStatus,
    RemoteChangeOutcome, SyncCoordinator,
};
pub use error::{EngineError, EngineResult};
pub use manager::{DocumentManager, MergeStrategy};
pub use observer::{ObserverHandle, Observers};
pub use replay::{
    replay, DeltaQueue, GapFiller, QueueIssue, ReplayConflict, ReplayOptions, ReplayResult,
    ReplayStrategy,
};
pub use session::{
    KeyValueStore, MemoryStore, PairedSession, SessionRecord, SessionStore, TokenGrant,
    TokenRefresher,
};
pub use transport::{
    Connection, ConnectionEvent, ConnectionState, MockSocket, Socket, NO_RETRY_CLOSE_CODES,
};
