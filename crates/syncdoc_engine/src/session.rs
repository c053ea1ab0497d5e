//! Session persistence, token refresh scheduling, and device pairing.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// A minimal string key-value store.
///
/// Implementations may be durable (browser storage, a file) or
/// volatile; the session store degrades gracefully when the durable
/// backend fails.
pub trait KeyValueStore: Send {
    /// Reads a value.
    fn get(&self, key: &str) -> Option<String>;
    /// Writes a value. May fail (quota, I/O).
    fn set(&mut self, key: &str, value: &str) -> Result<(), String>;
    /// Removes a value.
    fn remove(&mut self, key: &str);
}

/// An in-memory store; always succeeds.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: HashMap<String, String>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), String> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) {
        self.entries.remove(key);
    }
}

/// Durable session state written on every save.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// The session id.
    #[serde(rename = "sessionId")]
    pub session_id: String,
    /// This device's id.
    #[serde(rename = "deviceId")]
    pub device_id: String,
    /// Last document version acknowledged by the server.
    #[serde(rename = "serverVersion")]
    pub server_version: u64,
    /// When the record was saved.
    #[serde(rename = "savedAt")]
    pub saved_at: DateTime<Utc>,
}

const SESSION_KEY: &str = "syncdoc.session";

/// Persists session state through a durable backend, falling back to
/// memory when the backend fails.
///
/// Once a write fails the store stays on the memory fallback; session
/// state survives the process but not a restart.
pub struct SessionStore {
    backend: Box<dyn KeyValueStore>,
    fallback: MemoryStore,
    degraded: bool,
}

impl SessionStore {
    /// Creates a store over a backend.
    pub fn new(backend: Box<dyn KeyValueStore>) -> Self {
        Self {
            backend,
            fallback: MemoryStore::new(),
            degraded: false,
        }
    }

    /// Returns true if the durable backend has failed.
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// Saves the session record.
    pub fn save(&mut self, record: &SessionRecord) {
        let encoded = match serde_json::to_string(record) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(error = %e, "session record not serializable");
                return;
            }
        };
        if !self.degraded {
            match self.backend.set(SESSION_KEY, &encoded) {
                Ok(()) => return,
                Err(e) => {
                    tracing::warn!(error = %e, "session storage failed; falling back to memory");
                    self.degraded = true;
                }
            }
        }
        // MemoryStore::set cannot fail.
        let _ = self.fallback.set(SESSION_KEY, &encoded);
    }

    /// Loads the saved session record, if any.
    pub fn load(&self) -> Option<SessionRecord> {
        let raw = if self.degraded {
            self.fallback.get(SESSION_KEY)
        } else {
            self.backend.get(SESSION_KEY)
        }?;
        match serde_json::from_str(&raw) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!(error = %e, "saved session unreadable; discarding");
                None
            }
        }
    }

    /// Clears the saved session.
    pub fn clear(&mut self) {
        self.backend.remove(SESSION_KEY);
        self.fallback.remove(SESSION_KEY);
    }
}

/// A granted access token with its expiry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenGrant {
    /// The bearer token.
    #[serde(rename = "accessToken")]
    pub access_token: String,
    /// When the token expires.
    #[serde(rename = "expiresAt")]
    pub expires_at: DateTime<Utc>,
}

impl TokenGrant {
    /// When the token should be refreshed: ahead of expiry by the
    /// given margin, never in the past.
    pub fn refresh_at(&self, margin: ChronoDuration) -> DateTime<Utc> {
        let at = self.expires_at - margin;
        at.max(Utc::now())
    }

    /// Returns true once the token has expired.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Exchanges an expiring grant for a fresh one.
pub trait TokenRefresher: Send {
    /// Obtains a new grant. Errors are retried by the caller.
    fn refresh(&mut self, current: &TokenGrant) -> Result<TokenGrant, String>;
}

/// A session handed over from another device during pairing: the
/// session id plus the document state to start from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairedSession {
    /// The shared session id.
    #[serde(rename = "sessionId")]
    pub session_id: String,
    /// Document data at handoff.
    #[serde(rename = "initialDocument")]
    pub initial_document: Value,
    /// Document version at handoff.
    pub version: u64,
}

impl PairedSession {
    /// Starts a brand-new session with an empty document.
    pub fn fresh() -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            initial_document: Value::Object(serde_json::Map::new()),
            version: 0,
        }
    }
}

/// A shared handle to a session store, for callers on multiple
/// components.
pub type SharedSessionStore = Arc<Mutex<SessionStore>>;
