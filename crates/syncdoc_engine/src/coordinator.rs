//! Multi-device coordination: presence, optimistic path locks,
//! conflict resolution and broadcast coalescing.

use crate::config::{ConflictStrategy, CoordinatorConfig};
use crate::error::EngineResult;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Instant;
use syncdoc_patch::{apply, pointer, ChangeRecord};
use syncdoc_protocol::{Delta, Document, MessageKind, SyncStatus, WireMessage};

/// Presence of a sibling device within the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceStatus {
    /// Seen recently.
    Online,
    /// Inactive past the staleness threshold.
    Away,
    /// Announced its departure.
    Offline,
}

/// What a sibling device is up to.
#[derive(Debug, Clone)]
pub struct DevicePresence {
    /// The device's id.
    pub device_id: String,
    /// Current presence.
    pub status: PresenceStatus,
    /// Last time the device was heard from.
    pub last_seen_at: Instant,
    /// Number of changes the device reported as unsynced.
    pub pending_changes: u64,
}

/// Presence transitions surfaced to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceEvent {
    /// A device joined the session.
    Joined(String),
    /// A device left the session.
    Left(String),
    /// A device went quiet past the staleness threshold.
    WentAway(String),
}

/// An advisory lock on a document path.
///
/// Locks are optimistic: they gate conflict detection, not mutation.
#[derive(Debug, Clone)]
pub struct DeviceLock {
    /// The locked path.
    pub path: String,
    /// The holder.
    pub device_id: String,
    /// When the lock was taken.
    pub locked_at: Instant,
    /// When the lock lapses.
    pub expires_at: Instant,
    /// Document version at lock time.
    pub version: u64,
}

impl DeviceLock {
    /// Returns true once the lock has lapsed.
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// How a detected conflict was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictResolution {
    /// The remote edit was applied.
    AcceptRemote,
    /// The local value was kept.
    KeepLocal,
    /// Left for the caller to settle.
    Unresolved,
}

/// A remote edit that landed on a locally locked path.
#[derive(Debug, Clone)]
pub struct PathConflict {
    /// The contested path.
    pub path: String,
    /// Local value at detection time.
    pub local_value: Option<Value>,
    /// Value the remote edit carried.
    pub remote_value: Option<Value>,
    /// When the local side last modified the document.
    pub local_timestamp: DateTime<Utc>,
    /// When the remote delta was produced.
    pub remote_timestamp: DateTime<Utc>,
    /// The local device.
    pub local_device: String,
    /// The remote device.
    pub remote_device: String,
    /// How the conflict was settled.
    pub resolution: ConflictResolution,
}

/// Outcome of applying a remote state change.
#[derive(Debug, Clone)]
pub struct RemoteChangeOutcome {
    /// Change records for every applied operation.
    pub records: Vec<ChangeRecord>,
    /// Conflicts detected on locked paths.
    pub conflicts: Vec<PathConflict>,
    /// Fingerprint of the document after application.
    pub fingerprint: String,
}

/// Coordinates one device's view of its siblings: who is present,
/// which paths are locked, and how remote edits reconcile with local
/// ones.
pub struct SyncCoordinator {
    config: CoordinatorConfig,
    devices: HashMap<String, DevicePresence>,
    locks: HashMap<String, DeviceLock>,
    /// Broadcasts pending coalescing, keyed for dedupe.
    broadcast_queue: Vec<(String, WireMessage)>,
    broadcast_deadline: Option<Instant>,
    events: Vec<PresenceEvent>,
}

impl SyncCoordinator {
    /// Creates a coordinator for this device.
    pub fn new(config: CoordinatorConfig) -> Self {
        Self {
            config,
            devices: HashMap::new(),
            locks: HashMap::new(),
            broadcast_queue: Vec::new(),
            broadcast_deadline: None,
            events: Vec::new(),
        }
    }

    /// Known sibling devices.
    pub fn devices(&self) -> impl Iterator<Item = &DevicePresence> {
        self.devices.values()
    }

    /// Looks up a device's presence.
    pub fn device(&self, device_id: &str) -> Option<&DevicePresence> {
        self.devices.get(device_id)
    }

    /// Drains pending presence events.
    pub fn take_events(&mut self) -> Vec<PresenceEvent> {
        std::mem::take(&mut self.events)
    }

    /// Records a device joining the session.
    pub fn device_joined(&mut self, device_id: &str, now: Instant) {
        let is_new = !self.devices.contains_key(device_id);
        self.devices.insert(
            device_id.to_string(),
            DevicePresence {
                device_id: device_id.to_string(),
                status: PresenceStatus::Online,
                last_seen_at: now,
                pending_changes: 0,
            },
        );
        if is_new {
            tracing::debug!(device = device_id, "device joined");
            self.events.push(PresenceEvent::Joined(device_id.to_string()));
        }
    }

    /// Records a device leaving; its locks are released.
    pub fn device_left(&mut self, device_id: &str) {
        if let Some(presence) = self.devices.get_mut(device_id) {
            presence.status = PresenceStatus::Offline;
            self.events.push(PresenceEvent::Left(device_id.to_string()));
        }
        self.locks.retain(|_, lock| lock.device_id != device_id);
    }

    /// Refreshes a device's liveness, reviving an away device.
    pub fn touch_device(&mut self, device_id: &str, pending_changes: u64, now: Instant) {
        match self.devices.get_mut(device_id) {
            Some(presence) => {
                presence.last_seen_at = now;
                presence.pending_changes = pending_changes;
                if presence.status != PresenceStatus::Offline {
                    presence.status = PresenceStatus::Online;
                }
            }
            None => self.device_joined(device_id, now),
        }
    }

    /// Attempts to take (or renew) the lock on a path.
    ///
    /// Succeeds when the path is unlocked, the existing lock has
    /// lapsed, or this device already holds it (renewal). Returns
    /// whether the lock is now held by `device_id`.
    pub fn acquire_lock(
        &mut self,
        path: &str,
        device_id: &str,
        version: u64,
        now: Instant,
    ) -> bool {
        if let Some(existing) = self.locks.get(path) {
            if !existing.is_expired(now) && existing.device_id != device_id {
                tracing::debug!(path, holder = %existing.device_id, "lock contended");
                return false;
            }
        }
        self.locks.insert(
            path.to_string(),
            DeviceLock {
                path: path.to_string(),
                device_id: device_id.to_string(),
                locked_at: now,
                expires_at: now + self.config.lock_duration,
                version,
            },
        );
        true
    }

    /// Releases a lock; only the holder may release it.
    pub fn release_lock(&mut self, path: &str, device_id: &str) -> bool {
        match self.locks.get(path) {
            Some(lock) if lock.device_id == device_id => {
                self.locks.remove(path);
                true
            }
            _ => false,
        }
    }

    /// Returns the live lock on a path, if any.
    pub fn lock_on(&self, path: &str, now: Instant) -> Option<&DeviceLock> {
        self.locks.get(path).filter(|lock| !lock.is_expired(now))
    }

    /// Purges lapsed locks and demotes quiet devices to away.
    pub fn cleanup(&mut self, now: Instant) {
        let before = self.locks.len();
        self.locks.retain(|_, lock| !lock.is_expired(now));
        let lapsed = before - self.locks.len();
        if lapsed > 0 {
            tracing::debug!(lapsed, "expired locks purged");
        }

        let threshold = self.config.staleness_threshold;
        for presence in self.devices.values_mut() {
            if presence.status == PresenceStatus::Online
                && now.duration_since(presence.last_seen_at) >= threshold
            {
                presence.status = PresenceStatus::Away;
                self.events
                    .push(PresenceEvent::WentAway(presence.device_id.clone()));
            }
        }
    }

    /// Applies a remote device's delta to the local document,
    /// detecting conflicts on paths this device holds locks for.
    ///
    /// Operations on unlocked paths apply directly. On a locked path
    /// the configured strategy decides: last-write-wins accepts the
    /// remote edit iff its timestamp is at or after the local
    /// modification time; timestamp-wins compares both ways with a
    /// deterministic device-id tie-break; manual leaves the operation
    /// unapplied and the conflict unresolved.
    pub fn handle_remote_change(
        &mut self,
        remote_device: &str,
        delta: &Delta,
        document: &mut Document,
        now: Instant,
    ) -> EngineResult<RemoteChangeOutcome> {
        self.touch_device(remote_device, 0, now);

        let local_timestamp = document.metadata.last_modified;
        let mut conflicts = Vec::new();
        let mut accepted = Vec::new();

        for op in &delta.operations {
            let path = op.path().to_string();
            let contested = self
                .lock_on(&path, now)
                .map(|lock| lock.device_id != remote_device)
                .unwrap_or(false);
            if !contested {
                accepted.push(op.clone());
                continue;
            }

            let resolution = self.resolve(
                local_timestamp,
                delta.timestamp,
                &self.config.device_id,
                remote_device,
            );
            let local_value = pointer::get(&document.data, &path)?.cloned();
            conflicts.push(PathConflict {
                path: path.clone(),
                local_value,
                remote_value: op.value().cloned(),
                local_timestamp,
                remote_timestamp: delta.timestamp,
                local_device: self.config.device_id.clone(),
                remote_device: remote_device.to_string(),
                resolution,
            });
            match resolution {
                ConflictResolution::AcceptRemote => accepted.push(op.clone()),
                ConflictResolution::KeepLocal | ConflictResolution::Unresolved => {
                    tracing::debug!(path = %path, ?resolution, "remote edit withheld");
                }
            }
        }

        let records = apply(&mut document.data, &accepted)?;
        document.version = document.version.max(delta.target_version);
        if conflicts
            .iter()
            .any(|c| c.resolution == ConflictResolution::Unresolved)
        {
            document.metadata.sync_status = SyncStatus::Conflict;
        }

        Ok(RemoteChangeOutcome {
            records,
            conflicts,
            fingerprint: document.fingerprint(),
        })
    }

    fn resolve(
        &self,
        local: DateTime<Utc>,
        remote: DateTime<Utc>,
        local_device: &str,
        remote_device: &str,
    ) -> ConflictResolution {
        match self.config.strategy {
            ConflictStrategy::LastWriteWins => {
                if remote >= local {
                    ConflictResolution::AcceptRemote
                } else {
                    ConflictResolution::KeepLocal
                }
            }
            ConflictStrategy::TimestampWins => {
                if remote > local {
                    ConflictResolution::AcceptRemote
                } else if remote < local {
                    ConflictResolution::KeepLocal
                } else if remote_device > local_device {
                    // Equal timestamps break the tie on device id so
                    // every device settles the same way.
                    ConflictResolution::AcceptRemote
                } else {
                    ConflictResolution::KeepLocal
                }
            }
            ConflictStrategy::Manual => ConflictResolution::Unresolved,
        }
    }

    /// Queues an outgoing broadcast, coalescing within the window.
    ///
    /// A newer broadcast of the same kind and payload shape replaces
    /// the queued one; the most recent wins.
    pub fn queue_broadcast(&mut self, message: WireMessage, now: Instant) {
        let key = format!(
            "{:?}:{}",
            message.kind,
            dedupe_key(&message.payload)
        );
        if let Some(slot) = self.broadcast_queue.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = message;
        } else {
            self.broadcast_queue.push((key, message));
        }
        if self.broadcast_deadline.is_none() {
            self.broadcast_deadline = Some(now + self.config.broadcast_window);
        }
    }

    /// Returns the coalesced broadcasts once the window has elapsed.
    pub fn take_ready_broadcasts(&mut self, now: Instant) -> Vec<WireMessage> {
        match self.broadcast_deadline {
            Some(deadline) if now >= deadline => {
                self.broadcast_deadline = None;
                std::mem::take(&mut self.broadcast_queue)
                    .into_iter()
                    .map(|(_, m)| m)
                    .collect()
            }
            _ => Vec::new(),
        }
    }

    /// Number of broadcasts waiting for the window.
    pub fn queued_broadcasts(&self) -> usize {
        self.broadcast_queue.len()
    }

    /// Builds the presence announcement for this device.
    pub fn presence_message(&self, pending_changes: u64) -> WireMessage {
        WireMessage::new(
            MessageKind::DeviceJoined,
            serde_json::json!({
                "deviceId": self.config.device_id,
                "pendingChanges": pending_changes,
            }),
        )
    }
}

/// Identity key for broadcast dedupe: kind plus the paths the payload
/// touches, so repeated updates to the same target coalesce while
/// unrelated ones don't.
fn dedupe_key(payload: &Value) -> String {
    payload
        .get("path")
        .and_then(|p| p.as_str())
        .or_else(|| payload.get("sessionId").and_then(|s| s.as_str()))
        .unwrap_or("")
        .to_string()
}
