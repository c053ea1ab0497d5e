//! Document lifecycle: path-addressed mutation, debounced sync,
//! snapshots and version-windowed deltas.

use crate::config::ManagerConfig;
use crate::error::{EngineError, EngineResult};
use crate::observer::{ObserverHandle, Observers};
use crate::session::PairedSession;
use crate::transport::{Connection, ConnectionEvent, ConnectionState, Socket};
use serde_json::{json, Value};
use std::time::Instant;
use syncdoc_patch::{apply, diff, pointer, ChangeRecord, DeltaCache, PatchOp};
use syncdoc_protocol::{Delta, Document, MessageKind, SyncStatus, WireMessage};

/// How a snapshot's data is combined with the live document on restore.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStrategy {
    /// The snapshot replaces the document wholesale.
    Replace,
    /// Objects are merged key-by-key, recursively. On overlapping
    /// leaves the snapshot wins unless `preserve_local` is set.
    Merge {
        /// Keep the live value where both sides define a leaf.
        preserve_local: bool,
    },
}

/// The single owner of a [`Document`], connected to one transport
/// connection.
///
/// All mutation goes through [`DocumentManager::set`],
/// [`DocumentManager::delete`] and [`DocumentManager::batch_set`];
/// effective mutations bump the version once, emit change records to
/// observers, and arm a trailing-edge debounce that triggers an
/// outgoing sync.
pub struct DocumentManager<S: Socket> {
    config: ManagerConfig,
    connection: Connection<S>,
    document: Document,
    /// Highest version the server is known to hold.
    server_version: u64,
    /// Document data as of the last acknowledged sync.
    last_synced_data: Value,
    pending_changes: Vec<ChangeRecord>,
    snapshots: Vec<(Instant, syncdoc_protocol::Snapshot)>,
    delta_cache: DeltaCache,
    observers: Observers<ChangeRecord>,
    debounce_at: Option<Instant>,
    next_gc: Instant,
}

impl<S: Socket> DocumentManager<S> {
    /// Creates a manager around an empty document.
    pub fn new(config: ManagerConfig, connection: Connection<S>, now: Instant) -> Self {
        let document = Document::new(config.device_id.clone());
        let last_synced_data = document.data.clone();
        let next_gc = now + config.gc_interval;
        Self {
            config,
            connection,
            document,
            server_version: 0,
            last_synced_data,
            pending_changes: Vec::new(),
            snapshots: Vec::new(),
            delta_cache: DeltaCache::new(),
            observers: Observers::new(),
            debounce_at: None,
            next_gc,
        }
    }

    /// Returns the document.
    pub fn document(&self) -> &Document {
        &self.document
    }

    /// Returns the current sync status.
    pub fn status(&self) -> SyncStatus {
        self.document.metadata.sync_status
    }

    /// Change records accumulated since the last acknowledged sync.
    pub fn pending_changes(&self) -> &[ChangeRecord] {
        &self.pending_changes
    }

    /// Mutable access to the underlying connection.
    pub fn connection(&mut self) -> &mut Connection<S> {
        &mut self.connection
    }

    /// Adopts a paired session: the document is replaced wholesale and
    /// version counters reset to the session's.
    pub fn adopt_session(&mut self, session: PairedSession) {
        self.config.session_id = session.session_id;
        self.document = Document::from_data(
            session.initial_document,
            session.version,
            self.config.device_id.clone(),
        );
        self.server_version = session.version;
        self.last_synced_data = self.document.data.clone();
        self.pending_changes.clear();
        self.delta_cache.clear();
        self.debounce_at = None;
    }

    /// Reads the value at a path, if present.
    pub fn get(&self, path: &str) -> EngineResult<Option<Value>> {
        Ok(pointer::get(&self.document.data, path)?.cloned())
    }

    /// Sets the value at a path, creating intermediate objects.
    ///
    /// Setting a path to its current value is a no-op: no version
    /// bump, no change record, no sync. Returns true if the document
    /// changed.
    pub fn set(&mut self, path: &str, value: Value, now: Instant) -> EngineResult<bool> {
        if pointer::get(&self.document.data, path)? == Some(&value) {
            return Ok(false);
        }
        let previous = pointer::set_creating(&mut self.document.data, path, value.clone())?;
        let record = ChangeRecord::new(path, previous, Some(value));
        self.commit(vec![record], now);
        Ok(true)
    }

    /// Deletes the value at a path. Deleting a missing path is a
    /// no-op. Returns true if the document changed.
    pub fn delete(&mut self, path: &str, now: Instant) -> EngineResult<bool> {
        match pointer::remove_path(&mut self.document.data, path)? {
            Some(previous) => {
                let record = ChangeRecord::new(path, Some(previous), None);
                self.commit(vec![record], now);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Applies several path updates as one mutation: a single version
    /// bump and one debounce arm, however many paths change.
    pub fn batch_set(&mut self, updates: &[(String, Value)], now: Instant) -> EngineResult<bool> {
        let mut records = Vec::new();
        for (path, value) in updates {
            if pointer::get(&self.document.data, path)? == Some(value) {
                continue;
            }
            let previous = pointer::set_creating(&mut self.document.data, path, value.clone())?;
            records.push(ChangeRecord::new(path, previous, Some(value.clone())));
        }
        if records.is_empty() {
            return Ok(false);
        }
        self.commit(records, now);
        Ok(true)
    }

    fn commit(&mut self, records: Vec<ChangeRecord>, now: Instant) {
        self.document.record_mutation(&self.config.device_id.clone());
        for record in &records {
            self.observers.emit(record);
        }
        self.pending_changes.extend(records);
        self.debounce_at = Some(now + self.config.debounce);
    }

    /// Subscribes to change records; every effective mutation (local
    /// or remote) is delivered.
    pub fn subscribe(&mut self, handler: impl FnMut(&ChangeRecord) + Send + 'static) -> ObserverHandle {
        self.observers.subscribe(handler)
    }

    /// Removes a change subscription.
    pub fn unsubscribe(&mut self, handle: ObserverHandle) -> bool {
        self.observers.unsubscribe(handle)
    }

    /// Pushes the current document state to the server.
    ///
    /// A no-op while already synced. On success the pending change
    /// list clears and the status becomes synced; on failure the
    /// status becomes error and the error propagates.
    pub fn sync(&mut self, now: Instant) -> EngineResult<()> {
        if self.document.metadata.sync_status == SyncStatus::Synced {
            return Ok(());
        }
        if !self.connection.state().is_open() {
            self.document.metadata.sync_status = SyncStatus::Error;
            return Err(EngineError::NotConnected);
        }
        let payload = json!({
            "sessionId": self.config.session_id,
            "state": self.document.data,
            "version": self.document.version,
        });
        let message = WireMessage::new(MessageKind::StateUpdate, payload);
        let sent = self
            .connection
            .send(message, now)
            .and_then(|_| self.connection.flush(now));
        match sent {
            Ok(()) => {
                self.document.metadata.sync_status = SyncStatus::Synced;
                self.last_synced_data = self.document.data.clone();
                self.server_version = self.document.version;
                self.pending_changes.clear();
                tracing::debug!(version = self.document.version, "state pushed");
                Ok(())
            }
            Err(e) => {
                self.document.metadata.sync_status = SyncStatus::Error;
                Err(EngineError::SyncFailed(e.to_string()))
            }
        }
    }

    /// Captures a snapshot of the current document.
    ///
    /// When the retention bound is exceeded the oldest-created
    /// snapshot is evicted.
    pub fn create_snapshot(&mut self, now: Instant) -> syncdoc_protocol::Snapshot {
        let snapshot = syncdoc_protocol::Snapshot::capture(
            self.document.version,
            self.document.data.clone(),
            &self.config.device_id,
            &self.config.session_id,
        );
        self.snapshots.push((now, snapshot.clone()));
        if self.snapshots.len() > self.config.max_snapshots {
            let oldest = self
                .snapshots
                .iter()
                .enumerate()
                .min_by_key(|(_, (created, _))| *created)
                .map(|(i, _)| i);
            if let Some(i) = oldest {
                let (_, evicted) = self.snapshots.remove(i);
                tracing::debug!(id = %evicted.id, "snapshot evicted");
            }
        }
        snapshot
    }

    /// Looks up a retained snapshot by id.
    pub fn snapshot(&self, id: &str) -> Option<&syncdoc_protocol::Snapshot> {
        self.snapshots
            .iter()
            .find(|(_, s)| s.id == id)
            .map(|(_, s)| s)
    }

    /// Number of retained snapshots.
    pub fn snapshot_count(&self) -> usize {
        self.snapshots.len()
    }

    /// Restores a retained snapshot into the live document.
    ///
    /// The snapshot's checksum is verified first; a corrupt snapshot
    /// is rejected without touching the document. Restoring a snapshot
    /// whose data matches the live document returns no records and
    /// leaves the version alone.
    pub fn restore_snapshot(
        &mut self,
        id: &str,
        strategy: MergeStrategy,
        now: Instant,
    ) -> EngineResult<Vec<ChangeRecord>> {
        let snapshot = self
            .snapshots
            .iter()
            .find(|(_, s)| s.id == id)
            .map(|(_, s)| s.clone())
            .ok_or_else(|| EngineError::SnapshotNotFound(id.to_string()))?;
        snapshot.verify()?;

        let target = match strategy {
            MergeStrategy::Replace => snapshot.data,
            MergeStrategy::Merge { preserve_local } => {
                deep_merge(&self.document.data, &snapshot.data, preserve_local)
            }
        };
        if syncdoc_patch::fingerprint(&target) == self.document.fingerprint() {
            return Ok(Vec::new());
        }
        let ops = diff(&self.document.data, &target);
        let records = apply(&mut self.document.data, &ops)?;
        if !records.is_empty() {
            self.commit(records.clone(), now);
        }
        Ok(records)
    }

    /// Computes the delta carrying a peer at `from_version` up to the
    /// current document.
    ///
    /// Returns `None` when the peer is already current (or ahead).
    /// When the requested base matches the last acknowledged server
    /// state, the delta is a structural diff; otherwise it degrades to
    /// a whole-document replace. Results are cached per version pair.
    pub fn calculate_delta(&mut self, from_version: u64, now: Instant) -> Option<Delta> {
        let current = self.document.version;
        if from_version >= current {
            return None;
        }
        if let Some(ops) = self.delta_cache.get(from_version, current, now) {
            return Some(Delta::new(from_version, current, ops));
        }
        let ops = if from_version == self.server_version {
            diff(&self.last_synced_data, &self.document.data)
        } else {
            vec![PatchOp::replace("", self.document.data.clone())]
        };
        self.delta_cache.insert(from_version, current, ops.clone(), now);
        Some(Delta::new(from_version, current, ops))
    }

    /// Applies a remote delta to the document.
    ///
    /// The delta's base version must match the last known server
    /// version; a mismatch is a state conflict and the document is
    /// left untouched. Remote deltas advance the server version, not
    /// the local edit counter.
    pub fn apply_delta(&mut self, delta: &Delta) -> EngineResult<Vec<ChangeRecord>> {
        if delta.base_version != self.server_version {
            return Err(EngineError::StateConflict {
                expected: self.server_version,
                received: delta.base_version,
            });
        }
        let records = apply(&mut self.document.data, &delta.operations)?;
        self.server_version = delta.target_version;
        if let Err(e) = apply(&mut self.last_synced_data, &delta.operations) {
            tracing::debug!(error = %e, "shadow state diverged; resetting");
            self.last_synced_data = self.document.data.clone();
        }
        for record in &records {
            self.observers.emit(record);
        }
        Ok(records)
    }

    /// Handles a remote message surfaced by the connection.
    pub fn handle_remote(&mut self, message: &WireMessage) -> EngineResult<Vec<ChangeRecord>> {
        match message.kind {
            MessageKind::StateSync => {
                let state = message
                    .payload
                    .get("state")
                    .cloned()
                    .unwrap_or(Value::Null);
                let version = message
                    .payload
                    .get("version")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(0);
                let ops = diff(&self.document.data, &state);
                let records = apply(&mut self.document.data, &ops)?;
                self.document.version = version;
                self.server_version = version;
                self.document.metadata.sync_status = SyncStatus::Synced;
                self.last_synced_data = self.document.data.clone();
                self.pending_changes.clear();
                self.delta_cache.clear();
                for record in &records {
                    self.observers.emit(record);
                }
                tracing::debug!(version, "authoritative state adopted");
                Ok(records)
            }
            MessageKind::StateDelta => {
                let delta: Delta = serde_json::from_value(
                    message
                        .payload
                        .get("delta")
                        .cloned()
                        .unwrap_or(Value::Null),
                )
                .map_err(syncdoc_protocol::ProtocolError::from)?;
                self.apply_delta(&delta)
            }
            _ => Ok(Vec::new()),
        }
    }

    /// Drives timers: the connection's own, the sync debounce, and
    /// periodic garbage collection.
    pub fn tick(&mut self, now: Instant) {
        self.connection.tick(now);
        while let Some(event) = self.connection.poll_event() {
            match event {
                ConnectionEvent::Message(message) => {
                    if let Err(e) = self.handle_remote(&message) {
                        tracing::warn!(error = %e, kind = ?message.kind, "remote message rejected");
                    }
                }
                ConnectionEvent::Error(e) => {
                    tracing::warn!(error = %e, "connection error");
                }
                ConnectionEvent::StateChanged(ConnectionState::Connected) => {
                    // Freshly (re)connected: ask the server to resync us
                    // from the last version we know it holds.
                    let message = WireMessage::new(
                        MessageKind::Subscribe,
                        json!({
                            "sessionId": self.config.session_id,
                            "lastVersion": self.server_version,
                        }),
                    );
                    if let Err(e) = self.connection.send(message, now) {
                        tracing::warn!(error = %e, "resubscribe failed");
                    }
                }
                _ => {}
            }
        }
        if let Some(at) = self.debounce_at {
            if now >= at {
                self.debounce_at = None;
                if let Err(e) = self.sync(now) {
                    tracing::warn!(error = %e, "debounced sync failed");
                }
            }
        }
        if now >= self.next_gc {
            self.run_gc(now);
        }
    }

    /// Evicts snapshots past the age threshold and expired cached
    /// deltas.
    pub fn run_gc(&mut self, now: Instant) {
        self.next_gc = now + self.config.gc_interval;
        let max_age = self.config.snapshot_max_age;
        let before = self.snapshots.len();
        self.snapshots
            .retain(|(created, _)| now.duration_since(*created) < max_age);
        let evicted = before - self.snapshots.len();
        if evicted > 0 {
            tracing::debug!(evicted, "aged snapshots collected");
        }
        self.delta_cache.cleanup(now);
    }
}

/// Recursively merges `incoming` over `local`.
///
/// Objects merge key-by-key; anything else is a leaf. On leaf overlap
/// the incoming side wins unless `preserve_local` is set. Arrays are
/// leaves.
fn deep_merge(local: &Value, incoming: &Value, preserve_local: bool) -> Value {
    match (local, incoming) {
        (Value::Object(l), Value::Object(r)) => {
            let mut merged = l.clone();
            for (key, incoming_value) in r {
                let entry = match l.get(key) {
                    Some(local_value) => deep_merge(local_value, incoming_value, preserve_local),
                    None => incoming_value.clone(),
                };
                merged.insert(key.clone(), entry);
            }
            Value::Object(merged)
        }
        (local_leaf, incoming_leaf) => {
            if preserve_local {
                local_leaf.clone()
            } else {
                incoming_leaf.clone()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockSocket;
    use crate::config::ConnectionConfig;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn manager(now: Instant) -> DocumentManager<MockSocket> {
        let conn_config = ConnectionConfig::new("wss://sync.example.com/ws", "tok", "dev-1");
        let mut connection = Connection::new(conn_config, MockSocket::new());
        connection.connect(now).unwrap();
        let config = ManagerConfig::new("dev-1", "sess-1").with_debounce(Duration::from_millis(300));
        DocumentManager::new(config, connection, now)
    }

    #[test]
    fn set_bumps_version_and_records_change() {
        let now = Instant::now();
        let mut mgr = manager(now);

        assert!(mgr.set("/user/name", json!("ada"), now).unwrap());
        assert_eq!(mgr.document().version, 1);
        assert_eq!(mgr.status(), SyncStatus::Pending);
        assert_eq!(mgr.get("/user/name").unwrap(), Some(json!("ada")));

        let pending = mgr.pending_changes();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].path, "/user/name");
        assert_eq!(pending[0].previous_value, None);
        assert_eq!(pending[0].new_value, Some(json!("ada")));
    }

    #[test]
    fn identical_set_is_a_noop() {
        let now = Instant::now();
        let mut mgr = manager(now);
        mgr.set("/a", json!(1), now).unwrap();
        let version = mgr.document().version;

        assert!(!mgr.set("/a", json!(1), now).unwrap());
        assert_eq!(mgr.document().version, version);
        assert_eq!(mgr.pending_changes().len(), 1);
    }

    #[test]
    fn delete_missing_path_is_a_noop() {
        let now = Instant::now();
        let mut mgr = manager(now);
        assert!(!mgr.delete("/nothing/here", now).unwrap());
        assert_eq!(mgr.document().version, 0);
    }

    #[test]
    fn batch_set_bumps_version_once() {
        let now = Instant::now();
        let mut mgr = manager(now);
        let changed = mgr
            .batch_set(
                &[
                    ("/a".to_string(), json!(1)),
                    ("/b".to_string(), json!(2)),
                    ("/c".to_string(), json!(3)),
                ],
                now,
            )
            .unwrap();
        assert!(changed);
        assert_eq!(mgr.document().version, 1);
        assert_eq!(mgr.pending_changes().len(), 3);
    }

    #[test]
    fn debounce_collapses_rapid_edits_into_one_sync() {
        let now = Instant::now();
        let mut mgr = manager(now);

        mgr.set("/a", json!(1), now).unwrap();
        mgr.set("/b", json!(2), now + Duration::from_millis(100))
            .unwrap();

        // Before the trailing edge nothing is pushed.
        mgr.tick(now + Duration::from_millis(350));
        assert_eq!(mgr.status(), SyncStatus::Pending);

        mgr.tick(now + Duration::from_millis(450));
        assert_eq!(mgr.status(), SyncStatus::Synced);
        assert!(mgr.pending_changes().is_empty());

        let sent = mgr.connection().state();
        assert!(sent.is_open());
    }

    #[test]
    fn sync_pushes_state_update_message() {
        let now = Instant::now();
        let mut mgr = manager(now);
        mgr.set("/title", json!("notes"), now).unwrap();
        mgr.sync(now).unwrap();

        assert_eq!(mgr.status(), SyncStatus::Synced);
        // A second sync while already synced sends nothing.
        mgr.sync(now).unwrap();
    }

    #[test]
    fn sync_while_disconnected_marks_error() {
        let now = Instant::now();
        let conn_config =
            ConnectionConfig::new("wss://sync.example.com/ws", "tok", "dev-1").without_reconnect();
        let connection = Connection::new(conn_config, MockSocket::new());
        let mut mgr = DocumentManager::new(ManagerConfig::new("dev-1", "sess-1"), connection, now);

        mgr.set("/a", json!(1), now).unwrap();
        assert!(matches!(mgr.sync(now), Err(EngineError::NotConnected)));
        assert_eq!(mgr.status(), SyncStatus::Error);
    }

    #[test]
    fn connecting_subscribes_to_the_session() {
        let now = Instant::now();
        let mut mgr = manager(now);
        mgr.tick(now);

        let subscribes: Vec<_> = mgr
            .connection()
            .socket()
            .sent_messages()
            .into_iter()
            .filter(|m| m.kind == MessageKind::Subscribe)
            .collect();
        assert_eq!(subscribes.len(), 1);
        assert_eq!(
            subscribes[0].payload,
            serde_json::json!({"sessionId": "sess-1", "lastVersion": 0})
        );
    }

    #[test]
    fn observers_receive_each_change() {
        let now = Instant::now();
        let mut mgr = manager(now);
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        mgr.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        mgr.set("/a", json!(1), now).unwrap();
        mgr.batch_set(
            &[("/b".to_string(), json!(2)), ("/c".to_string(), json!(3))],
            now,
        )
        .unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn snapshot_restore_replaces_document() {
        let now = Instant::now();
        let mut mgr = manager(now);
        mgr.set("/a", json!(1), now).unwrap();
        let snap = mgr.create_snapshot(now);

        mgr.set("/a", json!(2), now).unwrap();
        mgr.set("/b", json!(true), now).unwrap();

        let records = mgr
            .restore_snapshot(&snap.id, MergeStrategy::Replace, now)
            .unwrap();
        assert!(!records.is_empty());
        assert_eq!(mgr.get("/a").unwrap(), Some(json!(1)));
        assert_eq!(mgr.get("/b").unwrap(), None);
    }

    #[test]
    fn restoring_identical_snapshot_emits_no_records() {
        let now = Instant::now();
        let mut mgr = manager(now);
        mgr.set("/a", json!(1), now).unwrap();
        let snap = mgr.create_snapshot(now);
        let version = mgr.document().version;

        let records = mgr
            .restore_snapshot(&snap.id, MergeStrategy::Replace, now)
            .unwrap();
        assert!(records.is_empty());
        assert_eq!(mgr.document().version, version);
    }

    #[test]
    fn merge_restore_can_preserve_local_edits() {
        let now = Instant::now();
        let mut mgr = manager(now);
        mgr.batch_set(
            &[
                ("/title".to_string(), json!("draft")),
                ("/meta/author".to_string(), json!("ada")),
            ],
            now,
        )
        .unwrap();
        let snap = mgr.create_snapshot(now);

        mgr.set("/title", json!("final"), now).unwrap();

        let records = mgr
            .restore_snapshot(
                &snap.id,
                MergeStrategy::Merge {
                    preserve_local: true,
                },
                now,
            )
            .unwrap();
        // The local leaf survives; nothing changed.
        assert!(records.is_empty());
        assert_eq!(mgr.get("/title").unwrap(), Some(json!("final")));
    }

    #[test]
    fn corrupt_snapshot_is_rejected() {
        let now = Instant::now();
        let mut mgr = manager(now);
        mgr.set("/a", json!(1), now).unwrap();
        let snap = mgr.create_snapshot(now);

        // Corrupt the stored copy.
        for (_, stored) in &mut mgr.snapshots {
            if stored.id == snap.id {
                stored.data = json!({"tampered": true});
            }
        }
        let before = mgr.document().clone();
        let result = mgr.restore_snapshot(&snap.id, MergeStrategy::Replace, now);
        assert!(result.is_err());
        assert_eq!(mgr.document(), &before);
    }

    #[test]
    fn snapshot_retention_evicts_oldest() {
        let now = Instant::now();
        let conn_config = ConnectionConfig::new("wss://s", "t", "dev-1");
        let mut connection = Connection::new(conn_config, MockSocket::new());
        connection.connect(now).unwrap();
        let config = ManagerConfig::new("dev-1", "sess-1").with_max_snapshots(2);
        let mut mgr = DocumentManager::new(config, connection, now);

        let first = mgr.create_snapshot(now);
        mgr.create_snapshot(now + Duration::from_secs(1));
        mgr.create_snapshot(now + Duration::from_secs(2));

        assert_eq!(mgr.snapshot_count(), 2);
        assert!(mgr.snapshot(&first.id).is_none());
    }

    #[test]
    fn gc_drops_aged_snapshots() {
        let now = Instant::now();
        let conn_config = ConnectionConfig::new("wss://s", "t", "dev-1");
        let mut connection = Connection::new(conn_config, MockSocket::new());
        connection.connect(now).unwrap();
        let config = ManagerConfig::new("dev-1", "sess-1")
            .with_snapshot_max_age(Duration::from_secs(60));
        let mut mgr = DocumentManager::new(config, connection, now);

        mgr.create_snapshot(now);
        mgr.run_gc(now + Duration::from_secs(30));
        assert_eq!(mgr.snapshot_count(), 1);
        mgr.run_gc(now + Duration::from_secs(120));
        assert_eq!(mgr.snapshot_count(), 0);
    }

    #[test]
    fn calculate_delta_against_synced_base_is_structural() {
        let now = Instant::now();
        let mut mgr = manager(now);
        mgr.set("/a", json!(1), now).unwrap();
        mgr.sync(now).unwrap();
        mgr.set("/b", json!(2), now).unwrap();

        let delta = mgr.calculate_delta(1, now).unwrap();
        assert_eq!(delta.base_version, 1);
        assert_eq!(delta.target_version, 2);
        assert_eq!(delta.operations, vec![PatchOp::add("/b", json!(2))]);
    }

    #[test]
    fn calculate_delta_for_unknown_base_degrades_to_replace() {
        let now = Instant::now();
        let mut mgr = manager(now);
        mgr.set("/a", json!(1), now).unwrap();
        mgr.set("/b", json!(2), now).unwrap();
        mgr.sync(now).unwrap();
        mgr.set("/c", json!(3), now).unwrap();

        // Base 1 predates the last acknowledged server state (2).
        let delta = mgr.calculate_delta(1, now).unwrap();
        assert_eq!(delta.operations.len(), 1);
        assert!(matches!(delta.operations[0], PatchOp::Replace { ref path, .. } if path.is_empty()));
    }

    #[test]
    fn calculate_delta_for_current_peer_is_none() {
        let now = Instant::now();
        let mut mgr = manager(now);
        mgr.set("/a", json!(1), now).unwrap();
        assert!(mgr.calculate_delta(1, now).is_none());
        assert!(mgr.calculate_delta(9, now).is_none());
    }

    #[test]
    fn apply_delta_requires_matching_base() {
        let now = Instant::now();
        let mut mgr = manager(now);

        let stale = Delta::new(3, 4, vec![PatchOp::add("/x", json!(1))]);
        assert!(matches!(
            mgr.apply_delta(&stale),
            Err(EngineError::StateConflict {
                expected: 0,
                received: 3
            })
        ));
        assert_eq!(mgr.get("/x").unwrap(), None);

        let good = Delta::new(0, 1, vec![PatchOp::add("/x", json!(1))]);
        mgr.apply_delta(&good).unwrap();
        assert_eq!(mgr.get("/x").unwrap(), Some(json!(1)));
        // Remote deltas advance the server version, not the local one.
        assert_eq!(mgr.document().version, 0);
    }

    #[test]
    fn state_sync_adopts_authoritative_state() {
        let now = Instant::now();
        let mut mgr = manager(now);
        mgr.set("/local", json!("edit"), now).unwrap();

        let message = WireMessage::new(
            MessageKind::StateSync,
            json!({"state": {"shared": 1}, "version": 9}),
        );
        let records = mgr.handle_remote(&message).unwrap();
        assert!(!records.is_empty());
        assert_eq!(mgr.document().data, json!({"shared": 1}));
        assert_eq!(mgr.document().version, 9);
        assert_eq!(mgr.status(), SyncStatus::Synced);
        assert!(mgr.pending_changes().is_empty());
    }

    #[test]
    fn deep_merge_unions_objects() {
        let local = json!({"a": {"x": 1, "y": 2}, "only_local": true});
        let incoming = json!({"a": {"y": 20, "z": 30}});

        let snapshot_wins = deep_merge(&local, &incoming, false);
        assert_eq!(
            snapshot_wins,
            json!({"a": {"x": 1, "y": 20, "z": 30}, "only_local": true})
        );

        let local_wins = deep_merge(&local, &incoming, true);
        assert_eq!(
            local_wins,
            json!({"a": {"x": 1, "y": 2, "z": 30}, "only_local": true})
        );
    }
}
