//! Transport connection state machine.
//!
//! One `Connection` manages a single bidirectional message channel:
//! connect, heartbeat, reconnect with backoff, batching and offline
//! queueing. The connection is driven cooperatively: the host feeds
//! inbound frames through [`Connection::handle_frame`] and calls
//! [`Connection::tick`] to fire timer-based work.

use crate::config::ConnectionConfig;
use crate::error::{EngineError, EngineResult};
use serde_json::json;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use syncdoc_protocol::{connection_url, ErrorPayload, MessageKind, ProtocolError, WireMessage};

/// Close codes that never schedule reconnection: normal closure,
/// going-away, no-status, and the two application-defined codes
/// (handoff complete, authentication rejected).
pub const NO_RETRY_CLOSE_CODES: [u16; 5] = [1000, 1001, 1005, 4000, 4001];

/// Close code sent when the heartbeat miss budget is exhausted.
const CLOSE_HEARTBEAT_LOST: u16 = 4002;
/// Close code used for locally observed transport failures.
const CLOSE_ABNORMAL: u16 = 1006;

/// Lifecycle state of a connection. Exactly one live instance exists
/// per transport connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// A connection attempt is in flight.
    Connecting,
    /// The channel is open; awaiting the server's greeting.
    Connected,
    /// The server greeted us; awaiting initial state.
    Syncing,
    /// Fully synchronized and exchanging updates.
    Active,
    /// Waiting out a backoff delay before retrying.
    Reconnecting,
    /// No channel.
    Closed,
}

impl ConnectionState {
    /// Returns true if the channel is open for sending.
    pub fn is_open(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connected | ConnectionState::Syncing | ConnectionState::Active
        )
    }
}

/// The byte channel under a connection.
///
/// Implementations wrap the actual transport (a WebSocket, a pipe, a
/// mock for tests). `open` may complete immediately (`is_open` turns
/// true) or in the background, in which case the host signals
/// completion via [`Connection::handle_open`].
pub trait Socket: Send {
    /// Starts opening the channel to the given URL.
    fn open(&mut self, url: &str) -> EngineResult<()>;

    /// Sends one text frame.
    fn send(&mut self, frame: &str) -> EngineResult<()>;

    /// Closes the channel with a close code.
    fn close(&mut self, code: u16) -> EngineResult<()>;

    /// Returns true if the channel is open.
    fn is_open(&self) -> bool;
}

/// Events surfaced to the connection's driver.
#[derive(Debug)]
pub enum ConnectionEvent {
    /// The connection changed state.
    StateChanged(ConnectionState),
    /// An application message arrived.
    Message(WireMessage),
    /// A recoverable or terminal error occurred.
    Error(EngineError),
    /// All reconnection attempts were exhausted.
    ReconnectExhausted,
}

/// A transport connection with reconnection, heartbeat and batching.
pub struct Connection<S: Socket> {
    config: ConnectionConfig,
    socket: S,
    state: ConnectionState,
    connecting_since: Option<Instant>,
    /// Outbound messages held while the channel is down.
    offline_queue: VecDeque<WireMessage>,
    batch: Vec<WireMessage>,
    batch_deadline: Option<Instant>,
    heartbeat_interval: Duration,
    next_heartbeat: Option<Instant>,
    pending_heartbeat: Option<(String, Instant)>,
    missed_heartbeats: u32,
    reconnect_attempt: u32,
    reconnect_at: Option<Instant>,
    events: VecDeque<ConnectionEvent>,
}

impl<S: Socket> Connection<S> {
    /// Creates a connection over the given socket. No I/O happens
    /// until [`Connection::connect`].
    pub fn new(config: ConnectionConfig, socket: S) -> Self {
        let heartbeat_interval = config.heartbeat.base_interval;
        Self {
            config,
            socket,
            state: ConnectionState::Closed,
            connecting_since: None,
            offline_queue: VecDeque::new(),
            batch: Vec::new(),
            batch_deadline: None,
            heartbeat_interval,
            next_heartbeat: None,
            pending_heartbeat: None,
            missed_heartbeats: 0,
            reconnect_attempt: 0,
            reconnect_at: None,
            events: VecDeque::new(),
        }
    }

    /// Returns the current state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Returns the number of messages queued while offline.
    pub fn queued_len(&self) -> usize {
        self.offline_queue.len()
    }

    /// Pops the next pending event, if any.
    pub fn poll_event(&mut self) -> Option<ConnectionEvent> {
        self.events.pop_front()
    }

    /// The underlying socket.
    pub fn socket(&self) -> &S {
        &self.socket
    }

    /// Mutable access to the underlying socket.
    pub fn socket_mut(&mut self) -> &mut S {
        &mut self.socket
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            tracing::debug!(from = ?self.state, to = ?state, "connection state change");
            self.state = state;
            self.events.push_back(ConnectionEvent::StateChanged(state));
        }
    }

    /// Initiates a connection attempt.
    pub fn connect(&mut self, now: Instant) -> EngineResult<()> {
        self.set_state(ConnectionState::Connecting);
        self.connecting_since = Some(now);
        let url = connection_url(&self.config.url, &self.config.token, &self.config.device_id);
        match self.socket.open(&url) {
            Ok(()) => {
                if self.socket.is_open() {
                    self.handle_open(now);
                }
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "connection attempt failed");
                self.connecting_since = None;
                self.set_state(ConnectionState::Closed);
                self.schedule_reconnect(now);
                Err(e)
            }
        }
    }

    /// Marks the channel as open and flushes the offline queue in order.
    pub fn handle_open(&mut self, now: Instant) {
        self.connecting_since = None;
        self.reconnect_attempt = 0;
        self.reconnect_at = None;
        self.missed_heartbeats = 0;
        self.pending_heartbeat = None;
        self.set_state(ConnectionState::Connected);
        self.next_heartbeat = Some(now + self.heartbeat_interval);

        // A send failure closes the channel mid-flush; the remaining
        // messages stay queued for the next reconnect.
        while self.state.is_open() && self.socket.is_open() {
            let Some(message) = self.offline_queue.pop_front() else {
                break;
            };
            if let Err(e) = self.send_now(message, now) {
                tracing::warn!(error = %e, "offline queue flush interrupted");
                break;
            }
        }
    }

    /// Handles an observed close of the underlying channel.
    ///
    /// Codes in [`NO_RETRY_CLOSE_CODES`] end the connection for good;
    /// any other code schedules reconnection when enabled.
    pub fn handle_close(&mut self, code: u16, now: Instant) {
        self.connecting_since = None;
        self.pending_heartbeat = None;
        self.next_heartbeat = None;
        self.set_state(ConnectionState::Closed);

        if NO_RETRY_CLOSE_CODES.contains(&code) {
            tracing::debug!(code, "connection closed; not retrying");
            return;
        }
        self.schedule_reconnect(now);
    }

    /// Closes the connection locally without scheduling reconnection.
    pub fn close(&mut self, code: u16) -> EngineResult<()> {
        self.socket.close(code)?;
        self.pending_heartbeat = None;
        self.next_heartbeat = None;
        self.reconnect_at = None;
        self.set_state(ConnectionState::Closed);
        Ok(())
    }

    fn force_close(&mut self, code: u16, now: Instant) {
        if let Err(e) = self.socket.close(code) {
            tracing::debug!(error = %e, "socket close failed");
        }
        self.handle_close(code, now);
    }

    fn schedule_reconnect(&mut self, now: Instant) {
        if !self.config.auto_reconnect {
            return;
        }
        if self.reconnect_attempt >= self.config.retry.max_attempts {
            tracing::error!(
                attempts = self.reconnect_attempt,
                "reconnection attempts exhausted"
            );
            self.events.push_back(ConnectionEvent::ReconnectExhausted);
            self.events
                .push_back(ConnectionEvent::Error(EngineError::ReconnectExhausted {
                    attempts: self.reconnect_attempt,
                }));
            return;
        }
        let delay = self.config.retry.delay_for_attempt(self.reconnect_attempt + 1);
        self.set_state(ConnectionState::Reconnecting);
        self.reconnect_at = Some(now + delay);
        tracing::debug!(
            attempt = self.reconnect_attempt + 1,
            delay_ms = delay.as_millis() as u64,
            "reconnect scheduled"
        );
    }

    /// Sends a message: immediately for priority kinds, batched
    /// otherwise.
    pub fn send(&mut self, message: WireMessage, now: Instant) -> EngineResult<()> {
        if message.kind.is_priority() {
            return self.send_now(message, now);
        }
        self.batch.push(message);
        if self.batch.len() >= self.config.batch_size {
            self.flush(now)
        } else {
            if self.batch_deadline.is_none() {
                self.batch_deadline = Some(now + self.config.batch_interval);
            }
            Ok(())
        }
    }

    /// Flushes the pending batch immediately.
    pub fn flush(&mut self, now: Instant) -> EngineResult<()> {
        self.batch_deadline = None;
        if self.batch.is_empty() {
            return Ok(());
        }
        let pending = std::mem::take(&mut self.batch);
        let message = if pending.len() == 1 {
            match pending.into_iter().next() {
                Some(m) => m,
                None => return Ok(()),
            }
        } else {
            WireMessage::batch(pending)?
        };
        self.send_now(message, now)
    }

    fn send_now(&mut self, mut message: WireMessage, now: Instant) -> EngineResult<()> {
        if !self.state.is_open() || !self.socket.is_open() {
            self.enqueue_offline(message);
            return Ok(());
        }
        message.maybe_compress(self.config.compression_threshold)?;
        let frame = serde_json::to_string(&message).map_err(ProtocolError::from)?;
        if let Err(e) = self.socket.send(&frame) {
            tracing::warn!(error = %e, "send failed; queueing message and closing");
            // Back to the head of the queue; it is still the next
            // message due once the channel reopens.
            self.offline_queue.push_front(message);
            self.force_close(CLOSE_ABNORMAL, now);
        }
        Ok(())
    }

    fn enqueue_offline(&mut self, message: WireMessage) {
        if self.offline_queue.len() >= self.config.queue_capacity {
            if let Some(dropped) = self.offline_queue.pop_front() {
                tracing::warn!(
                    id = %dropped.id,
                    kind = ?dropped.kind,
                    "outbound queue full; dropping oldest message"
                );
            }
        }
        self.offline_queue.push_back(message);
    }

    /// Fires due timers: connect timeout, reconnect, batch flush,
    /// heartbeat.
    pub fn tick(&mut self, now: Instant) {
        if let Some(since) = self.connecting_since {
            if now.duration_since(since) > self.config.connect_timeout {
                tracing::warn!("connection attempt timed out");
                self.connecting_since = None;
                self.set_state(ConnectionState::Closed);
                self.schedule_reconnect(now);
            }
        }
        if let Some(at) = self.reconnect_at {
            if now >= at {
                self.reconnect_at = None;
                self.reconnect_attempt += 1;
                let _ = self.connect(now);
            }
        }
        if let Some(deadline) = self.batch_deadline {
            if now >= deadline {
                if let Err(e) = self.flush(now) {
                    tracing::warn!(error = %e, "batch flush failed");
                }
            }
        }
        self.heartbeat_tick(now);
    }

    fn heartbeat_tick(&mut self, now: Instant) {
        if !self.state.is_open() {
            return;
        }
        if let Some((_, sent_at)) = self.pending_heartbeat {
            if now.duration_since(sent_at) > self.config.heartbeat.rtt_timeout {
                self.pending_heartbeat = None;
                self.missed_heartbeats += 1;
                tracing::warn!(missed = self.missed_heartbeats, "heartbeat reply timed out");
                if self.missed_heartbeats >= self.config.heartbeat.miss_budget {
                    tracing::warn!("heartbeat miss budget exhausted; forcing close");
                    self.force_close(CLOSE_HEARTBEAT_LOST, now);
                    return;
                }
            }
        }
        if let Some(at) = self.next_heartbeat {
            if now >= at && self.pending_heartbeat.is_none() {
                let message = WireMessage::new(MessageKind::Heartbeat, json!({}));
                let id = message.id.clone();
                if self.send_now(message, now).is_ok() {
                    self.pending_heartbeat = Some((id, now));
                }
                self.next_heartbeat = Some(now + self.heartbeat_interval);
            }
        }
    }

    /// Handles one inbound frame. Malformed frames are logged and
    /// dropped without affecting connection state.
    pub fn handle_frame(&mut self, frame: &str, now: Instant) {
        let message: WireMessage = match serde_json::from_str(frame) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(error = %e, "malformed frame dropped");
                return;
            }
        };
        self.dispatch(message, now);
    }

    fn dispatch(&mut self, mut message: WireMessage, now: Instant) {
        if let Err(e) = message.decompress() {
            tracing::warn!(error = %e, id = %message.id, "undecodable payload dropped");
            return;
        }
        if let Err(e) = message.validate() {
            tracing::warn!(error = %e, "invalid message dropped");
            return;
        }
        match message.kind {
            MessageKind::Batch => match message.into_batch_messages() {
                Ok(inner) => {
                    for m in inner {
                        self.dispatch(m, now);
                    }
                }
                Err(e) => tracing::warn!(error = %e, "unpackable batch dropped"),
            },
            MessageKind::Connected => {
                if self.state == ConnectionState::Connected {
                    self.set_state(ConnectionState::Syncing);
                }
            }
            MessageKind::StateSync => {
                if matches!(
                    self.state,
                    ConnectionState::Connected | ConnectionState::Syncing
                ) {
                    self.set_state(ConnectionState::Active);
                }
                self.events.push_back(ConnectionEvent::Message(message));
            }
            MessageKind::Ping => {
                let reply = WireMessage::new(MessageKind::Pong, json!({ "replyTo": message.id }));
                if let Err(e) = self.send_now(reply, now) {
                    tracing::debug!(error = %e, "pong send failed");
                }
            }
            MessageKind::Pong => self.handle_heartbeat_reply(now),
            MessageKind::Error => match ErrorPayload::from_message(&message) {
                Ok(payload) => {
                    let error = EngineError::from(payload);
                    let is_auth = matches!(error, EngineError::Authentication(_));
                    self.events.push_back(ConnectionEvent::Error(error));
                    if is_auth {
                        // 4001 is in the no-retry list; the connection
                        // stays down until re-credentialed.
                        self.force_close(4001, now);
                    }
                }
                Err(e) => tracing::warn!(error = %e, "malformed error payload dropped"),
            },
            _ => self.events.push_back(ConnectionEvent::Message(message)),
        }
    }

    fn handle_heartbeat_reply(&mut self, now: Instant) {
        if let Some((_, sent_at)) = self.pending_heartbeat.take() {
            let rtt = now.duration_since(sent_at);
            self.missed_heartbeats = 0;
            self.heartbeat_interval = self.config.heartbeat.adapted_interval(rtt);
            self.next_heartbeat = Some(now + self.heartbeat_interval);
            tracing::trace!(
                rtt_ms = rtt.as_millis() as u64,
                interval_ms = self.heartbeat_interval.as_millis() as u64,
                "heartbeat round trip"
            );
        }
    }

    /// Returns the current (adapted) heartbeat interval.
    pub fn heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval
    }
}

/// A scriptable socket for tests.
#[derive(Debug, Default)]
pub struct MockSocket {
    /// Frames sent through the socket, in order.
    pub sent: Vec<String>,
    open: bool,
    fail_opens: u32,
    fail_sends: bool,
}

impl MockSocket {
    /// Creates a mock socket that opens successfully.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `n` open attempts fail.
    pub fn fail_next_opens(&mut self, n: u32) {
        self.fail_opens = n;
    }

    /// Makes every send fail.
    pub fn fail_sends(&mut self, fail: bool) {
        self.fail_sends = fail;
    }

    /// Decoded view of the sent frames.
    pub fn sent_messages(&self) -> Vec<WireMessage> {
        self.sent
            .iter()
            .filter_map(|f| serde_json::from_str(f).ok())
            .collect()
    }
}

impl Socket for MockSocket {
    fn open(&mut self, _url: &str) -> EngineResult<()> {
        if self.fail_opens > 0 {
            self.fail_opens -= 1;
            return Err(EngineError::Connection("mock open refused".into()));
        }
        self.open = true;
        Ok(())
    }

    fn send(&mut self, frame: &str) -> EngineResult<()> {
        if !self.open {
            return Err(EngineError::NotConnected);
        }
        if self.fail_sends {
            return Err(EngineError::Connection("mock send refused".into()));
        }
        self.sent.push(frame.to_string());
        Ok(())
    }

    fn close(&mut self, _code: u16) -> EngineResult<()> {
        self.open = false;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use serde_json::json;

    fn config() -> ConnectionConfig {
        ConnectionConfig::new("wss://sync.example.com/ws", "tok", "dev-1")
            .with_batching(3, Duration::from_millis(100))
            .with_queue_capacity(3)
    }

    fn connected(now: Instant) -> Connection<MockSocket> {
        let mut conn = Connection::new(config(), MockSocket::new());
        conn.connect(now).unwrap();
        conn
    }

    fn frame(kind: MessageKind, payload: serde_json::Value) -> String {
        serde_json::to_string(&WireMessage::new(kind, payload)).unwrap()
    }

    #[test]
    fn connect_reaches_connected() {
        let now = Instant::now();
        let conn = connected(now);
        assert_eq!(conn.state(), ConnectionState::Connected);
    }

    #[test]
    fn server_greeting_then_state_sync_reaches_active() {
        let now = Instant::now();
        let mut conn = connected(now);

        conn.handle_frame(&frame(MessageKind::Connected, json!({})), now);
        assert_eq!(conn.state(), ConnectionState::Syncing);

        conn.handle_frame(
            &frame(MessageKind::StateSync, json!({"state": {}, "version": 1})),
            now,
        );
        assert_eq!(conn.state(), ConnectionState::Active);

        // The state_sync message itself is surfaced to the driver.
        let has_message = std::iter::from_fn(|| conn.poll_event())
            .any(|e| matches!(e, ConnectionEvent::Message(m) if m.kind == MessageKind::StateSync));
        assert!(has_message);
    }

    #[test]
    fn normal_close_does_not_reconnect() {
        let now = Instant::now();
        let mut conn = connected(now);
        conn.handle_close(1000, now);
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[test]
    fn abnormal_close_schedules_reconnect() {
        let now = Instant::now();
        let mut conn = connected(now);
        conn.handle_close(1006, now);
        assert_eq!(conn.state(), ConnectionState::Reconnecting);

        // After the backoff delay elapses, the next tick reconnects.
        conn.tick(now + Duration::from_secs(120));
        assert_eq!(conn.state(), ConnectionState::Connected);
    }

    #[test]
    fn reconnect_gives_up_after_max_attempts() {
        let now = Instant::now();
        let mut conn = Connection::new(
            config().with_retry(
                RetryConfig::new(2)
                    .with_base_delay(Duration::from_millis(1))
                    .with_max_delay(Duration::from_millis(2)),
            ),
            MockSocket::new(),
        );
        conn.connect(now).unwrap();
        conn.socket.fail_next_opens(10);
        conn.handle_close(1006, now);

        let mut t = now;
        for _ in 0..10 {
            t += Duration::from_secs(5);
            conn.tick(t);
        }

        let exhausted = std::iter::from_fn(|| conn.poll_event())
            .any(|e| matches!(e, ConnectionEvent::ReconnectExhausted));
        assert!(exhausted);
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[test]
    fn priority_messages_bypass_batching() {
        let now = Instant::now();
        let mut conn = connected(now);
        conn.send(
            WireMessage::new(MessageKind::Subscribe, json!({"sessionId": "s"})),
            now,
        )
        .unwrap();
        assert_eq!(conn.socket.sent.len(), 1);
    }

    #[test]
    fn batch_flushes_at_size_threshold() {
        let now = Instant::now();
        let mut conn = connected(now);
        for i in 0..3 {
            conn.send(WireMessage::new(MessageKind::Ack, json!({"n": i})), now)
                .unwrap();
        }
        let sent = conn.socket.sent_messages();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, MessageKind::Batch);
        let inner = sent[0].clone().into_batch_messages().unwrap();
        assert_eq!(inner.len(), 3);
        assert_eq!(inner[0].payload, json!({"n": 0}));
    }

    #[test]
    fn batch_flushes_on_interval() {
        let now = Instant::now();
        let mut conn = connected(now);
        conn.send(WireMessage::new(MessageKind::Ack, json!({"n": 1})), now)
            .unwrap();
        assert!(conn.socket.sent.is_empty());

        conn.tick(now + Duration::from_millis(150));
        // A single pending message is sent unwrapped.
        let sent = conn.socket.sent_messages();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, MessageKind::Ack);
    }

    #[test]
    fn offline_messages_queue_and_flush_in_order() {
        let now = Instant::now();
        let mut conn = Connection::new(config(), MockSocket::new());
        for i in 0..2 {
            conn.send(
                WireMessage::new(MessageKind::Heartbeat, json!({"n": i})),
                now,
            )
            .unwrap();
        }
        assert_eq!(conn.queued_len(), 2);
        assert!(conn.socket.sent.is_empty());

        conn.connect(now).unwrap();
        assert_eq!(conn.queued_len(), 0);
        let sent = conn.socket.sent_messages();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].payload, json!({"n": 0}));
        assert_eq!(sent[1].payload, json!({"n": 1}));
    }

    #[test]
    fn queue_overflow_drops_oldest() {
        let now = Instant::now();
        let mut conn = Connection::new(config(), MockSocket::new());
        for i in 0..5 {
            conn.send(
                WireMessage::new(MessageKind::Heartbeat, json!({"n": i})),
                now,
            )
            .unwrap();
        }
        assert_eq!(conn.queued_len(), 3);
        conn.connect(now).unwrap();
        let sent = conn.socket.sent_messages();
        assert_eq!(sent[0].payload, json!({"n": 2}));
    }

    #[test]
    fn failed_flush_keeps_queue_for_the_next_reconnect() {
        let now = Instant::now();
        let mut conn = Connection::new(config(), MockSocket::new());
        conn.send(
            WireMessage::new(MessageKind::Heartbeat, json!({"n": 0})),
            now,
        )
        .unwrap();

        conn.socket.fail_sends(true);
        conn.connect(now).unwrap();
        assert_eq!(conn.state(), ConnectionState::Reconnecting);
        assert_eq!(conn.queued_len(), 1);

        // Once sending works again the retained message goes out.
        conn.socket.fail_sends(false);
        conn.tick(now + Duration::from_secs(120));
        assert_eq!(conn.state(), ConnectionState::Connected);
        assert_eq!(conn.queued_len(), 0);
        let sent = conn.socket.sent_messages();
        assert_eq!(sent[0].payload, json!({"n": 0}));
    }

    #[test]
    fn heartbeat_sent_and_interval_adapts() {
        let now = Instant::now();
        let mut conn = connected(now);
        let base = conn.heartbeat_interval();

        let t1 = now + base + Duration::from_millis(1);
        conn.tick(t1);
        let sent = conn.socket.sent_messages();
        assert_eq!(sent.last().map(|m| m.kind), Some(MessageKind::Heartbeat));

        // Fast reply: interval halves (clamped).
        conn.handle_frame(
            &frame(MessageKind::Pong, json!({})),
            t1 + Duration::from_millis(10),
        );
        assert_eq!(conn.heartbeat_interval(), base / 2);
    }

    #[test]
    fn missed_heartbeats_force_close_and_reconnect() {
        let now = Instant::now();
        let mut conn = connected(now);
        let interval = conn.heartbeat_interval();
        let rtt_timeout = conn.config.heartbeat.rtt_timeout;

        let mut t = now;
        for _ in 0..conn.config.heartbeat.miss_budget {
            t += interval + Duration::from_millis(1);
            conn.tick(t); // sends heartbeat
            t += rtt_timeout + Duration::from_millis(1);
            conn.tick(t); // reply times out
        }
        assert_eq!(conn.state(), ConnectionState::Reconnecting);
    }

    #[test]
    fn malformed_frames_are_dropped() {
        let now = Instant::now();
        let mut conn = connected(now);
        while conn.poll_event().is_some() {}

        conn.handle_frame("not json", now);
        conn.handle_frame("{\"id\": 1}", now);
        assert_eq!(conn.state(), ConnectionState::Connected);
        assert!(conn.poll_event().is_none());
    }

    #[test]
    fn auth_error_closes_without_reconnect() {
        let now = Instant::now();
        let mut conn = connected(now);
        conn.handle_frame(
            &frame(
                MessageKind::Error,
                json!({"code": "auth_failed", "message": "bad token", "recoverable": false}),
            ),
            now,
        );
        assert_eq!(conn.state(), ConnectionState::Closed);
        let auth_error = std::iter::from_fn(|| conn.poll_event())
            .any(|e| matches!(e, ConnectionEvent::Error(EngineError::Authentication(_))));
        assert!(auth_error);
    }

    #[test]
    fn inbound_batch_preserves_inner_order() {
        let now = Instant::now();
        let mut conn = connected(now);
        let batch = WireMessage::batch(vec![
            WireMessage::new(MessageKind::Ack, json!({"n": 1})),
            WireMessage::new(MessageKind::Ack, json!({"n": 2})),
        ])
        .unwrap();
        conn.handle_frame(&serde_json::to_string(&batch).unwrap(), now);

        let payloads: Vec<serde_json::Value> = std::iter::from_fn(|| conn.poll_event())
            .filter_map(|e| match e {
                ConnectionEvent::Message(m) => Some(m.payload),
                _ => None,
            })
            .collect();
        assert_eq!(payloads, vec![json!({"n": 1}), json!({"n": 2})]);
    }

    #[test]
    fn ping_is_answered_with_pong() {
        let now = Instant::now();
        let mut conn = connected(now);
        conn.handle_frame(&frame(MessageKind::Ping, json!({})), now);
        let sent = conn.socket.sent_messages();
        assert_eq!(sent.last().map(|m| m.kind), Some(MessageKind::Pong));
    }
}
