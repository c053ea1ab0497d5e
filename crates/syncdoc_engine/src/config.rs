//! Configuration for the sync engine.

use rand::Rng;
use std::time::Duration;

/// Configuration for reconnection backoff.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of reconnection attempts before giving up.
    pub max_attempts: u32,
    /// Base delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound on the computed delay.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Maximum random jitter added to each delay.
    pub max_jitter: Duration,
}

impl RetryConfig {
    /// Creates a retry configuration with the given attempt budget.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            max_jitter: Duration::from_secs(1),
        }
    }

    /// Sets the base delay.
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Computes the delay before a retry attempt (1-indexed).
    ///
    /// `base × multiplier^(attempt−1)` plus random jitter, capped at
    /// the maximum delay.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(30) as i32;
        let backoff = self.base_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let jitter = rand::thread_rng().gen_range(0.0..=1.0) * self.max_jitter.as_secs_f64();
        let total = (backoff + jitter).min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(total)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(10)
    }
}

/// Configuration for the adaptive heartbeat.
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Baseline heartbeat interval.
    pub base_interval: Duration,
    /// Lower clamp on the adapted interval.
    pub min_interval: Duration,
    /// Upper clamp on the adapted interval.
    pub max_interval: Duration,
    /// Round-trip latency considered low.
    pub low_latency: Duration,
    /// Round-trip latency considered high.
    pub high_latency: Duration,
    /// Timeout for a single heartbeat round trip.
    pub rtt_timeout: Duration,
    /// Consecutive misses that force-close the connection.
    pub miss_budget: u32,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_secs(30),
            min_interval: Duration::from_secs(5),
            max_interval: Duration::from_secs(60),
            low_latency: Duration::from_millis(100),
            high_latency: Duration::from_secs(1),
            rtt_timeout: Duration::from_secs(10),
            miss_budget: 3,
        }
    }
}

impl HeartbeatConfig {
    /// Adapts the interval to an observed round-trip latency.
    ///
    /// Low latency halves the base interval, high latency doubles it;
    /// the result is clamped within the configured bounds.
    pub fn adapted_interval(&self, rtt: Duration) -> Duration {
        let candidate = if rtt < self.low_latency {
            self.base_interval / 2
        } else if rtt > self.high_latency {
            self.base_interval * 2
        } else {
            self.base_interval
        };
        candidate.clamp(self.min_interval, self.max_interval)
    }
}

/// Configuration for a transport connection.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Server URL.
    pub url: String,
    /// Authentication token carried as a query parameter.
    pub token: String,
    /// This device's id.
    pub device_id: String,
    /// Time budget for a single connection attempt.
    pub connect_timeout: Duration,
    /// Whether unexpected closes schedule reconnection.
    pub auto_reconnect: bool,
    /// Reconnection backoff.
    pub retry: RetryConfig,
    /// Heartbeat behavior.
    pub heartbeat: HeartbeatConfig,
    /// Batched messages flushed when this count is reached.
    pub batch_size: usize,
    /// Batched messages flushed when this interval elapses.
    pub batch_interval: Duration,
    /// Capacity of the offline outbound queue.
    pub queue_capacity: usize,
    /// Payload size above which compressible messages are compressed.
    pub compression_threshold: usize,
}

impl ConnectionConfig {
    /// Creates a connection configuration.
    pub fn new(
        url: impl Into<String>,
        token: impl Into<String>,
        device_id: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            token: token.into(),
            device_id: device_id.into(),
            connect_timeout: Duration::from_secs(10),
            auto_reconnect: true,
            retry: RetryConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            batch_size: 10,
            batch_interval: Duration::from_millis(100),
            queue_capacity: 100,
            compression_threshold: syncdoc_protocol::COMPRESSION_THRESHOLD,
        }
    }

    /// Disables automatic reconnection.
    pub fn without_reconnect(mut self) -> Self {
        self.auto_reconnect = false;
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the batching thresholds.
    pub fn with_batching(mut self, size: usize, interval: Duration) -> Self {
        self.batch_size = size;
        self.batch_interval = interval;
        self
    }

    /// Sets the offline queue capacity.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }
}

/// Configuration for the document manager.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// This device's id.
    pub device_id: String,
    /// Session the document belongs to.
    pub session_id: String,
    /// Trailing-edge debounce window for outgoing sync.
    pub debounce: Duration,
    /// Maximum retained snapshots; oldest-created evicted first.
    pub max_snapshots: usize,
    /// Snapshots older than this are garbage-collected.
    pub snapshot_max_age: Duration,
    /// Interval between garbage-collection passes.
    pub gc_interval: Duration,
}

impl ManagerConfig {
    /// Creates a manager configuration.
    pub fn new(device_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            session_id: session_id.into(),
            debounce: Duration::from_millis(300),
            max_snapshots: 20,
            snapshot_max_age: Duration::from_secs(3600),
            gc_interval: Duration::from_secs(60),
        }
    }

    /// Sets the debounce window.
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Sets the snapshot retention bound.
    pub fn with_max_snapshots(mut self, max: usize) -> Self {
        self.max_snapshots = max;
        self
    }

    /// Sets the snapshot age threshold for garbage collection.
    pub fn with_snapshot_max_age(mut self, age: Duration) -> Self {
        self.snapshot_max_age = age;
        self
    }
}

/// Strategy for resolving conflicting remote edits against locked paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictStrategy {
    /// Remote wins iff its timestamp is at or after the local one.
    LastWriteWins,
    /// Explicit symmetric timestamp comparison.
    TimestampWins,
    /// No automatic resolution; conflicts surface to the caller.
    Manual,
}

impl ConflictStrategy {
    /// Returns true if this strategy resolves conflicts automatically.
    pub fn auto_resolves(&self) -> bool {
        !matches!(self, ConflictStrategy::Manual)
    }
}

/// Configuration for the multi-device sync coordinator.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// This device's id.
    pub device_id: String,
    /// Default optimistic-lock duration.
    pub lock_duration: Duration,
    /// Inactivity after which a device is demoted to away.
    pub staleness_threshold: Duration,
    /// Coalescing window for outgoing broadcasts.
    pub broadcast_window: Duration,
    /// Conflict-resolution strategy.
    pub strategy: ConflictStrategy,
}

impl CoordinatorConfig {
    /// Creates a coordinator configuration.
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            lock_duration: Duration::from_secs(30),
            staleness_threshold: Duration::from_secs(120),
            broadcast_window: Duration::from_millis(50),
            strategy: ConflictStrategy::LastWriteWins,
        }
    }

    /// Sets the conflict strategy.
    pub fn with_strategy(mut self, strategy: ConflictStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Sets the default lock duration.
    pub fn with_lock_duration(mut self, duration: Duration) -> Self {
        self.lock_duration = duration;
        self
    }
}
