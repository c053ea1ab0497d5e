//! Snapshot replay: rebuilding document state from a snapshot plus a
//! recorded delta history.

use crate::error::EngineResult;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use syncdoc_patch::{apply, PatchError};
use syncdoc_protocol::{Delta, Snapshot};

/// What to do when an operation in the history fails to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayStrategy {
    /// The history is authoritative: log the failure and continue.
    ServerWins,
    /// The reconstructed state is authoritative: skip the path for the
    /// rest of the replay.
    ClientWins,
    /// Attempt gap repair through a fetcher before skipping.
    Merge,
}

/// Options controlling a replay run.
#[derive(Debug, Clone)]
pub struct ReplayOptions {
    /// Failure-handling strategy.
    pub strategy: ReplayStrategy,
    /// Stop once this version is reached, when set.
    pub target_version: Option<u64>,
    /// Upper bound on operations applied in one run.
    pub max_operations: usize,
}

impl Default for ReplayOptions {
    fn default() -> Self {
        Self {
            strategy: ReplayStrategy::ServerWins,
            target_version: None,
            max_operations: 10_000,
        }
    }
}

/// Supplies missing deltas during a merge-mode replay.
pub trait GapFiller {
    /// Returns the delta transitioning from `base_version`, if it can
    /// be recovered.
    fn fetch(&mut self, base_version: u64) -> Option<Delta>;
}

/// A conflict recorded during replay (a failed `test` assertion).
#[derive(Debug, Clone)]
pub struct ReplayConflict {
    /// The contested path.
    pub path: String,
    /// Version of the delta the assertion belonged to.
    pub at_version: u64,
    /// Description of the failure.
    pub reason: String,
}

/// Outcome of a replay run.
#[derive(Debug, Clone)]
pub struct ReplayResult {
    /// True when the history applied without gaps or failures.
    pub success: bool,
    /// The reconstructed document data.
    pub state: Value,
    /// Version the reconstruction reached.
    pub version: u64,
    /// Operations applied.
    pub replayed_operations: usize,
    /// Deltas skipped (gaps, staleness, budget).
    pub skipped_operations: usize,
    /// Failed assertions encountered along the way.
    pub conflicts: Vec<ReplayConflict>,
    /// Wall-clock duration of the run.
    pub duration: Duration,
    /// Fingerprint of the reconstructed state.
    pub fingerprint: String,
    /// When the run finished.
    pub timestamp: DateTime<Utc>,
}

/// Replays a delta history on top of a snapshot.
///
/// The snapshot's checksum is verified first; a corrupt snapshot fails
/// the whole run. Deltas are sorted by base version and walked in
/// order: a delta whose base version is behind the current position is
/// stale and skipped, one that is ahead marks a gap. In merge mode a
/// gap filler may repair the gap; otherwise the delta is skipped and
/// the run is marked unsuccessful. Individual operation failures are
/// settled per the strategy and never abort the run.
pub fn replay(
    snapshot: &Snapshot,
    deltas: &[Delta],
    options: &ReplayOptions,
    mut gap_filler: Option<&mut dyn GapFiller>,
) -> EngineResult<ReplayResult> {
    let started = Instant::now();
    snapshot.verify()?;

    let mut history: Vec<Delta> = deltas.to_vec();
    history.sort_by_key(|d| d.base_version);
    if let Some(ceiling) = options.target_version {
        history.retain(|d| d.target_version <= ceiling);
    }

    let mut state = snapshot.data.clone();
    let mut version = snapshot.version;
    let mut replayed = 0usize;
    let mut skipped = 0usize;
    let mut conflicts = Vec::new();
    let mut gap_free = true;
    let mut withheld_paths: Vec<String> = Vec::new();

    let mut queue: VecDeque<Delta> = history.into();
    while let Some(delta) = queue.pop_front() {
        if replayed >= options.max_operations {
            tracing::warn!(replayed, "operation budget reached; stopping replay");
            skipped += 1 + queue.len();
            gap_free = false;
            break;
        }
        if delta.base_version < version {
            tracing::debug!(
                base = delta.base_version,
                at = version,
                "stale delta skipped"
            );
            skipped += 1;
            continue;
        }
        if delta.base_version > version {
            if options.strategy == ReplayStrategy::Merge {
                if let Some(filler) = gap_filler.as_deref_mut() {
                    if let Some(fill) = filler.fetch(version) {
                        tracing::debug!(base = version, "gap repaired");
                        queue.push_front(delta);
                        queue.push_front(fill);
                        continue;
                    }
                }
            }
            tracing::warn!(
                expected = version,
                found = delta.base_version,
                "gap in delta history"
            );
            skipped += 1;
            gap_free = false;
            continue;
        }

        let mut truncated = false;
        for op in &delta.operations {
            if replayed >= options.max_operations {
                truncated = true;
                break;
            }
            if withheld_paths.iter().any(|p| p == op.path()) {
                continue;
            }
            match apply(&mut state, std::slice::from_ref(op)) {
                Ok(_) => replayed += 1,
                Err(e) => {
                    if let PatchError::TestFailed { path, .. } = &e {
                        conflicts.push(ReplayConflict {
                            path: path.clone(),
                            at_version: delta.target_version,
                            reason: e.to_string(),
                        });
                    }
                    match options.strategy {
                        ReplayStrategy::ClientWins => {
                            tracing::debug!(error = %e, path = op.path(), "path withheld");
                            withheld_paths.push(op.path().to_string());
                        }
                        _ => {
                            tracing::warn!(error = %e, path = op.path(), "operation failed; continuing");
                        }
                    }
                }
            }
        }
        if truncated {
            // The delta only half-applied; claiming its target version
            // would misrepresent the state.
            tracing::warn!(
                replayed,
                at = delta.base_version,
                "operation budget reached inside a delta; stopping replay"
            );
            skipped += 1 + queue.len();
            gap_free = false;
            break;
        }
        version = delta.target_version;
    }

    let fingerprint = syncdoc_patch::fingerprint(&state);
    Ok(ReplayResult {
        success: gap_free && conflicts.is_empty(),
        state,
        version,
        replayed_operations: replayed,
        skipped_operations: skipped,
        conflicts,
        duration: started.elapsed(),
        fingerprint,
        timestamp: Utc::now(),
    })
}

/// Per-session bounded queues of deltas awaiting replay.
pub struct DeltaQueue {
    sessions: HashMap<String, VecDeque<Delta>>,
    capacity: usize,
}

impl DeltaQueue {
    /// Creates a queue bounded per session.
    pub fn new(capacity: usize) -> Self {
        Self {
            sessions: HashMap::new(),
            capacity,
        }
    }

    /// Appends a delta to a session's queue, dropping the oldest when
    /// at capacity.
    pub fn queue_delta(&mut self, session_id: &str, delta: Delta) {
        let queue = self.sessions.entry(session_id.to_string()).or_default();
        if queue.len() >= self.capacity {
            if let Some(dropped) = queue.pop_front() {
                tracing::warn!(
                    session = session_id,
                    base = dropped.base_version,
                    "delta queue full; dropping oldest"
                );
            }
        }
        queue.push_back(delta);
    }

    /// Returns a session's queued deltas in arrival order.
    pub fn queued_deltas(&self, session_id: &str) -> Vec<Delta> {
        self.sessions
            .get(session_id)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Takes a session's deltas, leaving its queue empty.
    pub fn drain(&mut self, session_id: &str) -> Vec<Delta> {
        self.sessions
            .remove(session_id)
            .map(|q| q.into_iter().collect())
            .unwrap_or_default()
    }

    /// Checks a session's queue for coverage problems: version gaps
    /// between consecutive deltas and deltas with no mutating effect.
    pub fn validate_queue(&self, session_id: &str) -> Vec<QueueIssue> {
        let mut issues = Vec::new();
        let Some(queue) = self.sessions.get(session_id) else {
            return issues;
        };
        let mut sorted: Vec<&Delta> = queue.iter().collect();
        sorted.sort_by_key(|d| d.base_version);
        for pair in sorted.windows(2) {
            if pair[1].base_version > pair[0].target_version {
                issues.push(QueueIssue::Gap {
                    after_version: pair[0].target_version,
                    next_base: pair[1].base_version,
                });
            }
        }
        for delta in &sorted {
            if !delta.operations.iter().any(|op| op.is_mutating()) {
                issues.push(QueueIssue::NoEffect {
                    base_version: delta.base_version,
                });
            }
        }
        issues
    }

    /// Number of deltas queued for a session.
    pub fn len(&self, session_id: &str) -> usize {
        self.sessions.get(session_id).map(|q| q.len()).unwrap_or(0)
    }

    /// Returns true if nothing is queued for the session.
    pub fn is_empty(&self, session_id: &str) -> bool {
        self.len(session_id) == 0
    }
}

/// A problem found while validating a session's delta queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueIssue {
    /// Consecutive deltas do not chain.
    Gap {
        /// Version the earlier delta reached.
        after_version: u64,
        /// Base version of the next delta.
        next_base: u64,
    },
    /// A delta carries no mutating operations.
    NoEffect {
        /// The delta's base version.
        base_version: u64,
    },
}
