//! Per-key recovery context (spec.md §3 `KeyRecoveryContext`).
//!
//! Holds everything the state machine needs to survive across suspension
//! points without borrowing the scheduler or the input cursor, mirroring
//! the teacher's `pull.rs` pattern of carrying a small owned struct
//! (`SnapshotReader` + `StoreProgress`) through a chain of `.await` points
//! rather than threading loose arguments.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::key::Key;
use crate::merge::MergeDecision;
use crate::replica::ReplicaInfo;

/// Which phase's attempt counter/timeout is currently active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Read,
    Write,
    Remove,
}

/// Per-call I/O timeout derived from expected bytes and a configured
/// transfer-rate floor (spec.md §5 "each I/O has a timeout derived from
/// expected bytes and a configured data_flow_rate (minimum 60s)").
pub fn io_timeout(expected_bytes: u64, data_flow_rate: u64) -> Duration {
    let rate = data_flow_rate.max(1) as f64;
    let secs = expected_bytes as f64 / rate;
    Duration::from_secs_f64(secs.max(60.0))
}

/// Doubled-timeout retry/backoff tracker (spec.md §4.2 retry/backoff
/// policy). Split out of `KeyRecoveryContext` so a concurrent subtask
/// (a corrupted-replica removal running alongside the write chain) can
/// keep its own backoff state without needing a mutable borrow of the
/// context the write chain is still using.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    attempts: u32,
    timeout: Duration,
}

impl Backoff {
    pub fn new(timeout: Duration) -> Self {
        Self { attempts: 0, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Record a failed attempt and double the timeout. Returns `false`
    /// once `max_attempts` is exceeded, meaning the caller must give up.
    pub fn record_retry(&mut self, max_attempts: u32) -> bool {
        self.attempts += 1;
        self.timeout *= 2;
        self.attempts < max_attempts
    }
}

/// Mutable per-key state carried by the state machine across its whole
/// lifetime (spec.md §3: "attempt counter (per-phase)", "cached
/// authoritative metadata", "recovered_size").
pub struct KeyRecoveryContext {
    pub key: Key,
    /// All known replicas, sorted descending by `(timestamp, size)`
    /// (spec.md §3 ordering invariant) — `candidates[0]` is the current
    /// read target; `StaleReadTarget` advances `next_candidate`.
    candidates: Vec<ReplicaInfo>,
    next_candidate: usize,

    pub same_groups: BTreeSet<u32>,
    pub diff_groups: BTreeSet<u32>,
    pub missed_groups: BTreeSet<u32>,

    pub total_size: u64,
    pub recovered_size: u64,
    pub chunked: bool,

    phase: Phase,
    backoff: Backoff,

    /// Number of outstanding async subtasks spawned on this key's behalf
    /// (spec.md §4.2 "REMOVING_CORRUPTED runs concurrently, gated by
    /// pending_operations"); the state machine may not report DONE while
    /// this is nonzero. An `Arc` rather than a plain counter so a
    /// concurrent removal subtask can hold its own clone and decrement it
    /// without borrowing the context.
    pending_operations: Arc<AtomicU32>,
}

impl KeyRecoveryContext {
    /// `replicas` is the full set the merge decision was computed over;
    /// it is re-sorted here so `candidates[0]` matches
    /// `decision.authoritative`.
    pub fn new(key: Key, decision: MergeDecision, mut replicas: Vec<ReplicaInfo>, chunk_size: u64) -> Self {
        replicas.sort_by(|a, b| b.sort_key().cmp(&a.sort_key()));
        let total_size = decision.authoritative.size;
        let chunked = total_size > chunk_size;

        Self {
            key,
            candidates: replicas,
            next_candidate: 0,
            same_groups: decision.same_groups,
            diff_groups: decision.diff_groups,
            missed_groups: decision.missed_groups,
            total_size,
            recovered_size: 0,
            chunked,
            phase: Phase::Read,
            backoff: Backoff::new(Duration::from_secs(60)),
            pending_operations: Arc::new(AtomicU32::new(0)),
        }
    }

    /// The replica currently targeted for reads (spec.md §4.2 READING).
    pub fn read_target(&self) -> Option<&ReplicaInfo> {
        self.candidates.get(self.next_candidate)
    }

    /// Advance past the current read target after a non-retriable
    /// failure (spec.md §7 `StaleReadTarget`). Returns the number of
    /// candidates still left to try.
    pub fn advance_read_target(&mut self) -> usize {
        self.next_candidate += 1;
        self.candidates.len().saturating_sub(self.next_candidate)
    }

    /// Start a phase, sizing its initial timeout from the bytes this next
    /// I/O call is expected to move (spec.md §5).
    pub fn begin_phase(&mut self, phase: Phase, expected_bytes: u64, data_flow_rate: u64) {
        self.phase = phase;
        self.backoff = Backoff::new(io_timeout(expected_bytes, data_flow_rate));
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn timeout(&self) -> Duration {
        self.backoff.timeout()
    }

    pub fn attempts(&self) -> u32 {
        self.backoff.attempts()
    }

    /// Record a failed attempt and double the timeout for the next one
    /// (spec.md §4.2 retry/backoff policy). Returns `false` once
    /// `max_attempts` is exceeded, meaning the phase must give up.
    pub fn record_retry(&mut self, max_attempts: u32) -> bool {
        self.backoff.record_retry(max_attempts)
    }

    /// Re-promote a group that was just brought in sync: remove it from
    /// `diff_groups`/`missed_groups` and add it to `same_groups`, then
    /// recompute the other two sets as a plain set difference so a group
    /// can never sit in more than one set at once (spec.md §9 open
    /// question 2, idempotent by construction).
    pub fn promote_group(&mut self, group_id: u32) {
        self.same_groups.insert(group_id);
        self.diff_groups.remove(&group_id);
        self.missed_groups.remove(&group_id);
    }

    pub fn begin_operation(&self) {
        self.pending_operations.fetch_add(1, Ordering::SeqCst);
    }

    pub fn end_operation(&self) {
        self.pending_operations.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn has_pending_operations(&self) -> bool {
        self.pending_operations.load(Ordering::SeqCst) > 0
    }

    /// A clone of the pending-operations counter a concurrently-running
    /// subtask can hold and decrement on its own, without borrowing the
    /// context (spec.md §4.2 "REMOVING_CORRUPTED runs concurrently").
    pub fn pending_operations_handle(&self) -> Arc<AtomicU32> {
        self.pending_operations.clone()
    }

    pub fn record_progress(&mut self, size: u64) {
        self.recovered_size += size;
    }

    pub fn is_fully_recovered(&self) -> bool {
        self.recovered_size >= self.total_size
    }
}
