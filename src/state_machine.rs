//! Per-key recovery state machine (spec.md §4.2), the core of the engine.
//!
//! Grounded on the teacher's `client::pull::pull_group` loop: a linear
//! `async fn` that reads, retries with backoff, and logs at each step
//! through a handle (there, `WorkerTask::log`; here, `StatsHandle`),
//! rather than a hand-rolled poll-based state object. The explicit
//! `State` enum exists for observability (stats attribute, log lines)
//! only — control flow is plain `async`/`.await`, matching how the
//! teacher models "a sequence of awaited steps with retry" without an
//! actual state struct anywhere in `pull.rs`.

use std::collections::BTreeSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use log::{debug, warn};

use crate::backend::{ReadOptions, RemoveOptions, RemoveOutcome, StorageBackend, WriteOp, WriteOptions};
use crate::context::{io_timeout, Backoff, KeyRecoveryContext, Phase};
use crate::error::RecoveryError;
use crate::key::Key;
use crate::merge::MergeDecision;
use crate::replica::{Flags, ReplicaInfo, Timestamp};
use crate::stats::StatsHandle;

/// Observability-only phase marker (spec.md §4.2 state names).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Init,
    Reading,
    Writing,
    RemovingCorrupted,
    Done,
}

/// Parameters a key's recovery run needs, independent of how the driver
/// assembled its `RecoveryConfig` (spec.md §6).
#[derive(Debug, Clone)]
pub struct RecoveryParams {
    pub max_attempts: u32,
    pub chunk_size: u64,
    /// Expected transfer rate (bytes/sec) each I/O's timeout is derived
    /// from, with a 60s floor (spec.md §5).
    pub data_flow_rate: u64,
    /// Only replicas with a timestamp older than this watermark are
    /// removed by REMOVING_CORRUPTED (spec.md §4.2, §8 scenario 5).
    pub prepare_timeout_watermark: Timestamp,
    pub verify_checksum: bool,
    /// Corrupted replicas are removed only if this is set (spec.md §4.2
    /// REMOVING_CORRUPTED, gated behind `--safe` at the CLI per §6).
    pub remove_corrupted: bool,
    pub dry_run: bool,
    /// No write or remove is ever issued to a group in this set (spec.md
    /// §8 "No write to read-only"); a `diff_groups`/`missed_groups` entry
    /// that names one is left diverged rather than attempted.
    pub read_only_groups: BTreeSet<u32>,
}

#[derive(Debug, Clone)]
pub struct KeyOutcome {
    pub key: Key,
    pub success: bool,
    /// Groups whose replica failed checksum verification and were (or
    /// would be, in `--dry-run`) removed; the driver appends these to
    /// the corrupted-keys log (spec.md §6).
    pub corrupted_groups: Vec<u32>,
}

/// Run the whole per-key recovery: read the authoritative copy, write it
/// to every `diff_groups`/`missed_groups` target, and remove any replica
/// that failed checksum verification along the way.
pub async fn recover_key(
    key: Key,
    decision: MergeDecision,
    replicas: Vec<ReplicaInfo>,
    backend: Arc<dyn StorageBackend>,
    params: &RecoveryParams,
    stats: StatsHandle,
) -> KeyOutcome {
    let mut ctx = KeyRecoveryContext::new(key, decision, replicas, params.chunk_size);
    let mut corrupted_groups = Vec::new();
    let state = State::Init;

    debug!("key {}: state={:?} same={:?} diff={:?} missed={:?}", key, state, ctx.same_groups, ctx.diff_groups, ctx.missed_groups);

    stats.attribute("state", &format!("{:?}", State::Reading));
    let read_result = match read_all(&mut ctx, backend.as_ref(), params, &stats, &mut corrupted_groups).await {
        Ok(result) => result,
        Err(err) => {
            warn!("key {}: read failed: {}", key, err);
            stats.counter("keys_failed_read", 1);
            return KeyOutcome { key, success: false, corrupted_groups };
        }
    };

    let targets: Vec<u32> = ctx.diff_groups.iter().chain(ctx.missed_groups.iter()).copied().collect();
    let should_remove = !corrupted_groups.is_empty() && params.remove_corrupted && !params.dry_run;
    let pending = ctx.pending_operations_handle();

    // The write chain and the corrupted-replica removal run concurrently
    // (spec.md §4.2 "a REMOVING_CORRUPTED subtask is launched in parallel",
    // §8 scenario 5): removal only needs the cloned `pending` handle, never
    // a mutable borrow of `ctx`, so it can progress alongside the writes.
    stats.attribute("state", &format!("{:?}", State::Writing));
    let write_fut = async {
        let mut success = true;
        for group_id in targets {
            if params.read_only_groups.contains(&group_id) {
                debug!("key {}: group {} is read-only, leaving it diverged", key, group_id);
                stats.counter("skip_write_to_ro_group", 1);
                continue;
            }

            if params.dry_run {
                debug!("key {}: dry-run, would write group {}", key, group_id);
                ctx.promote_group(group_id);
                continue;
            }

            match write_all(&mut ctx, backend.as_ref(), params, &stats, group_id, &read_result).await {
                Ok(()) => {
                    ctx.promote_group(group_id);
                    stats.counter("keys_recovered_groups", 1);
                }
                Err(err) => {
                    success = false;
                    warn!("key {}: write to group {} failed: {}", key, group_id, err);
                    stats.counter("remote_write_failures", 1);
                }
            }
        }
        success
    };

    let remove_fut = async {
        if should_remove {
            debug!("key {}: state={:?}", key, State::RemovingCorrupted);
            pending.fetch_add(1, Ordering::SeqCst);
            remove_corrupted(key, backend.as_ref(), params, &stats, &corrupted_groups).await;
            pending.fetch_sub(1, Ordering::SeqCst);
        }
    };

    let (success, ()) = futures::join!(write_fut, remove_fut);

    debug!("key {}: state={:?} success={}", key, State::Done, success);
    stats.counter(if success { "keys_recovered" } else { "keys_failed" }, 1);

    KeyOutcome { key, success, corrupted_groups }
}

struct ReadAccumulated {
    data: Vec<u8>,
    json: Vec<u8>,
    source: ReplicaInfo,
}

/// READING (spec.md §4.2): pull the authoritative copy chunk by chunk,
/// retrying transient failures with doubled backoff and switching to the
/// next-best candidate on a non-retriable one (`StaleReadTarget`).
async fn read_all(
    ctx: &mut KeyRecoveryContext,
    backend: &dyn StorageBackend,
    params: &RecoveryParams,
    stats: &StatsHandle,
    corrupted_groups: &mut Vec<u32>,
) -> Result<ReadAccumulated, RecoveryError> {
    'candidate: loop {
        let target = ctx
            .read_target()
            .cloned()
            .ok_or_else(|| RecoveryError::StaleReadTarget { key: ctx.key, remaining: 0 })?;

        let mut data = Vec::with_capacity(ctx.total_size as usize);
        let mut json = Vec::new();
        let mut offset = 0u64;
        let chunk_size = if ctx.chunked { params.chunk_size } else { ctx.total_size.max(1) };
        let mut want = chunk_size.min(ctx.total_size.saturating_sub(offset)).max(1);
        ctx.begin_phase(Phase::Read, want, params.data_flow_rate);

        loop {
            // Only the first chunk validates the whole-record checksum;
            // later chunks only verify if the record was sealed per chunk.
            let verify_checksum =
                params.verify_checksum && (offset == 0 || target.flags.contains(Flags::CHUNKED_CHECKSUM));
            let opts = ReadOptions { verify_checksum, timeout: ctx.timeout() };

            stats.counter("local_reads", 1);
            match backend.read(target.group_id, &ctx.key, offset, want, &opts).await {
                Ok(result) => {
                    if offset == 0 {
                        if let Some(j) = result.json {
                            json = j;
                        }
                    }
                    let read_len = result.data.len() as u64;
                    data.extend_from_slice(&result.data);
                    offset += read_len;
                    ctx.record_progress(read_len);

                    if offset >= ctx.total_size || read_len == 0 {
                        return Ok(ReadAccumulated { data, json, source: target });
                    }
                    want = chunk_size.min(ctx.total_size.saturating_sub(offset)).max(1);
                    ctx.begin_phase(Phase::Read, want, params.data_flow_rate);
                }
                Err(err) if err.is_transient() => {
                    stats.counter("local_read_retries", 1);
                    if !ctx.record_retry(params.max_attempts) {
                        return Err(err);
                    }
                }
                Err(err) if err.is_checksum_error() => {
                    stats.counter("checksum_errors", 1);
                    corrupted_groups.push(target.group_id);
                    let remaining = ctx.advance_read_target();
                    if remaining == 0 {
                        return Err(RecoveryError::StaleReadTarget { key: ctx.key, remaining });
                    }
                    continue 'candidate;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// WRITING (spec.md §4.2): push the recovered bytes to one target group,
/// chunked prepare/plain/commit when the object exceeds `chunk_size`,
/// a single CAS-gated write otherwise.
async fn write_all(
    ctx: &mut KeyRecoveryContext,
    backend: &dyn StorageBackend,
    params: &RecoveryParams,
    stats: &StatsHandle,
    group_id: u32,
    read: &ReadAccumulated,
) -> Result<(), RecoveryError> {
    ctx.begin_phase(Phase::Write, read.data.len() as u64, params.data_flow_rate);

    loop {
        let opts = WriteOptions {
            cas_timestamp: read.source.timestamp,
            timeout: ctx.timeout(),
            user_flags: read.source.user_flags,
        };

        let result = if ctx.chunked {
            write_chunked(backend, &ctx.key, group_id, read, params.chunk_size, &opts).await
        } else {
            stats.counter("remote_writes", 1);
            backend
                .write(
                    group_id,
                    &ctx.key,
                    WriteOp::Plain {
                        data: read.data.clone(),
                        json: read.json.clone(),
                        data_capacity: read.data.len() as u64,
                        json_capacity: read.json.len() as u64,
                    },
                    &opts,
                )
                .await
        };

        match result {
            Ok(()) => return Ok(()),
            Err(err) if err.is_transient() => {
                stats.counter("remote_write_retries", 1);
                if !ctx.record_retry(params.max_attempts) {
                    return Err(err);
                }
            }
            Err(err) => return Err(err),
        }
    }
}

async fn write_chunked(
    backend: &dyn StorageBackend,
    key: &Key,
    group_id: u32,
    read: &ReadAccumulated,
    chunk_size: u64,
    opts: &WriteOptions,
) -> Result<(), RecoveryError> {
    let total = read.data.len() as u64;
    let first_len = chunk_size.min(total) as usize;

    backend
        .write(
            group_id,
            key,
            WriteOp::Prepare {
                data: read.data[..first_len].to_vec(),
                json: read.json.clone(),
                data_capacity: total,
                json_capacity: read.json.len() as u64,
            },
            opts,
        )
        .await?;

    let mut offset = first_len as u64;
    while offset < total {
        let remaining = total - offset;
        let len = chunk_size.min(remaining);
        let chunk = read.data[offset as usize..(offset + len) as usize].to_vec();
        let is_last = offset + len >= total;

        if is_last {
            backend
                .write(group_id, key, WriteOp::Commit { data: chunk, data_offset: offset, data_commit_size: total }, opts)
                .await?;
        } else {
            backend.write(group_id, key, WriteOp::WritePlain { data: chunk, data_offset: offset }, opts).await?;
        }

        offset += len;
    }

    Ok(())
}

/// REMOVING_CORRUPTED (spec.md §4.2): CAS-gated delete of any replica
/// that failed checksum verification, one concurrent subtask per group so
/// it can run alongside the write chain (gated by the caller's
/// `pending_operations` handle, not by anything in here).
async fn remove_corrupted(
    key: Key,
    backend: &dyn StorageBackend,
    params: &RecoveryParams,
    stats: &StatsHandle,
    corrupted_groups: &[u32],
) {
    let (skip, attempt): (Vec<u32>, Vec<u32>) =
        corrupted_groups.iter().copied().partition(|group_id| params.read_only_groups.contains(group_id));

    for group_id in skip {
        debug!("key {}: group {} is read-only, leaving corrupted replica in place", key, group_id);
        stats.counter("skip_remove_corrupted_key_from_ro_group", 1);
    }

    let removals = attempt.iter().map(|&group_id| remove_one(key, group_id, backend, params, stats));
    futures::future::join_all(removals).await;
}

/// Remove a single corrupted replica, retrying transient failures with
/// doubled timeout up to `max_attempts` (spec.md §4.2 "On per-replica
/// failure, retry with doubled timeout up to max_attempts"). Only
/// replicas older than `prepare_timeout_watermark` are actually removed
/// (spec.md §8 scenario 5); the watermark is carried as the CAS timestamp
/// so the backend itself enforces that.
async fn remove_one(key: Key, group_id: u32, backend: &dyn StorageBackend, params: &RecoveryParams, stats: &StatsHandle) {
    let mut backoff = Backoff::new(io_timeout(0, params.data_flow_rate));

    loop {
        let opts = RemoveOptions { cas_timestamp: params.prepare_timeout_watermark, timeout: backoff.timeout() };
        match backend.remove(group_id, &key, &opts).await {
            Ok(RemoveOutcome::Removed) => {
                stats.counter("corrupted_replicas_removed", 1);
                return;
            }
            Ok(RemoveOutcome::NotFound) => {
                stats.counter("remove_target_not_found", 1);
                return;
            }
            Ok(RemoveOutcome::Forbidden) => {
                stats.counter("skip_remove_corrupted_key_from_ro_group", 1);
                return;
            }
            Err(err) if err.is_transient() => {
                stats.counter("corrupted_removal_retries", 1);
                if !backoff.record_retry(params.max_attempts) {
                    warn!("key {}: failed to remove corrupted replica in group {} after retries: {}", key, group_id, err);
                    stats.counter("corrupted_removal_failures", 1);
                    return;
                }
            }
            Err(err) => {
                warn!("key {}: failed to remove corrupted replica in group {}: {}", key, group_id, err);
                stats.counter("corrupted_removal_failures", 1);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryBackend;
    use crate::merge::select_authoritative;
    use crate::replica::Address;
    use std::collections::BTreeSet;
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Duration;

    fn replica(group_id: u32, secs: i64, size: u64) -> ReplicaInfo {
        ReplicaInfo {
            group_id,
            address: Address { host: IpAddr::V4(Ipv4Addr::LOCALHOST), port: 3000 + group_id as u16 },
            timestamp: Timestamp { secs, nanos: 0 },
            size,
            user_flags: 0,
            flags: Flags::empty(),
            data_offset: 0,
            blob_id: 0,
        }
    }

    fn params() -> RecoveryParams {
        RecoveryParams {
            max_attempts: 3,
            chunk_size: 1024,
            data_flow_rate: 1 << 20,
            prepare_timeout_watermark: Timestamp { secs: i64::MAX, nanos: 0 },
            verify_checksum: false,
            remove_corrupted: true,
            dry_run: false,
            read_only_groups: BTreeSet::new(),
        }
    }

    fn test_stats() -> (StatsHandle, crate::stats::StatsAggregator) {
        let (agg, handle) = crate::stats::StatsAggregator::spawn(
            std::env::temp_dir(),
            crate::stats::StatsMode::Json,
            64,
            Duration::from_secs(3600),
        );
        (handle, agg)
    }

    #[tokio::test]
    async fn recovers_a_plain_write_to_a_diverged_group() {
        let backend = Arc::new(MemoryBackend::new(vec![]));
        let key = Key::from_bytes([9u8; 64]);
        let data = b"hello world".to_vec();
        backend.seed(1, key, data.clone(), b"{}".to_vec(), Timestamp { secs: 200, nanos: 0 }, 0);
        backend.seed(2, key, b"stale".to_vec(), b"{}".to_vec(), Timestamp { secs: 100, nanos: 0 }, 0);

        let replicas = vec![replica(1, 200, data.len() as u64), replica(2, 100, 5)];
        let groups: BTreeSet<u32> = [1, 2].into_iter().collect();
        let decision = select_authoritative(&replicas, &groups);

        let (stats, agg) = test_stats();
        let outcome = recover_key(key, decision, replicas, backend.clone(), &params(), stats).await;

        assert!(outcome.success);
        let (written, _, _, _) = backend.get(2, &key).unwrap();
        assert_eq!(written, data);
        agg.join();
    }

    #[tokio::test]
    async fn writes_a_chunked_object_to_a_missing_group() {
        let backend = Arc::new(MemoryBackend::new(vec![]));
        let key = Key::from_bytes([3u8; 64]);
        let data = vec![7u8; 10];
        backend.seed(1, key, data.clone(), Vec::new(), Timestamp { secs: 50, nanos: 0 }, 0);

        let replicas = vec![replica(1, 50, data.len() as u64)];
        let groups: BTreeSet<u32> = [1, 2].into_iter().collect();
        let decision = select_authoritative(&replicas, &groups);

        let mut p = params();
        p.chunk_size = 4; // force chunking for a 10-byte object

        let (stats, agg) = test_stats();
        let outcome = recover_key(key, decision, replicas, backend.clone(), &p, stats).await;

        assert!(outcome.success);
        let (written, _, _, _) = backend.get(2, &key).unwrap();
        assert_eq!(written, data);
        agg.join();
    }

    #[tokio::test]
    async fn retries_past_a_transient_failure_then_succeeds() {
        let backend = Arc::new(MemoryBackend::new(vec![]));
        let key = Key::from_bytes([5u8; 64]);
        let data = b"retry-me".to_vec();
        backend.seed(1, key, data.clone(), Vec::new(), Timestamp { secs: 10, nanos: 0 }, 0);
        backend.inject_write_failure(2, key, RecoveryError::Timeout { key, group_id: 2 });

        let replicas = vec![replica(1, 10, data.len() as u64)];
        let groups: BTreeSet<u32> = [1, 2].into_iter().collect();
        let decision = select_authoritative(&replicas, &groups);

        let (stats, agg) = test_stats();
        let outcome = recover_key(key, decision, replicas, backend.clone(), &params(), stats).await;

        assert!(outcome.success);
        assert!(backend.get(2, &key).is_some());
        agg.join();
    }

    #[tokio::test]
    async fn dry_run_performs_no_writes() {
        let backend = Arc::new(MemoryBackend::new(vec![]));
        let key = Key::from_bytes([1u8; 64]);
        let data = b"dry".to_vec();
        backend.seed(1, key, data.clone(), Vec::new(), Timestamp { secs: 10, nanos: 0 }, 0);

        let replicas = vec![replica(1, 10, data.len() as u64)];
        let groups: BTreeSet<u32> = [1, 2].into_iter().collect();
        let decision = select_authoritative(&replicas, &groups);

        let mut p = params();
        p.dry_run = true;

        let (stats, agg) = test_stats();
        let outcome = recover_key(key, decision, replicas, backend.clone(), &p, stats).await;

        assert!(outcome.success);
        assert!(backend.get(2, &key).is_none());
        agg.join();
    }

    #[tokio::test]
    async fn never_writes_into_a_read_only_group() {
        let backend = Arc::new(MemoryBackend::new(vec![2]));
        let key = Key::from_bytes([6u8; 64]);
        let data = b"keep-away".to_vec();
        backend.seed(1, key, data.clone(), Vec::new(), Timestamp { secs: 10, nanos: 0 }, 0);

        let replicas = vec![replica(1, 10, data.len() as u64)];
        let groups: BTreeSet<u32> = [1, 2].into_iter().collect();
        let decision = select_authoritative(&replicas, &groups);

        let mut p = params();
        p.read_only_groups = [2].into_iter().collect();

        let (stats, agg) = test_stats();
        let outcome = recover_key(key, decision, replicas, backend.clone(), &p, stats).await;

        // a read-only miss is expected, not a failure
        assert!(outcome.success);
        assert!(backend.get(2, &key).is_none());
        agg.join();
    }

    #[tokio::test]
    async fn falls_back_to_next_candidate_after_a_checksum_error() {
        let backend = Arc::new(MemoryBackend::new(vec![]));
        let key = Key::from_bytes([4u8; 64]);
        let data = b"stale-cluster-fallback".to_vec();
        backend.seed(1, key, data.clone(), Vec::new(), Timestamp { secs: 100, nanos: 0 }, 0);
        backend.seed(2, key, data.clone(), Vec::new(), Timestamp { secs: 100, nanos: 0 }, 0);
        backend.inject_read_failure(1, key, RecoveryError::ChecksumError { key, group_id: 1 });

        let replicas = vec![replica(1, 100, data.len() as u64), replica(2, 100, data.len() as u64)];
        let groups: BTreeSet<u32> = [1, 2, 3].into_iter().collect();
        let decision = select_authoritative(&replicas, &groups);
        assert!(decision.diff_groups.is_empty());

        let (stats, agg) = test_stats();
        let outcome = recover_key(key, decision, replicas, backend.clone(), &params(), stats).await;

        assert!(outcome.success);
        assert_eq!(outcome.corrupted_groups, vec![1]);
        let (written, ..) = backend.get(3, &key).unwrap();
        assert_eq!(written, data);
        agg.join();
    }

    #[tokio::test]
    async fn cas_gate_rejects_a_write_to_a_target_already_newer() {
        let backend = Arc::new(MemoryBackend::new(vec![]));
        let key = Key::from_bytes([8u8; 64]);
        let data = b"older".to_vec();
        backend.seed(1, key, data.clone(), Vec::new(), Timestamp { secs: 10, nanos: 0 }, 0);
        // group 2 already holds something newer than the source, violating CAS
        backend.seed(2, key, b"newer".to_vec(), Vec::new(), Timestamp { secs: 999, nanos: 0 }, 0);

        let replicas = vec![replica(1, 10, data.len() as u64), replica(2, 5, 1)];
        let groups: BTreeSet<u32> = [1, 2].into_iter().collect();
        let decision = select_authoritative(&replicas, &groups);

        let (stats, agg) = test_stats();
        let outcome = recover_key(key, decision, replicas, backend.clone(), &params(), stats).await;

        assert!(!outcome.success);
        let (written, ..) = backend.get(2, &key).unwrap();
        assert_eq!(written, b"newer");
        agg.join();
    }

    #[tokio::test]
    async fn leaves_a_corrupted_replica_newer_than_the_watermark_in_place() {
        let backend = Arc::new(MemoryBackend::new(vec![]));
        let key = Key::from_bytes([2u8; 64]);
        let data = b"fallback-data".to_vec();
        backend.seed(1, key, data.clone(), Vec::new(), Timestamp { secs: 100, nanos: 0 }, 0);
        backend.seed(2, key, data.clone(), Vec::new(), Timestamp { secs: 100, nanos: 0 }, 0);
        backend.inject_read_failure(1, key, RecoveryError::ChecksumError { key, group_id: 1 });

        let replicas = vec![replica(1, 100, data.len() as u64), replica(2, 100, data.len() as u64)];
        let groups: BTreeSet<u32> = [1, 2, 3].into_iter().collect();
        let decision = select_authoritative(&replicas, &groups);

        let mut p = params();
        // watermark is older than the corrupted replica's own timestamp, so
        // the CAS gate must refuse to remove it.
        p.prepare_timeout_watermark = Timestamp { secs: 50, nanos: 0 };

        let (stats, agg) = test_stats();
        let outcome = recover_key(key, decision, replicas, backend.clone(), &p, stats).await;

        assert!(outcome.success);
        assert_eq!(outcome.corrupted_groups, vec![1]);
        assert!(backend.get(1, &key).is_some(), "replica newer than the watermark must not be removed");
        agg.join();
    }

    #[tokio::test]
    async fn retries_a_transient_removal_failure_before_succeeding() {
        let backend = Arc::new(MemoryBackend::new(vec![]));
        let key = Key::from_bytes([11u8; 64]);
        let data = b"fallback-data".to_vec();
        backend.seed(1, key, data.clone(), Vec::new(), Timestamp { secs: 100, nanos: 0 }, 0);
        backend.seed(2, key, data.clone(), Vec::new(), Timestamp { secs: 100, nanos: 0 }, 0);
        backend.inject_read_failure(1, key, RecoveryError::ChecksumError { key, group_id: 1 });
        backend.inject_remove_failure(1, key, RecoveryError::Timeout { key, group_id: 1 });

        let replicas = vec![replica(1, 100, data.len() as u64), replica(2, 100, data.len() as u64)];
        let groups: BTreeSet<u32> = [1, 2, 3].into_iter().collect();
        let decision = select_authoritative(&replicas, &groups);

        let (stats, agg) = test_stats();
        let outcome = recover_key(key, decision, replicas, backend.clone(), &params(), stats).await;

        assert!(outcome.success);
        assert_eq!(outcome.corrupted_groups, vec![1]);
        assert!(backend.get(1, &key).is_none(), "removal should succeed after retrying the transient failure");
        agg.join();
    }
}
