//! Windowed scheduler (spec.md §4.3), grounded directly on the teacher's
//! `pull_index_chunks` in `client/pull.rs`: a `futures::stream` pulled
//! from a cursor and run through `try_buffer_unordered(W)` to cap
//! in-flight work at a fixed width, rather than a hand-rolled semaphore
//! or worker-thread pool.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures::stream::{self, StreamExt};
use log::{error, info};
use tokio::io::AsyncRead;
use tokio::sync::Mutex;

use crate::backend::StorageBackend;
use crate::input::InputCursor;
use crate::key::Key;
use crate::state_machine::{recover_key, RecoveryParams};
use crate::stats::StatsHandle;

/// Aggregate result of one scheduler run (spec.md §4.3 "overall result is
/// the logical AND of every key's result").
pub struct SchedulerSummary {
    pub success: bool,
    pub processed_keys: u64,
    pub throughput_keys_per_sec: f64,
    /// `(key, corrupted groups)` pairs for the driver's corrupted-keys
    /// log (spec.md §6).
    pub corrupted: Vec<(Key, Vec<u32>)>,
}

/// Run every key the cursor yields with at most `window` recoveries in
/// flight at once. `need_exit` is sticky: once set (by a caught signal or
/// a cursor fault), no new key is pulled, but in-flight recoveries are
/// allowed to drain (spec.md §5 "Workers ignore interactive interrupts").
pub async fn run<R>(
    cursor: InputCursor<R>,
    backend: Arc<dyn StorageBackend>,
    params: Arc<RecoveryParams>,
    stats: StatsHandle,
    need_exit: Arc<AtomicBool>,
    window: usize,
) -> SchedulerSummary
where
    R: AsyncRead + Unpin + Send,
{
    let cursor = Mutex::new(cursor);
    let processed = AtomicU64::new(0);
    let start = Instant::now();

    let pull = stream::unfold((&cursor, &need_exit), |(cursor, need_exit)| async move {
        if need_exit.load(Ordering::SeqCst) {
            return None;
        }
        let mut guard = cursor.lock().await;
        match guard.next().await {
            Ok(Some(item)) => {
                drop(guard);
                Some((item, (cursor, need_exit)))
            }
            Ok(None) => None,
            Err(err) => {
                error!("scheduler: input cursor failed: {}", err);
                need_exit.store(true, Ordering::SeqCst);
                None
            }
        }
    });

    let results = pull
        .map(|item| {
            let backend = backend.clone();
            let params = params.clone();
            let stats = stats.child(&item.key.to_string());
            let processed = &processed;
            async move {
                let outcome = recover_key(item.key, item.decision, item.replicas, backend, &params, stats).await;
                processed.fetch_add(1, Ordering::SeqCst);
                outcome
            }
        })
        .buffer_unordered(window.max(1))
        .collect::<Vec<_>>()
        .await;

    let elapsed = start.elapsed().as_secs_f64().max(0.001);
    let processed_keys = processed.load(Ordering::SeqCst);
    let throughput = processed_keys as f64 / elapsed;

    info!("scheduler: processed {} keys in {:.2}s ({:.2} keys/s)", processed_keys, elapsed, throughput);
    stats.set_counter("throughput_keys_per_sec", throughput.round() as i64);

    let mut success = true;
    let mut corrupted = Vec::new();
    for outcome in &results {
        if !outcome.success {
            success = false;
        }
        if !outcome.corrupted_groups.is_empty() {
            corrupted.push((outcome.key, outcome.corrupted_groups.clone()));
        }
    }

    SchedulerSummary { success, processed_keys, throughput_keys_per_sec: throughput, corrupted }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryBackend;
    use crate::input::encode_record;
    use crate::replica::{Address, Flags, ReplicaInfo, Timestamp};
    use crate::stats::{StatsAggregator, StatsMode};
    use std::io::Cursor as IoCursor;
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Duration;

    fn replica(group_id: u32, secs: i64, size: u64) -> ReplicaInfo {
        ReplicaInfo {
            group_id,
            address: Address { host: IpAddr::V4(Ipv4Addr::LOCALHOST), port: 4000 + group_id as u16 },
            timestamp: Timestamp { secs, nanos: 0 },
            size,
            user_flags: 0,
            flags: Flags::empty(),
            data_offset: 0,
            blob_id: 0,
        }
    }

    #[tokio::test]
    async fn runs_every_key_to_completion_and_ands_the_results() {
        let backend = Arc::new(MemoryBackend::new(vec![]));

        let key_a = Key::from_bytes([1u8; 64]);
        let key_b = Key::from_bytes([2u8; 64]);
        backend.seed(1, key_a, b"aaa".to_vec(), Vec::new(), Timestamp { secs: 10, nanos: 0 }, 0);
        backend.seed(1, key_b, b"bbb".to_vec(), Vec::new(), Timestamp { secs: 20, nanos: 0 }, 0);

        let mut buf = Vec::new();
        buf.extend(encode_record(&key_a, &[replica(1, 10, 3)]));
        buf.extend(encode_record(&key_b, &[replica(1, 20, 3)]));

        let groups = [1, 2].into_iter().collect();
        let cursor = InputCursor::new(IoCursor::new(buf), groups);

        let params = Arc::new(RecoveryParams {
            max_attempts: 3,
            chunk_size: 1024,
            data_flow_rate: 1 << 20,
            prepare_timeout_watermark: Timestamp { secs: i64::MAX, nanos: 0 },
            verify_checksum: false,
            remove_corrupted: true,
            dry_run: false,
            read_only_groups: std::collections::BTreeSet::new(),
        });

        let (stats, agg) = {
            let (agg, handle) = StatsAggregator::spawn(std::env::temp_dir(), StatsMode::Json, 64, Duration::from_secs(3600));
            (handle, agg)
        };

        let need_exit = Arc::new(AtomicBool::new(false));
        let summary = run(cursor, backend.clone(), params, stats, need_exit, 4).await;

        assert!(summary.success);
        assert_eq!(summary.processed_keys, 2);
        assert!(backend.get(2, &key_a).is_some());
        assert!(backend.get(2, &key_b).is_some());
        agg.join();
    }

    /// Wraps a backend to count concurrent `read` calls, so the test below
    /// can observe the scheduler's actual in-flight ceiling rather than
    /// just trust `buffer_unordered`'s documented behavior.
    struct CountingBackend {
        inner: MemoryBackend,
        in_flight: AtomicU64,
        peak: AtomicU64,
    }

    #[async_trait::async_trait]
    impl StorageBackend for CountingBackend {
        async fn read(
            &self,
            group_id: u32,
            key: &Key,
            offset: u64,
            size: u64,
            opts: &crate::backend::ReadOptions,
        ) -> Result<crate::backend::ReadResult, crate::error::RecoveryError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            let result = self.inner.read(group_id, key, offset, size, opts).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            result
        }

        async fn write(
            &self,
            group_id: u32,
            key: &Key,
            op: crate::backend::WriteOp,
            opts: &crate::backend::WriteOptions,
        ) -> Result<(), crate::error::RecoveryError> {
            self.inner.write(group_id, key, op, opts).await
        }

        async fn remove(
            &self,
            group_id: u32,
            key: &Key,
            opts: &crate::backend::RemoveOptions,
        ) -> Result<crate::backend::RemoveOutcome, crate::error::RecoveryError> {
            self.inner.remove(group_id, key, opts).await
        }
    }

    #[tokio::test]
    async fn never_exceeds_the_configured_window() {
        const WINDOW: usize = 3;
        let inner = MemoryBackend::new(vec![]);

        let mut buf = Vec::new();
        let mut keys = Vec::new();
        for i in 0..12u8 {
            let key = Key::from_bytes([i; 64]);
            inner.seed(1, key, vec![i], Vec::new(), Timestamp { secs: 10, nanos: 0 }, 0);
            buf.extend(encode_record(&key, &[replica(1, 10, 1)]));
            keys.push(key);
        }

        let counting = Arc::new(CountingBackend { inner, in_flight: AtomicU64::new(0), peak: AtomicU64::new(0) });
        let backend: Arc<dyn StorageBackend> = counting.clone();

        let groups = [1, 2].into_iter().collect();
        let cursor = InputCursor::new(IoCursor::new(buf), groups);

        let params = Arc::new(RecoveryParams {
            max_attempts: 3,
            chunk_size: 1024,
            data_flow_rate: 1 << 20,
            prepare_timeout_watermark: Timestamp { secs: i64::MAX, nanos: 0 },
            verify_checksum: false,
            remove_corrupted: true,
            dry_run: false,
            read_only_groups: std::collections::BTreeSet::new(),
        });

        let (stats, agg) = {
            let (agg, handle) = StatsAggregator::spawn(std::env::temp_dir(), StatsMode::Json, 64, Duration::from_secs(3600));
            (handle, agg)
        };

        let need_exit = Arc::new(AtomicBool::new(false));
        let summary = run(cursor, backend, params, stats, need_exit, WINDOW).await;

        assert!(summary.success);
        assert_eq!(summary.processed_keys, keys.len() as u64);
        assert!(counting.peak.load(Ordering::SeqCst) as usize <= WINDOW, "peak in-flight exceeded the configured window");
        agg.join();
    }
}
