//! Orchestrator (spec.md §2 pipeline, §5 signal handling): wires the
//! config, lock file, storage backend, stats aggregator, and scheduler
//! together and runs one recovery pass to completion.
//!
//! Grounded on the teacher's daemons installing signal handling only at
//! the top level and never inside worker callbacks (spec.md §5 "Workers
//! in the helper pool must ignore interactive interrupts").

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Error};
use log::info;
use tokio::io::AsyncRead;

use crate::backend::StorageBackend;
use crate::config::RecoveryConfig;
use crate::input::InputCursor;
use crate::lockfile::{CorruptedKeysLog, RunLock};
use crate::scheduler::{self, SchedulerSummary};
use crate::state_machine::RecoveryParams;
use crate::stats::StatsAggregator;

pub struct RunResult {
    pub success: bool,
    pub summary: SchedulerSummary,
}

/// Run one full recovery pass. `input` is the already-opened,
/// length-prefixed merge-file stream (spec.md §4.5); `backend` is the
/// storage client handle the driver owns as the sole strong reference
/// (spec.md §3 invariant, §9 design note 4).
pub async fn run<R>(config: &RecoveryConfig, backend: Arc<dyn StorageBackend>, input: R) -> Result<RunResult, Error>
where
    R: AsyncRead + Unpin + Send,
{
    config.validate().context("invalid configuration")?;

    let _lock = RunLock::acquire(&config.lock_file, config.lock_timeout)
        .with_context(|| format!("acquiring lock {:?}", config.lock_file))?;

    let (aggregator, root_stats) = StatsAggregator::spawn(
        config.temp_dir.clone(),
        config.stats_mode,
        config.stats_queue_depth,
        config.stats_update_interval,
    );

    let http_server = config.monitor_port.map(|port| {
        let temp_dir = config.temp_dir.clone();
        let file_name = match config.stats_mode {
            crate::stats::StatsMode::Plain => "stats.txt",
            crate::stats::StatsMode::Json => "stats.json",
        };
        tokio::spawn(async move {
            if let Err(err) = crate::stats::server::serve(port, temp_dir, file_name).await {
                log::error!("stats HTTP server exited: {}", err);
            }
        })
    });

    let need_exit = Arc::new(AtomicBool::new(false));
    tokio::spawn(install_ctrl_c_handler(need_exit.clone()));

    let cursor = InputCursor::new(input, config.groups.clone()).with_timestamp_cutoff(config.timestamp_cutoff);
    let params = Arc::new(RecoveryParams {
        max_attempts: config.max_attempts,
        chunk_size: config.chunk_size,
        data_flow_rate: config.data_flow_rate,
        prepare_timeout_watermark: config.prepare_timeout_watermark,
        verify_checksum: config.verify_checksum,
        remove_corrupted: config.remove_corrupted,
        dry_run: config.dry_run,
        read_only_groups: config.read_only_groups.clone(),
    });

    let summary = scheduler::run(cursor, backend, params, root_stats.clone(), need_exit, config.window).await;

    if let Some(handle) = http_server {
        handle.abort();
    }

    if !summary.corrupted.is_empty() {
        let log_path = config.temp_dir.join("corrupted-keys.jsonl");
        let corrupted_log = CorruptedKeysLog::new(log_path);
        for (key, groups) in &summary.corrupted {
            corrupted_log.append(key, groups).context("writing corrupted-keys log")?;
        }
    }

    info!(
        "recovery pass finished: {} keys processed, success={}, {:.2} keys/s",
        summary.processed_keys, summary.success, summary.throughput_keys_per_sec
    );

    let overflowed = aggregator.overflowed();
    aggregator.join();

    Ok(RunResult { success: summary.success && !overflowed, summary })
}

async fn install_ctrl_c_handler(need_exit: Arc<AtomicBool>) {
    if tokio::signal::ctrl_c().await.is_ok() {
        log::warn!("interrupt received, draining in-flight keys before exit");
        need_exit.store(true, Ordering::SeqCst);
    }
}
