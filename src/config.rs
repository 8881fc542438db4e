//! `RecoveryConfig` (spec.md §6): the options a recovery run needs,
//! assembled by the CLI binary and validated before any I/O starts
//! (spec.md §7 "Configuration / precondition").

use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::RecoveryError;
use crate::replica::Timestamp;
use crate::stats::StatsMode;

#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    /// Storage routing endpoints (out of scope per spec.md §1; carried
    /// here only as opaque connect strings for the backend to parse).
    pub remotes: Vec<SocketAddr>,
    pub groups: BTreeSet<u32>,
    pub read_only_groups: BTreeSet<u32>,

    pub window: usize,
    pub net_threads: usize,
    pub io_threads: usize,

    pub max_attempts: u32,
    pub chunk_size: u64,
    /// Expected transfer rate (bytes/sec) each I/O's timeout is derived
    /// from, with a 60s floor (spec.md §5).
    pub data_flow_rate: u64,
    /// Only replicas with a timestamp older than this watermark are
    /// removed by REMOVING_CORRUPTED (spec.md §4.2, §8 scenario 5).
    pub prepare_timeout_watermark: Timestamp,
    /// Skip merge-file records whose authoritative timestamp is older
    /// than this cutoff (spec.md §6 CLI surface).
    pub timestamp_cutoff: Option<Timestamp>,

    pub dump_file: PathBuf,
    pub temp_dir: PathBuf,
    pub lock_file: PathBuf,
    pub lock_timeout: Duration,

    pub stats_mode: StatsMode,
    pub stats_queue_depth: usize,
    pub stats_update_interval: Duration,
    pub monitor_port: Option<u16>,

    pub verify_checksum: bool,
    pub remove_corrupted: bool,
    pub dry_run: bool,
    pub user_flags_filter: Option<u64>,
    pub trace_id: Option<String>,
}

impl RecoveryConfig {
    /// Refuse to start on an invalid configuration (spec.md §7): no I/O,
    /// no lock file, no thread spawned yet.
    pub fn validate(&self) -> Result<(), RecoveryError> {
        if self.remotes.is_empty() {
            return Err(RecoveryError::Configuration("no remotes given".into()));
        }
        if self.groups.is_empty() {
            return Err(RecoveryError::Configuration("no groups given".into()));
        }
        if !self.read_only_groups.is_subset(&self.groups) {
            return Err(RecoveryError::Configuration(
                "read-only groups must be a subset of the configured group list".into(),
            ));
        }
        if self.window == 0 {
            return Err(RecoveryError::Configuration("window width must be >= 1".into()));
        }
        if self.max_attempts == 0 {
            return Err(RecoveryError::Configuration("max_attempts must be >= 1".into()));
        }
        if self.chunk_size == 0 {
            return Err(RecoveryError::Configuration("chunk_size must be >= 1".into()));
        }
        if self.data_flow_rate == 0 {
            return Err(RecoveryError::Configuration("data_flow_rate must be >= 1".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> RecoveryConfig {
        RecoveryConfig {
            remotes: vec!["127.0.0.1:1025".parse().unwrap()],
            groups: [1, 2].into_iter().collect(),
            read_only_groups: BTreeSet::new(),
            window: 16,
            net_threads: 4,
            io_threads: 24,
            max_attempts: 5,
            chunk_size: 1 << 20,
            data_flow_rate: 1 << 20,
            prepare_timeout_watermark: Timestamp { secs: i64::MAX, nanos: 0 },
            timestamp_cutoff: None,
            dump_file: PathBuf::from("/tmp/dc-recovery-dump"),
            temp_dir: PathBuf::from("/tmp"),
            lock_file: PathBuf::from("/tmp/dc-recovery.lock"),
            lock_timeout: Duration::from_secs(60),
            stats_mode: StatsMode::Json,
            stats_queue_depth: 4096,
            stats_update_interval: Duration::from_secs(1),
            monitor_port: None,
            verify_checksum: true,
            remove_corrupted: true,
            dry_run: false,
            user_flags_filter: None,
            trace_id: None,
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(base().validate().is_ok());
    }

    #[test]
    fn read_only_group_outside_group_list_is_rejected() {
        let mut cfg = base();
        cfg.read_only_groups = [3].into_iter().collect();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn empty_remotes_is_rejected() {
        let mut cfg = base();
        cfg.remotes.clear();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn zero_window_is_rejected() {
        let mut cfg = base();
        cfg.window = 0;
        assert!(cfg.validate().is_err());
    }
}
