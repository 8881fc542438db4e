//! Error kinds for the recovery engine (spec.md §7).
//!
//! These are matched on by retry/backoff logic, so they are a closed
//! enum rather than opaque `anyhow::Error` strings. Driver-level code
//! that only needs to propagate and log still uses `anyhow::Error`
//! (`RecoveryError` converts into it via `#[from]` at call sites),
//! exactly as the teacher's `client/pull.rs` mixes a few typed errors
//! (`HttpError`) into an otherwise `anyhow`-based call chain.

use thiserror::Error;

use crate::key::Key;

/// The six error kinds from spec.md §7.
#[derive(Debug, Error)]
pub enum RecoveryError {
    /// Timeout or no-route to a backend. Retried with exponential backoff
    /// up to `max_attempts`, then the key is marked failed.
    #[error("timeout talking to group {group_id} for key {key}")]
    Timeout { key: Key, group_id: u32 },

    #[error("no route to group {group_id} for key {key}")]
    NoRoute { key: Key, group_id: u32 },

    /// A replica failed checksum verification (`EILSEQ`-equivalent).
    #[error("checksum error on group {group_id} for key {key}")]
    ChecksumError { key: Key, group_id: u32 },

    /// All `same_groups` replicas failed non-retriably, but more
    /// candidates exist in `key_infos`.
    #[error("all read targets for key {key} failed non-retriably, {remaining} candidate(s) left")]
    StaleReadTarget { key: Key, remaining: usize },

    /// Exception thrown inside a state machine callback.
    #[error("fatal error recovering key {key}: {source}")]
    Fatal {
        key: Key,
        #[source]
        source: anyhow::Error,
    },

    /// Invalid group list, missing remotes, unparseable option. The
    /// process must refuse to start; no I/O has happened yet.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// The scheduler's cursor advance raised.
    #[error("scheduler fault: {0}")]
    SchedulerFault(String),
}

impl RecoveryError {
    /// Whether this error kind is eligible for the doubled-timeout retry
    /// policy (spec.md §4.2 READING/WRITING, §7 "Transient I/O").
    pub fn is_transient(&self) -> bool {
        matches!(self, RecoveryError::Timeout { .. } | RecoveryError::NoRoute { .. })
    }

    pub fn is_checksum_error(&self) -> bool {
        matches!(self, RecoveryError::ChecksumError { .. })
    }
}
