//! The storage client library is out of scope (spec.md §1) — routing,
//! RPC framing, and on-the-wire checksums belong to it. This module is
//! the trait boundary the recovery engine talks across, mirroring the
//! teacher's `backup::read_chunk::{ReadChunk, AsyncReadChunk}` split
//! between a sync and an async chunk-reading interface, generalized to
//! the read/write/remove trio spec.md §4.2 needs and collapsed (per
//! spec.md §9 design note 2) into one trait so a single `Arc<dyn
//! StorageBackend>` plays the role of the three teacher "sessions".

pub mod memory;

use async_trait::async_trait;

use crate::error::RecoveryError;
use crate::key::Key;

/// Bytes plus the first-chunk JSON side-payload (spec.md §4.2 READING).
#[derive(Debug, Clone, Default)]
pub struct ReadResult {
    pub data: Vec<u8>,
    /// Present only when the read included offset 0 (the first chunk).
    pub json: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Copy)]
pub struct ReadOptions {
    pub verify_checksum: bool,
    pub timeout: std::time::Duration,
}

/// A single non-chunked write, or one phase of a chunked write
/// (spec.md §4.2 WRITING).
#[derive(Debug, Clone)]
pub enum WriteOp {
    /// Single write carrying json + data, both capacities given.
    Plain {
        data: Vec<u8>,
        json: Vec<u8>,
        data_capacity: u64,
        json_capacity: u64,
    },
    /// Chunked, first chunk: declare capacities, reserve space, write
    /// the first bytes.
    Prepare {
        data: Vec<u8>,
        json: Vec<u8>,
        data_capacity: u64,
        json_capacity: u64,
    },
    /// Chunked, middle chunk: bytes at `data_offset`, no commit.
    WritePlain { data: Vec<u8>, data_offset: u64 },
    /// Chunked, last chunk: finalize the record.
    Commit { data: Vec<u8>, data_offset: u64, data_commit_size: u64 },
}

#[derive(Debug, Clone, Copy)]
pub struct WriteOptions {
    /// Compare-and-set gate: the target accepts the write only if its
    /// current copy is older-or-absent (spec.md §3 CAS safety).
    pub cas_timestamp: crate::replica::Timestamp,
    pub timeout: std::time::Duration,
    pub user_flags: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct RemoveOptions {
    pub cas_timestamp: crate::replica::Timestamp,
    pub timeout: std::time::Duration,
}

/// Outcome of a remove call. `NotFound`/`Forbidden` are accepted as
/// non-errors (spec.md §4.2 REMOVING_CORRUPTED, §9 open question: the
/// original treats `ENOENT`/`EBADFD` as acceptable because a replica
/// that is already gone, or whose backend refuses removal, needs no
/// further action from the recovery engine).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    Removed,
    NotFound,
    Forbidden,
}

/// One client handle standing in for "routing, RPC, checksum, iteration"
/// (spec.md §1 out-of-scope collaborator). The driver constructs the one
/// `Arc<dyn StorageBackend>` for a run; the scheduler clones it once per
/// key and hands that clone into `recover_key` (spec.md §9 design note 4).
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Read `[offset, offset+size)` from one replica group. Returns
    /// `RecoveryError::ChecksumError` if `opts.verify_checksum` is set
    /// and the stored data fails verification.
    async fn read(
        &self,
        group_id: u32,
        key: &Key,
        offset: u64,
        size: u64,
        opts: &ReadOptions,
    ) -> Result<ReadResult, RecoveryError>;

    async fn write(
        &self,
        group_id: u32,
        key: &Key,
        op: WriteOp,
        opts: &WriteOptions,
    ) -> Result<(), RecoveryError>;

    async fn remove(
        &self,
        group_id: u32,
        key: &Key,
        opts: &RemoveOptions,
    ) -> Result<RemoveOutcome, RecoveryError>;
}

/// Placeholder the CLI binary wires in until a real storage client
/// library is linked (spec.md §1 out-of-scope collaborator). Every call
/// fails fatally with a message pointing at this boundary, rather than
/// silently doing nothing.
pub struct UnimplementedBackend;

#[async_trait]
impl StorageBackend for UnimplementedBackend {
    async fn read(&self, _: u32, key: &Key, _: u64, _: u64, _: &ReadOptions) -> Result<ReadResult, RecoveryError> {
        Err(unlinked(*key))
    }

    async fn write(&self, _: u32, key: &Key, _: WriteOp, _: &WriteOptions) -> Result<(), RecoveryError> {
        Err(unlinked(*key))
    }

    async fn remove(&self, _: u32, key: &Key, _: &RemoveOptions) -> Result<RemoveOutcome, RecoveryError> {
        Err(unlinked(*key))
    }
}

fn unlinked(key: Key) -> RecoveryError {
    RecoveryError::Fatal {
        key,
        source: anyhow::anyhow!("no storage client backend linked; provide a StorageBackend implementation"),
    }
}
