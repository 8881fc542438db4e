//! In-memory `StorageBackend` test double. Stands in for the "out of
//! scope" storage client library so the state machine, scheduler, and
//! stats pipeline can be exercised end-to-end without a real cluster,
//! in the spirit of the teacher's own preference for small, focused
//! structs over mocking frameworks.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::RecoveryError;
use crate::key::Key;
use crate::replica::Timestamp;

use super::{ReadOptions, ReadResult, RemoveOptions, RemoveOutcome, StorageBackend, WriteOp, WriteOptions};

#[derive(Debug, Clone, Default)]
struct StoredRecord {
    data: Vec<u8>,
    json: Vec<u8>,
    timestamp: Timestamp,
    user_flags: u64,
    data_capacity: u64,
    committed: bool,
}

/// Per-call failure injection, keyed by `(group_id, key)`. Each injected
/// failure is consumed once, so tests can model "fails twice then
/// succeeds" retry scenarios (spec.md §8 scenario 4).
#[derive(Default)]
struct Injection {
    read_failures: Vec<RecoveryError>,
    write_failures: Vec<RecoveryError>,
    remove_failures: Vec<RecoveryError>,
}

pub struct MemoryBackend {
    records: Mutex<HashMap<(u32, Key), StoredRecord>>,
    injections: Mutex<HashMap<(u32, Key), Injection>>,
    read_only_groups: Vec<u32>,
}

impl MemoryBackend {
    pub fn new(read_only_groups: Vec<u32>) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            injections: Mutex::new(HashMap::new()),
            read_only_groups,
        }
    }

    pub fn seed(&self, group_id: u32, key: Key, data: Vec<u8>, json: Vec<u8>, timestamp: Timestamp, user_flags: u64) {
        let mut records = self.records.lock().unwrap();
        records.insert(
            (group_id, key),
            StoredRecord { data_capacity: data.len() as u64, data, json, timestamp, user_flags, committed: true },
        );
    }

    pub fn inject_read_failure(&self, group_id: u32, key: Key, err: RecoveryError) {
        let mut injections = self.injections.lock().unwrap();
        injections.entry((group_id, key)).or_default().read_failures.push(err);
    }

    pub fn inject_write_failure(&self, group_id: u32, key: Key, err: RecoveryError) {
        let mut injections = self.injections.lock().unwrap();
        injections.entry((group_id, key)).or_default().write_failures.push(err);
    }

    pub fn inject_remove_failure(&self, group_id: u32, key: Key, err: RecoveryError) {
        let mut injections = self.injections.lock().unwrap();
        injections.entry((group_id, key)).or_default().remove_failures.push(err);
    }

    pub fn get(&self, group_id: u32, key: &Key) -> Option<(Vec<u8>, Vec<u8>, Timestamp, u64)> {
        let records = self.records.lock().unwrap();
        records
            .get(&(group_id, *key))
            .filter(|r| r.committed)
            .map(|r| (r.data.clone(), r.json.clone(), r.timestamp, r.user_flags))
    }

    fn take_read_failure(&self, group_id: u32, key: &Key) -> Option<RecoveryError> {
        let mut injections = self.injections.lock().unwrap();
        injections.get_mut(&(group_id, *key)).and_then(|i| {
            if i.read_failures.is_empty() { None } else { Some(i.read_failures.remove(0)) }
        })
    }

    fn take_write_failure(&self, group_id: u32, key: &Key) -> Option<RecoveryError> {
        let mut injections = self.injections.lock().unwrap();
        injections.get_mut(&(group_id, *key)).and_then(|i| {
            if i.write_failures.is_empty() { None } else { Some(i.write_failures.remove(0)) }
        })
    }

    fn take_remove_failure(&self, group_id: u32, key: &Key) -> Option<RecoveryError> {
        let mut injections = self.injections.lock().unwrap();
        injections.get_mut(&(group_id, *key)).and_then(|i| {
            if i.remove_failures.is_empty() { None } else { Some(i.remove_failures.remove(0)) }
        })
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn read(
        &self,
        group_id: u32,
        key: &Key,
        offset: u64,
        size: u64,
        _opts: &ReadOptions,
    ) -> Result<ReadResult, RecoveryError> {
        if let Some(err) = self.take_read_failure(group_id, key) {
            return Err(err);
        }

        let records = self.records.lock().unwrap();
        let record = records
            .get(&(group_id, *key))
            .filter(|r| r.committed)
            .ok_or(RecoveryError::NoRoute { key: *key, group_id })?;

        let start = offset as usize;
        let end = std::cmp::min(record.data.len(), start + size as usize);
        let data = if start < record.data.len() { record.data[start..end].to_vec() } else { Vec::new() };
        let json = if offset == 0 { Some(record.json.clone()) } else { None };

        Ok(ReadResult { data, json })
    }

    async fn write(
        &self,
        group_id: u32,
        key: &Key,
        op: WriteOp,
        opts: &WriteOptions,
    ) -> Result<(), RecoveryError> {
        if self.read_only_groups.contains(&group_id) {
            return Err(RecoveryError::Fatal {
                key: *key,
                source: anyhow::anyhow!("group {} is read-only", group_id),
            });
        }

        if let Some(err) = self.take_write_failure(group_id, key) {
            return Err(err);
        }

        let mut records = self.records.lock().unwrap();
        let current = records.get(&(group_id, *key));
        if let Some(current) = current {
            if current.committed && current.timestamp >= opts.cas_timestamp {
                // CAS safety (spec.md §3/§8): refuse, this is not a retry-as-success.
                return Err(RecoveryError::Fatal {
                    key: *key,
                    source: anyhow::anyhow!("cas_timestamp rejected: target not older"),
                });
            }
        }

        let entry = records.entry((group_id, *key)).or_default();
        match op {
            WriteOp::Plain { data, json, data_capacity, .. } => {
                entry.data = data;
                entry.json = json;
                entry.data_capacity = data_capacity;
                entry.timestamp = opts.cas_timestamp;
                entry.user_flags = opts.user_flags;
                entry.committed = true;
            }
            WriteOp::Prepare { data, json, data_capacity, .. } => {
                entry.data = vec![0u8; data_capacity as usize];
                entry.data[..data.len()].copy_from_slice(&data);
                entry.json = json;
                entry.data_capacity = data_capacity;
                entry.timestamp = opts.cas_timestamp;
                entry.user_flags = opts.user_flags;
                entry.committed = false;
            }
            WriteOp::WritePlain { data, data_offset } => {
                let offset = data_offset as usize;
                if entry.data.len() < offset + data.len() {
                    entry.data.resize(offset + data.len(), 0);
                }
                entry.data[offset..offset + data.len()].copy_from_slice(&data);
            }
            WriteOp::Commit { data, data_offset, data_commit_size } => {
                let offset = data_offset as usize;
                if entry.data.len() < offset + data.len() {
                    entry.data.resize(offset + data.len(), 0);
                }
                entry.data[offset..offset + data.len()].copy_from_slice(&data);
                entry.data.truncate(data_commit_size as usize);
                entry.committed = true;
            }
        }

        Ok(())
    }

    async fn remove(
        &self,
        group_id: u32,
        key: &Key,
        opts: &RemoveOptions,
    ) -> Result<RemoveOutcome, RecoveryError> {
        if self.read_only_groups.contains(&group_id) {
            return Ok(RemoveOutcome::Forbidden);
        }

        if let Some(err) = self.take_remove_failure(group_id, key) {
            return Err(err);
        }

        let mut records = self.records.lock().unwrap();
        match records.get(&(group_id, *key)) {
            None => Ok(RemoveOutcome::NotFound),
            Some(record) if record.timestamp >= opts.cas_timestamp => {
                // Newer than the watermark: not removed, but not an error.
                Ok(RemoveOutcome::Forbidden)
            }
            Some(_) => {
                records.remove(&(group_id, *key));
                Ok(RemoveOutcome::Removed)
            }
        }
    }
}
