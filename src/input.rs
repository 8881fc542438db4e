//! Input cursor (spec.md §4.5, wire format in §6).
//!
//! Records are length-prefixed and appended in key order. The cursor is
//! single-threaded; spec.md §5 requires callers to wrap it in a mutex if
//! shared — we return a plain, non-`Sync`-by-default type and let the
//! scheduler hold it behind a `tokio::sync::Mutex`, mirroring how the
//! teacher's `pull.rs` treats `downloaded_chunks` (an `Arc<Mutex<..>>`
//! guarding a single-writer structure shared across spawned futures).

use std::collections::BTreeSet;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use anyhow::{bail, Error};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::key::{Key, KEY_SIZE};
use crate::merge::{select_authoritative, MergeDecision};
use crate::replica::{Address, Flags, ReplicaInfo, Timestamp};

/// One item pulled from the input cursor: the key, its merge decision
/// against the configured group set, and whether it needs any work.
#[derive(Debug)]
pub struct InputItem {
    pub key: Key,
    pub replicas: Vec<ReplicaInfo>,
    pub decision: MergeDecision,
}

/// Streams `(key, replicas)` pairs from a pre-sorted merge file,
/// applying the §4.1 early-skip filter (spec.md §2 step 1).
pub struct InputCursor<R> {
    reader: R,
    all_groups: BTreeSet<u32>,
    timestamp_cutoff: Option<Timestamp>,
}

impl<R: AsyncRead + Unpin> InputCursor<R> {
    pub fn new(reader: R, all_groups: BTreeSet<u32>) -> Self {
        Self { reader, all_groups, timestamp_cutoff: None }
    }

    /// Skip any key whose authoritative replica is older than `cutoff`
    /// (spec.md §6 CLI surface, `timestamp cutoff` option).
    pub fn with_timestamp_cutoff(mut self, cutoff: Option<Timestamp>) -> Self {
        self.timestamp_cutoff = cutoff;
        self
    }

    /// Pull the next key that actually needs recovery, skipping any
    /// already-in-sync keys with zero I/O (spec.md §4.1 step 6, §8
    /// "Merge correctness") and any key older than the configured
    /// timestamp cutoff.
    pub async fn next(&mut self) -> Result<Option<InputItem>, Error> {
        loop {
            let record = match self.read_record().await? {
                Some(record) => record,
                None => return Ok(None),
            };

            if record.replicas.is_empty() {
                continue;
            }

            let decision = select_authoritative(&record.replicas, &self.all_groups);
            if decision.is_in_sync() {
                continue;
            }
            if let Some(cutoff) = self.timestamp_cutoff {
                if decision.authoritative.timestamp < cutoff {
                    continue;
                }
            }

            return Ok(Some(InputItem { key: record.key, replicas: record.replicas, decision }));
        }
    }

    async fn read_record(&mut self) -> Result<Option<RawRecord>, Error> {
        let mut len_buf = [0u8; 4];
        match self.reader.read_exact(&mut len_buf).await {
            Ok(_) => {}
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(err) => return Err(err.into()),
        }
        let record_len = u32::from_le_bytes(len_buf) as usize;

        let mut body = vec![0u8; record_len];
        self.reader.read_exact(&mut body).await?;

        Ok(Some(decode_record(&body)?))
    }
}

struct RawRecord {
    key: Key,
    replicas: Vec<ReplicaInfo>,
}

const FAMILY_V4: u8 = 4;
const FAMILY_V6: u8 = 6;
const REPLICA_ENCODED_LEN: usize = 1 + 16 + 2 + 4 + 8 + 4 + 8 + 8 + 4 + 8 + 8;

fn decode_record(body: &[u8]) -> Result<RawRecord, Error> {
    if body.len() < KEY_SIZE + 4 {
        bail!("truncated record: only {} bytes", body.len());
    }

    let mut key_bytes = [0u8; KEY_SIZE];
    key_bytes.copy_from_slice(&body[..KEY_SIZE]);
    let key = Key::from_bytes(key_bytes);

    let mut pos = KEY_SIZE;
    let count = u32::from_le_bytes(body[pos..pos + 4].try_into().unwrap()) as usize;
    pos += 4;

    let mut replicas = Vec::with_capacity(count);
    for _ in 0..count {
        if body.len() < pos + REPLICA_ENCODED_LEN {
            bail!("truncated replica entry in record for key {}", key);
        }
        let family = body[pos];
        pos += 1;
        let addr_bytes: [u8; 16] = body[pos..pos + 16].try_into().unwrap();
        pos += 16;
        let host = match family {
            FAMILY_V4 => IpAddr::V4(Ipv4Addr::new(addr_bytes[0], addr_bytes[1], addr_bytes[2], addr_bytes[3])),
            FAMILY_V6 => IpAddr::V6(Ipv6Addr::from(addr_bytes)),
            other => bail!("unknown address family {}", other),
        };
        let port = u16::from_le_bytes(body[pos..pos + 2].try_into().unwrap());
        pos += 2;
        let group_id = u32::from_le_bytes(body[pos..pos + 4].try_into().unwrap());
        pos += 4;
        let secs = i64::from_le_bytes(body[pos..pos + 8].try_into().unwrap());
        pos += 8;
        let nanos = u32::from_le_bytes(body[pos..pos + 4].try_into().unwrap());
        pos += 4;
        let size = u64::from_le_bytes(body[pos..pos + 8].try_into().unwrap());
        pos += 8;
        let user_flags = u64::from_le_bytes(body[pos..pos + 8].try_into().unwrap());
        pos += 8;
        let flags_bits = u32::from_le_bytes(body[pos..pos + 4].try_into().unwrap());
        pos += 4;
        let data_offset = u64::from_le_bytes(body[pos..pos + 8].try_into().unwrap());
        pos += 8;
        let blob_id = u64::from_le_bytes(body[pos..pos + 8].try_into().unwrap());
        pos += 8;

        replicas.push(ReplicaInfo {
            group_id,
            address: Address { host, port },
            timestamp: Timestamp { secs, nanos },
            size,
            user_flags,
            flags: Flags::from_bits_truncate(flags_bits),
            data_offset,
            blob_id,
        });
    }

    Ok(RawRecord { key, replicas })
}

/// Encode one record in the wire format above. Used by tests and by the
/// (out-of-scope) upstream merge phase's test fixtures.
pub fn encode_record(key: &Key, replicas: &[ReplicaInfo]) -> Vec<u8> {
    let mut body = Vec::with_capacity(KEY_SIZE + 4 + replicas.len() * REPLICA_ENCODED_LEN);
    body.extend_from_slice(key.as_bytes());
    body.extend_from_slice(&(replicas.len() as u32).to_le_bytes());

    for replica in replicas {
        let (family, addr_bytes): (u8, [u8; 16]) = match replica.address.host {
            IpAddr::V4(v4) => {
                let mut buf = [0u8; 16];
                buf[..4].copy_from_slice(&v4.octets());
                (FAMILY_V4, buf)
            }
            IpAddr::V6(v6) => (FAMILY_V6, v6.octets()),
        };
        body.push(family);
        body.extend_from_slice(&addr_bytes);
        body.extend_from_slice(&replica.address.port.to_le_bytes());
        body.extend_from_slice(&replica.group_id.to_le_bytes());
        body.extend_from_slice(&replica.timestamp.secs.to_le_bytes());
        body.extend_from_slice(&replica.timestamp.nanos.to_le_bytes());
        body.extend_from_slice(&replica.size.to_le_bytes());
        body.extend_from_slice(&replica.user_flags.to_le_bytes());
        body.extend_from_slice(&replica.flags.bits().to_le_bytes());
        body.extend_from_slice(&replica.data_offset.to_le_bytes());
        body.extend_from_slice(&replica.blob_id.to_le_bytes());
    }

    let mut out = Vec::with_capacity(4 + body.len());
    out.extend_from_slice(&(body.len() as u32).to_le_bytes());
    out.extend_from_slice(&body);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn replica(group_id: u32, secs: i64, size: u64) -> ReplicaInfo {
        ReplicaInfo {
            group_id,
            address: Address { host: IpAddr::V4(Ipv4Addr::LOCALHOST), port: 7000 },
            timestamp: Timestamp { secs, nanos: 0 },
            size,
            user_flags: 0,
            flags: Flags::empty(),
            data_offset: 0,
            blob_id: 0,
        }
    }

    #[tokio::test]
    async fn round_trips_a_record_and_tolerates_many_replicas() {
        let key = Key::from_bytes([7u8; KEY_SIZE]);
        let replicas = vec![replica(1, 100, 10), replica(2, 100, 10), replica(3, 90, 10)];
        let mut buf = Vec::new();
        buf.extend(encode_record(&key, &replicas));

        let mut cursor = InputCursor::new(Cursor::new(buf), [1, 2, 3].into_iter().collect());
        let item = cursor.next().await.unwrap().unwrap();
        assert_eq!(item.key, key);
        assert_eq!(item.decision.diff_groups, [3].into_iter().collect());
        assert!(cursor.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn in_sync_key_is_skipped_with_no_item_emitted() {
        let key = Key::from_bytes([1u8; KEY_SIZE]);
        let replicas = vec![replica(1, 100, 10), replica(2, 100, 10)];
        let buf = encode_record(&key, &replicas);

        let mut cursor = InputCursor::new(Cursor::new(buf), [1, 2].into_iter().collect());
        assert!(cursor.next().await.unwrap().is_none());
    }
}
