//! Replica metadata (spec.md §3).

use std::cmp::Ordering;
use std::net::IpAddr;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Record attribute bits (spec.md §3 "flags").
    #[derive(Serialize, Deserialize)]
    pub struct Flags: u32 {
        /// Checksums are computed per chunk, not per whole record; only
        /// set for chunked writes whose chunks were individually sealed.
        const CHUNKED_CHECKSUM = 0b0000_0001;
        /// Set locally once a corrupted-replica removal has completed,
        /// so a re-check against the in-memory test backend can observe
        /// it without a separate side channel.
        const REMOVED = 0b0000_0010;
    }
}

/// Family-qualified node address a replica currently lives on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub host: IpAddr,
    pub port: u16,
}

/// Last-modified time of a replica's data payload, `(seconds, nanos)`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timestamp {
    pub secs: i64,
    pub nanos: u32,
}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.secs, self.nanos).cmp(&(other.secs, other.nanos))
    }
}

/// One known copy of a key (spec.md §3).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaInfo {
    pub group_id: u32,
    pub address: Address,
    pub timestamp: Timestamp,
    pub size: u64,
    pub user_flags: u64,
    pub flags: Flags,
    /// Physical location hints; informational only, never used for
    /// comparison or routing decisions.
    pub data_offset: u64,
    pub blob_id: u64,
}

impl ReplicaInfo {
    /// The `(timestamp, size, user_flags)` tuple used by the merge rule
    /// (spec.md §4.1) to decide whether a replica matches the
    /// authoritative one.
    pub fn authoritative_tuple(&self) -> (Timestamp, u64, u64) {
        (self.timestamp, self.size, self.user_flags)
    }

    /// `(timestamp, size)` sort key used to pick the authoritative
    /// replica and to order candidates within a group (descending).
    pub fn sort_key(&self) -> (Timestamp, u64) {
        (self.timestamp, self.size)
    }
}
