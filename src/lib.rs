//! Cross-datacenter key recovery engine for a replicated, content-addressed
//! object store: given a pre-sorted merge file listing every known replica
//! of a set of keys, pick the authoritative copy of each and bring every
//! other replica group back in sync.

pub mod backend;
pub mod config;
pub mod context;
pub mod driver;
pub mod error;
pub mod input;
pub mod key;
pub mod lockfile;
pub mod merge;
pub mod replica;
pub mod scheduler;
pub mod state_machine;
pub mod stats;
