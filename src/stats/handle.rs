//! Producer-side stats proxy (spec.md §4.4 "Producer side").

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use crossbeam_channel::Sender;
use log::error;

use super::event::{PathSegments, StatsEvent};

/// Lightweight proxy carrying a path prefix and a reference to the
/// bounded queue. Cloning is cheap (an `Arc` clone plus a small `Vec`
/// clone for the prefix), matching the teacher's pattern of handing out
/// cheap `Clone` handles to shared infrastructure (e.g.
/// `RemoteChunkReader` in `client/pull.rs`).
#[derive(Clone)]
pub struct StatsHandle {
    prefix: PathSegments,
    sender: Sender<StatsEvent>,
    overflowed: Arc<AtomicBool>,
}

impl StatsHandle {
    pub(super) fn new(sender: Sender<StatsEvent>, overflowed: Arc<AtomicBool>) -> Self {
        Self { prefix: Vec::new(), sender, overflowed }
    }

    /// Indexing by a name yields a child proxy whose prefix is
    /// `parent_prefix + separator + name` (spec.md §4.4); the separator
    /// itself only matters at serialization time (§6), so the prefix is
    /// kept as a `Vec<String>` here.
    pub fn child(&self, name: &str) -> StatsHandle {
        let mut prefix = self.prefix.clone();
        prefix.push(name.to_string());
        StatsHandle { prefix, sender: self.sender.clone(), overflowed: self.overflowed.clone() }
    }

    fn emit(&self, event: StatsEvent) {
        if self.sender.try_send(event).is_err() {
            // Non-blocking enqueue failed: this is a bug, not a dropped
            // statistic (spec.md §4.4) - it is loud, not silent.
            error!("stats queue overflow - a counter or timer update was lost");
            self.overflowed.store(true, Ordering::SeqCst);
        }
    }

    pub fn counter(&self, name: &str, delta: i64) {
        self.emit(StatsEvent::Counter { path: self.prefix.clone(), name: name.to_string(), delta });
    }

    pub fn set_counter(&self, name: &str, value: i64) {
        self.emit(StatsEvent::SetCounter { path: self.prefix.clone(), name: name.to_string(), value });
    }

    pub fn timer(&self, name: &str, milestone: &str) {
        self.emit(StatsEvent::Timer {
            path: self.prefix.clone(),
            name: name.to_string(),
            milestone: milestone.to_string(),
            at: SystemTime::now(),
        });
    }

    pub fn attribute(&self, name: &str, value: &str) {
        self.emit(StatsEvent::Attribute { path: self.prefix.clone(), name: name.to_string(), value: value.to_string() });
    }
}
