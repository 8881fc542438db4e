//! Statistics aggregator (spec.md §4.4): many producers push tagged
//! events into a bounded MPSC queue, a single consumer thread folds them
//! into a tree and periodically dumps it to disk atomically.

pub mod event;
pub mod handle;
pub mod server;
pub mod tree;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{Context, Error};
use crossbeam_channel::{bounded, select};

pub use event::StatsEvent;
pub use handle::StatsHandle;
pub use tree::StatsTree;

/// Output mode (spec.md §6: plain text vs. structured/JSON).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatsMode {
    Plain,
    Json,
}

impl StatsMode {
    fn file_name(self) -> &'static str {
        match self {
            StatsMode::Plain => "stats.txt",
            StatsMode::Json => "stats.json",
        }
    }
}

/// Handle to the running aggregator; owns the consumer thread.
pub struct StatsAggregator {
    overflowed: Arc<AtomicBool>,
    thread: Option<JoinHandle<StatsTree>>,
    stop_sender: crossbeam_channel::Sender<()>,
}

impl StatsAggregator {
    /// Spawn the consumer thread and return it plus the root producer
    /// handle. `queue_depth` bounds the MPSC queue (spec.md §4.4:
    /// "non-blocking enqueue; on overflow the call fails loudly").
    pub fn spawn(
        temp_dir: PathBuf,
        mode: StatsMode,
        queue_depth: usize,
        update_interval: Duration,
    ) -> (Self, StatsHandle) {
        let (sender, receiver) = bounded(queue_depth);
        let overflowed = Arc::new(AtomicBool::new(false));
        let handle = StatsHandle::new(sender, overflowed.clone());

        let (stop_sender, stop_receiver) = bounded::<()>(1);

        let thread = std::thread::Builder::new()
            .name("stats-consumer".into())
            .spawn(move || {
                let mut tree = StatsTree::new();
                let ticker = crossbeam_channel::tick(update_interval);
                loop {
                    select! {
                        recv(receiver) -> msg => match msg {
                            Ok(event) => tree.apply(event),
                            Err(_) => break, // all producers gone
                        },
                        recv(ticker) -> _ => {
                            if let Err(err) = dump(&temp_dir, mode, &tree) {
                                log::error!("failed to write stats file: {}", err);
                            }
                        },
                        recv(stop_receiver) -> _ => break,
                    }
                }
                // drain anything queued before the final dump
                while let Ok(event) = receiver.try_recv() {
                    tree.apply(event);
                }
                if let Err(err) = dump(&temp_dir, mode, &tree) {
                    log::error!("failed to write final stats file: {}", err);
                }
                tree
            })
            .expect("failed to spawn stats consumer thread");

        (Self { overflowed, thread: Some(thread), stop_sender }, handle)
    }

    pub fn overflowed(&self) -> bool {
        self.overflowed.load(Ordering::SeqCst)
    }

    /// Stop the consumer thread and return the final tree (used by tests
    /// and by the driver's end-of-run summary).
    pub fn join(mut self) -> StatsTree {
        let _ = self.stop_sender.send(());
        self.thread.take().map(|t| t.join().ok()).flatten().unwrap_or_default()
    }
}

/// Atomically update the stats file: write `<file>.tmp`, then rename
/// over `<file>` (spec.md §4.4/§6). Readers may observe the old or new
/// full file, never a partial one.
fn dump(temp_dir: &Path, mode: StatsMode, tree: &StatsTree) -> Result<(), Error> {
    let contents = match mode {
        StatsMode::Plain => tree.to_plain_string(),
        StatsMode::Json => tree.to_json_string(),
    };

    let file_name = mode.file_name();
    let final_path = temp_dir.join(file_name);
    let tmp_path = temp_dir.join(format!("{}.tmp", file_name));

    std::fs::write(&tmp_path, contents.as_bytes())
        .with_context(|| format!("writing {:?}", tmp_path))?;
    std::fs::rename(&tmp_path, &final_path)
        .with_context(|| format!("renaming {:?} to {:?}", tmp_path, final_path))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dump_then_read_round_trips() {
        let dir = tempdir();
        let mut tree = StatsTree::new();
        tree.apply(StatsEvent::Counter {
            path: vec!["recovery".into()],
            name: "recovered_keys".into(),
            delta: 1,
        });
        dump(&dir, StatsMode::Json, &tree).unwrap();
        let contents = std::fs::read_to_string(dir.join("stats.json")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&contents).unwrap();
        assert_eq!(value["children"]["recovery"]["counters"]["recovered_keys"]["success"], 1);
    }

    fn tempdir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("dc-recovery-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }
}
