//! Advisory run lock and corrupted-keys log (spec.md §6), grounded on the
//! teacher's `tools::lock_file` (flock retry loop) and `file_set_contents`
//! (mkstemp-then-rename atomic write).

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Error};
use nix::fcntl::{flock, FlockArg};
use nix::unistd;

use crate::key::Key;

/// Exclusive advisory lock preventing two recovery runs from racing on
/// the same dump/corrupted-keys files. Held for the process lifetime;
/// released implicitly on drop (the `File` closes, `flock` releases).
pub struct RunLock {
    _file: File,
}

impl RunLock {
    pub fn acquire(path: &Path, timeout: Duration) -> Result<Self, Error> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("opening lock file {:?}", path))?;

        let fd = file.as_raw_fd();
        let start = Instant::now();
        let mut printed = false;

        loop {
            match flock(fd, FlockArg::LockExclusiveNonblock) {
                Ok(()) => break,
                Err(_) => {
                    if !printed {
                        printed = true;
                        log::info!("waiting to acquire lock {:?}...", path);
                    }
                }
            }

            if start.elapsed() >= timeout {
                bail!("unable to acquire lock {:?} - timed out after {:?}", path, timeout);
            }
            std::thread::sleep(Duration::from_millis(100));
        }

        Ok(Self { _file: file })
    }
}

/// Append-only JSON-lines log of keys that had at least one corrupted
/// replica (spec.md §6). Each append is its own atomic write: the whole
/// file is read, the new line appended, and the result rewritten via
/// mkstemp-then-rename, matching the teacher's `file_set_contents`
/// discipline but in append mode since this is a running log rather than
/// a point-in-time snapshot.
pub struct CorruptedKeysLog {
    path: PathBuf,
}

#[derive(serde::Serialize)]
struct CorruptedKeyEntry<'a> {
    key: &'a Key,
    groups: &'a [u32],
}

impl CorruptedKeysLog {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn append(&self, key: &Key, groups: &[u32]) -> Result<(), Error> {
        let entry = CorruptedKeyEntry { key, groups };
        let mut line = serde_json::to_string(&entry).context("serializing corrupted-key entry")?;
        line.push('\n');

        let mut existing = std::fs::read(&self.path).unwrap_or_default();
        existing.extend_from_slice(line.as_bytes());

        atomic_write(&self.path, &existing)
    }
}

fn atomic_write(path: &Path, data: &[u8]) -> Result<(), Error> {
    let mut template = path.to_owned();
    template.set_extension("tmp_XXXXXX");
    let (fd, tmp_path) = unistd::mkstemp(&template).with_context(|| format!("mkstemp {:?}", template))?;

    let result = (|| -> Result<(), Error> {
        use std::os::unix::io::FromRawFd;
        let mut file = unsafe { File::from_raw_fd(fd) };
        file.write_all(data)?;
        std::fs::rename(&tmp_path, path)?;
        Ok(())
    })();

    if result.is_err() {
        let _ = unistd::unlink(tmp_path.as_path());
    }
    result
}
