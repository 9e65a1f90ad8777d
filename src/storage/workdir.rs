//! Scoped work directory for page fragments
//!
//! Fragments of one page live in their own directory, removed when the
//! page is done. Removal is retried with a fixed backoff.

use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::CleanupConfig;

/// Directory that is removed on drop unless it was created to be kept
#[derive(Debug)]
pub struct WorkDir {
    path: PathBuf,
    keep: bool,
    attempts: u32,
    backoff: Duration,
    removed: bool,
}

impl WorkDir {
    /// Create a fresh `scriptor-<uuid>` directory under `parent`
    pub fn create(parent: &Path, cleanup: &CleanupConfig) -> io::Result<Self> {
        let path = parent.join(format!("scriptor-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&path)?;
        debug!("Created work directory {:?}", path);

        Ok(Self {
            path,
            keep: false,
            attempts: cleanup.attempts.max(1),
            backoff: Duration::from_millis(cleanup.backoff_ms),
            removed: false,
        })
    }

    /// Use `path` as the work directory and leave it in place afterwards
    pub fn kept(path: &Path) -> io::Result<Self> {
        std::fs::create_dir_all(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            keep: true,
            attempts: 0,
            backoff: Duration::ZERO,
            removed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the directory now. Returns false if it is still there after
    /// all attempts; the failure is logged, not returned.
    pub fn close(mut self) -> bool {
        self.cleanup()
    }

    fn cleanup(&mut self) -> bool {
        if self.keep || self.removed {
            return true;
        }
        self.removed = true;
        remove_with_retry(&self.path, self.attempts, self.backoff)
    }
}

impl Drop for WorkDir {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// Remove `path` recursively, retrying up to `attempts` times with
/// `backoff` between attempts. A missing directory counts as removed.
pub fn remove_with_retry(path: &Path, attempts: u32, backoff: Duration) -> bool {
    let attempts = attempts.max(1);

    for attempt in 1..=attempts {
        match std::fs::remove_dir_all(path) {
            Ok(()) => {
                debug!("Removed work directory {:?}", path);
                return true;
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => return true,
            Err(e) if attempt < attempts => {
                debug!(
                    "Attempt {}/{} to remove {:?} failed: {}",
                    attempt, attempts, path, e
                );
                thread::sleep(backoff);
            }
            Err(e) => {
                warn!(
                    "Could not remove work directory {:?} after {} attempts: {}",
                    path, attempts, e
                );
            }
        }
    }

    false
}
