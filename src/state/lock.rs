use crate::error::{DrftError, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use crate::config::{DEFAULT_LOCK_MAX_RETRIES, DEFAULT_LOCK_RETRY_INTERVAL_MS};

/// Advisory single-file lock, sibling to the state file (§4.B/§6). Unlike
/// a single-shot acquire-or-fail, this retries on contention before giving
/// up, matching the literal contract in §4.B ("retries up to 10 times at
/// 100ms intervals") — `acquire` uses that literal default; `acquire_with`
/// takes the policy from a `DrftConfig` instead.
pub struct FileLock {
    lock_path: PathBuf,
}

impl FileLock {
    fn lock_path_for(state_path: &Path) -> PathBuf {
        let mut name = state_path.as_os_str().to_os_string();
        name.push(".lock");
        PathBuf::from(name)
    }

    /// Acquire the lock, retrying on contention with the spec's literal
    /// default policy (10 retries, 100ms). The lock file contains
    /// `pid: <number>` and `timestamp: <ISO-8601>` — presence alone
    /// denotes the lock; contents are informational (§6).
    pub fn acquire(state_path: &Path) -> Result<Self> {
        Self::acquire_with(
            state_path,
            DEFAULT_LOCK_MAX_RETRIES,
            Duration::from_millis(DEFAULT_LOCK_RETRY_INTERVAL_MS),
        )
    }

    /// Acquire the lock under a caller-supplied retry policy (see
    /// `DrftConfig::lock_max_retries`/`lock_retry_interval`).
    pub fn acquire_with(state_path: &Path, max_retries: u32, retry_interval: Duration) -> Result<Self> {
        let lock_path = Self::lock_path_for(state_path);
        if let Some(parent) = lock_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| DrftError::state_with("failed to create state directory", e.into()))?;
        }

        for attempt in 0..=max_retries {
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&lock_path)
            {
                Ok(mut f) => {
                    use std::io::Write;
                    let contents = format!(
                        "pid: {}\ntimestamp: {}\n",
                        std::process::id(),
                        chrono::Utc::now().to_rfc3339()
                    );
                    f.write_all(contents.as_bytes())
                        .map_err(|e| DrftError::state_with("failed to write lock file", e.into()))?;
                    return Ok(Self { lock_path });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if attempt == max_retries {
                        return Err(DrftError::state(format!(
                            "could not acquire lock at {} after {} retries",
                            lock_path.display(),
                            max_retries
                        )));
                    }
                    thread::sleep(retry_interval);
                }
                Err(e) => return Err(DrftError::state_with("failed to acquire lock", e.into())),
            }
        }
        unreachable!()
    }

    /// Remove the lock file, best-effort (§4.B: "unlock() removes the
    /// lock file best-effort").
    pub fn release(self) {
        let _ = fs::remove_file(&self.lock_path);
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.lock_path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn acquire_and_release_roundtrip() {
        let dir = tempdir().unwrap();
        let state_path = dir.path().join("state.json");
        let lock = FileLock::acquire(&state_path).unwrap();
        let lock_file = FileLock::lock_path_for(&state_path);
        assert!(lock_file.exists());
        lock.release();
        assert!(!lock_file.exists());
    }

    #[test]
    fn contended_lock_fails_after_retries() {
        let dir = tempdir().unwrap();
        let state_path = dir.path().join("state.json");
        let _held = FileLock::acquire(&state_path).unwrap();
        let err = FileLock::acquire(&state_path);
        assert!(err.is_err());
    }
}
