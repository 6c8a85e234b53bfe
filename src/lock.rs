//! Exclusive lockfile guarding state-file commits.
//!
//! The lock is a sibling file created with `create_new` (`O_CREAT | O_EXCL`)
//! holding the owner's PID. A lock left behind by a dead process is
//! reclaimed. Dropping the [`StateLock`] removes the file.

use anyhow::{Context, Result};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

/// How long to keep trying before giving up on a held lock.
#[derive(Debug, Clone, Copy)]
pub struct LockOptions {
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        // ~5s total, commits are short
        Self {
            max_retries: 50,
            retry_delay: Duration::from_millis(100),
        }
    }
}

/// Held lock; released on drop.
#[derive(Debug)]
pub struct StateLock {
    path: PathBuf,
}

impl StateLock {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "failed to release state lock");
        }
    }
}

/// Lock path used for a given state file: `state.json` → `state.json.lock`.
pub fn lock_path_for(state_path: &Path) -> PathBuf {
    let mut name = state_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "state".into());
    name.push(".lock");
    state_path.with_file_name(name)
}

/// Acquire the lock at `lock_path`, waiting for a live holder and reclaiming
/// a stale one.
pub fn acquire(lock_path: &Path, options: LockOptions) -> Result<StateLock> {
    if let Some(parent) = lock_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create lock directory: {}", parent.display()))?;
        }
    }

    for attempt in 0..=options.max_retries {
        match try_create(lock_path) {
            Ok(lock) => return Ok(lock),
            Err(_) if attempt < options.max_retries => {
                if let Some(dead) = stale_pid(lock_path) {
                    // Only remove if nobody replaced it in the meantime.
                    if read_pid(lock_path) == Some(dead) {
                        debug!(pid = dead, path = %lock_path.display(), "reclaiming stale state lock");
                        let _ = fs::remove_file(lock_path);
                    }
                    continue;
                }
                thread::sleep(options.retry_delay);
            }
            Err(e) => {
                return Err(e).with_context(|| {
                    format!(
                        "State lock {} still held after {} attempts",
                        lock_path.display(),
                        options.max_retries + 1
                    )
                });
            }
        }
    }

    anyhow::bail!("State lock {} could not be acquired", lock_path.display())
}

fn try_create(lock_path: &Path) -> Result<StateLock> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(lock_path)
        .with_context(|| format!("Lock file already exists: {}", lock_path.display()))?;

    writeln!(file, "{}", std::process::id())
        .with_context(|| format!("Failed to write PID to lock file: {}", lock_path.display()))?;

    Ok(StateLock {
        path: lock_path.to_path_buf(),
    })
}

fn read_pid(lock_path: &Path) -> Option<u32> {
    fs::read_to_string(lock_path).ok()?.trim().parse().ok()
}

fn stale_pid(lock_path: &Path) -> Option<u32> {
    let pid = read_pid(lock_path)?;
    (!process_alive(pid)).then_some(pid)
}

#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    // Signal 0 probes for existence without delivering anything.
    unsafe { libc::kill(pid as i32, 0) == 0 }
}

#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_stale(lock_path: &Path) -> bool {
        stale_pid(lock_path).is_some()
    }

    fn quick() -> LockOptions {
        LockOptions {
            max_retries: 0,
            retry_delay: Duration::from_millis(10),
        }
    }

    #[test]
    fn test_lock_path_for_state_file() {
        let path = lock_path_for(Path::new("/data/state.json"));
        assert_eq!(path, PathBuf::from("/data/state.json.lock"));
    }

    #[test]
    fn test_acquire_writes_pid_and_releases() {
        let tmp = tempfile::tempdir().unwrap();
        let lock_path = tmp.path().join("state.json.lock");

        {
            let lock = acquire(&lock_path, quick()).unwrap();
            assert_eq!(lock.path(), lock_path);
            let pid: u32 = fs::read_to_string(&lock_path).unwrap().trim().parse().unwrap();
            assert_eq!(pid, std::process::id());
        }

        assert!(!lock_path.exists());
    }

    #[test]
    fn test_second_acquire_fails_while_held() {
        let tmp = tempfile::tempdir().unwrap();
        let lock_path = tmp.path().join("state.json.lock");

        let _held = acquire(&lock_path, quick()).unwrap();
        assert!(acquire(&lock_path, quick()).is_err());
    }

    #[test]
    fn test_stale_lock_is_reclaimed() {
        let tmp = tempfile::tempdir().unwrap();
        let lock_path = tmp.path().join("state.json.lock");
        fs::write(&lock_path, "999999999\n").unwrap();
        assert!(is_stale(&lock_path));

        let options = LockOptions {
            max_retries: 1,
            retry_delay: Duration::from_millis(10),
        };
        let lock = acquire(&lock_path, options).unwrap();
        assert!(lock_path.exists());
        assert!(!is_stale(&lock_path));
        drop(lock);
    }
}
