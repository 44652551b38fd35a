//! Process-wide exclusive lock for a provisioning run (§4.5.3).
//!
//! Grounded on `oci_core::snapshot::FileMutex`'s create-dir advisory lock
//! convention, adapted from "retry on contention" to "detect and reap a
//! stale lock left by a dead process, then retry once".

use std::path::{Path, PathBuf};

use crate::error::{OciError, Result};

/// Candidate base directories for the lock, tried in order, mirroring
/// `$XDG_RUNTIME_DIR` → `$HOME/.local/state` → `$HOME/.cache` → `/tmp`.
fn candidate_base_dirs() -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        if !runtime_dir.is_empty() {
            dirs.push(PathBuf::from(runtime_dir));
        }
    }
    if let Ok(home) = std::env::var("HOME") {
        dirs.push(PathBuf::from(&home).join(".local").join("state"));
        dirs.push(PathBuf::from(&home).join(".cache"));
    }
    dirs.push(PathBuf::from("/tmp"));
    dirs
}

/// Pick the first base directory that can be created (or already
/// exists), per the fallback chain in §4.5.3.
pub fn resolve_lock_base_dir() -> PathBuf {
    for dir in candidate_base_dirs() {
        let candidate = dir.join("oci-provision");
        if std::fs::create_dir_all(&candidate).is_ok() {
            return candidate;
        }
    }
    PathBuf::from("/tmp/oci-provision")
}

/// RAII guard over the process lock directory. Removes the lock
/// directory (and the PID file inside it) on drop, so the lock is
/// released on every exit path.
pub struct ProcessLock {
    lock_dir: PathBuf,
}

impl ProcessLock {
    /// Acquire the lock directory `<base_dir>/<script_name>.lock`. If the
    /// directory already exists, read the PID file inside it and test
    /// liveness (`kill(pid, 0)` semantics); if the holder is dead, remove
    /// the stale directory and retry once. Otherwise returns
    /// [`OciError::LockHeld`].
    pub fn acquire(base_dir: &Path, script_name: &str) -> Result<Self> {
        let lock_dir = base_dir.join(format!("{script_name}.lock"));

        match Self::try_create(&lock_dir) {
            Ok(()) => return Ok(Self { lock_dir }),
            Err(AcquireFailure::AlreadyExists) => {}
            Err(AcquireFailure::Io(e)) => return Err(OciError::Io(e)),
        }

        if let Some(pid) = read_pid(&lock_dir) {
            if is_process_alive(pid) {
                return Err(OciError::LockHeld(pid));
            }
        }

        // Stale lock: reap and retry once.
        let _ = std::fs::remove_dir_all(&lock_dir);
        match Self::try_create(&lock_dir) {
            Ok(()) => Ok(Self { lock_dir }),
            Err(AcquireFailure::AlreadyExists) => {
                let pid = read_pid(&lock_dir).unwrap_or(0);
                Err(OciError::LockHeld(pid))
            }
            Err(AcquireFailure::Io(e)) => Err(OciError::Io(e)),
        }
    }

    fn try_create(lock_dir: &Path) -> std::result::Result<(), AcquireFailure> {
        match std::fs::create_dir(lock_dir) {
            Ok(()) => {
                let pid = std::process::id();
                std::fs::write(lock_dir.join("pid"), pid.to_string())
                    .map_err(AcquireFailure::Io)?;
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Err(AcquireFailure::AlreadyExists),
            Err(e) => Err(AcquireFailure::Io(e)),
        }
    }
}

impl Drop for ProcessLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.lock_dir);
    }
}

enum AcquireFailure {
    AlreadyExists,
    Io(std::io::Error),
}

fn read_pid(lock_dir: &Path) -> Option<u32> {
    std::fs::read_to_string(lock_dir.join("pid")).ok()?.trim().parse().ok()
}

#[cfg(unix)]
fn is_process_alive(pid: u32) -> bool {
    // kill(pid, 0) succeeds iff the process exists and we have
    // permission to signal it.
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

#[cfg(not(unix))]
fn is_process_alive(_pid: u32) -> bool {
    // No portable liveness check off Unix; be conservative and assume
    // the lock holder is still alive so concurrent runs fail closed.
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_then_drop_releases_the_lock() {
        let dir = tempfile::tempdir().unwrap();
        {
            let _lock = ProcessLock::acquire(dir.path(), "instance-provision").unwrap();
            assert!(dir.path().join("instance-provision.lock").exists());
        }
        assert!(!dir.path().join("instance-provision.lock").exists());
    }

    #[test]
    fn second_acquire_while_first_alive_fails_with_lock_held() {
        let dir = tempfile::tempdir().unwrap();
        let _first = ProcessLock::acquire(dir.path(), "instance-provision").unwrap();
        let result = ProcessLock::acquire(dir.path(), "instance-provision");
        assert!(matches!(result, Err(OciError::LockHeld(pid)) if pid == std::process::id()));
    }

    #[test]
    fn stale_lock_from_dead_pid_is_reaped_and_retried() {
        let dir = tempfile::tempdir().unwrap();
        let lock_dir = dir.path().join("instance-provision.lock");
        std::fs::create_dir(&lock_dir).unwrap();
        // A PID essentially guaranteed not to be running.
        std::fs::write(lock_dir.join("pid"), "999999").unwrap();

        let lock = ProcessLock::acquire(dir.path(), "instance-provision");
        assert!(lock.is_ok(), "stale lock should be reaped and re-acquired");
    }

    #[test]
    fn resolve_lock_base_dir_returns_a_creatable_directory() {
        let dir = resolve_lock_base_dir();
        assert!(dir.exists() || std::fs::create_dir_all(&dir).is_ok());
    }
}
