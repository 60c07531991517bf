//! Advisory role locks.
//!
//! One PID-bearing lock file per role guarantees at most one live instance of
//! that role. Locks are advisory `flock`-style locks, so a crashed owner
//! releases its lock automatically; the PID recorded in the file is used to
//! report who holds a contended lock and to garbage-collect files left behind
//! by dead owners.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;

/// A held role lock. Dropping it releases the lock and unlinks the file.
#[derive(Debug)]
pub struct RoleLock {
    file: File,
    path: PathBuf,
}

impl RoleLock {
    /// Acquire the lock at `path`, writing this process's PID into it.
    ///
    /// # Errors
    ///
    /// [`LockError::Held`] when a live process owns the lock; this is fatal
    /// for the entering instance. I/O failures are reported as
    /// [`LockError::Io`].
    pub fn acquire(path: impl Into<PathBuf>) -> Result<Self, LockError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| LockError::Io {
                path: path.clone(),
                source,
            })?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|source| LockError::Io {
                path: path.clone(),
                source,
            })?;

        if file.try_lock_exclusive().is_err() {
            let holder = read_pid(&mut file);
            return Err(LockError::Held {
                path,
                pid: holder,
            });
        }

        // The flock is ours. Any PID already recorded belongs to a dead
        // owner (a live one would still hold the flock), so overwrite it.
        if let Some(stale) = read_pid(&mut file) {
            if stale != std::process::id() && !pid_alive(stale) {
                tracing::info!(path = %path.display(), stale_pid = stale, "reclaimed stale role lock");
            }
        }

        file.set_len(0).map_err(|source| LockError::Io {
            path: path.clone(),
            source,
        })?;
        file.seek(SeekFrom::Start(0)).map_err(|source| LockError::Io {
            path: path.clone(),
            source,
        })?;
        writeln!(file, "{}", std::process::id()).map_err(|source| LockError::Io {
            path: path.clone(),
            source,
        })?;
        writeln!(file, "{}", chrono::Utc::now().to_rfc3339()).map_err(|source| LockError::Io {
            path: path.clone(),
            source,
        })?;
        file.flush().map_err(|source| LockError::Io {
            path: path.clone(),
            source,
        })?;

        Ok(Self { file, path })
    }

    /// The lock file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release the lock and remove the file.
    pub fn release(self) {
        // Drop does the work; this name exists for call sites where the
        // release is the point.
        drop(self);
    }
}

impl Drop for RoleLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
        if let Err(err) = std::fs::remove_file(&self.path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %self.path.display(), %err, "failed to unlink lock file");
            }
        }
    }
}

/// Read the PID recorded in a lock file at `path`, if any.
///
/// Used by peers that need to signal a role owner without taking the lock.
#[must_use]
pub fn read_lock_holder(path: &Path) -> Option<u32> {
    let mut file = File::open(path).ok()?;
    read_pid(&mut file)
}

/// Whether a recorded lock holder is still alive.
#[must_use]
pub fn pid_alive(pid: u32) -> bool {
    let Ok(pid) = i32::try_from(pid) else {
        return false;
    };
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), None).is_ok()
}

fn read_pid(file: &mut File) -> Option<u32> {
    let mut contents = String::new();
    file.seek(SeekFrom::Start(0)).ok()?;
    file.read_to_string(&mut contents).ok()?;
    contents.lines().next()?.trim().parse().ok()
}

/// Lock errors.
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    /// Another live instance holds the lock.
    #[error("role lock {} is held{}", .path.display(), .pid.map(|p| format!(" by pid {p}")).unwrap_or_default())]
    Held {
        /// Lock file path.
        path: PathBuf,
        /// Recorded holder, when readable.
        pid: Option<u32>,
    },

    /// Filesystem failure.
    #[error("role lock {}: {source}", .path.display())]
    Io {
        /// Lock file path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_records_our_pid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".resolver.lock");

        let lock = RoleLock::acquire(&path).unwrap();
        assert_eq!(read_lock_holder(&path), Some(std::process::id()));
        drop(lock);

        // Released locks leave no file behind.
        assert!(!path.exists());
    }

    #[test]
    fn second_acquire_fails_while_held() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".led-service.lock");

        let _held = RoleLock::acquire(&path).unwrap();
        match RoleLock::acquire(&path) {
            Err(LockError::Held { pid, .. }) => {
                assert_eq!(pid, Some(std::process::id()));
            }
            other => panic!("expected Held, got {other:?}"),
        }
    }

    #[test]
    fn stale_lock_files_are_reclaimed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".updater.lock");

        // A lock file from a dead process: nobody holds the flock.
        std::fs::write(&path, "999999999\n2024-01-01T00:00:00Z\n").unwrap();

        let lock = RoleLock::acquire(&path).unwrap();
        assert_eq!(read_lock_holder(&path), Some(std::process::id()));
        drop(lock);
    }

    #[test]
    fn our_own_pid_is_alive() {
        assert!(pid_alive(std::process::id()));
        assert!(!pid_alive(999_999_999));
    }
}
