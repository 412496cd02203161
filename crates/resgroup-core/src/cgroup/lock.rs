//! Advisory locks on group directories

use nix::errno::Errno;
use nix::fcntl::{flock, FlockArg};
use std::fs::File;
use std::io;
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::error::{CgroupError, Result};

/// Exclusive `flock` held on a group's controller directory
///
/// Serializes destroy-with-migration against concurrent attach across
/// processes. Released when dropped, on every exit path.
#[derive(Debug)]
pub struct GroupLock {
    file: File,
    path: PathBuf,
}

impl GroupLock {
    /// Lock `dir`
    ///
    /// Returns `Ok(None)` when `block` is off and another process holds the
    /// lock. A missing directory is reported as `Lock` with `ENOENT`.
    pub fn acquire(dir: &Path, block: bool) -> Result<Option<Self>> {
        let to_err = |source: io::Error| CgroupError::Lock {
            path: dir.to_path_buf(),
            source,
        };

        let file = File::open(dir).map_err(to_err)?;
        let arg = if block {
            FlockArg::LockExclusive
        } else {
            FlockArg::LockExclusiveNonblock
        };

        loop {
            match flock(file.as_raw_fd(), arg) {
                Ok(()) => break,
                Err(Errno::EINTR) => continue,
                Err(Errno::EWOULDBLOCK) if !block => return Ok(None),
                Err(errno) => return Err(to_err(io::Error::from(errno))),
            }
        }

        debug!(path = %dir.display(), "locked cgroup dir");
        Ok(Some(Self {
            file,
            path: dir.to_path_buf(),
        }))
    }

    /// Lock `dir`, waiting for the current holder if any
    pub fn wait(dir: &Path) -> Result<Self> {
        Self::acquire(dir, true)?.ok_or_else(|| CgroupError::Lock {
            path: dir.to_path_buf(),
            source: io::Error::from(Errno::EWOULDBLOCK),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release the lock now instead of at scope end
    pub fn unlock(self) {
        drop(self);
    }
}

impl Drop for GroupLock {
    fn drop(&mut self) {
        // closing the fd releases the flock as well
        let _ = flock(self.file.as_raw_fd(), FlockArg::Unlock);
        debug!(path = %self.path.display(), "unlocked cgroup dir");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nonblocking_lock_contention() {
        let dir = tempfile::tempdir().unwrap();

        let held = GroupLock::acquire(dir.path(), true).unwrap().unwrap();
        assert_eq!(held.path(), dir.path());

        // flock is per open file description, so a second open contends
        // even within one process
        assert!(GroupLock::acquire(dir.path(), false).unwrap().is_none());

        held.unlock();
        let again = GroupLock::acquire(dir.path(), false).unwrap();
        assert!(again.is_some());
        drop(again);

        assert!(GroupLock::wait(dir.path()).is_ok());
    }

    #[test]
    fn test_lock_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("16384");

        let err = GroupLock::acquire(&missing, true).unwrap_err();
        assert!(matches!(err, CgroupError::Lock { .. }));
        assert_eq!(err.raw_os_error(), Some(libc::ENOENT));
    }
}
