//! Error types for cgroup operations

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Cgroup driver errors
///
/// Every variant that comes from a filesystem call carries the offending
/// path and the OS error, so callers can report both.
#[derive(Debug, Error)]
pub enum CgroupError {
    /// A mandatory directory or control file is missing or inaccessible
    #[error("can't access {kind} '{}': {source}", path.display())]
    Config {
        kind: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid cgroup path '{}': longer than {max} bytes", path.display())]
    PathTooLong { path: PathBuf, max: usize },

    #[error("can not find cgroup mount point")]
    MountNotFound,

    #[error("can't check component mount hierarchy, file '{}' doesn't exist", path.display())]
    HierarchyUnreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("can't mount 'cpu' and 'cpuset' on the same hierarchy")]
    CoMounted,

    #[error("can't create cgroup dir '{}': {source}", path.display())]
    Create {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("can't remove cgroup dir '{}': {source}", path.display())]
    Remove {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("can't read from file '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("can't write to file '{}': {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("can't lock cgroup dir '{}': {source}", path.display())]
    Lock {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid value '{value}' in '{}'", path.display())]
    Parse { path: PathBuf, value: String },

    #[error("invalid cpu.cfs_period_us value: {0}")]
    InvalidPeriod(i64),

    #[error("invalid limit value: {0}")]
    InvalidLimit(String),

    #[error("system information is not available, run the check phase first")]
    NotChecked,

    #[error("can't get memory information: {0}")]
    HostInfo(String),
}

impl CgroupError {
    /// Configuration error for a directory (`file` empty) or a control file
    pub(crate) fn config(path: PathBuf, file: &str, source: io::Error) -> Self {
        CgroupError::Config {
            kind: if file.is_empty() { "directory" } else { "file" },
            path,
            source,
        }
    }

    /// Whether this error is a configuration error
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            CgroupError::Config { .. }
                | CgroupError::PathTooLong { .. }
                | CgroupError::MountNotFound
                | CgroupError::HierarchyUnreadable { .. }
                | CgroupError::CoMounted
                | CgroupError::InvalidPeriod(_)
        )
    }

    /// Raw OS error number, when the error came from a syscall
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            CgroupError::Config { source, .. }
            | CgroupError::HierarchyUnreadable { source, .. }
            | CgroupError::Create { source, .. }
            | CgroupError::Remove { source, .. }
            | CgroupError::Read { source, .. }
            | CgroupError::Write { source, .. }
            | CgroupError::Lock { source, .. } => source.raw_os_error(),
            _ => None,
        }
    }

    /// Whether the path behind this error does not exist
    pub fn is_not_found(&self) -> bool {
        self.raw_os_error() == Some(libc::ENOENT)
    }
}

pub type Result<T> = std::result::Result<T, CgroupError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CgroupError::config(
            PathBuf::from("/sys/fs/cgroup/cpu/gpdb/cpu.shares"),
            "cpu.shares",
            io::Error::from_raw_os_error(libc::EACCES),
        );
        let msg = err.to_string();
        assert!(msg.starts_with("can't access file '/sys/fs/cgroup/cpu/gpdb/cpu.shares'"));
        assert!(err.is_config());
        assert_eq!(err.raw_os_error(), Some(libc::EACCES));

        let err = CgroupError::config(
            PathBuf::from("/sys/fs/cgroup/cpu/gpdb"),
            "",
            io::Error::from_raw_os_error(libc::ENOENT),
        );
        assert!(err.to_string().starts_with("can't access directory"));
    }

    #[test]
    fn test_operational_errors_are_not_config() {
        let err = CgroupError::Remove {
            path: PathBuf::from("/sys/fs/cgroup/cpu/gpdb/16384"),
            source: io::Error::from_raw_os_error(libc::EBUSY),
        };
        assert!(!err.is_config());
        assert!(!err.is_not_found());
        assert!(err.to_string().contains("/sys/fs/cgroup/cpu/gpdb/16384"));

        let err = CgroupError::Read {
            path: PathBuf::from("/sys/fs/cgroup/cpuacct/gpdb/16384/cpuacct.usage"),
            source: io::Error::from_raw_os_error(libc::ENOENT),
        };
        assert!(err.is_not_found());
    }

    #[test]
    fn test_comounted_display() {
        assert_eq!(
            CgroupError::CoMounted.to_string(),
            "can't mount 'cpu' and 'cpuset' on the same hierarchy"
        );
    }
}
