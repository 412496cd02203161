//! Utility functions for cgroup control files

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::path::Path;

use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use tracing::debug;

use super::error::{CgroupError, Result};

/// Read a control file to string
pub fn read_cgroup_file(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|source| CgroupError::Read {
        path: path.to_path_buf(),
        source,
    })
}

/// Write a value into an existing control file
///
/// Control files are never created: a missing file is an error, the same
/// as on a real cgroup filesystem.
pub fn write_cgroup_file(path: &Path, content: &str) -> Result<()> {
    let to_err = |source| CgroupError::Write {
        path: path.to_path_buf(),
        source,
    };

    let mut file = OpenOptions::new()
        .write(true)
        .truncate(true)
        .open(path)
        .map_err(to_err)?;
    file.write_all(content.as_bytes()).map_err(to_err)?;

    debug!(path = %path.display(), value = content, "wrote cgroup file");
    Ok(())
}

/// Read a signed integer control file (`cpu.cfs_quota_us` may be `-1`)
pub fn read_int(path: &Path) -> Result<i64> {
    let content = read_cgroup_file(path)?;
    content.trim().parse::<i64>().map_err(|_| CgroupError::Parse {
        path: path.to_path_buf(),
        value: content.trim().to_string(),
    })
}

/// Read an unsigned integer control file (memory limits exceed `i64` range
/// on some kernels)
pub fn read_uint(path: &Path) -> Result<u64> {
    let content = read_cgroup_file(path)?;
    let value = content.trim();
    value
        .parse::<u64>()
        .or_else(|_| value.parse::<i64>().map(|v| v as u64))
        .map_err(|_| CgroupError::Parse {
            path: path.to_path_buf(),
            value: value.to_string(),
        })
}

pub fn write_int(path: &Path, value: i64) -> Result<()> {
    write_cgroup_file(path, &value.to_string())
}

/// Read a string control file, without the trailing newline
pub fn read_str(path: &Path) -> Result<String> {
    Ok(read_cgroup_file(path)?.trim_end().to_string())
}

/// Read a whole file whose size is unknown in advance
///
/// The buffer grows by `chunk` bytes until a short read is observed.
pub fn read_growing<R: Read>(reader: &mut R, chunk: usize) -> std::io::Result<Vec<u8>> {
    let mut buf = vec![0u8; chunk];
    let mut len = 0;

    loop {
        let n = match reader.read(&mut buf[len..len + chunk]) {
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        len += n;

        if n < chunk {
            break;
        }
        buf.resize(len + chunk, 0);
    }

    buf.truncate(len);
    Ok(buf)
}

/// Parse a whitespace separated pid list as found in `cgroup.procs`
pub fn parse_pids(path: &Path, content: &str) -> Result<Vec<u32>> {
    content
        .split_whitespace()
        .map(|token| {
            token.parse::<u32>().map_err(|_| CgroupError::Parse {
                path: path.to_path_buf(),
                value: token.to_string(),
            })
        })
        .collect()
}

/// Check if process exists
///
/// Uses kill(pid, 0), which doesn't deliver a signal
pub fn process_exists(pid: u32) -> bool {
    match kill(Pid::from_raw(pid as i32), None) {
        Ok(_) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}
