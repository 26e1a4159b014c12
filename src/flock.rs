//! Exclusive database lock.
//!
//! A single-process store: the LOCK file in the database directory holds
//! an advisory `flock` for the life of the open database, so a second
//! process (or a second open in this process) fails fast instead of
//! corrupting shared state.

use crate::error::Result;
use crate::Error;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

#[cfg(unix)]
use std::os::unix::io::AsRawFd;

pub struct FileLock {
    _file: File,
    path: PathBuf,
}

impl FileLock {
    /// Creates the lock file if needed and takes the exclusive lock. The
    /// file records the owning process id for debugging.
    pub fn lock<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;

        Self::try_lock(&file).map_err(|e| {
            Error::Io(format!("lock {}: {e}", path.display()))
        })?;

        writeln!(file, "{}", std::process::id())?;
        file.flush()?;

        Ok(Self { _file: file, path })
    }

    #[cfg(unix)]
    fn try_lock(file: &File) -> std::io::Result<()> {
        use libc::{flock, LOCK_EX, LOCK_NB};

        let fd = file.as_raw_fd();
        let result = unsafe { flock(fd, LOCK_EX | LOCK_NB) };
        if result != 0 {
            return Err(std::io::Error::last_os_error());
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn try_lock(_file: &File) -> std::io::Result<()> {
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        // The OS releases the lock when the descriptor closes. The file
        // itself stays behind; removing it would race a concurrent open.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_lock_records_pid() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("LOCK");
        let lock = FileLock::lock(&path).expect("failed to acquire lock");
        assert_eq!(lock.path(), path.as_path());

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains(&std::process::id().to_string()));
    }

    #[test]
    fn test_second_lock_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("LOCK");
        let _held = FileLock::lock(&path).expect("failed to acquire lock");
        assert!(FileLock::lock(&path).is_err());
    }

    #[test]
    fn test_lock_released_on_drop() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("LOCK");
        {
            let _held = FileLock::lock(&path).expect("failed to acquire lock");
        }
        let _reacquired = FileLock::lock(&path).expect("lock should be free after drop");
    }
}
