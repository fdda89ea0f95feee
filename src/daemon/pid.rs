// PID file for the master process

use crate::error::{Result, WardenError};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Records the master's pid so a second master refuses to start
#[derive(Debug, Clone)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn with_path<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Write the current process PID to the file
    pub fn write(&self) -> Result<()> {
        let pid = std::process::id();
        fs::write(&self.path, pid.to_string()).map_err(|e| {
            WardenError::PidFileError(format!("Failed to write {}: {}", self.path.display(), e))
        })
    }

    pub fn read(&self) -> Result<u32> {
        let content = fs::read_to_string(&self.path).map_err(|e| {
            WardenError::PidFileError(format!("Failed to read {}: {}", self.path.display(), e))
        })?;

        content.trim().parse::<u32>().map_err(|e| {
            WardenError::PidFileError(format!("Invalid PID in {}: {}", self.path.display(), e))
        })
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn remove(&self) -> Result<()> {
        if self.exists() {
            fs::remove_file(&self.path).map_err(|e| {
                WardenError::PidFileError(format!(
                    "Failed to remove {}: {}",
                    self.path.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }

    /// Pid of another live master owning this file, if any
    pub fn running_pid(&self) -> Option<u32> {
        if !self.exists() {
            return None;
        }

        match self.read() {
            Ok(pid) if pid != std::process::id() && is_process_alive(pid) => Some(pid),
            _ => None,
        }
    }

    /// Claim the file for this process.
    ///
    /// Fails with `DaemonAlreadyRunning` when a live master owns it; a stale
    /// or unreadable file is overwritten.
    pub fn acquire(&self) -> Result<()> {
        if let Some(pid) = self.running_pid() {
            return Err(WardenError::DaemonAlreadyRunning(pid));
        }

        if self.exists() {
            warn!(path = %self.path.display(), "Replacing stale PID file");
        }

        self.write()?;
        info!(path = %self.path.display(), pid = std::process::id(), "PID file written");
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(unix)]
fn is_process_alive(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    // Signal 0 only checks that the process exists
    match kill(Pid::from_raw(pid as i32), None) {
        Ok(_) => true,
        Err(nix::errno::Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
fn is_process_alive(_pid: u32) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn pid_file(dir: &TempDir) -> PidFile {
        PidFile::with_path(dir.path().join("warden.pid"))
    }

    #[test]
    fn test_write_and_read_pid() {
        let dir = TempDir::new().unwrap();
        let pid_file = pid_file(&dir);

        pid_file.write().unwrap();
        assert_eq!(pid_file.read().unwrap(), std::process::id());
    }

    #[test]
    fn test_remove() {
        let dir = TempDir::new().unwrap();
        let pid_file = pid_file(&dir);

        pid_file.write().unwrap();
        assert!(pid_file.exists());

        pid_file.remove().unwrap();
        assert!(!pid_file.exists());

        // removing twice is fine
        pid_file.remove().unwrap();
    }

    #[test]
    fn test_acquire_refuses_live_owner() {
        let dir = TempDir::new().unwrap();
        let pid_file = pid_file(&dir);

        // pid 1 is always alive
        fs::write(pid_file.path(), "1").unwrap();

        let result = pid_file.acquire();
        assert!(matches!(result, Err(WardenError::DaemonAlreadyRunning(1))));
        assert_eq!(pid_file.read().unwrap(), 1);
    }

    #[test]
    fn test_acquire_replaces_stale_file() {
        let dir = TempDir::new().unwrap();
        let pid_file = pid_file(&dir);

        fs::write(pid_file.path(), "not a pid").unwrap();
        pid_file.acquire().unwrap();
        assert_eq!(pid_file.read().unwrap(), std::process::id());
    }

    #[test]
    fn test_own_pid_is_not_a_rival() {
        let dir = TempDir::new().unwrap();
        let pid_file = pid_file(&dir);

        pid_file.write().unwrap();
        assert_eq!(pid_file.running_pid(), None);
        pid_file.acquire().unwrap();
    }
}
