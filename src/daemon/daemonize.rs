// Detach the master from its terminal

use crate::error::{Result, WardenError};

/// Double-fork into the background and point stdio at /dev/null.
///
/// Must run before any tokio runtime or thread exists.
#[cfg(unix)]
pub fn daemonize() -> Result<()> {
    use nix::unistd::{dup2, fork, setsid, ForkResult};
    use std::fs::OpenOptions;
    use std::os::unix::io::AsRawFd;

    // SAFETY: called while the process is still single threaded
    match unsafe { fork() } {
        Ok(ForkResult::Parent { .. }) => std::process::exit(0),
        Ok(ForkResult::Child) => {}
        Err(e) => return Err(WardenError::DaemonizeError(format!("first fork: {}", e))),
    }

    setsid().map_err(|e| WardenError::DaemonizeError(format!("setsid: {}", e)))?;

    // Second fork so the daemon can never reacquire a controlling terminal
    match unsafe { fork() } {
        Ok(ForkResult::Parent { .. }) => std::process::exit(0),
        Ok(ForkResult::Child) => {}
        Err(e) => return Err(WardenError::DaemonizeError(format!("second fork: {}", e))),
    }

    std::env::set_current_dir("/")
        .map_err(|e| WardenError::DaemonizeError(format!("chdir /: {}", e)))?;

    let devnull = OpenOptions::new()
        .read(true)
        .write(true)
        .open("/dev/null")
        .map_err(|e| WardenError::DaemonizeError(format!("open /dev/null: {}", e)))?;

    for fd in 0..=2 {
        dup2(devnull.as_raw_fd(), fd)
            .map_err(|e| WardenError::DaemonizeError(format!("dup2 fd {}: {}", fd, e)))?;
    }

    Ok(())
}

#[cfg(not(unix))]
pub fn daemonize() -> Result<()> {
    Err(WardenError::DaemonizeError(
        "daemon mode is only supported on Unix systems".to_string(),
    ))
}
