use crate::error::{Result, WardenError};
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;

/// Signal names accepted in configuration
pub const VALID_SIGNALS: [&str; 7] = [
    "SIGTERM", "SIGINT", "SIGQUIT", "SIGKILL", "SIGHUP", "SIGUSR1", "SIGUSR2",
];

pub fn parse_signal(signal_name: &str) -> Result<Signal> {
    match signal_name {
        "SIGTERM" => Ok(Signal::SIGTERM),
        "SIGINT" => Ok(Signal::SIGINT),
        "SIGQUIT" => Ok(Signal::SIGQUIT),
        "SIGKILL" => Ok(Signal::SIGKILL),
        "SIGHUP" => Ok(Signal::SIGHUP),
        "SIGUSR1" => Ok(Signal::SIGUSR1),
        "SIGUSR2" => Ok(Signal::SIGUSR2),
        _ => Err(WardenError::SignalError(format!(
            "Invalid signal name: {}",
            signal_name
        ))),
    }
}

/// Deliver `sig` to `pid`.
///
/// Returns `Ok(false)` when the process is already gone; its exit is picked
/// up by the waiter task like any other termination.
pub fn send_signal(pid: u32, sig: Signal) -> Result<bool> {
    match signal::kill(Pid::from_raw(pid as i32), sig) {
        Ok(()) => Ok(true),
        Err(Errno::ESRCH) => Ok(false),
        Err(e) => Err(WardenError::SignalError(format!(
            "Failed to send {} to pid {}: {}",
            sig, pid, e
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_every_valid_signal() {
        for name in VALID_SIGNALS {
            assert_eq!(parse_signal(name).unwrap().as_str(), name);
        }
    }

    #[test]
    fn test_parse_invalid_signal() {
        assert!(matches!(
            parse_signal("TERM"),
            Err(WardenError::SignalError(_))
        ));
    }

    #[test]
    fn test_send_signal_to_missing_process() {
        // pid_max on Linux never reaches this value
        assert!(!send_signal(i32::MAX as u32, Signal::SIGTERM).unwrap());
    }
}
