use std::time::Duration;
use thiserror::Error;

/// Main error type for the Warden process master
#[derive(Debug, Error)]
pub enum WardenError {
    // Registry errors
    #[error("Worker role already registered: {0}")]
    DuplicateRole(String),

    #[error("Unknown worker role: {0}")]
    UnknownRole(String),

    // Process lifecycle errors
    #[error("Failed to spawn worker '{role}': {reason}")]
    SpawnFailure { role: String, reason: String },

    #[error("Worker '{role}' is crash looping ({restarts} restarts within {window:?}), giving up")]
    RoleCrashLoop {
        role: String,
        restarts: usize,
        window: Duration,
    },

    #[error("Worker '{role}' did not exit within {timeout:?} and was killed")]
    ShutdownTimeout { role: String, timeout: Duration },

    #[error("Signal error: {0}")]
    SignalError(String),

    #[error("Supervisor is no longer running")]
    SupervisorGone,

    // Configuration errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid configuration file: {0}")]
    InvalidConfig(String),

    #[error("Missing required configuration field: {0}")]
    MissingConfigField(String),

    #[error("Configuration validation failed: {0}")]
    ConfigValidationError(String),

    #[error("Application context error: {0}")]
    ContextError(String),

    // Daemon errors
    #[error("Warden is already running (pid {0})")]
    DaemonAlreadyRunning(u32),

    #[error("PID file error: {0}")]
    PidFileError(String),

    #[error("Daemonize failed: {0}")]
    DaemonizeError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WardenError {
    /// Whether this error should abort startup rather than be reported per role
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            WardenError::DuplicateRole(_)
                | WardenError::InvalidConfig(_)
                | WardenError::MissingConfigField(_)
                | WardenError::ConfigValidationError(_)
        )
    }
}

/// Result type alias for Warden operations
pub type Result<T> = std::result::Result<T, WardenError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_errors_are_fatal() {
        assert!(WardenError::DuplicateRole("stream".to_string()).is_fatal());
    }

    #[test]
    fn test_per_role_errors_are_not_fatal() {
        let spawn = WardenError::SpawnFailure {
            role: "stream".to_string(),
            reason: "no such file".to_string(),
        };
        let crash_loop = WardenError::RoleCrashLoop {
            role: "message".to_string(),
            restarts: 6,
            window: Duration::from_secs(60),
        };
        let timeout = WardenError::ShutdownTimeout {
            role: "stream".to_string(),
            timeout: Duration::from_secs(5),
        };

        assert!(!spawn.is_fatal());
        assert!(!crash_loop.is_fatal());
        assert!(!timeout.is_fatal());
    }

    #[test]
    fn test_error_messages_name_the_role() {
        let err = WardenError::SpawnFailure {
            role: "stream".to_string(),
            reason: "permission denied".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Failed to spawn worker 'stream': permission denied"
        );
    }
}
