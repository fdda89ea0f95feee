use crate::process::ExitReason;
use std::time::Duration;

/// Notable lifecycle changes, delivered to the subscriber in the order the
/// supervisor observed them
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorEvent {
    Spawned {
        role: String,
        pid: u32,
    },
    SpawnFailed {
        role: String,
        error: String,
    },
    Exited {
        role: String,
        pid: Option<u32>,
        reason: ExitReason,
    },
    RestartScheduled {
        role: String,
        restart_count: usize,
        delay: Duration,
    },
    CrashLoop {
        role: String,
        restarts: usize,
    },
    ShutdownTimeout {
        role: String,
    },
}

impl SupervisorEvent {
    pub fn role(&self) -> &str {
        match self {
            SupervisorEvent::Spawned { role, .. }
            | SupervisorEvent::SpawnFailed { role, .. }
            | SupervisorEvent::Exited { role, .. }
            | SupervisorEvent::RestartScheduled { role, .. }
            | SupervisorEvent::CrashLoop { role, .. }
            | SupervisorEvent::ShutdownTimeout { role } => role,
        }
    }
}
