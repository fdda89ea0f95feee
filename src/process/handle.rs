use crate::process::restart::{RestartPolicy, RestartTracker};
use crate::process::role::{WorkerKind, WorkerRole};
use nix::sys::signal::Signal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessState {
    Starting,
    Running,
    Stopping,
    Exited,
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessState::Starting => write!(f, "starting"),
            ProcessState::Running => write!(f, "running"),
            ProcessState::Stopping => write!(f, "stopping"),
            ProcessState::Exited => write!(f, "exited"),
        }
    }
}

/// Why a worker process is no longer running
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    /// Process exited on its own with a status code
    Exited { code: i32 },
    /// Process was terminated by a signal it did not handle
    Signaled { signal: i32 },
    /// Process ignored the stop request and was killed after the grace period
    ForceKilled,
    /// The OS refused to create the process
    SpawnFailed(String),
    /// Waiting on the process failed, its status is unknown
    Lost(String),
}

impl ExitReason {
    pub fn from_status(status: ExitStatus) -> Self {
        if let Some(code) = status.code() {
            ExitReason::Exited { code }
        } else if let Some(signal) = status.signal() {
            ExitReason::Signaled { signal }
        } else {
            ExitReason::Lost(format!("unrecognized exit status: {:?}", status))
        }
    }

    /// Exit code 0 without a signal: the worker chose to stop
    pub fn is_clean(&self) -> bool {
        matches!(self, ExitReason::Exited { code: 0 })
    }

    pub fn code(&self) -> Option<i32> {
        match self {
            ExitReason::Exited { code } => Some(*code),
            _ => None,
        }
    }

    pub fn signal(&self) -> Option<i32> {
        match self {
            ExitReason::Signaled { signal } => Some(*signal),
            ExitReason::ForceKilled => Some(Signal::SIGKILL as i32),
            _ => None,
        }
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::Exited { code } => write!(f, "exit code {}", code),
            ExitReason::Signaled { signal } => match Signal::try_from(*signal) {
                Ok(sig) => write!(f, "killed by {}", sig),
                Err(_) => write!(f, "killed by signal {}", signal),
            },
            ExitReason::ForceKilled => write!(f, "force killed"),
            ExitReason::SpawnFailed(msg) => write!(f, "spawn failed: {}", msg),
            ExitReason::Lost(msg) => write!(f, "lost: {}", msg),
        }
    }
}

/// Supervisor-side record of one role's process
#[derive(Debug)]
pub struct ProcessHandle {
    role: Arc<WorkerRole>,
    pub pid: Option<u32>,
    pub state: ProcessState,
    pub started_at: Option<SystemTime>,
    pub last_exit_code: Option<i32>,
    pub last_exit_signal: Option<i32>,
    pub last_exit: Option<ExitReason>,
    pub restart_count: usize,
    /// Set once the role exhausted its restart budget
    pub disabled: bool,
    pub(crate) spawn_id: u64,
    pub(crate) restart_at: Option<Instant>,
    pub(crate) restart_tracker: RestartTracker,
    pub(crate) policy: RestartPolicy,
    pub(crate) stop_signal: Signal,
    pub(crate) stop_timeout: Option<Duration>,
}

impl ProcessHandle {
    pub fn new(
        role: Arc<WorkerRole>,
        policy: RestartPolicy,
        stop_signal: Signal,
        stop_timeout: Option<Duration>,
    ) -> Self {
        Self {
            role,
            pid: None,
            state: ProcessState::Starting,
            started_at: None,
            last_exit_code: None,
            last_exit_signal: None,
            last_exit: None,
            restart_count: 0,
            disabled: false,
            spawn_id: 0,
            restart_at: None,
            restart_tracker: RestartTracker::new(),
            policy,
            stop_signal,
            stop_timeout,
        }
    }

    pub fn role(&self) -> &Arc<WorkerRole> {
        &self.role
    }

    pub fn name(&self) -> &str {
        self.role.name()
    }

    pub fn kind(&self) -> WorkerKind {
        self.role.kind()
    }

    pub fn policy(&self) -> &RestartPolicy {
        &self.policy
    }

    /// A new process was created for this role
    pub(crate) fn begin(&mut self, pid: u32, spawn_id: u64) {
        self.pid = Some(pid);
        self.spawn_id = spawn_id;
        self.started_at = Some(SystemTime::now());
        self.restart_at = None;
        self.state = ProcessState::Starting;
    }

    pub fn mark_running(&mut self) {
        self.state = ProcessState::Running;
    }

    pub fn mark_stopping(&mut self) {
        self.state = ProcessState::Stopping;
    }

    /// Terminal transition; the pid is no longer valid afterwards
    pub fn record_exit(&mut self, reason: ExitReason) {
        self.state = ProcessState::Exited;
        self.pid = None;
        self.last_exit_code = reason.code();
        self.last_exit_signal = reason.signal();
        self.last_exit = Some(reason);
    }

    pub fn is_live(&self) -> bool {
        self.state != ProcessState::Exited
    }

    pub fn uptime(&self) -> Duration {
        match (self.state, self.started_at) {
            (ProcessState::Exited, _) | (_, None) => Duration::ZERO,
            (_, Some(started)) => SystemTime::now()
                .duration_since(started)
                .unwrap_or(Duration::ZERO),
        }
    }

    pub fn status(&self) -> ProcessStatus {
        ProcessStatus {
            name: self.name().to_string(),
            kind: self.kind(),
            state: self.state,
            pid: self.pid,
            restart_count: self.restart_count,
            uptime: self.uptime(),
            last_exit: self.last_exit.clone(),
            disabled: self.disabled,
        }
    }
}

/// Point-in-time view of a role's process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessStatus {
    pub name: String,
    pub kind: WorkerKind,
    pub state: ProcessState,
    pub pid: Option<u32>,
    pub restart_count: usize,
    pub uptime: Duration,
    pub last_exit: Option<ExitReason>,
    pub disabled: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> ProcessHandle {
        let role = Arc::new(WorkerRole::new("stream", WorkerKind::Stream, |_, _| Ok(())));
        ProcessHandle::new(role, RestartPolicy::new(), Signal::SIGTERM, None)
    }

    #[test]
    fn test_exit_reason_from_status() {
        assert_eq!(
            ExitReason::from_status(ExitStatus::from_raw(0)),
            ExitReason::Exited { code: 0 }
        );
        // wait status encodes the exit code in the high byte
        assert_eq!(
            ExitReason::from_status(ExitStatus::from_raw(3 << 8)),
            ExitReason::Exited { code: 3 }
        );
        assert_eq!(
            ExitReason::from_status(ExitStatus::from_raw(Signal::SIGKILL as i32)),
            ExitReason::Signaled { signal: 9 }
        );
    }

    #[test]
    fn test_only_zero_exit_is_clean() {
        assert!(ExitReason::Exited { code: 0 }.is_clean());
        assert!(!ExitReason::Exited { code: 1 }.is_clean());
        assert!(!ExitReason::Signaled { signal: 15 }.is_clean());
        assert!(!ExitReason::ForceKilled.is_clean());
        assert!(!ExitReason::SpawnFailed("nope".to_string()).is_clean());
    }

    #[test]
    fn test_exit_reason_display() {
        assert_eq!(ExitReason::Exited { code: 2 }.to_string(), "exit code 2");
        assert_eq!(
            ExitReason::Signaled { signal: 15 }.to_string(),
            "killed by SIGTERM"
        );
    }

    #[test]
    fn test_handle_lifecycle() {
        let mut handle = handle();
        assert_eq!(handle.state, ProcessState::Starting);
        assert!(handle.pid.is_none());

        handle.begin(4242, 1);
        handle.mark_running();
        assert_eq!(handle.state, ProcessState::Running);
        assert_eq!(handle.pid, Some(4242));
        assert!(handle.is_live());

        handle.mark_stopping();
        assert_eq!(handle.state, ProcessState::Stopping);

        handle.record_exit(ExitReason::Signaled { signal: 15 });
        assert_eq!(handle.state, ProcessState::Exited);
        assert!(handle.pid.is_none());
        assert_eq!(handle.last_exit_signal, Some(15));
        assert_eq!(handle.last_exit_code, None);
        assert!(!handle.is_live());
        assert_eq!(handle.uptime(), Duration::ZERO);
    }

    #[test]
    fn test_force_killed_reports_sigkill() {
        let mut handle = handle();
        handle.begin(1, 1);
        handle.record_exit(ExitReason::ForceKilled);
        assert_eq!(handle.last_exit_signal, Some(9));
    }

    #[test]
    fn test_status_snapshot() {
        let mut handle = handle();
        handle.begin(77, 3);
        handle.mark_running();
        handle.restart_count = 2;

        let status = handle.status();
        assert_eq!(status.name, "stream");
        assert_eq!(status.kind, WorkerKind::Stream);
        assert_eq!(status.state, ProcessState::Running);
        assert_eq!(status.pid, Some(77));
        assert_eq!(status.restart_count, 2);
        assert!(!status.disabled);
    }
}
