use crate::error::WardenError;
use crate::process::{ExitReason, WorkerKind};
use serde::Serialize;
use std::time::Duration;

/// Outcome of the spawn phase
#[derive(Debug, Default)]
pub struct SpawnReport {
    /// Roles that started, with their pid, in spawn order
    pub spawned: Vec<(String, u32)>,
    /// One `SpawnFailure` per role that could not be started
    pub failures: Vec<WardenError>,
}

impl SpawnReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Final state of one role after shutdown
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoleExit {
    pub name: String,
    pub kind: WorkerKind,
    /// `None` if the role never had a process
    pub reason: Option<ExitReason>,
    pub restart_count: usize,
    /// Ignored the stop request and was killed
    pub timed_out: bool,
    /// Grace period the role was given
    pub grace: Duration,
    /// Restart budget was exhausted before shutdown
    pub disabled: bool,
}

/// Aggregate result of `shutdown_all`, in registration order
#[derive(Debug, Clone, Default, Serialize)]
pub struct ShutdownReport {
    pub exits: Vec<RoleExit>,
    pub elapsed: Duration,
}

impl ShutdownReport {
    pub fn get(&self, name: &str) -> Option<&RoleExit> {
        self.exits.iter().find(|e| e.name == name)
    }

    /// `ShutdownTimeout` for every role that had to be force killed
    pub fn errors(&self) -> Vec<WardenError> {
        self.exits
            .iter()
            .filter(|e| e.timed_out)
            .map(|e| WardenError::ShutdownTimeout {
                role: e.name.clone(),
                timeout: e.grace,
            })
            .collect()
    }

    pub fn is_clean(&self) -> bool {
        self.exits.iter().all(|e| !e.timed_out)
    }
}
