//! State shared with worker processes across the process boundary.
//!
//! The master builds one [`ApplicationContext`] before spawning anything.
//! Each worker receives a serialized copy in its environment; nothing a
//! worker does to its copy is visible to the master or to other workers.

use crate::config::ApplicationSettings;
use crate::error::{Result, WardenError};
use crate::process::WorkerKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

pub const ENV_CONTEXT: &str = "WARDEN_CONTEXT";
pub const ENV_ROLE: &str = "WARDEN_ROLE";
pub const ENV_KIND: &str = "WARDEN_KIND";
pub const ENV_PARENT_PID: &str = "WARDEN_PARENT_PID";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ContextData {
    name: String,
    version: String,
    started_at: DateTime<Utc>,
    stream_listen: SocketAddr,
    message_listen: SocketAddr,
    settings: BTreeMap<String, String>,
}

/// Read-only application state visible to every worker
#[derive(Debug, Clone, PartialEq)]
pub struct ApplicationContext {
    inner: Arc<ContextData>,
}

impl ApplicationContext {
    pub fn from_settings(settings: &ApplicationSettings) -> Self {
        Self {
            inner: Arc::new(ContextData {
                name: settings.name.clone(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                started_at: Utc::now(),
                stream_listen: settings.stream_listen,
                message_listen: settings.message_listen,
                settings: settings.settings.clone(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn version(&self) -> &str {
        &self.inner.version
    }

    /// When the master created the context
    pub fn started_at(&self) -> DateTime<Utc> {
        self.inner.started_at
    }

    pub fn stream_listen(&self) -> SocketAddr {
        self.inner.stream_listen
    }

    pub fn message_listen(&self) -> SocketAddr {
        self.inner.message_listen
    }

    pub fn setting(&self, key: &str) -> Option<&str> {
        self.inner.settings.get(key).map(String::as_str)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(&*self.inner)
            .map_err(|e| WardenError::ContextError(format!("Failed to encode context: {}", e)))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let data: ContextData = serde_json::from_str(json)
            .map_err(|e| WardenError::ContextError(format!("Failed to decode context: {}", e)))?;
        Ok(Self {
            inner: Arc::new(data),
        })
    }

    /// Environment handed to a worker process
    pub fn worker_env(
        &self,
        role: &str,
        kind: WorkerKind,
        parent_pid: u32,
    ) -> Result<Vec<(String, String)>> {
        Ok(vec![
            (ENV_CONTEXT.to_string(), self.to_json()?),
            (ENV_ROLE.to_string(), role.to_string()),
            (ENV_KIND.to_string(), kind.as_str().to_string()),
            (ENV_PARENT_PID.to_string(), parent_pid.to_string()),
        ])
    }

    /// Rebuild the context inside a worker process
    pub fn from_env() -> Result<Self> {
        let json = read_env(ENV_CONTEXT)?;
        Self::from_json(&json)
    }
}

impl Default for ApplicationContext {
    fn default() -> Self {
        Self::from_settings(&ApplicationSettings::default())
    }
}

/// A worker's view of the master that spawned it.
///
/// It holds no reference into the master's memory; liveness is read from
/// the OS and any coordination goes through signals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentHandle {
    pid: u32,
    role: String,
    kind: WorkerKind,
}

impl ParentHandle {
    pub fn new(pid: u32, role: impl Into<String>, kind: WorkerKind) -> Self {
        Self {
            pid,
            role: role.into(),
            kind,
        }
    }

    pub fn from_env() -> Result<Self> {
        let pid = read_env(ENV_PARENT_PID)?
            .parse::<u32>()
            .map_err(|e| WardenError::ContextError(format!("Invalid {}: {}", ENV_PARENT_PID, e)))?;
        let role = read_env(ENV_ROLE)?;
        let kind = read_env(ENV_KIND)?
            .parse::<WorkerKind>()
            .map_err(|e| WardenError::ContextError(format!("Invalid {}: {}", ENV_KIND, e)))?;
        Ok(Self::new(pid, role, kind))
    }

    /// Pid of the master process
    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    pub fn kind(&self) -> WorkerKind {
        self.kind
    }

    /// False once the master died and this process was reparented
    pub fn is_alive(&self) -> bool {
        nix::unistd::getppid().as_raw() as u32 == self.pid
    }
}

fn read_env(key: &str) -> Result<String> {
    std::env::var(key)
        .map_err(|_| WardenError::ContextError(format!("{} is not set; not started by warden?", key)))
}
