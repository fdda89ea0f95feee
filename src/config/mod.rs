use crate::error::{Result, WardenError};
use crate::process::signal::{parse_signal, VALID_SIGNALS};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration for the process master
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WardenConfig {
    /// Supervision defaults applied to every worker role
    pub supervisor: SupervisorSettings,

    /// Values handed to every worker through the application context
    pub application: ApplicationSettings,

    /// Overrides keyed by role name
    pub roles: BTreeMap<String, RoleOverrides>,

    /// Overrides keyed by worker kind ("stream", "message")
    pub kinds: BTreeMap<String, RoleOverrides>,
}

/// Restart and shutdown defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorSettings {
    /// Maximum number of restarts within the restart window
    pub max_restarts: usize,

    /// Window used to count recent restarts (in seconds)
    pub restart_window_secs: u64,

    /// Delay before the first restart (in milliseconds)
    pub restart_delay_ms: u64,

    /// How the restart delay grows with consecutive restarts
    pub backoff: BackoffKind,

    /// Upper bound on the restart delay (in milliseconds)
    pub max_restart_delay_ms: u64,

    /// Grace period granted to each worker on shutdown (in seconds)
    pub shutdown_timeout_secs: u64,

    /// Signal sent to request a graceful stop
    pub stop_signal: String,

    /// Where the master writes its pid
    pub pid_file: Option<PathBuf>,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            max_restarts: 5,
            restart_window_secs: 60,
            restart_delay_ms: 1000,
            backoff: BackoffKind::Exponential,
            max_restart_delay_ms: 60_000,
            shutdown_timeout_secs: 10,
            stop_signal: "SIGTERM".to_string(),
            pid_file: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    Fixed,
    Exponential,
}

/// Application values shared with every worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationSettings {
    pub name: String,
    pub stream_listen: SocketAddr,
    pub message_listen: SocketAddr,
    pub settings: BTreeMap<String, String>,
}

impl Default for ApplicationSettings {
    fn default() -> Self {
        Self {
            name: "warden".to_string(),
            stream_listen: SocketAddr::from(([127, 0, 0, 1], 4977)),
            message_listen: SocketAddr::from(([127, 0, 0, 1], 4978)),
            settings: BTreeMap::new(),
        }
    }
}

/// Per-role or per-kind overrides of the supervisor defaults
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoleOverrides {
    pub autorestart: Option<bool>,
    pub max_restarts: Option<usize>,
    pub restart_delay_ms: Option<u64>,
    pub stop_timeout_secs: Option<u64>,
    pub stop_signal: Option<String>,

    /// Run this program instead of re-executing the master binary
    pub command: Option<Vec<String>>,
}

impl RoleOverrides {
    /// Fill every unset field from `fallback`
    fn or(self, fallback: &RoleOverrides) -> RoleOverrides {
        RoleOverrides {
            autorestart: self.autorestart.or(fallback.autorestart),
            max_restarts: self.max_restarts.or(fallback.max_restarts),
            restart_delay_ms: self.restart_delay_ms.or(fallback.restart_delay_ms),
            stop_timeout_secs: self.stop_timeout_secs.or(fallback.stop_timeout_secs),
            stop_signal: self.stop_signal.or_else(|| fallback.stop_signal.clone()),
            command: self.command.or_else(|| fallback.command.clone()),
        }
    }
}

impl WardenConfig {
    /// Load configuration from a file (supports TOML and JSON)
    pub fn from_file(path: &Path) -> Result<WardenConfig> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| WardenError::ConfigError(format!("Failed to read config file: {}", e)))?;

        let extension = path.extension().and_then(|s| s.to_str()).unwrap_or("");

        let mut config = match extension {
            "toml" => Self::parse_toml(&contents)?,
            "json" => Self::parse_json(&contents)?,
            _ => {
                return Err(WardenError::InvalidConfig(format!(
                    "Unsupported file format: {}. Use .toml or .json",
                    extension
                )))
            }
        };

        config.expand_env_vars();
        config.validate()?;

        Ok(config)
    }

    fn parse_toml(contents: &str) -> Result<WardenConfig> {
        toml::from_str(contents)
            .map_err(|e| WardenError::InvalidConfig(format!("Failed to parse TOML: {}", e)))
    }

    fn parse_json(contents: &str) -> Result<WardenConfig> {
        serde_json::from_str(contents)
            .map_err(|e| WardenError::InvalidConfig(format!("Failed to parse JSON: {}", e)))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let sup = &self.supervisor;

        if sup.max_restarts == 0 {
            return Err(WardenError::ConfigValidationError(
                "max_restarts must be at least 1".to_string(),
            ));
        }

        if sup.restart_window_secs == 0 {
            return Err(WardenError::ConfigValidationError(
                "restart_window_secs must be at least 1".to_string(),
            ));
        }

        if sup.max_restart_delay_ms < sup.restart_delay_ms {
            return Err(WardenError::ConfigValidationError(format!(
                "max_restart_delay_ms ({}) is lower than restart_delay_ms ({})",
                sup.max_restart_delay_ms, sup.restart_delay_ms
            )));
        }

        Self::validate_signal(&sup.stop_signal)?;

        if self.application.name.is_empty() {
            return Err(WardenError::MissingConfigField("application.name".to_string()));
        }

        let app = &self.application;
        if app.stream_listen.port() != 0 && app.stream_listen == app.message_listen {
            return Err(WardenError::ConfigValidationError(format!(
                "stream_listen and message_listen both use {}",
                app.stream_listen
            )));
        }

        for (name, overrides) in self.roles.iter().chain(self.kinds.iter()) {
            if let Some(ref signal) = overrides.stop_signal {
                Self::validate_signal(signal)?;
            }
            if overrides.max_restarts == Some(0) {
                return Err(WardenError::ConfigValidationError(format!(
                    "{}: max_restarts must be at least 1",
                    name
                )));
            }
            if let Some(ref command) = overrides.command {
                if command.first().map_or(true, |program| program.is_empty()) {
                    return Err(WardenError::ConfigValidationError(format!(
                        "{}: command must name a program",
                        name
                    )));
                }
            }
        }

        Ok(())
    }

    fn validate_signal(name: &str) -> Result<()> {
        parse_signal(name).map(|_| ()).map_err(|_| {
            WardenError::ConfigValidationError(format!(
                "Invalid stop_signal: {}. Must be one of: {}",
                name,
                VALID_SIGNALS.join(", ")
            ))
        })
    }

    /// Effective overrides for a role: role entry first, then its kind
    pub fn overrides_for(&self, role: &str, kind: &str) -> RoleOverrides {
        let by_kind = self.kinds.get(kind).cloned().unwrap_or_default();
        match self.roles.get(role) {
            Some(by_role) => by_role.clone().or(&by_kind),
            None => by_kind,
        }
    }

    /// Expand environment variables in string-valued fields
    fn expand_env_vars(&mut self) {
        if let Some(ref pid_file) = self.supervisor.pid_file {
            self.supervisor.pid_file = Some(Self::expand_env_in_path(pid_file));
        }

        self.application.name = Self::expand_env_in_string(&self.application.name);
        self.application.settings = self
            .application
            .settings
            .iter()
            .map(|(k, v)| (k.clone(), Self::expand_env_in_string(v)))
            .collect();

        for overrides in self.roles.values_mut().chain(self.kinds.values_mut()) {
            if let Some(ref mut command) = overrides.command {
                *command = command
                    .iter()
                    .map(|arg| Self::expand_env_in_string(arg))
                    .collect();
            }
        }
    }

    /// Expand $VAR and ${VAR} in a string
    fn expand_env_in_string(s: &str) -> String {
        Self::expand_with(s, |name| std::env::var(name).ok())
    }

    /// `$NAME` takes the longest identifier run. Unset variables and a bare
    /// `$` are kept verbatim.
    fn expand_with(s: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
        let mut result = String::with_capacity(s.len());
        let mut rest = s;

        while let Some(dollar) = rest.find('$') {
            result.push_str(&rest[..dollar]);
            let after = &rest[dollar + 1..];

            let (name, token_len) = if let Some(braced) = after.strip_prefix('{') {
                match braced.find('}') {
                    Some(end) => (&braced[..end], end + 2),
                    None => ("", 0),
                }
            } else {
                let end = after
                    .char_indices()
                    .find(|&(i, c)| {
                        !(c == '_' || c.is_ascii_alphabetic() || (i > 0 && c.is_ascii_digit()))
                    })
                    .map_or(after.len(), |(i, _)| i);
                (&after[..end], end)
            };

            let token = &rest[dollar..dollar + 1 + token_len];
            match lookup(name).filter(|_| !name.is_empty()) {
                Some(value) => result.push_str(&value),
                None if token_len == 0 => result.push('$'),
                None => result.push_str(token),
            }
            rest = &rest[dollar + 1 + token_len..];
        }

        result.push_str(rest);
        result
    }

    fn expand_env_in_path(path: &Path) -> PathBuf {
        let path_str = path.to_string_lossy();
        PathBuf::from(Self::expand_env_in_string(&path_str))
    }
}

impl SupervisorSettings {
    pub fn restart_window(&self) -> Duration {
        Duration::from_secs(self.restart_window_secs)
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }

    pub fn max_restart_delay(&self) -> Duration {
        Duration::from_millis(self.max_restart_delay_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}
