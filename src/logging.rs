//! Tracing setup shared by the master and every worker process.
//!
//! The filter is read from `WARDEN_LOG`, then `RUST_LOG`, then falls back
//! to `info`. Workers inherit the master's environment, so one variable
//! controls the whole process tree.

use std::str::FromStr;
use tracing::Span;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub const ENV_LOG: &str = "WARDEN_LOG";
pub const ENV_LOG_FORMAT: &str = "WARDEN_LOG_FORMAT";
const DEFAULT_FILTER: &str = "info";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Full,
    Compact,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "full" => Ok(Self::Full),
            "compact" => Ok(Self::Compact),
            _ => Err(format!(
                "Unknown log format: '{}'. Valid options: full, compact",
                s
            )),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    /// Explicit filter directive; wins over the environment
    pub filter: Option<String>,
    pub format: LogFormat,
    /// Emit ANSI colours (off for daemonized masters)
    pub ansi: bool,
}

impl LogConfig {
    pub fn new() -> Self {
        Self {
            ansi: true,
            ..Default::default()
        }
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn with_ansi(mut self, ansi: bool) -> Self {
        self.ansi = ansi;
        self
    }

    /// Fill unset fields from `WARDEN_LOG` / `RUST_LOG` / `WARDEN_LOG_FORMAT`
    pub fn with_env_overrides(self) -> Self {
        self.with_env_lookup(|key| std::env::var(key).ok())
    }

    fn with_env_lookup(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if self.filter.is_none() {
            self.filter = lookup(ENV_LOG).or_else(|| lookup("RUST_LOG"));
        }

        if let Some(format) = lookup(ENV_LOG_FORMAT).and_then(|f| f.parse().ok()) {
            self.format = format;
        }

        self
    }

    fn filter_directive(&self) -> &str {
        match self.filter.as_deref() {
            Some(filter) if !filter.trim().is_empty() => filter,
            _ => DEFAULT_FILTER,
        }
    }

    fn build_filter(&self) -> EnvFilter {
        let directive = self.filter_directive();
        EnvFilter::try_new(directive).unwrap_or_else(|_| {
            eprintln!("Warning: Invalid log filter '{}', using default", directive);
            EnvFilter::new(DEFAULT_FILTER)
        })
    }
}

/// Install the global subscriber. Later calls are ignored.
pub fn init(config: LogConfig) {
    let filter = config.build_filter();

    let result = match config.format {
        LogFormat::Full => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_ansi(config.ansi)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
        LogFormat::Compact => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .compact()
                    .with_ansi(config.ansi)
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
    };

    // Already initialised (tests, or a second call)
    let _ = result;
}

/// Span every log line of a worker process is recorded under
pub fn worker_span(role: &str, kind: &str) -> Span {
    tracing::info_span!("worker", role, kind, pid = std::process::id())
}
