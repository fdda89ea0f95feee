// CLI module - entry point for both the master and its worker processes

mod output;

use crate::config::WardenConfig;
use crate::context::{ApplicationContext, ParentHandle};
use crate::daemon::{daemonize, PidFile};
use crate::error::{Result, WardenError};
use crate::logging::{self, LogConfig};
use crate::process::{ProcessRegistry, RestartPolicy};
use crate::servers;
use crate::supervisor::signals::forward_os_signals;
use clap::{Parser, Subcommand};
use output::RoleSummary;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Warden - supervises one process per server subsystem
#[derive(Debug, Parser)]
#[command(name = "warden")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Configuration file (.toml or .json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand, PartialEq)]
enum Commands {
    /// Start the master and its workers (default)
    Run {
        /// Detach from the terminal
        #[arg(short, long)]
        daemon: bool,

        /// Write the master pid here (overrides supervisor.pid_file)
        #[arg(long)]
        pid_file: Option<PathBuf>,
    },

    /// Show every worker role and its effective restart policy
    Roles,

    /// Run a single worker role; started by the master
    #[command(hide = true)]
    Worker {
        role: String,
    },
}

impl Cli {
    /// Run the CLI application
    pub fn run() -> Result<()> {
        let cli = Cli::parse();
        cli.execute()
    }

    fn execute(self) -> Result<()> {
        let command = self.command.unwrap_or(Commands::Run {
            daemon: false,
            pid_file: None,
        });

        match command {
            Commands::Worker { role } => run_worker(&role),
            Commands::Roles => {
                let config = load_config(self.config.as_deref())?;
                let registry = servers::registry()?;
                output::print_roles(&role_summaries(&config, &registry));
                Ok(())
            }
            Commands::Run { daemon, pid_file } => {
                let config = load_config(self.config.as_deref())?;
                run_master(config, daemon, pid_file)
            }
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<WardenConfig> {
    match path {
        Some(path) => WardenConfig::from_file(path),
        None => Ok(WardenConfig::default()),
    }
}

/// Effective per-role settings after applying role and kind overrides
fn role_summaries(config: &WardenConfig, registry: &ProcessRegistry) -> Vec<RoleSummary> {
    registry
        .roles()
        .map(|role| {
            let overrides = config.overrides_for(role.name(), role.kind().as_str());
            RoleSummary {
                name: role.name().to_string(),
                kind: role.kind(),
                policy: RestartPolicy::from_settings(&config.supervisor, &overrides),
                stop_signal: overrides
                    .stop_signal
                    .clone()
                    .unwrap_or_else(|| config.supervisor.stop_signal.clone()),
                stop_timeout: overrides
                    .stop_timeout_secs
                    .map(Duration::from_secs)
                    .unwrap_or_else(|| config.supervisor.shutdown_timeout()),
                command: overrides.command,
            }
        })
        .collect()
}

fn run_master(config: WardenConfig, daemon: bool, pid_file: Option<PathBuf>) -> Result<()> {
    let pid_file = pid_file
        .or_else(|| config.supervisor.pid_file.clone())
        .map(PidFile::with_path);

    // Refuse before detaching so the error still reaches the terminal
    if let Some(pid) = pid_file.as_ref().and_then(PidFile::running_pid) {
        return Err(WardenError::DaemonAlreadyRunning(pid));
    }

    if daemon {
        daemonize()?;
    }

    logging::init(LogConfig::new().with_ansi(!daemon).with_env_overrides());

    if let Some(ref pid_file) = pid_file {
        pid_file.acquire()?;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let result = runtime.block_on(supervise(&config));

    if let Some(ref pid_file) = pid_file {
        if let Err(e) = pid_file.remove() {
            warn!("{}", e);
        }
    }

    result
}

async fn supervise(config: &WardenConfig) -> Result<()> {
    let application = ApplicationContext::from_settings(&config.application);
    info!(
        name = application.name(),
        version = application.version(),
        pid = std::process::id(),
        "Warden master starting"
    );

    let (mut supervisor, report) = servers::create_processes(config, application)?;
    output::print_spawn_report(&report);
    if !report.is_complete() {
        output::print_info("Workers that failed to start stay down until the next run");
    }

    let signals = forward_os_signals(supervisor.handle())?;
    let shutdown = supervisor.run().await;
    signals.abort();

    output::print_shutdown_report(&shutdown);
    Ok(())
}

fn run_worker(role_name: &str) -> Result<()> {
    logging::init(LogConfig::new().with_env_overrides());

    let registry = servers::registry()?;
    let role = registry
        .get(role_name)
        .cloned()
        .ok_or_else(|| WardenError::UnknownRole(role_name.to_string()))?;

    let parent = ParentHandle::from_env()?;
    let application = ApplicationContext::from_env()?;

    let span = logging::worker_span(role.name(), role.kind().as_str());
    let _entered = span.enter();
    info!(master = parent.pid(), "Worker started");

    role.run(&parent, &application)
}
