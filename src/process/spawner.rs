use crate::config::WardenConfig;
use crate::context::ApplicationContext;
use crate::error::{Result, WardenError};
use crate::process::registry::ProcessRegistry;
use crate::process::role::WorkerRole;
use std::collections::HashMap;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::{Child, Command};

/// Hidden subcommand the master passes to itself to run a role
pub const WORKER_SUBCOMMAND: &str = "worker";

/// Metadata returned when spawning a process
#[derive(Debug)]
pub struct SpawnedProcess {
    /// The child process handle
    pub child: Child,

    /// Process ID assigned by the OS
    pub pid: u32,
}

/// Creates the OS process for a worker role.
///
/// By default the master binary re-executes itself as
/// `<program> worker <role>` and the child dispatches to the role's entry
/// point. Roles with a configured command run that program instead.
#[derive(Debug, Clone)]
pub struct Launcher {
    program: PathBuf,
    commands: HashMap<String, Vec<String>>,
}

impl Launcher {
    /// Launcher that re-executes the running binary
    pub fn current_exe() -> Result<Self> {
        let program = std::env::current_exe().map_err(|e| {
            WardenError::ConfigError(format!("Cannot locate the running executable: {}", e))
        })?;
        Ok(Self::with_program(program))
    }

    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            commands: HashMap::new(),
        }
    }

    /// Run `command` (program followed by its arguments) for `role`
    pub fn with_command(mut self, role: impl Into<String>, command: Vec<String>) -> Self {
        self.commands.insert(role.into(), command);
        self
    }

    /// Re-executing launcher with every command override the config declares
    pub fn from_config(config: &WardenConfig, registry: &ProcessRegistry) -> Result<Self> {
        let mut launcher = Self::current_exe()?;
        for role in registry.all_roles() {
            let overrides = config.overrides_for(role.name(), role.kind().as_str());
            if let Some(command) = overrides.command {
                launcher = launcher.with_command(role.name(), command);
            }
        }
        Ok(launcher)
    }

    /// Program and arguments used for `role`
    pub fn command_for(&self, role: &str) -> (OsString, Vec<OsString>) {
        match self.commands.get(role).and_then(|c| c.split_first()) {
            Some((program, args)) => (
                OsString::from(program),
                args.iter().map(OsString::from).collect(),
            ),
            None => (
                self.program.clone().into_os_string(),
                vec![OsString::from(WORKER_SUBCOMMAND), OsString::from(role)],
            ),
        }
    }

    /// Spawn a process for `role`.
    ///
    /// The child gets the application context through its environment, no
    /// stdin, the master's stdout/stderr, and a process group of its own so
    /// terminal signals reach only the master.
    pub fn launch(&self, role: &WorkerRole, context: &ApplicationContext) -> Result<SpawnedProcess> {
        let (program, args) = self.command_for(role.name());
        let env = context.worker_env(role.name(), role.kind(), std::process::id())?;

        let mut command = Command::new(&program);
        command
            .args(&args)
            .envs(env)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .process_group(0);

        let child = command.spawn().map_err(|e| WardenError::SpawnFailure {
            role: role.name().to_string(),
            reason: format!("{}: {}", program.to_string_lossy(), e),
        })?;

        let pid = child.id().ok_or_else(|| WardenError::SpawnFailure {
            role: role.name().to_string(),
            reason: "process exited before its pid could be read".to_string(),
        })?;

        Ok(SpawnedProcess { child, pid })
    }
}
