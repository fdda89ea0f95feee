//! Server subsystems and the composition point that wires them into the
//! supervisor.
//!
//! Adding a subsystem means giving it a `role()` descriptor and a
//! `create_process` entry point, then registering it in [`registry`].

pub mod message;
pub mod stream;

use crate::config::WardenConfig;
use crate::context::{ApplicationContext, ParentHandle};
use crate::error::Result;
use crate::process::{Launcher, ProcessRegistry};
use crate::supervisor::{SpawnReport, Supervisor};
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{info, warn};

/// Every worker role, in spawn order
pub fn registry() -> Result<ProcessRegistry> {
    let mut registry = ProcessRegistry::new();
    registry.register(stream::role())?;
    registry.register(message::role())?;
    Ok(registry)
}

/// Register all roles and start one process for each.
///
/// Registry errors are fatal; per-role spawn failures are in the report.
pub fn create_processes(
    config: &WardenConfig,
    application: ApplicationContext,
) -> Result<(Supervisor, SpawnReport)> {
    let registry = registry()?;
    let launcher = Launcher::from_config(config, &registry)?;
    let mut supervisor = Supervisor::new(registry, launcher, config)?;
    let report = supervisor.spawn_all(application);
    Ok((supervisor, report))
}

/// Drive a worker's accept loop on its own runtime until it is told to stop.
///
/// Stops on SIGTERM, SIGINT or when the master disappears. SIGHUP and
/// SIGUSR1 are acknowledged and otherwise ignored so a broadcast never
/// kills a worker.
fn run_worker<F, Fut>(parent: &ParentHandle, addr: SocketAddr, serve: F) -> Result<()>
where
    F: FnOnce(TcpListener) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let listener = TcpListener::bind(addr).await?;
        info!(role = parent.role(), kind = %parent.kind(), %addr, "Worker listening");

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sighup = signal(SignalKind::hangup())?;
        let mut sigusr1 = signal(SignalKind::user_defined1())?;

        let serve = serve(listener);
        let orphaned = watch_parent(parent.clone());
        tokio::pin!(serve, orphaned);

        loop {
            tokio::select! {
                result = &mut serve => return result,
                _ = sigterm.recv() => break,
                _ = sigint.recv() => break,
                _ = sighup.recv() => info!(role = parent.role(), "Reload requested"),
                _ = sigusr1.recv() => info!(role = parent.role(), "Log reopen requested"),
                _ = &mut orphaned => {
                    warn!(role = parent.role(), master = parent.pid(), "Master is gone");
                    break;
                }
            }
        }

        info!(role = parent.role(), "Worker stopping");
        Ok(())
    })
}

/// Resolves once the master process has exited
async fn watch_parent(parent: ParentHandle) {
    let mut interval = tokio::time::interval(Duration::from_secs(1));
    loop {
        interval.tick().await;
        if !parent.is_alive() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::WorkerKind;

    #[test]
    fn test_registry_spawns_stream_before_message() {
        let registry = registry().unwrap();
        let roles: Vec<(&str, WorkerKind)> = registry
            .all_roles()
            .iter()
            .map(|r| (r.name(), r.kind()))
            .collect();

        assert_eq!(
            roles,
            vec![
                (stream::ROLE_NAME, WorkerKind::Stream),
                (message::ROLE_NAME, WorkerKind::Message)
            ]
        );
    }
}
