// OS signal handling for the master process

use crate::error::Result;
use crate::supervisor::SupervisorHandle;
use nix::sys::signal::Signal;
use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Translate signals received by the master into supervisor commands.
///
/// SIGTERM, SIGINT and SIGQUIT request a graceful shutdown; SIGHUP and
/// SIGUSR1 are forwarded to every worker. The task ends once shutdown has
/// been requested.
pub fn forward_os_signals(handle: SupervisorHandle) -> Result<JoinHandle<()>> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigquit = signal(SignalKind::quit())?;
    let mut sighup = signal(SignalKind::hangup())?;
    let mut sigusr1 = signal(SignalKind::user_defined1())?;

    Ok(tokio::spawn(async move {
        loop {
            let forward = tokio::select! {
                _ = sigterm.recv() => None,
                _ = sigint.recv() => None,
                _ = sigquit.recv() => None,
                _ = sighup.recv() => Some(Signal::SIGHUP),
                _ = sigusr1.recv() => Some(Signal::SIGUSR1),
            };

            match forward {
                Some(sig) => {
                    info!(signal = %sig, "Forwarding signal to workers");
                    if let Err(e) = handle.broadcast(sig).await {
                        warn!("Failed to forward {}: {}", sig, e);
                        break;
                    }
                }
                None => {
                    info!("Received termination signal, shutting down");
                    if let Err(e) = handle.shutdown(None).await {
                        warn!("Shutdown request failed: {}", e);
                    }
                    break;
                }
            }
        }
    }))
}
