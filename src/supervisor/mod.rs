// Supervisor - spawns one process per worker role, restarts crashed roles
// and shuts everything down on request.

mod events;
mod report;
pub mod signals;

pub use events::SupervisorEvent;
pub use report::{RoleExit, ShutdownReport, SpawnReport};

use crate::config::WardenConfig;
use crate::context::ApplicationContext;
use crate::error::{Result, WardenError};
use crate::process::signal::{parse_signal, send_signal};
use crate::process::{
    ExitReason, Launcher, ProcessHandle, ProcessRegistry, ProcessState, ProcessStatus,
    RestartDecision, RestartPolicy,
};
use nix::sys::signal::Signal;
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

/// How long a SIGKILLed worker gets to be reaped before it is written off
const KILL_GRACE: Duration = Duration::from_secs(2);

/// Posted by a child's waiter task when the process terminates
#[derive(Debug)]
struct ExitNotice {
    slot: usize,
    spawn_id: u64,
    status: std::io::Result<ExitStatus>,
}

enum Control {
    Shutdown {
        timeout: Option<Duration>,
        reply: oneshot::Sender<ShutdownReport>,
    },
    Status {
        reply: oneshot::Sender<Vec<ProcessStatus>>,
    },
    Broadcast {
        signal: Signal,
        reply: oneshot::Sender<usize>,
    },
}

/// Stop behaviour resolved for one role at construction time
#[derive(Debug, Clone)]
struct RolePlan {
    policy: RestartPolicy,
    stop_signal: Signal,
    stop_timeout: Option<Duration>,
}

/// Cloneable remote control for a supervisor running [`Supervisor::run`]
#[derive(Clone)]
pub struct SupervisorHandle {
    tx: mpsc::UnboundedSender<Control>,
}

impl SupervisorHandle {
    /// Ask the supervisor to stop every worker and leave its loop.
    ///
    /// `None` uses the configured shutdown timeout.
    pub async fn shutdown(&self, timeout: Option<Duration>) -> Result<ShutdownReport> {
        let (reply, rx) = oneshot::channel();
        self.send(Control::Shutdown { timeout, reply })?;
        rx.await.map_err(|_| WardenError::SupervisorGone)
    }

    pub async fn status(&self) -> Result<Vec<ProcessStatus>> {
        let (reply, rx) = oneshot::channel();
        self.send(Control::Status { reply })?;
        rx.await.map_err(|_| WardenError::SupervisorGone)
    }

    /// Deliver `signal` to every running worker; returns how many got it
    pub async fn broadcast(&self, signal: Signal) -> Result<usize> {
        let (reply, rx) = oneshot::channel();
        self.send(Control::Broadcast { signal, reply })?;
        rx.await.map_err(|_| WardenError::SupervisorGone)
    }

    fn send(&self, control: Control) -> Result<()> {
        self.tx.send(control).map_err(|_| WardenError::SupervisorGone)
    }
}

/// Owns the role registry and every process handle.
///
/// All handle state is mutated from the task that owns the supervisor.
/// Child waiter tasks and [`SupervisorHandle`]s only post messages.
pub struct Supervisor {
    registry: ProcessRegistry,
    launcher: Launcher,
    plans: Vec<RolePlan>,
    shutdown_timeout: Duration,
    handles: Vec<ProcessHandle>,
    context: Option<ApplicationContext>,
    next_spawn_id: u64,
    exit_tx: mpsc::UnboundedSender<ExitNotice>,
    exit_rx: mpsc::UnboundedReceiver<ExitNotice>,
    control_tx: mpsc::UnboundedSender<Control>,
    control_rx: mpsc::UnboundedReceiver<Control>,
    events: Option<mpsc::UnboundedSender<SupervisorEvent>>,
}

impl Supervisor {
    /// Create a supervisor for `registry`, resolving each role's restart
    /// and stop settings from `config`
    pub fn new(registry: ProcessRegistry, launcher: Launcher, config: &WardenConfig) -> Result<Self> {
        let settings = &config.supervisor;
        let mut plans = Vec::with_capacity(registry.len());

        for role in registry.all_roles() {
            let overrides = config.overrides_for(role.name(), role.kind().as_str());
            let stop_signal = parse_signal(
                overrides
                    .stop_signal
                    .as_deref()
                    .unwrap_or(&settings.stop_signal),
            )?;

            plans.push(RolePlan {
                policy: RestartPolicy::from_settings(settings, &overrides),
                stop_signal,
                stop_timeout: overrides.stop_timeout_secs.map(Duration::from_secs),
            });
        }

        let (exit_tx, exit_rx) = mpsc::unbounded_channel();
        let (control_tx, control_rx) = mpsc::unbounded_channel();

        Ok(Self {
            registry,
            launcher,
            plans,
            shutdown_timeout: settings.shutdown_timeout(),
            handles: Vec::new(),
            context: None,
            next_spawn_id: 0,
            exit_tx,
            exit_rx,
            control_tx,
            control_rx,
            events: None,
        })
    }

    pub fn handle(&self) -> SupervisorHandle {
        SupervisorHandle {
            tx: self.control_tx.clone(),
        }
    }

    /// Receive lifecycle events from now on. Replaces any earlier subscriber.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<SupervisorEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.events = Some(tx);
        rx
    }

    pub fn registry(&self) -> &ProcessRegistry {
        &self.registry
    }

    /// Every role's handle in registration order, exited ones included
    pub fn handles(&self) -> &[ProcessHandle] {
        &self.handles
    }

    pub fn live_handles(&self) -> impl Iterator<Item = &ProcessHandle> {
        self.handles.iter().filter(|h| h.is_live())
    }

    pub fn get(&self, name: &str) -> Option<&ProcessHandle> {
        self.handles.iter().find(|h| h.name() == name)
    }

    pub fn status(&self) -> Vec<ProcessStatus> {
        self.handles.iter().map(ProcessHandle::status).collect()
    }

    /// Spawn one process per registered role, in registration order.
    ///
    /// A role that fails to start is left `Exited` with `SpawnFailed` and
    /// reported; the remaining roles are still attempted. Calling this again
    /// only spawns roles that are not live, restart counters are kept.
    pub fn spawn_all(&mut self, context: ApplicationContext) -> SpawnReport {
        if self.handles.is_empty() {
            self.handles = self
                .registry
                .all_roles()
                .iter()
                .zip(&self.plans)
                .map(|(role, plan)| {
                    ProcessHandle::new(
                        Arc::clone(role),
                        plan.policy.clone(),
                        plan.stop_signal,
                        plan.stop_timeout,
                    )
                })
                .collect();
        }

        info!(
            app = context.name(),
            roles = self.handles.len(),
            "Spawning worker processes"
        );

        let mut report = SpawnReport::default();

        for slot in 0..self.handles.len() {
            let handle = &self.handles[slot];
            if handle.disabled || (handle.is_live() && handle.pid.is_some()) {
                continue;
            }

            match self.spawn_slot(slot, &context) {
                Ok(pid) => report.spawned.push((self.handles[slot].name().to_string(), pid)),
                Err(e) => report.failures.push(e),
            }
        }

        self.context = Some(context);
        report
    }

    /// Launch the process for one slot and start its waiter task
    fn spawn_slot(&mut self, slot: usize, context: &ApplicationContext) -> Result<u32> {
        let role = Arc::clone(self.handles[slot].role());

        let spawned = match self.launcher.launch(&role, context) {
            Ok(spawned) => spawned,
            Err(e) => {
                error!(role = role.name(), kind = %role.kind(), "{}", e);
                self.handles[slot].record_exit(ExitReason::SpawnFailed(e.to_string()));
                self.emit(SupervisorEvent::SpawnFailed {
                    role: role.name().to_string(),
                    error: e.to_string(),
                });
                return Err(e);
            }
        };

        self.next_spawn_id += 1;
        let spawn_id = self.next_spawn_id;
        let pid = spawned.pid;

        let exit_tx = self.exit_tx.clone();
        let mut child = spawned.child;
        tokio::spawn(async move {
            let status = child.wait().await;
            let _ = exit_tx.send(ExitNotice {
                slot,
                spawn_id,
                status,
            });
        });

        let handle = &mut self.handles[slot];
        handle.begin(pid, spawn_id);
        // No readiness protocol: a successful spawn counts as running
        handle.mark_running();

        info!(
            role = role.name(),
            kind = %role.kind(),
            pid,
            restarts = handle.restart_count,
            "Worker started"
        );
        self.emit(SupervisorEvent::Spawned {
            role: role.name().to_string(),
            pid,
        });

        Ok(pid)
    }

    /// Run the monitoring loop until a shutdown request arrives.
    ///
    /// Returns the report of the shutdown that ended the loop.
    pub async fn run(&mut self) -> ShutdownReport {
        info!(
            workers = self.live_handles().count(),
            "Supervisor monitoring workers"
        );

        loop {
            let next_restart = self.next_restart_deadline();

            tokio::select! {
                Some(notice) = self.exit_rx.recv() => self.handle_exit(notice),
                Some(control) = self.control_rx.recv() => match control {
                    Control::Shutdown { timeout, reply } => {
                        let timeout = timeout.unwrap_or(self.shutdown_timeout);
                        let report = self.shutdown_all(timeout).await;
                        let _ = reply.send(report.clone());
                        return report;
                    }
                    Control::Status { reply } => {
                        let _ = reply.send(self.status());
                    }
                    Control::Broadcast { signal, reply } => {
                        let _ = reply.send(self.broadcast(signal));
                    }
                },
                _ = sleep_until(next_restart) => self.respawn_due(),
            }
        }
    }

    /// Apply a termination notice to its handle
    fn handle_exit(&mut self, notice: ExitNotice) {
        let Some(handle) = self.handles.get_mut(notice.slot) else {
            return;
        };

        if handle.spawn_id != notice.spawn_id || handle.state == ProcessState::Exited {
            debug!(role = handle.name(), "Ignoring exit of a superseded process");
            return;
        }

        let reason = match notice.status {
            Ok(status) => ExitReason::from_status(status),
            Err(e) => ExitReason::Lost(e.to_string()),
        };

        let pid = handle.pid;
        let requested = handle.state == ProcessState::Stopping;
        let role = handle.name().to_string();

        // The old process may still hold its sockets; make sure it is gone
        // before anything replaces it
        if let (ExitReason::Lost(_), Some(pid)) = (&reason, pid) {
            warn!(role = %role, pid, "Lost track of worker ({}), killing it", reason);
            if let Err(e) = send_signal(pid, Signal::SIGKILL) {
                error!(role = %role, pid, "{}", e);
            }
        }

        handle.record_exit(reason.clone());

        if requested {
            info!(role = %role, pid, "Worker stopped ({})", reason);
        }

        self.emit(SupervisorEvent::Exited {
            role,
            pid,
            reason: reason.clone(),
        });

        // A stop we asked for is never answered with a restart
        if !requested {
            self.decide_restart(notice.slot, reason);
        }
    }

    /// Restart decision for an exit the supervisor did not request
    fn decide_restart(&mut self, slot: usize, reason: ExitReason) {
        let handle = &mut self.handles[slot];
        let decision = handle.policy.evaluate(&reason, &mut handle.restart_tracker);
        handle.restart_count = handle.restart_tracker.restart_count();
        let role = handle.name().to_string();

        match decision {
            RestartDecision::Stop => {
                if reason.is_clean() {
                    info!(role = %role, "Worker exited cleanly, not restarting");
                } else {
                    warn!(role = %role, "Worker exited ({}), autorestart disabled", reason);
                }
            }
            RestartDecision::Restart { delay } => {
                handle.restart_at = Some(Instant::now() + delay);
                warn!(
                    role = %role,
                    restarts = handle.restart_count,
                    "Worker crashed ({}), restarting in {:?}",
                    reason,
                    delay
                );
                let restart_count = handle.restart_count;
                self.emit(SupervisorEvent::RestartScheduled {
                    role,
                    restart_count,
                    delay,
                });
            }
            RestartDecision::CrashLoop { recent } => {
                handle.disabled = true;
                handle.restart_at = None;
                let err = WardenError::RoleCrashLoop {
                    role: role.clone(),
                    restarts: recent,
                    window: handle.policy.window,
                };
                error!(role = %role, "{}", err);
                self.emit(SupervisorEvent::CrashLoop {
                    role,
                    restarts: recent,
                });
            }
        }
    }

    fn next_restart_deadline(&self) -> Option<Instant> {
        self.handles
            .iter()
            .filter(|h| !h.disabled)
            .filter_map(|h| h.restart_at)
            .min()
    }

    /// Respawn every role whose backoff has elapsed
    fn respawn_due(&mut self) {
        let Some(context) = self.context.clone() else {
            return;
        };

        let now = Instant::now();
        let due: Vec<usize> = self
            .handles
            .iter()
            .enumerate()
            .filter(|(_, h)| !h.disabled && h.restart_at.map_or(false, |at| at <= now))
            .map(|(slot, _)| slot)
            .collect();

        for slot in due {
            self.handles[slot].restart_at = None;
            if self.spawn_slot(slot, &context).is_err() {
                // Counts against the restart budget like any other crash
                let reason = self.handles[slot]
                    .last_exit
                    .clone()
                    .unwrap_or_else(|| ExitReason::SpawnFailed("unknown".to_string()));
                self.decide_restart(slot, reason);
            }
        }
    }

    /// Send `signal` to every running worker
    pub fn broadcast(&self, signal: Signal) -> usize {
        let mut delivered = 0;

        for handle in &self.handles {
            let Some(pid) = handle.pid else { continue };
            if handle.state != ProcessState::Running {
                continue;
            }
            match send_signal(pid, signal) {
                Ok(true) => delivered += 1,
                Ok(false) => debug!(role = handle.name(), pid, "Worker already gone"),
                Err(e) => warn!(role = handle.name(), pid, "{}", e),
            }
        }

        info!(signal = %signal, delivered, "Broadcast signal to workers");
        delivered
    }

    /// Stop every worker, newest role first.
    ///
    /// Each role gets `timeout` (or its own `stop_timeout`) to exit after its
    /// stop signal, then is killed. Returns within roughly the largest grace
    /// period plus a short reaping allowance.
    pub async fn shutdown_all(&mut self, timeout: Duration) -> ShutdownReport {
        let started = Instant::now();
        let count = self.handles.len();
        let mut deadlines: Vec<Option<Instant>> = vec![None; count];
        let mut killed = vec![false; count];

        info!(
            workers = self.live_handles().count(),
            "Shutting down workers (timeout {:?})", timeout
        );

        for slot in (0..count).rev() {
            let handle = &mut self.handles[slot];
            handle.restart_at = None;

            if !matches!(handle.state, ProcessState::Starting | ProcessState::Running) {
                continue;
            }

            handle.mark_stopping();
            deadlines[slot] = Some(started + handle.stop_timeout.unwrap_or(timeout));

            if let Some(pid) = handle.pid {
                match send_signal(pid, handle.stop_signal) {
                    Ok(true) => {
                        debug!(role = handle.name(), pid, signal = %handle.stop_signal, "Stop requested")
                    }
                    Ok(false) => debug!(role = handle.name(), pid, "Worker already gone"),
                    Err(e) => warn!(role = handle.name(), pid, "{}", e),
                }
            }
        }

        while let Some(deadline) = self.next_stop_deadline(&deadlines) {
            tokio::select! {
                Some(notice) = self.exit_rx.recv() => self.handle_exit(notice),
                _ = tokio::time::sleep_until(deadline.into()) => {
                    self.escalate(&mut deadlines, &mut killed);
                }
            }
        }

        let exits = self
            .handles
            .iter_mut()
            .enumerate()
            .map(|(slot, handle)| {
                if killed[slot] {
                    handle.record_exit(ExitReason::ForceKilled);
                }
                RoleExit {
                    name: handle.name().to_string(),
                    kind: handle.kind(),
                    reason: handle.last_exit.clone(),
                    restart_count: handle.restart_count,
                    timed_out: killed[slot],
                    grace: handle.stop_timeout.unwrap_or(timeout),
                    disabled: handle.disabled,
                }
            })
            .collect();

        let report = ShutdownReport {
            exits,
            elapsed: started.elapsed(),
        };

        info!(elapsed = ?report.elapsed, "All workers stopped");
        report
    }

    fn next_stop_deadline(&self, deadlines: &[Option<Instant>]) -> Option<Instant> {
        self.handles
            .iter()
            .zip(deadlines)
            .filter(|(h, _)| h.state == ProcessState::Stopping)
            .filter_map(|(_, d)| *d)
            .min()
    }

    /// Kill workers past their grace period; write off killed ones that
    /// were never reaped
    fn escalate(&mut self, deadlines: &mut [Option<Instant>], killed: &mut [bool]) {
        let now = Instant::now();

        for slot in 0..self.handles.len() {
            let handle = &mut self.handles[slot];
            if handle.state != ProcessState::Stopping || deadlines[slot].map_or(true, |d| d > now) {
                continue;
            }

            if killed[slot] {
                error!(role = handle.name(), "Killed worker was never reaped");
                handle.record_exit(ExitReason::ForceKilled);
                continue;
            }

            let role = handle.name().to_string();
            if let Some(pid) = handle.pid {
                warn!(role = %role, pid, "Worker ignored stop request, killing");
                if let Err(e) = send_signal(pid, Signal::SIGKILL) {
                    error!(role = %role, pid, "{}", e);
                }
            }
            killed[slot] = true;
            deadlines[slot] = Some(now + KILL_GRACE);
            self.emit(SupervisorEvent::ShutdownTimeout { role });
        }
    }

    fn emit(&self, event: SupervisorEvent) {
        if let Some(ref tx) = self.events {
            let _ = tx.send(event);
        }
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        for handle in self.handles.iter().filter(|h| h.is_live()) {
            if let Some(pid) = handle.pid {
                let _ = send_signal(pid, Signal::SIGKILL);
            }
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline.into()).await,
        None => std::future::pending().await,
    }
}
