// Integration tests driving real child processes through the public API

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;
use warden::config::WardenConfig;
use warden::context::ApplicationContext;
use warden::error::WardenError;
use warden::process::{ExitReason, Launcher, ProcessRegistry, ProcessState, WorkerKind, WorkerRole};
use warden::supervisor::{Supervisor, SupervisorEvent};

fn sh(script: &str) -> Vec<String> {
    vec!["/bin/sh".to_string(), "-c".to_string(), script.to_string()]
}

fn two_role_registry() -> ProcessRegistry {
    let mut registry = ProcessRegistry::new();
    registry
        .register(WorkerRole::new("stream", WorkerKind::Stream, |_, _| Ok(())))
        .unwrap();
    registry
        .register(WorkerRole::new("message", WorkerKind::Message, |_, _| Ok(())))
        .unwrap();
    registry
}

fn fast_restarts() -> WardenConfig {
    let mut config = WardenConfig::default();
    config.supervisor.restart_delay_ms = 50;
    config.supervisor.max_restart_delay_ms = 200;
    config
}

async fn wait_for<F>(events: &mut UnboundedReceiver<SupervisorEvent>, mut pred: F) -> SupervisorEvent
where
    F: FnMut(&SupervisorEvent) -> bool,
{
    timeout(Duration::from_secs(10), async {
        loop {
            let event = events.recv().await.expect("supervisor dropped its events");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for supervisor event")
}

#[tokio::test]
async fn test_crashed_stream_restarts_without_touching_message() {
    let launcher = Launcher::with_program("/bin/false")
        .with_command("stream", sh("trap 'exit 1' USR1; while true; do sleep 0.1; done"))
        .with_command("message", sh("exec sleep 30"));

    let mut supervisor = Supervisor::new(two_role_registry(), launcher, &fast_restarts()).unwrap();
    let mut events = supervisor.subscribe();

    let report = supervisor.spawn_all(ApplicationContext::default());
    assert!(report.is_complete());
    let stream_pid = supervisor.get("stream").unwrap().pid.unwrap();
    let message_pid = supervisor.get("message").unwrap().pid.unwrap();

    let handle = supervisor.handle();
    let run = tokio::spawn(async move { supervisor.run().await });

    // let the shell install its trap
    tokio::time::sleep(Duration::from_millis(300)).await;
    kill(Pid::from_raw(stream_pid as i32), Signal::SIGUSR1).unwrap();

    let exited = wait_for(&mut events, |e| matches!(e, SupervisorEvent::Exited { .. })).await;
    assert_eq!(
        exited,
        SupervisorEvent::Exited {
            role: "stream".to_string(),
            pid: Some(stream_pid),
            reason: ExitReason::Exited { code: 1 },
        }
    );

    let scheduled = wait_for(&mut events, |e| {
        matches!(e, SupervisorEvent::RestartScheduled { .. })
    })
    .await;
    assert!(matches!(
        scheduled,
        SupervisorEvent::RestartScheduled { ref role, restart_count: 1, .. } if role == "stream"
    ));

    let respawned = wait_for(&mut events, |e| matches!(e, SupervisorEvent::Spawned { .. })).await;
    assert_eq!(respawned.role(), "stream");

    let status = handle.status().await.unwrap();
    let stream = status.iter().find(|s| s.name == "stream").unwrap();
    assert_eq!(stream.state, ProcessState::Running);
    assert_eq!(stream.restart_count, 1);
    assert_ne!(stream.pid, Some(stream_pid));

    let message = status.iter().find(|s| s.name == "message").unwrap();
    assert_eq!(message.pid, Some(message_pid));
    assert_eq!(message.restart_count, 0);

    let shutdown = handle.shutdown(Some(Duration::from_secs(5))).await.unwrap();
    assert!(shutdown.is_clean());
    assert!(shutdown.elapsed < Duration::from_secs(5));
    assert_eq!(shutdown.get("stream").unwrap().restart_count, 1);

    timeout(Duration::from_secs(5), run).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_shutdown_is_bounded_when_a_worker_ignores_sigterm() {
    let launcher = Launcher::with_program("/bin/false")
        .with_command("stream", sh("trap '' TERM; while true; do sleep 0.1; done"))
        .with_command("message", sh("exec sleep 30"));

    let mut supervisor = Supervisor::new(two_role_registry(), launcher, &fast_restarts()).unwrap();
    supervisor.spawn_all(ApplicationContext::default());
    tokio::time::sleep(Duration::from_millis(300)).await;

    let grace = Duration::from_millis(500);
    let report = timeout(Duration::from_secs(5), supervisor.shutdown_all(grace))
        .await
        .expect("shutdown did not finish");

    assert!(!report.is_clean());
    let stream = report.get("stream").unwrap();
    assert!(stream.timed_out);
    assert_eq!(stream.reason, Some(ExitReason::ForceKilled));
    assert!(!report.get("message").unwrap().timed_out);
    assert_eq!(supervisor.live_handles().count(), 0);
}

#[tokio::test]
async fn test_role_without_autorestart_stays_down() {
    let mut config = fast_restarts();
    config.kinds.insert(
        "message".to_string(),
        warden::config::RoleOverrides {
            autorestart: Some(false),
            ..Default::default()
        },
    );

    let launcher = Launcher::with_program("/bin/false")
        .with_command("stream", sh("exec sleep 30"))
        .with_command("message", sh("exit 2"));

    let mut supervisor = Supervisor::new(two_role_registry(), launcher, &config).unwrap();
    let mut events = supervisor.subscribe();
    supervisor.spawn_all(ApplicationContext::default());
    let handle = supervisor.handle();
    let run = tokio::spawn(async move { supervisor.run().await });

    wait_for(&mut events, |e| {
        matches!(e, SupervisorEvent::Exited { role, .. } if role == "message")
    })
    .await;

    // long enough for a restart to have happened if one were scheduled
    tokio::time::sleep(Duration::from_millis(400)).await;

    let status = handle.status().await.unwrap();
    let message = status.iter().find(|s| s.name == "message").unwrap();
    assert_eq!(message.state, ProcessState::Exited);
    assert_eq!(message.restart_count, 0);
    assert_eq!(message.last_exit, Some(ExitReason::Exited { code: 2 }));

    handle.shutdown(Some(Duration::from_secs(5))).await.unwrap();
    run.await.unwrap();
}

#[test]
fn test_duplicate_role_rejected() {
    let mut registry = two_role_registry();
    let err = registry
        .register(WorkerRole::new("stream", WorkerKind::Message, |_, _| Ok(())))
        .unwrap_err();

    assert!(matches!(err, WardenError::DuplicateRole(ref name) if name == "stream"));
    assert!(err.is_fatal());
    assert_eq!(registry.len(), 2);
}
