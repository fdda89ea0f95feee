// End-to-end runs of the warden binary

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::fs;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::sleep;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use warden::config::ApplicationSettings;
use warden::context::ApplicationContext;
use warden::process::WorkerKind;

const WARDEN: &str = env!("CARGO_BIN_EXE_warden");

fn wait_with_timeout(child: &mut Child, limit: Duration) -> Option<ExitStatus> {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if let Some(status) = child.try_wait().unwrap() {
            return Some(status);
        }
        sleep(Duration::from_millis(50));
    }
    None
}

fn wait_for_file(path: &Path, limit: Duration) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if path.exists() {
            return true;
        }
        sleep(Duration::from_millis(50));
    }
    false
}

/// An address nothing is listening on right now
fn free_addr() -> SocketAddr {
    TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap()
}

fn connect_with_retry(addr: SocketAddr, limit: Duration) -> TcpStream {
    let deadline = Instant::now() + limit;
    loop {
        match TcpStream::connect(addr) {
            Ok(stream) => return stream,
            Err(e) if Instant::now() >= deadline => panic!("worker never listened on {}: {}", addr, e),
            Err(_) => sleep(Duration::from_millis(50)),
        }
    }
}

/// Start `warden worker stream` the way the master would, claiming
/// `parent_pid` as its master
fn spawn_stream_worker(addr: SocketAddr, parent_pid: u32) -> Child {
    let settings = ApplicationSettings {
        stream_listen: addr,
        message_listen: free_addr(),
        ..Default::default()
    };
    let context = ApplicationContext::from_settings(&settings);
    let env = context
        .worker_env("stream", WorkerKind::Stream, parent_pid)
        .unwrap();

    Command::new(WARDEN)
        .args(["worker", "stream"])
        .envs(env)
        .env("WARDEN_LOG", "info")
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap()
}

fn stderr_of(child: &mut Child) -> String {
    let mut stderr = String::new();
    child
        .stderr
        .take()
        .unwrap()
        .read_to_string(&mut stderr)
        .unwrap();
    stderr
}

#[test]
fn test_stream_worker_serves_and_exits_cleanly_on_sigterm() {
    let addr = free_addr();
    let mut worker = spawn_stream_worker(addr, std::process::id());

    let mut client = connect_with_retry(addr, Duration::from_secs(10));
    client.write_all(b"hello worker").unwrap();
    client.shutdown(std::net::Shutdown::Write).unwrap();
    let mut echoed = Vec::new();
    client.read_to_end(&mut echoed).unwrap();
    assert_eq!(echoed, b"hello worker");

    // signal handlers are installed right after the bind
    sleep(Duration::from_millis(200));
    kill(Pid::from_raw(worker.id() as i32), Signal::SIGTERM).unwrap();

    let status = wait_with_timeout(&mut worker, Duration::from_secs(10)).unwrap_or_else(|| {
        let _ = worker.kill();
        panic!("worker ignored SIGTERM");
    });
    assert!(status.success());
    assert!(stderr_of(&mut worker).contains("Worker stopping"));
}

#[test]
fn test_stream_worker_exits_when_master_is_gone() {
    // any pid other than our own stands in for a master that has died
    let addr = free_addr();
    let mut worker = spawn_stream_worker(addr, std::process::id() + 1);

    let status = wait_with_timeout(&mut worker, Duration::from_secs(10)).unwrap_or_else(|| {
        let _ = worker.kill();
        panic!("orphaned worker kept running");
    });
    assert!(status.success());
    assert!(stderr_of(&mut worker).contains("Master is gone"));
}

#[test]
fn test_roles_lists_every_subsystem() {
    let output = Command::new(WARDEN).arg("roles").output().unwrap();
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stream = stdout.find("stream").unwrap();
    let message = stdout.find("message").unwrap();
    assert!(stream < message);
}

#[test]
fn test_worker_with_unknown_role_fails() {
    let output = Command::new(WARDEN)
        .args(["worker", "bogus"])
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("bogus"));
}

#[test]
fn test_master_runs_workers_and_stops_on_sigterm() {
    let dir = TempDir::new().unwrap();
    let config_path = dir.path().join("warden.toml");
    let pid_path = dir.path().join("warden.pid");
    fs::write(
        &config_path,
        r#"
[supervisor]
shutdown_timeout_secs = 5

[application]
stream_listen = "127.0.0.1:0"
message_listen = "127.0.0.1:0"
"#,
    )
    .unwrap();

    let mut master = Command::new(WARDEN)
        .arg("--config")
        .arg(&config_path)
        .arg("run")
        .arg("--pid-file")
        .arg(&pid_path)
        .env("WARDEN_LOG", "warn")
        .stdout(Stdio::piped())
        .spawn()
        .unwrap();

    assert!(wait_for_file(&pid_path, Duration::from_secs(10)));
    let recorded: u32 = fs::read_to_string(&pid_path).unwrap().trim().parse().unwrap();
    assert_eq!(recorded, master.id());

    // give the workers time to bind and the master time to install handlers
    sleep(Duration::from_secs(1));

    // a second master refuses the same pid file
    let rival = Command::new(WARDEN)
        .arg("--config")
        .arg(&config_path)
        .arg("run")
        .arg("--pid-file")
        .arg(&pid_path)
        .output()
        .unwrap();
    assert!(!rival.status.success());
    assert!(String::from_utf8_lossy(&rival.stderr).contains("already running"));

    kill(Pid::from_raw(master.id() as i32), Signal::SIGTERM).unwrap();

    let status = wait_with_timeout(&mut master, Duration::from_secs(15)).unwrap_or_else(|| {
        let _ = master.kill();
        panic!("master did not stop");
    });
    assert!(status.success());
    assert!(!pid_path.exists());

    // both built-in workers ran until asked to stop, then exited on their own
    let mut stdout = String::new();
    master
        .stdout
        .take()
        .unwrap()
        .read_to_string(&mut stdout)
        .unwrap();
    assert_eq!(stdout.matches("exit code 0").count(), 2, "{}", stdout);
    assert!(!stdout.contains("crash loop"));
    assert!(stdout.contains("Shutdown finished"));
}
