#![cfg(feature = "cli")]

use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

fn nodel() -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_nodel"));
    command.arg("--log-level").arg("error").arg("--format").arg("json");
    command
}

struct HostProcess {
    child: Child,
    stdout: BufReader<ChildStdout>,
    address: String,
}

impl HostProcess {
    fn start(extra: &[&str]) -> Self {
        let mut child = nodel()
            .args(["host", "--bind", "127.0.0.1", "--node", "Lamp1"])
            .args(extra)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .expect("host command should start");
        let mut stdout = BufReader::new(child.stdout.take().expect("stdout is piped"));

        let mut first = String::new();
        stdout.read_line(&mut first).expect("host should print its address");
        let address = first
            .trim()
            .strip_prefix("listening on ")
            .unwrap_or_else(|| panic!("unexpected first line: {first:?}"))
            .to_string();

        Self {
            child,
            stdout,
            address,
        }
    }

    fn peer(&self) -> String {
        format!("Lamp1={}", self.address)
    }

    fn next_line(&mut self) -> String {
        let mut line = String::new();
        self.stdout.read_line(&mut line).expect("host should print a record");
        line
    }
}

impl Drop for HostProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

#[test]
fn version_prints_package_version() {
    let output = nodel().arg("version").output().expect("version should run");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.trim(), format!("nodel {}", env!("CARGO_PKG_VERSION")));
}

#[test]
fn host_without_points_is_a_usage_error() {
    let output = nodel()
        .args(["host", "--node", "Lamp1"])
        .output()
        .expect("host should run");
    assert_eq!(output.status.code(), Some(64));
}

#[test]
fn call_reaches_hosted_action() {
    let mut host = HostProcess::start(&["--action", "TurnOn"]);

    let output = nodel()
        .args(["call", "Lamp1.TurnOn", "--arg", "true", "--timeout", "10s"])
        .args(["--peer", &host.peer()])
        .output()
        .expect("call should run");
    assert!(
        output.status.success(),
        "call failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    let record: serde_json::Value =
        serde_json::from_str(stdout.trim()).expect("call prints one JSON record");
    assert_eq!(record["action"], "TurnOn");

    let line = host.next_line();
    let invoked: serde_json::Value =
        serde_json::from_str(line.trim()).expect("host prints one JSON record per invocation");
    assert_eq!(invoked["kind"], "action");
    assert_eq!(invoked["node"], "Lamp1");
    assert_eq!(invoked["point"], "TurnOn");
    assert_eq!(invoked["arg"], true);
}

#[test]
fn call_to_unknown_node_times_out() {
    let output = nodel()
        .args(["call", "Ghost.Vanish", "--timeout", "300ms"])
        .output()
        .expect("call should run");
    assert_eq!(output.status.code(), Some(124));
    assert!(String::from_utf8_lossy(&output.stderr).contains("not wired"));
}

#[test]
fn watch_prints_emitted_events() {
    let mut host = HostProcess::start(&["--event", "Status", "--emit-stdin"]);

    let mut watch = nodel()
        .args(["watch", "Lamp1.Status", "--count", "1"])
        .args(["--peer", &host.peer()])
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("watch should start");

    // Emit until the watcher is wired and exits after its first event.
    let stdin = host.child.stdin.as_mut().expect("stdin is piped");
    let deadline = Instant::now() + Duration::from_secs(10);
    let status = loop {
        if let Some(status) = watch.try_wait().expect("watch should be waitable") {
            break status;
        }
        assert!(Instant::now() < deadline, "watch did not receive an event");
        stdin
            .write_all(b"Status {\"on\":true}\n")
            .expect("host stdin should accept lines");
        stdin.flush().expect("flush");
        thread::sleep(Duration::from_millis(200));
    };
    assert!(status.success());

    let mut stdout = String::new();
    BufReader::new(watch.stdout.take().expect("stdout is piped"))
        .read_line(&mut stdout)
        .expect("watch output");
    let record: serde_json::Value =
        serde_json::from_str(stdout.trim()).expect("watch prints JSON records");
    assert_eq!(record["kind"], "event");
    assert_eq!(record["point"], "Status");
    assert_eq!(record["arg"]["on"], true);
}
