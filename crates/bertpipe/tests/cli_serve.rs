#![cfg(all(unix, feature = "cli"))]

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use bertpipe_protocol::{CallTarget, Client, Variable};

fn unique_temp_dir(tag: &str) -> PathBuf {
    let dir = PathBuf::from(format!(
        "/tmp/bertcli-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir
}

fn wait_for_client(path: &Path, timeout: Duration) -> Client {
    let start = Instant::now();
    loop {
        if let Ok(client) = Client::connect(path) {
            return client;
        }
        if start.elapsed() >= timeout {
            panic!("connect timeout");
        }
        thread::sleep(Duration::from_millis(25));
    }
}

fn spawn_serve(path: &Path) -> Child {
    Command::new(env!("CARGO_BIN_EXE_bertpipe"))
        .args(["--log-level", "error", "serve", "--program", "sh"])
        .args(["--eval-flag", "-c", "--prompt", "$ "])
        .arg("--pipe")
        .arg(path)
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .expect("serve should start")
}

fn bertpipe(path: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_bertpipe"))
        .args(["--log-level", "error", "--format", "json"])
        .args(args)
        .arg("--pipe")
        .arg(path)
        .arg("--timeout")
        .arg("5s")
        .output()
        .expect("bertpipe should run")
}

fn wait_for_exit(child: &mut Child, timeout: Duration) -> Option<i32> {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if let Some(status) = child.try_wait().expect("child status should be readable") {
            return status.code();
        }
        thread::sleep(Duration::from_millis(25));
    }
    None
}

#[test]
fn serve_answers_calls_and_stops_on_shutdown() {
    let dir = unique_temp_dir("serve");
    let sock_path = dir.join("ctl.sock");
    let mut child = spawn_serve(&sock_path);

    let mut client = wait_for_client(&sock_path, Duration::from_secs(5));
    let reply = client
        .call(CallTarget::System, "get-language", vec![])
        .expect("get-language should answer");
    assert_eq!(reply.result_value(), Some(&Variable::from("Julia")));
    drop(client);

    let output = bertpipe(&sock_path, &["call", "--system", "get-language"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("\"kind\":\"result\""));
    assert!(stdout.contains("\"str\":\"Julia\""));

    let output = bertpipe(&sock_path, &["exec", "exit 0"]);
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("\"boolean\":true"));

    let output = bertpipe(&sock_path, &["control", "shutdown"]);
    assert!(output.status.success());

    assert_eq!(wait_for_exit(&mut child, Duration::from_secs(5)), Some(0));
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn serve_without_pipe_name_is_a_usage_error() {
    let output = Command::new(env!("CARGO_BIN_EXE_bertpipe"))
        .args(["--log-level", "error", "serve"])
        .env_remove("BERTPIPE_PIPE")
        .output()
        .expect("serve should run");

    assert_eq!(output.status.code(), Some(64));
    assert!(String::from_utf8_lossy(&output.stderr).contains("no pipe name"));
}

#[test]
fn call_against_missing_pipe_fails() {
    let missing = PathBuf::from(format!(
        "/tmp/bertcli-missing-{}-{}.sock",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));

    let output = bertpipe(&missing, &["call", "--system", "get-language"]);
    assert_eq!(output.status.code(), Some(1));
}
