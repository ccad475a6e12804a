//! End-to-end tests driving the reference echo plugin binary.

use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use rstest::{fixture, rstest};
use serde_json::json;
use stepworker_plugin_sdk::{ClientError, PluginClient, READY_SUFFIX, RpcError};

struct Plugin {
    child: Child,
    endpoint: PathBuf,
}

impl Drop for Plugin {
    fn drop(&mut self) {
        if matches!(self.child.try_wait(), Ok(None)) {
            self.child.kill().ok();
            self.child.wait().ok();
        }
    }
}

#[fixture]
fn plugin() -> Plugin {
    let mut child = Command::new(env!("CARGO_BIN_EXE_stepworker-echo-plugin"))
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn echo plugin");
    let stdout = child.stdout.take().expect("stdout");
    let mut line = String::new();
    BufReader::new(stdout)
        .read_line(&mut line)
        .expect("readiness line");
    let endpoint = line
        .strip_suffix(READY_SUFFIX)
        .map(PathBuf::from)
        .expect("readiness marker");
    Plugin { child, endpoint }
}

#[rstest]
fn announces_an_absolute_endpoint(plugin: Plugin) {
    assert!(plugin.endpoint.is_absolute());
    assert!(plugin.endpoint.exists());
}

#[rstest]
fn answers_declared_operations(plugin: Plugin) {
    let mut client = PluginClient::connect(&plugin.endpoint).expect("connect");
    assert_eq!(
        client.call("echo", json!({"text": "hi"})).expect("echo"),
        json!({"text": "hi"})
    );
    assert_eq!(
        client.call("upper", json!({"text": "hi"})).expect("upper"),
        json!("HI")
    );

    let descriptor = client.describe().expect("describe");
    assert_eq!(descriptor.operations(), ["echo", "upper"]);
    let info = client.info().expect("info");
    assert!(info.contains("* **text**: Text to upper-case."));
    assert!(info.contains("/echo/README.md"));
}

#[rstest]
fn rejects_bad_parameters(plugin: Plugin) {
    let mut client = PluginClient::connect(&plugin.endpoint).expect("connect");
    let error = client.call("upper", json!({})).expect_err("missing text");
    assert!(matches!(
        error,
        ClientError::Remote { ref source, .. } if source.code() == RpcError::INVALID_PARAMS
    ));
}

#[rstest]
fn terminates_and_removes_endpoint_on_sigterm(mut plugin: Plugin) {
    let pid = i32::try_from(plugin.child.id()).expect("pid");
    let status = Command::new("kill")
        .args(["-TERM", &pid.to_string()])
        .status()
        .expect("send SIGTERM");
    assert!(status.success());

    let deadline = Instant::now() + Duration::from_secs(5);
    let exit = loop {
        if let Some(exit) = plugin.child.try_wait().expect("try_wait") {
            break exit;
        }
        assert!(Instant::now() < deadline, "plugin did not exit");
        thread::sleep(Duration::from_millis(20));
    };
    assert!(exit.success());
    assert!(!plugin.endpoint.exists());
}
