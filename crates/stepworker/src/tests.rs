//! Unit tests for the worker CLI runtime.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use clap::Parser;
use rstest::{fixture, rstest};
use serde_json::{Value, json};
use stepworker_plugin_sdk::{
    JobContext, PluginServer, PluginService, RpcError, ServeError, ServerSettings,
    ServiceDescriptor,
};
use stepworker_plugins::Platform;
use tempfile::TempDir;

use crate::cli::{Cli, CliCommand, RunPluginArgs};
use crate::run_with_context;

struct Reflect;

impl PluginService for Reflect {
    fn descriptor(&self) -> ServiceDescriptor {
        ServiceDescriptor::new("reflect", ["echo"])
    }

    fn call(&self, _method: &str, params: Value) -> Result<Value, RpcError> {
        Ok(params)
    }
}

/// A staged script plugin announcing an in-process server.
struct Staged {
    base_dir: TempDir,
    _socket_dir: TempDir,
    ctx: JobContext,
    server: Option<JoinHandle<Result<(), ServeError>>>,
}

impl Staged {
    fn descriptors(&self) -> PathBuf {
        self.base_dir.path().join("plugins.json")
    }
}

impl Drop for Staged {
    fn drop(&mut self) {
        self.ctx.cancel();
        if let Some(server) = self.server.take() {
            server.join().ok();
        }
    }
}

#[fixture]
fn staged() -> Staged {
    let base_dir = TempDir::new().expect("base dir");
    let socket_dir = TempDir::new().expect("socket dir");
    let server = PluginServer::bind(
        Reflect,
        &ServerSettings::default().with_socket_dir(socket_dir.path()),
    )
    .expect("bind");
    let script = format!(
        "#!/bin/sh\necho 'booting'\necho '{} is ready to accept new connection'\nexec sleep 30\n",
        server.endpoint().display()
    );
    fs::write(base_dir.path().join("reflect"), script).expect("write plugin");
    let platform = Platform::current();
    let descriptors = json!([{
        "name": "reflect",
        "os": platform.os(),
        "arch": platform.arch(),
        "cmd": "sh",
        "entrypoints": ["reflect"],
    }]);
    fs::write(
        base_dir.path().join("plugins.json"),
        descriptors.to_string(),
    )
    .expect("write descriptors");

    let ctx = JobContext::new();
    let run_ctx = ctx.clone();
    let handle = thread::spawn(move || server.run_with_announcer(&run_ctx, io::sink()));
    Staged {
        base_dir,
        _socket_dir: socket_dir,
        ctx,
        server: Some(handle),
    }
}

fn worker_args(base_dir: &Path, command: &[&str]) -> Vec<OsString> {
    let base = base_dir.display().to_string();
    [
        "stepworker",
        "--base-dir",
        base.as_str(),
        "--log-filter",
        "off",
        "--handshake-grace-ms",
        "10",
        "--handshake-retry-ms",
        "20",
        "--handshake-window-ms",
        "3000",
        "--termination-grace-ms",
        "500",
    ]
    .into_iter()
    .chain(command.iter().copied())
    .map(OsString::from)
    .collect()
}

fn invoke(args: Vec<OsString>, ctx: &JobContext) -> (ExitCode, String, String) {
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let exit = run_with_context(args, ctx, false, &mut stdout, &mut stderr);
    (
        exit,
        String::from_utf8(stdout).expect("stdout utf8"),
        String::from_utf8(stderr).expect("stderr utf8"),
    )
}

#[rstest]
fn run_plugin_arguments_parse() {
    let cli = Cli::try_parse_from([
        "stepworker",
        "run-plugin",
        "--name",
        "tmpl",
        "--workdir",
        "/work",
        "--env",
        "MODE=fast",
        "--env",
        "EMPTY=",
        "--call",
        "render",
        "--params",
        "{}",
    ])
    .expect("arguments should parse");

    let CliCommand::RunPlugin(args) = cli.command;
    assert_eq!(
        args,
        RunPluginArgs {
            name: String::from("tmpl"),
            descriptors: None,
            workdir: Some(PathBuf::from("/work")),
            env: vec![
                (String::from("MODE"), String::from("fast")),
                (String::from("EMPTY"), String::new()),
            ],
            call: Some(String::from("render")),
            params: Some(String::from("{}")),
        }
    );
}

#[rstest]
#[case::missing_separator(&["run-plugin", "--name", "tmpl", "--env", "MODE"])]
#[case::empty_key(&["run-plugin", "--name", "tmpl", "--env", "=value"])]
#[case::params_without_call(&["run-plugin", "--name", "tmpl", "--params", "{}"])]
#[case::missing_name(&["run-plugin"])]
fn malformed_arguments_are_rejected(#[case] args: &[&str]) {
    let argv = std::iter::once("stepworker").chain(args.iter().copied());
    assert!(Cli::try_parse_from(argv).is_err());
}

#[rstest]
fn help_goes_to_stdout() {
    let (exit, stdout, stderr) = invoke(
        vec![OsString::from("stepworker"), OsString::from("--help")],
        &JobContext::new(),
    );
    assert_eq!(exit, ExitCode::SUCCESS);
    assert!(stdout.contains("run-plugin"));
    assert!(stderr.is_empty());
}

#[rstest]
fn usage_errors_go_to_stderr() {
    let (exit, stdout, stderr) = invoke(
        vec![OsString::from("stepworker"), OsString::from("launch")],
        &JobContext::new(),
    );
    assert_ne!(exit, ExitCode::SUCCESS);
    assert!(stdout.is_empty());
    assert!(!stderr.is_empty());
}

#[rstest]
fn call_result_is_printed(staged: Staged) {
    let args = worker_args(
        staged.base_dir.path(),
        &[
            "run-plugin",
            "--name",
            "reflect",
            "--call",
            "echo",
            "--params",
            r#"{"answer": 42}"#,
        ],
    );

    let (exit, stdout, stderr) = invoke(args, &JobContext::new());

    assert_eq!(exit, ExitCode::SUCCESS, "stderr: {stderr}");
    let printed: Value = serde_json::from_str(stdout.trim()).expect("json output");
    assert_eq!(printed, json!({"answer": 42}));
}

#[rstest]
fn call_without_params_sends_an_empty_object(staged: Staged) {
    let descriptors = staged.descriptors().display().to_string();
    let workdir = TempDir::new().expect("workdir");
    let workdir_arg = workdir.path().display().to_string();
    let args = worker_args(
        staged.base_dir.path(),
        &[
            "run-plugin",
            "--name",
            "reflect",
            "--descriptors",
            descriptors.as_str(),
            "--workdir",
            workdir_arg.as_str(),
            "--env",
            "MODE=test",
            "--call",
            "echo",
        ],
    );

    let (exit, stdout, stderr) = invoke(args, &JobContext::new());

    assert_eq!(exit, ExitCode::SUCCESS, "stderr: {stderr}");
    assert_eq!(stdout.trim(), "{}");
}

#[rstest]
fn params_must_be_json(staged: Staged) {
    let args = worker_args(
        staged.base_dir.path(),
        &[
            "run-plugin",
            "--name",
            "reflect",
            "--call",
            "echo",
            "--params",
            "{not json",
        ],
    );

    let (exit, _stdout, stderr) = invoke(args, &JobContext::new());

    assert_eq!(exit, ExitCode::FAILURE);
    assert!(stderr.contains("invalid call params"), "stderr: {stderr}");
}

#[rstest]
fn unknown_plugin_fails(staged: Staged) {
    let args = worker_args(staged.base_dir.path(), &["run-plugin", "--name", "ghost"]);

    let (exit, stdout, stderr) = invoke(args, &JobContext::new());

    assert_eq!(exit, ExitCode::FAILURE);
    assert!(stdout.is_empty());
    assert!(stderr.contains("ghost"), "stderr: {stderr}");
}

#[rstest]
fn invalid_configuration_is_reported() {
    let args: Vec<OsString> = [
        "stepworker",
        "--reserved-env-prefix",
        " ",
        "run-plugin",
        "--name",
        "tmpl",
    ]
    .into_iter()
    .map(OsString::from)
    .collect();

    let (exit, _stdout, stderr) = invoke(args, &JobContext::new());

    assert_eq!(exit, ExitCode::FAILURE);
    assert!(stderr.contains("invalid configuration"), "stderr: {stderr}");
}

#[rstest]
fn waits_for_cancellation_without_a_call(staged: Staged) {
    let args = worker_args(staged.base_dir.path(), &["run-plugin", "--name", "reflect"]);
    let ctx = JobContext::new();
    let canceller = {
        let job = ctx.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_secs(1));
            job.cancel();
        })
    };

    let (exit, stdout, stderr) = invoke(args, &ctx);

    canceller.join().expect("canceller");
    assert_eq!(exit, ExitCode::SUCCESS, "stderr: {stderr}");
    let started: Value = serde_json::from_str(stdout.trim()).expect("json output");
    assert_eq!(started["plugin"], "reflect");
    assert!(started["pid"].as_u64().is_some());
}
