//! Unit tests for the plugin supervisor.

use std::thread;

use camino::Utf8PathBuf;
use rstest::{fixture, rstest};
use serde_json::json;
use stepworker_config::LogFormat;
use tempfile::TempDir;

use super::*;
use crate::resolver::StaticMetadataProvider;
use crate::tests::{
    RecordingSink, RunningServer, ScriptPlugins, SharedBuffer, fast_settings, process_alive,
    ready_body, wait_until,
};

#[fixture]
fn plugins() -> ScriptPlugins {
    ScriptPlugins::new()
}

fn supervisor_for(plugins: &ScriptPlugins, names: &[&str]) -> PluginSupervisor {
    PluginSupervisor::new(
        fast_settings(plugins.base_dir()),
        ScriptPlugins::provider(names),
    )
}

#[rstest]
fn started_plugin_serves_calls(plugins: ScriptPlugins) {
    let server = RunningServer::start();
    plugins.install_ready("tmpl", server.endpoint());
    let supervisor = supervisor_for(&plugins, &["tmpl"]);

    let handle = supervisor
        .start(&JobContext::new(), "tmpl", StartOptions::new())
        .expect("start");

    assert_eq!(handle.name(), "tmpl");
    assert_eq!(handle.endpoint(), server.endpoint());
    assert!(process_alive(handle.pid()));
    assert!(handle.stats().bytes_captured() > 0);
    let echoed = handle.call("echo", json!({"value": 7})).expect("echo");
    assert_eq!(echoed, json!({"value": 7}));
}

#[rstest]
fn second_start_reuses_the_running_plugin(plugins: ScriptPlugins) {
    let server = RunningServer::start();
    plugins.install_ready("tmpl", server.endpoint());
    let supervisor = supervisor_for(&plugins, &["tmpl"]);
    let ctx = JobContext::new();

    let first = supervisor.start(&ctx, "tmpl", StartOptions::new()).expect("first");
    let second = supervisor.start(&ctx, "tmpl", StartOptions::new()).expect("second");

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(supervisor.child_pids(), [first.pid()]);
}

#[rstest]
fn silent_plugin_times_out_and_is_killed(plugins: ScriptPlugins) {
    plugins.install("quiet", "exec sleep 30");
    let settings = fast_settings(plugins.base_dir()).with_handshake(
        crate::tests::fast_handshake().with_window(Duration::from_millis(300)),
    );
    let supervisor = PluginSupervisor::new(settings, ScriptPlugins::provider(&["quiet"]));

    let error = supervisor
        .start(&JobContext::new(), "quiet", StartOptions::new())
        .expect_err("silent plugin must time out");

    assert!(
        matches!(error, PluginError::HandshakeTimeout { elapsed_ms, .. } if elapsed_ms >= 300),
        "unexpected error: {error}"
    );
    assert!(supervisor.registry().is_empty());
    assert!(supervisor.child_pids().is_empty());
}

#[rstest]
fn early_exit_reports_the_exit_status(plugins: ScriptPlugins) {
    plugins.install("crashy", "echo 'cannot start'\nexit 3");
    let supervisor = supervisor_for(&plugins, &["crashy"]);

    let error = supervisor
        .start(&JobContext::new(), "crashy", StartOptions::new())
        .expect_err("exiting plugin must fail");

    match error {
        PluginError::ChildExited { status, .. } => assert_eq!(status.code(), Some(3)),
        other => panic!("unexpected error: {other}"),
    }
}

#[rstest]
fn failed_start_flushes_its_relay_without_cancellation(plugins: ScriptPlugins) {
    plugins.install("crashy", "printf 'no newline here'\nexit 3");
    let supervisor = supervisor_for(&plugins, &["crashy"]);
    let relay = Arc::new(RecordingSink::default());
    let ctx = JobContext::new();

    supervisor
        .start(
            &ctx,
            "crashy",
            StartOptions::new().with_log_sink(relay.clone()),
        )
        .expect_err("exiting plugin must fail");

    assert!(wait_until(Duration::from_secs(2), || relay.contains("no newline here")));
    assert!(!ctx.is_cancelled());
}

#[rstest]
fn unknown_plugin_has_no_metadata(plugins: ScriptPlugins) {
    let supervisor = supervisor_for(&plugins, &[]);

    let error = supervisor
        .start(&JobContext::new(), "ghost", StartOptions::new())
        .expect_err("unknown plugin");

    assert!(matches!(
        error,
        PluginError::MetadataUnavailable { ref name, source: None } if name == "ghost"
    ));
}

#[rstest]
fn missing_command_is_reported(plugins: ScriptPlugins) {
    plugins.install("tmpl", "exit 0");
    let platform = Platform::current();
    let descriptor = PluginBinaryDescriptor::new(
        "tmpl",
        platform.os(),
        platform.arch(),
        "stepworker-no-such-command",
    );
    let supervisor = supervisor_for(&plugins, &[]);

    let error = supervisor
        .start(
            &JobContext::new(),
            "tmpl",
            StartOptions::new().with_descriptor(descriptor),
        )
        .expect_err("missing command");

    assert!(matches!(
        error,
        PluginError::ExecutableNotFound { ref command, .. } if command == "stepworker-no-such-command"
    ));
}

#[rstest]
fn missing_artifact_fails_to_unpack(plugins: ScriptPlugins) {
    let supervisor = supervisor_for(&plugins, &["absent"]);

    let error = supervisor
        .start(&JobContext::new(), "absent", StartOptions::new())
        .expect_err("missing artifact");

    assert!(matches!(error, PluginError::UnpackFailed { .. }));
}

#[rstest]
fn tarball_artifact_is_unpacked_before_launch(plugins: ScriptPlugins) {
    let server = RunningServer::start();
    plugins.install_tarball("bundle", "bundle.sh", &ready_body(server.endpoint()));
    let supervisor = supervisor_for(&plugins, &[]);

    let handle = supervisor
        .start(
            &JobContext::new(),
            "bundle",
            StartOptions::new()
                .with_descriptor(ScriptPlugins::descriptor_with_entrypoint("bundle", "bundle.sh")),
        )
        .expect("start bundle");

    assert!(plugins.base_dir().join("bundle.sh").is_file());
    assert_eq!(handle.endpoint(), server.endpoint());
}

#[rstest]
fn cancelled_context_prevents_the_start(plugins: ScriptPlugins) {
    plugins.install("tmpl", "exec sleep 30");
    let supervisor = supervisor_for(&plugins, &["tmpl"]);
    let ctx = JobContext::new();
    ctx.cancel();

    let error = supervisor
        .start(&ctx, "tmpl", StartOptions::new())
        .expect_err("cancelled");

    assert!(matches!(error, PluginError::Cancelled { .. }));
    assert!(supervisor.child_pids().is_empty());
}

#[rstest]
fn cancellation_during_handshake_aborts_the_start(plugins: ScriptPlugins) {
    plugins.install("quiet", "exec sleep 30");
    let supervisor = supervisor_for(&plugins, &["quiet"]);
    let ctx = JobContext::new();
    let canceller = {
        let job = ctx.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(150));
            job.cancel();
        })
    };

    let error = supervisor
        .start(&ctx, "quiet", StartOptions::new())
        .expect_err("cancelled");

    canceller.join().expect("canceller");
    assert!(matches!(error, PluginError::Cancelled { .. }));
    assert!(supervisor.registry().is_empty());
}

#[rstest]
fn job_cancellation_terminates_the_plugin(plugins: ScriptPlugins) {
    let server = RunningServer::start();
    plugins.install_ready("tmpl", server.endpoint());
    let supervisor = supervisor_for(&plugins, &["tmpl"]);
    let ctx = JobContext::new();
    let handle = supervisor.start(&ctx, "tmpl", StartOptions::new()).expect("start");

    ctx.cancel();

    assert!(wait_until(Duration::from_secs(3), || !process_alive(handle.pid())));
    assert!(wait_until(Duration::from_secs(1), || supervisor.child_pids().is_empty()));
}

#[rstest]
fn shutdown_terminates_plugins_and_forgets_handles(plugins: ScriptPlugins) {
    let server = RunningServer::start();
    plugins.install_ready("tmpl", server.endpoint());
    let supervisor = supervisor_for(&plugins, &["tmpl"]);
    let ctx = JobContext::new();
    let handle = supervisor.start(&ctx, "tmpl", StartOptions::new()).expect("start");

    supervisor.shutdown();

    assert!(!process_alive(handle.pid()));
    assert!(supervisor.registry().is_empty());
    assert!(!ctx.is_cancelled());
}

#[rstest]
fn plugin_ignoring_sigterm_is_killed_after_the_grace(plugins: ScriptPlugins) {
    let server = RunningServer::start();
    plugins.install(
        "stubborn",
        &format!(
            "trap '' TERM\necho '{} is ready to accept new connection'\nwhile :; do sleep 0.05; done",
            server.endpoint().display()
        ),
    );
    let supervisor = supervisor_for(&plugins, &["stubborn"]);
    let handle = supervisor
        .start(&JobContext::new(), "stubborn", StartOptions::new())
        .expect("start");

    let started = Instant::now();
    supervisor.shutdown();

    assert!(started.elapsed() >= supervisor.settings().termination_grace());
    assert!(!process_alive(handle.pid()));
}

#[rstest]
fn output_reaches_sinks_and_log_relay(plugins: ScriptPlugins) {
    let server = RunningServer::start();
    plugins.install_ready("tmpl", server.endpoint());
    let supervisor = supervisor_for(&plugins, &["tmpl"]);
    let stdout = SharedBuffer::default();
    let stderr = SharedBuffer::default();
    let relay = Arc::new(RecordingSink::default());

    supervisor
        .start(
            &JobContext::new(),
            "tmpl",
            StartOptions::new()
                .with_stdout(Box::new(stdout.clone()))
                .with_stderr(Box::new(stderr.clone()))
                .with_log_sink(relay.clone()),
        )
        .expect("start");

    assert!(wait_until(Duration::from_secs(2), || relay.contains("booting")));
    assert!(wait_until(Duration::from_secs(2), || relay.contains("warming up")));
    assert!(stdout.contents().contains("is ready to accept new connection"));
    assert!(stderr.contents().contains("warming up"));
}

#[rstest]
fn overrides_and_workdir_reach_the_plugin(plugins: ScriptPlugins) {
    let server = RunningServer::start();
    plugins.install(
        "tmpl",
        &format!("echo \"greeting=$GREETING\"\necho \"cwd=$(pwd)\"\n{}", ready_body(server.endpoint())),
    );
    let supervisor = supervisor_for(&plugins, &["tmpl"]);
    let workdir = TempDir::new().expect("workdir");
    let relay = Arc::new(RecordingSink::default());

    supervisor
        .start(
            &JobContext::new(),
            "tmpl",
            StartOptions::new()
                .with_env("GREETING", "hello")
                .with_workdir(workdir.path())
                .with_log_sink(relay.clone()),
        )
        .expect("start");

    let cwd = format!("cwd={}", workdir.path().display());
    assert!(wait_until(Duration::from_secs(2), || relay.contains("greeting=hello")));
    assert!(wait_until(Duration::from_secs(2), || relay.contains(&cwd)));
}

#[rstest]
fn provider_is_consulted_for_the_current_platform(plugins: ScriptPlugins) {
    let server = RunningServer::start();
    plugins.install_ready("tmpl", server.endpoint());
    let other =
        PluginBinaryDescriptor::new("tmpl", "plan9", "mips", "sh").with_entrypoints(["tmpl"]);
    let provider = Arc::new(StaticMetadataProvider::new([other]));
    let supervisor = PluginSupervisor::new(fast_settings(plugins.base_dir()), provider.clone());

    let error = supervisor
        .start(&JobContext::new(), "tmpl", StartOptions::new())
        .expect_err("no binary for this platform");
    assert!(matches!(error, PluginError::MetadataUnavailable { .. }));

    let plan9 = PluginSupervisor::new(fast_settings(plugins.base_dir()), provider)
        .with_platform(Platform::new("plan9", "mips"));
    let handle = plan9
        .start(&JobContext::new(), "tmpl", StartOptions::new())
        .expect("descriptor matches the overridden platform");
    assert_eq!(handle.endpoint(), server.endpoint());
}

#[rstest]
fn settings_follow_the_configuration() {
    let config = Config {
        log_filter: "debug".to_owned(),
        log_format: LogFormat::Compact,
        base_dir: Utf8PathBuf::from("/srv/plugins"),
        reserved_env_prefix: "ORCH_".to_owned(),
        handshake_grace_ms: 1,
        handshake_retry_ms: 2,
        handshake_window_ms: 3,
        handshake_poll_ms: 4,
        termination_grace_ms: 5,
        call_timeout_ms: 6,
    };

    let settings = SupervisorSettings::from_config(&config);

    assert_eq!(settings.base_dir(), Path::new("/srv/plugins"));
    assert_eq!(settings.reserved_env_prefix(), "ORCH_");
    assert_eq!(settings.handshake(), config.handshake());
    assert_eq!(settings.termination_grace(), Duration::from_millis(5));
    assert_eq!(settings.call_timeout(), Duration::from_millis(6));
}
