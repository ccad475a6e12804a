//! Shared fixtures for plugin supervision tests.
//!
//! Plugins are shell scripts staged in a temporary base directory and run
//! through `sh`, so nothing needs the executable bit. Plugins that must
//! answer RPC calls announce the endpoint of an in-process [`PluginServer`].


use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use flate2::Compression;
use flate2::write::GzEncoder;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use serde_json::Value;
use stepworker_config::HandshakeSettings;
use stepworker_plugin_sdk::{
    JobContext, PluginServer, PluginService, RpcError, ServeError, ServerSettings,
    ServiceDescriptor,
};
use tempfile::TempDir;

use crate::descriptor::{Platform, PluginBinaryDescriptor};
use crate::relay::LogSink;
use crate::resolver::StaticMetadataProvider;
use crate::supervisor::SupervisorSettings;

/// Handshake timing short enough for tests.
pub(crate) fn fast_handshake() -> HandshakeSettings {
    HandshakeSettings::default()
        .with_grace(Duration::from_millis(10))
        .with_retry_delay(Duration::from_millis(20))
        .with_window(Duration::from_secs(3))
        .with_poll_interval(Duration::from_millis(20))
}

/// Supervisor settings rooted at `base_dir` with fast timings.
pub(crate) fn fast_settings(base_dir: &Path) -> SupervisorSettings {
    SupervisorSettings::new(base_dir)
        .with_handshake(fast_handshake())
        .with_termination_grace(Duration::from_millis(500))
}

/// A temporary base directory holding script plugins.
pub(crate) struct ScriptPlugins {
    dir: TempDir,
}

impl ScriptPlugins {
    pub(crate) fn new() -> Self {
        Self {
            dir: TempDir::new().expect("temp dir"),
        }
    }

    pub(crate) fn base_dir(&self) -> &Path {
        self.dir.path()
    }

    /// Stages `body` as the artifact of plugin `name`.
    pub(crate) fn install(&self, name: &str, body: &str) {
        fs::write(self.base_dir().join(name), format!("#!/bin/sh\n{body}\n")).expect("write script");
    }

    /// Stages a plugin that prints noise, announces `endpoint`, and idles.
    pub(crate) fn install_ready(&self, name: &str, endpoint: &Path) {
        self.install(name, &ready_body(endpoint));
    }

    /// Stages a gzip tarball for `name` whose `entry` holds `body`.
    pub(crate) fn install_tarball(&self, name: &str, entry: &str, body: &str) {
        let script = format!("#!/bin/sh\n{body}\n");
        let mut header = tar::Header::new_gnu();
        header.set_size(u64::try_from(script.len()).expect("script size"));
        header.set_mode(0o644);
        header.set_cksum();
        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        builder
            .append_data(&mut header, entry, script.as_bytes())
            .expect("append entry");
        let bytes = builder
            .into_inner()
            .expect("finish tar")
            .finish()
            .expect("finish gzip");
        fs::write(self.base_dir().join(name), bytes).expect("write tarball");
    }

    /// Descriptor running the staged artifact `name` through `sh`.
    pub(crate) fn descriptor(name: &str) -> PluginBinaryDescriptor {
        Self::descriptor_with_entrypoint(name, name)
    }

    /// Descriptor running `entrypoint` under the base directory through `sh`.
    pub(crate) fn descriptor_with_entrypoint(name: &str, entrypoint: &str) -> PluginBinaryDescriptor {
        let platform = Platform::current();
        PluginBinaryDescriptor::new(name, platform.os(), platform.arch(), "sh")
            .with_entrypoints([entrypoint])
    }

    /// Provider knowing the `sh` descriptors of `names`.
    pub(crate) fn provider(names: &[&str]) -> Arc<StaticMetadataProvider> {
        Arc::new(StaticMetadataProvider::new(
            names.iter().map(|name| Self::descriptor(name)),
        ))
    }
}

/// Script body that prints noise, announces `endpoint`, and idles.
pub(crate) fn ready_body(endpoint: &Path) -> String {
    format!(
        "echo 'booting'\necho 'warming up' >&2\necho '{} is ready to accept new connection'\nexec sleep 30",
        endpoint.display()
    )
}

/// Service answering `echo` with its params.
pub(crate) struct EchoBack;

impl PluginService for EchoBack {
    fn descriptor(&self) -> ServiceDescriptor {
        ServiceDescriptor::new("echo-back", ["echo"])
    }

    fn call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        match method {
            "echo" => Ok(params),
            other => Err(RpcError::method_not_found(other)),
        }
    }
}

/// An in-process plugin server stopped on drop.
pub(crate) struct RunningServer {
    endpoint: PathBuf,
    ctx: JobContext,
    thread: Option<JoinHandle<Result<(), ServeError>>>,
    _dir: TempDir,
}

impl RunningServer {
    pub(crate) fn start() -> Self {
        let dir = TempDir::new().expect("socket dir");
        let server = PluginServer::bind(EchoBack, &ServerSettings::default().with_socket_dir(dir.path()))
            .expect("bind server");
        let endpoint = server.endpoint().to_path_buf();
        let ctx = JobContext::new();
        let run_ctx = ctx.clone();
        let thread = thread::spawn(move || server.run_with_announcer(&run_ctx, io::sink()));
        Self {
            endpoint,
            ctx,
            thread: Some(thread),
            _dir: dir,
        }
    }

    pub(crate) fn endpoint(&self) -> &Path {
        &self.endpoint
    }
}

impl Drop for RunningServer {
    fn drop(&mut self) {
        self.ctx.cancel();
        if let Some(thread) = self.thread.take() {
            thread.join().ok();
        }
    }
}

/// Log sink remembering every relayed line.
#[derive(Default)]
pub(crate) struct RecordingSink {
    lines: Mutex<Vec<String>>,
}

impl RecordingSink {
    pub(crate) fn lines(&self) -> Vec<String> {
        self.lines.lock().expect("sink lock").clone()
    }

    pub(crate) fn contains(&self, needle: &str) -> bool {
        self.lines().iter().any(|line| line.contains(needle))
    }
}

impl LogSink for RecordingSink {
    fn accept(&self, line: &str) {
        self.lines.lock().expect("sink lock").push(line.to_owned());
    }
}

/// Writer sharing its bytes with the test.
#[derive(Clone, Default)]
pub(crate) struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub(crate) fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().expect("buffer lock")).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().expect("buffer lock").extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Whether a process with `pid` still exists.
pub(crate) fn process_alive(pid: u32) -> bool {
    let raw = i32::try_from(pid).expect("pid fits in i32");
    kill(Pid::from_raw(raw), None::<Signal>).is_ok()
}

/// Polls `condition` until it holds or `timeout` elapses.
pub(crate) fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(20));
    }
    condition()
}
