//! The plugin supervisor: resolve, unpack, spawn, handshake, register.
//!
//! [`PluginSupervisor::start`] runs the whole start sequence for a plugin
//! name at most once per supervisor and returns the shared
//! [`PluginClientHandle`]. Every spawned child is watched by a reaper thread:
//! when the job context is cancelled, or the supervisor shuts down, the child
//! receives SIGTERM, then SIGKILL once the termination grace has elapsed. A
//! child that fails its handshake is killed straight away.

mod termination;

use std::io;
use std::path::{Path, PathBuf};
use std::process::Child;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::select;
use stepworker_config::{
    Config, DEFAULT_CALL_TIMEOUT_MS, DEFAULT_RESERVED_ENV_PREFIX, DEFAULT_TERMINATION_GRACE_MS,
    HandshakeSettings,
};
use stepworker_plugin_sdk::JobContext;
use tracing::{info, warn};

use crate::capture::CapturedOutput;
use crate::command::resolve_command;
use crate::descriptor::{Platform, PluginBinaryDescriptor};
use crate::environment::SpawnEnvironment;
use crate::error::PluginError;
use crate::handshake::{HandshakeError, HandshakeReader};
use crate::launcher::{OutputSink, SpawnSpec, launch};
use crate::registry::{PluginClientHandle, PluginClientRegistry};
use crate::relay::{LogRelay, LogSink, TracingLogSink};
use crate::resolver::{MetadataProvider, resolve};
use crate::unpack::unpack_artifact;

use self::termination::{kill_and_reap, terminate, wait_for_exit};

pub(crate) const SUPERVISOR_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::supervisor");

const REAP_POLL: Duration = Duration::from_millis(100);
const EXIT_PROBE: Duration = Duration::from_millis(200);

/// Static settings shared by every start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorSettings {
    base_dir: PathBuf,
    reserved_env_prefix: String,
    handshake: HandshakeSettings,
    termination_grace: Duration,
    call_timeout: Duration,
}

impl SupervisorSettings {
    /// Default settings rooted at `base_dir`.
    #[must_use]
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            reserved_env_prefix: DEFAULT_RESERVED_ENV_PREFIX.to_owned(),
            handshake: HandshakeSettings::default(),
            termination_grace: Duration::from_millis(DEFAULT_TERMINATION_GRACE_MS),
            call_timeout: Duration::from_millis(DEFAULT_CALL_TIMEOUT_MS),
        }
    }

    /// Settings taken from the worker configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.base_dir().as_std_path())
            .with_reserved_env_prefix(config.reserved_env_prefix())
            .with_handshake(config.handshake())
            .with_termination_grace(config.termination_grace())
            .with_call_timeout(config.call_timeout())
    }

    /// Overrides the reserved environment prefix.
    #[must_use]
    pub fn with_reserved_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.reserved_env_prefix = prefix.into();
        self
    }

    /// Overrides the handshake timing.
    #[must_use]
    pub const fn with_handshake(mut self, handshake: HandshakeSettings) -> Self {
        self.handshake = handshake;
        self
    }

    /// Overrides the grace period between SIGTERM and SIGKILL.
    #[must_use]
    pub const fn with_termination_grace(mut self, grace: Duration) -> Self {
        self.termination_grace = grace;
        self
    }

    /// Overrides the bound on a single plugin call.
    #[must_use]
    pub const fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Directory holding staged artifacts and unpacked binaries.
    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Prefix of variables withheld from plugins.
    #[must_use]
    pub fn reserved_env_prefix(&self) -> &str {
        &self.reserved_env_prefix
    }

    /// Handshake timing.
    #[must_use]
    pub const fn handshake(&self) -> HandshakeSettings {
        self.handshake
    }

    /// Grace period between SIGTERM and SIGKILL.
    #[must_use]
    pub const fn termination_grace(&self) -> Duration {
        self.termination_grace
    }

    /// Bound on a single plugin call's socket reads and writes.
    #[must_use]
    pub const fn call_timeout(&self) -> Duration {
        self.call_timeout
    }
}

/// Per-start options supplied by the caller.
#[derive(Default)]
pub struct StartOptions {
    descriptor: Option<PluginBinaryDescriptor>,
    workdir: Option<PathBuf>,
    env: Vec<(String, String)>,
    stdout: Option<OutputSink>,
    stderr: Option<OutputSink>,
    log_sink: Option<Arc<dyn LogSink>>,
}

impl std::fmt::Debug for StartOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StartOptions")
            .field("descriptor", &self.descriptor)
            .field("workdir", &self.workdir)
            .field("env", &self.env)
            .finish_non_exhaustive()
    }
}

impl StartOptions {
    /// Empty options: look the descriptor up, run in the base directory,
    /// discard stdout and stderr, and relay output to `tracing`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses `descriptor` instead of asking the metadata provider.
    #[must_use]
    pub fn with_descriptor(mut self, descriptor: PluginBinaryDescriptor) -> Self {
        self.descriptor = Some(descriptor);
        self
    }

    /// Runs the plugin in the job working directory `dir`.
    #[must_use]
    pub fn with_workdir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(dir.into());
        self
    }

    /// Appends an environment override; later overrides win.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Copies the plugin's stdout to `sink`.
    #[must_use]
    pub fn with_stdout(mut self, sink: OutputSink) -> Self {
        self.stdout = Some(sink);
        self
    }

    /// Copies the plugin's stderr to `sink`.
    #[must_use]
    pub fn with_stderr(mut self, sink: OutputSink) -> Self {
        self.stderr = Some(sink);
        self
    }

    /// Relays the plugin's combined output line by line to `sink`.
    #[must_use]
    pub fn with_log_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.log_sink = Some(sink);
        self
    }
}

struct SupervisedChild {
    name: String,
    pid: u32,
    stop: JobContext,
    reaper: JoinHandle<()>,
}

/// Starts plugins and owns their processes and client handles.
pub struct PluginSupervisor {
    settings: SupervisorSettings,
    platform: Platform,
    provider: Arc<dyn MetadataProvider>,
    registry: PluginClientRegistry,
    children: Mutex<Vec<SupervisedChild>>,
}

impl std::fmt::Debug for PluginSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginSupervisor")
            .field("settings", &self.settings)
            .field("platform", &self.platform)
            .field("plugins", &self.registry.names())
            .finish_non_exhaustive()
    }
}

impl PluginSupervisor {
    /// Creates a supervisor for the current platform.
    #[must_use]
    pub fn new(settings: SupervisorSettings, provider: Arc<dyn MetadataProvider>) -> Self {
        Self {
            settings,
            platform: Platform::current(),
            provider,
            registry: PluginClientRegistry::new(),
            children: Mutex::new(Vec::new()),
        }
    }

    /// Overrides the platform used for descriptor lookups.
    #[must_use]
    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    /// Settings in effect.
    #[must_use]
    pub const fn settings(&self) -> &SupervisorSettings {
        &self.settings
    }

    /// Registry of started plugins.
    #[must_use]
    pub const fn registry(&self) -> &PluginClientRegistry {
        &self.registry
    }

    /// Process ids of children still being supervised.
    #[must_use]
    pub fn child_pids(&self) -> Vec<u32> {
        self.lock_children()
            .iter()
            .filter(|child| !child.reaper.is_finished())
            .map(|child| child.pid)
            .collect()
    }

    /// Returns the running plugin `name`, starting it first if needed.
    ///
    /// # Errors
    ///
    /// Returns the [`PluginError`] of the first failing start step. A failed
    /// start leaves no process behind and no registry entry.
    pub fn start(
        &self,
        ctx: &JobContext,
        name: &str,
        options: StartOptions,
    ) -> Result<Arc<PluginClientHandle>, PluginError> {
        self.registry
            .get_or_start(name, || self.launch(ctx, name, options))
            .inspect_err(|error| {
                warn!(target: SUPERVISOR_TARGET, plugin = name, error = %error, "plugin start failed");
            })
    }

    /// Terminates every supervised child and forgets every handle.
    ///
    /// Children get SIGTERM and the termination grace before SIGKILL. The
    /// job context is left untouched.
    pub fn shutdown(&self) {
        let children: Vec<SupervisedChild> = self.lock_children().drain(..).collect();
        for child in &children {
            child.stop.cancel();
        }
        for child in children {
            if child.reaper.join().is_err() {
                warn!(target: SUPERVISOR_TARGET, plugin = %child.name, "plugin reaper panicked");
            }
        }
        let forgotten = self.registry.clear();
        if !forgotten.is_empty() {
            info!(target: SUPERVISOR_TARGET, count = forgotten.len(), "plugin supervisor shut down");
        }
    }

    fn launch(
        &self,
        ctx: &JobContext,
        name: &str,
        options: StartOptions,
    ) -> Result<PluginClientHandle, PluginError> {
        if ctx.is_cancelled() {
            return Err(PluginError::Cancelled {
                name: name.to_owned(),
            });
        }
        let StartOptions {
            descriptor,
            workdir,
            env,
            stdout,
            stderr,
            log_sink,
        } = options;
        let base_dir = self.settings.base_dir();

        let resolved = resolve(self.provider.as_ref(), name, &self.platform, descriptor)?;
        unpack_artifact(resolved.name(), base_dir)?;
        let program = resolve_command(name, resolved.cmd(), base_dir)?;
        let spec = SpawnSpec::for_descriptor(
            &resolved,
            program,
            base_dir,
            workdir.unwrap_or_else(|| base_dir.to_path_buf()),
            SpawnEnvironment::from_process(&self.settings.reserved_env_prefix, &env),
        );

        let capture = CapturedOutput::new();
        let handshake_view = capture.view();
        let relay_view = capture.view();
        let process = launch(
            name,
            &spec,
            stdout.unwrap_or_else(|| Box::new(io::sink())),
            stderr.unwrap_or_else(|| Box::new(io::sink())),
            &capture,
        )?;
        let spawned_at = Instant::now();

        let sink = log_sink.unwrap_or_else(|| Arc::new(TracingLogSink::new(name)));
        let relay_stop = JobContext::new();
        drop(
            LogRelay::new(name, sink)
                .with_stop(relay_stop.clone())
                .spawn(relay_view, ctx.clone()),
        );

        let reader = HandshakeReader::new(self.settings.handshake);
        match reader.wait_since(&handshake_view, ctx, spawned_at) {
            Ok(endpoint) => {
                let pid = process.pid();
                info!(
                    target: SUPERVISOR_TARGET,
                    plugin = name,
                    pid,
                    endpoint = %endpoint.display(),
                    elapsed_ms = millis(spawned_at.elapsed()),
                    "plugin ready"
                );
                self.supervise(name, process.into_child(), ctx);
                Ok(PluginClientHandle::new(name, endpoint, pid, capture.stats())
                    .with_call_timeout(self.settings.call_timeout))
            }
            Err(error) => {
                let mut child = process.into_child();
                let failure = classify(name, &mut child, error, spawned_at);
                kill_and_reap(name, &mut child);
                relay_stop.cancel();
                Err(failure)
            }
        }
    }

    fn supervise(&self, name: &str, child: Child, ctx: &JobContext) {
        let pid = child.id();
        let stop = JobContext::new();
        let reaper = spawn_reaper(
            name.to_owned(),
            child,
            ctx.clone(),
            stop.clone(),
            self.settings.termination_grace,
        );
        self.lock_children().push(SupervisedChild {
            name: name.to_owned(),
            pid,
            stop,
            reaper,
        });
    }

    fn lock_children(&self) -> MutexGuard<'_, Vec<SupervisedChild>> {
        self.children
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }
}

impl Drop for PluginSupervisor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn spawn_reaper(
    name: String,
    mut child: Child,
    job: JobContext,
    stop: JobContext,
    grace: Duration,
) -> JoinHandle<()> {
    thread::spawn(move || {
        loop {
            select! {
                recv(job.done()) -> _ => break,
                recv(stop.done()) -> _ => break,
                default(REAP_POLL) => {
                    if let Ok(Some(status)) = child.try_wait() {
                        info!(target: SUPERVISOR_TARGET, plugin = %name, ?status, "plugin exited");
                        return;
                    }
                }
            }
        }
        terminate(&name, &mut child, grace);
    })
}

fn classify(
    name: &str,
    child: &mut Child,
    error: HandshakeError,
    spawned_at: Instant,
) -> PluginError {
    match error {
        HandshakeError::Timeout { elapsed } => PluginError::HandshakeTimeout {
            name: name.to_owned(),
            elapsed_ms: millis(elapsed),
        },
        HandshakeError::StreamClosed => match wait_for_exit(child, EXIT_PROBE) {
            Some(status) => PluginError::ChildExited {
                name: name.to_owned(),
                status,
            },
            None => PluginError::HandshakeTimeout {
                name: name.to_owned(),
                elapsed_ms: millis(spawned_at.elapsed()),
            },
        },
        HandshakeError::Cancelled => PluginError::Cancelled {
            name: name.to_owned(),
        },
        HandshakeError::Protocol(violation) => PluginError::ProtocolViolation {
            name: name.to_owned(),
            message: violation.to_string(),
        },
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests;
