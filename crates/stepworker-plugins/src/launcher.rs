//! Process launcher: spawn a plugin with piped, teed output.
//!
//! One pump thread per stream copies each chunk into the capture tee first
//! and then into the caller's sink for that stream. A sink that fails is
//! abandoned while capture continues, so a broken job log never starves the
//! handshake.

use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::thread;

use tracing::{debug, info, warn};

use crate::capture::{CaptureWriter, CapturedOutput};
use crate::descriptor::PluginBinaryDescriptor;
use crate::environment::SpawnEnvironment;
use crate::error::PluginError;

const LAUNCHER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::launcher");

const PUMP_BUFFER_BYTES: usize = 8 * 1024;

/// Destination for one of the child's output streams.
pub type OutputSink = Box<dyn Write + Send>;

/// Everything needed to spawn one plugin process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnSpec {
    program: PathBuf,
    args: Vec<String>,
    working_dir: PathBuf,
    env: SpawnEnvironment,
}

impl SpawnSpec {
    /// Creates a spec without arguments.
    #[must_use]
    pub fn new(
        program: impl Into<PathBuf>,
        working_dir: impl Into<PathBuf>,
        env: SpawnEnvironment,
    ) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: working_dir.into(),
            env,
        }
    }

    /// Builds the spawn request for `descriptor`: entrypoints joined under `base_dir`,
    /// followed by the descriptor's extra arguments.
    #[must_use]
    pub fn for_descriptor(
        descriptor: &PluginBinaryDescriptor,
        program: impl Into<PathBuf>,
        base_dir: &Path,
        working_dir: impl Into<PathBuf>,
        env: SpawnEnvironment,
    ) -> Self {
        let entrypoints = descriptor
            .entrypoints()
            .iter()
            .map(|entrypoint| base_dir.join(entrypoint).to_string_lossy().into_owned());
        Self::new(program, working_dir, env)
            .with_args(entrypoints.chain(descriptor.args().iter().cloned()))
    }

    /// Replaces the argument vector.
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Executable to run.
    #[must_use]
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Final argument vector.
    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Working directory of the child.
    #[must_use]
    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// Complete child environment.
    #[must_use]
    pub const fn env(&self) -> &SpawnEnvironment {
        &self.env
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .current_dir(&self.working_dir)
            .env_clear()
            .envs(self.env.iter())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        command
    }
}

/// A spawned plugin process whose output is being pumped.
#[derive(Debug)]
pub struct LaunchedProcess {
    name: String,
    child: Child,
}

impl LaunchedProcess {
    /// Plugin name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// OS process id.
    #[must_use]
    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Exit status if the child has already exited.
    #[must_use]
    pub fn try_status(&mut self) -> Option<ExitStatus> {
        self.child.try_wait().ok().flatten()
    }

    /// Gives up the process, returning the child for reaping.
    #[must_use]
    pub fn into_child(self) -> Child {
        self.child
    }
}

/// Spawns `spec`, wiring stdout to `out`, stderr to `err`, and both to
/// `capture`.
///
/// # Errors
///
/// Returns [`PluginError::SpawnFailed`] when the operating system refuses to
/// start the process.
pub fn launch(
    name: &str,
    spec: &SpawnSpec,
    out: OutputSink,
    err: OutputSink,
    capture: &CapturedOutput,
) -> Result<LaunchedProcess, PluginError> {
    let mut child = spec.command().spawn().map_err(|source| {
        warn!(
            target: LAUNCHER_TARGET,
            plugin = name,
            program = %spec.program().display(),
            error = %source,
            "failed to spawn plugin"
        );
        PluginError::SpawnFailed {
            name: name.to_owned(),
            source: Arc::new(source),
        }
    })?;

    info!(
        target: LAUNCHER_TARGET,
        plugin = name,
        pid = child.id(),
        program = %spec.program().display(),
        args = ?spec.args(),
        working_dir = %spec.working_dir().display(),
        "spawned plugin process"
    );

    spawn_pump(name, Stream::Stdout, child.stdout.take(), out, capture.writer());
    spawn_pump(name, Stream::Stderr, child.stderr.take(), err, capture.writer());

    Ok(LaunchedProcess {
        name: name.to_owned(),
        child,
    })
}

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

impl Stream {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

fn spawn_pump<R>(
    name: &str,
    stream: Stream,
    source: Option<R>,
    sink: OutputSink,
    capture: CaptureWriter,
) where
    R: Read + Send + 'static,
{
    let Some(reader) = source else {
        // Dropping the writer here still lets the tee close.
        return;
    };
    let plugin = name.to_owned();
    thread::spawn(move || pump(&plugin, stream, reader, sink, capture));
}

fn pump<R: Read>(
    name: &str,
    stream: Stream,
    mut reader: R,
    sink: OutputSink,
    mut capture: CaptureWriter,
) {
    let mut sink = Some(sink);
    let mut buffer = vec![0_u8; PUMP_BUFFER_BYTES];
    loop {
        let read = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(read) => read,
            Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
            Err(error) => {
                debug!(
                    target: LAUNCHER_TARGET,
                    plugin = name,
                    stream = stream.as_str(),
                    error = %error,
                    "plugin output read failed"
                );
                break;
            }
        };
        let Some(chunk) = buffer.get(..read) else {
            break;
        };
        if capture.write_all(chunk).is_err() {
            break;
        }
        if let Some(out) = sink.as_mut()
            && let Err(error) = out.write_all(chunk).and_then(|()| out.flush())
        {
            warn!(
                target: LAUNCHER_TARGET,
                plugin = name,
                stream = stream.as_str(),
                error = %error,
                "output sink failed, dropping further output"
            );
            sink = None;
        }
    }
    debug!(
        target: LAUNCHER_TARGET,
        plugin = name,
        stream = stream.as_str(),
        "plugin output stream closed"
    );
}
