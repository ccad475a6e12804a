//! Plugin-side bootstrap: bind a Unix endpoint, announce it, serve calls.
//!
//! A hosted plugin binds a fresh socket under the system temporary directory,
//! waits a short settle delay, then writes the readiness line to stdout
//! exactly once. Connections are served one thread each, with one JSONL
//! request answered by one JSONL response. Cancelling the [`JobContext`]
//! stops the accept loop, closes live connections, and removes the socket
//! file.

mod dispatcher;

use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::net::Shutdown;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::Receiver;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::context::JobContext;
use crate::error::ServeError;
use crate::readiness::announce;
use crate::service::PluginService;

use self::dispatcher::{Dispatcher, serve_connection};

pub(crate) const SERVER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::server");

const ACCEPT_BACKOFF: Duration = Duration::from_millis(25);
const ERROR_BACKOFF: Duration = Duration::from_millis(150);

/// Delay between binding the endpoint and announcing it.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(5);

/// Prefix of generated endpoint file names.
pub const ENDPOINT_PREFIX: &str = "stepworker-plugin-";

/// Where and how a plugin server binds its endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    socket_dir: PathBuf,
    settle_delay: Duration,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            socket_dir: std::env::temp_dir(),
            settle_delay: DEFAULT_SETTLE_DELAY,
        }
    }
}

impl ServerSettings {
    /// Overrides the directory that holds the endpoint.
    #[must_use]
    pub fn with_socket_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.socket_dir = dir.into();
        self
    }

    /// Overrides the delay before the readiness line is written.
    #[must_use]
    pub const fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Directory that holds the endpoint.
    #[must_use]
    pub fn socket_dir(&self) -> &Path {
        &self.socket_dir
    }

    /// Delay before the readiness line is written.
    #[must_use]
    pub const fn settle_delay(&self) -> Duration {
        self.settle_delay
    }
}

/// Handle that stops a running server without cancelling its job context.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    shutdown: Arc<AtomicBool>,
}

impl StopHandle {
    /// Requests that the accept loop exit.
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Returns `true` once a stop was requested.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}

type ConnectionMap = Arc<Mutex<HashMap<u64, UnixStream>>>;

/// Bound, not yet announced, plugin endpoint.
pub struct PluginServer {
    endpoint: PathBuf,
    listener: UnixListener,
    dispatcher: Arc<Dispatcher>,
    stop: StopHandle,
    settle_delay: Duration,
    connections: ConnectionMap,
}

impl std::fmt::Debug for PluginServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginServer")
            .field("endpoint", &self.endpoint)
            .field("service", &self.dispatcher.descriptor().name())
            .finish_non_exhaustive()
    }
}

impl PluginServer {
    /// Binds a fresh endpoint for `service`.
    ///
    /// # Errors
    ///
    /// Returns [`ServeError::BindFailed`] when the socket cannot be created.
    pub fn bind<S: PluginService>(service: S, settings: &ServerSettings) -> Result<Self, ServeError> {
        let endpoint = settings
            .socket_dir()
            .join(format!("{ENDPOINT_PREFIX}{}.sock", Uuid::new_v4()));
        remove_stale_endpoint(&endpoint).map_err(|source| ServeError::BindFailed {
            path: endpoint.clone(),
            source: Arc::new(source),
        })?;
        let listener = UnixListener::bind(&endpoint).map_err(|source| ServeError::BindFailed {
            path: endpoint.clone(),
            source: Arc::new(source),
        })?;
        let dispatcher = Dispatcher::new(service);
        info!(
            target: SERVER_TARGET,
            endpoint = %endpoint.display(),
            service = dispatcher.descriptor().name(),
            "plugin endpoint bound"
        );
        Ok(Self {
            endpoint,
            listener,
            dispatcher: Arc::new(dispatcher),
            stop: StopHandle::default(),
            settle_delay: settings.settle_delay(),
            connections: Arc::default(),
        })
    }

    /// Path of the bound endpoint.
    #[must_use]
    pub fn endpoint(&self) -> &Path {
        &self.endpoint
    }

    /// Returns a handle that stops the server.
    #[must_use]
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Announces the endpoint on stdout and serves until `ctx` is cancelled.
    ///
    /// # Errors
    ///
    /// See [`PluginServer::run_with_announcer`].
    pub fn run(self, ctx: &JobContext) -> Result<(), ServeError> {
        self.run_with_announcer(ctx, io::stdout())
    }

    /// Announces the endpoint on `out` and serves until `ctx` is cancelled
    /// or the [`StopHandle`] fires.
    ///
    /// The socket file is removed before this returns.
    ///
    /// # Errors
    ///
    /// Returns [`ServeError::Io`] when the listener cannot be switched to
    /// non-blocking mode and [`ServeError::Announce`] when the readiness line
    /// cannot be written.
    pub fn run_with_announcer<W: Write>(self, ctx: &JobContext, out: W) -> Result<(), ServeError> {
        if let Err(source) = self.listener.set_nonblocking(true) {
            cleanup_endpoint(&self.endpoint);
            return Err(ServeError::Io {
                path: self.endpoint.clone(),
                source: Arc::new(source),
            });
        }

        let (finished, finished_rx) = crossbeam_channel::bounded::<()>(0);
        let watcher = spawn_watcher(
            ctx.clone(),
            self.stop.clone(),
            self.endpoint.clone(),
            finished_rx,
        );

        thread::sleep(self.settle_delay);
        let announced = std::path::absolute(&self.endpoint).unwrap_or_else(|_| self.endpoint.clone());
        let outcome = match announce(out, &announced) {
            Ok(()) => {
                debug!(target: SERVER_TARGET, endpoint = %announced.display(), "readiness announced");
                self.accept_loop();
                Ok(())
            }
            Err(source) => Err(ServeError::Announce {
                path: announced,
                source: Arc::new(source),
            }),
        };

        self.stop.stop();
        drop(finished);
        let joined = watcher.join();
        self.close_connections();
        cleanup_endpoint(&self.endpoint);
        info!(target: SERVER_TARGET, endpoint = %self.endpoint.display(), "plugin endpoint closed");
        match (outcome, joined) {
            (Err(error), _) => Err(error),
            (Ok(()), Err(_)) => Err(ServeError::ThreadPanic),
            (Ok(()), Ok(())) => Ok(()),
        }
    }

    fn accept_loop(&self) {
        let mut last_error = None::<io::ErrorKind>;
        let next_id = AtomicU64::new(0);
        while !self.stop.is_stopped() {
            match accept_connection(&self.listener) {
                Ok(Some(stream)) => {
                    last_error = None;
                    let id = next_id.fetch_add(1, Ordering::Relaxed);
                    self.spawn_connection(id, stream);
                }
                Ok(None) => thread::sleep(ACCEPT_BACKOFF),
                Err(error) => {
                    let kind = error.kind();
                    if last_error != Some(kind) {
                        warn!(target: SERVER_TARGET, error = %error, "plugin accept error");
                    }
                    last_error = Some(kind);
                    thread::sleep(ERROR_BACKOFF);
                }
            }
        }
    }

    fn spawn_connection(&self, id: u64, stream: UnixStream) {
        match stream.try_clone() {
            Ok(tracked) => {
                self.connections
                    .lock()
                    .unwrap_or_else(|poison| poison.into_inner())
                    .insert(id, tracked);
            }
            Err(error) => {
                warn!(target: SERVER_TARGET, error = %error, "failed to track connection");
            }
        }
        let dispatcher = Arc::clone(&self.dispatcher);
        let connections = Arc::clone(&self.connections);
        thread::spawn(move || {
            if let Err(error) = serve_connection(stream, &dispatcher) {
                debug!(target: SERVER_TARGET, error = %error, "connection ended with error");
            }
            connections
                .lock()
                .unwrap_or_else(|poison| poison.into_inner())
                .remove(&id);
        });
    }

    fn close_connections(&self) {
        let mut connections = self
            .connections
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());
        for (_, stream) in connections.drain() {
            if let Err(error) = stream.shutdown(Shutdown::Both)
                && error.kind() != io::ErrorKind::NotConnected
            {
                debug!(target: SERVER_TARGET, error = %error, "failed to close connection");
            }
        }
    }
}

/// Binds `service` with default settings, announces it on stdout, and serves
/// until `ctx` is cancelled.
///
/// # Errors
///
/// Propagates [`PluginServer::bind`] and [`PluginServer::run`] failures.
pub fn serve<S: PluginService>(service: S, ctx: &JobContext) -> Result<(), ServeError> {
    PluginServer::bind(service, &ServerSettings::default())?.run(ctx)
}

fn spawn_watcher(
    ctx: JobContext,
    stop: StopHandle,
    endpoint: PathBuf,
    finished: Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        crossbeam_channel::select! {
            recv(ctx.done()) -> _ => {
                info!(target: SERVER_TARGET, "job context cancelled, stopping plugin endpoint");
                stop.stop();
                cleanup_endpoint(&endpoint);
            }
            recv(finished) -> _ => {}
        }
    })
}

fn accept_connection(listener: &UnixListener) -> io::Result<Option<UnixStream>> {
    match listener.accept() {
        Ok((stream, _)) => {
            stream.set_nonblocking(false)?;
            Ok(Some(stream))
        }
        Err(error) if error.kind() == io::ErrorKind::WouldBlock => Ok(None),
        Err(error) => Err(error),
    }
}

/// Removes a leftover file at `path`; a missing file is not an error.
fn remove_stale_endpoint(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => {
            debug!(target: SERVER_TARGET, path = %path.display(), "removed stale endpoint");
            Ok(())
        }
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(error) => Err(error),
    }
}

fn cleanup_endpoint(path: &Path) {
    if let Err(error) = fs::remove_file(path)
        && error.kind() != io::ErrorKind::NotFound
    {
        warn!(
            target: SERVER_TARGET,
            error = %error,
            path = %path.display(),
            "failed to remove plugin endpoint"
        );
    }
}
