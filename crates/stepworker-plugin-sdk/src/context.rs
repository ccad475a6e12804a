//! Cancellable job context shared by the worker and hosted plugins.
//!
//! A [`JobContext`] is the single cancellation authority for everything bound
//! to a running job. Clones share state: cancelling any clone cancels all of
//! them. Blocking code observes cancellation either by polling
//! [`JobContext::is_cancelled`] or by selecting on [`JobContext::done`], a
//! channel that disconnects once the context is cancelled.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use tracing::debug;

const CONTEXT_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::context");

/// Cloneable cancellation scope bounding a running job.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use stepworker_plugin_sdk::JobContext;
///
/// let ctx = JobContext::new();
/// let observer = ctx.clone();
/// assert!(!observer.wait_timeout(Duration::from_millis(1)));
/// ctx.cancel();
/// assert!(observer.is_cancelled());
/// assert!(observer.wait_timeout(Duration::from_millis(1)));
/// ```
#[derive(Debug, Clone)]
pub struct JobContext {
    inner: Arc<ContextState>,
}

#[derive(Debug)]
struct ContextState {
    cancelled: AtomicBool,
    trigger: Mutex<Option<Sender<()>>>,
    done: Receiver<()>,
}

impl Default for JobContext {
    fn default() -> Self {
        Self::new()
    }
}

impl JobContext {
    /// Creates a live, uncancelled context.
    #[must_use]
    pub fn new() -> Self {
        let (trigger, done) = crossbeam_channel::bounded(0);
        Self {
            inner: Arc::new(ContextState {
                cancelled: AtomicBool::new(false),
                trigger: Mutex::new(Some(trigger)),
                done,
            }),
        }
    }

    /// Cancels the context. Repeated calls are no-ops.
    pub fn cancel(&self) {
        if self.inner.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        let trigger = self
            .inner
            .trigger
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .take();
        drop(trigger);
        debug!(target: CONTEXT_TARGET, "job context cancelled");
    }

    /// Returns `true` once the context has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Channel that never yields a value and disconnects on cancellation.
    ///
    /// Intended for `crossbeam_channel::select!` alongside other receivers.
    #[must_use]
    pub fn done(&self) -> &Receiver<()> {
        &self.inner.done
    }

    /// Waits up to `timeout` for cancellation.
    ///
    /// Returns `true` when the context is cancelled, `false` on timeout.
    #[must_use]
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        !matches!(
            self.inner.done.recv_timeout(timeout),
            Err(RecvTimeoutError::Timeout)
        )
    }

    /// Blocks the calling thread until the context is cancelled.
    pub fn wait(&self) {
        while self.inner.done.recv().is_ok() {}
    }
}
