//! Output capture tee for plugin processes.
//!
//! The stdout and stderr pumps each hold a [`CaptureWriter`]. Every chunk a
//! writer receives is copied to every [`OutputView`] registered on the
//! [`CapturedOutput`]. Each view owns its own queue, so consumers never share
//! a read position. Once every writer has been dropped the views disconnect.
//!
//! Views only receive chunks written after they were created; register them
//! before the pumps start.

use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

/// Shared capture tee.
#[derive(Debug, Clone, Default)]
pub struct CapturedOutput {
    inner: Arc<CaptureState>,
}

#[derive(Debug, Default)]
struct CaptureState {
    views: Mutex<Vec<Sender<Vec<u8>>>>,
    writers: AtomicUsize,
    closed: AtomicBool,
    bytes: AtomicU64,
    chunks: AtomicU64,
}

impl CapturedOutput {
    /// Creates a tee with no views and no writers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new independent view.
    ///
    /// A view created after the tee closed is disconnected immediately.
    #[must_use]
    pub fn view(&self) -> OutputView {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let mut views = self.lock_views();
        if !self.inner.closed.load(Ordering::SeqCst) {
            views.push(sender);
        }
        OutputView { receiver }
    }

    /// Returns a writer feeding the tee; the tee closes when the last writer
    /// is dropped.
    #[must_use]
    pub fn writer(&self) -> CaptureWriter {
        self.inner.writers.fetch_add(1, Ordering::SeqCst);
        CaptureWriter {
            output: self.clone(),
        }
    }

    /// Read-only statistics handle.
    #[must_use]
    pub fn stats(&self) -> CaptureStats {
        CaptureStats {
            inner: Arc::clone(&self.inner),
        }
    }

    fn broadcast(&self, chunk: &[u8]) {
        if chunk.is_empty() {
            return;
        }
        let len = u64::try_from(chunk.len()).unwrap_or(u64::MAX);
        self.inner.bytes.fetch_add(len, Ordering::Relaxed);
        self.inner.chunks.fetch_add(1, Ordering::Relaxed);
        let mut views = self.lock_views();
        views.retain(|view| view.send(chunk.to_vec()).is_ok());
    }

    fn release_writer(&self) {
        if self.inner.writers.fetch_sub(1, Ordering::SeqCst) == 1 {
            let mut views = self.lock_views();
            self.inner.closed.store(true, Ordering::SeqCst);
            views.clear();
        }
    }

    fn lock_views(&self) -> std::sync::MutexGuard<'_, Vec<Sender<Vec<u8>>>> {
        self.inner
            .views
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }
}

/// Statistics about captured output, shared with client handles.
#[derive(Debug, Clone)]
pub struct CaptureStats {
    inner: Arc<CaptureState>,
}

impl CaptureStats {
    /// Total bytes captured so far.
    #[must_use]
    pub fn bytes_captured(&self) -> u64 {
        self.inner.bytes.load(Ordering::Relaxed)
    }

    /// Number of non-empty chunks captured so far.
    #[must_use]
    pub fn chunks_captured(&self) -> u64 {
        self.inner.chunks.load(Ordering::Relaxed)
    }

    /// Returns `true` once every writer has been dropped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

/// Writer half used by one output pump.
#[derive(Debug)]
pub struct CaptureWriter {
    output: CapturedOutput,
}

impl Write for CaptureWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.output.broadcast(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for CaptureWriter {
    fn drop(&mut self) {
        self.output.release_writer();
    }
}

/// Outcome of a bounded read from a view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewRead {
    /// A captured chunk.
    Chunk(Vec<u8>),
    /// Nothing arrived within the timeout.
    Idle,
    /// All writers are gone and every chunk has been consumed.
    Closed,
}

/// Independent reader over captured output.
#[derive(Debug)]
pub struct OutputView {
    receiver: Receiver<Vec<u8>>,
}

impl OutputView {
    /// Channel of chunks, for use in `crossbeam_channel::select!`.
    #[must_use]
    pub const fn receiver(&self) -> &Receiver<Vec<u8>> {
        &self.receiver
    }

    /// Waits up to `timeout` for the next chunk.
    #[must_use]
    pub fn read_timeout(&self, timeout: Duration) -> ViewRead {
        match self.receiver.recv_timeout(timeout) {
            Ok(chunk) => ViewRead::Chunk(chunk),
            Err(RecvTimeoutError::Timeout) => ViewRead::Idle,
            Err(RecvTimeoutError::Disconnected) => ViewRead::Closed,
        }
    }

    /// Takes every chunk that is already queued, concatenated.
    #[must_use]
    pub fn drain(&self) -> Vec<u8> {
        self.receiver.try_iter().flatten().collect()
    }
}
