//! Virtual processes, byte streams and cooperative signals
//!
//! There is no OS process beneath a pipeline stage. A stage is a future that
//! talks to its neighbours through [`OutputStream`] / [`InputStream`] pairs
//! and learns about cancellation through a [`SignalChannel`]. Every stream
//! write yields to the scheduler, so connected stages interleave on a single
//! task.

use bytes::{Bytes, BytesMut};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use thiserror::Error;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;

pub(crate) const STREAM_CHUNK_SIZE: usize = 64 * 1024;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    Interrupt,
    Terminate,
}

impl Signal {
    pub fn number(self) -> i32 {
        match self {
            Self::Interrupt => 2,
            Self::Terminate => 15,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Interrupt => "SIGINT",
            Self::Terminate => "SIGTERM",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How a process finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitStatus {
    pub code: i32,
    pub signal: Option<Signal>,
}

impl ExitStatus {
    pub const SUCCESS: Self = Self { code: 0, signal: None };
    pub const FAILURE: Self = Self { code: 1, signal: None };

    pub fn code(code: i32) -> Self {
        Self { code, signal: None }
    }

    /// Status of a process ended by `signal`: `128 + n`.
    pub fn from_signal(signal: Signal) -> Self {
        Self {
            code: 128 + signal.number(),
            signal: Some(signal),
        }
    }

    pub fn success(&self) -> bool {
        self.code == 0
    }
}

impl From<i32> for ExitStatus {
    fn from(code: i32) -> Self {
        Self::code(code)
    }
}

impl From<bool> for ExitStatus {
    fn from(ok: bool) -> Self {
        if ok {
            Self::SUCCESS
        } else {
            Self::FAILURE
        }
    }
}

/// The reading end of a stream went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Broken pipe")]
pub struct StreamClosed;

/// Create a connected stream pair.
pub fn pipe() -> (OutputStream, InputStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        OutputStream { tx: Some(tx) },
        InputStream {
            rx: Some(rx),
            pending: BytesMut::new(),
        },
    )
}

/// Writable end of a stream. Chunks arrive in the order they were written.
#[derive(Clone, Debug)]
pub struct OutputStream {
    tx: Option<mpsc::UnboundedSender<Bytes>>,
}

impl OutputStream {
    /// A stream that accepts and discards everything.
    pub fn null() -> Self {
        Self { tx: None }
    }

    pub async fn write(&self, data: impl Into<Bytes>) -> Result<(), StreamClosed> {
        let data = data.into();
        if data.is_empty() {
            return Ok(());
        }
        if let Some(tx) = &self.tx {
            tx.send(data).map_err(|_| StreamClosed)?;
        }
        tokio::task::yield_now().await;
        Ok(())
    }

    pub async fn write_str(&self, s: &str) -> Result<(), StreamClosed> {
        self.write(Bytes::copy_from_slice(s.as_bytes())).await
    }

    pub async fn writeln(&self, s: &str) -> Result<(), StreamClosed> {
        let mut line = String::with_capacity(s.len() + 1);
        line.push_str(s);
        line.push('\n');
        self.write(line).await
    }

    /// True once the reader has been dropped.
    pub fn is_closed(&self) -> bool {
        self.tx.as_ref().is_some_and(mpsc::UnboundedSender::is_closed)
    }
}

/// Readable end of a stream. Reading ends when every writer is dropped.
#[derive(Debug)]
pub struct InputStream {
    rx: Option<mpsc::UnboundedReceiver<Bytes>>,
    pending: BytesMut,
}

impl InputStream {
    /// A stream that is already at end of input.
    pub fn empty() -> Self {
        Self {
            rx: None,
            pending: BytesMut::new(),
        }
    }

    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        let data: Bytes = data.into();
        Self {
            rx: None,
            pending: BytesMut::from(&data[..]),
        }
    }

    /// Next chunk of input, `None` at end of input.
    pub async fn read_chunk(&mut self) -> Option<Bytes> {
        if !self.pending.is_empty() {
            return Some(self.pending.split().freeze());
        }
        match &mut self.rx {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }

    pub async fn read_to_end(&mut self) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(chunk) = self.read_chunk().await {
            out.extend_from_slice(&chunk);
        }
        out
    }

    pub async fn read_to_string(&mut self) -> String {
        String::from_utf8_lossy(&self.read_to_end().await).into_owned()
    }

    /// Next line without its terminator. A final unterminated line is returned
    /// as-is; `None` at end of input.
    pub async fn read_line(&mut self) -> Option<String> {
        loop {
            if let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
                let line = self.pending.split_to(pos + 1);
                return Some(String::from_utf8_lossy(&line[..pos]).into_owned());
            }
            let next = match &mut self.rx {
                Some(rx) => rx.recv().await,
                None => None,
            };
            match next {
                Some(chunk) => self.pending.extend_from_slice(&chunk),
                None if self.pending.is_empty() => return None,
                None => {
                    let rest = self.pending.split();
                    return Some(String::from_utf8_lossy(&rest).into_owned());
                }
            }
        }
    }

    /// Stop reading; writers see [`StreamClosed`] from now on.
    pub fn close(&mut self) {
        self.rx = None;
        self.pending.clear();
    }
}

type SignalHandler = Box<dyn Fn(Signal) + Send + Sync>;

struct SignalInner {
    handlers: Mutex<Vec<SignalHandler>>,
    token: CancellationToken,
    received: OnceLock<Signal>,
}

/// Cooperative signal delivery for one process.
///
/// Delivering a signal records it, cancels the token and calls every
/// registered handler. Nothing is interrupted: a process that neither
/// registers a handler nor awaits [`SignalChannel::cancelled`] runs to
/// completion.
#[derive(Clone)]
pub struct SignalChannel {
    inner: Arc<SignalInner>,
}

impl Default for SignalChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SignalChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalChannel")
            .field("received", &self.received())
            .finish_non_exhaustive()
    }
}

impl SignalChannel {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SignalInner {
                handlers: Mutex::new(Vec::new()),
                token: CancellationToken::new(),
                received: OnceLock::new(),
            }),
        }
    }

    pub fn on_signal(&self, handler: impl Fn(Signal) + Send + Sync + 'static) {
        lock(&self.inner.handlers).push(Box::new(handler));
    }

    pub fn deliver(&self, signal: Signal) {
        let _ = self.inner.received.set(signal);
        self.inner.token.cancel();
        for handler in lock(&self.inner.handlers).iter() {
            handler(signal);
        }
    }

    /// First signal delivered, if any.
    pub fn received(&self) -> Option<Signal> {
        self.inner.received.get().copied()
    }

    /// Resolves once a signal has been delivered.
    pub async fn cancelled(&self) -> Signal {
        self.inner.token.cancelled().await;
        self.received().unwrap_or(Signal::Interrupt)
    }

    pub fn token(&self) -> CancellationToken {
        self.inner.token.clone()
    }
}

/// Engine-side handle of a running stage.
///
/// The exit status is set exactly once; later attempts are ignored.
#[derive(Debug)]
pub struct Process {
    pub id: u64,
    pub name: String,
    pub signals: SignalChannel,
    exit: OnceLock<ExitStatus>,
    done: Notify,
}

impl Process {
    pub fn new(id: u64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            signals: SignalChannel::new(),
            exit: OnceLock::new(),
            done: Notify::new(),
        }
    }

    /// Record the exit status. Returns false if one was already recorded.
    pub fn set_exit(&self, status: ExitStatus) -> bool {
        let first = self.exit.set(status).is_ok();
        if first {
            self.done.notify_waiters();
        }
        first
    }

    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.exit.get().copied()
    }

    pub async fn wait(&self) -> ExitStatus {
        loop {
            let notified = self.done.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if let Some(status) = self.exit_status() {
                return status;
            }
            notified.await;
        }
    }
}

/// Stages of the current foreground job, for signal fan-out.
#[derive(Debug, Default)]
pub struct JobTable {
    next_id: AtomicU64,
    running: Mutex<HashMap<u64, Arc<Process>>>,
    pending: Mutex<Option<Signal>>,
}

impl JobTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new stage. It leaves the table when the guard drops.
    /// A stage started after an undrained signal receives it immediately.
    pub fn spawn(self: &Arc<Self>, name: &str) -> JobGuard {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let process = Arc::new(Process::new(id, name));
        lock(&self.running).insert(id, process.clone());
        if let Some(signal) = *lock(&self.pending) {
            process.signals.deliver(signal);
        }
        JobGuard {
            table: self.clone(),
            process,
        }
    }

    /// Fan `signal` out to every running stage.
    pub fn signal(&self, signal: Signal) -> usize {
        *lock(&self.pending) = Some(signal);
        let running: Vec<Arc<Process>> = lock(&self.running).values().cloned().collect();
        for process in &running {
            tracing::debug!(stage = %process.name, %signal, "delivering signal");
            process.signals.deliver(signal);
        }
        running.len()
    }

    /// Signal received since the last [`JobTable::reset`].
    pub fn pending(&self) -> Option<Signal> {
        *lock(&self.pending)
    }

    pub fn reset(&self) {
        *lock(&self.pending) = None;
    }

    pub fn running(&self) -> usize {
        lock(&self.running).len()
    }
}

pub struct JobGuard {
    table: Arc<JobTable>,
    process: Arc<Process>,
}

impl JobGuard {
    pub fn process(&self) -> &Arc<Process> {
        &self.process
    }
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        lock(&self.table.running).remove(&self.process.id);
    }
}
