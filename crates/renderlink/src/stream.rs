//! The long-lived event stream and its reader thread.
//!
//! ```text
//!  Unconnected ──connect()──> Open ──peer closed / read error──> Closed
//!                              │                                  ^
//!                              └────────────shutdown()────────────┘
//! ```
//!
//! While open, a single OS thread reads one [`EventEnvelope`] at a time and
//! dispatches it through the [`CallbackRegistry`] before reading the next, so
//! callbacks fire in wire order and never concurrently. A slow callback
//! therefore delays every later event on the connection.
//!
//! Callbacks run outside the tokio runtime, so they may issue blocking calls
//! through an [`RpcInvoker`](crate::RpcInvoker).

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use parking_lot::{Condvar, Mutex};
use tokio::runtime::Handle;
use tokio::sync::watch;

use crate::error::{RpcError, StreamError};
use crate::event::EventEnvelope;
use crate::registry::{CallbackRegistry, Dispatch};

/// Name of the reader thread.
pub const READER_THREAD_NAME: &str = "renderlink-events";

/// Inbound events as produced by a transport.
pub type EventStream = BoxStream<'static, Result<EventEnvelope, StreamError>>;

/// Something that can open the notification stream.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Open the stream. Dropping the returned stream must cancel it.
    async fn open(&self) -> Result<EventStream, RpcError>;
}

/// Why a stream reached [`StreamState::Closed`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CloseReason {
    /// [`EventStreamClient::shutdown`] was called.
    Shutdown,
    /// The renderer ended the stream.
    PeerClosed,
    /// Reading failed.
    Failed(String),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shutdown => f.write_str("shut down"),
            Self::PeerClosed => f.write_str("closed by peer"),
            Self::Failed(e) => write!(f, "failed: {e}"),
        }
    }
}

/// Lifecycle state of an [`EventStreamClient`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamState {
    /// `connect` has not succeeded yet.
    Unconnected,
    /// The reader thread is running.
    Open,
    /// Terminal. No further events are dispatched.
    Closed(CloseReason),
}

struct Shared {
    state: Mutex<StreamState>,
    state_changed: Condvar,
    stopping: AtomicBool,
    /// Set by the reader thread before it reads anything.
    reader_thread: OnceLock<ThreadId>,
    registry: Arc<CallbackRegistry>,
}

impl Shared {
    fn set_state(&self, state: StreamState) {
        let mut current = self.state.lock();
        if matches!(*current, StreamState::Closed(_)) {
            return;
        }
        tracing::debug!(from = ?&*current, to = ?&state, "event stream state change");
        *current = state;
        self.state_changed.notify_all();
    }

    fn stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    fn on_reader_thread(&self) -> bool {
        self.reader_thread.get() == Some(&thread::current().id())
    }
}

/// Client side of the notification stream.
///
/// There is one per renderer connection. Dropping it shuts it down.
pub struct EventStreamClient {
    shared: Arc<Shared>,
    source: Arc<dyn EventSource>,
    runtime: Handle,
    shutdown_tx: watch::Sender<bool>,
    /// Held across the join in `shutdown`, so concurrent callers all wait
    /// for the reader to exit. Never locked on the reader thread.
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for EventStreamClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStreamClient")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl EventStreamClient {
    /// Create an unconnected client.
    ///
    /// `runtime` drives the stream; events are dispatched into `registry`.
    pub fn new(
        source: Arc<dyn EventSource>,
        registry: Arc<CallbackRegistry>,
        runtime: Handle,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(StreamState::Unconnected),
                state_changed: Condvar::new(),
                stopping: AtomicBool::new(false),
                reader_thread: OnceLock::new(),
                registry,
            }),
            source,
            runtime,
            shutdown_tx,
            reader: Mutex::new(None),
        }
    }

    /// Open the stream and start the reader thread.
    ///
    /// Blocks until the stream is open. Must not be called from inside the
    /// tokio runtime. If opening fails the client stays
    /// [`StreamState::Unconnected`] and `connect` may be retried.
    pub fn connect(&self) -> Result<(), StreamError> {
        if self.shared.on_reader_thread() {
            return Err(StreamError::InvalidState("open"));
        }
        let mut reader = self.reader.lock();
        match self.state() {
            StreamState::Unconnected => {}
            StreamState::Open => return Err(StreamError::InvalidState("open")),
            StreamState::Closed(_) => return Err(StreamError::InvalidState("closed")),
        }
        if self.shared.stopping() {
            return Err(StreamError::InvalidState("closed"));
        }

        let stream = self
            .runtime
            .block_on(self.source.open())
            .map_err(StreamError::Open)?;

        self.shared.set_state(StreamState::Open);

        let shared = Arc::clone(&self.shared);
        let runtime = self.runtime.clone();
        let shutdown_rx = self.shutdown_tx.subscribe();
        let spawned = thread::Builder::new()
            .name(READER_THREAD_NAME.to_string())
            .spawn(move || read_events(shared, runtime, stream, shutdown_rx));

        match spawned {
            Ok(handle) => {
                *reader = Some(handle);
                tracing::debug!("event stream open");
                Ok(())
            }
            Err(e) => {
                self.shared
                    .set_state(StreamState::Closed(CloseReason::Failed(e.to_string())));
                Err(StreamError::Spawn(e.to_string()))
            }
        }
    }

    /// Stop dispatching, cancel the stream and wait for the reader thread.
    ///
    /// An event already being dispatched finishes first; events read after
    /// this call are discarded. Idempotent, and every caller returns only once
    /// the reader thread has exited.
    ///
    /// When called from a callback on the reader thread itself, the thread is
    /// told to stop but not joined. A later call from any other thread still
    /// waits for it.
    pub fn shutdown(&self) {
        self.shared.stopping.store(true, Ordering::SeqCst);
        self.shutdown_tx.send_replace(true);

        if self.shared.on_reader_thread() {
            tracing::debug!("shutdown requested from the reader thread");
            return;
        }

        let mut reader = self.reader.lock();
        if let Some(handle) = reader.take()
            && handle.join().is_err()
        {
            tracing::error!("event reader thread panicked");
            self.shared.set_state(StreamState::Closed(CloseReason::Failed(
                "reader thread panicked".to_string(),
            )));
        }
        drop(reader);

        self.shared
            .set_state(StreamState::Closed(CloseReason::Shutdown));
    }

    /// Current state.
    pub fn state(&self) -> StreamState {
        self.shared.state.lock().clone()
    }

    /// Whether the reader thread is running.
    pub fn is_open(&self) -> bool {
        self.state() == StreamState::Open
    }

    /// Block until the stream is closed or `timeout` elapses, returning the
    /// state at that point.
    ///
    /// The state turns `Closed` before `connection_lost` listeners run, so
    /// they may still be running when this returns. [`shutdown`] waits for
    /// them.
    ///
    /// [`shutdown`]: EventStreamClient::shutdown
    pub fn wait_closed(&self, timeout: Duration) -> StreamState {
        let mut state = self.shared.state.lock();
        let _ = self.shared.state_changed.wait_while_for(
            &mut state,
            |s| !matches!(s, StreamState::Closed(_)),
            timeout,
        );
        state.clone()
    }

    /// Registry events are dispatched into.
    pub fn registry(&self) -> &Arc<CallbackRegistry> {
        &self.shared.registry
    }
}

impl Drop for EventStreamClient {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn read_events(
    shared: Arc<Shared>,
    runtime: Handle,
    mut stream: EventStream,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let _ = shared.reader_thread.set(thread::current().id());

    let reason = loop {
        // Only the read happens inside the runtime: callbacks must be free to
        // make blocking calls of their own.
        let next = runtime.block_on(async {
            tokio::select! {
                biased;
                _ = shutdown_rx.wait_for(|stop| *stop) => None,
                next = stream.next() => Some(next),
            }
        });

        let event = match next {
            None => break CloseReason::Shutdown,
            Some(None) => break CloseReason::PeerClosed,
            Some(Some(Err(e))) => break CloseReason::Failed(e.to_string()),
            Some(Some(Ok(event))) => event,
        };

        if shared.stopping() {
            tracing::debug!(kind = event.kind(), "discarding event read during shutdown");
            break CloseReason::Shutdown;
        }

        let kind = event.kind();
        let callback_id = event.callback_id();
        match catch_unwind(AssertUnwindSafe(|| shared.registry.dispatch(&event))) {
            Ok(Dispatch::Delivered) => {
                tracing::trace!(kind, %callback_id, "event delivered");
            }
            Ok(Dispatch::Dropped) => {}
            Err(_) => {
                tracing::error!(kind, %callback_id, "callback panicked");
            }
        }
    };

    {
        let _enter = runtime.enter();
        drop(stream);
    }

    let reason = if shared.stopping() {
        CloseReason::Shutdown
    } else {
        reason
    };

    match &reason {
        CloseReason::Shutdown => tracing::debug!("event stream shut down"),
        other => tracing::warn!(reason = %other, "event stream lost"),
    }
    shared.set_state(StreamState::Closed(reason.clone()));

    if reason != CloseReason::Shutdown {
        shared.registry.notify_connection_lost(&reason);
    }
}
