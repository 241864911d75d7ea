// ── Live streams ──
//
// Reference-counted, memory-bearing streams over callback producers.
// A producer is started when the first subscriber arrives and torn down
// when the last subscription is dropped. The latest value is replayed
// to subscribers that join while the stream is active.

use std::fmt;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use futures_core::Stream;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::debug;

use crate::error::CoreError;

type Item<T> = Result<T, CoreError>;

// ── Producer side ────────────────────────────────────────────────────

/// Deregistration step handed back by a [`Producer`] when it starts.
pub(crate) struct Teardown(Option<Box<dyn FnOnce() + Send>>);

impl Teardown {
    pub(crate) fn new(f: impl FnOnce() + Send + 'static) -> Self {
        Self(Some(Box::new(f)))
    }

    /// For producers whose registration outlives the stream.
    pub(crate) fn noop() -> Self {
        Self(None)
    }

    fn run(mut self) {
        if let Some(f) = self.0.take() {
            f();
        }
    }
}

/// Source of values for a [`LiveStream`].
///
/// `start` may emit through the sink synchronously before returning.
pub(crate) trait Producer<T>: Send + Sync + 'static {
    fn start(&self, sink: Sink<T>) -> Teardown;
}

/// Write end given to a producer for one activation of a stream.
///
/// Once that activation ends (last unsubscribe, or a terminal event) the
/// sink goes stale and everything sent through it is dropped.
pub(crate) struct Sink<T> {
    shared: Weak<Shared<T>>,
    epoch: u64,
}

impl<T> Clone for Sink<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Weak::clone(&self.shared),
            epoch: self.epoch,
        }
    }
}

impl<T: Clone + Send + 'static> Sink<T> {
    pub(crate) fn epoch(&self) -> u64 {
        self.epoch
    }

    pub(crate) fn next(&self, value: T) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        let mut state = shared.state.lock();
        if !state.is_current(self.epoch) {
            return;
        }
        for (_, tx) in &state.subscribers {
            let _ = tx.send(Ok(value.clone()));
        }
        state.memory = Some(value);
    }

    /// End every subscription with `err`.
    pub(crate) fn error(&self, err: CoreError) {
        self.terminate(Some(err));
    }

    /// End every subscription cleanly.
    pub(crate) fn complete(&self) {
        self.terminate(None);
    }

    fn terminate(&self, err: Option<CoreError>) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        let teardown = {
            let mut state = shared.state.lock();
            if !state.is_current(self.epoch) {
                return;
            }
            let subscribers = std::mem::take(&mut state.subscribers);
            if let Some(err) = &err {
                for (_, tx) in &subscribers {
                    let _ = tx.send(Err(err.clone()));
                }
            }
            state.deactivate()
        };
        debug!(stream = %shared.label, failed = err.is_some(), "stream terminated");
        if let Some(teardown) = teardown {
            teardown.run();
        }
    }
}

// ── Shared state ─────────────────────────────────────────────────────

struct State<T> {
    subscribers: Vec<(u64, mpsc::UnboundedSender<Item<T>>)>,
    memory: Option<T>,
    teardown: Option<Teardown>,
    active: bool,
    epoch: u64,
    next_id: u64,
}

impl<T> State<T> {
    fn is_current(&self, epoch: u64) -> bool {
        self.active && self.epoch == epoch
    }

    /// Return to idle. Returns the teardown of the ending activation, if
    /// its producer has finished starting.
    fn deactivate(&mut self) -> Option<Teardown> {
        self.active = false;
        self.epoch += 1;
        self.memory = None;
        self.teardown.take()
    }
}

struct Shared<T> {
    label: String,
    producer: Box<dyn Producer<T>>,
    /// Serializes start / stop transitions. Never taken by sinks, so a
    /// producer may emit from inside `start`.
    lifecycle: Mutex<()>,
    state: Mutex<State<T>>,
}

impl<T: Clone + Send + 'static> Shared<T> {
    fn subscribe(self: &Arc<Self>) -> Subscription<T> {
        let _lifecycle = self.lifecycle.lock();
        let (tx, rx) = mpsc::unbounded_channel();

        let (id, start_epoch) = {
            let mut state = self.state.lock();
            let id = state.next_id;
            state.next_id += 1;
            if let Some(value) = &state.memory {
                let _ = tx.send(Ok(value.clone()));
            }
            state.subscribers.push((id, tx));
            if state.active {
                (id, None)
            } else {
                state.active = true;
                state.epoch += 1;
                (id, Some(state.epoch))
            }
        };

        if let Some(epoch) = start_epoch {
            debug!(stream = %self.label, epoch, "starting producer");
            let teardown = self.producer.start(Sink {
                shared: Arc::downgrade(self),
                epoch,
            });
            let mut state = self.state.lock();
            if state.is_current(epoch) {
                state.teardown = Some(teardown);
            } else {
                // Terminated while starting.
                drop(state);
                teardown.run();
            }
        }

        Subscription {
            id,
            shared: Arc::clone(self),
            inner: UnboundedReceiverStream::new(rx),
        }
    }

    fn unsubscribe(&self, id: u64) {
        let _lifecycle = self.lifecycle.lock();
        let teardown = {
            let mut state = self.state.lock();
            state.subscribers.retain(|(sid, _)| *sid != id);
            if state.active && state.subscribers.is_empty() {
                state.deactivate()
            } else {
                None
            }
        };
        if let Some(teardown) = teardown {
            debug!(stream = %self.label, "last subscriber gone, stopping producer");
            teardown.run();
        }
    }
}

// ── LiveStream ───────────────────────────────────────────────────────

/// A lazily started, shared, memory-bearing stream.
///
/// Cloning yields another handle to the *same* stream instance. Each call
/// to [`subscribe`](Self::subscribe) returns an independent
/// [`Subscription`]; the underlying producer runs while at least one
/// subscription is alive.
pub struct LiveStream<T: Clone + Send + 'static> {
    shared: Arc<Shared<T>>,
}

impl<T: Clone + Send + 'static> LiveStream<T> {
    pub(crate) fn new(label: impl Into<String>, producer: impl Producer<T>) -> Self {
        Self {
            shared: Arc::new(Shared {
                label: label.into(),
                producer: Box::new(producer),
                lifecycle: Mutex::new(()),
                state: Mutex::new(State {
                    subscribers: Vec::new(),
                    memory: None,
                    teardown: None,
                    active: false,
                    epoch: 0,
                    next_id: 0,
                }),
            }),
        }
    }

    /// Subscribe, starting the producer if the stream is idle. A
    /// subscriber joining an active stream first receives its latest value.
    pub fn subscribe(&self) -> Subscription<T> {
        self.shared.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared.state.lock().subscribers.len()
    }

    /// Whether the producer is currently running.
    pub fn is_active(&self) -> bool {
        self.shared.state.lock().active
    }

    /// Human-readable description used in logs.
    pub fn label(&self) -> &str {
        &self.shared.label
    }
}

impl<T: Clone + Send + 'static> Clone for LiveStream<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Clone + Send + 'static> fmt::Debug for LiveStream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveStream")
            .field("label", &self.shared.label)
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

// ── Subscription ─────────────────────────────────────────────────────

/// One consumer's view of a [`LiveStream`].
///
/// Yields `Ok(value)` for every emission and ends after a terminal event;
/// an error is delivered as a final `Err` item. Dropping the subscription
/// unsubscribes, and dropping the last one stops the producer.
pub struct Subscription<T: Clone + Send + 'static> {
    id: u64,
    shared: Arc<Shared<T>>,
    inner: UnboundedReceiverStream<Item<T>>,
}

impl<T: Clone + Send + 'static> Stream for Subscription<T> {
    type Item = Item<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

impl<T: Clone + Send + 'static> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.shared.unsubscribe(self.id);
    }
}
