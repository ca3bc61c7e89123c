//! # Completion Queue
//!
//! The single conduit through which a transport reports finished asynchronous steps.
//!
//! ## Philosophy
//!
//! - **Tag-Oriented**: The queue knows nothing about calls, messages or statuses.
//!   It moves `(tag, ok)` pairs, in the order the transport posted them.
//! - **Many Readers**: Any number of dispatch loops may wait on the same queue.
//!   Each event is handed to exactly one of them.
//! - **Explicit Shutdown**: `shutdown()` appends a marker behind every event already
//!   posted, so readers drain what is queued before they observe it.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use tokio::sync::Mutex;
use tokio::sync::mpsc;

/// Correlation key of one in-flight call state.
///
/// Tags are minted by the dispatcher's registry from a monotonic counter and are never
/// reused while the owning call state is alive.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct Tag(u64);

impl Tag {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tag-{}", self.0)
    }
}

/// A completed asynchronous step.
///
/// `ok == false` means the step itself did not succeed at the transport level
/// (a read hit end-of-stream, a write found the stream closed, an accept was cancelled).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Event {
    pub tag: Tag,
    pub ok: bool,
}

enum Slot {
    Event(Event),
    Wake,
}

/// Posting half of a completion queue, handed to transports.
#[derive(Clone)]
pub struct Notifier {
    tx: mpsc::UnboundedSender<Slot>,
}

impl Notifier {
    /// Reports that the step armed with `tag` has completed.
    pub fn post(&self, tag: Tag, ok: bool) {
        if self.tx.send(Slot::Event(Event { tag, ok })).is_err() {
            tracing::trace!(%tag, ok, "completion dropped, queue is gone");
        }
    }
}

impl fmt::Debug for Notifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notifier").finish_non_exhaustive()
    }
}

/// A multi-reader queue of completion events.
pub struct CompletionQueue {
    tx: mpsc::UnboundedSender<Slot>,
    rx: Mutex<mpsc::UnboundedReceiver<Slot>>,
    shutdown: Arc<AtomicBool>,
}

impl CompletionQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(rx),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Returns a handle transports use to post completions into this queue.
    pub fn notifier(&self) -> Notifier {
        Notifier { tx: self.tx.clone() }
    }

    /// Waits for the next completion.
    ///
    /// Returns `None` when a shutdown marker is reached. Events posted before
    /// `shutdown()` are always returned first.
    pub async fn next(&self) -> Option<Event> {
        let mut rx = self.rx.lock().await;
        match rx.recv().await {
            Some(Slot::Event(event)) => Some(event),
            Some(Slot::Wake) | None => None,
        }
    }

    /// Marks the queue as shut down and wakes one reader.
    ///
    /// Idempotent. Completions posted afterwards are still delivered, so in-flight
    /// calls can reach their terminal step.
    pub fn shutdown(&self) {
        if !self.shutdown.swap(true, Ordering::AcqRel) {
            self.wake();
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Appends a shutdown marker so one more waiting reader returns from `next()`.
    pub(crate) fn wake(&self) {
        let _ = self.tx.send(Slot::Wake);
    }
}

impl Default for CompletionQueue {
    fn default() -> Self {
        Self::new()
    }
}
