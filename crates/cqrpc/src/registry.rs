//! # Tag Registry
//!
//! Owns every live call state of a dispatcher, keyed by its tag.
//!
//! A call state is moved out of its slot for the duration of one `advance`, and
//! either put back (it armed another step under the same tag) or dropped (it reached
//! its terminal transition). The slot mutex is held across the advance, so a
//! completion for the next step that races onto another dispatch loop waits until the
//! current transition has finished.
//!
//! Once `close` has returned, `arm` refuses new call states. A dispatcher closes its
//! registry before shutting its queue down, so a loop that sees the queue shut down and
//! the registry empty cannot miss a call state armed concurrently.

use std::fmt;
use std::panic;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::RwLock;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use dashmap::DashMap;

use crate::queue::Event;
use crate::queue::Tag;

/// The closed set of interaction patterns.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Kind {
    Unary,
    ServerStreaming,
    ClientStreaming,
    BidiStreaming,
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unary => write!(f, "unary"),
            Self::ServerStreaming => write!(f, "server-streaming"),
            Self::ClientStreaming => write!(f, "client-streaming"),
            Self::BidiStreaming => write!(f, "bidi-streaming"),
        }
    }
}

/// Result of one transition.
pub enum Step {
    /// Another step was armed under the same tag.
    Pending(Box<dyn CallState>),
    /// Terminal transition. The state has been consumed.
    Done,
}

/// The contract shared by every client call and server method handler.
///
/// Lives in a private module: only this crate implements it.
pub trait CallState: Send {
    fn kind(&self) -> Kind;

    /// Handles the completion of the currently armed step.
    fn advance(self: Box<Self>, ok: bool) -> Step;
}

type Slot = Arc<Mutex<Option<Box<dyn CallState>>>>;

/// Concurrent map from tags to live call states.
#[derive(Clone)]
pub struct Registry {
    slots: Arc<DashMap<Tag, Slot>>,
    next_tag: Arc<AtomicU64>,
    closed: Arc<RwLock<bool>>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            slots: Arc::new(DashMap::new()),
            next_tag: Arc::new(AtomicU64::new(1)),
            closed: Arc::new(RwLock::new(false)),
        }
    }

    /// Mints a tag, builds a call state for it and registers the result.
    ///
    /// `build` arms the first asynchronous step. It runs with the new slot locked, so
    /// a completion posted while it is still running is handled only afterwards.
    /// Returns `None` without calling `build` once the registry is closed.
    pub fn arm<F>(&self, build: F) -> Option<Tag>
    where
        F: FnOnce(Tag) -> Box<dyn CallState>,
    {
        let slot: Slot = Arc::new(Mutex::new(None));
        let tag = {
            let closed = self.closed.read().unwrap_or_else(PoisonError::into_inner);
            if *closed {
                return None;
            }
            let tag = Tag::new(self.next_tag.fetch_add(1, Ordering::Relaxed));
            self.slots.insert(tag, Arc::clone(&slot));
            tag
        };

        let mut guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
        let state = build(tag);
        tracing::trace!(%tag, kind = %state.kind(), "call state armed");
        *guard = Some(state);
        Some(tag)
    }

    /// Routes one completion to the call state that owns its tag.
    pub fn dispatch(&self, event: Event) {
        let tag = event.tag;
        let Some(slot) = self.slots.get(&tag).map(|entry| Arc::clone(entry.value())) else {
            tracing::error!(%tag, ok = event.ok, "completion for a tag with no live call state");
            return;
        };

        let mut guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(state) = guard.take() else {
            tracing::error!(%tag, ok = event.ok, "call state vanished before its completion");
            drop(guard);
            self.slots.remove(&tag);
            return;
        };

        let kind = state.kind();
        match panic::catch_unwind(AssertUnwindSafe(move || state.advance(event.ok))) {
            Ok(Step::Pending(next)) => {
                *guard = Some(next);
            }
            Ok(Step::Done) => {
                drop(guard);
                self.slots.remove(&tag);
                tracing::trace!(%tag, %kind, "call state finished");
            }
            Err(_) => {
                drop(guard);
                self.slots.remove(&tag);
                tracing::error!(%tag, %kind, "call state panicked, call torn down");
            }
        }
    }

    /// Refuses every later `arm`. Call states already registered keep running.
    pub fn close(&self) {
        *self.closed.write().unwrap_or_else(PoisonError::into_inner) = true;
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Drops every live call state. Used when the owning dispatcher goes away.
    pub fn clear(&self) {
        let tags: Vec<Tag> = self.slots.iter().map(|entry| *entry.key()).collect();
        for tag in tags {
            if let Some((_, slot)) = self.slots.remove(&tag) {
                let state = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
                if let Some(state) = state {
                    tracing::debug!(%tag, kind = %state.kind(), "dropping unfinished call state");
                }
            }
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    /// Finishes after a fixed number of completions, counting each advance.
    struct Countdown {
        remaining: usize,
        advances: Arc<AtomicUsize>,
        failures: Arc<AtomicUsize>,
    }

    impl CallState for Countdown {
        fn kind(&self) -> Kind {
            Kind::ClientStreaming
        }

        fn advance(mut self: Box<Self>, ok: bool) -> Step {
            self.advances.fetch_add(1, Ordering::SeqCst);
            if !ok {
                self.failures.fetch_add(1, Ordering::SeqCst);
            }
            self.remaining -= 1;
            if self.remaining == 0 { Step::Done } else { Step::Pending(self) }
        }
    }

    struct Panicking;

    impl CallState for Panicking {
        fn kind(&self) -> Kind {
            Kind::Unary
        }

        fn advance(self: Box<Self>, _ok: bool) -> Step {
            panic!("user callback blew up");
        }
    }

    /// Arms a sibling on its first completion, then finishes.
    struct Spawner {
        registry: Registry,
        spawned: Arc<AtomicUsize>,
    }

    impl CallState for Spawner {
        fn kind(&self) -> Kind {
            Kind::BidiStreaming
        }

        fn advance(self: Box<Self>, _ok: bool) -> Step {
            let advances = Arc::new(AtomicUsize::new(0));
            let failures = Arc::new(AtomicUsize::new(0));
            self.registry.arm(|_| Box::new(Countdown { remaining: 1, advances, failures }));
            self.spawned.fetch_add(1, Ordering::SeqCst);
            Step::Done
        }
    }

    fn countdown(registry: &Registry, remaining: usize) -> (Tag, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let advances = Arc::new(AtomicUsize::new(0));
        let failures = Arc::new(AtomicUsize::new(0));
        let tag = registry
            .arm(|_| {
                Box::new(Countdown {
                    remaining,
                    advances: Arc::clone(&advances),
                    failures: Arc::clone(&failures),
                })
            })
            .unwrap();
        (tag, advances, failures)
    }

    #[test]
    fn test_tags_are_unique() {
        let registry = Registry::new();
        let (a, _, _) = countdown(&registry, 1);
        let (b, _, _) = countdown(&registry, 1);
        assert_ne!(a, b);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_state_is_reinserted_until_done() {
        let registry = Registry::new();
        let (tag, advances, failures) = countdown(&registry, 3);

        registry.dispatch(Event { tag, ok: true });
        registry.dispatch(Event { tag, ok: false });
        assert_eq!(registry.len(), 1);

        registry.dispatch(Event { tag, ok: true });
        assert!(registry.is_empty());
        assert_eq!(advances.load(Ordering::SeqCst), 3);
        assert_eq!(failures.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_event_after_done_is_ignored() {
        let registry = Registry::new();
        let (tag, advances, _) = countdown(&registry, 1);

        registry.dispatch(Event { tag, ok: true });
        registry.dispatch(Event { tag, ok: true });

        assert_eq!(advances.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_panicking_state_is_torn_down() {
        let registry = Registry::new();
        let tag = registry.arm(|_| Box::new(Panicking)).unwrap();
        let (other, advances, _) = countdown(&registry, 1);

        registry.dispatch(Event { tag, ok: true });
        assert_eq!(registry.len(), 1);

        registry.dispatch(Event { tag: other, ok: true });
        assert_eq!(advances.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_arm_from_inside_advance() {
        let registry = Registry::new();
        let spawned = Arc::new(AtomicUsize::new(0));
        let tag = registry
            .arm(|_| {
                Box::new(Spawner {
                    registry: registry.clone(),
                    spawned: Arc::clone(&spawned),
                })
            })
            .unwrap();

        registry.dispatch(Event { tag, ok: true });

        assert_eq!(spawned.load(Ordering::SeqCst), 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_clear_drops_everything() {
        let registry = Registry::new();
        countdown(&registry, 2);
        countdown(&registry, 2);

        registry.clear();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_closed_registry_refuses_new_states() {
        let registry = Registry::new();
        let (tag, advances, _) = countdown(&registry, 1);

        registry.close();
        assert!(registry.is_closed());
        let mut built = false;
        let refused = registry.arm(|_| {
            built = true;
            Box::new(Panicking)
        });
        assert_eq!(refused, None);
        assert!(!built);

        // States armed before closing still run to completion.
        registry.dispatch(Event { tag, ok: true });
        assert_eq!(advances.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
    }
}
