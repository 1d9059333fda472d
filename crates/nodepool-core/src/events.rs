//! Event system shared by the node selector and the dispatcher.
//!
//! Mirrors the `EventListener`/`EventListeners` pattern used throughout the
//! resilience-pattern ecosystem this crate grew out of, minus the
//! `tower::Service` coupling those crates carry — nothing here wraps a
//! `Service`, so the event trait doesn't need to know about one.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// An event emitted by the selector or dispatcher.
pub trait NodePoolEvent: Send + Sync + fmt::Debug {
    /// Short machine-readable name, e.g. `"NodeReserved"`.
    fn event_type(&self) -> &'static str;

    /// When the event occurred.
    fn timestamp(&self) -> Instant;
}

/// Receives events emitted by a chain or dispatcher.
pub trait EventListener<E: NodePoolEvent>: Send + Sync {
    fn on_event(&self, event: &E);
}

type BoxedEventListener<E> = Arc<dyn EventListener<E>>;

/// A collection of event listeners, cheaply cloneable.
#[derive(Clone)]
pub struct EventListeners<E: NodePoolEvent> {
    listeners: Vec<BoxedEventListener<E>>,
}

impl<E: NodePoolEvent> EventListeners<E> {
    pub fn new() -> Self {
        Self {
            listeners: Vec::new(),
        }
    }

    pub fn add<L>(&mut self, listener: L)
    where
        L: EventListener<E> + 'static,
    {
        self.listeners.push(Arc::new(listener));
    }

    /// Emits `event` to every listener. A panicking listener is caught so it
    /// cannot prevent the others from observing the event.
    pub fn emit(&self, event: &E) {
        for listener in &self.listeners {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                listener.on_event(event);
            }));

            if result.is_err() {
                #[cfg(feature = "tracing")]
                tracing::warn!(event_type = event.event_type(), "event listener panicked");
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

impl<E: NodePoolEvent> Default for EventListeners<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// A function-based listener, for quick inline hooks.
pub struct FnListener<E, F>
where
    F: Fn(&E) + Send + Sync,
{
    f: F,
    _phantom: std::marker::PhantomData<E>,
}

impl<E, F> FnListener<E, F>
where
    F: Fn(&E) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self {
            f,
            _phantom: std::marker::PhantomData,
        }
    }
}

impl<E, F> EventListener<E> for FnListener<E, F>
where
    E: NodePoolEvent,
    F: Fn(&E) + Send + Sync,
{
    fn on_event(&self, event: &E) {
        (self.f)(event)
    }
}

/// Events emitted by a [`crate::chain::Chain`] during selection, release, and
/// admin operations.
#[derive(Debug, Clone)]
pub enum ChainEvent {
    /// A node was selected and its `hits` counter incremented.
    NodeReserved {
        timestamp: Instant,
        chain_id: String,
        node_name: String,
        wait: std::time::Duration,
    },
    /// A previously reserved slot was released after `per` elapsed.
    NodeReleased {
        timestamp: Instant,
        chain_id: String,
        node_name: String,
    },
    /// The selector could not find a candidate within `max_check_duration`.
    SelectionExhausted {
        timestamp: Instant,
        chain_id: String,
    },
    /// A node was administratively disabled.
    NodeDisabled {
        timestamp: Instant,
        chain_id: String,
        node_name: String,
    },
    /// A node was administratively re-enabled.
    NodeEnabled {
        timestamp: Instant,
        chain_id: String,
        node_name: String,
    },
}

impl NodePoolEvent for ChainEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ChainEvent::NodeReserved { .. } => "NodeReserved",
            ChainEvent::NodeReleased { .. } => "NodeReleased",
            ChainEvent::SelectionExhausted { .. } => "SelectionExhausted",
            ChainEvent::NodeDisabled { .. } => "NodeDisabled",
            ChainEvent::NodeEnabled { .. } => "NodeEnabled",
        }
    }

    fn timestamp(&self) -> Instant {
        match self {
            ChainEvent::NodeReserved { timestamp, .. }
            | ChainEvent::NodeReleased { timestamp, .. }
            | ChainEvent::SelectionExhausted { timestamp, .. }
            | ChainEvent::NodeDisabled { timestamp, .. }
            | ChainEvent::NodeEnabled { timestamp, .. } => *timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn emits_to_all_listeners() {
        let mut listeners: EventListeners<ChainEvent> = EventListeners::new();
        let count = Arc::new(AtomicUsize::new(0));

        let c1 = Arc::clone(&count);
        listeners.add(FnListener::new(move |_: &ChainEvent| {
            c1.fetch_add(1, Ordering::SeqCst);
        }));
        let c2 = Arc::clone(&count);
        listeners.add(FnListener::new(move |_: &ChainEvent| {
            c2.fetch_add(1, Ordering::SeqCst);
        }));

        listeners.emit(&ChainEvent::NodeDisabled {
            timestamp: Instant::now(),
            chain_id: "c".into(),
            node_name: "n".into(),
        });

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn panicking_listener_does_not_stop_others() {
        let mut listeners: EventListeners<ChainEvent> = EventListeners::new();
        let count = Arc::new(AtomicUsize::new(0));

        listeners.add(FnListener::new(|_: &ChainEvent| panic!("boom")));
        let c = Arc::clone(&count);
        listeners.add(FnListener::new(move |_: &ChainEvent| {
            c.fetch_add(1, Ordering::SeqCst);
        }));

        listeners.emit(&ChainEvent::NodeEnabled {
            timestamp: Instant::now(),
            chain_id: "c".into(),
            node_name: "n".into(),
        });

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
