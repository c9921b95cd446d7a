//! Subscribe/unsubscribe plumbing for host events.
//!
//! Hosts publish window focus, container resizes, pointer, key and drag/drop
//! events through an [`EventHub`]. Components receive a [`Subscription`] at
//! install time and own it: dropping the subscription detaches the listener.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Anything a component can attach a listener to.
pub trait EventSource<E>: Send + Sync {
    fn subscribe(&self) -> Subscription<E>;
}

type Unsubscribe = Box<dyn FnOnce() + Send>;

/// The unsubscribe half of a [`Subscription`]. Dropping it detaches the
/// registration right away, even while a task still holds the receiver.
pub struct SubscriptionGuard {
    unsubscribe: Option<Unsubscribe>,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

/// A live listener registration. Dropping it runs the unsubscribe hook.
pub struct Subscription<E> {
    receiver: mpsc::UnboundedReceiver<E>,
    guard: SubscriptionGuard,
}

impl<E> Subscription<E> {
    pub fn new<F>(receiver: mpsc::UnboundedReceiver<E>, unsubscribe: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            receiver,
            guard: SubscriptionGuard {
                unsubscribe: Some(Box::new(unsubscribe)),
            },
        }
    }

    /// A subscription with no unsubscribe hook (the sender side just closes).
    pub fn detached(receiver: mpsc::UnboundedReceiver<E>) -> Self {
        Self {
            receiver,
            guard: SubscriptionGuard { unsubscribe: None },
        }
    }

    /// Split into the event receiver and the guard keeping it registered.
    pub fn into_parts(self) -> (mpsc::UnboundedReceiver<E>, SubscriptionGuard) {
        (self.receiver, self.guard)
    }

    pub async fn recv(&mut self) -> Option<E> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<E> {
        self.receiver.try_recv().ok()
    }
}

/// A spawned listener task and the registrations feeding it.
///
/// Dropping the handle cancels the task and then drops each guard in the
/// order it was added, so the host sees every listener detached before
/// the drop returns.
pub struct ListenerHandle {
    cancel: CancellationToken,
    guards: Vec<SubscriptionGuard>,
}

impl ListenerHandle {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            guards: Vec::new(),
        }
    }

    pub fn with(mut self, guard: SubscriptionGuard) -> Self {
        self.guards.push(guard);
        self
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
        // Vec drops back to front otherwise
        for guard in self.guards.drain(..) {
            drop(guard);
        }
    }
}

struct HubInner<E> {
    next_id: u64,
    subscribers: HashMap<u64, mpsc::UnboundedSender<E>>,
}

/// Fan-out event source. Every subscriber receives a clone of each event.
pub struct EventHub<E> {
    inner: Arc<Mutex<HubInner<E>>>,
}

impl<E> Clone for EventHub<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E: Clone + Send + 'static> Default for EventHub<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Clone + Send + 'static> EventHub<E> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HubInner {
                next_id: 0,
                subscribers: HashMap::new(),
            })),
        }
    }

    /// Deliver `event` to every live subscriber, returning how many received it.
    pub fn emit(&self, event: E) -> usize {
        let Ok(mut inner) = self.inner.lock() else {
            return 0;
        };
        inner
            .subscribers
            .retain(|_, sender| sender.send(event.clone()).is_ok());
        inner.subscribers.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner
            .lock()
            .map(|inner| inner.subscribers.len())
            .unwrap_or(0)
    }
}

impl<E: Clone + Send + 'static> EventSource<E> for EventHub<E> {
    fn subscribe(&self) -> Subscription<E> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = match self.inner.lock() {
            Ok(mut inner) => {
                let id = inner.next_id;
                inner.next_id += 1;
                inner.subscribers.insert(id, tx);
                id
            }
            Err(_) => return Subscription::detached(rx),
        };

        let hub: Weak<Mutex<HubInner<E>>> = Arc::downgrade(&self.inner);
        Subscription::new(rx, move || {
            if let Some(hub) = hub.upgrade()
                && let Ok(mut inner) = hub.lock()
            {
                inner.subscribers.remove(&id);
            }
        })
    }
}
