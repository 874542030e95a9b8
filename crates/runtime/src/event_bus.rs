use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

type Handler<E> = Box<dyn FnMut(&E) + Send>;

struct Subscribers<E> {
    next_id: u64,
    handlers: BTreeMap<u64, Handler<E>>,
}

/// Typed publish/subscribe bus.
///
/// Handlers run synchronously on the emitting task, in subscription order.
/// A handler must not emit on (or subscribe to) the same bus it is running on:
/// the subscriber list is locked for the duration of `emit`.
pub struct EventBus<E> {
    inner: Arc<Mutex<Subscribers<E>>>,
}

impl<E> Clone for EventBus<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> std::fmt::Debug for EventBus<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl<E> EventBus<E> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Subscribers {
                next_id: 0,
                handlers: BTreeMap::new(),
            })),
        }
    }

    /// Register `handler`. It stays registered until the returned
    /// [`Subscription`] is dropped or explicitly unsubscribed.
    #[must_use = "dropping the subscription unsubscribes immediately"]
    pub fn subscribe(&self, handler: impl FnMut(&E) + Send + 'static) -> Subscription
    where
        E: 'static,
    {
        let mut subs = self.inner.lock();
        let id = subs.next_id;
        subs.next_id += 1;
        subs.handlers.insert(id, Box::new(handler));

        let weak: Weak<Mutex<Subscribers<E>>> = Arc::downgrade(&self.inner);
        Subscription {
            id,
            detach: Some(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.lock().handlers.remove(&id);
                }
            })),
        }
    }

    /// Deliver `event` to every live handler. Returns the number of handlers run.
    pub fn emit(&self, event: &E) -> usize {
        let mut subs = self.inner.lock();
        for handler in subs.handlers.values_mut() {
            handler(event);
        }
        subs.handlers.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().handlers.len()
    }
}

/// Handle for a registered handler; unsubscribes on drop.
pub struct Subscription {
    id: u64,
    detach: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn unsubscribe(mut self) {
        self.detach_now();
    }

    fn detach_now(&mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.detach_now();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::EventBus;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn delivers_to_subscribers_in_order() {
        let bus: EventBus<u32> = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let a = {
            let seen = Arc::clone(&seen);
            bus.subscribe(move |v| seen.lock().push(("a", *v)))
        };
        let b = {
            let seen = Arc::clone(&seen);
            bus.subscribe(move |v| seen.lock().push(("b", *v)))
        };

        assert_eq!(bus.emit(&7), 2);
        assert_eq!(*seen.lock(), vec![("a", 7), ("b", 7)]);
        drop((a, b));
    }

    #[test]
    fn dropping_subscription_unsubscribes() {
        let bus: EventBus<&'static str> = EventBus::new();
        let count = Arc::new(Mutex::new(0usize));

        let sub = {
            let count = Arc::clone(&count);
            bus.subscribe(move |_| *count.lock() += 1)
        };
        bus.emit(&"first");
        drop(sub);
        assert_eq!(bus.emit(&"second"), 0);
        assert_eq!(*count.lock(), 1);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn subscription_outliving_bus_is_harmless() {
        let bus: EventBus<u8> = EventBus::new();
        let sub = bus.subscribe(|_| {});
        drop(bus);
        sub.unsubscribe();
    }
}
