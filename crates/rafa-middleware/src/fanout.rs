//! [`SubscriberSet`] – ordered, synchronous observer fan-out.
//!
//! Platform callbacks arrive on threads owned by the robot SDK.  The
//! orchestrator fans each translated event out to every current subscriber
//! *on that same thread*, in subscription order.  There is no dispatch pool,
//! so handlers must return quickly: the usual handler just posts a message
//! into the UI loop's channel.
//!
//! Dispatch works on a snapshot of the handler list taken under the lock and
//! invoked after the lock is released, so a handler may subscribe or
//! unsubscribe (itself included) without deadlocking.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

type Handler<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Opaque handle returned by [`SubscriberSet::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

struct Inner<T> {
    next_id: u64,
    // Ids are handed out monotonically, so key order is subscription order.
    handlers: BTreeMap<u64, Handler<T>>,
}

/// A set of event handlers notified in subscription order.
pub struct SubscriberSet<T> {
    inner: Mutex<Inner<T>>,
}

impl<T> SubscriberSet<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                next_id: 0,
                handlers: BTreeMap::new(),
            }),
        }
    }

    /// Add `handler` at the end of the dispatch order.
    pub fn subscribe(&self, handler: impl Fn(&T) + Send + Sync + 'static) -> SubscriptionId {
        let mut inner = self.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.handlers.insert(id, Arc::new(handler));
        SubscriptionId(id)
    }

    /// Remove a subscription.  Returns `false` if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.lock().handlers.remove(&id.0).is_some()
    }

    /// Invoke every current subscriber with `event`, in subscription order.
    ///
    /// Returns the number of handlers that were called.
    pub fn dispatch(&self, event: &T) -> usize {
        let snapshot: Vec<Handler<T>> = self.lock().handlers.values().cloned().collect();
        for handler in &snapshot {
            handler(event);
        }
        snapshot.len()
    }

    pub fn len(&self) -> usize {
        self.lock().handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // A panicking handler never runs while the lock is held, so a poisoned
    // mutex still guards a consistent map.
    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<T> Default for SubscriberSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn dispatch_preserves_subscription_order() {
        let set = SubscriberSet::<u32>::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        for tag in ["a", "b", "c"] {
            let log = Arc::clone(&log);
            set.subscribe(move |v: &u32| log.lock().unwrap().push(format!("{tag}{v}")));
        }

        assert_eq!(set.dispatch(&7), 3);
        assert_eq!(*log.lock().unwrap(), vec!["a7", "b7", "c7"]);
    }

    #[test]
    fn unsubscribed_handler_is_never_invoked_again() {
        let set = SubscriberSet::<()>::new();
        let removed_calls = Arc::new(AtomicUsize::new(0));
        let kept_calls = Arc::new(AtomicUsize::new(0));

        let r = Arc::clone(&removed_calls);
        let removed = set.subscribe(move |_| {
            r.fetch_add(1, Ordering::SeqCst);
        });
        let k = Arc::clone(&kept_calls);
        set.subscribe(move |_| {
            k.fetch_add(1, Ordering::SeqCst);
        });

        set.dispatch(&());
        assert!(set.unsubscribe(removed));
        set.dispatch(&());
        set.dispatch(&());

        assert_eq!(removed_calls.load(Ordering::SeqCst), 1);
        assert_eq!(kept_calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn interleaved_subscribe_unsubscribe_sequences() {
        let set = SubscriberSet::<u8>::new();
        let hits = Arc::new(Mutex::new(Vec::new()));
        let mut ids = Vec::new();
        for n in 0..6u8 {
            let hits = Arc::clone(&hits);
            ids.push(set.subscribe(move |_| hits.lock().unwrap().push(n)));
            if n % 2 == 1 {
                // Drop every odd subscriber right after adding it.
                set.unsubscribe(ids[n as usize]);
            }
        }
        set.unsubscribe(ids[0]);
        set.dispatch(&0);

        assert_eq!(*hits.lock().unwrap(), vec![2, 4]);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn double_unsubscribe_reports_false() {
        let set = SubscriberSet::<()>::new();
        let id = set.subscribe(|_| {});
        assert!(set.unsubscribe(id));
        assert!(!set.unsubscribe(id));
        assert!(set.is_empty());
    }

    #[test]
    fn handler_may_unsubscribe_itself_during_dispatch() {
        let set = Arc::new(SubscriberSet::<()>::new());
        let slot: Arc<Mutex<Option<SubscriptionId>>> = Arc::new(Mutex::new(None));

        let set_in_handler = Arc::clone(&set);
        let slot_in_handler = Arc::clone(&slot);
        let id = set.subscribe(move |_| {
            if let Some(id) = *slot_in_handler.lock().unwrap() {
                set_in_handler.unsubscribe(id);
            }
        });
        *slot.lock().unwrap() = Some(id);

        assert_eq!(set.dispatch(&()), 1);
        assert_eq!(set.dispatch(&()), 0);
    }
}
