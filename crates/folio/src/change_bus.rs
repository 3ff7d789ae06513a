//! Synchronous publish/subscribe used by every model entity.
//!
//! A `ChangeBus` delivers each published event to all subscribers in
//! subscription order before `publish` returns. Publishing from inside a
//! subscriber does not recurse: the event is appended to the bus queue and
//! delivered by the outermost `publish` call once the current event has
//! reached every subscriber. This keeps delivery strictly FIFO per bus.
//!
//! The bus is single-threaded (`Rc`/`RefCell`). Cloning a bus yields another
//! handle to the same subscriber list and queue.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

/// Handle returned by [`ChangeBus::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback<E> = Rc<dyn Fn(&E)>;

struct Inner<E> {
    next_id: u64,
    subscribers: Vec<(SubscriptionId, Callback<E>)>,
    pending: VecDeque<E>,
    dispatching: bool,
}

pub struct ChangeBus<E> {
    inner: Rc<RefCell<Inner<E>>>,
}

impl<E> Clone for ChangeBus<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<E> Default for ChangeBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for ChangeBus<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("ChangeBus")
            .field("subscribers", &inner.subscribers.len())
            .field("pending", &inner.pending.len())
            .finish()
    }
}

/// Ends a dispatch. If a subscriber panicked, events still queued behind
/// the failed one are dropped rather than delivered by a later publish.
struct DispatchGuard<'a, E> {
    inner: &'a RefCell<Inner<E>>,
}

impl<E> Drop for DispatchGuard<'_, E> {
    fn drop(&mut self) {
        if let Ok(mut inner) = self.inner.try_borrow_mut() {
            inner.dispatching = false;
            inner.pending.clear();
        }
    }
}

impl<E> ChangeBus<E> {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                next_id: 0,
                subscribers: Vec::new(),
                pending: VecDeque::new(),
                dispatching: false,
            })),
        }
    }

    /// Register a subscriber. It receives every event published after this call.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&E) + 'static,
    {
        let mut inner = self.inner.borrow_mut();
        let id = SubscriptionId(inner.next_id);
        inner.next_id += 1;
        inner.subscribers.push((id, Rc::new(callback)));
        id
    }

    /// Remove a subscriber. Returns `false` if the handle was unknown.
    ///
    /// A subscriber removed while an event is being delivered still receives
    /// that event; it misses everything after it.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut inner = self.inner.borrow_mut();
        let before = inner.subscribers.len();
        inner.subscribers.retain(|(sid, _)| *sid != id);
        inner.subscribers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.borrow().subscribers.len()
    }

    /// Deliver `event` to every subscriber.
    pub fn publish(&self, event: E) {
        {
            let mut inner = self.inner.borrow_mut();
            inner.pending.push_back(event);
            if inner.dispatching {
                return;
            }
            inner.dispatching = true;
        }

        let _guard = DispatchGuard { inner: &self.inner };
        loop {
            let (event, subscribers) = {
                let mut inner = self.inner.borrow_mut();
                let Some(event) = inner.pending.pop_front() else {
                    break;
                };
                let subscribers: Vec<Callback<E>> = inner
                    .subscribers
                    .iter()
                    .map(|(_, cb)| Rc::clone(cb))
                    .collect();
                (event, subscribers)
            };
            for callback in subscribers {
                callback(&event);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> (Rc<RefCell<Vec<String>>>, impl Fn(&str) + Clone) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = {
            let log = Rc::clone(&log);
            move |s: &str| log.borrow_mut().push(s.to_string())
        };
        (log, sink)
    }

    #[test]
    fn test_publish_without_subscribers_is_noop() {
        let bus: ChangeBus<u32> = ChangeBus::new();
        bus.publish(1);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_subscribers_called_in_subscription_order() {
        let bus: ChangeBus<u32> = ChangeBus::new();
        let (log, sink) = recorder();

        let a = sink.clone();
        bus.subscribe(move |e| a(&format!("a{e}")));
        let b = sink.clone();
        bus.subscribe(move |e| b(&format!("b{e}")));

        bus.publish(1);
        bus.publish(2);

        assert_eq!(*log.borrow(), vec!["a1", "b1", "a2", "b2"]);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let bus: ChangeBus<u32> = ChangeBus::new();
        let (log, sink) = recorder();

        let id = bus.subscribe(move |e| sink(&e.to_string()));
        bus.publish(1);
        assert!(bus.unsubscribe(id));
        bus.publish(2);

        assert_eq!(*log.borrow(), vec!["1"]);
        assert!(!bus.unsubscribe(id));
    }

    #[test]
    fn test_reentrant_publish_is_fifo() {
        let bus: ChangeBus<u32> = ChangeBus::new();
        let (log, sink) = recorder();

        // First subscriber re-publishes once on event 1.
        let inner_bus = bus.clone();
        let first = sink.clone();
        bus.subscribe(move |e| {
            first(&format!("first{e}"));
            if *e == 1 {
                inner_bus.publish(10);
            }
        });
        let second = sink.clone();
        bus.subscribe(move |e| second(&format!("second{e}")));

        bus.publish(1);

        // Event 1 reaches every subscriber before event 10 starts.
        assert_eq!(
            *log.borrow(),
            vec!["first1", "second1", "first10", "second10"]
        );
    }

    #[test]
    fn test_publish_into_other_bus_from_callback() {
        let outer: ChangeBus<u32> = ChangeBus::new();
        let other: ChangeBus<u32> = ChangeBus::new();
        let (log, sink) = recorder();

        let other_sink = sink.clone();
        other.subscribe(move |e| other_sink(&format!("other{e}")));

        let forward = other.clone();
        let outer_sink = sink.clone();
        outer.subscribe(move |e| {
            outer_sink(&format!("outer{e}"));
            forward.publish(e * 2);
        });

        outer.publish(3);
        assert_eq!(*log.borrow(), vec!["outer3", "other6"]);
    }

    #[test]
    fn test_subscribe_during_dispatch_sees_later_events() {
        let bus: ChangeBus<u32> = ChangeBus::new();
        let (log, sink) = recorder();

        let handle = bus.clone();
        let late_sink = sink.clone();
        bus.subscribe(move |e| {
            if *e == 1 {
                let s = late_sink.clone();
                handle.subscribe(move |e| s(&format!("late{e}")));
                handle.publish(2);
            }
        });

        bus.publish(1);
        assert_eq!(*log.borrow(), vec!["late2"]);
    }

    #[test]
    fn test_panicking_subscriber_drops_queued_events() {
        let bus: ChangeBus<u32> = ChangeBus::new();
        let (log, sink) = recorder();

        let handle = bus.clone();
        bus.subscribe(move |e| {
            if *e == 1 {
                handle.publish(2);
                panic!("subscriber failed");
            }
        });

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| bus.publish(1)));
        assert!(result.is_err());

        bus.subscribe(move |e| sink(&e.to_string()));
        bus.publish(3);
        assert_eq!(*log.borrow(), vec!["3"]);
    }
}
