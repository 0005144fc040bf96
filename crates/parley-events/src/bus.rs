//! Topic-keyed listener registry with synchronous fan-out.
//!
//! # Design
//! - `publish` snapshots the topic's listener list, then notifies each entry in
//!   registration order without holding the registry lock.
//! - Every registration owns a slot; a listener only runs while its slot is
//!   locked and `unsubscribe` empties the slot, so a listener is never invoked
//!   after `unsubscribe` returns, even by a publish that snapshotted earlier.
//! - Listener failures (errors or panics) are isolated per listener and logged.
//! - A listener that re-enters its own slot (publishing to its own topic, or
//!   unsubscribing itself) is detected per thread instead of deadlocking: the
//!   nested invocation fails with [`ListenerError::Reentrant`] and a
//!   self-unsubscribe retires the slot once the running call returns.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt::{self, Debug, Formatter};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, trace, warn};

use crate::error::ListenerError;
use crate::topics::Topic;

/// Identifier assigned to each registered listener.
pub type ListenerId = u64;

/// Callback notified once per publish to the topic it was registered for.
///
/// A listener may unsubscribe its own handle from inside the callback. A
/// publish from inside the callback that reaches the same listener again is
/// not delivered to it and is reported as [`ListenerError::Reentrant`].
pub type Listener<E> = dyn Fn(&E) -> Result<(), ListenerError> + Send + Sync;

/// Opaque handle returned by [`EventBus::subscribe`] and used to unregister.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    topic: Topic,
    id: ListenerId,
}

impl SubscriptionHandle {
    /// Topic the listener was registered for.
    #[must_use]
    pub const fn topic(&self) -> &Topic {
        &self.topic
    }

    /// Bus-assigned listener identifier.
    #[must_use]
    pub const fn id(&self) -> ListenerId {
        self.id
    }
}

/// Outcome of one publish call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    /// Listeners that were invoked.
    pub notified: usize,
    /// Invoked listeners that returned an error or panicked.
    pub failed: usize,
}

impl Delivery {
    /// Whether every invoked listener accepted the event.
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        self.failed == 0
    }
}

thread_local! {
    /// Slots whose listener is currently running on this thread.
    static RUNNING: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

/// Marks a slot as running on the current thread for the guard's lifetime.
struct RunningGuard {
    key: usize,
}

impl RunningGuard {
    fn enter(key: usize) -> Self {
        RUNNING.with(|running| running.borrow_mut().push(key));
        Self { key }
    }

    fn contains(key: usize) -> bool {
        RUNNING.with(|running| running.borrow().contains(&key))
    }
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        RUNNING.with(|running| {
            let mut running = running.borrow_mut();
            if let Some(position) = running.iter().rposition(|key| *key == self.key) {
                let _ = running.remove(position);
            }
        });
    }
}

struct Slot<E> {
    id: ListenerId,
    retired: AtomicBool,
    listener: Mutex<Option<Box<Listener<E>>>>,
}

impl<E> Slot<E> {
    fn key(&self) -> usize {
        std::ptr::from_ref(self).addr()
    }

    /// Run the listener unless it has been cleared; `None` means it was removed.
    fn invoke(&self, event: &E) -> Option<Result<(), ListenerError>> {
        if RunningGuard::contains(self.key()) {
            return Some(Err(ListenerError::Reentrant {
                listener_id: self.id,
            }));
        }
        let mut guard = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if self.retired.load(Ordering::Acquire) {
            return None;
        }
        let listener = guard.as_ref()?;
        let outcome = {
            let _running = RunningGuard::enter(self.key());
            panic::catch_unwind(AssertUnwindSafe(|| listener(event))).unwrap_or_else(|payload| {
                Err(ListenerError::Panicked {
                    message: panic_message(payload.as_ref()),
                })
            })
        };
        // Retired by the listener itself while it ran.
        let removed = if self.retired.load(Ordering::Acquire) {
            guard.take()
        } else {
            None
        };
        drop(guard);
        drop(removed);
        Some(outcome)
    }

    /// Waits for any in-flight invocation, then drops the listener.
    ///
    /// When called from inside this slot's own listener the slot is only
    /// retired; the running invocation drops the listener once it returns.
    fn clear(&self) {
        self.retired.store(true, Ordering::Release);
        if RunningGuard::contains(self.key()) {
            return;
        }
        let removed = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(removed);
    }
}

type Registry<E> = HashMap<Topic, Vec<Arc<Slot<E>>>>;

struct Shared<E> {
    topics: Mutex<Registry<E>>,
    next_id: AtomicU64,
}

/// Process-wide registry mapping topics to their current listeners.
///
/// Cloning the bus yields another handle to the same registry.
pub struct EventBus<E> {
    shared: Arc<Shared<E>>,
}

impl<E> EventBus<E> {
    /// Construct an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                topics: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Register `listener` for `topic`; it receives every publish from now on.
    pub fn subscribe<F>(&self, topic: Topic, listener: F) -> SubscriptionHandle
    where
        F: Fn(&E) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let slot = Arc::new(Slot {
            id,
            retired: AtomicBool::new(false),
            listener: Mutex::new(Some(Box::new(listener))),
        });
        let listeners = {
            let mut topics = self.lock_topics();
            let entry = topics.entry(topic.clone()).or_default();
            entry.push(slot);
            entry.len()
        };
        debug!(topic = %topic, listener_id = id, listeners, "listener subscribed");
        SubscriptionHandle { topic, id }
    }

    /// Remove the listener behind `handle`.
    ///
    /// Returns `false` when the handle was already removed. Once this returns
    /// the listener is never invoked again; a concurrent publish currently
    /// running the listener is allowed to finish first.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        let slot = {
            let mut topics = self.lock_topics();
            let Some(slots) = topics.get_mut(&handle.topic) else {
                return false;
            };
            let Some(position) = slots.iter().position(|slot| slot.id == handle.id) else {
                return false;
            };
            let slot = slots.remove(position);
            if slots.is_empty() {
                topics.remove(&handle.topic);
            }
            slot
        };
        slot.clear();
        debug!(topic = %handle.topic, listener_id = handle.id, "listener unsubscribed");
        true
    }

    /// Deliver `event` to every listener registered for `topic`, in registration order.
    ///
    /// Topics without listeners drop the event silently. Listener failures are
    /// logged and counted but never interrupt delivery to the remaining listeners.
    pub fn publish(&self, topic: &Topic, event: E) -> Delivery {
        let snapshot = {
            let topics = self.lock_topics();
            match topics.get(topic) {
                Some(slots) => slots.clone(),
                None => {
                    trace!(topic = %topic, "publish without listeners dropped");
                    return Delivery::default();
                }
            }
        };

        let mut delivery = Delivery::default();
        for slot in &snapshot {
            match slot.invoke(&event) {
                None => {}
                Some(Ok(())) => delivery.notified += 1,
                Some(Err(err)) => {
                    delivery.notified += 1;
                    delivery.failed += 1;
                    warn!(
                        topic = %topic,
                        listener_id = slot.id,
                        error = %err,
                        detail = ?err,
                        "listener failed; continuing delivery"
                    );
                }
            }
        }
        trace!(
            topic = %topic,
            notified = delivery.notified,
            failed = delivery.failed,
            "event published"
        );
        delivery
    }

    /// Number of listeners currently registered for `topic`.
    #[must_use]
    pub fn listener_count(&self, topic: &Topic) -> usize {
        self.lock_topics().get(topic).map_or(0, Vec::len)
    }

    /// Number of topics with at least one listener.
    #[must_use]
    pub fn topic_count(&self) -> usize {
        self.lock_topics().len()
    }

    fn lock_topics(&self) -> MutexGuard<'_, Registry<E>> {
        self.shared
            .topics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl<E> Clone for EventBus<E> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<E> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Debug for EventBus<E> {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("EventBus")
            .field("topics", &self.topic_count())
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    fn recorder(bus: &EventBus<u32>, topic: &str) -> (SubscriptionHandle, Arc<Mutex<Vec<u32>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handle = bus.subscribe(Topic::from(topic), move |event: &u32| {
            sink.lock().expect("sink lock").push(*event);
            Ok(())
        });
        (handle, seen)
    }

    #[test]
    fn publish_without_listeners_is_a_silent_no_op() {
        let bus = EventBus::<u32>::new();
        let delivery = bus.publish(&Topic::from("chan:empty"), 7);
        assert_eq!(delivery, Delivery::default());
        assert_eq!(bus.topic_count(), 0);
    }

    #[test]
    fn listeners_see_only_events_published_after_subscribe() {
        let bus = EventBus::new();
        let topic = Topic::from("chan:general");
        let _ = bus.publish(&topic, 1);
        let (_handle, seen) = recorder(&bus, "chan:general");
        let _ = bus.publish(&topic, 2);
        let _ = bus.publish(&topic, 3);
        assert_eq!(*seen.lock().expect("seen"), vec![2, 3]);
    }

    #[test]
    fn listeners_are_notified_in_registration_order() {
        let bus = EventBus::<u32>::new();
        let topic = Topic::from("chan:general");
        let order = Arc::new(Mutex::new(Vec::new()));
        for tag in ["first", "second", "third"] {
            let order = Arc::clone(&order);
            let _ = bus.subscribe(topic.clone(), move |_: &u32| {
                order.lock().expect("order").push(tag);
                Ok(())
            });
        }
        let delivery = bus.publish(&topic, 1);
        assert_eq!(delivery.notified, 3);
        assert_eq!(*order.lock().expect("order"), vec!["first", "second", "third"]);
    }

    #[test]
    fn topics_are_isolated() {
        let bus = EventBus::new();
        let (_a, seen_a) = recorder(&bus, "chan:a");
        let (_b, seen_b) = recorder(&bus, "chan:b");
        let _ = bus.publish(&Topic::from("chan:a"), 1);
        assert_eq!(*seen_a.lock().expect("a"), vec![1]);
        assert!(seen_b.lock().expect("b").is_empty());
    }

    #[test]
    fn unsubscribe_is_idempotent_and_prunes_empty_topics() {
        let bus = EventBus::new();
        let (handle, seen) = recorder(&bus, "chan:general");
        assert_eq!(bus.listener_count(handle.topic()), 1);

        assert!(bus.unsubscribe(&handle));
        assert!(!bus.unsubscribe(&handle));
        assert_eq!(bus.topic_count(), 0);

        let delivery = bus.publish(handle.topic(), 9);
        assert_eq!(delivery.notified, 0);
        assert!(seen.lock().expect("seen").is_empty());
    }

    #[test]
    fn handles_distinguish_identical_listeners() {
        let bus = EventBus::<u32>::new();
        let topic = Topic::from("chan:general");
        let hits = Arc::new(AtomicUsize::new(0));
        let make = || {
            let hits = Arc::clone(&hits);
            move |_: &u32| {
                hits.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        };
        let first = bus.subscribe(topic.clone(), make());
        let second = bus.subscribe(topic.clone(), make());
        assert_ne!(first.id(), second.id());

        assert!(bus.unsubscribe(&first));
        let _ = bus.publish(&topic, 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(bus.listener_count(&topic), 1);
    }

    #[test]
    fn failing_listeners_do_not_block_the_rest() {
        let bus = EventBus::new();
        let topic = Topic::from("chan:general");
        let _rejects = bus.subscribe(topic.clone(), |_: &u32| Err(ListenerError::rejected("nope")));
        let _panics = bus.subscribe(topic.clone(), |_: &u32| -> Result<(), ListenerError> {
            panic!("listener exploded")
        });
        let (_ok, seen) = recorder(&bus, "chan:general");

        let delivery = bus.publish(&topic, 5);
        assert_eq!(delivery.notified, 3);
        assert_eq!(delivery.failed, 2);
        assert!(!delivery.is_clean());
        assert_eq!(*seen.lock().expect("seen"), vec![5]);

        // Registry stays usable after a panic.
        let again = bus.publish(&topic, 6);
        assert_eq!(again.notified, 3);
        assert_eq!(*seen.lock().expect("seen"), vec![5, 6]);
    }

    #[test]
    fn panic_messages_are_captured() {
        assert_eq!(panic_message(&"static"), "static");
        assert_eq!(panic_message(&String::from("owned")), "owned");
        assert_eq!(panic_message(&42_u8), "non-string panic payload");
    }

    #[test]
    fn unsubscribe_waits_for_in_flight_invocation() {
        let bus = EventBus::<u32>::new();
        let topic = Topic::from("chan:general");
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let release_rx = Mutex::new(release_rx);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let handle = bus.subscribe(topic.clone(), move |_: &u32| {
            counter.fetch_add(1, Ordering::SeqCst);
            let _ = entered_tx.send(());
            let _ = release_rx
                .lock()
                .expect("release lock")
                .recv_timeout(Duration::from_secs(5));
            Ok(())
        });

        let publisher = {
            let bus = bus.clone();
            let topic = topic.clone();
            thread::spawn(move || bus.publish(&topic, 1))
        };
        entered_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("listener entered");

        let remover = {
            let bus = bus.clone();
            let handle = handle.clone();
            thread::spawn(move || bus.unsubscribe(&handle))
        };
        thread::sleep(Duration::from_millis(50));
        assert!(!remover.is_finished(), "unsubscribe must wait for the running listener");

        release_tx.send(()).expect("release listener");
        assert!(remover.join().expect("remover thread"));
        assert_eq!(publisher.join().expect("publisher thread").notified, 1);

        let _ = bus.publish(&topic, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn publish_skips_listeners_removed_after_snapshot() {
        let bus = EventBus::<u32>::new();
        let topic = Topic::from("chan:general");
        let victim_calls = Arc::new(AtomicUsize::new(0));

        let late: Arc<Mutex<Option<SubscriptionHandle>>> = Arc::new(Mutex::new(None));
        let remover_bus = bus.clone();
        let pending = Arc::clone(&late);
        let _first = bus.subscribe(topic.clone(), move |_: &u32| {
            if let Some(handle) = pending.lock().expect("pending").take() {
                let _ = remover_bus.unsubscribe(&handle);
            }
            Ok(())
        });
        let counter = Arc::clone(&victim_calls);
        let victim = bus.subscribe(topic.clone(), move |_: &u32| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        *late.lock().expect("late") = Some(victim);

        let delivery = bus.publish(&topic, 1);
        assert_eq!(delivery.notified, 1);
        assert_eq!(victim_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn listener_publishing_to_its_own_topic_is_reported_not_deadlocked() {
        let bus = EventBus::<u32>::new();
        let topic = Topic::from("chan:general");
        let nested = Arc::new(Mutex::new(Vec::new()));
        let (inner_bus, inner_topic, sink) = (bus.clone(), topic.clone(), Arc::clone(&nested));
        let handle = bus.subscribe(topic.clone(), move |event: &u32| {
            if *event == 1 {
                let delivery = inner_bus.publish(&inner_topic, 2);
                sink.lock().expect("nested").push(delivery);
            }
            Ok(())
        });
        let (_other, seen) = recorder(&bus, "chan:general");

        let delivery = bus.publish(&topic, 1);
        assert_eq!(delivery, Delivery { notified: 2, failed: 0 });
        // The nested publish skipped the running listener but reached the other one.
        assert_eq!(
            *nested.lock().expect("nested"),
            vec![Delivery { notified: 2, failed: 1 }]
        );
        assert_eq!(*seen.lock().expect("seen"), vec![2, 1]);

        // The listener stays registered and usable afterwards.
        assert_eq!(bus.publish(&topic, 3).notified, 2);
        assert!(bus.unsubscribe(&handle));
    }

    #[test]
    fn listener_can_unsubscribe_itself() {
        let bus = EventBus::<u32>::new();
        let topic = Topic::from("chan:general");
        let own: Arc<Mutex<Option<SubscriptionHandle>>> = Arc::new(Mutex::new(None));
        let outcome = Arc::new(Mutex::new(None));
        let calls = Arc::new(AtomicUsize::new(0));
        let (inner_bus, slot, result, counter) = (
            bus.clone(),
            Arc::clone(&own),
            Arc::clone(&outcome),
            Arc::clone(&calls),
        );
        let handle = bus.subscribe(topic.clone(), move |_: &u32| {
            counter.fetch_add(1, Ordering::SeqCst);
            if let Some(handle) = slot.lock().expect("own handle").take() {
                *result.lock().expect("outcome") = Some(inner_bus.unsubscribe(&handle));
            }
            Ok(())
        });
        *own.lock().expect("own handle") = Some(handle.clone());

        assert_eq!(bus.publish(&topic, 1).notified, 1);
        assert_eq!(*outcome.lock().expect("outcome"), Some(true));
        assert_eq!(bus.listener_count(&topic), 0);
        assert!(!bus.unsubscribe(&handle));

        assert_eq!(bus.publish(&topic, 2).notified, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
