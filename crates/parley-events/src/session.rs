//! Pull-driven subscription sessions layered on the event bus.
//!
//! # Design
//! - A session registers exactly one listener at open and removes it at close.
//! - Per-session state is a two-state machine: no outstanding pull, or one
//!   outstanding pull. An arriving event resolves a waiting pull directly and is
//!   only buffered when nobody is waiting.
//! - A pull stays outstanding from registration until its future completes or
//!   is dropped, including the window after an event was handed to it; new
//!   pulls are rejected for that whole span.
//! - Closing marks the session closed under its own lock before the listener is
//!   unregistered, so an in-flight publish either completes delivery or drops
//!   the event.

use std::collections::{HashMap, VecDeque};
use std::fmt::{self, Debug, Formatter};
use std::mem;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use async_stream::stream;
use futures_core::Stream;
use tokio::sync::oneshot;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::bus::{EventBus, SubscriptionHandle};
use crate::error::{SessionError, SessionResult};
use crate::topics::Topic;

/// Identifier assigned to every subscription session.
pub type SessionId = Uuid;

/// Open sessions tracked by a hub, keyed by id.
pub(crate) type SessionMap<E> = HashMap<SessionId, Weak<SessionCore<E>>>;

/// Shared, lockable [`SessionMap`].
pub(crate) type SessionRegistry<E> = Mutex<SessionMap<E>>;

/// Buffering policy for a subscription session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionConfig {
    /// Maximum number of undelivered events; `None` buffers without limit.
    ///
    /// When a bounded buffer is full the oldest event is discarded and the
    /// session's lag counter increments.
    pub capacity: Option<NonZeroUsize>,
}

impl SessionConfig {
    /// Unbounded buffering.
    #[must_use]
    pub const fn unbounded() -> Self {
        Self { capacity: None }
    }

    /// Buffer at most `capacity` undelivered events.
    #[must_use]
    pub const fn bounded(capacity: NonZeroUsize) -> Self {
        Self {
            capacity: Some(capacity),
        }
    }
}

enum Pull<E> {
    Idle,
    Waiting(oneshot::Sender<E>),
    /// The pull was offered an event and has not completed or been dropped yet.
    Handed,
}

struct InboxState<E> {
    queue: VecDeque<E>,
    pull: Pull<E>,
    closed: bool,
    lagged: u64,
}

/// Queue and pull slot owned by one session; the bus listener writes into it.
struct Inbox<E> {
    id: SessionId,
    topic: Topic,
    capacity: Option<NonZeroUsize>,
    state: Mutex<InboxState<E>>,
}

impl<E> Inbox<E> {
    fn lock(&self) -> MutexGuard<'_, InboxState<E>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Listener body: resolve the waiting pull, otherwise buffer at the tail.
    fn deliver(&self, event: E) {
        let mut state = self.lock();
        if state.closed {
            return;
        }
        if let Some(event) = Self::hand_off(&mut state, event) {
            self.buffer(&mut state, event);
        }
    }

    /// End the outstanding pull; an event it never received returns to the head of the queue.
    fn finish_pull(&self, unreceived: Option<E>) {
        let mut state = self.lock();
        state.pull = Pull::Idle;
        if let Some(event) = unreceived
            && !state.closed
        {
            state.queue.push_front(event);
        }
    }

    /// Give `event` to a waiting pull; hands it back if nobody is waiting.
    ///
    /// A waiting pull moves to `Handed` even when its receiver was already
    /// withdrawn, so it stays outstanding until its guard calls `finish_pull`.
    fn hand_off(state: &mut InboxState<E>, event: E) -> Option<E> {
        match mem::replace(&mut state.pull, Pull::Handed) {
            Pull::Waiting(sender) => sender.send(event).err(),
            previous => {
                state.pull = previous;
                Some(event)
            }
        }
    }

    fn buffer(&self, state: &mut InboxState<E>, event: E) {
        if let Some(capacity) = self.capacity
            && state.queue.len() >= capacity.get()
        {
            let _ = state.queue.pop_front();
            state.lagged = state.lagged.saturating_add(1);
            warn!(
                session_id = %self.id,
                topic = %self.topic,
                capacity = capacity.get(),
                lagged = state.lagged,
                "subscription buffer full; dropped oldest event"
            );
        }
        state.queue.push_back(event);
    }
}

/// Shared session internals; hubs hold weak references to these.
pub(crate) struct SessionCore<E> {
    inbox: Arc<Inbox<E>>,
    bus: EventBus<E>,
    handle: SubscriptionHandle,
    registry: Weak<SessionRegistry<E>>,
}

impl<E> SessionCore<E> {
    pub(crate) fn id(&self) -> SessionId {
        self.inbox.id
    }

    /// Close the session; returns `false` if it was already closed.
    pub(crate) fn close(&self) -> bool {
        let discarded = {
            let mut state = self.inbox.lock();
            if state.closed {
                return false;
            }
            state.closed = true;
            // Dropping the sender resolves an outstanding pull with end-of-sequence.
            state.pull = Pull::Idle;
            let discarded = state.queue.len();
            state.queue.clear();
            discarded
        };
        let _ = self.bus.unsubscribe(&self.handle);
        if let Some(registry) = self.registry.upgrade() {
            let _ = registry
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&self.inbox.id);
        }
        debug!(
            session_id = %self.inbox.id,
            topic = %self.inbox.topic,
            discarded,
            "subscription session closed"
        );
        true
    }
}

/// One consumer's ordered, pull-driven view of a topic.
///
/// All operations take `&self`, so a session can be shared between the task
/// pulling events and the task that closes it on disconnect. Dropping the
/// session closes it.
pub struct Subscription<E> {
    core: Arc<SessionCore<E>>,
}

impl<E> Subscription<E>
where
    E: Clone + Send + 'static,
{
    /// Open an unbounded session on `topic`.
    #[must_use]
    pub fn open(bus: &EventBus<E>, topic: Topic) -> Self {
        Self::open_with(bus, topic, SessionConfig::default())
    }

    /// Open a session on `topic` with an explicit buffering policy.
    #[must_use]
    pub fn open_with(bus: &EventBus<E>, topic: Topic, config: SessionConfig) -> Self {
        Self::attach(bus, topic, config, Weak::new())
    }

    pub(crate) fn attach(
        bus: &EventBus<E>,
        topic: Topic,
        config: SessionConfig,
        registry: Weak<SessionRegistry<E>>,
    ) -> Self {
        let inbox = Arc::new(Inbox {
            id: Uuid::new_v4(),
            topic: topic.clone(),
            capacity: config.capacity,
            state: Mutex::new(InboxState {
                queue: VecDeque::new(),
                pull: Pull::Idle,
                closed: false,
                lagged: 0,
            }),
        });
        let listener_inbox = Arc::clone(&inbox);
        let handle = bus.subscribe(topic, move |event: &E| {
            listener_inbox.deliver(event.clone());
            Ok(())
        });
        debug!(
            session_id = %inbox.id,
            topic = %inbox.topic,
            listener_id = handle.id(),
            "subscription session opened"
        );
        Self {
            core: Arc::new(SessionCore {
                inbox,
                bus: bus.clone(),
                handle,
                registry,
            }),
        }
    }

    /// Pull the next event.
    ///
    /// Returns the oldest buffered event immediately when one exists, otherwise
    /// suspends until an event is published or the session closes. `Ok(None)`
    /// is end-of-sequence. Dropping the returned future before it resolves
    /// withdraws the pull without losing an event that raced with it.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::PullInProgress`] when another pull on this
    /// session is still outstanding.
    pub async fn next(&self) -> SessionResult<Option<E>> {
        let receiver = {
            let mut state = self.core.inbox.lock();
            if let Some(event) = state.queue.pop_front() {
                return Ok(Some(event));
            }
            if state.closed {
                return Ok(None);
            }
            if !matches!(state.pull, Pull::Idle) {
                return Err(SessionError::PullInProgress {
                    session_id: self.core.inbox.id,
                });
            }
            let (sender, receiver) = oneshot::channel();
            state.pull = Pull::Waiting(sender);
            receiver
        };

        let mut pending = PendingPull {
            inbox: &self.core.inbox,
            receiver,
        };
        Ok((&mut pending.receiver).await.ok())
    }

    /// Take a buffered event without suspending.
    ///
    /// Returns `None` while a pull is outstanding, since that pull may still
    /// hand an earlier event back to the queue.
    #[must_use]
    pub fn try_next(&self) -> Option<E> {
        let mut state = self.core.inbox.lock();
        if matches!(state.pull, Pull::Idle) {
            state.queue.pop_front()
        } else {
            None
        }
    }

    /// Adapt the session into a stream that ends at end-of-sequence.
    ///
    /// Dropping the stream closes the session.
    pub fn into_stream(self) -> impl Stream<Item = E> + Send + 'static {
        stream! {
            loop {
                match self.next().await {
                    Ok(Some(event)) => {
                        yield event;
                    }
                    Ok(None) => break,
                    Err(err) => {
                        warn!(session_id = %err.session_id(), error = %err, "subscription stream stopped");
                        break;
                    }
                }
            }
        }
    }
}

impl<E> Subscription<E> {
    /// Unregister the listener, discard buffered events, and resolve any
    /// outstanding pull with end-of-sequence.
    ///
    /// Returns `false` when the session was already closed.
    pub fn close(&self) -> bool {
        self.core.close()
    }

    /// Session identifier.
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.core.id()
    }

    /// Topic this session follows.
    #[must_use]
    pub fn topic(&self) -> &Topic {
        &self.core.inbox.topic
    }

    /// Whether the session has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.core.inbox.lock().closed
    }

    /// Number of events buffered and not yet pulled.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.core.inbox.lock().queue.len()
    }

    /// Number of events discarded because a bounded buffer overflowed.
    #[must_use]
    pub fn lagged(&self) -> u64 {
        self.core.inbox.lock().lagged
    }

    pub(crate) fn core(&self) -> &Arc<SessionCore<E>> {
        &self.core
    }
}

impl<E> Drop for Subscription<E> {
    fn drop(&mut self) {
        let _ = self.core.close();
    }
}

impl<E> Debug for Subscription<E> {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Subscription")
            .field("id", &self.id())
            .field("topic", self.topic())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// Outstanding pull; on drop it ends the pull and reclaims an event that was
/// handed off but never received.
struct PendingPull<'a, E> {
    inbox: &'a Inbox<E>,
    receiver: oneshot::Receiver<E>,
}

impl<E> Drop for PendingPull<'_, E> {
    fn drop(&mut self) {
        self.receiver.close();
        self.inbox.finish_pull(self.receiver.try_recv().ok());
    }
}
