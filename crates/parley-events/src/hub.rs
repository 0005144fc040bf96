//! Session tracking on top of the bus, used for the shutdown sweep.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::info;

use crate::bus::{Delivery, EventBus};
use crate::session::{SessionConfig, SessionCore, SessionMap, SessionRegistry, Subscription};
use crate::topics::Topic;

/// Event bus plus a registry of every session opened through it.
///
/// Sessions deregister themselves when closed or dropped; [`SessionHub::close_all`]
/// force-closes whatever is still open when the transport shuts down.
pub struct SessionHub<E> {
    bus: EventBus<E>,
    sessions: Arc<SessionRegistry<E>>,
    defaults: SessionConfig,
}

impl<E> SessionHub<E>
where
    E: Clone + Send + 'static,
{
    /// Hub over a fresh bus with unbounded sessions.
    #[must_use]
    pub fn new() -> Self {
        Self::with_bus(EventBus::new(), SessionConfig::default())
    }

    /// Hub over an existing bus; `defaults` applies to sessions opened with [`SessionHub::open`].
    #[must_use]
    pub fn with_bus(bus: EventBus<E>, defaults: SessionConfig) -> Self {
        Self {
            bus,
            sessions: Arc::new(Mutex::new(HashMap::new())),
            defaults,
        }
    }

    /// Open a tracked session on `topic` using the hub defaults.
    #[must_use]
    pub fn open(&self, topic: Topic) -> Subscription<E> {
        self.open_with(topic, self.defaults)
    }

    /// Open a tracked session on `topic` with an explicit buffering policy.
    #[must_use]
    pub fn open_with(&self, topic: Topic, config: SessionConfig) -> Subscription<E> {
        let mut sessions = self.lock_sessions();
        let subscription =
            Subscription::attach(&self.bus, topic, config, Arc::downgrade(&self.sessions));
        let core = subscription.core();
        let _ = sessions.insert(core.id(), Arc::downgrade(core));
        subscription
    }

    /// Publish `event` on `topic` through the underlying bus.
    pub fn publish(&self, topic: &Topic, event: E) -> Delivery {
        self.bus.publish(topic, event)
    }

    /// Close every open session; returns how many were closed by this call.
    pub fn close_all(&self) -> usize {
        let open: Vec<Arc<SessionCore<E>>> = self
            .lock_sessions()
            .drain()
            .filter_map(|(_, session)| session.upgrade())
            .collect();
        let closed = open.iter().filter(|session| session.close()).count();
        info!(closed, "closed open subscription sessions");
        closed
    }
}

impl<E> SessionHub<E> {
    /// Underlying bus shared by every session of this hub.
    #[must_use]
    pub const fn bus(&self) -> &EventBus<E> {
        &self.bus
    }

    /// Default buffering policy for new sessions.
    #[must_use]
    pub const fn defaults(&self) -> SessionConfig {
        self.defaults
    }

    /// Number of sessions currently open.
    #[must_use]
    pub fn open_sessions(&self) -> usize {
        self.lock_sessions()
            .values()
            .filter(|session| session.strong_count() > 0)
            .count()
    }

    fn lock_sessions(&self) -> MutexGuard<'_, SessionMap<E>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<E> Clone for SessionHub<E> {
    fn clone(&self) -> Self {
        Self {
            bus: self.bus.clone(),
            sessions: Arc::clone(&self.sessions),
            defaults: self.defaults,
        }
    }
}

impl<E> Default for SessionHub<E>
where
    E: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
