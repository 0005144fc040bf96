//! Chat queries, the post-message mutation and the message-added subscription.
//!
//! # Design
//! - The store is the source of truth; a message is published only after it has
//!   been appended.
//! - Publishing happens while the store write lock is held, so per-channel
//!   delivery order matches append order.
//! - Every accepted subscription gets its own session from the hub; shutdown
//!   closes whatever sessions are still open.

use std::sync::Arc;

use parley_events::{Message, SessionHub, Subscription, Topic};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{ServiceError, ServiceResult};
use crate::store::{Channel, MemoryStore, User};

/// Request-layer facade over the record store and the event core.
#[derive(Clone)]
pub struct ChatService {
    store: Arc<RwLock<MemoryStore>>,
    hub: SessionHub<Message>,
}

impl ChatService {
    /// Wrap `store` and publish through `hub`.
    #[must_use]
    pub fn new(store: MemoryStore, hub: SessionHub<Message>) -> Self {
        Self {
            store: Arc::new(RwLock::new(store)),
            hub,
        }
    }

    /// All registered users.
    pub async fn users(&self) -> Vec<User> {
        self.store.read().await.users().to_vec()
    }

    /// All channels.
    pub async fn channels(&self) -> Vec<Channel> {
        self.store.read().await.channels().to_vec()
    }

    /// Message history of a channel, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::UnknownChannel`] when the channel does not exist.
    pub async fn messages(&self, channel_id: &str) -> ServiceResult<Vec<Message>> {
        self.store
            .read()
            .await
            .messages(channel_id)
            .map(<[Message]>::to_vec)
    }

    /// Append a message to a channel and deliver it to the channel's subscribers.
    ///
    /// # Errors
    ///
    /// Returns an error when the channel or author is unknown, or the content is blank.
    pub async fn post_message(
        &self,
        channel_id: &str,
        author_id: &str,
        content: &str,
    ) -> ServiceResult<Message> {
        let mut store = self.store.write().await;
        let message = store.append_message(channel_id, author_id, content)?;
        let topic = Topic::for_channel(channel_id);
        let delivery = self.hub.publish(&topic, message.clone());
        drop(store);
        debug!(
            topic = %topic,
            message_id = %message.id,
            notified = delivery.notified,
            failed = delivery.failed,
            "message posted"
        );
        Ok(message)
    }

    /// Open a session streaming messages newly posted to `channel_id`.
    ///
    /// The caller pulls with [`Subscription::next`] and closes the session (or
    /// drops it) when the consumer disconnects.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::UnknownChannel`] when the channel does not exist.
    pub async fn message_added(&self, channel_id: &str) -> ServiceResult<Subscription<Message>> {
        let store = self.store.read().await;
        if store.channel(channel_id).is_none() {
            return Err(ServiceError::UnknownChannel {
                channel_id: channel_id.to_string(),
            });
        }
        let session = self.hub.open(Topic::for_channel(channel_id));
        drop(store);
        debug!(session_id = %session.id(), channel_id, "message subscription accepted");
        Ok(session)
    }

    /// Number of subscription sessions currently open.
    #[must_use]
    pub fn open_subscriptions(&self) -> usize {
        self.hub.open_sessions()
    }

    /// Close every open subscription; returns how many were closed.
    pub fn shutdown(&self) -> usize {
        let closed = self.hub.close_all();
        info!(closed, "chat subscriptions closed");
        closed
    }
}
