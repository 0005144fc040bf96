//! In-memory record store for users, channels and messages.
//!
//! Records live for the lifetime of the process; nothing is persisted.

use std::collections::HashMap;

use parley_events::Message;
use serde::{Deserialize, Serialize};

use crate::error::{ServiceError, ServiceResult};

/// A chat participant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    /// Stable user identifier.
    pub id: String,
    /// Display name.
    pub name: String,
}

/// A chat channel messages are posted to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Channel {
    /// Stable channel identifier; also the key its delivery topic is derived from.
    pub id: String,
    /// Display name.
    pub name: String,
}

/// Append-only store backing the chat queries and mutations.
#[derive(Debug, Default)]
pub struct MemoryStore {
    users: Vec<User>,
    channels: Vec<Channel>,
    messages: HashMap<String, Vec<Message>>,
    last_message_id: u64,
}

impl MemoryStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with demo users and the `general` and `random` channels.
    ///
    /// # Errors
    ///
    /// Never fails in practice; seeding goes through the same validation as
    /// regular inserts.
    pub fn seeded() -> ServiceResult<Self> {
        let mut store = Self::new();
        store.add_user("ada", "Ada")?;
        store.add_user("grace", "Grace")?;
        store.add_channel("general", "General")?;
        store.add_channel("random", "Random")?;
        Ok(store)
    }

    /// Register a user.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Duplicate`] when the id is already taken.
    pub fn add_user(&mut self, id: &str, name: &str) -> ServiceResult<User> {
        if self.user(id).is_some() {
            return Err(ServiceError::Duplicate {
                kind: "user",
                id: id.to_string(),
            });
        }
        let user = User {
            id: id.to_string(),
            name: name.to_string(),
        };
        self.users.push(user.clone());
        Ok(user)
    }

    /// Register a channel.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Duplicate`] when the id is already taken.
    pub fn add_channel(&mut self, id: &str, name: &str) -> ServiceResult<Channel> {
        if self.channel(id).is_some() {
            return Err(ServiceError::Duplicate {
                kind: "channel",
                id: id.to_string(),
            });
        }
        let channel = Channel {
            id: id.to_string(),
            name: name.to_string(),
        };
        self.channels.push(channel.clone());
        let _ = self.messages.insert(id.to_string(), Vec::new());
        Ok(channel)
    }

    /// All users in registration order.
    #[must_use]
    pub fn users(&self) -> &[User] {
        &self.users
    }

    /// All channels in registration order.
    #[must_use]
    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    /// Look up a user by id.
    #[must_use]
    pub fn user(&self, id: &str) -> Option<&User> {
        self.users.iter().find(|user| user.id == id)
    }

    /// Look up a channel by id.
    #[must_use]
    pub fn channel(&self, id: &str) -> Option<&Channel> {
        self.channels.iter().find(|channel| channel.id == id)
    }

    /// Messages of a channel, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::UnknownChannel`] when the channel does not exist.
    pub fn messages(&self, channel_id: &str) -> ServiceResult<&[Message]> {
        self.messages
            .get(channel_id)
            .map(Vec::as_slice)
            .ok_or_else(|| ServiceError::UnknownChannel {
                channel_id: channel_id.to_string(),
            })
    }

    /// Append a message to a channel and return the stored record.
    ///
    /// # Errors
    ///
    /// Returns an error when the channel or author is unknown, or when the
    /// content is blank.
    pub fn append_message(
        &mut self,
        channel_id: &str,
        author_id: &str,
        content: &str,
    ) -> ServiceResult<Message> {
        if self.user(author_id).is_none() {
            return Err(ServiceError::UnknownUser {
                user_id: author_id.to_string(),
            });
        }
        let content = content.trim();
        let Some(messages) = self.messages.get_mut(channel_id) else {
            return Err(ServiceError::UnknownChannel {
                channel_id: channel_id.to_string(),
            });
        };
        if content.is_empty() {
            return Err(ServiceError::EmptyMessage {
                channel_id: channel_id.to_string(),
            });
        }
        self.last_message_id = self.last_message_id.saturating_add(1);
        let message = Message::new(
            self.last_message_id.to_string(),
            channel_id,
            author_id,
            content,
        );
        messages.push(message.clone());
        Ok(message)
    }
}
