//! Event payload types carried across the platform.

use chrono::{DateTime, Utc};

/// A chat message appended to a channel; the payload published on channel topics.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct Message {
    /// Store-assigned message identifier.
    pub id: String,
    /// Channel the message was posted to.
    pub channel_id: String,
    /// User who authored the message.
    pub author_id: String,
    /// Message body.
    pub content: String,
    /// Timestamp recording when the store accepted the message.
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Build a message stamped with the current time.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        channel_id: impl Into<String>,
        author_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            channel_id: channel_id.into(),
            author_id: author_id.into(),
            content: content.into(),
            created_at: Utc::now(),
        }
    }
}
