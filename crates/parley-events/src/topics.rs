//! Topic identifiers used to route events to listeners.

use std::borrow::Borrow;
use std::fmt::{self, Display, Formatter};
use std::sync::Arc;

/// Prefix applied to channel identifiers when deriving their delivery topic.
pub const CHANNEL_TOPIC_PREFIX: &str = "chan:";

/// Opaque key identifying one independent delivery channel.
///
/// Topics have no lifecycle of their own: the bus creates registry entries on
/// first subscribe and prunes them once the last listener leaves.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Topic(Arc<str>);

impl Topic {
    /// Build a topic from any string-like key.
    #[must_use]
    pub fn new(key: impl AsRef<str>) -> Self {
        Self(Arc::from(key.as_ref()))
    }

    /// Topic carrying new messages for the given chat channel.
    #[must_use]
    pub fn for_channel(channel_id: &str) -> Self {
        Self::new(format!("{CHANNEL_TOPIC_PREFIX}{channel_id}"))
    }

    /// Raw topic key.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Topic {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

impl From<&str> for Topic {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Topic {
    fn from(value: String) -> Self {
        Self(Arc::from(value))
    }
}

impl Borrow<str> for Topic {
    fn borrow(&self) -> &str {
        &self.0
    }
}
