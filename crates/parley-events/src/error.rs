//! Event bus and subscription error primitives.

use thiserror::Error;
use uuid::Uuid;

use crate::bus::ListenerId;

/// Error returned by a listener callback during publish.
///
/// Listener errors never propagate out of `publish`; they are logged and
/// counted in the returned delivery report.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ListenerError {
    /// The listener declined the event.
    #[error("listener rejected event")]
    Rejected {
        /// Listener-supplied explanation.
        reason: String,
    },
    /// The listener panicked while handling the event.
    #[error("listener panicked")]
    Panicked {
        /// Panic payload rendered as text when available.
        message: String,
    },
    /// The listener was reached again by a publish issued from inside its own callback.
    #[error("listener re-entered while already running")]
    Reentrant {
        /// Listener that was skipped for the nested publish.
        listener_id: ListenerId,
    },
}

impl ListenerError {
    /// Convenience constructor for listeners that refuse an event.
    #[must_use]
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected {
            reason: reason.into(),
        }
    }
}

/// Error raised by subscription session operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SessionError {
    /// `next()` was called while an earlier pull on the same session was still pending.
    #[error("a pull is already outstanding on this session")]
    PullInProgress {
        /// Session that rejected the pull.
        session_id: Uuid,
    },
}

impl SessionError {
    /// Session the error was raised for.
    #[must_use]
    pub const fn session_id(&self) -> Uuid {
        match self {
            Self::PullInProgress { session_id } => *session_id,
        }
    }
}

/// Result wrapper for subscription session operations.
pub type SessionResult<T> = Result<T, SessionError>;
