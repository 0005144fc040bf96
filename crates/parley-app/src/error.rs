//! # Design
//!
//! - Centralize application-level errors for bootstrap and the chat service.
//! - Keep error messages constant while carrying context fields for debugging.
//! - Preserve source errors without re-logging at call sites.

use std::io;

use thiserror::Error;

/// Result alias for application operations.
pub type AppResult<T> = Result<T, AppError>;

/// Result alias for chat service operations.
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Errors raised by the chat service and its record store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    /// The referenced channel does not exist.
    #[error("unknown channel")]
    UnknownChannel {
        /// Channel identifier supplied by the caller.
        channel_id: String,
    },
    /// The referenced user does not exist.
    #[error("unknown user")]
    UnknownUser {
        /// User identifier supplied by the caller.
        user_id: String,
    },
    /// Message content was empty after trimming whitespace.
    #[error("message content is empty")]
    EmptyMessage {
        /// Channel the message was addressed to.
        channel_id: String,
    },
    /// A record with the same identifier already exists.
    #[error("duplicate record")]
    Duplicate {
        /// Record kind (`user` or `channel`).
        kind: &'static str,
        /// Conflicting identifier.
        id: String,
    },
}

/// Application-level error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// Configuration values were invalid.
    #[error("invalid configuration")]
    InvalidConfig {
        /// Field name that failed validation.
        field: &'static str,
        /// Machine-readable reason for the failure.
        reason: &'static str,
        /// Optional value associated with the failure.
        value: Option<String>,
    },
    /// Telemetry operations failed.
    #[error("telemetry operation failed")]
    Telemetry {
        /// Operation identifier.
        operation: &'static str,
        /// Source telemetry error.
        source: parley_telemetry::TelemetryError,
    },
    /// Chat service operations failed.
    #[error("chat service operation failed")]
    Service {
        /// Operation identifier.
        operation: &'static str,
        /// Source service error.
        source: ServiceError,
    },
    /// IO operations failed.
    #[error("io operation failed")]
    Io {
        /// Operation identifier.
        operation: &'static str,
        /// Source IO error.
        source: io::Error,
    },
}

impl AppError {
    pub(crate) const fn telemetry(
        operation: &'static str,
        source: parley_telemetry::TelemetryError,
    ) -> Self {
        Self::Telemetry { operation, source }
    }

    pub(crate) const fn service(operation: &'static str, source: ServiceError) -> Self {
        Self::Service { operation, source }
    }

    pub(crate) const fn io(operation: &'static str, source: io::Error) -> Self {
        Self::Io { operation, source }
    }
}
