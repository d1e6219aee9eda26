//! Error types for the appointment relay.

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Failures reported by a messaging transport.
///
/// None of these are fatal to the relay: callers log them and degrade.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Failed to send on transport {name}: {reason}")]
    SendFailed { name: String, reason: String },

    #[error("Failed to delete message {message_id} on transport {name}: {reason}")]
    DeleteFailed {
        name: String,
        message_id: u64,
        reason: String,
    },

    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Gateway error: {0}")]
    Gateway(String),

    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: String,
        after: std::time::Duration,
    },

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        Self::Http(e.to_string())
    }
}
