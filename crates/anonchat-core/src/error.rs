//! Error types for the chat server.

use thiserror::Error;

/// Chat server errors.
///
/// The matchmaking engine itself never fails: stale partners and bad input
/// degrade to dropped events. These errors cover the edges around it, such as
/// frame decoding and server configuration.
#[derive(Debug, Error)]
pub enum ChatError {
    /// JSON encode/decode error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Frame did not match the wire protocol
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl ChatError {
    /// Create a new protocol error.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a new configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ChatError::config("PORT must be a number");
        assert_eq!(err.to_string(), "Configuration error: PORT must be a number");

        let err = ChatError::protocol("unknown event");
        assert_eq!(err.to_string(), "Protocol error: unknown event");
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: ChatError = json_err.into();
        assert!(matches!(err, ChatError::Json(_)));
    }
}
