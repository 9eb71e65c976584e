//! Error types for the gateway crate

use std::time::Duration;
use thiserror::Error;

/// Transport-level errors (event queues)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Channel closed")]
    ChannelClosed,

    #[error("Queue full")]
    Full,
}

/// Errors from the broker link
///
/// Transient variants are retried by the connection manager's backoff loop;
/// fatal variants stop it and are surfaced to the operator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("Connection refused by {host}:{port}")]
    Refused { host: String, port: u16 },

    #[error("Connection lost: {0}")]
    Lost(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Invalid connection parameters: {0}")]
    InvalidParams(String),

    #[error("Client id {0} is already in use")]
    ClientIdInUse(i32),

    #[error("Broker error: {0}")]
    Broker(String),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

impl ConnectionError {
    /// Errors no amount of retrying will fix
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ConnectionError::Authentication(_)
                | ConnectionError::InvalidParams(_)
                | ConnectionError::ClientIdInUse(_)
        )
    }

    /// Errors worth another attempt after a backoff delay
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ConnectionError::Refused { .. }
                | ConnectionError::Lost(_)
                | ConnectionError::Timeout(_)
                | ConnectionError::NotConnected
                | ConnectionError::Transport(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(ConnectionError::Authentication("bad login".into()).is_fatal());
        assert!(ConnectionError::ClientIdInUse(1).is_fatal());
        assert!(!ConnectionError::Lost("socket reset".into()).is_fatal());

        let refused = ConnectionError::Refused {
            host: "127.0.0.1".into(),
            port: 7497,
        };
        assert!(refused.is_transient());
        assert_eq!(refused.to_string(), "Connection refused by 127.0.0.1:7497");
        assert!(!ConnectionError::Broker("unknown order".into()).is_transient());
    }
}
