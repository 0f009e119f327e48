//! Error types for the real-time channel

use std::time::Duration;

use thiserror::Error;
use tokio_tungstenite::tungstenite;

// ----------------------------------------------------------------------------
// Transport Errors
// ----------------------------------------------------------------------------

/// Failure of the underlying connection
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Failed to connect: {0}")]
    ConnectFailed(String),

    #[error("Connect timed out after {0:?}")]
    Timeout(Duration),

    #[error("Transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Connection closed")]
    Closed,
}

impl From<tungstenite::Error> for TransportError {
    fn from(err: tungstenite::Error) -> Self {
        match err {
            tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
                TransportError::Closed
            }
            tungstenite::Error::Io(io) => TransportError::Io(io),
            other => TransportError::Protocol(other.to_string()),
        }
    }
}

// ----------------------------------------------------------------------------
// Channel Errors
// ----------------------------------------------------------------------------

/// Failure to set up or drive the channel itself
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Invalid endpoint {url}: {reason}")]
    InvalidEndpoint { url: String, reason: String },

    #[error("Invalid channel configuration: {0}")]
    InvalidConfig(String),

    #[error("No async runtime available: {0}")]
    NoRuntime(String),
}

impl ChannelError {
    pub fn invalid_endpoint(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidEndpoint {
            url: url.into(),
            reason: reason.into(),
        }
    }
}
