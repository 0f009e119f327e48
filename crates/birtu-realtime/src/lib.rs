//! Birtu Realtime
//!
//! The reconnecting real-time channel that carries server-pushed events to the Birtu
//! client: endpoint derivation from the API base, capped exponential backoff, a
//! transport abstraction with a WebSocket implementation, and a scripted mock
//! transport behind the `testing` feature.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod backoff;
pub mod channel;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod transport;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use backoff::ReconnectPolicy;
pub use channel::{
    ChannelStats, ConnectionState, ReconnectingChannel, CLOSE_ABNORMAL, CLOSE_EXHAUSTED,
    CLOSE_NORMAL,
};
pub use config::{ChannelConfig, ReconnectConfig, DEFAULT_BASE_URL};
pub use endpoint::realtime_endpoint;
pub use error::{ChannelError, TransportError};
pub use transport::{Transport, TransportConnection, TransportFrame, WebSocketTransport};
