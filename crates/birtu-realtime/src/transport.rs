//! Transport abstraction and the WebSocket implementation

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};
use url::Url;

use crate::error::TransportError;

/// Close code reported when the peer closes without giving one
pub const CLOSE_NO_STATUS: u16 = 1005;

// ----------------------------------------------------------------------------
// Transport Traits
// ----------------------------------------------------------------------------

/// Frame read from an open connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportFrame {
    Text(String),
    Close { code: u16, reason: String },
}

/// Factory for connections to an endpoint
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self, endpoint: &Url) -> Result<Box<dyn TransportConnection>, TransportError>;
}

/// One open bidirectional connection
///
/// `recv` must be cancel safe: the channel polls it alongside its outbound queue.
#[async_trait]
pub trait TransportConnection: Send {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;

    /// Next frame, or `None` once the link is gone
    async fn recv(&mut self) -> Option<Result<TransportFrame, TransportError>>;

    /// Close with the normal close code
    async fn close(&mut self) -> Result<(), TransportError>;
}

// ----------------------------------------------------------------------------
// WebSocket Transport
// ----------------------------------------------------------------------------

/// Transport over `tokio-tungstenite`
#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketTransport;

impl WebSocketTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self, endpoint: &Url) -> Result<Box<dyn TransportConnection>, TransportError> {
        debug!("Opening WebSocket to {}", endpoint);
        let (stream, response) = connect_async(endpoint.as_str()).await?;
        debug!("WebSocket handshake completed with status {}", response.status());
        Ok(Box::new(WebSocketConnection { stream }))
    }
}

struct WebSocketConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl TransportConnection for WebSocketConnection {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.stream.send(Message::Text(text)).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<TransportFrame, TransportError>> {
        loop {
            let message = match self.stream.next().await? {
                Ok(message) => message,
                Err(err) => return Some(Err(err.into())),
            };
            match message {
                Message::Text(text) => return Some(Ok(TransportFrame::Text(text))),
                Message::Binary(bytes) => match String::from_utf8(bytes) {
                    Ok(text) => return Some(Ok(TransportFrame::Text(text))),
                    Err(_) => warn!("Ignoring non UTF-8 binary frame"),
                },
                Message::Close(frame) => {
                    let (code, reason) = frame
                        .map(|f| (u16::from(f.code), f.reason.into_owned()))
                        .unwrap_or((CLOSE_NO_STATUS, String::new()));
                    return Some(Ok(TransportFrame::Close { code, reason }));
                }
                // Pings are answered by tungstenite itself
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        match self.stream.close(None).await {
            Ok(()) => Ok(()),
            Err(err) => match TransportError::from(err) {
                TransportError::Closed => Ok(()),
                other => Err(other),
            },
        }
    }
}
