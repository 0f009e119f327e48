//! Scripted in-memory transport
//!
//! [`MockTransport`] answers each connect attempt from a script and records when it
//! was made. Accepted connections hand back a [`MockRemote`] that plays the server
//! side: push frames, close, fail or silently drop the link.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::Instant;
use url::Url;

use crate::error::TransportError;
use crate::transport::{Transport, TransportConnection, TransportFrame};

type FrameSender = mpsc::UnboundedSender<Result<TransportFrame, TransportError>>;
type FrameReceiver = mpsc::UnboundedReceiver<Result<TransportFrame, TransportError>>;

/// How the mock answers one connect attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    Accept,
    Refuse,
    /// Never completes; exercises the connect timeout
    Hang,
}

/// A connect attempt seen by the mock
#[derive(Debug, Clone)]
pub struct ConnectAttempt {
    pub endpoint: Url,
    pub at: Instant,
}

struct MockState {
    script: VecDeque<ConnectOutcome>,
    fallback: ConnectOutcome,
    attempts: Vec<ConnectAttempt>,
    remotes: Vec<MockRemote>,
}

// ----------------------------------------------------------------------------
// Mock Transport
// ----------------------------------------------------------------------------

#[derive(Clone)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// Accept every connect unless scripted otherwise
    pub fn new() -> Self {
        Self::with_fallback(ConnectOutcome::Accept)
    }

    /// Refuse every connect unless scripted otherwise
    pub fn refusing() -> Self {
        Self::with_fallback(ConnectOutcome::Refuse)
    }

    pub fn with_fallback(fallback: ConnectOutcome) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                script: VecDeque::new(),
                fallback,
                attempts: Vec::new(),
                remotes: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue outcomes for the next attempts, ahead of the fallback
    pub fn script(&self, outcomes: impl IntoIterator<Item = ConnectOutcome>) {
        self.lock().script.extend(outcomes);
    }

    pub fn set_fallback(&self, fallback: ConnectOutcome) {
        self.lock().fallback = fallback;
    }

    pub fn attempts(&self) -> Vec<ConnectAttempt> {
        self.lock().attempts.clone()
    }

    pub fn attempt_count(&self) -> usize {
        self.lock().attempts.len()
    }

    /// Gaps between consecutive attempts
    pub fn attempt_gaps(&self) -> Vec<std::time::Duration> {
        self.lock()
            .attempts
            .windows(2)
            .map(|pair| pair[1].at.duration_since(pair[0].at))
            .collect()
    }

    /// Server side of the most recently accepted connection
    pub fn last_remote(&self) -> Option<MockRemote> {
        self.lock().remotes.last().cloned()
    }

    /// Server sides of every accepted connection, oldest first
    pub fn remotes(&self) -> Vec<MockRemote> {
        self.lock().remotes.clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, endpoint: &Url) -> Result<Box<dyn TransportConnection>, TransportError> {
        let outcome = {
            let mut state = self.lock();
            state.attempts.push(ConnectAttempt {
                endpoint: endpoint.clone(),
                at: Instant::now(),
            });
            let fallback = state.fallback;
            state.script.pop_front().unwrap_or(fallback)
        };

        match outcome {
            ConnectOutcome::Refuse => Err(TransportError::ConnectFailed(format!(
                "{} refused the connection",
                endpoint
            ))),
            ConnectOutcome::Hang => std::future::pending().await,
            ConnectOutcome::Accept => {
                let (frames_tx, frames_rx) = mpsc::unbounded_channel();
                let remote = MockRemote {
                    frames: Arc::new(Mutex::new(Some(frames_tx))),
                    sent: Arc::new(Mutex::new(Vec::new())),
                    client_closed: Arc::new(AtomicBool::new(false)),
                };
                let connection = MockConnection {
                    frames: frames_rx,
                    sent: Arc::clone(&remote.sent),
                    client_closed: Arc::clone(&remote.client_closed),
                };
                self.lock().remotes.push(remote);
                Ok(Box::new(connection))
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Mock Connection
// ----------------------------------------------------------------------------

struct MockConnection {
    frames: FrameReceiver,
    sent: Arc<Mutex<Vec<String>>>,
    client_closed: Arc<AtomicBool>,
}

#[async_trait]
impl TransportConnection for MockConnection {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        if self.client_closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(text);
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<TransportFrame, TransportError>> {
        self.frames.recv().await
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.client_closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Mock Remote
// ----------------------------------------------------------------------------

/// Server side of one mock connection
#[derive(Clone)]
pub struct MockRemote {
    frames: Arc<Mutex<Option<FrameSender>>>,
    sent: Arc<Mutex<Vec<String>>>,
    client_closed: Arc<AtomicBool>,
}

impl MockRemote {
    fn push(&self, frame: Result<TransportFrame, TransportError>) -> bool {
        let frames = self.frames.lock().unwrap_or_else(PoisonError::into_inner);
        frames.as_ref().is_some_and(|tx| tx.send(frame).is_ok())
    }

    /// Deliver a text frame to the client
    pub fn push_text(&self, text: impl Into<String>) -> bool {
        self.push(Ok(TransportFrame::Text(text.into())))
    }

    /// Close from the server side with the given code
    pub fn close(&self, code: u16, reason: &str) -> bool {
        self.push(Ok(TransportFrame::Close {
            code,
            reason: reason.to_string(),
        }))
    }

    /// Surface a transport error on the client's next read
    pub fn fail(&self, error: TransportError) -> bool {
        self.push(Err(error))
    }

    /// Drop the link without a close frame
    pub fn drop_link(&self) {
        self.frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    /// Frames the client has sent on this connection
    pub fn sent(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Whether the client closed this connection
    pub fn is_closed(&self) -> bool {
        self.client_closed.load(Ordering::SeqCst)
    }
}
