//! Reconnecting Channel
//!
//! Keeps one persistent connection per authenticated user. Unexpected closes are
//! retried with capped exponential backoff until the retry budget runs out; an
//! explicit [`ReconnectingChannel::close`] never reconnects.
//!
//! Every connection attempt is tagged with an epoch. `connect`, `close` and each
//! new attempt bump the epoch, and background tasks only touch channel state while
//! their epoch is still current, so a superseded task can never fire callbacks or
//! schedule a retry.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use birtu_core::{Identity, UserId};
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use crate::backoff::ReconnectPolicy;
use crate::config::ChannelConfig;
use crate::endpoint::realtime_endpoint;
use crate::error::{ChannelError, TransportError};
use crate::transport::{Transport, TransportFrame, WebSocketTransport};

/// Explicit close by the client
pub const CLOSE_NORMAL: u16 = 1000;
/// Link lost without a close frame, or a transport error
pub const CLOSE_ABNORMAL: u16 = 1006;
/// Retry budget used up; the channel stays down until the next `connect`
pub const CLOSE_EXHAUSTED: u16 = 4000;

pub type OpenCallback = Arc<dyn Fn() + Send + Sync>;
pub type MessageCallback = Arc<dyn Fn(&str) + Send + Sync>;
pub type CloseCallback = Arc<dyn Fn(u16, &str) + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(&TransportError) + Send + Sync>;

// ----------------------------------------------------------------------------
// State and Stats
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    Closing,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChannelStats {
    pub connect_attempts: u64,
    pub opens: u64,
    pub messages_received: u64,
    pub messages_sent: u64,
    /// Sends refused because the channel was not open
    pub messages_dropped: u64,
    pub reconnects_scheduled: u64,
}

#[derive(Clone, Default)]
struct Callbacks {
    on_open: Option<OpenCallback>,
    on_message: Option<MessageCallback>,
    on_close: Option<CloseCallback>,
    on_error: Option<ErrorCallback>,
}

struct Target {
    user_id: UserId,
    endpoint: Url,
}

struct Inner {
    state: ConnectionState,
    target: Option<Target>,
    /// Retries made since the last successful open
    attempt: u32,
    epoch: u64,
    exhausted: bool,
    reconnect_timer: Option<JoinHandle<()>>,
    pending_delay: Option<Duration>,
    connection_task: Option<JoinHandle<()>>,
    outbound: Option<mpsc::UnboundedSender<String>>,
    callbacks: Callbacks,
    stats: ChannelStats,
}

impl Inner {
    fn cancel_timer(&mut self) {
        if let Some(timer) = self.reconnect_timer.take() {
            timer.abort();
            debug!("Cancelled pending reconnect");
        }
        self.pending_delay = None;
    }

    /// Invalidate the current connection without reporting it
    fn supersede(&mut self) {
        self.epoch += 1;
        if self.outbound.take().is_some() {
            // The connection task sees its queue close and shuts the link down itself
            self.connection_task = None;
        } else if let Some(task) = self.connection_task.take() {
            task.abort();
        }
        self.state = ConnectionState::Disconnected;
    }
}

struct Shared {
    config: ChannelConfig,
    policy: ReconnectPolicy,
    transport: Arc<dyn Transport>,
    runtime: Handle,
    inner: Mutex<Inner>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        let inner = self.inner.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(timer) = inner.reconnect_timer.take() {
            timer.abort();
        }
        if let Some(task) = inner.connection_task.take() {
            task.abort();
        }
    }
}

// ----------------------------------------------------------------------------
// Channel
// ----------------------------------------------------------------------------

/// Persistent, self-healing connection for the logged-in user
///
/// Cheap to clone; clones drive the same connection. Background tasks run on the
/// Tokio runtime that was current when the channel was created.
#[derive(Clone)]
pub struct ReconnectingChannel {
    shared: Arc<Shared>,
}

impl ReconnectingChannel {
    pub fn new(config: ChannelConfig, transport: Arc<dyn Transport>) -> Result<Self, ChannelError> {
        config.validate()?;
        let runtime =
            Handle::try_current().map_err(|err| ChannelError::NoRuntime(err.to_string()))?;
        let policy = config.policy();
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                policy,
                transport,
                runtime,
                inner: Mutex::new(Inner {
                    state: ConnectionState::Disconnected,
                    target: None,
                    attempt: 0,
                    epoch: 0,
                    exhausted: false,
                    reconnect_timer: None,
                    pending_delay: None,
                    connection_task: None,
                    outbound: None,
                    callbacks: Callbacks::default(),
                    stats: ChannelStats::default(),
                }),
            }),
        })
    }

    /// Channel over a real WebSocket
    pub fn websocket(config: ChannelConfig) -> Result<Self, ChannelError> {
        Self::new(config, Arc::new(WebSocketTransport::new()))
    }

    // ------------------------------------------------------------------------
    // Callbacks
    // ------------------------------------------------------------------------

    /// Each setter replaces the previous callback of the same kind
    pub fn on_open(&self, callback: impl Fn() + Send + Sync + 'static) {
        self.shared.lock().callbacks.on_open = Some(Arc::new(callback));
    }

    pub fn on_message(&self, callback: impl Fn(&str) + Send + Sync + 'static) {
        self.shared.lock().callbacks.on_message = Some(Arc::new(callback));
    }

    pub fn on_close(&self, callback: impl Fn(u16, &str) + Send + Sync + 'static) {
        self.shared.lock().callbacks.on_close = Some(Arc::new(callback));
    }

    pub fn on_error(&self, callback: impl Fn(&TransportError) + Send + Sync + 'static) {
        self.shared.lock().callbacks.on_error = Some(Arc::new(callback));
    }

    // ------------------------------------------------------------------------
    // Operations
    // ------------------------------------------------------------------------

    /// Open the connection for `identity`
    ///
    /// A no-op when already open or connecting for the same user. A different user's
    /// connection is dropped first. Any pending retry is cancelled and the attempt
    /// is made immediately.
    pub fn connect(&self, identity: &Identity) -> Result<(), ChannelError> {
        let endpoint = realtime_endpoint(&self.shared.config.base_url, identity.user_id())?;
        let mut inner = self.shared.lock();

        let same_user = inner
            .target
            .as_ref()
            .is_some_and(|target| &target.user_id == identity.user_id());
        let live = matches!(
            inner.state,
            ConnectionState::Open | ConnectionState::Connecting
        );
        if same_user && live {
            debug!("Channel already {:?} for {}", inner.state, identity.user_id());
            return Ok(());
        }
        if live {
            info!("Switching channel to user {}", identity.user_id());
            inner.supersede();
        }

        inner.cancel_timer();
        if inner.exhausted || !same_user {
            inner.attempt = 0;
            inner.exhausted = false;
        }
        inner.target = Some(Target {
            user_id: identity.user_id().clone(),
            endpoint,
        });
        begin_connect(&self.shared, &mut inner);
        Ok(())
    }

    /// Close the connection and stop retrying
    ///
    /// An open connection is closed with code 1000 and `on_close` fires once the link
    /// is down. Closing while connecting or waiting to retry reports 1000 immediately.
    pub fn close(&self) {
        let on_close = {
            let mut inner = self.shared.lock();
            let had_timer = inner.reconnect_timer.is_some();
            inner.cancel_timer();
            inner.attempt = 0;
            inner.exhausted = false;
            inner.target = None;

            match inner.state {
                ConnectionState::Open => {
                    info!("Closing real-time channel");
                    inner.state = ConnectionState::Closing;
                    inner.outbound = None;
                    None
                }
                ConnectionState::Connecting => {
                    info!("Abandoning connect attempt");
                    inner.supersede();
                    inner.callbacks.on_close.clone()
                }
                ConnectionState::Disconnected => {
                    inner.epoch += 1;
                    if had_timer {
                        inner.callbacks.on_close.clone()
                    } else {
                        None
                    }
                }
                ConnectionState::Closing => None,
            }
        };
        if let Some(callback) = on_close {
            callback(CLOSE_NORMAL, "closed by client");
        }
    }

    /// Serialize and send a message
    ///
    /// Returns `false` and drops the message unless the channel is open; nothing is
    /// queued for later.
    pub fn send<T: Serialize>(&self, message: &T) -> bool {
        match serde_json::to_string(message) {
            Ok(text) => self.send_text(text),
            Err(err) => {
                warn!("Failed to serialize outbound message: {}", err);
                false
            }
        }
    }

    pub fn send_text(&self, text: impl Into<String>) -> bool {
        let mut inner = self.shared.lock();
        let queued = match (&inner.state, &inner.outbound) {
            (ConnectionState::Open, Some(outbound)) => outbound.send(text.into()).is_ok(),
            _ => false,
        };
        if queued {
            inner.stats.messages_sent += 1;
        } else {
            warn!("Dropping outbound message: channel is {:?}", inner.state);
            inner.stats.messages_dropped += 1;
        }
        queued
    }

    // ------------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------------

    pub fn state(&self) -> ConnectionState {
        self.shared.lock().state
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Retries made since the last successful open
    pub fn attempt(&self) -> u32 {
        self.shared.lock().attempt
    }

    /// Delay of the scheduled retry, if one is pending
    pub fn pending_reconnect(&self) -> Option<Duration> {
        self.shared.lock().pending_delay
    }

    /// Whether the retry budget ran out since the last `connect`
    pub fn is_exhausted(&self) -> bool {
        self.shared.lock().exhausted
    }

    pub fn endpoint(&self) -> Option<Url> {
        self.shared
            .lock()
            .target
            .as_ref()
            .map(|target| target.endpoint.clone())
    }

    pub fn stats(&self) -> ChannelStats {
        self.shared.lock().stats.clone()
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.shared.config
    }
}

// ----------------------------------------------------------------------------
// Connection Tasks
// ----------------------------------------------------------------------------

enum LinkEnd {
    Closed { code: u16, reason: String },
    Failed(TransportError),
}

fn begin_connect(shared: &Arc<Shared>, inner: &mut Inner) {
    let Some(endpoint) = inner.target.as_ref().map(|target| target.endpoint.clone()) else {
        return;
    };
    inner.epoch += 1;
    inner.state = ConnectionState::Connecting;
    inner.stats.connect_attempts += 1;
    debug!("Connecting to {} (retry {})", endpoint, inner.attempt);

    let task = run_connection(Arc::downgrade(shared), inner.epoch, endpoint);
    inner.connection_task = Some(shared.runtime.spawn(task));
}

async fn run_connection(weak: Weak<Shared>, epoch: u64, endpoint: Url) {
    let Some((transport, timeout)) = weak
        .upgrade()
        .map(|shared| (Arc::clone(&shared.transport), shared.config.connect_timeout()))
    else {
        return;
    };

    let mut connection = match tokio::time::timeout(timeout, transport.connect(&endpoint)).await {
        Ok(Ok(connection)) => connection,
        Ok(Err(err)) => return link_ended(&weak, epoch, LinkEnd::Failed(err)),
        Err(_) => return link_ended(&weak, epoch, LinkEnd::Failed(TransportError::Timeout(timeout))),
    };

    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
    let Some(on_open) = mark_open(&weak, epoch, outbound_tx) else {
        debug!("Connect to {} superseded, closing", endpoint);
        let _ = connection.close().await;
        return;
    };
    info!("Real-time channel open at {}", endpoint);
    if let Some(callback) = on_open {
        callback();
    }

    let end = loop {
        tokio::select! {
            frame = connection.recv() => match frame {
                Some(Ok(TransportFrame::Text(text))) => deliver(&weak, epoch, &text),
                Some(Ok(TransportFrame::Close { code, reason })) => {
                    break LinkEnd::Closed { code, reason };
                }
                Some(Err(err)) => break LinkEnd::Failed(err),
                None => {
                    break LinkEnd::Closed {
                        code: CLOSE_ABNORMAL,
                        reason: "connection lost".to_string(),
                    };
                }
            },
            outbound = outbound_rx.recv() => match outbound {
                Some(text) => {
                    if let Err(err) = connection.send_text(text).await {
                        break LinkEnd::Failed(err);
                    }
                }
                None => {
                    // Queue dropped by close() or a newer connect()
                    if let Err(err) = connection.close().await {
                        debug!("Error while closing connection: {}", err);
                    }
                    return finish_close(&weak, epoch);
                }
            },
        }
    };
    link_ended(&weak, epoch, end);
}

/// Record a successful open; `None` when the attempt was superseded meanwhile
fn mark_open(
    weak: &Weak<Shared>,
    epoch: u64,
    outbound: mpsc::UnboundedSender<String>,
) -> Option<Option<OpenCallback>> {
    let shared = weak.upgrade()?;
    let mut inner = shared.lock();
    if inner.epoch != epoch {
        return None;
    }
    inner.state = ConnectionState::Open;
    inner.attempt = 0;
    inner.outbound = Some(outbound);
    inner.stats.opens += 1;
    let callback = inner.callbacks.on_open.clone();
    Some(callback)
}

fn deliver(weak: &Weak<Shared>, epoch: u64, text: &str) {
    let Some(shared) = weak.upgrade() else {
        return;
    };
    let on_message = {
        let mut inner = shared.lock();
        if inner.epoch != epoch {
            return;
        }
        inner.stats.messages_received += 1;
        inner.callbacks.on_message.clone()
    };
    match on_message {
        Some(callback) => callback(text),
        None => debug!("No message callback; dropping inbound frame"),
    }
}

/// Report the end of an explicit close
fn finish_close(weak: &Weak<Shared>, epoch: u64) {
    let Some(shared) = weak.upgrade() else {
        return;
    };
    let on_close = {
        let mut inner = shared.lock();
        if inner.epoch != epoch || inner.state != ConnectionState::Closing {
            return;
        }
        inner.state = ConnectionState::Disconnected;
        inner.connection_task = None;
        inner.callbacks.on_close.clone()
    };
    info!("Real-time channel closed");
    if let Some(callback) = on_close {
        callback(CLOSE_NORMAL, "closed by client");
    }
}

/// Handle a connection that failed or closed without being asked to
fn link_ended(weak: &Weak<Shared>, epoch: u64, end: LinkEnd) {
    let Some(shared) = weak.upgrade() else {
        return;
    };
    let (code, reason, error) = match end {
        LinkEnd::Closed { code, reason } => (code, reason, None),
        LinkEnd::Failed(err) => (CLOSE_ABNORMAL, err.to_string(), Some(err)),
    };

    let (callbacks, code, reason) = {
        let mut inner = shared.lock();
        if inner.epoch != epoch {
            return;
        }
        if inner.state == ConnectionState::Closing {
            // The link went down while an explicit close was in flight
            drop(inner);
            return finish_close(weak, epoch);
        }
        inner.state = ConnectionState::Disconnected;
        inner.outbound = None;
        inner.connection_task = None;

        if shared.policy.allows(inner.attempt) {
            let delay = shared.policy.delay_for(inner.attempt);
            inner.attempt += 1;
            inner.pending_delay = Some(delay);
            inner.stats.reconnects_scheduled += 1;
            info!(
                "Connection closed ({} {}); reconnecting in {:?} (retry {}/{})",
                code, reason, delay, inner.attempt, shared.policy.max_attempts
            );
            let weak = Arc::downgrade(&shared);
            inner.reconnect_timer = Some(shared.runtime.spawn(async move {
                tokio::time::sleep(delay).await;
                reconnect_now(&weak, epoch);
            }));
            (inner.callbacks.clone(), code, reason)
        } else {
            inner.exhausted = true;
            warn!(
                "Giving up after {} reconnect attempts; last close {} {}",
                inner.attempt, code, reason
            );
            (
                inner.callbacks.clone(),
                CLOSE_EXHAUSTED,
                "reconnection attempts exhausted".to_string(),
            )
        }
    };

    if let (Some(err), Some(callback)) = (&error, &callbacks.on_error) {
        callback(err);
    }
    if let Some(callback) = &callbacks.on_close {
        callback(code, &reason);
    }
}

fn reconnect_now(weak: &Weak<Shared>, epoch: u64) {
    let Some(shared) = weak.upgrade() else {
        return;
    };
    let mut inner = shared.lock();
    if inner.epoch != epoch || inner.state != ConnectionState::Disconnected {
        return;
    }
    inner.reconnect_timer = None;
    inner.pending_delay = None;
    begin_connect(&shared, &mut inner);
}
