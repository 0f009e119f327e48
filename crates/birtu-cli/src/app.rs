//! Birtu CLI application: the stored session and the listen loop

use std::sync::{Arc, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, info, warn};

use birtu_core::{
    EventRouter, FileStore, Identity, Notification, NotificationSink, RouterStats, SessionStore,
    SharedRouter,
};
use birtu_realtime::{
    realtime_endpoint, ChannelStats, ConnectionState, ReconnectingChannel, Transport,
    WebSocketTransport,
};

use crate::config::{AppConfig, NotificationFormat};
use crate::error::{CliError, Result};

/// How long `listen` waits for the graceful close after Ctrl+C
const CLOSE_GRACE: Duration = Duration::from_secs(2);

// ----------------------------------------------------------------------------
// Terminal Sink
// ----------------------------------------------------------------------------

/// Prints each notification on stdout
#[derive(Debug, Clone, Copy)]
pub struct TerminalNotificationSink {
    format: NotificationFormat,
}

impl TerminalNotificationSink {
    pub fn new(format: NotificationFormat) -> Self {
        Self { format }
    }

    /// The line printed for a notification
    pub fn render(&self, notification: &Notification) -> String {
        match self.format {
            NotificationFormat::Text => format!("{}: {}", notification.title, notification.body),
            NotificationFormat::Json => serde_json::to_string(notification)
                .unwrap_or_else(|_| format!("{}: {}", notification.title, notification.body)),
        }
    }
}

impl NotificationSink for TerminalNotificationSink {
    fn notify(&self, notification: Notification) {
        println!("{}", self.render(&notification));
    }
}

// ----------------------------------------------------------------------------
// Listener
// ----------------------------------------------------------------------------

/// A channel whose inbound messages feed an event router
pub struct Listener {
    pub channel: ReconnectingChannel,
    pub router: SharedRouter,
    closed: Arc<Notify>,
}

impl Listener {
    /// Wire `channel` callbacks into `router`
    pub fn new(channel: ReconnectingChannel, router: SharedRouter) -> Self {
        let dispatcher = Arc::clone(&router);
        channel.on_message(move |text| {
            let outcome = dispatcher
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .dispatch(text);
            debug!("Dispatched inbound message: {:?}", outcome);
        });
        channel.on_open(|| info!("Listening for shipment updates"));
        let closed = Arc::new(Notify::new());
        let signal = Arc::clone(&closed);
        channel.on_close(move |code, reason| {
            info!("Channel closed ({} {})", code, reason);
            signal.notify_one();
        });
        channel.on_error(|err| warn!("Channel error: {}", err));

        Self {
            channel,
            router,
            closed,
        }
    }

    pub fn router_stats(&self) -> RouterStats {
        self.router
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .stats()
            .clone()
    }

    pub fn channel_stats(&self) -> ChannelStats {
        self.channel.stats()
    }

    /// Close the channel and wait up to `grace` for `on_close` to report the link down
    pub async fn shutdown(&self, grace: Duration) {
        self.channel.close();
        let deadline = tokio::time::Instant::now() + grace;
        // A permit left by an earlier unexpected close wakes this once; the state decides
        while self.channel.state() != ConnectionState::Disconnected {
            if tokio::time::timeout_at(deadline, self.closed.notified())
                .await
                .is_err()
            {
                warn!("Channel did not close within {:?}", grace);
                break;
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Application
// ----------------------------------------------------------------------------

pub struct BirtuApp {
    config: AppConfig,
    session: SessionStore<FileStore>,
}

impl BirtuApp {
    /// Open the session file and restore any stored identity
    pub fn new(config: AppConfig) -> Result<Self> {
        config.validate()?;
        let path = config.session_path();
        debug!("Using session file {}", path.display());

        let mut session = SessionStore::new(FileStore::new(path));
        if session.load().is_none() {
            debug!("No stored session");
        }
        Ok(Self { config, session })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.session.current()
    }

    pub fn require_identity(&self) -> Result<&Identity> {
        self.identity().ok_or(CliError::NotLoggedIn)
    }

    pub fn login(&mut self, identity: Identity) -> Result<()> {
        self.session.save(identity)?;
        Ok(())
    }

    pub fn logout(&mut self) -> Result<()> {
        self.session.clear()?;
        Ok(())
    }

    /// Real-time address for the stored identity
    pub fn endpoint(&self) -> Result<String> {
        let identity = self.require_identity()?;
        let endpoint = realtime_endpoint(&self.config.channel.base_url, identity.user_id())?;
        Ok(endpoint.to_string())
    }

    /// Build a listener over `transport` that prints to `sink`
    pub fn listener(
        &self,
        transport: Arc<dyn Transport>,
        sink: Arc<dyn NotificationSink>,
    ) -> Result<Listener> {
        let channel = ReconnectingChannel::new(self.config.channel.clone(), transport)?;
        let router = EventRouter::new(sink).into_shared();
        Ok(Listener::new(channel, router))
    }

    /// Connect for the stored identity and print notifications until Ctrl+C
    pub async fn listen(&self) -> Result<()> {
        let identity = self.require_identity()?.clone();
        let sink = Arc::new(TerminalNotificationSink::new(
            self.config.cli.notification_format,
        ));
        let listener = self.listener(Arc::new(WebSocketTransport::new()), sink)?;

        listener.channel.connect(&identity)?;
        info!("Press Ctrl+C to stop");
        tokio::signal::ctrl_c().await?;

        listener.shutdown(CLOSE_GRACE).await;
        let channel = listener.channel_stats();
        let router = listener.router_stats();
        info!(
            "Received {} messages ({} notifications, {} applied, {} rejected, {} malformed) over {} connections",
            channel.messages_received,
            router.notifications,
            router.applied,
            router.rejected,
            router.decode_errors,
            channel.opens
        );
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
