//! User-visible alerts
//!
//! The router hands display-ready notifications to a [`NotificationSink`]. Delivery is
//! fire-and-forget: the sink never reports back and must not block.

use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde_json::Value;
use tracing::info;

use crate::events::{EventKind, InboundEvent};
use crate::shipment::LegStep;

// ----------------------------------------------------------------------------
// Notification
// ----------------------------------------------------------------------------

/// Title, body and the raw event data for one alert
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub data: Value,
}

impl Notification {
    /// Build the alert for an event, filling in default text where the payload has none
    pub fn for_event(event: &InboundEvent) -> Self {
        let kind = event.effective_kind();
        let (default_title, default_body) = default_text(&kind, event);
        Self {
            title: event.title().unwrap_or(default_title).to_string(),
            body: event
                .message()
                .map(str::to_string)
                .unwrap_or(default_body),
            data: event.payload.clone(),
        }
    }
}

fn default_text(kind: &EventKind, event: &InboundEvent) -> (&'static str, String) {
    match kind {
        EventKind::NewBid => (
            "New Bid Received!",
            "A new bid has been placed on your shipment.".to_string(),
        ),
        EventKind::BidAccepted => (
            "Your Bid Accepted!",
            "Your bid for a shipment has been accepted.".to_string(),
        ),
        EventKind::BidRejected => (
            "Bid Not Selected",
            "Your bid was not selected for this shipment".to_string(),
        ),
        EventKind::StatusUpdate => {
            let body = event
                .payload
                .get("status")
                .and_then(Value::as_str)
                .and_then(|s| s.parse::<LegStep>().ok())
                .map(|step| step.customer_message())
                .unwrap_or("Shipment status updated");
            ("Shipment Update", body.to_string())
        }
        EventKind::Notification | EventKind::Unknown(_) => {
            ("New Notification", "You have a new update.".to_string())
        }
    }
}

// ----------------------------------------------------------------------------
// Sink Trait
// ----------------------------------------------------------------------------

/// Surface that shows alerts to the user
pub trait NotificationSink: Send + Sync {
    /// Schedule an immediate alert
    fn notify(&self, notification: Notification);
}

/// Sink that writes alerts to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotificationSink;

impl NotificationSink for LogNotificationSink {
    fn notify(&self, notification: Notification) {
        info!("{}: {}", notification.title, notification.body);
    }
}

/// Sink that keeps every alert in memory
///
/// Clones share the same buffer.
#[derive(Debug, Default, Clone)]
pub struct MemoryNotificationSink {
    received: Arc<Mutex<Vec<Notification>>>,
}

impl MemoryNotificationSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        match self.received.lock() {
            Ok(received) => received.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.notifications().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl NotificationSink for MemoryNotificationSink {
    fn notify(&self, notification: Notification) {
        match self.received.lock() {
            Ok(mut received) => received.push(notification),
            Err(poisoned) => poisoned.into_inner().push(notification),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Timestamp;

    fn event(raw: &str) -> InboundEvent {
        InboundEvent::decode(raw, Timestamp::new(0)).unwrap()
    }

    #[test]
    fn test_payload_text_wins() {
        let n = Notification::for_event(&event(
            r#"{"type":"new_bid","data":{"title":"Bid!","message":"450 ETB"}}"#,
        ));
        assert_eq!(n.title, "Bid!");
        assert_eq!(n.body, "450 ETB");
    }

    #[test]
    fn test_default_text_per_kind() {
        let n = Notification::for_event(&event(r#"{"type":"notification","data":{}}"#));
        assert_eq!(n.title, "New Notification");
        assert_eq!(n.body, "You have a new update.");

        let n = Notification::for_event(&event(r#"{"type":"bid_accepted","data":{}}"#));
        assert_eq!(n.title, "Your Bid Accepted!");
        assert_eq!(n.body, "Your bid for a shipment has been accepted.");
    }

    #[test]
    fn test_status_update_text() {
        let n = Notification::for_event(&event(
            r#"{"type":"status_update","data":{"status":"in_transit"}}"#,
        ));
        assert_eq!(n.title, "Shipment Update");
        assert_eq!(n.body, "Your item is on the way");
    }

    #[test]
    fn test_memory_sink_shares_buffer() {
        let sink = MemoryNotificationSink::new();
        let clone = sink.clone();
        clone.notify(Notification::for_event(&event(r#"{"type":"notification","data":{}}"#)));
        assert_eq!(sink.len(), 1);
    }
}
