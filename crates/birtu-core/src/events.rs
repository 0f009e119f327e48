//! Inbound server events
//!
//! Every pushed message is a JSON envelope `{"type": <tag>, "data": {...}}` with an
//! optional server `timestamp`. The backend also wraps typed alerts as
//! `type = "notification"` and names the concrete kind in `data.type`.

use core::fmt;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::errors::DecodeError;
use crate::shipment::{LegStep, VehicleType};
use crate::types::{BidId, ShipmentId, Timestamp, UserId};

// ----------------------------------------------------------------------------
// Event Kind
// ----------------------------------------------------------------------------

/// Classification of an inbound message by its `type` tag
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    Notification,
    NewBid,
    BidAccepted,
    BidRejected,
    StatusUpdate,
    /// Any tag this client does not know
    Unknown(String),
}

impl EventKind {
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "notification" => EventKind::Notification,
            "new_bid" => EventKind::NewBid,
            "bid_accepted" => EventKind::BidAccepted,
            "bid_rejected" => EventKind::BidRejected,
            "status_update" => EventKind::StatusUpdate,
            other => EventKind::Unknown(other.to_string()),
        }
    }

    pub fn tag(&self) -> &str {
        match self {
            EventKind::Notification => "notification",
            EventKind::NewBid => "new_bid",
            EventKind::BidAccepted => "bid_accepted",
            EventKind::BidRejected => "bid_rejected",
            EventKind::StatusUpdate => "status_update",
            EventKind::Unknown(tag) => tag,
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, EventKind::Unknown(_))
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

// ----------------------------------------------------------------------------
// Inbound Event
// ----------------------------------------------------------------------------

/// A decoded inbound message; consumed once by the router
#[derive(Debug, Clone, PartialEq)]
pub struct InboundEvent {
    pub kind: EventKind,
    /// The envelope's `data` object, untouched
    pub payload: Value,
    pub received_at: Timestamp,
    /// Server-side send time, when the envelope carries one
    pub sent_at: Option<String>,
}

impl InboundEvent {
    /// Decode a raw text frame
    ///
    /// Known tags require a `data` object. Unknown tags tolerate a missing one so
    /// they still reach the fallback handler.
    pub fn decode(raw: &str, received_at: Timestamp) -> Result<Self, DecodeError> {
        let value: Value = serde_json::from_str(raw).map_err(DecodeError::Malformed)?;
        let Value::Object(mut envelope) = value else {
            return Err(DecodeError::NotAnObject);
        };

        let kind = match envelope.get("type") {
            Some(Value::String(tag)) => EventKind::from_tag(tag),
            Some(_) => return Err(DecodeError::WrongType { field: "type" }),
            None => return Err(DecodeError::MissingField { field: "type" }),
        };

        let payload = match envelope.remove("data") {
            Some(data @ Value::Object(_)) => data,
            Some(_) if !kind.is_unknown() => return Err(DecodeError::WrongType { field: "data" }),
            None if !kind.is_unknown() => return Err(DecodeError::MissingField { field: "data" }),
            Some(other) => other,
            None => Value::Null,
        };

        let sent_at = match envelope.remove("timestamp") {
            Some(Value::String(ts)) => Some(ts),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        };

        Ok(Self {
            kind,
            payload,
            received_at,
            sent_at,
        })
    }

    /// Kind that decides the lifecycle effect
    ///
    /// For a `notification` envelope this is the kind named in `data.type`, if any.
    pub fn effective_kind(&self) -> EventKind {
        match (&self.kind, self.str_field("type")) {
            (EventKind::Notification, Some(inner)) if inner != "notification" => {
                EventKind::from_tag(inner)
            }
            (kind, _) => kind.clone(),
        }
    }

    pub fn title(&self) -> Option<&str> {
        self.str_field("title")
    }

    pub fn message(&self) -> Option<&str> {
        self.str_field("message")
    }

    /// Shipment the event addresses, if it names one
    pub fn shipment_id(&self) -> Option<ShipmentId> {
        self.str_field("shipment_id")
            .or_else(|| self.str_field("shipmentId"))
            .map(ShipmentId::new)
    }

    /// Deserialize the payload into a typed shape for `kind`
    pub fn payload_as<T: DeserializeOwned>(&self, kind: &EventKind) -> Result<T, DecodeError> {
        T::deserialize(&self.payload).map_err(|source| DecodeError::InvalidPayload {
            kind: kind.tag().to_string(),
            source,
        })
    }

    fn str_field(&self, field: &str) -> Option<&str> {
        self.payload.get(field).and_then(Value::as_str)
    }
}

// ----------------------------------------------------------------------------
// Typed Payloads
// ----------------------------------------------------------------------------

/// Payload of `new_bid`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NewBidPayload {
    #[serde(alias = "shipmentId")]
    pub shipment_id: ShipmentId,
    #[serde(alias = "bidId")]
    pub bid_id: BidId,
    #[serde(default)]
    pub amount: f64,
    #[serde(default, alias = "driverId")]
    pub driver_id: Option<UserId>,
    #[serde(default, alias = "driverName")]
    pub driver_name: Option<String>,
    #[serde(default, alias = "driverRating")]
    pub driver_rating: Option<f32>,
    #[serde(default, alias = "vehicleType")]
    pub vehicle_type: Option<VehicleType>,
    #[serde(default, alias = "estimatedTime")]
    pub estimated_time: Option<u32>,
}

/// Payload of `bid_accepted` and `bid_rejected`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BidDecisionPayload {
    #[serde(alias = "shipmentId")]
    pub shipment_id: ShipmentId,
    #[serde(alias = "bidId")]
    pub bid_id: BidId,
}

/// Payload of `status_update`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StatusUpdatePayload {
    #[serde(alias = "shipmentId")]
    pub shipment_id: ShipmentId,
    pub status: LegStep,
    #[serde(default, alias = "driverName")]
    pub driver_name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(raw: &str) -> Result<InboundEvent, DecodeError> {
        InboundEvent::decode(raw, Timestamp::new(42))
    }

    #[test]
    fn test_decode_known_tag() {
        let event = decode(r#"{"type":"new_bid","data":{"shipment_id":"s1","bid_id":"b1"}}"#).unwrap();
        assert_eq!(event.kind, EventKind::NewBid);
        assert_eq!(event.received_at, Timestamp::new(42));
        assert_eq!(event.shipment_id(), Some(ShipmentId::new("s1")));
        assert_eq!(event.sent_at, None);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(decode("not json"), Err(DecodeError::Malformed(_))));
        assert!(matches!(decode("[1,2]"), Err(DecodeError::NotAnObject)));
        assert!(matches!(
            decode(r#"{"data":{}}"#),
            Err(DecodeError::MissingField { field: "type" })
        ));
        assert!(matches!(
            decode(r#"{"type":7,"data":{}}"#),
            Err(DecodeError::WrongType { field: "type" })
        ));
        assert!(matches!(
            decode(r#"{"type":"new_bid"}"#),
            Err(DecodeError::MissingField { field: "data" })
        ));
        assert!(matches!(
            decode(r#"{"type":"bid_accepted","data":"b1"}"#),
            Err(DecodeError::WrongType { field: "data" })
        ));
    }

    #[test]
    fn test_unknown_tag_without_data() {
        let event = decode(r#"{"type":"ping"}"#).unwrap();
        assert_eq!(event.kind, EventKind::Unknown("ping".to_string()));
        assert_eq!(event.payload, Value::Null);
    }

    #[test]
    fn test_wrapped_notification_kind() {
        let event = decode(
            r#"{"type":"notification","timestamp":"2024-05-01T10:00:00","data":{"type":"bid_rejected","shipment_id":"s1","bid_id":"b1","title":"Bid Not Selected"}}"#,
        )
        .unwrap();
        assert_eq!(event.kind, EventKind::Notification);
        assert_eq!(event.effective_kind(), EventKind::BidRejected);
        assert_eq!(event.title(), Some("Bid Not Selected"));
        assert_eq!(event.sent_at.as_deref(), Some("2024-05-01T10:00:00"));
    }

    #[test]
    fn test_payload_accepts_camel_case() {
        let event = decode(
            r#"{"type":"new_bid","data":{"shipmentId":"s1","bidId":"b2","amount":350.5,"vehicleType":"pickup"}}"#,
        )
        .unwrap();
        let payload: NewBidPayload = event.payload_as(&EventKind::NewBid).unwrap();
        assert_eq!(payload.bid_id, BidId::new("b2"));
        assert_eq!(payload.vehicle_type, Some(VehicleType::Pickup));
        assert_eq!(payload.amount, 350.5);
    }

    #[test]
    fn test_payload_missing_ids_is_invalid() {
        let event = decode(r#"{"type":"bid_accepted","data":{"title":"hi"}}"#).unwrap();
        let result: Result<BidDecisionPayload, _> = event.payload_as(&EventKind::BidAccepted);
        assert!(matches!(result, Err(DecodeError::InvalidPayload { .. })));
    }
}
