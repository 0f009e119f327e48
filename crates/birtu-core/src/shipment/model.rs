//! Shipment and bid data model

use std::collections::BTreeSet;

use core::fmt;
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::types::{BidId, ShipmentId, Timestamp, UserId};

// ----------------------------------------------------------------------------
// Shipment Details
// ----------------------------------------------------------------------------

/// Vehicle classes a shipment can require and a driver can bid with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleType {
    Motorbike,
    Pickup,
    Truck,
}

/// How soon the shipment has to move
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum UrgencyTier {
    Low,
    #[default]
    Medium,
    High,
}

/// A geocoded place
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    /// `[longitude, latitude]`
    pub coordinates: [f64; 2],
    pub address: String,
}

impl Location {
    pub fn new(longitude: f64, latitude: f64, address: impl Into<String>) -> Self {
        Self {
            coordinates: [longitude, latitude],
            address: address.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiverInfo {
    pub name: String,
    pub phone: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    pub datetime: Timestamp,
    #[serde(default)]
    pub urgency: UrgencyTier,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemDetails {
    pub description: String,
    pub weight_kg: f64,
}

// ----------------------------------------------------------------------------
// Bids
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BidStatus {
    #[default]
    Pending,
    Accepted,
    Rejected,
}

/// A driver's offer against a shipment
///
/// Bids are never removed from their shipment; only their status changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bid {
    pub id: BidId,
    pub driver_id: Option<UserId>,
    pub driver_display_name: String,
    pub driver_rating: f32,
    pub vehicle_type: Option<VehicleType>,
    /// Offer in ETB
    pub amount: f64,
    pub estimated_time_minutes: Option<u32>,
    pub submitted_at: Timestamp,
    pub status: BidStatus,
}

impl Bid {
    /// Create a pending bid with only the required fields set
    pub fn pending(id: impl Into<BidId>, amount: f64, submitted_at: Timestamp) -> Self {
        Self {
            id: id.into(),
            driver_id: None,
            driver_display_name: String::new(),
            driver_rating: 0.0,
            vehicle_type: None,
            amount,
            estimated_time_minutes: None,
            submitted_at,
            status: BidStatus::Pending,
        }
    }

    pub fn with_driver(mut self, driver_id: impl Into<UserId>, display_name: impl Into<String>) -> Self {
        self.driver_id = Some(driver_id.into());
        self.driver_display_name = display_name.into();
        self
    }

    pub fn with_vehicle(mut self, vehicle_type: VehicleType) -> Self {
        self.vehicle_type = Some(vehicle_type);
        self
    }
}

// ----------------------------------------------------------------------------
// Payment
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Telebirr,
    CbeBirr,
}

/// Successful payment result reported by the payments API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentReceipt {
    pub transaction_id: String,
    pub method: PaymentMethod,
    pub amount: f64,
}

// ----------------------------------------------------------------------------
// Status
// ----------------------------------------------------------------------------

/// Customer-side shipment status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ShipmentStatus {
    #[default]
    Draft,
    Published,
    Bidding,
    BidAccepted,
    Paid,
    InTransit,
    Delivered,
    Cancelled,
}

impl ShipmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShipmentStatus::Draft => "draft",
            ShipmentStatus::Published => "published",
            ShipmentStatus::Bidding => "bidding",
            ShipmentStatus::BidAccepted => "bid_accepted",
            ShipmentStatus::Paid => "paid",
            ShipmentStatus::InTransit => "in_transit",
            ShipmentStatus::Delivered => "delivered",
            ShipmentStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ShipmentStatus::Delivered | ShipmentStatus::Cancelled)
    }
}

impl fmt::Display for ShipmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One step of the driver's delivery leg, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LegStep {
    Accepted,
    HeadingToPickup,
    ArrivedAtPickup,
    ItemCollected,
    InTransit,
    Delivered,
}

impl LegStep {
    pub const ALL: [LegStep; 6] = [
        LegStep::Accepted,
        LegStep::HeadingToPickup,
        LegStep::ArrivedAtPickup,
        LegStep::ItemCollected,
        LegStep::InTransit,
        LegStep::Delivered,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LegStep::Accepted => "accepted",
            LegStep::HeadingToPickup => "heading_to_pickup",
            LegStep::ArrivedAtPickup => "arrived_at_pickup",
            LegStep::ItemCollected => "item_collected",
            LegStep::InTransit => "in_transit",
            LegStep::Delivered => "delivered",
        }
    }

    /// The only step that may follow this one
    pub fn next(&self) -> Option<LegStep> {
        match self {
            LegStep::Accepted => Some(LegStep::HeadingToPickup),
            LegStep::HeadingToPickup => Some(LegStep::ArrivedAtPickup),
            LegStep::ArrivedAtPickup => Some(LegStep::ItemCollected),
            LegStep::ItemCollected => Some(LegStep::InTransit),
            LegStep::InTransit => Some(LegStep::Delivered),
            LegStep::Delivered => None,
        }
    }

    /// Text shown to the customer when the driver reports this step
    pub fn customer_message(&self) -> &'static str {
        match self {
            LegStep::Accepted => "Your shipment has been accepted",
            LegStep::HeadingToPickup => "Driver is heading to pickup location",
            LegStep::ArrivedAtPickup => "Driver has arrived at pickup location",
            LegStep::ItemCollected => "Item has been collected",
            LegStep::InTransit => "Your item is on the way",
            LegStep::Delivered => "Your item has been delivered!",
        }
    }
}

impl fmt::Display for LegStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for LegStep {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LegStep::ALL
            .iter()
            .copied()
            .find(|step| step.as_str() == s)
            .ok_or_else(|| format!("unknown delivery step: {}", s))
    }
}

// ----------------------------------------------------------------------------
// Shipment Aggregate
// ----------------------------------------------------------------------------

/// A customer's shipment and every bid placed against it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shipment {
    pub id: ShipmentId,
    pub pickup: Option<Location>,
    pub dropoff: Option<Location>,
    pub receiver: Option<ReceiverInfo>,
    pub vehicle_requirements: BTreeSet<VehicleType>,
    pub schedule: Option<Schedule>,
    pub item: Option<ItemDetails>,
    pub photos: Vec<String>,
    pub bids: HashMap<BidId, Bid>,
    pub status: ShipmentStatus,
    pub accepted_bid: Option<BidId>,
    pub payment: Option<PaymentReceipt>,
    /// Latest delivery step the driver has reported
    pub courier_progress: Option<LegStep>,
    pub cancellation_reason: Option<String>,
}

impl Shipment {
    /// Create an empty draft
    pub fn draft(id: impl Into<ShipmentId>) -> Self {
        Self {
            id: id.into(),
            pickup: None,
            dropoff: None,
            receiver: None,
            vehicle_requirements: BTreeSet::new(),
            schedule: None,
            item: None,
            photos: Vec::new(),
            bids: HashMap::new(),
            status: ShipmentStatus::Draft,
            accepted_bid: None,
            payment: None,
            courier_progress: None,
            cancellation_reason: None,
        }
    }

    /// Bids ordered by submission time, for display
    pub fn bids_in_order(&self) -> Vec<&Bid> {
        let mut bids: Vec<&Bid> = self.bids.values().collect();
        bids.sort_by(|a, b| {
            a.submitted_at
                .cmp(&b.submitted_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        bids
    }

    pub fn accepted(&self) -> Option<&Bid> {
        self.accepted_bid.as_ref().and_then(|id| self.bids.get(id))
    }
}
