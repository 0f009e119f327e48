//! Shipments, bids and the two lifecycle machines
//!
//! - [`ShipmentLifecycle`]: the customer's view of a shipment from draft to delivery
//! - [`DeliveryLeg`]: the driver's view of one bid and the delivery that follows it
//! - [`ShipmentBook`]: the registry that owns both kinds of machine

pub mod book;
pub mod delivery;
pub mod lifecycle;
pub mod model;

pub use book::ShipmentBook;
pub use delivery::{DeliveryLeg, DriverEvent, DriverPhase};
pub use lifecycle::{AuditEntry, ShipmentEvent, ShipmentLifecycle, TransitionOutcome};
pub use model::{
    Bid, BidStatus, ItemDetails, LegStep, Location, PaymentMethod, PaymentReceipt, ReceiverInfo,
    Schedule, Shipment, ShipmentStatus, UrgencyTier, VehicleType,
};
