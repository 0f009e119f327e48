//! Birtu Core
//!
//! Transport-agnostic core of the Birtu logistics client: the authenticated session,
//! the shipment and bid data model, the customer shipment lifecycle machine, the driver
//! delivery leg, and the event router that turns pushed server messages into
//! notifications and lifecycle transitions.
//!
//! Nothing in this crate performs I/O other than the optional file-backed session
//! storage; the real-time connection lives in `birtu-realtime`.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod errors;
pub mod events;
pub mod notification;
pub mod router;
pub mod session;
pub mod shipment;
pub mod types;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use errors::{BirtuError, DecodeError, InvalidTransition, PersistenceError, Result};
pub use events::{BidDecisionPayload, EventKind, InboundEvent, NewBidPayload, StatusUpdatePayload};
pub use notification::{LogNotificationSink, MemoryNotificationSink, Notification, NotificationSink};
pub use router::{
    DefaultHandler, DispatchOutcome, EventHandler, EventRouter, RouterStats, SharedRouter,
};
pub use session::{
    FileStore, Identity, KeyValueStore, MemoryStore, SessionStore, UserProfile, UserRole,
};
pub use shipment::{
    AuditEntry, Bid, BidStatus, DeliveryLeg, DriverEvent, DriverPhase, ItemDetails, LegStep,
    Location, PaymentMethod, PaymentReceipt, ReceiverInfo, Schedule, Shipment, ShipmentBook,
    ShipmentEvent, ShipmentLifecycle, ShipmentStatus, TransitionOutcome, UrgencyTier,
    VehicleType,
};
pub use types::{BidId, ShipmentId, SystemTimeSource, TimeSource, Timestamp, UserId};
