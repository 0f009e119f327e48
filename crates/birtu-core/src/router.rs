//! Event Router
//!
//! Decodes inbound frames, raises a notification for each alert, and forwards the
//! payload to the lifecycle machine the event addresses. Local user actions and API
//! results go through the same router so that every mutation of a machine is
//! serialized with remote dispatch.

use std::sync::{Arc, Mutex};

use hashbrown::HashMap;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::errors::{DecodeError, InvalidTransition};
use crate::events::{BidDecisionPayload, EventKind, InboundEvent, NewBidPayload, StatusUpdatePayload};
use crate::notification::{Notification, NotificationSink};
use crate::shipment::{
    AuditEntry, Bid, DriverEvent, PaymentReceipt, ShipmentBook, ShipmentEvent, TransitionOutcome,
};
use crate::types::{ShipmentId, TimeSource};

/// Router shared between the channel callback and local callers
pub type SharedRouter = Arc<Mutex<EventRouter>>;

// ----------------------------------------------------------------------------
// Handler Trait
// ----------------------------------------------------------------------------

/// Handler for tags the router has no built-in behaviour for
pub trait EventHandler: Send {
    fn handle(&mut self, event: &InboundEvent);
}

/// Fallback for tags with no registered handler: log and drop
pub struct DefaultHandler;

impl EventHandler for DefaultHandler {
    fn handle(&mut self, event: &InboundEvent) {
        info!("Unhandled event type: {}", event.kind);
    }
}

// ----------------------------------------------------------------------------
// Outcomes and Stats
// ----------------------------------------------------------------------------

/// What a single dispatch did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The frame or its payload could not be decoded; no machine changed
    Malformed { reason: String },
    /// Unknown tag passed to a registered or the default handler
    Delegated { tag: String },
    /// Alert raised with no lifecycle effect
    Notified { kind: EventKind },
    /// Alert raised and a machine transitioned
    Applied { kind: EventKind, entry: AuditEntry },
    /// Alert raised; the event repeated one already applied
    Ignored { kind: EventKind, reason: String },
    /// Alert raised; the addressed machine refused the transition
    Rejected {
        kind: EventKind,
        error: InvalidTransition,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RouterStats {
    pub dispatched: u64,
    pub decode_errors: u64,
    pub unknown: u64,
    pub notifications: u64,
    pub applied: u64,
    pub ignored: u64,
    pub rejected: u64,
    /// Events addressing a shipment this client does not track
    pub unrouted: u64,
}

// ----------------------------------------------------------------------------
// Router
// ----------------------------------------------------------------------------

pub struct EventRouter {
    book: ShipmentBook,
    sink: Arc<dyn NotificationSink>,
    handlers: HashMap<String, Box<dyn EventHandler>>,
    default_handler: Box<dyn EventHandler>,
    stats: RouterStats,
}

impl EventRouter {
    pub fn new(sink: Arc<dyn NotificationSink>) -> Self {
        Self::with_book(ShipmentBook::new(), sink)
    }

    pub fn with_book(book: ShipmentBook, sink: Arc<dyn NotificationSink>) -> Self {
        Self {
            book,
            sink,
            handlers: HashMap::new(),
            default_handler: Box::new(DefaultHandler),
            stats: RouterStats::default(),
        }
    }

    pub fn into_shared(self) -> SharedRouter {
        Arc::new(Mutex::new(self))
    }

    /// Install a handler for an extra tag, replacing any previous one
    pub fn register_handler(&mut self, tag: impl Into<String>, handler: Box<dyn EventHandler>) {
        let tag = tag.into();
        debug!("Registered handler for event type {}", tag);
        self.handlers.insert(tag, handler);
    }

    pub fn book(&self) -> &ShipmentBook {
        &self.book
    }

    pub fn book_mut(&mut self) -> &mut ShipmentBook {
        &mut self.book
    }

    pub fn stats(&self) -> &RouterStats {
        &self.stats
    }

    fn time_source(&self) -> Arc<dyn TimeSource> {
        self.book.time_source()
    }

    // ------------------------------------------------------------------------
    // Remote Dispatch
    // ------------------------------------------------------------------------

    /// Handle one raw inbound frame
    ///
    /// Never fails: every problem is logged and reported in the outcome.
    pub fn dispatch(&mut self, raw: &str) -> DispatchOutcome {
        self.stats.dispatched += 1;
        let received_at = self.time_source().now();
        match InboundEvent::decode(raw, received_at) {
            Ok(event) => self.route(event),
            Err(err) => self.malformed(err),
        }
    }

    /// Handle an already decoded event
    pub fn dispatch_event(&mut self, event: InboundEvent) -> DispatchOutcome {
        self.stats.dispatched += 1;
        self.route(event)
    }

    fn route(&mut self, event: InboundEvent) -> DispatchOutcome {
        if let EventKind::Unknown(tag) = &event.kind {
            self.stats.unknown += 1;
            let tag = tag.clone();
            self.delegate(&tag, &event);
            return DispatchOutcome::Delegated { tag };
        }

        // A payload that fails its contract is dropped before anyone is alerted
        let kind = event.effective_kind();
        let payload = match RoutedPayload::decode(&event, &kind) {
            Ok(payload) => payload,
            Err(err) => return self.malformed(err),
        };

        self.stats.notifications += 1;
        self.sink.notify(Notification::for_event(&event));

        let result = match payload {
            RoutedPayload::NewBid(payload) => self.on_new_bid(&event, payload),
            RoutedPayload::BidAccepted(payload) => self.on_bid_accepted(payload),
            RoutedPayload::BidRejected(payload) => self.on_bid_rejected(payload),
            RoutedPayload::StatusUpdate(payload) => self.on_status_update(payload),
            RoutedPayload::Passive => {
                if let EventKind::Unknown(_) = kind {
                    if let Some(handler) = self.handlers.get_mut(kind.tag()) {
                        handler.handle(&event);
                    }
                }
                return DispatchOutcome::Notified { kind };
            }
        };

        match result {
            Ok(Some(outcome)) => self.settle(kind, Ok(outcome)),
            Ok(None) => {
                self.stats.unrouted += 1;
                debug!(
                    "No local machine for {} on shipment {:?}",
                    kind,
                    event.shipment_id()
                );
                DispatchOutcome::Notified { kind }
            }
            Err(err) => self.settle(kind, Err(err)),
        }
    }

    fn delegate(&mut self, tag: &str, event: &InboundEvent) {
        match self.handlers.get_mut(tag) {
            Some(handler) => handler.handle(event),
            None => self.default_handler.handle(event),
        }
    }

    fn malformed(&mut self, err: DecodeError) -> DispatchOutcome {
        self.stats.decode_errors += 1;
        warn!("Dropping undecodable message: {}", err);
        DispatchOutcome::Malformed {
            reason: err.to_string(),
        }
    }

    fn settle(
        &mut self,
        kind: EventKind,
        result: Result<TransitionOutcome, InvalidTransition>,
    ) -> DispatchOutcome {
        match self.record(result) {
            Ok(TransitionOutcome::Applied(entry)) => DispatchOutcome::Applied { kind, entry },
            Ok(TransitionOutcome::Ignored { reason }) => DispatchOutcome::Ignored { kind, reason },
            Err(error) => DispatchOutcome::Rejected { kind, error },
        }
    }

    fn record(
        &mut self,
        result: Result<TransitionOutcome, InvalidTransition>,
    ) -> Result<TransitionOutcome, InvalidTransition> {
        match &result {
            Ok(TransitionOutcome::Applied(_)) => self.stats.applied += 1,
            Ok(TransitionOutcome::Ignored { .. }) => self.stats.ignored += 1,
            Err(err) => {
                self.stats.rejected += 1;
                warn!("{}", err);
            }
        }
        result
    }

    fn on_new_bid(&mut self, event: &InboundEvent, payload: NewBidPayload) -> RouteResult {
        let Some(machine) = self.book.shipment_mut(&payload.shipment_id) else {
            return Ok(None);
        };
        let mut bid = Bid::pending(payload.bid_id, payload.amount, event.received_at);
        bid.driver_id = payload.driver_id;
        bid.driver_display_name = payload.driver_name.unwrap_or_default();
        bid.driver_rating = payload.driver_rating.unwrap_or_default();
        bid.vehicle_type = payload.vehicle_type;
        bid.estimated_time_minutes = payload.estimated_time;
        machine.receive_bid(bid).map(Some)
    }

    fn on_bid_accepted(&mut self, payload: BidDecisionPayload) -> RouteResult {
        if let Some(leg) = self.book.leg_mut(&payload.shipment_id) {
            return leg.accept(payload.bid_id).map(Some);
        }
        let leg = self
            .book
            .leg_for_acceptance(&payload.shipment_id, &payload.bid_id);
        Ok(leg.audit_trail().last().cloned().map(TransitionOutcome::Applied))
    }

    fn on_bid_rejected(&mut self, payload: BidDecisionPayload) -> RouteResult {
        match self.book.leg_mut(&payload.shipment_id) {
            Some(leg) => leg.reject(payload.bid_id).map(Some),
            None => Ok(None),
        }
    }

    fn on_status_update(&mut self, payload: StatusUpdatePayload) -> RouteResult {
        match self.book.shipment_mut(&payload.shipment_id) {
            Some(machine) => machine.record_courier_progress(payload.status).map(Some),
            None => Ok(None),
        }
    }

    // ------------------------------------------------------------------------
    // Local Actions
    // ------------------------------------------------------------------------

    /// Apply a customer action to a tracked shipment
    pub fn apply_local(
        &mut self,
        shipment_id: &ShipmentId,
        event: ShipmentEvent,
    ) -> Result<TransitionOutcome, InvalidTransition> {
        let result = match self.book.shipment_mut(shipment_id) {
            Some(machine) => machine.apply(event),
            None => Err(untracked(shipment_id, event.name())),
        };
        self.record(result)
    }

    /// Apply a driver action to a tracked delivery leg
    pub fn apply_driver_local(
        &mut self,
        shipment_id: &ShipmentId,
        event: DriverEvent,
    ) -> Result<TransitionOutcome, InvalidTransition> {
        let result = match self.book.leg_mut(shipment_id) {
            Some(leg) => leg.apply(event),
            None => Err(untracked(shipment_id, event.name())),
        };
        self.record(result)
    }

    /// Feed a successful payment result from the payments API
    pub fn record_payment(
        &mut self,
        shipment_id: &ShipmentId,
        receipt: PaymentReceipt,
    ) -> Result<TransitionOutcome, InvalidTransition> {
        self.apply_local(shipment_id, ShipmentEvent::PaymentCompleted(receipt))
    }
}

fn untracked(shipment_id: &ShipmentId, event: String) -> InvalidTransition {
    InvalidTransition::new(
        "untracked",
        event,
        format!("shipment {} is not tracked", shipment_id),
    )
}

/// Typed payload of an event the router acts on
enum RoutedPayload {
    NewBid(NewBidPayload),
    BidAccepted(BidDecisionPayload),
    BidRejected(BidDecisionPayload),
    StatusUpdate(StatusUpdatePayload),
    /// Alert only; no payload contract
    Passive,
}

impl RoutedPayload {
    fn decode(event: &InboundEvent, kind: &EventKind) -> Result<Self, DecodeError> {
        Ok(match kind {
            EventKind::NewBid => RoutedPayload::NewBid(event.payload_as(kind)?),
            EventKind::BidAccepted => RoutedPayload::BidAccepted(event.payload_as(kind)?),
            EventKind::BidRejected => RoutedPayload::BidRejected(event.payload_as(kind)?),
            EventKind::StatusUpdate => RoutedPayload::StatusUpdate(event.payload_as(kind)?),
            EventKind::Notification | EventKind::Unknown(_) => RoutedPayload::Passive,
        })
    }
}

type RouteResult = Result<Option<TransitionOutcome>, InvalidTransition>;

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
