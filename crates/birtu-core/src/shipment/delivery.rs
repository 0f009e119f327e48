//! Driver Delivery Leg
//!
//! A driver's view of one shipment: the bid they placed, the server's decision on it,
//! and then the strictly ordered delivery steps from acceptance to hand-off.

use std::collections::VecDeque;
use std::sync::Arc;

use core::fmt;
use tracing::{debug, info};

use super::lifecycle::{AuditEntry, TransitionOutcome, MAX_AUDIT_ENTRIES};
use super::model::{Bid, BidStatus, LegStep};
use crate::errors::InvalidTransition;
use crate::types::{BidId, ShipmentId, SystemTimeSource, TimeSource};

// ----------------------------------------------------------------------------
// Phase and Events
// ----------------------------------------------------------------------------

/// Where the driver's leg currently stands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriverPhase {
    /// Bid submitted, customer has not decided
    AwaitingDecision,
    /// Customer picked another bid
    Rejected,
    /// Bid accepted; delivery in progress at the given step
    Delivery(LegStep),
}

impl DriverPhase {
    pub fn name(&self) -> &'static str {
        match self {
            DriverPhase::AwaitingDecision => "awaiting_decision",
            DriverPhase::Rejected => "rejected",
            DriverPhase::Delivery(step) => step.as_str(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DriverPhase::Rejected | DriverPhase::Delivery(LegStep::Delivered)
        )
    }
}

impl fmt::Display for DriverPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Everything that can happen to a driver's leg
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverEvent {
    BidAccepted { bid_id: BidId },
    BidRejected { bid_id: BidId },
    Advance(LegStep),
}

impl DriverEvent {
    pub fn name(&self) -> String {
        match self {
            DriverEvent::BidAccepted { bid_id } => format!("BidAccepted({})", bid_id),
            DriverEvent::BidRejected { bid_id } => format!("BidRejected({})", bid_id),
            DriverEvent::Advance(step) => format!("Advance({})", step),
        }
    }
}

// ----------------------------------------------------------------------------
// Delivery Leg
// ----------------------------------------------------------------------------

pub struct DeliveryLeg {
    shipment_id: ShipmentId,
    bid: Bid,
    phase: DriverPhase,
    audit_trail: VecDeque<AuditEntry>,
    time_source: Arc<dyn TimeSource>,
}

impl fmt::Debug for DeliveryLeg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeliveryLeg")
            .field("shipment_id", &self.shipment_id)
            .field("bid", &self.bid.id)
            .field("phase", &self.phase)
            .finish()
    }
}

impl DeliveryLeg {
    /// Track a bid the driver just submitted
    pub fn submitted(shipment_id: impl Into<ShipmentId>, bid: Bid) -> Self {
        Self::submitted_with_time_source(shipment_id, bid, Arc::new(SystemTimeSource))
    }

    pub fn submitted_with_time_source(
        shipment_id: impl Into<ShipmentId>,
        mut bid: Bid,
        time_source: Arc<dyn TimeSource>,
    ) -> Self {
        bid.status = BidStatus::Pending;
        Self {
            shipment_id: shipment_id.into(),
            bid,
            phase: DriverPhase::AwaitingDecision,
            audit_trail: VecDeque::new(),
            time_source,
        }
    }

    /// Start a leg from a server acceptance for a bid this client never tracked
    ///
    /// Happens when the driver placed the bid from another device or before a restart.
    pub fn from_acceptance(
        shipment_id: impl Into<ShipmentId>,
        bid_id: BidId,
        time_source: Arc<dyn TimeSource>,
    ) -> Self {
        let accepted_at = time_source.now();
        let mut bid = Bid::pending(bid_id.clone(), 0.0, accepted_at);
        bid.status = BidStatus::Accepted;
        let mut leg = Self {
            shipment_id: shipment_id.into(),
            bid,
            phase: DriverPhase::Delivery(LegStep::Accepted),
            audit_trail: VecDeque::new(),
            time_source,
        };
        info!("Delivery leg {} started from acceptance of {}", leg.shipment_id, bid_id);
        let phase = leg.phase;
        leg.record(
            DriverPhase::AwaitingDecision,
            phase,
            DriverEvent::BidAccepted { bid_id }.name(),
        );
        leg
    }

    pub fn shipment_id(&self) -> &ShipmentId {
        &self.shipment_id
    }

    pub fn bid(&self) -> &Bid {
        &self.bid
    }

    pub fn phase(&self) -> DriverPhase {
        self.phase
    }

    /// Current delivery step, once the bid is accepted
    pub fn step(&self) -> Option<LegStep> {
        match self.phase {
            DriverPhase::Delivery(step) => Some(step),
            _ => None,
        }
    }

    pub fn audit_trail(&self) -> impl Iterator<Item = &AuditEntry> {
        self.audit_trail.iter()
    }

    /// Validate and apply an event; on `Err` nothing changes
    pub fn apply(&mut self, event: DriverEvent) -> Result<TransitionOutcome, InvalidTransition> {
        let from = self.phase;
        let event_name = event.name();
        let reject = |reason: String| {
            debug!(
                "Rejected {} for leg {} in {}: {}",
                event_name, self.shipment_id, from, reason
            );
            InvalidTransition::new(from.name(), event_name.clone(), reason)
        };

        let (next, adopt_id) = match (&event, from) {
            (DriverEvent::BidAccepted { bid_id }, DriverPhase::AwaitingDecision) => {
                if *bid_id == self.bid.id {
                    (DriverPhase::Delivery(LegStep::Accepted), None)
                } else if self.bid.id.is_provisional() {
                    (DriverPhase::Delivery(LegStep::Accepted), Some(bid_id.clone()))
                } else {
                    return Err(reject(format!("acceptance is for bid {}", bid_id)));
                }
            }
            (DriverEvent::BidAccepted { bid_id }, DriverPhase::Delivery(_)) => {
                if *bid_id == self.bid.id {
                    return Ok(self.ignored("acceptance already recorded"));
                }
                return Err(reject(format!("leg is for bid {}", self.bid.id)));
            }
            (DriverEvent::BidAccepted { .. }, DriverPhase::Rejected) => {
                return Err(reject("bid was already rejected".to_string()));
            }

            (DriverEvent::BidRejected { bid_id }, DriverPhase::AwaitingDecision) => {
                if *bid_id == self.bid.id || self.bid.id.is_provisional() {
                    (DriverPhase::Rejected, Some(bid_id.clone()))
                } else {
                    return Err(reject(format!("rejection is for bid {}", bid_id)));
                }
            }
            (DriverEvent::BidRejected { .. }, DriverPhase::Rejected) => {
                return Ok(self.ignored("rejection already recorded"));
            }
            (DriverEvent::BidRejected { .. }, DriverPhase::Delivery(_)) => {
                return Err(reject("bid was already accepted".to_string()));
            }

            (DriverEvent::Advance(step), DriverPhase::Delivery(current)) => match current.next() {
                Some(expected) if expected == *step => (DriverPhase::Delivery(*step), None),
                Some(expected) => {
                    return Err(reject(format!("{} must come next, not {}", expected, step)))
                }
                None => return Err(reject("delivery is complete".to_string())),
            },
            (DriverEvent::Advance(_), _) => {
                return Err(reject("bid has not been accepted".to_string()));
            }
        };

        if let Some(id) = adopt_id {
            if id != self.bid.id {
                debug!("Bid {} confirmed as {}", self.bid.id, id);
                self.bid.id = id;
            }
        }
        self.bid.status = match next {
            DriverPhase::AwaitingDecision => BidStatus::Pending,
            DriverPhase::Rejected => BidStatus::Rejected,
            DriverPhase::Delivery(_) => BidStatus::Accepted,
        };
        self.phase = next;
        info!("Delivery leg {} {} -> {}", self.shipment_id, from, next);

        Ok(TransitionOutcome::Applied(self.record(from, next, event_name)))
    }

    fn record(&mut self, from: DriverPhase, to: DriverPhase, event: String) -> AuditEntry {
        let entry = AuditEntry {
            timestamp: self.time_source.now(),
            shipment_id: self.shipment_id.clone(),
            from_state: from.name().to_string(),
            to_state: to.name().to_string(),
            event,
        };
        self.audit_trail.push_back(entry.clone());
        if self.audit_trail.len() > MAX_AUDIT_ENTRIES {
            self.audit_trail.pop_front();
        }
        entry
    }

    fn ignored(&self, reason: &str) -> TransitionOutcome {
        debug!("Ignoring duplicate event for leg {}: {}", self.shipment_id, reason);
        TransitionOutcome::Ignored {
            reason: reason.to_string(),
        }
    }

    // ------------------------------------------------------------------------
    // Operations
    // ------------------------------------------------------------------------

    pub fn accept(&mut self, bid_id: BidId) -> Result<TransitionOutcome, InvalidTransition> {
        self.apply(DriverEvent::BidAccepted { bid_id })
    }

    pub fn reject(&mut self, bid_id: BidId) -> Result<TransitionOutcome, InvalidTransition> {
        self.apply(DriverEvent::BidRejected { bid_id })
    }

    pub fn advance(&mut self, step: LegStep) -> Result<TransitionOutcome, InvalidTransition> {
        self.apply(DriverEvent::Advance(step))
    }

    pub fn head_to_pickup(&mut self) -> Result<TransitionOutcome, InvalidTransition> {
        self.advance(LegStep::HeadingToPickup)
    }

    pub fn arrive_at_pickup(&mut self) -> Result<TransitionOutcome, InvalidTransition> {
        self.advance(LegStep::ArrivedAtPickup)
    }

    pub fn collect_item(&mut self) -> Result<TransitionOutcome, InvalidTransition> {
        self.advance(LegStep::ItemCollected)
    }

    pub fn start_transit(&mut self) -> Result<TransitionOutcome, InvalidTransition> {
        self.advance(LegStep::InTransit)
    }

    pub fn deliver(&mut self) -> Result<TransitionOutcome, InvalidTransition> {
        self.advance(LegStep::Delivered)
    }
}
