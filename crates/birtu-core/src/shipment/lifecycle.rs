//! Customer Shipment Lifecycle
//!
//! Owns a single [`Shipment`] and moves it through
//! `draft → published → bidding → bid_accepted → paid → in_transit → delivered`,
//! with `cancelled` reachable from every non-terminal state. Every event is
//! validated against the current status before anything is mutated, so a rejected
//! event leaves the shipment exactly as it was.

use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::model::{
    Bid, BidStatus, ItemDetails, LegStep, Location, PaymentReceipt, ReceiverInfo, Schedule,
    Shipment, ShipmentStatus, VehicleType,
};
use crate::errors::InvalidTransition;
use crate::types::{BidId, ShipmentId, SystemTimeSource, TimeSource, Timestamp};

/// Audit entries retained per machine
pub const MAX_AUDIT_ENTRIES: usize = 256;

// ----------------------------------------------------------------------------
// Events and Outcomes
// ----------------------------------------------------------------------------

/// Everything that can happen to a customer's shipment
#[derive(Debug, Clone, PartialEq)]
pub enum ShipmentEvent {
    SetLocations { pickup: Location, dropoff: Location },
    SetReceiverInfo(ReceiverInfo),
    SetVehicleRequirements(BTreeSet<VehicleType>),
    SetSchedule(Schedule),
    SetItemDetails(ItemDetails),
    SetPhotos(Vec<String>),
    Publish,
    BidReceived(Bid),
    AcceptBid(BidId),
    PaymentCompleted(PaymentReceipt),
    /// Driver progress relayed by the server
    CourierProgress(LegStep),
    Cancel { reason: Option<String> },
}

impl ShipmentEvent {
    /// Short name for logs and audit entries
    pub fn name(&self) -> String {
        match self {
            ShipmentEvent::SetLocations { .. } => "SetLocations".to_string(),
            ShipmentEvent::SetReceiverInfo(_) => "SetReceiverInfo".to_string(),
            ShipmentEvent::SetVehicleRequirements(_) => "SetVehicleRequirements".to_string(),
            ShipmentEvent::SetSchedule(_) => "SetSchedule".to_string(),
            ShipmentEvent::SetItemDetails(_) => "SetItemDetails".to_string(),
            ShipmentEvent::SetPhotos(_) => "SetPhotos".to_string(),
            ShipmentEvent::Publish => "Publish".to_string(),
            ShipmentEvent::BidReceived(bid) => format!("BidReceived({})", bid.id),
            ShipmentEvent::AcceptBid(id) => format!("AcceptBid({})", id),
            ShipmentEvent::PaymentCompleted(receipt) => {
                format!("PaymentCompleted({})", receipt.transaction_id)
            }
            ShipmentEvent::CourierProgress(step) => format!("CourierProgress({})", step),
            ShipmentEvent::Cancel { .. } => "Cancel".to_string(),
        }
    }

    fn is_detail_edit(&self) -> bool {
        matches!(
            self,
            ShipmentEvent::SetLocations { .. }
                | ShipmentEvent::SetReceiverInfo(_)
                | ShipmentEvent::SetVehicleRequirements(_)
                | ShipmentEvent::SetSchedule(_)
                | ShipmentEvent::SetItemDetails(_)
                | ShipmentEvent::SetPhotos(_)
        )
    }
}

/// Audit trail entry for an applied event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: Timestamp,
    pub shipment_id: ShipmentId,
    pub from_state: String,
    pub to_state: String,
    pub event: String,
}

/// Result of feeding an event to a machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// The event changed the machine
    Applied(AuditEntry),
    /// The event repeated one already applied and changed nothing
    Ignored { reason: String },
}

impl TransitionOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, TransitionOutcome::Applied(_))
    }
}

// ----------------------------------------------------------------------------
// Lifecycle Machine
// ----------------------------------------------------------------------------

/// State machine owning one customer shipment
pub struct ShipmentLifecycle {
    shipment: Shipment,
    audit_trail: VecDeque<AuditEntry>,
    time_source: Arc<dyn TimeSource>,
}

impl core::fmt::Debug for ShipmentLifecycle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ShipmentLifecycle")
            .field("shipment", &self.shipment)
            .field("audit_entries", &self.audit_trail.len())
            .finish()
    }
}

impl ShipmentLifecycle {
    /// Start a new draft
    pub fn new(id: impl Into<ShipmentId>) -> Self {
        Self::with_time_source(id, Arc::new(SystemTimeSource))
    }

    pub fn with_time_source(id: impl Into<ShipmentId>, time_source: Arc<dyn TimeSource>) -> Self {
        Self {
            shipment: Shipment::draft(id),
            audit_trail: VecDeque::new(),
            time_source,
        }
    }

    pub fn shipment(&self) -> &Shipment {
        &self.shipment
    }

    pub fn id(&self) -> &ShipmentId {
        &self.shipment.id
    }

    pub fn status(&self) -> ShipmentStatus {
        self.shipment.status
    }

    pub fn bid(&self, id: &BidId) -> Option<&Bid> {
        self.shipment.bids.get(id)
    }

    pub fn accepted_bid(&self) -> Option<&Bid> {
        self.shipment.accepted()
    }

    pub fn audit_trail(&self) -> impl Iterator<Item = &AuditEntry> {
        self.audit_trail.iter()
    }

    /// Validate and apply an event
    ///
    /// On `Err` the shipment is unchanged.
    pub fn apply(&mut self, event: ShipmentEvent) -> Result<TransitionOutcome, InvalidTransition> {
        let from = self.shipment.status;
        let event_name = event.name();
        let shipment_id = self.shipment.id.clone();
        let reject = |reason: String| {
            debug!(
                "Rejected {} for shipment {} in {}: {}",
                event_name, shipment_id, from, reason
            );
            InvalidTransition::new(from.as_str(), event_name.clone(), reason)
        };

        if from.is_terminal() {
            if from == ShipmentStatus::Delivered
                && event == ShipmentEvent::CourierProgress(LegStep::Delivered)
            {
                return Ok(ignored("delivery already recorded"));
            }
            return Err(reject(format!("shipment is {}", from)));
        }

        if event.is_detail_edit() && from != ShipmentStatus::Draft {
            return Err(reject(
                "shipment details can only be edited while draft".to_string(),
            ));
        }

        let shipment = &mut self.shipment;
        match event {
            ShipmentEvent::SetLocations { pickup, dropoff } => {
                shipment.pickup = Some(pickup);
                shipment.dropoff = Some(dropoff);
            }
            ShipmentEvent::SetReceiverInfo(receiver) => shipment.receiver = Some(receiver),
            ShipmentEvent::SetVehicleRequirements(vehicles) => {
                shipment.vehicle_requirements = vehicles
            }
            ShipmentEvent::SetSchedule(schedule) => shipment.schedule = Some(schedule),
            ShipmentEvent::SetItemDetails(item) => shipment.item = Some(item),
            ShipmentEvent::SetPhotos(photos) => shipment.photos = photos,

            ShipmentEvent::Publish => {
                if from != ShipmentStatus::Draft {
                    return Err(reject("only a draft can be published".to_string()));
                }
                shipment.status = ShipmentStatus::Published;
            }

            ShipmentEvent::BidReceived(mut bid) => {
                if !matches!(from, ShipmentStatus::Published | ShipmentStatus::Bidding) {
                    return Err(reject(
                        "bids are only taken while published or bidding".to_string(),
                    ));
                }
                if shipment.bids.contains_key(&bid.id) {
                    return Ok(ignored(format!("bid {} already recorded", bid.id)));
                }
                bid.status = BidStatus::Pending;
                shipment.bids.insert(bid.id.clone(), bid);
                shipment.status = ShipmentStatus::Bidding;
            }

            ShipmentEvent::AcceptBid(bid_id) => {
                if let Some(accepted) = &shipment.accepted_bid {
                    return Err(reject(format!("bid {} was already accepted", accepted)));
                }
                if !matches!(from, ShipmentStatus::Published | ShipmentStatus::Bidding) {
                    return Err(reject("no open bidding to accept from".to_string()));
                }
                match shipment.bids.get(&bid_id) {
                    Some(bid) if bid.status == BidStatus::Pending => {}
                    Some(_) => return Err(reject(format!("bid {} is not pending", bid_id))),
                    None => return Err(reject(format!("no bid with id {}", bid_id))),
                }
                for (id, bid) in shipment.bids.iter_mut() {
                    bid.status = if *id == bid_id {
                        BidStatus::Accepted
                    } else {
                        BidStatus::Rejected
                    };
                }
                shipment.accepted_bid = Some(bid_id);
                shipment.status = ShipmentStatus::BidAccepted;
            }

            ShipmentEvent::PaymentCompleted(receipt) => match from {
                ShipmentStatus::BidAccepted => {
                    shipment.payment = Some(receipt);
                    shipment.status = ShipmentStatus::Paid;
                }
                _ if shipment.payment.as_ref().map(|p| &p.transaction_id)
                    == Some(&receipt.transaction_id) =>
                {
                    return Ok(ignored(format!(
                        "payment {} already recorded",
                        receipt.transaction_id
                    )));
                }
                _ => return Err(reject("payment requires an accepted bid".to_string())),
            },

            ShipmentEvent::CourierProgress(step) => {
                if !matches!(from, ShipmentStatus::Paid | ShipmentStatus::InTransit) {
                    return Err(reject("delivery has not started".to_string()));
                }
                if step == LegStep::Accepted {
                    return Err(reject("acceptance is not a delivery step".to_string()));
                }
                if let Some(current) = shipment.courier_progress {
                    if step == current {
                        return Ok(ignored(format!("{} already recorded", step)));
                    }
                    if step < current {
                        return Err(reject(format!("{} already reached", current)));
                    }
                }
                match step {
                    LegStep::Delivered if from != ShipmentStatus::InTransit => {
                        return Err(reject("delivery requires the item in transit".to_string()));
                    }
                    LegStep::Delivered => shipment.status = ShipmentStatus::Delivered,
                    LegStep::InTransit => shipment.status = ShipmentStatus::InTransit,
                    _ => {}
                }
                shipment.courier_progress = Some(step);
            }

            ShipmentEvent::Cancel { reason } => {
                shipment.cancellation_reason = reason;
                shipment.status = ShipmentStatus::Cancelled;
            }
        }

        let to = self.shipment.status;
        let entry = AuditEntry {
            timestamp: self.time_source.now(),
            shipment_id,
            from_state: from.as_str().to_string(),
            to_state: to.as_str().to_string(),
            event: event_name,
        };
        if from != to {
            info!("Shipment {} {} -> {} ({})", entry.shipment_id, from, to, entry.event);
        }
        self.audit_trail.push_back(entry.clone());
        if self.audit_trail.len() > MAX_AUDIT_ENTRIES {
            self.audit_trail.pop_front();
        }
        Ok(TransitionOutcome::Applied(entry))
    }

    // ------------------------------------------------------------------------
    // Operations
    // ------------------------------------------------------------------------

    pub fn set_locations(
        &mut self,
        pickup: Location,
        dropoff: Location,
    ) -> Result<TransitionOutcome, InvalidTransition> {
        self.apply(ShipmentEvent::SetLocations { pickup, dropoff })
    }

    pub fn set_receiver_info(
        &mut self,
        receiver: ReceiverInfo,
    ) -> Result<TransitionOutcome, InvalidTransition> {
        self.apply(ShipmentEvent::SetReceiverInfo(receiver))
    }

    pub fn set_vehicle_requirements(
        &mut self,
        vehicles: impl IntoIterator<Item = VehicleType>,
    ) -> Result<TransitionOutcome, InvalidTransition> {
        self.apply(ShipmentEvent::SetVehicleRequirements(
            vehicles.into_iter().collect(),
        ))
    }

    pub fn set_schedule(&mut self, schedule: Schedule) -> Result<TransitionOutcome, InvalidTransition> {
        self.apply(ShipmentEvent::SetSchedule(schedule))
    }

    pub fn set_item_details(
        &mut self,
        item: ItemDetails,
    ) -> Result<TransitionOutcome, InvalidTransition> {
        self.apply(ShipmentEvent::SetItemDetails(item))
    }

    pub fn set_photos(&mut self, photos: Vec<String>) -> Result<TransitionOutcome, InvalidTransition> {
        self.apply(ShipmentEvent::SetPhotos(photos))
    }

    pub fn publish(&mut self) -> Result<TransitionOutcome, InvalidTransition> {
        self.apply(ShipmentEvent::Publish)
    }

    pub fn receive_bid(&mut self, bid: Bid) -> Result<TransitionOutcome, InvalidTransition> {
        self.apply(ShipmentEvent::BidReceived(bid))
    }

    /// Accept one pending bid and reject all others
    pub fn accept_bid(&mut self, bid_id: BidId) -> Result<TransitionOutcome, InvalidTransition> {
        self.apply(ShipmentEvent::AcceptBid(bid_id))
    }

    pub fn complete_payment(
        &mut self,
        receipt: PaymentReceipt,
    ) -> Result<TransitionOutcome, InvalidTransition> {
        self.apply(ShipmentEvent::PaymentCompleted(receipt))
    }

    pub fn record_courier_progress(
        &mut self,
        step: LegStep,
    ) -> Result<TransitionOutcome, InvalidTransition> {
        self.apply(ShipmentEvent::CourierProgress(step))
    }

    pub fn cancel(&mut self, reason: Option<String>) -> Result<TransitionOutcome, InvalidTransition> {
        self.apply(ShipmentEvent::Cancel { reason })
    }
}

fn ignored(reason: impl Into<String>) -> TransitionOutcome {
    let reason = reason.into();
    debug!("Ignoring duplicate event: {}", reason);
    TransitionOutcome::Ignored { reason }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shipment::model::{PaymentMethod, UrgencyTier};
    use proptest::prelude::*;

    struct FixedTime(Timestamp);

    impl TimeSource for FixedTime {
        fn now(&self) -> Timestamp {
            self.0
        }
    }

    fn create_test_lifecycle() -> ShipmentLifecycle {
        ShipmentLifecycle::with_time_source("s1", Arc::new(FixedTime(Timestamp::new(1_000))))
    }

    fn create_test_bid(id: &str, at: u64) -> Bid {
        Bid::pending(id, 450.0, Timestamp::new(at)).with_driver(format!("d-{}", id), "Driver")
    }

    fn create_test_receipt() -> PaymentReceipt {
        PaymentReceipt {
            transaction_id: "tx-1".to_string(),
            method: PaymentMethod::Telebirr,
            amount: 450.0,
        }
    }

    fn published_with_bids(ids: &[&str]) -> ShipmentLifecycle {
        let mut machine = create_test_lifecycle();
        machine.publish().unwrap();
        for (i, id) in ids.iter().enumerate() {
            machine.receive_bid(create_test_bid(id, i as u64)).unwrap();
        }
        machine
    }

    #[test]
    fn test_draft_edits_then_publish() {
        let mut machine = create_test_lifecycle();
        machine
            .set_locations(
                Location::new(38.76, 9.01, "Bole"),
                Location::new(38.74, 9.03, "Piassa"),
            )
            .unwrap();
        machine
            .set_receiver_info(ReceiverInfo {
                name: "Hana".to_string(),
                phone: "+251922000000".to_string(),
            })
            .unwrap();
        machine
            .set_vehicle_requirements([VehicleType::Pickup, VehicleType::Truck])
            .unwrap();
        machine
            .set_schedule(Schedule {
                datetime: Timestamp::new(5_000),
                urgency: UrgencyTier::High,
            })
            .unwrap();
        machine
            .set_item_details(ItemDetails {
                description: "Sofa".to_string(),
                weight_kg: 40.0,
            })
            .unwrap();
        machine.set_photos(vec!["sofa.jpg".to_string()]).unwrap();
        assert_eq!(machine.status(), ShipmentStatus::Draft);

        machine.publish().unwrap();
        assert_eq!(machine.status(), ShipmentStatus::Published);
        assert_eq!(machine.shipment().vehicle_requirements.len(), 2);

        let err = machine.set_photos(vec![]).unwrap_err();
        assert_eq!(err.from_state, "published");
        assert_eq!(machine.shipment().photos, vec!["sofa.jpg".to_string()]);
    }

    #[test]
    fn test_first_bid_starts_bidding() {
        let machine = published_with_bids(&["b1"]);
        assert_eq!(machine.status(), ShipmentStatus::Bidding);
    }

    #[test]
    fn test_accept_one_of_three_bids() {
        let mut machine = published_with_bids(&["b1", "b2", "b3"]);
        machine.accept_bid(BidId::new("b2")).unwrap();

        assert_eq!(machine.status(), ShipmentStatus::BidAccepted);
        assert_eq!(machine.shipment().bids.len(), 3);
        assert_eq!(machine.accepted_bid().unwrap().id, BidId::new("b2"));
        assert_eq!(machine.bid(&BidId::new("b1")).unwrap().status, BidStatus::Rejected);
        assert_eq!(machine.bid(&BidId::new("b3")).unwrap().status, BidStatus::Rejected);
    }

    #[test]
    fn test_second_accept_is_rejected_and_changes_nothing() {
        let mut machine = published_with_bids(&["b1", "b2", "b3"]);
        machine.accept_bid(BidId::new("b2")).unwrap();
        let before = machine.shipment().clone();
        let audit_len = machine.audit_trail().count();

        let err = machine.accept_bid(BidId::new("b3")).unwrap_err();
        assert_eq!(err.from_state, "bid_accepted");
        assert_eq!(machine.shipment(), &before);
        assert_eq!(machine.audit_trail().count(), audit_len);
    }

    #[test]
    fn test_accept_unknown_bid() {
        let mut machine = published_with_bids(&["b1"]);
        assert!(machine.accept_bid(BidId::new("b9")).is_err());
        assert_eq!(machine.status(), ShipmentStatus::Bidding);
    }

    #[test]
    fn test_duplicate_bid_is_ignored() {
        let mut machine = published_with_bids(&["b1"]);
        let outcome = machine.receive_bid(create_test_bid("b1", 99)).unwrap();
        assert!(!outcome.is_applied());
        assert_eq!(machine.shipment().bids.len(), 1);
        assert_eq!(machine.bid(&BidId::new("b1")).unwrap().submitted_at, Timestamp::new(0));
    }

    #[test]
    fn test_late_bid_after_acceptance_is_rejected() {
        let mut machine = published_with_bids(&["b1"]);
        machine.accept_bid(BidId::new("b1")).unwrap();
        assert!(machine.receive_bid(create_test_bid("b2", 5)).is_err());
        assert_eq!(machine.shipment().bids.len(), 1);
    }

    #[test]
    fn test_full_happy_path() {
        let mut machine = published_with_bids(&["b1"]);
        machine.accept_bid(BidId::new("b1")).unwrap();
        machine.complete_payment(create_test_receipt()).unwrap();
        assert_eq!(machine.status(), ShipmentStatus::Paid);

        machine.record_courier_progress(LegStep::HeadingToPickup).unwrap();
        machine.record_courier_progress(LegStep::ItemCollected).unwrap();
        assert_eq!(machine.status(), ShipmentStatus::Paid);

        machine.record_courier_progress(LegStep::InTransit).unwrap();
        assert_eq!(machine.status(), ShipmentStatus::InTransit);
        machine.record_courier_progress(LegStep::Delivered).unwrap();
        assert_eq!(machine.status(), ShipmentStatus::Delivered);

        let duplicate = machine.record_courier_progress(LegStep::Delivered).unwrap();
        assert!(!duplicate.is_applied());
        assert!(machine.cancel(None).is_err());
    }

    #[test]
    fn test_delivery_requires_transit() {
        let mut machine = published_with_bids(&["b1"]);
        machine.accept_bid(BidId::new("b1")).unwrap();
        machine.complete_payment(create_test_receipt()).unwrap();
        assert!(machine.record_courier_progress(LegStep::Delivered).is_err());
        assert_eq!(machine.status(), ShipmentStatus::Paid);
    }

    #[test]
    fn test_payment_requires_accepted_bid() {
        let mut machine = published_with_bids(&["b1"]);
        assert!(machine.complete_payment(create_test_receipt()).is_err());
        assert!(machine.shipment().payment.is_none());
    }

    #[test]
    fn test_cancel_from_bidding_keeps_bids() {
        let mut machine = published_with_bids(&["b1", "b2"]);
        machine.cancel(Some("changed plans".to_string())).unwrap();
        assert_eq!(machine.status(), ShipmentStatus::Cancelled);
        assert_eq!(machine.shipment().bids.len(), 2);
        assert!(machine.publish().is_err());
        assert!(machine.cancel(None).is_err());
    }

    #[test]
    fn test_audit_trail_records_transitions() {
        let mut machine = published_with_bids(&["b1"]);
        machine.accept_bid(BidId::new("b1")).unwrap();
        let last = machine.audit_trail().last().unwrap();
        assert_eq!(last.from_state, "bidding");
        assert_eq!(last.to_state, "bid_accepted");
        assert_eq!(last.event, "AcceptBid(b1)");
        assert_eq!(last.timestamp, Timestamp::new(1_000));
    }

    #[test]
    fn test_audit_trail_is_bounded() {
        let mut machine = create_test_lifecycle();
        for _ in 0..(MAX_AUDIT_ENTRIES + 10) {
            machine.set_photos(vec![]).unwrap();
        }
        assert_eq!(machine.audit_trail().count(), MAX_AUDIT_ENTRIES);
    }

    fn arb_event() -> impl Strategy<Value = ShipmentEvent> {
        let bid_id = prop::sample::select(vec!["b1", "b2", "b3"]);
        let step = prop::sample::select(LegStep::ALL.to_vec());
        prop_oneof![
            Just(ShipmentEvent::Publish),
            Just(ShipmentEvent::SetPhotos(vec![])),
            (bid_id.clone(), 0u64..100)
                .prop_map(|(id, at)| ShipmentEvent::BidReceived(Bid::pending(id, 100.0, Timestamp::new(at)))),
            bid_id.prop_map(|id| ShipmentEvent::AcceptBid(BidId::new(id))),
            Just(ShipmentEvent::PaymentCompleted(PaymentReceipt {
                transaction_id: "tx".to_string(),
                method: PaymentMethod::CbeBirr,
                amount: 100.0,
            })),
            step.prop_map(ShipmentEvent::CourierProgress),
            Just(ShipmentEvent::Cancel { reason: None }),
        ]
    }

    proptest! {
        #[test]
        fn prop_lifecycle_invariants_hold(events in prop::collection::vec(arb_event(), 0..40)) {
            let mut machine = create_test_lifecycle();
            let mut bids_seen = 0usize;

            for event in events {
                let before = machine.shipment().clone();
                let result = machine.apply(event);
                let shipment = machine.shipment();

                if result.is_err() {
                    prop_assert_eq!(shipment, &before);
                }

                // bids are never removed
                prop_assert!(shipment.bids.len() >= bids_seen);
                bids_seen = shipment.bids.len();

                // at most one accepted bid, and it matches accepted_bid
                let accepted: Vec<&Bid> = shipment
                    .bids
                    .values()
                    .filter(|b| b.status == BidStatus::Accepted)
                    .collect();
                prop_assert!(accepted.len() <= 1);
                prop_assert_eq!(accepted.first().map(|b| &b.id), shipment.accepted_bid.as_ref());

                // once accepted the choice never changes
                if let Some(previous) = &before.accepted_bid {
                    prop_assert_eq!(Some(previous), shipment.accepted_bid.as_ref());
                }

                // terminal states are absorbing
                if before.status.is_terminal() {
                    prop_assert_eq!(before.status, shipment.status);
                }
            }
        }
    }
}
