//! Registry of lifecycle machines owned by this client

use std::sync::Arc;

use hashbrown::HashMap;
use tracing::debug;

use super::delivery::{DeliveryLeg, DriverPhase};
use super::lifecycle::ShipmentLifecycle;
use super::model::Bid;
use crate::errors::InvalidTransition;
use crate::types::{BidId, ShipmentId, SystemTimeSource, TimeSource};

/// Customer shipments and driver legs keyed by shipment id
///
/// Each machine is owned here exclusively; callers reach it through the book.
pub struct ShipmentBook {
    shipments: HashMap<ShipmentId, ShipmentLifecycle>,
    legs: HashMap<ShipmentId, DeliveryLeg>,
    time_source: Arc<dyn TimeSource>,
}

impl Default for ShipmentBook {
    fn default() -> Self {
        Self::new()
    }
}

impl ShipmentBook {
    pub fn new() -> Self {
        Self::with_time_source(Arc::new(SystemTimeSource))
    }

    pub fn with_time_source(time_source: Arc<dyn TimeSource>) -> Self {
        Self {
            shipments: HashMap::new(),
            legs: HashMap::new(),
            time_source,
        }
    }

    pub fn time_source(&self) -> Arc<dyn TimeSource> {
        Arc::clone(&self.time_source)
    }

    // ------------------------------------------------------------------------
    // Customer Shipments
    // ------------------------------------------------------------------------

    /// Start a new draft, or return the existing machine for this id
    pub fn create_draft(&mut self, id: impl Into<ShipmentId>) -> &mut ShipmentLifecycle {
        let id = id.into();
        let time_source = Arc::clone(&self.time_source);
        self.shipments.entry(id.clone()).or_insert_with(|| {
            debug!("Tracking new draft shipment {}", id);
            ShipmentLifecycle::with_time_source(id, time_source)
        })
    }

    pub fn shipment(&self, id: &ShipmentId) -> Option<&ShipmentLifecycle> {
        self.shipments.get(id)
    }

    pub fn shipment_mut(&mut self, id: &ShipmentId) -> Option<&mut ShipmentLifecycle> {
        self.shipments.get_mut(id)
    }

    pub fn shipments(&self) -> impl Iterator<Item = &ShipmentLifecycle> {
        self.shipments.values()
    }

    pub fn remove_shipment(&mut self, id: &ShipmentId) -> Option<ShipmentLifecycle> {
        self.shipments.remove(id)
    }

    // ------------------------------------------------------------------------
    // Driver Legs
    // ------------------------------------------------------------------------

    /// Record a bid this driver submitted
    ///
    /// Only one live bid per shipment; a rejected leg may be replaced by a new bid.
    pub fn submit_bid(
        &mut self,
        shipment_id: impl Into<ShipmentId>,
        bid: Bid,
    ) -> Result<&mut DeliveryLeg, InvalidTransition> {
        let shipment_id = shipment_id.into();
        if let Some(existing) = self.legs.get(&shipment_id) {
            if existing.phase() != DriverPhase::Rejected {
                return Err(InvalidTransition::new(
                    existing.phase().name(),
                    format!("SubmitBid({})", bid.id),
                    format!("bid {} is already on this shipment", existing.bid().id),
                ));
            }
        }
        let leg = DeliveryLeg::submitted_with_time_source(
            shipment_id.clone(),
            bid,
            Arc::clone(&self.time_source),
        );
        Ok(self.legs.entry(shipment_id).insert(leg).into_mut())
    }

    /// Leg for a remote acceptance, created on the spot if this client never tracked it
    pub fn leg_for_acceptance(&mut self, shipment_id: &ShipmentId, bid_id: &BidId) -> &mut DeliveryLeg {
        let time_source = Arc::clone(&self.time_source);
        self.legs.entry(shipment_id.clone()).or_insert_with(|| {
            debug!("Starting untracked delivery leg for shipment {}", shipment_id);
            DeliveryLeg::from_acceptance(shipment_id.clone(), bid_id.clone(), time_source)
        })
    }

    pub fn leg(&self, shipment_id: &ShipmentId) -> Option<&DeliveryLeg> {
        self.legs.get(shipment_id)
    }

    pub fn leg_mut(&mut self, shipment_id: &ShipmentId) -> Option<&mut DeliveryLeg> {
        self.legs.get_mut(shipment_id)
    }

    pub fn legs(&self) -> impl Iterator<Item = &DeliveryLeg> {
        self.legs.values()
    }
}
