use std::fmt::Debug;

use chrono::{DateTime, Utc};
use log::*;
use serde::Serialize;

use crate::{
    db_types::{Campaign, CampaignWithStages, NewCampaign, NewSellableUnit, SellableUnit, UnitForPricing},
    events::{CampaignClosedEvent, CampaignSucceededEvent, EventProducers},
    stages::{campaign_schedule, stage_status, validate_schedule, StageStatus},
    traits::{CampaignClosure, InventoryManagement, ParticipationResult, Reservation, ReservationError},
};

/// `ReservationApi` owns stock and group-buy participation.
///
/// Every quantity change goes through the backend under a row lock. Prices are always computed from the quantity read
/// under that lock, so two concurrent reservations can never be priced against the same tier boundary.
pub struct ReservationApi<B> {
    db: B,
    producers: EventProducers,
}

impl<B> Debug for ReservationApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ReservationApi")
    }
}

impl<B: Clone> Clone for ReservationApi<B> {
    fn clone(&self) -> Self {
        Self { db: self.db.clone(), producers: self.producers.clone() }
    }
}

/// The result of one pass over expired campaigns. One campaign failing to close does not stop the others.
#[derive(Debug, Default, Serialize)]
pub struct SweepReport {
    pub closed: Vec<CampaignClosure>,
    #[serde(skip)]
    pub failed: Vec<(i64, ReservationError)>,
}

impl<B> ReservationApi<B> {
    pub fn new(db: B, producers: EventProducers) -> Self {
        Self { db, producers }
    }

    pub fn db(&self) -> &B {
        &self.db
    }
}

impl<B> ReservationApi<B>
where B: InventoryManagement
{
    pub async fn create_unit(&self, mut unit: NewSellableUnit) -> Result<UnitForPricing, ReservationError> {
        if unit.name.trim().is_empty() {
            return Err(ReservationError::InvalidUnit("The unit needs a name.".into()));
        }
        if unit.base_price.is_negative() {
            return Err(ReservationError::InvalidUnit(format!("Base price {} is negative.", unit.base_price)));
        }
        if unit.stock <= 0 {
            return Err(ReservationError::InvalidUnit(format!("Stock must be positive, but was {}.", unit.stock)));
        }
        unit.stages = validate_schedule(unit.stages)?;
        let result = self.db.insert_unit(unit).await?;
        info!("📦️ Sellable unit #{} ({}) created with stock {}", result.unit.id, result.unit.name, result.unit.stock);
        Ok(result)
    }

    pub async fn fetch_unit(&self, unit_id: i64) -> Result<Option<UnitForPricing>, ReservationError> {
        self.db.fetch_unit_for_pricing(unit_id).await
    }

    /// Where the unit currently sits in its discount schedule. Read without a lock, so it is for display only.
    pub async fn stage_status(&self, unit_id: i64) -> Result<StageStatus, ReservationError> {
        let pricing =
            self.db.fetch_unit_for_pricing(unit_id).await?.ok_or(ReservationError::UnitNotFound(unit_id))?;
        Ok(stage_status(&pricing.stages, pricing.unit.cumulative_qty, pricing.unit.base_price))
    }

    pub async fn reserve(&self, unit_id: i64, qty: i64) -> Result<Reservation, ReservationError> {
        let reservation = self.db.reserve_stock(unit_id, qty).await.map_err(|e| {
            debug!("📦️ Could not reserve {qty} of unit #{unit_id}. {e}");
            e
        })?;
        debug!(
            "📦️ Reserved {qty} of unit #{unit_id} at level {} ({}% off, {} each)",
            reservation.snapshot.level, reservation.snapshot.discount_percent, reservation.snapshot.unit_price
        );
        Ok(reservation)
    }

    pub async fn release(&self, unit_id: i64, qty: i64) -> Result<SellableUnit, ReservationError> {
        let unit = self.db.release_stock(unit_id, qty).await?;
        debug!("📦️ Released {qty} of unit #{unit_id}");
        Ok(unit)
    }

    /// Opens a campaign on a unit, generating its stage schedule from the target and the maximum discount.
    pub async fn open_campaign(
        &self,
        campaign: NewCampaign,
        now: DateTime<Utc>,
    ) -> Result<CampaignWithStages, ReservationError> {
        if campaign.deadline <= now {
            return Err(ReservationError::InvalidCampaign(format!(
                "The deadline {} has already passed.",
                campaign.deadline
            )));
        }
        let stages = campaign_schedule(campaign.target_qty, campaign.stage_count, campaign.max_discount_percent)?;
        let result = self.db.insert_campaign(campaign, stages).await?;
        info!(
            "📦️ Campaign #{} opened on unit #{} with target {} and {} stages",
            result.campaign.id,
            result.campaign.unit_id,
            result.campaign.target_qty,
            result.stages.len()
        );
        Ok(result)
    }

    pub async fn fetch_campaign(&self, campaign_id: i64) -> Result<Option<CampaignWithStages>, ReservationError> {
        self.db.fetch_campaign(campaign_id).await
    }

    pub async fn participate(
        &self,
        campaign_id: i64,
        user_id: i64,
        qty: i64,
        now: DateTime<Utc>,
    ) -> Result<ParticipationResult, ReservationError> {
        let result = self.db.participate_in_campaign(campaign_id, user_id, qty, now).await?;
        debug!(
            "📦️ User #{user_id} joined campaign #{campaign_id} with {qty}. It is now at {}/{}",
            result.campaign.current_qty, result.campaign.target_qty
        );
        if result.reached_target {
            self.call_campaign_succeeded_hook(&result.campaign).await;
        }
        Ok(result)
    }

    pub async fn close_campaign(&self, campaign_id: i64) -> Result<CampaignClosure, ReservationError> {
        let closure = self.db.close_campaign(campaign_id).await?;
        if closure.changed {
            info!("📦️ Campaign #{campaign_id} closed (was {})", closure.previous_status);
            self.call_campaign_closed_hook(&closure).await;
        } else {
            trace!("📦️ Campaign #{campaign_id} was already closed");
        }
        Ok(closure)
    }

    /// Closes every campaign whose deadline has passed.
    pub async fn close_expired(&self, now: DateTime<Utc>) -> Result<SweepReport, ReservationError> {
        let expired = self.db.fetch_expired_campaigns(now).await?;
        let mut report = SweepReport::default();
        for Campaign { id, .. } in expired {
            match self.close_campaign(id).await {
                Ok(closure) => report.closed.push(closure),
                Err(e) => {
                    warn!("📦️ Could not close expired campaign #{id}. {e}");
                    report.failed.push((id, e));
                },
            }
        }
        Ok(report)
    }

    async fn participants(&self, campaign_id: i64) -> Vec<i64> {
        self.db.fetch_campaign_participants(campaign_id).await.unwrap_or_else(|e| {
            warn!("📦️ Could not fetch the participants of campaign #{campaign_id}. {e}");
            Vec::new()
        })
    }

    async fn call_campaign_succeeded_hook(&self, campaign: &Campaign) {
        if self.producers.campaign_succeeded_producer.is_empty() {
            return;
        }
        let participants = self.participants(campaign.id).await;
        for emitter in &self.producers.campaign_succeeded_producer {
            debug!("📦️ Notifying campaign succeeded hook subscribers");
            emitter.publish_event(CampaignSucceededEvent::new(campaign.clone(), participants.clone())).await;
        }
    }

    async fn call_campaign_closed_hook(&self, closure: &CampaignClosure) {
        if self.producers.campaign_closed_producer.is_empty() {
            return;
        }
        let participants = self.participants(closure.campaign.id).await;
        for emitter in &self.producers.campaign_closed_producer {
            debug!("📦️ Notifying campaign closed hook subscribers");
            let event = CampaignClosedEvent::new(closure.campaign.clone(), closure.succeeded(), participants.clone());
            emitter.publish_event(event).await;
        }
    }
}
