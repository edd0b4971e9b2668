use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::{
    db_types::{Campaign, CampaignWithStages, DiscountStage, NewCampaign, NewSellableUnit, SellableUnit, UnitForPricing},
    stages::StageScheduleError,
    traits::{storage_error_conversion, CampaignClosure, ParticipationResult, Reservation},
};

#[derive(Debug, Clone, Error)]
pub enum ReservationError {
    #[error("Quantity must be positive, but {0} was requested.")]
    InvalidQuantity(i64),
    #[error("Invalid unit definition. {0}")]
    InvalidUnit(String),
    #[error("Invalid campaign definition. {0}")]
    InvalidCampaign(String),
    #[error("{0}")]
    InvalidStageSchedule(#[from] StageScheduleError),
    #[error("Sellable unit {0} does not exist.")]
    UnitNotFound(i64),
    #[error("Campaign {0} does not exist.")]
    CampaignNotFound(i64),
    #[error("Unit {unit_id} cannot take {requested} more. Only {remaining} remain.")]
    CapacityExceeded { unit_id: i64, requested: i64, remaining: i64 },
    #[error("Releasing {requested} from unit {unit_id} would take its cumulative quantity ({cumulative}) below zero.")]
    StockUnderflow { unit_id: i64, requested: i64, cumulative: i64 },
    #[error("Campaign {0} is closed.")]
    CampaignClosed(i64),
    #[error("Campaign {0} has passed its deadline.")]
    CampaignExpired(i64),
    #[error("Timed out waiting for the reservation lock.")]
    LockTimeout,
    #[error("The reservation lock was contended. Retry after a short backoff.")]
    LockConflict,
    #[error("Database error: {0}")]
    DatabaseError(String),
}

storage_error_conversion!(ReservationError);

impl ReservationError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::LockTimeout | Self::LockConflict)
    }

    /// Suggested wait before retrying. `None` when the error is not retryable.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::LockTimeout => Some(Duration::from_secs(1)),
            Self::LockConflict => Some(Duration::from_secs(2)),
            _ => None,
        }
    }

    /// Errors that indicate broken bookkeeping rather than a bad request.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, Self::StockUnderflow { .. })
    }
}

/// Sellable units, their stage schedules and group-buy campaigns.
///
/// Every method that changes `cumulative_qty` or `current_qty` must take an exclusive lock on the affected row before
/// reading it, and give up with [`ReservationError::LockTimeout`] once the backend's lock wait has elapsed.
#[allow(async_fn_in_trait)]
pub trait InventoryManagement: Clone {
    /// Persists a unit with its (already validated and sorted) stage schedule.
    async fn insert_unit(&self, unit: NewSellableUnit) -> Result<UnitForPricing, ReservationError>;

    async fn fetch_unit_for_pricing(&self, unit_id: i64) -> Result<Option<UnitForPricing>, ReservationError>;

    /// Locks the unit, checks capacity, advances `cumulative_qty` by `qty` and prices the increment at the tier reached
    /// by the post-increment quantity.
    async fn reserve_stock(&self, unit_id: i64, qty: i64) -> Result<Reservation, ReservationError>;

    /// Locks the unit and takes `qty` off `cumulative_qty`. Fails with [`ReservationError::StockUnderflow`] instead
    /// of clamping.
    async fn release_stock(&self, unit_id: i64, qty: i64) -> Result<SellableUnit, ReservationError>;

    async fn insert_campaign(
        &self,
        campaign: NewCampaign,
        stages: Vec<DiscountStage>,
    ) -> Result<CampaignWithStages, ReservationError>;

    async fn fetch_campaign(&self, campaign_id: i64) -> Result<Option<CampaignWithStages>, ReservationError>;

    /// Reserves unit stock for the campaign and advances `current_qty` in one transaction. The campaign flips from
    /// `OPEN` to `SUCCESS` the first time `current_qty` reaches `target_qty`.
    async fn participate_in_campaign(
        &self,
        campaign_id: i64,
        user_id: i64,
        qty: i64,
        now: DateTime<Utc>,
    ) -> Result<ParticipationResult, ReservationError>;

    /// Moves the campaign to `CLOSED`. Closing a closed campaign is a no-op.
    async fn close_campaign(&self, campaign_id: i64) -> Result<CampaignClosure, ReservationError>;

    /// Campaigns that are still `OPEN` or `SUCCESS` with a deadline at or before `now`.
    async fn fetch_expired_campaigns(&self, now: DateTime<Utc>) -> Result<Vec<Campaign>, ReservationError>;

    async fn fetch_campaign_participants(&self, campaign_id: i64) -> Result<Vec<i64>, ReservationError>;
}
