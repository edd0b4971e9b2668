//! Stage resolver
//!
//! Pure functions that map a cumulative quantity onto a tiered discount schedule. Nothing in here touches storage, so
//! the functions are safe to call for read-only status displays. When the result is persisted as a price snapshot,
//! the caller must be holding the reservation lock and pass in the post-increment quantity.
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db_types::{DiscountStage, Money};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StageScheduleError {
    #[error("Stage thresholds must be unique and strictly increasing. Threshold {0} appears out of order.")]
    NotStrictlyIncreasing(i64),
    #[error("Stage threshold {0} is negative.")]
    NegativeThreshold(i64),
    #[error("Discount percent {0} is outside 0..=100.")]
    InvalidDiscount(i64),
    #[error("A campaign needs at least one stage.")]
    NoStages,
    #[error("A campaign stage would start at quantity zero.")]
    ZeroThreshold,
    #[error("Target quantity must be positive, but was {0}.")]
    InvalidTarget(i64),
}

/// The price of a unit frozen at reservation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceSnapshot {
    pub level: i64,
    pub discount_percent: i64,
    pub unit_price: Money,
}

/// The read-only view of where a unit sits in its schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageStatus {
    pub cumulative_qty: i64,
    pub current: DiscountStage,
    pub next: Option<DiscountStage>,
    pub remaining_to_next: Option<i64>,
    pub applied_unit_price: Money,
}

/// The stage with the greatest threshold not above `qty`, or the implicit base stage if there is none.
pub fn current_stage(stages: &[DiscountStage], qty: i64) -> DiscountStage {
    stages
        .iter()
        .filter(|s| s.threshold_qty <= qty)
        .max_by_key(|s| s.threshold_qty)
        .copied()
        .unwrap_or_else(DiscountStage::base)
}

/// The stage with the smallest threshold above `qty`. `None` once `qty` is at or past the last threshold.
pub fn next_stage(stages: &[DiscountStage], qty: i64) -> Option<DiscountStage> {
    stages.iter().filter(|s| s.threshold_qty > qty).min_by_key(|s| s.threshold_qty).copied()
}

pub fn remaining_to_next(stages: &[DiscountStage], qty: i64) -> Option<i64> {
    next_stage(stages, qty).map(|s| s.threshold_qty - qty)
}

pub fn applied_unit_price(base_price: Money, discount_percent: i64) -> Money {
    base_price.discounted(discount_percent)
}

/// Prices a whole increment at the tier reached by `qty`. No blending across a crossed threshold.
pub fn price_snapshot(stages: &[DiscountStage], qty: i64, base_price: Money) -> PriceSnapshot {
    let stage = current_stage(stages, qty);
    PriceSnapshot {
        level: stage.level,
        discount_percent: stage.discount_percent,
        unit_price: applied_unit_price(base_price, stage.discount_percent),
    }
}

pub fn stage_status(stages: &[DiscountStage], qty: i64, base_price: Money) -> StageStatus {
    let current = current_stage(stages, qty);
    StageStatus {
        cumulative_qty: qty,
        current,
        next: next_stage(stages, qty),
        remaining_to_next: remaining_to_next(stages, qty),
        applied_unit_price: applied_unit_price(base_price, current.discount_percent),
    }
}

/// Sorts a caller-supplied schedule and rejects duplicate thresholds and out-of-range values.
pub fn validate_schedule(mut stages: Vec<DiscountStage>) -> Result<Vec<DiscountStage>, StageScheduleError> {
    stages.sort_by_key(|s| s.threshold_qty);
    for s in &stages {
        if s.threshold_qty < 0 {
            return Err(StageScheduleError::NegativeThreshold(s.threshold_qty));
        }
        if !(0..=100).contains(&s.discount_percent) {
            return Err(StageScheduleError::InvalidDiscount(s.discount_percent));
        }
    }
    if let Some(w) = stages.windows(2).find(|w| w[0].threshold_qty == w[1].threshold_qty) {
        return Err(StageScheduleError::NotStrictlyIncreasing(w[1].threshold_qty));
    }
    Ok(stages)
}

/// Generates a campaign schedule of `stage_count` tiers.
///
/// Stage `i` (1-based) starts at `round(target * i / (stage_count + 1))` and grants `round(max_discount * i /
/// stage_count)` percent, both rounded half-up. Schedules where rounding collapses two thresholds onto each other or
/// puts the first one at zero are rejected rather than silently deduplicated.
pub fn campaign_schedule(
    target_qty: i64,
    stage_count: i64,
    max_discount_percent: i64,
) -> Result<Vec<DiscountStage>, StageScheduleError> {
    if target_qty <= 0 {
        return Err(StageScheduleError::InvalidTarget(target_qty));
    }
    if stage_count <= 0 {
        return Err(StageScheduleError::NoStages);
    }
    if !(0..=100).contains(&max_discount_percent) {
        return Err(StageScheduleError::InvalidDiscount(max_discount_percent));
    }
    let stages = (1..=stage_count)
        .map(|i| {
            let threshold = div_round_half_up(target_qty * i, stage_count + 1);
            let discount = div_round_half_up(max_discount_percent * i, stage_count);
            DiscountStage::new(i, threshold, discount)
        })
        .collect::<Vec<_>>();
    if stages[0].threshold_qty == 0 {
        return Err(StageScheduleError::ZeroThreshold);
    }
    if let Some(w) = stages.windows(2).find(|w| w[1].threshold_qty <= w[0].threshold_qty) {
        return Err(StageScheduleError::NotStrictlyIncreasing(w[1].threshold_qty));
    }
    Ok(stages)
}

fn div_round_half_up(numerator: i64, denominator: i64) -> i64 {
    (2 * numerator + denominator) / (2 * denominator)
}
