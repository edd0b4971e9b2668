use std::fmt::Debug;

use chrono::Utc;
use log::*;

use crate::{
    db_types::{Money, NewOrder, NewOrderLine, OrderWithLines},
    gbe_api::order_objects::ConfirmOrderRequest,
    helpers::new_order_no,
    traits::{OrderFlowError, OrderManagement},
    wallet_rules::{PointEvent, PointOperation},
};

/// `OrderFlowApi` confirms orders.
///
/// Confirmation reserves every line under its own unit lock, so it cannot be a single database transaction. It is a
/// saga instead: when a later step fails, every reservation that already succeeded is released again before the error
/// is returned.
pub struct OrderFlowApi<B> {
    db: B,
}

impl<B> Debug for OrderFlowApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "OrderFlowApi")
    }
}

impl<B: Clone> Clone for OrderFlowApi<B> {
    fn clone(&self) -> Self {
        Self { db: self.db.clone() }
    }
}

impl<B> OrderFlowApi<B> {
    pub fn new(db: B) -> Self {
        Self { db }
    }

    pub fn db(&self) -> &B {
        &self.db
    }
}

impl<B> OrderFlowApi<B>
where B: OrderManagement
{
    /// Reserves stock for every line, holds points if requested and persists the order as `CONFIRMED` with the price
    /// snapshots taken during reservation.
    ///
    /// The user must have a point wallet, even when no points are used. That is the engine's user existence check.
    pub async fn confirm_order(&self, request: ConfirmOrderRequest) -> Result<OrderWithLines, OrderFlowError> {
        let ConfirmOrderRequest { user_id, lines, points_to_use } = request;
        if lines.is_empty() {
            return Err(OrderFlowError::EmptyOrder);
        }
        if let Some((line, l)) = lines.iter().enumerate().find(|(_, l)| l.qty <= 0) {
            return Err(OrderFlowError::InvalidQuantity { line, qty: l.qty });
        }
        if points_to_use.is_negative() {
            return Err(OrderFlowError::InvalidPointAmount { requested: points_to_use, total: Money::zero() });
        }
        if self.db.fetch_wallet(user_id).await?.is_none() {
            return Err(OrderFlowError::UserNotFound(user_id));
        }

        let mut reserved: Vec<NewOrderLine> = Vec::with_capacity(lines.len());
        for (i, line) in lines.iter().enumerate() {
            match self.db.reserve_stock(line.unit_id, line.qty).await {
                Ok(r) => reserved.push(NewOrderLine {
                    unit_id: line.unit_id,
                    ordered_qty: line.qty,
                    level_snapshot: r.snapshot.level,
                    discount_percent_snapshot: r.snapshot.discount_percent,
                    unit_price_snapshot: r.snapshot.unit_price,
                }),
                Err(source) => {
                    debug!("📝️ Line {i} for user #{user_id} could not be reserved. Rolling back. {source}");
                    self.release_reservations(&reserved).await;
                    return Err(OrderFlowError::ReservationFailed { line: i, unit_id: line.unit_id, source });
                },
            }
        }

        let order = NewOrder { order_no: new_order_no(Utc::now()), user_id, point_amount: points_to_use, lines: reserved };
        let total = order.total_amount();
        if points_to_use > total {
            self.release_reservations(&order.lines).await;
            return Err(OrderFlowError::InvalidPointAmount { requested: points_to_use, total });
        }
        let hold_key = format!("order:{}:hold", order.order_no);
        if points_to_use.is_positive() {
            let hold = PointEvent::new(user_id, PointOperation::Hold, points_to_use, hold_key.as_str());
            if let Err(e) = self.db.apply_point_event(hold).await {
                debug!("📝️ Could not hold {points_to_use} points for order [{}]. Rolling back. {e}", order.order_no);
                self.release_reservations(&order.lines).await;
                return Err(OrderFlowError::PointHoldFailed(e));
            }
        }

        let order_no = order.order_no.clone();
        let lines = order.lines.clone();
        match self.db.insert_order(order).await {
            Ok(result) => {
                info!(
                    "📝️ Order [{order_no}] confirmed for user #{user_id}: {} lines, total {total}, {points_to_use} in points",
                    result.lines.len()
                );
                Ok(result)
            },
            Err(e) => {
                warn!("📝️ Order [{order_no}] could not be saved. Rolling back its reservations. {e}");
                if points_to_use.is_positive() {
                    let key = format!("order:{order_no}:unhold");
                    let release = PointEvent::new(user_id, PointOperation::Release, points_to_use, key);
                    if let Err(e) = self.db.apply_point_event(release).await {
                        error!("📝️ Could not release the {points_to_use} points held for [{order_no}] ({hold_key}). {e}");
                    }
                }
                self.release_reservations(&lines).await;
                Err(e)
            },
        }
    }

    pub async fn fetch_order(&self, order_id: i64) -> Result<Option<OrderWithLines>, OrderFlowError> {
        self.db.fetch_order(order_id).await
    }

    pub async fn fetch_order_by_order_no(&self, order_no: &str) -> Result<Option<OrderWithLines>, OrderFlowError> {
        self.db.fetch_order_by_order_no(order_no).await
    }

    /// Compensating release. Failures are logged, not returned.
    async fn release_reservations(&self, lines: &[NewOrderLine]) {
        for line in lines.iter().rev() {
            if let Err(e) = self.db.release_stock(line.unit_id, line.ordered_qty).await {
                error!(
                    "📝️ Could not release {} of unit #{} while rolling back an order. Its cumulative quantity is now overstated. {e}",
                    line.ordered_qty, line.unit_id
                );
            }
        }
    }
}
