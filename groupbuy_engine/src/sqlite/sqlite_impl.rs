//! `SqliteDatabase` is a concrete implementation of a group-buy engine backend.
//!
//! Unsurprisingly, it uses SQLite as the backend and implements all the storage traits defined in the [`traits`]
//! module.
//!
//! SQLite has a single writer, so "locking a row" means acquiring the database write lock. Every mutating transaction
//! opens with a `lock_*` call from [`super::db`], which writes to the target row first. That makes SQLite hand out the
//! write lock (waiting up to the pool's busy timeout) before anything is read, so every value used in a decision is
//! read under the lock.
//!
//! [`traits`]: crate::traits
use std::{collections::HashMap, fmt::Debug, time::Duration};

use chrono::{DateTime, Utc};
use log::*;
use sqlx::{migrate::MigrateError, SqliteConnection, SqlitePool};

use super::db::{campaigns, db_url, new_pool, orders, payments, refunds, transactions, units, wallets};
use crate::{
    db_types::{
        Campaign,
        CampaignStatus,
        CampaignWithStages,
        CorrelationId,
        DiscountStage,
        Money,
        NewCampaign,
        NewOrder,
        NewPayment,
        NewSellableUnit,
        Order,
        OrderStatusType,
        OrderWithLines,
        Payment,
        PaymentStatus,
        PaymentTransaction,
        PaymentWithLines,
        PointLedgerEntry,
        PointWallet,
        Refund,
        RefundStatus,
        RefundType,
        SellableUnit,
        UnitForPricing,
    },
    payment_rules::{
        self,
        distribute,
        next_order_status,
        order_effect,
        spread_over_lines,
        status_after_refund,
        LineAllocation,
        OrderEffect,
        StatusTransition,
    },
    stages::price_snapshot,
    traits::{
        classify,
        CampaignClosure,
        GatewayCancellation,
        GatewayUpdate,
        InventoryManagement,
        LedgerOutcome,
        OrderFlowError,
        OrderManagement,
        ParticipationResult,
        PaymentFlowError,
        PaymentManagement,
        PendingRefund,
        PointLedgerError,
        PointLedgerManagement,
        ReconcileOutcome,
        RefundOutcome,
        RefundRequest,
        Reservation,
        ReservationError,
        StorageFailure,
        TransactionRecord,
    },
    wallet_rules::{PointEvent, PointOperation},
};

pub const DEFAULT_LOCK_WAIT: Duration = Duration::from_secs(5);

/// Description recorded on refunds the gateway performed without a local request.
pub const GATEWAY_INITIATED_REFUND: &str = "gateway-initiated";

#[derive(Clone)]
pub struct SqliteDatabase {
    url: String,
    pool: SqlitePool,
    lock_wait: Duration,
}

impl Debug for SqliteDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "SqliteDatabase ({}, lock wait {:?})", self.url, self.lock_wait)
    }
}

//--------------------------------------  InventoryManagement  --------------------------------------------------------
impl InventoryManagement for SqliteDatabase {
    async fn insert_unit(&self, unit: NewSellableUnit) -> Result<UnitForPricing, ReservationError> {
        let mut tx = self.pool.begin().await?;
        let row = units::insert_unit(&unit.name, unit.base_price, unit.stock, &mut tx).await?;
        units::insert_unit_stages(row.id, &unit.stages, &mut tx).await?;
        let stages = units::fetch_unit_stages(row.id, &mut tx).await?;
        tx.commit().await?;
        debug!("🗃️ Sellable unit #{} saved with {} stages", row.id, stages.len());
        Ok(UnitForPricing { unit: row, stages })
    }

    async fn fetch_unit_for_pricing(&self, unit_id: i64) -> Result<Option<UnitForPricing>, ReservationError> {
        let mut conn = self.pool.acquire().await?;
        let Some(unit) = units::fetch_unit(unit_id, &mut conn).await? else {
            return Ok(None);
        };
        let stages = units::fetch_unit_stages(unit_id, &mut conn).await?;
        Ok(Some(UnitForPricing { unit, stages }))
    }

    async fn reserve_stock(&self, unit_id: i64, qty: i64) -> Result<Reservation, ReservationError> {
        if qty <= 0 {
            return Err(ReservationError::InvalidQuantity(qty));
        }
        let mut tx = self.pool.begin().await?;
        let unit = units::lock_unit(unit_id, &mut tx).await?.ok_or(ReservationError::UnitNotFound(unit_id))?;
        let unit = advance_locked_unit(&unit, qty, &mut tx).await?;
        let stages = units::fetch_unit_stages(unit_id, &mut tx).await?;
        let snapshot = price_snapshot(&stages, unit.cumulative_qty, unit.base_price);
        tx.commit().await?;
        trace!("🗃️ Reserved {qty} of unit #{unit_id}. Cumulative quantity is now {}", unit.cumulative_qty);
        Ok(Reservation { unit, qty, snapshot })
    }

    async fn release_stock(&self, unit_id: i64, qty: i64) -> Result<SellableUnit, ReservationError> {
        if qty <= 0 {
            return Err(ReservationError::InvalidQuantity(qty));
        }
        let mut tx = self.pool.begin().await?;
        let unit = release_locked_unit(unit_id, qty, &mut tx).await?;
        tx.commit().await?;
        trace!("🗃️ Released {qty} of unit #{unit_id}. Cumulative quantity is now {}", unit.cumulative_qty);
        Ok(unit)
    }

    async fn insert_campaign(
        &self,
        campaign: NewCampaign,
        stages: Vec<DiscountStage>,
    ) -> Result<CampaignWithStages, ReservationError> {
        let mut tx = self.pool.begin().await?;
        let row = campaigns::insert_campaign(&campaign, &mut tx).await.map_err(|e| {
            if matches!(&e, sqlx::Error::Database(db) if db.is_foreign_key_violation()) {
                ReservationError::UnitNotFound(campaign.unit_id)
            } else {
                e.into()
            }
        })?;
        campaigns::insert_campaign_stages(row.id, &stages, &mut tx).await?;
        let stages = campaigns::fetch_campaign_stages(row.id, &mut tx).await?;
        tx.commit().await?;
        Ok(CampaignWithStages { campaign: row, stages })
    }

    async fn fetch_campaign(&self, campaign_id: i64) -> Result<Option<CampaignWithStages>, ReservationError> {
        let mut conn = self.pool.acquire().await?;
        let Some(campaign) = campaigns::fetch_campaign(campaign_id, &mut conn).await? else {
            return Ok(None);
        };
        let stages = campaigns::fetch_campaign_stages(campaign_id, &mut conn).await?;
        Ok(Some(CampaignWithStages { campaign, stages }))
    }

    async fn participate_in_campaign(
        &self,
        campaign_id: i64,
        user_id: i64,
        qty: i64,
        now: DateTime<Utc>,
    ) -> Result<ParticipationResult, ReservationError> {
        if qty <= 0 {
            return Err(ReservationError::InvalidQuantity(qty));
        }
        let mut tx = self.pool.begin().await?;
        let campaign = campaigns::lock_campaign(campaign_id, &mut tx)
            .await?
            .ok_or(ReservationError::CampaignNotFound(campaign_id))?;
        if campaign.status == CampaignStatus::Closed {
            return Err(ReservationError::CampaignClosed(campaign_id));
        }
        if campaign.deadline <= now {
            return Err(ReservationError::CampaignExpired(campaign_id));
        }
        let unit = units::lock_unit(campaign.unit_id, &mut tx)
            .await?
            .ok_or(ReservationError::UnitNotFound(campaign.unit_id))?;
        let unit = advance_locked_unit(&unit, qty, &mut tx).await?;
        let updated = campaigns::add_to_current_qty(campaign_id, qty, &mut tx).await?;
        let flipped = campaigns::mark_succeeded(campaign_id, now, &mut tx).await?;
        let reached_target = flipped.is_some();
        let campaign = flipped.unwrap_or(updated);
        let stages = campaigns::fetch_campaign_stages(campaign_id, &mut tx).await?;
        let snapshot = price_snapshot(&stages, campaign.current_qty, unit.base_price);
        let participation = campaigns::insert_participation(campaign_id, user_id, qty, &snapshot, &mut tx).await?;
        tx.commit().await?;
        if reached_target {
            info!("🗃️ Campaign #{campaign_id} reached its target of {}", campaign.target_qty);
        }
        Ok(ParticipationResult { campaign, participation, snapshot, reached_target })
    }

    async fn close_campaign(&self, campaign_id: i64) -> Result<CampaignClosure, ReservationError> {
        let mut tx = self.pool.begin().await?;
        let campaign = campaigns::lock_campaign(campaign_id, &mut tx)
            .await?
            .ok_or(ReservationError::CampaignNotFound(campaign_id))?;
        let previous_status = campaign.status;
        if previous_status == CampaignStatus::Closed {
            tx.commit().await?;
            return Ok(CampaignClosure { campaign, previous_status, changed: false, released_qty: 0 });
        }
        // A campaign that never reached its target gives its stock back.
        let released_qty = if previous_status == CampaignStatus::Open && campaign.current_qty > 0 {
            release_locked_unit(campaign.unit_id, campaign.current_qty, &mut tx).await?;
            campaign.current_qty
        } else {
            0
        };
        let campaign = campaigns::mark_closed(campaign_id, &mut tx).await?;
        tx.commit().await?;
        debug!("🗃️ Campaign #{campaign_id} closed from {previous_status}. {released_qty} units returned to stock.");
        Ok(CampaignClosure { campaign, previous_status, changed: true, released_qty })
    }

    async fn fetch_expired_campaigns(&self, now: DateTime<Utc>) -> Result<Vec<Campaign>, ReservationError> {
        let mut conn = self.pool.acquire().await?;
        let campaigns = campaigns::fetch_expired(now, &mut conn).await?;
        Ok(campaigns)
    }

    async fn fetch_campaign_participants(&self, campaign_id: i64) -> Result<Vec<i64>, ReservationError> {
        let mut conn = self.pool.acquire().await?;
        let ids = campaigns::fetch_participant_ids(campaign_id, &mut conn).await?;
        Ok(ids)
    }
}

/// Capacity check and increment for a unit that the caller has already locked.
async fn advance_locked_unit(
    unit: &SellableUnit,
    qty: i64,
    conn: &mut SqliteConnection,
) -> Result<SellableUnit, ReservationError> {
    let remaining = unit.remaining_stock();
    if qty > remaining {
        return Err(ReservationError::CapacityExceeded { unit_id: unit.id, requested: qty, remaining });
    }
    let unit = units::adjust_cumulative_qty(unit.id, qty, conn).await?;
    Ok(unit)
}

/// Locks the unit (a no-op if this transaction already holds the write lock) and takes `qty` off its cumulative
/// quantity, refusing to go below zero.
async fn release_locked_unit(
    unit_id: i64,
    qty: i64,
    conn: &mut SqliteConnection,
) -> Result<SellableUnit, ReservationError> {
    let unit = units::lock_unit(unit_id, conn).await?.ok_or(ReservationError::UnitNotFound(unit_id))?;
    if unit.cumulative_qty < qty {
        error!(
            "🗃️ Releasing {qty} of unit #{unit_id} would take its cumulative quantity ({}) below zero. Stock \
             bookkeeping is inconsistent.",
            unit.cumulative_qty
        );
        return Err(ReservationError::StockUnderflow { unit_id, requested: qty, cumulative: unit.cumulative_qty });
    }
    let unit = units::adjust_cumulative_qty(unit_id, -qty, conn).await?;
    Ok(unit)
}

//--------------------------------------  PointLedgerManagement  ------------------------------------------------------
impl PointLedgerManagement for SqliteDatabase {
    async fn create_wallet(&self, user_id: i64) -> Result<PointWallet, PointLedgerError> {
        let mut tx = self.pool.begin().await?;
        let wallet = wallets::idempotent_insert(user_id, &mut tx).await?;
        tx.commit().await?;
        Ok(wallet)
    }

    async fn fetch_wallet(&self, user_id: i64) -> Result<Option<PointWallet>, PointLedgerError> {
        let mut conn = self.pool.acquire().await?;
        let wallet = wallets::fetch_wallet(user_id, &mut conn).await?;
        Ok(wallet)
    }

    async fn apply_point_event(&self, event: PointEvent) -> Result<LedgerOutcome, PointLedgerError> {
        let mut tx = self.pool.begin().await?;
        let outcome = wallets::apply_event(&event, &mut tx).await?;
        tx.commit().await?;
        Ok(outcome)
    }

    async fn fetch_ledger_entries(&self, user_id: i64) -> Result<Vec<PointLedgerEntry>, PointLedgerError> {
        let mut conn = self.pool.acquire().await?;
        let entries = wallets::fetch_entries(user_id, &mut conn).await?;
        Ok(entries)
    }
}

//--------------------------------------    OrderManagement    --------------------------------------------------------
impl OrderManagement for SqliteDatabase {
    async fn insert_order(&self, order: NewOrder) -> Result<OrderWithLines, OrderFlowError> {
        if order.lines.is_empty() {
            return Err(OrderFlowError::EmptyOrder);
        }
        let mut tx = self.pool.begin().await?;
        let header = orders::insert_order(&order, &mut tx).await.map_err(|e| match classify(&e) {
            StorageFailure::UniqueViolation => OrderFlowError::OrderAlreadyExists(order.order_no.clone()),
            _ => OrderFlowError::from(e),
        })?;
        let mut lines = Vec::with_capacity(order.lines.len());
        for line in &order.lines {
            lines.push(orders::insert_order_line(header.id, line, &mut tx).await?);
        }
        tx.commit().await?;
        Ok(OrderWithLines { order: header, lines })
    }

    async fn fetch_order(&self, order_id: i64) -> Result<Option<OrderWithLines>, OrderFlowError> {
        let mut conn = self.pool.acquire().await?;
        let Some(order) = orders::fetch_order(order_id, &mut conn).await? else {
            return Ok(None);
        };
        let lines = orders::fetch_order_lines(order.id, &mut conn).await?;
        Ok(Some(OrderWithLines { order, lines }))
    }

    async fn fetch_order_by_order_no(&self, order_no: &str) -> Result<Option<OrderWithLines>, OrderFlowError> {
        let mut conn = self.pool.acquire().await?;
        let Some(order) = orders::fetch_order_by_order_no(order_no, &mut conn).await? else {
            return Ok(None);
        };
        let lines = orders::fetch_order_lines(order.id, &mut conn).await?;
        Ok(Some(OrderWithLines { order, lines }))
    }
}

//--------------------------------------   PaymentManagement   --------------------------------------------------------
impl PaymentManagement for SqliteDatabase {
    async fn insert_ready_payment(&self, payment: NewPayment) -> Result<PaymentWithLines, PaymentFlowError> {
        let mut tx = self.pool.begin().await?;
        let order = orders::lock_order(payment.order_id, &mut tx)
            .await?
            .ok_or(PaymentFlowError::OrderNotFound(payment.order_id))?;
        if order.status != OrderStatusType::Confirmed {
            return Err(PaymentFlowError::OrderNotPayable { order_id: order.id, status: order.status });
        }
        if payment.amount() != order.total_amount || payment.point_amount != order.point_amount {
            return Err(PaymentFlowError::InvalidAmount(format!(
                "Order {} is {} with {} in held points, but the payment is {} cash and {} points.",
                order.order_no, order.total_amount, order.point_amount, payment.cash_amount, payment.point_amount
            )));
        }
        let existing = payments::fetch_payments_for_order(order.id, &mut tx).await?;
        let open = existing.into_iter().find(|p| matches!(p.status, PaymentStatus::Ready | PaymentStatus::PayPending));
        if let Some(open) = open {
            if open.cash_amount == payment.cash_amount && open.point_amount == payment.point_amount {
                debug!("💳️ Order {} already has open payment {}. Reusing it.", order.order_no, open.correlation_id);
                let lines = payments::fetch_payment_lines(open.id, &mut tx).await?;
                tx.commit().await?;
                return Ok(PaymentWithLines { payment: open, lines });
            }
            return Err(PaymentFlowError::PaymentAlreadyOpen(order.id, open.correlation_id));
        }
        let order_lines = orders::fetch_order_lines(order.id, &mut tx).await?;
        let amounts = order_lines.iter().map(|l| (l.id, l.line_amount)).collect::<Vec<_>>();
        payment_rules::validate_payment_lines(&amounts, payment.cash_amount, payment.point_amount, &payment.lines)?;
        let row = payments::insert_payment(&payment, &mut tx).await?;
        let mut lines = Vec::with_capacity(payment.lines.len());
        for line in &payment.lines {
            lines.push(payments::insert_payment_line(row.id, line, &mut tx).await?);
        }
        tx.commit().await?;
        Ok(PaymentWithLines { payment: row, lines })
    }

    async fn fetch_payment(&self, payment_id: i64) -> Result<Option<PaymentWithLines>, PaymentFlowError> {
        let mut conn = self.pool.acquire().await?;
        let Some(payment) = payments::fetch_payment(payment_id, &mut conn).await? else {
            return Ok(None);
        };
        let lines = payments::fetch_payment_lines(payment.id, &mut conn).await?;
        Ok(Some(PaymentWithLines { payment, lines }))
    }

    async fn fetch_payment_by_correlation_id(
        &self,
        correlation_id: &CorrelationId,
    ) -> Result<Option<Payment>, PaymentFlowError> {
        let mut conn = self.pool.acquire().await?;
        let payment = payments::fetch_payment_by_correlation_id(correlation_id, &mut conn).await?;
        Ok(payment)
    }

    async fn fetch_payments_for_order(&self, order_id: i64) -> Result<Vec<Payment>, PaymentFlowError> {
        let mut conn = self.pool.acquire().await?;
        let payments = payments::fetch_payments_for_order(order_id, &mut conn).await?;
        Ok(payments)
    }

    async fn fetch_payment_transactions(&self, payment_id: i64) -> Result<Vec<PaymentTransaction>, PaymentFlowError> {
        let mut conn = self.pool.acquire().await?;
        let records = transactions::fetch_transactions(payment_id, &mut conn).await?;
        Ok(records)
    }

    /// Merges the gateway's view into the payment, in one transaction that holds the payment lock throughout:
    /// 1. The first time the gateway reports `PAID` or `PARTIAL_CANCELLED`, the amount is checked against the cash amount, the
    ///    paid pools are recorded and the held points are burned.
    /// 2. Cash the gateway has cancelled beyond what is known locally (completed or pending refunds) is recorded as a
    ///    gateway-initiated refund and spread over the lines.
    /// 3. A reported cancellation is re-derived from the local refund totals, since points are refunded locally.
    /// 4. The status transition is applied along with its order effect. A failing order gets its stock back once, and
    ///    an unsettled payment's point hold is released.
    /// 5. The provider transaction is appended unless it was seen before.
    async fn reconcile_payment(&self, update: GatewayUpdate) -> Result<ReconcileOutcome, PaymentFlowError> {
        let GatewayUpdate { correlation_id, snapshot, transaction } = update;
        let mut tx = self.pool.begin().await?;
        let mut payment = payments::lock_payment_by_correlation_id(&correlation_id, &mut tx)
            .await?
            .ok_or_else(|| PaymentFlowError::PaymentNotFound(correlation_id.to_string()))?;
        let mut order = orders::fetch_order(payment.order_id, &mut tx)
            .await?
            .ok_or(PaymentFlowError::OrderNotFound(payment.order_id))?;
        let previous_status = payment.status;
        let reported = snapshot.status.to_local();
        // A CANCELLED report before settlement means the payment never went through. It fails like FAILED does.
        let settling = !previous_status.is_settled()
            && !previous_status.is_terminal()
            && matches!(reported, PaymentStatus::Paid | PaymentStatus::PartialCancelled);
        if settling {
            if snapshot.total_amount != payment.cash_amount {
                error!(
                    "💳️ Gateway reports {} for payment {correlation_id}, but its cash amount is {}. Refusing to settle.",
                    snapshot.total_amount, payment.cash_amount
                );
                return Err(PaymentFlowError::AmountMismatch {
                    correlation_id,
                    expected: payment.cash_amount,
                    reported: snapshot.total_amount,
                });
            }
            let paid_at = snapshot.paid_at.unwrap_or_else(Utc::now);
            payment = payments::record_settlement(
                payment.id,
                payment.cash_amount,
                payment.point_amount,
                snapshot.method.as_deref(),
                paid_at,
                &mut tx,
            )
            .await?;
            if payment.point_amount.is_positive() {
                let key = format!("payment:{}:redeem", payment.id);
                let burn = PointEvent::new(order.user_id, PointOperation::Burn { via_hold: true }, payment.point_amount, key);
                wallets::apply_event(&burn, &mut tx).await?;
            }
        }
        let settled_locally = payment.is_settled();

        let mut externally_refunded = Money::zero();
        if settled_locally && !previous_status.is_terminal() {
            let pending = refunds::pending_refunds(payment.id, &mut tx).await?;
            let known = payment.refunded_cash + pending.cash;
            if snapshot.cancelled_amount > known {
                let room = payment.paid_cash - payment.refunded_cash - pending.cash;
                let excess = (snapshot.cancelled_amount - known).min(room);
                if excess < snapshot.cancelled_amount - known {
                    warn!(
                        "💳️ Gateway reports {} cancelled on {correlation_id}, more than the {} cash that was paid.",
                        snapshot.cancelled_amount, payment.paid_cash
                    );
                }
                if excess.is_positive() {
                    let lines = payments::fetch_payment_lines(payment.id, &mut tx).await?;
                    let allocations = spread_over_lines(excess, &lines, &pending)?;
                    payment = record_external_refund(&payment, excess, &allocations, &mut tx).await?;
                    externally_refunded = excess;
                    info!("💳️ Recorded a gateway-initiated refund of {excess} on payment {correlation_id}");
                }
            }
        }

        let effective = match reported {
            PaymentStatus::PartialCancelled | PaymentStatus::Cancelled if settled_locally => {
                status_after_refund(payment.total_refunded, payment.refundable_total())
            },
            status => status,
        };
        let transition = payment_rules::transition(payment.status, effective);
        let mut order_failed = false;
        let mut stock_released = false;
        match transition {
            StatusTransition::Advance(next) => {
                payment = payments::update_status(payment.id, next, &mut tx).await?;
                let effect = order_effect(next);
                if let Some(new_status) = next_order_status(order.status, effect) {
                    order = orders::update_order_status(order.id, new_status, &mut tx).await?;
                    order_failed = new_status == OrderStatusType::Failed;
                }
                if effect == OrderEffect::MarkPaid {
                    if let Some(method) = payment.method.as_deref() {
                        if let Some(updated) = orders::attach_payment_method(order.id, method, &mut tx).await? {
                            order = updated;
                        }
                    }
                }
                if effect == OrderEffect::Fail {
                    if !settled_locally && payment.point_amount.is_positive() {
                        let key = format!("payment:{}:unlock", payment.id);
                        let release = PointEvent::new(order.user_id, PointOperation::Release, payment.point_amount, key);
                        wallets::apply_event(&release, &mut tx).await?;
                    }
                    stock_released = release_order_stock(&order, &mut tx).await?;
                    if let Some(updated) = orders::fetch_order(order.id, &mut tx).await? {
                        order = updated;
                    }
                }
                debug!("💳️ Payment {correlation_id} moved from {previous_status} to {next}");
            },
            StatusTransition::Unchanged => {
                trace!("💳️ Payment {correlation_id} is already {}", payment.status);
            },
            StatusTransition::Ignored => {
                debug!("💳️ Ignoring stale status {reported} for payment {correlation_id}, which is {}", payment.status);
            },
        }

        let transaction = match transaction {
            Some(t) => {
                let record = transactions::idempotent_insert(
                    payment.id,
                    &t,
                    payment.status,
                    snapshot.total_amount,
                    snapshot.cancelled_amount,
                    &mut tx,
                )
                .await?;
                match record {
                    Some(r) => TransactionRecord::Recorded(r),
                    None => {
                        debug!("💳️ Transaction {} was already recorded. Duplicate delivery.", t.provider_transaction_id);
                        TransactionRecord::Duplicate
                    },
                }
            },
            None => TransactionRecord::NotProvided,
        };
        tx.commit().await?;
        Ok(ReconcileOutcome {
            payment,
            previous_status,
            transition,
            order,
            order_failed,
            stock_released,
            externally_refunded,
            transaction,
        })
    }

    async fn begin_refund(&self, request: RefundRequest) -> Result<PendingRefund, PaymentFlowError> {
        let mut tx = self.pool.begin().await?;
        let payment = payments::lock_payment(request.payment_id, &mut tx)
            .await?
            .ok_or_else(|| PaymentFlowError::PaymentNotFound(request.payment_id.to_string()))?;
        let lines = payments::fetch_payment_lines(payment.id, &mut tx).await?;
        let pending = refunds::pending_refunds(payment.id, &mut tx).await?;
        let plan = payment_rules::plan_refund(&payment, &lines, &pending, request.refund_type, &request.lines)?;
        let requested = plan.iter().map(|a| a.amount).sum::<Money>();
        let refund = refunds::insert_refund(
            payment.id,
            request.refund_type,
            RefundStatus::Pending,
            requested,
            &request.reason,
            &mut tx,
        )
        .await?;
        for alloc in &plan {
            refunds::insert_refund_line(refund.id, alloc.payment_line_id, alloc.amount, Money::zero(), &mut tx).await?;
        }
        tx.commit().await?;
        debug!("💳️ Refund #{} of {requested} ({}) opened on payment {}", refund.id, refund.refund_type, payment.correlation_id);
        Ok(PendingRefund { refund, correlation_id: payment.correlation_id })
    }

    async fn complete_refund(
        &self,
        refund_id: i64,
        cancellation: GatewayCancellation,
    ) -> Result<RefundOutcome, PaymentFlowError> {
        let mut tx = self.pool.begin().await?;
        let refund =
            refunds::lock_pending_refund(refund_id, &mut tx).await?.ok_or(PaymentFlowError::RefundNotPending(refund_id))?;
        let payment = payments::lock_payment(refund.payment_id, &mut tx)
            .await?
            .ok_or_else(|| PaymentFlowError::PaymentNotFound(refund.payment_id.to_string()))?;
        let lines = payments::fetch_payment_lines(payment.id, &mut tx).await?;
        let refund_lines = refunds::fetch_refund_lines(refund_id, &mut tx).await?;
        let pending = refunds::pending_refunds(payment.id, &mut tx).await?;
        let cancelled = cancellation.cancelled_amount;

        let pool_room = payment.paid_in(refund.refund_type)
            - payment.refunded_in(refund.refund_type)
            - (pending.in_pool(refund.refund_type) - refund.requested_amount);
        if cancelled > pool_room {
            error!(
                "💳️ Refund #{refund_id} cancelled {cancelled}, but only {pool_room} is left in the {} pool of payment {}",
                refund.refund_type, payment.correlation_id
            );
            return Err(PaymentFlowError::InvariantViolation(format!(
                "Cancelled amount {cancelled} exceeds the {pool_room} left in the pool"
            )));
        }
        let planned = refund_lines
            .iter()
            .map(|rl| {
                let order_line_id = lines.iter().find(|l| l.id == rl.payment_line_id).map(|l| l.order_line_id).unwrap_or(0);
                LineAllocation { payment_line_id: rl.payment_line_id, order_line_id, amount: rl.requested_amount }
            })
            .collect::<Vec<_>>();
        let own_by_line = planned.iter().map(|p| (p.payment_line_id, p.amount)).collect::<HashMap<_, _>>();
        let capacity = lines
            .iter()
            .map(|l| {
                let others = pending.on_line(l.id) - own_by_line.get(&l.id).copied().unwrap_or_default();
                (l.id, l.remaining() - others)
            })
            .collect::<HashMap<_, _>>();
        let allocations = distribute(cancelled, &planned, &capacity)?;
        for alloc in &allocations {
            payments::add_line_refund(alloc.payment_line_id, alloc.amount, &mut tx).await?;
            refunds::set_line_allocation(refund_id, alloc.payment_line_id, alloc.amount, &mut tx).await?;
        }
        let mut payment = if cancelled.is_positive() {
            payments::add_refunded(payment.id, refund.refund_type, cancelled, &mut tx).await?
        } else {
            payment
        };
        let refund = refunds::mark_completed(refund_id, cancelled, cancellation.cancellation_id.as_deref(), &mut tx)
            .await?
            .ok_or(PaymentFlowError::RefundNotPending(refund_id))?;

        let order = orders::fetch_order(payment.order_id, &mut tx)
            .await?
            .ok_or(PaymentFlowError::OrderNotFound(payment.order_id))?;
        if refund.refund_type == RefundType::Point && cancelled.is_positive() {
            let key = format!("refund:{refund_id}");
            let credit = PointEvent::new(order.user_id, PointOperation::Refund, cancelled, key);
            wallets::apply_event(&credit, &mut tx).await?;
        }
        let next = status_after_refund(payment.total_refunded, payment.refundable_total());
        let mut order_failed = false;
        let mut stock_released = false;
        if let StatusTransition::Advance(next) = payment_rules::transition(payment.status, next) {
            payment = payments::update_status(payment.id, next, &mut tx).await?;
            if let Some(new_status) = next_order_status(order.status, order_effect(next)) {
                let order = orders::update_order_status(order.id, new_status, &mut tx).await?;
                order_failed = new_status == OrderStatusType::Failed;
                if order_failed {
                    stock_released = release_order_stock(&order, &mut tx).await?;
                }
            }
        }
        let lines = payments::fetch_payment_lines(payment.id, &mut tx).await?;
        tx.commit().await?;
        info!(
            "💳️ Refund #{refund_id} completed: {cancelled} of {} refunded on payment {}, now {}",
            refund.requested_amount, payment.correlation_id, payment.status
        );
        Ok(RefundOutcome {
            refund,
            payment: PaymentWithLines { payment, lines },
            allocations,
            order_failed,
            stock_released,
        })
    }

    async fn abandon_refund(&self, refund_id: i64, reason: &str) -> Result<Refund, PaymentFlowError> {
        let mut tx = self.pool.begin().await?;
        let refund =
            refunds::mark_failed(refund_id, reason, &mut tx).await?.ok_or(PaymentFlowError::RefundNotPending(refund_id))?;
        tx.commit().await?;
        warn!("💳️ Refund #{refund_id} on payment #{} abandoned: {reason}", refund.payment_id);
        Ok(refund)
    }

    async fn fetch_refunds(&self, payment_id: i64) -> Result<Vec<Refund>, PaymentFlowError> {
        let mut conn = self.pool.acquire().await?;
        let refunds = refunds::fetch_refunds(payment_id, &mut conn).await?;
        Ok(refunds)
    }
}

/// Returns every line's stock to its unit, at most once per order. Returns `false` if the stock was already returned.
async fn release_order_stock(order: &Order, conn: &mut SqliteConnection) -> Result<bool, PaymentFlowError> {
    if orders::claim_stock_release(order.id, conn).await?.is_none() {
        trace!("🗃️ Stock for order [{}] was already released", order.order_no);
        return Ok(false);
    }
    for line in orders::fetch_order_lines(order.id, conn).await? {
        release_locked_unit(line.unit_id, line.ordered_qty, conn).await?;
    }
    debug!("🗃️ Stock for order [{}] returned to inventory", order.order_no);
    Ok(true)
}

async fn record_external_refund(
    payment: &Payment,
    amount: Money,
    allocations: &[LineAllocation],
    conn: &mut SqliteConnection,
) -> Result<Payment, PaymentFlowError> {
    let refund =
        refunds::insert_refund(payment.id, RefundType::Cash, RefundStatus::Pending, amount, GATEWAY_INITIATED_REFUND, conn)
            .await?;
    for alloc in allocations {
        refunds::insert_refund_line(refund.id, alloc.payment_line_id, alloc.amount, alloc.amount, conn).await?;
        payments::add_line_refund(alloc.payment_line_id, alloc.amount, conn).await?;
    }
    refunds::mark_completed(refund.id, amount, None, conn).await?;
    let payment = payments::add_refunded(payment.id, RefundType::Cash, amount, conn).await?;
    Ok(payment)
}

impl SqliteDatabase {
    /// Creates a new database API object using `GBM_DATABASE_URL`
    pub async fn new(max_connections: u32) -> Result<Self, sqlx::Error> {
        let url = db_url();
        SqliteDatabase::new_with_url(url.as_str(), max_connections).await
    }

    pub async fn new_with_url(url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        SqliteDatabase::new_with_options(url, max_connections, DEFAULT_LOCK_WAIT).await
    }

    /// `lock_wait` bounds how long any operation waits for a row lock before failing with a retryable `LockTimeout`.
    pub async fn new_with_options(url: &str, max_connections: u32, lock_wait: Duration) -> Result<Self, sqlx::Error> {
        trace!("🗃️ Creating new database connection pool with url {url}");
        let pool = new_pool(url, max_connections, lock_wait).await?;
        let url = url.to_string();
        Ok(Self { url, pool, lock_wait })
    }

    pub fn url(&self) -> &str {
        self.url.as_str()
    }

    pub fn lock_wait(&self) -> Duration {
        self.lock_wait
    }

    /// Returns a reference to the database connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn run_migrations(&self) -> Result<(), MigrateError> {
        sqlx::migrate!("./src/sqlite/migrations").run(&self.pool).await?;
        info!("🗃️ Migrations complete");
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
