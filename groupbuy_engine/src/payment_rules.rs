//! Payment status machine and refund arithmetic.
//!
//! Everything here is pure. The storage backend calls these functions while it holds the payment lock, with rows it has
//! just re-read, and persists whatever they decide.
use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::{
    db_types::{Money, NewPaymentLine, OrderStatusType, Payment, PaymentLine, PaymentStatus, RefundType},
    traits::PaymentFlowError,
};

//--------------------------------------   Status transitions  --------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusTransition {
    /// The payment moves to the given status.
    Advance(PaymentStatus),
    /// The reported status is the current one.
    Unchanged,
    /// The reported status is stale or would move the payment backwards.
    Ignored,
}

/// Decides how a payment in `current` reacts to the gateway reporting `reported`.
///
/// `FAILED` is only reachable before settlement. `CANCELLED` and `FAILED` are terminal. Once settled, a payment never
/// returns to `READY`, `PAY_PENDING` or `PAID`.
pub fn transition(current: PaymentStatus, reported: PaymentStatus) -> StatusTransition {
    use PaymentStatus::*;
    if current == reported {
        return StatusTransition::Unchanged;
    }
    if current.is_terminal() {
        return StatusTransition::Ignored;
    }
    let allowed = match reported {
        Ready => false,
        PayPending => current == Ready,
        Paid | Failed => matches!(current, Ready | PayPending),
        PartialCancelled => matches!(current, Ready | PayPending | Paid),
        Cancelled => true,
    };
    if allowed {
        StatusTransition::Advance(reported)
    } else {
        StatusTransition::Ignored
    }
}

/// What a payment status means for its order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderEffect {
    /// Back to (or stay at) `CONFIRMED`.
    AwaitPayment,
    MarkPaid,
    /// `FAILED`, with the order's stock returned.
    Fail,
}

pub fn order_effect(status: PaymentStatus) -> OrderEffect {
    match status {
        PaymentStatus::Ready | PaymentStatus::PayPending => OrderEffect::AwaitPayment,
        PaymentStatus::Paid | PaymentStatus::PartialCancelled => OrderEffect::MarkPaid,
        PaymentStatus::Cancelled | PaymentStatus::Failed => OrderEffect::Fail,
    }
}

/// The order status after applying `effect`, or `None` when the order stays where it is.
pub fn next_order_status(current: OrderStatusType, effect: OrderEffect) -> Option<OrderStatusType> {
    match (effect, current) {
        (_, s) if s.is_terminal() => None,
        (OrderEffect::AwaitPayment, _) => None,
        (OrderEffect::MarkPaid, OrderStatusType::Confirmed) => Some(OrderStatusType::Paid),
        (OrderEffect::MarkPaid, _) => None,
        (OrderEffect::Fail, _) => Some(OrderStatusType::Failed),
    }
}

/// Status once `total_refunded` of a settled payment has been returned.
pub fn status_after_refund(total_refunded: Money, refundable_total: Money) -> PaymentStatus {
    if total_refunded >= refundable_total {
        PaymentStatus::Cancelled
    } else if total_refunded.is_positive() {
        PaymentStatus::PartialCancelled
    } else {
        PaymentStatus::Paid
    }
}

//--------------------------------------   Payment line splits --------------------------------------------------------

/// Splits a payment over the order lines, pro rata by line amount.
///
/// Each line's point share is `floor(point * line / total)`. The rounding remainder goes one unit at a time to the
/// earliest lines that still have room, and the rest of each line is cash.
pub fn split_payment_lines(
    order_lines: &[(i64, Money)],
    cash: Money,
    point: Money,
) -> Result<Vec<NewPaymentLine>, PaymentFlowError> {
    let total = order_lines.iter().map(|(_, amount)| *amount).sum::<Money>();
    if !total.is_positive() {
        return Err(PaymentFlowError::InvalidAmount("The order has no payable amount.".into()));
    }
    if cash.is_negative() || point.is_negative() || cash + point != total {
        return Err(PaymentFlowError::InvalidAmount(format!(
            "Cash {cash} and points {point} do not add up to the order total {total}."
        )));
    }
    let mut shares = order_lines
        .iter()
        .map(|(_, amount)| {
            let share = i128::from(point.value()) * i128::from(amount.value()) / i128::from(total.value());
            Money::from(share as i64)
        })
        .collect::<Vec<_>>();
    let mut remainder = point - shares.iter().copied().sum::<Money>();
    for (share, (_, amount)) in shares.iter_mut().zip(order_lines) {
        if !remainder.is_positive() {
            break;
        }
        if *share < *amount {
            *share += Money::from(1);
            remainder -= Money::from(1);
        }
    }
    Ok(order_lines
        .iter()
        .zip(shares)
        .map(|((order_line_id, amount), point_amount)| NewPaymentLine {
            order_line_id: *order_line_id,
            cash_amount: *amount - point_amount,
            point_amount,
        })
        .collect())
}

/// Checks a caller-supplied split. Every order line must appear exactly once, each line's cash and point parts must add
/// up to the line amount, and the parts must add up to the payment's cash and point amounts.
pub fn validate_payment_lines(
    order_lines: &[(i64, Money)],
    cash: Money,
    point: Money,
    lines: &[NewPaymentLine],
) -> Result<(), PaymentFlowError> {
    let expected = order_lines.iter().copied().collect::<HashMap<i64, Money>>();
    if lines.len() != expected.len() {
        return Err(PaymentFlowError::InvalidAllocation(format!(
            "{} allocations were given for {} order lines.",
            lines.len(),
            expected.len()
        )));
    }
    let mut seen = HashSet::new();
    for line in lines {
        let amount = expected.get(&line.order_line_id).ok_or(PaymentFlowError::PaymentLineNotFound(line.order_line_id))?;
        if !seen.insert(line.order_line_id) {
            return Err(PaymentFlowError::InvalidAllocation(format!(
                "Order line {} is allocated twice.",
                line.order_line_id
            )));
        }
        if line.cash_amount.is_negative() || line.point_amount.is_negative() {
            return Err(PaymentFlowError::InvalidAllocation(format!(
                "Order line {} has a negative allocation.",
                line.order_line_id
            )));
        }
        if line.cash_amount + line.point_amount != *amount {
            return Err(PaymentFlowError::InvalidAllocation(format!(
                "Order line {} is worth {amount}, but {} cash and {} points were allocated.",
                line.order_line_id, line.cash_amount, line.point_amount
            )));
        }
    }
    let cash_sum = lines.iter().map(|l| l.cash_amount).sum::<Money>();
    let point_sum = lines.iter().map(|l| l.point_amount).sum::<Money>();
    if cash_sum != cash || point_sum != point {
        return Err(PaymentFlowError::InvalidAllocation(format!(
            "Lines allocate {cash_sum} cash and {point_sum} points, but the payment is {cash} cash and {point} points."
        )));
    }
    Ok(())
}

//--------------------------------------        Refunds        --------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundLineRequest {
    pub order_line_id: i64,
    pub amount: Money,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineAllocation {
    pub payment_line_id: i64,
    pub order_line_id: i64,
    pub amount: Money,
}

/// Amounts already promised to refunds that are waiting on the gateway.
#[derive(Debug, Clone, Default)]
pub struct PendingRefunds {
    pub cash: Money,
    pub point: Money,
    pub by_line: HashMap<i64, Money>,
}

impl PendingRefunds {
    pub fn in_pool(&self, refund_type: RefundType) -> Money {
        match refund_type {
            RefundType::Cash => self.cash,
            RefundType::Point => self.point,
        }
    }

    pub fn on_line(&self, payment_line_id: i64) -> Money {
        self.by_line.get(&payment_line_id).copied().unwrap_or_default()
    }
}

/// Validates a refund request against freshly locked payment state and maps it onto payment lines.
///
/// Each line may give back at most its gross minus what was already refunded or is pending on it. The request as a
/// whole may not exceed what is left in the chosen pool (cash or point).
pub fn plan_refund(
    payment: &Payment,
    lines: &[PaymentLine],
    pending: &PendingRefunds,
    refund_type: RefundType,
    requests: &[RefundLineRequest],
) -> Result<Vec<LineAllocation>, PaymentFlowError> {
    if !payment.status.is_settled() || payment.status.is_terminal() {
        return Err(PaymentFlowError::PaymentNotRefundable { payment_id: payment.id, status: payment.status });
    }
    if requests.is_empty() {
        return Err(PaymentFlowError::InvalidRefundAmount("At least one line must be refunded.".into()));
    }
    let mut seen = HashSet::new();
    let mut plan = Vec::with_capacity(requests.len());
    for req in requests {
        if !req.amount.is_positive() {
            return Err(PaymentFlowError::InvalidRefundAmount(format!(
                "Refund for order line {} must be positive, but was {}.",
                req.order_line_id, req.amount
            )));
        }
        if !seen.insert(req.order_line_id) {
            return Err(PaymentFlowError::InvalidRefundAmount(format!(
                "Order line {} appears more than once.",
                req.order_line_id
            )));
        }
        let line = lines
            .iter()
            .find(|l| l.order_line_id == req.order_line_id)
            .ok_or(PaymentFlowError::PaymentLineNotFound(req.order_line_id))?;
        let available = line.remaining() - pending.on_line(line.id);
        if req.amount > available {
            return Err(PaymentFlowError::RefundExceedsAvailable {
                scope: format!("order line {}", req.order_line_id),
                requested: req.amount,
                available,
            });
        }
        plan.push(LineAllocation { payment_line_id: line.id, order_line_id: line.order_line_id, amount: req.amount });
    }
    let requested = plan.iter().map(|a| a.amount).sum::<Money>();
    let available =
        payment.paid_in(refund_type) - payment.refunded_in(refund_type) - pending.in_pool(refund_type);
    if requested > available {
        return Err(PaymentFlowError::RefundExceedsAvailable {
            scope: format!("the {refund_type} pool of payment {}", payment.id),
            requested,
            available,
        });
    }
    Ok(plan)
}

/// Distributes an authoritative cancelled amount over planned allocations.
///
/// Lines are filled in request order up to what was requested for them. Anything the gateway cancelled beyond the
/// request spills onto the same lines, bounded by `capacity` (the line's unrefunded amount). An amount that still does
/// not fit means local and gateway state disagree.
pub fn distribute(
    cancelled: Money,
    planned: &[LineAllocation],
    capacity: &HashMap<i64, Money>,
) -> Result<Vec<LineAllocation>, PaymentFlowError> {
    if cancelled.is_negative() {
        return Err(PaymentFlowError::InvariantViolation(format!("Negative cancelled amount {cancelled}")));
    }
    let mut left = cancelled;
    let mut result = planned
        .iter()
        .map(|p| {
            let amount = p.amount.min(left);
            left -= amount;
            LineAllocation { amount, ..*p }
        })
        .collect::<Vec<_>>();
    for alloc in result.iter_mut() {
        if !left.is_positive() {
            break;
        }
        let room = capacity.get(&alloc.payment_line_id).copied().unwrap_or_default() - alloc.amount;
        let extra = room.max(Money::zero()).min(left);
        alloc.amount += extra;
        left -= extra;
    }
    if left.is_positive() {
        return Err(PaymentFlowError::InvariantViolation(format!(
            "{left} of the cancelled {cancelled} could not be allocated to any line"
        )));
    }
    result.retain(|a| a.amount.is_positive());
    Ok(result)
}

/// Spreads an amount the gateway refunded on its own over the payment's lines, in line order.
pub fn spread_over_lines(
    amount: Money,
    lines: &[PaymentLine],
    pending: &PendingRefunds,
) -> Result<Vec<LineAllocation>, PaymentFlowError> {
    let capacity = lines
        .iter()
        .map(|l| (l.id, (l.remaining() - pending.on_line(l.id)).max(Money::zero())))
        .collect::<HashMap<_, _>>();
    let planned = lines
        .iter()
        .map(|l| LineAllocation {
            payment_line_id: l.id,
            order_line_id: l.order_line_id,
            amount: capacity.get(&l.id).copied().unwrap_or_default(),
        })
        .collect::<Vec<_>>();
    distribute(amount, &planned, &capacity)
}
