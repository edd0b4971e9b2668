//! Data types shared by the engine APIs and the storage backends.
//!
//! Row types derive `FromRow` and map one-to-one onto the tables in `sqlite/migrations`. Status enums are stored as
//! upper-case text.
use std::{fmt::Display, str::FromStr};

use chrono::{DateTime, Utc};
pub use gbm_common::Money;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[error("Invalid value for {kind}: {value}")]
pub struct ConversionError {
    kind: &'static str,
    value: String,
}

impl ConversionError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self { kind, value: value.to_string() }
    }
}

//--------------------------------------    CampaignStatus    ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CampaignStatus {
    /// Accepting participations, target not yet reached.
    Open,
    /// The target quantity was reached. Still accepting participations until closed.
    Success,
    /// Terminal.
    Closed,
}

impl Display for CampaignStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CampaignStatus::Open => write!(f, "OPEN"),
            CampaignStatus::Success => write!(f, "SUCCESS"),
            CampaignStatus::Closed => write!(f, "CLOSED"),
        }
    }
}

//--------------------------------------    OrderStatusType   ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatusType {
    /// Stock is reserved and prices are frozen. Awaiting payment.
    Confirmed,
    /// The gateway confirmed the payment.
    Paid,
    /// Payment failed or was fully cancelled. Stock has been returned.
    Failed,
    Cancelled,
    Refunded,
}

impl OrderStatusType {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed | Self::Cancelled | Self::Refunded)
    }
}

impl Display for OrderStatusType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderStatusType::Confirmed => write!(f, "CONFIRMED"),
            OrderStatusType::Paid => write!(f, "PAID"),
            OrderStatusType::Failed => write!(f, "FAILED"),
            OrderStatusType::Cancelled => write!(f, "CANCELLED"),
            OrderStatusType::Refunded => write!(f, "REFUNDED"),
        }
    }
}

impl FromStr for OrderStatusType {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CONFIRMED" => Ok(Self::Confirmed),
            "PAID" => Ok(Self::Paid),
            "FAILED" => Ok(Self::Failed),
            "CANCELLED" => Ok(Self::Cancelled),
            "REFUNDED" => Ok(Self::Refunded),
            _ => Err(ConversionError::new("order status", s)),
        }
    }
}

//--------------------------------------     PaymentStatus    ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Ready,
    PayPending,
    Paid,
    PartialCancelled,
    Cancelled,
    Failed,
}

impl PaymentStatus {
    /// Statuses that follow a settlement. `CANCELLED` is also reached by payments that never settled, so use
    /// [`Payment::is_settled`] when the payment itself is at hand.
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Paid | Self::PartialCancelled | Self::Cancelled)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Failed)
    }
}

impl Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PaymentStatus::Ready => "READY",
            PaymentStatus::PayPending => "PAY_PENDING",
            PaymentStatus::Paid => "PAID",
            PaymentStatus::PartialCancelled => "PARTIAL_CANCELLED",
            PaymentStatus::Cancelled => "CANCELLED",
            PaymentStatus::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

impl FromStr for PaymentStatus {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "READY" => Ok(Self::Ready),
            "PAY_PENDING" => Ok(Self::PayPending),
            "PAID" => Ok(Self::Paid),
            "PARTIAL_CANCELLED" => Ok(Self::PartialCancelled),
            "CANCELLED" => Ok(Self::Cancelled),
            "FAILED" => Ok(Self::Failed),
            _ => Err(ConversionError::new("payment status", s)),
        }
    }
}

//--------------------------------------    LedgerEntryType   ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerEntryType {
    /// `balance += amount`
    Earn,
    /// `hold += amount`
    Lock,
    /// `hold -= amount`
    Unlock,
    /// `balance -= amount` and `hold -= amount`. Settles a previous hold.
    Redeem,
    /// `balance += amount`. Returns points that were spent on a refunded payment.
    Refund,
    /// `balance -= amount` from the available portion. Administrative deduction.
    Adjust,
}

impl Display for LedgerEntryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LedgerEntryType::Earn => "EARN",
            LedgerEntryType::Lock => "LOCK",
            LedgerEntryType::Unlock => "UNLOCK",
            LedgerEntryType::Redeem => "REDEEM",
            LedgerEntryType::Refund => "REFUND",
            LedgerEntryType::Adjust => "ADJUST",
        };
        f.write_str(s)
    }
}

//--------------------------------------   RefundType/Status  ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RefundType {
    Cash,
    Point,
}

impl Display for RefundType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RefundType::Cash => write!(f, "CASH"),
            RefundType::Point => write!(f, "POINT"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RefundStatus {
    /// Validated and counted against the refundable pools, waiting on the gateway.
    Pending,
    Completed,
    /// The gateway rejected the cancellation. The reserved amounts were returned to the pools.
    Failed,
}

//--------------------------------------     CorrelationId    ---------------------------------------------------------
/// The merchant-side reference shared with the gateway's payment object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
#[sqlx(transparent)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    pub fn new<S: Into<String>>(s: S) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for CorrelationId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for CorrelationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

//--------------------------------------     DiscountStage    ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct DiscountStage {
    pub level: i64,
    pub threshold_qty: i64,
    pub discount_percent: i64,
}

impl DiscountStage {
    pub fn new(level: i64, threshold_qty: i64, discount_percent: i64) -> Self {
        Self { level, threshold_qty, discount_percent }
    }

    /// The implicit tier that applies below the first threshold.
    pub fn base() -> Self {
        Self { level: 0, threshold_qty: 0, discount_percent: 0 }
    }
}

//--------------------------------------     SellableUnit     ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct SellableUnit {
    pub id: i64,
    pub name: String,
    pub base_price: Money,
    pub stock: i64,
    pub cumulative_qty: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SellableUnit {
    pub fn remaining_stock(&self) -> i64 {
        self.stock - self.cumulative_qty
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSellableUnit {
    pub name: String,
    pub base_price: Money,
    pub stock: i64,
    #[serde(default)]
    pub stages: Vec<DiscountStage>,
}

/// A unit together with its discount schedule, sorted by ascending threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitForPricing {
    pub unit: SellableUnit,
    pub stages: Vec<DiscountStage>,
}

//--------------------------------------       Campaign       ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct Campaign {
    pub id: i64,
    pub unit_id: i64,
    pub target_qty: i64,
    pub current_qty: i64,
    pub status: CampaignStatus,
    pub max_discount_percent: i64,
    pub deadline: DateTime<Utc>,
    pub succeeded_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCampaign {
    pub unit_id: i64,
    pub target_qty: i64,
    pub stage_count: i64,
    pub max_discount_percent: i64,
    pub deadline: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignWithStages {
    pub campaign: Campaign,
    pub stages: Vec<DiscountStage>,
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct CampaignParticipation {
    pub id: i64,
    pub campaign_id: i64,
    pub user_id: i64,
    pub qty: i64,
    pub level_snapshot: i64,
    pub discount_percent_snapshot: i64,
    pub unit_price_snapshot: Money,
    pub created_at: DateTime<Utc>,
}

//--------------------------------------        Order         ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    pub order_no: String,
    pub user_id: i64,
    pub status: OrderStatusType,
    pub total_amount: Money,
    pub point_amount: Money,
    pub payment_method: Option<String>,
    pub stock_released: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct OrderLine {
    pub id: i64,
    pub order_id: i64,
    pub unit_id: i64,
    pub ordered_qty: i64,
    pub level_snapshot: i64,
    pub discount_percent_snapshot: i64,
    pub unit_price_snapshot: Money,
    pub line_amount: Money,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderWithLines {
    pub order: Order,
    pub lines: Vec<OrderLine>,
}

/// A priced line, ready to be persisted. Produced by a successful reservation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrderLine {
    pub unit_id: i64,
    pub ordered_qty: i64,
    pub level_snapshot: i64,
    pub discount_percent_snapshot: i64,
    pub unit_price_snapshot: Money,
}

impl NewOrderLine {
    pub fn line_amount(&self) -> Money {
        self.unit_price_snapshot * self.ordered_qty
    }
}

#[derive(Debug, Clone)]
pub struct NewOrder {
    pub order_no: String,
    pub user_id: i64,
    pub point_amount: Money,
    pub lines: Vec<NewOrderLine>,
}

impl NewOrder {
    pub fn total_amount(&self) -> Money {
        self.lines.iter().map(NewOrderLine::line_amount).sum()
    }
}

//--------------------------------------      PointWallet     ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct PointWallet {
    pub user_id: i64,
    pub balance: Money,
    pub hold: Money,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PointWallet {
    pub fn available(&self) -> Money {
        self.balance - self.hold
    }

    pub fn snapshot(&self) -> WalletSnapshot {
        WalletSnapshot { user_id: self.user_id, balance: self.balance, hold: self.hold, available: self.available() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletSnapshot {
    pub user_id: i64,
    pub balance: Money,
    pub hold: Money,
    pub available: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct PointLedgerEntry {
    pub id: i64,
    pub user_id: i64,
    pub entry_type: LedgerEntryType,
    pub amount: Money,
    pub delta: Money,
    pub before_available: Money,
    pub after_available: Money,
    pub balance_after: Money,
    pub hold_after: Money,
    pub idempotency_key: String,
    pub created_at: DateTime<Utc>,
}

impl PointLedgerEntry {
    /// The wallet right after this entry was applied.
    pub fn snapshot(&self) -> WalletSnapshot {
        WalletSnapshot {
            user_id: self.user_id,
            balance: self.balance_after,
            hold: self.hold_after,
            available: self.balance_after - self.hold_after,
        }
    }
}

//--------------------------------------        Payment       ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct Payment {
    pub id: i64,
    pub order_id: i64,
    pub correlation_id: CorrelationId,
    pub status: PaymentStatus,
    pub amount: Money,
    pub cash_amount: Money,
    pub point_amount: Money,
    pub paid_cash: Money,
    pub paid_point: Money,
    pub refunded_cash: Money,
    pub refunded_point: Money,
    pub total_refunded: Money,
    pub method: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    /// The total that can ever be refunded on this payment.
    /// True once the gateway (or the point ledger, for points-only payments) has captured the payment.
    pub fn is_settled(&self) -> bool {
        self.paid_at.is_some()
    }

    pub fn refundable_total(&self) -> Money {
        self.paid_cash + self.paid_point
    }

    /// The settled amount of the given pool.
    pub fn paid_in(&self, refund_type: RefundType) -> Money {
        match refund_type {
            RefundType::Cash => self.paid_cash,
            RefundType::Point => self.paid_point,
        }
    }

    pub fn refunded_in(&self, refund_type: RefundType) -> Money {
        match refund_type {
            RefundType::Cash => self.refunded_cash,
            RefundType::Point => self.refunded_point,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct PaymentLine {
    pub id: i64,
    pub payment_id: i64,
    pub order_line_id: i64,
    pub cash_amount: Money,
    pub point_amount: Money,
    pub refunded_amount: Money,
}

impl PaymentLine {
    pub fn gross(&self) -> Money {
        self.cash_amount + self.point_amount
    }

    pub fn remaining(&self) -> Money {
        self.gross() - self.refunded_amount
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentWithLines {
    pub payment: Payment,
    pub lines: Vec<PaymentLine>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPaymentLine {
    pub order_line_id: i64,
    pub cash_amount: Money,
    pub point_amount: Money,
}

#[derive(Debug, Clone)]
pub struct NewPayment {
    pub order_id: i64,
    pub correlation_id: CorrelationId,
    pub cash_amount: Money,
    pub point_amount: Money,
    pub lines: Vec<NewPaymentLine>,
}

impl NewPayment {
    pub fn amount(&self) -> Money {
        self.cash_amount + self.point_amount
    }
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct PaymentTransaction {
    pub id: i64,
    pub payment_id: i64,
    pub provider: String,
    pub provider_transaction_id: String,
    pub status: PaymentStatus,
    pub total_amount: Money,
    pub cancelled_amount: Money,
    pub created_at: DateTime<Utc>,
}

/// A provider transaction to be recorded against a payment during reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPaymentTransaction {
    pub provider: String,
    pub provider_transaction_id: String,
}

//--------------------------------------        Refund        ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct Refund {
    pub id: i64,
    pub payment_id: i64,
    pub refund_type: RefundType,
    pub status: RefundStatus,
    pub requested_amount: Money,
    pub cancelled_amount: Money,
    pub cancellation_id: Option<String>,
    pub reason: String,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct RefundLine {
    pub id: i64,
    pub refund_id: i64,
    pub payment_line_id: i64,
    pub requested_amount: Money,
    pub allocated_amount: Money,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn status_strings() {
        assert_eq!(PaymentStatus::PartialCancelled.to_string(), "PARTIAL_CANCELLED");
        assert_eq!("pay_pending".parse::<PaymentStatus>().unwrap(), PaymentStatus::PayPending);
        assert!("SETTLED".parse::<PaymentStatus>().is_err());
        assert_eq!("paid".parse::<OrderStatusType>().unwrap(), OrderStatusType::Paid);
        let json = serde_json::to_string(&PaymentStatus::PayPending).unwrap();
        assert_eq!(json, "\"PAY_PENDING\"");
    }

    #[test]
    fn payment_line_arithmetic() {
        let line = PaymentLine {
            id: 1,
            payment_id: 1,
            order_line_id: 1,
            cash_amount: Money::from(7_000),
            point_amount: Money::from(3_000),
            refunded_amount: Money::from(4_000),
        };
        assert_eq!(line.gross(), Money::from(10_000));
        assert_eq!(line.remaining(), Money::from(6_000));
    }
}
