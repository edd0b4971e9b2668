use serde::{Deserialize, Serialize};

use crate::{
    db_types::{
        Campaign,
        CampaignParticipation,
        CampaignStatus,
        CorrelationId,
        Money,
        NewPaymentTransaction,
        Order,
        Payment,
        PaymentStatus,
        PaymentTransaction,
        PaymentWithLines,
        PointLedgerEntry,
        Refund,
        RefundType,
        SellableUnit,
        WalletSnapshot,
    },
    payment_rules::{LineAllocation, RefundLineRequest, StatusTransition},
    stages::PriceSnapshot,
    traits::GatewayPayment,
};

/// The result of a successful stock reservation. `unit` reflects the post-increment state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reservation {
    pub unit: SellableUnit,
    pub qty: i64,
    pub snapshot: PriceSnapshot,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipationResult {
    pub campaign: Campaign,
    pub participation: CampaignParticipation,
    pub snapshot: PriceSnapshot,
    /// True only for the participation that moved the campaign from `OPEN` to `SUCCESS`.
    pub reached_target: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignClosure {
    pub campaign: Campaign,
    pub previous_status: CampaignStatus,
    /// False when the campaign was already closed.
    pub changed: bool,
    /// Stock returned to the unit because the campaign closed without reaching its target.
    pub released_qty: i64,
}

impl CampaignClosure {
    pub fn succeeded(&self) -> bool {
        self.previous_status == CampaignStatus::Success
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerOutcome {
    pub wallet: WalletSnapshot,
    /// The entry recorded for this idempotency key. On replay this is the original entry.
    pub entry: PointLedgerEntry,
    pub replayed: bool,
}

/// The gateway's view of a payment, to be merged into local state.
#[derive(Debug, Clone)]
pub struct GatewayUpdate {
    pub correlation_id: CorrelationId,
    pub snapshot: GatewayPayment,
    pub transaction: Option<NewPaymentTransaction>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionRecord {
    Recorded(PaymentTransaction),
    /// The provider transaction id was seen before. Nothing was appended.
    Duplicate,
    NotProvided,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileOutcome {
    pub payment: Payment,
    pub previous_status: PaymentStatus,
    pub transition: StatusTransition,
    pub order: Order,
    /// The order moved to `FAILED` during this reconciliation.
    pub order_failed: bool,
    /// The order's stock was returned during this reconciliation.
    pub stock_released: bool,
    /// Cash the gateway had cancelled that was not yet known locally, and was allocated to lines here.
    pub externally_refunded: Money,
    pub transaction: TransactionRecord,
}

impl ReconcileOutcome {
    /// This reconciliation settled the payment.
    pub fn settled(&self) -> bool {
        !self.previous_status.is_settled() && self.payment.is_settled()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundRequest {
    pub payment_id: i64,
    pub refund_type: RefundType,
    pub lines: Vec<RefundLineRequest>,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingRefund {
    pub refund: Refund,
    pub correlation_id: CorrelationId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundOutcome {
    pub refund: Refund,
    pub payment: PaymentWithLines,
    pub allocations: Vec<LineAllocation>,
    pub order_failed: bool,
    pub stock_released: bool,
}
