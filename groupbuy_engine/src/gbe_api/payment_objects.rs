use serde::{Deserialize, Serialize};

use crate::{
    db_types::{CorrelationId, Money, NewPaymentLine, PaymentTransaction, PaymentWithLines, Refund, RefundType},
    payment_rules::RefundLineRequest,
    traits::ReconcileOutcome,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePaymentRequest {
    pub order_id: i64,
    pub cash_amount: Money,
    #[serde(default)]
    pub point_amount: Money,
    /// Explicit per-line split. When absent, the payment is split pro rata over the order lines.
    #[serde(default)]
    pub allocation: Option<Vec<NewPaymentLine>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelByLinesRequest {
    pub payment_id: i64,
    pub lines: Vec<RefundLineRequest>,
    pub reason: String,
    pub refund_type: RefundType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WebhookOutcome {
    Reconciled(ReconcileOutcome),
    /// The event refers to a payment this system does not know. It was dropped.
    UnknownPayment(CorrelationId),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentDetails {
    #[serde(flatten)]
    pub payment: PaymentWithLines,
    pub transactions: Vec<PaymentTransaction>,
    pub refunds: Vec<Refund>,
}
