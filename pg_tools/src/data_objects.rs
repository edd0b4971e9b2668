use std::fmt::Display;

use chrono::{DateTime, Utc};
use gbm_common::Money;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PgPaymentStatus {
    Ready,
    PayPending,
    VirtualAccountIssued,
    Paid,
    PartialCancelled,
    Cancelled,
    Failed,
}

impl Display for PgPaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Ready => "READY",
            Self::PayPending => "PAY_PENDING",
            Self::VirtualAccountIssued => "VIRTUAL_ACCOUNT_ISSUED",
            Self::Paid => "PAID",
            Self::PartialCancelled => "PARTIAL_CANCELLED",
            Self::Cancelled => "CANCELLED",
            Self::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayAmount {
    pub total: Money,
    #[serde(default)]
    pub cancelled: Money,
    #[serde(default)]
    pub paid: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayMethod {
    #[serde(rename = "type")]
    pub method_type: String,
}

impl GatewayMethod {
    /// The method type without its `PaymentMethod` prefix, in upper snake case. `PaymentMethodEasyPay` becomes
    /// `EASY_PAY`.
    pub fn name(&self) -> String {
        let bare = self.method_type.strip_prefix("PaymentMethod").unwrap_or(&self.method_type);
        let mut name = String::with_capacity(bare.len() + 4);
        for (i, c) in bare.chars().enumerate() {
            if c.is_uppercase() && i > 0 {
                name.push('_');
            }
            name.push(c.to_ascii_uppercase());
        }
        name
    }
}

/// A payment object as returned by `GET /payments/{paymentId}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PgPayment {
    pub id: String,
    pub status: PgPaymentStatus,
    #[serde(default)]
    pub transaction_id: Option<String>,
    pub amount: GatewayAmount,
    pub currency: String,
    #[serde(default)]
    pub method: Option<GatewayMethod>,
    #[serde(default)]
    pub requested_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub paid_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelPaymentRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_id: Option<String>,
    pub amount: Money,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentCancellation {
    pub id: String,
    pub status: String,
    pub total_amount: Money,
    #[serde(default)]
    pub cancelled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelPaymentResponse {
    pub cancellation: PaymentCancellation,
}

/// The body of a webhook delivery. It carries identifiers only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookPayload {
    #[serde(rename = "type")]
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    pub data: WebhookData,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookData {
    #[serde(default)]
    pub store_id: Option<String>,
    pub payment_id: String,
    #[serde(default)]
    pub transaction_id: Option<String>,
    #[serde(default)]
    pub cancellation_id: Option<String>,
}
