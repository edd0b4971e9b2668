use std::fmt::Display;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db_types::{CorrelationId, Money, PaymentStatus};

#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("The payment gateway is unavailable. {0}")]
    Unavailable(String),
    #[error("The payment gateway rejected the request. {0}")]
    Rejected(String),
    #[error("The payment gateway has no payment {0}.")]
    PaymentNotFound(String),
    #[error("Webhook verification failed. {0}")]
    VerificationFailed(String),
    #[error("Unexpected response from the payment gateway. {0}")]
    InvalidResponse(String),
}

impl GatewayError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Payment status as reported by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GatewayPaymentStatus {
    Ready,
    PayPending,
    VirtualAccountIssued,
    Paid,
    PartialCancelled,
    Cancelled,
    Failed,
}

impl GatewayPaymentStatus {
    pub fn to_local(self) -> PaymentStatus {
        match self {
            Self::Ready => PaymentStatus::Ready,
            Self::PayPending | Self::VirtualAccountIssued => PaymentStatus::PayPending,
            Self::Paid => PaymentStatus::Paid,
            Self::PartialCancelled => PaymentStatus::PartialCancelled,
            Self::Cancelled => PaymentStatus::Cancelled,
            Self::Failed => PaymentStatus::Failed,
        }
    }
}

impl Display for GatewayPaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// The authoritative state of a payment, pulled from the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayPayment {
    pub status: GatewayPaymentStatus,
    pub total_amount: Money,
    pub cancelled_amount: Money,
    pub currency: String,
    pub method: Option<String>,
    pub requested_at: Option<DateTime<Utc>>,
    pub paid_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayCancellation {
    pub cancellation_id: Option<String>,
    pub cancelled_amount: Money,
}

/// The three headers that accompany every webhook delivery.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WebhookHeaders {
    pub msg_id: String,
    pub signature: String,
    pub timestamp: String,
}

/// The minimal content extracted from a verified webhook. Amounts are deliberately absent: a webhook only triggers a
/// pull of the authoritative state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub event_type: String,
    pub correlation_id: CorrelationId,
    pub transaction_id: Option<String>,
    pub status_hint: Option<GatewayPaymentStatus>,
}

/// The narrow contract the engine needs from an external payment provider.
#[allow(async_fn_in_trait)]
pub trait PaymentGateway {
    async fn lookup_by_correlation_id(&self, correlation_id: &CorrelationId) -> Result<GatewayPayment, GatewayError>;

    /// Cancels `amount` of the payment. The returned `cancelled_amount` is authoritative and may differ from the request.
    async fn cancel(
        &self,
        gateway_payment_id: &CorrelationId,
        amount: Money,
        reason: &str,
    ) -> Result<GatewayCancellation, GatewayError>;

    /// Checks the signature over the raw body and parses the event. Must not have side effects.
    fn verify_and_parse_webhook(&self, body: &[u8], headers: &WebhookHeaders) -> Result<WebhookEvent, GatewayError>;
}
