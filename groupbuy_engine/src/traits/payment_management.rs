use std::time::Duration;

use thiserror::Error;

use crate::{
    db_types::{
        CorrelationId,
        Money,
        NewPayment,
        OrderStatusType,
        Payment,
        PaymentStatus,
        PaymentTransaction,
        PaymentWithLines,
        Refund,
    },
    traits::{
        storage_error_conversion,
        GatewayCancellation,
        GatewayError,
        GatewayUpdate,
        OrderFlowError,
        OrderManagement,
        PendingRefund,
        PointLedgerError,
        ReconcileOutcome,
        RefundOutcome,
        RefundRequest,
        ReservationError,
    },
};

#[derive(Debug, Clone, Error)]
pub enum PaymentFlowError {
    #[error("Order {0} does not exist.")]
    OrderNotFound(i64),
    #[error("Order {order_id} is {status} and cannot take a new payment.")]
    OrderNotPayable { order_id: i64, status: OrderStatusType },
    #[error("Order {0} already has a payment in progress ({1}).")]
    PaymentAlreadyOpen(i64, CorrelationId),
    #[error("No payment found for {0}.")]
    PaymentNotFound(String),
    #[error("Invalid payment amount. {0}")]
    InvalidAmount(String),
    #[error("Invalid payment line allocation. {0}")]
    InvalidAllocation(String),
    #[error("The gateway reports {reported} for payment {correlation_id}, but {expected} was expected.")]
    AmountMismatch { correlation_id: CorrelationId, expected: Money, reported: Money },
    #[error("Webhook verification failed. {0}")]
    WebhookVerificationFailed(String),
    #[error("{0}")]
    Gateway(#[from] GatewayError),
    #[error("Invalid refund request. {0}")]
    InvalidRefundAmount(String),
    #[error("Refund of {requested} on {scope} exceeds the {available} still refundable.")]
    RefundExceedsAvailable { scope: String, requested: Money, available: Money },
    #[error("Payment {payment_id} is {status} and cannot be refunded.")]
    PaymentNotRefundable { payment_id: i64, status: PaymentStatus },
    #[error("Order line {0} is not part of this payment.")]
    PaymentLineNotFound(i64),
    #[error("Refund {0} does not exist or is no longer pending.")]
    RefundNotPending(i64),
    #[error("{0}")]
    Order(#[from] OrderFlowError),
    #[error("{0}")]
    Reservation(#[from] ReservationError),
    #[error("{0}")]
    Points(#[from] PointLedgerError),
    #[error("Payment bookkeeping is inconsistent. {0}")]
    InvariantViolation(String),
    #[error("Timed out waiting for the payment lock.")]
    LockTimeout,
    #[error("The payment lock was contended. Retry after a short backoff.")]
    LockConflict,
    #[error("Database error: {0}")]
    DatabaseError(String),
}

storage_error_conversion!(PaymentFlowError);

impl PaymentFlowError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::LockTimeout | Self::LockConflict => true,
            Self::Gateway(e) => e.is_retryable(),
            Self::Order(e) => e.is_retryable(),
            Self::Reservation(e) => e.is_retryable(),
            Self::Points(e) => e.is_retryable(),
            _ => false,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::LockTimeout => Some(Duration::from_secs(1)),
            Self::LockConflict => Some(Duration::from_secs(2)),
            Self::Gateway(e) if e.is_retryable() => Some(Duration::from_secs(5)),
            Self::Order(e) => e.retry_after(),
            Self::Reservation(e) => e.retry_after(),
            Self::Points(e) => e.retry_after(),
            _ => None,
        }
    }

    pub fn is_invariant_violation(&self) -> bool {
        match self {
            Self::InvariantViolation(_) => true,
            Self::Reservation(e) => e.is_invariant_violation(),
            Self::Points(e) => e.is_invariant_violation(),
            _ => false,
        }
    }
}

/// Payments, their line allocations, provider transactions and refunds.
///
/// Aggregates are only ever changed inside one owning transaction that locks the payment row first and re-reads it.
#[allow(async_fn_in_trait)]
pub trait PaymentManagement: OrderManagement {
    /// Persists a `READY` payment with its lines. The order must be `CONFIRMED`.
    async fn insert_ready_payment(&self, payment: NewPayment) -> Result<PaymentWithLines, PaymentFlowError>;

    async fn fetch_payment(&self, payment_id: i64) -> Result<Option<PaymentWithLines>, PaymentFlowError>;

    async fn fetch_payment_by_correlation_id(
        &self,
        correlation_id: &CorrelationId,
    ) -> Result<Option<Payment>, PaymentFlowError>;

    async fn fetch_payments_for_order(&self, order_id: i64) -> Result<Vec<Payment>, PaymentFlowError>;

    async fn fetch_payment_transactions(&self, payment_id: i64) -> Result<Vec<PaymentTransaction>, PaymentFlowError>;

    /// Merges the gateway's view of a payment into local state: status transition, order effect, stock rollback,
    /// point settlement and provider-transaction history, in one transaction.
    async fn reconcile_payment(&self, update: GatewayUpdate) -> Result<ReconcileOutcome, PaymentFlowError>;

    /// Validates a refund against the locked payment and reserves the requested amounts as a pending refund.
    async fn begin_refund(&self, request: RefundRequest) -> Result<PendingRefund, PaymentFlowError>;

    /// Distributes the authoritative cancelled amount over the pending refund's lines and rolls the payment forward.
    async fn complete_refund(
        &self,
        refund_id: i64,
        cancellation: GatewayCancellation,
    ) -> Result<RefundOutcome, PaymentFlowError>;

    /// Marks a pending refund as failed, releasing its reservation on the refundable pools.
    async fn abandon_refund(&self, refund_id: i64, reason: &str) -> Result<Refund, PaymentFlowError>;

    async fn fetch_refunds(&self, payment_id: i64) -> Result<Vec<Refund>, PaymentFlowError>;
}
