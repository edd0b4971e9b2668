use std::time::Duration;

use thiserror::Error;

use crate::{
    db_types::{Money, NewOrder, OrderWithLines},
    traits::{storage_error_conversion, InventoryManagement, PointLedgerError, PointLedgerManagement, ReservationError},
};

#[derive(Debug, Clone, Error)]
pub enum OrderFlowError {
    #[error("An order needs at least one line.")]
    EmptyOrder,
    #[error("Line {line} has a non-positive quantity ({qty}).")]
    InvalidQuantity { line: usize, qty: i64 },
    #[error("User {0} does not exist.")]
    UserNotFound(i64),
    #[error("Cannot use {requested} points on an order worth {total}.")]
    InvalidPointAmount { requested: Money, total: Money },
    #[error("Could not reserve line {line} (unit {unit_id}). {source}")]
    ReservationFailed {
        line: usize,
        unit_id: i64,
        #[source]
        source: ReservationError,
    },
    #[error("Could not hold points for the order. {0}")]
    PointHoldFailed(#[source] PointLedgerError),
    #[error("{0}")]
    Reservation(#[from] ReservationError),
    #[error("{0}")]
    Points(#[from] PointLedgerError),
    #[error("Order {0} does not exist.")]
    OrderNotFound(i64),
    #[error("Order number {0} is already taken.")]
    OrderAlreadyExists(String),
    #[error("Timed out waiting for the order lock.")]
    LockTimeout,
    #[error("The order lock was contended. Retry after a short backoff.")]
    LockConflict,
    #[error("Database error: {0}")]
    DatabaseError(String),
}

storage_error_conversion!(OrderFlowError);

impl OrderFlowError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::LockTimeout | Self::LockConflict => true,
            Self::ReservationFailed { source, .. } | Self::Reservation(source) => source.is_retryable(),
            Self::PointHoldFailed(e) | Self::Points(e) => e.is_retryable(),
            _ => false,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::LockTimeout => Some(Duration::from_secs(1)),
            Self::LockConflict => Some(Duration::from_secs(2)),
            Self::ReservationFailed { source, .. } | Self::Reservation(source) => source.retry_after(),
            Self::PointHoldFailed(e) | Self::Points(e) => e.retry_after(),
            _ => None,
        }
    }
}

/// Persistence of confirmed orders.
///
/// Orders are written once, with their line snapshots, and afterwards only change status. Confirming an order also
/// needs stock reservation and point holds, so this trait builds on both.
#[allow(async_fn_in_trait)]
pub trait OrderManagement: InventoryManagement + PointLedgerManagement {
    /// Inserts the header with status `CONFIRMED` and one line per reservation, atomically.
    async fn insert_order(&self, order: NewOrder) -> Result<OrderWithLines, OrderFlowError>;

    async fn fetch_order(&self, order_id: i64) -> Result<Option<OrderWithLines>, OrderFlowError>;

    async fn fetch_order_by_order_no(&self, order_no: &str) -> Result<Option<OrderWithLines>, OrderFlowError>;
}
