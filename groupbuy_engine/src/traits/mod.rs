//! # Backend contracts
//!
//! The traits in this module define what a storage backend must provide for the group-buy engine. The engine APIs in
//! [`crate::gbe_api`] are generic over these traits and never touch SQL themselves.
//!
//! * [`InventoryManagement`] owns sellable units, their stage schedules and group-buy campaigns. Every quantity change
//!   happens under a row lock with a bounded wait.
//! * [`PointLedgerManagement`] owns point wallets and the append-only ledger. Every mutation is keyed by an
//!   idempotency key that is unique at the storage layer.
//! * [`OrderManagement`] persists order headers with their frozen line snapshots.
//! * [`PaymentManagement`] owns payments, their line allocations, provider transactions and refunds. Reconciliation and
//!   refund allocation each run inside a single owning transaction.
//!
//! [`PaymentGateway`] is not a storage trait. It is the narrow contract the engine needs from the external payment
//! provider.
mod inventory_management;
mod order_management;
mod payment_gateway;
mod payment_management;
mod point_ledger;

mod data_objects;
mod storage_errors;

pub use data_objects::{
    CampaignClosure,
    GatewayUpdate,
    LedgerOutcome,
    ParticipationResult,
    PendingRefund,
    ReconcileOutcome,
    RefundOutcome,
    RefundRequest,
    Reservation,
    TransactionRecord,
};
pub use inventory_management::{InventoryManagement, ReservationError};
pub use order_management::{OrderFlowError, OrderManagement};
pub use payment_gateway::{
    GatewayCancellation,
    GatewayError,
    GatewayPayment,
    GatewayPaymentStatus,
    PaymentGateway,
    WebhookEvent,
    WebhookHeaders,
};
pub use payment_management::{PaymentFlowError, PaymentManagement};
pub use point_ledger::{PointLedgerError, PointLedgerManagement};
pub(crate) use storage_errors::{classify, storage_error_conversion, StorageFailure};
