//! Group-buy engine
//!
//! The group-buy engine is the core of the group-buy marketplace backend. It protects stock, point balances and money
//! under concurrent access and unreliable external signals. It is provider-agnostic: the payment gateway is reached
//! through the [`PaymentGateway`] trait only.
//!
//! The library is divided into three main sections:
//! 1. Storage contracts ([`mod@traits`]) and a SQLite backend that implements them. You should not need to touch the
//!    database directly. The exception is the data types used in the database, which live in [`mod@db_types`].
//! 2. Pure rules: the stage resolver ([`mod@stages`]), wallet arithmetic ([`mod@wallet_rules`]) and the payment status
//!    machine with refund allocation ([`mod@payment_rules`]). Backends call these while holding their locks.
//! 3. The public API: [`ReservationApi`], [`PointLedgerApi`], [`OrderFlowApi`] and
//!    [`PaymentFlowApi`].
//!
//! The engine also emits events (campaign succeeded or closed, payment settled, order failed) that can be subscribed
//! to through [`mod@events`].
pub mod db_types;
pub mod events;
pub mod helpers;
pub mod payment_rules;
pub mod stages;
pub mod traits;
pub mod wallet_rules;

mod gbe_api;
#[cfg(feature = "sqlite")]
mod sqlite;

#[cfg(any(feature = "test_utils", test))]
pub mod test_utils;

#[cfg(feature = "sqlite")]
pub use sqlite::{db::db_url, SqliteDatabase, DEFAULT_LOCK_WAIT, GATEWAY_INITIATED_REFUND};
pub use gbe_api::{
    order_flow_api::OrderFlowApi,
    order_objects,
    payment_flow_api::{PaymentFlowApi, DEFAULT_PROVIDER, POINTS_METHOD},
    payment_objects,
    point_ledger_api::PointLedgerApi,
    reservation_api::{ReservationApi, SweepReport},
};
pub use traits::{
    InventoryManagement,
    OrderFlowError,
    OrderManagement,
    PaymentFlowError,
    PaymentGateway,
    PaymentManagement,
    PointLedgerError,
    PointLedgerManagement,
    ReservationError,
};
