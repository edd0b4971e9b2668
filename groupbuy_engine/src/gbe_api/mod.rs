//! # Group-buy engine public API
//!
//! The `gbe_api` module exposes the programmatic API of the group-buy engine. Each API wraps a storage backend that
//! implements the traits it needs, so callers can pick the pieces they use.
//!
//! * [`reservation_api`] manages sellable units, their stage schedules, stock reservation and group-buy campaigns.
//! * [`point_ledger_api`] manages point wallets. Every mutation takes an idempotency key.
//! * [`order_flow_api`] confirms orders. Confirmation is a saga over per-unit reservations and an optional point hold.
//! * [`payment_flow_api`] creates payments, reconciles them against the gateway and allocates refunds.
//!
//! # API usage
//!
//! ```rust,ignore
//! use groupbuy_engine::{ReservationApi, SqliteDatabase, events::EventProducers};
//! let db = SqliteDatabase::new_with_url("sqlite://data/groupbuy.db", 25).await?;
//! let api = ReservationApi::new(db, EventProducers::default());
//! let reservation = api.reserve(unit_id, 10).await?;
//! ```
pub mod order_flow_api;
pub mod order_objects;
pub mod payment_flow_api;
pub mod payment_objects;
pub mod point_ledger_api;
pub mod reservation_api;
