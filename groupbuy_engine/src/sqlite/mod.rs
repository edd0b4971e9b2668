//! SQLite backend for the group-buy engine.
mod sqlite_impl;

pub mod db;
pub use sqlite_impl::{SqliteDatabase, DEFAULT_LOCK_WAIT, GATEWAY_INITIATED_REFUND};
