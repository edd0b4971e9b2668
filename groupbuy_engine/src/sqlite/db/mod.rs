//! # SQLite Database methods
//!
//! This module contains "low-level" SQLite database interactions.
//!
//! All these interactions are simple functions (rather than stateful structs) that accept a `&mut SqliteConnection`
//! argument. Callers obtain a connection from the pool, or open a transaction when several steps must be atomic, and
//! pass `&mut tx` through without any other changes.
//!
//! Functions named `lock_*` open the row lock. They must be the first statement of their transaction: they write to
//! the row, which makes SQLite hand out its write lock (waiting at most the pool's busy timeout), and return the row
//! as it is once the lock is held.
use std::{env, str::FromStr, time::Duration};

use log::info;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    Error as SqlxError,
    SqlitePool,
};

pub mod campaigns;
pub mod orders;
pub mod payments;
pub mod refunds;
pub mod transactions;
pub mod units;
pub mod wallets;

const SQLITE_DB_URL: &str = "sqlite://data/groupbuy.db";

pub fn db_url() -> String {
    let result = env::var("GBM_DATABASE_URL").unwrap_or_else(|_| {
        info!("🗃️ GBM_DATABASE_URL is not set. Using the default.");
        SQLITE_DB_URL.to_string()
    });
    info!("🗃️ Using database URL: {result}");
    result
}

/// Opens a pool in which every connection waits up to `lock_wait` for a row lock before reporting `SQLITE_BUSY`.
pub async fn new_pool(url: &str, max_connections: u32, lock_wait: Duration) -> Result<SqlitePool, SqlxError> {
    let options = SqliteConnectOptions::from_str(url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(lock_wait);
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(lock_wait)
        .connect_with(options)
        .await?;
    Ok(pool)
}
