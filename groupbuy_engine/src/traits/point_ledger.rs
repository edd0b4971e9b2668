use std::time::Duration;

use thiserror::Error;

use crate::{
    db_types::{Money, PointLedgerEntry, PointWallet},
    traits::{storage_error_conversion, LedgerOutcome},
    wallet_rules::PointEvent,
};

#[derive(Debug, Clone, Error)]
pub enum PointLedgerError {
    #[error("User {0} does not have a point wallet.")]
    WalletNotFound(i64),
    #[error("Point amounts must be positive, but {0} was given.")]
    InvalidAmount(Money),
    #[error("An idempotency key is required for every ledger operation.")]
    MissingIdempotencyKey,
    #[error("Idempotency key {0} was already used for a different operation.")]
    IdempotencyKeyReused(String),
    #[error("User {user_id} has {available} points available, but {requested} are needed.")]
    InsufficientAvailable { user_id: i64, requested: Money, available: Money },
    #[error("User {user_id} has a balance of {balance} points, but {requested} are needed.")]
    InsufficientBalance { user_id: i64, requested: Money, balance: Money },
    #[error("User {user_id} holds {hold} points, but {requested} were to be taken from the hold.")]
    InsufficientHold { user_id: i64, requested: Money, hold: Money },
    #[error("Timed out waiting for the wallet lock.")]
    LockTimeout,
    #[error("The wallet lock was contended. Retry after a short backoff.")]
    LockConflict,
    #[error("Database error: {0}")]
    DatabaseError(String),
}

storage_error_conversion!(PointLedgerError);

impl PointLedgerError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::LockTimeout | Self::LockConflict)
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::LockTimeout => Some(Duration::from_secs(1)),
            Self::LockConflict => Some(Duration::from_secs(2)),
            _ => None,
        }
    }

    /// A hold that cannot cover its own release or settlement means the ledger and the orders disagree.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, Self::InsufficientHold { .. })
    }
}

/// Point wallets and their append-only ledger.
///
/// Mutations are serialised per wallet and are idempotent: a second event carrying an idempotency key that already
/// has a ledger entry returns the current wallet snapshot without reapplying anything. Key uniqueness must be
/// enforced by the store itself.
#[allow(async_fn_in_trait)]
pub trait PointLedgerManagement: Clone {
    /// Creates an empty wallet. Returns the existing wallet if there already is one.
    async fn create_wallet(&self, user_id: i64) -> Result<PointWallet, PointLedgerError>;

    async fn fetch_wallet(&self, user_id: i64) -> Result<Option<PointWallet>, PointLedgerError>;

    async fn apply_point_event(&self, event: PointEvent) -> Result<LedgerOutcome, PointLedgerError>;

    /// Ledger entries for the user, oldest first.
    async fn fetch_ledger_entries(&self, user_id: i64) -> Result<Vec<PointLedgerEntry>, PointLedgerError>;
}
