use std::fmt::Debug;

use log::*;

use crate::{
    db_types::{Money, PointLedgerEntry, PointWallet},
    traits::{LedgerOutcome, PointLedgerError, PointLedgerManagement},
    wallet_rules::{PointEvent, PointOperation},
};

/// Point wallets. Every mutation takes an idempotency key, and replaying a key returns the original result.
pub struct PointLedgerApi<B> {
    db: B,
}

impl<B: Debug> Debug for PointLedgerApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PointLedgerApi ({:?})", self.db)
    }
}

impl<B: Clone> Clone for PointLedgerApi<B> {
    fn clone(&self) -> Self {
        Self { db: self.db.clone() }
    }
}

impl<B> PointLedgerApi<B> {
    pub fn new(db: B) -> Self {
        Self { db }
    }
}

impl<B> PointLedgerApi<B>
where B: PointLedgerManagement
{
    pub async fn create_wallet(&self, user_id: i64) -> Result<PointWallet, PointLedgerError> {
        let wallet = self.db.create_wallet(user_id).await?;
        debug!("🪙️ Wallet for user #{user_id} is ready");
        Ok(wallet)
    }

    pub async fn fetch_wallet(&self, user_id: i64) -> Result<Option<PointWallet>, PointLedgerError> {
        self.db.fetch_wallet(user_id).await
    }

    pub async fn history(&self, user_id: i64) -> Result<Vec<PointLedgerEntry>, PointLedgerError> {
        if self.db.fetch_wallet(user_id).await?.is_none() {
            return Err(PointLedgerError::WalletNotFound(user_id));
        }
        self.db.fetch_ledger_entries(user_id).await
    }

    pub async fn earn(&self, user_id: i64, amount: Money, key: &str) -> Result<LedgerOutcome, PointLedgerError> {
        self.apply(PointEvent::new(user_id, PointOperation::Earn, amount, key)).await
    }

    pub async fn hold(&self, user_id: i64, amount: Money, key: &str) -> Result<LedgerOutcome, PointLedgerError> {
        self.apply(PointEvent::new(user_id, PointOperation::Hold, amount, key)).await
    }

    pub async fn release(&self, user_id: i64, amount: Money, key: &str) -> Result<LedgerOutcome, PointLedgerError> {
        self.apply(PointEvent::new(user_id, PointOperation::Release, amount, key)).await
    }

    /// Deducts points. With `via_hold`, a previously held amount is settled. Otherwise the points come out of the
    /// available balance directly.
    pub async fn burn(
        &self,
        user_id: i64,
        amount: Money,
        key: &str,
        via_hold: bool,
    ) -> Result<LedgerOutcome, PointLedgerError> {
        self.apply(PointEvent::new(user_id, PointOperation::Burn { via_hold }, amount, key)).await
    }

    pub async fn refund(&self, user_id: i64, amount: Money, key: &str) -> Result<LedgerOutcome, PointLedgerError> {
        self.apply(PointEvent::new(user_id, PointOperation::Refund, amount, key)).await
    }

    pub async fn apply(&self, event: PointEvent) -> Result<LedgerOutcome, PointLedgerError> {
        let user_id = event.user_id;
        let key = event.idempotency_key.clone();
        let outcome = self.db.apply_point_event(event).await?;
        if outcome.replayed {
            debug!("🪙️ Idempotency key {key} was already applied for user #{user_id}. Returning the recorded result.");
        } else {
            trace!(
                "🪙️ {} of {} applied for user #{user_id}. Available is now {}",
                outcome.entry.entry_type,
                outcome.entry.amount,
                outcome.wallet.available
            );
        }
        Ok(outcome)
    }
}
