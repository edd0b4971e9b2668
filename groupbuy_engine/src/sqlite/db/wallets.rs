use log::{debug, error, trace};
use sqlx::SqliteConnection;

use crate::{
    db_types::{LedgerEntryType, Money, PointLedgerEntry, PointWallet},
    traits::{LedgerOutcome, PointLedgerError},
    wallet_rules::{self, Balances, PointEvent},
};

/// Creates an empty wallet for the user, or leaves the existing one alone.
pub async fn idempotent_insert(user_id: i64, conn: &mut SqliteConnection) -> Result<PointWallet, sqlx::Error> {
    sqlx::query("INSERT INTO point_wallets (user_id) VALUES ($1) ON CONFLICT (user_id) DO NOTHING")
        .bind(user_id)
        .execute(&mut *conn)
        .await?;
    let wallet = sqlx::query_as("SELECT * FROM point_wallets WHERE user_id = $1").bind(user_id).fetch_one(conn).await?;
    Ok(wallet)
}

pub async fn fetch_wallet(user_id: i64, conn: &mut SqliteConnection) -> Result<Option<PointWallet>, sqlx::Error> {
    let wallet =
        sqlx::query_as("SELECT * FROM point_wallets WHERE user_id = $1").bind(user_id).fetch_optional(conn).await?;
    Ok(wallet)
}

/// Takes the write lock on the wallet row and returns it as seen under the lock.
pub async fn lock_wallet(user_id: i64, conn: &mut SqliteConnection) -> Result<Option<PointWallet>, sqlx::Error> {
    let wallet =
        sqlx::query_as("UPDATE point_wallets SET updated_at = CURRENT_TIMESTAMP WHERE user_id = $1 RETURNING *")
            .bind(user_id)
            .fetch_optional(conn)
            .await?;
    Ok(wallet)
}

pub async fn fetch_entry_by_key(
    idempotency_key: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<PointLedgerEntry>, sqlx::Error> {
    let entry = sqlx::query_as("SELECT * FROM point_ledger_entries WHERE idempotency_key = $1")
        .bind(idempotency_key)
        .fetch_optional(conn)
        .await?;
    Ok(entry)
}

pub async fn fetch_entries(user_id: i64, conn: &mut SqliteConnection) -> Result<Vec<PointLedgerEntry>, sqlx::Error> {
    let entries = sqlx::query_as("SELECT * FROM point_ledger_entries WHERE user_id = $1 ORDER BY id")
        .bind(user_id)
        .fetch_all(conn)
        .await?;
    Ok(entries)
}

async fn update_balances(
    user_id: i64,
    balances: Balances,
    conn: &mut SqliteConnection,
) -> Result<PointWallet, sqlx::Error> {
    let wallet = sqlx::query_as(
        "UPDATE point_wallets SET balance = $1, hold = $2, updated_at = CURRENT_TIMESTAMP WHERE user_id = $3 RETURNING *",
    )
    .bind(balances.balance)
    .bind(balances.hold)
    .bind(user_id)
    .fetch_one(conn)
    .await?;
    Ok(wallet)
}

/// Appends a ledger entry. Returns `None` if the idempotency key is already taken, in which case nothing was written.
async fn insert_entry(
    event: &PointEvent,
    before: &PointWallet,
    after: &PointWallet,
    conn: &mut SqliteConnection,
) -> Result<Option<PointLedgerEntry>, sqlx::Error> {
    let entry_type = event.operation.entry_type();
    let entry = sqlx::query_as(
        r#"
            INSERT INTO point_ledger_entries (
                user_id,
                entry_type,
                amount,
                delta,
                before_available,
                after_available,
                balance_after,
                hold_after,
                idempotency_key
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (idempotency_key) DO NOTHING
            RETURNING *;
        "#,
    )
    .bind(event.user_id)
    .bind(entry_type)
    .bind(event.amount)
    .bind(signed_delta(entry_type, event.amount))
    .bind(before.available())
    .bind(after.available())
    .bind(after.balance)
    .bind(after.hold)
    .bind(event.idempotency_key.as_str())
    .fetch_optional(conn)
    .await?;
    Ok(entry)
}

/// The entry's movement as the user sees it: positive when points become spendable or are credited, negative when they
/// are locked away or spent.
fn signed_delta(entry_type: LedgerEntryType, amount: Money) -> Money {
    match entry_type {
        LedgerEntryType::Earn | LedgerEntryType::Refund | LedgerEntryType::Unlock => amount,
        LedgerEntryType::Lock | LedgerEntryType::Redeem | LedgerEntryType::Adjust => -amount,
    }
}

fn is_same_operation(entry: &PointLedgerEntry, event: &PointEvent) -> bool {
    entry.user_id == event.user_id && entry.entry_type == event.operation.entry_type() && entry.amount == event.amount
}

/// Applies a point event inside the caller's transaction.
///
/// The wallet row is locked first. If the idempotency key already has an entry, the wallet as that entry left it is
/// returned with the entry and nothing is reapplied. A key that was used for a different operation is rejected.
pub async fn apply_event(event: &PointEvent, conn: &mut SqliteConnection) -> Result<LedgerOutcome, PointLedgerError> {
    event.validate()?;
    let wallet = lock_wallet(event.user_id, conn).await?.ok_or(PointLedgerError::WalletNotFound(event.user_id))?;
    if let Some(entry) = fetch_entry_by_key(&event.idempotency_key, conn).await? {
        return replay(event, entry);
    }
    let current = Balances::new(wallet.balance, wallet.hold);
    let next = wallet_rules::apply(event.user_id, current, event.operation, event.amount).map_err(|e| {
        if e.is_invariant_violation() {
            error!("🪙️ Ledger bookkeeping is inconsistent for user {}: {e}", event.user_id);
        }
        e
    })?;
    let updated = update_balances(event.user_id, next, conn).await?;
    match insert_entry(event, &wallet, &updated, conn).await? {
        Some(entry) => {
            trace!(
                "🪙️ {} {} for user {} [{}]. Available {} -> {}",
                entry.entry_type,
                entry.amount,
                entry.user_id,
                entry.idempotency_key,
                entry.before_available,
                entry.after_available
            );
            Ok(LedgerOutcome { wallet: updated.snapshot(), entry, replayed: false })
        },
        None => {
            // Another wallet's transaction claimed the key between our check and insert. The caller must roll back.
            debug!("🪙️ Idempotency key {} was claimed concurrently", event.idempotency_key);
            Err(PointLedgerError::IdempotencyKeyReused(event.idempotency_key.clone()))
        },
    }
}

fn replay(event: &PointEvent, entry: PointLedgerEntry) -> Result<LedgerOutcome, PointLedgerError> {
    if !is_same_operation(&entry, event) {
        return Err(PointLedgerError::IdempotencyKeyReused(event.idempotency_key.clone()));
    }
    debug!("🪙️ Idempotency key {} already applied. Returning its original result.", event.idempotency_key);
    Ok(LedgerOutcome { wallet: entry.snapshot(), entry, replayed: true })
}
