use sqlx::SqliteConnection;

use crate::db_types::{Money, NewPaymentTransaction, PaymentStatus, PaymentTransaction};

/// Appends a provider transaction to the payment's history.
///
/// `(provider, provider_transaction_id)` is unique in the table, and a conflicting insert is dropped by the store. A
/// `None` result therefore means this transaction was already recorded, and the caller is looking at a duplicate
/// delivery.
pub async fn idempotent_insert(
    payment_id: i64,
    tx: &NewPaymentTransaction,
    status: PaymentStatus,
    total_amount: Money,
    cancelled_amount: Money,
    conn: &mut SqliteConnection,
) -> Result<Option<PaymentTransaction>, sqlx::Error> {
    let record = sqlx::query_as(
        r#"
            INSERT INTO payment_transactions (
                payment_id,
                provider,
                provider_transaction_id,
                status,
                total_amount,
                cancelled_amount
            ) VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (provider, provider_transaction_id) DO NOTHING
            RETURNING *;
        "#,
    )
    .bind(payment_id)
    .bind(tx.provider.as_str())
    .bind(tx.provider_transaction_id.as_str())
    .bind(status)
    .bind(total_amount)
    .bind(cancelled_amount)
    .fetch_optional(conn)
    .await?;
    Ok(record)
}

pub async fn fetch_transactions(
    payment_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<PaymentTransaction>, sqlx::Error> {
    let records = sqlx::query_as("SELECT * FROM payment_transactions WHERE payment_id = $1 ORDER BY id")
        .bind(payment_id)
        .fetch_all(conn)
        .await?;
    Ok(records)
}
