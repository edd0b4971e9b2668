use chrono::{DateTime, Utc};
use log::trace;
use sqlx::SqliteConnection;

use crate::db_types::{CorrelationId, Money, NewPayment, NewPaymentLine, Payment, PaymentLine, PaymentStatus, RefundType};

pub async fn insert_payment(payment: &NewPayment, conn: &mut SqliteConnection) -> Result<Payment, sqlx::Error> {
    let payment: Payment = sqlx::query_as(
        r#"
            INSERT INTO payments (order_id, correlation_id, status, amount, cash_amount, point_amount)
            VALUES ($1, $2, 'READY', $3, $4, $5)
            RETURNING *;
        "#,
    )
    .bind(payment.order_id)
    .bind(&payment.correlation_id)
    .bind(payment.amount())
    .bind(payment.cash_amount)
    .bind(payment.point_amount)
    .fetch_one(conn)
    .await?;
    trace!("💳️ Payment {} created for order #{}", payment.correlation_id, payment.order_id);
    Ok(payment)
}

pub async fn insert_payment_line(
    payment_id: i64,
    line: &NewPaymentLine,
    conn: &mut SqliteConnection,
) -> Result<PaymentLine, sqlx::Error> {
    let line = sqlx::query_as(
        r#"
            INSERT INTO payment_lines (payment_id, order_line_id, cash_amount, point_amount)
            VALUES ($1, $2, $3, $4)
            RETURNING *;
        "#,
    )
    .bind(payment_id)
    .bind(line.order_line_id)
    .bind(line.cash_amount)
    .bind(line.point_amount)
    .fetch_one(conn)
    .await?;
    Ok(line)
}

pub async fn fetch_payment(payment_id: i64, conn: &mut SqliteConnection) -> Result<Option<Payment>, sqlx::Error> {
    let payment =
        sqlx::query_as("SELECT * FROM payments WHERE id = $1").bind(payment_id).fetch_optional(conn).await?;
    Ok(payment)
}

pub async fn fetch_payment_by_correlation_id(
    correlation_id: &CorrelationId,
    conn: &mut SqliteConnection,
) -> Result<Option<Payment>, sqlx::Error> {
    let payment = sqlx::query_as("SELECT * FROM payments WHERE correlation_id = $1")
        .bind(correlation_id)
        .fetch_optional(conn)
        .await?;
    Ok(payment)
}

pub async fn fetch_payments_for_order(order_id: i64, conn: &mut SqliteConnection) -> Result<Vec<Payment>, sqlx::Error> {
    let payments = sqlx::query_as("SELECT * FROM payments WHERE order_id = $1 ORDER BY id")
        .bind(order_id)
        .fetch_all(conn)
        .await?;
    Ok(payments)
}

pub async fn fetch_payment_lines(payment_id: i64, conn: &mut SqliteConnection) -> Result<Vec<PaymentLine>, sqlx::Error> {
    let lines = sqlx::query_as("SELECT * FROM payment_lines WHERE payment_id = $1 ORDER BY id")
        .bind(payment_id)
        .fetch_all(conn)
        .await?;
    Ok(lines)
}

/// Takes the write lock on the payment row and returns it as seen under the lock.
pub async fn lock_payment(payment_id: i64, conn: &mut SqliteConnection) -> Result<Option<Payment>, sqlx::Error> {
    let payment = sqlx::query_as("UPDATE payments SET updated_at = CURRENT_TIMESTAMP WHERE id = $1 RETURNING *")
        .bind(payment_id)
        .fetch_optional(conn)
        .await?;
    Ok(payment)
}

pub async fn lock_payment_by_correlation_id(
    correlation_id: &CorrelationId,
    conn: &mut SqliteConnection,
) -> Result<Option<Payment>, sqlx::Error> {
    let payment =
        sqlx::query_as("UPDATE payments SET updated_at = CURRENT_TIMESTAMP WHERE correlation_id = $1 RETURNING *")
            .bind(correlation_id)
            .fetch_optional(conn)
            .await?;
    Ok(payment)
}

/// Records the settled pools the first time the gateway confirms a payment.
pub async fn record_settlement(
    payment_id: i64,
    paid_cash: Money,
    paid_point: Money,
    method: Option<&str>,
    paid_at: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Payment, sqlx::Error> {
    let payment = sqlx::query_as(
        r#"
            UPDATE payments SET
                paid_cash = $1,
                paid_point = $2,
                method = COALESCE(method, $3),
                paid_at = $4,
                updated_at = CURRENT_TIMESTAMP
            WHERE id = $5
            RETURNING *;
        "#,
    )
    .bind(paid_cash)
    .bind(paid_point)
    .bind(method)
    .bind(paid_at)
    .bind(payment_id)
    .fetch_one(conn)
    .await?;
    Ok(payment)
}

pub async fn update_status(
    payment_id: i64,
    status: PaymentStatus,
    conn: &mut SqliteConnection,
) -> Result<Payment, sqlx::Error> {
    let payment: Payment =
        sqlx::query_as("UPDATE payments SET status = $1, updated_at = CURRENT_TIMESTAMP WHERE id = $2 RETURNING *")
            .bind(status)
            .bind(payment_id)
            .fetch_one(conn)
            .await?;
    trace!("💳️ Payment {} is now {status}", payment.correlation_id);
    Ok(payment)
}

/// Adds `amount` to the refunded total of the given pool. The table's CHECK constraints reject anything that would
/// refund more than was paid.
pub async fn add_refunded(
    payment_id: i64,
    refund_type: RefundType,
    amount: Money,
    conn: &mut SqliteConnection,
) -> Result<Payment, sqlx::Error> {
    let sql = match refund_type {
        RefundType::Cash => {
            "UPDATE payments SET refunded_cash = refunded_cash + $1, total_refunded = total_refunded + $1, updated_at = \
             CURRENT_TIMESTAMP WHERE id = $2 RETURNING *"
        },
        RefundType::Point => {
            "UPDATE payments SET refunded_point = refunded_point + $1, total_refunded = total_refunded + $1, updated_at \
             = CURRENT_TIMESTAMP WHERE id = $2 RETURNING *"
        },
    };
    let payment = sqlx::query_as(sql).bind(amount).bind(payment_id).fetch_one(conn).await?;
    Ok(payment)
}

pub async fn add_line_refund(
    payment_line_id: i64,
    amount: Money,
    conn: &mut SqliteConnection,
) -> Result<PaymentLine, sqlx::Error> {
    let line =
        sqlx::query_as("UPDATE payment_lines SET refunded_amount = refunded_amount + $1 WHERE id = $2 RETURNING *")
            .bind(amount)
            .bind(payment_line_id)
            .fetch_one(conn)
            .await?;
    Ok(line)
}
