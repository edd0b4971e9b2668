use sqlx::SqliteConnection;

use crate::{
    db_types::{Money, Refund, RefundLine, RefundStatus, RefundType},
    payment_rules::PendingRefunds,
};

pub async fn insert_refund(
    payment_id: i64,
    refund_type: RefundType,
    status: RefundStatus,
    requested_amount: Money,
    reason: &str,
    conn: &mut SqliteConnection,
) -> Result<Refund, sqlx::Error> {
    let refund = sqlx::query_as(
        r#"
            INSERT INTO refunds (payment_id, refund_type, status, requested_amount, reason)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *;
        "#,
    )
    .bind(payment_id)
    .bind(refund_type)
    .bind(status)
    .bind(requested_amount)
    .bind(reason)
    .fetch_one(conn)
    .await?;
    Ok(refund)
}

pub async fn insert_refund_line(
    refund_id: i64,
    payment_line_id: i64,
    requested_amount: Money,
    allocated_amount: Money,
    conn: &mut SqliteConnection,
) -> Result<RefundLine, sqlx::Error> {
    let line = sqlx::query_as(
        r#"
            INSERT INTO refund_lines (refund_id, payment_line_id, requested_amount, allocated_amount)
            VALUES ($1, $2, $3, $4)
            RETURNING *;
        "#,
    )
    .bind(refund_id)
    .bind(payment_line_id)
    .bind(requested_amount)
    .bind(allocated_amount)
    .fetch_one(conn)
    .await?;
    Ok(line)
}

/// Takes the write lock on a pending refund. Returns `None` if the refund does not exist or is no longer pending.
pub async fn lock_pending_refund(refund_id: i64, conn: &mut SqliteConnection) -> Result<Option<Refund>, sqlx::Error> {
    let refund = sqlx::query_as(
        "UPDATE refunds SET updated_at = CURRENT_TIMESTAMP WHERE id = $1 AND status = 'PENDING' RETURNING *",
    )
    .bind(refund_id)
    .fetch_optional(conn)
    .await?;
    Ok(refund)
}

pub async fn fetch_refunds(payment_id: i64, conn: &mut SqliteConnection) -> Result<Vec<Refund>, sqlx::Error> {
    let refunds = sqlx::query_as("SELECT * FROM refunds WHERE payment_id = $1 ORDER BY id")
        .bind(payment_id)
        .fetch_all(conn)
        .await?;
    Ok(refunds)
}

pub async fn fetch_refund_lines(refund_id: i64, conn: &mut SqliteConnection) -> Result<Vec<RefundLine>, sqlx::Error> {
    let lines = sqlx::query_as("SELECT * FROM refund_lines WHERE refund_id = $1 ORDER BY id")
        .bind(refund_id)
        .fetch_all(conn)
        .await?;
    Ok(lines)
}

/// Sums what `PENDING` refunds on the payment have reserved, per pool and per payment line.
pub async fn pending_refunds(payment_id: i64, conn: &mut SqliteConnection) -> Result<PendingRefunds, sqlx::Error> {
    let pools: Vec<(RefundType, Money)> = sqlx::query_as(
        r#"
            SELECT refund_type, COALESCE(SUM(requested_amount), 0) FROM refunds
            WHERE payment_id = $1 AND status = 'PENDING'
            GROUP BY refund_type;
        "#,
    )
    .bind(payment_id)
    .fetch_all(&mut *conn)
    .await?;
    let lines: Vec<(i64, Money)> = sqlx::query_as(
        r#"
            SELECT rl.payment_line_id, SUM(rl.requested_amount) FROM refund_lines rl
            JOIN refunds r ON r.id = rl.refund_id
            WHERE r.payment_id = $1 AND r.status = 'PENDING'
            GROUP BY rl.payment_line_id;
        "#,
    )
    .bind(payment_id)
    .fetch_all(conn)
    .await?;
    let mut pending = PendingRefunds { by_line: lines.into_iter().collect(), ..Default::default() };
    for (refund_type, amount) in pools {
        match refund_type {
            RefundType::Cash => pending.cash = amount,
            RefundType::Point => pending.point = amount,
        }
    }
    Ok(pending)
}

pub async fn set_line_allocation(
    refund_id: i64,
    payment_line_id: i64,
    allocated_amount: Money,
    conn: &mut SqliteConnection,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE refund_lines SET allocated_amount = $1 WHERE refund_id = $2 AND payment_line_id = $3")
        .bind(allocated_amount)
        .bind(refund_id)
        .bind(payment_line_id)
        .execute(conn)
        .await?;
    Ok(())
}

/// Marks a pending refund as completed. Returns `None` if the refund is not pending.
pub async fn mark_completed(
    refund_id: i64,
    cancelled_amount: Money,
    cancellation_id: Option<&str>,
    conn: &mut SqliteConnection,
) -> Result<Option<Refund>, sqlx::Error> {
    let refund = sqlx::query_as(
        r#"
            UPDATE refunds SET
                status = 'COMPLETED',
                cancelled_amount = $1,
                cancellation_id = $2,
                updated_at = CURRENT_TIMESTAMP
            WHERE id = $3 AND status = 'PENDING'
            RETURNING *;
        "#,
    )
    .bind(cancelled_amount)
    .bind(cancellation_id)
    .bind(refund_id)
    .fetch_optional(conn)
    .await?;
    Ok(refund)
}

/// Marks a pending refund as failed. Returns `None` if the refund is not pending.
pub async fn mark_failed(
    refund_id: i64,
    reason: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<Refund>, sqlx::Error> {
    let refund = sqlx::query_as(
        r#"
            UPDATE refunds SET status = 'FAILED', failure_reason = $1, updated_at = CURRENT_TIMESTAMP
            WHERE id = $2 AND status = 'PENDING'
            RETURNING *;
        "#,
    )
    .bind(reason)
    .bind(refund_id)
    .fetch_optional(conn)
    .await?;
    Ok(refund)
}
