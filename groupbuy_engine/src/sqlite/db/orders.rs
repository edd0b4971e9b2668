use log::{debug, trace};
use sqlx::SqliteConnection;

use crate::db_types::{NewOrder, NewOrderLine, Order, OrderLine, OrderStatusType};

/// Inserts the order header with status `CONFIRMED`. This is not atomic on its own: embed it in a transaction together
/// with [`insert_order_line`] calls.
pub async fn insert_order(order: &NewOrder, conn: &mut SqliteConnection) -> Result<Order, sqlx::Error> {
    let order: Order = sqlx::query_as(
        r#"
            INSERT INTO orders (order_no, user_id, status, total_amount, point_amount)
            VALUES ($1, $2, 'CONFIRMED', $3, $4)
            RETURNING *;
        "#,
    )
    .bind(order.order_no.as_str())
    .bind(order.user_id)
    .bind(order.total_amount())
    .bind(order.point_amount)
    .fetch_one(conn)
    .await?;
    debug!("📝️ Order [{}] inserted with id {}", order.order_no, order.id);
    Ok(order)
}

pub async fn insert_order_line(
    order_id: i64,
    line: &NewOrderLine,
    conn: &mut SqliteConnection,
) -> Result<OrderLine, sqlx::Error> {
    let line = sqlx::query_as(
        r#"
            INSERT INTO order_lines (
                order_id,
                unit_id,
                ordered_qty,
                level_snapshot,
                discount_percent_snapshot,
                unit_price_snapshot,
                line_amount
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *;
        "#,
    )
    .bind(order_id)
    .bind(line.unit_id)
    .bind(line.ordered_qty)
    .bind(line.level_snapshot)
    .bind(line.discount_percent_snapshot)
    .bind(line.unit_price_snapshot)
    .bind(line.line_amount())
    .fetch_one(conn)
    .await?;
    Ok(line)
}

pub async fn fetch_order(order_id: i64, conn: &mut SqliteConnection) -> Result<Option<Order>, sqlx::Error> {
    let order = sqlx::query_as("SELECT * FROM orders WHERE id = $1").bind(order_id).fetch_optional(conn).await?;
    Ok(order)
}

pub async fn fetch_order_by_order_no(order_no: &str, conn: &mut SqliteConnection) -> Result<Option<Order>, sqlx::Error> {
    let order =
        sqlx::query_as("SELECT * FROM orders WHERE order_no = $1").bind(order_no).fetch_optional(conn).await?;
    Ok(order)
}

pub async fn fetch_order_lines(order_id: i64, conn: &mut SqliteConnection) -> Result<Vec<OrderLine>, sqlx::Error> {
    let lines = sqlx::query_as("SELECT * FROM order_lines WHERE order_id = $1 ORDER BY id")
        .bind(order_id)
        .fetch_all(conn)
        .await?;
    Ok(lines)
}

/// Takes the write lock on the order row and returns it as seen under the lock.
pub async fn lock_order(order_id: i64, conn: &mut SqliteConnection) -> Result<Option<Order>, sqlx::Error> {
    let order = sqlx::query_as("UPDATE orders SET updated_at = CURRENT_TIMESTAMP WHERE id = $1 RETURNING *")
        .bind(order_id)
        .fetch_optional(conn)
        .await?;
    Ok(order)
}

pub async fn update_order_status(
    order_id: i64,
    status: OrderStatusType,
    conn: &mut SqliteConnection,
) -> Result<Order, sqlx::Error> {
    let order: Order =
        sqlx::query_as("UPDATE orders SET status = $1, updated_at = CURRENT_TIMESTAMP WHERE id = $2 RETURNING *")
            .bind(status)
            .bind(order_id)
            .fetch_one(conn)
            .await?;
    trace!("📝️ Order [{}] is now {status}", order.order_no);
    Ok(order)
}

/// Records the payment method on the order unless one is already attached. Returns `None` when nothing changed.
pub async fn attach_payment_method(
    order_id: i64,
    method: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<Order>, sqlx::Error> {
    let order = sqlx::query_as(
        "UPDATE orders SET payment_method = $1, updated_at = CURRENT_TIMESTAMP WHERE id = $2 AND payment_method IS NULL \
         RETURNING *",
    )
    .bind(method)
    .bind(order_id)
    .fetch_optional(conn)
    .await?;
    Ok(order)
}

/// Sets the order's `stock_released` flag. Returns `None` if it was already set, in which case the caller must not
/// release the stock again.
pub async fn claim_stock_release(order_id: i64, conn: &mut SqliteConnection) -> Result<Option<Order>, sqlx::Error> {
    let order = sqlx::query_as(
        "UPDATE orders SET stock_released = TRUE, updated_at = CURRENT_TIMESTAMP WHERE id = $1 AND stock_released = \
         FALSE RETURNING *",
    )
    .bind(order_id)
    .fetch_optional(conn)
    .await?;
    Ok(order)
}
