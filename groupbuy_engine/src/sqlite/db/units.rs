use log::trace;
use sqlx::SqliteConnection;

use crate::db_types::{DiscountStage, Money, SellableUnit};

pub async fn insert_unit(
    name: &str,
    base_price: Money,
    stock: i64,
    conn: &mut SqliteConnection,
) -> Result<SellableUnit, sqlx::Error> {
    let unit: SellableUnit =
        sqlx::query_as("INSERT INTO sellable_units (name, base_price, stock) VALUES ($1, $2, $3) RETURNING *")
            .bind(name)
            .bind(base_price)
            .bind(stock)
            .fetch_one(conn)
            .await?;
    trace!("🗃️ Sellable unit #{} ({}) created with stock {}", unit.id, unit.name, unit.stock);
    Ok(unit)
}

pub async fn insert_unit_stages(
    unit_id: i64,
    stages: &[DiscountStage],
    conn: &mut SqliteConnection,
) -> Result<(), sqlx::Error> {
    for stage in stages {
        sqlx::query(
            "INSERT INTO discount_stages (unit_id, level, threshold_qty, discount_percent) VALUES ($1, $2, $3, $4)",
        )
        .bind(unit_id)
        .bind(stage.level)
        .bind(stage.threshold_qty)
        .bind(stage.discount_percent)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

pub async fn fetch_unit(unit_id: i64, conn: &mut SqliteConnection) -> Result<Option<SellableUnit>, sqlx::Error> {
    let unit = sqlx::query_as("SELECT * FROM sellable_units WHERE id = $1").bind(unit_id).fetch_optional(conn).await?;
    Ok(unit)
}

/// The unit's stage schedule, by ascending threshold.
pub async fn fetch_unit_stages(unit_id: i64, conn: &mut SqliteConnection) -> Result<Vec<DiscountStage>, sqlx::Error> {
    let stages = sqlx::query_as(
        "SELECT level, threshold_qty, discount_percent FROM discount_stages WHERE unit_id = $1 ORDER BY threshold_qty",
    )
    .bind(unit_id)
    .fetch_all(conn)
    .await?;
    Ok(stages)
}

/// Takes the write lock on the unit row and returns it as seen under the lock.
pub async fn lock_unit(unit_id: i64, conn: &mut SqliteConnection) -> Result<Option<SellableUnit>, sqlx::Error> {
    let unit = sqlx::query_as("UPDATE sellable_units SET updated_at = CURRENT_TIMESTAMP WHERE id = $1 RETURNING *")
        .bind(unit_id)
        .fetch_optional(conn)
        .await?;
    Ok(unit)
}

/// Moves `cumulative_qty` by `delta`. Only call this with the unit locked. The table's CHECK constraint is the last line
/// of defence against going outside `0..=stock`.
pub async fn adjust_cumulative_qty(
    unit_id: i64,
    delta: i64,
    conn: &mut SqliteConnection,
) -> Result<SellableUnit, sqlx::Error> {
    let unit = sqlx::query_as(
        "UPDATE sellable_units SET cumulative_qty = cumulative_qty + $1, updated_at = CURRENT_TIMESTAMP WHERE id = $2 \
         RETURNING *",
    )
    .bind(delta)
    .bind(unit_id)
    .fetch_one(conn)
    .await?;
    Ok(unit)
}
