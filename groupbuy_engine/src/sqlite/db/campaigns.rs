use chrono::{DateTime, Utc};
use log::trace;
use sqlx::SqliteConnection;

use crate::{
    db_types::{Campaign, CampaignParticipation, DiscountStage, NewCampaign},
    stages::PriceSnapshot,
};

pub async fn insert_campaign(campaign: &NewCampaign, conn: &mut SqliteConnection) -> Result<Campaign, sqlx::Error> {
    let campaign: Campaign = sqlx::query_as(
        r#"
            INSERT INTO campaigns (unit_id, target_qty, max_discount_percent, deadline)
            VALUES ($1, $2, $3, $4)
            RETURNING *;
        "#,
    )
    .bind(campaign.unit_id)
    .bind(campaign.target_qty)
    .bind(campaign.max_discount_percent)
    .bind(campaign.deadline)
    .fetch_one(conn)
    .await?;
    trace!("🗃️ Campaign #{} opened on unit #{} with target {}", campaign.id, campaign.unit_id, campaign.target_qty);
    Ok(campaign)
}

pub async fn insert_campaign_stages(
    campaign_id: i64,
    stages: &[DiscountStage],
    conn: &mut SqliteConnection,
) -> Result<(), sqlx::Error> {
    for stage in stages {
        sqlx::query(
            "INSERT INTO discount_stages (campaign_id, level, threshold_qty, discount_percent) VALUES ($1, $2, $3, $4)",
        )
        .bind(campaign_id)
        .bind(stage.level)
        .bind(stage.threshold_qty)
        .bind(stage.discount_percent)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

pub async fn fetch_campaign(campaign_id: i64, conn: &mut SqliteConnection) -> Result<Option<Campaign>, sqlx::Error> {
    let campaign =
        sqlx::query_as("SELECT * FROM campaigns WHERE id = $1").bind(campaign_id).fetch_optional(conn).await?;
    Ok(campaign)
}

pub async fn fetch_campaign_stages(
    campaign_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<DiscountStage>, sqlx::Error> {
    let stages = sqlx::query_as(
        "SELECT level, threshold_qty, discount_percent FROM discount_stages WHERE campaign_id = $1 ORDER BY \
         threshold_qty",
    )
    .bind(campaign_id)
    .fetch_all(conn)
    .await?;
    Ok(stages)
}

/// Takes the write lock on the campaign row and returns it as seen under the lock.
pub async fn lock_campaign(campaign_id: i64, conn: &mut SqliteConnection) -> Result<Option<Campaign>, sqlx::Error> {
    let campaign = sqlx::query_as("UPDATE campaigns SET updated_at = CURRENT_TIMESTAMP WHERE id = $1 RETURNING *")
        .bind(campaign_id)
        .fetch_optional(conn)
        .await?;
    Ok(campaign)
}

pub async fn add_to_current_qty(
    campaign_id: i64,
    qty: i64,
    conn: &mut SqliteConnection,
) -> Result<Campaign, sqlx::Error> {
    let campaign = sqlx::query_as(
        "UPDATE campaigns SET current_qty = current_qty + $1, updated_at = CURRENT_TIMESTAMP WHERE id = $2 RETURNING *",
    )
    .bind(qty)
    .bind(campaign_id)
    .fetch_one(conn)
    .await?;
    Ok(campaign)
}

/// Flips an `OPEN` campaign that has reached its target to `SUCCESS`. Returns `None` if the campaign was not `OPEN` or
/// is still short of its target, so the flip happens at most once.
pub async fn mark_succeeded(
    campaign_id: i64,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Option<Campaign>, sqlx::Error> {
    let campaign = sqlx::query_as(
        r#"
            UPDATE campaigns SET status = 'SUCCESS', succeeded_at = $1, updated_at = CURRENT_TIMESTAMP
            WHERE id = $2 AND status = 'OPEN' AND current_qty >= target_qty
            RETURNING *;
        "#,
    )
    .bind(now)
    .bind(campaign_id)
    .fetch_optional(conn)
    .await?;
    Ok(campaign)
}

pub async fn mark_closed(campaign_id: i64, conn: &mut SqliteConnection) -> Result<Campaign, sqlx::Error> {
    let campaign = sqlx::query_as(
        r#"
            UPDATE campaigns SET status = 'CLOSED', closed_at = CURRENT_TIMESTAMP, updated_at = CURRENT_TIMESTAMP
            WHERE id = $1
            RETURNING *;
        "#,
    )
    .bind(campaign_id)
    .fetch_one(conn)
    .await?;
    Ok(campaign)
}

pub async fn insert_participation(
    campaign_id: i64,
    user_id: i64,
    qty: i64,
    snapshot: &PriceSnapshot,
    conn: &mut SqliteConnection,
) -> Result<CampaignParticipation, sqlx::Error> {
    let participation = sqlx::query_as(
        r#"
            INSERT INTO campaign_participations (
                campaign_id,
                user_id,
                qty,
                level_snapshot,
                discount_percent_snapshot,
                unit_price_snapshot
            ) VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *;
        "#,
    )
    .bind(campaign_id)
    .bind(user_id)
    .bind(qty)
    .bind(snapshot.level)
    .bind(snapshot.discount_percent)
    .bind(snapshot.unit_price)
    .fetch_one(conn)
    .await?;
    Ok(participation)
}

/// `OPEN` or `SUCCESS` campaigns whose deadline is at or before `now`, oldest deadline first.
pub async fn fetch_expired(now: DateTime<Utc>, conn: &mut SqliteConnection) -> Result<Vec<Campaign>, sqlx::Error> {
    let campaigns = sqlx::query_as(
        "SELECT * FROM campaigns WHERE status IN ('OPEN', 'SUCCESS') AND deadline <= $1 ORDER BY deadline, id",
    )
    .bind(now)
    .fetch_all(conn)
    .await?;
    Ok(campaigns)
}

pub async fn fetch_participant_ids(campaign_id: i64, conn: &mut SqliteConnection) -> Result<Vec<i64>, sqlx::Error> {
    let ids: Vec<(i64,)> =
        sqlx::query_as("SELECT DISTINCT user_id FROM campaign_participations WHERE campaign_id = $1 ORDER BY user_id")
            .bind(campaign_id)
            .fetch_all(conn)
            .await?;
    Ok(ids.into_iter().map(|(id,)| id).collect())
}
