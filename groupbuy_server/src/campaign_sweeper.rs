use std::time::Duration;

use chrono::Utc;
use groupbuy_engine::{events::EventProducers, ReservationApi, SqliteDatabase};
use log::*;
use tokio::task::JoinHandle;

/// Starts the campaign sweeper, which closes every campaign whose deadline has passed. Do not await the returned
/// JoinHandle, as it will run indefinitely.
pub fn start_campaign_sweeper(db: SqliteDatabase, producers: EventProducers, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval);
        let api = ReservationApi::new(db, producers);
        info!("🕰️ Campaign sweeper started. It runs every {}s", interval.as_secs());
        loop {
            timer.tick().await;
            debug!("🕰️ Closing expired campaigns");
            match api.close_expired(Utc::now()).await {
                Ok(report) => {
                    if !report.closed.is_empty() {
                        let ids = report.closed.iter().map(|c| format!("#{}", c.campaign.id)).collect::<Vec<_>>();
                        info!("🕰️ {} expired campaigns closed: {}", ids.len(), ids.join(", "));
                    }
                    for (id, e) in &report.failed {
                        warn!("🕰️ Campaign #{id} could not be closed and will be retried on the next run. {e}");
                    }
                },
                Err(e) => {
                    error!("🕰️ Error running the campaign sweeper: {e}");
                },
            }
        }
    })
}
