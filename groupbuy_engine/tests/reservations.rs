use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration as StdDuration,
};

use chrono::{Duration, Utc};
use futures_util::FutureExt;
use groupbuy_engine::{
    db_types::{CampaignStatus, DiscountStage, Money, NewCampaign, NewSellableUnit},
    events::{EventHandlers, EventHooks, EventProducers},
    ReservationApi,
    ReservationError,
    SqliteDatabase,
};
use log::*;
use tokio::runtime::Runtime;

mod support;
use support::{engine, engine_with_producers, eventually};

#[tokio::test]
async fn crossing_a_threshold_prices_the_whole_increment_at_the_new_tier() {
    let engine = engine().await;
    let unit = engine.unit(10_000, 1_000, &[(0, 0, 0), (1, 100, 10), (2, 500, 20)]).await;
    let first = engine.reservations.reserve(unit, 95).await.unwrap();
    assert_eq!(first.snapshot.discount_percent, 0);
    assert_eq!(first.snapshot.unit_price, Money::from(10_000));
    let second = engine.reservations.reserve(unit, 10).await.unwrap();
    assert_eq!(second.unit.cumulative_qty, 105);
    assert_eq!(second.snapshot.level, 1);
    assert_eq!(second.snapshot.discount_percent, 10);
    assert_eq!(second.snapshot.unit_price, Money::from(9_000));

    let status = engine.reservations.stage_status(unit).await.unwrap();
    assert_eq!(status.current.level, 1);
    assert_eq!(status.next.map(|s| s.threshold_qty), Some(500));
    assert_eq!(status.remaining_to_next, Some(395));
}

#[tokio::test]
async fn capacity_is_never_exceeded() {
    let engine = engine().await;
    let unit = engine.unit(1_000, 10, &[]).await;
    engine.reservations.reserve(unit, 8).await.unwrap();
    let err = engine.reservations.reserve(unit, 3).await.unwrap_err();
    assert!(matches!(err, ReservationError::CapacityExceeded { requested: 3, remaining: 2, .. }), "{err}");
    assert!(!err.is_retryable());
    assert_eq!(engine.cumulative_qty(unit).await, 8);
    let err = engine.reservations.reserve(unit, 0).await.unwrap_err();
    assert!(matches!(err, ReservationError::InvalidQuantity(0)));
    let err = engine.reservations.reserve(9_999, 1).await.unwrap_err();
    assert!(matches!(err, ReservationError::UnitNotFound(9_999)));
}

#[tokio::test]
async fn concurrent_reservations_never_oversell() {
    let engine = engine().await;
    let unit = engine.unit(1_000, 10, &[]).await;
    let tasks = (0..40)
        .map(|_| {
            let api = engine.reservations.clone();
            tokio::spawn(async move {
                loop {
                    match api.reserve(unit, 1).await {
                        Err(e) if e.is_retryable() => tokio::time::sleep(StdDuration::from_millis(10)).await,
                        result => return result,
                    }
                }
            })
        })
        .collect::<Vec<_>>();
    let mut reserved = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => reserved += 1,
            Err(e) => assert!(matches!(e, ReservationError::CapacityExceeded { .. }), "Unexpected reservation error: {e}"),
        }
    }
    assert_eq!(reserved, 10);
    assert_eq!(engine.cumulative_qty(unit).await, 10);
    engine.finish().await;
}

#[tokio::test]
async fn a_held_unit_lock_times_out_and_can_be_retried() {
    let engine = engine().await;
    let unit = engine.unit(1_000, 10, &[]).await;
    let impatient = SqliteDatabase::new_with_options(engine.db.url(), 1, StdDuration::from_millis(50)).await.unwrap();
    let reservations = ReservationApi::new(impatient.clone(), EventProducers::default());
    // Open the single connection before the lock is taken
    assert!(reservations.fetch_unit(unit).await.unwrap().is_some());

    let mut holder = engine.db.pool().begin().await.unwrap();
    sqlx::query("UPDATE sellable_units SET updated_at = CURRENT_TIMESTAMP WHERE id = $1")
        .bind(unit)
        .execute(&mut *holder)
        .await
        .unwrap();
    let err = reservations.reserve(unit, 1).await.unwrap_err();
    assert!(matches!(err, ReservationError::LockTimeout), "{err}");
    assert!(err.is_retryable());
    assert!(err.retry_after().is_some());
    holder.rollback().await.unwrap();

    let reservation = reservations.reserve(unit, 1).await.unwrap();
    assert_eq!(reservation.unit.cumulative_qty, 1);
    impatient.close().await;
    engine.finish().await;
}

#[tokio::test]
async fn reserve_then_release_is_a_no_op() {
    let engine = engine().await;
    let unit = engine.unit(1_000, 50, &[]).await;
    engine.reservations.reserve(unit, 5).await.unwrap();
    engine.reservations.reserve(unit, 7).await.unwrap();
    engine.reservations.release(unit, 7).await.unwrap();
    assert_eq!(engine.cumulative_qty(unit).await, 5);
}

#[tokio::test]
async fn release_below_zero_fails_loudly() {
    let engine = engine().await;
    let unit = engine.unit(1_000, 50, &[]).await;
    engine.reservations.reserve(unit, 2).await.unwrap();
    let err = engine.reservations.release(unit, 3).await.unwrap_err();
    assert!(matches!(err, ReservationError::StockUnderflow { requested: 3, cumulative: 2, .. }), "{err}");
    assert!(err.is_invariant_violation());
    assert_eq!(engine.cumulative_qty(unit).await, 2);
}

#[tokio::test]
async fn invalid_units_are_rejected() {
    let engine = engine().await;
    let dup = NewSellableUnit {
        name: "Hallabong".into(),
        base_price: Money::from(5_000),
        stock: 10,
        stages: vec![
            DiscountStage::new(1, 5, 5),
            DiscountStage::new(2, 5, 10),
        ],
    };
    let err = engine.reservations.create_unit(dup).await.unwrap_err();
    assert!(matches!(err, ReservationError::InvalidStageSchedule(_)), "{err}");
    let empty = NewSellableUnit { name: "Hallabong".into(), base_price: Money::from(5_000), stock: 0, stages: vec![] };
    assert!(matches!(engine.reservations.create_unit(empty).await, Err(ReservationError::InvalidUnit(_))));
}

#[test]
fn burst_reservations_serialise_on_the_unit_lock() {
    const TASKS: usize = 20;
    let rt = Runtime::new().unwrap();
    rt.block_on(async move {
        let engine = engine().await;
        let unit = engine.unit(1_000, 50, &[(1, 30, 10)]).await;
        info!("🚀️ Firing {TASKS} concurrent reservations of 3 against a stock of 50");
        let mut handles = Vec::with_capacity(TASKS);
        for _ in 0..TASKS {
            let api = engine.reservations.clone();
            handles.push(tokio::spawn(async move { api.reserve(unit, 3).await }));
        }
        let mut ok = 0;
        let mut crossed = 0;
        for h in handles {
            match h.await.unwrap() {
                Ok(r) => {
                    ok += 1;
                    assert!(r.unit.cumulative_qty <= 50);
                    // Priced at the tier of the quantity read under the lock
                    let expected = if r.unit.cumulative_qty >= 30 { 10 } else { 0 };
                    assert_eq!(r.snapshot.discount_percent, expected);
                    if expected == 10 {
                        crossed += 1;
                    }
                },
                Err(e) => assert!(matches!(e, ReservationError::CapacityExceeded { .. }), "{e}"),
            }
        }
        assert_eq!(ok, 16);
        // Cumulative quantities 30, 33, ..., 48
        assert_eq!(crossed, 7);
        assert_eq!(engine.cumulative_qty(unit).await, 48);
    });
}

fn campaign(unit_id: i64, target_qty: i64) -> NewCampaign {
    NewCampaign {
        unit_id,
        target_qty,
        stage_count: 2,
        max_discount_percent: 20,
        deadline: Utc::now() + Duration::hours(1),
    }
}

#[tokio::test]
async fn campaign_succeeds_exactly_once() {
    let engine = engine().await;
    let unit = engine.unit(1_000, 100, &[]).await;
    let opened = engine.reservations.open_campaign(campaign(unit, 10), Utc::now()).await.unwrap();
    let thresholds = opened.stages.iter().map(|s| (s.threshold_qty, s.discount_percent)).collect::<Vec<_>>();
    assert_eq!(thresholds, vec![(3, 10), (7, 20)]);
    let id = opened.campaign.id;

    let first = engine.reservations.participate(id, 1, 4, Utc::now()).await.unwrap();
    assert!(!first.reached_target);
    assert_eq!(first.snapshot.discount_percent, 10);
    assert_eq!(first.snapshot.unit_price, Money::from(900));

    let second = engine.reservations.participate(id, 2, 6, Utc::now()).await.unwrap();
    assert!(second.reached_target);
    assert_eq!(second.campaign.status, CampaignStatus::Success);
    assert_eq!(second.snapshot.unit_price, Money::from(800));

    let third = engine.reservations.participate(id, 3, 1, Utc::now()).await.unwrap();
    assert!(!third.reached_target);
    assert_eq!(third.campaign.status, CampaignStatus::Success);
    assert_eq!(third.campaign.current_qty, 11);
    assert_eq!(engine.cumulative_qty(unit).await, 11);

    let closed = engine.reservations.close_campaign(id).await.unwrap();
    assert!(closed.changed);
    assert!(closed.succeeded());
    assert_eq!(closed.released_qty, 0);
    assert_eq!(engine.cumulative_qty(unit).await, 11);
    let again = engine.reservations.close_campaign(id).await.unwrap();
    assert!(!again.changed);
    let err = engine.reservations.participate(id, 4, 1, Utc::now()).await.unwrap_err();
    assert!(matches!(err, ReservationError::CampaignClosed(_)));
}

#[tokio::test]
async fn degenerate_campaign_schedules_are_rejected() {
    let engine = engine().await;
    let unit = engine.unit(1_000, 100, &[]).await;
    let mut tiny = campaign(unit, 2);
    tiny.stage_count = 4;
    let err = engine.reservations.open_campaign(tiny, Utc::now()).await.unwrap_err();
    assert!(matches!(err, ReservationError::InvalidStageSchedule(_)), "{err}");
    let mut late = campaign(unit, 10);
    late.deadline = Utc::now() - Duration::minutes(1);
    let err = engine.reservations.open_campaign(late, Utc::now()).await.unwrap_err();
    assert!(matches!(err, ReservationError::InvalidCampaign(_)), "{err}");
    let err = engine.reservations.open_campaign(campaign(4_242, 10), Utc::now()).await.unwrap_err();
    assert!(matches!(err, ReservationError::UnitNotFound(4_242)), "{err}");
}

#[tokio::test]
async fn expired_campaigns_are_swept_and_return_unsold_stock() {
    let engine = engine().await;
    let unit = engine.unit(1_000, 100, &[]).await;
    let open = engine.reservations.open_campaign(campaign(unit, 50), Utc::now()).await.unwrap().campaign.id;
    let done = engine.reservations.open_campaign(campaign(unit, 5), Utc::now()).await.unwrap().campaign.id;
    engine.reservations.participate(open, 1, 4, Utc::now()).await.unwrap();
    engine.reservations.participate(done, 1, 5, Utc::now()).await.unwrap();
    assert_eq!(engine.cumulative_qty(unit).await, 9);

    let nothing = engine.reservations.close_expired(Utc::now()).await.unwrap();
    assert!(nothing.closed.is_empty());

    let later = Utc::now() + Duration::hours(2);
    let err = engine.reservations.participate(open, 2, 1, later).await.unwrap_err();
    assert!(matches!(err, ReservationError::CampaignExpired(_)));
    let report = engine.reservations.close_expired(later).await.unwrap();
    assert_eq!(report.closed.len(), 2);
    assert!(report.failed.is_empty());
    // The campaign that missed its target gives its 4 back. The successful one keeps its 5.
    assert_eq!(engine.cumulative_qty(unit).await, 5);
    let again = engine.reservations.close_expired(later).await.unwrap();
    assert!(again.closed.is_empty());
}

#[tokio::test]
async fn campaign_hooks_fire() {
    let succeeded = Arc::new(AtomicUsize::new(0));
    let closed = Arc::new(AtomicUsize::new(0));
    let mut hooks = EventHooks::default();
    let s = succeeded.clone();
    hooks.on_campaign_succeeded(move |ev| {
        info!("🪝️ Campaign #{} succeeded with {} participants", ev.campaign.id, ev.participants.len());
        assert_eq!(ev.participants, vec![7, 8]);
        s.fetch_add(1, Ordering::SeqCst);
        async {}.boxed()
    });
    let c = closed.clone();
    hooks.on_campaign_closed(move |ev| {
        assert!(ev.succeeded);
        c.fetch_add(1, Ordering::SeqCst);
        async {}.boxed()
    });
    let handlers = EventHandlers::new(16, hooks);
    let engine = engine_with_producers(handlers.producers()).await;
    handlers.start_handlers().await;

    let unit = engine.unit(1_000, 100, &[]).await;
    let id = engine.reservations.open_campaign(campaign(unit, 3), Utc::now()).await.unwrap().campaign.id;
    engine.reservations.participate(id, 7, 1, Utc::now()).await.unwrap();
    engine.reservations.participate(id, 8, 2, Utc::now()).await.unwrap();
    engine.reservations.close_campaign(id).await.unwrap();
    engine.reservations.close_campaign(id).await.unwrap();
    assert!(eventually(|| succeeded.load(Ordering::SeqCst) == 1 && closed.load(Ordering::SeqCst) == 1).await);
}
