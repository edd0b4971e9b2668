use actix_web::{
    http::{header::RETRY_AFTER, StatusCode},
    test::TestRequest,
    web,
    web::ServiceConfig,
};
use chrono::{TimeZone, Utc};
use groupbuy_engine::{
    db_types::{Money, SellableUnit},
    events::EventProducers,
    stages::PriceSnapshot,
    traits::{Reservation, ReservationError},
    ReservationApi,
};

use super::{
    helpers::{post_json, send_request},
    mocks::MockInventoryManager,
};
use crate::{
    data_objects::QtyRequest,
    routes::{CampaignRoute, CloseCampaignRoute, ReleaseStockRoute, ReserveStockRoute, UnitRoute},
};

#[actix_web::test]
async fn reserve_returns_the_price_snapshot() {
    let mut inventory = MockInventoryManager::new();
    inventory.expect_reserve_stock().withf(|unit_id, qty| *unit_id == 3 && *qty == 4).times(1).returning(|_, qty| {
        Ok(Reservation {
            unit: unit(3, 12),
            qty,
            snapshot: PriceSnapshot { level: 1, discount_percent: 10, unit_price: Money::from(1800) },
        })
    });
    let res = send_request(post_json("/units/3/reserve", &QtyRequest { qty: 4 }), configure(inventory))
        .await
        .expect("Request failed");
    assert_eq!(res.status, StatusCode::OK);
    let json = res.json();
    assert_eq!(json["qty"], 4);
    assert_eq!(json["snapshot"]["discount_percent"], 10);
    assert_eq!(json["snapshot"]["unit_price"], 1800);
    assert_eq!(json["unit"]["cumulative_qty"], 12);
}

#[actix_web::test]
async fn capacity_errors_are_conflicts() {
    let mut inventory = MockInventoryManager::new();
    inventory
        .expect_reserve_stock()
        .returning(|unit_id, qty| Err(ReservationError::CapacityExceeded { unit_id, requested: qty, remaining: 2 }));
    let res = send_request(post_json("/units/3/reserve", &QtyRequest { qty: 5 }), configure(inventory))
        .await
        .expect("Request failed");
    assert_eq!(res.status, StatusCode::CONFLICT);
    assert!(res.headers.get(RETRY_AFTER).is_none());
    assert_eq!(res.json()["error"], "Unit 3 cannot take 5 more. Only 2 remain.");
}

#[actix_web::test]
async fn lock_timeouts_ask_the_client_to_retry() {
    let mut inventory = MockInventoryManager::new();
    inventory.expect_reserve_stock().returning(|_, _| Err(ReservationError::LockTimeout));
    let res = send_request(post_json("/units/3/reserve", &QtyRequest { qty: 1 }), configure(inventory))
        .await
        .expect("Request failed");
    assert_eq!(res.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(res.headers.get(RETRY_AFTER).unwrap(), "1");
}

#[actix_web::test]
async fn invalid_quantities_never_reach_the_store() {
    let mut inventory = MockInventoryManager::new();
    inventory.expect_release_stock().returning(|_, qty| Err(ReservationError::InvalidQuantity(qty)));
    let res = send_request(post_json("/units/3/release", &QtyRequest { qty: 0 }), configure(inventory))
        .await
        .expect("Request failed");
    assert_eq!(res.status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[actix_web::test]
async fn unknown_units_and_campaigns_are_not_found() {
    let mut inventory = MockInventoryManager::new();
    inventory.expect_fetch_unit_for_pricing().returning(|_| Ok(None));
    let res = send_request(TestRequest::get().uri("/units/99"), configure(inventory)).await.expect("Request failed");
    assert_eq!(res.status, StatusCode::NOT_FOUND);

    let mut inventory = MockInventoryManager::new();
    inventory.expect_fetch_campaign().returning(|_| Ok(None));
    let res =
        send_request(TestRequest::get().uri("/campaigns/7"), configure(inventory)).await.expect("Request failed");
    assert_eq!(res.status, StatusCode::NOT_FOUND);

    let mut inventory = MockInventoryManager::new();
    inventory.expect_close_campaign().returning(|id| Err(ReservationError::CampaignNotFound(id)));
    let res =
        send_request(TestRequest::post().uri("/campaigns/7/close"), configure(inventory)).await.expect("Request failed");
    assert_eq!(res.status, StatusCode::NOT_FOUND);
    assert_eq!(res.json()["error"], "Campaign 7 does not exist.");
}

fn configure(inventory: MockInventoryManager) -> impl FnOnce(&mut ServiceConfig) {
    move |cfg| {
        let api = ReservationApi::new(inventory, EventProducers::default());
        cfg.service(UnitRoute::<MockInventoryManager>::new())
            .service(ReserveStockRoute::<MockInventoryManager>::new())
            .service(ReleaseStockRoute::<MockInventoryManager>::new())
            .service(CampaignRoute::<MockInventoryManager>::new())
            .service(CloseCampaignRoute::<MockInventoryManager>::new())
            .app_data(web::Data::new(api));
    }
}

fn unit(id: i64, cumulative_qty: i64) -> SellableUnit {
    let ts = Utc.with_ymd_and_hms(2026, 10, 1, 9, 0, 0).unwrap();
    SellableUnit {
        id,
        name: "Jeju tangerines, 5kg".into(),
        base_price: Money::from(2000),
        stock: 100,
        cumulative_qty,
        created_at: ts,
        updated_at: ts,
    }
}
