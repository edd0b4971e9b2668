use actix_web::{http::StatusCode, test::TestRequest, web, web::ServiceConfig};
use groupbuy_engine::{db_types::Money, test_utils::prepare_env::test_database, PointLedgerApi, SqliteDatabase};

use super::helpers::{post_json, send_request};
use crate::{
    data_objects::PointsRequest,
    helpers::IDEMPOTENCY_KEY_HEADER,
    routes::{CreateWalletRoute, EarnPointsRoute, HoldPointsRoute, WalletHistoryRoute, WalletRoute},
};

#[actix_web::test]
async fn wallet_mutations_need_an_idempotency_key() {
    let db = test_database().await;
    let res = send_request(TestRequest::post().uri("/wallets/1"), configure(db.clone())).await.expect("Request failed");
    assert_eq!(res.status, StatusCode::OK);

    let res = send_request(post_json("/wallets/1/earn", &points(5000)), configure(db.clone()))
        .await
        .expect("Request failed");
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    assert_eq!(res.json()["error"], "The Idempotency-Key header is required for this request.");

    let res = send_request(TestRequest::get().uri("/wallets/1"), configure(db)).await.expect("Request failed");
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.json()["balance"], 0);
}

#[actix_web::test]
async fn replayed_keys_do_not_apply_twice() {
    let db = test_database().await;
    send_request(TestRequest::post().uri("/wallets/2"), configure(db.clone())).await.expect("Request failed");
    for replay in [false, true] {
        let req = post_json("/wallets/2/earn", &points(5000)).insert_header((IDEMPOTENCY_KEY_HEADER, "signup-bonus-2"));
        let res = send_request(req, configure(db.clone())).await.expect("Request failed");
        assert_eq!(res.status, StatusCode::OK);
        let json = res.json();
        assert_eq!(json["replayed"], replay);
        assert_eq!(json["wallet"]["balance"], 5000);
        assert_eq!(json["wallet"]["available"], 5000);
    }
    let req = post_json("/wallets/2/hold", &points(6000)).insert_header((IDEMPOTENCY_KEY_HEADER, "order:GB1:hold"));
    let res = send_request(req, configure(db.clone())).await.expect("Request failed");
    assert_eq!(res.status, StatusCode::CONFLICT);

    let req = post_json("/wallets/2/hold", &points(1500)).insert_header((IDEMPOTENCY_KEY_HEADER, "order:GB2:hold"));
    let res = send_request(req, configure(db.clone())).await.expect("Request failed");
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.json()["wallet"]["available"], 3500);

    let res =
        send_request(TestRequest::get().uri("/wallets/2/history"), configure(db)).await.expect("Request failed");
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.json().as_array().map(Vec::len), Some(2));
}

#[actix_web::test]
async fn unknown_wallets_are_not_found() {
    let db = test_database().await;
    let res = send_request(TestRequest::get().uri("/wallets/404"), configure(db.clone())).await.expect("Request failed");
    assert_eq!(res.status, StatusCode::NOT_FOUND);
    let req = post_json("/wallets/404/earn", &points(10)).insert_header((IDEMPOTENCY_KEY_HEADER, "k"));
    let res = send_request(req, configure(db)).await.expect("Request failed");
    assert_eq!(res.status, StatusCode::NOT_FOUND);
}

fn points(amount: i64) -> PointsRequest {
    PointsRequest { amount: Money::from(amount), via_hold: false }
}

fn configure(db: SqliteDatabase) -> impl FnOnce(&mut ServiceConfig) {
    move |cfg| {
        let api = PointLedgerApi::new(db);
        cfg.service(CreateWalletRoute::<SqliteDatabase>::new())
            .service(WalletRoute::<SqliteDatabase>::new())
            .service(WalletHistoryRoute::<SqliteDatabase>::new())
            .service(EarnPointsRoute::<SqliteDatabase>::new())
            .service(HoldPointsRoute::<SqliteDatabase>::new())
            .app_data(web::Data::new(api));
    }
}
