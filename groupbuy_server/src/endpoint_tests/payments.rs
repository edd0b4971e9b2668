use actix_web::{
    http::{header::RETRY_AFTER, StatusCode},
    test::TestRequest,
    web,
    web::ServiceConfig,
};
use chrono::Utc;
use groupbuy_engine::{
    db_types::{CorrelationId, Money, NewSellableUnit, PaymentStatus},
    events::EventProducers,
    order_objects::{ConfirmOrderRequest, OrderLineRequest},
    payment_objects::CreatePaymentRequest,
    test_utils::{mock_gateway::MockGateway, prepare_env::test_database},
    traits::{GatewayError, GatewayPayment, GatewayPaymentStatus, WebhookEvent},
    OrderFlowApi,
    PaymentFlowApi,
    PointLedgerApi,
    ReservationApi,
    SqliteDatabase,
};

use super::{
    helpers::{post_json, send_request},
    mocks::MockPgGateway,
};
use crate::{
    helpers::{WEBHOOK_ID_HEADER, WEBHOOK_SIGNATURE_HEADER, WEBHOOK_TIMESTAMP_HEADER},
    routes::{CreatePaymentRoute, PaymentRoute, PaymentWebhookRoute, SyncPaymentRoute},
};

const BODY: &str = r#"{"type":"Transaction.Paid","timestamp":"2026-10-18T10:00:00Z","data":{"paymentId":"x"}}"#;

struct ReadyPayment {
    order_id: i64,
    payment_id: i64,
    correlation_id: CorrelationId,
}

/// A confirmed order for one 10,000 unit, with a cash-only payment waiting on the gateway.
async fn ready_payment(db: &SqliteDatabase) -> ReadyPayment {
    PointLedgerApi::new(db.clone()).create_wallet(1).await.expect("Could not create wallet");
    let unit = ReservationApi::new(db.clone(), EventProducers::default())
        .create_unit(NewSellableUnit {
            name: "Jeju tangerines, 5kg".into(),
            base_price: Money::from(10_000),
            stock: 10,
            stages: vec![],
        })
        .await
        .expect("Could not create unit");
    let order = OrderFlowApi::new(db.clone())
        .confirm_order(ConfirmOrderRequest::new(1, vec![OrderLineRequest { unit_id: unit.unit.id, qty: 1 }]))
        .await
        .expect("Could not confirm order");
    let payment = PaymentFlowApi::new(db.clone(), MockGateway::new(), EventProducers::default())
        .create_ready(CreatePaymentRequest {
            order_id: order.order.id,
            cash_amount: Money::from(10_000),
            point_amount: Money::zero(),
            allocation: None,
        })
        .await
        .expect("Could not create payment");
    ReadyPayment {
        order_id: order.order.id,
        payment_id: payment.payment.id,
        correlation_id: payment.payment.correlation_id,
    }
}

fn webhook_request() -> TestRequest {
    TestRequest::post()
        .uri("/webhook/payment")
        .insert_header((WEBHOOK_ID_HEADER, "msg_1"))
        .insert_header((WEBHOOK_SIGNATURE_HEADER, "v1,c2lnbmF0dXJl"))
        .insert_header((WEBHOOK_TIMESTAMP_HEADER, Utc::now().timestamp().to_string()))
        .set_payload(BODY)
}

fn event_for(correlation_id: &CorrelationId) -> WebhookEvent {
    WebhookEvent {
        event_type: "Transaction.Paid".into(),
        correlation_id: correlation_id.clone(),
        transaction_id: Some("tx_1".into()),
        status_hint: Some(GatewayPaymentStatus::Paid),
    }
}

fn paid(total: i64) -> GatewayPayment {
    GatewayPayment {
        status: GatewayPaymentStatus::Paid,
        total_amount: Money::from(total),
        cancelled_amount: Money::zero(),
        currency: "KRW".into(),
        method: Some("CARD".into()),
        requested_at: Some(Utc::now()),
        paid_at: Some(Utc::now()),
    }
}

async fn payment_status(db: &SqliteDatabase, payment_id: i64) -> PaymentStatus {
    let api = PaymentFlowApi::new(db.clone(), MockGateway::new(), EventProducers::default());
    api.fetch_payment(payment_id).await.unwrap().unwrap().payment.payment.status
}

#[actix_web::test]
async fn unverified_webhooks_are_rejected_without_a_lookup() {
    let db = test_database().await;
    let ready = ready_payment(&db).await;
    let mut gateway = MockPgGateway::new();
    gateway
        .expect_verify_and_parse_webhook()
        .times(1)
        .returning(|_, _| Err(GatewayError::VerificationFailed("No signature matched.".into())));
    gateway.expect_lookup_by_correlation_id().never();
    let res = send_request(webhook_request(), configure(db.clone(), gateway)).await.expect("Request failed");
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);
    assert_eq!(payment_status(&db, ready.payment_id).await, PaymentStatus::Ready);
}

#[actix_web::test]
async fn webhooks_for_unknown_payments_are_acknowledged() {
    let db = test_database().await;
    let mut gateway = MockPgGateway::new();
    gateway.expect_verify_and_parse_webhook().returning(|_, _| Ok(event_for(&CorrelationId::from("pay_elsewhere"))));
    gateway.expect_lookup_by_correlation_id().never();
    let res = send_request(webhook_request(), configure(db, gateway)).await.expect("Request failed");
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.json()["success"], false);
}

#[actix_web::test]
async fn gateway_outages_ask_for_redelivery() {
    let db = test_database().await;
    let ready = ready_payment(&db).await;
    let mut gateway = MockPgGateway::new();
    let correlation_id = ready.correlation_id.clone();
    gateway.expect_verify_and_parse_webhook().returning(move |_, _| Ok(event_for(&correlation_id)));
    gateway
        .expect_lookup_by_correlation_id()
        .times(3)
        .returning(|_| Err(GatewayError::Unavailable("connect timeout".into())));
    let res = send_request(webhook_request(), configure(db.clone(), gateway)).await.expect("Request failed");
    assert_eq!(res.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(res.headers.get(RETRY_AFTER).unwrap(), "5");
    assert_eq!(payment_status(&db, ready.payment_id).await, PaymentStatus::Ready);
}

#[actix_web::test]
async fn a_paid_webhook_settles_the_payment() {
    let db = test_database().await;
    let ready = ready_payment(&db).await;
    let mut gateway = MockPgGateway::new();
    let correlation_id = ready.correlation_id.clone();
    gateway.expect_verify_and_parse_webhook().returning(move |_, _| Ok(event_for(&correlation_id)));
    let expected = ready.correlation_id.clone();
    gateway.expect_lookup_by_correlation_id().withf(move |id| *id == expected).times(1).returning(|_| Ok(paid(10_000)));
    let res = send_request(webhook_request(), configure(db.clone(), gateway)).await.expect("Request failed");
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.json()["success"], true);
    assert_eq!(payment_status(&db, ready.payment_id).await, PaymentStatus::Paid);

    let uri = format!("/payments/{}", ready.payment_id);
    let res = send_request(TestRequest::get().uri(&uri), configure(db, MockPgGateway::new()))
        .await
        .expect("Request failed");
    assert_eq!(res.status, StatusCode::OK);
    let json = res.json();
    assert_eq!(json["payment"]["status"], "PAID");
    assert_eq!(json["payment"]["order_id"], ready.order_id);
    assert_eq!(json["transactions"].as_array().map(Vec::len), Some(1));
}

#[actix_web::test]
async fn a_gateway_amount_mismatch_is_a_conflict() {
    let db = test_database().await;
    let ready = ready_payment(&db).await;
    let mut gateway = MockPgGateway::new();
    let correlation_id = ready.correlation_id.clone();
    gateway.expect_verify_and_parse_webhook().returning(move |_, _| Ok(event_for(&correlation_id)));
    gateway.expect_lookup_by_correlation_id().returning(|_| Ok(paid(9_999)));
    let res = send_request(webhook_request(), configure(db.clone(), gateway)).await.expect("Request failed");
    assert_eq!(res.status, StatusCode::CONFLICT);
    assert_eq!(payment_status(&db, ready.payment_id).await, PaymentStatus::Ready);
}

#[actix_web::test]
async fn creating_payments() {
    let db = test_database().await;
    let ready = ready_payment(&db).await;
    let request = CreatePaymentRequest {
        order_id: ready.order_id,
        cash_amount: Money::from(10_000),
        point_amount: Money::zero(),
        allocation: None,
    };
    let res = send_request(post_json("/payments", &request), configure(db.clone(), MockPgGateway::new()))
        .await
        .expect("Request failed");
    assert_eq!(res.status, StatusCode::CREATED);
    assert_eq!(res.json()["payment"]["correlation_id"], ready.correlation_id.as_str());

    let request = CreatePaymentRequest { order_id: 999, ..request };
    let res = send_request(post_json("/payments", &request), configure(db.clone(), MockPgGateway::new()))
        .await
        .expect("Request failed");
    assert_eq!(res.status, StatusCode::NOT_FOUND);

    let res = send_request(TestRequest::post().uri("/payments/sync/pay_nobody"), configure(db, MockPgGateway::new()))
        .await
        .expect("Request failed");
    assert_eq!(res.status, StatusCode::NOT_FOUND);
}

fn configure(db: SqliteDatabase, gateway: MockPgGateway) -> impl FnOnce(&mut ServiceConfig) {
    move |cfg| {
        let api = PaymentFlowApi::new(db, gateway, EventProducers::default());
        cfg.service(CreatePaymentRoute::<SqliteDatabase, MockPgGateway>::new())
            .service(SyncPaymentRoute::<SqliteDatabase, MockPgGateway>::new())
            .service(PaymentRoute::<SqliteDatabase, MockPgGateway>::new())
            .service(PaymentWebhookRoute::<SqliteDatabase, MockPgGateway>::new())
            .app_data(web::Data::new(api));
    }
}
