use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use futures_util::FutureExt;
use groupbuy_engine::{
    db_types::{CorrelationId, Money, OrderStatusType, OrderWithLines, PaymentStatus, PaymentWithLines},
    events::{EventHandlers, EventHooks},
    payment_objects::{CreatePaymentRequest, WebhookOutcome},
    payment_rules::StatusTransition,
    traits::{GatewayError, GatewayPaymentStatus, ReconcileOutcome, TransactionRecord},
    PaymentFlowError,
    POINTS_METHOD,
};

mod support;
use support::{engine, engine_with_producers, eventually, Engine};

fn m(v: i64) -> Money {
    Money::from(v)
}

/// A user with 5,000 points and a confirmed order for one 10,000 unit, 3,000 of it in points.
async fn confirmed(engine: &Engine) -> (i64, OrderWithLines, PaymentWithLines) {
    engine.user_with_points(1, 5_000).await;
    let unit = engine.unit(10_000, 100, &[]).await;
    let order = engine.order(1, &[(unit, 1)], 3_000).await;
    let payment = engine.ready_payment(&order).await;
    (unit, order, payment)
}

async fn deliver(engine: &Engine, correlation_id: &CorrelationId, tx_id: &str) -> ReconcileOutcome {
    let (body, headers) = engine.gateway.webhook("Transaction.Paid", correlation_id, tx_id);
    match engine.payments.handle_webhook(&body, &headers).await.expect("Error handling webhook") {
        WebhookOutcome::Reconciled(outcome) => outcome,
        WebhookOutcome::UnknownPayment(id) => panic!("Payment {id} should be known"),
    }
}

#[tokio::test]
async fn a_paid_webhook_settles_the_payment_and_burns_the_held_points() {
    let settled = Arc::new(AtomicUsize::new(0));
    let mut hooks = EventHooks::default();
    let s = settled.clone();
    hooks.on_payment_settled(move |ev| {
        assert_eq!(ev.order.status, OrderStatusType::Paid);
        s.fetch_add(1, Ordering::SeqCst);
        async {}.boxed()
    });
    let handlers = EventHandlers::new(16, hooks);
    let engine = engine_with_producers(handlers.producers()).await;
    handlers.start_handlers().await;

    let (_, order, payment) = confirmed(&engine).await;
    let p = &payment.payment;
    assert_eq!(p.status, PaymentStatus::Ready);
    assert_eq!(p.amount, m(10_000));
    assert!(p.correlation_id.as_str().starts_with(&format!("pay_{}_", order.order.order_no)));
    assert_eq!(payment.lines.len(), 1);
    assert_eq!(payment.lines[0].cash_amount, m(7_000));
    assert_eq!(payment.lines[0].point_amount, m(3_000));

    engine.gateway.set_paid(&p.correlation_id, m(7_000));
    let outcome = deliver(&engine, &p.correlation_id, "tx_1").await;
    assert!(outcome.settled());
    assert_eq!(outcome.transition, StatusTransition::Advance(PaymentStatus::Paid));
    assert_eq!(outcome.payment.paid_cash, m(7_000));
    assert_eq!(outcome.payment.paid_point, m(3_000));
    assert_eq!(outcome.payment.method.as_deref(), Some("CARD"));
    assert_eq!(outcome.order.status, OrderStatusType::Paid);
    assert_eq!(outcome.order.payment_method.as_deref(), Some("CARD"));
    assert!(matches!(outcome.transaction, TransactionRecord::Recorded(ref t) if t.provider == "portone"));

    let wallet = engine.points.fetch_wallet(1).await.unwrap().unwrap();
    assert_eq!(wallet.balance, m(2_000));
    assert_eq!(wallet.hold, m(0));
    assert!(eventually(|| settled.load(Ordering::SeqCst) == 1).await);
}

#[tokio::test]
async fn duplicate_deliveries_append_one_transaction() {
    let engine = engine().await;
    let (_, _, payment) = confirmed(&engine).await;
    let p = &payment.payment;
    engine.gateway.set_paid(&p.correlation_id, m(7_000));
    deliver(&engine, &p.correlation_id, "tx_1").await;
    let again = deliver(&engine, &p.correlation_id, "tx_1").await;
    assert!(!again.settled());
    assert_eq!(again.transition, StatusTransition::Unchanged);
    assert_eq!(again.transaction, TransactionRecord::Duplicate);

    let details = engine.payments.fetch_payment(p.id).await.unwrap().unwrap();
    assert_eq!(details.transactions.len(), 1);
    assert_eq!(details.payment.payment.status, PaymentStatus::Paid);
    let wallet = engine.points.fetch_wallet(1).await.unwrap().unwrap();
    assert_eq!(wallet.balance, m(2_000));
}

#[tokio::test]
async fn tampered_or_unknown_webhooks_change_nothing() {
    let engine = engine().await;
    let (_, _, payment) = confirmed(&engine).await;
    let p = &payment.payment;
    engine.gateway.set_paid(&p.correlation_id, m(7_000));

    let (mut body, headers) = engine.gateway.webhook("Transaction.Paid", &p.correlation_id, "tx_1");
    body.extend_from_slice(b" ");
    let err = engine.payments.handle_webhook(&body, &headers).await.unwrap_err();
    assert!(matches!(err, PaymentFlowError::WebhookVerificationFailed(_)), "{err}");

    let (body, mut headers) = engine.gateway.webhook("Transaction.Paid", &p.correlation_id, "tx_1");
    headers.signature = String::new();
    let err = engine.payments.handle_webhook(&body, &headers).await.unwrap_err();
    assert!(matches!(err, PaymentFlowError::WebhookVerificationFailed(_)), "{err}");
    assert_eq!(engine.gateway.lookup_count(), 0);

    let stranger = CorrelationId::from("pay_GB0000_unknown");
    let (body, headers) = engine.gateway.webhook("Transaction.Paid", &stranger, "tx_9");
    let outcome = engine.payments.handle_webhook(&body, &headers).await.unwrap();
    assert!(matches!(outcome, WebhookOutcome::UnknownPayment(id) if id == stranger));

    let details = engine.payments.fetch_payment(p.id).await.unwrap().unwrap();
    assert_eq!(details.payment.payment.status, PaymentStatus::Ready);
    assert!(details.transactions.is_empty());
}

#[tokio::test]
async fn stale_statuses_do_not_move_a_settled_payment_back() {
    let engine = engine().await;
    let (_, _, payment) = confirmed(&engine).await;
    let p = &payment.payment;
    engine.pay(&payment, "tx_1").await;
    engine.gateway.set_status(&p.correlation_id, GatewayPaymentStatus::PayPending, m(7_000));
    let outcome = deliver(&engine, &p.correlation_id, "tx_0").await;
    assert_eq!(outcome.transition, StatusTransition::Ignored);
    assert_eq!(outcome.payment.status, PaymentStatus::Paid);
    assert_eq!(outcome.order.status, OrderStatusType::Paid);
}

#[tokio::test]
async fn an_amount_mismatch_refuses_to_settle() {
    let engine = engine().await;
    let (_, order, payment) = confirmed(&engine).await;
    let p = &payment.payment;
    engine.gateway.set_paid(&p.correlation_id, m(6_999));
    let (body, headers) = engine.gateway.webhook("Transaction.Paid", &p.correlation_id, "tx_1");
    let err = engine.payments.handle_webhook(&body, &headers).await.unwrap_err();
    match err {
        PaymentFlowError::AmountMismatch { expected, reported, .. } => {
            assert_eq!(expected, m(7_000));
            assert_eq!(reported, m(6_999));
        },
        e => panic!("Unexpected error {e}"),
    }
    let order = engine.orders.fetch_order(order.order.id).await.unwrap().unwrap();
    assert_eq!(order.order.status, OrderStatusType::Confirmed);
    let wallet = engine.points.fetch_wallet(1).await.unwrap().unwrap();
    assert_eq!(wallet.hold, m(3_000));
}

#[tokio::test]
async fn a_failed_payment_releases_stock_and_points_exactly_once() {
    let failed = Arc::new(AtomicUsize::new(0));
    let mut hooks = EventHooks::default();
    let f = failed.clone();
    hooks.on_order_failed(move |ev| {
        assert!(ev.stock_released);
        assert_eq!(ev.payment_status, PaymentStatus::Failed);
        f.fetch_add(1, Ordering::SeqCst);
        async {}.boxed()
    });
    let handlers = EventHandlers::new(16, hooks);
    let engine = engine_with_producers(handlers.producers()).await;
    handlers.start_handlers().await;

    let (unit, order, payment) = confirmed(&engine).await;
    let p = &payment.payment;
    assert_eq!(engine.cumulative_qty(unit).await, 1);
    engine.gateway.set_status(&p.correlation_id, GatewayPaymentStatus::Failed, m(7_000));
    let first = deliver(&engine, &p.correlation_id, "tx_1").await;
    assert!(first.order_failed);
    assert!(first.stock_released);
    assert!(first.order.stock_released);
    assert_eq!(first.order.status, OrderStatusType::Failed);
    let second = deliver(&engine, &p.correlation_id, "tx_2").await;
    assert!(!second.order_failed);
    assert!(!second.stock_released);
    assert_eq!(second.transition, StatusTransition::Unchanged);

    assert_eq!(engine.cumulative_qty(unit).await, 0);
    let wallet = engine.points.fetch_wallet(1).await.unwrap().unwrap();
    assert_eq!(wallet.balance, m(5_000));
    assert_eq!(wallet.hold, m(0));
    assert!(eventually(|| failed.load(Ordering::SeqCst) == 1).await);

    let retry = CreatePaymentRequest { order_id: order.order.id, cash_amount: m(7_000), point_amount: m(3_000), allocation: None };
    let err = engine.payments.create_ready(retry).await.unwrap_err();
    assert!(matches!(err, PaymentFlowError::OrderNotPayable { status: OrderStatusType::Failed, .. }), "{err}");
}

#[tokio::test]
async fn gateway_lookups_are_retried() {
    let engine = engine().await;
    let (_, _, payment) = confirmed(&engine).await;
    let p = &payment.payment;
    engine.gateway.set_paid(&p.correlation_id, m(7_000));
    engine.gateway.fail_next_lookups(2);
    let outcome = deliver(&engine, &p.correlation_id, "tx_1").await;
    assert_eq!(outcome.payment.status, PaymentStatus::Paid);
    assert_eq!(engine.gateway.lookup_count(), 3);

    engine.gateway.fail_next_lookups(3);
    let err = engine.payments.sync_payment(&p.correlation_id).await.unwrap_err();
    assert!(matches!(err, PaymentFlowError::Gateway(GatewayError::Unavailable(_))), "{err}");
    assert_eq!(engine.gateway.lookup_count(), 6);
}

#[tokio::test]
async fn a_points_only_payment_settles_without_the_gateway() {
    let engine = engine().await;
    engine.user_with_points(1, 5_000).await;
    let unit = engine.unit(2_000, 100, &[]).await;
    let order = engine.order(1, &[(unit, 2)], 4_000).await;
    let payment = engine.ready_payment(&order).await;
    assert_eq!(payment.payment.status, PaymentStatus::Paid);
    assert_eq!(payment.payment.method.as_deref(), Some(POINTS_METHOD));
    assert_eq!(payment.payment.paid_point, m(4_000));
    assert_eq!(engine.gateway.lookup_count(), 0);

    let order = engine.orders.fetch_order(order.order.id).await.unwrap().unwrap();
    assert_eq!(order.order.status, OrderStatusType::Paid);
    let wallet = engine.points.fetch_wallet(1).await.unwrap().unwrap();
    assert_eq!(wallet.balance, m(1_000));
    assert_eq!(wallet.hold, m(0));
}

#[tokio::test]
async fn an_open_payment_is_reused_and_mismatched_amounts_are_rejected() {
    let engine = engine().await;
    let (_, order, payment) = confirmed(&engine).await;
    let again = engine.ready_payment(&order).await;
    assert_eq!(again.payment.id, payment.payment.id);
    assert_eq!(again.payment.correlation_id, payment.payment.correlation_id);

    let request = |cash: i64, point: i64| CreatePaymentRequest {
        order_id: order.order.id,
        cash_amount: m(cash),
        point_amount: m(point),
        allocation: None,
    };
    let err = engine.payments.create_ready(request(8_000, 2_000)).await.unwrap_err();
    assert!(matches!(err, PaymentFlowError::InvalidAmount(_)), "{err}");
    let err = engine.payments.create_ready(request(-1, 3_000)).await.unwrap_err();
    assert!(matches!(err, PaymentFlowError::InvalidAmount(_)), "{err}");
    let err = engine.payments.create_ready(CreatePaymentRequest { order_id: 999, ..request(7_000, 3_000) }).await.unwrap_err();
    assert!(matches!(err, PaymentFlowError::OrderNotFound(999)), "{err}");
}

#[tokio::test]
async fn a_cancellation_before_settlement_fails_the_order_and_returns_the_points() {
    let engine = engine().await;
    let (unit, _, payment) = confirmed(&engine).await;
    let p = &payment.payment;
    engine.gateway.set_status(&p.correlation_id, GatewayPaymentStatus::Cancelled, m(7_000));
    let first = deliver(&engine, &p.correlation_id, "tx_1").await;
    assert!(!first.settled());
    assert_eq!(first.transition, StatusTransition::Advance(PaymentStatus::Cancelled));
    assert_eq!(first.payment.paid_cash, m(0));
    assert_eq!(first.payment.paid_point, m(0));
    assert_eq!(first.order.status, OrderStatusType::Failed);
    assert!(first.order_failed);
    assert!(first.stock_released);

    let second = deliver(&engine, &p.correlation_id, "tx_2").await;
    assert_eq!(second.transition, StatusTransition::Unchanged);
    assert!(!second.stock_released);

    assert_eq!(engine.cumulative_qty(unit).await, 0);
    let wallet = engine.points.fetch_wallet(1).await.unwrap().unwrap();
    assert_eq!(wallet.balance, m(5_000));
    assert_eq!(wallet.hold, m(0));
    engine.finish().await;
}

#[tokio::test]
async fn a_cash_only_cancellation_before_settlement_is_not_a_payment() {
    let engine = engine().await;
    engine.user_with_points(1, 0).await;
    let unit = engine.unit(10_000, 10, &[]).await;
    let order = engine.order(1, &[(unit, 1)], 0).await;
    let payment = engine.ready_payment(&order).await;
    let p = &payment.payment;
    engine.gateway.set_status(&p.correlation_id, GatewayPaymentStatus::Cancelled, m(10_000));
    let outcome = deliver(&engine, &p.correlation_id, "tx_1").await;
    assert_eq!(outcome.payment.status, PaymentStatus::Cancelled);
    assert_eq!(outcome.payment.paid_cash, m(0));
    assert_eq!(outcome.order.status, OrderStatusType::Failed);
    assert_eq!(engine.cumulative_qty(unit).await, 0);
    engine.finish().await;
}
