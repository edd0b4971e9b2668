use groupbuy_engine::{
    db_types::{Money, OrderStatusType},
    order_objects::{ConfirmOrderRequest, OrderLineRequest},
    OrderFlowError,
    PointLedgerError,
    ReservationError,
};

mod support;
use support::engine;

fn line(unit_id: i64, qty: i64) -> OrderLineRequest {
    OrderLineRequest { unit_id, qty }
}

#[tokio::test]
async fn confirmed_orders_freeze_their_snapshots() {
    let engine = engine().await;
    engine.user_with_points(1, 5_000).await;
    let apples = engine.unit(2_000, 100, &[(1, 10, 10)]).await;
    let pears = engine.unit(3_000, 100, &[]).await;
    engine.reservations.reserve(apples, 8).await.unwrap();

    let order = engine.order(1, &[(apples, 4), (pears, 1)], 1_500).await;
    assert_eq!(order.order.status, OrderStatusType::Confirmed);
    assert!(order.order.order_no.starts_with("GB"));
    assert_eq!(order.lines.len(), 2);
    // 8 + 4 crosses the threshold at 10
    assert_eq!(order.lines[0].discount_percent_snapshot, 10);
    assert_eq!(order.lines[0].unit_price_snapshot, Money::from(1_800));
    assert_eq!(order.lines[0].line_amount, Money::from(7_200));
    assert_eq!(order.lines[1].line_amount, Money::from(3_000));
    assert_eq!(order.order.total_amount, Money::from(10_200));
    assert_eq!(order.order.point_amount, Money::from(1_500));

    let wallet = engine.points.fetch_wallet(1).await.unwrap().unwrap();
    assert_eq!(wallet.hold, Money::from(1_500));
    let hold = format!("order:{}:hold", order.order.order_no);
    assert!(engine.points.history(1).await.unwrap().iter().any(|e| e.idempotency_key == hold));

    // Later reservations move the tier, but the confirmed order keeps its price
    engine.reservations.reserve(apples, 50).await.unwrap();
    let fetched = engine.orders.fetch_order(order.order.id).await.unwrap().unwrap();
    assert_eq!(fetched.lines, order.lines);
}

#[tokio::test]
async fn a_failed_line_rolls_back_earlier_reservations() {
    let engine = engine().await;
    engine.user_with_points(1, 0).await;
    let plenty = engine.unit(1_000, 100, &[]).await;
    let scarce = engine.unit(1_000, 2, &[]).await;
    let request = ConfirmOrderRequest::new(1, vec![line(plenty, 5), line(plenty, 3), line(scarce, 3)]);
    let err = engine.orders.confirm_order(request).await.unwrap_err();
    match err {
        OrderFlowError::ReservationFailed { line, unit_id, source } => {
            assert_eq!(line, 2);
            assert_eq!(unit_id, scarce);
            assert!(matches!(source, ReservationError::CapacityExceeded { .. }));
        },
        e => panic!("Unexpected error {e}"),
    }
    assert_eq!(engine.cumulative_qty(plenty).await, 0);
    assert_eq!(engine.cumulative_qty(scarce).await, 0);
}

#[tokio::test]
async fn a_failed_point_hold_rolls_back_every_reservation() {
    let engine = engine().await;
    engine.user_with_points(1, 100).await;
    let unit = engine.unit(1_000, 100, &[]).await;
    let request = ConfirmOrderRequest::new(1, vec![line(unit, 2)]).with_points(Money::from(500));
    let err = engine.orders.confirm_order(request).await.unwrap_err();
    assert!(matches!(err, OrderFlowError::PointHoldFailed(PointLedgerError::InsufficientAvailable { .. })), "{err}");
    assert_eq!(engine.cumulative_qty(unit).await, 0);

    let request = ConfirmOrderRequest::new(1, vec![line(unit, 2)]).with_points(Money::from(2_001));
    let err = engine.orders.confirm_order(request).await.unwrap_err();
    assert!(matches!(err, OrderFlowError::InvalidPointAmount { .. }), "{err}");
    assert_eq!(engine.cumulative_qty(unit).await, 0);
    let wallet = engine.points.fetch_wallet(1).await.unwrap().unwrap();
    assert_eq!(wallet.hold, Money::zero());
}

#[tokio::test]
async fn requests_are_validated_before_anything_is_reserved() {
    let engine = engine().await;
    let unit = engine.unit(1_000, 100, &[]).await;
    let err = engine.orders.confirm_order(ConfirmOrderRequest::new(1, vec![line(unit, 1)])).await.unwrap_err();
    assert!(matches!(err, OrderFlowError::UserNotFound(1)));
    engine.user_with_points(1, 0).await;
    let err = engine.orders.confirm_order(ConfirmOrderRequest::new(1, vec![])).await.unwrap_err();
    assert!(matches!(err, OrderFlowError::EmptyOrder));
    let err =
        engine.orders.confirm_order(ConfirmOrderRequest::new(1, vec![line(unit, 1), line(unit, 0)])).await.unwrap_err();
    assert!(matches!(err, OrderFlowError::InvalidQuantity { line: 1, qty: 0 }));
    assert_eq!(engine.cumulative_qty(unit).await, 0);
}
