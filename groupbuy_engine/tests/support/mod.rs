#![allow(dead_code)]
use std::time::Duration;

use groupbuy_engine::{
    db_types::{DiscountStage, Money, NewSellableUnit, OrderWithLines, PaymentWithLines},
    events::EventProducers,
    order_objects::{ConfirmOrderRequest, OrderLineRequest},
    payment_objects::CreatePaymentRequest,
    test_utils::{
        mock_gateway::MockGateway,
        prepare_env::{tear_down, test_database},
    },
    OrderFlowApi,
    PaymentFlowApi,
    PointLedgerApi,
    ReservationApi,
    SqliteDatabase,
};

pub struct Engine {
    pub db: SqliteDatabase,
    pub reservations: ReservationApi<SqliteDatabase>,
    pub points: PointLedgerApi<SqliteDatabase>,
    pub orders: OrderFlowApi<SqliteDatabase>,
    pub payments: PaymentFlowApi<SqliteDatabase, MockGateway>,
    pub gateway: MockGateway,
}

pub async fn engine() -> Engine {
    engine_with_producers(EventProducers::default()).await
}

pub async fn engine_with_producers(producers: EventProducers) -> Engine {
    let db = test_database().await;
    let gateway = MockGateway::new();
    Engine {
        reservations: ReservationApi::new(db.clone(), producers.clone()),
        points: PointLedgerApi::new(db.clone()),
        orders: OrderFlowApi::new(db.clone()),
        payments: PaymentFlowApi::new(db.clone(), gateway.clone(), producers),
        gateway,
        db,
    }
}

impl Engine {
    pub async fn unit(&self, base_price: i64, stock: i64, stages: &[(i64, i64, i64)]) -> i64 {
        let stages = stages.iter().map(|&(level, threshold, pct)| DiscountStage::new(level, threshold, pct)).collect();
        let unit = NewSellableUnit { name: "Jeju tangerines 5kg".into(), base_price: Money::from(base_price), stock, stages };
        self.reservations.create_unit(unit).await.expect("Error creating unit").unit.id
    }

    pub async fn user_with_points(&self, user_id: i64, points: i64) {
        self.points.create_wallet(user_id).await.expect("Error creating wallet");
        if points > 0 {
            let key = format!("signup-bonus-{user_id}");
            self.points.earn(user_id, Money::from(points), &key).await.expect("Error earning points");
        }
    }

    pub async fn order(&self, user_id: i64, lines: &[(i64, i64)], points: i64) -> OrderWithLines {
        let lines = lines.iter().map(|&(unit_id, qty)| OrderLineRequest { unit_id, qty }).collect();
        let request = ConfirmOrderRequest::new(user_id, lines).with_points(Money::from(points));
        self.orders.confirm_order(request).await.expect("Error confirming order")
    }

    pub async fn ready_payment(&self, order: &OrderWithLines) -> PaymentWithLines {
        let request = CreatePaymentRequest {
            order_id: order.order.id,
            cash_amount: order.order.total_amount - order.order.point_amount,
            point_amount: order.order.point_amount,
            allocation: None,
        };
        self.payments.create_ready(request).await.expect("Error creating payment")
    }

    /// Marks the payment paid at the gateway and delivers the matching webhook.
    pub async fn pay(&self, payment: &PaymentWithLines, tx_id: &str) {
        let p = &payment.payment;
        self.gateway.set_paid(&p.correlation_id, p.cash_amount);
        let (body, headers) = self.gateway.webhook("Transaction.Paid", &p.correlation_id, tx_id);
        self.payments.handle_webhook(&body, &headers).await.expect("Error handling webhook");
    }

    /// Closes the pool and deletes the test database file.
    pub async fn finish(self) {
        tear_down(self.db).await;
    }

    pub async fn cumulative_qty(&self, unit_id: i64) -> i64 {
        self.reservations.fetch_unit(unit_id).await.unwrap().unwrap().unit.cumulative_qty
    }
}

/// Polls `check` until it holds or a second has passed.
pub async fn eventually<F: Fn() -> bool>(check: F) -> bool {
    for _ in 0..50 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}
