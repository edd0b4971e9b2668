use chrono::{DateTime, Utc};
use groupbuy_engine::{
    db_types::{
        Campaign,
        CampaignWithStages,
        CorrelationId,
        DiscountStage,
        Money,
        NewCampaign,
        NewSellableUnit,
        SellableUnit,
        UnitForPricing,
    },
    traits::{
        CampaignClosure,
        GatewayCancellation,
        GatewayError,
        GatewayPayment,
        InventoryManagement,
        ParticipationResult,
        PaymentGateway,
        Reservation,
        ReservationError,
        WebhookEvent,
        WebhookHeaders,
    },
};
use mockall::mock;

mock! {
    pub InventoryManager {}
    impl Clone for InventoryManager {
        fn clone(&self) -> Self;
    }
    impl InventoryManagement for InventoryManager {
        async fn insert_unit(&self, unit: NewSellableUnit) -> Result<UnitForPricing, ReservationError>;
        async fn fetch_unit_for_pricing(&self, unit_id: i64) -> Result<Option<UnitForPricing>, ReservationError>;
        async fn reserve_stock(&self, unit_id: i64, qty: i64) -> Result<Reservation, ReservationError>;
        async fn release_stock(&self, unit_id: i64, qty: i64) -> Result<SellableUnit, ReservationError>;
        async fn insert_campaign(&self, campaign: NewCampaign, stages: Vec<DiscountStage>) -> Result<CampaignWithStages, ReservationError>;
        async fn fetch_campaign(&self, campaign_id: i64) -> Result<Option<CampaignWithStages>, ReservationError>;
        async fn participate_in_campaign(&self, campaign_id: i64, user_id: i64, qty: i64, now: DateTime<Utc>) -> Result<ParticipationResult, ReservationError>;
        async fn close_campaign(&self, campaign_id: i64) -> Result<CampaignClosure, ReservationError>;
        async fn fetch_expired_campaigns(&self, now: DateTime<Utc>) -> Result<Vec<Campaign>, ReservationError>;
        async fn fetch_campaign_participants(&self, campaign_id: i64) -> Result<Vec<i64>, ReservationError>;
    }
}

mock! {
    pub PgGateway {}
    impl PaymentGateway for PgGateway {
        async fn lookup_by_correlation_id(&self, correlation_id: &CorrelationId) -> Result<GatewayPayment, GatewayError>;
        async fn cancel(&self, gateway_payment_id: &CorrelationId, amount: Money, reason: &str) -> Result<GatewayCancellation, GatewayError>;
        fn verify_and_parse_webhook(&self, body: &[u8], headers: &WebhookHeaders) -> Result<WebhookEvent, GatewayError>;
    }
}
