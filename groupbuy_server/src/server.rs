use std::time::Duration;

use actix_web::{dev::Server, http::KeepAlive, middleware::Logger, web, App, HttpServer};
use groupbuy_engine::{
    events::EventProducers,
    OrderFlowApi,
    PaymentFlowApi,
    PointLedgerApi,
    ReservationApi,
    SqliteDatabase,
};
use log::*;

use crate::{
    campaign_sweeper::start_campaign_sweeper,
    config::ServerConfig,
    errors::ServerError,
    integrations::{gateway::GatewayClient, notifications::create_notification_event_handlers},
    routes::{
        health,
        BurnPointsRoute,
        CampaignRoute,
        CancelPaymentRoute,
        CloseCampaignRoute,
        ConfirmOrderRoute,
        CreatePaymentRoute,
        CreateUnitRoute,
        CreateWalletRoute,
        EarnPointsRoute,
        HoldPointsRoute,
        OpenCampaignRoute,
        OrderRoute,
        ParticipateRoute,
        PaymentRoute,
        PaymentWebhookRoute,
        ReleasePointsRoute,
        ReleaseStockRoute,
        ReserveStockRoute,
        SyncPaymentRoute,
        UnitRoute,
        UnitStageRoute,
        WalletHistoryRoute,
        WalletRoute,
    },
};

pub async fn run_server(config: ServerConfig) -> Result<(), ServerError> {
    let db = SqliteDatabase::new_with_options(&config.database_url, config.db_max_connections, config.lock_wait)
        .await
        .map_err(|e| ServerError::InitializeError(e.to_string()))?;
    db.run_migrations().await.map_err(|e| ServerError::InitializeError(e.to_string()))?;
    let gateway = GatewayClient::new(config.gateway.clone(), &config.webhook)?;
    let handlers = create_notification_event_handlers();
    let producers = handlers.producers();
    handlers.start_handlers().await;
    if config.campaign_sweep_interval.is_zero() {
        warn!("🕰️ The campaign sweeper is disabled. Expired campaigns will stay open until closed by hand.");
    } else {
        let _sweeper = start_campaign_sweeper(db.clone(), producers.clone(), config.campaign_sweep_interval);
    }
    let srv = create_server_instance(config, db, gateway, producers)?;
    srv.await.map_err(|e| ServerError::Unspecified(e.to_string()))
}

pub fn create_server_instance(
    config: ServerConfig,
    db: SqliteDatabase,
    gateway: GatewayClient,
    producers: EventProducers,
) -> Result<Server, ServerError> {
    let provider = config.provider.clone();
    let srv = HttpServer::new(move || {
        let reservation_api = ReservationApi::new(db.clone(), producers.clone());
        let points_api = PointLedgerApi::new(db.clone());
        let orders_api = OrderFlowApi::new(db.clone());
        let payments_api =
            PaymentFlowApi::new(db.clone(), gateway.clone(), producers.clone()).with_provider(provider.as_str());
        let api_scope = web::scope("/api")
            .service(CreateUnitRoute::<SqliteDatabase>::new())
            .service(UnitRoute::<SqliteDatabase>::new())
            .service(UnitStageRoute::<SqliteDatabase>::new())
            .service(ReserveStockRoute::<SqliteDatabase>::new())
            .service(ReleaseStockRoute::<SqliteDatabase>::new())
            .service(OpenCampaignRoute::<SqliteDatabase>::new())
            .service(CampaignRoute::<SqliteDatabase>::new())
            .service(ParticipateRoute::<SqliteDatabase>::new())
            .service(CloseCampaignRoute::<SqliteDatabase>::new())
            .service(CreateWalletRoute::<SqliteDatabase>::new())
            .service(WalletRoute::<SqliteDatabase>::new())
            .service(WalletHistoryRoute::<SqliteDatabase>::new())
            .service(EarnPointsRoute::<SqliteDatabase>::new())
            .service(HoldPointsRoute::<SqliteDatabase>::new())
            .service(ReleasePointsRoute::<SqliteDatabase>::new())
            .service(BurnPointsRoute::<SqliteDatabase>::new())
            .service(ConfirmOrderRoute::<SqliteDatabase>::new())
            .service(OrderRoute::<SqliteDatabase>::new())
            .service(CreatePaymentRoute::<SqliteDatabase, GatewayClient>::new())
            .service(SyncPaymentRoute::<SqliteDatabase, GatewayClient>::new())
            .service(PaymentRoute::<SqliteDatabase, GatewayClient>::new())
            .service(CancelPaymentRoute::<SqliteDatabase, GatewayClient>::new());
        App::new()
            .wrap(Logger::new("%t (%D ms) %s %a %{Host}i %U").log_target("gbm::access_log"))
            .app_data(web::Data::new(reservation_api))
            .app_data(web::Data::new(points_api))
            .app_data(web::Data::new(orders_api))
            .app_data(web::Data::new(payments_api))
            .service(health)
            .service(api_scope)
            .service(PaymentWebhookRoute::<SqliteDatabase, GatewayClient>::new())
    })
    .keep_alive(KeepAlive::Timeout(Duration::from_secs(600)))
    .bind((config.host.as_str(), config.port))?
    .run();
    info!("💻️ Listening on {}:{}", config.host, config.port);
    Ok(srv)
}
