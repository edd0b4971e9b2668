//! Request handler definitions
//!
//! Define each route and its handler here.
//! Handlers that are more than a line or two MUST go into a separate module. Keep this module neat and tidy 🙏
//!
//! A note about performance:
//! Since each worker thread processes its requests sequentially, handlers which block the current thread will cause the
//! current worker to stop processing new requests. Every engine call is async, and holds a database connection only
//! for as long as its own transaction lasts, so handlers simply await them.
//!
//! A note about errors:
//! Handlers return engine errors as-is and let [`ServerError`] pick the status code. Lock timeouts and gateway outages
//! come back as `503 Service Unavailable` with a `Retry-After` header.
use actix_web::{get, web, HttpRequest, HttpResponse, Responder};
use chrono::Utc;
use groupbuy_engine::{
    db_types::{CorrelationId, Money, NewCampaign, NewSellableUnit},
    order_objects::ConfirmOrderRequest,
    payment_objects::{CancelByLinesRequest, CreatePaymentRequest, WebhookOutcome},
    traits::{InventoryManagement, OrderManagement, PaymentGateway, PaymentManagement, PointLedgerManagement},
    wallet_rules::{PointEvent, PointOperation},
    OrderFlowApi,
    PaymentFlowApi,
    PointLedgerApi,
    ReservationApi,
};
use log::*;

use crate::{
    data_objects::{CancelRequest, JsonResponse, ParticipateRequest, PointsRequest, QtyRequest},
    errors::ServerError,
    helpers::{idempotency_key, webhook_headers},
};

// Web-actix cannot handle generics in handlers, so it's implemented manually using the `route!` macro
#[macro_export]
macro_rules! route {
    ($name:ident => $method:ident $path:literal impl $($bounds:ty),+) => {
        paste::paste! { pub struct [<$name:camel Route>]< $( [< T $bounds:camel> ],)+ >( $( core::marker::PhantomData<fn() -> [< T $bounds:camel> ] >,)+ );}
        paste::paste! { impl< $( [< T $bounds:camel> ],)+ > [<$name:camel Route>]< $( [< T $bounds:camel> ],)+ > {
            #[allow(clippy::new_without_default)]
            pub fn new() -> Self {
                Self($( core::marker::PhantomData::<fn() -> [< T $bounds:camel> ] >,)+)
            }
        }}
        paste::paste! { impl<$( [< T $bounds:camel >] , )+> actix_web::dev::HttpServiceFactory for [<$name:camel Route>]<$([<T $bounds:camel>],)+>
        where
            $([<T $bounds:camel>]: $bounds + 'static,)+
        {
            fn register(self, config: &mut actix_web::dev::AppService) {
                let res = actix_web::Resource::new($path)
                    .name(stringify!($name))
                    .guard(actix_web::guard::$method())
                    .to($name::< $( [< T $bounds:camel >], )+>);
                actix_web::dev::HttpServiceFactory::register(res, config);
            }
        }}
    };
}

// ----------------------------------------------   Health  ----------------------------------------------------
#[get("/health")]
pub async fn health() -> impl Responder {
    trace!("💻️ Received health check request");
    HttpResponse::Ok().body("👍️\n")
}

//----------------------------------------------   Units  ----------------------------------------------------
route!(create_unit => Post "/units" impl InventoryManagement);
/// Creates a sellable unit with its discount schedule.
///
/// The schedule is validated (unique thresholds, discounts between 0 and 100) and stored sorted by threshold.
pub async fn create_unit<B: InventoryManagement>(
    body: web::Json<NewSellableUnit>,
    api: web::Data<ReservationApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let unit = body.into_inner();
    debug!("💻️ POST create unit {}", unit.name);
    let unit = api.create_unit(unit).await?;
    Ok(HttpResponse::Created().json(unit))
}

route!(unit => Get "/units/{id}" impl InventoryManagement);
pub async fn unit<B: InventoryManagement>(
    path: web::Path<i64>,
    api: web::Data<ReservationApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let unit_id = path.into_inner();
    debug!("💻️ GET unit #{unit_id}");
    let unit = api.fetch_unit(unit_id).await?.ok_or_else(|| ServerError::NoRecordFound(format!("Unit #{unit_id}")))?;
    Ok(HttpResponse::Ok().json(unit))
}

route!(unit_stage => Get "/units/{id}/stage" impl InventoryManagement);
/// The unit's current and next discount stage. This is a display value and may be stale by the time a reservation
/// is made; the reservation's own snapshot is what gets charged.
pub async fn unit_stage<B: InventoryManagement>(
    path: web::Path<i64>,
    api: web::Data<ReservationApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let unit_id = path.into_inner();
    trace!("💻️ GET stage status for unit #{unit_id}");
    let status = api.stage_status(unit_id).await?;
    Ok(HttpResponse::Ok().json(status))
}

route!(reserve_stock => Post "/units/{id}/reserve" impl InventoryManagement);
pub async fn reserve_stock<B: InventoryManagement>(
    path: web::Path<i64>,
    body: web::Json<QtyRequest>,
    api: web::Data<ReservationApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let unit_id = path.into_inner();
    let QtyRequest { qty } = body.into_inner();
    debug!("💻️ POST reserve {qty} of unit #{unit_id}");
    let reservation = api.reserve(unit_id, qty).await?;
    Ok(HttpResponse::Ok().json(reservation))
}

route!(release_stock => Post "/units/{id}/release" impl InventoryManagement);
pub async fn release_stock<B: InventoryManagement>(
    path: web::Path<i64>,
    body: web::Json<QtyRequest>,
    api: web::Data<ReservationApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let unit_id = path.into_inner();
    let QtyRequest { qty } = body.into_inner();
    debug!("💻️ POST release {qty} of unit #{unit_id}");
    let unit = api.release(unit_id, qty).await?;
    Ok(HttpResponse::Ok().json(unit))
}

//----------------------------------------------   Campaigns  ----------------------------------------------------
route!(open_campaign => Post "/campaigns" impl InventoryManagement);
/// Opens a group-buy campaign. The stage schedule is generated from the target quantity, the number of stages and the
/// maximum discount.
pub async fn open_campaign<B: InventoryManagement>(
    body: web::Json<NewCampaign>,
    api: web::Data<ReservationApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let campaign = body.into_inner();
    debug!("💻️ POST open campaign on unit #{} with target {}", campaign.unit_id, campaign.target_qty);
    let campaign = api.open_campaign(campaign, Utc::now()).await?;
    Ok(HttpResponse::Created().json(campaign))
}

route!(campaign => Get "/campaigns/{id}" impl InventoryManagement);
pub async fn campaign<B: InventoryManagement>(
    path: web::Path<i64>,
    api: web::Data<ReservationApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let campaign_id = path.into_inner();
    debug!("💻️ GET campaign #{campaign_id}");
    let campaign = api
        .fetch_campaign(campaign_id)
        .await?
        .ok_or_else(|| ServerError::NoRecordFound(format!("Campaign #{campaign_id}")))?;
    Ok(HttpResponse::Ok().json(campaign))
}

route!(participate => Post "/campaigns/{id}/participate" impl InventoryManagement);
pub async fn participate<B: InventoryManagement>(
    path: web::Path<i64>,
    body: web::Json<ParticipateRequest>,
    api: web::Data<ReservationApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let campaign_id = path.into_inner();
    let ParticipateRequest { user_id, qty } = body.into_inner();
    debug!("💻️ POST user #{user_id} joins campaign #{campaign_id} with {qty}");
    let result = api.participate(campaign_id, user_id, qty, Utc::now()).await?;
    Ok(HttpResponse::Ok().json(result))
}

route!(close_campaign => Post "/campaigns/{id}/close" impl InventoryManagement);
pub async fn close_campaign<B: InventoryManagement>(
    path: web::Path<i64>,
    api: web::Data<ReservationApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let campaign_id = path.into_inner();
    debug!("💻️ POST close campaign #{campaign_id}");
    let closure = api.close_campaign(campaign_id).await?;
    Ok(HttpResponse::Ok().json(closure))
}

//----------------------------------------------   Wallets  ----------------------------------------------------
route!(create_wallet => Post "/wallets/{user_id}" impl PointLedgerManagement);
pub async fn create_wallet<B: PointLedgerManagement>(
    path: web::Path<i64>,
    api: web::Data<PointLedgerApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let user_id = path.into_inner();
    debug!("💻️ POST create wallet for user #{user_id}");
    let wallet = api.create_wallet(user_id).await?;
    Ok(HttpResponse::Ok().json(wallet.snapshot()))
}

route!(wallet => Get "/wallets/{user_id}" impl PointLedgerManagement);
pub async fn wallet<B: PointLedgerManagement>(
    path: web::Path<i64>,
    api: web::Data<PointLedgerApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let user_id = path.into_inner();
    debug!("💻️ GET wallet for user #{user_id}");
    let wallet = api
        .fetch_wallet(user_id)
        .await?
        .ok_or_else(|| ServerError::NoRecordFound(format!("Wallet for user #{user_id}")))?;
    Ok(HttpResponse::Ok().json(wallet.snapshot()))
}

route!(wallet_history => Get "/wallets/{user_id}/history" impl PointLedgerManagement);
pub async fn wallet_history<B: PointLedgerManagement>(
    path: web::Path<i64>,
    api: web::Data<PointLedgerApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let user_id = path.into_inner();
    debug!("💻️ GET wallet history for user #{user_id}");
    let history = api.history(user_id).await?;
    Ok(HttpResponse::Ok().json(history))
}

route!(earn_points => Post "/wallets/{user_id}/earn" impl PointLedgerManagement);
/// Credits points to the wallet.
///
/// Like every wallet mutation, this requires an `Idempotency-Key` header. Repeating a request with the same key returns
/// the wallet as it is now, without applying the change again.
pub async fn earn_points<B: PointLedgerManagement>(
    req: HttpRequest,
    path: web::Path<i64>,
    body: web::Json<PointsRequest>,
    api: web::Data<PointLedgerApi<B>>,
) -> Result<HttpResponse, ServerError> {
    apply_points(&req, path.into_inner(), PointOperation::Earn, body.amount, api.as_ref()).await
}

route!(hold_points => Post "/wallets/{user_id}/hold" impl PointLedgerManagement);
pub async fn hold_points<B: PointLedgerManagement>(
    req: HttpRequest,
    path: web::Path<i64>,
    body: web::Json<PointsRequest>,
    api: web::Data<PointLedgerApi<B>>,
) -> Result<HttpResponse, ServerError> {
    apply_points(&req, path.into_inner(), PointOperation::Hold, body.amount, api.as_ref()).await
}

route!(release_points => Post "/wallets/{user_id}/release" impl PointLedgerManagement);
pub async fn release_points<B: PointLedgerManagement>(
    req: HttpRequest,
    path: web::Path<i64>,
    body: web::Json<PointsRequest>,
    api: web::Data<PointLedgerApi<B>>,
) -> Result<HttpResponse, ServerError> {
    apply_points(&req, path.into_inner(), PointOperation::Release, body.amount, api.as_ref()).await
}

route!(burn_points => Post "/wallets/{user_id}/burn" impl PointLedgerManagement);
/// Deducts points. With `via_hold: true` in the body, previously held points are settled; otherwise the points come
/// out of the available balance.
pub async fn burn_points<B: PointLedgerManagement>(
    req: HttpRequest,
    path: web::Path<i64>,
    body: web::Json<PointsRequest>,
    api: web::Data<PointLedgerApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let PointsRequest { amount, via_hold } = body.into_inner();
    apply_points(&req, path.into_inner(), PointOperation::Burn { via_hold }, amount, api.as_ref()).await
}

async fn apply_points<B: PointLedgerManagement>(
    req: &HttpRequest,
    user_id: i64,
    operation: PointOperation,
    amount: Money,
    api: &PointLedgerApi<B>,
) -> Result<HttpResponse, ServerError> {
    let key = idempotency_key(req)?;
    debug!("💻️ POST {operation:?} {amount} points for user #{user_id} with key {key}");
    let outcome = api.apply(PointEvent::new(user_id, operation, amount, key)).await?;
    Ok(HttpResponse::Ok().json(outcome))
}

//----------------------------------------------   Orders  ----------------------------------------------------
route!(confirm_order => Post "/orders" impl OrderManagement);
/// Confirms an order: reserves stock for every line, holds the requested points and stores the order with the prices
/// that were in effect for each reservation. If any step fails, every earlier step is undone.
pub async fn confirm_order<B: OrderManagement>(
    body: web::Json<ConfirmOrderRequest>,
    api: web::Data<OrderFlowApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let request = body.into_inner();
    debug!("💻️ POST confirm order for user #{} with {} lines", request.user_id, request.lines.len());
    let order = api.confirm_order(request).await?;
    Ok(HttpResponse::Created().json(order))
}

route!(order => Get "/orders/{id}" impl OrderManagement);
pub async fn order<B: OrderManagement>(
    path: web::Path<i64>,
    api: web::Data<OrderFlowApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let order_id = path.into_inner();
    debug!("💻️ GET order #{order_id}");
    let order =
        api.fetch_order(order_id).await?.ok_or_else(|| ServerError::NoRecordFound(format!("Order #{order_id}")))?;
    Ok(HttpResponse::Ok().json(order))
}

//----------------------------------------------   Payments  ----------------------------------------------------
route!(create_payment => Post "/payments" impl PaymentManagement, PaymentGateway);
/// Creates a `READY` payment for a confirmed order. The client then completes the payment with the gateway, using the
/// payment's `correlation_id`.
pub async fn create_payment<B, G>(
    body: web::Json<CreatePaymentRequest>,
    api: web::Data<PaymentFlowApi<B, G>>,
) -> Result<HttpResponse, ServerError>
where
    B: PaymentManagement,
    G: PaymentGateway,
{
    let request = body.into_inner();
    debug!(
        "💻️ POST create payment for order #{}: {} cash, {} points",
        request.order_id, request.cash_amount, request.point_amount
    );
    let payment = api.create_ready(request).await?;
    Ok(HttpResponse::Created().json(payment))
}

route!(payment => Get "/payments/{id}" impl PaymentManagement, PaymentGateway);
pub async fn payment<B, G>(
    path: web::Path<i64>,
    api: web::Data<PaymentFlowApi<B, G>>,
) -> Result<HttpResponse, ServerError>
where
    B: PaymentManagement,
    G: PaymentGateway,
{
    let payment_id = path.into_inner();
    debug!("💻️ GET payment #{payment_id}");
    let payment = api
        .fetch_payment(payment_id)
        .await?
        .ok_or_else(|| ServerError::NoRecordFound(format!("Payment #{payment_id}")))?;
    Ok(HttpResponse::Ok().json(payment))
}

route!(cancel_payment => Post "/payments/{id}/cancel" impl PaymentManagement, PaymentGateway);
/// Refunds part or all of a payment, line by line.
///
/// Cash refunds are cancelled on the gateway first. The amount the gateway actually cancelled is what gets allocated
/// to the lines, which may be less than requested.
pub async fn cancel_payment<B, G>(
    path: web::Path<i64>,
    body: web::Json<CancelRequest>,
    api: web::Data<PaymentFlowApi<B, G>>,
) -> Result<HttpResponse, ServerError>
where
    B: PaymentManagement,
    G: PaymentGateway,
{
    let payment_id = path.into_inner();
    let CancelRequest { lines, reason, refund_type } = body.into_inner();
    debug!("💻️ POST {refund_type} refund on payment #{payment_id} over {} lines", lines.len());
    let outcome = api.cancel_by_lines(CancelByLinesRequest { payment_id, lines, reason, refund_type }).await?;
    Ok(HttpResponse::Ok().json(outcome))
}

route!(sync_payment => Post "/payments/sync/{correlation_id}" impl PaymentManagement, PaymentGateway);
/// Pulls the payment from the gateway and reconciles it, without waiting for a webhook. Clients call this after the
/// gateway redirects the user back.
pub async fn sync_payment<B, G>(
    path: web::Path<String>,
    api: web::Data<PaymentFlowApi<B, G>>,
) -> Result<HttpResponse, ServerError>
where
    B: PaymentManagement,
    G: PaymentGateway,
{
    let correlation_id = CorrelationId::from(path.into_inner());
    debug!("💻️ POST sync payment {correlation_id}");
    let outcome = api.sync_payment(&correlation_id).await?;
    Ok(HttpResponse::Ok().json(outcome))
}

//----------------------------------------------   Webhooks  ----------------------------------------------------
route!(payment_webhook => Post "/webhook/payment" impl PaymentManagement, PaymentGateway);
/// Receives payment gateway webhooks.
///
/// The body is read raw, since the signature covers it byte for byte. The response tells the gateway whether to
/// redeliver:
/// * `200` once the payment has been reconciled, or if it is unknown here (redelivery would not help).
/// * `401` if verification failed. Nothing was changed.
/// * `503` if the gateway or the database was temporarily unavailable.
pub async fn payment_webhook<B, G>(
    req: HttpRequest,
    body: web::Bytes,
    api: web::Data<PaymentFlowApi<B, G>>,
) -> Result<HttpResponse, ServerError>
where
    B: PaymentManagement,
    G: PaymentGateway,
{
    let headers = webhook_headers(&req);
    trace!("💻️ Received payment webhook {}", headers.msg_id);
    let outcome = api.handle_webhook(&body, &headers).await.map_err(|e| {
        if e.is_retryable() {
            info!("💻️ Webhook {} could not be processed now. The gateway will redeliver it. {e}", headers.msg_id);
        } else {
            debug!("💻️ Webhook {} was not processed. {e}", headers.msg_id);
        }
        ServerError::from(e)
    })?;
    let response = match outcome {
        WebhookOutcome::Reconciled(outcome) => JsonResponse::success(format!(
            "Payment {} is {} ({:?})",
            outcome.payment.correlation_id, outcome.payment.status, outcome.transition
        )),
        WebhookOutcome::UnknownPayment(id) => JsonResponse::failure(format!("Payment {id} is not known. Ignored.")),
    };
    Ok(HttpResponse::Ok().json(response))
}
