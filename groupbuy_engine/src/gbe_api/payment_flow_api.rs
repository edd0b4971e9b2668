use std::{fmt::Debug, sync::Arc, time::Duration};

use chrono::Utc;
use gbm_common::DEFAULT_CURRENCY_CODE;
use log::*;

use crate::{
    db_types::{CorrelationId, Money, NewPayment, NewPaymentTransaction, PaymentWithLines, RefundType},
    events::{EventProducers, OrderFailedEvent, PaymentSettledEvent},
    gbe_api::payment_objects::{CancelByLinesRequest, CreatePaymentRequest, PaymentDetails, WebhookOutcome},
    helpers::new_correlation_id,
    payment_rules::split_payment_lines,
    traits::{
        GatewayCancellation,
        GatewayError,
        GatewayPayment,
        GatewayPaymentStatus,
        GatewayUpdate,
        PaymentFlowError,
        PaymentGateway,
        PaymentManagement,
        ReconcileOutcome,
        RefundOutcome,
        RefundRequest,
        WebhookHeaders,
    },
};

pub const DEFAULT_PROVIDER: &str = "portone";
/// The method recorded on payments that are settled entirely in points.
pub const POINTS_METHOD: &str = "POINTS";

const LOOKUP_ATTEMPTS: u32 = 3;
const LOOKUP_BACKOFF: Duration = Duration::from_millis(200);

/// `PaymentFlowApi` ties local payments to the external gateway.
///
/// The gateway is the source of truth for what happened to a payment, and this API never trusts amounts that arrive in
/// a webhook. A webhook only names the payment. The API then pulls the authoritative state from the gateway and hands
/// it to the backend, which merges it into local state under the payment lock.
///
/// Refunds run in three steps:
/// 1. The request is validated against the locked payment and recorded as a pending refund, which reserves the
///    amounts against the refundable pools.
/// 2. Cash refunds are cancelled at the gateway with one call for the whole amount. Point refunds are settled locally.
/// 3. The amount the gateway actually cancelled is distributed over the lines, and the payment status rolls forward.
pub struct PaymentFlowApi<B, G> {
    db: B,
    gateway: Arc<G>,
    producers: EventProducers,
    provider: String,
}

impl<B, G> Debug for PaymentFlowApi<B, G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PaymentFlowApi ({})", self.provider)
    }
}

impl<B: Clone, G> Clone for PaymentFlowApi<B, G> {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            gateway: Arc::clone(&self.gateway),
            producers: self.producers.clone(),
            provider: self.provider.clone(),
        }
    }
}

impl<B, G> PaymentFlowApi<B, G> {
    pub fn new(db: B, gateway: G, producers: EventProducers) -> Self {
        Self { db, gateway: Arc::new(gateway), producers, provider: DEFAULT_PROVIDER.to_string() }
    }

    /// Sets the provider name that namespaces provider transaction ids.
    pub fn with_provider<S: Into<String>>(mut self, provider: S) -> Self {
        self.provider = provider.into();
        self
    }

    pub fn db(&self) -> &B {
        &self.db
    }

    pub fn gateway(&self) -> &G {
        self.gateway.as_ref()
    }

    pub fn provider(&self) -> &str {
        self.provider.as_str()
    }
}

impl<B, G> PaymentFlowApi<B, G>
where
    B: PaymentManagement,
    G: PaymentGateway,
{
    /// Creates a `READY` payment for a confirmed order.
    ///
    /// Without an explicit allocation, the cash and point parts are split pro rata over the order lines. A payment with
    /// no cash part never touches the gateway and settles immediately.
    pub async fn create_ready(&self, request: CreatePaymentRequest) -> Result<PaymentWithLines, PaymentFlowError> {
        let CreatePaymentRequest { order_id, cash_amount, point_amount, allocation } = request;
        if cash_amount.is_negative() || point_amount.is_negative() {
            return Err(PaymentFlowError::InvalidAmount("Cash and point amounts cannot be negative.".into()));
        }
        if !(cash_amount + point_amount).is_positive() {
            return Err(PaymentFlowError::InvalidAmount("A payment must be for a positive amount.".into()));
        }
        let order = self.db.fetch_order(order_id).await?.ok_or(PaymentFlowError::OrderNotFound(order_id))?;
        let lines = match allocation {
            Some(lines) => lines,
            None => {
                let amounts = order.lines.iter().map(|l| (l.id, l.line_amount)).collect::<Vec<_>>();
                split_payment_lines(&amounts, cash_amount, point_amount)?
            },
        };
        let payment = NewPayment {
            order_id,
            correlation_id: new_correlation_id(&order.order.order_no),
            cash_amount,
            point_amount,
            lines,
        };
        let payment = self.db.insert_ready_payment(payment).await?;
        info!(
            "💳️ Payment {} is ready for order [{}]: {cash_amount} cash, {point_amount} points",
            payment.payment.correlation_id, order.order.order_no
        );
        if cash_amount.is_positive() {
            return Ok(payment);
        }
        let correlation_id = payment.payment.correlation_id.clone();
        let now = Utc::now();
        let snapshot = GatewayPayment {
            status: GatewayPaymentStatus::Paid,
            total_amount: cash_amount,
            cancelled_amount: Money::zero(),
            currency: DEFAULT_CURRENCY_CODE.to_string(),
            method: Some(POINTS_METHOD.to_string()),
            requested_at: Some(now),
            paid_at: Some(now),
        };
        let outcome = self.reconcile(GatewayUpdate { correlation_id, snapshot, transaction: None }).await?;
        debug!("💳️ Payment {} was settled in points only", outcome.payment.correlation_id);
        self.db
            .fetch_payment(outcome.payment.id)
            .await?
            .ok_or_else(|| PaymentFlowError::PaymentNotFound(outcome.payment.id.to_string()))
    }

    /// Processes an inbound webhook delivery.
    ///
    /// A delivery that fails verification is rejected without touching any state. A delivery for a payment that does
    /// not exist locally is dropped, because redelivering it would not help.
    pub async fn handle_webhook(
        &self,
        body: &[u8],
        headers: &WebhookHeaders,
    ) -> Result<WebhookOutcome, PaymentFlowError> {
        let event = self.gateway.verify_and_parse_webhook(body, headers).map_err(|e| match e {
            GatewayError::VerificationFailed(msg) => {
                warn!("🪝️ Rejected webhook {}. {msg}", headers.msg_id);
                PaymentFlowError::WebhookVerificationFailed(msg)
            },
            e => {
                warn!("🪝️ Could not read webhook {}. {e}", headers.msg_id);
                PaymentFlowError::Gateway(e)
            },
        })?;
        trace!("🪝️ Webhook {} ({}) for payment {}", headers.msg_id, event.event_type, event.correlation_id);
        if self.db.fetch_payment_by_correlation_id(&event.correlation_id).await?.is_none() {
            info!("🪝️ Webhook {} refers to unknown payment {}. Dropping it.", headers.msg_id, event.correlation_id);
            return Ok(WebhookOutcome::UnknownPayment(event.correlation_id));
        }
        let outcome = self.pull_and_reconcile(&event.correlation_id, event.transaction_id).await?;
        Ok(WebhookOutcome::Reconciled(outcome))
    }

    /// Pulls the gateway's view of a payment and reconciles it, without waiting for a webhook.
    pub async fn sync_payment(&self, correlation_id: &CorrelationId) -> Result<ReconcileOutcome, PaymentFlowError> {
        if self.db.fetch_payment_by_correlation_id(correlation_id).await?.is_none() {
            return Err(PaymentFlowError::PaymentNotFound(correlation_id.to_string()));
        }
        self.pull_and_reconcile(correlation_id, None).await
    }

    /// Refunds the given amounts on the given order lines of a payment.
    ///
    /// Cash refunds make exactly one gateway cancel call for the total. If the call fails, the pending refund is
    /// abandoned and nothing on the payment changes.
    pub async fn cancel_by_lines(&self, request: CancelByLinesRequest) -> Result<RefundOutcome, PaymentFlowError> {
        let CancelByLinesRequest { payment_id, lines, reason, refund_type } = request;
        let pending =
            self.db.begin_refund(RefundRequest { payment_id, refund_type, lines, reason: reason.clone() }).await?;
        let refund = pending.refund;
        let cancellation = match refund_type {
            RefundType::Cash => {
                match self.gateway.cancel(&pending.correlation_id, refund.requested_amount, &reason).await {
                    Ok(c) => c,
                    Err(e) => {
                        warn!("💳️ Gateway refused to cancel {} on {}. {e}", refund.requested_amount, pending.correlation_id);
                        if let Err(abandon_err) = self.db.abandon_refund(refund.id, &e.to_string()).await {
                            error!("💳️ Could not abandon refund #{}. Its amount stays reserved. {abandon_err}", refund.id);
                        }
                        return Err(e.into());
                    },
                }
            },
            RefundType::Point => GatewayCancellation { cancellation_id: None, cancelled_amount: refund.requested_amount },
        };
        if cancellation.cancelled_amount != refund.requested_amount {
            warn!(
                "💳️ Asked the gateway to cancel {} on {}, but it cancelled {}",
                refund.requested_amount, pending.correlation_id, cancellation.cancelled_amount
            );
        }
        let outcome = self.db.complete_refund(refund.id, cancellation).await?;
        if outcome.order_failed {
            let order_id = outcome.payment.payment.order_id;
            match self.db.fetch_order(order_id).await {
                Ok(Some(order)) => {
                    let event = OrderFailedEvent::new(order.order, outcome.payment.payment.status, outcome.stock_released);
                    self.call_order_failed_hook(event).await;
                },
                Ok(None) => warn!("💳️ Order #{order_id} vanished after its refund completed"),
                Err(e) => warn!("💳️ Could not fetch order #{order_id} for the order failed hook. {e}"),
            }
        }
        Ok(outcome)
    }

    pub async fn fetch_payment(&self, payment_id: i64) -> Result<Option<PaymentDetails>, PaymentFlowError> {
        let Some(payment) = self.db.fetch_payment(payment_id).await? else {
            return Ok(None);
        };
        let transactions = self.db.fetch_payment_transactions(payment_id).await?;
        let refunds = self.db.fetch_refunds(payment_id).await?;
        Ok(Some(PaymentDetails { payment, transactions, refunds }))
    }

    async fn pull_and_reconcile(
        &self,
        correlation_id: &CorrelationId,
        transaction_id: Option<String>,
    ) -> Result<ReconcileOutcome, PaymentFlowError> {
        let snapshot = self.lookup_with_retry(correlation_id).await?;
        let transaction = transaction_id.map(|provider_transaction_id| NewPaymentTransaction {
            provider: self.provider.clone(),
            provider_transaction_id,
        });
        self.reconcile(GatewayUpdate { correlation_id: correlation_id.clone(), snapshot, transaction }).await
    }

    async fn reconcile(&self, update: GatewayUpdate) -> Result<ReconcileOutcome, PaymentFlowError> {
        let outcome = self.db.reconcile_payment(update).await?;
        if outcome.settled() {
            info!("💳️ Payment {} settled", outcome.payment.correlation_id);
            self.call_payment_settled_hook(PaymentSettledEvent::new(outcome.payment.clone(), outcome.order.clone()))
                .await;
        }
        if outcome.order_failed {
            info!("💳️ Order [{}] failed with payment status {}", outcome.order.order_no, outcome.payment.status);
            let event = OrderFailedEvent::new(outcome.order.clone(), outcome.payment.status, outcome.stock_released);
            self.call_order_failed_hook(event).await;
        }
        Ok(outcome)
    }

    async fn lookup_with_retry(&self, correlation_id: &CorrelationId) -> Result<GatewayPayment, GatewayError> {
        let mut attempt = 0;
        loop {
            match self.gateway.lookup_by_correlation_id(correlation_id).await {
                Ok(payment) => return Ok(payment),
                Err(e) if e.is_retryable() && attempt + 1 < LOOKUP_ATTEMPTS => {
                    let wait = LOOKUP_BACKOFF * 2u32.pow(attempt);
                    debug!("💳️ Gateway lookup for {correlation_id} failed. Retrying in {wait:?}. {e}");
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                },
                Err(e) => {
                    warn!("💳️ Gateway lookup for {correlation_id} failed after {} attempts. {e}", attempt + 1);
                    return Err(e);
                },
            }
        }
    }

    async fn call_payment_settled_hook(&self, event: PaymentSettledEvent) {
        for emitter in &self.producers.payment_settled_producer {
            debug!("💳️ Notifying payment settled hook subscribers");
            emitter.publish_event(event.clone()).await;
        }
    }

    async fn call_order_failed_hook(&self, event: OrderFailedEvent) {
        for emitter in &self.producers.order_failed_producer {
            debug!("💳️ Notifying order failed hook subscribers");
            emitter.publish_event(event.clone()).await;
        }
    }
}
