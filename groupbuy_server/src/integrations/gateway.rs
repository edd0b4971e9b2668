//! Connects the engine's [`PaymentGateway`] contract to the REST client in `pg_tools`.
//!
//! Webhook bodies are verified here against the signing secret before anything is parsed. The payment status implied
//! by the event type is passed along as a hint only; the engine always pulls the payment before acting.
use chrono::Utc;
use groupbuy_engine::{
    db_types::{CorrelationId, Money},
    helpers::WebhookVerifier,
    traits::{
        GatewayCancellation,
        GatewayError,
        GatewayPayment,
        GatewayPaymentStatus,
        PaymentGateway,
        WebhookEvent,
        WebhookHeaders,
    },
};
use log::*;
use pg_tools::{
    status_hint_for_event,
    GatewayApi,
    GatewayApiError,
    GatewayConfig,
    PgPayment,
    PgPaymentStatus,
    WebhookPayload,
};

use crate::{config::WebhookConfig, errors::ServerError};

#[derive(Clone)]
pub struct GatewayClient {
    api: GatewayApi,
    /// `None` when webhook signature checks are disabled.
    verifier: Option<WebhookVerifier>,
}

impl GatewayClient {
    pub fn new(gateway: GatewayConfig, webhook: &WebhookConfig) -> Result<Self, ServerError> {
        let api = GatewayApi::new(gateway).map_err(|e| ServerError::InitializeError(e.to_string()))?;
        let verifier = if webhook.checks {
            if !webhook.secret.is_set() {
                return Err(ServerError::ConfigurationError(
                    "GBM_WEBHOOK_SECRET must be set while webhook checks are enabled.".into(),
                ));
            }
            let verifier = WebhookVerifier::new(webhook.secret.reveal(), webhook.tolerance_secs)
                .map_err(|e| ServerError::ConfigurationError(format!("GBM_WEBHOOK_SECRET is unusable. {e}")))?;
            Some(verifier)
        } else {
            None
        };
        Ok(Self { api, verifier })
    }
}

impl PaymentGateway for GatewayClient {
    async fn lookup_by_correlation_id(&self, correlation_id: &CorrelationId) -> Result<GatewayPayment, GatewayError> {
        let payment = self.api.get_payment(correlation_id.as_str()).await.map_err(gateway_error)?;
        Ok(gateway_payment(payment))
    }

    async fn cancel(
        &self,
        gateway_payment_id: &CorrelationId,
        amount: Money,
        reason: &str,
    ) -> Result<GatewayCancellation, GatewayError> {
        let response =
            self.api.cancel_payment(gateway_payment_id.as_str(), amount, reason).await.map_err(gateway_error)?;
        let cancellation = response.cancellation;
        Ok(GatewayCancellation { cancellation_id: Some(cancellation.id), cancelled_amount: cancellation.total_amount })
    }

    fn verify_and_parse_webhook(&self, body: &[u8], headers: &WebhookHeaders) -> Result<WebhookEvent, GatewayError> {
        match &self.verifier {
            Some(verifier) => verifier
                .verify(body, headers, Utc::now())
                .map_err(|e| GatewayError::VerificationFailed(e.to_string()))?,
            None => trace!("🪝️ Webhook signature checks are disabled. Accepting {} unverified.", headers.msg_id),
        }
        parse_webhook(body)
    }
}

pub fn parse_webhook(body: &[u8]) -> Result<WebhookEvent, GatewayError> {
    let payload: WebhookPayload = serde_json::from_slice(body)
        .map_err(|e| GatewayError::InvalidResponse(format!("Could not read the webhook body. {e}")))?;
    let status_hint = status_hint_for_event(&payload.event_type).map(gateway_status);
    Ok(WebhookEvent {
        event_type: payload.event_type,
        correlation_id: CorrelationId::from(payload.data.payment_id),
        transaction_id: payload.data.transaction_id,
        status_hint,
    })
}

pub fn gateway_payment(payment: PgPayment) -> GatewayPayment {
    GatewayPayment {
        status: gateway_status(payment.status),
        total_amount: payment.amount.total,
        cancelled_amount: payment.amount.cancelled,
        currency: payment.currency,
        method: payment.method.map(|m| m.name()),
        requested_at: payment.requested_at,
        paid_at: payment.paid_at,
    }
}

pub fn gateway_status(status: PgPaymentStatus) -> GatewayPaymentStatus {
    match status {
        PgPaymentStatus::Ready => GatewayPaymentStatus::Ready,
        PgPaymentStatus::PayPending => GatewayPaymentStatus::PayPending,
        PgPaymentStatus::VirtualAccountIssued => GatewayPaymentStatus::VirtualAccountIssued,
        PgPaymentStatus::Paid => GatewayPaymentStatus::Paid,
        PgPaymentStatus::PartialCancelled => GatewayPaymentStatus::PartialCancelled,
        PgPaymentStatus::Cancelled => GatewayPaymentStatus::Cancelled,
        PgPaymentStatus::Failed => GatewayPaymentStatus::Failed,
    }
}

pub fn gateway_error(e: GatewayApiError) -> GatewayError {
    if e.is_transient() {
        return GatewayError::Unavailable(e.to_string());
    }
    match e {
        GatewayApiError::PaymentNotFound(id) => GatewayError::PaymentNotFound(id),
        GatewayApiError::JsonError(msg) => GatewayError::InvalidResponse(msg),
        e => GatewayError::Rejected(e.to_string()),
    }
}

#[cfg(test)]
mod test {
    use gbm_common::Secret;
    use groupbuy_engine::test_utils::mock_gateway::TEST_WEBHOOK_SECRET;
    use pg_tools::{GatewayAmount, GatewayMethod};

    use super::*;

    fn client(checks: bool) -> GatewayClient {
        let webhook = WebhookConfig { secret: Secret::new(TEST_WEBHOOK_SECRET.to_string()), tolerance_secs: 300, checks };
        GatewayClient::new(GatewayConfig::default(), &webhook).unwrap()
    }

    fn signed(body: &[u8]) -> WebhookHeaders {
        let verifier = WebhookVerifier::new(TEST_WEBHOOK_SECRET, 300).unwrap();
        let timestamp = Utc::now().timestamp();
        let signature = verifier.sign("msg_1", timestamp, body).unwrap();
        WebhookHeaders { msg_id: "msg_1".into(), signature, timestamp: timestamp.to_string() }
    }

    const BODY: &[u8] = br#"{"type":"Transaction.Paid","timestamp":"2026-10-18T10:00:00Z","data":{"paymentId":"pay_1","transactionId":"tx_1"}}"#;

    #[test]
    fn verified_webhooks_are_parsed() {
        let event = client(true).verify_and_parse_webhook(BODY, &signed(BODY)).unwrap();
        assert_eq!(event.event_type, "Transaction.Paid");
        assert_eq!(event.correlation_id.as_str(), "pay_1");
        assert_eq!(event.transaction_id.as_deref(), Some("tx_1"));
        assert_eq!(event.status_hint, Some(GatewayPaymentStatus::Paid));
    }

    #[test]
    fn tampered_webhooks_are_rejected() {
        let headers = signed(BODY);
        let tampered = String::from_utf8_lossy(BODY).replace("pay_1", "pay_2");
        let err = client(true).verify_and_parse_webhook(tampered.as_bytes(), &headers).unwrap_err();
        assert!(matches!(err, GatewayError::VerificationFailed(_)));
        let err = client(true).verify_and_parse_webhook(BODY, &WebhookHeaders::default()).unwrap_err();
        assert!(matches!(err, GatewayError::VerificationFailed(_)));
    }

    #[test]
    fn unchecked_webhooks_are_still_parsed() {
        let event = client(false).verify_and_parse_webhook(BODY, &WebhookHeaders::default()).unwrap();
        assert_eq!(event.correlation_id.as_str(), "pay_1");
        let err = client(false).verify_and_parse_webhook(b"not json", &WebhookHeaders::default()).unwrap_err();
        assert!(matches!(err, GatewayError::InvalidResponse(_)));
    }

    #[test]
    fn a_bad_secret_is_a_configuration_error() {
        let webhook = WebhookConfig { secret: Secret::new("whsec_!!!".into()), tolerance_secs: 300, checks: true };
        assert!(matches!(
            GatewayClient::new(GatewayConfig::default(), &webhook),
            Err(ServerError::ConfigurationError(_))
        ));
        let webhook = WebhookConfig { checks: true, ..WebhookConfig::default() };
        assert!(matches!(
            GatewayClient::new(GatewayConfig::default(), &webhook),
            Err(ServerError::ConfigurationError(_))
        ));
        let webhook = WebhookConfig { checks: false, ..WebhookConfig::default() };
        assert!(GatewayClient::new(GatewayConfig::default(), &webhook).is_ok());
    }

    #[test]
    fn payments_are_converted() {
        let payment = PgPayment {
            id: "pay_1".into(),
            status: PgPaymentStatus::VirtualAccountIssued,
            transaction_id: None,
            amount: GatewayAmount { total: Money::from(7000), cancelled: Money::from(1000), paid: Money::zero() },
            currency: "KRW".into(),
            method: Some(GatewayMethod { method_type: "PaymentMethodVirtualAccount".into() }),
            requested_at: None,
            paid_at: None,
        };
        let converted = gateway_payment(payment);
        assert_eq!(converted.status, GatewayPaymentStatus::VirtualAccountIssued);
        assert_eq!(converted.total_amount, Money::from(7000));
        assert_eq!(converted.cancelled_amount, Money::from(1000));
        assert_eq!(converted.method.as_deref(), Some("VIRTUAL_ACCOUNT"));
    }

    #[test]
    fn errors_are_classified() {
        let e = gateway_error(GatewayApiError::Transport("connection reset".into()));
        assert!(e.is_retryable());
        let e = gateway_error(GatewayApiError::QueryError { status: 503, message: "busy".into() });
        assert!(matches!(e, GatewayError::Unavailable(_)));
        let e = gateway_error(GatewayApiError::QueryError { status: 400, message: "amount too large".into() });
        assert!(matches!(e, GatewayError::Rejected(_)));
        let e = gateway_error(GatewayApiError::PaymentNotFound("pay_9".into()));
        assert!(matches!(e, GatewayError::PaymentNotFound(id) if id == "pay_9"));
    }
}
