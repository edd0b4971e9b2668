//! A scripted, in-memory stand-in for the payment gateway.
//!
//! Tests register the payments the gateway "knows" about and change their state as the scenario requires. Clones share
//! state, so a test can keep one handle while the API under test owns another.
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use chrono::Utc;
use gbm_common::{Money, DEFAULT_CURRENCY_CODE};
use serde_json::json;

use crate::{
    db_types::CorrelationId,
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

pub const TEST_WEBHOOK_SECRET: &str = "whsec_dGVzdC13ZWJob29rLXNlY3JldC1mb3ItZ3JvdXBidXk=";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelCall {
    pub correlation_id: CorrelationId,
    pub amount: Money,
    pub reason: String,
}

#[derive(Default)]
struct MockState {
    payments: HashMap<CorrelationId, GatewayPayment>,
    lookups: u32,
    failing_lookups: u32,
    cancel_failure: Option<GatewayError>,
    /// Taken off every cancellation, to script a gateway that cancels less than it was asked to.
    cancel_shortfall: Money,
    cancel_calls: Vec<CancelCall>,
    deliveries: u64,
}

#[derive(Clone)]
pub struct MockGateway {
    state: Arc<Mutex<MockState>>,
    verifier: WebhookVerifier,
}

impl Default for MockGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl MockGateway {
    pub fn new() -> Self {
        let verifier = WebhookVerifier::new(TEST_WEBHOOK_SECRET, 300).expect("The test secret is valid base64");
        Self { state: Arc::new(Mutex::new(MockState::default())), verifier }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_payment(&self, correlation_id: &CorrelationId, payment: GatewayPayment) {
        self.state().payments.insert(correlation_id.clone(), payment);
    }

    pub fn set_status(&self, correlation_id: &CorrelationId, status: GatewayPaymentStatus, total: Money) {
        let now = Utc::now();
        let paid_at = matches!(status, GatewayPaymentStatus::Paid).then_some(now);
        let payment = GatewayPayment {
            status,
            total_amount: total,
            cancelled_amount: Money::zero(),
            currency: DEFAULT_CURRENCY_CODE.to_string(),
            method: Some("CARD".to_string()),
            requested_at: Some(now),
            paid_at,
        };
        self.set_payment(correlation_id, payment);
    }

    pub fn set_paid(&self, correlation_id: &CorrelationId, total: Money) {
        self.set_status(correlation_id, GatewayPaymentStatus::Paid, total);
    }

    /// Cancels part of a payment on the gateway side, as if an operator did it in the gateway console.
    pub fn cancel_externally(&self, correlation_id: &CorrelationId, amount: Money) {
        let mut state = self.state();
        if let Some(p) = state.payments.get_mut(correlation_id) {
            apply_cancellation(p, amount);
        }
    }

    pub fn fail_next_lookups(&self, n: u32) {
        self.state().failing_lookups = n;
    }

    pub fn fail_next_cancel(&self, error: GatewayError) {
        self.state().cancel_failure = Some(error);
    }

    pub fn set_cancel_shortfall(&self, shortfall: Money) {
        self.state().cancel_shortfall = shortfall;
    }

    pub fn lookup_count(&self) -> u32 {
        self.state().lookups
    }

    pub fn cancel_calls(&self) -> Vec<CancelCall> {
        self.state().cancel_calls.clone()
    }

    /// A signed webhook delivery naming the payment and transaction.
    pub fn webhook(&self, event_type: &str, correlation_id: &CorrelationId, transaction_id: &str) -> (Vec<u8>, WebhookHeaders) {
        let body = json!({
            "type": event_type,
            "timestamp": Utc::now().to_rfc3339(),
            "data": { "paymentId": correlation_id.as_str(), "transactionId": transaction_id }
        })
        .to_string()
        .into_bytes();
        let msg_id = {
            let mut state = self.state();
            state.deliveries += 1;
            format!("msg_{}", state.deliveries)
        };
        let timestamp = Utc::now().timestamp();
        let signature = self.verifier.sign(&msg_id, timestamp, &body).expect("HMAC accepts any key length");
        (body, WebhookHeaders { msg_id, signature, timestamp: timestamp.to_string() })
    }
}

fn apply_cancellation(payment: &mut GatewayPayment, amount: Money) {
    payment.cancelled_amount += amount;
    payment.status = if payment.cancelled_amount >= payment.total_amount {
        GatewayPaymentStatus::Cancelled
    } else {
        GatewayPaymentStatus::PartialCancelled
    };
}

impl PaymentGateway for MockGateway {
    async fn lookup_by_correlation_id(&self, correlation_id: &CorrelationId) -> Result<GatewayPayment, GatewayError> {
        let mut state = self.state();
        state.lookups += 1;
        if state.failing_lookups > 0 {
            state.failing_lookups -= 1;
            return Err(GatewayError::Unavailable("scripted outage".into()));
        }
        state.payments.get(correlation_id).cloned().ok_or_else(|| GatewayError::PaymentNotFound(correlation_id.to_string()))
    }

    async fn cancel(
        &self,
        gateway_payment_id: &CorrelationId,
        amount: Money,
        reason: &str,
    ) -> Result<GatewayCancellation, GatewayError> {
        let mut state = self.state();
        state.cancel_calls.push(CancelCall {
            correlation_id: gateway_payment_id.clone(),
            amount,
            reason: reason.to_string(),
        });
        if let Some(e) = state.cancel_failure.take() {
            return Err(e);
        }
        let cancelled = amount - state.cancel_shortfall.min(amount);
        let n = state.cancel_calls.len();
        let payment = state
            .payments
            .get_mut(gateway_payment_id)
            .ok_or_else(|| GatewayError::PaymentNotFound(gateway_payment_id.to_string()))?;
        if payment.cancelled_amount + cancelled > payment.total_amount {
            return Err(GatewayError::Rejected(format!("Cannot cancel {amount}. Not enough left on the payment.")));
        }
        apply_cancellation(payment, cancelled);
        Ok(GatewayCancellation { cancellation_id: Some(format!("cancel_{n}")), cancelled_amount: cancelled })
    }

    fn verify_and_parse_webhook(&self, body: &[u8], headers: &WebhookHeaders) -> Result<WebhookEvent, GatewayError> {
        self.verifier.verify(body, headers, Utc::now()).map_err(|e| GatewayError::VerificationFailed(e.to_string()))?;
        let value: serde_json::Value =
            serde_json::from_slice(body).map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;
        let event_type = value["type"].as_str().unwrap_or_default().to_string();
        let correlation_id = value["data"]["paymentId"]
            .as_str()
            .map(CorrelationId::from)
            .ok_or_else(|| GatewayError::InvalidResponse("The webhook has no paymentId".into()))?;
        let transaction_id = value["data"]["transactionId"].as_str().map(String::from);
        Ok(WebhookEvent { event_type, correlation_id, transaction_id, status_hint: None })
    }
}
