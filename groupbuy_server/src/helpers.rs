use actix_web::HttpRequest;
use groupbuy_engine::traits::WebhookHeaders;
use log::trace;

use crate::errors::ServerError;

pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";
pub const WEBHOOK_ID_HEADER: &str = "webhook-id";
pub const WEBHOOK_SIGNATURE_HEADER: &str = "webhook-signature";
pub const WEBHOOK_TIMESTAMP_HEADER: &str = "webhook-timestamp";

/// The caller-supplied idempotency key for a wallet mutation. Missing or blank keys are rejected.
pub fn idempotency_key(req: &HttpRequest) -> Result<String, ServerError> {
    header_value(req, IDEMPOTENCY_KEY_HEADER)
        .filter(|k| !k.trim().is_empty())
        .ok_or(ServerError::MissingHeader(IDEMPOTENCY_KEY_HEADER))
}

/// Collects the signature headers of a webhook delivery. Missing headers are left empty so that verification, not
/// extraction, decides what to do with them.
pub fn webhook_headers(req: &HttpRequest) -> WebhookHeaders {
    let headers = WebhookHeaders {
        msg_id: header_value(req, WEBHOOK_ID_HEADER).unwrap_or_default(),
        signature: header_value(req, WEBHOOK_SIGNATURE_HEADER).unwrap_or_default(),
        timestamp: header_value(req, WEBHOOK_TIMESTAMP_HEADER).unwrap_or_default(),
    };
    trace!("🪝️ Webhook delivery {} at {}", headers.msg_id, headers.timestamp);
    headers
}

fn header_value(req: &HttpRequest, name: &str) -> Option<String> {
    req.headers().get(name).and_then(|v| v.to_str().ok()).map(String::from)
}
