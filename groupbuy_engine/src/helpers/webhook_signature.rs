//! # Webhook signatures
//!
//! The gateway signs every webhook delivery with a shared secret, following the "standard webhooks" scheme:
//!
//! ```text
//!    signature = base64(HMAC-SHA256(key, "{msg_id}.{timestamp}.{body}"))
//! ```
//!
//! where
//!   * `key` is the base64-decoded webhook secret, without its `whsec_` prefix,
//!   * `msg_id` and `timestamp` (unix seconds) come from their own headers,
//!   * `body` is the raw request body, byte for byte.
//!
//! The signature header carries one or more space-separated `v1,<signature>` entries, so that the gateway can rotate
//! secrets. A delivery is accepted if any entry matches and the timestamp is within the configured tolerance of the
//! local clock. Comparison is constant-time.
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

use crate::traits::WebhookHeaders;

pub const SECRET_PREFIX: &str = "whsec_";
const SIGNATURE_VERSION: &str = "v1";

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WebhookSignatureError {
    #[error("The webhook secret is not valid base64.")]
    InvalidSecret,
    #[error("The {0} header is missing.")]
    MissingHeader(&'static str),
    #[error("The webhook timestamp '{0}' is not a unix timestamp.")]
    InvalidTimestamp(String),
    #[error("The webhook timestamp is {0}s away from the local clock.")]
    TimestampOutOfRange(i64),
    #[error("No signature matched.")]
    SignatureMismatch,
}

#[derive(Clone)]
pub struct WebhookVerifier {
    key: Vec<u8>,
    tolerance_secs: i64,
}

impl WebhookVerifier {
    pub fn new(secret: &str, tolerance_secs: i64) -> Result<Self, WebhookSignatureError> {
        let encoded = secret.strip_prefix(SECRET_PREFIX).unwrap_or(secret);
        let key = base64::decode(encoded).map_err(|_| WebhookSignatureError::InvalidSecret)?;
        Ok(Self { key, tolerance_secs })
    }

    pub fn verify(
        &self,
        body: &[u8],
        headers: &WebhookHeaders,
        now: DateTime<Utc>,
    ) -> Result<(), WebhookSignatureError> {
        if headers.msg_id.is_empty() {
            return Err(WebhookSignatureError::MissingHeader("webhook-id"));
        }
        if headers.signature.is_empty() {
            return Err(WebhookSignatureError::MissingHeader("webhook-signature"));
        }
        if headers.timestamp.is_empty() {
            return Err(WebhookSignatureError::MissingHeader("webhook-timestamp"));
        }
        let timestamp = headers
            .timestamp
            .trim()
            .parse::<i64>()
            .map_err(|_| WebhookSignatureError::InvalidTimestamp(headers.timestamp.clone()))?;
        let skew = now.timestamp() - timestamp;
        if skew.abs() > self.tolerance_secs {
            return Err(WebhookSignatureError::TimestampOutOfRange(skew));
        }
        let candidates = headers
            .signature
            .split_whitespace()
            .filter_map(|entry| entry.split_once(','))
            .filter(|(version, _)| *version == SIGNATURE_VERSION)
            .filter_map(|(_, sig)| base64::decode(sig).ok());
        for candidate in candidates {
            let mac = self.mac(&headers.msg_id, timestamp, body)?;
            if mac.verify_slice(&candidate).is_ok() {
                return Ok(());
            }
        }
        Err(WebhookSignatureError::SignatureMismatch)
    }

    /// Produces a `v1,<signature>` header value for the given delivery.
    pub fn sign(&self, msg_id: &str, timestamp: i64, body: &[u8]) -> Result<String, WebhookSignatureError> {
        let mac = self.mac(msg_id, timestamp, body)?;
        Ok(format!("{SIGNATURE_VERSION},{}", base64::encode(mac.finalize().into_bytes())))
    }

    fn mac(&self, msg_id: &str, timestamp: i64, body: &[u8]) -> Result<HmacSha256, WebhookSignatureError> {
        let mut mac = HmacSha256::new_from_slice(&self.key).map_err(|_| WebhookSignatureError::InvalidSecret)?;
        mac.update(format!("{msg_id}.{timestamp}.").as_bytes());
        mac.update(body);
        Ok(mac)
    }
}
