mod order_numbers;
mod webhook_signature;

pub use order_numbers::{new_correlation_id, new_order_no};
pub use webhook_signature::{WebhookSignatureError, WebhookVerifier, SECRET_PREFIX};
