mod api;
mod config;
mod error;
mod helpers;

mod data_objects;

pub use api::GatewayApi;
pub use config::GatewayConfig;
pub use data_objects::{
    CancelPaymentRequest,
    CancelPaymentResponse,
    GatewayAmount,
    GatewayMethod,
    PaymentCancellation,
    PgPayment,
    PgPaymentStatus,
    WebhookData,
    WebhookPayload,
};
pub use error::GatewayApiError;
pub use helpers::status_hint_for_event;
