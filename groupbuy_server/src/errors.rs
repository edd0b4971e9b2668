use std::time::Duration;

use actix_web::{
    error::ResponseError,
    http::{
        header::{ContentType, RETRY_AFTER},
        StatusCode,
    },
    HttpResponse,
};
use groupbuy_engine::{
    traits::GatewayError,
    OrderFlowError,
    PaymentFlowError,
    PointLedgerError,
    ReservationError,
};
use log::error;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Could not initialize server. {0}")]
    InitializeError(String),
    #[error("Invalid server configuration. {0}")]
    ConfigurationError(String),
    #[error("An I/O error happened in the server. {0}")]
    IOError(#[from] std::io::Error),
    #[error("Could not read request body: {0}")]
    InvalidRequestBody(String),
    #[error("The {0} header is required for this request.")]
    MissingHeader(&'static str),
    #[error("The data was not found. {0}")]
    NoRecordFound(String),
    #[error("{0}")]
    Reservation(#[from] ReservationError),
    #[error("{0}")]
    Points(#[from] PointLedgerError),
    #[error("{0}")]
    Order(#[from] OrderFlowError),
    #[error("{0}")]
    Payment(#[from] PaymentFlowError),
    #[error("UnspecifiedError. {0}")]
    Unspecified(String),
}

impl ServerError {
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Reservation(e) => e.retry_after(),
            Self::Points(e) => e.retry_after(),
            Self::Order(e) => e.retry_after(),
            Self::Payment(e) => e.retry_after(),
            _ => None,
        }
    }
}

impl ResponseError for ServerError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequestBody(_) => StatusCode::BAD_REQUEST,
            Self::MissingHeader(_) => StatusCode::BAD_REQUEST,
            Self::NoRecordFound(_) => StatusCode::NOT_FOUND,
            Self::InitializeError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ConfigurationError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::IOError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Unspecified(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Reservation(e) => reservation_status(e),
            Self::Points(e) => points_status(e),
            Self::Order(e) => order_status(e),
            Self::Payment(e) => payment_status(e),
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("💻️ Request failed with an internal error. {self}");
        }
        let mut response = HttpResponse::build(status);
        response.insert_header(ContentType::json());
        if let Some(wait) = self.retry_after() {
            response.insert_header((RETRY_AFTER, wait.as_secs().max(1).to_string()));
        }
        response.body(serde_json::json!({ "error": self.to_string() }).to_string())
    }
}

fn reservation_status(e: &ReservationError) -> StatusCode {
    use ReservationError::*;
    match e {
        InvalidQuantity(_) | InvalidUnit(_) | InvalidCampaign(_) | InvalidStageSchedule(_) => {
            StatusCode::UNPROCESSABLE_ENTITY
        },
        UnitNotFound(_) | CampaignNotFound(_) => StatusCode::NOT_FOUND,
        CapacityExceeded { .. } | CampaignClosed(_) | CampaignExpired(_) => StatusCode::CONFLICT,
        LockTimeout | LockConflict => StatusCode::SERVICE_UNAVAILABLE,
        StockUnderflow { .. } | DatabaseError(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn points_status(e: &PointLedgerError) -> StatusCode {
    use PointLedgerError::*;
    match e {
        WalletNotFound(_) => StatusCode::NOT_FOUND,
        InvalidAmount(_) => StatusCode::UNPROCESSABLE_ENTITY,
        MissingIdempotencyKey => StatusCode::BAD_REQUEST,
        IdempotencyKeyReused(_) | InsufficientAvailable { .. } | InsufficientBalance { .. } => StatusCode::CONFLICT,
        LockTimeout | LockConflict => StatusCode::SERVICE_UNAVAILABLE,
        InsufficientHold { .. } | DatabaseError(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn order_status(e: &OrderFlowError) -> StatusCode {
    use OrderFlowError::*;
    match e {
        EmptyOrder | InvalidQuantity { .. } | InvalidPointAmount { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        UserNotFound(_) | OrderNotFound(_) => StatusCode::NOT_FOUND,
        OrderAlreadyExists(_) => StatusCode::CONFLICT,
        ReservationFailed { source, .. } => reservation_status(source),
        Reservation(e) => reservation_status(e),
        PointHoldFailed(e) | Points(e) => points_status(e),
        LockTimeout | LockConflict => StatusCode::SERVICE_UNAVAILABLE,
        DatabaseError(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn payment_status(e: &PaymentFlowError) -> StatusCode {
    use PaymentFlowError::*;
    match e {
        OrderNotFound(_) | PaymentNotFound(_) | PaymentLineNotFound(_) => StatusCode::NOT_FOUND,
        InvalidAmount(_) | InvalidAllocation(_) | InvalidRefundAmount(_) => StatusCode::UNPROCESSABLE_ENTITY,
        OrderNotPayable { .. }
        | PaymentAlreadyOpen(..)
        | PaymentNotRefundable { .. }
        | RefundNotPending(_)
        | RefundExceedsAvailable { .. }
        | AmountMismatch { .. } => StatusCode::CONFLICT,
        WebhookVerificationFailed(_) => StatusCode::UNAUTHORIZED,
        Gateway(e) => gateway_status(e),
        Order(e) => order_status(e),
        Reservation(e) => reservation_status(e),
        Points(e) => points_status(e),
        LockTimeout | LockConflict => StatusCode::SERVICE_UNAVAILABLE,
        InvariantViolation(_) | DatabaseError(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn gateway_status(e: &GatewayError) -> StatusCode {
    match e {
        GatewayError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        GatewayError::VerificationFailed(_) => StatusCode::UNAUTHORIZED,
        GatewayError::PaymentNotFound(_) => StatusCode::NOT_FOUND,
        GatewayError::Rejected(_) | GatewayError::InvalidResponse(_) => StatusCode::BAD_GATEWAY,
    }
}
