use std::fmt::Display;

use groupbuy_engine::{
    db_types::{Money, RefundType},
    payment_rules::RefundLineRequest,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct QtyRequest {
    pub qty: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ParticipateRequest {
    pub user_id: i64,
    pub qty: i64,
}

/// Body of the wallet mutation routes. The idempotency key travels in the `Idempotency-Key` header.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PointsRequest {
    pub amount: Money,
    /// Only meaningful for `burn`. Settles previously held points instead of spending available ones.
    #[serde(default)]
    pub via_hold: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelRequest {
    pub lines: Vec<RefundLineRequest>,
    pub reason: String,
    pub refund_type: RefundType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonResponse {
    pub success: bool,
    pub message: String,
}

impl JsonResponse {
    pub fn success<S: Display>(message: S) -> Self {
        Self { success: true, message: message.to_string() }
    }

    pub fn failure<S: Display>(message: S) -> Self {
        Self { success: false, message: message.to_string() }
    }
}
