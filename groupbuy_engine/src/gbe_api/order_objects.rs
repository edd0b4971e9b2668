use serde::{Deserialize, Serialize};

use crate::db_types::Money;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLineRequest {
    pub unit_id: i64,
    pub qty: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmOrderRequest {
    pub user_id: i64,
    pub lines: Vec<OrderLineRequest>,
    /// Points to hold against the order. Zero when the order is paid in cash only.
    #[serde(default)]
    pub points_to_use: Money,
}

impl ConfirmOrderRequest {
    pub fn new(user_id: i64, lines: Vec<OrderLineRequest>) -> Self {
        Self { user_id, lines, points_to_use: Money::zero() }
    }

    pub fn with_points(mut self, points: Money) -> Self {
        self.points_to_use = points;
        self
    }
}
