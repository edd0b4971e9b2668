use serde::{Deserialize, Serialize};

use crate::db_types::{Campaign, Order, Payment, PaymentStatus};

/// A campaign reached its target quantity for the first time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignSucceededEvent {
    pub campaign: Campaign,
    pub participants: Vec<i64>,
}

impl CampaignSucceededEvent {
    pub fn new(campaign: Campaign, participants: Vec<i64>) -> Self {
        Self { campaign, participants }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignClosedEvent {
    pub campaign: Campaign,
    /// Whether the campaign had reached its target before it closed.
    pub succeeded: bool,
    pub participants: Vec<i64>,
}

impl CampaignClosedEvent {
    pub fn new(campaign: Campaign, succeeded: bool, participants: Vec<i64>) -> Self {
        Self { campaign, succeeded, participants }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentSettledEvent {
    pub payment: Payment,
    pub order: Order,
}

impl PaymentSettledEvent {
    pub fn new(payment: Payment, order: Order) -> Self {
        Self { payment, order }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderFailedEvent {
    pub order: Order,
    /// The payment status that failed the order.
    pub payment_status: PaymentStatus,
    pub stock_released: bool,
}

impl OrderFailedEvent {
    pub fn new(order: Order, payment_status: PaymentStatus, stock_released: bool) -> Self {
        Self { order, payment_status, stock_released }
    }
}
