use chrono::{DateTime, Utc};
use rand::{distributions::Alphanumeric, Rng};

use crate::db_types::CorrelationId;

/// `GB{yyyymmddHHMMSS}{6 random digits}`
pub fn new_order_no(now: DateTime<Utc>) -> String {
    let suffix: u32 = rand::thread_rng().gen_range(0..1_000_000);
    format!("GB{}{suffix:06}", now.format("%Y%m%d%H%M%S"))
}

/// A fresh gateway-facing reference for a payment on `order_no`. Every payment attempt gets its own.
pub fn new_correlation_id(order_no: &str) -> CorrelationId {
    let suffix = rand::thread_rng().sample_iter(&Alphanumeric).take(8).map(char::from).collect::<String>();
    CorrelationId::new(format!("pay_{order_no}_{suffix}"))
}
