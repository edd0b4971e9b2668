use crate::PgPaymentStatus;

/// The status a webhook event type implies. This is a hint only: the payment is always re-fetched before anything is
/// decided. Events that say nothing about the payment status (`Transaction.CancelPending`, billing key events) give
/// `None`.
pub fn status_hint_for_event(event_type: &str) -> Option<PgPaymentStatus> {
    match event_type {
        "Transaction.Ready" => Some(PgPaymentStatus::Ready),
        "Transaction.PayPending" => Some(PgPaymentStatus::PayPending),
        "Transaction.VirtualAccountIssued" => Some(PgPaymentStatus::VirtualAccountIssued),
        "Transaction.Paid" => Some(PgPaymentStatus::Paid),
        "Transaction.PartialCancelled" => Some(PgPaymentStatus::PartialCancelled),
        "Transaction.Cancelled" => Some(PgPaymentStatus::Cancelled),
        "Transaction.Failed" => Some(PgPaymentStatus::Failed),
        _ => None,
    }
}
