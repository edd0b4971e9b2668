//! Relays engine events to users.
//!
//! Push delivery is out of scope, so the notification collaborator only logs what would be sent. Handlers are
//! fire-and-forget: a failure to notify never affects the operation that raised the event.
use futures::future::BoxFuture;
use groupbuy_engine::events::{
    CampaignClosedEvent,
    CampaignSucceededEvent,
    EventHandlers,
    EventHooks,
    OrderFailedEvent,
    PaymentSettledEvent,
};
use log::*;

pub const NOTIFICATION_EVENT_BUFFER_SIZE: usize = 25;

pub fn create_notification_event_handlers() -> EventHandlers {
    let mut hooks = EventHooks::default();
    hooks.on_campaign_succeeded(|ev| {
        let CampaignSucceededEvent { campaign, participants } = ev;
        let message = format!("Campaign #{} reached its target of {}", campaign.id, campaign.target_qty);
        notify_users(participants, message)
    });
    hooks.on_campaign_closed(|ev| {
        let CampaignClosedEvent { campaign, succeeded, participants } = ev;
        let message = if succeeded {
            format!("Campaign #{} has closed. Your group buy went ahead.", campaign.id)
        } else {
            format!(
                "Campaign #{} closed at {}/{} without reaching its target.",
                campaign.id, campaign.current_qty, campaign.target_qty
            )
        };
        notify_users(participants, message)
    });
    hooks.on_payment_settled(|ev| {
        let PaymentSettledEvent { payment, order } = ev;
        let message =
            format!("Order [{}] is paid ({} cash, {} points)", order.order_no, payment.cash_amount, payment.point_amount);
        notify_users(vec![order.user_id], message)
    });
    hooks.on_order_failed(|ev| {
        let OrderFailedEvent { order, payment_status, stock_released } = ev;
        if !stock_released {
            warn!("📬️ Order [{}] failed but its stock was not released in the same step", order.order_no);
        }
        let message = format!("Order [{}] could not be completed. The payment is {payment_status}.", order.order_no);
        notify_users(vec![order.user_id], message)
    });
    EventHandlers::new(NOTIFICATION_EVENT_BUFFER_SIZE, hooks)
}

fn notify_users(user_ids: Vec<i64>, message: String) -> BoxFuture<'static, ()> {
    if user_ids.is_empty() {
        trace!("📬️ Nobody to notify about: {message}");
        return no_op();
    }
    Box::pin(async move {
        for user_id in user_ids {
            info!("📬️ notifyUsers user #{user_id}: {message}");
        }
    })
}

fn no_op() -> BoxFuture<'static, ()> {
    Box::pin(async {})
}
