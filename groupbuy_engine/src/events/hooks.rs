use std::{future::Future, pin::Pin, sync::Arc};

use crate::events::{
    CampaignClosedEvent,
    CampaignSucceededEvent,
    EventHandler,
    EventProducer,
    Handler,
    OrderFailedEvent,
    PaymentSettledEvent,
};

type BoxedFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

#[derive(Default, Clone)]
pub struct EventProducers {
    pub campaign_succeeded_producer: Vec<EventProducer<CampaignSucceededEvent>>,
    pub campaign_closed_producer: Vec<EventProducer<CampaignClosedEvent>>,
    pub payment_settled_producer: Vec<EventProducer<PaymentSettledEvent>>,
    pub order_failed_producer: Vec<EventProducer<OrderFailedEvent>>,
}

pub struct EventHandlers {
    pub on_campaign_succeeded: Option<EventHandler<CampaignSucceededEvent>>,
    pub on_campaign_closed: Option<EventHandler<CampaignClosedEvent>>,
    pub on_payment_settled: Option<EventHandler<PaymentSettledEvent>>,
    pub on_order_failed: Option<EventHandler<OrderFailedEvent>>,
}

impl EventHandlers {
    pub fn new(buffer_size: usize, hooks: EventHooks) -> Self {
        let on_campaign_succeeded = hooks.on_campaign_succeeded.map(|f| EventHandler::new(buffer_size, f));
        let on_campaign_closed = hooks.on_campaign_closed.map(|f| EventHandler::new(buffer_size, f));
        let on_payment_settled = hooks.on_payment_settled.map(|f| EventHandler::new(buffer_size, f));
        let on_order_failed = hooks.on_order_failed.map(|f| EventHandler::new(buffer_size, f));
        Self { on_campaign_succeeded, on_campaign_closed, on_payment_settled, on_order_failed }
    }

    pub fn producers(&self) -> EventProducers {
        let mut result = EventProducers::default();
        if let Some(handler) = &self.on_campaign_succeeded {
            result.campaign_succeeded_producer.push(handler.subscribe());
        }
        if let Some(handler) = &self.on_campaign_closed {
            result.campaign_closed_producer.push(handler.subscribe());
        }
        if let Some(handler) = &self.on_payment_settled {
            result.payment_settled_producer.push(handler.subscribe());
        }
        if let Some(handler) = &self.on_order_failed {
            result.order_failed_producer.push(handler.subscribe());
        }
        result
    }

    pub async fn start_handlers(self) {
        if let Some(handler) = self.on_campaign_succeeded {
            tokio::spawn(handler.start_handler());
        }
        if let Some(handler) = self.on_campaign_closed {
            tokio::spawn(handler.start_handler());
        }
        if let Some(handler) = self.on_payment_settled {
            tokio::spawn(handler.start_handler());
        }
        if let Some(handler) = self.on_order_failed {
            tokio::spawn(handler.start_handler());
        }
    }
}

#[derive(Default, Clone)]
pub struct EventHooks {
    pub on_campaign_succeeded: Option<Handler<CampaignSucceededEvent>>,
    pub on_campaign_closed: Option<Handler<CampaignClosedEvent>>,
    pub on_payment_settled: Option<Handler<PaymentSettledEvent>>,
    pub on_order_failed: Option<Handler<OrderFailedEvent>>,
}

impl EventHooks {
    pub fn on_campaign_succeeded<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(CampaignSucceededEvent) -> BoxedFuture) + Send + Sync + 'static {
        self.on_campaign_succeeded = Some(Arc::new(f));
        self
    }

    pub fn on_campaign_closed<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(CampaignClosedEvent) -> BoxedFuture) + Send + Sync + 'static {
        self.on_campaign_closed = Some(Arc::new(f));
        self
    }

    pub fn on_payment_settled<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(PaymentSettledEvent) -> BoxedFuture) + Send + Sync + 'static {
        self.on_payment_settled = Some(Arc::new(f));
        self
    }

    pub fn on_order_failed<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(OrderFailedEvent) -> BoxedFuture) + Send + Sync + 'static {
        self.on_order_failed = Some(Arc::new(f));
        self
    }
}
