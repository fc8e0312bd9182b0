//! The event hooks installed by the server. For now they only report to the log.
use bop_payment_engine::events::{EventHandlers, EventHooks, EventProducers};
use log::*;

const EVENT_BUFFER_SIZE: usize = 50;

pub fn logging_hooks() -> EventHooks {
    let mut hooks = EventHooks::default();
    hooks
        .on_order_paid(|ev| {
            Box::pin(async move {
                info!("📬️ Order {} (#{}) has been paid", ev.order.id, ev.order.number);
            })
        })
        .on_payment_received(|ev| {
            Box::pin(async move {
                info!(
                    "📬️ Payment {} of {} received for order {}",
                    ev.payment.id, ev.payment.price, ev.order.id
                );
            })
        })
        .on_payment_failed(|ev| {
            Box::pin(async move {
                info!("📬️ Payment {} for order {} is {}", ev.payment.id, ev.order.id, ev.payment.status);
            })
        })
        .on_order_annulled(|ev| {
            Box::pin(async move {
                info!("📬️ Order {} (#{}) is {}", ev.order.id, ev.order.number, ev.status);
            })
        });
    hooks
}

/// Spawns the handlers for `hooks` and returns the producers the engine publishes to.
pub async fn start_event_handlers(hooks: EventHooks) -> EventProducers {
    let handlers = EventHandlers::new(EVENT_BUFFER_SIZE, hooks);
    let producers = handlers.producers();
    handlers.start_handlers().await;
    producers
}
