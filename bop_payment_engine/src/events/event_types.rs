use crate::db_types::{Order, OrderPayment, OrderStatus};

/// Emitted once, when an order's payments first cover its total.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderPaidEvent {
    pub order: Order,
}

impl OrderPaidEvent {
    pub fn new(order: Order) -> Self {
        Self { order }
    }
}

/// Emitted for every payment that is received, including deposits that do not complete the order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentReceivedEvent {
    pub order: Order,
    pub payment: OrderPayment,
}

/// Emitted when a payment expires, is canceled or fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentFailedEvent {
    pub order: Order,
    pub payment: OrderPayment,
}

/// Emitted when an order leaves the pending state without being paid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderAnnulledEvent {
    pub order: Order,
    pub status: OrderStatus,
}

impl OrderAnnulledEvent {
    pub fn new(order: Order) -> Self {
        let status = order.status;
        Self { order, status }
    }
}
