use crate::{
    bpe_api::order_objects::OrderQueryFilter,
    db_types::{Order, OrderId},
    traits::PaymentGatewayError,
};

/// Read access to orders.
#[allow(async_fn_in_trait)]
pub trait OrderManagement {
    async fn fetch_order(&self, order_id: &OrderId) -> Result<Option<Order>, PaymentGatewayError>;

    async fn fetch_order_by_number(&self, number: i64) -> Result<Option<Order>, PaymentGatewayError>;

    /// Fetches the orders matching the filter, newest first.
    async fn search_orders(&self, query: OrderQueryFilter) -> Result<Vec<Order>, PaymentGatewayError>;

    /// Fetches the pending orders that have at least one pending or failed payment. These are the orders the
    /// reconciler needs to look at.
    async fn fetch_orders_awaiting_payment(&self) -> Result<Vec<Order>, PaymentGatewayError>;
}
