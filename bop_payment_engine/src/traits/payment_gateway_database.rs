use thiserror::Error;

use crate::{
    bpe_api::order_objects::{InsertedOrder, NewOrder, OrderUpdate},
    currency::CurrencyError,
    db_types::{Order, OrderId, PaymentId, PaymentMethodKind, ProductId},
    orders::{FulfilmentContext, OrderError, PaidTransition, PaymentReceipt},
    pricing::PricingError,
    processors::ProcessorError,
    stock::StockError,
    traits::{CartManagement, FulfilmentManagement, OrderManagement, ProductManagement, RuntimeConfigStore},
};

/// This trait defines the highest level of behaviour for backends supporting the payment engine.
///
/// Every method here is a single atomic unit of work: it either happens completely or not at all. Order writes are
/// conditional on the order's version, so a concurrent change makes the write fail with
/// [`PaymentGatewayError::StaleOrder`] instead of overwriting it.
#[allow(async_fn_in_trait)]
pub trait PaymentGatewayDatabase:
    Clone + OrderManagement + CartManagement + ProductManagement + FulfilmentManagement + RuntimeConfigStore {
    /// The URL of the database
    fn url(&self) -> &str;

    /// Hands out the next order number. Numbers are unique and increasing, but an order that fails to be created
    /// leaves a gap.
    async fn reserve_order_number(&self) -> Result<i64, PaymentGatewayError>;

    /// Stores a brand-new order. In a single transaction:
    /// * assigns the next order number, unless one was reserved already,
    /// * inserts the order,
    /// * if the order comes with an automatic receipt (free orders), marks that payment as paid and fulfils the order,
    /// * deletes the cart the order was created from,
    /// * refreshes the stock of every product in the order.
    async fn insert_order(&self, order: NewOrder) -> Result<InsertedOrder, PaymentGatewayError>;

    /// Writes a new state of an existing order, provided nobody else wrote it since `update.expected_version`.
    /// Queued emails are stored in the same transaction. If the order is no longer pending, the stock of its
    /// products is refreshed.
    async fn update_order(&self, update: OrderUpdate) -> Result<Order, PaymentGatewayError>;

    /// Records a successful payment. In a single transaction:
    /// * allocates the next invoice number,
    /// * applies the paid transition and writes the order (conditional on its version),
    /// * runs the order's fulfilment: subscriptions, tickets, challenges, leaderboards, stock and emails.
    async fn pay_order_payment(
        &self,
        order: &Order,
        payment_id: &PaymentId,
        receipt: PaymentReceipt,
        ctx: FulfilmentContext,
    ) -> Result<PaidTransition, PaymentGatewayError>;

    /// Closes the database connection.
    async fn close(&mut self) -> Result<(), PaymentGatewayError>;
}

#[derive(Debug, Clone, Error)]
pub enum PaymentGatewayError {
    #[error("We have an internal database engine (configuration/uptime etc.) error: {0}")]
    DatabaseError(String),
    #[error("A stored document could not be read or written: {0}")]
    SerializationError(String),
    #[error("The requested order {0} does not exist")]
    OrderNotFound(OrderId),
    #[error("The requested product {0} does not exist")]
    ProductNotFound(ProductId),
    #[error("Invalid query: {0}")]
    QueryError(String),
    #[error("A cart needs a user or a session to belong to")]
    AnonymousCart,
    #[error("Order {0} was modified by someone else. Reload it and try again.")]
    StaleOrder(OrderId),
    #[error("{0}")]
    OrderError(#[from] OrderError),
    #[error("{0}")]
    PricingError(#[from] PricingError),
    #[error("{0}")]
    CurrencyError(#[from] CurrencyError),
    #[error("{0}")]
    StockError(#[from] StockError),
    #[error("{0}")]
    ProcessorError(#[from] ProcessorError),
    #[error("Only {available} units of {product} are available")]
    OutOfStock { product: ProductId, available: i64 },
    #[error("Product {0} is not available for sale")]
    ProductUnavailable(ProductId),
    #[error("Product {0} does not accept a custom price")]
    InvalidCustomPrice(ProductId),
    #[error("Invalid discount: {0}")]
    InvalidDiscount(String),
    #[error("A shipping address is required for shipped products")]
    MissingShippingAddress,
    #[error("A billing address is required")]
    MissingBillingAddress,
    #[error("Payment method {0} is not accepted for this order")]
    UnsupportedPaymentMethod(PaymentMethodKind),
    #[error("A free payment can only settle an order with a zero total")]
    FreePaymentForNonZeroTotal,
    #[error("Cannot create an order without items")]
    EmptyOrder,
    #[error("Payment {0} is not a manual payment and cannot be confirmed by hand")]
    NotManualPayment(PaymentId),
}

impl PaymentGatewayError {
    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, PaymentGatewayError::OrderError(e) if e.is_invariant_violation())
    }
}

impl From<sqlx::Error> for PaymentGatewayError {
    fn from(e: sqlx::Error) -> Self {
        PaymentGatewayError::DatabaseError(e.to_string())
    }
}

impl From<serde_json::Error> for PaymentGatewayError {
    fn from(e: serde_json::Error) -> Self {
        PaymentGatewayError::SerializationError(e.to_string())
    }
}
