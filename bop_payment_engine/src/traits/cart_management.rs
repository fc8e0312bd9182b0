use chrono::{DateTime, Utc};

use crate::{
    db_types::{Cart, CartId, UserIdentifier},
    traits::PaymentGatewayError,
};

#[allow(async_fn_in_trait)]
pub trait CartManagement {
    async fn fetch_cart(&self, user: &UserIdentifier) -> Result<Option<Cart>, PaymentGatewayError>;

    /// Creates or replaces the cart and, in the same transaction, refreshes the stock of every product that was or is
    /// in the cart.
    async fn save_cart(&self, cart: &Cart, now: DateTime<Utc>) -> Result<Cart, PaymentGatewayError>;

    /// Deletes the cart and refreshes the stock it was holding.
    async fn delete_cart(&self, cart_id: &CartId, now: DateTime<Utc>) -> Result<(), PaymentGatewayError>;
}
