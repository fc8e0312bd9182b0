use std::{collections::BTreeMap, fmt::Debug};

use chrono::Duration;
use log::*;
use rust_decimal::Decimal;

use crate::{
    bpe_api::stock_api::ensure_stock_available,
    currency::Price,
    db_types::{Booking, Cart, CartItem, ProductId, UserIdentifier},
    helpers::Clock,
    traits::{CartManagement, PaymentGatewayError, ProductManagement, RuntimeConfigStore},
};

/// Optional details of a cart line.
#[derive(Debug, Clone, Default)]
pub struct CartLineOptions {
    pub booking: Option<Booking>,
    pub custom_price: Option<Price>,
    pub deposit_percentage: Option<Decimal>,
    pub chosen_variations: BTreeMap<String, String>,
}

/// Carts hold stock for a limited time. Every change to a cart renews the reservation of all its lines and refreshes
/// the stock counters of the products involved.
pub struct CartApi<B> {
    db: B,
    clock: Clock,
}

impl<B: Debug> Debug for CartApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CartApi ({:?})", self.db)
    }
}

impl<B> CartApi<B>
where B: CartManagement + ProductManagement + RuntimeConfigStore
{
    pub fn new(db: B) -> Self {
        Self { db, clock: Clock::system() }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub async fn fetch_cart(&self, user: &UserIdentifier) -> Result<Option<Cart>, PaymentGatewayError> {
        self.db.fetch_cart(user).await
    }

    /// Adds `quantity` units of a product to the user's cart, creating the cart if needed.
    ///
    /// Fails with [`PaymentGatewayError::OutOfStock`] if the cart would hold more than what is left once other carts
    /// and pending orders are accounted for.
    pub async fn add_to_cart(
        &self,
        user: &UserIdentifier,
        product_id: &ProductId,
        quantity: u32,
        options: CartLineOptions,
    ) -> Result<Cart, PaymentGatewayError> {
        if user.cart_key().is_none() {
            return Err(PaymentGatewayError::AnonymousCart);
        }
        let now = self.clock.now();
        let product = self
            .db
            .fetch_product(product_id)
            .await?
            .ok_or_else(|| PaymentGatewayError::ProductNotFound(product_id.clone()))?;
        if !product.availability.is_available_at(now) {
            return Err(PaymentGatewayError::ProductUnavailable(product.id));
        }
        if options.custom_price.is_some() && !product.allow_custom_price {
            return Err(PaymentGatewayError::InvalidCustomPrice(product.id));
        }
        let mut cart = self.db.fetch_cart(user).await?.unwrap_or_else(|| Cart::new(user.clone(), now));
        let mut item = CartItem::new(product.id.clone(), quantity);
        item.booking = options.booking;
        item.custom_price = options.custom_price;
        item.deposit_percentage = options.deposit_percentage;
        item.chosen_variations = options.chosen_variations;
        cart.items.push(item);

        let ids = cart.items.iter().map(|i| i.product_id.clone()).collect::<Vec<_>>();
        let products = self.db.fetch_products(&ids).await?;
        let mut wanted = BTreeMap::<ProductId, i64>::new();
        for item in &cart.items {
            let Some(p) = products.iter().find(|p| p.id == item.product_id) else {
                continue;
            };
            if p.stock.is_some() || p.stock_reference.is_some() {
                *wanted.entry(p.stock_owner().clone()).or_default() += i64::from(item.quantity);
            }
        }
        let owner = product.stock_owner().clone();
        let requested = wanted.remove(&owner).map(|q| BTreeMap::from([(owner, q)])).unwrap_or_default();
        ensure_stock_available(&self.db, user, &requested, now).await?;

        self.save_with_fresh_reservations(cart).await
    }

    /// Removes a line from the user's cart. Unknown lines are ignored.
    pub async fn remove_from_cart(&self, user: &UserIdentifier, item_id: &str) -> Result<Option<Cart>, PaymentGatewayError> {
        let Some(mut cart) = self.db.fetch_cart(user).await? else {
            return Ok(None);
        };
        let before = cart.items.len();
        cart.items.retain(|i| i.id != item_id);
        if cart.items.len() == before {
            return Ok(Some(cart));
        }
        debug!("🧾️ Line {item_id} removed from cart {}", cart.id);
        self.save_with_fresh_reservations(cart).await.map(Some)
    }

    /// Empties the cart and releases everything it held.
    pub async fn clear_cart(&self, user: &UserIdentifier) -> Result<(), PaymentGatewayError> {
        if let Some(cart) = self.db.fetch_cart(user).await? {
            self.db.delete_cart(&cart.id, self.clock.now()).await?;
            debug!("🧾️ Cart {} cleared", cart.id);
        }
        Ok(())
    }

    async fn save_with_fresh_reservations(&self, mut cart: Cart) -> Result<Cart, PaymentGatewayError> {
        let now = self.clock.now();
        let config = self.db.fetch_runtime_config().await?;
        let until = now + Duration::minutes(config.reserve_stock_minutes);
        for item in cart.items.iter_mut() {
            item.reserved_until = Some(until);
        }
        cart.updated_at = now;
        self.db.save_cart(&cart, now).await
    }
}
