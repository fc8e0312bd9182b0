use chrono::{DateTime, Utc};

use crate::{
    db_types::{Product, ProductId, ProductStock},
    stock::ReservationQuery,
    traits::PaymentGatewayError,
};

#[allow(async_fn_in_trait)]
pub trait ProductManagement {
    async fn fetch_product(&self, product_id: &ProductId) -> Result<Option<Product>, PaymentGatewayError>;

    /// Fetches the given products. Unknown ids are skipped.
    async fn fetch_products(&self, product_ids: &[ProductId]) -> Result<Vec<Product>, PaymentGatewayError>;

    /// Creates or replaces a product. A stock reference is validated against the stored products first.
    async fn save_product(&self, product: &Product) -> Result<Product, PaymentGatewayError>;

    /// The units of the product's stock held by live cart reservations and pending orders. Products that share stock
    /// through a reference are counted together.
    async fn amount_of_stock_reserved(
        &self,
        product_id: &ProductId,
        query: &ReservationQuery,
        now: DateTime<Utc>,
    ) -> Result<i64, PaymentGatewayError>;

    /// Recomputes the reserved and available counters of the product's stock owner and writes them back.
    /// Returns `None` if the product does not track stock.
    async fn refresh_available_stock(
        &self,
        product_id: &ProductId,
        now: DateTime<Utc>,
    ) -> Result<Option<ProductStock>, PaymentGatewayError>;

    /// Products with a cart reservation that expired in `[since, now)`.
    async fn products_with_expired_reservations(
        &self,
        since: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<ProductId>, PaymentGatewayError>;
}
