use std::{collections::BTreeMap, fmt::Debug};

use chrono::{DateTime, Utc};
use log::*;

use crate::{
    db_types::{Product, ProductId, ProductStock, UserIdentifier},
    stock::ReservationQuery,
    traits::{PaymentGatewayError, ProductManagement},
};

/// Stock queries and maintenance: how much is reserved, recomputing the counters, and releasing reservations that
/// lapsed.
pub struct StockApi<B> {
    db: B,
}

impl<B: Debug> Debug for StockApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StockApi ({:?})", self.db)
    }
}

impl<B> StockApi<B>
where B: ProductManagement
{
    pub fn new(db: B) -> Self {
        Self { db }
    }

    /// The units of `product_id`'s stock held by carts and pending orders, optionally ignoring `user`'s own cart.
    pub async fn amount_of_stock_reserved(
        &self,
        product_id: &ProductId,
        excluding: Option<&UserIdentifier>,
        now: DateTime<Utc>,
    ) -> Result<i64, PaymentGatewayError> {
        let query = excluding.map(ReservationQuery::excluding).unwrap_or_default();
        self.db.amount_of_stock_reserved(product_id, &query, now).await
    }

    pub async fn refresh_available_stock(
        &self,
        product_id: &ProductId,
        now: DateTime<Utc>,
    ) -> Result<Option<ProductStock>, PaymentGatewayError> {
        self.db.refresh_available_stock(product_id, now).await
    }

    /// Refreshes the stock of every product whose cart reservation lapsed in `[since, now)`. Returns the number of
    /// products refreshed.
    pub async fn refresh_expired_reservations(
        &self,
        since: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<usize, PaymentGatewayError> {
        let ids = self.db.products_with_expired_reservations(since, now).await?;
        for id in &ids {
            self.db.refresh_available_stock(id, now).await?;
        }
        if !ids.is_empty() {
            info!("📦️ Released lapsed reservations on {} products", ids.len());
        }
        Ok(ids.len())
    }

    pub async fn save_product(&self, product: &Product) -> Result<Product, PaymentGatewayError> {
        self.db.save_product(product).await
    }

    pub async fn fetch_product(&self, product_id: &ProductId) -> Result<Option<Product>, PaymentGatewayError> {
        self.db.fetch_product(product_id).await
    }
}

/// Checks that `user` can take the `wanted` units of each stock owner, not counting what their own cart holds.
pub(crate) async fn ensure_stock_available<B: ProductManagement>(
    db: &B,
    user: &UserIdentifier,
    wanted: &BTreeMap<ProductId, i64>,
    now: DateTime<Utc>,
) -> Result<(), PaymentGatewayError> {
    if wanted.is_empty() {
        return Ok(());
    }
    let owners = wanted.keys().cloned().collect::<Vec<_>>();
    let owners = db.fetch_products(&owners).await?.into_iter().map(|p| (p.id.clone(), p)).collect::<BTreeMap<_, _>>();
    let query = ReservationQuery::excluding(user);
    for (owner_id, quantity) in wanted {
        let owner = owners.get(owner_id).ok_or_else(|| PaymentGatewayError::ProductNotFound(owner_id.clone()))?;
        let Some(stock) = owner.stock.as_ref() else {
            continue;
        };
        let reserved = db.amount_of_stock_reserved(owner_id, &query, now).await?;
        let available = (stock.total - reserved).max(0);
        if *quantity > available {
            debug!("📦️ {user} wants {quantity} of {owner_id}, only {available} left");
            return Err(PaymentGatewayError::OutOfStock { product: owner_id.clone(), available });
        }
    }
    Ok(())
}
