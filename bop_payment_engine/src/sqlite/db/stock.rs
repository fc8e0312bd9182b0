//! Stock recomputation inside a connection or transaction.
use chrono::{DateTime, Utc};
use log::debug;
use sqlx::SqliteConnection;

use super::{carts, orders, products};
use crate::{
    db_types::{Product, ProductId, ProductStock},
    stock::{amount_of_stock_reserved, refreshed_stock, stock_group, ReservationQuery},
    traits::PaymentGatewayError,
};

/// The product that owns the stock `product_id` draws from, if stock is tracked.
async fn stock_owner(product_id: &ProductId, conn: &mut SqliteConnection) -> Result<Option<Product>, sqlx::Error> {
    let Some(product) = products::fetch_product(product_id, conn).await? else {
        return Ok(None);
    };
    let owner = match product.stock_reference.as_ref() {
        Some(reference) => products::fetch_product(reference, conn).await?,
        None => Some(product),
    };
    Ok(owner.filter(|p| p.stock.is_some()))
}

async fn reserved_for_owner(
    owner: &Product,
    query: &ReservationQuery,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<i64, sqlx::Error> {
    let referencing = products::fetch_products_referencing(&owner.id, conn).await?;
    let group = stock_group(&owner.id, referencing.iter());
    let ids = group.iter().cloned().collect::<Vec<_>>();
    let carts = carts::fetch_carts_with_products(&ids, conn).await?;
    let orders = orders::fetch_pending_orders_with_products(&ids, conn).await?;
    Ok(amount_of_stock_reserved(&group, carts.iter(), orders.iter(), query, now))
}

pub async fn amount_reserved(
    product_id: &ProductId,
    query: &ReservationQuery,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<i64, PaymentGatewayError> {
    match stock_owner(product_id, conn).await? {
        Some(owner) => Ok(reserved_for_owner(&owner, query, now, conn).await?),
        None => Ok(0),
    }
}

/// Recomputes `reserved` and `available` for the stock owner of `product_id` from carts and pending orders.
pub async fn refresh_available_stock(
    product_id: &ProductId,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Option<ProductStock>, PaymentGatewayError> {
    let Some(mut owner) = stock_owner(product_id, conn).await? else {
        return Ok(None);
    };
    let reserved = reserved_for_owner(&owner, &ReservationQuery::default(), now, conn).await?;
    let Some(stock) = owner.stock.as_ref() else {
        return Ok(None);
    };
    let stock = refreshed_stock(stock, reserved);
    owner.stock = Some(stock);
    products::upsert_product(&owner, conn).await?;
    debug!("📦️ Stock of {} refreshed: {} total, {} reserved, {} available", owner.id, stock.total, stock.reserved, stock.available);
    Ok(Some(stock))
}

/// Refreshes the stock of every given product. Products sharing a stock owner are refreshed once.
pub async fn refresh_many<'a, I>(product_ids: I, now: DateTime<Utc>, conn: &mut SqliteConnection) -> Result<(), PaymentGatewayError>
where I: IntoIterator<Item = &'a ProductId> {
    let mut ids = product_ids.into_iter().cloned().collect::<Vec<_>>();
    ids.sort();
    ids.dedup();
    for id in ids {
        refresh_available_stock(&id, now, conn).await?;
    }
    Ok(())
}

/// Takes `sold` units out of the stock owned by `owner`.
pub async fn decrement_stock(owner: &ProductId, sold: i64, conn: &mut SqliteConnection) -> Result<(), PaymentGatewayError> {
    let Some(mut product) = products::fetch_product(owner, conn).await? else {
        return Err(PaymentGatewayError::ProductNotFound(owner.clone()));
    };
    if let Some(stock) = product.stock.as_mut() {
        stock.total -= sold;
        stock.available -= sold;
        debug!("📦️ {sold} units of {owner} sold. {} left in stock", stock.total);
        products::upsert_product(&product, conn).await?;
    }
    Ok(())
}
