//! Stock reservation accounting.
//!
//! A product either owns its stock or points at another product through `stock_reference`, in which case both
//! products draw from the referenced product's stock. References are a single hop: a product with a reference can
//! never itself be referenced.
//!
//! Reserved stock is the sum of
//! * cart lines whose reservation has not expired yet, and
//! * lines of pending orders.
//!
//! Everything in here is pure; the storage backends load the carts and orders and call these functions.
use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::db_types::{Cart, Order, OrderStatus, Product, ProductId, ProductStock, UserIdentifier};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StockError {
    #[error("Product {0} cannot reference its own stock")]
    SelfReference(ProductId),
    #[error("Stock reference {0} does not exist")]
    ReferenceNotFound(ProductId),
    #[error("Stock reference {0} does not track stock")]
    ReferenceHasNoStock(ProductId),
    #[error("Stock reference {0} itself references another product's stock")]
    CascadingReference(ProductId),
    #[error("Product {0} is referenced by other products and cannot reference another product's stock")]
    ReferencedProductCannotReference(ProductId),
}

/// Whose carts count towards reserved stock.
#[derive(Debug, Clone, Default)]
pub struct ReservationQuery {
    /// This owner's cart always counts, even if its reservation has expired.
    pub include: Option<UserIdentifier>,
    /// This owner's cart never counts. Used to check how much of the stock is left for them.
    pub exclude: Option<UserIdentifier>,
}

impl ReservationQuery {
    pub fn excluding(user: &UserIdentifier) -> Self {
        Self { include: None, exclude: Some(user.clone()) }
    }

    pub fn including(user: &UserIdentifier) -> Self {
        Self { include: Some(user.clone()), exclude: None }
    }
}

/// The set of product ids drawing from the same stock as `owner`: the owner and every product referencing it.
pub fn stock_group<'a, I>(owner: &ProductId, products: I) -> BTreeSet<ProductId>
where I: IntoIterator<Item = &'a Product> {
    let mut group = products
        .into_iter()
        .filter(|p| p.stock_reference.as_ref() == Some(owner))
        .map(|p| p.id.clone())
        .collect::<BTreeSet<_>>();
    group.insert(owner.clone());
    group
}

/// Counts the units of `group` held by live cart reservations and pending orders.
pub fn amount_of_stock_reserved<'c, 'o, C, O>(
    group: &BTreeSet<ProductId>,
    carts: C,
    orders: O,
    query: &ReservationQuery,
    now: DateTime<Utc>,
) -> i64
where
    C: IntoIterator<Item = &'c Cart>,
    O: IntoIterator<Item = &'o Order>,
{
    let in_carts = carts
        .into_iter()
        .filter(|cart| !query.exclude.as_ref().map_or(false, |u| u.matches(&cart.user)))
        .map(|cart| {
            let forced = query.include.as_ref().map_or(false, |u| u.matches(&cart.user));
            cart.items
                .iter()
                .filter(|item| group.contains(&item.product_id))
                .filter(|item| forced || item.reserved_until.map_or(false, |t| t > now))
                .map(|item| i64::from(item.quantity))
                .sum::<i64>()
        })
        .sum::<i64>();
    let in_orders = orders
        .into_iter()
        .filter(|order| order.status == OrderStatus::Pending)
        .flat_map(|order| order.items.iter())
        .filter(|item| group.contains(&item.product.id))
        .map(|item| i64::from(item.quantity))
        .sum::<i64>();
    in_carts + in_orders
}

/// Recomputes the stock counters of the stock owner from the number of reserved units.
pub fn refreshed_stock(stock: &ProductStock, reserved: i64) -> ProductStock {
    stock.with_reserved(reserved)
}

/// Checks that `product` may take its stock from `reference`.
///
/// `referenced_by_others` is true when some other product already points at `product`.
pub fn validate_stock_reference(
    product: &Product,
    reference: Option<&Product>,
    referenced_by_others: bool,
) -> Result<(), StockError> {
    let Some(reference_id) = product.stock_reference.as_ref() else {
        return Ok(());
    };
    if reference_id == &product.id {
        return Err(StockError::SelfReference(product.id.clone()));
    }
    if referenced_by_others {
        return Err(StockError::ReferencedProductCannotReference(product.id.clone()));
    }
    let reference = reference.ok_or_else(|| StockError::ReferenceNotFound(reference_id.clone()))?;
    if reference.stock_reference.is_some() {
        return Err(StockError::CascadingReference(reference_id.clone()));
    }
    if reference.stock.is_none() {
        return Err(StockError::ReferenceHasNoStock(reference_id.clone()));
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use chrono::Duration;
    use rust_decimal::Decimal;

    use super::*;
    use crate::{
        currency::{Currency, Price},
        db_types::CartItem,
    };

    fn product(id: &str) -> Product {
        Product::new(id, id, Price::new(Decimal::TEN, Currency::Eur))
    }

    fn cart(user: UserIdentifier, product: &str, quantity: u32, reserved_until: Option<DateTime<Utc>>) -> Cart {
        let mut item = CartItem::new(ProductId::new(product), quantity);
        item.reserved_until = reserved_until;
        Cart { id: "c".into(), user, items: vec![item], updated_at: Utc::now() }
    }

    #[test]
    fn group_includes_referencing_products() {
        let owner = product("tshirt").with_stock(10);
        let variant = product("tshirt-xl").with_stock_reference(owner.id.clone());
        let other = product("mug");
        let group = stock_group(&owner.id, [&owner, &variant, &other]);
        assert_eq!(group.len(), 2);
        assert!(group.contains(&variant.id));
        assert!(!group.contains(&other.id));
    }

    #[test]
    fn only_live_reservations_count() {
        let now = Utc::now();
        let group = BTreeSet::from([ProductId::new("p")]);
        let carts = vec![
            cart(UserIdentifier::for_session("a"), "p", 2, Some(now + Duration::minutes(5))),
            cart(UserIdentifier::for_session("b"), "p", 3, Some(now - Duration::minutes(5))),
            cart(UserIdentifier::for_session("c"), "q", 7, Some(now + Duration::minutes(5))),
        ];
        let orders: Vec<Order> = vec![];
        let query = ReservationQuery::default();
        assert_eq!(amount_of_stock_reserved(&group, &carts, &orders, &query, now), 2);
        // The expired cart counts for its owner
        let query = ReservationQuery::including(&UserIdentifier::for_session("b"));
        assert_eq!(amount_of_stock_reserved(&group, &carts, &orders, &query, now), 5);
        let query = ReservationQuery::excluding(&UserIdentifier::for_session("a"));
        assert_eq!(amount_of_stock_reserved(&group, &carts, &orders, &query, now), 0);
    }

    #[test]
    fn stock_reference_validation() {
        let owner = product("tshirt").with_stock(10);
        let variant = product("xl").with_stock_reference(owner.id.clone());
        assert!(validate_stock_reference(&variant, Some(&owner), false).is_ok());
        assert_eq!(
            validate_stock_reference(&variant, None, false),
            Err(StockError::ReferenceNotFound(owner.id.clone()))
        );
        let selfish = product("me").with_stock_reference(ProductId::new("me"));
        assert_eq!(validate_stock_reference(&selfish, None, false), Err(StockError::SelfReference("me".into())));
        let chained = product("xxl").with_stock_reference(variant.id.clone());
        assert_eq!(
            validate_stock_reference(&chained, Some(&variant), false),
            Err(StockError::CascadingReference(variant.id.clone()))
        );
        let no_stock = product("poster");
        let referencing = product("framed").with_stock_reference(no_stock.id.clone());
        assert_eq!(
            validate_stock_reference(&referencing, Some(&no_stock), false),
            Err(StockError::ReferenceHasNoStock(no_stock.id.clone()))
        );
        assert!(validate_stock_reference(&variant, Some(&owner), true).is_err());
        assert!(validate_stock_reference(&owner, None, true).is_ok());
    }

    #[test]
    fn refreshed_stock_counters() {
        let stock = refreshed_stock(&ProductStock::new(10), 4);
        assert_eq!(stock, ProductStock { total: 10, reserved: 4, available: 6 });
    }
}
