use log::{debug, trace};
use sqlx::{types::Json, QueryBuilder, SqliteConnection};

use crate::{
    bpe_api::order_objects::OrderQueryFilter,
    db_types::{Order, OrderId, ProductId},
    traits::PaymentGatewayError,
};

/// Inserts a new order into the database using the given connection. This is not atomic. You can embed this call
/// inside a transaction if you need to ensure atomicity, and pass `&mut *tx` as the connection argument.
pub async fn insert_order(order: &Order, conn: &mut SqliteConnection) -> Result<(), PaymentGatewayError> {
    sqlx::query(
        r#"
            INSERT INTO orders (id, number, status, version, user_key, doc, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8);
        "#,
    )
    .bind(order.id.as_str())
    .bind(order.number)
    .bind(order.status.to_string())
    .bind(order.version)
    .bind(order.user.cart_key())
    .bind(Json(order))
    .bind(order.created_at)
    .bind(order.updated_at)
    .execute(conn)
    .await?;
    debug!("🗃️ Order {} inserted with number {}", order.id, order.number);
    Ok(())
}

/// Writes `order` over the stored order, provided the stored version is still `expected_version`.
///
/// `order.version` must already hold the new version. Returns [`PaymentGatewayError::StaleOrder`] if somebody else
/// wrote the order first.
pub async fn compare_and_swap(
    expected_version: i64,
    order: &Order,
    conn: &mut SqliteConnection,
) -> Result<(), PaymentGatewayError> {
    let result = sqlx::query(
        r#"
            UPDATE orders SET status = $1, version = $2, doc = $3, updated_at = $4
            WHERE id = $5 AND version = $6;
        "#,
    )
    .bind(order.status.to_string())
    .bind(order.version)
    .bind(Json(order))
    .bind(order.updated_at)
    .bind(order.id.as_str())
    .bind(expected_version)
    .execute(conn)
    .await?;
    if result.rows_affected() == 0 {
        debug!("🗃️ Order {} is no longer at version {expected_version}. Update refused.", order.id);
        return Err(PaymentGatewayError::StaleOrder(order.id.clone()));
    }
    trace!("🗃️ Order {} updated to version {}", order.id, order.version);
    Ok(())
}

pub async fn fetch_order(order_id: &OrderId, conn: &mut SqliteConnection) -> Result<Option<Order>, sqlx::Error> {
    let order: Option<Json<Order>> = sqlx::query_scalar("SELECT doc FROM orders WHERE id = $1")
        .bind(order_id.as_str())
        .fetch_optional(conn)
        .await?;
    Ok(order.map(|o| o.0))
}

pub async fn fetch_order_by_number(number: i64, conn: &mut SqliteConnection) -> Result<Option<Order>, sqlx::Error> {
    let order: Option<Json<Order>> =
        sqlx::query_scalar("SELECT doc FROM orders WHERE number = $1").bind(number).fetch_optional(conn).await?;
    Ok(order.map(|o| o.0))
}

/// Fetches orders according to criteria specified in the `OrderQueryFilter`
///
/// Resulting orders are ordered by `number` in descending order
pub async fn search_orders(query: OrderQueryFilter, conn: &mut SqliteConnection) -> Result<Vec<Order>, sqlx::Error> {
    let mut builder = QueryBuilder::new("SELECT doc FROM orders ");
    let has_filters = query.order_id.is_some() ||
        query.number.is_some() ||
        query.status.as_ref().map(|s| !s.is_empty()).unwrap_or(false);
    if has_filters {
        builder.push("WHERE ");
    }
    let mut where_clause = builder.separated(" AND ");
    if let Some(order_id) = &query.order_id {
        where_clause.push("id = ");
        where_clause.push_bind_unseparated(order_id.to_string());
    }
    if let Some(number) = query.number {
        where_clause.push("number = ");
        where_clause.push_bind_unseparated(number);
    }
    if let Some(statuses) = query.status.as_ref().filter(|s| !s.is_empty()) {
        where_clause.push("status IN (");
        for (i, status) in statuses.iter().enumerate() {
            if i > 0 {
                where_clause.push_unseparated(", ");
            }
            where_clause.push_bind_unseparated(status.to_string());
        }
        where_clause.push_unseparated(")");
    }
    builder.push(" ORDER BY number DESC");

    trace!("🗃️ Executing query: {}", builder.sql());
    let orders: Vec<Json<Order>> = builder.build_query_scalar().fetch_all(conn).await?;
    let orders = orders
        .into_iter()
        .map(|o| o.0)
        .filter(|o| query.user.as_ref().map_or(true, |u| u.matches(&o.user)))
        .filter(|o| query.since.map_or(true, |t| o.created_at >= t))
        .filter(|o| query.until.map_or(true, |t| o.created_at <= t))
        .collect::<Vec<_>>();
    trace!("🗃️ Result of search_orders: {}", orders.len());
    Ok(orders)
}

/// Pending orders with at least one payment that is pending or failed.
pub async fn fetch_orders_awaiting_payment(conn: &mut SqliteConnection) -> Result<Vec<Order>, sqlx::Error> {
    let orders: Vec<Json<Order>> = sqlx::query_scalar(
        r#"
            SELECT doc FROM orders
            WHERE status = 'pending'
            AND EXISTS (
                SELECT 1 FROM json_each(orders.doc, '$.payments')
                WHERE json_extract(value, '$.status') IN ('pending', 'failed')
            )
            ORDER BY number ASC;
        "#,
    )
    .fetch_all(conn)
    .await?;
    Ok(orders.into_iter().map(|o| o.0).collect())
}

/// Pending orders holding any of the given products.
pub async fn fetch_pending_orders_with_products(
    product_ids: &[ProductId],
    conn: &mut SqliteConnection,
) -> Result<Vec<Order>, sqlx::Error> {
    if product_ids.is_empty() {
        return Ok(vec![]);
    }
    let mut builder = QueryBuilder::new(
        r#"
            SELECT doc FROM orders
            WHERE status = 'pending'
            AND EXISTS (
                SELECT 1 FROM json_each(orders.doc, '$.items')
                WHERE json_extract(value, '$.product.id') IN (
        "#,
    );
    let mut ids = builder.separated(", ");
    for id in product_ids {
        ids.push_bind(id.to_string());
    }
    builder.push("))");
    let orders: Vec<Json<Order>> = builder.build_query_scalar().fetch_all(conn).await?;
    Ok(orders.into_iter().map(|o| o.0).collect())
}
