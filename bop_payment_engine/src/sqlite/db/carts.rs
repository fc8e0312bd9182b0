use sqlx::{types::Json, QueryBuilder, SqliteConnection};

use crate::{
    db_types::{Cart, CartId, ProductId, UserIdentifier},
    traits::PaymentGatewayError,
};

pub async fn fetch_cart_for_user(user: &UserIdentifier, conn: &mut SqliteConnection) -> Result<Option<Cart>, sqlx::Error> {
    let Some(key) = user.cart_key() else {
        return Ok(None);
    };
    let cart: Option<Json<Cart>> =
        sqlx::query_scalar("SELECT doc FROM carts WHERE user_key = $1").bind(key).fetch_optional(conn).await?;
    Ok(cart.map(|c| c.0))
}

pub async fn fetch_cart(cart_id: &CartId, conn: &mut SqliteConnection) -> Result<Option<Cart>, sqlx::Error> {
    let cart: Option<Json<Cart>> =
        sqlx::query_scalar("SELECT doc FROM carts WHERE id = $1").bind(cart_id.as_str()).fetch_optional(conn).await?;
    Ok(cart.map(|c| c.0))
}

/// Inserts the cart, or replaces the cart of the same user.
pub async fn upsert_cart(cart: &Cart, conn: &mut SqliteConnection) -> Result<(), PaymentGatewayError> {
    let key = cart.user.cart_key().ok_or(PaymentGatewayError::AnonymousCart)?;
    sqlx::query(
        r#"
            INSERT INTO carts (id, user_key, doc, updated_at) VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_key) DO UPDATE SET id = excluded.id, doc = excluded.doc, updated_at = excluded.updated_at;
        "#,
    )
    .bind(cart.id.as_str())
    .bind(key)
    .bind(Json(cart))
    .bind(cart.updated_at)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn delete_cart(cart_id: &CartId, conn: &mut SqliteConnection) -> Result<Option<Cart>, sqlx::Error> {
    let cart: Option<Json<Cart>> = sqlx::query_scalar("DELETE FROM carts WHERE id = $1 RETURNING doc")
        .bind(cart_id.as_str())
        .fetch_optional(conn)
        .await?;
    Ok(cart.map(|c| c.0))
}

/// Carts holding any of the given products.
pub async fn fetch_carts_with_products(
    product_ids: &[ProductId],
    conn: &mut SqliteConnection,
) -> Result<Vec<Cart>, sqlx::Error> {
    if product_ids.is_empty() {
        return Ok(vec![]);
    }
    let mut builder = QueryBuilder::new(
        r#"
            SELECT doc FROM carts
            WHERE EXISTS (
                SELECT 1 FROM json_each(carts.doc, '$.items')
                WHERE json_extract(value, '$.productId') IN (
        "#,
    );
    let mut ids = builder.separated(", ");
    for id in product_ids {
        ids.push_bind(id.to_string());
    }
    builder.push("))");
    let carts: Vec<Json<Cart>> = builder.build_query_scalar().fetch_all(conn).await?;
    Ok(carts.into_iter().map(|c| c.0).collect())
}

pub async fn fetch_all_carts(conn: &mut SqliteConnection) -> Result<Vec<Cart>, sqlx::Error> {
    let carts: Vec<Json<Cart>> = sqlx::query_scalar("SELECT doc FROM carts").fetch_all(conn).await?;
    Ok(carts.into_iter().map(|c| c.0).collect())
}
