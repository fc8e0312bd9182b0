use log::trace;
use sqlx::{types::Json, QueryBuilder, SqliteConnection};

use crate::db_types::{Product, ProductId};

pub async fn fetch_product(product_id: &ProductId, conn: &mut SqliteConnection) -> Result<Option<Product>, sqlx::Error> {
    let product: Option<Json<Product>> = sqlx::query_scalar("SELECT doc FROM products WHERE id = $1")
        .bind(product_id.as_str())
        .fetch_optional(conn)
        .await?;
    Ok(product.map(|p| p.0))
}

pub async fn fetch_products(product_ids: &[ProductId], conn: &mut SqliteConnection) -> Result<Vec<Product>, sqlx::Error> {
    if product_ids.is_empty() {
        return Ok(vec![]);
    }
    let mut builder = QueryBuilder::new("SELECT doc FROM products WHERE id IN (");
    let mut ids = builder.separated(", ");
    for id in product_ids {
        ids.push_bind(id.to_string());
    }
    builder.push(")");
    let products: Vec<Json<Product>> = builder.build_query_scalar().fetch_all(conn).await?;
    Ok(products.into_iter().map(|p| p.0).collect())
}

/// Products taking their stock from `owner`.
pub async fn fetch_products_referencing(
    owner: &ProductId,
    conn: &mut SqliteConnection,
) -> Result<Vec<Product>, sqlx::Error> {
    let products: Vec<Json<Product>> = sqlx::query_scalar("SELECT doc FROM products WHERE stock_reference = $1")
        .bind(owner.as_str())
        .fetch_all(conn)
        .await?;
    Ok(products.into_iter().map(|p| p.0).collect())
}

pub async fn is_referenced_by_others(product_id: &ProductId, conn: &mut SqliteConnection) -> Result<bool, sqlx::Error> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products WHERE stock_reference = $1 AND id != $1")
        .bind(product_id.as_str())
        .fetch_one(conn)
        .await?;
    Ok(count > 0)
}

pub async fn upsert_product(product: &Product, conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
            INSERT INTO products (id, stock_reference, doc, updated_at) VALUES ($1, $2, $3, CURRENT_TIMESTAMP)
            ON CONFLICT (id) DO UPDATE SET
                stock_reference = excluded.stock_reference,
                doc = excluded.doc,
                updated_at = excluded.updated_at;
        "#,
    )
    .bind(product.id.as_str())
    .bind(product.stock_reference.as_ref().map(|r| r.to_string()))
    .bind(Json(product))
    .execute(conn)
    .await?;
    trace!("🗃️ Product {} saved", product.id);
    Ok(())
}
