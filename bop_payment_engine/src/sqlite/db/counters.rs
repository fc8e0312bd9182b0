use sqlx::SqliteConnection;

pub const ORDER_NUMBER: &str = "order-number";
pub const INVOICE_NUMBER: &str = "invoice-number";
pub const SUBSCRIPTION_NUMBER: &str = "subscription-number";

/// Atomically increments the named counter and returns the new value. The first value of a counter is 1.
pub async fn next_value(name: &str, conn: &mut SqliteConnection) -> Result<i64, sqlx::Error> {
    let value = sqlx::query_scalar(
        r#"
            INSERT INTO counters (name, value) VALUES ($1, 1)
            ON CONFLICT (name) DO UPDATE SET value = value + 1
            RETURNING value;
        "#,
    )
    .bind(name)
    .fetch_one(conn)
    .await?;
    Ok(value)
}

pub async fn current_value(name: &str, conn: &mut SqliteConnection) -> Result<i64, sqlx::Error> {
    let value: Option<i64> =
        sqlx::query_scalar("SELECT value FROM counters WHERE name = $1").bind(name).fetch_optional(conn).await?;
    Ok(value.unwrap_or(0))
}
