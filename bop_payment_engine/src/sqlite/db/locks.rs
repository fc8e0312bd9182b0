use std::time::Duration;

use chrono::Utc;
use sqlx::SqliteConnection;

/// Claims the lock for `owner` if it is free, already held by `owner`, or its last heartbeat is older than `ttl`.
/// Returns true if the lock is now held by `owner`.
pub async fn try_claim(name: &str, owner: &str, ttl: Duration, conn: &mut SqliteConnection) -> Result<bool, sqlx::Error> {
    let now = Utc::now().timestamp_millis();
    let ttl = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
    let cutoff = now.saturating_sub(ttl);
    let result = sqlx::query(
        r#"
            INSERT INTO locks (name, owner, updated_at) VALUES ($1, $2, $3)
            ON CONFLICT (name) DO UPDATE SET owner = excluded.owner, updated_at = excluded.updated_at
            WHERE locks.owner = excluded.owner OR locks.updated_at < $4;
        "#,
    )
    .bind(name)
    .bind(owner)
    .bind(now)
    .bind(cutoff)
    .execute(conn)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn release(name: &str, owner: &str, conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM locks WHERE name = $1 AND owner = $2").bind(name).bind(owner).execute(conn).await?;
    Ok(())
}

pub async fn holder(name: &str, conn: &mut SqliteConnection) -> Result<Option<String>, sqlx::Error> {
    sqlx::query_scalar("SELECT owner FROM locks WHERE name = $1").bind(name).fetch_optional(conn).await
}
