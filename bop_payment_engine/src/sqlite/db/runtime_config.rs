use sqlx::{types::Json, SqliteConnection};

use crate::runtime_config::RuntimeConfig;

pub async fn fetch_runtime_config(conn: &mut SqliteConnection) -> Result<Option<RuntimeConfig>, sqlx::Error> {
    let config: Option<Json<RuntimeConfig>> =
        sqlx::query_scalar("SELECT doc FROM runtime_config WHERE id = 1").fetch_optional(conn).await?;
    Ok(config.map(|c| c.0))
}

pub async fn save_runtime_config(config: &RuntimeConfig, conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
            INSERT INTO runtime_config (id, doc) VALUES (1, $1)
            ON CONFLICT (id) DO UPDATE SET doc = excluded.doc, updated_at = CURRENT_TIMESTAMP;
        "#,
    )
    .bind(Json(config))
    .execute(conn)
    .await?;
    Ok(())
}
