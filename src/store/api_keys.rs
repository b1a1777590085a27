use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::model::ApiKey;

pub async fn insert(pool: &PgPool, user_id: Uuid, name: &str, key: &str) -> anyhow::Result<ApiKey> {
    let row = sqlx::query_as::<_, ApiKey>(
        "INSERT INTO api_keys (id, user_id, name, key, active, last_used_at)
         VALUES ($1, $2, $3, $4, true, NULL)
         RETURNING id, user_id, name, key, active, last_used_at",
    )
    .bind(Uuid::new_v4())
    .bind(user_id)
    .bind(name)
    .bind(key)
    .fetch_one(pool)
    .await?;
    Ok(row)
}

pub async fn get_by_key(pool: &PgPool, key: &str) -> anyhow::Result<Option<ApiKey>> {
    let row = sqlx::query_as::<_, ApiKey>(
        "SELECT id, user_id, name, key, active, last_used_at
         FROM api_keys WHERE key = $1 AND active = true",
    )
    .bind(key)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn touch_last_used(pool: &PgPool, key_id: Uuid, now: DateTime<Utc>) -> anyhow::Result<()> {
    sqlx::query("UPDATE api_keys SET last_used_at = $2 WHERE id = $1")
        .bind(key_id)
        .bind(now)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn revoke(pool: &PgPool, key_id: Uuid) -> anyhow::Result<bool> {
    let result = sqlx::query("UPDATE api_keys SET active = false WHERE id = $1")
        .bind(key_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}
