use sqlx::PgPool;
use uuid::Uuid;

use crate::model::WebhookConfig;

pub async fn insert(
    pool: &PgPool,
    user_id: Uuid,
    url: &str,
    secret_key: Option<&str>,
    events: &[String],
) -> anyhow::Result<WebhookConfig> {
    let row = sqlx::query_as::<_, WebhookConfig>(
        "INSERT INTO webhook_configs (id, user_id, url, secret_key, events, active)
         VALUES ($1, $2, $3, $4, $5, true)
         RETURNING id, user_id, url, secret_key, events, active",
    )
    .bind(Uuid::new_v4())
    .bind(user_id)
    .bind(url)
    .bind(secret_key)
    .bind(events)
    .fetch_one(pool)
    .await?;
    Ok(row)
}

pub async fn get(pool: &PgPool, webhook_id: Uuid) -> anyhow::Result<Option<WebhookConfig>> {
    let row = sqlx::query_as::<_, WebhookConfig>(
        "SELECT id, user_id, url, secret_key, events, active FROM webhook_configs WHERE id = $1",
    )
    .bind(webhook_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn list_for_user(pool: &PgPool, user_id: Uuid) -> anyhow::Result<Vec<WebhookConfig>> {
    let rows = sqlx::query_as::<_, WebhookConfig>(
        "SELECT id, user_id, url, secret_key, events, active
         FROM webhook_configs WHERE user_id = $1",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Active webhooks for a user whose `events` includes `event_name` — the
/// Inbound Fan-out's lookup (C8).
pub async fn list_active_for_event(
    pool: &PgPool,
    user_id: Uuid,
    event_name: &str,
) -> anyhow::Result<Vec<WebhookConfig>> {
    let rows = sqlx::query_as::<_, WebhookConfig>(
        "SELECT id, user_id, url, secret_key, events, active
         FROM webhook_configs
         WHERE user_id = $1 AND active = true AND $2 = ANY(events)",
    )
    .bind(user_id)
    .bind(event_name)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn update(
    pool: &PgPool,
    webhook_id: Uuid,
    url: &str,
    secret_key: Option<&str>,
    events: &[String],
    active: bool,
) -> anyhow::Result<Option<WebhookConfig>> {
    let row = sqlx::query_as::<_, WebhookConfig>(
        "UPDATE webhook_configs SET url = $2, secret_key = $3, events = $4, active = $5
         WHERE id = $1
         RETURNING id, user_id, url, secret_key, events, active",
    )
    .bind(webhook_id)
    .bind(url)
    .bind(secret_key)
    .bind(events)
    .bind(active)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn delete(pool: &PgPool, webhook_id: Uuid) -> anyhow::Result<bool> {
    let result = sqlx::query("DELETE FROM webhook_configs WHERE id = $1")
        .bind(webhook_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}
