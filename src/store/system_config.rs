//! Runtime-overridable defaults, layered over hardcoded settings the way
//! `original_source/backend/app/services/config_service.py` does.

use sqlx::PgPool;

use crate::model::SystemConfigEntry;

pub async fn get(pool: &PgPool, key: &str) -> anyhow::Result<Option<SystemConfigEntry>> {
    let row = sqlx::query_as::<_, SystemConfigEntry>(
        "SELECT key, value, description FROM system_config WHERE key = $1",
    )
    .bind(key)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn set(pool: &PgPool, key: &str, value: &str) -> anyhow::Result<()> {
    sqlx::query(
        "INSERT INTO system_config (key, value, description)
         VALUES ($1, $2, NULL)
         ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value",
    )
    .bind(key)
    .bind(value)
    .execute(pool)
    .await?;
    Ok(())
}

/// Returns the stored value for `key`, or `default` if unset / unparsable.
/// Used for the quota reset day, agent ping timeout, and renewal
/// reminder/grace windows.
pub async fn get_or(pool: &PgPool, key: &str, default: &str) -> String {
    match get(pool, key).await {
        Ok(Some(entry)) => entry.value,
        _ => default.to_string(),
    }
}

pub async fn get_or_parse<T: std::str::FromStr>(pool: &PgPool, key: &str, default: T) -> T {
    match get(pool, key).await {
        Ok(Some(entry)) => entry.value.parse().unwrap_or(default),
        _ => default,
    }
}
