use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::model::Device;

pub async fn get(pool: &PgPool, device_id: Uuid) -> anyhow::Result<Option<Device>> {
    let row = sqlx::query_as::<_, Device>(
        "SELECT id, user_id, name, phone_number, api_key, fcm_token, created_at
         FROM devices WHERE id = $1",
    )
    .bind(device_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn get_by_api_key(pool: &PgPool, api_key: &str) -> anyhow::Result<Option<Device>> {
    let row = sqlx::query_as::<_, Device>(
        "SELECT id, user_id, name, phone_number, api_key, fcm_token, created_at
         FROM devices WHERE api_key = $1",
    )
    .bind(api_key)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn list_for_user(pool: &PgPool, user_id: Uuid) -> anyhow::Result<Vec<Device>> {
    let rows = sqlx::query_as::<_, Device>(
        "SELECT id, user_id, name, phone_number, api_key, fcm_token, created_at
         FROM devices WHERE user_id = $1 ORDER BY created_at",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn insert(
    pool: &PgPool,
    user_id: Uuid,
    name: &str,
    phone_number: &str,
    api_key: &str,
    now: DateTime<Utc>,
) -> anyhow::Result<Device> {
    let row = sqlx::query_as::<_, Device>(
        "INSERT INTO devices (id, user_id, name, phone_number, api_key, fcm_token, created_at)
         VALUES ($1, $2, $3, $4, $5, NULL, $6)
         RETURNING id, user_id, name, phone_number, api_key, fcm_token, created_at",
    )
    .bind(Uuid::new_v4())
    .bind(user_id)
    .bind(name)
    .bind(phone_number)
    .bind(api_key)
    .bind(now)
    .fetch_one(pool)
    .await?;
    Ok(row)
}

pub async fn update(
    pool: &PgPool,
    device_id: Uuid,
    name: &str,
    phone_number: &str,
) -> anyhow::Result<Option<Device>> {
    let row = sqlx::query_as::<_, Device>(
        "UPDATE devices SET name = $2, phone_number = $3 WHERE id = $1
         RETURNING id, user_id, name, phone_number, api_key, fcm_token, created_at",
    )
    .bind(device_id)
    .bind(name)
    .bind(phone_number)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn update_fcm_token(
    pool: &PgPool,
    device_id: Uuid,
    fcm_token: &str,
) -> anyhow::Result<()> {
    sqlx::query("UPDATE devices SET fcm_token = $2 WHERE id = $1")
        .bind(device_id)
        .bind(fcm_token)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn update_registration(
    pool: &PgPool,
    device_id: Uuid,
    device_name: Option<&str>,
    phone_number: Option<&str>,
) -> anyhow::Result<()> {
    sqlx::query(
        "UPDATE devices SET
            name = COALESCE($2, name),
            phone_number = COALESCE($3, phone_number)
         WHERE id = $1",
    )
    .bind(device_id)
    .bind(device_name)
    .bind(phone_number)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn delete(pool: &PgPool, device_id: Uuid) -> anyhow::Result<bool> {
    let result = sqlx::query("DELETE FROM devices WHERE id = $1")
        .bind(device_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}
