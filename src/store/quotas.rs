use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::model::Quota;

/// Locks the user's Quota row for the lifetime of `tx`. Concurrent
/// `reserve_sms`/`release_sms`/`reset_monthly` callers serialize here.
pub async fn get_for_update(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
) -> anyhow::Result<Option<Quota>> {
    let row = sqlx::query_as::<_, Quota>(
        "SELECT id, user_id, plan_id, sms_sent_this_month, devices_registered, last_reset_date
         FROM quotas WHERE user_id = $1 FOR UPDATE",
    )
    .bind(user_id)
    .fetch_optional(&mut **tx)
    .await?;
    Ok(row)
}

pub async fn get(pool: &PgPool, user_id: Uuid) -> anyhow::Result<Option<Quota>> {
    let row = sqlx::query_as::<_, Quota>(
        "SELECT id, user_id, plan_id, sms_sent_this_month, devices_registered, last_reset_date
         FROM quotas WHERE user_id = $1",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn insert_default(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    plan_id: Uuid,
    now: DateTime<Utc>,
) -> anyhow::Result<Quota> {
    let row = sqlx::query_as::<_, Quota>(
        "INSERT INTO quotas (id, user_id, plan_id, sms_sent_this_month, devices_registered, last_reset_date)
         VALUES ($1, $2, $3, 0, 0, $4)
         RETURNING id, user_id, plan_id, sms_sent_this_month, devices_registered, last_reset_date",
    )
    .bind(Uuid::new_v4())
    .bind(user_id)
    .bind(plan_id)
    .bind(now)
    .fetch_one(&mut **tx)
    .await?;
    Ok(row)
}

pub async fn adjust_sms(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    delta: i64,
) -> anyhow::Result<()> {
    sqlx::query("UPDATE quotas SET sms_sent_this_month = sms_sent_this_month + $2 WHERE user_id = $1")
        .bind(user_id)
        .bind(delta)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

pub async fn adjust_devices(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    delta: i64,
) -> anyhow::Result<()> {
    sqlx::query("UPDATE quotas SET devices_registered = devices_registered + $2 WHERE user_id = $1")
        .bind(user_id)
        .bind(delta)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

pub async fn update_plan(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    plan_id: Uuid,
) -> anyhow::Result<()> {
    sqlx::query("UPDATE quotas SET plan_id = $2 WHERE user_id = $1")
        .bind(user_id)
        .bind(plan_id)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

pub async fn reset_sms_for_user(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    sqlx::query(
        "UPDATE quotas SET sms_sent_this_month = 0, last_reset_date = $2 WHERE user_id = $1",
    )
    .bind(user_id)
    .bind(now)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Quotas whose `last_reset_date.day` matches `reset_day` — candidates for
/// the monthly sweep.
pub async fn list_due_for_reset(pool: &PgPool, reset_day: u32) -> anyhow::Result<Vec<Quota>> {
    let rows = sqlx::query_as::<_, Quota>(
        "SELECT id, user_id, plan_id, sms_sent_this_month, devices_registered, last_reset_date
         FROM quotas WHERE EXTRACT(DAY FROM last_reset_date) = $1",
    )
    .bind(reset_day as i32)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
