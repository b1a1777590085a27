use sqlx::PgPool;
use uuid::Uuid;

use crate::model::Plan;

pub async fn get(pool: &PgPool, plan_id: Uuid) -> anyhow::Result<Option<Plan>> {
    let row = sqlx::query_as::<_, Plan>(
        "SELECT id, name, max_sms_per_month, max_devices, price_monthly, price_yearly, public
         FROM plans WHERE id = $1",
    )
    .bind(plan_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn get_by_name(pool: &PgPool, name: &str) -> anyhow::Result<Option<Plan>> {
    let row = sqlx::query_as::<_, Plan>(
        "SELECT id, name, max_sms_per_month, max_devices, price_monthly, price_yearly, public
         FROM plans WHERE name = $1",
    )
    .bind(name)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Looks up the Free plan by name, matching the original's
/// `ILIKE '%free%'` downgrade lookup.
pub async fn get_free_plan(pool: &PgPool) -> anyhow::Result<Option<Plan>> {
    let row = sqlx::query_as::<_, Plan>(
        "SELECT id, name, max_sms_per_month, max_devices, price_monthly, price_yearly, public
         FROM plans WHERE name ILIKE '%free%' ORDER BY price_monthly ASC LIMIT 1",
    )
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn list_public(pool: &PgPool) -> anyhow::Result<Vec<Plan>> {
    let rows = sqlx::query_as::<_, Plan>(
        "SELECT id, name, max_sms_per_month, max_devices, price_monthly, price_yearly, public
         FROM plans WHERE public = true ORDER BY price_monthly ASC",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
