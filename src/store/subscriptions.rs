use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::model::{BillingCycle, PaymentMethod, Subscription, SubscriptionStatus};

pub async fn get_for_user(pool: &PgPool, user_id: Uuid) -> anyhow::Result<Option<Subscription>> {
    let row = sqlx::query_as::<_, Subscription>(
        "SELECT id, user_id, plan_id, billing_cycle, status, payment_method,
                cancel_at_period_end, current_period_start, current_period_end,
                provider_user_uuid, canceled_at
         FROM subscriptions WHERE user_id = $1",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn get(pool: &PgPool, subscription_id: Uuid) -> anyhow::Result<Option<Subscription>> {
    let row = sqlx::query_as::<_, Subscription>(
        "SELECT id, user_id, plan_id, billing_cycle, status, payment_method,
                cancel_at_period_end, current_period_start, current_period_end,
                provider_user_uuid, canceled_at
         FROM subscriptions WHERE id = $1",
    )
    .bind(subscription_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

#[allow(clippy::too_many_arguments)]
pub async fn insert(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    plan_id: Uuid,
    billing_cycle: BillingCycle,
    status: SubscriptionStatus,
    payment_method: PaymentMethod,
    current_period_start: DateTime<Utc>,
    current_period_end: DateTime<Utc>,
) -> anyhow::Result<Subscription> {
    let row = sqlx::query_as::<_, Subscription>(
        "INSERT INTO subscriptions
            (id, user_id, plan_id, billing_cycle, status, payment_method,
             cancel_at_period_end, current_period_start, current_period_end,
             provider_user_uuid, canceled_at)
         VALUES ($1, $2, $3, $4, $5, $6, false, $7, $8, NULL, NULL)
         RETURNING id, user_id, plan_id, billing_cycle, status, payment_method,
                   cancel_at_period_end, current_period_start, current_period_end,
                   provider_user_uuid, canceled_at",
    )
    .bind(Uuid::new_v4())
    .bind(user_id)
    .bind(plan_id)
    .bind(billing_cycle)
    .bind(status)
    .bind(payment_method)
    .bind(current_period_start)
    .bind(current_period_end)
    .fetch_one(&mut **tx)
    .await?;
    Ok(row)
}

pub async fn set_status(
    tx: &mut Transaction<'_, Postgres>,
    subscription_id: Uuid,
    status: SubscriptionStatus,
) -> anyhow::Result<()> {
    sqlx::query("UPDATE subscriptions SET status = $2 WHERE id = $1")
        .bind(subscription_id)
        .bind(status)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

pub async fn activate_period(
    tx: &mut Transaction<'_, Postgres>,
    subscription_id: Uuid,
    status: SubscriptionStatus,
    period_start: DateTime<Utc>,
    period_end: DateTime<Utc>,
) -> anyhow::Result<()> {
    sqlx::query(
        "UPDATE subscriptions SET status = $2, current_period_start = $3, current_period_end = $4
         WHERE id = $1",
    )
    .bind(subscription_id)
    .bind(status)
    .bind(period_start)
    .bind(period_end)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

pub async fn set_provider_user_uuid(
    tx: &mut Transaction<'_, Postgres>,
    subscription_id: Uuid,
    provider_user_uuid: &str,
) -> anyhow::Result<()> {
    sqlx::query("UPDATE subscriptions SET provider_user_uuid = $2 WHERE id = $1")
        .bind(subscription_id)
        .bind(provider_user_uuid)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

pub async fn set_cancel_at_period_end(
    pool: &PgPool,
    subscription_id: Uuid,
    cancel_at_period_end: bool,
) -> anyhow::Result<()> {
    sqlx::query("UPDATE subscriptions SET cancel_at_period_end = $2 WHERE id = $1")
        .bind(subscription_id)
        .bind(cancel_at_period_end)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn cancel_immediately(
    tx: &mut Transaction<'_, Postgres>,
    subscription_id: Uuid,
    canceled_at: DateTime<Utc>,
) -> anyhow::Result<()> {
    sqlx::query(
        "UPDATE subscriptions SET status = 'CANCELED', canceled_at = $2 WHERE id = $1",
    )
    .bind(subscription_id)
    .bind(canceled_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// ACTIVE subscriptions approaching renewal: `cancel_at_period_end = false`,
/// `provider_user_uuid IS NOT NULL`, `current_period_end <= now + reminder`,
/// with no PENDING Payment outstanding.
pub async fn list_due_for_renewal(
    pool: &PgPool,
    cutoff: DateTime<Utc>,
) -> anyhow::Result<Vec<Subscription>> {
    let rows = sqlx::query_as::<_, Subscription>(
        "SELECT s.id, s.user_id, s.plan_id, s.billing_cycle, s.status, s.payment_method,
                s.cancel_at_period_end, s.current_period_start, s.current_period_end,
                s.provider_user_uuid, s.canceled_at
         FROM subscriptions s
         WHERE s.status = 'ACTIVE'
           AND s.cancel_at_period_end = false
           AND s.provider_user_uuid IS NOT NULL
           AND s.current_period_end <= $1
           AND NOT EXISTS (
               SELECT 1 FROM payments p
               WHERE p.subscription_id = s.id AND p.status = 'PENDING'
           )",
    )
    .bind(cutoff)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// PAST_DUE subscriptions whose grace period has elapsed.
pub async fn list_past_due_beyond_grace(
    pool: &PgPool,
    cutoff: DateTime<Utc>,
) -> anyhow::Result<Vec<Subscription>> {
    let rows = sqlx::query_as::<_, Subscription>(
        "SELECT id, user_id, plan_id, billing_cycle, status, payment_method,
                cancel_at_period_end, current_period_start, current_period_end,
                provider_user_uuid, canceled_at
         FROM subscriptions
         WHERE status = 'PAST_DUE' AND current_period_end < $1",
    )
    .bind(cutoff)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
