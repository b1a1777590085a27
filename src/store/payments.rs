use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::model::{Payment, PaymentStatus};

#[allow(clippy::too_many_arguments)]
pub async fn insert_pending(
    tx: &mut Transaction<'_, Postgres>,
    subscription_id: Uuid,
    amount: f64,
    currency: &str,
    provider_name: &str,
    period_start: DateTime<Utc>,
    period_end: DateTime<Utc>,
) -> anyhow::Result<Payment> {
    let row = sqlx::query_as::<_, Payment>(
        "INSERT INTO payments
            (id, subscription_id, amount, currency, status, provider_name,
             provider_transaction_id, provider_invoice_id, provider_invoice_url,
             period_start, period_end, paid_at)
         VALUES ($1, $2, $3, $4, 'PENDING', $5, NULL, NULL, NULL, $6, $7, NULL)
         RETURNING id, subscription_id, amount, currency, status, provider_name,
                   provider_transaction_id, provider_invoice_id, provider_invoice_url,
                   period_start, period_end, paid_at",
    )
    .bind(Uuid::new_v4())
    .bind(subscription_id)
    .bind(amount)
    .bind(currency)
    .bind(provider_name)
    .bind(period_start)
    .bind(period_end)
    .fetch_one(&mut **tx)
    .await?;
    Ok(row)
}

pub async fn get(pool: &PgPool, payment_id: Uuid) -> anyhow::Result<Option<Payment>> {
    let row = sqlx::query_as::<_, Payment>(
        "SELECT id, subscription_id, amount, currency, status, provider_name,
                provider_transaction_id, provider_invoice_id, provider_invoice_url,
                period_start, period_end, paid_at
         FROM payments WHERE id = $1",
    )
    .bind(payment_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn get_by_transaction_id(
    pool: &PgPool,
    provider_transaction_id: &str,
) -> anyhow::Result<Option<Payment>> {
    let row = sqlx::query_as::<_, Payment>(
        "SELECT id, subscription_id, amount, currency, status, provider_name,
                provider_transaction_id, provider_invoice_id, provider_invoice_url,
                period_start, period_end, paid_at
         FROM payments WHERE provider_transaction_id = $1",
    )
    .bind(provider_transaction_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// The single outstanding PENDING payment for a subscription, if any —
/// looked up instead of minting a new payment when an authorization
/// callback arrives for the payment `start_subscription` already created.
pub async fn get_pending_for_subscription(
    pool: &PgPool,
    subscription_id: Uuid,
) -> anyhow::Result<Option<Payment>> {
    let row = sqlx::query_as::<_, Payment>(
        "SELECT id, subscription_id, amount, currency, status, provider_name,
                provider_transaction_id, provider_invoice_id, provider_invoice_url,
                period_start, period_end, paid_at
         FROM payments
         WHERE subscription_id = $1 AND status = 'PENDING'
         ORDER BY period_end DESC
         LIMIT 1",
    )
    .bind(subscription_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn set_invoice(
    tx: &mut Transaction<'_, Postgres>,
    payment_id: Uuid,
    provider_invoice_id: &str,
    provider_invoice_url: &str,
) -> anyhow::Result<()> {
    sqlx::query(
        "UPDATE payments SET provider_invoice_id = $2, provider_invoice_url = $3 WHERE id = $1",
    )
    .bind(payment_id)
    .bind(provider_invoice_id)
    .bind(provider_invoice_url)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

pub async fn mark_completed(
    tx: &mut Transaction<'_, Postgres>,
    payment_id: Uuid,
    provider_transaction_id: &str,
    paid_at: DateTime<Utc>,
) -> anyhow::Result<()> {
    sqlx::query(
        "UPDATE payments SET status = 'COMPLETED', provider_transaction_id = $2, paid_at = $3
         WHERE id = $1 AND status != 'COMPLETED'",
    )
    .bind(payment_id)
    .bind(provider_transaction_id)
    .bind(paid_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

pub async fn mark_failed(
    tx: &mut Transaction<'_, Postgres>,
    payment_id: Uuid,
) -> anyhow::Result<()> {
    sqlx::query("UPDATE payments SET status = 'FAILED' WHERE id = $1")
        .bind(payment_id)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

pub async fn status(pool: &PgPool, payment_id: Uuid) -> anyhow::Result<Option<PaymentStatus>> {
    let row: Option<(PaymentStatus,)> =
        sqlx::query_as("SELECT status FROM payments WHERE id = $1")
            .bind(payment_id)
            .fetch_optional(pool)
            .await?;
    Ok(row.map(|(s,)| s))
}
