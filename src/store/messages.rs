use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::model::{Message, MessageStatus, MessageType};

#[allow(clippy::too_many_arguments)]
pub async fn insert(
    pool: &PgPool,
    user_id: Uuid,
    device_id: Option<Uuid>,
    batch_id: Option<Uuid>,
    to: &str,
    from: Option<&str>,
    body: &str,
    status: MessageStatus,
    message_type: MessageType,
    created_at: DateTime<Utc>,
) -> anyhow::Result<Message> {
    let row = sqlx::query_as::<_, Message>(
        "INSERT INTO messages
            (id, user_id, device_id, batch_id, to_number, from_number, body, status,
             message_type, error_message, webhook_sent, created_at, sent_at, delivered_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, NULL, false, $10, NULL, NULL)
         RETURNING id, user_id, device_id, batch_id, to_number AS to, from_number AS from,
                   body, status, message_type, error_message, webhook_sent,
                   created_at, sent_at, delivered_at",
    )
    .bind(Uuid::new_v4())
    .bind(user_id)
    .bind(device_id)
    .bind(batch_id)
    .bind(to)
    .bind(from)
    .bind(body)
    .bind(status)
    .bind(message_type)
    .bind(created_at)
    .fetch_one(pool)
    .await?;
    Ok(row)
}

pub async fn get(pool: &PgPool, message_id: Uuid) -> anyhow::Result<Option<Message>> {
    let row = sqlx::query_as::<_, Message>(
        "SELECT id, user_id, device_id, batch_id, to_number AS to, from_number AS from,
                body, status, message_type, error_message, webhook_sent,
                created_at, sent_at, delivered_at
         FROM messages WHERE id = $1",
    )
    .bind(message_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn list_for_user(
    pool: &PgPool,
    user_id: Uuid,
    message_type: Option<MessageType>,
    skip: i64,
    limit: i64,
) -> anyhow::Result<Vec<Message>> {
    let rows = sqlx::query_as::<_, Message>(
        "SELECT id, user_id, device_id, batch_id, to_number AS to, from_number AS from,
                body, status, message_type, error_message, webhook_sent,
                created_at, sent_at, delivered_at
         FROM messages
         WHERE user_id = $1 AND ($2::text IS NULL OR message_type = $2)
         ORDER BY created_at DESC
         OFFSET $3 LIMIT $4",
    )
    .bind(user_id)
    .bind(message_type)
    .bind(skip)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// The ping-drain query: that device's outgoing messages still sitting in
/// `assigned`, oldest first, bounded batch — mirrors the original's
/// `_send_pending_messages` statement exactly.
pub async fn list_assigned_outgoing_for_device(
    pool: &PgPool,
    device_id: Uuid,
    limit: i64,
) -> anyhow::Result<Vec<Message>> {
    let rows = sqlx::query_as::<_, Message>(
        "SELECT id, user_id, device_id, batch_id, to_number AS to, from_number AS from,
                body, status, message_type, error_message, webhook_sent,
                created_at, sent_at, delivered_at
         FROM messages
         WHERE device_id = $1 AND status = 'assigned' AND message_type = 'outgoing'
         ORDER BY created_at
         LIMIT $2",
    )
    .bind(device_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn mark_sending(pool: &PgPool, message_id: Uuid) -> anyhow::Result<()> {
    sqlx::query("UPDATE messages SET status = 'sending' WHERE id = $1 AND status = 'assigned'")
        .bind(message_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Idempotent terminal-state transition: a message already in a terminal
/// state (`sent`, `delivered`, `failed`) is never rewritten.
pub async fn apply_report(
    pool: &PgPool,
    message_id: Uuid,
    status: MessageStatus,
    error_message: Option<&str>,
    now: DateTime<Utc>,
) -> anyhow::Result<Option<Message>> {
    let (sent_at, delivered_at) = match status {
        MessageStatus::Sent => (Some(now), None),
        MessageStatus::Delivered => (None, Some(now)),
        _ => (None, None),
    };
    let row = sqlx::query_as::<_, Message>(
        "UPDATE messages SET
            status = $2,
            error_message = COALESCE($3, error_message),
            sent_at = COALESCE(sent_at, $4),
            delivered_at = COALESCE(delivered_at, $5)
         WHERE id = $1
           AND status NOT IN ('sent', 'delivered', 'failed')
         RETURNING id, user_id, device_id, batch_id, to_number AS to, from_number AS from,
                   body, status, message_type, error_message, webhook_sent,
                   created_at, sent_at, delivered_at",
    )
    .bind(message_id)
    .bind(status)
    .bind(error_message)
    .bind(sent_at)
    .bind(delivered_at)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn mark_webhook_sent(pool: &PgPool, message_id: Uuid) -> anyhow::Result<()> {
    sqlx::query("UPDATE messages SET webhook_sent = true WHERE id = $1")
        .bind(message_id)
        .execute(pool)
        .await?;
    Ok(())
}
