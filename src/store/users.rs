//! Read-only boundary view over the `users` table. User identity, password
//! hashing, and auth are a Non-goal; this repository only resolves the
//! tenant row the rest of the Store joins against.

use sqlx::PgPool;
use uuid::Uuid;

use crate::model::User;

pub async fn get(pool: &PgPool, user_id: Uuid) -> anyhow::Result<Option<User>> {
    let row = sqlx::query_as::<_, User>(
        "SELECT id, email, active, superuser, email_verified, created_at
         FROM users WHERE id = $1",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}
