//! Atomic check-and-reserve of SMS and device counters against plan limits.
//! Grounded on `original_source/backend/app/services/quota_service.py`,
//! reworked around explicit transactions and row-level locking instead of
//! an ORM-attached session.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{GatewayError, GatewayResult, QuotaExceededDetail};
use crate::model::{Plan, Quota};
use crate::store::{plans, quotas, system_config};

const DEFAULT_PLAN_NAME: &str = "Free";
const DEFAULT_RESET_DAY: u32 = 1;
const UPGRADE_URL: &str = "/api/v1/plans/list";

#[derive(Debug, Clone, serde::Serialize)]
pub struct QuotaView {
    pub plan_name: String,
    pub used_sms: i64,
    pub limit_sms: i64,
    pub used_devices: i64,
    pub limit_devices: i64,
    pub next_reset_date: Option<String>,
}

#[derive(Clone)]
pub struct QuotaService {
    pool: PgPool,
}

impl QuotaService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn reset_day(&self) -> u32 {
        system_config::get_or_parse(&self.pool, "quota_reset_day", DEFAULT_RESET_DAY).await
    }

    /// Fetches the user's quota row, creating a default Free-plan quota if
    /// one doesn't exist yet. Must run inside `tx` since callers hold the
    /// row lock across the rest of their operation.
    async fn get_or_create(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        user_id: Uuid,
    ) -> anyhow::Result<Quota> {
        if let Some(quota) = quotas::get_for_update(tx, user_id).await? {
            return Ok(quota);
        }
        let plan = match plans::get_by_name(&self.pool, DEFAULT_PLAN_NAME).await? {
            Some(plan) => plan,
            None => anyhow::bail!("no default plan named '{DEFAULT_PLAN_NAME}' configured"),
        };
        quotas::insert_default(tx, user_id, plan.id, Utc::now()).await
    }

    async fn plan_for(&self, plan_id: Uuid) -> anyhow::Result<Plan> {
        plans::get(&self.pool, plan_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("quota references missing plan {plan_id}"))
    }

    /// `reserve_sms(user_id, n)`: atomically checks `sms_sent_this_month + n`
    /// against the plan limit and increments on success, all under a
    /// `FOR UPDATE` lock on the Quota row — spec.md §4.2.
    pub async fn reserve_sms(&self, user_id: Uuid, n: i64) -> GatewayResult<()> {
        let mut tx = self.pool.begin().await.map_err(anyhow::Error::from)?;
        let quota = self.get_or_create(&mut tx, user_id).await?;
        let plan = self.plan_for(quota.plan_id).await?;

        if quota.sms_sent_this_month + n > plan.max_sms_per_month {
            let available = (plan.max_sms_per_month - quota.sms_sent_this_month).max(0);
            return Err(GatewayError::QuotaExceeded(QuotaExceededDetail {
                quota_type: "sms_monthly",
                limit: plan.max_sms_per_month,
                used: quota.sms_sent_this_month,
                available,
                reset_date: next_reset_date(quota.last_reset_date, self.reset_day().await),
                upgrade_url: UPGRADE_URL,
            }));
        }

        quotas::adjust_sms(&mut tx, user_id, n).await?;
        tx.commit().await.map_err(anyhow::Error::from)?;
        Ok(())
    }

    /// Symmetric decrement used when a reservation can't be fulfilled
    /// downstream (e.g. a persistence failure after the reserve commits).
    pub async fn release_sms(&self, user_id: Uuid, n: i64) -> GatewayResult<()> {
        let mut tx = self.pool.begin().await.map_err(anyhow::Error::from)?;
        quotas::adjust_sms(&mut tx, user_id, -n).await?;
        tx.commit().await.map_err(anyhow::Error::from)?;
        Ok(())
    }

    pub async fn check_and_register_device(&self, user_id: Uuid) -> GatewayResult<()> {
        let mut tx = self.pool.begin().await.map_err(anyhow::Error::from)?;
        let quota = self.get_or_create(&mut tx, user_id).await?;
        let plan = self.plan_for(quota.plan_id).await?;

        if quota.devices_registered >= plan.max_devices {
            return Err(GatewayError::QuotaExceeded(QuotaExceededDetail {
                quota_type: "devices",
                limit: plan.max_devices,
                used: quota.devices_registered,
                available: 0,
                reset_date: None,
                upgrade_url: UPGRADE_URL,
            }));
        }

        quotas::adjust_devices(&mut tx, user_id, 1).await?;
        tx.commit().await.map_err(anyhow::Error::from)?;
        Ok(())
    }

    pub async fn unregister_device(&self, user_id: Uuid) -> GatewayResult<()> {
        let mut tx = self.pool.begin().await.map_err(anyhow::Error::from)?;
        quotas::adjust_devices(&mut tx, user_id, -1).await?;
        tx.commit().await.map_err(anyhow::Error::from)?;
        Ok(())
    }

    pub async fn get_quota(&self, user_id: Uuid) -> GatewayResult<QuotaView> {
        let mut tx = self.pool.begin().await.map_err(anyhow::Error::from)?;
        let quota = self.get_or_create(&mut tx, user_id).await?;
        tx.commit().await.map_err(anyhow::Error::from)?;
        let plan = self.plan_for(quota.plan_id).await?;

        Ok(QuotaView {
            plan_name: plan.name,
            used_sms: quota.sms_sent_this_month,
            limit_sms: plan.max_sms_per_month,
            used_devices: quota.devices_registered,
            limit_devices: plan.max_devices,
            next_reset_date: next_reset_date(quota.last_reset_date, self.reset_day().await),
        })
    }

    /// Switches the user onto `plan_id` and zeroes the monthly counter —
    /// the subscription controller's activation/upgrade step
    /// (spec.md §4.9: "updates Quota to the new plan, and zeroes the
    /// monthly counter").
    pub async fn set_plan(&self, user_id: Uuid, plan_id: Uuid) -> GatewayResult<()> {
        let mut tx = self.pool.begin().await.map_err(anyhow::Error::from)?;
        self.get_or_create(&mut tx, user_id).await?;
        quotas::update_plan(&mut tx, user_id, plan_id).await?;
        quotas::reset_sms_for_user(&mut tx, user_id, Utc::now()).await?;
        tx.commit().await.map_err(anyhow::Error::from)?;
        Ok(())
    }

    /// Downgrade path for cancellation and expiry — spec.md §4.9.
    pub async fn downgrade_to_free(&self, user_id: Uuid) -> GatewayResult<()> {
        let plan = plans::get_free_plan(&self.pool)
            .await
            .map_err(GatewayError::Internal)?
            .ok_or_else(|| GatewayError::Internal(anyhow::anyhow!("no free plan configured")))?;
        self.set_plan(user_id, plan.id).await
    }

    /// Scheduled sweep: zeroes `sms_sent_this_month` for every quota whose
    /// `last_reset_date.day` matches the configured reset day.
    pub async fn reset_monthly(&self) -> anyhow::Result<usize> {
        let reset_day = self.reset_day().await;
        let due = quotas::list_due_for_reset(&self.pool, reset_day).await?;
        let now = Utc::now();
        let mut reset_count = 0;
        for quota in &due {
            let mut tx = self.pool.begin().await?;
            quotas::reset_sms_for_user(&mut tx, quota.user_id, now).await?;
            tx.commit().await?;
            reset_count += 1;
        }
        Ok(reset_count)
    }
}

/// Next calendar-month occurrence of `reset_day`, clamped to the last day
/// of that month when it doesn't exist — mirrors
/// `quota_service.py::_calculate_reset_date`'s `monthrange` clamp.
fn next_reset_date(last_reset_date: DateTime<Utc>, reset_day: u32) -> Option<String> {
    let (next_year, next_month) = if last_reset_date.month() == 12 {
        (last_reset_date.year() + 1, 1)
    } else {
        (last_reset_date.year(), last_reset_date.month() + 1)
    };

    let last_day_of_month = last_day_of_month(next_year, next_month);
    let day = reset_day.min(last_day_of_month);
    NaiveDate::from_ymd_opt(next_year, next_month, day).map(|d| d.format("%Y-%m-%d").to_string())
}

fn last_day_of_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|d| d.pred_opt())
        .map(|d| d.day())
        .unwrap_or(28)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn reset_date_rolls_into_next_month() {
        let last = Utc.with_ymd_and_hms(2026, 7, 15, 0, 0, 0).unwrap();
        assert_eq!(next_reset_date(last, 5), Some("2026-08-05".to_string()));
    }

    #[test]
    fn reset_date_wraps_december_into_next_year() {
        let last = Utc.with_ymd_and_hms(2026, 12, 10, 0, 0, 0).unwrap();
        assert_eq!(next_reset_date(last, 1), Some("2027-01-01".to_string()));
    }

    #[test]
    fn reset_day_clamps_to_last_day_of_short_month() {
        // February 2026 has 28 days; reset day 31 clamps down.
        let last = Utc.with_ymd_and_hms(2026, 1, 20, 0, 0, 0).unwrap();
        assert_eq!(next_reset_date(last, 31), Some("2026-02-28".to_string()));
    }
}
