//! Subscription lifecycle (C10) and the daily renewal scan (C12).
//! Grounded on
//! `original_source/backend/app/services/subscription_service.py`; the
//! per-item "log and keep going" sweep shape is the teacher's
//! `subscriptions_universal::scheduler::Scheduler::renew_due`.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use uuid::Uuid;

use crate::error::{GatewayError, GatewayResult};
use crate::gateway_log;
use crate::model::{BillingCycle, Payment, PaymentMethod, Plan, Subscription, SubscriptionStatus};
use crate::payment::{
    AuthorizationRequest, ChargeRequest, InvoiceRequest, PaymentProvider, WebhookEvent,
    WebhookEventType,
};
use crate::quota::QuotaService;
use crate::store::{payments, plans, subscriptions, Store};

const DEFAULT_CURRENCY: &str = "USD";
const REMINDER_DAYS: i64 = 3;
const GRACE_PERIOD_DAYS: i64 = 5;

pub struct StartSubscriptionResult {
    pub status: &'static str,
    pub plan: Plan,
    pub payment_url: Option<String>,
    pub authorization_url: Option<String>,
}

pub struct SubscriptionController {
    store: Store,
    quota: QuotaService,
    provider: Arc<dyn PaymentProvider>,
    callback_base_url: String,
}

impl SubscriptionController {
    pub fn new(
        store: Store,
        quota: QuotaService,
        provider: Arc<dyn PaymentProvider>,
        callback_base_url: String,
    ) -> Self {
        Self {
            store,
            quota,
            provider,
            callback_base_url,
        }
    }

    fn period_span(&self, cycle: BillingCycle) -> ChronoDuration {
        match cycle {
            BillingCycle::Monthly => ChronoDuration::days(30),
            BillingCycle::Yearly => ChronoDuration::days(365),
        }
    }

    fn price_for(&self, plan: &Plan, cycle: BillingCycle) -> f64 {
        match cycle {
            BillingCycle::Monthly => plan.price_monthly,
            BillingCycle::Yearly => plan.price_yearly,
        }
    }

    /// `start_subscription`: creates a PENDING subscription + PENDING
    /// payment, then drives either the INVOICE or AUTHORIZED provider
    /// flow depending on what the configured provider supports.
    pub async fn start_subscription(
        &self,
        user_id: Uuid,
        plan_id: Uuid,
        billing_cycle: BillingCycle,
    ) -> GatewayResult<StartSubscriptionResult> {
        let plan = plans::get(&self.store.pool, plan_id)
            .await
            .map_err(GatewayError::Internal)?
            .ok_or(GatewayError::NotFound("plan"))?;
        let amount = self.price_for(&plan, billing_cycle);
        let now = Utc::now();
        let period_end = now + self.period_span(billing_cycle);

        let payment_method = if self.provider.supports_authorized_payments() {
            PaymentMethod::Authorized
        } else {
            PaymentMethod::Invoice
        };

        let mut tx = self.store.pool.begin().await.map_err(anyhow::Error::from)?;
        let subscription = subscriptions::insert(
            &mut tx,
            user_id,
            plan_id,
            billing_cycle,
            SubscriptionStatus::Pending,
            payment_method,
            now,
            period_end,
        )
        .await
        .map_err(GatewayError::Internal)?;
        let payment = payments::insert_pending(
            &mut tx,
            subscription.id,
            amount,
            DEFAULT_CURRENCY,
            self.provider.provider_name(),
            now,
            period_end,
        )
        .await
        .map_err(GatewayError::Internal)?;
        tx.commit().await.map_err(anyhow::Error::from)?;

        match payment_method {
            PaymentMethod::Invoice => {
                let request = InvoiceRequest {
                    amount,
                    currency: DEFAULT_CURRENCY.to_string(),
                    description: format!("{} subscription ({billing_cycle})", plan.name),
                    remote_id: payment.id.to_string(),
                    webhook_url: Some(format!(
                        "{}/api/v1/subscriptions/webhook/{}",
                        self.callback_base_url,
                        self.provider.provider_name()
                    )),
                    success_url: None,
                    error_url: None,
                    metadata: HashMap::new(),
                };
                let result = self
                    .provider
                    .create_invoice(&request)
                    .await
                    .map_err(|err| GatewayError::Provider(err.to_string()))?;
                if !result.success {
                    return Err(GatewayError::Provider(
                        result.error.unwrap_or_else(|| "invoice creation failed".to_string()),
                    ));
                }
                if let (Some(invoice_id), Some(invoice_url)) =
                    (&result.invoice_id, &result.payment_url)
                {
                    let mut tx = self.store.pool.begin().await.map_err(anyhow::Error::from)?;
                    payments::set_invoice(&mut tx, payment.id, invoice_id, invoice_url)
                        .await
                        .map_err(GatewayError::Internal)?;
                    tx.commit().await.map_err(anyhow::Error::from)?;
                }
                Ok(StartSubscriptionResult {
                    status: "pending",
                    plan,
                    payment_url: result.payment_url,
                    authorization_url: None,
                })
            }
            PaymentMethod::Authorized => {
                let request = AuthorizationRequest {
                    remote_id: user_id.to_string(),
                    callback_url: format!(
                        "{}/api/v1/subscriptions/webhook/{}",
                        self.callback_base_url,
                        self.provider.provider_name()
                    ),
                    success_url: format!("{}/plans/upgrade/success", self.callback_base_url),
                    error_url: format!("{}/plans/upgrade/error", self.callback_base_url),
                    metadata: HashMap::new(),
                };
                let result = self
                    .provider
                    .get_authorization_url(&request)
                    .await
                    .map_err(|err| GatewayError::Provider(err.to_string()))?;
                if !result.success {
                    return Err(GatewayError::Provider(
                        result.error.unwrap_or_else(|| "authorization failed".to_string()),
                    ));
                }
                Ok(StartSubscriptionResult {
                    status: "pending",
                    plan,
                    payment_url: None,
                    authorization_url: result.authorization_url,
                })
            }
        }
    }

    /// Verifies and parses a raw provider callback body, then dispatches it.
    /// The signature/parsing scheme is provider-specific (`PaymentProvider`
    /// capability methods), unlike the queue's own HMAC callbacks.
    pub async fn handle_provider_webhook(
        &self,
        raw_body: &[u8],
        headers: &HashMap<String, String>,
        signature: &str,
    ) -> GatewayResult<()> {
        if !self.provider.verify_webhook_signature(raw_body, signature) {
            return Err(GatewayError::Authn);
        }
        let payload: serde_json::Value = serde_json::from_slice(raw_body)
            .map_err(|err| GatewayError::Validation(format!("invalid webhook body: {err}")))?;
        let event = self
            .provider
            .parse_webhook(&payload, headers)
            .ok_or_else(|| GatewayError::Validation("unrecognized webhook payload".to_string()))?;
        self.handle_webhook_event(event).await
    }

    /// Dispatches a verified webhook event from the configured provider.
    pub async fn handle_webhook_event(&self, event: WebhookEvent) -> GatewayResult<()> {
        match event.event_type {
            WebhookEventType::PaymentCompleted => self.on_payment_completed(&event).await,
            WebhookEventType::AuthorizationCompleted => self.on_authorization_completed(&event).await,
            WebhookEventType::PaymentFailed => self.on_payment_failed(&event).await,
        }
    }

    async fn on_payment_completed(&self, event: &WebhookEvent) -> GatewayResult<()> {
        let payment_id: Uuid = event
            .remote_id
            .parse()
            .map_err(|_| GatewayError::Validation("remote_id is not a payment id".to_string()))?;
        let payment = payments::get(&self.store.pool, payment_id)
            .await
            .map_err(GatewayError::Internal)?
            .ok_or(GatewayError::NotFound("payment"))?;
        self.activate_for_payment(&payment, event.transaction_id.as_deref())
            .await
    }

    async fn on_authorization_completed(&self, event: &WebhookEvent) -> GatewayResult<()> {
        let user_id: Uuid = event
            .remote_id
            .parse()
            .map_err(|_| GatewayError::Validation("remote_id is not a user id".to_string()))?;
        let subscription = subscriptions::get_for_user(&self.store.pool, user_id)
            .await
            .map_err(GatewayError::Internal)?
            .ok_or(GatewayError::NotFound("subscription"))?;
        let Some(user_uuid) = &event.user_uuid else {
            return Err(GatewayError::Validation(
                "authorization_completed event missing user_uuid".to_string(),
            ));
        };

        let mut tx = self.store.pool.begin().await.map_err(anyhow::Error::from)?;
        subscriptions::set_provider_user_uuid(&mut tx, subscription.id, user_uuid)
            .await
            .map_err(GatewayError::Internal)?;
        tx.commit().await.map_err(anyhow::Error::from)?;

        let plan = plans::get(&self.store.pool, subscription.plan_id)
            .await
            .map_err(GatewayError::Internal)?
            .ok_or(GatewayError::NotFound("plan"))?;

        // Reuse the PENDING payment start_subscription already created
        // instead of minting a second one: a dangling PENDING payment
        // permanently trips list_due_for_renewal's NOT EXISTS guard and the
        // subscription would never come up for renewal again.
        let payment = payments::get_pending_for_subscription(&self.store.pool, subscription.id)
            .await
            .map_err(GatewayError::Internal)?
            .ok_or(GatewayError::NotFound("payment"))?;

        let charge = ChargeRequest {
            user_uuid: user_uuid.clone(),
            amount: payment.amount,
            currency: payment.currency.clone(),
            description: format!("{} subscription renewal", plan.name),
            remote_id: payment.id.to_string(),
            metadata: HashMap::new(),
        };
        let result = self
            .provider
            .charge_authorized_user(&charge)
            .await
            .map_err(|err| GatewayError::Provider(err.to_string()))?;

        if result.success {
            self.activate_for_payment(&payment, result.transaction_id.as_deref())
                .await
        } else {
            let mut tx = self.store.pool.begin().await.map_err(anyhow::Error::from)?;
            payments::mark_failed(&mut tx, payment.id).await.map_err(GatewayError::Internal)?;
            subscriptions::set_status(&mut tx, subscription.id, SubscriptionStatus::Expired)
                .await
                .map_err(GatewayError::Internal)?;
            tx.commit().await.map_err(anyhow::Error::from)?;
            Ok(())
        }
    }

    async fn on_payment_failed(&self, event: &WebhookEvent) -> GatewayResult<()> {
        if let Ok(payment_id) = event.remote_id.parse::<Uuid>() {
            let mut tx = self.store.pool.begin().await.map_err(anyhow::Error::from)?;
            payments::mark_failed(&mut tx, payment_id).await.map_err(GatewayError::Internal)?;
            tx.commit().await.map_err(anyhow::Error::from)?;
        }
        Ok(())
    }

    async fn activate_for_payment(
        &self,
        payment: &Payment,
        transaction_id: Option<&str>,
    ) -> GatewayResult<()> {
        let subscription = subscriptions::get(&self.store.pool, payment.subscription_id)
            .await
            .map_err(GatewayError::Internal)?
            .ok_or(GatewayError::NotFound("subscription"))?;
        let now = Utc::now();
        let period_end = now + self.period_span(subscription.billing_cycle);

        let mut tx = self.store.pool.begin().await.map_err(anyhow::Error::from)?;
        payments::mark_completed(&mut tx, payment.id, transaction_id.unwrap_or_default(), now)
            .await
            .map_err(GatewayError::Internal)?;
        subscriptions::activate_period(&mut tx, subscription.id, SubscriptionStatus::Active, now, period_end)
            .await
            .map_err(GatewayError::Internal)?;
        tx.commit().await.map_err(anyhow::Error::from)?;

        self.quota.set_plan(subscription.user_id, subscription.plan_id).await?;
        Ok(())
    }

    pub async fn cancel_subscription(&self, user_id: Uuid, immediate: bool) -> GatewayResult<()> {
        let subscription = subscriptions::get_for_user(&self.store.pool, user_id)
            .await
            .map_err(GatewayError::Internal)?
            .ok_or(GatewayError::NotFound("subscription"))?;

        if immediate {
            let mut tx = self.store.pool.begin().await.map_err(anyhow::Error::from)?;
            subscriptions::cancel_immediately(&mut tx, subscription.id, Utc::now())
                .await
                .map_err(GatewayError::Internal)?;
            tx.commit().await.map_err(anyhow::Error::from)?;
            self.quota.downgrade_to_free(user_id).await?;
        } else {
            subscriptions::set_cancel_at_period_end(&self.store.pool, subscription.id, true)
                .await
                .map_err(GatewayError::Internal)?;
        }
        Ok(())
    }

    /// Daily renewal scan (C12): charges subscriptions approaching their
    /// period end, then expires any that have sat PAST_DUE beyond the
    /// grace period. Per-item failures are logged, never abort the sweep.
    pub async fn run_renewal_scan(&self) -> anyhow::Result<()> {
        let now = Utc::now();
        let due = subscriptions::list_due_for_renewal(&self.store.pool, now + ChronoDuration::days(REMINDER_DAYS))
            .await?;
        for subscription in due {
            if let Err(err) = self.renew_one(&subscription).await {
                gateway_log::error(
                    "subscription",
                    format!(
                        "renewal failed subscription={} user={} err={err}",
                        subscription.id, subscription.user_id
                    ),
                );
            }
        }

        let past_due = subscriptions::list_past_due_beyond_grace(
            &self.store.pool,
            now - ChronoDuration::days(GRACE_PERIOD_DAYS),
        )
        .await?;
        for subscription in past_due {
            if let Err(err) = self.expire_one(&subscription).await {
                gateway_log::error(
                    "subscription",
                    format!(
                        "expiry failed subscription={} user={} err={err}",
                        subscription.id, subscription.user_id
                    ),
                );
            }
        }
        Ok(())
    }

    async fn renew_one(&self, subscription: &Subscription) -> GatewayResult<()> {
        let plan = plans::get(&self.store.pool, subscription.plan_id)
            .await
            .map_err(GatewayError::Internal)?
            .ok_or(GatewayError::NotFound("plan"))?;
        let amount = self.price_for(&plan, subscription.billing_cycle);
        let Some(user_uuid) = &subscription.provider_user_uuid else {
            return Err(GatewayError::Validation("subscription has no provider_user_uuid".to_string()));
        };

        let now = Utc::now();
        let mut tx = self.store.pool.begin().await.map_err(anyhow::Error::from)?;
        let payment = payments::insert_pending(
            &mut tx,
            subscription.id,
            amount,
            DEFAULT_CURRENCY,
            self.provider.provider_name(),
            now,
            now + self.period_span(subscription.billing_cycle),
        )
        .await
        .map_err(GatewayError::Internal)?;
        tx.commit().await.map_err(anyhow::Error::from)?;

        let charge = ChargeRequest {
            user_uuid: user_uuid.clone(),
            amount,
            currency: DEFAULT_CURRENCY.to_string(),
            description: format!("{} subscription renewal", plan.name),
            remote_id: payment.id.to_string(),
            metadata: HashMap::new(),
        };
        let result = self
            .provider
            .charge_authorized_user(&charge)
            .await
            .map_err(|err| GatewayError::Provider(err.to_string()))?;

        if result.success {
            self.activate_for_payment(&payment, result.transaction_id.as_deref()).await
        } else {
            let mut tx = self.store.pool.begin().await.map_err(anyhow::Error::from)?;
            payments::mark_failed(&mut tx, payment.id).await.map_err(GatewayError::Internal)?;
            subscriptions::set_status(&mut tx, subscription.id, SubscriptionStatus::PastDue)
                .await
                .map_err(GatewayError::Internal)?;
            tx.commit().await.map_err(anyhow::Error::from)?;
            Ok(())
        }
    }

    async fn expire_one(&self, subscription: &Subscription) -> GatewayResult<()> {
        let mut tx = self.store.pool.begin().await.map_err(anyhow::Error::from)?;
        subscriptions::set_status(&mut tx, subscription.id, SubscriptionStatus::Expired)
            .await
            .map_err(GatewayError::Internal)?;
        tx.commit().await.map_err(anyhow::Error::from)?;
        self.quota.downgrade_to_free(subscription.user_id).await
    }
}

/// Background task entry point: ticks the renewal scan once a day,
/// matching spec.md §4.9's `0 8 * * *` cron (local interval timer rather
/// than depending on the external queue's cron for the in-process path;
/// the queue-driven `/subscriptions/jobs/check-renewals` route invokes
/// the same `run_renewal_scan` on callback).
pub async fn run_daily_renewal_scan(controller: Arc<SubscriptionController>) {
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(24 * 60 * 60));
    loop {
        interval.tick().await;
        if let Err(err) = controller.run_renewal_scan().await {
            gateway_log::error("subscription", format!("renewal scan failed: {err}"));
        }
    }
}
