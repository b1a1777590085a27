//! Data model: the aggregates the Store persists and the HTTP surface exchanges.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! wire_enum {
    ($name:ident { $($variant:ident => $wire:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
        #[sqlx(type_name = "text", rename_all = "snake_case")]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $wire),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = anyhow::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($wire => Ok(Self::$variant),)+
                    other => anyhow::bail!("unrecognized {} value: {other}", stringify!($name)),
                }
            }
        }
    };
}

wire_enum!(BillingCycle { Monthly => "MONTHLY", Yearly => "YEARLY" });

wire_enum!(SubscriptionStatus {
    Pending => "PENDING",
    Active => "ACTIVE",
    PastDue => "PAST_DUE",
    Canceled => "CANCELED",
    Expired => "EXPIRED",
});

wire_enum!(PaymentMethod { Invoice => "INVOICE", Authorized => "AUTHORIZED" });

wire_enum!(PaymentStatus {
    Pending => "PENDING",
    Completed => "COMPLETED",
    Failed => "FAILED",
    Refunded => "REFUNDED",
});

wire_enum!(MessageStatus {
    Queued => "queued",
    Assigned => "assigned",
    Sending => "sending",
    Sent => "sent",
    Delivered => "delivered",
    Failed => "failed",
    Received => "received",
});

wire_enum!(MessageType { Outgoing => "outgoing", Incoming => "incoming" });

wire_enum!(DeviceType { Android => "android", Modem => "modem" });

/// External identity, referenced only as a tenant owner. The core never
/// authenticates or mutates this — it is populated by the auth boundary.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub active: bool,
    pub superuser: bool,
    pub email_verified: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Plan {
    pub id: Uuid,
    pub name: String,
    pub max_sms_per_month: i64,
    pub max_devices: i64,
    pub price_monthly: f64,
    pub price_yearly: f64,
    pub public: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Subscription {
    pub id: Uuid,
    pub user_id: Uuid,
    pub plan_id: Uuid,
    pub billing_cycle: BillingCycle,
    pub status: SubscriptionStatus,
    pub payment_method: PaymentMethod,
    pub cancel_at_period_end: bool,
    pub current_period_start: DateTime<Utc>,
    pub current_period_end: DateTime<Utc>,
    pub provider_user_uuid: Option<String>,
    pub canceled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Payment {
    pub id: Uuid,
    pub subscription_id: Uuid,
    pub amount: f64,
    pub currency: String,
    pub status: PaymentStatus,
    pub provider_name: String,
    pub provider_transaction_id: Option<String>,
    pub provider_invoice_id: Option<String>,
    pub provider_invoice_url: Option<String>,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Quota {
    pub id: Uuid,
    pub user_id: Uuid,
    pub plan_id: Uuid,
    pub sms_sent_this_month: i64,
    pub devices_registered: i64,
    pub last_reset_date: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Device {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub phone_number: String,
    pub api_key: String,
    pub fcm_token: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Message {
    pub id: Uuid,
    pub user_id: Uuid,
    pub device_id: Option<Uuid>,
    pub batch_id: Option<Uuid>,
    pub to: String,
    pub from: Option<String>,
    pub body: String,
    pub status: MessageStatus,
    pub message_type: MessageType,
    pub error_message: Option<String>,
    pub webhook_sent: bool,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct WebhookConfig {
    pub id: Uuid,
    pub user_id: Uuid,
    pub url: String,
    pub secret_key: Option<String>,
    pub events: Vec<String>,
    pub active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ApiKey {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub key: String,
    pub active: bool,
    pub last_used_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SystemConfigEntry {
    pub key: String,
    pub value: String,
    pub description: Option<String>,
}

/// Body limits from spec.md §8 boundaries.
pub const MAX_RECIPIENTS: usize = 1000;
pub const MAX_BODY_LEN: usize = 1600;

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn message_status_round_trips_through_wire_string() {
        for s in [
            MessageStatus::Queued,
            MessageStatus::Assigned,
            MessageStatus::Sending,
            MessageStatus::Sent,
            MessageStatus::Delivered,
            MessageStatus::Failed,
            MessageStatus::Received,
        ] {
            let parsed = MessageStatus::from_str(s.as_str()).unwrap();
            assert_eq!(parsed, s);
        }
    }

    #[test]
    fn subscription_status_uses_upper_snake_wire_values() {
        assert_eq!(SubscriptionStatus::PastDue.as_str(), "PAST_DUE");
        assert_eq!(
            SubscriptionStatus::from_str("PAST_DUE").unwrap(),
            SubscriptionStatus::PastDue
        );
        assert!(SubscriptionStatus::from_str("past_due").is_err());
    }
}
