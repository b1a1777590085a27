//! Persists an inbound SMS reported by an agent and enqueues webhook fan-out
//! for every tenant webhook subscribed to `sms_received`. Grounded on
//! spec.md §4.8's inbound data flow and
//! `original_source/backend/app/services/webhook_service.py`'s event model;
//! delivery itself always goes through the durable queue, never inline, per
//! the REDESIGN FLAGS note on crash-safe fan-out.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::json;
use uuid::Uuid;

use crate::error::GatewayError;
use crate::model::{MessageStatus, MessageType};
use crate::queue_client::QueueClient;
use crate::store::{devices, messages, webhooks};
use crate::{gateway_log, store::Store};

const SMS_RECEIVED_EVENT: &str = "sms_received";
const WEBHOOK_DELIVER_ENDPOINT: &str = "/internal/webhooks/deliver";
const WEBHOOK_DELIVER_RETRIES: u32 = 3;

pub struct InboundFanout {
    store: Store,
    queue: QueueClient,
}

impl InboundFanout {
    pub fn new(store: Store, queue: QueueClient) -> Self {
        Self { store, queue }
    }

    /// Called by the Connection Hub when an agent reports an incoming SMS.
    pub async fn ingest(
        &self,
        device_id: Uuid,
        from: &str,
        body: &str,
        created_at: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let device = devices::get(&self.store.pool, device_id)
            .await?
            .ok_or(GatewayError::NotFound("device"))?;

        let message = messages::insert(
            &self.store.pool,
            device.user_id,
            Some(device_id),
            None,
            "",
            Some(from),
            body,
            MessageStatus::Received,
            MessageType::Incoming,
            created_at,
        )
        .await?;

        let subscribed = webhooks::list_active_for_event(
            &self.store.pool,
            device.user_id,
            SMS_RECEIVED_EVENT,
        )
        .await?;

        for webhook in subscribed {
            let payload = json!({
                "webhook_id": webhook.id,
                "message_id": message.id,
            });
            let dedup_id = format!("sms_received:{}:{}", webhook.id, message.id);
            if let Err(err) = self
                .queue
                .enqueue(
                    WEBHOOK_DELIVER_ENDPOINT,
                    &payload,
                    WEBHOOK_DELIVER_RETRIES,
                    Some(&dedup_id),
                    None::<Duration>,
                )
                .await
            {
                gateway_log::error(
                    "inbound",
                    format!("failed to enqueue webhook {} for message {}: {err}", webhook.id, message.id),
                );
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_id_is_scoped_to_webhook_and_message() {
        let webhook_id = Uuid::new_v4();
        let message_id = Uuid::new_v4();
        let dedup_id = format!("sms_received:{webhook_id}:{message_id}");
        assert!(dedup_id.contains(&webhook_id.to_string()));
        assert!(dedup_id.contains(&message_id.to_string()));
    }
}
