//! Routes outgoing messages to device-type-specific handlers via the
//! durable job queue. Grounded on
//! `original_source/backend/app/services/notification_dispatcher.py`;
//! `EgressJob`/`RetryPolicy` bookkeeping and the dead-letter path are
//! adapted from the teacher's `messaging_universal::{retry, dlq}`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::gateway_log;
use crate::hub::{ConnectionHub, ServerFrame};
use crate::messaging_universal::dlq;
use crate::messaging_universal::retry::{EgressJob, RetryPolicy};
use crate::model::{Device, DeviceType, Message};
use crate::queue_client::QueueClient;
use crate::store::messages;

/// FCM's documented data-payload ceiling; any device-type handler that
/// pushes out-of-band is bound by it, not only the Android/FCM one.
const OUT_OF_BAND_CHUNK_CEILING_BYTES: usize = 4096;
const DISPATCH_ENDPOINT: &str = "/internal/notifications/send";
const DLQ_PATH: &str = "./logs/dispatch_dlq.jsonl";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRef {
    pub message_id: Uuid,
    pub recipient: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmsEgressPayload {
    pub device_id: Uuid,
    pub device_token: String,
    pub device_type: DeviceType,
    pub messages: Vec<MessageRef>,
    pub body: String,
}

pub type SmsEgressJob = EgressJob<SmsEgressPayload>;

/// Device type is inferred from the presence of an `fcm_token`, matching
/// `notification_dispatcher.py::_get_device_type`'s placeholder logic
/// (the model has no explicit `device_type` column).
fn infer_device_type(device: &Device) -> DeviceType {
    if device.fcm_token.is_some() {
        DeviceType::Android
    } else {
        DeviceType::Modem
    }
}

#[async_trait]
pub trait DeviceHandler: Send + Sync {
    fn device_type(&self) -> DeviceType;
    async fn send(&self, token: &str, payload: &SmsEgressPayload) -> bool;
}

/// Pushes to the already-connected agent WebSocket when the device is
/// still online; this gateway's "push" transport *is* the Connection Hub,
/// there being no separate FCM integration in scope.
pub struct AndroidHandler {
    hub: ConnectionHub,
    pool: sqlx::PgPool,
}

impl AndroidHandler {
    pub fn new(hub: ConnectionHub, pool: sqlx::PgPool) -> Self {
        Self { hub, pool }
    }
}

#[async_trait]
impl DeviceHandler for AndroidHandler {
    fn device_type(&self) -> DeviceType {
        DeviceType::Android
    }

    async fn send(&self, _token: &str, payload: &SmsEgressPayload) -> bool {
        if !self.hub.is_online(payload.device_id).await {
            return false;
        }
        let mut delivered_all = true;
        for message in &payload.messages {
            let delivered = self
                .hub
                .push(
                    payload.device_id,
                    ServerFrame::Task {
                        message_id: message.message_id,
                        to: message.recipient.clone(),
                        body: payload.body.clone(),
                    },
                )
                .await;
            if delivered {
                let _ = messages::mark_sending(&self.pool, message.message_id).await;
            }
            delivered_all &= delivered;
        }
        delivered_all
    }
}

/// Placeholder matching the original's `ModemHandler` — serial devices
/// have no delivery path through this gateway yet.
pub struct ModemHandler;

#[async_trait]
impl DeviceHandler for ModemHandler {
    fn device_type(&self) -> DeviceType {
        DeviceType::Modem
    }

    async fn send(&self, _token: &str, _payload: &SmsEgressPayload) -> bool {
        gateway_log::warn("dispatcher", "modem handler not yet implemented".to_string());
        false
    }
}

pub struct NotificationDispatcher {
    queue: QueueClient,
    handlers: HashMap<DeviceType, Box<dyn DeviceHandler>>,
    retry_policy: RetryPolicy,
    dlq_path: PathBuf,
}

impl NotificationDispatcher {
    pub fn new(queue: QueueClient, hub: ConnectionHub, pool: sqlx::PgPool) -> Self {
        let mut handlers: HashMap<DeviceType, Box<dyn DeviceHandler>> = HashMap::new();
        handlers.insert(DeviceType::Android, Box::new(AndroidHandler::new(hub, pool)));
        handlers.insert(DeviceType::Modem, Box::new(ModemHandler));
        Self {
            queue,
            handlers,
            retry_policy: RetryPolicy::default(),
            dlq_path: PathBuf::from(DLQ_PATH),
        }
    }

    /// Groups `messages` by device, chunks each device's batch under the
    /// out-of-band size ceiling, and enqueues one durable job per chunk.
    /// Only messages carrying a `device_id` participate; `queued` (no
    /// device) messages have nothing to dispatch yet.
    pub async fn dispatch(&self, devices: &HashMap<Uuid, Device>, messages: &[Message]) {
        if messages.is_empty() {
            return;
        }
        let body = messages[0].body.clone();
        let mut by_device: HashMap<Uuid, Vec<MessageRef>> = HashMap::new();
        for message in messages {
            let Some(device_id) = message.device_id else {
                continue;
            };
            by_device.entry(device_id).or_default().push(MessageRef {
                message_id: message.id,
                recipient: message.to.clone(),
            });
        }

        for (device_id, refs) in by_device {
            let Some(device) = devices.get(&device_id) else {
                gateway_log::warn("dispatcher", format!("device {device_id} not found"));
                continue;
            };
            let Some(token) = device.fcm_token.clone() else {
                gateway_log::warn("dispatcher", format!("device {device_id} has no token"));
                continue;
            };
            let device_type = infer_device_type(device);

            for chunk in chunk_messages(&refs, &body) {
                let payload = SmsEgressPayload {
                    device_id,
                    device_token: token.clone(),
                    device_type,
                    messages: chunk.clone(),
                    body: body.clone(),
                };
                let job = SmsEgressJob::new(
                    device_type.as_str(),
                    payload,
                    self.retry_policy.max_attempts,
                );
                let dedup_id = crate::queue_client::dedup_key(device_id, &body, chunk.len());
                let job_json = match serde_json::to_value(&job) {
                    Ok(v) => v,
                    Err(err) => {
                        gateway_log::error("dispatcher", format!("failed to serialize job: {err}"));
                        continue;
                    }
                };
                if let Err(err) = self
                    .queue
                    .enqueue(
                        DISPATCH_ENDPOINT,
                        &job_json,
                        self.retry_policy.max_attempts,
                        Some(&dedup_id),
                        None::<Duration>,
                    )
                    .await
                {
                    gateway_log::error(
                        "dispatcher",
                        format!("failed to enqueue dispatch for device {device_id}: {err}"),
                    );
                }
            }
        }
    }

    /// Invoked by the `/internal/notifications/send` HTTP route once the
    /// queue has verified the callback's signature. Returns `true` when
    /// the queue should ack (success, or permanently given up and logged
    /// to the dead-letter file); `false` asks the queue to retry.
    pub async fn handle_callback(&self, mut job: SmsEgressJob, observed_attempt: Option<u32>) -> bool {
        if let Some(attempt) = observed_attempt {
            job.attempt = attempt;
        }
        let Some(handler) = self.handlers.get(&job.envelope.device_type) else {
            gateway_log::error(
                "dispatcher",
                format!("no handler registered for {:?}", job.envelope.device_type),
            );
            return false;
        };

        if handler.send(&job.envelope.device_token, &job.envelope).await {
            return true;
        }

        job.increment_attempt();
        job.record_error("device handler returned false".to_string());
        if job.attempt >= job.max_attempts {
            let entry = dlq::build_dlq_entry(
                &job.job_id.to_string(),
                &job.provider,
                &job.envelope.device_id.to_string(),
                None,
                None,
                None,
                job.attempt,
                job.max_attempts,
                serde_json::json!({"error": job.last_error}),
                serde_json::json!({"message_count": job.envelope.messages.len()}),
            );
            if let Err(err) = dlq::append_dlq_entry(&self.dlq_path, &entry) {
                gateway_log::error("dispatcher", format!("failed to write dlq entry: {err}"));
            }
            return true;
        }
        false
    }
}

/// Splits `refs` into ordered chunks whose serialized `messages` array
/// stays under the out-of-band push-size ceiling.
fn chunk_messages(refs: &[MessageRef], body: &str) -> Vec<Vec<MessageRef>> {
    let probe = SmsEgressPayload {
        device_id: Uuid::nil(),
        device_token: String::new(),
        device_type: DeviceType::Android,
        messages: refs.to_vec(),
        body: body.to_string(),
    };
    let whole_size = serde_json::to_vec(&probe).map(|v| v.len()).unwrap_or(0);
    if whole_size <= OUT_OF_BAND_CHUNK_CEILING_BYTES || refs.len() <= 1 {
        return vec![refs.to_vec()];
    }

    let per_message = whole_size / refs.len().max(1);
    let per_chunk = (OUT_OF_BAND_CHUNK_CEILING_BYTES / per_message.max(1)).max(1);
    refs.chunks(per_chunk).map(|c| c.to_vec()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_refs(n: usize) -> Vec<MessageRef> {
        (0..n)
            .map(|_| MessageRef {
                message_id: Uuid::new_v4(),
                recipient: "+15550001234".to_string(),
            })
            .collect()
    }

    #[test]
    fn small_batch_stays_in_one_chunk() {
        let refs = make_refs(3);
        let chunks = chunk_messages(&refs, "hello");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].len(), 3);
    }

    #[test]
    fn large_batch_splits_preserving_order() {
        let refs = make_refs(500);
        let chunks = chunk_messages(&refs, "hello world, this is a test message body");
        assert!(chunks.len() > 1);
        let reassembled: Vec<Uuid> = chunks
            .iter()
            .flatten()
            .map(|r| r.message_id)
            .collect();
        let original: Vec<Uuid> = refs.iter().map(|r| r.message_id).collect();
        assert_eq!(reassembled, original);
    }

    #[test]
    fn infer_device_type_prefers_android_when_token_present() {
        let device = Device {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            name: "phone".to_string(),
            phone_number: "+15550009999".to_string(),
            api_key: "key".to_string(),
            fcm_token: Some("token".to_string()),
            created_at: chrono::Utc::now(),
        };
        assert_eq!(infer_device_type(&device), DeviceType::Android);
    }
}
