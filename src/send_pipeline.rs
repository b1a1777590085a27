//! Orchestrates the outbound send flow: reserve quota, select devices,
//! persist messages, and hand live assignments to the dispatcher.
//! Grounded on spec.md §4.7; the original lacks a single analogous
//! module (its `send_sms` route inlines this), so the shape here follows
//! the teacher's orchestration-layer pattern of a thin struct over a
//! handful of collaborating services.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::dispatcher::NotificationDispatcher;
use crate::error::{GatewayError, GatewayResult};
use crate::hub::ConnectionHub;
use crate::model::{Device, Message, MessageStatus, MessageType};
use crate::quota::QuotaService;
use crate::store::{devices, messages, Store};

#[derive(Debug, serde::Deserialize)]
pub struct SendRequest {
    pub recipients: Vec<String>,
    pub body: String,
    pub device_id: Option<Uuid>,
}

#[derive(Debug, serde::Serialize)]
pub struct SendResponse {
    pub batch_id: Option<Uuid>,
    pub message_ids: Vec<Uuid>,
    pub recipients_count: usize,
    pub status: &'static str,
}

pub struct SendPipeline {
    store: Store,
    quota: QuotaService,
    hub: ConnectionHub,
    dispatcher: Arc<NotificationDispatcher>,
}

impl SendPipeline {
    /// `dispatcher` is shared (`Arc`) rather than owned: the
    /// `/internal/notifications/send` HTTP route also holds a handle to
    /// invoke `handle_callback` on queue delivery.
    pub fn new(
        store: Store,
        quota: QuotaService,
        hub: ConnectionHub,
        dispatcher: Arc<NotificationDispatcher>,
    ) -> Self {
        Self {
            store,
            quota,
            hub,
            dispatcher,
        }
    }

    pub async fn send(&self, user_id: Uuid, request: SendRequest) -> GatewayResult<SendResponse> {
        validate(&request)?;
        let n = request.recipients.len() as i64;

        self.quota.reserve_sms(user_id, n).await?;

        let candidate_devices = match self.resolve_candidates(user_id, request.device_id).await {
            Ok(devices) => devices,
            Err(err) => {
                self.quota.release_sms(user_id, n).await.ok();
                return Err(err);
            }
        };

        let candidate_ids: Vec<Uuid> = candidate_devices.iter().map(|d| d.id).collect();
        let online_ids = self.hub.online_subset(&candidate_ids).await;
        let online_devices: Vec<&Device> = online_ids
            .iter()
            .filter_map(|id| candidate_devices.iter().find(|d| d.id == *id))
            .collect();

        let batch_id = if request.recipients.len() > 1 {
            Some(Uuid::new_v4())
        } else {
            None
        };

        let now = Utc::now();
        let mut message_ids = Vec::with_capacity(request.recipients.len());
        let mut assigned_messages = Vec::new();
        let mut devices_by_id: HashMap<Uuid, Device> = HashMap::new();

        for (i, recipient) in request.recipients.iter().enumerate() {
            let (device_id, status) = if !online_devices.is_empty() {
                let device = online_devices[i % online_devices.len()];
                devices_by_id.entry(device.id).or_insert_with(|| device.clone());
                (Some(device.id), MessageStatus::Assigned)
            } else {
                (None, MessageStatus::Queued)
            };

            let message = messages::insert(
                &self.store.pool,
                user_id,
                device_id,
                batch_id,
                recipient,
                None,
                &request.body,
                status,
                MessageType::Outgoing,
                now,
            )
            .await
            .map_err(GatewayError::Internal)?;

            message_ids.push(message.id);
            if device_id.is_some() {
                assigned_messages.push(message);
            }
        }

        if !assigned_messages.is_empty() {
            self.dispatcher.dispatch(&devices_by_id, &assigned_messages).await;
        }

        let status = if message_ids.len() == assigned_messages.len() && !assigned_messages.is_empty() {
            "processing"
        } else {
            "queued"
        };

        Ok(SendResponse {
            batch_id,
            message_ids,
            recipients_count: request.recipients.len(),
            status,
        })
    }

    async fn resolve_candidates(
        &self,
        user_id: Uuid,
        device_id: Option<Uuid>,
    ) -> GatewayResult<Vec<Device>> {
        match device_id {
            Some(device_id) => {
                let device = devices::get(&self.store.pool, device_id)
                    .await
                    .map_err(GatewayError::Internal)?
                    .ok_or(GatewayError::NotFound("device"))?;
                if device.user_id != user_id {
                    return Err(GatewayError::Validation(
                        "device does not belong to user".to_string(),
                    ));
                }
                Ok(vec![device])
            }
            None => devices::list_for_user(&self.store.pool, user_id)
                .await
                .map_err(GatewayError::Internal),
        }
    }
}

fn validate(request: &SendRequest) -> GatewayResult<()> {
    if request.recipients.is_empty() || request.recipients.len() > crate::model::MAX_RECIPIENTS {
        return Err(GatewayError::Validation(format!(
            "recipients must contain between 1 and {} entries",
            crate::model::MAX_RECIPIENTS
        )));
    }
    if request.body.is_empty() || request.body.len() > crate::model::MAX_BODY_LEN {
        return Err(GatewayError::Validation(format!(
            "body must be between 1 and {} characters",
            crate::model::MAX_BODY_LEN
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_empty_recipients() {
        let request = SendRequest {
            recipients: vec![],
            body: "hi".to_string(),
            device_id: None,
        };
        assert!(validate(&request).is_err());
    }

    #[test]
    fn validate_rejects_oversized_body() {
        let request = SendRequest {
            recipients: vec!["+15550001234".to_string()],
            body: "a".repeat(crate::model::MAX_BODY_LEN + 1),
            device_id: None,
        };
        assert!(validate(&request).is_err());
    }

    #[test]
    fn validate_accepts_well_formed_request() {
        let request = SendRequest {
            recipients: vec!["+15550001234".to_string()],
            body: "hello".to_string(),
            device_id: None,
        };
        assert!(validate(&request).is_ok());
    }
}
