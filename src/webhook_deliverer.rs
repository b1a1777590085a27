//! Signs and POSTs a single webhook delivery. Invoked from the queue
//! callback route, never inline from the request/agent path. Grounded on
//! `original_source/backend/app/services/webhook_service.py::send_webhook`;
//! the signature is computed over the single JSON-encoded payload string
//! per spec.md §4.8, not the original's double-encoded variant (recorded
//! as a deliberate correction in DESIGN.md).

use std::time::Duration;

use hmac::{Hmac, Mac};
use serde_json::{Value, json};
use sha2::Sha256;
use uuid::Uuid;

use crate::model::WebhookConfig;
use crate::store::{messages, webhooks, Store};

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_HEADER: &str = "X-Webhook-Signature";

pub struct WebhookDeliverer {
    http: reqwest::Client,
    store: Store,
}

impl WebhookDeliverer {
    pub fn new(store: Store, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http, store })
    }

    /// Loads the webhook and message by id and delivers the `sms_received`
    /// event. Returns `Ok(false)` for a benign no-op (webhook deactivated or
    /// message vanished since enqueue) so the queue callback can ack
    /// without retrying; an `Err` means the delivery attempt itself failed
    /// and the job queue's own retry policy should apply.
    pub async fn deliver(&self, webhook_id: Uuid, message_id: Uuid) -> anyhow::Result<bool> {
        let Some(webhook) = webhooks::get(&self.store.pool, webhook_id).await? else {
            return Ok(false);
        };
        if !webhook.active {
            return Ok(false);
        }
        let Some(message) = messages::get(&self.store.pool, message_id).await? else {
            return Ok(false);
        };

        // Keys listed alphabetically so the serialized payload matches the
        // canonical form regardless of whether serde_json's preserve_order
        // feature ends up enabled by feature unification elsewhere in the
        // dependency graph.
        let payload = json!({
            "body": message.body,
            "event": "sms_received",
            "from": message.from,
            "message_id": message.id,
            "timestamp": message.created_at,
        });

        self.post_signed(&webhook, &payload).await?;
        messages::mark_webhook_sent(&self.store.pool, message_id).await?;
        Ok(true)
    }

    async fn post_signed(&self, webhook: &WebhookConfig, payload: &Value) -> anyhow::Result<()> {
        let body = serde_json::to_string(payload)?;
        let mut request = self.http.post(&webhook.url).body(body.clone());
        if let Some(secret) = &webhook.secret_key {
            let signature = sign(secret, &body);
            request = request.header(SIGNATURE_HEADER, signature);
        }
        let response = request
            .header("Content-Type", "application/json")
            .send()
            .await?;
        if !response.status().is_success() {
            anyhow::bail!(
                "webhook {} responded with HTTP {}",
                webhook.id,
                response.status()
            );
        }
        Ok(())
    }
}

fn sign(secret: &str, payload_json: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(payload_json.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_deterministic_for_same_payload() {
        let payload = r#"{"event":"sms_received","message_id":"abc"}"#;
        let a = sign("secret", payload);
        let b = sign("secret", payload);
        assert_eq!(a, b);
    }

    #[test]
    fn signature_changes_with_payload() {
        let a = sign("secret", r#"{"body":"one"}"#);
        let b = sign("secret", r#"{"body":"two"}"#);
        assert_ne!(a, b);
    }
}
