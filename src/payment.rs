//! Payment provider capability port: the interface the Subscription
//! Controller drives, without committing to any concrete provider.
//! Grounded 1:1 on
//! `original_source/backend/app/services/payment/base.py`'s
//! `PaymentProvider` ABC — dataclasses become plain structs, the ABC
//! becomes a trait with the same default-method split between required
//! and optional (authorized-payments) capabilities.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceRequest {
    pub amount: f64,
    pub currency: String,
    pub description: String,
    pub remote_id: String,
    pub webhook_url: Option<String>,
    pub success_url: Option<String>,
    pub error_url: Option<String>,
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceResult {
    pub success: bool,
    pub invoice_id: Option<String>,
    pub payment_url: Option<String>,
    pub expires_at: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionInfo {
    pub transaction_id: String,
    pub remote_id: Option<String>,
    pub status: TransactionStatus,
    pub amount: f64,
    pub currency: String,
    pub paid_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentVerification {
    pub is_paid: bool,
    pub transaction_id: Option<String>,
    pub paid_at: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationRequest {
    pub remote_id: String,
    pub callback_url: String,
    pub success_url: String,
    pub error_url: String,
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationResult {
    pub success: bool,
    pub authorization_url: Option<String>,
    pub expires_at: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargeRequest {
    pub user_uuid: String,
    pub amount: f64,
    pub currency: String,
    pub description: String,
    pub remote_id: String,
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargeResult {
    pub success: bool,
    pub transaction_id: Option<String>,
    pub amount: Option<f64>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookEventType {
    PaymentCompleted,
    AuthorizationCompleted,
    PaymentFailed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub event_type: WebhookEventType,
    pub remote_id: String,
    pub transaction_id: Option<String>,
    pub user_uuid: Option<String>,
    pub amount: Option<f64>,
    pub raw_payload: serde_json::Value,
}

/// A capability the provider doesn't implement — AUTHORIZED-mode calls
/// against an INVOICE-only provider surface this, matching the
/// original's `NotImplementedError` on the optional methods.
#[derive(Debug, thiserror::Error)]
#[error("{provider} does not support {capability}")]
pub struct UnsupportedCapability {
    pub provider: &'static str,
    pub capability: &'static str,
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    fn provider_name(&self) -> &'static str;

    async fn create_invoice(&self, request: &InvoiceRequest) -> anyhow::Result<InvoiceResult>;

    async fn get_transaction(
        &self,
        transaction_id: &str,
    ) -> anyhow::Result<Option<TransactionInfo>>;

    async fn verify_payment(&self, remote_id: &str) -> anyhow::Result<PaymentVerification>;

    async fn get_balance(&self) -> anyhow::Result<Option<f64>>;

    fn is_configured(&self) -> bool;

    fn supports_webhooks(&self) -> bool {
        false
    }

    fn verify_webhook_signature(&self, _payload: &[u8], _signature: &str) -> bool {
        true
    }

    fn supports_authorized_payments(&self) -> bool {
        false
    }

    async fn get_authorization_url(
        &self,
        _request: &AuthorizationRequest,
    ) -> Result<AuthorizationResult, UnsupportedCapability> {
        Err(UnsupportedCapability {
            provider: self.provider_name_static(),
            capability: "authorized payments",
        })
    }

    async fn charge_authorized_user(
        &self,
        _request: &ChargeRequest,
    ) -> Result<ChargeResult, UnsupportedCapability> {
        Err(UnsupportedCapability {
            provider: self.provider_name_static(),
            capability: "authorized payments",
        })
    }

    /// Provider-specific webhook parsing; `None` means unrecognized/invalid.
    fn parse_webhook(
        &self,
        _payload: &serde_json::Value,
        _headers: &HashMap<String, String>,
    ) -> Option<WebhookEvent> {
        None
    }

    /// Default trait methods can't call `self.provider_name()` directly in
    /// an error constructed before `self` methods resolve virtually in
    /// every implementer, so this indirection exists purely to give the
    /// default bodies above a `'static` str without requiring `Self: 'static`.
    fn provider_name_static(&self) -> &'static str {
        self.provider_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct InvoiceOnlyProvider;

    #[async_trait]
    impl PaymentProvider for InvoiceOnlyProvider {
        fn provider_name(&self) -> &'static str {
            "test-invoice-only"
        }

        async fn create_invoice(&self, request: &InvoiceRequest) -> anyhow::Result<InvoiceResult> {
            Ok(InvoiceResult {
                success: true,
                invoice_id: Some(format!("inv-{}", request.remote_id)),
                payment_url: Some("https://pay.example/inv-1".to_string()),
                expires_at: None,
                error: None,
            })
        }

        async fn get_transaction(
            &self,
            _transaction_id: &str,
        ) -> anyhow::Result<Option<TransactionInfo>> {
            Ok(None)
        }

        async fn verify_payment(&self, _remote_id: &str) -> anyhow::Result<PaymentVerification> {
            Ok(PaymentVerification {
                is_paid: false,
                transaction_id: None,
                paid_at: None,
                error: None,
            })
        }

        async fn get_balance(&self) -> anyhow::Result<Option<f64>> {
            Ok(None)
        }

        fn is_configured(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn invoice_only_provider_rejects_authorized_payments_by_default() {
        let provider = InvoiceOnlyProvider;
        assert!(!provider.supports_authorized_payments());
        let request = AuthorizationRequest {
            remote_id: "user-1".to_string(),
            callback_url: "https://gateway.example/callback".to_string(),
            success_url: "https://gateway.example/ok".to_string(),
            error_url: "https://gateway.example/err".to_string(),
            metadata: HashMap::new(),
        };
        let result = provider.get_authorization_url(&request).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn invoice_only_provider_creates_invoice() {
        let provider = InvoiceOnlyProvider;
        let request = InvoiceRequest {
            amount: 9.99,
            currency: "USD".to_string(),
            description: "Pro plan".to_string(),
            remote_id: "payment-1".to_string(),
            webhook_url: None,
            success_url: None,
            error_url: None,
            metadata: HashMap::new(),
        };
        let result = provider.create_invoice(&request).await.unwrap();
        assert!(result.success);
        assert_eq!(result.invoice_id.as_deref(), Some("inv-payment-1"));
    }
}
