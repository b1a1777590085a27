//! Process entry point: loads configuration, wires every component, and
//! runs the HTTP API, the agent WebSocket listener, the liveness sweep, and
//! the daily renewal scan concurrently on one `tokio` runtime.

mod config;
mod device_registry;
mod dispatcher;
mod error;
mod gateway_log;
mod http;
mod hub;
mod inbound;
mod messaging_universal;
mod model;
mod payment;
mod queue_client;
mod quota;
mod send_pipeline;
mod store;
mod subscription;
mod webhook_deliverer;

use std::sync::Arc;

use config::Config;
use device_registry::DeviceRegistry;
use dispatcher::NotificationDispatcher;
use http::AppState;
use hub::ConnectionHub;
use inbound::InboundFanout;
use payment::{InvoiceRequest, InvoiceResult, PaymentProvider, PaymentVerification, TransactionInfo};
use quota::QuotaService;
use queue_client::{QueueClient, VerifyMode};
use send_pipeline::SendPipeline;
use store::Store;
use subscription::{run_daily_renewal_scan, SubscriptionController};
use webhook_deliverer::WebhookDeliverer;

/// INVOICE-only provider that records a payment link without talking to any
/// real vendor. No vendor SDK is wired into this crate (DESIGN.md records
/// why); operators pointing `PUBLIC_CALLBACK_BASE_URL` at a real gateway are
/// expected to swap this for an implementation calling out to it.
struct ManualInvoiceProvider {
    callback_base_url: String,
}

#[async_trait::async_trait]
impl PaymentProvider for ManualInvoiceProvider {
    fn provider_name(&self) -> &'static str {
        "manual"
    }

    async fn create_invoice(&self, request: &InvoiceRequest) -> anyhow::Result<InvoiceResult> {
        Ok(InvoiceResult {
            success: true,
            invoice_id: Some(request.remote_id.clone()),
            payment_url: Some(format!(
                "{}/pay/{}",
                self.callback_base_url.trim_end_matches('/'),
                request.remote_id
            )),
            expires_at: None,
            error: None,
        })
    }

    async fn get_transaction(&self, _transaction_id: &str) -> anyhow::Result<Option<TransactionInfo>> {
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

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    gateway_log::init(config.log_dir.clone(), gateway_log::Level::Info)?;
    gateway_log::info("main", "starting sms gateway".to_string());

    let store = Store::connect(&config.database_url).await?;
    let device_registry = Arc::new(DeviceRegistry::new(store.pool.clone()));
    let hub = ConnectionHub::new();
    let quota = QuotaService::new(store.pool.clone());

    let verify_mode = if config.queue_current_signing_key.is_none() {
        VerifyMode::Local
    } else {
        VerifyMode::Signed
    };
    let queue = QueueClient::new(
        config.queue_base_url.clone(),
        config.queue_token.clone(),
        config.public_callback_base_url.clone(),
        config.queue_current_signing_key.clone(),
        config.queue_next_signing_key.clone(),
        config.provider_timeout,
        verify_mode,
    )?;

    let inbound = Arc::new(InboundFanout::new(store.clone(), queue.clone()));
    let dispatcher = Arc::new(NotificationDispatcher::new(
        queue.clone(),
        hub.clone(),
        store.pool.clone(),
    ));
    let send_pipeline = SendPipeline::new(store.clone(), quota.clone(), hub.clone(), dispatcher.clone());
    let webhook_deliverer = Arc::new(WebhookDeliverer::new(store.clone(), config.webhook_timeout)?);

    let provider: Arc<dyn PaymentProvider> = Arc::new(ManualInvoiceProvider {
        callback_base_url: config.public_callback_base_url.clone(),
    });
    let subscription = Arc::new(SubscriptionController::new(
        store.clone(),
        quota.clone(),
        provider,
        config.public_callback_base_url.clone(),
    ));

    let app_state = Arc::new(AppState {
        store: store.clone(),
        quota: quota.clone(),
        device_registry: device_registry.clone(),
        hub: hub.clone(),
        queue: queue.clone(),
        send_pipeline,
        dispatcher: dispatcher.clone(),
        webhook_deliverer: webhook_deliverer.clone(),
        inbound: inbound.clone(),
        subscription: subscription.clone(),
        public_base_url: config.public_callback_base_url.clone(),
    });

    let http_bind_addr = config.http_bind_addr.clone();
    let ws_bind_addr = config.ws_bind_addr.clone();
    let session_liveness_timeout = config.session_liveness_timeout;

    let http_task = tokio::spawn(async move {
        http::run_http_server(&http_bind_addr, app_state).await
    });

    let agent_task = tokio::spawn(async move {
        hub::run_agent_listener(
            &ws_bind_addr,
            hub.clone(),
            device_registry.clone(),
            store.pool.clone(),
            inbound.clone(),
        )
        .await
    });

    let liveness_task = tokio::spawn(hub::run_liveness_sweep(hub.clone(), session_liveness_timeout));

    let renewal_task = tokio::spawn(run_daily_renewal_scan(subscription.clone()));

    tokio::select! {
        result = http_task => result??,
        result = agent_task => result??,
        _ = liveness_task => {}
        _ = renewal_task => {}
    }

    Ok(())
}
