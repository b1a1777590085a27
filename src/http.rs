//! HTTP API surface. Accept-loop shape (`TcpListener`, one `tokio::spawn`
//! per connection, raw `hyper` 1.x) is grounded on
//! `examples/greentic-ai-greentic-operator/src/demo/http_ingress.rs`; here
//! it fronts a fixed REST-ish route table instead of a single ingress
//! dispatch function, since this surface has a known, finite set of
//! gateway operations (spec.md §6) rather than a pluggable per-provider one.
//!
//! Authentication: user-facing routes resolve the caller via the
//! `X-API-Key` integration-credential header against the `ApiKeys` table;
//! device-facing routes resolve via the device's own `api_key`. JWT
//! issuance/verification is out of scope (spec.md §1 Non-goals) — a
//! deployment fronting this surface with bearer tokens is expected to
//! translate them to an `X-API-Key` at the edge.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use http_body_util::{BodyExt, Full};
use hyper::{
    Method, Request, Response, StatusCode,
    body::{Bytes, Incoming},
    header::CONTENT_TYPE,
    server::conn::http1::Builder as Http1Builder,
    service::service_fn,
};
use hyper_util::rt::tokio::TokioIo;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use uuid::Uuid;

use crate::device_registry::DeviceRegistry;
use crate::dispatcher::{NotificationDispatcher, SmsEgressJob};
use crate::error::{GatewayError, GatewayResult};
use crate::gateway_log;
use crate::hub::{ConnectionHub, ReportedStatus};
use crate::inbound::InboundFanout;
use crate::model::{BillingCycle, Device, MessageType};
use crate::queue_client::QueueClient;
use crate::quota::QuotaService;
use crate::send_pipeline::{SendPipeline, SendRequest};
use crate::store::{Store, api_keys, devices, messages, plans, webhooks};
use crate::subscription::SubscriptionController;
use crate::webhook_deliverer::WebhookDeliverer;

const API_KEY_HEADER: &str = "x-api-key";
/// Header name the queue uses for its own HMAC callback signature —
/// QStash's convention, matching `queue_client.rs`'s grounding source.
const QUEUE_SIGNATURE_HEADER: &str = "upstash-signature";
const QUEUE_RETRY_HEADER: &str = "upstash-retried";
const PROVIDER_SIGNATURE_HEADER: &str = "x-provider-signature";

pub struct AppState {
    pub store: Store,
    pub quota: QuotaService,
    pub device_registry: Arc<DeviceRegistry>,
    pub hub: ConnectionHub,
    pub queue: QueueClient,
    pub send_pipeline: SendPipeline,
    pub dispatcher: Arc<NotificationDispatcher>,
    pub webhook_deliverer: Arc<WebhookDeliverer>,
    pub inbound: Arc<InboundFanout>,
    pub subscription: Arc<SubscriptionController>,
    pub public_base_url: String,
}

/// Binds and serves the HTTP API. Runs until the listener itself errors;
/// per-connection failures are logged and otherwise don't affect the loop.
pub async fn run_http_server(bind_addr: &str, state: Arc<AppState>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(bind_addr).await?;
    gateway_log::info("http", format!("http api listening on {bind_addr}"));
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(err) => {
                gateway_log::error("http", format!("accept error: {err}"));
                continue;
            }
        };
        let state = state.clone();
        tokio::spawn(async move {
            let service = service_fn(move |req| handle_request(req, state.clone()));
            let io = TokioIo::new(stream);
            if let Err(err) = Http1Builder::new().serve_connection(io, service).await {
                gateway_log::warn("http", format!("connection {peer} error: {err}"));
            }
        });
    }
}

async fn handle_request(
    req: Request<Incoming>,
    state: Arc<AppState>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let response = match route(req, state).await {
        Ok(response) => response,
        Err(response) => response,
    };
    Ok(response)
}

async fn route(
    req: Request<Incoming>,
    state: Arc<AppState>,
) -> Result<Response<Full<Bytes>>, Response<Full<Bytes>>> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let query = collect_queries(req.uri().query());
    let segments: Vec<String> = path
        .trim_start_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    let segs: Vec<&str> = segments.iter().map(String::as_str).collect();

    let result = match (&method, segs.as_slice()) {
        (&Method::POST, ["api", "v1", "sms", "send"]) => handle_send(req, &state).await,
        (&Method::GET, ["api", "v1", "sms", "messages"]) => {
            handle_list_messages(req, &state, &query, None).await
        }
        (&Method::GET, ["api", "v1", "sms", "messages", id]) => {
            handle_get_message(req, &state, id).await
        }
        (&Method::GET, ["api", "v1", "sms", "incoming"]) => {
            handle_list_messages(req, &state, &query, Some(MessageType::Incoming)).await
        }
        (&Method::POST, ["api", "v1", "sms", "devices"]) => handle_create_device(req, &state).await,
        (&Method::GET, ["api", "v1", "sms", "devices"]) => handle_list_devices(req, &state).await,
        (&Method::PUT, ["api", "v1", "sms", "devices", id]) => {
            handle_update_device(req, &state, id).await
        }
        (&Method::DELETE, ["api", "v1", "sms", "devices", id]) => {
            handle_delete_device(req, &state, id).await
        }
        (&Method::POST, ["api", "v1", "sms", "report"]) => handle_device_report(req, &state).await,
        (&Method::POST, ["api", "v1", "sms", "incoming"]) => {
            handle_device_incoming(req, &state).await
        }
        (&Method::POST, ["api", "v1", "sms", "fcm-token"]) => {
            handle_device_fcm_token(req, &state).await
        }
        (&Method::POST, ["api", "v1", "webhooks"]) => handle_create_webhook(req, &state).await,
        (&Method::GET, ["api", "v1", "webhooks"]) => handle_list_webhooks(req, &state).await,
        (&Method::GET, ["api", "v1", "webhooks", id]) => handle_get_webhook(req, &state, id).await,
        (&Method::PUT, ["api", "v1", "webhooks", id]) => {
            handle_update_webhook(req, &state, id).await
        }
        (&Method::DELETE, ["api", "v1", "webhooks", id]) => {
            handle_delete_webhook(req, &state, id).await
        }
        (&Method::GET, ["api", "v1", "plans", "list"]) => handle_list_plans(&state).await,
        (&Method::GET, ["api", "v1", "plans", "quota"]) => handle_get_quota(req, &state).await,
        (&Method::PUT, ["api", "v1", "plans", "upgrade"]) => handle_upgrade(req, &state).await,
        (&Method::POST, ["api", "v1", "plans", "cancel"]) => handle_cancel(req, &state).await,
        (&Method::POST, ["api", "v1", "subscriptions", "webhook", provider]) => {
            handle_provider_webhook(req, &state, provider).await
        }
        (&Method::POST, ["api", "v1", "subscriptions", "jobs", "check-renewals"]) => {
            handle_check_renewals(req, &state).await
        }
        (&Method::POST, ["internal", "webhooks", "deliver"]) => {
            handle_internal_webhook_deliver(req, &state).await
        }
        (&Method::POST, ["internal", "notifications", "send"]) => {
            handle_internal_notification_send(req, &state).await
        }
        _ => Err(GatewayError::NotFound("route")),
    };

    result.map_err(|err| error_response(&err))
}

// ---- auth helpers -------------------------------------------------------

fn header_str<'a>(req: &'a Request<Incoming>, name: &str) -> Option<&'a str> {
    req.headers().get(name).and_then(|v| v.to_str().ok())
}

async fn authenticate_user(req: &Request<Incoming>, state: &AppState) -> GatewayResult<Uuid> {
    let key = header_str(req, API_KEY_HEADER).ok_or(GatewayError::Authn)?;
    let api_key = api_keys::get_by_key(&state.store.pool, key)
        .await
        .map_err(GatewayError::Internal)?
        .ok_or(GatewayError::Authn)?;
    api_keys::touch_last_used(&state.store.pool, api_key.id, Utc::now())
        .await
        .ok();
    Ok(api_key.user_id)
}

async fn authenticate_device(req: &Request<Incoming>, state: &AppState) -> GatewayResult<Device> {
    let key = header_str(req, API_KEY_HEADER).ok_or(GatewayError::Authn)?;
    state.device_registry.authenticate(key).await
}

async fn read_body(req: Request<Incoming>) -> GatewayResult<(Request<()>, Bytes)> {
    let (parts, body) = req.into_parts();
    let bytes = body
        .collect()
        .await
        .map(|collected| collected.to_bytes())
        .map_err(|err| GatewayError::Validation(format!("failed to read request body: {err}")))?;
    Ok((Request::from_parts(parts, ()), bytes))
}

fn parse_json<T: serde::de::DeserializeOwned>(body: &[u8]) -> GatewayResult<T> {
    serde_json::from_slice(body)
        .map_err(|err| GatewayError::Validation(format!("invalid request body: {err}")))
}

fn parse_uuid(raw: &str, what: &'static str) -> GatewayResult<Uuid> {
    raw.parse().map_err(|_| GatewayError::Validation(format!("invalid {what} id")))
}

// ---- sms/send + messages -------------------------------------------------

async fn handle_send(
    req: Request<Incoming>,
    state: &AppState,
) -> GatewayResult<Response<Full<Bytes>>> {
    let user_id = authenticate_user(&req, state).await?;
    let (_, body) = read_body(req).await?;
    let request: SendRequest = parse_json(&body)?;
    let response = state.send_pipeline.send(user_id, request).await?;
    Ok(json_response(StatusCode::CREATED, serde_json::to_value(response).unwrap_or_default()))
}

async fn handle_list_messages(
    req: Request<Incoming>,
    state: &AppState,
    query: &HashMap<String, String>,
    forced_type: Option<MessageType>,
) -> GatewayResult<Response<Full<Bytes>>> {
    let user_id = authenticate_user(&req, state).await?;
    let skip: i64 = query.get("skip").and_then(|v| v.parse().ok()).unwrap_or(0);
    let limit: i64 = query.get("limit").and_then(|v| v.parse().ok()).unwrap_or(50);
    let message_type = forced_type.or_else(|| {
        query.get("type").and_then(|v| v.parse::<MessageType>().ok())
    });
    let rows = messages::list_for_user(&state.store.pool, user_id, message_type, skip, limit)
        .await
        .map_err(GatewayError::Internal)?;
    Ok(json_response(StatusCode::OK, json!({ "items": rows, "skip": skip, "limit": limit })))
}

async fn handle_get_message(
    req: Request<Incoming>,
    state: &AppState,
    id: &str,
) -> GatewayResult<Response<Full<Bytes>>> {
    let user_id = authenticate_user(&req, state).await?;
    let message_id = parse_uuid(id, "message")?;
    let message = messages::get(&state.store.pool, message_id)
        .await
        .map_err(GatewayError::Internal)?
        .ok_or(GatewayError::NotFound("message"))?;
    if message.user_id != user_id {
        return Err(GatewayError::NotFound("message"));
    }
    Ok(json_response(StatusCode::OK, serde_json::to_value(message).unwrap_or_default()))
}

// ---- devices (user-facing CRUD) -----------------------------------------

#[derive(Deserialize)]
struct DeviceCreateRequest {
    name: String,
    phone_number: String,
}

#[derive(Serialize)]
struct DeviceCreateResponse {
    device_id: Uuid,
    api_key: String,
}

#[derive(Deserialize)]
struct DeviceUpdateRequest {
    name: String,
    phone_number: String,
}

async fn handle_create_device(
    req: Request<Incoming>,
    state: &AppState,
) -> GatewayResult<Response<Full<Bytes>>> {
    let user_id = authenticate_user(&req, state).await?;
    let (_, body) = read_body(req).await?;
    let request: DeviceCreateRequest = parse_json(&body)?;

    state.quota.check_and_register_device(user_id).await?;
    let api_key = generate_opaque_key("dk_");
    let device = devices::insert(
        &state.store.pool,
        user_id,
        &request.name,
        &request.phone_number,
        &api_key,
        Utc::now(),
    )
    .await
    .map_err(GatewayError::Internal)?;

    Ok(json_response(
        StatusCode::CREATED,
        serde_json::to_value(DeviceCreateResponse {
            device_id: device.id,
            api_key: device.api_key,
        })
        .unwrap_or_default(),
    ))
}

async fn handle_list_devices(
    req: Request<Incoming>,
    state: &AppState,
) -> GatewayResult<Response<Full<Bytes>>> {
    let user_id = authenticate_user(&req, state).await?;
    let rows = devices::list_for_user(&state.store.pool, user_id)
        .await
        .map_err(GatewayError::Internal)?;
    Ok(json_response(StatusCode::OK, json!({ "items": rows })))
}

async fn owned_device(state: &AppState, user_id: Uuid, device_id: Uuid) -> GatewayResult<Device> {
    let device = devices::get(&state.store.pool, device_id)
        .await
        .map_err(GatewayError::Internal)?
        .ok_or(GatewayError::NotFound("device"))?;
    if device.user_id != user_id {
        return Err(GatewayError::NotFound("device"));
    }
    Ok(device)
}

async fn handle_update_device(
    req: Request<Incoming>,
    state: &AppState,
    id: &str,
) -> GatewayResult<Response<Full<Bytes>>> {
    let user_id = authenticate_user(&req, state).await?;
    let device_id = parse_uuid(id, "device")?;
    owned_device(state, user_id, device_id).await?;
    let (_, body) = read_body(req).await?;
    let request: DeviceUpdateRequest = parse_json(&body)?;
    let updated = devices::update(&state.store.pool, device_id, &request.name, &request.phone_number)
        .await
        .map_err(GatewayError::Internal)?
        .ok_or(GatewayError::NotFound("device"))?;
    Ok(json_response(StatusCode::OK, serde_json::to_value(updated).unwrap_or_default()))
}

async fn handle_delete_device(
    req: Request<Incoming>,
    state: &AppState,
    id: &str,
) -> GatewayResult<Response<Full<Bytes>>> {
    let user_id = authenticate_user(&req, state).await?;
    let device_id = parse_uuid(id, "device")?;
    owned_device(state, user_id, device_id).await?;
    devices::delete(&state.store.pool, device_id)
        .await
        .map_err(GatewayError::Internal)?;
    state.quota.unregister_device(user_id).await?;
    Ok(json_response(StatusCode::OK, json!({ "deleted": true })))
}

// ---- device-facing routes ------------------------------------------------

#[derive(Deserialize)]
struct DeviceReportRequest {
    message_id: Uuid,
    status: ReportedStatus,
    error: Option<String>,
}

async fn handle_device_report(
    req: Request<Incoming>,
    state: &AppState,
) -> GatewayResult<Response<Full<Bytes>>> {
    let device = authenticate_device(&req, state).await?;
    let (_, body) = read_body(req).await?;
    let request: DeviceReportRequest = parse_json(&body)?;

    let message = messages::get(&state.store.pool, request.message_id)
        .await
        .map_err(GatewayError::Internal)?
        .ok_or(GatewayError::NotFound("message"))?;
    if message.device_id != Some(device.id) {
        return Err(GatewayError::Authz);
    }
    messages::apply_report(
        &state.store.pool,
        request.message_id,
        request.status.into(),
        request.error.as_deref(),
        Utc::now(),
    )
    .await
    .map_err(GatewayError::Internal)?;
    Ok(json_response(StatusCode::OK, json!({ "message": "ok" })))
}

#[derive(Deserialize)]
struct DeviceIncomingRequest {
    from: String,
    body: String,
    timestamp: Option<DateTime<Utc>>,
}

async fn handle_device_incoming(
    req: Request<Incoming>,
    state: &AppState,
) -> GatewayResult<Response<Full<Bytes>>> {
    let device = authenticate_device(&req, state).await?;
    let (_, body) = read_body(req).await?;
    let request: DeviceIncomingRequest = parse_json(&body)?;
    let created_at = request.timestamp.unwrap_or_else(Utc::now);
    state
        .inbound
        .ingest(device.id, &request.from, &request.body, created_at)
        .await
        .map_err(GatewayError::Internal)?;
    Ok(json_response(StatusCode::OK, json!({ "message": "ok" })))
}

#[derive(Deserialize)]
struct FcmTokenRequest {
    fcm_token: String,
}

async fn handle_device_fcm_token(
    req: Request<Incoming>,
    state: &AppState,
) -> GatewayResult<Response<Full<Bytes>>> {
    let device = authenticate_device(&req, state).await?;
    let (_, body) = read_body(req).await?;
    let request: FcmTokenRequest = parse_json(&body)?;
    devices::update_fcm_token(&state.store.pool, device.id, &request.fcm_token)
        .await
        .map_err(GatewayError::Internal)?;
    Ok(json_response(StatusCode::OK, json!({ "message": "ok" })))
}

// ---- webhooks -------------------------------------------------------------

#[derive(Deserialize)]
struct WebhookCreateRequest {
    url: String,
    secret_key: Option<String>,
    events: Vec<String>,
}

#[derive(Deserialize)]
struct WebhookUpdateRequest {
    url: String,
    secret_key: Option<String>,
    events: Vec<String>,
    active: bool,
}

async fn handle_create_webhook(
    req: Request<Incoming>,
    state: &AppState,
) -> GatewayResult<Response<Full<Bytes>>> {
    let user_id = authenticate_user(&req, state).await?;
    let (_, body) = read_body(req).await?;
    let request: WebhookCreateRequest = parse_json(&body)?;
    let webhook = webhooks::insert(
        &state.store.pool,
        user_id,
        &request.url,
        request.secret_key.as_deref(),
        &request.events,
    )
    .await
    .map_err(GatewayError::Internal)?;
    Ok(json_response(StatusCode::CREATED, serde_json::to_value(webhook).unwrap_or_default()))
}

async fn handle_list_webhooks(
    req: Request<Incoming>,
    state: &AppState,
) -> GatewayResult<Response<Full<Bytes>>> {
    let user_id = authenticate_user(&req, state).await?;
    let rows = webhooks::list_for_user(&state.store.pool, user_id)
        .await
        .map_err(GatewayError::Internal)?;
    Ok(json_response(StatusCode::OK, json!({ "items": rows })))
}

async fn owned_webhook(state: &AppState, user_id: Uuid, webhook_id: Uuid) -> GatewayResult<()> {
    let webhook = webhooks::get(&state.store.pool, webhook_id)
        .await
        .map_err(GatewayError::Internal)?
        .ok_or(GatewayError::NotFound("webhook"))?;
    if webhook.user_id != user_id {
        return Err(GatewayError::NotFound("webhook"));
    }
    Ok(())
}

async fn handle_get_webhook(
    req: Request<Incoming>,
    state: &AppState,
    id: &str,
) -> GatewayResult<Response<Full<Bytes>>> {
    let user_id = authenticate_user(&req, state).await?;
    let webhook_id = parse_uuid(id, "webhook")?;
    let webhook = webhooks::get(&state.store.pool, webhook_id)
        .await
        .map_err(GatewayError::Internal)?
        .ok_or(GatewayError::NotFound("webhook"))?;
    if webhook.user_id != user_id {
        return Err(GatewayError::NotFound("webhook"));
    }
    Ok(json_response(StatusCode::OK, serde_json::to_value(webhook).unwrap_or_default()))
}

async fn handle_update_webhook(
    req: Request<Incoming>,
    state: &AppState,
    id: &str,
) -> GatewayResult<Response<Full<Bytes>>> {
    let user_id = authenticate_user(&req, state).await?;
    let webhook_id = parse_uuid(id, "webhook")?;
    owned_webhook(state, user_id, webhook_id).await?;
    let (_, body) = read_body(req).await?;
    let request: WebhookUpdateRequest = parse_json(&body)?;
    let updated = webhooks::update(
        &state.store.pool,
        webhook_id,
        &request.url,
        request.secret_key.as_deref(),
        &request.events,
        request.active,
    )
    .await
    .map_err(GatewayError::Internal)?
    .ok_or(GatewayError::NotFound("webhook"))?;
    Ok(json_response(StatusCode::OK, serde_json::to_value(updated).unwrap_or_default()))
}

async fn handle_delete_webhook(
    req: Request<Incoming>,
    state: &AppState,
    id: &str,
) -> GatewayResult<Response<Full<Bytes>>> {
    let user_id = authenticate_user(&req, state).await?;
    let webhook_id = parse_uuid(id, "webhook")?;
    owned_webhook(state, user_id, webhook_id).await?;
    webhooks::delete(&state.store.pool, webhook_id)
        .await
        .map_err(GatewayError::Internal)?;
    Ok(json_response(StatusCode::OK, json!({ "deleted": true })))
}

// ---- plans / quota / subscription lifecycle ------------------------------

async fn handle_list_plans(state: &AppState) -> GatewayResult<Response<Full<Bytes>>> {
    let rows = plans::list_public(&state.store.pool).await.map_err(GatewayError::Internal)?;
    Ok(json_response(StatusCode::OK, json!({ "items": rows })))
}

async fn handle_get_quota(
    req: Request<Incoming>,
    state: &AppState,
) -> GatewayResult<Response<Full<Bytes>>> {
    let user_id = authenticate_user(&req, state).await?;
    let quota = state.quota.get_quota(user_id).await?;
    Ok(json_response(StatusCode::OK, serde_json::to_value(quota).unwrap_or_default()))
}

#[derive(Deserialize)]
struct UpgradeRequest {
    plan_id: Uuid,
    billing_cycle: BillingCycle,
}

async fn handle_upgrade(
    req: Request<Incoming>,
    state: &AppState,
) -> GatewayResult<Response<Full<Bytes>>> {
    let user_id = authenticate_user(&req, state).await?;
    let (_, body) = read_body(req).await?;
    let request: UpgradeRequest = parse_json(&body)?;
    let result = state
        .subscription
        .start_subscription(user_id, request.plan_id, request.billing_cycle)
        .await?;
    Ok(json_response(
        StatusCode::OK,
        json!({
            "status": result.status,
            "plan": result.plan,
            "payment_url": result.payment_url,
            "authorization_url": result.authorization_url,
        }),
    ))
}

#[derive(Deserialize, Default)]
struct CancelRequest {
    #[serde(default)]
    immediate: bool,
}

async fn handle_cancel(
    req: Request<Incoming>,
    state: &AppState,
) -> GatewayResult<Response<Full<Bytes>>> {
    let user_id = authenticate_user(&req, state).await?;
    let (_, body) = read_body(req).await?;
    let request: CancelRequest = if body.is_empty() {
        CancelRequest::default()
    } else {
        parse_json(&body)?
    };
    state.subscription.cancel_subscription(user_id, request.immediate).await?;
    Ok(json_response(StatusCode::OK, json!({ "status": "canceled" })))
}

// ---- provider + queue callbacks ------------------------------------------

async fn handle_provider_webhook(
    req: Request<Incoming>,
    state: &AppState,
    _provider: &str,
) -> GatewayResult<Response<Full<Bytes>>> {
    let headers: HashMap<String, String> = req
        .headers()
        .iter()
        .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.to_string(), v.to_string())))
        .collect();
    let signature = header_str(&req, PROVIDER_SIGNATURE_HEADER).unwrap_or_default().to_string();
    let (_, body) = read_body(req).await?;
    state.subscription.handle_provider_webhook(&body, &headers, &signature).await?;
    Ok(json_response(StatusCode::OK, json!({ "received": true })))
}

async fn handle_check_renewals(
    req: Request<Incoming>,
    state: &AppState,
) -> GatewayResult<Response<Full<Bytes>>> {
    let path = "/api/v1/subscriptions/jobs/check-renewals";
    let signature = header_str(&req, QUEUE_SIGNATURE_HEADER).unwrap_or_default().to_string();
    let (_, body) = read_body(req).await?;
    verify_signature_bytes(state, path, &signature, &body)?;
    state.subscription.run_renewal_scan().await.map_err(GatewayError::Internal)?;
    Ok(json_response(StatusCode::OK, json!({ "ok": true })))
}

async fn handle_internal_webhook_deliver(
    req: Request<Incoming>,
    state: &AppState,
) -> GatewayResult<Response<Full<Bytes>>> {
    let path = "/internal/webhooks/deliver";
    let signature = header_str(&req, QUEUE_SIGNATURE_HEADER).unwrap_or_default().to_string();
    let (_, body) = read_body(req).await?;
    verify_signature_bytes(state, path, &signature, &body)?;

    #[derive(Deserialize)]
    struct DeliverPayload {
        webhook_id: Uuid,
        message_id: Uuid,
    }
    let payload: DeliverPayload = parse_json(&body)?;
    let delivered = state
        .webhook_deliverer
        .deliver(payload.webhook_id, payload.message_id)
        .await
        .map_err(GatewayError::Internal)?;
    if delivered {
        Ok(json_response(StatusCode::OK, json!({ "delivered": true })))
    } else {
        // Benign no-op (webhook deactivated / message vanished): ack, no retry.
        Ok(json_response(StatusCode::OK, json!({ "delivered": false })))
    }
}

async fn handle_internal_notification_send(
    req: Request<Incoming>,
    state: &AppState,
) -> GatewayResult<Response<Full<Bytes>>> {
    let path = "/internal/notifications/send";
    let signature = header_str(&req, QUEUE_SIGNATURE_HEADER).unwrap_or_default().to_string();
    let observed_attempt: Option<u32> =
        header_str(&req, QUEUE_RETRY_HEADER).and_then(|v| v.parse().ok());
    let (_, body) = read_body(req).await?;
    verify_signature_bytes(state, path, &signature, &body)?;

    let job: SmsEgressJob = parse_json(&body)?;
    let acked = state.dispatcher.handle_callback(job, observed_attempt).await;
    if acked {
        Ok(json_response(StatusCode::OK, json!({ "ok": true })))
    } else {
        // Non-2xx asks the queue to retry per its own backoff policy.
        Ok(json_response(StatusCode::SERVICE_UNAVAILABLE, json!({ "ok": false })))
    }
}

fn verify_signature_bytes(
    state: &AppState,
    path: &str,
    signature: &str,
    body: &[u8],
) -> GatewayResult<()> {
    let url = format!("{}{}", state.public_base_url.trim_end_matches('/'), path);
    if !state.queue.verify_signature(body, signature, &url) {
        return Err(GatewayError::Authn);
    }
    Ok(())
}

// ---- response helpers -----------------------------------------------------

fn error_response(err: &GatewayError) -> Response<Full<Bytes>> {
    let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    json_response(status, err.to_envelope())
}

fn json_response(status: StatusCode, value: Value) -> Response<Full<Bytes>> {
    let body = serde_json::to_string(&value).unwrap_or_else(|_| "{}".to_string());
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "application/json")
        .body(Full::from(Bytes::from(body)))
        .unwrap_or_else(|err| {
            Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .body(Full::from(Bytes::from(format!("failed to build response: {err}"))))
                .unwrap()
        })
}

fn collect_queries(query: Option<&str>) -> HashMap<String, String> {
    query
        .map(|value| {
            value
                .split('&')
                .filter_map(|pair| {
                    let mut pieces = pair.splitn(2, '=');
                    let key = pieces.next()?.trim();
                    if key.is_empty() {
                        return None;
                    }
                    Some((key.to_string(), pieces.next().unwrap_or("").trim().to_string()))
                })
                .collect()
        })
        .unwrap_or_default()
}

fn generate_opaque_key(prefix: &str) -> String {
    use base64::Engine;
    use rand::RngCore;
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    format!("{prefix}{}", base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collect_queries_parses_pairs() {
        let query = collect_queries(Some("skip=10&limit=25&type=outgoing"));
        assert_eq!(query.get("skip").map(String::as_str), Some("10"));
        assert_eq!(query.get("limit").map(String::as_str), Some("25"));
        assert_eq!(query.get("type").map(String::as_str), Some("outgoing"));
    }

    #[test]
    fn collect_queries_handles_missing_query() {
        assert!(collect_queries(None).is_empty());
    }

    #[test]
    fn generated_keys_are_unique_and_prefixed() {
        let a = generate_opaque_key("dk_");
        let b = generate_opaque_key("dk_");
        assert_ne!(a, b);
        assert!(a.starts_with("dk_"));
    }
}
