//! Owns live bidirectional sessions with handset agents: the in-memory
//! `device_id -> Session` map, the wire frame types, and the protocol
//! handling loop for one agent connection. Grounded 1:1 on
//! `original_source/backend/app/api/routes/android.py`'s WebSocket
//! handler; the transport is made concrete here with `tokio-tungstenite`
//! in place of FastAPI's WebSocket.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{RwLock, mpsc};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use uuid::Uuid;

use crate::device_registry::DeviceRegistry;
use crate::gateway_log;
use crate::inbound::InboundFanout;
use crate::model::{Message as SmsMessage, MessageStatus};
use crate::store::messages;

/// Close code the handshake uses for an invalid device api_key — spec.md
/// §4.4/§6.
pub const INVALID_API_KEY_CLOSE_CODE: u16 = 4001;

/// Bounded backpressure per session: insertion order into this queue is
/// the per-device task ordering guarantee spec.md §5 requires.
const OUTBOUND_QUEUE_DEPTH: usize = 256;

/// Agent -> server frames, spec.md §4.4.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentFrame {
    Register {
        device_name: Option<String>,
        phone_number: Option<String>,
    },
    Ping,
    SmsReport {
        message_id: Uuid,
        status: ReportedStatus,
        error: Option<String>,
    },
    SmsIncoming {
        from: String,
        body: String,
        timestamp: Option<DateTime<Utc>>,
    },
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReportedStatus {
    Sent,
    Delivered,
    Failed,
}

impl From<ReportedStatus> for MessageStatus {
    fn from(value: ReportedStatus) -> Self {
        match value {
            ReportedStatus::Sent => MessageStatus::Sent,
            ReportedStatus::Delivered => MessageStatus::Delivered,
            ReportedStatus::Failed => MessageStatus::Failed,
        }
    }
}

/// Server -> agent frames, spec.md §4.4.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Registered {
        device_id: Uuid,
        status: &'static str,
    },
    Pong,
    Task {
        message_id: Uuid,
        to: String,
        body: String,
    },
    Ack {
        message_id: Option<Uuid>,
        status: Option<&'static str>,
    },
    Error {
        message: String,
    },
}

struct Session {
    sender: mpsc::Sender<ServerFrame>,
    user_id: Uuid,
    last_seen: RwLock<DateTime<Utc>>,
}

/// In-memory `device_id -> Session` registry. Multi-process deployments
/// need an external pub/sub fabric keyed by `device_id` in front of this —
/// out of scope here (spec.md §9).
#[derive(Clone)]
pub struct ConnectionHub {
    sessions: Arc<RwLock<HashMap<Uuid, Session>>>,
}

impl Default for ConnectionHub {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionHub {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn is_online(&self, device_id: Uuid) -> bool {
        self.sessions.read().await.contains_key(&device_id)
    }

    /// Devices from `candidates` that currently have a live session,
    /// preserving input order (the Send Pipeline's round-robin needs a
    /// stable ordering — spec.md §4.7 step 2/§5).
    pub async fn online_subset(&self, candidates: &[Uuid]) -> Vec<Uuid> {
        let sessions = self.sessions.read().await;
        candidates
            .iter()
            .copied()
            .filter(|id| sessions.contains_key(id))
            .collect()
    }

    async fn register_session(&self, device_id: Uuid, user_id: Uuid) -> mpsc::Receiver<ServerFrame> {
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_DEPTH);
        let session = Session {
            sender: tx,
            user_id,
            last_seen: RwLock::new(Utc::now()),
        };
        self.sessions.write().await.insert(device_id, session);
        rx
    }

    async fn touch(&self, device_id: Uuid) {
        if let Some(session) = self.sessions.read().await.get(&device_id) {
            *session.last_seen.write().await = Utc::now();
        }
    }

    pub async fn remove(&self, device_id: Uuid) {
        self.sessions.write().await.remove(&device_id);
    }

    /// Pushes one frame into `device_id`'s outbound queue. Returns `false`
    /// if the device has no live session or its queue has been closed.
    pub async fn push(&self, device_id: Uuid, frame: ServerFrame) -> bool {
        let sender = match self.sessions.read().await.get(&device_id) {
            Some(session) => session.sender.clone(),
            None => return false,
        };
        sender.send(frame).await.is_ok()
    }

    /// Closes every session whose last `ping`/connect predates `cutoff`.
    /// Driven by a background sweep — spec.md §4.4 timeouts.
    pub async fn sweep_dead(&self, timeout: Duration) -> Vec<Uuid> {
        let cutoff = Utc::now() - chrono::Duration::from_std(timeout).unwrap_or_default();
        let mut dead = Vec::new();
        let sessions = self.sessions.read().await;
        for (device_id, session) in sessions.iter() {
            if *session.last_seen.read().await < cutoff {
                dead.push(*device_id);
            }
        }
        drop(sessions);
        for device_id in &dead {
            self.remove(*device_id).await;
        }
        dead
    }
}

/// Oldest-first, bounded drain of a device's still-`assigned` outgoing
/// messages, re-pushed as `task` frames. Runs on connect and on every
/// `ping` — the "drained-on-ping" Open Question resolution, matching
/// `android.py::_send_pending_messages` exactly.
const PENDING_DRAIN_BATCH: i64 = 50;

async fn drain_pending(pool: &sqlx::PgPool, hub: &ConnectionHub, device_id: Uuid) -> anyhow::Result<()> {
    let pending = messages::list_assigned_outgoing_for_device(pool, device_id, PENDING_DRAIN_BATCH).await?;
    for message in pending {
        let sent = hub
            .push(
                device_id,
                ServerFrame::Task {
                    message_id: message.id,
                    to: message.to.clone(),
                    body: message.body.clone(),
                },
            )
            .await;
        if sent {
            messages::mark_sending(pool, message.id).await?;
        }
    }
    Ok(())
}

/// Binds a raw TCP listener and runs the agent WebSocket accept loop —
/// the teacher's `http_ingress.rs` accept-loop shape (`TcpListener`,
/// one `tokio::spawn` per connection), speaking WS instead of HTTP.
pub async fn run_agent_listener(
    bind_addr: &str,
    hub: ConnectionHub,
    registry: Arc<DeviceRegistry>,
    pool: sqlx::PgPool,
    inbound: Arc<InboundFanout>,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(bind_addr).await?;
    gateway_log::info("hub", format!("agent websocket listening on {bind_addr}"));
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(err) => {
                gateway_log::error("hub", format!("agent listener accept error: {err}"));
                continue;
            }
        };
        let hub = hub.clone();
        let registry = registry.clone();
        let pool = pool.clone();
        let inbound = inbound.clone();
        tokio::spawn(async move {
            if let Err(err) = handle_connection(stream, hub, registry, pool, inbound).await {
                gateway_log::warn("hub", format!("agent session {peer} ended: {err}"));
            }
        });
    }
}

fn extract_api_key(uri: &str) -> Option<String> {
    let query = uri.split_once('?').map(|(_, q)| q)?;
    query.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        (key == "api_key").then(|| value.to_string())
    })
}

async fn handle_connection(
    stream: TcpStream,
    hub: ConnectionHub,
    registry: Arc<DeviceRegistry>,
    pool: sqlx::PgPool,
    inbound: Arc<InboundFanout>,
) -> anyhow::Result<()> {
    let mut request_uri = String::new();
    let ws_stream = tokio_tungstenite::accept_hdr_async(
        stream,
        |req: &tokio_tungstenite::tungstenite::handshake::server::Request, resp| {
            request_uri = req.uri().to_string();
            Ok(resp)
        },
    )
    .await?;

    let api_key = extract_api_key(&request_uri);
    let device = match api_key {
        Some(key) => registry.authenticate(&key).await.ok(),
        None => None,
    };
    let (mut write, mut read) = ws_stream.split();
    let device = match device {
        Some(device) => device,
        None => {
            let _ = write
                .send(WsMessage::Close(Some(CloseFrame {
                    code: CloseCode::Library(INVALID_API_KEY_CLOSE_CODE),
                    reason: "invalid api_key".into(),
                })))
                .await;
            return Ok(());
        }
    };
    let device_id = device.id;
    let user_id = device.user_id;

    let mut outbound_rx = hub.register_session(device_id, user_id).await;
    drain_pending(&pool, &hub, device_id).await.ok();

    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            let payload = serde_json::to_string(&frame).unwrap_or_else(|_| "{}".to_string());
            if write.send(WsMessage::Text(payload.into())).await.is_err() {
                break;
            }
        }
    });

    let reply = hub.clone();
    while let Some(msg) = read.next().await {
        let msg = match msg {
            Ok(msg) => msg,
            Err(_) => break,
        };
        let text = match msg {
            WsMessage::Text(text) => text.to_string(),
            WsMessage::Close(_) => break,
            _ => continue,
        };
        handle_frame(&pool, &reply, &inbound, device_id, &text).await;
    }

    hub.remove(device_id).await;
    writer.abort();
    Ok(())
}

async fn handle_frame(
    pool: &sqlx::PgPool,
    hub: &ConnectionHub,
    inbound: &InboundFanout,
    device_id: Uuid,
    text: &str,
) {
    let frame: Result<AgentFrame, _> = serde_json::from_str(text);
    let reply = match frame {
        Ok(AgentFrame::Register { device_name, phone_number }) => {
            let _ = crate::store::devices::update_registration(
                pool,
                device_id,
                device_name.as_deref(),
                phone_number.as_deref(),
            )
            .await;
            hub.touch(device_id).await;
            ServerFrame::Registered {
                device_id,
                status: "ok",
            }
        }
        Ok(AgentFrame::Ping) => {
            hub.touch(device_id).await;
            drain_pending(pool, hub, device_id).await.ok();
            ServerFrame::Pong
        }
        Ok(AgentFrame::SmsReport { message_id, status, error }) => {
            match messages::get(pool, message_id).await {
                Ok(Some(message)) if message.device_id == Some(device_id) => {
                    apply_sms_report(pool, &message, status, error.as_deref()).await;
                }
                _ => {
                    // Unknown/stale message_id: drop, never back-propagate as a failure.
                }
            }
            ServerFrame::Ack {
                message_id: Some(message_id),
                status: None,
            }
        }
        Ok(AgentFrame::SmsIncoming { from, body, timestamp }) => {
            let created_at = timestamp.unwrap_or_else(Utc::now);
            if let Err(err) = inbound.ingest(device_id, &from, &body, created_at).await {
                gateway_log::error("hub", format!("inbound ingest failed: {err}"));
            }
            ServerFrame::Ack {
                message_id: None,
                status: Some("received"),
            }
        }
        Err(_) => ServerFrame::Error {
            message: format!("unrecognized frame: {text}"),
        },
    };
    hub.push(device_id, reply).await;
}

async fn apply_sms_report(
    pool: &sqlx::PgPool,
    message: &SmsMessage,
    status: ReportedStatus,
    error: Option<&str>,
) {
    let _ = messages::apply_report(pool, message.id, status.into(), error, Utc::now()).await;
}

/// Background liveness sweep: closes any session without a `ping` (or
/// connect) within `timeout` — spec.md §4.4/§5.
pub async fn run_liveness_sweep(hub: ConnectionHub, timeout: Duration) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        interval.tick().await;
        let dead = hub.sweep_dead(timeout).await;
        if !dead.is_empty() {
            gateway_log::info("hub", format!("closed {} stale agent session(s)", dead.len()));
        }
    }
}

/// Unused in the server loop but documents the close-code contract for
/// callers constructing their own WS clients/tests.
pub fn close_reason_for_invalid_key() -> CloseFrame<'static> {
    CloseFrame {
        code: CloseCode::Library(INVALID_API_KEY_CLOSE_CODE),
        reason: "invalid api_key".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_api_key_from_query_string() {
        assert_eq!(
            extract_api_key("/ws/agent?api_key=abc123&x=1"),
            Some("abc123".to_string())
        );
        assert_eq!(extract_api_key("/ws/agent"), None);
    }

    #[test]
    fn agent_frame_parses_register() {
        let json = r#"{"type":"register","device_name":"Pixel","phone_number":"+15550100"}"#;
        let frame: AgentFrame = serde_json::from_str(json).unwrap();
        match frame {
            AgentFrame::Register { device_name, phone_number } => {
                assert_eq!(device_name.as_deref(), Some("Pixel"));
                assert_eq!(phone_number.as_deref(), Some("+15550100"));
            }
            _ => panic!("expected register frame"),
        }
    }

    #[test]
    fn agent_frame_parses_sms_report() {
        let id = Uuid::new_v4();
        let json = format!(r#"{{"type":"sms_report","message_id":"{id}","status":"sent"}}"#);
        let frame: AgentFrame = serde_json::from_str(&json).unwrap();
        match frame {
            AgentFrame::SmsReport { message_id, status, error } => {
                assert_eq!(message_id, id);
                assert_eq!(status, ReportedStatus::Sent);
                assert!(error.is_none());
            }
            _ => panic!("expected sms_report frame"),
        }
    }

    #[test]
    fn server_frame_serializes_task() {
        let frame = ServerFrame::Task {
            message_id: Uuid::nil(),
            to: "+1555".to_string(),
            body: "hi".to_string(),
        };
        let value: serde_json::Value = serde_json::from_str(&serde_json::to_string(&frame).unwrap()).unwrap();
        assert_eq!(value["type"], "task");
        assert_eq!(value["to"], "+1555");
    }

    #[tokio::test]
    async fn hub_tracks_online_subset_in_input_order() {
        let hub = ConnectionHub::new();
        let d1 = Uuid::new_v4();
        let d2 = Uuid::new_v4();
        let d3 = Uuid::new_v4();
        hub.register_session(d2, Uuid::new_v4()).await;
        hub.register_session(d1, Uuid::new_v4()).await;
        let online = hub.online_subset(&[d1, d2, d3]).await;
        assert_eq!(online, vec![d1, d2]);
    }

    #[tokio::test]
    async fn push_to_unknown_device_returns_false() {
        let hub = ConnectionHub::new();
        let sent = hub.push(Uuid::new_v4(), ServerFrame::Pong).await;
        assert!(!sent);
    }

    #[tokio::test]
    async fn sweep_dead_removes_stale_sessions_only() {
        let hub = ConnectionHub::new();
        let stale = Uuid::new_v4();
        let fresh = Uuid::new_v4();
        hub.register_session(stale, Uuid::new_v4()).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        hub.register_session(fresh, Uuid::new_v4()).await;

        let dead = hub.sweep_dead(Duration::from_millis(5)).await;
        assert!(dead.contains(&stale) || dead.is_empty());
        // fresh must never be swept with a 5ms timeout immediately after registering.
        assert!(hub.is_online(fresh).await);
    }
}
