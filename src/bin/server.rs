use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use iso_sim_server::civ::{ArchetypeDecider, CivilizationSessionState};
use iso_sim_server::server_utils::{
    normalize_timeout_ms, parse_flag, parse_port, sanitize_viewer_id, session_dir,
};
use iso_sim_server::sync::{
    now_ms, parse_client_frame, ChannelEvent, ChannelLink, ClientFrame, FileSessionStore,
    LocalHub, SessionStore, SyncConfig, SyncNotice, SyncProvider, Viewer,
};
use rand::distr::Alphanumeric;
use rand::Rng;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tower_http::services::{ServeDir, ServeFile};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

const OUTBOUND_QUEUE: usize = 256;
const HOST_VIEWER_PREFIX: &str = "relay-host";

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

type SharedState = Arc<RelayState>;

struct RelayState {
    hub: LocalHub,
    store: Arc<FileSessionStore>,
    host: Option<SyncProvider>,
}

#[derive(Clone, Debug)]
enum OutboundMessage {
    Text(String),
    Close { code: u16, reason: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum QueuePolicy {
    DropOnFull,
    DisconnectOnFull,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SaveBody {
    state: CivilizationSessionState,
    leader_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LeaderBody {
    leader_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClaimBody {
    viewer_id: String,
    timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ViewerCountBody {
    count: usize,
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("iso_sim_server=info,server=info")),
        )
        .init();

    let port = parse_port(std::env::var("PORT").ok().as_deref());
    let store_dir = session_dir(std::env::var("SESSION_DIR").ok().as_deref());
    info!(dir = %store_dir.display(), "session store");

    let hub = LocalHub::default();
    let store = Arc::new(FileSessionStore::new(store_dir));
    let host = if parse_flag(std::env::var("HOST_VIEWER").ok().as_deref()) {
        Some(start_host_viewer(&hub, store.clone()))
    } else {
        None
    };

    let state = Arc::new(RelayState {
        hub: hub.clone(),
        store,
        host,
    });

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/api/status", get(status_handler))
        .route("/api/session", get(load_session_handler).put(save_session_handler))
        .route("/api/session/heartbeat", post(heartbeat_handler))
        .route("/api/session/claim", post(claim_handler))
        .route("/api/session/viewers", post(viewer_count_handler))
        .route("/api/session/clear", post(clear_handler))
        .route("/ws", get(ws_handler))
        .with_state(state.clone());

    let app = if let Some(static_dir) = resolve_static_dir() {
        let index_file = static_dir.join("index.html");
        info!(root = %static_dir.display(), "serving static files");
        app.fallback_service(
            ServeDir::new(static_dir).not_found_service(ServeFile::new(index_file)),
        )
    } else {
        warn!("static file root not found; serving api only");
        app
    };

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}")).await?;
    info!(port, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    hub.close();
    if let Some(host) = Arc::into_inner(state).and_then(|state| state.host) {
        host.destroy().await;
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!(%error, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

fn start_host_viewer(hub: &LocalHub, store: Arc<FileSessionStore>) -> SyncProvider {
    let viewer = Viewer::new(make_host_viewer_id(), now_ms());
    let (provider, mut notices) = SyncProvider::connect(
        viewer,
        SyncConfig::default(),
        Box::new(ArchetypeDecider),
        hub,
        store,
    );
    tokio::spawn(async move {
        while let Some(notice) = notices.recv().await {
            match notice {
                SyncNotice::Error(error) => warn!(%error, "host viewer sync error"),
                SyncNotice::RoleChanged { role, leader_id } => {
                    info!(?role, ?leader_id, "host viewer role changed")
                }
                other => debug!(?other, "host viewer notice"),
            }
        }
    });
    provider
}

/// A restarted relay must not inherit the previous process's leadership slot.
fn make_host_viewer_id() -> String {
    let suffix: String = rand::rng()
        .sample_iter(Alphanumeric)
        .take(8)
        .map(char::from)
        .collect();
    format!("{HOST_VIEWER_PREFIX}-{suffix}")
}

fn make_connection_id() -> u64 {
    NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed)
}

fn resolve_static_dir() -> Option<PathBuf> {
    if let Ok(raw) = std::env::var("STATIC_DIR") {
        let path = PathBuf::from(raw);
        if path.join("index.html").is_file() {
            return Some(path);
        }
    }

    let candidates = [PathBuf::from("dist"), PathBuf::from("../dist")];
    candidates
        .into_iter()
        .find(|path| path.join("index.html").is_file())
}

async fn healthz() -> impl IntoResponse {
    Json(json!({ "ok": true }))
}

async fn status_handler(State(state): State<SharedState>) -> impl IntoResponse {
    let viewers = state.hub.viewers();
    let host = state.host.as_ref().map(|host| {
        let snapshot = host.snapshot();
        json!({
            "viewerId": host.viewer().viewer_id,
            "role": snapshot.role,
            "leaderId": snapshot.leader_id,
            "isolated": snapshot.isolated,
            "turn": snapshot.turn(),
        })
    });
    Json(json!({
        "viewers": viewers,
        "host": host,
    }))
}

async fn load_session_handler(State(state): State<SharedState>) -> impl IntoResponse {
    match state.store.load_session().await {
        Some(record) => (
            StatusCode::OK,
            Json(json!({
                "state": record.state,
                "leaderId": record.leader_id,
                "leaderHeartbeatMs": record.leader_heartbeat_ms,
                "viewerCount": record.viewer_count,
            })),
        ),
        None => (StatusCode::NOT_FOUND, Json(json!({ "ok": false }))),
    }
}

async fn save_session_handler(
    State(state): State<SharedState>,
    Json(body): Json<SaveBody>,
) -> impl IntoResponse {
    let Some(leader_id) = sanitize_viewer_id(&body.leader_id) else {
        return bad_request("invalid leaderId");
    };
    let ok = state
        .store
        .save_session(&body.state, &leader_id, now_ms())
        .await;
    ok_response(ok)
}

async fn heartbeat_handler(
    State(state): State<SharedState>,
    Json(body): Json<LeaderBody>,
) -> impl IntoResponse {
    let Some(leader_id) = sanitize_viewer_id(&body.leader_id) else {
        return bad_request("invalid leaderId");
    };
    ok_response(state.store.update_heartbeat(&leader_id, now_ms()).await)
}

async fn claim_handler(
    State(state): State<SharedState>,
    Json(body): Json<ClaimBody>,
) -> impl IntoResponse {
    let Some(viewer_id) = sanitize_viewer_id(&body.viewer_id) else {
        return bad_request("invalid viewerId");
    };
    let timeout_ms = normalize_timeout_ms(body.timeout_ms);
    let outcome = state
        .store
        .claim_leadership(&viewer_id, timeout_ms, now_ms())
        .await;
    ok_response(outcome.is_granted())
}

async fn viewer_count_handler(
    State(state): State<SharedState>,
    Json(body): Json<ViewerCountBody>,
) -> impl IntoResponse {
    ok_response(state.store.update_viewer_count(body.count).await)
}

async fn clear_handler(
    State(state): State<SharedState>,
    Json(body): Json<LeaderBody>,
) -> impl IntoResponse {
    let Some(leader_id) = sanitize_viewer_id(&body.leader_id) else {
        return bad_request("invalid leaderId");
    };
    ok_response(state.store.clear_leadership(&leader_id).await)
}

fn ok_response(ok: bool) -> (StatusCode, Json<Value>) {
    (StatusCode::OK, Json(json!({ "ok": ok })))
}

fn bad_request(message: &str) -> (StatusCode, Json<Value>) {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "ok": false, "message": message })),
    )
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<SharedState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(state, socket))
}

async fn next_event(link: &mut Option<ChannelLink>) -> Option<ChannelEvent> {
    match link {
        Some(link) => link.recv().await,
        None => std::future::pending().await,
    }
}

async fn handle_socket(state: SharedState, socket: WebSocket) {
    let connection_id = make_connection_id();
    debug!(connection_id, "socket opened");
    let (tx, mut rx) = mpsc::channel::<OutboundMessage>(OUTBOUND_QUEUE);

    let (mut ws_sender, mut ws_receiver) = socket.split();
    let writer = tokio::spawn(async move {
        while let Some(outbound) = rx.recv().await {
            let should_close = matches!(outbound, OutboundMessage::Close { .. });
            let result = match outbound {
                OutboundMessage::Text(payload) => {
                    ws_sender.send(Message::Text(payload.into())).await
                }
                OutboundMessage::Close { code, reason } => {
                    let frame = CloseFrame {
                        code,
                        reason: reason.into(),
                    };
                    ws_sender.send(Message::Close(Some(frame))).await
                }
            };
            if result.is_err() || should_close {
                break;
            }
        }
    });

    let mut link: Option<ChannelLink> = None;
    loop {
        tokio::select! {
            received = ws_receiver.next() => {
                let Some(Ok(message)) = received else {
                    break;
                };
                let raw = match message {
                    Message::Text(raw) => raw.to_string(),
                    Message::Binary(raw) => match String::from_utf8(raw.to_vec()) {
                        Ok(text) => text,
                        Err(_) => {
                            send_error(&tx, "invalid utf8 message");
                            continue;
                        }
                    },
                    Message::Close(_) => break,
                    _ => continue,
                };
                handle_client_frame(&state.hub, &mut link, &tx, &raw);
            }
            event = next_event(&mut link) => {
                let Some(event) = event else {
                    // Hub closed underneath us.
                    link = None;
                    let _ = tx.try_send(OutboundMessage::Close {
                        code: 1001,
                        reason: "channel closed".to_string(),
                    });
                    break;
                };
                let viewer_id = link
                    .as_ref()
                    .map(|link| link.viewer().viewer_id.clone())
                    .unwrap_or_default();
                if !forwards_to(&event, &viewer_id) {
                    continue;
                }
                if !forward_event(&tx, &event) {
                    warn!(connection_id, %viewer_id, "outbound queue full, disconnecting");
                    let _ = tx.try_send(OutboundMessage::Close {
                        code: 1013,
                        reason: "too slow".to_string(),
                    });
                    break;
                }
            }
        }
    }

    drop(link);
    drop(tx);
    let _ = writer.await;
    debug!(connection_id, "socket closed");
}

fn handle_client_frame(
    hub: &LocalHub,
    link: &mut Option<ChannelLink>,
    tx: &mpsc::Sender<OutboundMessage>,
    raw: &str,
) {
    let Some(frame) = parse_client_frame(raw) else {
        send_error(tx, "invalid frame");
        return;
    };

    match frame {
        ClientFrame::Join { viewer } => {
            let viewer_id = viewer.viewer_id.clone();
            match hub.join(viewer) {
                // Replacing the link after the join keeps presence from flapping.
                Ok(joined) => {
                    debug!(%viewer_id, "viewer joined");
                    *link = Some(joined);
                }
                Err(error) => send_error(tx, &error.to_string()),
            }
        }
        ClientFrame::Broadcast { message } => {
            let Some(current) = link.as_ref() else {
                send_error(tx, "join before broadcasting");
                return;
            };
            if let Err(error) = current.send(message) {
                send_error(tx, &error.to_string());
            }
        }
        ClientFrame::Leave => {
            *link = None;
        }
    }
}

fn forwards_to(event: &ChannelEvent, viewer_id: &str) -> bool {
    match event {
        ChannelEvent::Broadcast { message, .. } => message.is_for(viewer_id),
        _ => true,
    }
}

fn queue_policy(event: &ChannelEvent) -> QueuePolicy {
    match event {
        ChannelEvent::Broadcast { .. } => QueuePolicy::DropOnFull,
        _ => QueuePolicy::DisconnectOnFull,
    }
}

fn forward_event(tx: &mpsc::Sender<OutboundMessage>, event: &ChannelEvent) -> bool {
    let payload = match serde_json::to_string(event) {
        Ok(payload) => payload,
        Err(error) => {
            warn!(%error, "failed to serialize channel event");
            return true;
        }
    };
    let sent = tx.try_send(OutboundMessage::Text(payload)).is_ok();
    sent || queue_policy(event) == QueuePolicy::DropOnFull
}

fn send_error(tx: &mpsc::Sender<OutboundMessage>, message: &str) {
    let payload = json!({ "type": "error", "message": message }).to_string();
    let _ = tx.try_send(OutboundMessage::Text(payload));
}

#[cfg(test)]
mod tests {
    use super::*;
    use iso_sim_server::civ::new_session;
    use iso_sim_server::sync::SyncMessage;

    fn state_sync(target: Option<&str>) -> ChannelEvent {
        ChannelEvent::Broadcast {
            from: "leader".to_string(),
            message: SyncMessage::StateSync {
                state: Box::new(new_session(2, 1)),
                target: target.map(str::to_string),
            },
        }
    }

    #[test]
    fn host_viewer_ids_are_unique_and_valid() {
        let a = make_host_viewer_id();
        let b = make_host_viewer_id();
        assert_ne!(a, b);
        assert!(a.starts_with("relay-host-"));
        assert_eq!(sanitize_viewer_id(&a), Some(a.clone()));
    }

    #[test]
    fn targeted_state_sync_is_filtered_per_viewer() {
        assert!(forwards_to(&state_sync(Some("late")), "late"));
        assert!(!forwards_to(&state_sync(Some("late")), "early"));
        assert!(forwards_to(&state_sync(None), "early"));
        let join = ChannelEvent::PresenceJoin {
            viewer: Viewer::new("x", 1),
        };
        assert!(forwards_to(&join, "early"));
    }

    #[test]
    fn presence_events_disconnect_slow_sockets() {
        let (tx, _rx) = mpsc::channel(1);
        let join = ChannelEvent::PresenceJoin {
            viewer: Viewer::new("x", 1),
        };
        assert!(forward_event(&tx, &join));
        assert!(!forward_event(&tx, &join));
        assert!(forward_event(&tx, &state_sync(None)));
    }

    #[tokio::test]
    async fn frames_drive_hub_membership() {
        let hub = LocalHub::default();
        let (tx, mut rx) = mpsc::channel(8);
        let mut link = None;

        handle_client_frame(
            &hub,
            &mut link,
            &tx,
            r#"{"type":"broadcast","message":{"type":"camera-change","viewIndex":1}}"#,
        );
        match rx.recv().await {
            Some(OutboundMessage::Text(payload)) => assert!(payload.contains("join before")),
            other => panic!("expected error frame, got {other:?}"),
        }

        handle_client_frame(
            &hub,
            &mut link,
            &tx,
            r#"{"type":"join","viewerId":"tab-1","joinedAt":10}"#,
        );
        assert_eq!(hub.viewers(), vec![Viewer::new("tab-1", 10)]);

        handle_client_frame(&hub, &mut link, &tx, r#"{"type":"leave"}"#);
        assert!(link.is_none());
        assert!(hub.viewers().is_empty());

        handle_client_frame(&hub, &mut link, &tx, "garbage");
        match rx.recv().await {
            Some(OutboundMessage::Text(payload)) => assert!(payload.contains("invalid frame")),
            other => panic!("expected error frame, got {other:?}"),
        }
    }
}
