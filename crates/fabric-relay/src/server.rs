use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, Mutex};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use fabric_core::entity::Env;
use fabric_core::envelope::msg;

use crate::allocator::IndexAllocator;
use crate::devices::{DeviceTable, ShareValidator};
use crate::reducer::{reduce, Action, ClientEvent, ReduceCtx};
use crate::state::{Client, ClientId, Clients};

// ─── RelayState ───────────────────────────────────────────────────────────

pub struct RelayConfig {
    pub env: Env,
    pub devices: DeviceTable,
    pub shares: Arc<dyn ShareValidator>,
    /// How long a failed-auth connection is kept before being closed.
    pub auth_grace: Duration,
}

struct Mutable {
    clients: Clients,
    allocator: IndexAllocator,
    handles: HashMap<ClientId, mpsc::Sender<WsMessage>>,
}

/// Shared relay state. The `clients` map and allocator are mutated only by
/// [`process_event`] while holding the single lock — the reducer contract's
/// "exclusively in the relay's event loop".
///
/// [`process_event`]: RelayState::process_event
#[derive(Clone)]
pub struct RelayState {
    config: Arc<RelayConfig>,
    mutable: Arc<Mutex<Mutable>>,
}

/// One outbound write resolved from an action.
struct Outbound {
    tx: mpsc::Sender<WsMessage>,
    text: String,
    /// Close the connection shortly after this write (failed auth).
    close_after: Option<Duration>,
}

impl RelayState {
    pub fn new(config: RelayConfig) -> Self {
        RelayState {
            config: Arc::new(config),
            mutable: Arc::new(Mutex::new(Mutable {
                clients: Clients::new(),
                allocator: IndexAllocator::new(),
                handles: HashMap::new(),
            })),
        }
    }

    async fn register(&self, client_id: &str, ip: String, tx: mpsc::Sender<WsMessage>) {
        let mut m = self.mutable.lock().await;
        m.clients.insert(
            client_id.to_string(),
            Client::connected(ip, Utc::now().timestamp_millis()),
        );
        m.handles.insert(client_id.to_string(), tx);
    }

    async fn unregister(&self, client_id: &str) {
        let mut m = self.mutable.lock().await;
        m.clients.remove(client_id);
        m.handles.remove(client_id);
    }

    /// Run one connection event through the reducer and apply its actions.
    /// State mutations happen under the lock; socket writes happen after it
    /// is released.
    pub async fn process_event(&self, client_id: &str, event: ClientEvent) {
        let outbound = {
            let mut m = self.mutable.lock().await;
            let actions = {
                let ctx = ReduceCtx {
                    clients: &m.clients,
                    devices: &self.config.devices,
                    allocator: &m.allocator,
                    shares: self.config.shares.as_ref(),
                    env: self.config.env,
                    now_ms: Utc::now().timestamp_millis(),
                };
                reduce(&ctx, client_id, event)
            };
            self.apply(&mut m, actions)
        };

        for out in outbound {
            if out.tx.send(WsMessage::Text(out.text.into())).await.is_err() {
                continue; // receiver gone; disconnect handling will follow
            }
            if let Some(grace) = out.close_after {
                let tx = out.tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(grace).await;
                    let _ = tx.send(WsMessage::Close(None)).await;
                });
            }
        }
    }

    fn apply(&self, m: &mut Mutable, actions: Vec<Action>) -> Vec<Outbound> {
        let mut outbound = Vec::new();
        for action in actions {
            match action {
                Action::Send {
                    client_id,
                    envelope,
                } => {
                    let failed_auth = envelope.kind == msg::AUTH_RESULT
                        && envelope
                            .payload
                            .as_ref()
                            .and_then(|p| p.get("success"))
                            .and_then(|s| s.as_bool())
                            == Some(false);
                    if let (Some(tx), Ok(text)) = (
                        m.handles.get(&client_id),
                        serde_json::to_string(&envelope),
                    ) {
                        outbound.push(Outbound {
                            tx: tx.clone(),
                            text,
                            close_after: failed_auth.then_some(self.config.auth_grace),
                        });
                    }
                }
                Action::Broadcast {
                    client_ids,
                    envelope,
                } => {
                    if let Ok(text) = serde_json::to_string(&envelope) {
                        for id in client_ids {
                            if let Some(tx) = m.handles.get(&id) {
                                outbound.push(Outbound {
                                    tx: tx.clone(),
                                    text: text.clone(),
                                    close_after: None,
                                });
                            }
                        }
                    }
                }
                Action::UpdateClient { client_id, update } => {
                    if let Some(client) = m.clients.get_mut(&client_id) {
                        update.apply(client);
                    }
                }
                Action::AllocateIndex { index } => {
                    if !m.allocator.allocate_exact(index) {
                        // Reducer peeked a stale snapshot; should not happen
                        // under the single lock.
                        tracing::error!(index, "client index already taken");
                    }
                }
                Action::ReleaseIndex { index } => m.allocator.release(index),
            }
        }
        outbound
    }
}

// ─── HTTP / WebSocket wiring ──────────────────────────────────────────────

/// Build the axum router: a single `/ws` upgrade endpoint.
pub fn build_router(state: RelayState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<RelayState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, addr, state))
}

async fn handle_socket(socket: WebSocket, addr: SocketAddr, state: RelayState) {
    let client_id = Uuid::new_v4().to_string();
    tracing::info!(%client_id, ip = %addr.ip(), "client connected");

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::channel::<WsMessage>(64);

    // Writer task: per-client frame order is preserved by the channel.
    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let closing = matches!(frame, WsMessage::Close(_));
            if ws_tx.send(frame).await.is_err() || closing {
                break;
            }
        }
    });

    state.register(&client_id, addr.ip().to_string(), tx.clone()).await;
    state.process_event(&client_id, ClientEvent::Connected).await;

    while let Some(frame) = ws_rx.next().await {
        match frame {
            Ok(WsMessage::Text(text)) => {
                state
                    .process_event(&client_id, ClientEvent::Frame(text.to_string()))
                    .await;
            }
            Ok(WsMessage::Ping(data)) => {
                let _ = tx.send(WsMessage::Pong(data)).await;
            }
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(%client_id, "websocket error: {e}");
                break;
            }
        }
    }

    state.process_event(&client_id, ClientEvent::Disconnected).await;
    state.unregister(&client_id).await;
    writer.abort();
    tracing::info!(%client_id, "client disconnected");
}

/// Serve the relay on a pre-bound listener. Accepting a listener lets the
/// caller read the actual port when binding port 0.
pub async fn serve_on(listener: tokio::net::TcpListener, state: RelayState) -> anyhow::Result<()> {
    let addr = listener.local_addr()?;
    tracing::info!("relay listening on ws://{addr}/ws");
    let app = build_router(state);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

pub async fn serve(port: u16, state: RelayState) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    serve_on(listener, state).await
}

// ─── Tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::StaticShares;
    use fabric_core::share::ShareStore;

    fn test_state() -> RelayState {
        RelayState::new(RelayConfig {
            env: Env::Test,
            devices: DeviceTable::builtin(),
            shares: Arc::new(StaticShares(ShareStore::default())),
            auth_grace: Duration::from_millis(10),
        })
    }

    #[tokio::test]
    async fn register_process_unregister_lifecycle() {
        let state = test_state();
        let (tx, mut rx) = mpsc::channel(8);
        state.register("c1", "127.0.0.1".into(), tx).await;
        state.process_event("c1", ClientEvent::Connected).await;

        let frame = rx.recv().await.unwrap();
        let WsMessage::Text(text) = frame else {
            panic!("expected text frame");
        };
        let v: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
        assert_eq!(v["type"], "connected");
        assert_eq!(v["payload"]["clientId"], "c1");

        state.unregister("c1").await;
        let m = state.mutable.lock().await;
        assert!(m.clients.is_empty());
        assert!(m.handles.is_empty());
    }

    #[tokio::test]
    async fn successful_app_auth_commits_allocator() {
        let state = test_state();
        let (tx, mut rx) = mpsc::channel(8);
        state.register("app", "127.0.0.1".into(), tx).await;
        let auth = serde_json::json!({
            "type": "auth",
            "payload": {"deviceType": "app"},
            "timestamp": 0,
        });
        state
            .process_event("app", ClientEvent::Frame(auth.to_string()))
            .await;

        let m = state.mutable.lock().await;
        assert_eq!(m.allocator.live_count(), 1);
        assert!(m.clients["app"].authenticated);
        drop(m);

        // auth_result then device_status, in order
        let WsMessage::Text(first) = rx.recv().await.unwrap() else {
            panic!("expected text");
        };
        let v: serde_json::Value = serde_json::from_str(first.as_str()).unwrap();
        assert_eq!(v["type"], "auth_result");
        assert_eq!(v["payload"]["success"], true);
    }

    #[tokio::test]
    async fn failed_auth_closes_after_grace() {
        let state = test_state();
        let (tx, mut rx) = mpsc::channel(8);
        state.register("v", "127.0.0.1".into(), tx).await;
        let auth = serde_json::json!({
            "type": "auth",
            "payload": {"deviceType": "viewer", "shareId": "missing00000"},
            "timestamp": 0,
        });
        state
            .process_event("v", ClientEvent::Frame(auth.to_string()))
            .await;

        let WsMessage::Text(first) = rx.recv().await.unwrap() else {
            panic!("expected text");
        };
        let v: serde_json::Value = serde_json::from_str(first.as_str()).unwrap();
        assert_eq!(v["payload"]["success"], false);

        // The grace close follows
        let close = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("close frame within grace")
            .unwrap();
        assert!(matches!(close, WsMessage::Close(_)));
    }

    #[tokio::test]
    async fn disconnect_releases_state() {
        let state = test_state();
        let (tx, _rx) = mpsc::channel(8);
        state.register("app", "127.0.0.1".into(), tx).await;
        let auth = serde_json::json!({
            "type": "auth",
            "payload": {"deviceType": "app"},
            "timestamp": 0,
        });
        state
            .process_event("app", ClientEvent::Frame(auth.to_string()))
            .await;
        state.process_event("app", ClientEvent::Disconnected).await;
        state.unregister("app").await;

        let m = state.mutable.lock().await;
        assert_eq!(m.allocator.live_count(), 0);
    }
}
