use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use fabric_core::entity::DeviceType;
use fabric_core::envelope::{msg, Broadcast, DeviceInfo, Envelope};
use fabric_core::error::{FabricError, Result};
use fabric_core::payload::{
    parse_payload, BlobChunkPayload, BlobEndPayload, BlobRequestPayload, BlobStartPayload,
    ClaudeAnswerPayload, ClaudeControlPayload, ClaudePermissionPayload, ClaudeSendPayload,
    ClientDisconnectPayload, ControlAction, SetPermissionModePayload,
};

use crate::blob::BlobManager;
use crate::engine::Pylon;
use crate::events::PylonEvent;

const PING_INTERVAL: Duration = Duration::from_secs(30);
const RECONNECT_MIN: Duration = Duration::from_secs(1);
const RECONNECT_MAX: Duration = Duration::from_secs(30);

// ─── Beacon registration ──────────────────────────────────────────────────

/// Announce this pylon to the local beacon so tool handlers can resolve
/// tool-use ids. `force` because a restart supersedes any stale entry.
pub async fn register_with_beacon(pylon: &Pylon) -> Result<()> {
    let config = pylon.config();
    let mut client = fabric_beacon::BeaconClient::connect(&config.beacon_addr).await?;
    let reply = client
        .request(&fabric_beacon::Request::Register {
            pylon_id: config.pylon_id,
            mcp_host: "127.0.0.1".into(),
            mcp_port: config.env.mcp_port(),
            env: config.env.as_str().into(),
            force: true,
        })
        .await?;
    if reply.get("success").and_then(|s| s.as_bool()) != Some(true) {
        let error = reply
            .get("error")
            .and_then(|e| e.as_str())
            .unwrap_or("unknown error");
        return Err(FabricError::Internal(format!(
            "beacon registration failed: {error}"
        )));
    }
    Ok(())
}

// ─── Uplink ───────────────────────────────────────────────────────────────

/// Maintain the workstation's single upstream connection to the relay.
/// Reconnects with backoff; each (re)connection reinitialises — there is no
/// delivery guarantee across relay restarts.
pub async fn run(pylon: Pylon, blobs: Arc<BlobManager>) -> anyhow::Result<()> {
    let mut backoff = RECONNECT_MIN;
    loop {
        match run_once(&pylon, &blobs).await {
            Ok(()) => {
                tracing::info!("relay connection closed; reconnecting");
                backoff = RECONNECT_MIN;
            }
            Err(e) => {
                tracing::warn!("relay connection failed: {e}; retrying in {backoff:?}");
            }
        }
        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(RECONNECT_MAX);
    }
}

async fn run_once(pylon: &Pylon, blobs: &Arc<BlobManager>) -> anyhow::Result<()> {
    let url = pylon.config().relay_url.clone();
    let (ws, _) = connect_async(&url).await?;
    tracing::info!("connected to relay at {url}");
    let (mut sink, mut stream) = ws.split();

    let (tx, mut rx) = mpsc::channel::<String>(256);
    let writer = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if sink.send(WsMessage::Text(text)).await.is_err() {
                break;
            }
        }
    });

    // Authenticate as this pylon.
    let auth = Envelope::new(
        msg::AUTH,
        serde_json::json!({
            "deviceId": pylon.config().pylon_id,
            "deviceType": "pylon",
            "name": format!("pylon-{}", pylon.config().pylon_id),
        }),
    );
    tx.send(serde_json::to_string(&auth)?).await?;

    // Republish engine events to the fabric.
    let mut events = pylon.subscribe();
    let event_tx = tx.clone();
    let forwarder = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    let Ok(text) = serde_json::to_string(&event_envelope(&event)) else {
                        continue;
                    };
                    if event_tx.send(text).await.is_err() {
                        break;
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!("event forwarder lagged; dropped {missed} events");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    // Keepalive.
    let ping_tx = tx.clone();
    let pinger = tokio::spawn(async move {
        let mut interval = tokio::time::interval(PING_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            let Ok(text) = serde_json::to_string(&Envelope::bare(msg::PING)) else {
                continue;
            };
            if ping_tx.send(text).await.is_err() {
                break;
            }
        }
    });

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(WsMessage::Text(text)) => {
                if let Ok(envelope) = serde_json::from_str::<Envelope>(&text) {
                    dispatch(pylon, blobs, &tx, envelope).await;
                }
            }
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!("relay read error: {e}");
                break;
            }
        }
    }

    forwarder.abort();
    pinger.abort();
    writer.abort();
    Ok(())
}

fn event_envelope(event: &PylonEvent) -> Envelope {
    let payload = serde_json::to_value(event).unwrap_or_default();
    let envelope = Envelope::new("pylon_event", payload);
    match event.conversation_id() {
        // Conversation-scoped events go to everyone; viewers are filtered
        // by the relay on payload.conversationId.
        Some(_) => envelope.broadcast(Broadcast::All),
        None => envelope.broadcast(Broadcast::Apps),
    }
}

// ─── Inbound dispatch ─────────────────────────────────────────────────────

async fn dispatch(
    pylon: &Pylon,
    blobs: &Arc<BlobManager>,
    tx: &mpsc::Sender<String>,
    envelope: Envelope,
) {
    let sender = envelope.from.clone();
    let result = handle(pylon, blobs, tx, &envelope).await;
    if let Err(e) = result {
        tracing::debug!(kind = %envelope.kind, "request failed: {e}");
        reply_error(tx, sender.as_ref(), &e).await;
    }
}

async fn handle(
    pylon: &Pylon,
    blobs: &Arc<BlobManager>,
    tx: &mpsc::Sender<String>,
    envelope: &Envelope,
) -> Result<()> {
    match envelope.kind.as_str() {
        msg::CONNECTED | msg::AUTH_RESULT | msg::PONG | msg::DEVICE_STATUS => Ok(()),

        msg::CLAUDE_SEND => {
            let payload: ClaudeSendPayload = parse_payload(envelope)?;
            pylon.send(payload).await
        }
        msg::CLAUDE_PERMISSION => {
            let payload: ClaudePermissionPayload = parse_payload(envelope)?;
            pylon.answer_permission(payload).await
        }
        msg::CLAUDE_ANSWER => {
            let payload: ClaudeAnswerPayload = parse_payload(envelope)?;
            pylon.answer_question(payload).await
        }
        msg::CLAUDE_CONTROL => {
            let payload: ClaudeControlPayload = parse_payload(envelope)?;
            let id = payload.conversation_id;
            match payload.action {
                ControlAction::Stop => pylon.stop(id).await,
                ControlAction::NewSession => pylon.new_session(id).await,
                ControlAction::Clear => pylon.clear(id).await,
                ControlAction::Compact => pylon.compact(id).await,
            }
        }
        msg::SET_PERMISSION_MODE => {
            let payload: SetPermissionModePayload = parse_payload(envelope)?;
            pylon.set_permission_mode(payload).await
        }

        msg::BLOB_START => {
            let payload: BlobStartPayload = parse_payload(envelope)?;
            let from = envelope.from.as_ref().map(|f| f.device_id);
            if let Some(done) = blobs.start(&payload, from).await? {
                pylon.record_attachment(done).await?;
            }
            Ok(())
        }
        msg::BLOB_CHUNK => {
            let payload: BlobChunkPayload = parse_payload(envelope)?;
            blobs.chunk(&payload).await
        }
        msg::BLOB_END => {
            let payload: BlobEndPayload = parse_payload(envelope)?;
            let done = blobs.end(&payload).await?;
            pylon.record_attachment(done).await
        }
        msg::BLOB_REQUEST => {
            let payload: BlobRequestPayload = parse_payload(envelope)?;
            let requester = envelope
                .from
                .as_ref()
                .map(|f| f.device_id)
                .ok_or_else(|| FabricError::Validation("blob_request without sender".into()))?;
            let conversation = envelope
                .payload_conversation_id()
                .ok_or_else(|| {
                    FabricError::Validation("blob_request without conversationId".into())
                })
                .and_then(fabric_core::entity::EntityId::from_raw)?;
            let context = fabric_core::payload::BlobContext {
                kind: "file".into(),
                conversation_id: conversation,
            };
            let blob = blobs.request(&payload, context).await?;
            send_to(tx, requester, msg::BLOB_START, serde_json::to_value(&blob.start)?).await;
            for chunk in &blob.chunks {
                send_to(tx, requester, msg::BLOB_CHUNK, serde_json::to_value(chunk)?).await;
            }
            send_to(tx, requester, msg::BLOB_END, serde_json::to_value(&blob.end)?).await;
            Ok(())
        }

        msg::CLIENT_DISCONNECT => {
            let payload: ClientDisconnectPayload = parse_payload(envelope)?;
            if payload.device_type != DeviceType::Pylon {
                let dropped = blobs.discard_from(payload.device_id).await;
                if dropped > 0 {
                    tracing::debug!(
                        device = %payload.device_id,
                        "discarded {dropped} unfinished transfers"
                    );
                }
            }
            Ok(())
        }

        "get_state" => {
            let snapshot = pylon.snapshot().await;
            let requester = envelope.from.as_ref().map(|f| f.device_id);
            if let Some(requester) = requester {
                send_to(tx, requester, "state", serde_json::to_value(&snapshot)?).await;
            }
            Ok(())
        }

        other => {
            tracing::trace!("ignoring frame type '{other}'");
            Ok(())
        }
    }
}

async fn send_to(
    tx: &mpsc::Sender<String>,
    target: fabric_core::entity::DeviceId,
    kind: &str,
    payload: serde_json::Value,
) {
    let envelope = Envelope::new(kind, payload).to(vec![target]);
    if let Ok(text) = serde_json::to_string(&envelope) {
        let _ = tx.send(text).await;
    }
}

async fn reply_error(tx: &mpsc::Sender<String>, sender: Option<&DeviceInfo>, error: &FabricError) {
    let Some(sender) = sender else { return };
    let envelope = Envelope::new(msg::ERROR, error.to_reply()).to(vec![sender.device_id]);
    if let Ok(text) = serde_json::to_string(&envelope) {
        let _ = tx.send(text).await;
    }
}
