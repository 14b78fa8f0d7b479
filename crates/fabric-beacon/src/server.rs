use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};

use claude_adapter::{
    ClaudeAdapter, ContentBlock, Message, QueryOptions, StreamEvent,
};
use fabric_core::entity::EntityId;
use fabric_core::toolmap::{ToolContextMap, ToolUseRaw, DEFAULT_TOOL_CONTEXT_MAX_AGE};

use crate::protocol::{error_frame, event_frame, fail, ok, QueryParams, Request};
use crate::registry::Registry;

// ─── Beacon ───────────────────────────────────────────────────────────────

/// The process-local lookup service: pylon registry + tool-context map +
/// query delegation. Purely a lookup/delegation surface — it shares no
/// state with any workstation object.
pub struct Beacon {
    registry: Mutex<Registry>,
    tools: Mutex<ToolContextMap>,
    adapter: Arc<dyn ClaudeAdapter>,
    max_age: Duration,
}

impl Beacon {
    pub fn new(adapter: Arc<dyn ClaudeAdapter>) -> Self {
        Self::with_max_age(adapter, DEFAULT_TOOL_CONTEXT_MAX_AGE)
    }

    pub fn with_max_age(adapter: Arc<dyn ClaudeAdapter>, max_age: Duration) -> Self {
        Beacon {
            registry: Mutex::new(Registry::new()),
            tools: Mutex::new(ToolContextMap::new()),
            adapter,
            max_age,
        }
    }

    /// Handle one request line, writing reply frame(s) to `out`.
    ///
    /// Frames for one connection are written in order because the caller
    /// awaits this for each line before reading the next.
    pub async fn handle_line(&self, line: &str, out: &mpsc::Sender<String>) {
        let request: Request = match serde_json::from_str(line) {
            Ok(r) => r,
            Err(e) => {
                let _ = out.send(fail(format!("invalid request: {e}")).to_string()).await;
                return;
            }
        };
        self.handle(request, out).await;
    }

    pub async fn handle(&self, request: Request, out: &mpsc::Sender<String>) {
        match request {
            Request::Register {
                pylon_id,
                mcp_host,
                mcp_port,
                env,
                force,
            } => {
                let result = self
                    .registry
                    .lock()
                    .await
                    .register(pylon_id, mcp_host, mcp_port, env, force);
                let frame = match result {
                    Ok(()) => ok(),
                    Err(e) => fail(e.to_string()),
                };
                let _ = out.send(frame.to_string()).await;
            }
            Request::Unregister { pylon_id } => {
                let frame = match self.registry.lock().await.unregister(pylon_id) {
                    Ok(()) => ok(),
                    Err(e) => fail(e.to_string()),
                };
                let _ = out.send(frame.to_string()).await;
            }
            Request::Lookup { tool_use_id } => {
                let frame = self.lookup(&tool_use_id).await;
                let _ = out.send(frame.to_string()).await;
            }
            Request::Query {
                conversation_id,
                options,
            } => {
                self.query(conversation_id, options, out).await;
            }
            Request::Cleanup => {
                let dropped = self.tools.lock().await.cleanup(self.max_age);
                let _ = out
                    .send(serde_json::json!({ "success": true, "dropped": dropped }).to_string())
                    .await;
            }
        }
    }

    async fn lookup(&self, tool_use_id: &str) -> serde_json::Value {
        let tools = self.tools.lock().await;
        let Some(ctx) = tools.get(tool_use_id) else {
            return fail(format!("tool use {tool_use_id} not found"));
        };
        let registry = self.registry.lock().await;
        let Some(registration) = registry.get(ctx.entity_id.pylon_id()) else {
            return fail("pylon not registered");
        };
        serde_json::json!({
            "success": true,
            "pylonAddress": registration.address(),
            "entityId": ctx.entity_id.raw(),
            "raw": ctx.raw,
        })
    }

    /// Delegate a query to the adapter and stream each backend message back
    /// as an event frame. Tool-use starts are recorded en route so later
    /// lookups resolve. Adapter failures become error frames, not
    /// connection teardown.
    async fn query(&self, conversation_id: u32, options: QueryParams, out: &mpsc::Sender<String>) {
        let entity = match EntityId::from_raw(conversation_id) {
            Ok(e) => e,
            Err(e) => {
                let _ = out.send(fail(e.to_string()).to_string()).await;
                return;
            }
        };
        if self.registry.lock().await.get(entity.pylon_id()).is_none() {
            let _ = out.send(fail("pylon not registered").to_string()).await;
            return;
        }

        let mut opts = QueryOptions::new();
        opts.cwd = options.cwd.map(Into::into);
        opts.resume = options.resume;
        opts.system_prompt = options.system_prompt;

        let mut stream = self.adapter.query(options.prompt, opts);
        while let Some(item) = stream.next().await {
            match item {
                Ok(message) => {
                    self.record_tool_use(entity, &message).await;
                    let _ = out
                        .send(event_frame(conversation_id, &message).to_string())
                        .await;
                }
                Err(e) => {
                    let _ = out.send(error_frame(e.to_string()).to_string()).await;
                    return;
                }
            }
        }
    }

    async fn record_tool_use(&self, entity: EntityId, message: &Message) {
        let Message::StreamEvent(ev) = message else {
            return;
        };
        let StreamEvent::ContentBlockStart {
            content_block: ContentBlock::ToolUse { id, name, input },
            ..
        } = &ev.event
        else {
            return;
        };
        self.tools.lock().await.insert(
            id.clone(),
            entity,
            ToolUseRaw {
                kind: "tool_use".into(),
                id: id.clone(),
                name: name.clone(),
                input: input.clone(),
            },
        );
    }

    /// Test/introspection hook: number of known tool contexts.
    pub async fn tool_count(&self) -> usize {
        self.tools.lock().await.len()
    }
}

// ─── TCP accept loop ──────────────────────────────────────────────────────

/// Serve the beacon on a pre-bound listener. Each connection gets its own
/// task; frames within a connection are serialised.
pub async fn serve_on(listener: TcpListener, beacon: Arc<Beacon>) -> anyhow::Result<()> {
    let addr = listener.local_addr()?;
    tracing::info!("beacon listening on {addr}");
    loop {
        let (socket, peer) = listener.accept().await?;
        let beacon = beacon.clone();
        tokio::spawn(async move {
            tracing::debug!(%peer, "beacon connection opened");
            if let Err(e) = handle_connection(socket, beacon).await {
                tracing::debug!(%peer, "beacon connection error: {e}");
            }
        });
    }
}

pub async fn serve(port: u16, beacon: Arc<Beacon>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("127.0.0.1", port)).await?;
    serve_on(listener, beacon).await
}

async fn handle_connection(socket: TcpStream, beacon: Arc<Beacon>) -> std::io::Result<()> {
    let (read_half, mut write_half) = socket.into_split();
    let (tx, mut rx) = mpsc::channel::<String>(64);

    let writer = tokio::spawn(async move {
        while let Some(mut frame) = rx.recv().await {
            frame.push('\n');
            if write_half.write_all(frame.as_bytes()).await.is_err() {
                break;
            }
        }
    });

    let mut lines = BufReader::new(read_half).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        beacon.handle_line(line.trim(), &tx).await;
    }

    drop(tx);
    let _ = writer.await;
    Ok(())
}
