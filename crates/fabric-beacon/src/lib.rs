//! `fabric-beacon` — process-local TCP lookup service.
//!
//! Maps transient tool-invocation ids issued by the AI backend back to the
//! conversation that produced them, so out-of-band tool handlers can attach
//! side effects to the right conversation. Newline-delimited JSON over a
//! persistent TCP connection, default port 9875.
//!
//! The beacon is deliberately a pure lookup/delegation service: it shares
//! no state with the workstation object, which breaks the
//! workstation → adapter → tool handler → beacon cycle.

pub mod client;
pub mod protocol;
pub mod registry;
pub mod server;

pub use client::{BeaconClient, REQUEST_TIMEOUT};
pub use protocol::{QueryParams, Request};
pub use registry::{PylonRegistration, Registry};
pub use server::{serve, serve_on, Beacon};

// ─── Integration tests ────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use claude_adapter::{ClaudeAdapter, Message, QueryOptions, QueryStream};
    use fabric_core::entity::EntityId;

    /// Adapter that replays a fixed script of stream-json lines.
    struct ScriptedAdapter {
        lines: Vec<String>,
    }

    impl ScriptedAdapter {
        fn new(lines: &[&str]) -> Self {
            ScriptedAdapter {
                lines: lines.iter().map(|s| s.to_string()).collect(),
            }
        }
    }

    impl ClaudeAdapter for ScriptedAdapter {
        fn query(&self, _prompt: String, _opts: QueryOptions) -> QueryStream {
            let (tx, stream) = QueryStream::channel(32);
            let lines = self.lines.clone();
            tokio::spawn(async move {
                for line in lines {
                    let msg: Message = serde_json::from_str(&line).expect("script line parses");
                    if tx.send(Ok(msg)).await.is_err() {
                        break;
                    }
                }
            });
            stream
        }
    }

    const TOOL_START: &str = r#"{"type":"stream_event","session_id":"s1","event":{"type":"content_block_start","index":0,"content_block":{"type":"tool_use","id":"toolu_X","name":"Edit","input":{"file_path":"a.rs"}}}}"#;
    const RESULT: &str = r#"{"type":"result","subtype":"success","session_id":"s1","result":"ok","duration_ms":5,"is_error":false,"num_turns":1,"usage":{"input_tokens":1,"output_tokens":1}}"#;

    async fn start_beacon(adapter: Arc<dyn ClaudeAdapter>) -> (String, Arc<Beacon>) {
        let beacon = Arc::new(Beacon::new(adapter));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let serving = beacon.clone();
        tokio::spawn(async move {
            let _ = serve_on(listener, serving).await;
        });
        (addr, beacon)
    }

    fn register(pylon_id: u32, env: &str, force: bool) -> Request {
        Request::Register {
            pylon_id,
            mcp_host: "127.0.0.1".into(),
            mcp_port: 9878,
            env: env.into(),
            force,
        }
    }

    #[tokio::test]
    async fn register_duplicate_and_force_semantics() {
        let (addr, _) = start_beacon(Arc::new(ScriptedAdapter::new(&[]))).await;
        let mut client = BeaconClient::connect(&addr).await.unwrap();

        for (id, env) in [(65, "dev"), (33, "stage"), (1, "release")] {
            let reply = client.request(&register(id, env, false)).await.unwrap();
            assert_eq!(reply["success"], true, "register {id}");
        }

        let reply = client.request(&register(65, "dev", false)).await.unwrap();
        assert_eq!(reply["success"], false);
        assert!(reply["error"].as_str().unwrap().contains("already registered"));

        let reply = client.request(&register(65, "dev", true)).await.unwrap();
        assert_eq!(reply["success"], true);
    }

    #[tokio::test]
    async fn unregister_unknown_reports_not_found() {
        let (addr, _) = start_beacon(Arc::new(ScriptedAdapter::new(&[]))).await;
        let mut client = BeaconClient::connect(&addr).await.unwrap();
        let reply = client
            .request(&Request::Unregister { pylon_id: 9 })
            .await
            .unwrap();
        assert_eq!(reply["success"], false);
        assert!(reply["error"].as_str().unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn query_streams_events_and_feeds_lookup() {
        let adapter = Arc::new(ScriptedAdapter::new(&[TOOL_START, RESULT]));
        let (addr, beacon) = start_beacon(adapter).await;
        let mut client = BeaconClient::connect(&addr).await.unwrap();

        // Unknown tool use before any query
        let reply = client
            .request(&Request::Lookup {
                tool_use_id: "toolu_X".into(),
            })
            .await
            .unwrap();
        assert_eq!(reply["success"], false);

        client.request(&register(1, "release", false)).await.unwrap();

        let conversation = EntityId::conversation(1, 2, 3).unwrap().raw();
        client
            .send(&Request::Query {
                conversation_id: conversation,
                options: QueryParams {
                    prompt: "do the thing".into(),
                    ..Default::default()
                },
            })
            .await
            .unwrap();

        let first = client.next_frame().await.unwrap().unwrap();
        assert_eq!(first["type"], "event");
        assert_eq!(first["conversationId"], conversation);
        assert_eq!(first["message"]["type"], "stream_event");

        let second = client.next_frame().await.unwrap().unwrap();
        assert_eq!(second["message"]["type"], "result");

        assert_eq!(beacon.tool_count().await, 1);

        let reply = client
            .request(&Request::Lookup {
                tool_use_id: "toolu_X".into(),
            })
            .await
            .unwrap();
        assert_eq!(reply["success"], true);
        assert_eq!(reply["pylonAddress"], "127.0.0.1:9878");
        assert_eq!(reply["entityId"], conversation);
        assert_eq!(reply["raw"]["name"], "Edit");
        assert_eq!(reply["raw"]["input"]["file_path"], "a.rs");
    }

    #[tokio::test]
    async fn query_for_unregistered_pylon_fails() {
        let (addr, _) = start_beacon(Arc::new(ScriptedAdapter::new(&[RESULT]))).await;
        let mut client = BeaconClient::connect(&addr).await.unwrap();
        let conversation = EntityId::conversation(4, 1, 1).unwrap().raw();
        let reply = client
            .request(&Request::Query {
                conversation_id: conversation,
                options: QueryParams {
                    prompt: "hi".into(),
                    ..Default::default()
                },
            })
            .await
            .unwrap();
        assert_eq!(reply["success"], false);
        assert_eq!(reply["error"], "pylon not registered");
    }

    #[tokio::test]
    async fn malformed_request_line_gets_structured_error() {
        let (addr, _) = start_beacon(Arc::new(ScriptedAdapter::new(&[]))).await;
        use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
        let mut socket = tokio::net::TcpStream::connect(&addr).await.unwrap();
        socket.write_all(b"{nope\n").await.unwrap();
        let (read_half, _write_half) = socket.split();
        let mut lines = BufReader::new(read_half).lines();
        let reply: serde_json::Value =
            serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert_eq!(reply["success"], false);
        assert!(reply["error"].as_str().unwrap().contains("invalid request"));
    }
}
