//! Engine tests driven through a scripted mock adapter. The mock captures
//! each query's options so tests can invoke the `can_use_tool` callback
//! exactly as the backend would.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::broadcast;

use claude_adapter::{
    ClaudeAdapter, Message, PermissionResult, QueryOptions, QueryStream, ToolUseRequest,
};
use fabric_core::entity::{EntityId, Env};
use fabric_core::error::FabricError;
use fabric_core::log::LogKind;
use fabric_core::payload::{
    ClaudeAnswerPayload, ClaudePermissionPayload, ClaudeSendPayload, PermissionDecisionKind,
    SetPermissionModePayload,
};
use fabric_core::permission::PermissionMode;
use fabric_core::workspace::{ConversationStatus, PendingRequest};

use crate::config::PylonConfig;
use crate::engine::Pylon;
use crate::events::PylonEvent;
use crate::fs::StdFileSystem;
use crate::persist::MemoryPersistence;

// ─── Mock adapter ─────────────────────────────────────────────────────────

struct Script {
    messages: Vec<claude_adapter::Result<Message>>,
    /// Keep the stream open after the script until cancellation.
    hang: bool,
}

impl Script {
    fn of(lines: &[&str]) -> Self {
        Script {
            messages: lines
                .iter()
                .map(|l| Ok(serde_json::from_str(l).expect("script line parses")))
                .collect(),
            hang: false,
        }
    }

    fn hanging(lines: &[&str]) -> Self {
        Script {
            hang: true,
            ..Script::of(lines)
        }
    }

    fn erroring(lines: &[&str], error: &str) -> Self {
        let mut script = Script::of(lines);
        script
            .messages
            .push(Err(claude_adapter::AdapterError::Process(error.into())));
        script
    }
}

#[derive(Default)]
struct MockAdapter {
    scripts: Mutex<VecDeque<Script>>,
    captured: Mutex<Vec<QueryOptions>>,
}

impl MockAdapter {
    fn new(scripts: Vec<Script>) -> Arc<Self> {
        Arc::new(MockAdapter {
            scripts: Mutex::new(scripts.into()),
            captured: Mutex::new(Vec::new()),
        })
    }

    fn callback(&self) -> claude_adapter::CanUseToolFn {
        self.captured
            .lock()
            .unwrap()
            .last()
            .expect("a query was started")
            .can_use_tool
            .clone()
            .expect("can_use_tool configured")
    }
}

impl ClaudeAdapter for MockAdapter {
    fn query(&self, _prompt: String, opts: QueryOptions) -> QueryStream {
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Script { messages: vec![], hang: false });
        let cancel = opts.cancel.clone();
        self.captured.lock().unwrap().push(opts);

        let (tx, stream) = QueryStream::channel(64);
        tokio::spawn(async move {
            for msg in script.messages {
                if tx.send(msg).await.is_err() {
                    return;
                }
            }
            if script.hang {
                cancel.cancelled().await;
            }
            // tx drops here; the stream ends.
        });
        stream
    }
}

// ─── Fixtures ─────────────────────────────────────────────────────────────

const INIT: &str = r#"{"type":"system","subtype":"init","session_id":"sess-1","model":"m","tools":[],"permissionMode":"default","cwd":"/tmp"}"#;
const DELTA_HEL: &str = r#"{"type":"stream_event","session_id":"sess-1","event":{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hel"}}}"#;
const DELTA_LO: &str = r#"{"type":"stream_event","session_id":"sess-1","event":{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"lo"}}}"#;
const ASSISTANT_FINAL: &str = r#"{"type":"assistant","session_id":"sess-1","message":{"role":"assistant","content":[],"usage":{"input_tokens":100,"output_tokens":40,"cache_read_input_tokens":7}}}"#;
const TOOL_START: &str = r#"{"type":"stream_event","session_id":"sess-1","event":{"type":"content_block_start","index":1,"content_block":{"type":"tool_use","id":"toolu_01","name":"Edit","input":{"file_path":"src/main.ts"}}}}"#;
const TOOL_RESULT: &str = r#"{"type":"user","session_id":"sess-1","message":{"role":"user","content":[{"type":"tool_result","tool_use_id":"toolu_01","is_error":false}]}}"#;
const COMPACTING: &str = r#"{"type":"system","subtype":"status","session_id":"sess-1","status":"compacting"}"#;
const COMPACT_BOUNDARY: &str = r#"{"type":"system","subtype":"compact_boundary","session_id":"sess-1","compact_metadata":{"trigger":"auto","pre_tokens":168833}}"#;
const RESULT: &str = r#"{"type":"result","subtype":"success","session_id":"sess-1","result":"done","duration_ms":1200,"is_error":false,"num_turns":2,"usage":{"input_tokens":50,"output_tokens":20,"cache_read_input_tokens":3}}"#;

async fn setup(scripts: Vec<Script>) -> (Pylon, EntityId, Arc<MockAdapter>) {
    let adapter = MockAdapter::new(scripts);
    let dir = std::env::temp_dir().join(format!("fabric-test-{}", uuid::Uuid::new_v4()));
    let pylon = Pylon::new(
        PylonConfig::new(1, Env::Test, dir),
        adapter.clone(),
        Arc::new(MemoryPersistence::new()),
        Arc::new(StdFileSystem),
    )
    .unwrap();
    let ws = pylon.create_workspace("main", "/tmp/proj").await.unwrap();
    let conv = pylon.create_conversation(ws, "chat").await.unwrap();
    (pylon, conv, adapter)
}

fn send_payload(conv: EntityId, message: &str) -> ClaudeSendPayload {
    ClaudeSendPayload {
        conversation_id: conv,
        message: message.into(),
        attachments: None,
    }
}

async fn wait_for<F>(rx: &mut broadcast::Receiver<PylonEvent>, pred: F) -> PylonEvent
where
    F: Fn(&PylonEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let ev = rx.recv().await.expect("event bus open");
            if pred(&ev) {
                return ev;
            }
        }
    })
    .await
    .expect("expected event within timeout")
}

async fn wait_idle(rx: &mut broadcast::Receiver<PylonEvent>, conv: EntityId) {
    wait_for(rx, |ev| {
        matches!(
            ev,
            PylonEvent::StatusChange { conversation_id, status: ConversationStatus::Idle }
                if *conversation_id == conv
        )
    })
    .await;
}

// ─── Streaming translation ────────────────────────────────────────────────

#[tokio::test]
async fn full_turn_finalises_deltas_and_result() {
    let (pylon, conv, _) = setup(vec![Script::of(&[
        INIT,
        DELTA_HEL,
        DELTA_LO,
        ASSISTANT_FINAL,
        RESULT,
    ])])
    .await;
    let mut rx = pylon.subscribe();
    pylon.send(send_payload(conv, "say hello")).await.unwrap();
    wait_idle(&mut rx, conv).await;

    let store = pylon.snapshot().await;
    let c = store.conversation(conv).unwrap();
    assert_eq!(c.status, ConversationStatus::Idle);
    assert!(c.text_buffer.is_empty());
    assert_eq!(c.sdk_session_id.as_deref(), Some("sess-1"));

    // user text, assistant "Hello" (delta concatenation), result
    assert_eq!(c.log.len(), 3);
    assert!(matches!(&c.log[0].kind, LogKind::Text { text } if text == "say hello"));
    assert!(matches!(&c.log[1].kind, LogKind::Text { text } if text == "Hello"));
    assert!(matches!(
        &c.log[2].kind,
        LogKind::Result { duration_ms: 1200, cache_read_tokens: 3, .. }
    ));

    // realtime usage accumulated from assistant + result
    assert_eq!(c.realtime_usage.input_tokens, 150);
    assert_eq!(c.realtime_usage.output_tokens, 60);
    assert_eq!(c.realtime_usage.cache_read_tokens, 10);
}

#[tokio::test]
async fn tool_start_precedes_tool_complete() {
    let (pylon, conv, _) = setup(vec![Script::of(&[INIT, TOOL_START, TOOL_RESULT, RESULT])]).await;
    let mut rx = pylon.subscribe();
    pylon.send(send_payload(conv, "edit it")).await.unwrap();
    wait_idle(&mut rx, conv).await;

    let store = pylon.snapshot().await;
    let c = store.conversation(conv).unwrap();
    let start = c
        .log
        .iter()
        .position(|e| matches!(&e.kind, LogKind::ToolStart { tool_use_id, .. } if tool_use_id == "toolu_01"));
    let complete = c
        .log
        .iter()
        .position(|e| matches!(&e.kind, LogKind::ToolComplete { tool_use_id, .. } if tool_use_id == "toolu_01"));
    assert!(start.unwrap() < complete.unwrap());

    // The tool-context map learned the invocation.
    let tools = pylon.shared.tools.lock().await;
    let ctx = tools.get("toolu_01").unwrap();
    assert_eq!(ctx.entity_id, conv);
    assert_eq!(ctx.raw.name, "Edit");
}

#[tokio::test]
async fn compact_sequence_emits_start_then_complete() {
    let (pylon, conv, _) =
        setup(vec![Script::of(&[INIT, COMPACTING, COMPACT_BOUNDARY, RESULT])]).await;
    let mut rx = pylon.subscribe();
    pylon.send(send_payload(conv, "anything")).await.unwrap();

    let start = wait_for(&mut rx, |ev| {
        matches!(ev, PylonEvent::CompactStart { .. } | PylonEvent::CompactComplete { .. })
    })
    .await;
    assert!(matches!(start, PylonEvent::CompactStart { .. }));

    let complete = wait_for(&mut rx, |ev| {
        matches!(ev, PylonEvent::CompactComplete { .. })
    })
    .await;
    match complete {
        PylonEvent::CompactComplete {
            pre_tokens,
            trigger,
            ..
        } => {
            assert_eq!(pre_tokens, Some(168833));
            assert_eq!(trigger.as_deref(), Some("auto"));
        }
        other => panic!("expected compact complete, got {other:?}"),
    }
    wait_idle(&mut rx, conv).await;
}

#[tokio::test]
async fn compact_boundary_without_metadata_surfaces_absent_fields() {
    let bare = r#"{"type":"system","subtype":"compact_boundary","session_id":"sess-1"}"#;
    let (pylon, conv, _) = setup(vec![Script::of(&[INIT, bare, RESULT])]).await;
    let mut rx = pylon.subscribe();
    pylon.send(send_payload(conv, "x")).await.unwrap();
    let complete = wait_for(&mut rx, |ev| {
        matches!(ev, PylonEvent::CompactComplete { .. })
    })
    .await;
    if let PylonEvent::CompactComplete {
        pre_tokens,
        trigger,
        ..
    } = complete
    {
        assert_eq!(pre_tokens, None);
        assert_eq!(trigger, None);
    }
}

#[tokio::test]
async fn adapter_error_appends_error_entry_and_idles() {
    let (pylon, conv, _) = setup(vec![Script::erroring(&[INIT], "backend exploded")]).await;
    let mut rx = pylon.subscribe();
    pylon.send(send_payload(conv, "x")).await.unwrap();
    wait_for(&mut rx, |ev| matches!(ev, PylonEvent::QueryError { .. })).await;
    wait_idle(&mut rx, conv).await;

    let store = pylon.snapshot().await;
    let c = store.conversation(conv).unwrap();
    assert!(c
        .log
        .iter()
        .any(|e| matches!(&e.kind, LogKind::Error { message } if message.contains("backend exploded"))));
    assert_eq!(c.status, ConversationStatus::Idle);
}

// ─── Permission flow ──────────────────────────────────────────────────────

#[tokio::test]
async fn ask_then_allow_round_trip() {
    let (pylon, conv, adapter) = setup(vec![Script::hanging(&[INIT])]).await;
    let mut rx = pylon.subscribe();
    pylon.send(send_payload(conv, "edit main")).await.unwrap();

    let cb = adapter.callback();
    let decision = tokio::spawn(cb(ToolUseRequest {
        tool_name: "Edit".into(),
        input: serde_json::json!({"file_path": "src/main.ts"}),
        tool_use_id: Some("toolu_01".into()),
    }));

    // The pending request appears and status flips to permission.
    wait_for(&mut rx, |ev| {
        matches!(ev, PylonEvent::PermissionRequested { .. })
    })
    .await;
    let store = pylon.snapshot().await;
    let c = store.conversation(conv).unwrap();
    assert_eq!(c.status, ConversationStatus::Permission);
    match c.pending_request("toolu_01").unwrap() {
        PendingRequest::Permission { tool_name, .. } => assert_eq!(tool_name, "Edit"),
        other => panic!("expected permission request, got {other:?}"),
    }

    pylon
        .answer_permission(ClaudePermissionPayload {
            conversation_id: conv,
            tool_use_id: "toolu_01".into(),
            decision: PermissionDecisionKind::Allow,
        })
        .await
        .unwrap();

    let result = decision.await.unwrap();
    assert_eq!(result, PermissionResult::Allow { updated_input: None });

    // Request removed, status back to working.
    wait_for(&mut rx, |ev| {
        matches!(
            ev,
            PylonEvent::StatusChange { status: ConversationStatus::Working, .. }
        )
    })
    .await;
    let store = pylon.snapshot().await;
    let c = store.conversation(conv).unwrap();
    assert!(c.pending.is_empty());
    assert_eq!(c.status, ConversationStatus::Working);

    pylon.stop(conv).await.unwrap();
    wait_idle(&mut rx, conv).await;
}

#[tokio::test]
async fn auto_deny_never_creates_a_pending_request() {
    let (pylon, conv, adapter) = setup(vec![Script::hanging(&[INIT])]).await;
    pylon.send(send_payload(conv, "write env")).await.unwrap();

    let cb = adapter.callback();
    let result = cb(ToolUseRequest {
        tool_name: "Write".into(),
        input: serde_json::json!({"file_path": ".env.local"}),
        tool_use_id: Some("toolu_02".into()),
    })
    .await;
    match result {
        PermissionResult::Deny { message } => assert!(message.contains("Protected file")),
        other => panic!("expected deny, got {other:?}"),
    }

    let store = pylon.snapshot().await;
    assert!(store.conversation(conv).unwrap().pending.is_empty());
    pylon.stop(conv).await.unwrap();
}

#[tokio::test]
async fn allow_all_raises_mode_to_accept_edits() {
    let (pylon, conv, adapter) = setup(vec![Script::hanging(&[INIT])]).await;
    let mut rx = pylon.subscribe();
    pylon.send(send_payload(conv, "edit")).await.unwrap();

    let cb = adapter.callback();
    let decision = tokio::spawn(cb(ToolUseRequest {
        tool_name: "Edit".into(),
        input: serde_json::json!({"file_path": "src/lib.rs"}),
        tool_use_id: Some("toolu_03".into()),
    }));
    wait_for(&mut rx, |ev| {
        matches!(ev, PylonEvent::PermissionRequested { .. })
    })
    .await;

    pylon
        .answer_permission(ClaudePermissionPayload {
            conversation_id: conv,
            tool_use_id: "toolu_03".into(),
            decision: PermissionDecisionKind::AllowAll,
        })
        .await
        .unwrap();
    assert!(matches!(
        decision.await.unwrap(),
        PermissionResult::Allow { .. }
    ));

    let store = pylon.snapshot().await;
    assert_eq!(
        store.conversation(conv).unwrap().permission_mode,
        PermissionMode::AcceptEdits
    );

    // Subsequent edits are auto-allowed without a prompt.
    let cb = adapter.callback();
    let result = cb(ToolUseRequest {
        tool_name: "Write".into(),
        input: serde_json::json!({"file_path": "src/other.rs"}),
        tool_use_id: Some("toolu_04".into()),
    })
    .await;
    assert_eq!(result, PermissionResult::Allow { updated_input: None });

    pylon.stop(conv).await.unwrap();
}

#[tokio::test]
async fn question_flow_resolves_with_answer() {
    let (pylon, conv, adapter) = setup(vec![Script::hanging(&[INIT])]).await;
    let mut rx = pylon.subscribe();
    pylon.send(send_payload(conv, "ask me")).await.unwrap();

    let cb = adapter.callback();
    let decision = tokio::spawn(cb(ToolUseRequest {
        tool_name: "AskUserQuestion".into(),
        input: serde_json::json!({"questions": [{"question": "Deploy?", "options": ["yes", "no"]}]}),
        tool_use_id: Some("toolu_q1".into()),
    }));

    let requested = wait_for(&mut rx, |ev| {
        matches!(ev, PylonEvent::QuestionRequested { .. })
    })
    .await;
    if let PylonEvent::QuestionRequested { request, .. } = requested {
        match request {
            PendingRequest::Question { questions, .. } => {
                assert_eq!(questions[0].question, "Deploy?");
                assert_eq!(questions[0].options, vec!["yes", "no"]);
            }
            other => panic!("expected question, got {other:?}"),
        }
    }

    let answer = serde_json::json!({"Deploy?": "yes"});
    pylon
        .answer_question(ClaudeAnswerPayload {
            conversation_id: conv,
            tool_use_id: "toolu_q1".into(),
            answer: answer.clone(),
        })
        .await
        .unwrap();

    assert_eq!(
        decision.await.unwrap(),
        PermissionResult::Allow {
            updated_input: Some(answer)
        }
    );

    let store = pylon.snapshot().await;
    assert!(store
        .conversation(conv)
        .unwrap()
        .log
        .iter()
        .any(|e| matches!(&e.kind, LogKind::UserResponse { tool_use_id, .. } if tool_use_id == "toolu_q1")));

    pylon.stop(conv).await.unwrap();
}

#[tokio::test]
async fn mode_change_takes_effect_on_next_check() {
    let (pylon, conv, adapter) = setup(vec![Script::hanging(&[INIT])]).await;
    pylon.send(send_payload(conv, "x")).await.unwrap();

    pylon
        .set_permission_mode(SetPermissionModePayload {
            conversation_id: conv,
            mode: PermissionMode::AcceptEdits,
        })
        .await
        .unwrap();

    let cb = adapter.callback();
    let result = cb(ToolUseRequest {
        tool_name: "Bash".into(),
        input: serde_json::json!({"command": "cargo test"}),
        tool_use_id: None,
    })
    .await;
    assert_eq!(result, PermissionResult::Allow { updated_input: None });
    pylon.stop(conv).await.unwrap();
}

// ─── Controls & lifecycle ─────────────────────────────────────────────────

#[tokio::test]
async fn second_send_while_working_is_conflict() {
    let (pylon, conv, _) = setup(vec![Script::hanging(&[INIT])]).await;
    pylon.send(send_payload(conv, "one")).await.unwrap();
    let err = pylon.send(send_payload(conv, "two")).await.unwrap_err();
    assert!(matches!(err, FabricError::Conflict(_)));
    pylon.stop(conv).await.unwrap();
}

#[tokio::test]
async fn stop_mid_stream_appends_aborted() {
    let (pylon, conv, _) = setup(vec![Script::hanging(&[INIT, DELTA_HEL])]).await;
    let mut rx = pylon.subscribe();
    pylon.send(send_payload(conv, "x")).await.unwrap();
    wait_for(&mut rx, |ev| matches!(ev, PylonEvent::TextDelta { .. })).await;

    pylon.stop(conv).await.unwrap();
    wait_for(&mut rx, |ev| matches!(ev, PylonEvent::Aborted { .. })).await;

    let store = pylon.snapshot().await;
    let c = store.conversation(conv).unwrap();
    assert!(matches!(c.log.last().unwrap().kind, LogKind::Aborted));
    assert_eq!(c.status, ConversationStatus::Idle);
    assert!(c.text_buffer.is_empty());
}

#[tokio::test]
async fn new_session_clears_coupling_and_keeps_log() {
    let (pylon, conv, _) = setup(vec![Script::of(&[INIT, ASSISTANT_FINAL, RESULT])]).await;
    let mut rx = pylon.subscribe();
    pylon.send(send_payload(conv, "hello")).await.unwrap();
    wait_idle(&mut rx, conv).await;

    pylon.new_session(conv).await.unwrap();
    let store = pylon.snapshot().await;
    let c = store.conversation(conv).unwrap();
    assert_eq!(c.sdk_session_id, None);
    assert!(!c.log.is_empty());

    pylon.clear(conv).await.unwrap();
    let store = pylon.snapshot().await;
    assert!(store.conversation(conv).unwrap().log.is_empty());
}

#[tokio::test]
async fn next_send_after_new_session_does_not_resume() {
    let (pylon, conv, adapter) = setup(vec![
        Script::of(&[INIT, RESULT]),
        Script::of(&[INIT, RESULT]),
    ])
    .await;
    let mut rx = pylon.subscribe();
    pylon.send(send_payload(conv, "first")).await.unwrap();
    wait_idle(&mut rx, conv).await;
    pylon.new_session(conv).await.unwrap();
    pylon.send(send_payload(conv, "second")).await.unwrap();
    wait_idle(&mut rx, conv).await;

    let captured = adapter.captured.lock().unwrap();
    assert_eq!(captured.len(), 2);
    assert_eq!(captured[0].resume, None);
    assert_eq!(captured[1].resume, None); // session was cleared
}

#[tokio::test]
async fn send_after_result_resumes_session() {
    let (pylon, conv, adapter) = setup(vec![
        Script::of(&[INIT, RESULT]),
        Script::of(&[INIT, RESULT]),
    ])
    .await;
    let mut rx = pylon.subscribe();
    pylon.send(send_payload(conv, "first")).await.unwrap();
    wait_idle(&mut rx, conv).await;
    pylon.send(send_payload(conv, "second")).await.unwrap();
    wait_idle(&mut rx, conv).await;

    let captured = adapter.captured.lock().unwrap();
    assert_eq!(captured[1].resume.as_deref(), Some("sess-1"));
}

#[tokio::test]
async fn compact_requires_an_existing_session() {
    let (pylon, conv, _) = setup(vec![]).await;
    let err = pylon.compact(conv).await.unwrap_err();
    assert!(matches!(err, FabricError::Validation(_)));
}

#[tokio::test]
async fn compact_resumes_with_control_prompt() {
    let (pylon, conv, adapter) = setup(vec![
        Script::of(&[INIT, RESULT]),
        Script::of(&[INIT, COMPACTING, COMPACT_BOUNDARY, RESULT]),
    ])
    .await;
    let mut rx = pylon.subscribe();
    pylon.send(send_payload(conv, "fill context")).await.unwrap();
    wait_idle(&mut rx, conv).await;

    pylon.compact(conv).await.unwrap();
    wait_for(&mut rx, |ev| {
        matches!(ev, PylonEvent::CompactComplete { .. })
    })
    .await;
    wait_idle(&mut rx, conv).await;

    let captured = adapter.captured.lock().unwrap();
    assert_eq!(captured[1].resume.as_deref(), Some("sess-1"));
}

#[tokio::test]
async fn delete_conversation_aborts_in_flight_work() {
    let (pylon, conv, _) = setup(vec![Script::hanging(&[INIT])]).await;
    pylon.send(send_payload(conv, "x")).await.unwrap();
    pylon.delete_conversation(conv).await.unwrap();

    let store = pylon.snapshot().await;
    assert!(store.conversation(conv).is_none());
    let err = pylon.delete_conversation(conv).await.unwrap_err();
    assert!(matches!(err, FabricError::NotFound(_)));
}

#[tokio::test]
async fn pending_callback_denied_when_query_torn_down() {
    let (pylon, conv, adapter) = setup(vec![Script::hanging(&[INIT])]).await;
    let mut rx = pylon.subscribe();
    pylon.send(send_payload(conv, "x")).await.unwrap();

    let cb = adapter.callback();
    let decision = tokio::spawn(cb(ToolUseRequest {
        tool_name: "Edit".into(),
        input: serde_json::json!({"file_path": "a.rs"}),
        tool_use_id: Some("toolu_05".into()),
    }));
    wait_for(&mut rx, |ev| {
        matches!(ev, PylonEvent::PermissionRequested { .. })
    })
    .await;

    // new_session drops the parked resolver; the callback resolves deny.
    pylon.new_session(conv).await.unwrap();
    match decision.await.unwrap() {
        PermissionResult::Deny { message } => assert!(message.contains("cancelled")),
        other => panic!("expected deny, got {other:?}"),
    }
    let store = pylon.snapshot().await;
    assert!(store.conversation(conv).unwrap().pending.is_empty());
}

#[tokio::test]
async fn add_prompt_reads_file_and_resets_session() {
    let (pylon, conv, _) = setup(vec![Script::of(&[INIT, RESULT])]).await;
    let mut rx = pylon.subscribe();
    pylon.send(send_payload(conv, "x")).await.unwrap();
    wait_idle(&mut rx, conv).await;

    let dir = tempfile::TempDir::new().unwrap();
    let prompt_path = dir.path().join("persona.md");
    std::fs::write(&prompt_path, "You are terse.").unwrap();

    pylon.add_prompt(conv, &prompt_path).await.unwrap();
    let store = pylon.snapshot().await;
    let c = store.conversation(conv).unwrap();
    assert_eq!(c.custom_system_prompt.as_deref(), Some("You are terse."));
    assert_eq!(c.sdk_session_id, None);
}

#[tokio::test]
async fn linked_docs_add_and_remove() {
    let (pylon, conv, _) = setup(vec![]).await;
    let path = std::path::PathBuf::from("/tmp/doc.md");
    pylon.add_linked_doc(conv, path.clone()).await.unwrap();
    pylon.add_linked_doc(conv, path.clone()).await.unwrap(); // idempotent
    assert_eq!(
        pylon.snapshot().await.conversation(conv).unwrap().linked_docs,
        vec![path.clone()]
    );
    pylon.remove_linked_doc(conv, &path).await.unwrap();
    assert!(pylon
        .snapshot()
        .await
        .conversation(conv)
        .unwrap()
        .linked_docs
        .is_empty());
}

#[tokio::test]
async fn conversations_progress_independently() {
    // One conversation hangs on a permission prompt; the other completes.
    let (pylon, conv_a, adapter) = setup(vec![
        Script::hanging(&[INIT]),
        Script::of(&[INIT, ASSISTANT_FINAL, RESULT]),
    ])
    .await;
    let ws = conv_a.parent_workspace();
    let conv_b = pylon.create_conversation(ws, "other").await.unwrap();

    let mut rx = pylon.subscribe();
    pylon.send(send_payload(conv_a, "a")).await.unwrap();
    let cb = adapter.callback();
    let _parked = tokio::spawn(cb(ToolUseRequest {
        tool_name: "Edit".into(),
        input: serde_json::json!({"file_path": "a.rs"}),
        tool_use_id: Some("toolu_a".into()),
    }));
    wait_for(&mut rx, |ev| {
        matches!(ev, PylonEvent::PermissionRequested { .. })
    })
    .await;

    // conv_a is suspended on the user; conv_b still runs to completion.
    pylon.send(send_payload(conv_b, "b")).await.unwrap();
    wait_idle(&mut rx, conv_b).await;

    let store = pylon.snapshot().await;
    assert_eq!(
        store.conversation(conv_a).unwrap().status,
        ConversationStatus::Permission
    );
    assert_eq!(
        store.conversation(conv_b).unwrap().status,
        ConversationStatus::Idle
    );

    pylon.new_session(conv_a).await.unwrap();
}

#[tokio::test]
async fn share_creation_persists_and_validates() {
    let (pylon, conv, _) = setup(vec![]).await;
    let record = pylon.create_share(conv).await.unwrap();
    assert_eq!(record.share_id.len(), 12);
    assert_eq!(record.conversation_id, conv);

    // Reuse for the same conversation
    let again = pylon.create_share(conv).await.unwrap();
    assert_eq!(again.share_id, record.share_id);

    let missing = EntityId::conversation(1, 1, 999).unwrap();
    assert!(pylon.create_share(missing).await.is_err());
}
