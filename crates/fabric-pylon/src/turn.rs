use std::sync::Arc;

use chrono::Utc;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use claude_adapter::{
    ContentBlock, Delta, Message, QueryStream, StreamEvent, SystemPayload, TokenUsage,
};
use fabric_core::entity::EntityId;
use fabric_core::log::{LogEntry, LogKind, Role};
use fabric_core::toolmap::ToolUseRaw;
use fabric_core::workspace::ConversationStatus;

use crate::engine::Shared;
use crate::events::PylonEvent;

// ─── Turn driver ──────────────────────────────────────────────────────────

/// Single reader for one query's message sequence: drives state transitions
/// and republishes events. The raw stream is never exposed to anyone else.
pub(crate) async fn run_turn(
    shared: Arc<Shared>,
    id: EntityId,
    mut stream: QueryStream,
    cancel: CancellationToken,
    generation: u64,
) {
    let mut started = false;
    let mut terminal = false;

    while let Some(item) = stream.next().await {
        match item {
            Ok(message) => {
                started = true;
                if translate(&shared, id, message).await {
                    terminal = true;
                    break;
                }
            }
            Err(e) => {
                tracing::warn!(conversation = %id, "adapter error: {e}");
                append_and_idle(
                    &shared,
                    id,
                    LogEntry::new(Role::System, LogKind::Error { message: e.to_string() }),
                )
                .await;
                shared.emit(PylonEvent::QueryError {
                    conversation_id: id,
                    error: e.to_string(),
                });
                terminal = true;
                break;
            }
        }
    }

    if !terminal {
        if cancel.is_cancelled() && started {
            // Cancelled mid-stream without a result.
            append_and_idle(&shared, id, LogEntry::new(Role::System, LogKind::Aborted)).await;
            shared.emit(PylonEvent::Aborted { conversation_id: id });
        } else {
            // Stream ended before starting, or vanished without a result:
            // just return the conversation to idle.
            set_idle(&shared, id).await;
        }
    }

    {
        // Only tear down our own registration; a new_session may already
        // have replaced it with a fresh query.
        let mut active = shared.active.lock().await;
        if active.get(&id).map(|q| q.generation) == Some(generation) {
            active.remove(&id);
        }
    }
    shared.persist_store().await;
}

/// Map one backend message onto log entries, state changes, and events.
/// Returns true for the terminal `result` message.
async fn translate(shared: &Arc<Shared>, id: EntityId, message: Message) -> bool {
    match message {
        Message::System(system) => {
            match system.payload {
                SystemPayload::Init(_) => {
                    {
                        let mut store = shared.store.write().await;
                        if let Some(conv) = store.conversation_mut(id) {
                            conv.sdk_session_id = Some(system.session_id.clone());
                            conv.status = ConversationStatus::Working;
                        }
                    }
                    shared.persist_store().await;
                    shared.emit(PylonEvent::SessionStart {
                        conversation_id: id,
                        session_id: system.session_id,
                    });
                }
                SystemPayload::Status(status) if status.status == "compacting" => {
                    shared.emit(PylonEvent::CompactStart { conversation_id: id });
                }
                SystemPayload::CompactBoundary(boundary) => {
                    let meta = boundary.compact_metadata;
                    shared.emit(PylonEvent::CompactComplete {
                        conversation_id: id,
                        pre_tokens: meta.as_ref().and_then(|m| m.pre_tokens),
                        trigger: meta.and_then(|m| m.trigger),
                    });
                }
                _ => {}
            }
            false
        }

        Message::StreamEvent(ev) => {
            match ev.event {
                StreamEvent::ContentBlockStart {
                    content_block: ContentBlock::ToolUse { id: tool_id, name, input },
                    ..
                } => {
                    shared.tools.lock().await.insert(
                        tool_id.clone(),
                        id,
                        ToolUseRaw {
                            kind: "tool_use".into(),
                            id: tool_id.clone(),
                            name: name.clone(),
                            input: input.clone(),
                        },
                    );
                    let entry = LogEntry::new(
                        Role::Assistant,
                        LogKind::ToolStart {
                            tool_use_id: tool_id,
                            tool_name: name,
                            input,
                        },
                    );
                    append(shared, id, entry).await;
                }
                StreamEvent::ContentBlockDelta {
                    delta: Delta::TextDelta { text },
                    ..
                } => {
                    {
                        let mut store = shared.store.write().await;
                        if let Some(conv) = store.conversation_mut(id) {
                            conv.text_buffer.push_str(&text);
                        }
                    }
                    shared.emit(PylonEvent::TextDelta {
                        conversation_id: id,
                        text,
                    });
                }
                _ => {}
            }
            false
        }

        Message::Assistant(assistant) => {
            // Finalise streamed deltas into a durable text entry; fall back
            // to the message's own text blocks when partials were off.
            let flushed = {
                let mut store = shared.store.write().await;
                let Some(conv) = store.conversation_mut(id) else {
                    return false;
                };
                let mut text = std::mem::take(&mut conv.text_buffer);
                if text.is_empty() {
                    for block in &assistant.message.content {
                        if let ContentBlock::Text { text: t } = block {
                            text.push_str(t);
                        }
                    }
                }
                if let Some(usage) = &assistant.message.usage {
                    apply_usage(conv, usage);
                }
                (!text.is_empty()).then(|| {
                    let entry = LogEntry::assistant_text(text);
                    conv.append(entry.clone());
                    (entry, conv.realtime_usage)
                })
            };
            if let Some((entry, usage)) = flushed {
                shared.emit(PylonEvent::MessageAppended {
                    conversation_id: id,
                    entry,
                });
                shared.emit(PylonEvent::UsageUpdate {
                    conversation_id: id,
                    usage,
                });
                shared.persist_store().await;
            }
            false
        }

        Message::User(user) => {
            let results: Vec<(String, bool)> = user
                .message
                .content
                .tool_results()
                .map(|(tid, err)| (tid.to_string(), err))
                .collect();
            for (tool_use_id, is_error) in results {
                let entry = LogEntry::new(
                    Role::User,
                    LogKind::ToolComplete {
                        tool_use_id,
                        is_error,
                    },
                );
                append(shared, id, entry).await;
            }
            false
        }

        Message::Result(result) => {
            let entry = LogEntry::new(
                Role::System,
                LogKind::Result {
                    duration_ms: result.duration_ms,
                    input_tokens: result.usage.input_tokens,
                    output_tokens: result.usage.output_tokens,
                    cache_read_tokens: result.usage.cache_read_input_tokens.unwrap_or(0),
                },
            );
            let (usage, session_log) = {
                let mut store = shared.store.write().await;
                if let Some(conv) = store.conversation_mut(id) {
                    apply_usage(conv, &result.usage);
                    conv.append(entry.clone());
                    conv.set_status(ConversationStatus::Idle);
                    let log = conv
                        .sdk_session_id
                        .clone()
                        .map(|sid| (sid, serde_json::to_value(&conv.log).unwrap_or_default()));
                    (Some(conv.realtime_usage), log)
                } else {
                    (None, None)
                }
            };
            if let Some((session_id, log)) = session_log {
                if let Err(e) = shared.persistence.save_message_session(&session_id, &log) {
                    tracing::warn!("session log write-through failed: {e}");
                }
            }
            shared.emit(PylonEvent::MessageAppended {
                conversation_id: id,
                entry,
            });
            if let Some(usage) = usage {
                shared.emit(PylonEvent::UsageUpdate {
                    conversation_id: id,
                    usage,
                });
            }
            shared.emit(PylonEvent::StatusChange {
                conversation_id: id,
                status: ConversationStatus::Idle,
            });
            shared.persist_store().await;
            true
        }

        // Control requests are answered inside the adapter; unknown message
        // types are forward-compatible noise.
        Message::ControlRequest(_) | Message::Unknown => false,
    }
}

fn apply_usage(conv: &mut fabric_core::workspace::Conversation, usage: &TokenUsage) {
    let u = &mut conv.realtime_usage;
    u.input_tokens += usage.input_tokens;
    u.output_tokens += usage.output_tokens;
    u.cache_read_tokens += usage.cache_read_input_tokens.unwrap_or(0);
    u.cache_creation_tokens += usage.cache_creation_input_tokens.unwrap_or(0);
    u.last_updated = Utc::now().timestamp_millis();
}

async fn append(shared: &Arc<Shared>, id: EntityId, entry: LogEntry) {
    {
        let mut store = shared.store.write().await;
        if let Some(conv) = store.conversation_mut(id) {
            conv.append(entry.clone());
        }
    }
    shared.emit(PylonEvent::MessageAppended {
        conversation_id: id,
        entry,
    });
    shared.persist_store().await;
}

async fn append_and_idle(shared: &Arc<Shared>, id: EntityId, entry: LogEntry) {
    {
        let mut store = shared.store.write().await;
        if let Some(conv) = store.conversation_mut(id) {
            conv.append(entry.clone());
            conv.set_status(ConversationStatus::Idle);
        }
    }
    shared.emit(PylonEvent::MessageAppended {
        conversation_id: id,
        entry,
    });
    shared.emit(PylonEvent::StatusChange {
        conversation_id: id,
        status: ConversationStatus::Idle,
    });
    shared.persist_store().await;
}

async fn set_idle(shared: &Arc<Shared>, id: EntityId) {
    let changed = {
        let mut store = shared.store.write().await;
        match store.conversation_mut(id) {
            Some(conv) if conv.status != ConversationStatus::Idle => {
                conv.set_status(ConversationStatus::Idle);
                true
            }
            _ => false,
        }
    };
    if changed {
        shared.emit(PylonEvent::StatusChange {
            conversation_id: id,
            status: ConversationStatus::Idle,
        });
        shared.persist_store().await;
    }
}
