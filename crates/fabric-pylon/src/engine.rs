use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{broadcast, oneshot, Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use claude_adapter::{
    CanUseToolFn, ClaudeAdapter, PermissionResult, QueryOptions, ToolUseRequest,
};
use fabric_core::entity::{EntityId, MAX_CONVERSATION_ID, MAX_WORKSPACE_ID};
use fabric_core::error::{FabricError, Result};
use fabric_core::log::{LogEntry, LogKind, Role};
use fabric_core::payload::{
    ClaudeAnswerPayload, ClaudePermissionPayload, ClaudeSendPayload, PermissionDecisionKind,
    SetPermissionModePayload,
};
use fabric_core::permission::{check_permission, PermissionDecision, PermissionMode, ASK_USER_QUESTION};
use fabric_core::share::ShareRecord;
use fabric_core::toolmap::ToolContextMap;
use fabric_core::workspace::{
    Conversation, ConversationStatus, PendingRequest, Question, Workspace, WorkspaceStore,
};

use crate::config::PylonConfig;
use crate::events::PylonEvent;
use crate::fs::FileSystem;
use crate::mcp;
use crate::persist::Persistence;
use crate::turn;

// ─── Shared state ─────────────────────────────────────────────────────────

/// A user's answer to a suspended `can_use_tool` callback.
#[derive(Debug)]
pub(crate) enum UserDecision {
    Permission(PermissionDecisionKind),
    Answer(serde_json::Value),
}

/// State for one in-flight query: its cancellation handle and the oneshot
/// resolvers for suspended permission/question prompts. The generation lets
/// a finished turn task clean up only its own entry, never a successor's.
pub(crate) struct ActiveQuery {
    pub cancel: CancellationToken,
    pub resolvers: Arc<Mutex<HashMap<String, oneshot::Sender<UserDecision>>>>,
    pub generation: u64,
}

pub(crate) struct Shared {
    pub config: PylonConfig,
    pub adapter: Arc<dyn ClaudeAdapter>,
    pub persistence: Arc<dyn Persistence>,
    pub fs: Arc<dyn FileSystem>,
    /// Single writer per process; readers clone coherent snapshots.
    pub store: RwLock<WorkspaceStore>,
    pub shares: Mutex<fabric_core::share::ShareStore>,
    pub tools: Mutex<ToolContextMap>,
    pub active: Mutex<HashMap<EntityId, ActiveQuery>>,
    pub events: broadcast::Sender<PylonEvent>,
    pub generations: std::sync::atomic::AtomicU64,
}

impl Shared {
    pub fn emit(&self, event: PylonEvent) {
        // No subscribers is fine; events are best-effort ephemera.
        let _ = self.events.send(event);
    }

    /// Write-through after a state-mutating event. Persistence failures are
    /// logged, never propagated into conversation work.
    pub async fn persist_store(&self) {
        let snapshot = self.store.read().await.clone();
        if let Err(e) = self.persistence.save_workspace_store(&snapshot) {
            tracing::warn!("workspace store write-through failed: {e}");
        }
    }

    pub async fn persist_shares(&self) {
        let snapshot = self.shares.lock().await.clone();
        if let Err(e) = self.persistence.save_share_store(&snapshot) {
            tracing::warn!("share store write-through failed: {e}");
        }
    }
}

// ─── Pylon ────────────────────────────────────────────────────────────────

/// The workstation runtime: owns the WorkspaceStore, drives the AI backend
/// per conversation, and resolves interactive permission prompts.
///
/// Conversations are isolated: each query runs in its own task and store
/// mutations take the write lock briefly, so work on one conversation never
/// blocks or reorders another.
#[derive(Clone)]
pub struct Pylon {
    pub(crate) shared: Arc<Shared>,
}

impl Pylon {
    pub fn new(
        config: PylonConfig,
        adapter: Arc<dyn ClaudeAdapter>,
        persistence: Arc<dyn Persistence>,
        fs: Arc<dyn FileSystem>,
    ) -> Result<Self> {
        let store = persistence.load_workspace_store()?.unwrap_or_default();
        let shares = persistence.load_share_store()?.unwrap_or_default();
        let (events, _) = broadcast::channel(256);
        Ok(Pylon {
            shared: Arc::new(Shared {
                config,
                adapter,
                persistence,
                fs,
                store: RwLock::new(store),
                shares: Mutex::new(shares),
                tools: Mutex::new(ToolContextMap::new()),
                active: Mutex::new(HashMap::new()),
                events,
                generations: std::sync::atomic::AtomicU64::new(0),
            }),
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PylonEvent> {
        self.shared.events.subscribe()
    }

    pub fn config(&self) -> &PylonConfig {
        &self.shared.config
    }

    /// A coherent copy of the current store.
    pub async fn snapshot(&self) -> WorkspaceStore {
        self.shared.store.read().await.clone()
    }

    // ── Structure ─────────────────────────────────────────────────────────

    pub async fn create_workspace(&self, name: &str, path: impl Into<PathBuf>) -> Result<EntityId> {
        let pylon_id = self.shared.config.pylon_id;
        let id = {
            let mut store = self.shared.store.write().await;
            let next = (1..=MAX_WORKSPACE_ID)
                .find(|w| {
                    EntityId::workspace(pylon_id, *w)
                        .map(|id| store.workspace(id).is_none())
                        .unwrap_or(false)
                })
                .ok_or_else(|| FabricError::Conflict("workspace ids exhausted".into()))?;
            let id = EntityId::workspace(pylon_id, next)?;
            store.add_workspace(Workspace::new(id, name, path))?;
            id
        };
        self.shared.persist_store().await;
        self.shared.emit(PylonEvent::StoreChanged);
        Ok(id)
    }

    pub async fn create_conversation(&self, workspace: EntityId, name: &str) -> Result<EntityId> {
        let id = {
            let mut store = self.shared.store.write().await;
            let ws = store
                .workspace(workspace)
                .ok_or_else(|| FabricError::NotFound(format!("workspace {workspace}")))?;
            let taken: Vec<u32> = ws.conversations.iter().map(|c| c.entity_id.conversation_id()).collect();
            let next = (1..=MAX_CONVERSATION_ID)
                .find(|c| !taken.contains(c))
                .ok_or_else(|| FabricError::Conflict("conversation ids exhausted".into()))?;
            let id = EntityId::conversation(
                workspace.pylon_id(),
                workspace.workspace_id(),
                next,
            )?;
            store.add_conversation(Conversation::new(id, name))?;
            id
        };
        self.shared.persist_store().await;
        self.shared.emit(PylonEvent::StoreChanged);
        Ok(id)
    }

    /// Delete a conversation; lingering in-flight work is aborted.
    pub async fn delete_conversation(&self, id: EntityId) -> Result<()> {
        self.abort_query(id).await;
        let session = {
            let mut store = self.shared.store.write().await;
            let conv = store
                .remove_conversation(id)
                .ok_or_else(|| FabricError::NotFound(format!("conversation {id}")))?;
            conv.sdk_session_id
        };
        if let Some(session_id) = session {
            if let Err(e) = self.shared.persistence.delete_message_session(&session_id) {
                tracing::warn!("failed to delete session {session_id}: {e}");
            }
        }
        self.shared.persist_store().await;
        self.shared.emit(PylonEvent::StoreChanged);
        Ok(())
    }

    pub async fn delete_workspace(&self, id: EntityId) -> Result<()> {
        let conversations: Vec<EntityId> = {
            let store = self.shared.store.read().await;
            store
                .workspace(id)
                .ok_or_else(|| FabricError::NotFound(format!("workspace {id}")))?
                .conversations
                .iter()
                .map(|c| c.entity_id)
                .collect()
        };
        for conv in conversations {
            self.abort_query(conv).await;
        }
        self.shared.store.write().await.remove_workspace(id);
        self.shared.persist_store().await;
        self.shared.emit(PylonEvent::StoreChanged);
        Ok(())
    }

    pub async fn set_active(
        &self,
        workspace: Option<EntityId>,
        conversation: Option<EntityId>,
    ) -> Result<()> {
        self.shared.store.write().await.set_active(workspace, conversation)?;
        self.shared.persist_store().await;
        self.shared.emit(PylonEvent::StoreChanged);
        Ok(())
    }

    pub async fn create_share(&self, conversation: EntityId) -> Result<ShareRecord> {
        if self.shared.store.read().await.conversation(conversation).is_none() {
            return Err(FabricError::NotFound(format!("conversation {conversation}")));
        }
        let record = self.shared.shares.lock().await.create(conversation).clone();
        self.shared.persist_shares().await;
        self.shared.emit(PylonEvent::StoreChanged);
        Ok(record)
    }

    // ── Sending ───────────────────────────────────────────────────────────

    /// Start a query for a conversation. At most one query may be in flight
    /// per conversation; a busy conversation is a Conflict.
    pub async fn send(&self, payload: ClaudeSendPayload) -> Result<()> {
        let id = payload.conversation_id;
        let mut prompt = payload.message.clone();

        let (resume, cwd, system_prompt, entry) = {
            let mut store = self.shared.store.write().await;
            let cwd = store
                .workspace(id.parent_workspace())
                .map(|w| w.path.clone());
            let conv = store
                .conversation_mut(id)
                .ok_or_else(|| FabricError::NotFound(format!("conversation {id}")))?;
            if conv.status != ConversationStatus::Idle {
                return Err(FabricError::Conflict(format!(
                    "conversation {id} already has a query in flight"
                )));
            }

            if let Some(attachments) = &payload.attachments {
                for a in attachments {
                    prompt.push_str(&format!("\n\nAttached file: {}", a.filename));
                }
            }

            let entry = LogEntry::user_text(&payload.message);
            conv.append(entry.clone());
            conv.set_status(ConversationStatus::Working);
            conv.work_start_time = Some(Utc::now().timestamp_millis());
            (
                conv.sdk_session_id.clone(),
                cwd,
                conv.custom_system_prompt.clone(),
                entry,
            )
        };

        self.shared.emit(PylonEvent::MessageAppended {
            conversation_id: id,
            entry,
        });
        self.shared.emit(PylonEvent::StatusChange {
            conversation_id: id,
            status: ConversationStatus::Working,
        });
        self.shared.persist_store().await;

        self.start_query(id, prompt, resume, cwd, system_prompt).await;
        Ok(())
    }

    async fn start_query(
        &self,
        id: EntityId,
        prompt: String,
        resume: Option<String>,
        cwd: Option<PathBuf>,
        system_prompt: Option<String>,
    ) {
        let cancel = CancellationToken::new();
        let resolvers: Arc<Mutex<HashMap<String, oneshot::Sender<UserDecision>>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let generation = self
            .shared
            .generations
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);

        self.shared.active.lock().await.insert(
            id,
            ActiveQuery {
                cancel: cancel.clone(),
                resolvers: resolvers.clone(),
                generation,
            },
        );

        let mut opts = QueryOptions::new();
        opts.resume = resume;
        opts.system_prompt = system_prompt;
        opts.cancel = cancel.clone();
        if let Some(cwd) = &cwd {
            opts.mcp_servers = mcp::load_mcp_servers(
                self.shared.fs.as_ref(),
                cwd,
                &self.shared.config,
            );
            opts.cwd = Some(cwd.clone());
        }
        opts.can_use_tool = Some(self.can_use_tool_fn(id, resolvers));

        let stream = self.shared.adapter.query(prompt, opts);
        let shared = self.shared.clone();
        tokio::spawn(async move {
            turn::run_turn(shared, id, stream, cancel, generation).await;
        });
    }

    /// The interaction channel between the adapter's permission callback and
    /// the user: decisions resolve oneshot senders parked in `resolvers`.
    fn can_use_tool_fn(
        &self,
        id: EntityId,
        resolvers: Arc<Mutex<HashMap<String, oneshot::Sender<UserDecision>>>>,
    ) -> CanUseToolFn {
        let shared = self.shared.clone();
        Arc::new(move |request: ToolUseRequest| {
            let shared = shared.clone();
            let resolvers = resolvers.clone();
            let fut: futures::future::BoxFuture<'static, PermissionResult> =
                Box::pin(async move { decide_tool_use(shared, resolvers, id, request).await });
            fut
        })
    }

    // ── Interactive answers ───────────────────────────────────────────────

    pub async fn answer_permission(&self, payload: ClaudePermissionPayload) -> Result<()> {
        let id = payload.conversation_id;
        let sender = {
            let active = self.shared.active.lock().await;
            let query = active
                .get(&id)
                .ok_or_else(|| FabricError::NotFound(format!("no query in flight for {id}")))?;
            let removed = query.resolvers.lock().await.remove(&payload.tool_use_id);
            removed
        }
        .ok_or_else(|| {
            FabricError::NotFound(format!("no pending request {}", payload.tool_use_id))
        })?;

        if payload.decision == PermissionDecisionKind::AllowAll
            && self.shared.config.allow_all_raises_mode
        {
            let mut store = self.shared.store.write().await;
            if let Some(conv) = store.conversation_mut(id) {
                conv.permission_mode = PermissionMode::AcceptEdits;
            }
            drop(store);
            self.shared.persist_store().await;
        }

        sender
            .send(UserDecision::Permission(payload.decision))
            .map_err(|_| FabricError::Internal("permission callback gone".into()))
    }

    pub async fn answer_question(&self, payload: ClaudeAnswerPayload) -> Result<()> {
        let id = payload.conversation_id;
        let sender = {
            let active = self.shared.active.lock().await;
            let query = active
                .get(&id)
                .ok_or_else(|| FabricError::NotFound(format!("no query in flight for {id}")))?;
            let removed = query.resolvers.lock().await.remove(&payload.tool_use_id);
            removed
        }
        .ok_or_else(|| {
            FabricError::NotFound(format!("no pending question {}", payload.tool_use_id))
        })?;

        let entry = LogEntry::new(
            Role::User,
            LogKind::UserResponse {
                tool_use_id: payload.tool_use_id.clone(),
                answer: payload.answer.clone(),
            },
        );
        {
            let mut store = self.shared.store.write().await;
            if let Some(conv) = store.conversation_mut(id) {
                conv.append(entry.clone());
            }
        }
        self.shared.emit(PylonEvent::MessageAppended {
            conversation_id: id,
            entry,
        });
        self.shared.persist_store().await;

        sender
            .send(UserDecision::Answer(payload.answer))
            .map_err(|_| FabricError::Internal("question callback gone".into()))
    }

    // ── Session controls ──────────────────────────────────────────────────

    /// Cancel the in-flight query, if any. No-op when idle.
    pub async fn stop(&self, id: EntityId) -> Result<()> {
        if let Some(query) = self.shared.active.lock().await.get(&id) {
            query.cancel.cancel();
        }
        Ok(())
    }

    /// Abort in-flight work, clear the backend session coupling and pending
    /// prompts; the message log survives. The next send starts fresh.
    pub async fn new_session(&self, id: EntityId) -> Result<()> {
        self.abort_query(id).await;
        {
            let mut store = self.shared.store.write().await;
            let conv = store
                .conversation_mut(id)
                .ok_or_else(|| FabricError::NotFound(format!("conversation {id}")))?;
            conv.sdk_session_id = None;
            conv.pending.clear();
            conv.set_status(ConversationStatus::Idle);
        }
        self.shared.emit(PylonEvent::StatusChange {
            conversation_id: id,
            status: ConversationStatus::Idle,
        });
        self.shared.persist_store().await;
        Ok(())
    }

    /// `new_session` plus message-log truncation.
    pub async fn clear(&self, id: EntityId) -> Result<()> {
        self.new_session(id).await?;
        {
            let mut store = self.shared.store.write().await;
            let conv = store
                .conversation_mut(id)
                .ok_or_else(|| FabricError::NotFound(format!("conversation {id}")))?;
            conv.log.clear();
            conv.paging = Default::default();
        }
        self.shared.persist_store().await;
        self.shared.emit(PylonEvent::StoreChanged);
        Ok(())
    }

    /// Ask the backend to compact its context. Issued as a resumed control
    /// prompt; the streaming path surfaces compactStart/compactComplete.
    pub async fn compact(&self, id: EntityId) -> Result<()> {
        let (resume, cwd, system_prompt) = {
            let mut store = self.shared.store.write().await;
            let cwd = store
                .workspace(id.parent_workspace())
                .map(|w| w.path.clone());
            let conv = store
                .conversation_mut(id)
                .ok_or_else(|| FabricError::NotFound(format!("conversation {id}")))?;
            if conv.status != ConversationStatus::Idle {
                return Err(FabricError::Conflict(format!(
                    "conversation {id} already has a query in flight"
                )));
            }
            let resume = conv.sdk_session_id.clone().ok_or_else(|| {
                FabricError::Validation(format!("conversation {id} has no session to compact"))
            })?;
            conv.set_status(ConversationStatus::Working);
            conv.work_start_time = Some(Utc::now().timestamp_millis());
            (resume, cwd, conv.custom_system_prompt.clone())
        };
        self.shared.emit(PylonEvent::StatusChange {
            conversation_id: id,
            status: ConversationStatus::Working,
        });
        self.start_query(id, "/compact".into(), Some(resume), cwd, system_prompt)
            .await;
        Ok(())
    }

    pub async fn set_permission_mode(&self, payload: SetPermissionModePayload) -> Result<()> {
        let id = payload.conversation_id;
        {
            let mut store = self.shared.store.write().await;
            let conv = store
                .conversation_mut(id)
                .ok_or_else(|| FabricError::NotFound(format!("conversation {id}")))?;
            conv.permission_mode = payload.mode;
        }
        self.shared.persist_store().await;
        self.shared.emit(PylonEvent::StoreChanged);
        Ok(())
    }

    /// Read a file through the FileSystem capability and install it as the
    /// conversation's system prompt. Implicitly starts a new session.
    pub async fn add_prompt(&self, id: EntityId, path: &std::path::Path) -> Result<()> {
        let prompt = self.shared.fs.read_to_string(path)?;
        self.new_session(id).await?;
        {
            let mut store = self.shared.store.write().await;
            let conv = store
                .conversation_mut(id)
                .ok_or_else(|| FabricError::NotFound(format!("conversation {id}")))?;
            conv.custom_system_prompt = Some(prompt);
        }
        self.shared.persist_store().await;
        self.shared.emit(PylonEvent::StoreChanged);
        Ok(())
    }

    pub async fn add_linked_doc(&self, id: EntityId, path: PathBuf) -> Result<()> {
        {
            let mut store = self.shared.store.write().await;
            let conv = store
                .conversation_mut(id)
                .ok_or_else(|| FabricError::NotFound(format!("conversation {id}")))?;
            if !conv.linked_docs.contains(&path) {
                conv.linked_docs.push(path);
            }
        }
        self.shared.persist_store().await;
        self.shared.emit(PylonEvent::StoreChanged);
        Ok(())
    }

    pub async fn remove_linked_doc(&self, id: EntityId, path: &std::path::Path) -> Result<()> {
        {
            let mut store = self.shared.store.write().await;
            let conv = store
                .conversation_mut(id)
                .ok_or_else(|| FabricError::NotFound(format!("conversation {id}")))?;
            conv.linked_docs.retain(|p| p != path);
        }
        self.shared.persist_store().await;
        self.shared.emit(PylonEvent::StoreChanged);
        Ok(())
    }

    /// Cancel and tear down the active query for `id`, dropping any parked
    /// resolvers so suspended callbacks resolve to deny.
    async fn abort_query(&self, id: EntityId) {
        if let Some(query) = self.shared.active.lock().await.remove(&id) {
            query.cancel.cancel();
            query.resolvers.lock().await.clear();
        }
    }

    /// Append a `file_attachment` log entry for a completed blob transfer.
    pub async fn record_attachment(&self, blob: crate::blob::CompletedBlob) -> Result<()> {
        let id = blob.conversation_id;
        let entry = LogEntry::new(
            Role::User,
            LogKind::FileAttachment {
                filename: blob.filename,
                path: blob.path.to_string_lossy().into_owned(),
                mime_type: blob.mime_type,
                size: blob.total_size,
            },
        );
        {
            let mut store = self.shared.store.write().await;
            let conv = store
                .conversation_mut(id)
                .ok_or_else(|| FabricError::NotFound(format!("conversation {id}")))?;
            conv.append(entry.clone());
        }
        self.shared.emit(PylonEvent::MessageAppended {
            conversation_id: id,
            entry,
        });
        self.shared.persist_store().await;
        Ok(())
    }

    /// Drop stale tool contexts. Explicit; wire to a timer if desired.
    pub async fn cleanup_tool_contexts(&self) -> usize {
        self.shared
            .tools
            .lock()
            .await
            .cleanup(self.shared.config.tool_context_max_age)
    }
}

// ─── Permission decision flow ─────────────────────────────────────────────

/// Backend asked whether a tool may run. Pure decision first; `Ask`
/// suspends on a oneshot until the user answers (or the query dies).
async fn decide_tool_use(
    shared: Arc<Shared>,
    resolvers: Arc<Mutex<HashMap<String, oneshot::Sender<UserDecision>>>>,
    id: EntityId,
    request: ToolUseRequest,
) -> PermissionResult {
    let mode = {
        let store = shared.store.read().await;
        match store.conversation(id) {
            Some(conv) => conv.permission_mode,
            None => {
                return PermissionResult::Deny {
                    message: format!("conversation {id} not found"),
                }
            }
        }
    };

    match check_permission(&request.tool_name, &request.input, mode) {
        PermissionDecision::Allow => PermissionResult::Allow {
            updated_input: None,
        },
        PermissionDecision::Deny(message) => PermissionResult::Deny { message },
        PermissionDecision::Ask => ask_user(shared, resolvers, id, request).await,
    }
}

async fn ask_user(
    shared: Arc<Shared>,
    resolvers: Arc<Mutex<HashMap<String, oneshot::Sender<UserDecision>>>>,
    id: EntityId,
    request: ToolUseRequest,
) -> PermissionResult {
    let tool_use_id = request
        .tool_use_id
        .clone()
        .unwrap_or_else(|| format!("perm_{}", uuid::Uuid::new_v4()));

    let pending = if request.tool_name == ASK_USER_QUESTION {
        let questions: Vec<Question> = request
            .input
            .get("questions")
            .and_then(|q| serde_json::from_value(q.clone()).ok())
            .unwrap_or_default();
        PendingRequest::Question {
            tool_use_id: tool_use_id.clone(),
            questions,
        }
    } else {
        PendingRequest::Permission {
            tool_use_id: tool_use_id.clone(),
            tool_name: request.tool_name.clone(),
            tool_input: request.input.clone(),
        }
    };

    // Park the resolver before announcing the request, so an answer that
    // arrives immediately still finds it.
    let (tx, rx) = oneshot::channel();
    resolvers.lock().await.insert(tool_use_id.clone(), tx);

    {
        let mut store = shared.store.write().await;
        let Some(conv) = store.conversation_mut(id) else {
            resolvers.lock().await.remove(&tool_use_id);
            return PermissionResult::Deny {
                message: format!("conversation {id} not found"),
            };
        };
        conv.pending.push(pending.clone());
        conv.set_status(ConversationStatus::Permission);
    }
    let event = match &pending {
        PendingRequest::Question { .. } => PylonEvent::QuestionRequested {
            conversation_id: id,
            request: pending.clone(),
        },
        PendingRequest::Permission { .. } => PylonEvent::PermissionRequested {
            conversation_id: id,
            request: pending.clone(),
        },
    };
    shared.emit(event);
    shared.emit(PylonEvent::StatusChange {
        conversation_id: id,
        status: ConversationStatus::Permission,
    });
    shared.persist_store().await;

    let decision = rx.await;

    // Remove the request and resume per the adapter stream.
    let resumed = {
        let mut store = shared.store.write().await;
        match store.conversation_mut(id) {
            Some(conv) => {
                conv.remove_pending(&tool_use_id);
                if conv.status == ConversationStatus::Permission && conv.pending.is_empty() {
                    conv.status = ConversationStatus::Working;
                    true
                } else {
                    false
                }
            }
            None => false,
        }
    };
    shared.emit(PylonEvent::PermissionResolved {
        conversation_id: id,
        tool_use_id: tool_use_id.clone(),
    });
    if resumed {
        shared.emit(PylonEvent::StatusChange {
            conversation_id: id,
            status: ConversationStatus::Working,
        });
    }
    shared.persist_store().await;

    match decision {
        Ok(UserDecision::Permission(PermissionDecisionKind::Allow))
        | Ok(UserDecision::Permission(PermissionDecisionKind::AllowAll)) => {
            PermissionResult::Allow {
                updated_input: None,
            }
        }
        Ok(UserDecision::Permission(PermissionDecisionKind::Deny)) => PermissionResult::Deny {
            message: "Denied by user".into(),
        },
        Ok(UserDecision::Answer(answer)) => PermissionResult::Allow {
            updated_input: Some(answer),
        },
        // Resolver dropped: stop / new_session / deletion.
        Err(_) => PermissionResult::Deny {
            message: "Request cancelled".into(),
        },
    }
}
