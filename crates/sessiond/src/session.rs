// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session (C4, logical) and Session Manager (C6): the thin layer above a
//! Bridge that enforces turn semantics, composes outgoing text, and
//! persists conversation state, plus the lifecycle owner of every live
//! session (`spec.md` §4.1, §4.2).

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex as SyncMutex;
use tokio::sync::RwLock;

use sessiond_storage::{
    queries, Database, MessageRole, MessageType, NewMessage, NewSession, SessionStatus,
};

use crate::bridge::jsonl::{JsonlBridge, JsonlBridgeOptions};
use crate::bridge::ndjson::{NdjsonBridge, NdjsonBridgeOptions};
use crate::bridge::rpc::{RpcBridge, RpcBridgeOptions};
use crate::bridge::{Bridge, BridgeEvent, ToolStatus};
use crate::error::{AgentError, ErrorCode};
use crate::event_bus::{EventBus, Unsubscribe};
use crate::registry::{ProviderKind, Registry};
use crate::ws::Broadcaster;

/// Blank-line `---` separator between composed outgoing-text segments
/// (`spec.md` §4.1: "preserve it bit-exact for determinism").
const COMPOSITION_SEPARATOR: &str = "\n\n---\n\n";

/// Identifies an item the UI wants the agent to act on; flows only through
/// the `[Action: ..., target ID: ...]` suffix handed to the Bridge, never
/// through the stored `userText` row (`spec.md` §4.1, testable property 8).
#[derive(Debug, Clone)]
pub struct ActionContext {
    pub kind: String,
    pub item_id: String,
}

/// The per-session external event stream: `delta / tool / status / complete
/// / error`, matching `spec.md` §4.5's Event Bus contract. `complete`
/// additionally carries the persisted `MessageId` per §4.1's "notify
/// external complete-subscribers with `{fullText, messageId}`".
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Delta { text: String },
    Tool { id: String, name: Option<String>, status: ToolStatus },
    Status { working: bool },
    Complete { full_text: String, message_id: i64 },
    Error { message: String },
}

/// Thin, passive state object above a Bridge: holds the once-only
/// `initialContext` and the composition helper. Owns no task of its own
/// (`spec.md` §4.2).
pub struct Session {
    initial_context: SyncMutex<Option<String>>,
}

impl Session {
    fn new(initial_context: Option<String>) -> Self {
        Self { initial_context: SyncMutex::new(initial_context) }
    }

    /// Compose the outgoing text per `spec.md` §4.1's composition order:
    /// `initialContext (once) ⊕ sep ⊕ perMessageContext ⊕ sep ⊕ userText ⊕
    /// [Action: ...]`. Returns `(stored_user_text, bridge_text)` — only the
    /// bare `userText` is ever persisted; everything else is bridge-only.
    fn compose(
        &self,
        per_message_context: Option<&str>,
        user_text: &str,
        action_context: Option<&ActionContext>,
    ) -> (String, String) {
        let initial = self.initial_context.lock().take();

        let mut segments: Vec<&str> = Vec::with_capacity(3);
        if let Some(initial) = initial.as_deref() {
            if !initial.is_empty() {
                segments.push(initial);
            }
        }
        if let Some(ctx) = per_message_context {
            if !ctx.is_empty() {
                segments.push(ctx);
            }
        }
        segments.push(user_text);

        let mut bridge_text = segments.join(COMPOSITION_SEPARATOR);
        if let Some(action) = action_context {
            bridge_text.push_str(&format!("\n\n[Action: {}, target ID: {}]", action.kind, action.item_id));
        }

        (user_text.to_owned(), bridge_text)
    }
}

struct SessionEntry {
    bridge: Arc<dyn Bridge>,
    session: Session,
    events: EventBus<SessionEvent>,
}

/// Lifecycle owner of every live session: create / resume / close-all,
/// subscription routing, and the single handle onto the persistence store
/// (`spec.md` §4.1, C6).
pub struct SessionManager {
    db: Arc<Database>,
    registry: Arc<Registry>,
    broadcaster: Arc<Broadcaster>,
    sessions: RwLock<HashMap<i64, Arc<SessionEntry>>>,
}

impl SessionManager {
    pub fn new(db: Arc<Database>, registry: Arc<Registry>, broadcaster: Arc<Broadcaster>) -> Arc<Self> {
        Arc::new(Self { db, registry, broadcaster, sessions: RwLock::new(HashMap::new()) })
    }

    /// Startup reconciliation (`spec.md` §3, §6): every persisted `active`
    /// session with no live Bridge — true of all of them, right after
    /// boot — transitions to `closed`.
    pub async fn reconcile_on_startup(&self) -> Result<(), AgentError> {
        let stale = queries::sessions::list_active_sessions(&self.db).await?;
        for row in stale {
            queries::sessions::update_status(&self.db, row.id, SessionStatus::Closed).await?;
        }
        Ok(())
    }

    fn build_bridge(
        &self,
        provider_id: &str,
        system_prompt: Option<String>,
        cwd: Option<String>,
        resume_handle: Option<String>,
    ) -> Result<Arc<dyn Bridge>, AgentError> {
        let def = self
            .registry
            .get(provider_id)
            .ok_or_else(|| AgentError::bad_request(format!("unknown provider: {provider_id}")))?;

        let bridge: Arc<dyn Bridge> = match def.kind {
            ProviderKind::Ndjson => Arc::new(NdjsonBridge::new(NdjsonBridgeOptions {
                command: def.command,
                args: def.args,
                env: def.env,
                cwd,
                system_prompt,
                resume_session_id: resume_handle,
            })),
            ProviderKind::Rpc => Arc::new(RpcBridge::new(RpcBridgeOptions {
                command: def.command,
                args: def.args,
                env: def.env,
                cwd,
                system_prompt,
                resume_thread_id: resume_handle,
            })),
            ProviderKind::Jsonl => Arc::new(JsonlBridge::new(JsonlBridgeOptions {
                command: def.command,
                args: def.args,
                env: def.env,
                cwd,
                system_prompt,
                resume_session_path: resume_handle,
            })),
        };
        Ok(bridge)
    }

    /// `spec.md` §4.1 `Create`. Persists an `active` row, wires the Bridge's
    /// event handlers, then awaits `Bridge.Start`. A start failure
    /// transitions the row to `error` and never leaves a dangling in-memory
    /// session — the live map is populated only after `start` returns `Ok`.
    #[allow(clippy::too_many_arguments)]
    pub async fn create(
        self: &Arc<Self>,
        review_id: String,
        provider_id: String,
        model_id: Option<String>,
        context_item_id: Option<String>,
        system_prompt: Option<String>,
        cwd: Option<String>,
        initial_context: Option<String>,
    ) -> Result<i64, AgentError> {
        let bridge = self.build_bridge(&provider_id, system_prompt, cwd, None)?;

        let id = queries::sessions::create_session(
            &self.db,
            NewSession { review_id, provider_id, model_id, context_item_id },
        )
        .await?;

        let entry = Arc::new(SessionEntry { bridge: Arc::clone(&bridge), session: Session::new(initial_context), events: EventBus::new() });
        self.install_handlers(id, Arc::clone(&entry));

        if let Err(err) = bridge.start().await {
            queries::sessions::update_status(&self.db, id, SessionStatus::Error).await?;
            return Err(AgentError::new(ErrorCode::StartFailed, err.to_string()));
        }

        self.sessions.write().await.insert(id, entry);
        Ok(id)
    }

    /// `spec.md` §4.1 `Resume`: rehydrate a closed session by spawning a
    /// Bridge configured to adopt the persisted `agentHandle`.
    pub async fn resume(
        self: &Arc<Self>,
        session_id: i64,
        system_prompt: Option<String>,
        cwd: Option<String>,
    ) -> Result<i64, AgentError> {
        if self.sessions.read().await.contains_key(&session_id) {
            return Err(AgentError::bad_request("session is already live"));
        }

        let row = queries::sessions::get_session(&self.db, session_id)
            .await?
            .ok_or_else(|| AgentError::not_found(format!("session {session_id}")))?;
        let agent_handle = row
            .agent_handle
            .clone()
            .ok_or_else(|| AgentError::bad_request("session has no agent handle to resume from"))?;

        let bridge = self.build_bridge(&row.provider_id, system_prompt, cwd, Some(agent_handle))?;
        let entry = Arc::new(SessionEntry { bridge: Arc::clone(&bridge), session: Session::new(None), events: EventBus::new() });
        self.install_handlers(session_id, Arc::clone(&entry));

        if let Err(err) = bridge.start().await {
            queries::sessions::update_status(&self.db, session_id, SessionStatus::Error).await?;
            return Err(AgentError::new(ErrorCode::StartFailed, err.to_string()));
        }

        queries::sessions::update_status(&self.db, session_id, SessionStatus::Active).await?;
        self.sessions.write().await.insert(session_id, entry);
        Ok(session_id)
    }

    /// `spec.md` §4.1 `Send`. Checks readiness/busy before touching
    /// persistence, so a busy rejection never writes a user row (testable
    /// property / scenario S4).
    pub async fn send(
        &self,
        session_id: i64,
        text: String,
        per_message_context: Option<String>,
        structured_context: Vec<String>,
        action_context: Option<ActionContext>,
    ) -> Result<i64, AgentError> {
        let entry = self.live(session_id).await?;

        if !entry.bridge.is_ready() {
            return Err(AgentError::not_ready("bridge is not ready"));
        }
        if entry.bridge.is_busy() {
            return Err(AgentError::busy("a turn is already in flight"));
        }

        let (stored_text, bridge_text) = entry.session.compose(per_message_context.as_deref(), &text, action_context.as_ref());

        let message_id =
            queries::messages::insert_turn(&self.db, session_id, structured_context, stored_text).await?;

        // The user/context rows above are already committed by this point —
        // §7 only excuses the pre-persist path, so a frame-write failure here
        // leaves a persisted user turn with no agent turn started. That's an
        // internal fault (stdin write/queue failure), not a readiness state,
        // so it's reported as `Internal` rather than `NotReady`.
        entry.bridge.send(bridge_text).await.map_err(|err| AgentError::new(ErrorCode::Internal, err.to_string()))?;

        Ok(message_id)
    }

    /// `spec.md` §4.1 `Abort`: no-op if the session is absent, best-effort
    /// otherwise.
    pub async fn abort(&self, session_id: i64) {
        if let Some(entry) = self.sessions.read().await.get(&session_id).cloned() {
            entry.bridge.abort().await;
        }
    }

    /// `spec.md` §4.1 `Close`: removes from the live map first, then closes
    /// the Bridge, then transitions the row. Idempotent.
    pub async fn close(&self, session_id: i64) -> Result<(), AgentError> {
        let entry = self.sessions.write().await.remove(&session_id);
        let Some(entry) = entry else { return Ok(()) };

        entry.bridge.close().await;
        queries::sessions::update_status(&self.db, session_id, SessionStatus::Closed).await?;
        Ok(())
    }

    /// `spec.md` §4.1 `CloseAll`: concurrent close of every live session.
    pub async fn close_all(&self) {
        let ids: Vec<i64> = self.sessions.read().await.keys().copied().collect();
        futures_util::future::join_all(ids.into_iter().map(|id| self.close(id))).await;
    }

    /// `spec.md` §4.1 `SaveContext`: persists a `context` row with no
    /// accompanying user message.
    pub async fn save_context(&self, session_id: i64, context_data: String) -> Result<i64, AgentError> {
        self.live(session_id).await?;
        let id = queries::messages::insert_message(
            &self.db,
            NewMessage { session_id, role: MessageRole::User, kind: MessageType::Context, content: context_data },
        )
        .await?;
        Ok(id)
    }

    async fn live(&self, session_id: i64) -> Result<Arc<SessionEntry>, AgentError> {
        self.sessions
            .read()
            .await
            .get(&session_id)
            .cloned()
            .ok_or_else(|| AgentError::not_found(format!("session {session_id}")))
    }

    pub async fn on_delta(&self, session_id: i64, cb: impl Fn(String) + Send + Sync + 'static) -> Option<Unsubscribe<SessionEvent>> {
        let entry = self.sessions.read().await.get(&session_id).cloned()?;
        Some(entry.events.subscribe(move |event| {
            if let SessionEvent::Delta { text } = event {
                cb(text);
            }
            std::future::ready(())
        }))
    }

    pub async fn on_complete(
        &self,
        session_id: i64,
        cb: impl Fn(String, i64) + Send + Sync + 'static,
    ) -> Option<Unsubscribe<SessionEvent>> {
        let entry = self.sessions.read().await.get(&session_id).cloned()?;
        Some(entry.events.subscribe(move |event| {
            if let SessionEvent::Complete { full_text, message_id } = event {
                cb(full_text, message_id);
            }
            std::future::ready(())
        }))
    }

    pub async fn on_tool(
        &self,
        session_id: i64,
        cb: impl Fn(String, Option<String>, ToolStatus) + Send + Sync + 'static,
    ) -> Option<Unsubscribe<SessionEvent>> {
        let entry = self.sessions.read().await.get(&session_id).cloned()?;
        Some(entry.events.subscribe(move |event| {
            if let SessionEvent::Tool { id, name, status } = event {
                cb(id, name, status);
            }
            std::future::ready(())
        }))
    }

    pub async fn on_status(&self, session_id: i64, cb: impl Fn(bool) + Send + Sync + 'static) -> Option<Unsubscribe<SessionEvent>> {
        let entry = self.sessions.read().await.get(&session_id).cloned()?;
        Some(entry.events.subscribe(move |event| {
            if let SessionEvent::Status { working } = event {
                cb(working);
            }
            std::future::ready(())
        }))
    }

    pub async fn on_error(&self, session_id: i64, cb: impl Fn(String) + Send + Sync + 'static) -> Option<Unsubscribe<SessionEvent>> {
        let entry = self.sessions.read().await.get(&session_id).cloned()?;
        Some(entry.events.subscribe(move |event| {
            if let SessionEvent::Error { message } = event {
                cb(message);
            }
            std::future::ready(())
        }))
    }

    /// Installs the event handlers described in `spec.md` §4.1 onto a
    /// freshly-built Bridge's raw event bus, before `start()` is awaited, so
    /// no event can be missed between spawn and subscription.
    fn install_handlers(self: &Arc<Self>, session_id: i64, entry: Arc<SessionEntry>) {
        let manager = Arc::clone(self);
        let events = entry.events.clone();
        entry.bridge.events().subscribe(move |event| {
            let manager = Arc::clone(&manager);
            let events = events.clone();
            async move { manager.handle_bridge_event(session_id, &events, event).await }
        });
    }

    async fn handle_bridge_event(&self, session_id: i64, events: &EventBus<SessionEvent>, event: BridgeEvent) {
        match event {
            BridgeEvent::Delta { text } => {
                self.broadcaster.broadcast(&topic(session_id), serde_json::json!({ "event": "delta", "text": text }));
                events.emit(SessionEvent::Delta { text }).await;
            }
            BridgeEvent::Tool { id, name, status } => {
                self.broadcaster.broadcast(
                    &topic(session_id),
                    serde_json::json!({ "event": "tool", "id": id, "name": name, "status": status }),
                );
                events.emit(SessionEvent::Tool { id, name, status }).await;
            }
            BridgeEvent::Status { working } => {
                events.emit(SessionEvent::Status { working }).await;
            }
            BridgeEvent::Complete { full_text } => {
                // Persistence failures here are logged, not fatal: `complete`
                // still reaches subscribers so the UI's own streamed copy of
                // the text is the fallback (`spec.md` §7).
                let message_id = match queries::messages::insert_message(
                    &self.db,
                    NewMessage {
                        session_id,
                        role: MessageRole::Assistant,
                        kind: MessageType::Message,
                        content: full_text.clone(),
                    },
                )
                .await
                {
                    Ok(id) => id,
                    Err(err) => {
                        tracing::error!(session_id, error = %err, "failed to persist assistant message");
                        -1
                    }
                };
                self.broadcaster.broadcast(
                    &topic(session_id),
                    serde_json::json!({ "event": "complete", "text": full_text, "message_id": message_id }),
                );
                events.emit(SessionEvent::Complete { full_text, message_id }).await;
            }
            BridgeEvent::Error { message } => {
                self.broadcaster.broadcast(&topic(session_id), serde_json::json!({ "event": "error", "message": message }));
                events.emit(SessionEvent::Error { message }).await;
            }
            BridgeEvent::Ready => {}
            BridgeEvent::Session { agent_handle } => {
                if let Err(err) = queries::sessions::set_agent_handle(&self.db, session_id, &agent_handle).await {
                    tracing::error!(session_id, error = %err, "failed to persist agent handle");
                }
            }
            BridgeEvent::Close => {
                // Only act if this session is still considered live: an
                // expected `Close()` call already removed it from the map.
                let still_live = self.sessions.write().await.remove(&session_id).is_some();
                if still_live {
                    if let Err(err) = queries::sessions::update_status(&self.db, session_id, SessionStatus::Closed).await {
                        tracing::error!(session_id, error = %err, "failed to mark session closed after unexpected exit");
                    }
                    events.emit(SessionEvent::Error { message: "Agent process ended unexpectedly".into() }).await;
                    self.broadcaster.broadcast(
                        &topic(session_id),
                        serde_json::json!({ "event": "error", "message": "Agent process ended unexpectedly" }),
                    );
                }
            }
        }
    }
}

fn topic(session_id: i64) -> String {
    format!("session/{session_id}")
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
