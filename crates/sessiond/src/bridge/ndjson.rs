// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Streaming-NDJSON Bridge variant: one JSON object per stdout line,
//! explicit message-level turn boundaries (`spec.md` §4.3.1).

use std::sync::atomic::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

use super::{Bridge, BridgeEvent, BridgeState, ToolStatus, WriterHandle};
use crate::event_bus::EventBus;
use crate::framer::LineFramer;
use crate::process;

pub struct NdjsonBridgeOptions {
    pub command: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub cwd: Option<String>,
    pub system_prompt: Option<String>,
    /// Present when resuming a previously-persisted session id.
    pub resume_session_id: Option<String>,
}

pub struct NdjsonBridge {
    state: Arc<BridgeState>,
    options: NdjsonBridgeOptions,
    session_id: Arc<Mutex<Option<String>>>,
    writer: Mutex<Option<WriterHandle>>,
    child: Arc<tokio::sync::Mutex<Option<tokio::process::Child>>>,
}

impl NdjsonBridge {
    pub fn new(options: NdjsonBridgeOptions) -> Self {
        let state = Arc::new(BridgeState::default());
        if options.resume_session_id.is_some() {
            super::mark_resumed(&state);
        }
        Self {
            session_id: Arc::new(Mutex::new(options.resume_session_id.clone())),
            state,
            options,
            writer: Mutex::new(None),
            child: Arc::new(tokio::sync::Mutex::new(None)),
        }
    }
}

#[async_trait]
impl Bridge for NdjsonBridge {
    async fn start(&self) -> anyhow::Result<()> {
        let proc = process::spawn(
            &self.options.command,
            &self.options.args,
            &self.options.env,
            self.options.cwd.as_deref(),
        )?;

        let (tx, mut rx) = mpsc::unbounded_channel::<Bytes>();
        *self.writer.lock() = Some(WriterHandle { tx });

        let mut stdin = proc.stdin;
        tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                if stdin.write_all(&frame).await.is_err() {
                    break;
                }
                if stdin.flush().await.is_err() {
                    break;
                }
            }
        });

        let mut stderr_framer = LineFramer::new(proc.stderr);
        tokio::spawn(async move {
            while let Ok(Some(line)) = stderr_framer.next_line().await {
                tracing::debug!(line = %line, "ndjson bridge stderr");
            }
        });

        let state = Arc::clone(&self.state);
        let session_id = Arc::clone(&self.session_id);
        let child_for_reader = Arc::clone(&self.child);
        tokio::spawn(async move {
            let mut framer = LineFramer::new(proc.stdout);
            while let Ok(Some(line)) = framer.next_line().await {
                dispatch_line(&state, &session_id, &line).await;
            }
            if !state.closing.load(Ordering::Acquire) {
                state.events.emit(BridgeEvent::Error { message: "agent process exited unexpectedly".into() }).await;
            }
            state.events.emit(BridgeEvent::Close).await;
            let mut guard = child_for_reader.lock().await;
            *guard = None;
        });

        *self.child.lock().await = Some(proc.child);
        self.state.ready.store(true, Ordering::Release);
        self.state.events.emit(BridgeEvent::Ready).await;
        Ok(())
    }

    async fn send(&self, text: String) -> anyhow::Result<()> {
        if !self.is_ready() {
            anyhow::bail!("bridge not ready");
        }
        if self.is_busy() {
            anyhow::bail!("bridge busy");
        }

        let composed = super::with_system_prompt_prefix(&self.state, self.options.system_prompt.as_deref(), &text);

        {
            let mut turn = self.state.turn.lock();
            turn.clear();
            turn.in_message = true;
        }

        let session_id = self.session_id.lock().clone().unwrap_or_default();
        let frame = json!({
            "type": "user",
            "message": { "role": "user", "content": composed },
            "session_id": session_id,
            "parent_tool_use_id": Value::Null,
        });
        let mut line = serde_json::to_vec(&frame)?;
        line.push(b'\n');

        let writer = self.writer.lock();
        match writer.as_ref() {
            Some(w) => w.queue(Bytes::from(line)),
            None => anyhow::bail!("bridge not started"),
        }
    }

    async fn abort(&self) {
        if !self.is_ready() {
            return;
        }
        let frame = json!({
            "type": "control_request",
            "request": { "subtype": "interrupt" },
            "request_id": uuid::Uuid::new_v4().to_string(),
        });
        if let Ok(mut line) = serde_json::to_vec(&frame) {
            line.push(b'\n');
            if let Some(w) = self.writer.lock().as_ref() {
                let _ = w.queue(Bytes::from(line));
            }
        }
    }

    async fn close(&self) {
        self.state.closing.store(true, Ordering::Release);
        *self.writer.lock() = None;

        let mut guard = self.child.lock().await;
        if let Some(mut child) = guard.take() {
            process::terminate(&mut child).await;
        }
    }

    fn is_ready(&self) -> bool {
        self.state.is_ready()
    }

    fn is_busy(&self) -> bool {
        self.state.is_busy()
    }

    fn events(&self) -> &EventBus<BridgeEvent> {
        &self.state.events
    }
}

async fn dispatch_line(state: &Arc<BridgeState>, session_id: &Arc<Mutex<Option<String>>>, line: &str) {
    let Ok(value) = serde_json::from_str::<Value>(line) else {
        tracing::debug!(line, "ndjson bridge: unparseable line, dropping");
        return;
    };

    let Some(kind) = value.get("type").and_then(Value::as_str) else {
        tracing::debug!(line, "ndjson bridge: line missing type field, dropping");
        return;
    };

    match kind {
        "system" => {
            if value.get("subtype").and_then(Value::as_str) == Some("init") {
                if let Some(id) = value.get("session_id").and_then(Value::as_str) {
                    let mut guard = session_id.lock();
                    if guard.is_none() {
                        *guard = Some(id.to_owned());
                        drop(guard);
                        state.events.emit(BridgeEvent::Session { agent_handle: id.to_owned() }).await;
                    }
                }
            }
        }
        "assistant" => {
            state.events.emit(BridgeEvent::Status { working: true }).await;
        }
        "stream_event" => handle_stream_event(state, &value).await,
        "tool_progress" => {
            let id = value.get("tool_use_id").and_then(Value::as_str).unwrap_or_default().to_owned();
            let name = value.get("tool_name").and_then(Value::as_str).map(str::to_owned);
            state.events.emit(BridgeEvent::Tool { id, name, status: ToolStatus::Update }).await;
        }
        "user" => handle_tool_result(state, &value).await,
        "result" => handle_result(state, &value).await,
        "keep_alive" => {}
        other => {
            tracing::debug!(kind = other, "ndjson bridge: unrecognized line type, ignoring");
        }
    }
}

async fn handle_stream_event(state: &Arc<BridgeState>, value: &Value) {
    let Some(event) = value.get("event") else { return };
    let Some(event_type) = event.get("type").and_then(Value::as_str) else { return };

    match event_type {
        "content_block_delta" => {
            let is_text = event.get("delta").and_then(|d| d.get("type")).and_then(Value::as_str) == Some("text_delta");
            if !is_text {
                return;
            }
            let Some(text) = event.get("delta").and_then(|d| d.get("text")).and_then(Value::as_str) else {
                return;
            };
            state.turn.lock().accumulator.push_str(text);
            state.events.emit(BridgeEvent::Delta { text: text.to_owned() }).await;
        }
        "content_block_start" => {
            let block = event.get("content_block");
            if block.and_then(|b| b.get("type")).and_then(Value::as_str) != Some("tool_use") {
                return;
            }
            let Some(id) = block.and_then(|b| b.get("id")).and_then(Value::as_str) else { return };
            let name = block.and_then(|b| b.get("name")).and_then(Value::as_str).map(str::to_owned);
            state.turn.lock().active_tools.insert(id.to_owned(), name.clone());
            state.events.emit(BridgeEvent::Tool { id: id.to_owned(), name, status: ToolStatus::Start }).await;
        }
        _ => {}
    }
}

async fn handle_tool_result(state: &Arc<BridgeState>, value: &Value) {
    let Some(content) = value.get("message").and_then(|m| m.get("content")).and_then(Value::as_array) else {
        return;
    };
    for item in content {
        if item.get("type").and_then(Value::as_str) != Some("tool_result") {
            continue;
        }
        let Some(id) = item.get("tool_use_id").and_then(Value::as_str) else { continue };
        let name = state.turn.lock().active_tools.remove(id).flatten();
        state.events.emit(BridgeEvent::Tool { id: id.to_owned(), name, status: ToolStatus::End }).await;
    }
}

async fn handle_result(state: &Arc<BridgeState>, value: &Value) {
    let subtype = value.get("subtype").and_then(Value::as_str).unwrap_or("unknown");

    // Clear before emitting: `in_message` must already be `false` by the
    // time a `complete`/`error` subscriber runs, so a `Send` arriving while
    // those callbacks are still dispatching is accepted rather than
    // rejected as `Busy` (`spec.md` §9, Open Question 1).
    let full_text = {
        let mut turn = state.turn.lock();
        let text = turn.accumulator.clone();
        turn.clear();
        text
    };

    if subtype == "success" {
        state.events.emit(BridgeEvent::Complete { full_text }).await;
    } else {
        let message = value
            .get("errors")
            .and_then(Value::as_array)
            .map(|errors| {
                errors.iter().filter_map(Value::as_str).collect::<Vec<_>>().join("; ")
            })
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| subtype.to_owned());
        state.events.emit(BridgeEvent::Error { message }).await;
    }
}

#[cfg(test)]
#[path = "ndjson_tests.rs"]
mod tests;
