// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Command-JSONL Bridge variant: line-delimited JSON commands on stdin,
//! line-delimited event records on stdout, explicit `agent_end` turn
//! boundaries (`spec.md` §4.3.3).

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

pub struct JsonlBridgeOptions {
    pub command: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub cwd: Option<String>,
    pub system_prompt: Option<String>,
    pub resume_session_path: Option<String>,
}

pub struct JsonlBridge {
    state: Arc<BridgeState>,
    options: JsonlBridgeOptions,
    session_path: Arc<Mutex<Option<String>>>,
    writer: Arc<Mutex<Option<WriterHandle>>>,
    child: Arc<tokio::sync::Mutex<Option<tokio::process::Child>>>,
}

impl JsonlBridge {
    pub fn new(options: JsonlBridgeOptions) -> Self {
        let state = Arc::new(BridgeState::default());
        if options.resume_session_path.is_some() {
            super::mark_resumed(&state);
        }
        Self {
            session_path: Arc::new(Mutex::new(options.resume_session_path.clone())),
            state,
            options,
            writer: Arc::new(Mutex::new(None)),
            child: Arc::new(tokio::sync::Mutex::new(None)),
        }
    }
}

#[async_trait]
impl Bridge for JsonlBridge {
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
                tracing::debug!(line = %line, "jsonl bridge stderr");
            }
        });

        let state = Arc::clone(&self.state);
        let session_path = Arc::clone(&self.session_path);
        let writer_for_reader = Arc::clone(&self.writer);
        let child_for_reader = Arc::clone(&self.child);
        tokio::spawn(async move {
            let mut framer = LineFramer::new(proc.stdout);
            while let Ok(Some(line)) = framer.next_line().await {
                dispatch_line(&state, &session_path, &writer_for_reader, &line).await;
            }
            if !state.closing.load(Ordering::Acquire) {
                state.events.emit(BridgeEvent::Error { message: "agent process exited unexpectedly".into() }).await;
            }
            state.events.emit(BridgeEvent::Close).await;
            let mut guard = child_for_reader.lock().await;
            *guard = None;
        });

        *self.child.lock().await = Some(proc.child);

        // Ready once stdout is being read; yield one scheduler tick so an
        // immediate spawn failure (binary missing) has a chance to surface
        // through the stdout-EOF path before callers treat this as live.
        tokio::task::yield_now().await;
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

        let frame = json!({ "type": "prompt", "message": composed });
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
        let frame = json!({ "type": "abort" });
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

async fn dispatch_line(
    state: &Arc<BridgeState>,
    session_path: &Arc<Mutex<Option<String>>>,
    writer: &Arc<Mutex<Option<WriterHandle>>>,
    line: &str,
) {
    let Ok(value) = serde_json::from_str::<Value>(line) else {
        tracing::debug!(line, "jsonl bridge: unparseable line, dropping");
        return;
    };

    let Some(kind) = value.get("type").and_then(Value::as_str) else {
        tracing::debug!(line, "jsonl bridge: line missing type field, dropping");
        return;
    };

    match kind {
        "message_start" => state.turn.lock().in_message = true,
        "message_end" => state.turn.lock().in_message = false,
        "message_update" => handle_message_update(state, &value).await,
        "agent_end" => {
            // Clear before emitting, so `in_message` is already `false` by
            // the time a `complete` subscriber runs (`spec.md` §9, Open
            // Question 1).
            let full_text = {
                let mut turn = state.turn.lock();
                let text = turn.accumulator.clone();
                turn.clear();
                text
            };
            state.events.emit(BridgeEvent::Complete { full_text }).await;
        }
        "tool_execution_start" | "tool_execution_update" | "tool_execution_end" => {
            let id = value.get("id").and_then(Value::as_str).unwrap_or_default().to_owned();
            let name = value.get("name").and_then(Value::as_str).map(str::to_owned);
            let status = match kind {
                "tool_execution_start" => ToolStatus::Start,
                "tool_execution_update" => ToolStatus::Update,
                _ => ToolStatus::End,
            };
            state.events.emit(BridgeEvent::Tool { id, name, status }).await;
        }
        "session" => {
            if let Some(path) = value.get("sessionFile").and_then(Value::as_str) {
                *session_path.lock() = Some(path.to_owned());
                state.events.emit(BridgeEvent::Session { agent_handle: path.to_owned() }).await;
            }
        }
        "extension_ui_request" => auto_reject_dialog(writer, &value).await,
        "response" => {
            if value.get("success").and_then(Value::as_bool) == Some(false) {
                let message = value.get("error").and_then(Value::as_str).unwrap_or("request failed").to_owned();
                state.events.emit(BridgeEvent::Error { message }).await;
            }
        }
        other => {
            tracing::debug!(kind = other, "jsonl bridge: unrecognized line type, ignoring");
        }
    }
}

async fn handle_message_update(state: &Arc<BridgeState>, value: &Value) {
    let Some(event) = value.get("assistantMessageEvent") else { return };
    let Some(event_type) = event.get("type").and_then(Value::as_str) else { return };

    match event_type {
        "text_delta" => {
            let Some(text) = event.get("delta").and_then(Value::as_str) else { return };
            state.turn.lock().accumulator.push_str(text);
            state.events.emit(BridgeEvent::Delta { text: text.to_owned() }).await;
        }
        "text_start" => {
            let needs_separator = !state.turn.lock().accumulator.is_empty();
            if needs_separator {
                state.turn.lock().accumulator.push_str("\n\n");
                state.events.emit(BridgeEvent::Delta { text: "\n\n".into() }).await;
            }
        }
        "error" => {
            let message = event.get("error").and_then(Value::as_str).unwrap_or("agent reported an error").to_owned();
            state.turn.lock().clear();
            state.events.emit(BridgeEvent::Error { message }).await;
        }
        _ => {}
    }
}

async fn auto_reject_dialog(writer: &Arc<Mutex<Option<WriterHandle>>>, value: &Value) {
    let is_dialog_method = matches!(
        value.get("method").and_then(Value::as_str),
        Some("select" | "confirm" | "input" | "editor")
    );
    let Some(id) = value.get("id").and_then(Value::as_str) else { return };
    if !is_dialog_method {
        tracing::debug!(id, "jsonl bridge: extension_ui_request with unrecognized method, ignoring");
        return;
    }
    let response = json!({ "type": "extension_ui_response", "id": id, "cancelled": true });
    let Ok(mut line) = serde_json::to_vec(&response) else { return };
    line.push(b'\n');
    if let Some(w) = writer.lock().as_ref() {
        let _ = w.queue(Bytes::from(line));
    }
}

#[cfg(test)]
#[path = "jsonl_tests.rs"]
mod tests;
