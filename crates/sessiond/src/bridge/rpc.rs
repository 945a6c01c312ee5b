// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! JSON-RPC Bridge variant: agents that speak JSON-RPC 2.0 over stdio, with
//! explicit `turn/completed` notifications as turn boundaries (`spec.md`
//! §4.3.2). Pending requests are correlated by id, the same pattern the
//! websocket-upstream bridge uses for its downstream request routing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};

use super::{Bridge, BridgeEvent, BridgeState, ToolStatus, WriterHandle};
use crate::event_bus::EventBus;
use crate::framer::LineFramer;
use crate::process;

const HANDSHAKE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

pub struct RpcBridgeOptions {
    pub command: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub cwd: Option<String>,
    pub system_prompt: Option<String>,
    pub resume_thread_id: Option<String>,
}

#[derive(Default)]
struct RpcState {
    thread_id: Option<String>,
    current_turn_id: Option<String>,
}

type PendingMap = HashMap<String, oneshot::Sender<Result<Value, Value>>>;

/// Canonical correlation key for a JSON-RPC id. JSON-RPC 2.0 ids are
/// ordinarily numbers, not strings (`spec.md` §6 requires the wire envelope
/// stay bit-exact so any conforming agent can be driven unmodified), so this
/// accepts both `Value::Number` and `Value::String` rather than only the
/// latter. The `s`/`n` tag keeps `"1"` and `1` from colliding.
fn rpc_id_key(id: &Value) -> Option<String> {
    match id {
        Value::String(s) => Some(format!("s{s}")),
        Value::Number(n) => Some(format!("n{n}")),
        _ => None,
    }
}

pub struct RpcBridge {
    state: Arc<BridgeState>,
    options: RpcBridgeOptions,
    rpc: Arc<Mutex<RpcState>>,
    next_request_id: AtomicU64,
    pending: Arc<Mutex<PendingMap>>,
    writer: Arc<Mutex<Option<WriterHandle>>>,
    child: Arc<tokio::sync::Mutex<Option<tokio::process::Child>>>,
}

impl RpcBridge {
    pub fn new(options: RpcBridgeOptions) -> Self {
        let state = Arc::new(BridgeState::default());
        if options.resume_thread_id.is_some() {
            super::mark_resumed(&state);
        }
        Self {
            state,
            options,
            rpc: Arc::new(Mutex::new(RpcState::default())),
            next_request_id: AtomicU64::new(1),
            pending: Arc::new(Mutex::new(HashMap::new())),
            writer: Arc::new(Mutex::new(None)),
            child: Arc::new(tokio::sync::Mutex::new(None)),
        }
    }

    fn allocate_id(&self) -> String {
        self.next_request_id.fetch_add(1, Ordering::Relaxed).to_string()
    }

    fn write_frame(&self, frame: Value) -> anyhow::Result<()> {
        let mut line = serde_json::to_vec(&frame)?;
        line.push(b'\n');
        let writer = self.writer.lock();
        match writer.as_ref() {
            Some(w) => w.queue(Bytes::from(line)),
            None => anyhow::bail!("bridge not started"),
        }
    }

    /// Send a request and await its correlated response. Used only during the
    /// handshake, where the caller must block on the result.
    async fn call(&self, method: &str, params: Value) -> anyhow::Result<Value> {
        let id = self.allocate_id();
        let id_value = Value::String(id);
        let key = rpc_id_key(&id_value).unwrap_or_default();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(key.clone(), tx);

        let frame = json!({ "jsonrpc": "2.0", "id": id_value, "method": method, "params": params });
        if let Err(err) = self.write_frame(frame) {
            self.pending.lock().remove(&key);
            return Err(err);
        }

        match tokio::time::timeout(HANDSHAKE_TIMEOUT, rx).await {
            Ok(Ok(Ok(result))) => Ok(result),
            Ok(Ok(Err(error))) => anyhow::bail!("rpc error from agent: {error}"),
            Ok(Err(_)) => anyhow::bail!("rpc response channel dropped"),
            Err(_) => {
                self.pending.lock().remove(&key);
                anyhow::bail!("rpc request {method} timed out")
            }
        }
    }

    fn notify(&self, method: &str, params: Value) -> anyhow::Result<()> {
        self.write_frame(json!({ "jsonrpc": "2.0", "method": method, "params": params }))
    }
}

#[async_trait]
impl Bridge for RpcBridge {
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
                tracing::debug!(line = %line, "rpc bridge stderr");
            }
        });

        let state = Arc::clone(&self.state);
        let rpc = Arc::clone(&self.rpc);
        let pending = Arc::clone(&self.pending);
        let writer_for_reader = Arc::clone(&self.writer);
        let child_for_reader = Arc::clone(&self.child);
        tokio::spawn(async move {
            let mut framer = LineFramer::new(proc.stdout);
            while let Ok(Some(line)) = framer.next_line().await {
                dispatch_line(&state, &rpc, &pending, &writer_for_reader, &line).await;
            }
            if !state.closing.load(Ordering::Acquire) {
                state.events.emit(BridgeEvent::Error { message: "agent process exited unexpectedly".into() }).await;
            }
            state.events.emit(BridgeEvent::Close).await;
            let mut guard = child_for_reader.lock().await;
            *guard = None;
        });

        *self.child.lock().await = Some(proc.child);

        self.call("initialize", json!({ "clientInfo": { "name": "sessiond", "version": env!("CARGO_PKG_VERSION") } })).await?;
        self.notify("initialized", json!({}))?;

        let thread_result = if let Some(thread_id) = &self.options.resume_thread_id {
            self.call("thread/resume", json!({ "threadId": thread_id })).await?
        } else {
            self.call("thread/start", json!({})).await?
        };
        let thread_id = thread_result
            .get("threadId")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow::anyhow!("agent did not return a threadId"))?
            .to_owned();
        self.rpc.lock().thread_id = Some(thread_id.clone());

        self.state.events.emit(BridgeEvent::Session { agent_handle: thread_id }).await;
        self.state.ready.store(true, Ordering::Release);
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
        let thread_id = self.rpc.lock().thread_id.clone().ok_or_else(|| anyhow::anyhow!("no thread id"))?;

        {
            let mut turn = self.state.turn.lock();
            turn.clear();
            turn.in_message = true;
        }

        let id = self.allocate_id();
        let id_value = Value::String(id);
        let key = rpc_id_key(&id_value).unwrap_or_default();
        let frame = json!({
            "jsonrpc": "2.0",
            "id": id_value,
            "method": "turn/start",
            "params": { "threadId": thread_id, "input": composed, "approvalPolicy": "auto-edit" },
        });

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(key, tx);
        self.write_frame(frame)?;

        let rpc = Arc::clone(&self.rpc);
        let state = Arc::clone(&self.state);
        tokio::spawn(async move { handle_turn_start_response(&state, &rpc, rx.await).await });

        Ok(())
    }

    async fn abort(&self) {
        if !self.is_ready() {
            return;
        }
        let (thread_id, turn_id) = {
            let rpc = self.rpc.lock();
            (rpc.thread_id.clone(), rpc.current_turn_id.clone())
        };
        if let (Some(thread_id), Some(turn_id)) = (thread_id, turn_id) {
            let id = self.allocate_id();
            let _ = self.write_frame(json!({
                "jsonrpc": "2.0",
                "id": id,
                "method": "turn/interrupt",
                "params": { "threadId": thread_id, "turnId": turn_id },
            }));
        }
    }

    async fn close(&self) {
        self.state.closing.store(true, Ordering::Release);

        let (thread_id, turn_id) = {
            let rpc = self.rpc.lock();
            (rpc.thread_id.clone(), rpc.current_turn_id.clone())
        };
        if let (Some(thread_id), Some(turn_id)) = (thread_id, turn_id) {
            let _ = self.notify("turn/interrupt", json!({ "threadId": thread_id, "turnId": turn_id }));
        }

        for (_, tx) in self.pending.lock().drain() {
            let _ = tx.send(Err(json!({ "message": "bridge closing" })));
        }

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
    rpc: &Arc<Mutex<RpcState>>,
    pending: &Arc<Mutex<PendingMap>>,
    writer: &Arc<Mutex<Option<WriterHandle>>>,
    line: &str,
) {
    let Ok(value) = serde_json::from_str::<Value>(line) else {
        tracing::debug!(line, "rpc bridge: unparseable line, dropping");
        return;
    };

    // JSON-RPC 2.0 ids are ordinarily numbers, not just strings; both must
    // round-trip unmodified (`spec.md` §6).
    let id = value.get("id").cloned().filter(|v| matches!(v, Value::String(_) | Value::Number(_)));
    let method = value.get("method").and_then(Value::as_str).map(str::to_owned);

    match (id, method) {
        (Some(id), None) => {
            // Response to one of our requests.
            let Some(key) = rpc_id_key(&id) else { return };
            let Some(sender) = pending.lock().remove(&key) else {
                tracing::debug!(id = %id, "rpc bridge: response to unknown request id, dropping");
                return;
            };
            if let Some(error) = value.get("error") {
                let _ = sender.send(Err(error.clone()));
            } else {
                let _ = sender.send(Ok(value.get("result").cloned().unwrap_or(Value::Null)));
            }
        }
        (Some(id), Some(method)) => {
            // Server request: must always respond, known or not, echoing the
            // id back exactly as received (string or number).
            let response = match method.as_str() {
                "approval_request" | "permission_request" => {
                    json!({ "jsonrpc": "2.0", "id": id, "result": { "decision": "accept" } })
                }
                _ => json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "error": { "code": -32601, "message": format!("method not found: {method}") },
                }),
            };
            if let Some(w) = writer.lock().as_ref() {
                if let Ok(mut line) = serde_json::to_vec(&response) {
                    line.push(b'\n');
                    let _ = w.queue(Bytes::from(line));
                }
            }
        }
        (None, Some(method)) => handle_notification(state, rpc, &method, &value).await,
        (None, None) => {
            tracing::debug!(line, "rpc bridge: line is neither request, response, nor notification");
        }
    }
}

async fn handle_notification(state: &Arc<BridgeState>, rpc: &Arc<Mutex<RpcState>>, method: &str, value: &Value) {
    let params = value.get("params").cloned().unwrap_or(Value::Null);
    match method {
        "turn/started" => {
            state.events.emit(BridgeEvent::Status { working: true }).await;
        }
        "turn/completed" => {
            let status = params.get("status").and_then(Value::as_str).unwrap_or("completed");
            // Clear before emitting: `in_message` must already be `false` by
            // the time a `complete`/`error` subscriber runs, so a `Send`
            // arriving while those callbacks are still dispatching is
            // accepted rather than rejected as `Busy` (`spec.md` §9, Open
            // Question 1).
            let full_text = {
                let mut turn = state.turn.lock();
                let text = turn.accumulator.clone();
                turn.clear();
                text
            };
            rpc.lock().current_turn_id = None;
            if status == "failed" {
                state.events.emit(BridgeEvent::Error { message: "turn failed".into() }).await;
            } else {
                state.events.emit(BridgeEvent::Complete { full_text }).await;
            }
        }
        "item/started" | "item/completed" => {
            let Some(item) = params.get("item") else { return };
            if !is_command_like(item) {
                return;
            }
            let Some(id) = item.get("id").and_then(Value::as_str) else { return };
            let name = item.get("command").and_then(Value::as_str).map(str::to_owned);
            let status = if method == "item/started" { ToolStatus::Start } else { ToolStatus::End };
            state.events.emit(BridgeEvent::Tool { id: id.to_owned(), name, status }).await;
        }
        "text_delta" | "output/delta" => {
            let Some(text) = params.get("text").and_then(Value::as_str) else { return };
            state.turn.lock().accumulator.push_str(text);
            state.events.emit(BridgeEvent::Delta { text: text.to_owned() }).await;
        }
        other => {
            tracing::debug!(method = other, "rpc bridge: unrecognized notification, ignoring");
        }
    }
}

/// Resolve the pending `turn/start` response once it (or a dropped sender)
/// arrives. A JSON-RPC error here means no `turn/completed` notification
/// will ever follow, so the safest choice is to end the turn here: emit
/// `error` and clear turn state rather than leave the Bridge `busy` forever.
async fn handle_turn_start_response(
    state: &Arc<BridgeState>,
    rpc: &Arc<Mutex<RpcState>>,
    response: Result<Result<Value, Value>, oneshot::error::RecvError>,
) {
    match response {
        Ok(Ok(result)) => {
            if let Some(turn_id) = result.get("turnId").and_then(Value::as_str) {
                rpc.lock().current_turn_id = Some(turn_id.to_owned());
            }
        }
        Ok(Err(error)) => {
            state.turn.lock().clear();
            rpc.lock().current_turn_id = None;
            state.events.emit(BridgeEvent::Error { message: format!("turn/start failed: {error}") }).await;
        }
        Err(_) => {
            // Pending map was drained by `close()`; nothing to report.
        }
    }
}

fn is_command_like(item: &Value) -> bool {
    matches!(
        item.get("type").and_then(Value::as_str),
        Some("command" | "command_execution" | "shell" | "exec")
    )
}

#[cfg(test)]
#[path = "rpc_tests.rs"]
mod tests;
