// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The uniform `Bridge` contract and the state every variant shares.
//!
//! Three concrete types implement [`Bridge`] — [`ndjson`], [`rpc`], and
//! [`jsonl`] — one per wire protocol. They are distinct types, not one
//! configurable type, because their turn-completion semantics differ
//! structurally (stream-end record vs. RPC notification vs. explicit
//! `agent_end`).

pub mod jsonl;
pub mod ndjson;
pub mod rpc;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::event_bus::EventBus;

/// Status of a single tool invocation within a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Start,
    Update,
    End,
}

/// Events a Bridge emits on its [`EventBus`]. Wire order within a session is
/// load-bearing: see `spec.md` §5's ordering guarantees.
#[derive(Debug, Clone)]
pub enum BridgeEvent {
    Delta { text: String },
    Tool { id: String, name: Option<String>, status: ToolStatus },
    Status { working: bool },
    Complete { full_text: String },
    Error { message: String },
    Ready,
    Close,
    Session { agent_handle: String },
}

/// In-memory per-turn accumulation state, shared between a Bridge's reader
/// task (sole writer) and its public `is_busy`/`send` surface (readers).
#[derive(Default)]
pub struct TurnState {
    pub accumulator: String,
    pub in_message: bool,
    pub active_tools: HashMap<String, Option<String>>,
    pub current_turn_id: Option<String>,
}

impl TurnState {
    pub fn clear(&mut self) {
        self.accumulator.clear();
        self.in_message = false;
        self.active_tools.clear();
        self.current_turn_id = None;
    }
}

/// Shared `ready`/`closing` flags plus the turn state, common to all three
/// Bridge variants. Embedded (not inherited — Rust has no struct
/// inheritance) by each concrete Bridge.
pub struct BridgeState {
    pub ready: AtomicBool,
    pub closing: AtomicBool,
    pub first_message: AtomicBool,
    pub turn: Mutex<TurnState>,
    pub events: EventBus<BridgeEvent>,
}

impl Default for BridgeState {
    fn default() -> Self {
        Self {
            ready: AtomicBool::new(false),
            closing: AtomicBool::new(false),
            first_message: AtomicBool::new(true),
            turn: Mutex::new(TurnState::default()),
            events: EventBus::new(),
        }
    }
}

impl BridgeState {
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub fn is_busy(&self) -> bool {
        self.turn.lock().in_message
    }
}

/// The uniform contract every wire-protocol adapter implements. See
/// `spec.md` §4.3 for the per-variant dispatch tables this wraps.
#[async_trait]
pub trait Bridge: Send + Sync {
    /// Spawn the child, wire its I/O, perform any protocol handshake, mark
    /// ready. Spawn failures propagate as `Err` and leave nothing running.
    async fn start(&self) -> anyhow::Result<()>;

    /// Forbidden unless `ready && !busy`; composes into the protocol's frame
    /// and queues it to the writer task.
    async fn send(&self, text: String) -> anyhow::Result<()>;

    /// Best-effort cancel of the active turn. No-op if not ready.
    async fn abort(&self);

    /// Sets `closing`, cancels in-flight work, closes stdin, SIGTERM then
    /// SIGKILL after the grace period, joins, drains the event bus.
    async fn close(&self);

    fn is_ready(&self) -> bool;

    fn is_busy(&self) -> bool;

    /// The Bridge's per-instance event bus.
    fn events(&self) -> &EventBus<BridgeEvent>;
}

/// Shared helper: compose the outgoing frame for the first `Send` of a
/// session when a system prompt is configured, per `spec.md` §4.3 item 5.
pub fn with_system_prompt_prefix(state: &BridgeState, system_prompt: Option<&str>, text: &str) -> String {
    let is_first = state.first_message.swap(false, Ordering::AcqRel);
    match (is_first, system_prompt) {
        (true, Some(prompt)) if !prompt.is_empty() => format!("{prompt}\n\n{text}"),
        _ => text.to_owned(),
    }
}

/// Clears `_firstMessage` to `false` up front, for bridges constructed to
/// resume a persisted agent handle (`spec.md` §4.3 item 5: "When resuming an
/// agent handle, `_firstMessage` starts false").
pub fn mark_resumed(state: &BridgeState) {
    state.first_message.store(false, Ordering::Release);
}

/// Shared wiring for a child process's `Arc<BridgeState>` plus the writer
/// channel used by `Send`/`Abort` so they never await the OS write directly.
pub struct WriterHandle {
    pub tx: tokio::sync::mpsc::UnboundedSender<bytes::Bytes>,
}

impl WriterHandle {
    pub fn queue(&self, frame: bytes::Bytes) -> anyhow::Result<()> {
        self.tx.send(frame).map_err(|_| anyhow::anyhow!("bridge writer task has exited"))
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
