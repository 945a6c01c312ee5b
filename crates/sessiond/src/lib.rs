// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent Session Core: subprocess-backed AI chat sessions with WebSocket
//! fan-out.
//!
//! Spawns and supervises external agent processes over three wire
//! protocols (`bridge::ndjson`, `bridge::rpc`, `bridge::jsonl`), translates
//! them into a uniform event stream (`bridge::BridgeEvent`), multiplexes
//! that stream per session (`event_bus`), persists conversation state
//! (`sessiond_storage`), and fans streaming deltas out to WebSocket clients
//! subscribed to `session/{id}` topics (`ws`).

pub mod bridge;
pub mod config;
pub mod error;
pub mod event_bus;
pub mod framer;
pub mod process;
pub mod registry;
pub mod server;
pub mod session;
pub mod ws;

pub use error::{AgentError, ErrorCode};
pub use session::{ActionContext, SessionEvent, SessionManager};
