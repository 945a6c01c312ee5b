// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire shapes for the `/ws` topic broadcaster.

use serde::Deserialize;
use serde_json::Value;

/// Inbound client frame: `{"action":"subscribe"|"unsubscribe","topic":"..."}`.
#[derive(Debug, Deserialize)]
pub struct InboundFrame {
    pub action: Action,
    pub topic: String,
}

#[derive(Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Subscribe,
    Unsubscribe,
}

/// Parse a raw client text frame. Non-JSON or missing-field frames return
/// `None` so the caller can log and ignore rather than fail the connection.
pub fn parse_inbound(text: &str) -> Option<InboundFrame> {
    serde_json::from_str(text).ok()
}

/// Stitch a topic onto an outbound payload: `{...payload, topic}`.
pub fn with_topic(topic: &str, mut payload: Value) -> Value {
    if let Value::Object(map) = &mut payload {
        map.insert("topic".to_owned(), Value::String(topic.to_owned()));
    }
    payload
}

#[cfg(test)]
#[path = "msg_tests.rs"]
mod tests;
