// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde_json::json;

use super::*;

#[test]
fn parses_a_subscribe_frame() {
    let frame = parse_inbound(r#"{"action":"subscribe","topic":"session/7"}"#).expect("valid frame");
    assert_eq!(frame.action, Action::Subscribe);
    assert_eq!(frame.topic, "session/7");
}

#[test]
fn parses_an_unsubscribe_frame() {
    let frame = parse_inbound(r#"{"action":"unsubscribe","topic":"session/7"}"#).expect("valid frame");
    assert_eq!(frame.action, Action::Unsubscribe);
}

#[test]
fn rejects_non_json() {
    assert!(parse_inbound("not json").is_none());
}

#[test]
fn rejects_missing_topic() {
    assert!(parse_inbound(r#"{"action":"subscribe"}"#).is_none());
}

#[test]
fn with_topic_merges_into_an_object_payload() {
    let merged = with_topic("session/7", json!({"delta": "x"}));
    assert_eq!(merged, json!({"delta": "x", "topic": "session/7"}));
}
