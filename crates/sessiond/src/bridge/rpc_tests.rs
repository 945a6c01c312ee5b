// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::oneshot;

use super::*;

fn recorder() -> (Arc<BridgeState>, Arc<Mutex<Vec<String>>>) {
    let state = Arc::new(BridgeState::default());
    let log = Arc::new(Mutex::new(Vec::new()));
    let log_clone = Arc::clone(&log);
    state.events.subscribe(move |event: BridgeEvent| {
        let log = Arc::clone(&log_clone);
        async move {
            log.lock().push(format!("{event:?}"));
        }
    });
    (state, log)
}

#[tokio::test]
async fn response_routes_to_the_pending_request() {
    let (state, _log) = recorder();
    let rpc = Arc::new(Mutex::new(RpcState::default()));
    let pending: Arc<Mutex<PendingMap>> = Arc::new(Mutex::new(HashMap::new()));
    let writer: Arc<Mutex<Option<WriterHandle>>> = Arc::new(Mutex::new(None));

    let (tx, rx) = oneshot::channel();
    pending.lock().insert(rpc_id_key(&json!("1")).expect("string id has a key"), tx);

    dispatch_line(&state, &rpc, &pending, &writer, r#"{"jsonrpc":"2.0","id":"1","result":{"threadId":"t1"}}"#).await;

    let result = rx.await;
    assert!(matches!(result, Ok(Ok(v)) if v.get("threadId").and_then(Value::as_str) == Some("t1")));
    assert!(pending.lock().is_empty());
}

#[tokio::test]
async fn numeric_response_id_routes_to_the_pending_request() {
    let (state, _log) = recorder();
    let rpc = Arc::new(Mutex::new(RpcState::default()));
    let pending: Arc<Mutex<PendingMap>> = Arc::new(Mutex::new(HashMap::new()));
    let writer: Arc<Mutex<Option<WriterHandle>>> = Arc::new(Mutex::new(None));

    let (tx, rx) = oneshot::channel();
    pending.lock().insert(rpc_id_key(&json!(1)).expect("number id has a key"), tx);

    dispatch_line(&state, &rpc, &pending, &writer, r#"{"jsonrpc":"2.0","id":1,"result":{"threadId":"t1"}}"#).await;

    let result = rx.await;
    assert!(matches!(result, Ok(Ok(v)) if v.get("threadId").and_then(Value::as_str) == Some("t1")));
    assert!(pending.lock().is_empty());
}

#[tokio::test]
async fn string_and_numeric_ids_with_the_same_digits_do_not_collide() {
    assert_ne!(rpc_id_key(&json!("1")), rpc_id_key(&json!(1)));
}

#[tokio::test]
async fn unknown_response_id_is_dropped_quietly() {
    let (state, _log) = recorder();
    let rpc = Arc::new(Mutex::new(RpcState::default()));
    let pending: Arc<Mutex<PendingMap>> = Arc::new(Mutex::new(HashMap::new()));
    let writer: Arc<Mutex<Option<WriterHandle>>> = Arc::new(Mutex::new(None));

    dispatch_line(&state, &rpc, &pending, &writer, r#"{"jsonrpc":"2.0","id":"missing","result":{}}"#).await;
    assert!(pending.lock().is_empty());
}

#[tokio::test]
async fn server_request_with_unknown_method_gets_method_not_found() -> anyhow::Result<()> {
    let (state, _log) = recorder();
    let rpc = Arc::new(Mutex::new(RpcState::default()));
    let pending: Arc<Mutex<PendingMap>> = Arc::new(Mutex::new(HashMap::new()));
    let (tx, mut rx) = mpsc::unbounded_channel();
    let writer: Arc<Mutex<Option<WriterHandle>>> = Arc::new(Mutex::new(Some(WriterHandle { tx })));

    dispatch_line(&state, &rpc, &pending, &writer, r#"{"jsonrpc":"2.0","id":"5","method":"weird/thing","params":{}}"#).await;

    let sent = rx.recv().await.ok_or_else(|| anyhow::anyhow!("no response queued"))?;
    let value: Value = serde_json::from_slice(&sent)?;
    assert_eq!(value["error"]["code"], json!(-32601));
    Ok(())
}

#[tokio::test]
async fn server_request_with_numeric_id_still_gets_a_response() -> anyhow::Result<()> {
    let (state, _log) = recorder();
    let rpc = Arc::new(Mutex::new(RpcState::default()));
    let pending: Arc<Mutex<PendingMap>> = Arc::new(Mutex::new(HashMap::new()));
    let (tx, mut rx) = mpsc::unbounded_channel();
    let writer: Arc<Mutex<Option<WriterHandle>>> = Arc::new(Mutex::new(Some(WriterHandle { tx })));

    dispatch_line(&state, &rpc, &pending, &writer, r#"{"jsonrpc":"2.0","id":7,"method":"approval_request","params":{}}"#).await;

    let sent = rx.recv().await.ok_or_else(|| anyhow::anyhow!("no response queued for numeric id"))?;
    let value: Value = serde_json::from_slice(&sent)?;
    assert_eq!(value["id"], json!(7));
    assert_eq!(value["result"]["decision"], json!("accept"));
    Ok(())
}

#[tokio::test]
async fn server_request_for_approval_is_auto_accepted() -> anyhow::Result<()> {
    let (state, _log) = recorder();
    let rpc = Arc::new(Mutex::new(RpcState::default()));
    let pending: Arc<Mutex<PendingMap>> = Arc::new(Mutex::new(HashMap::new()));
    let (tx, mut rx) = mpsc::unbounded_channel();
    let writer: Arc<Mutex<Option<WriterHandle>>> = Arc::new(Mutex::new(Some(WriterHandle { tx })));

    dispatch_line(&state, &rpc, &pending, &writer, r#"{"jsonrpc":"2.0","id":"9","method":"approval_request","params":{}}"#).await;

    let sent = rx.recv().await.ok_or_else(|| anyhow::anyhow!("no response queued"))?;
    let value: Value = serde_json::from_slice(&sent)?;
    assert_eq!(value["result"]["decision"], json!("accept"));
    Ok(())
}

#[tokio::test]
async fn turn_completed_success_emits_complete_and_clears_turn_id() {
    let (state, log) = recorder();
    let rpc = Arc::new(Mutex::new(RpcState { thread_id: Some("t1".into()), current_turn_id: Some("turn-1".into()) }));
    let pending: Arc<Mutex<PendingMap>> = Arc::new(Mutex::new(HashMap::new()));
    let writer: Arc<Mutex<Option<WriterHandle>>> = Arc::new(Mutex::new(None));

    state.turn.lock().accumulator.push_str("hello");
    dispatch_line(&state, &rpc, &pending, &writer, r#"{"jsonrpc":"2.0","method":"turn/completed","params":{"status":"ok"}}"#).await;

    assert_eq!(rpc.lock().current_turn_id, None);
    assert!(state.turn.lock().accumulator.is_empty());
    let entries = log.lock();
    assert!(entries.iter().any(|e| e.contains("Complete") && e.contains("hello")));
}

#[tokio::test]
async fn turn_completed_clears_busy_before_complete_subscribers_run() {
    let state = Arc::new(BridgeState::default());
    let busy_during_callback = Arc::new(Mutex::new(None));
    let busy_clone = Arc::clone(&busy_during_callback);
    let state_clone = Arc::clone(&state);
    state.events.subscribe(move |event: BridgeEvent| {
        let busy_clone = Arc::clone(&busy_clone);
        let state_clone = Arc::clone(&state_clone);
        async move {
            if matches!(event, BridgeEvent::Complete { .. }) {
                *busy_clone.lock() = Some(state_clone.is_busy());
            }
        }
    });

    let rpc = Arc::new(Mutex::new(RpcState { thread_id: Some("t1".into()), current_turn_id: Some("turn-1".into()) }));
    let pending: Arc<Mutex<PendingMap>> = Arc::new(Mutex::new(HashMap::new()));
    let writer: Arc<Mutex<Option<WriterHandle>>> = Arc::new(Mutex::new(None));

    state.turn.lock().in_message = true;
    dispatch_line(&state, &rpc, &pending, &writer, r#"{"jsonrpc":"2.0","method":"turn/completed","params":{"status":"ok"}}"#).await;

    assert_eq!(*busy_during_callback.lock(), Some(false));
}

#[tokio::test]
async fn turn_completed_failed_emits_error() {
    let (state, log) = recorder();
    let rpc = Arc::new(Mutex::new(RpcState::default()));
    let pending: Arc<Mutex<PendingMap>> = Arc::new(Mutex::new(HashMap::new()));
    let writer: Arc<Mutex<Option<WriterHandle>>> = Arc::new(Mutex::new(None));

    dispatch_line(&state, &rpc, &pending, &writer, r#"{"jsonrpc":"2.0","method":"turn/completed","params":{"status":"failed"}}"#).await;

    let entries = log.lock();
    assert!(entries.iter().any(|e| e.contains("Error")));
}

#[tokio::test]
async fn text_delta_notification_appends_and_emits() {
    let (state, log) = recorder();
    let rpc = Arc::new(Mutex::new(RpcState::default()));
    let pending: Arc<Mutex<PendingMap>> = Arc::new(Mutex::new(HashMap::new()));
    let writer: Arc<Mutex<Option<WriterHandle>>> = Arc::new(Mutex::new(None));

    dispatch_line(&state, &rpc, &pending, &writer, r#"{"jsonrpc":"2.0","method":"text_delta","params":{"text":"hi"}}"#).await;

    assert_eq!(state.turn.lock().accumulator, "hi");
    assert!(log.lock().iter().any(|e| e.contains("Delta") && e.contains("hi")));
}

#[tokio::test]
async fn turn_start_error_before_completion_emits_error_and_clears_turn() {
    let (state, log) = recorder();
    let rpc = Arc::new(Mutex::new(RpcState { thread_id: Some("t1".into()), current_turn_id: Some("turn-1".into()) }));
    state.turn.lock().in_message = true;
    state.turn.lock().accumulator.push_str("partial");

    handle_turn_start_response(&state, &rpc, Ok(Err(json!({ "message": "bad input" })))).await;

    assert!(!state.turn.lock().in_message);
    assert!(state.turn.lock().accumulator.is_empty());
    assert_eq!(rpc.lock().current_turn_id, None);
    let entries = log.lock();
    assert!(entries.iter().any(|e| e.contains("Error") && e.contains("bad input")));
}

#[tokio::test]
async fn turn_start_success_records_turn_id() {
    let (state, _log) = recorder();
    let rpc = Arc::new(Mutex::new(RpcState { thread_id: Some("t1".into()), current_turn_id: None }));

    handle_turn_start_response(&state, &rpc, Ok(Ok(json!({ "turnId": "turn-7" })))).await;

    assert_eq!(rpc.lock().current_turn_id, Some("turn-7".to_owned()));
}

#[tokio::test]
async fn turn_start_dropped_sender_is_quietly_ignored() {
    let (state, log) = recorder();
    let rpc = Arc::new(Mutex::new(RpcState::default()));

    let (tx, rx) = oneshot::channel::<Result<Value, Value>>();
    drop(tx);
    handle_turn_start_response(&state, &rpc, rx.await).await;

    assert!(log.lock().is_empty());
}

#[tokio::test]
async fn send_is_rejected_when_not_ready() {
    let bridge = RpcBridge::new(RpcBridgeOptions {
        command: "cat".into(),
        args: vec![],
        env: vec![],
        cwd: None,
        system_prompt: None,
        resume_thread_id: None,
    });
    assert!(bridge.send("hi".into()).await.is_err());
}
