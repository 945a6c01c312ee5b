// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Topic Broadcaster: a `/ws` WebSocket endpoint offering topic subscribe /
//! unsubscribe / broadcast with a liveness heartbeat (`spec.md` §4.6).
//!
//! Routing rejects upgrades on any path other than `/ws` — the router only
//! ever registers this one WebSocket route, so every other path falls
//! through to axum's ordinary 404 handling without ever upgrading.

pub mod msg;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::mpsc;

use msg::Action;

const HEARTBEAT_PERIOD: Duration = Duration::from_secs(30);

type ClientId = u64;

struct ClientHandle {
    tx: mpsc::UnboundedSender<Message>,
    topics: HashSet<String>,
    alive: Arc<AtomicBool>,
}

/// Process-wide singleton fan-out over WebSocket topics.
pub struct Broadcaster {
    clients: RwLock<HashMap<ClientId, ClientHandle>>,
    next_id: AtomicU64,
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl Broadcaster {
    pub fn new() -> Self {
        Self { clients: RwLock::new(HashMap::new()), next_id: AtomicU64::new(1) }
    }

    /// Send one JSON message `{...payload, topic}` to every connection whose
    /// topic set contains `topic`.
    pub fn broadcast(&self, topic: &str, payload: Value) {
        let message = msg::with_topic(topic, payload);
        let Ok(text) = serde_json::to_string(&message) else { return };
        let clients = self.clients.read();
        for client in clients.values() {
            if client.topics.contains(topic) {
                let _ = client.tx.send(Message::Text(text.clone().into()));
            }
        }
    }

    fn register(&self) -> (ClientId, mpsc::UnboundedReceiver<Message>, Arc<AtomicBool>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        let alive = Arc::new(AtomicBool::new(true));
        self.clients.write().insert(id, ClientHandle { tx, topics: HashSet::new(), alive: Arc::clone(&alive) });
        (id, rx, alive)
    }

    fn subscribe(&self, id: ClientId, topic: String) {
        if let Some(client) = self.clients.write().get_mut(&id) {
            client.topics.insert(topic);
        }
    }

    fn unsubscribe(&self, id: ClientId, topic: &str) {
        if let Some(client) = self.clients.write().get_mut(&id) {
            client.topics.remove(topic);
        }
    }

    fn disconnect(&self, id: ClientId) {
        if let Some(client) = self.clients.write().remove(&id) {
            drop(client.topics);
        }
    }

    /// Terminate every connected client and release the heartbeat timer's
    /// hold on the registry. Idempotent.
    pub fn close_all(&self) {
        let clients = std::mem::take(&mut *self.clients.write());
        for client in clients.into_values() {
            let _ = client.tx.send(Message::Close(None));
        }
    }

    /// Spawn the 30 s heartbeat loop. Two-strike termination: a client that
    /// fails to `alive` itself between two consecutive ticks is dropped.
    pub fn spawn_heartbeat(self: &Arc<Self>) {
        let broadcaster = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(HEARTBEAT_PERIOD);
            interval.tick().await; // consume the immediate first tick
            loop {
                interval.tick().await;
                broadcaster.heartbeat_tick();
            }
        });
    }

    fn heartbeat_tick(&self) {
        let stale: Vec<ClientId> = {
            let clients = self.clients.read();
            clients.iter().filter(|(_, c)| !c.alive.load(Ordering::Acquire)).map(|(id, _)| *id).collect()
        };
        for id in stale {
            self.disconnect(id);
        }

        let clients = self.clients.read();
        for client in clients.values() {
            client.alive.store(false, Ordering::Release);
            let _ = client.tx.send(Message::Ping(Vec::new().into()));
        }
    }
}

/// `GET /ws` — the only WebSocket upgrade this server offers.
pub async fn ws_handler(State(broadcaster): State<Arc<Broadcaster>>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(broadcaster, socket))
}

async fn handle_connection(broadcaster: Arc<Broadcaster>, socket: WebSocket) {
    let (id, mut client_rx, alive) = broadcaster.register();
    let (mut ws_tx, mut ws_rx) = socket.split();

    loop {
        tokio::select! {
            outgoing = client_rx.recv() => {
                match outgoing {
                    Some(Message::Close(frame)) => {
                        let _ = ws_tx.send(Message::Close(frame)).await;
                        break;
                    }
                    Some(message) => {
                        if ws_tx.send(message).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            incoming = ws_rx.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        match msg::parse_inbound(&text) {
                            Some(frame) if frame.action == Action::Subscribe => broadcaster.subscribe(id, frame.topic),
                            Some(frame) => broadcaster.unsubscribe(id, &frame.topic),
                            None => tracing::debug!(text = %text, "ws: dropping unparseable client frame"),
                        }
                    }
                    Some(Ok(Message::Pong(_))) => alive.store(true, Ordering::Release),
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }

    broadcaster.disconnect(id);
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
