// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-session event bus: an ordered set of async callbacks per emission,
//! invoked in registration order on the task that produced the event.
//!
//! Not a channel-per-subscriber: subscriber counts are small and ordering
//! must match wire order, so emission stays synchronous (awaited) on the
//! caller, deliberately allowing a slow subscriber to apply back-pressure to
//! the one session it is slow for.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::FutureExt;
use parking_lot::Mutex;

type Callback<E> = Arc<dyn Fn(E) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

struct Subscriber<E> {
    id: u64,
    callback: Callback<E>,
}

/// A generic, clonable event bus. Cheap to clone (wraps an `Arc`).
pub struct EventBus<E> {
    inner: Arc<Inner<E>>,
}

struct Inner<E> {
    subscribers: Mutex<Vec<Subscriber<E>>>,
    next_id: AtomicU64,
}

impl<E> Clone for EventBus<E> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<E> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// A handle returned by `subscribe`; dropping it does nothing, call
/// `unsubscribe()` explicitly to remove the callback.
pub struct Unsubscribe<E> {
    id: u64,
    bus: Arc<Inner<E>>,
}

impl<E> Unsubscribe<E> {
    /// Remove the subscription. Safe to call from inside a running callback:
    /// the bus snapshots its subscriber list before each `emit`, so this only
    /// affects emissions that start after this call returns.
    pub fn unsubscribe(&self) {
        self.bus.subscribers.lock().retain(|s| s.id != self.id);
    }
}

impl<E: Clone + Send + 'static> EventBus<E> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner { subscribers: Mutex::new(Vec::new()), next_id: AtomicU64::new(1) }),
        }
    }

    /// Register a callback. Order of registration is the order callbacks run
    /// in on every subsequent `emit`.
    pub fn subscribe<F, Fut>(&self, callback: F) -> Unsubscribe<E>
    where
        F: Fn(E) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let boxed: Callback<E> = Arc::new(move |event| Box::pin(callback(event)));
        self.inner.subscribers.lock().push(Subscriber { id, callback: boxed });
        Unsubscribe { id, bus: Arc::clone(&self.inner) }
    }

    /// Invoke every currently-registered callback, in registration order,
    /// with a clone of `event`. A panicking callback is caught, logged, and
    /// does not stop delivery to the remaining subscribers.
    pub async fn emit(&self, event: E) {
        let snapshot: Vec<Callback<E>> = {
            let guard = self.inner.subscribers.lock();
            guard.iter().map(|s| Arc::clone(&s.callback)).collect()
        };

        for callback in snapshot {
            let event = event.clone();
            let fut = std::panic::AssertUnwindSafe(callback(event)).catch_unwind();
            if let Err(panic) = fut.await {
                let msg = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "non-string panic payload".to_owned());
                tracing::error!(panic = %msg, "event bus subscriber panicked");
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().len()
    }
}

#[cfg(test)]
#[path = "event_bus_tests.rs"]
mod tests;
