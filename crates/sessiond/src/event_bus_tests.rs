// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use parking_lot::Mutex;

use super::*;

#[tokio::test]
async fn delivers_in_registration_order() {
    let bus: EventBus<u32> = EventBus::new();
    let seen = Arc::new(Mutex::new(Vec::new()));

    for tag in [1u32, 2, 3] {
        let seen = Arc::clone(&seen);
        bus.subscribe(move |event| {
            let seen = Arc::clone(&seen);
            async move {
                seen.lock().push((tag, event));
            }
        });
    }

    bus.emit(42).await;
    assert_eq!(*seen.lock(), vec![(1, 42), (2, 42), (3, 42)]);
}

#[tokio::test]
async fn unsubscribe_stops_future_delivery_but_not_the_current_emit() {
    let bus: EventBus<u32> = EventBus::new();
    let count = Arc::new(Mutex::new(0));

    let count_for_sub = Arc::clone(&count);
    let unsub = bus.subscribe(move |_| {
        let count = Arc::clone(&count_for_sub);
        async move {
            *count.lock() += 1;
        }
    });

    bus.emit(1).await;
    unsub.unsubscribe();
    bus.emit(2).await;

    assert_eq!(*count.lock(), 1);
    assert_eq!(bus.subscriber_count(), 0);
}

#[tokio::test]
async fn a_panicking_subscriber_does_not_block_the_rest() {
    let bus: EventBus<u32> = EventBus::new();
    let delivered = Arc::new(Mutex::new(false));

    bus.subscribe(|_| async {
        panic!("boom");
    });

    let delivered_clone = Arc::clone(&delivered);
    bus.subscribe(move |_| {
        let delivered = Arc::clone(&delivered_clone);
        async move {
            *delivered.lock() = true;
        }
    });

    bus.emit(7).await;
    assert!(*delivered.lock());
}

#[tokio::test]
async fn unsubscribe_from_within_a_callback_is_safe() {
    let bus: EventBus<u32> = EventBus::new();
    let calls = Arc::new(Mutex::new(0));

    // A subscriber that unsubscribes itself on its first invocation.
    let calls_clone = Arc::clone(&calls);
    let unsub_cell: Arc<Mutex<Option<Unsubscribe<u32>>>> = Arc::new(Mutex::new(None));
    let unsub_cell_clone = Arc::clone(&unsub_cell);
    let handle = bus.subscribe(move |_| {
        let calls = Arc::clone(&calls_clone);
        let unsub_cell = Arc::clone(&unsub_cell_clone);
        async move {
            *calls.lock() += 1;
            if let Some(unsub) = unsub_cell.lock().as_ref() {
                unsub.unsubscribe();
            }
        }
    });
    *unsub_cell.lock() = Some(handle);

    bus.emit(1).await;
    bus.emit(2).await;

    assert_eq!(*calls.lock(), 1);
}
