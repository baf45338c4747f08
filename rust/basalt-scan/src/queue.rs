// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Basalt Authors

//! Bounded blocking queue with shutdown-once semantics.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

struct QueueState<T> {
    items: VecDeque<T>,
    shutdown: bool,
}

/// A bounded MPMC queue for chunk handoff.
///
/// Producers block while the queue is full. After [`shutdown`], `put`
/// refuses new items but consumers still drain whatever was queued before
/// getting `None`.
///
/// [`shutdown`]: BoundedBlockingQueue::shutdown
pub struct BoundedBlockingQueue<T> {
    state: Mutex<QueueState<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
}

impl<T> BoundedBlockingQueue<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be positive");
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(capacity),
                shutdown: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
        }
    }

    /// Enqueues `item`, blocking while the queue is full.
    ///
    /// Returns false once the queue has been shut down; the item is dropped.
    pub fn put(&self, item: T) -> bool {
        let mut state = self.state.lock().unwrap();
        while state.items.len() >= self.capacity && !state.shutdown {
            state = self.not_full.wait(state).unwrap();
        }
        if state.shutdown {
            return false;
        }
        state.items.push_back(item);
        drop(state);
        self.not_empty.notify_one();
        true
    }

    /// Dequeues the next item, blocking while the queue is empty.
    ///
    /// Returns `None` only when the queue was shut down and fully drained.
    pub fn blocking_get(&self) -> Option<T> {
        let mut state = self.state.lock().unwrap();
        loop {
            if let Some(item) = state.items.pop_front() {
                drop(state);
                self.not_full.notify_one();
                return Some(item);
            }
            if state.shutdown {
                return None;
            }
            state = self.not_empty.wait(state).unwrap();
        }
    }

    /// Stops the queue. Idempotent; wakes every blocked producer/consumer.
    pub fn shutdown(&self) {
        let mut state = self.state.lock().unwrap();
        state.shutdown = true;
        drop(state);
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
