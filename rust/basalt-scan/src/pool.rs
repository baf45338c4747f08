// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Basalt Authors

//! Fixed-size worker pool with nice-value scheduling.
//!
//! Tasks carry an integer nice value; the pool runs the highest nice value
//! first and falls back to submission order among equals. The task queue is
//! bounded: `try_offer` refuses when full, `offer` blocks.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

pub type WorkFunction = Box<dyn FnOnce() + Send + 'static>;

pub struct Task {
    /// Nice value in `[0, 20]`; higher runs earlier.
    pub priority: i32,
    pub work: WorkFunction,
}

impl Task {
    pub fn new(priority: i32, work: impl FnOnce() + Send + 'static) -> Self {
        Self {
            priority,
            work: Box::new(work),
        }
    }
}

struct QueuedTask {
    priority: i32,
    seq: u64,
    work: WorkFunction,
}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for QueuedTask {}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedTask {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: higher priority wins, earlier submission breaks ties.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct PoolState {
    queue: BinaryHeap<QueuedTask>,
    next_seq: u64,
    shutdown: bool,
}

struct PoolShared {
    state: Mutex<PoolState>,
    not_empty: Condvar,
    not_full: Condvar,
    queue_capacity: usize,
}

pub struct PriorityThreadPool {
    shared: Arc<PoolShared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl PriorityThreadPool {
    pub fn new(num_threads: usize, queue_capacity: usize) -> Self {
        assert!(num_threads > 0, "pool must have at least one thread");
        assert!(queue_capacity > 0, "pool queue capacity must be positive");
        let shared = Arc::new(PoolShared {
            state: Mutex::new(PoolState {
                queue: BinaryHeap::new(),
                next_seq: 0,
                shutdown: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            queue_capacity,
        });
        let workers = (0..num_threads)
            .map(|i| {
                let shared = Arc::clone(&shared);
                std::thread::Builder::new()
                    .name(format!("scan-worker-{i}"))
                    .spawn(move || worker_loop(shared))
                    .expect("failed to spawn scan worker")
            })
            .collect();
        Self {
            shared,
            workers: Mutex::new(workers),
        }
    }

    /// Non-blocking submit. Hands the task back when the queue is full or
    /// the pool is shut down.
    pub fn try_offer(&self, task: Task) -> Result<(), Task> {
        let mut state = self.shared.state.lock().unwrap();
        if state.shutdown || state.queue.len() >= self.shared.queue_capacity {
            return Err(task);
        }
        let seq = state.next_seq;
        state.next_seq += 1;
        state.queue.push(QueuedTask {
            priority: task.priority,
            seq,
            work: task.work,
        });
        drop(state);
        self.shared.not_empty.notify_one();
        Ok(())
    }

    /// Blocking submit. Waits for queue room; false only after shutdown.
    pub fn offer(&self, task: Task) -> bool {
        let mut state = self.shared.state.lock().unwrap();
        while state.queue.len() >= self.shared.queue_capacity && !state.shutdown {
            state = self.shared.not_full.wait(state).unwrap();
        }
        if state.shutdown {
            return false;
        }
        let seq = state.next_seq;
        state.next_seq += 1;
        state.queue.push(QueuedTask {
            priority: task.priority,
            seq,
            work: task.work,
        });
        drop(state);
        self.shared.not_empty.notify_one();
        true
    }

    /// Stops accepting tasks, runs whatever is queued, joins the workers.
    pub fn shutdown_and_join(&self) {
        {
            let mut state = self.shared.state.lock().unwrap();
            state.shutdown = true;
        }
        self.shared.not_empty.notify_all();
        self.shared.not_full.notify_all();
        let mut workers = self.workers.lock().unwrap();
        for worker in workers.drain(..) {
            let _ = worker.join();
        }
    }
}

impl Drop for PriorityThreadPool {
    fn drop(&mut self) {
        self.shutdown_and_join();
    }
}

fn worker_loop(shared: Arc<PoolShared>) {
    loop {
        let task = {
            let mut state = shared.state.lock().unwrap();
            loop {
                if let Some(task) = state.queue.pop() {
                    break task;
                }
                if state.shutdown {
                    return;
                }
                state = shared.not_empty.wait(state).unwrap();
            }
        };
        shared.not_full.notify_one();
        (task.work)();
    }
}
