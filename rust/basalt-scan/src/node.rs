// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Basalt Authors

//! Per-query scan operator: scheduling loop, chunk-pool backpressure, and
//! worker task body.
//!
//! One node owns a set of scan ranges. `start_scan` builds one scanner per
//! range, parks them in a pending queue, and submits the first `concurrency`
//! of them to the shared worker pool. From then on scheduling is pulled from
//! two sides: the consumer tops up a worker whenever the chunk pool can
//! sustain one more, and finishing workers submit replacements. Admission of
//! not-yet-open scanners is throttled by the process-wide open-file count;
//! a single transferable pending token guarantees at least one scanner can
//! always make progress and wakes throttled peers once the handle budget
//! recovers.

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::warn;
use snafu::location;

use basalt_core::chunk::Chunk;
use basalt_core::{Error, Result};

use crate::connector::{
    ChunkFilter, DataSourceProvider, OpenFileTracker, RuntimeFilterCollector, ScanRange,
};
use crate::pool::{PriorityThreadPool, Task};
use crate::queue::BoundedBlockingQueue;
use crate::scanner::{ConnectorScanner, ScannerRef};

/// Per-query scan knobs. Changes take effect per node construction.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Rows a scanner reads per scheduling quantum before yielding its
    /// worker slot.
    pub scanner_row_num: usize,
    /// Cap on concurrently running scanners for one node.
    pub max_scanner_num: usize,
    /// Process-wide open data-source budget consulted at admission.
    pub max_file_handles: i64,
    /// Rows per chunk.
    pub chunk_size: usize,
    /// Row limit for the whole node; -1 means unlimited.
    pub limit: i64,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            scanner_row_num: 16384,
            max_scanner_num: 50,
            max_file_handles: 1000,
            chunk_size: 4096,
            limit: -1,
        }
    }
}

/// The more tasks a node has submitted, the less nice value new tasks get.
pub fn compute_priority(num_submitted_tasks: i32) -> i32 {
    const THRESHOLDS: [i32; 20] = [
        5, 19, 49, 91, 145, 211, 289, 379, 481, 595, 721, 859, 1009, 1171, 1345, 1531, 1729, 1939,
        2161, 2395,
    ];
    for (i, threshold) in THRESHOLDS.iter().enumerate() {
        if num_submitted_tasks < *threshold {
            return 20 - i as i32;
        }
    }
    0
}

/// Pending-queue residency accounting.
#[derive(Debug, Clone, Copy, Default)]
pub struct PendingQueueStats {
    pub total_time: Duration,
    pub pops: u64,
}

struct NodeMut {
    pending: Vec<ScannerRef>,
    chunk_pool: Vec<Chunk>,
    pending_stats: PendingQueueStats,
}

struct NodeInner {
    opts: ScanOptions,
    chunks_per_scanner: usize,
    pool: Arc<PriorityThreadPool>,
    open_files: Arc<OpenFileTracker>,
    result_queue: BoundedBlockingQueue<Chunk>,
    mtx: Mutex<NodeMut>,
    /// First-error slot; `None` is OK. EndOfFile lives here too.
    status: Mutex<Option<Error>>,
    /// Node-side admission token slot; true when no scanner holds it.
    pending_token: AtomicBool,
    running_threads: AtomicI32,
    closed_scanners: AtomicI32,
    submit_count: AtomicI32,
    num_scanners: AtomicI32,
    runtime_filters: Arc<RuntimeFilterCollector>,
}

/// Drains the worker accounting when a task exits, however it exits.
struct TaskExitGuard {
    node: Arc<NodeInner>,
}

impl Drop for TaskExitGuard {
    fn drop(&mut self) {
        self.node.running_threads.fetch_sub(1, Ordering::Release);
        let closed = self.node.closed_scanners.load(Ordering::Acquire);
        if closed == self.node.num_scanners.load(Ordering::Acquire) {
            self.node.result_queue.shutdown();
        }
    }
}

impl NodeInner {
    fn get_status(&self) -> Option<Error> {
        self.status.lock().unwrap().as_ref().map(|e| e.cloned())
    }

    /// First writer wins; later statuses are dropped.
    fn update_status(&self, status: Error) {
        let mut slot = self.status.lock().unwrap();
        if slot.is_none() {
            *slot = Some(status);
        }
    }

    fn push_pending(m: &mut NodeMut, scanner_ref: ScannerRef, scanner: &mut ConnectorScanner) {
        scanner.enter_pending_queue();
        m.pending.push(scanner_ref);
    }

    fn pop_pending(m: &mut NodeMut) -> Option<ScannerRef> {
        let scanner_ref = m.pending.pop()?;
        {
            let mut scanner = scanner_ref.lock().unwrap();
            m.pending_stats.total_time += scanner.exit_pending_queue();
            m.pending_stats.pops += 1;
        }
        Some(scanner_ref)
    }

    fn fill_chunk_pool(&self, count: usize) {
        let mut m = self.mtx.lock().unwrap();
        for _ in 0..count {
            m.chunk_pool.push(Chunk::empty());
        }
    }

    fn submit_scanner(node: &Arc<NodeInner>, scanner: &ScannerRef, blockable: bool) -> bool {
        let delta = if scanner.lock().unwrap().keep_priority() {
            0
        } else {
            1
        };
        let num_submit = node.submit_count.fetch_add(delta, Ordering::Relaxed);
        let priority = compute_priority(num_submit);
        node.running_threads.fetch_add(1, Ordering::Release);

        let task_node = Arc::clone(node);
        let task_scanner = Arc::clone(scanner);
        let task = Task::new(priority, move || {
            Self::scanner_task(&task_node, task_scanner)
        });

        match node.pool.try_offer(task) {
            Ok(()) => return true,
            Err(task) => {
                if blockable && node.pool.offer(task) {
                    return true;
                }
            }
        }
        warn!("thread pool busy");
        node.running_threads.fetch_sub(1, Ordering::Release);
        node.submit_count.fetch_sub(delta, Ordering::Relaxed);
        false
    }

    /// Pops one pending scanner and submits it non-blockably, re-parking it
    /// on refusal. Best-effort replacement scheduling.
    fn submit_one_pending(node: &Arc<NodeInner>) {
        let candidate = {
            let mut m = node.mtx.lock().unwrap();
            Self::pop_pending(&mut m)
        };
        if let Some(next) = candidate {
            if !Self::submit_scanner(node, &next, false) {
                let mut m = node.mtx.lock().unwrap();
                let mut scanner = next.lock().unwrap();
                Self::push_pending(&mut m, Arc::clone(&next), &mut scanner);
            }
        }
    }

    /// Token holder wakes throttled peers once handle budget recovered.
    fn wake_pending_peers(node: &Arc<NodeInner>) {
        let num_scanners = node.num_scanners.load(Ordering::Acquire);
        let concurrency = (node.opts.max_scanner_num as i32).min(num_scanners);
        let mut need_put = concurrency - node.running_threads.load(Ordering::Acquire);
        let left_resource = node.opts.max_file_handles - node.open_files.current();
        if left_resource <= 0 {
            return;
        }
        need_put = need_put.min(left_resource as i32);
        let mut woken = Vec::new();
        {
            let mut m = node.mtx.lock().unwrap();
            while need_put > 0 {
                match Self::pop_pending(&mut m) {
                    Some(peer) => woken.push(peer),
                    None => break,
                }
                need_put -= 1;
            }
        }
        let mut peers = woken.into_iter();
        while let Some(peer) = peers.next() {
            if !Self::submit_scanner(node, &peer, false) {
                let mut m = node.mtx.lock().unwrap();
                for parked in std::iter::once(peer).chain(peers.by_ref()) {
                    let mut scanner = parked.lock().unwrap();
                    Self::push_pending(&mut m, Arc::clone(&parked), &mut scanner);
                }
                break;
            }
        }
    }

    /// Token release + data source close + closed accounting, for a scanner
    /// this thread currently drives.
    fn retire_scanner(&self, scanner: &mut ConnectorScanner) {
        scanner.release_pending_token(&self.pending_token);
        scanner.close();
        self.closed_scanners.fetch_add(1, Ordering::Release);
    }

    fn close_pending_scanners(&self) {
        let drained = {
            let mut m = self.mtx.lock().unwrap();
            std::mem::take(&mut m.pending)
        };
        for scanner_ref in drained {
            let mut scanner = scanner_ref.lock().unwrap();
            scanner.close();
            self.closed_scanners.fetch_add(1, Ordering::Release);
        }
    }

    /// The worker body, running on a pool thread.
    fn scanner_task(node: &Arc<NodeInner>, scanner_ref: ScannerRef) {
        let _exit = TaskExitGuard {
            node: Arc::clone(node),
        };

        // Fast failure: don't touch storage once the node has an error.
        if node.get_status().is_some() {
            let mut scanner = scanner_ref.lock().unwrap();
            node.retire_scanner(&mut scanner);
            drop(scanner);
            node.close_pending_scanners();
            return;
        }

        let mut scanner = scanner_ref.lock().unwrap();

        // Once a resource overrun parked scanners, recovered budget alone
        // does not reschedule them; the token holder does.
        if scanner.has_pending_token() {
            Self::wake_pending_peers(node);
        } else {
            scanner.acquire_pending_token(&node.pending_token);
        }

        // Over the open-file budget, not-yet-open scanners go back to
        // pending. The token holder always passes so the node cannot stall
        // with every scanner parked.
        if !scanner.is_open()
            && node.open_files.current() > node.opts.max_file_handles
            && !scanner.has_pending_token()
        {
            let mut m = node.mtx.lock().unwrap();
            Self::push_pending(&mut m, Arc::clone(&scanner_ref), &mut scanner);
            return;
        }

        let mut status = scanner.open();
        scanner.set_keep_priority(false);

        let mut resubmit = false;
        let mut owned = true;
        let raw_rows_threshold = scanner.raw_rows_read() + node.opts.scanner_row_num as i64;

        while status.is_ok() {
            if node.get_status().is_some() {
                break;
            }

            let mut chunk = {
                let mut m = node.mtx.lock().unwrap();
                if m.chunk_pool.is_empty() {
                    // Yield the worker slot instead of waiting for chunks;
                    // keep the aged priority for the re-submit.
                    scanner.set_keep_priority(true);
                    scanner.release_pending_token(&node.pending_token);
                    Self::push_pending(&mut m, Arc::clone(&scanner_ref), &mut scanner);
                    owned = false;
                    break;
                }
                m.chunk_pool.pop().unwrap()
            };

            status = scanner.get_next(&mut chunk);
            if status.is_err() {
                let mut m = node.mtx.lock().unwrap();
                chunk.reset();
                m.chunk_pool.push(chunk);
                break;
            }

            if !node.result_queue.put(chunk) {
                status = Err(Error::aborted("result chunks has been shutdown", location!()));
                break;
            }
            if node.opts.limit != -1 && scanner.num_rows_read() >= node.opts.limit {
                status = Err(Error::end_of_file("limit reach"));
                break;
            }
            if scanner.raw_rows_read() >= raw_rows_threshold {
                resubmit = true;
                break;
            }
        }

        if node.get_status().is_some() {
            // The node failed underneath us; our local status is irrelevant.
            if owned {
                node.retire_scanner(&mut scanner);
                drop(scanner);
                node.close_pending_scanners();
            }
            return;
        }

        match status {
            Ok(()) if resubmit => {
                drop(scanner);
                if !Self::submit_scanner(node, &scanner_ref, false) {
                    let mut m = node.mtx.lock().unwrap();
                    let mut scanner = scanner_ref.lock().unwrap();
                    scanner.release_pending_token(&node.pending_token);
                    Self::push_pending(&mut m, Arc::clone(&scanner_ref), &mut scanner);
                }
            }
            Ok(()) => {
                // Ownership already moved to the pending queue.
                debug_assert!(!owned);
            }
            Err(ref e) if e.is_end_of_file() => {
                node.retire_scanner(&mut scanner);
                drop(scanner);
                // Best-effort: hand the freed slot to a pending peer. The
                // consumer loop re-submits on its next call anyway.
                Self::submit_one_pending(node);
            }
            Err(e) => {
                node.update_status(e);
                node.retire_scanner(&mut scanner);
                drop(scanner);
                node.close_pending_scanners();
            }
        }
    }
}

/// The per-query connector scan operator.
pub struct ConnectorScanNode {
    inner: Arc<NodeInner>,
    provider: Arc<dyn DataSourceProvider>,
    scan_ranges: Vec<ScanRange>,
    predicates: Vec<Arc<dyn ChunkFilter>>,
    started: bool,
    closed: bool,
    num_rows_returned: i64,
}

impl ConnectorScanNode {
    pub fn new(
        provider: Arc<dyn DataSourceProvider>,
        pool: Arc<PriorityThreadPool>,
        open_files: Arc<OpenFileTracker>,
        opts: ScanOptions,
    ) -> Self {
        let chunks_per_scanner = opts
            .scanner_row_num
            .div_ceil(opts.chunk_size.max(1))
            .max(1);
        let queue_capacity = (chunks_per_scanner * opts.max_scanner_num).max(1);
        let inner = Arc::new(NodeInner {
            opts,
            chunks_per_scanner,
            pool,
            open_files,
            result_queue: BoundedBlockingQueue::new(queue_capacity),
            mtx: Mutex::new(NodeMut {
                pending: Vec::new(),
                chunk_pool: Vec::new(),
                pending_stats: PendingQueueStats::default(),
            }),
            status: Mutex::new(None),
            pending_token: AtomicBool::new(true),
            running_threads: AtomicI32::new(0),
            closed_scanners: AtomicI32::new(0),
            submit_count: AtomicI32::new(0),
            num_scanners: AtomicI32::new(0),
            runtime_filters: Arc::new(RuntimeFilterCollector::new()),
        });
        Self {
            inner,
            provider,
            scan_ranges: Vec::new(),
            predicates: Vec::new(),
            started: false,
            closed: false,
            num_rows_returned: 0,
        }
    }

    /// No I/O here; validates the knobs before anything runs.
    pub fn prepare(&mut self) -> Result<()> {
        if self.inner.opts.chunk_size == 0 {
            return Err(Error::invalid_input("chunk_size must be positive", location!()));
        }
        if self.inner.opts.max_scanner_num == 0 {
            return Err(Error::invalid_input(
                "max_scanner_num must be positive",
                location!(),
            ));
        }
        Ok(())
    }

    pub fn open(&mut self) -> Result<()> {
        self.provider.open()
    }

    pub fn set_predicates(&mut self, predicates: Vec<Arc<dyn ChunkFilter>>) {
        self.predicates = predicates;
    }

    /// Runtime-filter collector shared with every data source; joins feed
    /// it while the scan runs.
    pub fn runtime_filters(&self) -> Arc<RuntimeFilterCollector> {
        Arc::clone(&self.inner.runtime_filters)
    }

    pub fn set_scan_ranges(&mut self, scan_ranges: Vec<ScanRange>) {
        self.scan_ranges = scan_ranges;
        if !self.provider.accept_empty_scan_ranges() && self.scan_ranges.is_empty() {
            // Force the provider to create at least one data source.
            self.scan_ranges.push(ScanRange::placeholder());
        }
    }

    pub fn insert_local_exchange_operator(&self) -> bool {
        self.provider.insert_local_exchange_operator()
    }

    pub fn limit(&self) -> i64 {
        self.inner.opts.limit
    }

    fn start_scan(&mut self) -> Result<()> {
        for scan_range in &self.scan_ranges {
            let mut data_source = self.provider.create_data_source(scan_range)?;
            data_source.set_predicates(self.predicates.clone());
            data_source.set_runtime_filters(Arc::clone(&self.inner.runtime_filters));
            data_source.set_read_limit(self.inner.opts.limit);
            let scanner_ref = ConnectorScanner::new(data_source).into_ref();
            let mut m = self.inner.mtx.lock().unwrap();
            let mut scanner = scanner_ref.lock().unwrap();
            NodeInner::push_pending(&mut m, Arc::clone(&scanner_ref), &mut scanner);
        }

        let (num_scanners, first_batch) = {
            let mut m = self.inner.mtx.lock().unwrap();
            // Pending is popped from the back; reverse so the first range
            // comes off first.
            m.pending.reverse();
            let num_scanners = m.pending.len();
            let concurrency = self.inner.opts.max_scanner_num.min(num_scanners);
            let chunks = self.inner.chunks_per_scanner * concurrency;
            m.chunk_pool.reserve(chunks);
            for _ in 0..chunks {
                m.chunk_pool.push(Chunk::empty());
            }
            let mut first_batch = Vec::with_capacity(concurrency);
            for _ in 0..concurrency {
                match NodeInner::pop_pending(&mut m) {
                    Some(scanner) => first_batch.push(scanner),
                    None => break,
                }
            }
            (num_scanners, first_batch)
        };
        self.inner
            .num_scanners
            .store(num_scanners as i32, Ordering::Release);
        if num_scanners == 0 {
            // Nothing will ever produce; unblock the consumer immediately.
            self.inner.result_queue.shutdown();
            return Ok(());
        }

        for scanner in first_batch {
            if !NodeInner::submit_scanner(&self.inner, &scanner, true) {
                return Err(Error::internal(
                    "failed to submit scanner to thread pool",
                    location!(),
                ));
            }
        }
        Ok(())
    }

    /// Pull one chunk. `Ok(None)` is end of stream.
    pub fn get_next(&mut self) -> Result<Option<Chunk>> {
        if !self.started {
            if self.inner.get_status().is_none() {
                let status = self.start_scan();
                if let Err(e) = &status {
                    log::error!("Failed to start scan node: {e}");
                    self.inner.update_status(e.cloned());
                }
                self.started = true;
                status?;
            } else {
                self.inner.result_queue.shutdown();
                self.started = true;
            }
        }

        if let Some(e) = self.inner.get_status() {
            return if e.is_end_of_file() { Ok(None) } else { Err(e) };
        }

        {
            let inner = &self.inner;
            let mut m = inner.mtx.lock().unwrap();
            let num_closed = inner.closed_scanners.load(Ordering::Acquire);
            let num_pending = m.pending.len() as i32;
            let num_running =
                (inner.num_scanners.load(Ordering::Acquire) - num_pending - num_closed).max(0);
            if num_pending > 0
                && num_running < inner.opts.max_scanner_num as i32
                && m.chunk_pool.len() >= (num_running as usize + 1) * inner.chunks_per_scanner
            {
                if let Some(scanner) = NodeInner::pop_pending(&mut m) {
                    drop(m);
                    if !NodeInner::submit_scanner(inner, &scanner, false) {
                        let mut m = inner.mtx.lock().unwrap();
                        let mut guard = scanner.lock().unwrap();
                        NodeInner::push_pending(&mut m, Arc::clone(&scanner), &mut guard);
                    }
                }
            }
        }

        if let Some(mut chunk) = self.inner.result_queue.blocking_get() {
            self.inner.fill_chunk_pool(1);
            self.inner.runtime_filters.apply_all(&mut chunk)?;
            self.num_rows_returned += chunk.num_rows() as i64;
            let limit = self.inner.opts.limit;
            if limit != -1 && self.num_rows_returned >= limit {
                let num_rows_over = self.num_rows_returned - limit;
                chunk.truncate(chunk.num_rows() - num_rows_over as usize);
                self.num_rows_returned = limit;
                self.inner
                    .update_status(Error::end_of_file("connector scan node has reached limit"));
                self.inner.result_queue.shutdown();
            }
            return Ok(Some(chunk));
        }

        self.inner
            .update_status(Error::end_of_file("EOF of connector scan node"));
        match self.inner.get_status() {
            Some(e) if !e.is_end_of_file() => Err(e),
            _ => Ok(None),
        }
    }

    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.inner
            .update_status(Error::cancelled("closed", location!()));
        self.inner.result_queue.shutdown();
        while self.inner.running_threads.load(Ordering::Acquire) > 0 {
            std::thread::sleep(Duration::from_millis(10));
        }
        self.inner.close_pending_scanners();
        self.provider.close();
    }

    pub fn num_rows_returned(&self) -> i64 {
        self.num_rows_returned
    }

    pub fn num_scanners(&self) -> i32 {
        self.inner.num_scanners.load(Ordering::Acquire)
    }

    pub fn closed_scanners(&self) -> i32 {
        self.inner.closed_scanners.load(Ordering::Acquire)
    }

    pub fn running_threads(&self) -> i32 {
        self.inner.running_threads.load(Ordering::Acquire)
    }

    pub fn pending_scanners(&self) -> usize {
        self.inner.mtx.lock().unwrap().pending.len()
    }

    pub fn pending_queue_stats(&self) -> PendingQueueStats {
        self.inner.mtx.lock().unwrap().pending_stats
    }
}

impl Drop for ConnectorScanNode {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_matches_aging_table() {
        assert_eq!(compute_priority(0), 20);
        assert_eq!(compute_priority(4), 20);
        assert_eq!(compute_priority(5), 19);
        assert_eq!(compute_priority(18), 19);
        assert_eq!(compute_priority(19), 18);
        assert_eq!(compute_priority(600), 10);
        assert_eq!(compute_priority(2394), 1);
        assert_eq!(compute_priority(2395), 0);
        assert_eq!(compute_priority(1_000_000), 0);
    }

    #[test]
    fn priority_is_monotonic_and_bounded() {
        let mut prev = 20;
        for n in 0..3000 {
            let p = compute_priority(n);
            assert!((0..=20).contains(&p));
            assert!(p <= prev, "priority must not increase with submits");
            prev = p;
        }
    }
}
