// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Basalt Authors

//! Per-scan-range worker state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use basalt_core::chunk::Chunk;
use basalt_core::Result;

use crate::connector::DataSource;

/// Shared handle to a scanner. Exactly one owner drives a scanner at any
/// time (a worker task, the pending queue, or the closing node); the lock
/// only bridges the brief handoffs between them.
pub type ScannerRef = Arc<Mutex<ConnectorScanner>>;

pub struct ConnectorScanner {
    data_source: Box<dyn DataSource>,
    is_open: bool,
    keep_priority: bool,
    pending_token: bool,
    pending_enter: Option<Instant>,
}

impl ConnectorScanner {
    pub fn new(data_source: Box<dyn DataSource>) -> Self {
        Self {
            data_source,
            is_open: false,
            keep_priority: false,
            pending_token: false,
            pending_enter: None,
        }
    }

    pub fn into_ref(self) -> ScannerRef {
        Arc::new(Mutex::new(self))
    }

    pub fn open(&mut self) -> Result<()> {
        if self.is_open {
            return Ok(());
        }
        self.data_source.open()?;
        self.is_open = true;
        Ok(())
    }

    pub fn close(&mut self) {
        self.data_source.close();
    }

    pub fn get_next(&mut self, chunk: &mut Chunk) -> Result<()> {
        self.data_source.get_next(chunk)
    }

    pub fn raw_rows_read(&self) -> i64 {
        self.data_source.raw_rows_read()
    }

    pub fn num_rows_read(&self) -> i64 {
        self.data_source.num_rows_read()
    }

    pub fn is_open(&self) -> bool {
        self.is_open
    }

    pub fn keep_priority(&self) -> bool {
        self.keep_priority
    }

    pub fn set_keep_priority(&mut self, keep: bool) {
        self.keep_priority = keep;
    }

    pub fn has_pending_token(&self) -> bool {
        self.pending_token
    }

    /// Takes the node's admission token if it is available: swaps a false
    /// into `slot` when it currently holds true. At most one scanner holds
    /// the token at a time.
    pub fn acquire_pending_token(&mut self, slot: &AtomicBool) -> bool {
        if self.pending_token {
            return true;
        }
        if slot
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.pending_token = true;
            return true;
        }
        false
    }

    /// Returns the token to the node slot, if held.
    pub fn release_pending_token(&mut self, slot: &AtomicBool) -> bool {
        if self.pending_token {
            self.pending_token = false;
            slot.store(true, Ordering::Release);
            return true;
        }
        false
    }

    pub fn enter_pending_queue(&mut self) {
        self.pending_enter = Some(Instant::now());
    }

    /// Time spent in the pending queue since the matching enter.
    pub fn exit_pending_queue(&mut self) -> Duration {
        self.pending_enter
            .take()
            .map(|t| t.elapsed())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use basalt_core::Error;

    struct NoopSource;

    impl DataSource for NoopSource {
        fn open(&mut self) -> Result<()> {
            Ok(())
        }

        fn get_next(&mut self, _chunk: &mut Chunk) -> Result<()> {
            Err(Error::end_of_file("empty source"))
        }

        fn close(&mut self) {}

        fn raw_rows_read(&self) -> i64 {
            0
        }

        fn num_rows_read(&self) -> i64 {
            0
        }
    }

    #[test]
    fn pending_token_transfers_through_cas() {
        let slot = AtomicBool::new(true);
        let mut a = ConnectorScanner::new(Box::new(NoopSource));
        let mut b = ConnectorScanner::new(Box::new(NoopSource));

        assert!(a.acquire_pending_token(&slot));
        assert!(a.has_pending_token());
        assert!(!slot.load(Ordering::Acquire));
        // Token is taken; b cannot acquire it.
        assert!(!b.acquire_pending_token(&slot));

        assert!(a.release_pending_token(&slot));
        assert!(!a.has_pending_token());
        assert!(b.acquire_pending_token(&slot));
        assert!(b.has_pending_token());

        // Releasing without holding is a no-op.
        assert!(!a.release_pending_token(&slot));
    }

    #[test]
    fn open_is_idempotent() {
        let mut scanner = ConnectorScanner::new(Box::new(NoopSource));
        assert!(!scanner.is_open());
        scanner.open().unwrap();
        assert!(scanner.is_open());
        scanner.open().unwrap();
        assert!(scanner.is_open());
    }
}
