// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Basalt Authors

//! Contracts between the scan engine and pluggable data sources.
//!
//! Physical readers (HDFS, Hive, Iceberg, ...) live behind [`DataSource`];
//! the planner hands the node opaque [`ScanRange`] descriptors and one
//! [`DataSourceProvider`] that knows how to interpret them.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, RwLock};

use basalt_core::chunk::Chunk;
use basalt_core::Result;

/// Opaque scan-range descriptor. Only the provider interprets the
/// descriptor; the engine treats ranges as schedulable units.
#[derive(Debug, Clone, Default)]
pub struct ScanRange {
    pub descriptor: String,
}

impl ScanRange {
    pub fn new(descriptor: impl Into<String>) -> Self {
        Self {
            descriptor: descriptor.into(),
        }
    }

    /// A placeholder range, injected when a provider refuses empty range
    /// lists so that at least one data source gets created.
    pub fn placeholder() -> Self {
        Self::default()
    }

    pub fn is_placeholder(&self) -> bool {
        self.descriptor.is_empty()
    }
}

/// A predicate or runtime filter evaluated against a chunk in place.
pub trait ChunkFilter: Send + Sync {
    fn apply(&self, chunk: &mut Chunk) -> Result<()>;
}

/// Filters that arrive asynchronously from joins while the scan runs.
#[derive(Default)]
pub struct RuntimeFilterCollector {
    filters: RwLock<Vec<Arc<dyn ChunkFilter>>>,
}

impl RuntimeFilterCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, filter: Arc<dyn ChunkFilter>) {
        self.filters.write().unwrap().push(filter);
    }

    pub fn apply_all(&self, chunk: &mut Chunk) -> Result<()> {
        for filter in self.filters.read().unwrap().iter() {
            filter.apply(chunk)?;
        }
        Ok(())
    }
}

/// One physical reader for one scan range.
///
/// `get_next` fills the chunk and returns the end-of-file status once the
/// range is exhausted. Predicates, runtime filters, and the read limit are
/// injected before `open`.
pub trait DataSource: Send {
    fn set_predicates(&mut self, _predicates: Vec<Arc<dyn ChunkFilter>>) {}
    fn set_runtime_filters(&mut self, _filters: Arc<RuntimeFilterCollector>) {}
    fn set_read_limit(&mut self, _limit: i64) {}

    fn open(&mut self) -> Result<()>;
    fn get_next(&mut self, chunk: &mut Chunk) -> Result<()>;
    fn close(&mut self);

    /// Rows read off the underlying storage, before predicate filtering.
    fn raw_rows_read(&self) -> i64;
    /// Rows surviving filtering, as delivered into chunks.
    fn num_rows_read(&self) -> i64;
}

/// Factory for [`DataSource`]s plus the provider-level design hints the
/// enclosing pipeline consumes.
pub trait DataSourceProvider: Send + Sync {
    fn create_data_source(&self, scan_range: &ScanRange) -> Result<Box<dyn DataSource>>;

    /// Whether an empty scan-range list is meaningful to this provider. If
    /// not, the node injects a placeholder range.
    fn accept_empty_scan_ranges(&self) -> bool {
        true
    }

    /// Hint: whether the pipeline should insert a local exchange above this
    /// scan instead of a passthrough.
    fn insert_local_exchange_operator(&self) -> bool {
        false
    }

    fn open(&self) -> Result<()> {
        Ok(())
    }

    fn close(&self) {}
}

/// Process-wide count of data-source file handles currently open.
///
/// Data sources tick it around open/close; scan nodes consult it for
/// admission control. Injected explicitly so tests can observe it.
#[derive(Debug, Default)]
pub struct OpenFileTracker {
    open_files: AtomicI64,
}

impl OpenFileTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&self) -> i64 {
        self.open_files.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn decrement(&self) -> i64 {
        self.open_files.fetch_sub(1, Ordering::AcqRel) - 1
    }

    pub fn current(&self) -> i64 {
        self.open_files.load(Ordering::Acquire)
    }
}
