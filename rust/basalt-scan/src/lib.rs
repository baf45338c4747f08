// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Basalt Authors

//! The connector scan engine.
//!
//! A [`node::ConnectorScanNode`] drives one query's scan: it turns scan
//! ranges into per-range [`scanner::ConnectorScanner`]s, schedules them on a
//! shared [`pool::PriorityThreadPool`] under file-handle and chunk-pool
//! budgets, and hands fixed-size chunks to the consumer through a
//! backpressured result queue.

pub mod connector;
pub mod node;
pub mod pool;
pub mod queue;
pub mod scanner;

pub use connector::{
    ChunkFilter, DataSource, DataSourceProvider, OpenFileTracker, RuntimeFilterCollector, ScanRange,
};
pub use node::{ConnectorScanNode, ScanOptions};
pub use pool::{PriorityThreadPool, Task};
pub use queue::BoundedBlockingQueue;
