// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Basalt Authors

//! Compaction task construction.
//!
//! [`TabletManager::compact`] materializes the rowsets of one metadata
//! version into a [`HorizontalCompactionTask`]; running the task (merging
//! segments, emitting the op_compaction txn log) belongs to the compaction
//! runner, not this crate.
//!
//! [`TabletManager::compact`]: crate::tablet_manager::TabletManager::compact

use std::sync::Arc;

use crate::format::pb;
use crate::tablet::Tablet;

/// One materialized rowset of a tablet.
pub struct Rowset {
    tablet_id: i64,
    metadata: Arc<pb::RowsetMetadata>,
}

pub type RowsetPtr = Arc<Rowset>;

impl Rowset {
    pub fn new(tablet_id: i64, metadata: Arc<pb::RowsetMetadata>) -> Self {
        Self {
            tablet_id,
            metadata,
        }
    }

    pub fn tablet_id(&self) -> i64 {
        self.tablet_id
    }

    pub fn id(&self) -> u32 {
        self.metadata.id
    }

    pub fn num_rows(&self) -> i64 {
        self.metadata.num_rows
    }

    pub fn data_size(&self) -> i64 {
        self.metadata.data_size
    }

    pub fn num_segments(&self) -> usize {
        self.metadata.segments.len()
    }

    pub fn is_overlapped(&self) -> bool {
        self.metadata.overlapped
    }

    pub fn metadata(&self) -> &pb::RowsetMetadata {
        &self.metadata
    }
}

/// A row-oriented merge over every input rowset, bound to the txn that will
/// carry its result.
pub struct HorizontalCompactionTask {
    txn_id: i64,
    version: i64,
    tablet: Arc<Tablet>,
    input_rowsets: Vec<RowsetPtr>,
}

impl std::fmt::Debug for HorizontalCompactionTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HorizontalCompactionTask")
            .field("txn_id", &self.txn_id)
            .field("version", &self.version)
            .field("input_rowsets_len", &self.input_rowsets.len())
            .finish_non_exhaustive()
    }
}

impl HorizontalCompactionTask {
    pub fn new(
        txn_id: i64,
        version: i64,
        tablet: Arc<Tablet>,
        input_rowsets: Vec<RowsetPtr>,
    ) -> Self {
        Self {
            txn_id,
            version,
            tablet,
            input_rowsets,
        }
    }

    pub fn txn_id(&self) -> i64 {
        self.txn_id
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    pub fn tablet(&self) -> &Arc<Tablet> {
        &self.tablet
    }

    pub fn input_rowsets(&self) -> &[RowsetPtr] {
        &self.input_rowsets
    }

    /// Total rows across the inputs.
    pub fn input_rows(&self) -> i64 {
        self.input_rowsets.iter().map(|r| r.num_rows()).sum()
    }
}
