// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Basalt Authors

//! Reusable columnar chunk buffers.
//!
//! A [`Chunk`] is a slot that a data source fills with one
//! [`RecordBatch`]. The scan engine pre-allocates a pool of empty chunks as
//! its backpressure budget: a filled chunk travels to the result queue and
//! an empty slot returns to the pool.

use arrow_array::RecordBatch;

#[derive(Debug, Default, Clone)]
pub struct Chunk {
    batch: Option<RecordBatch>,
}

impl Chunk {
    pub fn empty() -> Self {
        Self { batch: None }
    }

    pub fn fill(&mut self, batch: RecordBatch) {
        self.batch = Some(batch);
    }

    pub fn num_rows(&self) -> usize {
        self.batch.as_ref().map_or(0, |b| b.num_rows())
    }

    pub fn is_empty(&self) -> bool {
        self.num_rows() == 0
    }

    pub fn batch(&self) -> Option<&RecordBatch> {
        self.batch.as_ref()
    }

    /// Keeps only the first `len` rows. No-op when `len` covers the chunk.
    pub fn truncate(&mut self, len: usize) {
        if let Some(batch) = &self.batch {
            if len < batch.num_rows() {
                self.batch = Some(batch.slice(0, len));
            }
        }
    }

    /// Empties the slot for pool reuse.
    pub fn reset(&mut self) {
        self.batch = None;
    }

    pub fn into_batch(self) -> Option<RecordBatch> {
        self.batch
    }
}
