// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Basalt Authors

//! Shared cache of tablet metadata, txn logs, and deduplicated schemas.
//!
//! One LRU keyed by object path (or `schema_<id>`) holds all three payload
//! kinds behind a sealed tagged union; typed lookups miss on a kind
//! mismatch rather than panic.

use basalt_core::cache::ShardedLruCache;

use crate::format::{TabletMetadataPtr, TabletSchemaPtr, TxnLogPtr};

#[derive(Clone)]
pub enum CacheValue {
    Metadata(TabletMetadataPtr),
    TxnLog(TxnLogPtr),
    Schema(TabletSchemaPtr),
}

pub struct MetaCache {
    cache: ShardedLruCache<CacheValue>,
}

impl MetaCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            cache: ShardedLruCache::new(capacity),
        }
    }

    /// Inserts under the given weight. False means the entry was rejected
    /// (too heavy for the cache); callers log and move on.
    pub fn fill(&self, key: &str, value: CacheValue, weight: usize) -> bool {
        self.cache.insert(key, value, weight)
    }

    pub fn lookup_tablet_metadata(&self, key: &str) -> Option<TabletMetadataPtr> {
        match self.cache.get(key) {
            Some(CacheValue::Metadata(ptr)) => Some(ptr),
            _ => None,
        }
    }

    pub fn lookup_txn_log(&self, key: &str) -> Option<TxnLogPtr> {
        match self.cache.get(key) {
            Some(CacheValue::TxnLog(ptr)) => Some(ptr),
            _ => None,
        }
    }

    pub fn lookup_tablet_schema(&self, key: &str) -> Option<TabletSchemaPtr> {
        match self.cache.get(key) {
            Some(CacheValue::Schema(ptr)) => Some(ptr),
            _ => None,
        }
    }

    pub fn erase(&self, key: &str) {
        self.cache.erase(key);
    }

    pub fn prune(&self) {
        self.cache.prune();
    }

    pub fn weight(&self) -> usize {
        self.cache.weight()
    }

    pub fn capacity(&self) -> usize {
        self.cache.capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::pb;
    use std::sync::Arc;

    #[test]
    fn typed_lookups_do_not_cross_kinds() {
        let cache = MetaCache::new(1 << 20);
        let metadata = Arc::new(pb::TabletMetadata {
            id: 1,
            version: 1,
            next_rowset_id: 1,
            schema: None,
            rowsets: vec![],
        });
        assert!(cache.fill("tbl_x", CacheValue::Metadata(metadata.clone()), 64));

        assert_eq!(cache.lookup_tablet_metadata("tbl_x").unwrap().id, 1);
        assert!(cache.lookup_txn_log("tbl_x").is_none());
        assert!(cache.lookup_tablet_schema("tbl_x").is_none());
    }

    #[test]
    fn erase_and_prune_clear_entries() {
        let cache = MetaCache::new(1 << 20);
        let log = Arc::new(pb::TxnLog {
            tablet_id: 1,
            txn_id: 9,
            op_write: None,
            op_compaction: None,
            op_schema_change: None,
        });
        assert!(cache.fill("txn_x", CacheValue::TxnLog(log), 32));
        assert!(cache.lookup_txn_log("txn_x").is_some());
        cache.erase("txn_x");
        assert!(cache.lookup_txn_log("txn_x").is_none());

        let schema = Arc::new(pb::TabletSchema { columns: vec![] });
        assert!(cache.fill("schema_1", CacheValue::Schema(schema), 16));
        cache.prune();
        assert!(cache.lookup_tablet_schema("schema_1").is_none());
        assert_eq!(cache.weight(), 0);
    }
}
