// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Basalt Authors

//! Front door for tablet metadata and txn-log CRUD.
//!
//! Every operation is synchronous from the caller's perspective (one
//! `await`), thread-safe through the metacache's sharded locking and the
//! object store's own atomicity. Metadata objects are write-once per
//! `(tablet_id, version)`; an overwrite only ever replaces a torn write
//! with the same semantic content.

use std::sync::Arc;

use bytes::Bytes;
use deepsize::DeepSizeOf;
use futures::StreamExt;
use log::warn;
use object_store::path::Path;
use object_store::ObjectStore;
use prost::Message;
use snafu::location;

use basalt_core::{Error, Result};

use crate::compaction::{HorizontalCompactionTask, Rowset};
use crate::format::{
    pb, schema_from_specs, CreateTabletRequest, TabletMetadataPtr, TabletSchemaPtr, TxnLogPtr,
};
use crate::location::{
    tablet_metadata_prefix, tablet_schema_cache_key, txn_log_prefix, LocationProvider,
    TABLET_METADATA_PREFIX, TXN_LOG_PREFIX,
};
use crate::metacache::{CacheValue, MetaCache};
use crate::publish::publish;
use crate::schema_map::TabletSchemaMap;
use crate::tablet::Tablet;

fn object_store_error(e: object_store::Error, path: &Path) -> Error {
    match e {
        object_store::Error::NotFound { .. } => Error::not_found(path.as_ref()),
        other => Error::IO {
            source: Box::new(other),
            location: location!(),
        },
    }
}

struct ManagerInner {
    store: Arc<dyn ObjectStore>,
    location_provider: Arc<dyn LocationProvider>,
    schema_map: Arc<TabletSchemaMap>,
    metacache: MetaCache,
}

#[derive(Clone)]
pub struct TabletManager {
    inner: Arc<ManagerInner>,
}

impl TabletManager {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        location_provider: Arc<dyn LocationProvider>,
        schema_map: Arc<TabletSchemaMap>,
        cache_capacity: usize,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                store,
                location_provider,
                schema_map,
                metacache: MetaCache::new(cache_capacity),
            }),
        }
    }

    pub fn tablet_root_location(&self, tablet_id: i64) -> Path {
        self.inner.location_provider.root_location(tablet_id)
    }

    pub fn tablet_metadata_location(&self, tablet_id: i64, version: i64) -> Path {
        self.inner
            .location_provider
            .tablet_metadata_location(tablet_id, version)
    }

    pub fn txn_log_location(&self, tablet_id: i64, txn_id: i64) -> Path {
        self.inner
            .location_provider
            .txn_log_location(tablet_id, txn_id)
    }

    pub fn segment_location(&self, tablet_id: i64, segment_name: &str) -> Path {
        self.inner
            .location_provider
            .segment_location(tablet_id, segment_name)
    }

    pub fn get_tablet(&self, tablet_id: i64) -> Tablet {
        Tablet::new(self.clone(), tablet_id)
    }

    pub fn metacache(&self) -> &MetaCache {
        &self.inner.metacache
    }

    pub fn prune_metacache(&self) {
        self.inner.metacache.prune();
    }

    /// Builds the version-1 metadata for a fresh tablet and persists it.
    pub async fn create_tablet(&self, req: CreateTabletRequest) -> Result<()> {
        let metadata = pb::TabletMetadata {
            id: req.tablet_id,
            version: 1,
            next_rowset_id: 1,
            schema: Some(schema_from_specs(&req.columns)),
            rowsets: vec![],
        };
        self.put_tablet_metadata(metadata).await
    }

    // ------------------------------------------------------------------
    // Object plumbing
    // ------------------------------------------------------------------

    async fn read_object(&self, path: &Path) -> Result<Bytes> {
        let result = self
            .inner
            .store
            .get(path)
            .await
            .map_err(|e| object_store_error(e, path))?;
        if result.meta.size as u64 > i32::MAX as u64 {
            return Err(Error::corrupt_file(
                path.clone(),
                "file size exceeded the int range",
                location!(),
            ));
        }
        result
            .bytes()
            .await
            .map_err(|e| object_store_error(e, path))
    }

    async fn write_object(&self, path: &Path, payload: Vec<u8>) -> Result<()> {
        self.inner
            .store
            .put(path, Bytes::from(payload).into())
            .await
            .map_err(|e| object_store_error(e, path))?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Tablet metadata
    // ------------------------------------------------------------------

    pub async fn put_tablet_metadata(&self, metadata: impl Into<TabletMetadataPtr>) -> Result<()> {
        let metadata = metadata.into();
        let path = self.tablet_metadata_location(metadata.id, metadata.version);
        self.write_object(&path, metadata.encode_to_vec()).await?;

        let weight = metadata.deep_size_of();
        let inserted =
            self.inner
                .metacache
                .fill(path.as_ref(), CacheValue::Metadata(metadata), weight);
        if !inserted {
            warn!("Failed to put into meta cache {path}");
        }
        Ok(())
    }

    async fn load_tablet_metadata(&self, path: &Path) -> Result<TabletMetadataPtr> {
        let data = self.read_object(path).await?;
        let metadata = pb::TabletMetadata::decode(data).map_err(|e| {
            Error::corrupt_file(
                path.clone(),
                format!("failed to parse tablet metadata: {e}"),
                location!(),
            )
        })?;
        Ok(Arc::new(metadata))
    }

    pub async fn get_tablet_metadata(
        &self,
        tablet_id: i64,
        version: i64,
    ) -> Result<TabletMetadataPtr> {
        let path = self.tablet_metadata_location(tablet_id, version);
        self.get_tablet_metadata_at(&path, true).await
    }

    pub async fn get_tablet_metadata_at(
        &self,
        path: &Path,
        fill_cache: bool,
    ) -> Result<TabletMetadataPtr> {
        if let Some(ptr) = self.inner.metacache.lookup_tablet_metadata(path.as_ref()) {
            return Ok(ptr);
        }
        let ptr = self.load_tablet_metadata(path).await?;
        if fill_cache {
            let weight = ptr.deep_size_of();
            let inserted =
                self.inner
                    .metacache
                    .fill(path.as_ref(), CacheValue::Metadata(ptr.clone()), weight);
            if !inserted {
                warn!("Failed to put tablet metadata into cache {path}");
            }
        }
        Ok(ptr)
    }

    pub async fn delete_tablet_metadata(&self, tablet_id: i64, version: i64) -> Result<()> {
        let path = self.tablet_metadata_location(tablet_id, version);
        self.inner.metacache.erase(path.as_ref());
        self.inner
            .store
            .delete(&path)
            .await
            .map_err(|e| object_store_error(e, &path))
    }

    pub async fn list_tablet_metadata(
        &self,
        tablet_id: i64,
        filter_tablet: bool,
    ) -> Result<TabletMetadataIter> {
        let prefix = if filter_tablet {
            tablet_metadata_prefix(tablet_id)
        } else {
            TABLET_METADATA_PREFIX.to_string()
        };
        let paths = self.list_objects(tablet_id, &prefix).await?;
        Ok(TabletMetadataIter {
            manager: self.clone(),
            paths: paths.into(),
        })
    }

    // ------------------------------------------------------------------
    // Txn logs
    // ------------------------------------------------------------------

    pub async fn put_txn_log(&self, log: impl Into<TxnLogPtr>) -> Result<()> {
        let log = log.into();
        if log.tablet_id <= 0 {
            return Err(Error::invalid_input(
                "txn log does not have tablet id",
                location!(),
            ));
        }
        if log.txn_id <= 0 {
            return Err(Error::invalid_input(
                "txn log does not have txn id",
                location!(),
            ));
        }
        let path = self.txn_log_location(log.tablet_id, log.txn_id);
        self.write_object(&path, log.encode_to_vec()).await?;

        let weight = log.deep_size_of();
        let inserted = self
            .inner
            .metacache
            .fill(path.as_ref(), CacheValue::TxnLog(log), weight);
        if !inserted {
            warn!("Failed to put txn log into cache {path}");
        }
        Ok(())
    }

    async fn load_txn_log(&self, path: &Path) -> Result<TxnLogPtr> {
        let data = self.read_object(path).await?;
        let log = pb::TxnLog::decode(data).map_err(|e| {
            Error::corrupt_file(
                path.clone(),
                format!("failed to parse txn log: {e}"),
                location!(),
            )
        })?;
        Ok(Arc::new(log))
    }

    pub async fn get_txn_log(&self, tablet_id: i64, txn_id: i64) -> Result<TxnLogPtr> {
        let path = self.txn_log_location(tablet_id, txn_id);
        self.get_txn_log_at(&path, true).await
    }

    pub async fn get_txn_log_at(&self, path: &Path, fill_cache: bool) -> Result<TxnLogPtr> {
        if let Some(ptr) = self.inner.metacache.lookup_txn_log(path.as_ref()) {
            return Ok(ptr);
        }
        let ptr = self.load_txn_log(path).await?;
        if fill_cache {
            let weight = ptr.deep_size_of();
            let inserted =
                self.inner
                    .metacache
                    .fill(path.as_ref(), CacheValue::TxnLog(ptr.clone()), weight);
            if !inserted {
                warn!("Failed to put txn log into cache {path}");
            }
        }
        Ok(ptr)
    }

    pub async fn delete_txn_log(&self, tablet_id: i64, txn_id: i64) -> Result<()> {
        let path = self.txn_log_location(tablet_id, txn_id);
        self.inner.metacache.erase(path.as_ref());
        self.inner
            .store
            .delete(&path)
            .await
            .map_err(|e| object_store_error(e, &path))
    }

    pub async fn list_txn_log(&self, tablet_id: i64, filter_tablet: bool) -> Result<TxnLogIter> {
        let prefix = if filter_tablet {
            txn_log_prefix(tablet_id)
        } else {
            TXN_LOG_PREFIX.to_string()
        };
        let paths = self.list_objects(tablet_id, &prefix).await?;
        Ok(TxnLogIter {
            manager: self.clone(),
            paths: paths.into(),
        })
    }

    /// Children of the tablet root whose basename starts with `prefix`,
    /// in lexical order.
    async fn list_objects(&self, tablet_id: i64, prefix: &str) -> Result<Vec<Path>> {
        let root = self.tablet_root_location(tablet_id);
        let mut paths = Vec::new();
        let mut entries = self.inner.store.list(Some(&root));
        while let Some(item) = entries.next().await {
            let meta = item.map_err(|e| object_store_error(e, &root))?;
            if let Some(name) = meta.location.filename() {
                if name.starts_with(prefix) {
                    paths.push(meta.location.clone());
                }
            }
        }
        paths.sort();
        Ok(paths)
    }

    // ------------------------------------------------------------------
    // Schema
    // ------------------------------------------------------------------

    pub async fn get_tablet_schema(&self, tablet_id: i64) -> Result<TabletSchemaPtr> {
        let cache_key = tablet_schema_cache_key(tablet_id);
        if let Some(ptr) = self.inner.metacache.lookup_tablet_schema(&cache_key) {
            return Ok(ptr);
        }
        let mut iter = self.list_tablet_metadata(tablet_id, true).await?;
        if !iter.has_next() {
            return Err(Error::not_found(format!(
                "tablet {tablet_id} metadata not found"
            )));
        }
        let metadata = iter.next().await?;
        let schema = metadata.schema.as_ref().ok_or_else(|| {
            Error::internal(
                format!("tablet {tablet_id} metadata has no schema"),
                location!(),
            )
        })?;
        let (schema_ptr, inserted) = self.inner.schema_map.emplace(schema);
        // The metadata already cached carries the same schema bytes; only
        // the call that first interned the schema charges its weight.
        let cache_size = if inserted { schema_ptr.deep_size_of() } else { 0 };
        let _ = self.inner.metacache.fill(
            &cache_key,
            CacheValue::Schema(schema_ptr.clone()),
            cache_size,
        );
        Ok(schema_ptr)
    }

    // ------------------------------------------------------------------
    // Drop / publish / compaction
    // ------------------------------------------------------------------

    /// Removes every metadata and txn-log object of the tablet. Individual
    /// delete failures are logged, never fatal.
    pub async fn drop_tablet(&self, tablet_id: i64) -> Result<()> {
        let metadata_prefix = tablet_metadata_prefix(tablet_id);
        let log_prefix = txn_log_prefix(tablet_id);
        let root = self.tablet_root_location(tablet_id);
        let mut objects = Vec::new();
        let mut entries = self.inner.store.list(Some(&root));
        while let Some(item) = entries.next().await {
            let meta = item.map_err(|e| object_store_error(e, &root))?;
            if let Some(name) = meta.location.filename() {
                if name.starts_with(&metadata_prefix) || name.starts_with(&log_prefix) {
                    objects.push(meta.location.clone());
                }
            }
        }
        for path in objects {
            self.inner.metacache.erase(path.as_ref());
            if let Err(e) = self.inner.store.delete(&path).await {
                warn!("Failed to delete {path}: {e}");
            }
        }
        self.inner
            .metacache
            .erase(&tablet_schema_cache_key(tablet_id));
        Ok(())
    }

    /// Advances the tablet's visible version from `base_version` to
    /// `new_version` by replaying `txns` in order. Idempotent.
    pub async fn publish_version(
        &self,
        tablet_id: i64,
        base_version: i64,
        new_version: i64,
        txns: &[i64],
    ) -> Result<()> {
        let tablet = self.get_tablet(tablet_id);
        publish(&tablet, base_version, new_version, txns).await
    }

    /// Builds a compaction task over every rowset of the metadata at
    /// `version`. Task execution is the compaction runner's business.
    pub async fn compact(
        &self,
        tablet_id: i64,
        version: i64,
        txn_id: i64,
    ) -> Result<HorizontalCompactionTask> {
        let tablet = self.get_tablet(tablet_id);
        let metadata = tablet.get_metadata(version).await?;
        let tablet = Arc::new(tablet);
        let input_rowsets = metadata
            .rowsets
            .iter()
            .map(|rowset| Arc::new(Rowset::new(tablet_id, Arc::new(rowset.clone()))))
            .collect();
        Ok(HorizontalCompactionTask::new(
            txn_id,
            version,
            tablet,
            input_rowsets,
        ))
    }
}

/// Lazy iterator resolving listed metadata paths on demand.
pub struct TabletMetadataIter {
    manager: TabletManager,
    paths: std::collections::VecDeque<Path>,
}

impl TabletMetadataIter {
    pub fn has_next(&self) -> bool {
        !self.paths.is_empty()
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub async fn next(&mut self) -> Result<TabletMetadataPtr> {
        let path = self
            .paths
            .pop_front()
            .ok_or_else(|| Error::internal("metadata iterator exhausted", location!()))?;
        self.manager.get_tablet_metadata_at(&path, true).await
    }
}

/// Lazy iterator resolving listed txn-log paths on demand.
pub struct TxnLogIter {
    manager: TabletManager,
    paths: std::collections::VecDeque<Path>,
}

impl TxnLogIter {
    pub fn has_next(&self) -> bool {
        !self.paths.is_empty()
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub async fn next(&mut self) -> Result<TxnLogPtr> {
        let path = self
            .paths
            .pop_front()
            .ok_or_else(|| Error::internal("txn log iterator exhausted", location!()))?;
        self.manager.get_txn_log_at(&path, true).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::ColumnSpec;
    use crate::location::FixedLocationProvider;
    use crate::testing::IoTrackingStore;
    use object_store::memory::InMemory;

    fn columns() -> Vec<ColumnSpec> {
        vec![
            ColumnSpec {
                name: "k".to_string(),
                logical_type: "BIGINT".to_string(),
                is_key: true,
                is_nullable: false,
            },
            ColumnSpec {
                name: "v".to_string(),
                logical_type: "VARCHAR".to_string(),
                is_key: false,
                is_nullable: true,
            },
        ]
    }

    fn new_manager(store: Arc<dyn ObjectStore>) -> TabletManager {
        TabletManager::new(
            store,
            Arc::new(FixedLocationProvider::new(Path::from("warehouse"))),
            Arc::new(TabletSchemaMap::new()),
            16 << 20,
        )
    }

    fn memory_manager() -> TabletManager {
        new_manager(Arc::new(InMemory::new()))
    }

    fn test_rowset(num_segments: usize, num_rows: i64) -> pb::RowsetMetadata {
        pb::RowsetMetadata {
            id: 0,
            segments: (0..num_segments).map(|i| format!("seg-{i}.dat")).collect(),
            num_rows,
            data_size: num_rows * 16,
            overlapped: false,
        }
    }

    #[tokio::test]
    async fn create_tablet_writes_version_one() {
        let manager = memory_manager();
        manager
            .create_tablet(CreateTabletRequest {
                tablet_id: 100,
                columns: columns(),
            })
            .await
            .unwrap();

        let metadata = manager.get_tablet_metadata(100, 1).await.unwrap();
        assert_eq!(metadata.id, 100);
        assert_eq!(metadata.version, 1);
        assert_eq!(metadata.next_rowset_id, 1);
        let schema = metadata.schema.as_ref().unwrap();
        assert_eq!(schema.columns.len(), 2);
        assert_eq!(schema.columns[0].unique_id, 0);
        assert_eq!(schema.columns[1].unique_id, 1);
    }

    #[tokio::test]
    async fn metadata_roundtrip_is_byte_identical() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = Arc::new(
            object_store::local::LocalFileSystem::new_with_prefix(temp_dir.path()).unwrap(),
        );
        let manager = new_manager(store);

        let metadata = pb::TabletMetadata {
            id: 7,
            version: 5,
            next_rowset_id: 9,
            schema: Some(schema_from_specs(&columns())),
            rowsets: vec![test_rowset(2, 100)],
        };
        let expected = metadata.encode_to_vec();
        manager.put_tablet_metadata(metadata).await.unwrap();

        // Read back through storage, not the cache.
        manager.prune_metacache();
        let loaded = manager.get_tablet_metadata(7, 5).await.unwrap();
        assert_eq!(loaded.encode_to_vec(), expected);
    }

    #[tokio::test]
    async fn missing_metadata_is_not_found() {
        let manager = memory_manager();
        let err = manager.get_tablet_metadata(1, 99).await.unwrap_err();
        assert!(err.is_not_found(), "expected NotFound, got {err:?}");
    }

    #[tokio::test]
    async fn corrupt_metadata_surfaces_corruption() {
        let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        let manager = new_manager(store.clone());
        let path = manager.tablet_metadata_location(3, 1);
        // Valid protobuf decodes almost anything; an unterminated varint
        // cannot be parsed.
        store
            .put(&path, Bytes::from_static(&[0xFF]).into())
            .await
            .unwrap();
        let err = manager.get_tablet_metadata(3, 1).await.unwrap_err();
        assert!(
            matches!(err, Error::CorruptFile { .. }),
            "expected CorruptFile, got {err:?}"
        );
    }

    #[tokio::test]
    async fn txn_log_requires_ids() {
        let manager = memory_manager();
        let missing_tablet = pb::TxnLog {
            tablet_id: 0,
            txn_id: 5,
            ..Default::default()
        };
        let err = manager.put_txn_log(missing_tablet).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput { .. }));

        let missing_txn = pb::TxnLog {
            tablet_id: 5,
            txn_id: 0,
            ..Default::default()
        };
        let err = manager.put_txn_log(missing_txn).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput { .. }));
    }

    #[tokio::test]
    async fn txn_log_put_get_delete() {
        let manager = memory_manager();
        let log = pb::TxnLog {
            tablet_id: 11,
            txn_id: 21,
            op_write: Some(pb::OpWrite {
                rowset: Some(test_rowset(1, 10)),
            }),
            ..Default::default()
        };
        manager.put_txn_log(log.clone()).await.unwrap();

        let loaded = manager.get_txn_log(11, 21).await.unwrap();
        assert_eq!(*loaded, log);

        manager.delete_txn_log(11, 21).await.unwrap();
        let err = manager.get_txn_log(11, 21).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn listing_filters_by_tablet_prefix() {
        let manager = memory_manager();
        for version in 1..=3 {
            manager
                .put_tablet_metadata(pb::TabletMetadata {
                    id: 1,
                    version,
                    next_rowset_id: 1,
                    schema: Some(schema_from_specs(&columns())),
                    rowsets: vec![],
                })
                .await
                .unwrap();
        }
        manager
            .put_tablet_metadata(pb::TabletMetadata {
                id: 2,
                version: 1,
                next_rowset_id: 1,
                schema: Some(schema_from_specs(&columns())),
                rowsets: vec![],
            })
            .await
            .unwrap();

        let mut iter = manager.list_tablet_metadata(1, true).await.unwrap();
        assert_eq!(iter.len(), 3);
        while iter.has_next() {
            let metadata = iter.next().await.unwrap();
            assert_eq!(metadata.id, 1);
        }

        let all = manager.list_tablet_metadata(1, false).await.unwrap();
        assert_eq!(all.len(), 4);
    }

    #[tokio::test]
    async fn list_txn_log_resolves_lazily() {
        let manager = memory_manager();
        for txn_id in [31, 32] {
            manager
                .put_txn_log(pb::TxnLog {
                    tablet_id: 4,
                    txn_id,
                    ..Default::default()
                })
                .await
                .unwrap();
        }
        let mut iter = manager.list_txn_log(4, true).await.unwrap();
        assert_eq!(iter.len(), 2);
        let first = iter.next().await.unwrap();
        let second = iter.next().await.unwrap();
        assert_eq!(first.txn_id, 31);
        assert_eq!(second.txn_id, 32);
        assert!(!iter.has_next());
        assert!(iter.next().await.is_err());
    }

    #[tokio::test]
    async fn schema_lookup_dedups_and_caches() {
        let manager = memory_manager();
        manager
            .create_tablet(CreateTabletRequest {
                tablet_id: 8,
                columns: columns(),
            })
            .await
            .unwrap();

        let first = manager.get_tablet_schema(8).await.unwrap();
        let second = manager.get_tablet_schema(8).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.columns.len(), 2);

        let err = manager.get_tablet_schema(999).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn cached_metadata_served_without_reads() {
        let (store, stats) = IoTrackingStore::wrap(Arc::new(InMemory::new()));
        let manager = new_manager(store);
        manager
            .create_tablet(CreateTabletRequest {
                tablet_id: 6,
                columns: columns(),
            })
            .await
            .unwrap();

        // put_tablet_metadata filled the cache; no read needed.
        let reads_before = stats.gets();
        manager.get_tablet_metadata(6, 1).await.unwrap();
        assert_eq!(stats.gets(), reads_before);

        manager.prune_metacache();
        manager.get_tablet_metadata(6, 1).await.unwrap();
        assert_eq!(stats.gets(), reads_before + 1);
    }

    #[tokio::test]
    async fn drop_tablet_removes_everything() {
        let manager = memory_manager();
        manager
            .create_tablet(CreateTabletRequest {
                tablet_id: 5,
                columns: columns(),
            })
            .await
            .unwrap();
        manager
            .put_txn_log(pb::TxnLog {
                tablet_id: 5,
                txn_id: 50,
                ..Default::default()
            })
            .await
            .unwrap();
        // A neighbor tablet sharing the same root must survive the drop.
        manager
            .create_tablet(CreateTabletRequest {
                tablet_id: 55,
                columns: columns(),
            })
            .await
            .unwrap();

        manager.drop_tablet(5).await.unwrap();

        assert!(manager
            .get_tablet_metadata(5, 1)
            .await
            .unwrap_err()
            .is_not_found());
        assert!(manager.get_txn_log(5, 50).await.unwrap_err().is_not_found());
        assert!(manager.list_tablet_metadata(5, true).await.unwrap().is_empty());
        manager.get_tablet_metadata(55, 1).await.unwrap();
    }
}
