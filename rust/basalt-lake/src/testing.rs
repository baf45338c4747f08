// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Basalt Authors

//! Test instrumentation for object-store I/O.
//!
//! [`IoTrackingStore`] wraps any store and counts the operations that reach
//! it, so tests can assert cache hits and idempotent-replay guarantees
//! ("no txn log was read again") instead of guessing.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream::BoxStream;
use object_store::path::Path;
use object_store::{
    GetOptions, GetResult, ListResult, MultipartUpload, ObjectMeta, ObjectStore, PutMultipartOpts,
    PutOptions, PutPayload, PutResult, Result,
};

/// Counters for operations that completed successfully.
#[derive(Debug, Default)]
pub struct IoStats {
    gets: AtomicU64,
    puts: AtomicU64,
    deletes: AtomicU64,
    read_paths: Mutex<Vec<Path>>,
}

impl IoStats {
    pub fn gets(&self) -> u64 {
        self.gets.load(Ordering::Acquire)
    }

    pub fn puts(&self) -> u64 {
        self.puts.load(Ordering::Acquire)
    }

    pub fn deletes(&self) -> u64 {
        self.deletes.load(Ordering::Acquire)
    }

    /// Paths of successful reads, in completion order.
    pub fn read_paths(&self) -> Vec<Path> {
        self.read_paths.lock().unwrap().clone()
    }
}

#[derive(Debug)]
pub struct IoTrackingStore {
    inner: Arc<dyn ObjectStore>,
    stats: Arc<IoStats>,
}

impl IoTrackingStore {
    pub fn wrap(inner: Arc<dyn ObjectStore>) -> (Arc<dyn ObjectStore>, Arc<IoStats>) {
        let stats = Arc::new(IoStats::default());
        let store = Arc::new(Self {
            inner,
            stats: Arc::clone(&stats),
        });
        (store, stats)
    }
}

impl fmt::Display for IoTrackingStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IoTrackingStore({})", self.inner)
    }
}

#[async_trait]
impl ObjectStore for IoTrackingStore {
    async fn put_opts(
        &self,
        location: &Path,
        payload: PutPayload,
        opts: PutOptions,
    ) -> Result<PutResult> {
        let result = self.inner.put_opts(location, payload, opts).await;
        if result.is_ok() {
            self.stats.puts.fetch_add(1, Ordering::AcqRel);
        }
        result
    }

    async fn put_multipart_opts(
        &self,
        location: &Path,
        opts: PutMultipartOpts,
    ) -> Result<Box<dyn MultipartUpload>> {
        self.inner.put_multipart_opts(location, opts).await
    }

    async fn get_opts(&self, location: &Path, options: GetOptions) -> Result<GetResult> {
        let result = self.inner.get_opts(location, options).await;
        if result.is_ok() {
            self.stats.gets.fetch_add(1, Ordering::AcqRel);
            self.stats.read_paths.lock().unwrap().push(location.clone());
        }
        result
    }

    async fn delete(&self, location: &Path) -> Result<()> {
        let result = self.inner.delete(location).await;
        if result.is_ok() {
            self.stats.deletes.fetch_add(1, Ordering::AcqRel);
        }
        result
    }

    fn list(&self, prefix: Option<&Path>) -> BoxStream<'static, Result<ObjectMeta>> {
        self.inner.list(prefix)
    }

    async fn list_with_delimiter(&self, prefix: Option<&Path>) -> Result<ListResult> {
        self.inner.list_with_delimiter(prefix).await
    }

    async fn copy(&self, from: &Path, to: &Path) -> Result<()> {
        self.inner.copy(from, to).await
    }

    async fn copy_if_not_exists(&self, from: &Path, to: &Path) -> Result<()> {
        self.inner.copy_if_not_exists(from, to).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use object_store::memory::InMemory;

    #[tokio::test]
    async fn tracks_successful_operations() {
        let (store, stats) = IoTrackingStore::wrap(Arc::new(InMemory::new()));
        let path = Path::from("dir/object");
        store
            .put(&path, Bytes::from_static(b"payload").into())
            .await
            .unwrap();
        assert_eq!(stats.puts(), 1);

        store.get(&path).await.unwrap();
        assert_eq!(stats.gets(), 1);
        assert_eq!(stats.read_paths(), vec![path.clone()]);

        // Failed reads are not counted.
        assert!(store.get(&Path::from("missing")).await.is_err());
        assert_eq!(stats.gets(), 1);

        store.delete(&path).await.unwrap();
        assert_eq!(stats.deletes(), 1);
    }
}
