// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Basalt Authors

//! Convenience handle binding one tablet id to the manager.

use object_store::path::Path;

use basalt_core::Result;

use crate::format::{TabletMetadataPtr, TabletSchemaPtr, TxnLogPtr};
use crate::tablet_manager::TabletManager;

#[derive(Clone)]
pub struct Tablet {
    manager: TabletManager,
    id: i64,
}

impl Tablet {
    pub(crate) fn new(manager: TabletManager, id: i64) -> Self {
        Self { manager, id }
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn root_location(&self) -> Path {
        self.manager.tablet_root_location(self.id)
    }

    pub fn metadata_location(&self, version: i64) -> Path {
        self.manager.tablet_metadata_location(self.id, version)
    }

    pub fn txn_log_location(&self, txn_id: i64) -> Path {
        self.manager.txn_log_location(self.id, txn_id)
    }

    pub fn segment_location(&self, segment_name: &str) -> Path {
        self.manager.segment_location(self.id, segment_name)
    }

    pub async fn get_metadata(&self, version: i64) -> Result<TabletMetadataPtr> {
        self.manager.get_tablet_metadata(self.id, version).await
    }

    pub async fn put_metadata(&self, metadata: impl Into<TabletMetadataPtr>) -> Result<()> {
        self.manager.put_tablet_metadata(metadata).await
    }

    pub async fn delete_metadata(&self, version: i64) -> Result<()> {
        self.manager.delete_tablet_metadata(self.id, version).await
    }

    pub async fn get_txn_log(&self, txn_id: i64) -> Result<TxnLogPtr> {
        self.manager.get_txn_log(self.id, txn_id).await
    }

    pub async fn put_txn_log(&self, log: impl Into<TxnLogPtr>) -> Result<()> {
        self.manager.put_txn_log(log).await
    }

    pub async fn delete_txn_log(&self, txn_id: i64) -> Result<()> {
        self.manager.delete_txn_log(self.id, txn_id).await
    }

    pub async fn get_schema(&self) -> Result<TabletSchemaPtr> {
        self.manager.get_tablet_schema(self.id).await
    }
}
