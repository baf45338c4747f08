// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Basalt Authors

//! The lake tablet manager.
//!
//! Tablet metadata and write-ahead transaction logs are immutable protobuf
//! objects in an object store; [`tablet_manager::TabletManager`] is the
//! front door for CRUD on them, and [`publish`] advances a tablet's visible
//! version by replaying txn logs onto a base metadata snapshot. A shared
//! [`metacache::MetaCache`] keeps hot metadata, logs, and deduplicated
//! schemas in memory.
//!
//! [`publish`]: publish::publish

pub mod compaction;
pub mod format;
pub mod location;
pub mod metacache;
pub mod publish;
pub mod schema_map;
pub mod tablet;
pub mod tablet_manager;
pub mod testing;

pub use format::{
    ColumnSpec, CreateTabletRequest, TabletMetadataPtr, TabletSchemaPtr, TxnLogPtr,
};
pub use location::{FixedLocationProvider, LocationProvider};
pub use tablet::Tablet;
pub use tablet_manager::{TabletManager, TabletMetadataIter, TxnLogIter};
