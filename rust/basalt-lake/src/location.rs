// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Basalt Authors

//! Object layout: maps tablet ids and versions to object-store paths.
//!
//! A tablet's objects live flat under its root directory:
//!
//! ```text
//! <root>/
//!   ├── tbl_<tabletId:016X>_<version>   # TabletMetadata
//!   └── txn_<tabletId:016X>_<txnId>     # TxnLog
//! ```
//!
//! Only the tablet id is hex-padded; versions and txn ids are plain
//! decimal, so the lexicographic order of filenames is not version order.

use object_store::path::Path;

pub const TABLET_METADATA_PREFIX: &str = "tbl_";
pub const TXN_LOG_PREFIX: &str = "txn_";

pub fn tablet_metadata_filename(tablet_id: i64, version: i64) -> String {
    format!("tbl_{tablet_id:016X}_{version}")
}

pub fn txn_log_filename(tablet_id: i64, txn_id: i64) -> String {
    format!("txn_{tablet_id:016X}_{txn_id}")
}

/// Prefix matching every metadata object of one tablet.
pub fn tablet_metadata_prefix(tablet_id: i64) -> String {
    format!("tbl_{tablet_id:016X}_")
}

/// Prefix matching every txn log object of one tablet.
pub fn txn_log_prefix(tablet_id: i64) -> String {
    format!("txn_{tablet_id:016X}_")
}

/// Metacache key for a tablet's deduplicated schema.
pub fn tablet_schema_cache_key(tablet_id: i64) -> String {
    format!("schema_{tablet_id}")
}

fn parse_object_filename(name: &str, prefix: &str) -> Option<(i64, i64)> {
    let rest = name.strip_prefix(prefix)?;
    let (tablet, suffix) = rest.split_once('_')?;
    if tablet.len() != 16 {
        return None;
    }
    let tablet_id = i64::from_str_radix(tablet, 16).ok()?;
    let suffix = suffix.parse::<i64>().ok()?;
    Some((tablet_id, suffix))
}

/// Parses `tbl_<id>_<version>` back into `(tablet_id, version)`.
pub fn parse_tablet_metadata_filename(name: &str) -> Option<(i64, i64)> {
    parse_object_filename(name, TABLET_METADATA_PREFIX)
}

/// Parses `txn_<id>_<txn>` back into `(tablet_id, txn_id)`.
pub fn parse_txn_log_filename(name: &str) -> Option<(i64, i64)> {
    parse_object_filename(name, TXN_LOG_PREFIX)
}

/// Maps tablet objects to object-store locations. Implementations may place
/// different tablets in different buckets/prefixes.
pub trait LocationProvider: Send + Sync {
    fn root_location(&self, tablet_id: i64) -> Path;

    fn tablet_metadata_location(&self, tablet_id: i64, version: i64) -> Path {
        self.root_location(tablet_id)
            .child(tablet_metadata_filename(tablet_id, version))
    }

    fn txn_log_location(&self, tablet_id: i64, txn_id: i64) -> Path {
        self.root_location(tablet_id)
            .child(txn_log_filename(tablet_id, txn_id))
    }

    fn segment_location(&self, tablet_id: i64, segment_name: &str) -> Path {
        self.root_location(tablet_id).child(segment_name)
    }
}

/// Places every tablet under one fixed root directory.
#[derive(Debug, Clone)]
pub struct FixedLocationProvider {
    root: Path,
}

impl FixedLocationProvider {
    pub fn new(root: Path) -> Self {
        Self { root }
    }
}

impl LocationProvider for FixedLocationProvider {
    fn root_location(&self, _tablet_id: i64) -> Path {
        self.root.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filenames_pad_only_the_tablet_id() {
        assert_eq!(tablet_metadata_filename(1, 2), "tbl_0000000000000001_2");
        assert_eq!(
            tablet_metadata_filename(1, 1500),
            "tbl_0000000000000001_1500"
        );
        assert_eq!(txn_log_filename(0xABCD, 17), "txn_000000000000ABCD_17");
    }

    #[test]
    fn filename_order_is_not_version_order() {
        let v9 = tablet_metadata_filename(1, 9);
        let v10 = tablet_metadata_filename(1, 10);
        assert!(v10 < v9, "{v10} should sort before {v9}");
        let t2 = txn_log_filename(1, 2);
        let t11 = txn_log_filename(1, 11);
        assert!(t11 < t2, "{t11} should sort before {t2}");
    }

    #[test]
    fn filenames_parse_back() {
        let name = tablet_metadata_filename(0x7FFF_FFFF_FFFF, 42);
        assert_eq!(
            parse_tablet_metadata_filename(&name),
            Some((0x7FFF_FFFF_FFFF, 42))
        );
        let name = txn_log_filename(9, 16);
        assert_eq!(parse_txn_log_filename(&name), Some((9, 16)));
        assert_eq!(parse_tablet_metadata_filename("txn_x_y"), None);
        assert_eq!(parse_tablet_metadata_filename("tbl_zz_1"), None);
        assert_eq!(parse_tablet_metadata_filename("tbl_0000000000000001_x"), None);
    }

    #[test]
    fn fixed_provider_layout() {
        let provider = FixedLocationProvider::new(Path::from("warehouse/t1"));
        let location = provider.tablet_metadata_location(1, 1);
        assert_eq!(location.as_ref(), "warehouse/t1/tbl_0000000000000001_1");
        let log = provider.txn_log_location(1, 3);
        assert_eq!(log.as_ref(), "warehouse/t1/txn_0000000000000001_3");
        let segment = provider.segment_location(1, "seg-1.dat");
        assert_eq!(segment.as_ref(), "warehouse/t1/seg-1.dat");
    }

    #[test]
    fn schema_cache_key_is_decimal() {
        assert_eq!(tablet_schema_cache_key(1500), "schema_1500");
    }
}
