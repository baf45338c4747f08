// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Basalt Authors

//! Tablet metadata formats and shared pointer aliases.

use std::sync::Arc;

pub mod pb;

pub type TabletMetadataPtr = Arc<pb::TabletMetadata>;
pub type TxnLogPtr = Arc<pb::TxnLog>;
pub type TabletSchemaPtr = Arc<pb::TabletSchema>;

/// Column description supplied by the frontend when creating a tablet.
#[derive(Debug, Clone)]
pub struct ColumnSpec {
    pub name: String,
    pub logical_type: String,
    pub is_key: bool,
    pub is_nullable: bool,
}

/// Tablet-creation request.
#[derive(Debug, Clone)]
pub struct CreateTabletRequest {
    pub tablet_id: i64,
    pub columns: Vec<ColumnSpec>,
}

/// Translates the frontend column list into a schema, assigning unique
/// column ids `0..N-1` in declaration order.
pub fn schema_from_specs(columns: &[ColumnSpec]) -> pb::TabletSchema {
    pb::TabletSchema {
        columns: columns
            .iter()
            .enumerate()
            .map(|(idx, spec)| pb::ColumnMetadata {
                unique_id: idx as u32,
                name: spec.name.clone(),
                logical_type: spec.logical_type.clone(),
                is_key: spec.is_key,
                is_nullable: spec.is_nullable,
            })
            .collect(),
    }
}
