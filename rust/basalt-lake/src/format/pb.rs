// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Basalt Authors

//! Wire messages for tablet metadata and transaction logs.

use deepsize::DeepSizeOf;

/// One column of a tablet schema. Unique ids survive schema changes; the
/// positional index does not.
#[derive(Clone, PartialEq, ::prost::Message, DeepSizeOf)]
pub struct ColumnMetadata {
    #[prost(uint32, tag = "1")]
    pub unique_id: u32,
    #[prost(string, tag = "2")]
    pub name: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub logical_type: ::prost::alloc::string::String,
    #[prost(bool, tag = "4")]
    pub is_key: bool,
    #[prost(bool, tag = "5")]
    pub is_nullable: bool,
}

#[derive(Clone, PartialEq, ::prost::Message, DeepSizeOf)]
pub struct TabletSchema {
    #[prost(message, repeated, tag = "1")]
    pub columns: ::prost::alloc::vec::Vec<ColumnMetadata>,
}

/// A unit of data produced by one write or compaction.
#[derive(Clone, PartialEq, ::prost::Message, DeepSizeOf)]
pub struct RowsetMetadata {
    /// Assigned from the owning metadata's `next_rowset_id` at apply time;
    /// the id range `[id, id + segments.len())` is reserved for segments.
    #[prost(uint32, tag = "1")]
    pub id: u32,
    #[prost(string, repeated, tag = "2")]
    pub segments: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
    #[prost(int64, tag = "3")]
    pub num_rows: i64,
    #[prost(int64, tag = "4")]
    pub data_size: i64,
    #[prost(bool, tag = "5")]
    pub overlapped: bool,
}

/// Versioned snapshot of one tablet. Immutable once written.
#[derive(Clone, PartialEq, ::prost::Message, DeepSizeOf)]
pub struct TabletMetadata {
    #[prost(int64, tag = "1")]
    pub id: i64,
    #[prost(int64, tag = "2")]
    pub version: i64,
    #[prost(uint32, tag = "3")]
    pub next_rowset_id: u32,
    #[prost(message, optional, tag = "4")]
    pub schema: ::core::option::Option<TabletSchema>,
    #[prost(message, repeated, tag = "5")]
    pub rowsets: ::prost::alloc::vec::Vec<RowsetMetadata>,
}

#[derive(Clone, PartialEq, ::prost::Message, DeepSizeOf)]
pub struct OpWrite {
    #[prost(message, optional, tag = "1")]
    pub rowset: ::core::option::Option<RowsetMetadata>,
}

#[derive(Clone, PartialEq, ::prost::Message, DeepSizeOf)]
pub struct OpCompaction {
    /// Rowset ids consumed by the compaction, in their metadata order.
    #[prost(uint32, repeated, tag = "1")]
    pub input_rowsets: ::prost::alloc::vec::Vec<u32>,
    #[prost(message, optional, tag = "2")]
    pub output_rowset: ::core::option::Option<RowsetMetadata>,
}

#[derive(Clone, PartialEq, ::prost::Message, DeepSizeOf)]
pub struct OpSchemaChange {
    #[prost(int64, tag = "1")]
    pub alter_version: i64,
}

/// A proposed mutation to a tablet, applied at publish time.
#[derive(Clone, PartialEq, ::prost::Message, DeepSizeOf)]
pub struct TxnLog {
    #[prost(int64, tag = "1")]
    pub tablet_id: i64,
    #[prost(int64, tag = "2")]
    pub txn_id: i64,
    #[prost(message, optional, tag = "3")]
    pub op_write: ::core::option::Option<OpWrite>,
    #[prost(message, optional, tag = "4")]
    pub op_compaction: ::core::option::Option<OpCompaction>,
    #[prost(message, optional, tag = "5")]
    pub op_schema_change: ::core::option::Option<OpSchemaChange>,
}
