// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Basalt Authors

//! The publish protocol: advance a tablet's visible version by replaying
//! txn logs onto a base metadata snapshot.
//!
//! Publish is idempotent per tablet. A retry after a crash may find the
//! base metadata gone (superseded) or the txn logs already deleted; both
//! resolve by probing for the new-version metadata and returning OK when it
//! exists. Log application happens on an in-memory copy; nothing is written
//! until every log applied cleanly.

use log::warn;
use snafu::location;

use basalt_core::{Error, Result};

use crate::format::pb;
use crate::tablet::Tablet;

/// Applies one txn log to the in-memory metadata copy.
pub fn apply_txn_log(log: &pb::TxnLog, metadata: &mut pb::TabletMetadata) -> Result<()> {
    if let Some(op_write) = &log.op_write {
        apply_write_log(op_write, metadata)?;
    }
    if let Some(op_compaction) = &log.op_compaction {
        apply_compaction_log(op_compaction, metadata)?;
    }
    if log.op_schema_change.is_some() {
        return Err(Error::not_supported(
            "does not support applying schema change log yet",
            location!(),
        ));
    }
    Ok(())
}

fn apply_write_log(op_write: &pb::OpWrite, metadata: &mut pb::TabletMetadata) -> Result<()> {
    let Some(rowset) = &op_write.rowset else {
        return Ok(());
    };
    if rowset.num_rows == 0 {
        return Ok(());
    }
    let mut rowset = rowset.clone();
    rowset.id = metadata.next_rowset_id;
    metadata.next_rowset_id += rowset.segments.len() as u32;
    metadata.rowsets.push(rowset);
    Ok(())
}

fn apply_compaction_log(
    op_compaction: &pb::OpCompaction,
    metadata: &mut pb::TabletMetadata,
) -> Result<()> {
    // A compaction log without inputs is a no-op.
    if op_compaction.input_rowsets.is_empty() {
        debug_assert!(op_compaction
            .output_rowset
            .as_ref()
            .map_or(true, |r| r.num_rows == 0));
        return Ok(());
    }

    let first_id = op_compaction.input_rowsets[0];
    let Some(first_input_pos) = metadata.rowsets.iter().position(|r| r.id == first_id) else {
        return Err(Error::internal(
            format!("input rowset {first_id} not found"),
            location!(),
        ));
    };

    // Every input must exist and the inputs must sit in adjacent positions,
    // in the declared order. Validate fully before mutating anything.
    let mut pre_input_pos = first_input_pos;
    for input_id in op_compaction.input_rowsets.iter().skip(1) {
        match metadata.rowsets[pre_input_pos + 1..]
            .iter()
            .position(|r| r.id == *input_id)
        {
            Some(0) => pre_input_pos += 1,
            Some(_) => {
                return Err(Error::internal(
                    "input rowset position not adjacent",
                    location!(),
                ))
            }
            None => {
                return Err(Error::internal(
                    format!("input rowset {input_id} not exist"),
                    location!(),
                ))
            }
        }
    }

    let mut erase_from = first_input_pos;
    if let Some(output) = &op_compaction.output_rowset {
        if output.num_rows > 0 {
            // The output takes the first input's slot.
            let mut output = output.clone();
            output.id = metadata.next_rowset_id;
            metadata.next_rowset_id += output.segments.len() as u32;
            metadata.rowsets[first_input_pos] = output;
            erase_from = first_input_pos + 1;
        }
    }
    metadata.rowsets.drain(erase_from..=pre_input_pos);
    Ok(())
}

/// Publishes `new_version` from `base_version` by replaying `txns` in
/// order. See the module docs for the idempotency protocol.
pub async fn publish(
    tablet: &Tablet,
    base_version: i64,
    new_version: i64,
    txns: &[i64],
) -> Result<()> {
    let base_metadata = match tablet.get_metadata(base_version).await {
        Ok(metadata) => metadata,
        Err(e) => {
            if e.is_not_found() && tablet.get_metadata(new_version).await.is_ok() {
                // Retried publish; the new version already landed.
                return Ok(());
            }
            warn!(
                "Fail to get {}: {e}",
                tablet.metadata_location(base_version)
            );
            return Err(e);
        }
    };

    let mut new_metadata = (*base_metadata).clone();
    new_metadata.version = new_version;

    for txn_id in txns {
        let txn_log = match tablet.get_txn_log(*txn_id).await {
            Ok(log) => log,
            Err(e) => {
                if e.is_not_found() && tablet.get_metadata(new_version).await.is_ok() {
                    // Log already consumed by a successful publish.
                    return Ok(());
                }
                warn!("Fail to get {}: {e}", tablet.txn_log_location(*txn_id));
                return Err(e);
            }
        };
        if let Err(e) = apply_txn_log(&txn_log, &mut new_metadata) {
            warn!("Fail to apply {}: {e}", tablet.txn_log_location(*txn_id));
            return Err(e);
        }
    }

    if let Err(e) = tablet.put_metadata(new_metadata).await {
        warn!("Fail to put {}: {e}", tablet.metadata_location(new_version));
        return Err(e);
    }

    // Best-effort cleanup; a leaked log is harmless and vacuumable.
    for txn_id in txns {
        if let Err(e) = tablet.delete_txn_log(*txn_id).await {
            warn!("Fail to delete {}: {e}", tablet.txn_log_location(*txn_id));
        }
    }
    Ok(())
}
