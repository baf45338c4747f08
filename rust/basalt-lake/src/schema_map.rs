// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Basalt Authors

//! Process-wide tablet schema dedup table.
//!
//! Many tablets of one table share a schema; deduping keeps a single
//! `Arc<TabletSchema>` alive per distinct schema. Entries are weak so a
//! schema disappears with its last strong reference.

use std::collections::hash_map::{DefaultHasher, Entry};
use std::collections::HashMap;
use std::hash::Hasher;
use std::sync::{Arc, Mutex, Weak};

use prost::Message;

use crate::format::{pb, TabletSchemaPtr};

#[derive(Default)]
pub struct TabletSchemaMap {
    entries: Mutex<HashMap<u64, Weak<pb::TabletSchema>>>,
}

fn fingerprint(schema: &pb::TabletSchema) -> u64 {
    let mut hasher = DefaultHasher::new();
    hasher.write(&schema.encode_to_vec());
    hasher.finish()
}

impl TabletSchemaMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the canonical pointer for `schema` and whether this call
    /// inserted it (false = deduplicated against a live entry).
    pub fn emplace(&self, schema: &pb::TabletSchema) -> (TabletSchemaPtr, bool) {
        let key = fingerprint(schema);
        let mut entries = self.entries.lock().unwrap();
        match entries.entry(key) {
            Entry::Occupied(mut slot) => {
                if let Some(existing) = slot.get().upgrade() {
                    if *existing == *schema {
                        return (existing, false);
                    }
                    // Fingerprint collision: hand out a standalone pointer
                    // rather than corrupting the canonical entry.
                    return (Arc::new(schema.clone()), false);
                }
                let ptr = Arc::new(schema.clone());
                slot.insert(Arc::downgrade(&ptr));
                (ptr, true)
            }
            Entry::Vacant(slot) => {
                let ptr = Arc::new(schema.clone());
                slot.insert(Arc::downgrade(&ptr));
                (ptr, true)
            }
        }
    }

    /// Live (upgradeable) entry count.
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap()
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
