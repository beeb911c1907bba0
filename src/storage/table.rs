//! In-memory record table shared by the store backends.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};
use crate::models::{RawRecord, SourceId, StoredRecord};

use super::PartFilter;

/// Records keyed by surrogate id, with a unique (source, external id) index.
#[derive(Debug, Clone, Default)]
pub(crate) struct RecordTable {
    records: BTreeMap<i64, StoredRecord>,
    index: HashMap<(SourceId, String), i64>,
    next_id: i64,
}

/// On-disk form of a [`RecordTable`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct TableSnapshot {
    pub updated_at: DateTime<Utc>,
    pub next_id: i64,
    pub count: usize,
    pub records: Vec<StoredRecord>,
}

impl RecordTable {
    pub fn from_snapshot(snapshot: TableSnapshot) -> StoreResult<Self> {
        let mut table = Self {
            next_id: snapshot.next_id,
            ..Self::default()
        };
        for record in snapshot.records {
            let key = (record.source_id, record.external_id.clone());
            if table.index.insert(key, record.id).is_some() {
                return Err(StoreError::Conflict {
                    source_id: record.source_id,
                    external_id: record.external_id,
                });
            }
            table.next_id = table.next_id.max(record.id);
            table.records.insert(record.id, record);
        }
        Ok(table)
    }

    pub fn snapshot(&self) -> TableSnapshot {
        TableSnapshot {
            updated_at: Utc::now(),
            next_id: self.next_id,
            count: self.records.len(),
            records: self.records.values().cloned().collect(),
        }
    }

    pub fn existing_ids(&self, source_id: SourceId, external_ids: &[String]) -> HashSet<String> {
        external_ids
            .iter()
            .filter(|id| self.index.contains_key(&(source_id, (*id).clone())))
            .cloned()
            .collect()
    }

    pub fn touch(&mut self, source_id: SourceId, external_ids: &[String], at: DateTime<Utc>) -> usize {
        let mut touched = 0;
        for external_id in external_ids {
            let Some(id) = self.index.get(&(source_id, external_id.clone())) else {
                continue;
            };
            if let Some(record) = self.records.get_mut(id) {
                record.touch(at);
                touched += 1;
            }
        }
        touched
    }

    pub fn insert(&mut self, record: &RawRecord, at: DateTime<Utc>) -> StoreResult<StoredRecord> {
        let key = (record.source_id, record.external_id.clone());
        if self.index.contains_key(&key) {
            return Err(StoreError::Conflict {
                source_id: record.source_id,
                external_id: record.external_id.clone(),
            });
        }

        self.next_id += 1;
        let stored = StoredRecord::first_seen(self.next_id, record, at);
        self.index.insert(key, stored.id);
        self.records.insert(stored.id, stored.clone());
        Ok(stored)
    }

    pub fn delete_where(&mut self, predicate: impl Fn(&StoredRecord) -> bool) -> usize {
        let doomed: Vec<i64> = self
            .records
            .values()
            .filter(|r| predicate(r))
            .map(|r| r.id)
            .collect();

        for id in &doomed {
            if let Some(record) = self.records.remove(id) {
                self.index.remove(&(record.source_id, record.external_id));
            }
        }
        doomed.len()
    }

    pub fn list(&self, filter: &PartFilter) -> Vec<StoredRecord> {
        let mut matching: Vec<&StoredRecord> =
            self.records.values().filter(|r| filter.matches(r)).collect();
        // Newest first; id breaks ties between records created in the same instant
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        matching
            .into_iter()
            .skip(filter.offset)
            .take(filter.page_limit())
            .cloned()
            .collect()
    }

    pub fn count(&self, filter: &PartFilter) -> usize {
        self.records.values().filter(|r| filter.matches(r)).count()
    }

    pub fn get(&self, id: i64) -> Option<StoredRecord> {
        self.records.get(&id).cloned()
    }
}
