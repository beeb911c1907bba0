//! In-process storage backend.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::error::StoreResult;
use crate::models::{RawRecord, SourceId, StoredRecord};
use crate::storage::table::RecordTable;
use crate::storage::{PartFilter, PartStore};

/// Volatile store backed by a locked [`RecordTable`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    table: RwLock<RecordTable>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PartStore for MemoryStore {
    async fn existing_ids(
        &self,
        source_id: SourceId,
        external_ids: &[String],
    ) -> StoreResult<HashSet<String>> {
        Ok(self.table.read().await.existing_ids(source_id, external_ids))
    }

    async fn touch_last_seen(
        &self,
        source_id: SourceId,
        external_ids: &[String],
        seen_at: DateTime<Utc>,
    ) -> StoreResult<usize> {
        Ok(self.table.write().await.touch(source_id, external_ids, seen_at))
    }

    async fn insert(&self, record: &RawRecord, seen_at: DateTime<Utc>) -> StoreResult<StoredRecord> {
        self.table.write().await.insert(record, seen_at)
    }

    async fn delete_stale(
        &self,
        source_id: SourceId,
        older_than: DateTime<Utc>,
    ) -> StoreResult<usize> {
        Ok(self
            .table
            .write()
            .await
            .delete_where(|r| r.source_id == source_id && r.last_seen < older_than))
    }

    async fn delete_source(&self, source_id: SourceId) -> StoreResult<usize> {
        Ok(self
            .table
            .write()
            .await
            .delete_where(|r| r.source_id == source_id))
    }

    async fn list(&self, filter: &PartFilter) -> StoreResult<Vec<StoredRecord>> {
        Ok(self.table.read().await.list(filter))
    }

    async fn count(&self, filter: &PartFilter) -> StoreResult<usize> {
        Ok(self.table.read().await.count(filter))
    }

    async fn get(&self, id: i64) -> StoreResult<Option<StoredRecord>> {
        Ok(self.table.read().await.get(id))
    }
}
