//! Local filesystem storage implementation.
//!
//! Keeps the record table in memory and persists the whole table to a single
//! JSON file on [`PartStore::flush`]. Mutations only mark the table dirty, so
//! a reconciliation batch costs one file write instead of one per record.
//! Writes go to a temp file first and are renamed into place, so a crash
//! never leaves a half-written store.
//!
//! A failed flush leaves the table dirty; the next flush retries.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};

use crate::error::StoreResult;
use crate::models::{RawRecord, SourceId, StoredRecord};
use crate::storage::table::{RecordTable, TableSnapshot};
use crate::storage::{PartFilter, PartStore};

/// JSON-file storage backend.
#[derive(Debug)]
pub struct LocalStore {
    path: PathBuf,
    table: RwLock<RecordTable>,
    dirty: AtomicBool,
    /// Serializes flushes so an older snapshot never overwrites a newer one
    persist: Mutex<()>,
    writes: AtomicUsize,
}

impl LocalStore {
    /// Open the store at `path`, starting empty when the file does not exist.
    pub async fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        let table = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let snapshot: TableSnapshot = serde_json::from_slice(&bytes)?;
                log::info!(
                    "Loaded {} records from {}",
                    snapshot.records.len(),
                    path.display()
                );
                RecordTable::from_snapshot(snapshot)?
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::info!("No store at {}, starting empty", path.display());
                RecordTable::default()
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path,
            table: RwLock::new(table),
            dirty: AtomicBool::new(false),
            persist: Mutex::new(()),
            writes: AtomicUsize::new(0),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of times the store file has been written since opening.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Whether the table holds changes not yet flushed.
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    /// Write bytes atomically (write to temp, then rename).
    async fn write_bytes(&self, bytes: &[u8]) -> StoreResult<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp = self.path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        drop(file);

        tokio::fs::rename(&tmp, &self.path).await?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Apply `op` to the table in place, marking it dirty when it changed.
    async fn mutate<T>(
        &self,
        op: impl FnOnce(&mut RecordTable) -> StoreResult<(T, bool)>,
    ) -> StoreResult<T> {
        let mut table = self.table.write().await;
        let (out, changed) = op(&mut table)?;
        if changed {
            self.dirty.store(true, Ordering::SeqCst);
        }
        Ok(out)
    }
}

impl Drop for LocalStore {
    fn drop(&mut self) {
        if self.is_dirty() {
            log::warn!(
                "Store {} dropped with unflushed changes",
                self.path.display()
            );
        }
    }
}

#[async_trait]
impl PartStore for LocalStore {
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
        self.mutate(|table| {
            let touched = table.touch(source_id, external_ids, seen_at);
            Ok((touched, touched > 0))
        })
        .await
    }

    async fn insert(&self, record: &RawRecord, seen_at: DateTime<Utc>) -> StoreResult<StoredRecord> {
        self.mutate(|table| Ok((table.insert(record, seen_at)?, true)))
            .await
    }

    async fn delete_stale(
        &self,
        source_id: SourceId,
        older_than: DateTime<Utc>,
    ) -> StoreResult<usize> {
        self.mutate(|table| {
            let deleted =
                table.delete_where(|r| r.source_id == source_id && r.last_seen < older_than);
            Ok((deleted, deleted > 0))
        })
        .await
    }

    async fn delete_source(&self, source_id: SourceId) -> StoreResult<usize> {
        self.mutate(|table| {
            let deleted = table.delete_where(|r| r.source_id == source_id);
            Ok((deleted, deleted > 0))
        })
        .await
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

    async fn flush(&self) -> StoreResult<()> {
        let _persist = self.persist.lock().await;
        if !self.dirty.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        // Serialize under the read lock, write without it
        let bytes = {
            let table = self.table.read().await;
            serde_json::to_vec_pretty(&table.snapshot())
        };
        let result = match bytes {
            Ok(bytes) => self.write_bytes(&bytes).await,
            Err(e) => Err(e.into()),
        };
        if result.is_err() {
            self.dirty.store(true, Ordering::SeqCst);
        }
        result
    }
}
