//! Freshness reconciliation.
//!
//! Merges one cycle's fetched records into the store for a single source:
//!
//! 1. One batched lookup of which external ids already exist
//! 2. One batched last-seen refresh for those
//! 3. Per-record insert of the rest; a failed insert is skipped
//! 4. Staleness eviction, gated by a representativeness floor
//!
//! The store is flushed after the inserts and again after eviction, so a
//! buffering backend persists each batch once.
//!
//! The floor keeps a thin or blocked fetch from deleting live inventory.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::StoreResult;
use crate::models::{RawRecord, ReconcileConfig, SourceId, StoredRecord};
use crate::storage::PartStore;

/// Whether eviction runs for a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionGate {
    /// Delete records last seen before `threshold`
    Evict { threshold: DateTime<Utc> },
    /// Fetch too small to trust; eviction skipped for this cycle
    BelowFloor { fetched: usize, floor: usize },
}

/// Counts from one reconciliation.
#[derive(Debug, Default)]
pub struct ReconcileOutcome {
    /// Records stored for the first time
    pub inserted: Vec<StoredRecord>,
    /// Records already present, including ones inserted concurrently
    pub duplicates: usize,
    /// Inserts that failed for reasons other than a duplicate key
    pub errors: usize,
    pub evicted: usize,
    pub eviction_skipped: bool,
}

/// Reconciles fetched records against a [`PartStore`].
#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn PartStore>,
    config: ReconcileConfig,
}

impl Reconciler {
    pub fn new(store: Arc<dyn PartStore>, config: ReconcileConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &Arc<dyn PartStore> {
        &self.store
    }

    /// Decide whether a cycle that fetched `fetched` records may evict.
    pub fn eviction_gate(&self, fetched: usize, seen_at: DateTime<Utc>) -> EvictionGate {
        if fetched < self.config.min_representative {
            EvictionGate::BelowFloor {
                fetched,
                floor: self.config.min_representative,
            }
        } else {
            EvictionGate::Evict {
                threshold: seen_at - self.config.stale_after(),
            }
        }
    }

    /// Merge `records` for `source_id`, observed at `seen_at`.
    ///
    /// Fails only when the lookup, refresh, flush or eviction fails. Steps
    /// already completed stay applied.
    pub async fn reconcile(
        &self,
        source_id: SourceId,
        records: &[RawRecord],
        seen_at: DateTime<Utc>,
    ) -> StoreResult<ReconcileOutcome> {
        let mut seen = HashSet::new();
        let unique: Vec<&RawRecord> = records
            .iter()
            .filter(|r| seen.insert(r.external_id.as_str()))
            .collect();
        let ids: Vec<String> = unique.iter().map(|r| r.external_id.clone()).collect();

        let mut outcome = ReconcileOutcome::default();

        let existing = self.store.existing_ids(source_id, &ids).await?;
        if !existing.is_empty() {
            let known: Vec<String> = ids.iter().filter(|id| existing.contains(*id)).cloned().collect();
            self.store.touch_last_seen(source_id, &known, seen_at).await?;
            outcome.duplicates += known.len();
        }

        for record in unique.iter().filter(|r| !existing.contains(&r.external_id)) {
            match self.store.insert(record, seen_at).await {
                Ok(stored) => outcome.inserted.push(stored),
                Err(e) if e.is_conflict() => {
                    // Lost a race against a concurrent cycle for the same source
                    log::debug!("[{}] {}", source_id, e);
                    outcome.duplicates += 1;
                }
                Err(e) => {
                    log::warn!(
                        "[{}] failed to insert {}: {}",
                        source_id,
                        record.external_id,
                        e
                    );
                    outcome.errors += 1;
                }
            }
        }

        self.store.flush().await?;

        match self.eviction_gate(unique.len(), seen_at) {
            EvictionGate::Evict { threshold } => {
                outcome.evicted = self.store.delete_stale(source_id, threshold).await?;
                self.store.flush().await?;
                if outcome.evicted > 0 {
                    log::info!(
                        "[{}] evicted {} records not seen since {}",
                        source_id,
                        outcome.evicted,
                        threshold
                    );
                }
            }
            EvictionGate::BelowFloor { fetched, floor } => {
                outcome.eviction_skipped = true;
                log::info!(
                    "[{}] skipping eviction: {} records fetched, floor is {}",
                    source_id,
                    fetched,
                    floor
                );
            }
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use async_trait::async_trait;
    use chrono::Duration;

    use super::*;
    use crate::error::StoreError;
    use crate::storage::{LocalStore, MemoryStore, PartFilter};

    fn record(source: u32, id: &str, name: &str) -> RawRecord {
        RawRecord {
            external_id: id.into(),
            name: name.into(),
            description: String::new(),
            type_name: "Berlin".into(),
            image_base64: None,
            url: format!("https://example.com/{id}"),
            source_id: SourceId(source),
        }
    }

    fn batch(source: u32, n: usize) -> Vec<RawRecord> {
        (0..n)
            .map(|i| record(source, &format!("ad-{i}"), "Part"))
            .collect()
    }

    fn reconciler(store: Arc<dyn PartStore>) -> Reconciler {
        Reconciler::new(
            store,
            ReconcileConfig {
                stale_after_secs: 300,
                min_representative: 10,
            },
        )
    }

    /// Wraps a [`MemoryStore`] with injectable faults.
    #[derive(Default)]
    struct FaultyStore {
        inner: MemoryStore,
        /// Report nothing as existing, as if another cycle inserted meanwhile
        hide_existing: bool,
        fail_lookup: bool,
        fail_insert_for: Option<String>,
    }

    #[async_trait]
    impl PartStore for FaultyStore {
        async fn existing_ids(
            &self,
            source_id: SourceId,
            external_ids: &[String],
        ) -> StoreResult<HashSet<String>> {
            if self.fail_lookup {
                return Err(StoreError::backend("connection lost"));
            }
            if self.hide_existing {
                return Ok(HashSet::new());
            }
            self.inner.existing_ids(source_id, external_ids).await
        }

        async fn touch_last_seen(
            &self,
            source_id: SourceId,
            external_ids: &[String],
            seen_at: DateTime<Utc>,
        ) -> StoreResult<usize> {
            self.inner
                .touch_last_seen(source_id, external_ids, seen_at)
                .await
        }

        async fn insert(
            &self,
            record: &RawRecord,
            seen_at: DateTime<Utc>,
        ) -> StoreResult<StoredRecord> {
            if self.fail_insert_for.as_deref() == Some(record.external_id.as_str()) {
                return Err(StoreError::backend("disk full"));
            }
            self.inner.insert(record, seen_at).await
        }

        async fn delete_stale(
            &self,
            source_id: SourceId,
            older_than: DateTime<Utc>,
        ) -> StoreResult<usize> {
            self.inner.delete_stale(source_id, older_than).await
        }

        async fn delete_source(&self, source_id: SourceId) -> StoreResult<usize> {
            self.inner.delete_source(source_id).await
        }

        async fn list(&self, filter: &PartFilter) -> StoreResult<Vec<StoredRecord>> {
            self.inner.list(filter).await
        }

        async fn count(&self, filter: &PartFilter) -> StoreResult<usize> {
            self.inner.count(filter).await
        }

        async fn get(&self, id: i64) -> StoreResult<Option<StoredRecord>> {
            self.inner.get(id).await
        }
    }

    #[tokio::test]
    async fn first_sighting_inserts_then_only_refreshes() {
        let store = Arc::new(MemoryStore::new());
        let reconciler = reconciler(store.clone());
        let input = vec![record(7, "A", "Turbo")];
        let t0 = Utc::now();

        let first = reconciler.reconcile(SourceId(7), &input, t0).await.unwrap();
        assert_eq!(first.inserted.len(), 1);
        assert_eq!(first.inserted[0].external_id, "A");
        assert_eq!(first.inserted[0].name, "Turbo");
        assert_eq!(first.inserted[0].source_id, SourceId(7));

        let t1 = t0 + Duration::seconds(30);
        let second = reconciler.reconcile(SourceId(7), &input, t1).await.unwrap();
        assert!(second.inserted.is_empty());
        assert_eq!(second.duplicates, 1);

        let stored = store.get(first.inserted[0].id).await.unwrap().unwrap();
        assert_eq!(stored.last_seen, t1);
        assert_eq!(stored.created_at, t0);
    }

    #[tokio::test]
    async fn at_most_one_record_per_source_and_id() {
        let store = Arc::new(MemoryStore::new());
        let reconciler = reconciler(store.clone());
        let input = vec![
            record(1, "A", "Turbo"),
            record(1, "A", "Turbo again"),
            record(1, "B", "Intercooler"),
        ];

        for _ in 0..3 {
            reconciler
                .reconcile(SourceId(1), &input, Utc::now())
                .await
                .unwrap();
        }

        assert_eq!(store.count(&PartFilter::for_source(SourceId(1))).await.unwrap(), 2);
        let listed = store.list(&PartFilter::default()).await.unwrap();
        let a = listed.iter().find(|r| r.external_id == "A").unwrap();
        assert_eq!(a.name, "Turbo");
    }

    #[tokio::test]
    async fn last_seen_never_decreases() {
        let store = Arc::new(MemoryStore::new());
        let reconciler = reconciler(store.clone());
        let input = vec![record(1, "A", "Turbo")];
        let t0 = Utc::now();

        let first = reconciler.reconcile(SourceId(1), &input, t0).await.unwrap();
        reconciler
            .reconcile(SourceId(1), &input, t0 - Duration::minutes(10))
            .await
            .unwrap();

        let stored = store.get(first.inserted[0].id).await.unwrap().unwrap();
        assert_eq!(stored.last_seen, t0);
    }

    #[tokio::test]
    async fn thin_fetch_never_evicts() {
        let store = Arc::new(MemoryStore::new());
        let reconciler = reconciler(store.clone());
        let long_ago = Utc::now() - Duration::days(30);
        reconciler
            .reconcile(SourceId(1), &batch(1, 20), long_ago)
            .await
            .unwrap();

        let outcome = reconciler
            .reconcile(SourceId(1), &batch(1, 9)[..2], Utc::now())
            .await
            .unwrap();

        assert!(outcome.eviction_skipped);
        assert_eq!(outcome.evicted, 0);
        assert_eq!(store.count(&PartFilter::default()).await.unwrap(), 20);
    }

    #[tokio::test]
    async fn representative_fetch_evicts_stale_records_of_its_source_only() {
        let store = Arc::new(MemoryStore::new());
        let reconciler = reconciler(store.clone());
        let long_ago = Utc::now() - Duration::days(30);
        reconciler
            .reconcile(SourceId(1), &batch(1, 20), long_ago)
            .await
            .unwrap();
        reconciler
            .reconcile(SourceId(2), &batch(2, 5), long_ago)
            .await
            .unwrap();

        // Only ad-0..ad-9 are still offered
        let outcome = reconciler
            .reconcile(SourceId(1), &batch(1, 10), Utc::now())
            .await
            .unwrap();

        assert!(!outcome.eviction_skipped);
        assert_eq!(outcome.evicted, 10);
        assert_eq!(store.count(&PartFilter::for_source(SourceId(1))).await.unwrap(), 10);
        assert_eq!(store.count(&PartFilter::for_source(SourceId(2))).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn failed_insert_is_skipped() {
        let store = Arc::new(FaultyStore {
            fail_insert_for: Some("ad-1".into()),
            ..FaultyStore::default()
        });
        let reconciler = reconciler(store.clone());

        let outcome = reconciler
            .reconcile(SourceId(1), &batch(1, 3), Utc::now())
            .await
            .unwrap();

        assert_eq!(outcome.inserted.len(), 2);
        assert_eq!(outcome.errors, 1);
    }

    #[tokio::test]
    async fn concurrent_insert_conflict_counts_as_duplicate() {
        let store = Arc::new(FaultyStore {
            hide_existing: true,
            ..FaultyStore::default()
        });
        let reconciler = reconciler(store.clone());
        let input = vec![record(1, "A", "Turbo")];

        reconciler.reconcile(SourceId(1), &input, Utc::now()).await.unwrap();
        let outcome = reconciler.reconcile(SourceId(1), &input, Utc::now()).await.unwrap();

        assert!(outcome.inserted.is_empty());
        assert_eq!(outcome.duplicates, 1);
        assert_eq!(outcome.errors, 0);
    }

    #[tokio::test]
    async fn lookup_failure_aborts_reconciliation() {
        let store = Arc::new(FaultyStore {
            fail_lookup: true,
            ..FaultyStore::default()
        });
        let reconciler = reconciler(store.clone());

        let err = reconciler
            .reconcile(SourceId(1), &batch(1, 3), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Backend(_)));
        assert_eq!(store.inner.count(&PartFilter::default()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn file_store_is_written_once_per_batch() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = Arc::new(LocalStore::open(tmp.path().join("parts.json")).await.unwrap());
        let reconciler = reconciler(store.clone());

        let outcome = reconciler
            .reconcile(SourceId(1), &batch(1, 30), Utc::now())
            .await
            .unwrap();
        assert_eq!(outcome.inserted.len(), 30);
        assert_eq!(store.writes(), 1);
        assert!(!store.is_dirty());

        // Refresh plus eviction of the records no longer offered
        let later = Utc::now() + Duration::hours(1);
        let outcome = reconciler
            .reconcile(SourceId(1), &batch(1, 12), later)
            .await
            .unwrap();
        assert_eq!(outcome.evicted, 18);
        assert_eq!(store.writes(), 3);
    }

    #[test]
    fn gate_respects_floor() {
        let reconciler = reconciler(Arc::new(MemoryStore::new()));
        let now = Utc::now();

        assert_eq!(
            reconciler.eviction_gate(9, now),
            EvictionGate::BelowFloor {
                fetched: 9,
                floor: 10
            }
        );
        assert_eq!(
            reconciler.eviction_gate(10, now),
            EvictionGate::Evict {
                threshold: now - Duration::seconds(300)
            }
        );
    }
}
