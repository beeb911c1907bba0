//! Ingestion coordinator.
//!
//! Drives one fetch-then-reconcile cycle for a source and exposes read-only
//! passthroughs over the store. At most one cycle per source runs at a time:
//! a second request for a busy source fails fast with
//! [`AppError::AlreadyRunning`] instead of waiting.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{AppError, Result, StoreError};
use crate::models::{IngestionRun, QueryDefaults, QueryParams, Source, SourceId, StoredRecord};
use crate::pipeline::reconcile::Reconciler;
use crate::services::{AdapterRegistry, CrawlOutcome};
use crate::storage::PartFilter;
use crate::utils::{Clock, SystemClock};

/// Marks a source busy until dropped.
struct InFlight<'a> {
    set: &'a Mutex<HashSet<SourceId>>,
    source_id: SourceId,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.source_id);
    }
}

/// Runs ingestion cycles for registered sources.
pub struct IngestionCoordinator {
    registry: Arc<AdapterRegistry>,
    reconciler: Reconciler,
    defaults: QueryDefaults,
    clock: Arc<dyn Clock>,
    in_flight: Mutex<HashSet<SourceId>>,
}

impl IngestionCoordinator {
    pub fn new(registry: Arc<AdapterRegistry>, reconciler: Reconciler, defaults: QueryDefaults) -> Self {
        Self {
            registry,
            reconciler,
            defaults,
            clock: Arc::new(SystemClock),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Use `clock` for last-seen timestamps.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn registry(&self) -> &AdapterRegistry {
        &self.registry
    }

    /// Registered source ids, ascending.
    pub fn source_ids(&self) -> Vec<SourceId> {
        self.registry.ids()
    }

    /// Registered sources, ordered by id.
    pub fn sources(&self) -> Vec<Source> {
        self.registry.sources()
    }

    fn try_acquire(&self, source_id: SourceId) -> Option<InFlight<'_>> {
        let inserted = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(source_id);

        inserted.then(|| InFlight {
            set: &self.in_flight,
            source_id,
        })
    }

    /// Whether a cycle for the source is currently running.
    pub fn is_running(&self, source_id: SourceId) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&source_id)
    }

    /// Run one ingestion cycle.
    ///
    /// Never fails as a call: every failure is reported in the returned run.
    /// A fetch failure skips reconciliation entirely.
    pub async fn run_ingestion(
        &self,
        source_id: SourceId,
        params: &QueryParams,
        cancel: &CancellationToken,
    ) -> IngestionRun {
        let started = Instant::now();

        let Some(adapter) = self.registry.get(source_id) else {
            let run = IngestionRun::failed(source_id, AppError::UnknownSource(source_id));
            log_run(&run);
            return run;
        };

        let Some(_guard) = self.try_acquire(source_id) else {
            let mut run = IngestionRun::new(source_id, adapter.name());
            run.error = Some(AppError::AlreadyRunning(source_id));
            log_run(&run);
            return run;
        };

        let query = params.resolve(&self.defaults);
        let mut run = IngestionRun::new(source_id, adapter.name());
        let seen_at = self.clock.now();
        log::info!(
            "[{}] ingesting '{}' years {}-{} (limit {})",
            adapter.name(),
            query.keywords(),
            query.year_from,
            query.year_to,
            query.limit
        );

        match adapter.crawl(&query, cancel).await {
            Ok(outcome) => {
                run.fetched = outcome.records.len();
                run.skipped = outcome.skipped;
                run.pages = outcome.pages;

                match self
                    .reconciler
                    .reconcile(source_id, &outcome.records, seen_at)
                    .await
                {
                    Ok(reconciled) => {
                        run.inserted = reconciled.inserted;
                        run.duplicates = reconciled.duplicates;
                        run.errors = reconciled.errors;
                        run.evicted = reconciled.evicted;
                        run.eviction_skipped = reconciled.eviction_skipped;
                    }
                    Err(e) => run.error = Some(e.into()),
                }
            }
            Err(e) => run.error = Some(e.into()),
        }

        run.duration = started.elapsed();
        log_run(&run);
        run
    }

    /// Crawl a source without touching the store.
    pub async fn preview(
        &self,
        source_id: SourceId,
        params: &QueryParams,
        cancel: &CancellationToken,
    ) -> Result<CrawlOutcome> {
        let adapter = self
            .registry
            .get(source_id)
            .ok_or(AppError::UnknownSource(source_id))?;
        let query = params.resolve(&self.defaults);
        Ok(adapter.crawl(&query, cancel).await?)
    }

    /// Delete every stored record of a source.
    ///
    /// Refused while a cycle for the source is running.
    pub async fn purge_source(&self, source_id: SourceId) -> Result<usize> {
        let _guard = self
            .try_acquire(source_id)
            .ok_or(AppError::AlreadyRunning(source_id))?;
        let store = self.reconciler.store();
        let deleted = store.delete_source(source_id).await?;
        store.flush().await?;
        log::info!("[{}] purged {} records", source_id, deleted);
        Ok(deleted)
    }

    pub async fn list(&self, filter: &PartFilter) -> Result<Vec<StoredRecord>> {
        Ok(self.reconciler.store().list(filter).await?)
    }

    pub async fn count(&self, filter: &PartFilter) -> Result<usize> {
        Ok(self.reconciler.store().count(filter).await?)
    }

    pub async fn get(&self, id: i64) -> Result<StoredRecord> {
        self.reconciler
            .store()
            .get(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(id).into())
    }
}

fn log_run(run: &IngestionRun) {
    match &run.error {
        None => log::info!(
            "[{}] {} fetched, {} new, {} duplicate, {} errors, {} skipped, {} evicted{} in {:.2?}",
            run.source_name,
            run.fetched,
            run.new_count(),
            run.duplicates,
            run.errors,
            run.skipped,
            run.evicted,
            if run.eviction_skipped { " (eviction skipped)" } else { "" },
            run.duration
        ),
        Some(e) => log::error!(
            "[source {}] ingestion failed after {} fetched, {} new: {}",
            run.source_id,
            run.fetched,
            run.new_count(),
            e
        ),
    }
}
