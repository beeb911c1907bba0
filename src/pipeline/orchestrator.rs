//! Concurrent fan-out of ingestion cycles across all sources.
//!
//! Each source runs in its own task under a shared deadline. Results come
//! back over a channel sized to the number of sources, so a finished cycle
//! never waits on a slow one. When the deadline passes, outstanding cycles
//! are cancelled and given a short grace period to report.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::time::{Instant, timeout_at};
use tokio_util::sync::CancellationToken;

use crate::error::AppError;
use crate::models::{IngestionRun, QueryParams, SourceId, TriggerSummary};
use crate::pipeline::ingest::IngestionCoordinator;

/// How long cancelled cycles get to report after the deadline.
const CANCEL_GRACE: Duration = Duration::from_secs(5);

/// Runs one trigger across every registered source.
pub struct Orchestrator {
    coordinator: Arc<IngestionCoordinator>,
    deadline: Duration,
}

impl Orchestrator {
    pub fn new(coordinator: Arc<IngestionCoordinator>, deadline: Duration) -> Self {
        Self {
            coordinator,
            deadline,
        }
    }

    pub fn coordinator(&self) -> &Arc<IngestionCoordinator> {
        &self.coordinator
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Ingest all sources concurrently and collect a per-source summary.
    ///
    /// Failed sources are reported, not retried.
    pub async fn trigger(&self, params: &QueryParams) -> TriggerSummary {
        let started = Instant::now();
        let deadline = started + self.deadline;
        let ids = self.coordinator.source_ids();

        if ids.is_empty() {
            log::warn!("No sources registered, nothing to ingest");
            return TriggerSummary::default();
        }

        log::info!("Triggering ingestion for {} sources", ids.len());

        let cancel = CancellationToken::new();
        let (tx, mut rx) = mpsc::channel(ids.len());

        for &source_id in &ids {
            let tx = tx.clone();
            let coordinator = Arc::clone(&self.coordinator);
            let cancel = cancel.child_token();
            let params = params.clone();

            tokio::spawn(async move {
                let cycle = coordinator.run_ingestion(source_id, &params, &cancel);
                let run = match AssertUnwindSafe(cycle).catch_unwind().await {
                    Ok(run) => run,
                    Err(panic) => {
                        let message = panic_message(panic.as_ref());
                        log::error!("[source {}] ingestion panicked: {}", source_id, message);
                        IngestionRun::failed(source_id, AppError::Panicked { source_id, message })
                    }
                };
                // Capacity equals the number of sources; send never waits
                let _ = tx.send(run).await;
            });
        }
        drop(tx);

        let mut runs = Vec::with_capacity(ids.len());
        let mut collect_until = deadline;
        let mut cancelled = false;

        loop {
            match timeout_at(collect_until, rx.recv()).await {
                Ok(Some(run)) => runs.push(run),
                Ok(None) => break,
                Err(_) if !cancelled => {
                    log::warn!(
                        "Trigger deadline of {:?} reached with {} of {} sources pending, cancelling",
                        self.deadline,
                        ids.len() - runs.len(),
                        ids.len()
                    );
                    cancel.cancel();
                    cancelled = true;
                    collect_until = Instant::now() + CANCEL_GRACE;
                }
                Err(_) => break,
            }
        }

        for &source_id in &ids {
            if !runs.iter().any(|r| r.source_id == source_id) {
                runs.push(IngestionRun::failed(
                    source_id,
                    AppError::DeadlineExceeded(source_id),
                ));
            }
        }
        runs.sort_by_key(|r| r.source_id);

        let summary = TriggerSummary {
            runs,
            duration: started.elapsed(),
        };
        log_summary(&summary);
        summary
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

fn log_summary(summary: &TriggerSummary) {
    log::info!("----------------------------------------");
    log::info!(
        "Trigger complete: {} succeeded, {} failed, {} new records in {:.2?}",
        summary.succeeded(),
        summary.failed(),
        summary.total_new(),
        summary.duration
    );
    for (source_id, reason) in summary.failures() {
        log::warn!("  source {}: {}", source_id, reason);
    }
    log::info!("----------------------------------------");
}
