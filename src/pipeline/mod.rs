//! Ingestion pipeline.
//!
//! - `Reconciler`: merge fetched records into the store, evict stale ones
//! - `IngestionCoordinator`: one fetch-then-reconcile cycle per source
//! - `Orchestrator`: concurrent fan-out across all sources under a deadline
//! - `Scheduler`: cron-driven triggers with a stoppable lifecycle

pub mod ingest;
pub mod orchestrator;
pub mod reconcile;
pub mod scheduler;

pub use ingest::IngestionCoordinator;
pub use orchestrator::Orchestrator;
pub use reconcile::{EvictionGate, ReconcileOutcome, Reconciler};
pub use scheduler::{Scheduler, SchedulerState, parse_schedules};
