// src/lib.rs

//! Parts listing ingestion library.
//!
//! Fetches listings from scraped and API sources, reconciles them against a
//! persistent store and keeps the store's freshness accurate.

pub mod config;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod storage;
pub mod utils;

use std::path::Path;
use std::sync::Arc;

use crate::error::Result;
use crate::models::Config;
use crate::pipeline::{IngestionCoordinator, Orchestrator, Reconciler};
use crate::services::AdapterRegistry;
use crate::storage::{LocalStore, PartStore};

/// Open the configured store and wire the pipeline around it.
pub async fn build_orchestrator(config: &Config, base_dir: &Path) -> Result<Orchestrator> {
    let store: Arc<dyn PartStore> =
        Arc::new(LocalStore::open(crate::config::store_path(config, base_dir)).await?);
    let registry = AdapterRegistry::from_config(config)?;
    let reconciler = Reconciler::new(store, config.reconcile.clone());
    let coordinator = IngestionCoordinator::new(Arc::new(registry), reconciler, config.query.clone());
    Ok(Orchestrator::new(Arc::new(coordinator), config.scheduler.deadline()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::PartFilter;

    #[tokio::test]
    async fn wires_default_config() {
        let tmp = tempfile::TempDir::new().unwrap();
        let orchestrator = build_orchestrator(&Config::default(), tmp.path()).await.unwrap();

        let coordinator = orchestrator.coordinator();
        assert_eq!(coordinator.sources().len(), 1);
        assert_eq!(coordinator.count(&PartFilter::default()).await.unwrap(), 0);
    }
}
