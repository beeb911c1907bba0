// src/services/registry.rs

//! Source adapter registry.
//!
//! Resolved once at startup from configuration and immutable afterwards.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::Result;
use crate::models::{Config, Source, SourceId, SourceKind};
use crate::services::adapter::{CrawlLimits, SourceAdapter};
use crate::services::ebay::{EbayAdapter, EbaySettings};
use crate::services::kleinanzeigen::KleinanzeigenAdapter;
use crate::utils::http::create_async_client;

struct Entry {
    source: Source,
    adapter: Arc<dyn SourceAdapter>,
}

/// Adapters keyed by source identifier.
#[derive(Default)]
pub struct AdapterRegistry {
    entries: HashMap<SourceId, Entry>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build one adapter per configured source, sharing a single HTTP client.
    pub fn from_config(config: &Config) -> Result<Self> {
        let client = create_async_client(&config.http)?;
        let limits = CrawlLimits::new(&config.crawl, &config.http);
        let concurrency = config.http.max_concurrent;
        let mut registry = Self::new();

        for source_config in &config.sources {
            let source = source_config.source();
            let adapter: Arc<dyn SourceAdapter> = match &source_config.kind {
                SourceKind::Kleinanzeigen {
                    category_id,
                    location,
                    selectors,
                    ..
                } => Arc::new(KleinanzeigenAdapter::new(
                    source.clone(),
                    category_id.as_str(),
                    location.as_str(),
                    selectors,
                    client.clone(),
                    limits,
                    concurrency,
                )?),
                SourceKind::Ebay {
                    client_id,
                    client_secret,
                    marketplace,
                    category_ids,
                    page_size,
                    ..
                } => Arc::new(EbayAdapter::new(
                    source.clone(),
                    EbaySettings {
                        client_id: client_id.clone(),
                        client_secret: client_secret.clone(),
                        marketplace: marketplace.clone(),
                        category_ids: category_ids.clone(),
                        page_size: *page_size,
                    },
                    client.clone(),
                    limits,
                    concurrency,
                )?),
            };
            registry.register(source, adapter);
        }

        Ok(registry)
    }

    /// Register an adapter, replacing any previous one for the same id.
    pub fn register(&mut self, source: Source, adapter: Arc<dyn SourceAdapter>) {
        log::info!("Registered adapter '{}' for source {}", source.name, source.id);
        if let Some(previous) = self.entries.insert(source.id, Entry { source, adapter }) {
            log::warn!(
                "Replaced adapter '{}' for source {}",
                previous.source.name,
                previous.source.id
            );
        }
    }

    pub fn get(&self, id: SourceId) -> Option<Arc<dyn SourceAdapter>> {
        self.entries.get(&id).map(|e| Arc::clone(&e.adapter))
    }

    pub fn source(&self, id: SourceId) -> Option<&Source> {
        self.entries.get(&id).map(|e| &e.source)
    }

    /// Registered source ids, ascending.
    pub fn ids(&self) -> Vec<SourceId> {
        let mut ids: Vec<SourceId> = self.entries.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Registered sources, ordered by id.
    pub fn sources(&self) -> Vec<Source> {
        let mut sources: Vec<Source> = self.entries.values().map(|e| e.source.clone()).collect();
        sources.sort_by_key(|s| s.id);
        sources
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
