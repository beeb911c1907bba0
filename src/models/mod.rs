// src/models/mod.rs

//! Domain models for the ingestion pipeline.
//!
//! This module contains all data structures used throughout the application,
//! organized by their primary purpose.

mod config;
mod part;
mod query;
mod run;
mod selectors;

// Re-export all public types
pub use config::{
    Config, CrawlConfig, HttpConfig, QueryDefaults, ReconcileConfig, SchedulerConfig,
    SourceConfig, SourceKind,
};
pub use part::{RawRecord, RecordDraft, Source, SourceId, StoredRecord};
pub use query::{QueryParams, SearchQuery};
pub use run::{IngestionRun, TriggerSummary};
pub use selectors::ListingSelectors;
