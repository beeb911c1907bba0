//! Storage abstractions for part persistence.
//!
//! The pipeline consumes the store through the narrow [`PartStore`]
//! interface. Every mutation is scoped to a single source's record set, so
//! concurrent cycles for different sources never touch the same rows.
//!
//! Backends:
//! - [`MemoryStore`]: in-process table, used by tests and dry runs
//! - [`LocalStore`]: the same table persisted to a JSON file

pub mod local;
pub mod memory;
mod table;

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreResult;
use crate::models::{RawRecord, SourceId, StoredRecord};

// Re-export for convenience
pub use local::LocalStore;
pub use memory::MemoryStore;

/// Listing filter for read queries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartFilter {
    pub source_id: Option<SourceId>,

    /// Exact type label
    pub type_name: Option<String>,

    /// Only records created after this instant
    pub newer_than: Option<DateTime<Utc>>,

    /// Case-insensitive substring over name, description and type label
    pub text: Option<String>,

    pub offset: usize,

    /// Page size; zero selects [`PartFilter::DEFAULT_LIMIT`]
    pub limit: usize,
}

impl PartFilter {
    pub const DEFAULT_LIMIT: usize = 50;
    pub const MAX_LIMIT: usize = 500;

    /// All records of one source.
    pub fn for_source(source_id: SourceId) -> Self {
        Self {
            source_id: Some(source_id),
            ..Self::default()
        }
    }

    /// Effective page size.
    pub fn page_limit(&self) -> usize {
        match self.limit {
            0 => Self::DEFAULT_LIMIT,
            n => n.min(Self::MAX_LIMIT),
        }
    }

    /// Whether a record passes every set criterion (pagination aside).
    pub fn matches(&self, record: &StoredRecord) -> bool {
        if self.source_id.is_some_and(|id| id != record.source_id) {
            return false;
        }
        if let Some(type_name) = &self.type_name {
            if &record.type_name != type_name {
                return false;
            }
        }
        if self.newer_than.is_some_and(|t| record.created_at <= t) {
            return false;
        }
        match self.text.as_deref().map(str::trim) {
            Some(text) if !text.is_empty() => record.matches_text(text),
            _ => true,
        }
    }
}

/// Trait for part storage backends.
#[async_trait]
pub trait PartStore: Send + Sync {
    /// Which of `external_ids` already exist for the source, in one lookup.
    async fn existing_ids(
        &self,
        source_id: SourceId,
        external_ids: &[String],
    ) -> StoreResult<HashSet<String>>;

    /// Refresh last-seen for the given records in one batched update.
    ///
    /// Timestamps never move backwards. Returns the number of records touched.
    async fn touch_last_seen(
        &self,
        source_id: SourceId,
        external_ids: &[String],
        seen_at: DateTime<Utc>,
    ) -> StoreResult<usize>;

    /// Insert a first sighting.
    ///
    /// Fails with [`StoreError::Conflict`](crate::error::StoreError::Conflict)
    /// when the (source, external id) pair already exists.
    async fn insert(&self, record: &RawRecord, seen_at: DateTime<Utc>)
    -> StoreResult<StoredRecord>;

    /// Delete records of the source last seen before `older_than`.
    async fn delete_stale(
        &self,
        source_id: SourceId,
        older_than: DateTime<Utc>,
    ) -> StoreResult<usize>;

    /// Delete every record of the source.
    async fn delete_source(&self, source_id: SourceId) -> StoreResult<usize>;

    /// Filtered page of records, newest first.
    async fn list(&self, filter: &PartFilter) -> StoreResult<Vec<StoredRecord>>;

    /// Number of records matching the filter, ignoring pagination.
    async fn count(&self, filter: &PartFilter) -> StoreResult<usize>;

    /// Lookup by surrogate key.
    async fn get(&self, id: i64) -> StoreResult<Option<StoredRecord>>;

    /// Persist buffered mutations.
    ///
    /// Backends that buffer writes make their changes durable here; the
    /// default is a no-op for backends with nothing to persist.
    async fn flush(&self) -> StoreResult<()> {
        Ok(())
    }
}
