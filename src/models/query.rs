//! Search request structures.

use serde::{Deserialize, Serialize};

use crate::models::QueryDefaults;

/// Fetch request as supplied by a caller; any field may be unset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryParams {
    pub vehicle_type: Option<String>,
    pub make: Option<String>,
    pub base_model: Option<String>,
    pub model: Option<String>,
    pub year_from: Option<u16>,
    pub year_to: Option<u16>,
    pub offset: Option<usize>,
    pub limit: Option<usize>,
}

impl QueryParams {
    /// Fill unset fields from the configured defaults.
    ///
    /// Zero is treated as unset for years and the limit, so a caller that
    /// serializes "no value" as `0` gets the defaults too.
    pub fn resolve(&self, defaults: &QueryDefaults) -> SearchQuery {
        let non_zero_year = |v: Option<u16>| v.filter(|y| *y > 0);
        let text = |v: &Option<String>| v.as_deref().map(str::trim).unwrap_or("").to_string();

        SearchQuery {
            vehicle_type: text(&self.vehicle_type),
            make: text(&self.make),
            base_model: text(&self.base_model),
            model: text(&self.model),
            year_from: non_zero_year(self.year_from).unwrap_or(defaults.year_from),
            year_to: non_zero_year(self.year_to).unwrap_or(defaults.year_to),
            offset: self.offset.unwrap_or(defaults.offset),
            limit: self.limit.filter(|l| *l > 0).unwrap_or(defaults.limit),
        }
    }
}

/// Fully resolved fetch request handed to adapters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub vehicle_type: String,
    pub make: String,
    pub base_model: String,
    pub model: String,
    pub year_from: u16,
    pub year_to: u16,
    /// Pagination offset in items
    pub offset: usize,
    /// Result-count cap for a whole crawl
    pub limit: usize,
}

impl SearchQuery {
    /// Copy of this query positioned at another offset.
    pub fn at_offset(&self, offset: usize) -> Self {
        Self {
            offset,
            ..self.clone()
        }
    }

    /// Free-text keywords built from make, base model and model.
    pub fn keywords(&self) -> String {
        [&self.make, &self.base_model, &self.model]
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}
