//! Application configuration structures.

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::{ListingSelectors, QueryParams, Source, SourceId};

/// Root application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// HTTP client behavior shared by all adapters
    #[serde(default)]
    pub http: HttpConfig,

    /// Pagination limits
    #[serde(default)]
    pub crawl: CrawlConfig,

    /// Defaults injected into unset query fields
    #[serde(default)]
    pub query: QueryDefaults,

    /// Freshness reconciliation thresholds
    #[serde(default)]
    pub reconcile: ReconcileConfig,

    /// Recurring trigger settings
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Path of the record store file
    #[serde(default = "defaults::store_path")]
    pub store_path: String,

    /// Upstream sources, one adapter each
    #[serde(default = "defaults::default_sources")]
    pub sources: Vec<SourceConfig>,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration or return default if loading fails.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(&path).unwrap_or_else(|e| {
            log::warn!(
                "Config load failed from {:?}: {}. Using defaults.",
                path.as_ref(),
                e
            );
            Self::default()
        })
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.http.user_agent.trim().is_empty() {
            return Err(AppError::validation("http.user_agent is empty"));
        }
        if self.http.timeout_secs == 0 {
            return Err(AppError::validation("http.timeout_secs must be > 0"));
        }
        if self.http.max_concurrent == 0 {
            return Err(AppError::validation("http.max_concurrent must be > 0"));
        }
        if self.crawl.max_pages == 0 {
            return Err(AppError::validation("crawl.max_pages must be > 0"));
        }
        if self.query.limit == 0 {
            return Err(AppError::validation("query.limit must be > 0"));
        }
        if self.query.year_from > self.query.year_to {
            return Err(AppError::validation(
                "query.year_from must not be after query.year_to",
            ));
        }
        if self.scheduler.deadline_secs == 0 {
            return Err(AppError::validation("scheduler.deadline_secs must be > 0"));
        }
        for expression in &self.scheduler.cron {
            cron::Schedule::from_str(expression).map_err(|e| AppError::cron(expression, e))?;
        }

        let mut seen = HashSet::new();
        for source in &self.sources {
            if !seen.insert(source.id) {
                return Err(AppError::validation(format!(
                    "duplicate source id {}",
                    source.id
                )));
            }
            if source.name.trim().is_empty() {
                return Err(AppError::validation(format!(
                    "source {} has an empty name",
                    source.id
                )));
            }
            source.kind.validate(source.id)?;
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http: HttpConfig::default(),
            crawl: CrawlConfig::default(),
            query: QueryDefaults::default(),
            reconcile: ReconcileConfig::default(),
            scheduler: SchedulerConfig::default(),
            store_path: defaults::store_path(),
            sources: defaults::default_sources(),
        }
    }
}

/// HTTP client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,

    /// Delay between page requests in milliseconds
    #[serde(default)]
    pub request_delay_ms: u64,

    /// Maximum concurrent image requests per page
    #[serde(default = "defaults::max_concurrent")]
    pub max_concurrent: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: defaults::user_agent(),
            timeout_secs: defaults::timeout(),
            request_delay_ms: 0,
            max_concurrent: defaults::max_concurrent(),
        }
    }
}

/// Pagination limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlConfig {
    /// Hard ceiling on pages fetched per crawl
    #[serde(default = "defaults::max_pages")]
    pub max_pages: usize,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            max_pages: defaults::max_pages(),
        }
    }
}

/// Values injected by the coordinator for unset query fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryDefaults {
    #[serde(default = "defaults::year_from")]
    pub year_from: u16,

    #[serde(default = "defaults::year_to")]
    pub year_to: u16,

    #[serde(default)]
    pub offset: usize,

    #[serde(default = "defaults::limit")]
    pub limit: usize,
}

impl Default for QueryDefaults {
    fn default() -> Self {
        Self {
            year_from: defaults::year_from(),
            year_to: defaults::year_to(),
            offset: 0,
            limit: defaults::limit(),
        }
    }
}

/// Staleness eviction settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileConfig {
    /// Records not seen for this long are evicted
    #[serde(default = "defaults::stale_after")]
    pub stale_after_secs: u64,

    /// Minimum fetched-record count before eviction is trusted to run
    #[serde(default = "defaults::min_representative")]
    pub min_representative: usize,
}

impl ReconcileConfig {
    pub fn stale_after(&self) -> chrono::Duration {
        // chrono rejects second counts beyond i64::MAX / 1000
        let secs = self.stale_after_secs.min((i64::MAX / 1000) as u64);
        chrono::Duration::seconds(secs as i64)
    }
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            stale_after_secs: defaults::stale_after(),
            min_representative: defaults::min_representative(),
        }
    }
}

/// Recurring trigger settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Whether `serve` starts the recurring timer
    #[serde(default = "defaults::enabled")]
    pub enabled: bool,

    /// Cron expressions with a seconds field (e.g., "0 0 12 * * *")
    #[serde(default = "defaults::cron")]
    pub cron: Vec<String>,

    /// Shared deadline for all cycles of one trigger, in seconds
    #[serde(default = "defaults::deadline")]
    pub deadline_secs: u64,

    /// Query used for scheduled triggers
    #[serde(default = "defaults::scheduled_query")]
    pub query: QueryParams,
}

impl SchedulerConfig {
    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_secs)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: defaults::enabled(),
            cron: defaults::cron(),
            deadline_secs: defaults::deadline(),
            query: defaults::scheduled_query(),
        }
    }
}

/// One configured upstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub id: SourceId,

    pub name: String,

    #[serde(flatten)]
    pub kind: SourceKind,
}

impl SourceConfig {
    pub fn source(&self) -> Source {
        Source {
            id: self.id,
            name: self.name.clone(),
            base_url: self.kind.base_url().to_string(),
        }
    }
}

/// Adapter implementation and its construction parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceKind {
    /// Scraped classifieds search pages
    Kleinanzeigen {
        #[serde(default = "defaults::kleinanzeigen_url")]
        base_url: String,

        /// Classifieds category (223 = auto parts)
        #[serde(default = "defaults::kleinanzeigen_category")]
        category_id: String,

        #[serde(default = "defaults::kleinanzeigen_location")]
        location: String,

        #[serde(default)]
        selectors: ListingSelectors,
    },

    /// Paginated Browse API with OAuth client credentials
    Ebay {
        /// API base; derived from `sandbox` when empty
        #[serde(default)]
        base_url: String,

        #[serde(default)]
        client_id: String,

        #[serde(default)]
        client_secret: String,

        #[serde(default)]
        sandbox: bool,

        #[serde(default = "defaults::ebay_marketplace")]
        marketplace: String,

        /// Optional category filter (comma separated ids)
        #[serde(default)]
        category_ids: Option<String>,

        #[serde(default = "defaults::ebay_page_size")]
        page_size: usize,
    },
}

impl SourceKind {
    pub fn base_url(&self) -> &str {
        match self {
            SourceKind::Kleinanzeigen { base_url, .. } => base_url,
            SourceKind::Ebay {
                base_url, sandbox, ..
            } => {
                if !base_url.is_empty() {
                    base_url
                } else if *sandbox {
                    "https://api.sandbox.ebay.com"
                } else {
                    "https://api.ebay.com"
                }
            }
        }
    }

    fn validate(&self, id: SourceId) -> Result<()> {
        match self {
            SourceKind::Kleinanzeigen { base_url, .. } => {
                url::Url::parse(base_url)?;
            }
            SourceKind::Ebay {
                client_id,
                client_secret,
                page_size,
                ..
            } => {
                if client_id.is_empty() || client_secret.is_empty() {
                    return Err(AppError::validation(format!(
                        "source {id}: eBay client_id/client_secret are required"
                    )));
                }
                if *page_size == 0 || *page_size > 200 {
                    return Err(AppError::validation(format!(
                        "source {id}: eBay page_size must be within 1..=200"
                    )));
                }
                url::Url::parse(self.base_url())?;
            }
        }
        Ok(())
    }
}

mod defaults {
    use super::{QueryParams, SourceConfig, SourceKind};
    use crate::models::{ListingSelectors, SourceId};

    // HTTP defaults
    pub fn user_agent() -> String {
        "Mozilla/5.0 (X11; Linux x86_64; rv:143.0) Gecko/20100101 Firefox/143.0".into()
    }
    pub fn timeout() -> u64 {
        30
    }
    pub fn max_concurrent() -> usize {
        5
    }

    pub fn max_pages() -> usize {
        40
    }

    // Query defaults
    pub fn year_from() -> u16 {
        1960
    }
    pub fn year_to() -> u16 {
        2025
    }
    pub fn limit() -> usize {
        30
    }

    // Reconcile defaults
    pub fn stale_after() -> u64 {
        5 * 60
    }
    pub fn min_representative() -> usize {
        10
    }

    // Scheduler defaults
    pub fn enabled() -> bool {
        true
    }
    pub fn cron() -> Vec<String> {
        vec!["0 0 0 * * *".into(), "0 0 12 * * *".into()]
    }
    pub fn deadline() -> u64 {
        30 * 60
    }
    pub fn scheduled_query() -> QueryParams {
        QueryParams {
            vehicle_type: Some("P".into()),
            make: Some("Mitsubishi".into()),
            base_model: Some("Eclipse".into()),
            model: None,
            year_from: Some(1989),
            year_to: Some(2012),
            offset: Some(0),
            limit: Some(10_000),
        }
    }

    pub fn store_path() -> String {
        "parts.json".into()
    }

    // Source defaults
    pub fn kleinanzeigen_url() -> String {
        "https://www.kleinanzeigen.de".into()
    }
    pub fn kleinanzeigen_category() -> String {
        "223".into()
    }
    pub fn kleinanzeigen_location() -> String {
        "Deutschland".into()
    }
    pub fn ebay_marketplace() -> String {
        "EBAY_DE".into()
    }
    pub fn ebay_page_size() -> usize {
        50
    }

    pub fn default_sources() -> Vec<SourceConfig> {
        vec![SourceConfig {
            id: SourceId(1),
            name: "Kleinanzeigen".into(),
            kind: SourceKind::Kleinanzeigen {
                base_url: kleinanzeigen_url(),
                category_id: kleinanzeigen_category(),
                location: kleinanzeigen_location(),
                selectors: ListingSelectors::default(),
            },
        }]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_default_config_ok() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn validate_rejects_empty_user_agent() {
        let mut config = Config::default();
        config.http.user_agent = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_concurrency() {
        let mut config = Config::default();
        config.http.max_concurrent = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_bad_cron() {
        let mut config = Config::default();
        config.scheduler.cron = vec!["every noon".into()];
        assert!(matches!(config.validate(), Err(AppError::Cron { .. })));
    }

    #[test]
    fn validate_rejects_duplicate_source_ids() {
        let mut config = Config::default();
        let dup = config.sources[0].clone();
        config.sources.push(dup);
        assert!(config.validate().is_err());
    }

    #[test]
    fn parses_tagged_sources() {
        let toml = r#"
            [reconcile]
            stale_after_secs = 86400
            min_representative = 25

            [[sources]]
            id = 2
            name = "Kleinanzeigen"
            kind = "kleinanzeigen"

            [[sources]]
            id = 3
            name = "Ebay"
            kind = "ebay"
            client_id = "id"
            client_secret = "secret"
            sandbox = true
        "#;
        let config: Config = toml::from_str(toml).unwrap();

        assert_eq!(config.reconcile.min_representative, 25);
        assert_eq!(config.reconcile.stale_after(), chrono::Duration::days(1));
        assert_eq!(config.sources.len(), 2);
        assert_eq!(config.sources[0].id, SourceId(2));
        assert_eq!(
            config.sources[0].source().base_url,
            "https://www.kleinanzeigen.de"
        );
        assert_eq!(
            config.sources[1].source().base_url,
            "https://api.sandbox.ebay.com"
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn ebay_without_credentials_is_invalid() {
        let mut config = Config::default();
        config.sources.push(SourceConfig {
            id: SourceId(9),
            name: "Ebay".into(),
            kind: SourceKind::Ebay {
                base_url: String::new(),
                client_id: String::new(),
                client_secret: String::new(),
                sandbox: false,
                marketplace: "EBAY_DE".into(),
                category_ids: None,
                page_size: 50,
            },
        });
        assert!(config.validate().is_err());
    }
}
