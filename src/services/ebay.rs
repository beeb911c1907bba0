// src/services/ebay.rs

//! Marketplace Browse API adapter.
//!
//! Authenticates with OAuth client credentials, caches the application token
//! until shortly before it expires, and pages through item-summary search
//! results by `offset`/`limit`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::{FetchError, FetchResult, Result};
use crate::models::{RawRecord, RecordDraft, SearchQuery, Source, SourceId};
use crate::services::adapter::{CrawlLimits, Page, SourceAdapter};
use crate::services::images::embed_images;
use crate::utils::http::send_text;

const TOKEN_PATH: &str = "identity/v1/oauth2/token";
const SEARCH_PATH: &str = "buy/browse/v1/item_summary/search";
const API_SCOPE: &str = "https://api.ebay.com/oauth/api_scope";
const MARKETPLACE_HEADER: &str = "X-EBAY-C-MARKETPLACE-ID";
const UNKNOWN_CATEGORY: &str = "Unknown Category";

/// Refresh tokens this long before they expire.
const TOKEN_MARGIN: Duration = Duration::from_secs(60);

/// Adapter construction parameters.
#[derive(Debug, Clone)]
pub struct EbaySettings {
    pub client_id: String,
    pub client_secret: String,
    pub marketplace: String,
    pub category_ids: Option<String>,
    pub page_size: usize,
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: Instant,
}

impl CachedToken {
    fn is_fresh(&self, now: Instant) -> bool {
        now + TOKEN_MARGIN < self.expires_at
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    7200
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchResponse {
    /// Kept untyped so one malformed item does not fail the page
    #[serde(default)]
    item_summaries: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ItemSummary {
    item_id: Option<String>,
    title: Option<String>,
    short_description: Option<String>,
    #[serde(default)]
    categories: Vec<Category>,
    image: Option<ImageRef>,
    item_web_url: Option<String>,
    price: Option<Price>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Category {
    category_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImageRef {
    image_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Price {
    value: String,
    currency: String,
}

impl ItemSummary {
    fn into_draft(self) -> RecordDraft {
        let mut description = self.short_description.unwrap_or_default();
        if let Some(price) = self.price {
            description = format!("{description} | Price: {} {}", price.value, price.currency);
        }

        let type_name = self
            .categories
            .into_iter()
            .find_map(|c| c.category_name)
            .unwrap_or_else(|| UNKNOWN_CATEGORY.to_string());

        RecordDraft {
            external_id: self.item_id,
            name: self.title,
            url: self.item_web_url,
            description,
            type_name,
            image_url: self.image.and_then(|i| i.image_url),
        }
    }
}

/// Browse API client for one marketplace.
pub struct EbayAdapter {
    source: Source,
    api_base: Url,
    settings: EbaySettings,
    client: Client,
    limits: CrawlLimits,
    image_concurrency: usize,
    token: Mutex<Option<CachedToken>>,
}

impl EbayAdapter {
    pub fn new(
        source: Source,
        settings: EbaySettings,
        client: Client,
        limits: CrawlLimits,
        image_concurrency: usize,
    ) -> Result<Self> {
        Ok(Self {
            api_base: Url::parse(&source.base_url)?,
            source,
            settings: EbaySettings {
                page_size: settings.page_size.max(1),
                ..settings
            },
            client,
            limits,
            image_concurrency: image_concurrency.max(1),
            token: Mutex::new(None),
        })
    }

    /// Application token, fetched on first use and reused until near expiry.
    async fn access_token(&self, cancel: &CancellationToken) -> FetchResult<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref().filter(|t| t.is_fresh(Instant::now())) {
            return Ok(token.value.clone());
        }

        let url = self.api_base.join(TOKEN_PATH).map_err(FetchError::parse)?;
        let request = self
            .client
            .post(url)
            .basic_auth(&self.settings.client_id, Some(&self.settings.client_secret))
            .form(&[("grant_type", "client_credentials"), ("scope", API_SCOPE)]);
        let body = send_text(request, cancel).await?;
        let response: TokenResponse = serde_json::from_str(&body)?;

        log::debug!(
            "[{}] obtained access token valid for {}s",
            self.source.name,
            response.expires_in
        );
        let token = CachedToken {
            value: response.access_token,
            expires_at: Instant::now() + Duration::from_secs(response.expires_in),
        };
        let value = token.value.clone();
        *cached = Some(token);
        Ok(value)
    }

    /// Item-summary search URL for one page.
    pub fn search_url(&self, query: &SearchQuery) -> FetchResult<Url> {
        let mut url = self.api_base.join(SEARCH_PATH).map_err(FetchError::parse)?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("q", &query.keywords())
                .append_pair("limit", &self.settings.page_size.to_string())
                .append_pair("offset", &query.offset.to_string());
            if let Some(categories) = self.settings.category_ids.as_deref() {
                pairs.append_pair("category_ids", categories);
            }
        }
        Ok(url)
    }

    /// Extract records from a search response body.
    pub fn parse_search(&self, body: &str) -> FetchResult<(Vec<(RawRecord, Option<String>)>, usize)> {
        let response: SearchResponse = serde_json::from_str(body)?;
        let mut items = Vec::with_capacity(response.item_summaries.len());
        let mut skipped = 0;

        for (position, value) in response.item_summaries.into_iter().enumerate() {
            let extracted = serde_json::from_value::<ItemSummary>(value)
                .map_err(|e| e.to_string())
                .and_then(|item| {
                    item.into_draft()
                        .into_record(self.source.id, position)
                        .map_err(|e| e.to_string())
                });

            match extracted {
                Ok(entry) => items.push(entry),
                Err(reason) => {
                    skipped += 1;
                    log::warn!("[{}] skipping item {}: {}", self.source.name, position, reason);
                }
            }
        }

        Ok((items, skipped))
    }
}

#[async_trait]
impl SourceAdapter for EbayAdapter {
    fn name(&self) -> &str {
        &self.source.name
    }

    fn source_id(&self) -> SourceId {
        self.source.id
    }

    fn page_size(&self) -> usize {
        self.settings.page_size
    }

    fn limits(&self) -> CrawlLimits {
        self.limits
    }

    async fn fetch(&self, query: &SearchQuery, cancel: &CancellationToken) -> FetchResult<Page> {
        let token = self.access_token(cancel).await?;
        let url = self.search_url(query)?;
        log::debug!("[{}] GET {}", self.source.name, url);

        let request = self
            .client
            .get(url)
            .bearer_auth(&token)
            .header(MARKETPLACE_HEADER, &self.settings.marketplace);
        let body = send_text(request, cancel).await?;

        let (items, skipped) = self.parse_search(&body)?;
        let records = embed_images(&self.client, items, self.image_concurrency, cancel).await?;
        Ok(Page { records, skipped })
    }
}
