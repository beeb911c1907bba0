// src/services/kleinanzeigen.rs

//! Classifieds search-page scraper.
//!
//! Fetches one results page per request, extracts listings with the
//! configured CSS selectors and embeds their thumbnails.

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE};
use scraper::{ElementRef, Html, Selector};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::{AppError, FetchError, FetchResult, Result};
use crate::models::{ListingSelectors, RawRecord, RecordDraft, SearchQuery, Source, SourceId};
use crate::services::adapter::{CrawlLimits, Page, SourceAdapter};
use crate::services::images::embed_images;
use crate::utils::http::send_text;
use crate::utils::{extract_ad_id, resolve_url};

/// Listings per results page.
pub const PAGE_SIZE: usize = 25;

const UNKNOWN_LOCATION: &str = "Unknown Location";

/// Warn about this many dropped items per page, then log at debug.
const WARN_SKIPS: usize = 3;

/// Selectors parsed once at construction.
struct CompiledSelectors {
    item: Selector,
    title: Selector,
    description: Selector,
    price: Option<Selector>,
    location: Option<Selector>,
    image: Option<Selector>,
    id_attr: String,
    link_attr: String,
}

impl CompiledSelectors {
    fn compile(selectors: &ListingSelectors) -> Result<Self> {
        // An empty optional selector disables that field
        let optional = |s: &Option<String>| {
            s.as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(parse_selector)
                .transpose()
        };

        Ok(Self {
            item: parse_selector(&selectors.item_selector)?,
            title: parse_selector(&selectors.title_selector)?,
            description: parse_selector(&selectors.description_selector)?,
            price: optional(&selectors.price_selector)?,
            location: optional(&selectors.location_selector)?,
            image: optional(&selectors.image_selector)?,
            id_attr: selectors.id_attr.clone(),
            link_attr: selectors.link_attr.clone(),
        })
    }
}

fn parse_selector(s: &str) -> Result<Selector> {
    Selector::parse(s).map_err(|e| AppError::selector(s, format!("{e:?}")))
}

/// Whitespace-collapsed text of the first match of `selector` under `element`.
fn select_text(element: &ElementRef<'_>, selector: &Selector) -> Option<String> {
    element
        .select(selector)
        .next()
        .map(|el| el.text().flat_map(str::split_whitespace).collect::<Vec<_>>().join(" "))
        .filter(|text| !text.is_empty())
}

/// Listings extracted from one page, with their image locations.
#[derive(Debug, Default)]
pub struct Extracted {
    pub items: Vec<(RawRecord, Option<String>)>,
    pub skipped: usize,
}

/// Scraper for one classifieds site.
pub struct KleinanzeigenAdapter {
    source: Source,
    base_url: Url,
    category_id: String,
    location: String,
    selectors: CompiledSelectors,
    client: Client,
    limits: CrawlLimits,
    image_concurrency: usize,
}

impl KleinanzeigenAdapter {
    /// Create the adapter, failing on an invalid base URL or selector.
    pub fn new(
        source: Source,
        category_id: impl Into<String>,
        location: impl Into<String>,
        selectors: &ListingSelectors,
        client: Client,
        limits: CrawlLimits,
        image_concurrency: usize,
    ) -> Result<Self> {
        Ok(Self {
            base_url: Url::parse(&source.base_url)?,
            source,
            category_id: category_id.into(),
            location: location.into(),
            selectors: CompiledSelectors::compile(selectors)?,
            client,
            limits,
            image_concurrency: image_concurrency.max(1),
        })
    }

    /// Search URL for the page containing `query.offset`.
    pub fn build_search_url(&self, query: &SearchQuery) -> FetchResult<Url> {
        let mut url = self
            .base_url
            .join("s-suchanfrage.html")
            .map_err(FetchError::parse)?;

        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("categoryId", &self.category_id)
                .append_pair("keywords", &query.keywords())
                .append_pair("locationStr", &self.location)
                .append_pair("radius", "0");
            if query.offset > 0 {
                let page = query.offset / PAGE_SIZE + 1;
                pairs.append_pair("pageNum", &page.to_string());
            }
        }
        Ok(url)
    }

    /// Extract listings from a results page.
    ///
    /// Items missing an id, title or link are counted and skipped.
    pub fn parse_listings(&self, html: &str) -> Extracted {
        let document = Html::parse_document(html);
        let sel = &self.selectors;
        let mut extracted = Extracted::default();

        for (position, item) in document.select(&sel.item).enumerate() {
            let link = item
                .value()
                .attr(&sel.link_attr)
                .or_else(|| {
                    item.select(&sel.title)
                        .next()
                        .and_then(|a| a.value().attr("href"))
                })
                .filter(|href| !href.trim().is_empty())
                .map(|href| resolve_url(&self.base_url, href.trim()));

            let external_id = item
                .value()
                .attr(&sel.id_attr)
                .map(str::to_string)
                .or_else(|| link.as_deref().and_then(extract_ad_id));

            let mut description = select_text(&item, &sel.description).unwrap_or_default();
            if let Some(price) = sel.price.as_ref().and_then(|s| select_text(&item, s)) {
                description = format!("{description} | Price: {price}");
            }

            let type_name = sel
                .location
                .as_ref()
                .and_then(|s| select_text(&item, s))
                .unwrap_or_else(|| UNKNOWN_LOCATION.to_string());

            let image_url = sel
                .image
                .as_ref()
                .and_then(|s| item.select(s).next())
                .and_then(|img| img.value().attr("src").or(img.value().attr("data-imgsrc")))
                .filter(|src| !src.trim().is_empty())
                .map(|src| resolve_url(&self.base_url, src.trim()));

            let draft = RecordDraft {
                external_id,
                name: select_text(&item, &sel.title),
                url: link,
                description,
                type_name,
                image_url,
            };

            match draft.into_record(self.source.id, position) {
                Ok(entry) => extracted.items.push(entry),
                Err(e) => {
                    extracted.skipped += 1;
                    if extracted.skipped <= WARN_SKIPS {
                        log::warn!("[{}] skipping listing: {}", self.source.name, e);
                    } else {
                        log::debug!("[{}] skipping listing: {}", self.source.name, e);
                    }
                }
            }
        }

        extracted
    }
}

#[async_trait]
impl SourceAdapter for KleinanzeigenAdapter {
    fn name(&self) -> &str {
        &self.source.name
    }

    fn source_id(&self) -> SourceId {
        self.source.id
    }

    fn page_size(&self) -> usize {
        PAGE_SIZE
    }

    fn limits(&self) -> CrawlLimits {
        self.limits
    }

    async fn fetch(&self, query: &SearchQuery, cancel: &CancellationToken) -> FetchResult<Page> {
        let url = self.build_search_url(query)?;
        log::debug!("[{}] GET {}", self.source.name, url);

        let request = self
            .client
            .get(url)
            .header(
                ACCEPT,
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
            )
            .header(ACCEPT_LANGUAGE, "de-DE,de;q=0.8,en-US;q=0.5,en;q=0.3");
        let html = send_text(request, cancel).await?;

        let extracted = self.parse_listings(&html);
        if extracted.items.is_empty() && extracted.skipped == 0 {
            log::info!("[{}] no listings at offset {}", self.source.name, query.offset);
        }

        let records =
            embed_images(&self.client, extracted.items, self.image_concurrency, cancel).await?;
        Ok(Page {
            records,
            skipped: extracted.skipped,
        })
    }
}
