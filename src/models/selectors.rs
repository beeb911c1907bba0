// src/models/selectors.rs

//! CSS selectors for scraping a listing page.
//!
//! Optional selectors fall back to their defaults when omitted; an empty
//! string turns that field's extraction off.

use serde::{Deserialize, Serialize};

/// CSS selectors for scraping one listing results page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingSelectors {
    /// Selector for each listing item on a results page
    #[serde(default = "defaults::item_selector")]
    pub item_selector: String,

    /// Item attribute carrying the listing id
    #[serde(default = "defaults::id_attr")]
    pub id_attr: String,

    /// Item attribute carrying the relative detail link
    #[serde(default = "defaults::link_attr")]
    pub link_attr: String,

    /// Selector for the title element within an item
    #[serde(default = "defaults::title_selector")]
    pub title_selector: String,

    /// Selector for the description element within an item
    #[serde(default = "defaults::description_selector")]
    pub description_selector: String,

    /// Selector for the price element within an item
    #[serde(default = "defaults::price_selector")]
    pub price_selector: Option<String>,

    /// Selector for the location element, used as the type label
    #[serde(default = "defaults::location_selector")]
    pub location_selector: Option<String>,

    /// Selector for the thumbnail image element
    #[serde(default = "defaults::image_selector")]
    pub image_selector: Option<String>,
}

impl Default for ListingSelectors {
    fn default() -> Self {
        Self {
            item_selector: defaults::item_selector(),
            id_attr: defaults::id_attr(),
            link_attr: defaults::link_attr(),
            title_selector: defaults::title_selector(),
            description_selector: defaults::description_selector(),
            price_selector: defaults::price_selector(),
            location_selector: defaults::location_selector(),
            image_selector: defaults::image_selector(),
        }
    }
}

mod defaults {
    pub fn item_selector() -> String {
        "article.aditem".into()
    }
    pub fn id_attr() -> String {
        "data-adid".into()
    }
    pub fn link_attr() -> String {
        "data-href".into()
    }
    pub fn title_selector() -> String {
        "h2 a.ellipsis".into()
    }
    pub fn description_selector() -> String {
        "p.aditem-main--middle--description".into()
    }
    pub fn price_selector() -> Option<String> {
        Some("p.aditem-main--middle--price-shipping--price".into())
    }
    pub fn location_selector() -> Option<String> {
        Some(".aditem-main--top--left".into())
    }
    pub fn image_selector() -> Option<String> {
        Some(".imagebox img".into())
    }
}
