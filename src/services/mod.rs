//! Source adapters.
//!
//! Each upstream gets a hand-written [`SourceAdapter`]:
//! - Classifieds search pages (`KleinanzeigenAdapter`)
//! - Marketplace Browse API (`EbayAdapter`)
//!
//! Adapters are resolved once at startup into an [`AdapterRegistry`].

pub mod adapter;
pub mod ebay;
pub mod images;
pub mod kleinanzeigen;
pub mod registry;

pub use adapter::{CrawlLimits, CrawlOutcome, Page, SourceAdapter, StopReason, crawl_pages};
pub use ebay::{EbayAdapter, EbaySettings};
pub use kleinanzeigen::KleinanzeigenAdapter;
pub use registry::AdapterRegistry;
