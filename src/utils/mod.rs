//! Utility functions and helpers.

pub mod clock;
pub mod http;

use std::sync::OnceLock;

use regex::Regex;
use url::Url;

pub use clock::{Clock, SystemClock};

/// Resolve a potentially relative URL against a base URL.
pub fn resolve_url(base: &Url, href: &str) -> String {
    // Protocol-relative links ("//img.example.com/x.jpg") are promoted to https
    if let Some(rest) = href.strip_prefix("//") {
        return format!("https://{rest}");
    }
    base.join(href)
        .map(|u| u.to_string())
        .unwrap_or_else(|_| href.to_string())
}

/// Extract a classifieds ad id from a detail URL.
///
/// Detail links end with `/{ad_id}-{category}-{location}`, e.g.
/// `/s-anzeige/turbolader/2871234567-223-1234`.
pub fn extract_ad_id(url: &str) -> Option<String> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    let pattern = PATTERN
        .get_or_init(|| Regex::new(r"/(\d{5,})-\d+-\d+/?(?:[?#].*)?$").ok())
        .as_ref()?;

    pattern
        .captures(url)
        .and_then(|caps| caps.get(1))
        .map(|id| id.as_str().to_string())
}
