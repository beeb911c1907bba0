//! Source and part record data structures.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ExtractionError;

/// Stable identifier of one upstream source.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SourceId(pub u32);

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for SourceId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

/// One registered upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub id: SourceId,

    /// Display name (e.g., "Kleinanzeigen")
    pub name: String,

    /// Base location of the upstream
    pub base_url: String,
}

/// A listing as extracted from one upstream, not yet persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRecord {
    /// Identifier unique within the owning source
    pub external_id: String,

    pub name: String,

    pub description: String,

    /// Category or type label
    pub type_name: String,

    /// Base64-encoded image, empty when absent or the image fetch failed
    pub image_base64: Option<String>,

    /// Canonical detail URL
    pub url: String,

    pub source_id: SourceId,
}

/// A listing being assembled by an adapter.
///
/// Required fields are optional here so that extraction can keep going and
/// report exactly which field was missing.
#[derive(Debug, Clone, Default)]
pub struct RecordDraft {
    pub external_id: Option<String>,
    pub name: Option<String>,
    pub url: Option<String>,
    pub description: String,
    pub type_name: String,
    /// Image location to fetch and embed later
    pub image_url: Option<String>,
}

impl RecordDraft {
    /// Check required fields and build the record.
    ///
    /// The image is embedded separately, so the record starts without one.
    pub fn into_record(
        self,
        source_id: SourceId,
        position: usize,
    ) -> std::result::Result<(RawRecord, Option<String>), ExtractionError> {
        let required = |value: Option<String>, field: &'static str| {
            value
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or(ExtractionError { position, field })
        };

        let external_id = required(self.external_id, "external_id")?;
        let name = required(self.name, "name")?;
        let url = required(self.url, "url")?;

        let record = RawRecord {
            external_id,
            name,
            description: self.description.trim().to_string(),
            type_name: self.type_name.trim().to_string(),
            image_base64: None,
            url,
            source_id,
        };
        Ok((record, self.image_url))
    }
}

/// The persisted, deduplicated form of a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRecord {
    /// Surrogate key
    pub id: i64,

    pub source_id: SourceId,

    pub external_id: String,

    pub name: String,

    pub description: String,

    pub type_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_base64: Option<String>,

    pub url: String,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    /// Last time the record appeared in a fetch; drives staleness
    pub last_seen: DateTime<Utc>,
}

impl StoredRecord {
    /// Build the persisted form of a first sighting.
    pub fn first_seen(id: i64, record: &RawRecord, at: DateTime<Utc>) -> Self {
        Self {
            id,
            source_id: record.source_id,
            external_id: record.external_id.clone(),
            name: record.name.clone(),
            description: record.description.clone(),
            type_name: record.type_name.clone(),
            image_base64: record.image_base64.clone(),
            url: record.url.clone(),
            created_at: at,
            updated_at: at,
            last_seen: at,
        }
    }

    /// Refresh the last-seen timestamp without ever moving it backwards.
    pub fn touch(&mut self, at: DateTime<Utc>) -> bool {
        if at > self.last_seen {
            self.last_seen = at;
            true
        } else {
            false
        }
    }

    /// Case-insensitive match on name, description and type label.
    pub fn matches_text(&self, needle: &str) -> bool {
        let needle = needle.to_lowercase();
        [&self.name, &self.description, &self.type_name]
            .iter()
            .any(|field| field.to_lowercase().contains(&needle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn draft() -> RecordDraft {
        RecordDraft {
            external_id: Some(" 123 ".into()),
            name: Some("Turbo".into()),
            url: Some("https://example.com/123".into()),
            description: "  Garrett  ".into(),
            type_name: "Berlin".into(),
            image_url: Some("https://img.example.com/1.jpg".into()),
        }
    }

    #[test]
    fn draft_with_required_fields_builds_record() {
        let (record, image) = draft().into_record(SourceId(7), 0).unwrap();
        assert_eq!(record.external_id, "123");
        assert_eq!(record.description, "Garrett");
        assert_eq!(record.source_id, SourceId(7));
        assert!(record.image_base64.is_none());
        assert_eq!(image.as_deref(), Some("https://img.example.com/1.jpg"));
    }

    #[test]
    fn draft_missing_name_reports_field() {
        let mut d = draft();
        d.name = Some("   ".into());
        let err = d.into_record(SourceId(1), 4).unwrap_err();
        assert_eq!(err.field, "name");
        assert_eq!(err.position, 4);
    }

    #[test]
    fn touch_never_moves_backwards() {
        let now = Utc::now();
        let raw = draft().into_record(SourceId(1), 0).unwrap().0;
        let mut stored = StoredRecord::first_seen(1, &raw, now);

        assert!(!stored.touch(now - Duration::hours(1)));
        assert_eq!(stored.last_seen, now);
        assert!(stored.touch(now + Duration::seconds(5)));
        assert_eq!(stored.last_seen, now + Duration::seconds(5));
    }

    #[test]
    fn text_match_is_case_insensitive() {
        let raw = draft().into_record(SourceId(1), 0).unwrap().0;
        let stored = StoredRecord::first_seen(1, &raw, Utc::now());
        assert!(stored.matches_text("turbo"));
        assert!(stored.matches_text("GARRETT"));
        assert!(!stored.matches_text("intercooler"));
    }
}
