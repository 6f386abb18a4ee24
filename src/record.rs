// src/record.rs
// Core data model: one persisted record per harvested article, plus the
// raw shape articles arrive in before enrichment.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle marker for a harvested article. Every record ends in exactly one
/// terminal state; failures are retained, never dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Fetched,
    Enriched,
    Narrated,
    FailedEnrichment,
    FailedNarration,
}

/// An article as retrieved from the upstream source, before enrichment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawArticle {
    /// Upstream unique identifier (PMID). The dedup key.
    pub id: String,
    /// The query term that surfaced this article.
    pub query: String,
    pub url: String,
    pub title: String,
    pub abstract_text: String,
}

/// One line of the persisted dataset. Translated fields stay absent until
/// enrichment succeeds; `audio_ref` stays absent until narration succeeds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleRecord {
    pub id: String,
    pub query: String,
    pub url: String,
    pub title_original: String,
    pub summary_original: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title_translated: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary_translated: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub applications: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pitch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_ref: Option<String>,
    pub status: RecordStatus,
    pub fetched_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enriched_at: Option<DateTime<Utc>>,
}

impl ArticleRecord {
    pub fn from_raw(raw: RawArticle, fetched_at: DateTime<Utc>) -> Self {
        Self {
            id: raw.id,
            query: raw.query,
            url: raw.url,
            title_original: raw.title,
            summary_original: raw.abstract_text,
            title_translated: None,
            summary_translated: None,
            applications: Vec::new(),
            pitch: None,
            audio_ref: None,
            status: RecordStatus::Fetched,
            fetched_at,
            enriched_at: None,
        }
    }
}

/// Compare two upstream ids by recency. PMIDs are decimal strings assigned
/// monotonically, so a longer id is always newer and equal-length ids compare
/// lexicographically.
pub fn id_cmp(a: &str, b: &str) -> Ordering {
    match a.len().cmp(&b.len()) {
        Ordering::Equal => a.cmp(b),
        other => other,
    }
}

/// True iff `id` is strictly newer than `watermark`.
pub fn newer_than(id: &str, watermark: &str) -> bool {
    id_cmp(id, watermark) == Ordering::Greater
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_cmp_is_numeric_aware() {
        assert_eq!(id_cmp("9", "10"), Ordering::Less);
        assert_eq!(id_cmp("40391000", "40390999"), Ordering::Greater);
        assert_eq!(id_cmp("12345", "12345"), Ordering::Equal);
    }

    #[test]
    fn newer_than_is_strict() {
        assert!(newer_than("101", "100"));
        assert!(!newer_than("100", "100"));
        assert!(!newer_than("99", "100"));
    }

    #[test]
    fn from_raw_starts_in_fetched_state() {
        let raw = RawArticle {
            id: "40000001".into(),
            query: "cancer treatment".into(),
            url: "https://pubmed.ncbi.nlm.nih.gov/40000001/".into(),
            title: "T".into(),
            abstract_text: "A".into(),
        };
        let rec = ArticleRecord::from_raw(raw, Utc::now());
        assert_eq!(rec.status, RecordStatus::Fetched);
        assert!(rec.title_translated.is_none());
        assert!(rec.audio_ref.is_none());
        assert!(rec.applications.is_empty());
    }
}
