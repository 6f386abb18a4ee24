// src/enrich/schema.rs
//! The structured-output contract: the schema sent with every generation
//! request, and the strict validation applied to whatever comes back.
//! Generation output is non-deterministic; schema conformance is the only
//! contract enforced here.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Expected number of application scenarios. Model output is normalized
/// toward this: over-long lists are truncated, empty entries dropped.
pub const TARGET_APPLICATIONS: usize = 3;

/// A validated generation response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enrichment {
    pub title_translated: String,
    pub summary_translated: String,
    pub applications: Vec<String>,
    pub pitch: String,
}

/// JSON schema declared to the generation service (Gemini response_schema
/// dialect, uppercase type names).
pub fn response_schema(language: &str) -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "title_translated": {
                "type": "STRING",
                "description": format!("The article title translated into {language}.")
            },
            "summary_translated": {
                "type": "STRING",
                "description": format!(
                    "A condensed {language} summary of the abstract, suitable for listening, about 100-150 characters."
                )
            },
            "applications": {
                "type": "ARRAY",
                "items": { "type": "STRING" },
                "minItems": TARGET_APPLICATIONS,
                "maxItems": TARGET_APPLICATIONS,
                "description": "Three everyday application scenarios in plain spoken language."
            },
            "pitch": {
                "type": "STRING",
                "description": "A one-sentence investor-style pitch for the research."
            }
        },
        "required": ["title_translated", "summary_translated", "applications", "pitch"]
    })
}

/// Strict boundary validation. Rejects responses with missing or empty
/// required fields; trims and normalizes `applications` to at most
/// [`TARGET_APPLICATIONS`] non-empty entries.
pub fn validate(raw: &Value) -> Result<Enrichment> {
    let mut e: Enrichment =
        serde_json::from_value(raw.clone()).context("response does not match schema")?;

    e.title_translated = e.title_translated.trim().to_string();
    e.summary_translated = e.summary_translated.trim().to_string();
    e.pitch = e.pitch.trim().to_string();

    if e.title_translated.is_empty() {
        bail!("empty title_translated");
    }
    if e.summary_translated.is_empty() {
        bail!("empty summary_translated");
    }
    if e.pitch.is_empty() {
        bail!("empty pitch");
    }

    e.applications = e
        .applications
        .iter()
        .map(|a| a.trim().to_string())
        .filter(|a| !a.is_empty())
        .take(TARGET_APPLICATIONS)
        .collect();
    if e.applications.is_empty() {
        bail!("no non-empty applications");
    }

    Ok(e)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full(apps: Value) -> Value {
        json!({
            "title_translated": "標題",
            "summary_translated": "摘要",
            "applications": apps,
            "pitch": "一句話"
        })
    }

    #[test]
    fn accepts_conforming_response() {
        let v = full(json!(["一", "二", "三"]));
        let e = validate(&v).unwrap();
        assert_eq!(e.applications.len(), 3);
        assert_eq!(e.title_translated, "標題");
    }

    #[test]
    fn rejects_missing_field() {
        let v = json!({ "title_translated": "t", "summary_translated": "s" });
        assert!(validate(&v).is_err());
    }

    #[test]
    fn rejects_wrong_applications_type() {
        let v = full(json!("not a list"));
        assert!(validate(&v).is_err());
    }

    #[test]
    fn truncates_over_long_applications() {
        let v = full(json!(["1", "2", "3", "4", "5"]));
        let e = validate(&v).unwrap();
        assert_eq!(e.applications, vec!["1", "2", "3"]);
    }

    #[test]
    fn drops_empty_applications_but_keeps_short_lists() {
        let v = full(json!(["  ", "一", "二"]));
        let e = validate(&v).unwrap();
        assert_eq!(e.applications, vec!["一", "二"]);
    }

    #[test]
    fn rejects_all_empty_applications() {
        let v = full(json!(["", "  "]));
        assert!(validate(&v).is_err());
    }

    #[test]
    fn rejects_blank_pitch() {
        let mut v = full(json!(["一"]));
        v["pitch"] = json!("   ");
        assert!(validate(&v).is_err());
    }
}
