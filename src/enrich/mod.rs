// src/enrich/mod.rs
//! Enricher: structured translation of fetched articles with a bounded
//! retry/degrade policy. One article's exhausted retries never block the
//! rest of the batch — the record is persisted degraded instead of dropped.

pub mod gemini;
pub mod schema;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use metrics::counter;
use sha2::{Digest, Sha256};

use crate::record::{ArticleRecord, RecordStatus};
use schema::Enrichment;

/// One structured-output attempt. Transport failures and non-JSON bodies are
/// `Err`; an `Ok` value is still subject to schema validation by the caller.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<serde_json::Value>;
    fn name(&self) -> &'static str;
}

pub type DynGenerationClient = Arc<dyn GenerationClient>;

/// Bounded retry with doubling backoff. An operational tuning knob, not a
/// correctness contract — see config.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Additional attempts after the first.
    pub retries: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 2,
            backoff: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    pub fn attempts(&self) -> u32 {
        self.retries + 1
    }

    /// Delay before attempt `n` (0-based). Attempt 0 runs immediately.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            Duration::ZERO
        } else {
            self.backoff * 2u32.saturating_pow(attempt - 1)
        }
    }
}

pub struct Enricher {
    client: DynGenerationClient,
    policy: RetryPolicy,
    /// Prose language name used in the prompt, e.g. "Traditional Chinese".
    language: String,
    /// Optional response cache keyed by prompt hash; re-running on unchanged
    /// input skips the remote call.
    cache_dir: Option<PathBuf>,
}

impl Enricher {
    pub fn new(client: DynGenerationClient, policy: RetryPolicy, language: impl Into<String>) -> Self {
        Self {
            client,
            policy,
            language: language.into(),
            cache_dir: None,
        }
    }

    pub fn with_cache_dir(mut self, dir: PathBuf) -> Self {
        let _ = fs::create_dir_all(&dir); // best-effort
        self.cache_dir = Some(dir);
        self
    }

    /// Enrich one FETCHED record in place. Terminal outcome is always one of
    /// ENRICHED or FAILED_ENRICHMENT; original-language fields are never
    /// touched.
    pub async fn enrich(&self, record: &mut ArticleRecord) {
        let prompt = build_prompt(&self.language, &record.title_original, &record.summary_original);

        if let Some(hit) = self.cache_lookup(&prompt) {
            tracing::debug!(id = %record.id, "enrichment cache hit");
            apply(record, hit);
            counter!("enrich_ok_total").increment(1);
            counter!("enrich_cache_hits_total").increment(1);
            return;
        }

        for attempt in 0..self.policy.attempts() {
            let delay = self.policy.delay_before(attempt);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            match self.client.generate(&prompt).await {
                Ok(value) => match schema::validate(&value) {
                    Ok(enrichment) => {
                        self.cache_store(&prompt, &enrichment);
                        apply(record, enrichment);
                        counter!("enrich_ok_total").increment(1);
                        tracing::info!(id = %record.id, attempt, "article enriched");
                        return;
                    }
                    Err(e) => {
                        counter!("enrich_schema_violations_total").increment(1);
                        tracing::warn!(
                            id = %record.id,
                            attempt,
                            error = %e,
                            provider = self.client.name(),
                            "schema violation"
                        );
                    }
                },
                Err(e) => {
                    tracing::warn!(
                        id = %record.id,
                        attempt,
                        error = ?e,
                        provider = self.client.name(),
                        "generation error"
                    );
                }
            }
        }

        record.status = RecordStatus::FailedEnrichment;
        counter!("enrich_failed_total").increment(1);
        tracing::warn!(
            id = %record.id,
            attempts = self.policy.attempts(),
            "enrichment retries exhausted; keeping degraded record"
        );
    }

    fn cache_lookup(&self, prompt: &str) -> Option<Enrichment> {
        let dir = self.cache_dir.as_deref()?;
        let s = fs::read_to_string(cache_path(dir, prompt)).ok()?;
        serde_json::from_str(&s).ok()
    }

    fn cache_store(&self, prompt: &str, enrichment: &Enrichment) {
        let Some(dir) = self.cache_dir.as_deref() else {
            return;
        };
        let path = cache_path(dir, prompt);
        let tmp = path.with_extension("json.tmp");
        let json = match serde_json::to_string(enrichment) {
            Ok(j) => j,
            Err(_) => return,
        };
        if fs::write(&tmp, json).is_ok() {
            let _ = fs::rename(tmp, path);
        }
    }
}

fn apply(record: &mut ArticleRecord, e: Enrichment) {
    record.title_translated = Some(e.title_translated);
    record.summary_translated = Some(e.summary_translated);
    record.applications = e.applications;
    record.pitch = Some(e.pitch);
    record.status = RecordStatus::Enriched;
    record.enriched_at = Some(chrono::Utc::now());
}

fn build_prompt(language: &str, title: &str, abstract_text: &str) -> String {
    format!(
        "Translate the following biomedical research title and abstract into {language}, then:\n\
         1. Condense the abstract into a short {language} summary suitable for listening, about 100-150 characters.\n\
         2. Propose three everyday application scenarios in plain spoken {language} so a layperson understands the value of this research.\n\
         3. Write a one-sentence investor-style pitch in {language}.\n\
         English title: {title}\n\
         English abstract: {abstract_text}\n"
    )
}

fn cache_path(dir: &Path, prompt: &str) -> PathBuf {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    let key = format!("{:x}", hasher.finalize());
    dir.join(format!("{key}.json"))
}
