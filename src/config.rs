// src/config.rs
//! Pipeline configuration: a TOML file with serde defaults, resolved from
//! $DIGEST_CONFIG_PATH, then config/digest.toml, then built-in defaults.
//! API keys never live here; they come from the environment.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::enrich::RetryPolicy;
use crate::fetch::pubmed::LATEST_ARTICLES_MARKER;
use crate::fetch::FetchOptions;
use crate::narrate::NarrationLabels;

const ENV_PATH: &str = "DIGEST_CONFIG_PATH";
const DEFAULT_PATH: &str = "config/digest.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// PubMed query terms, processed in order. The latest-articles marker
    /// fetches the newest articles regardless of topic.
    #[serde(default = "default_queries")]
    pub queries: Vec<String>,
    #[serde(default = "default_per_query")]
    pub articles_per_query: usize,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub enrich: EnrichConfig,
    #[serde(default)]
    pub narrate: NarrateConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_dataset_path")]
    pub dataset_path: PathBuf,
    #[serde(default = "default_watermark_path")]
    pub watermark_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    #[serde(default = "default_min_abstract_chars")]
    pub min_abstract_chars: usize,
    #[serde(default = "default_query_pause_ms")]
    pub query_pause_ms: u64,
    #[serde(default = "default_call_pause_ms")]
    pub call_pause_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichConfig {
    /// Prose language name inserted into the generation prompt.
    #[serde(default = "default_language")]
    pub language: String,
    /// Generation model; `None` uses the client default.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_enrich_retries")]
    pub retries: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    /// Response cache directory; disabled when absent.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NarrateConfig {
    /// Language code handed to the synthesis service.
    #[serde(default = "default_language_code")]
    pub language_code: String,
    #[serde(default = "default_audio_dir")]
    pub audio_dir: PathBuf,
    #[serde(default = "default_narrate_retries")]
    pub retries: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    #[serde(default)]
    pub labels: Option<NarrationLabels>,
}

fn default_queries() -> Vec<String> {
    vec![
        "artificial intelligence".into(),
        "machine learning".into(),
        "deep learning".into(),
        "cancer treatment".into(),
        "diabetes management".into(),
        LATEST_ARTICLES_MARKER.into(),
    ]
}
fn default_per_query() -> usize {
    1
}
fn default_concurrency() -> usize {
    4
}
fn default_dataset_path() -> PathBuf {
    PathBuf::from("news.jsonl")
}
fn default_watermark_path() -> PathBuf {
    PathBuf::from("watermark.txt")
}
fn default_min_abstract_chars() -> usize {
    50
}
fn default_query_pause_ms() -> u64 {
    1_000
}
fn default_call_pause_ms() -> u64 {
    400
}
fn default_language() -> String {
    "Traditional Chinese".to_string()
}
fn default_language_code() -> String {
    "zh-TW".to_string()
}
fn default_audio_dir() -> PathBuf {
    PathBuf::from("audios")
}
fn default_enrich_retries() -> u32 {
    2
}
fn default_narrate_retries() -> u32 {
    1
}
fn default_backoff_ms() -> u64 {
    500
}

impl Default for StoreConfig {
    fn default() -> Self {
        toml::from_str("").expect("empty store config")
    }
}
impl Default for FetchConfig {
    fn default() -> Self {
        toml::from_str("").expect("empty fetch config")
    }
}
impl Default for EnrichConfig {
    fn default() -> Self {
        toml::from_str("").expect("empty enrich config")
    }
}
impl Default for NarrateConfig {
    fn default() -> Self {
        toml::from_str("").expect("empty narrate config")
    }
}
impl Default for PipelineConfig {
    fn default() -> Self {
        toml::from_str("").expect("empty pipeline config")
    }
}

impl PipelineConfig {
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        let mut cfg: PipelineConfig =
            toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
        cfg.sanitize();
        Ok(cfg)
    }

    /// Env var path first, then the conventional location, then defaults.
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = std::env::var(ENV_PATH) {
            let pb = PathBuf::from(p);
            if pb.exists() {
                return Self::load_from(&pb);
            }
            return Err(anyhow!("{ENV_PATH} points to non-existent path"));
        }
        let conventional = PathBuf::from(DEFAULT_PATH);
        if conventional.exists() {
            return Self::load_from(&conventional);
        }
        Ok(Self::default())
    }

    fn sanitize(&mut self) {
        self.queries.retain(|q| !q.trim().is_empty());
        if self.queries.is_empty() {
            self.queries = default_queries();
        }
        if self.articles_per_query == 0 {
            self.articles_per_query = default_per_query();
        }
        if self.concurrency == 0 {
            self.concurrency = default_concurrency();
        }
    }

    pub fn fetch_options(&self) -> FetchOptions {
        FetchOptions {
            articles_per_query: self.articles_per_query,
            min_abstract_chars: self.fetch.min_abstract_chars,
            query_pause: Duration::from_millis(self.fetch.query_pause_ms),
            call_pause: Duration::from_millis(self.fetch.call_pause_ms),
        }
    }

    pub fn enrich_retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            retries: self.enrich.retries,
            backoff: Duration::from_millis(self.enrich.backoff_ms),
        }
    }

    pub fn narrate_retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            retries: self.narrate.retries,
            backoff: Duration::from_millis(self.narrate.backoff_ms),
        }
    }

    pub fn narration_labels(&self) -> NarrationLabels {
        self.narrate.labels.clone().unwrap_or_default()
    }
}
