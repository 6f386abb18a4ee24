// src/narrate.rs
//! Narrator: turns an enriched summary into a stored MP3 and records its
//! location on the record. Synthesis failures are non-fatal to the batch —
//! a record without audio is still valid and displayable as text.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use metrics::counter;
use serde::{Deserialize, Serialize};

use crate::enrich::RetryPolicy;
use crate::record::{ArticleRecord, RecordStatus};

/// Text + language code in, audio bytes out.
#[async_trait]
pub trait SpeechClient: Send + Sync {
    async fn synthesize(&self, text: &str, lang: &str) -> Result<Vec<u8>>;
    fn name(&self) -> &'static str;
}

pub type DynSpeechClient = Arc<dyn SpeechClient>;

/// Spoken framing around the application list, e.g. a Traditional Chinese
/// intro line and ordinal prefixes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NarrationLabels {
    pub applications_intro: String,
    pub ordinals: Vec<String>,
}

impl Default for NarrationLabels {
    fn default() -> Self {
        Self {
            applications_intro: "這項研究的應用場景：".to_string(),
            ordinals: vec!["第一，".into(), "第二，".into(), "第三，".into()],
        }
    }
}

/// Assemble the narration script. Prefers translated fields; a degraded
/// record falls back to its original-language text so it still gets audio.
pub fn narration_script(record: &ArticleRecord, labels: &NarrationLabels) -> String {
    let title = record
        .title_translated
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(&record.title_original);
    let summary = record
        .summary_translated
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(&record.summary_original);

    let mut script = format!("{}\n\n{}\n\n", title.trim(), summary.trim());
    if !record.applications.is_empty() {
        script.push_str(&labels.applications_intro);
        script.push('\n');
        for (i, app) in record.applications.iter().enumerate() {
            let ordinal = labels.ordinals.get(i).map(String::as_str).unwrap_or("");
            script.push_str(&format!("{ordinal}{app}\n"));
        }
    }
    if let Some(pitch) = record.pitch.as_deref().filter(|s| !s.trim().is_empty()) {
        script.push('\n');
        script.push_str(pitch.trim());
    }
    script.trim().to_string()
}

pub struct Narrator {
    speech: DynSpeechClient,
    audio_dir: PathBuf,
    /// BCP-47-ish code handed to the synthesis service, e.g. "zh-TW".
    language: String,
    labels: NarrationLabels,
    policy: RetryPolicy,
}

impl Narrator {
    pub fn new(
        speech: DynSpeechClient,
        audio_dir: PathBuf,
        language: impl Into<String>,
        labels: NarrationLabels,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            speech,
            audio_dir,
            language: language.into(),
            labels,
            policy,
        }
    }

    /// Attach audio to an ENRICHED or FAILED_ENRICHMENT record in place.
    ///
    /// Only ENRICHED records transition to NARRATED / FAILED_NARRATION; a
    /// degraded record keeps FAILED_ENRICHMENT as its terminal status so the
    /// earlier failure stays visible in the dataset, gaining `audio_ref`
    /// only if synthesis happens to succeed.
    pub async fn narrate(&self, record: &mut ArticleRecord) {
        let was_enriched = record.status == RecordStatus::Enriched;
        let script = narration_script(record, &self.labels);
        if script.is_empty() {
            tracing::warn!(id = %record.id, "nothing to narrate");
            self.mark_failed(record, was_enriched);
            return;
        }

        for attempt in 0..self.policy.attempts() {
            let delay = self.policy.delay_before(attempt);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            match self.speech.synthesize(&script, &self.language).await {
                Ok(bytes) if !bytes.is_empty() => {
                    match self.store_audio(&record.id, &bytes).await {
                        Ok(audio_ref) => {
                            record.audio_ref = Some(audio_ref);
                            if was_enriched {
                                record.status = RecordStatus::Narrated;
                            }
                            counter!("narrate_ok_total").increment(1);
                            tracing::info!(id = %record.id, bytes = bytes.len(), "narration stored");
                            return;
                        }
                        Err(e) => {
                            tracing::warn!(id = %record.id, error = ?e, "storing audio failed");
                            break;
                        }
                    }
                }
                Ok(_) => {
                    tracing::warn!(
                        id = %record.id,
                        attempt,
                        provider = self.speech.name(),
                        "synthesis returned empty audio"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        id = %record.id,
                        attempt,
                        error = ?e,
                        provider = self.speech.name(),
                        "synthesis error"
                    );
                }
            }
        }

        self.mark_failed(record, was_enriched);
    }

    fn mark_failed(&self, record: &mut ArticleRecord, was_enriched: bool) {
        if was_enriched {
            record.status = RecordStatus::FailedNarration;
        }
        counter!("narrate_failed_total").increment(1);
    }

    async fn store_audio(&self, id: &str, bytes: &[u8]) -> Result<String> {
        tokio::fs::create_dir_all(&self.audio_dir)
            .await
            .with_context(|| format!("creating audio dir {}", self.audio_dir.display()))?;
        let path = self.audio_dir.join(format!("{id}.mp3"));
        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("writing {}", path.display()))?;
        Ok(path.to_string_lossy().into_owned())
    }
}

// ------------------------------------------------------------
// Google Translate TTS (the endpoint gTTS wraps)
// ------------------------------------------------------------

/// The unofficial endpoint caps input length per request, so long scripts
/// are chunked and the MP3 segments concatenated.
const MAX_CHUNK_CHARS: usize = 200;
const TRANSLATE_TTS_URL: &str = "https://translate.google.com/translate_tts";

pub struct GoogleTranslateTts {
    http: reqwest::Client,
    base_url: String,
}

impl GoogleTranslateTts {
    pub fn new() -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent("biomed-digest/0.1 (+github.com/biomed-digest/biomed-digest)")
            .connect_timeout(Duration::from_secs(4))
            .timeout(Duration::from_secs(20))
            .build()
            .context("building http client")?;
        Ok(Self {
            http,
            base_url: TRANSLATE_TTS_URL.to_string(),
        })
    }
}

/// Split on char boundaries, preferring whitespace and CJK/latin sentence
/// breaks so chunks read naturally.
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut cur = String::new();
    let mut count = 0usize;
    for ch in text.chars() {
        cur.push(ch);
        count += 1;
        let is_break = matches!(ch, '。' | '！' | '？' | '.' | '!' | '?' | '\n');
        if count >= max_chars || (is_break && count >= max_chars / 2) {
            let piece = cur.trim().to_string();
            if !piece.is_empty() {
                chunks.push(piece);
            }
            cur.clear();
            count = 0;
        }
    }
    let piece = cur.trim().to_string();
    if !piece.is_empty() {
        chunks.push(piece);
    }
    chunks
}

#[async_trait]
impl SpeechClient for GoogleTranslateTts {
    async fn synthesize(&self, text: &str, lang: &str) -> Result<Vec<u8>> {
        let chunks = chunk_text(text, MAX_CHUNK_CHARS);
        if chunks.is_empty() {
            bail!("empty synthesis input");
        }

        // MP3 frames are self-delimiting; concatenated segments play back
        // as one stream.
        let mut audio = Vec::new();
        let total = chunks.len();
        for (idx, chunk) in chunks.iter().enumerate() {
            let idx_s = idx.to_string();
            let total_s = total.to_string();
            let params = [
                ("ie", "UTF-8"),
                ("q", chunk.as_str()),
                ("tl", lang),
                ("client", "tw-ob"),
                ("idx", idx_s.as_str()),
                ("total", total_s.as_str()),
            ];
            let bytes = self
                .http
                .get(&self.base_url)
                .query(&params)
                .send()
                .await
                .context("translate_tts send")?
                .error_for_status()
                .context("translate_tts status")?
                .bytes()
                .await
                .context("translate_tts body")?;
            audio.extend_from_slice(&bytes);
        }
        Ok(audio)
    }

    fn name(&self) -> &'static str {
        "google-translate-tts"
    }
}
