// src/enrich/gemini.rs
//! Gemini `generateContent` client with structured output: the request
//! declares a response schema and `application/json` MIME type, so the model
//! answers with a JSON document the schema validator can check directly.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::GenerationClient;
use crate::enrich::schema;

pub const DEFAULT_MODEL: &str = "gemini-2.0-flash-001";
const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

pub struct GeminiClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    language: String,
}

impl GeminiClient {
    pub fn new(
        api_key: String,
        model_override: Option<&str>,
        language: impl Into<String>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent("biomed-digest/0.1 (+github.com/biomed-digest/biomed-digest)")
            .connect_timeout(Duration::from_secs(4))
            .timeout(Duration::from_secs(30))
            .build()
            .context("building http client")?;
        Ok(Self {
            http,
            api_key,
            model: model_override.unwrap_or(DEFAULT_MODEL).to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            language: language.into(),
        })
    }

    /// Reads `GEMINI_API_KEY`; errors out early rather than failing every
    /// article mid-run.
    pub fn from_env(model_override: Option<&str>, language: impl Into<String>) -> Result<Self> {
        let api_key =
            std::env::var("GEMINI_API_KEY").context("GEMINI_API_KEY is not set")?;
        Self::new(api_key, model_override, language)
    }
}

#[async_trait]
impl GenerationClient for GeminiClient {
    async fn generate(&self, prompt: &str) -> Result<serde_json::Value> {
        #[derive(Serialize)]
        struct Part<'a> {
            text: &'a str,
        }
        #[derive(Serialize)]
        struct Content<'a> {
            parts: Vec<Part<'a>>,
        }
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct GenerationConfig {
            response_mime_type: &'static str,
            response_schema: serde_json::Value,
            temperature: f32,
            max_output_tokens: u32,
        }
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Req<'a> {
            contents: Vec<Content<'a>>,
            generation_config: GenerationConfig,
        }
        #[derive(Deserialize)]
        struct Resp {
            #[serde(default)]
            candidates: Vec<Candidate>,
        }
        #[derive(Deserialize)]
        struct Candidate {
            content: RespContent,
        }
        #[derive(Deserialize)]
        struct RespContent {
            #[serde(default)]
            parts: Vec<RespPart>,
        }
        #[derive(Deserialize)]
        struct RespPart {
            #[serde(default)]
            text: String,
        }

        let req = Req {
            contents: vec![Content {
                parts: vec![Part { text: prompt }],
            }],
            generation_config: GenerationConfig {
                response_mime_type: "application/json",
                response_schema: schema::response_schema(&self.language),
                temperature: 0.7,
                max_output_tokens: 2000,
            },
        };

        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        );
        let resp = self
            .http
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&req)
            .send()
            .await
            .context("gemini generateContent send")?
            .error_for_status()
            .context("gemini generateContent status")?;

        let body: Resp = resp.json().await.context("gemini generateContent body")?;
        let text = body
            .candidates
            .first()
            .and_then(|c| c.content.parts.first())
            .map(|p| p.text.as_str())
            .unwrap_or("");
        if text.is_empty() {
            bail!("gemini returned no candidates");
        }
        serde_json::from_str(text).context("gemini candidate is not valid JSON")
    }

    fn name(&self) -> &'static str {
        "gemini"
    }
}
