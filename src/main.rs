//! biomed-digest — Binary Entrypoint
//! Runs one pipeline pass: harvest new PubMed articles, enrich them with a
//! structured translation, synthesize narration, append to the dataset.
//!
//! Scheduling (cron, CI workflow) and the static front end that reads the
//! dataset live outside this binary.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use biomed_digest::config::PipelineConfig;
use biomed_digest::enrich::gemini::GeminiClient;
use biomed_digest::enrich::Enricher;
use biomed_digest::fetch::pubmed::PubMedSource;
use biomed_digest::narrate::{GoogleTranslateTts, Narrator};
use biomed_digest::pipeline::Pipeline;
use biomed_digest::store::RecordStore;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op in CI where keys come from secrets.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = PipelineConfig::load_default().context("loading pipeline config")?;
    tracing::info!(
        queries = cfg.queries.len(),
        per_query = cfg.articles_per_query,
        dataset = %cfg.store.dataset_path.display(),
        "pipeline config loaded"
    );

    let mut store = RecordStore::open(&cfg.store.dataset_path, &cfg.store.watermark_path)
        .context("opening record store")?;

    let source = Arc::new(
        PubMedSource::new(std::env::var("NCBI_API_KEY").ok()).context("building pubmed source")?,
    );

    let gemini = GeminiClient::from_env(cfg.enrich.model.as_deref(), cfg.enrich.language.clone())
        .context("building generation client")?;
    let mut enricher = Enricher::new(
        Arc::new(gemini),
        cfg.enrich_retry_policy(),
        cfg.enrich.language.clone(),
    );
    if let Some(dir) = cfg.enrich.cache_dir.clone() {
        enricher = enricher.with_cache_dir(dir);
    }

    let narrator = Narrator::new(
        Arc::new(GoogleTranslateTts::new().context("building speech client")?),
        cfg.narrate.audio_dir.clone(),
        cfg.narrate.language_code.clone(),
        cfg.narration_labels(),
        cfg.narrate_retry_policy(),
    );

    let pipeline = Pipeline::new(source, Arc::new(enricher), Arc::new(narrator), cfg.concurrency);
    let summary = pipeline
        .run_once(&mut store, &cfg.queries, &cfg.fetch_options())
        .await?;

    if !summary.fetch_complete {
        tracing::warn!("fetch was incomplete; watermark held back, next run will catch up");
    }
    Ok(())
}
