// src/pipeline.rs
//! PipelineOrchestrator: fetch → enrich → narrate → persist, per batch.
//!
//! Enrichment and narration of independent articles run concurrently under a
//! bounded worker pool; ids are deduplicated before dispatch so no two
//! workers ever target the same record. Each record is persisted with its
//! terminal status as soon as its worker finishes, and the watermark only
//! advances after the whole batch is on disk — an interrupted run reprocesses
//! at most the last in-flight batch and never silently skips an article.

use std::sync::Arc;

use anyhow::{Context, Result};
use metrics::{counter, gauge};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::enrich::Enricher;
use crate::fetch::{self, ArticleSource, FetchOptions};
use crate::narrate::Narrator;
use crate::record::{ArticleRecord, RecordStatus};
use crate::store::RecordStore;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub fetched: usize,
    pub enriched: usize,
    pub narrated: usize,
    pub failed_enrichment: usize,
    pub failed_narration: usize,
    pub fetch_complete: bool,
    pub watermark: Option<String>,
}

pub struct Pipeline {
    source: Arc<dyn ArticleSource>,
    enricher: Arc<Enricher>,
    narrator: Arc<Narrator>,
    /// Worker pool bound for enrich+narrate; both stages are network-bound.
    concurrency: usize,
}

impl Pipeline {
    pub fn new(
        source: Arc<dyn ArticleSource>,
        enricher: Arc<Enricher>,
        narrator: Arc<Narrator>,
        concurrency: usize,
    ) -> Self {
        Self {
            source,
            enricher,
            narrator,
            concurrency: concurrency.max(1),
        }
    }

    /// One full pipeline run. Persistence failures are fatal and leave the
    /// watermark untouched; everything else degrades per record.
    pub async fn run_once(
        &self,
        store: &mut RecordStore,
        queries: &[String],
        opts: &FetchOptions,
    ) -> Result<RunSummary> {
        fetch::ensure_metrics_described();

        let batch = fetch::collect_new(self.source.as_ref(), store, queries, opts).await;
        let mut summary = RunSummary {
            fetched: batch.articles.len(),
            fetch_complete: batch.complete,
            watermark: store.watermark().map(|s| s.to_string()),
            ..RunSummary::default()
        };

        if batch.articles.is_empty() {
            tracing::info!(complete = batch.complete, "no new articles");
        } else {
            let fetched_at = chrono::Utc::now();
            let sem = Arc::new(Semaphore::new(self.concurrency));
            let mut workers = JoinSet::new();
            for raw in batch.articles {
                let record = ArticleRecord::from_raw(raw, fetched_at);
                let sem = sem.clone();
                let enricher = self.enricher.clone();
                let narrator = self.narrator.clone();
                workers.spawn(async move {
                    let _permit = sem.acquire_owned().await.expect("semaphore never closed");
                    let mut record = record;
                    enricher.enrich(&mut record).await;
                    narrator.narrate(&mut record).await;
                    record
                });
            }

            // Persist as workers finish; a failed upsert aborts the run
            // before the watermark moves.
            while let Some(joined) = workers.join_next().await {
                let record = joined.context("pipeline worker panicked")?;
                match record.status {
                    RecordStatus::Narrated => {
                        summary.enriched += 1;
                        summary.narrated += 1;
                    }
                    RecordStatus::Enriched => summary.enriched += 1,
                    RecordStatus::FailedNarration => {
                        summary.enriched += 1;
                        summary.failed_narration += 1;
                    }
                    RecordStatus::FailedEnrichment => summary.failed_enrichment += 1,
                    RecordStatus::Fetched => {}
                }
                store.upsert(record).context("persisting record")?;
            }
        }

        if let Some(candidate) = batch.watermark_candidate {
            store
                .set_watermark(&candidate)
                .context("advancing watermark")?;
        }
        summary.watermark = store.watermark().map(|s| s.to_string());

        counter!("pipeline_runs_total").increment(1);
        gauge!("pipeline_last_run_ts").set(chrono::Utc::now().timestamp().max(0) as f64);
        tracing::info!(
            fetched = summary.fetched,
            enriched = summary.enriched,
            narrated = summary.narrated,
            failed_enrichment = summary.failed_enrichment,
            failed_narration = summary.failed_narration,
            complete = summary.fetch_complete,
            watermark = summary.watermark.as_deref().unwrap_or("-"),
            "pipeline run finished"
        );
        Ok(summary)
    }
}
