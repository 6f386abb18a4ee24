// src/fetch/mod.rs
pub mod pubmed;

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram};
use once_cell::sync::OnceCell;

use crate::record::{id_cmp, newer_than, RawArticle};
use crate::store::RecordStore;

/// Extra ids requested beyond the per-query target, headroom for ids the
/// store already knows about.
pub const OVERFETCH: usize = 15;

/// Article metadata + abstract as returned by a source, keyed by the stable
/// upstream id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArticleDetail {
    pub id: String,
    pub title: String,
    pub abstract_text: String,
    pub url: String,
}

/// Upstream literature source. Searching and detail retrieval are separate
/// calls so known ids can be filtered before their abstracts are fetched.
#[async_trait]
pub trait ArticleSource: Send + Sync {
    /// Up to `retmax` ids matching `query`, newest first.
    async fn search_ids(&self, query: &str, retmax: usize) -> Result<Vec<String>>;
    /// Details for the given ids. Ids the source cannot resolve are simply
    /// absent from the result.
    async fn fetch_details(&self, ids: &[String]) -> Result<Vec<ArticleDetail>>;
    fn name(&self) -> &'static str;
}

/// Tuning knobs for one collection pass.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub articles_per_query: usize,
    /// Abstracts shorter than this are rejected as not worth narrating.
    pub min_abstract_chars: usize,
    /// Pause between query terms (upstream rate limit).
    pub query_pause: Duration,
    /// Pause between the search call and the detail call.
    pub call_pause: Duration,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            articles_per_query: 1,
            min_abstract_chars: 50,
            query_pause: Duration::from_secs(1),
            call_pause: Duration::from_millis(400),
        }
    }
}

/// Result of one collection pass across all query terms.
#[derive(Debug, Clone)]
pub struct FetchBatch {
    /// New, normalized articles, deduplicated against the store and within
    /// the batch.
    pub articles: Vec<RawArticle>,
    /// False when any upstream call failed or returned fewer details than
    /// requested; the retrieved subset is still processed.
    pub complete: bool,
    /// Id safe to advance the watermark to once every article in `articles`
    /// has been persisted: the lowest of the per-query safe points, so no
    /// query's unfetched articles end up below the bound. `None` leaves the
    /// watermark untouched.
    pub watermark_candidate: Option<String>,
}

/// One-time metrics registration.
pub(crate) fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("harvest_ids_total", "Ids returned by source searches.");
        describe_counter!("harvest_kept_total", "Articles accepted into a batch.");
        describe_counter!(
            "harvest_known_total",
            "Ids skipped because the store already has them."
        );
        describe_counter!(
            "harvest_short_total",
            "Articles rejected for missing/short abstracts."
        );
        describe_counter!("harvest_source_errors_total", "Source fetch/parse errors.");
        describe_histogram!("harvest_parse_ms", "Source parse time in milliseconds.");
        describe_counter!("enrich_ok_total", "Articles enriched successfully.");
        describe_counter!(
            "enrich_cache_hits_total",
            "Enrichments served from the response cache."
        );
        describe_counter!("enrich_failed_total", "Articles degraded after retries.");
        describe_counter!(
            "enrich_schema_violations_total",
            "Generation responses rejected by schema validation."
        );
        describe_counter!("narrate_ok_total", "Narrations synthesized and stored.");
        describe_counter!("narrate_failed_total", "Narration failures (non-fatal).");
        describe_counter!("pipeline_runs_total", "Completed pipeline runs.");
        describe_gauge!("pipeline_last_run_ts", "Unix ts when the pipeline last ran.");
    });
}

/// Normalize upstream text: decode HTML entities, strip tags, normalize
/// quotes, collapse whitespace. Sentence punctuation is kept — this text is
/// fed to translation and speech synthesis.
pub fn normalize_text(s: &str) -> String {
    let mut out = html_escape::decode_html_entities(s).to_string();

    static RE_TAGS: OnceCell<regex::Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").unwrap());
    out = re_tags.replace_all(&out, "").to_string();

    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").unwrap());
    out = re_ws.replace_all(&out, " ").trim().to_string();

    // Length cap keeps generation prompts bounded.
    if out.chars().count() > 6000 {
        out = out.chars().take(6000).collect();
    }
    out
}

/// Collect new articles for every query term, bounded by the store watermark
/// and filtered against ids the store already holds.
///
/// Each query yields a safe point: the highest id below which every id it
/// searched is accounted for (persisted earlier, accepted into this batch,
/// or rejected on quality grounds). The watermark candidate is the LOWEST of
/// those safe points — queries search different windows and cap how many new
/// articles they fetch per run, so advancing to any single query's point
/// could push the bound past an article another query surfaced but did not
/// fetch yet. Any upstream failure withholds the candidate entirely, so an
/// interrupted fetch never advances the watermark past an article that was
/// not retrieved.
pub async fn collect_new(
    source: &dyn ArticleSource,
    store: &RecordStore,
    queries: &[String],
    opts: &FetchOptions,
) -> FetchBatch {
    let watermark = store.watermark().map(|s| s.to_string());
    let mut articles: Vec<RawArticle> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut complete = true;
    let mut blocked = false;
    let mut candidate: Option<String> = None;

    for (qi, query) in queries.iter().enumerate() {
        if qi > 0 {
            tokio::time::sleep(opts.query_pause).await;
        }

        let retmax = opts.articles_per_query + OVERFETCH;
        let ids = match source.search_ids(query, retmax).await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = ?e, source = source.name(), %query, "search failed");
                counter!("harvest_source_errors_total").increment(1);
                complete = false;
                blocked = true;
                continue;
            }
        };
        counter!("harvest_ids_total").increment(ids.len() as u64);

        // Oldest-first within the searched window, bounded by the watermark.
        let mut passing: Vec<String> = ids
            .into_iter()
            .filter(|id| watermark.as_deref().map_or(true, |w| newer_than(id, w)))
            .collect();
        passing.sort_by(|a, b| id_cmp(a, b));
        passing.dedup();

        let to_fetch: Vec<String> = passing
            .iter()
            .filter(|id| {
                let known = store.exists(id) || seen.contains(id.as_str());
                if known {
                    counter!("harvest_known_total").increment(1);
                }
                !known
            })
            .take(opts.articles_per_query)
            .cloned()
            .collect();
        seen.extend(to_fetch.iter().cloned());

        let mut accepted: HashSet<String> = HashSet::new();
        let mut rejected: HashSet<String> = HashSet::new();

        if to_fetch.is_empty() {
            tracing::debug!(%query, "no new ids for query");
        } else {
            tokio::time::sleep(opts.call_pause).await;
            match source.fetch_details(&to_fetch).await {
                Ok(details) => {
                    let mut by_id: HashMap<String, ArticleDetail> =
                        details.into_iter().map(|d| (d.id.clone(), d)).collect();
                    for id in &to_fetch {
                        let Some(detail) = by_id.remove(id) else {
                            tracing::warn!(%id, %query, "source returned no detail for id");
                            complete = false;
                            continue;
                        };
                        let title = normalize_text(&detail.title);
                        let abstract_text = normalize_text(&detail.abstract_text);
                        if abstract_text.chars().count() < opts.min_abstract_chars {
                            tracing::info!(%id, %title, "abstract missing or too short; rejected");
                            counter!("harvest_short_total").increment(1);
                            rejected.insert(id.clone());
                            continue;
                        }
                        accepted.insert(id.clone());
                        articles.push(RawArticle {
                            id: id.clone(),
                            query: query.clone(),
                            url: detail.url,
                            title,
                            abstract_text,
                        });
                    }
                }
                Err(e) => {
                    tracing::warn!(error = ?e, source = source.name(), %query, "detail fetch failed");
                    counter!("harvest_source_errors_total").increment(1);
                    complete = false;
                    blocked = true;
                    continue;
                }
            }
        }

        // Per-query safe point: walk oldest-to-newest, stop at the first id
        // this run did not account for.
        let mut qcand: Option<&str> = None;
        for id in &passing {
            let processed = store.exists(id)
                || accepted.contains(id.as_str())
                || rejected.contains(id.as_str())
                // Accepted under an earlier query this pass.
                || articles.iter().any(|a| &a.id == id);
            if !processed {
                break;
            }
            qcand = Some(id);
        }
        if !passing.is_empty() {
            match qcand {
                // Keep the lowest safe point across queries.
                Some(q) => {
                    if candidate.as_deref().map_or(true, |c| newer_than(c, q)) {
                        candidate = Some(q.to_string());
                    }
                }
                // Nothing in this query's window was accounted for; no
                // advance is safe.
                None => blocked = true,
            }
        }
    }

    counter!("harvest_kept_total").increment(articles.len() as u64);
    FetchBatch {
        articles,
        complete,
        watermark_candidate: if blocked { None } else { candidate },
    }
}
