// tests/fetch_collect.rs
// Watermark bounding, store dedup, quality floor, and partial-fetch
// signalling in fetch::collect_new.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;

use biomed_digest::fetch::{collect_new, ArticleDetail, ArticleSource, FetchOptions};
use biomed_digest::record::{ArticleRecord, RawArticle, RecordStatus};
use biomed_digest::store::RecordStore;

const LONG_ABSTRACT: &str = "A sufficiently long abstract describing the study design, methods, and principal results in enough detail to narrate.";

fn detail(id: &str, abstract_text: &str) -> ArticleDetail {
    ArticleDetail {
        id: id.to_string(),
        title: format!("Title {id}"),
        abstract_text: abstract_text.to_string(),
        url: format!("https://pubmed.ncbi.nlm.nih.gov/{id}/"),
    }
}

/// Source returning a fixed newest-first id list; detail retrieval can be
/// restricted to a subset or made to fail outright.
struct ScriptedSource {
    ids: Vec<String>,
    resolvable: Option<HashSet<String>>,
    short_ids: HashSet<String>,
    fail_search: bool,
    fail_details: bool,
    search_calls: AtomicUsize,
}

impl ScriptedSource {
    fn new(ids: &[&str]) -> Self {
        Self {
            ids: ids.iter().map(|s| s.to_string()).collect(),
            resolvable: None,
            short_ids: HashSet::new(),
            fail_search: false,
            fail_details: false,
            search_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ArticleSource for ScriptedSource {
    async fn search_ids(&self, _query: &str, retmax: usize) -> Result<Vec<String>> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_search {
            return Err(anyhow!("search down"));
        }
        Ok(self.ids.iter().take(retmax).cloned().collect())
    }

    async fn fetch_details(&self, ids: &[String]) -> Result<Vec<ArticleDetail>> {
        if self.fail_details {
            return Err(anyhow!("efetch down"));
        }
        Ok(ids
            .iter()
            .filter(|id| self.resolvable.as_ref().map_or(true, |r| r.contains(*id)))
            .map(|id| {
                if self.short_ids.contains(id) {
                    detail(id, "too short")
                } else {
                    detail(id, LONG_ABSTRACT)
                }
            })
            .collect())
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

/// Source answering each query with its own newest-first id list.
struct PerQuerySource {
    by_query: HashMap<String, Vec<String>>,
}

#[async_trait]
impl ArticleSource for PerQuerySource {
    async fn search_ids(&self, query: &str, retmax: usize) -> Result<Vec<String>> {
        Ok(self
            .by_query
            .get(query)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .take(retmax)
            .collect())
    }

    async fn fetch_details(&self, ids: &[String]) -> Result<Vec<ArticleDetail>> {
        Ok(ids.iter().map(|id| detail(id, LONG_ABSTRACT)).collect())
    }

    fn name(&self) -> &'static str {
        "per-query"
    }
}

fn opts(per_query: usize) -> FetchOptions {
    FetchOptions {
        articles_per_query: per_query,
        min_abstract_chars: 50,
        query_pause: Duration::ZERO,
        call_pause: Duration::ZERO,
    }
}

fn open_store(dir: &tempfile::TempDir) -> RecordStore {
    RecordStore::open(
        &dir.path().join("news.jsonl"),
        &dir.path().join("watermark.txt"),
    )
    .unwrap()
}

fn persisted(id: &str) -> ArticleRecord {
    let mut rec = ArticleRecord::from_raw(
        RawArticle {
            id: id.into(),
            query: "q".into(),
            url: format!("https://pubmed.ncbi.nlm.nih.gov/{id}/"),
            title: format!("Title {id}"),
            abstract_text: LONG_ABSTRACT.into(),
        },
        Utc::now(),
    );
    rec.status = RecordStatus::Narrated;
    rec
}

#[tokio::test]
async fn known_ids_are_filtered_even_past_the_watermark() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = open_store(&dir);
    store.upsert(persisted("40000001")).unwrap();

    let source = ScriptedSource::new(&["40000002", "40000001"]);
    let batch = collect_new(&source, &store, &["q".into()], &opts(5)).await;

    let ids: Vec<&str> = batch.articles.iter().map(|a| a.id.as_str()).collect();
    assert_eq!(ids, vec!["40000002"]);
    assert!(batch.complete);
    assert_eq!(batch.watermark_candidate.as_deref(), Some("40000002"));
}

#[tokio::test]
async fn watermark_bounds_the_search_window() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = open_store(&dir);
    store.set_watermark("40000003").unwrap();

    let source = ScriptedSource::new(&["40000004", "40000003", "40000002"]);
    let batch = collect_new(&source, &store, &["q".into()], &opts(5)).await;

    let ids: Vec<&str> = batch.articles.iter().map(|a| a.id.as_str()).collect();
    assert_eq!(ids, vec!["40000004"]);
}

#[tokio::test]
async fn partial_details_process_subset_and_hold_watermark_back() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);

    // Ten candidates, newest first; only the three oldest resolve.
    let ids: Vec<String> = (1..=10).rev().map(|i| format!("400001{i:02}")).collect();
    let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
    let mut source = ScriptedSource::new(&id_refs);
    source.resolvable = Some(
        ["40000101", "40000102", "40000103"]
            .iter()
            .map(|s| s.to_string())
            .collect(),
    );

    let batch = collect_new(&source, &store, &["q".into()], &opts(10)).await;
    let got: Vec<&str> = batch.articles.iter().map(|a| a.id.as_str()).collect();
    assert_eq!(got, vec!["40000101", "40000102", "40000103"]);
    assert!(!batch.complete);
    assert_eq!(batch.watermark_candidate.as_deref(), Some("40000103"));
}

#[tokio::test]
async fn short_abstracts_are_rejected_but_accounted_for() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);

    let mut source = ScriptedSource::new(&["40000002", "40000001"]);
    source.short_ids.insert("40000001".into());

    let batch = collect_new(&source, &store, &["q".into()], &opts(5)).await;
    let ids: Vec<&str> = batch.articles.iter().map(|a| a.id.as_str()).collect();
    assert_eq!(ids, vec!["40000002"]);
    assert!(batch.complete);
    // The rejected article is a deliberate drop, not a fetch failure, so the
    // watermark may pass it.
    assert_eq!(batch.watermark_candidate.as_deref(), Some("40000002"));
}

#[tokio::test]
async fn search_failure_is_nonfatal_and_freezes_the_watermark() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);

    let mut source = ScriptedSource::new(&["40000001"]);
    source.fail_search = true;

    let batch = collect_new(&source, &store, &["q".into()], &opts(5)).await;
    assert!(batch.articles.is_empty());
    assert!(!batch.complete);
    assert!(batch.watermark_candidate.is_none());
}

#[tokio::test]
async fn detail_failure_is_nonfatal_and_freezes_the_watermark() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);

    let mut source = ScriptedSource::new(&["40000001"]);
    source.fail_details = true;

    let batch = collect_new(&source, &store, &["q".into()], &opts(5)).await;
    assert!(batch.articles.is_empty());
    assert!(!batch.complete);
    assert!(batch.watermark_candidate.is_none());
}

#[tokio::test]
async fn same_id_across_queries_is_fetched_once() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);

    let source = ScriptedSource::new(&["40000001"]);
    let queries = vec!["q1".to_string(), "q2".to_string()];
    let batch = collect_new(&source, &store, &queries, &opts(5)).await;

    assert_eq!(source.search_calls.load(Ordering::SeqCst), 2);
    assert_eq!(batch.articles.len(), 1);
    assert_eq!(batch.articles[0].query, "q1");
}

#[tokio::test]
async fn watermark_advances_only_to_the_lowest_per_query_safe_point() {
    // One query sits on a newer window than the other. The per-query cap
    // leaves q2's newest article unfetched this run, so the watermark must
    // not follow q1 past it.
    let dir = tempfile::tempdir().unwrap();
    let mut store = open_store(&dir);

    let source = PerQuerySource {
        by_query: HashMap::from([
            ("q1".to_string(), vec!["40000200".to_string()]),
            (
                "q2".to_string(),
                vec!["40000180".to_string(), "40000150".to_string()],
            ),
        ]),
    };
    let queries = vec!["q1".to_string(), "q2".to_string()];

    let batch = collect_new(&source, &store, &queries, &opts(1)).await;
    let mut got: Vec<&str> = batch.articles.iter().map(|a| a.id.as_str()).collect();
    got.sort();
    assert_eq!(got, vec!["40000150", "40000200"]);
    assert_eq!(batch.watermark_candidate.as_deref(), Some("40000150"));

    let candidate = batch.watermark_candidate.clone().unwrap();
    for raw in batch.articles {
        let mut rec = ArticleRecord::from_raw(raw, Utc::now());
        rec.status = RecordStatus::Narrated;
        store.upsert(rec).unwrap();
    }
    store.set_watermark(&candidate).unwrap();

    // The unfetched article is still inside the next run's window.
    let batch = collect_new(&source, &store, &queries, &opts(1)).await;
    let ids: Vec<&str> = batch.articles.iter().map(|a| a.id.as_str()).collect();
    assert_eq!(ids, vec!["40000180"]);
}

#[tokio::test]
async fn raw_articles_carry_upstream_fields_and_query() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);
    let source = ScriptedSource::new(&["40000001"]);
    let batch = collect_new(&source, &store, &["cancer treatment".into()], &opts(1)).await;
    let a = &batch.articles[0];
    assert_eq!(a.url, "https://pubmed.ncbi.nlm.nih.gov/40000001/");
    assert_eq!(a.title, "Title 40000001");
    assert_eq!(a.query, "cancer treatment");
}
