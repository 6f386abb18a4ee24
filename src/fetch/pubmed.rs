// src/fetch/pubmed.rs
//! NCBI Entrez E-utilities source: ESearch (JSON) for PMIDs, EFetch (XML)
//! for titles and abstracts. EFetch article titles and abstracts carry mixed
//! inline markup, so parsing walks quick-xml events and accumulates text the
//! way `itertext` would, instead of deserializing a rigid struct tree.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use metrics::{counter, histogram};
use quick_xml::events::Event;
use quick_xml::Reader;
use serde::Deserialize;

use crate::fetch::{ArticleDetail, ArticleSource};

pub const EUTILS_BASE_URL: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils";

/// Query marker meaning "newest PubMed articles, no topic". Mapped to the
/// `pubmed[sb]` catch-all search term.
pub const LATEST_ARTICLES_MARKER: &str = "__latest__";
const LATEST_ARTICLES_TERM: &str = "pubmed[sb]";

pub fn article_url(pmid: &str) -> String {
    format!("https://pubmed.ncbi.nlm.nih.gov/{pmid}/")
}

pub struct PubMedSource {
    http: reqwest::Client,
    base_url: String,
    /// Optional NCBI API key; raises the allowed request rate.
    api_key: Option<String>,
}

impl PubMedSource {
    pub fn new(api_key: Option<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent("biomed-digest/0.1 (+github.com/biomed-digest/biomed-digest)")
            .connect_timeout(Duration::from_secs(4))
            .timeout(Duration::from_secs(20))
            .build()
            .context("building http client")?;
        Ok(Self {
            http,
            base_url: EUTILS_BASE_URL.to_string(),
            api_key,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ESearchResponse {
    esearchresult: ESearchResult,
}

#[derive(Debug, Deserialize)]
struct ESearchResult {
    #[serde(default)]
    idlist: Vec<String>,
}

#[async_trait]
impl ArticleSource for PubMedSource {
    async fn search_ids(&self, query: &str, retmax: usize) -> Result<Vec<String>> {
        let term = if query == LATEST_ARTICLES_MARKER {
            LATEST_ARTICLES_TERM
        } else {
            query
        };
        let retmax = retmax.to_string();
        let mut params: Vec<(&str, &str)> = vec![
            ("db", "pubmed"),
            ("term", term),
            ("retmode", "json"),
            ("retmax", &retmax),
            ("sort", "date"),
        ];
        if let Some(key) = &self.api_key {
            params.push(("api_key", key));
        }

        let resp = self
            .http
            .get(format!("{}/esearch.fcgi", self.base_url))
            .query(&params)
            .send()
            .await
            .context("esearch send")?
            .error_for_status()
            .context("esearch status")?;
        let body: ESearchResponse = resp.json().await.context("esearch json")?;
        Ok(body.esearchresult.idlist)
    }

    async fn fetch_details(&self, ids: &[String]) -> Result<Vec<ArticleDetail>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let joined = ids.join(",");
        let mut params: Vec<(&str, &str)> = vec![
            ("db", "pubmed"),
            ("id", &joined),
            ("retmode", "xml"),
            ("rettype", "abstract"),
        ];
        if let Some(key) = &self.api_key {
            params.push(("api_key", key));
        }

        let body = self
            .http
            .get(format!("{}/efetch.fcgi", self.base_url))
            .query(&params)
            .send()
            .await
            .context("efetch send")?
            .error_for_status()
            .context("efetch status")?
            .text()
            .await
            .context("efetch body")?;

        parse_efetch_xml(&body)
    }

    fn name(&self) -> &'static str {
        "PubMed"
    }
}

#[derive(Default)]
struct PendingArticle {
    pmid: String,
    title: String,
    abstract_parts: Vec<String>,
}

/// Parse an EFetch `PubmedArticleSet` document into article details.
/// Abstract sections keep their `Label` attribute as a `LABEL: text` prefix;
/// articles without a PMID are skipped, articles without an abstract come
/// back with an empty one (the caller applies the quality floor).
pub fn parse_efetch_xml(xml: &str) -> Result<Vec<ArticleDetail>> {
    let t0 = std::time::Instant::now();
    let mut reader = Reader::from_str(xml);

    let mut out = Vec::new();
    let mut cur: Option<PendingArticle> = None;
    let mut in_pmid = false;
    let mut in_title = false;
    let mut in_abstract_text = false;
    let mut section_label: Option<String> = None;
    let mut section_text = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"PubmedArticle" => cur = Some(PendingArticle::default()),
                // The citation PMID is the first one in document order;
                // later PMIDs (references, corrections) are ignored.
                b"PMID" => {
                    if let Some(c) = &cur {
                        in_pmid = c.pmid.is_empty();
                    }
                }
                b"ArticleTitle" => in_title = cur.is_some(),
                b"AbstractText" => {
                    if cur.is_some() {
                        in_abstract_text = true;
                        section_text.clear();
                        section_label = e
                            .try_get_attribute("Label")
                            .context("reading Label attribute")?
                            .map(|a| {
                                a.unescape_value()
                                    .map(|v| v.trim().to_string())
                                    .unwrap_or_default()
                            })
                            .filter(|l| !l.is_empty());
                    }
                }
                _ => {}
            },
            Ok(Event::Text(t)) => {
                let text = t.unescape().context("unescaping text")?;
                if let Some(c) = cur.as_mut() {
                    if in_pmid {
                        c.pmid.push_str(text.trim());
                    } else if in_title {
                        c.title.push_str(&text);
                    } else if in_abstract_text {
                        section_text.push_str(&text);
                    }
                }
            }
            Ok(Event::CData(t)) => {
                let text = String::from_utf8_lossy(&t.into_inner()).into_owned();
                if let Some(c) = cur.as_mut() {
                    if in_title {
                        c.title.push_str(&text);
                    } else if in_abstract_text {
                        section_text.push_str(&text);
                    }
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"PMID" => in_pmid = false,
                b"ArticleTitle" => in_title = false,
                b"AbstractText" => {
                    if in_abstract_text {
                        in_abstract_text = false;
                        let text = section_text.trim().to_string();
                        if !text.is_empty() {
                            if let Some(c) = cur.as_mut() {
                                match section_label.take() {
                                    Some(label) => {
                                        c.abstract_parts.push(format!("{label}: {text}"))
                                    }
                                    None => c.abstract_parts.push(text),
                                }
                            }
                        }
                        section_label = None;
                    }
                }
                b"PubmedArticle" => {
                    if let Some(c) = cur.take() {
                        if c.pmid.is_empty() {
                            tracing::warn!("efetch article without PMID; skipped");
                            counter!("harvest_source_errors_total").increment(1);
                            continue;
                        }
                        out.push(ArticleDetail {
                            url: article_url(&c.pmid),
                            id: c.pmid,
                            title: c.title.trim().to_string(),
                            abstract_text: c.abstract_parts.join("\n"),
                        });
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(e).context("parsing efetch xml"),
            _ => {}
        }
    }

    histogram!("harvest_parse_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
    Ok(out)
}
