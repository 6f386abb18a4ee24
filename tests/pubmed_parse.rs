// tests/pubmed_parse.rs
// EFetch XML parsing against a captured-shape fixture: labelled abstract
// sections, inline markup in titles, and citation-vs-reference PMIDs.

use biomed_digest::fetch::pubmed::parse_efetch_xml;

const FIXTURE: &str = include_str!("fixtures/efetch.xml");

#[test]
fn parses_all_articles_with_citation_pmids() {
    let out = parse_efetch_xml(FIXTURE).unwrap();
    let ids: Vec<&str> = out.iter().map(|a| a.id.as_str()).collect();
    assert_eq!(ids, vec!["40000001", "40000002", "40000003"]);
}

#[test]
fn title_keeps_inline_markup_text_and_entities() {
    let out = parse_efetch_xml(FIXTURE).unwrap();
    assert_eq!(
        out[0].title,
        "Deep learning for early detection of EGFR-mutant lung cancer & treatment response."
    );
}

#[test]
fn labelled_sections_join_with_label_prefixes() {
    let out = parse_efetch_xml(FIXTURE).unwrap();
    let lines: Vec<&str> = out[0].abstract_text.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].starts_with("BACKGROUND: "));
    assert!(lines[1].starts_with("METHODS: "));
    assert!(lines[2].starts_with("RESULTS: "));
}

#[test]
fn unlabelled_abstract_has_no_prefix() {
    let out = parse_efetch_xml(FIXTURE).unwrap();
    assert!(out[1].abstract_text.starts_with("Continuous glucose"));
    assert!(!out[1].abstract_text.contains(": "));
}

#[test]
fn missing_abstract_comes_back_empty() {
    let out = parse_efetch_xml(FIXTURE).unwrap();
    assert_eq!(out[2].abstract_text, "");
}

#[test]
fn reference_pmids_do_not_leak_into_ids() {
    let out = parse_efetch_xml(FIXTURE).unwrap();
    assert!(out.iter().all(|a| a.id != "39999999"));
}

#[test]
fn urls_point_at_pubmed() {
    let out = parse_efetch_xml(FIXTURE).unwrap();
    assert_eq!(out[0].url, "https://pubmed.ncbi.nlm.nih.gov/40000001/");
}
