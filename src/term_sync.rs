//! Ontology → terms index synchronization.
//!
//! Mirrors each configured terminology from the graph store into the terms
//! index, in full, on demand. Pagination is strictly sequential:
//!
//! ```text
//! offset = 0
//! loop:
//!     page = SELECT ... LIMIT page_size OFFSET offset
//!     if page is empty: stop
//!     bulk-index the page minus short labels and stopwords
//!     offset += raw page size
//! ```
//!
//! The offset tracks the graph store's cursor, so it always advances by the
//! raw page size even when filtering drops terms. Any failed request aborts
//! the sync; a rerun starts from zero and overwrites, because term ids are
//! deterministic.

use std::collections::HashSet;

use serde::Serialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::config::{Config, TerminologyConfig};
use crate::error::{Error, Result};
use crate::index_client::{BulkOperation, IndexClient};
use crate::models::Term;
use crate::progress::{SyncProgressEvent, SyncProgressReporter};
use crate::sparql::{self, Binding, SparqlClient};

/// A terminology with its listing query resolved.
#[derive(Debug, Clone)]
pub struct Terminology {
    pub name: String,
    pub named_graph: String,
    pub query: String,
}

impl Terminology {
    pub fn from_config(config: &TerminologyConfig) -> Result<Self> {
        let query = config
            .query_template()
            .map_err(|e| Error::Config(format!("{:#}", e)))?;
        Ok(Self {
            name: config.name.clone(),
            named_graph: config.named_graph.clone(),
            query,
        })
    }
}

/// Outcome of syncing one terminology.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub terminology: String,
    /// Raw bindings returned by the graph store.
    pub fetched: u64,
    /// Terms written to the index after filtering.
    pub indexed: u64,
    pub pages: u64,
}

pub struct TermSyncer {
    graph: SparqlClient,
    index: IndexClient,
    terms_index: String,
    page_size: usize,
    stopwords: HashSet<String>,
}

impl TermSyncer {
    pub fn new(
        graph: SparqlClient,
        index: IndexClient,
        terms_index: &str,
        page_size: usize,
        stopwords: &[String],
    ) -> Self {
        Self {
            graph,
            index,
            terms_index: terms_index.to_string(),
            page_size,
            stopwords: stopwords.iter().map(|s| s.to_lowercase()).collect(),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(
            SparqlClient::from_config(&config.graph)?,
            IndexClient::from_config(&config.search)?,
            &config.search.terms_index,
            config.graph.page_size,
            &config.graph.stopwords,
        ))
    }

    /// Sync every terminology, in order. Stops at the first failure.
    pub async fn sync_all(
        &self,
        terminologies: &[Terminology],
        progress: &dyn SyncProgressReporter,
    ) -> Result<Vec<SyncReport>> {
        let mut reports = Vec::with_capacity(terminologies.len());
        for t in terminologies {
            reports.push(self.sync(t, progress).await?);
        }
        Ok(reports)
    }

    pub async fn sync(
        &self,
        terminology: &Terminology,
        progress: &dyn SyncProgressReporter,
    ) -> Result<SyncReport> {
        let mut report = SyncReport {
            terminology: terminology.name.clone(),
            ..Default::default()
        };
        let mut offset = 0u64;

        loop {
            progress.report(SyncProgressEvent::Paging {
                terminology: terminology.name.clone(),
                offset,
            });
            let query = page_query(&terminology.query, self.page_size, offset);
            let bindings = self.graph.select(&query).await?;
            if bindings.is_empty() {
                break;
            }

            let raw = bindings.len() as u64;
            let terms = filter_terms(&bindings, &self.stopwords);
            if !terms.is_empty() {
                let ops: Vec<BulkOperation> = terms
                    .iter()
                    .map(|term| BulkOperation::Index {
                        index: self.terms_index.clone(),
                        id: term_id(&terminology.named_graph, term),
                        document: term_document(term, terminology),
                    })
                    .collect();
                self.index.bulk(&ops).await?;
            }

            report.pages += 1;
            report.fetched += raw;
            report.indexed += terms.len() as u64;
            offset += raw;

            progress.report(SyncProgressEvent::Loaded {
                terminology: terminology.name.clone(),
                fetched: report.fetched,
                indexed: report.indexed,
            });
            tracing::debug!(
                terminology = %terminology.name,
                offset,
                kept = terms.len(),
                "term page loaded"
            );
        }

        tracing::info!(
            terminology = %terminology.name,
            fetched = report.fetched,
            indexed = report.indexed,
            "terminology synced"
        );
        Ok(report)
    }

    /// Remove every term of one named graph. Returns how many were deleted.
    pub async fn prune_terminology(&self, named_graph: &str) -> Result<u64> {
        let deleted = self
            .index
            .delete_by_query(&self.terms_index, &json!({ "term": { "namedGraphUri": named_graph } }))
            .await?;
        self.index.refresh(&self.terms_index).await?;
        tracing::info!(named_graph, deleted, "pruned terminology");
        Ok(deleted)
    }
}

/// Append the page window to a listing query.
pub fn page_query(template: &str, limit: usize, offset: u64) -> String {
    format!("{}\nLIMIT {} OFFSET {}", template.trim_end(), limit, offset)
}

/// Keep bindings with a usable label, dropping duplicates within the page.
///
/// A label is unusable if it is two characters or shorter, or a stopword.
pub fn filter_terms(bindings: &[Binding], stopwords: &HashSet<String>) -> Vec<Term> {
    let mut seen = HashSet::new();
    let mut terms = Vec::new();
    for b in bindings {
        let (Some(label), Some(uri)) = (sparql::value(b, "label"), sparql::value(b, "uri")) else {
            continue;
        };
        if label.chars().count() <= 2 || stopwords.contains(&label.to_lowercase()) {
            continue;
        }
        let term = Term {
            label: label.to_string(),
            uri: uri.to_string(),
        };
        if seen.insert(term.clone()) {
            terms.push(term);
        }
    }
    terms
}

/// Hex SHA-256 of `namedGraphUri|uri|label`.
pub fn term_id(named_graph: &str, term: &Term) -> String {
    let mut hasher = Sha256::new();
    hasher.update(named_graph.as_bytes());
    hasher.update(b"|");
    hasher.update(term.uri.as_bytes());
    hasher.update(b"|");
    hasher.update(term.label.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// The stored percolator document for one term.
pub fn term_document(term: &Term, terminology: &Terminology) -> Value {
    json!({
        "label": term.label,
        "suggest": [term.label],
        "query": {
            "multi_match": {
                "query": term.label,
                "type": "phrase",
                "fields": ["contents", "title"],
            }
        },
        "source_terminology": terminology.name,
        "namedGraphUri": terminology.named_graph,
        "uri": term.uri,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binding(label: &str) -> Binding {
        serde_json::from_value(json!({
            "label": {"type": "literal", "value": label},
            "uri": {"type": "uri", "value": format!("http://example.org/{}", label)}
        }))
        .unwrap()
    }

    fn stopwords() -> HashSet<String> {
        ["the".to_string()].into_iter().collect()
    }

    #[test]
    fn short_labels_and_stopwords_are_dropped() {
        let page: Vec<Binding> = ["ok", "a", "seawater", "the"].iter().map(|l| binding(l)).collect();
        let labels: Vec<String> = filter_terms(&page, &stopwords())
            .into_iter()
            .map(|t| t.label)
            .collect();
        assert_eq!(labels, ["ok", "seawater"]);
    }

    #[test]
    fn stopwords_match_case_insensitively() {
        let page = vec![binding("The"), binding("ocean")];
        assert_eq!(filter_terms(&page, &stopwords()).len(), 1);
    }

    #[test]
    fn duplicates_within_a_page_collapse() {
        let page = vec![binding("ocean"), binding("ocean")];
        assert_eq!(filter_terms(&page, &stopwords()).len(), 1);
    }

    #[test]
    fn bindings_without_uri_are_skipped() {
        let b: Binding =
            serde_json::from_value(json!({"label": {"type": "literal", "value": "ocean"}})).unwrap();
        assert!(filter_terms(&[b], &stopwords()).is_empty());
    }

    #[test]
    fn page_query_appends_window() {
        assert_eq!(
            page_query("SELECT ?label ?uri WHERE { }\n", 500, 1000),
            "SELECT ?label ?uri WHERE { }\nLIMIT 500 OFFSET 1000"
        );
    }

    #[test]
    fn term_ids_are_deterministic_and_scoped_by_graph() {
        let term = Term {
            label: "seawater".into(),
            uri: "http://example.org/seawater".into(),
        };
        let a = term_id("http://g/1", &term);
        assert_eq!(a, term_id("http://g/1", &term));
        assert_ne!(a, term_id("http://g/2", &term));
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn term_document_wraps_phrase_query() {
        let t = Terminology {
            name: "eov".into(),
            named_graph: "http://g/eov".into(),
            query: String::new(),
        };
        let term = Term {
            label: "sea ice".into(),
            uri: "http://example.org/sea-ice".into(),
        };
        let doc = term_document(&term, &t);
        assert_eq!(doc["suggest"], json!(["sea ice"]));
        assert_eq!(doc["query"]["multi_match"]["type"], "phrase");
        assert_eq!(doc["query"]["multi_match"]["fields"], json!(["contents", "title"]));
        assert_eq!(doc["namedGraphUri"], "http://g/eov");
        assert_eq!(doc["source_terminology"], "eov");
    }
}
