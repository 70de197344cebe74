//! Percolation tagging.
//!
//! A document "has" an ontology term when the term's stored phrase query
//! matches the document's title or extracted contents. The terms index holds
//! one such query per label, so a single percolate call returns every
//! matching term.

use serde::Deserialize;
use serde_json::{json, Value};

use crate::config::SearchConfig;
use crate::error::{validate, Result};
use crate::index_client::IndexClient;
use crate::models::IndexedDocumentTerm;

#[derive(Debug, Deserialize)]
struct PercolateResponse {
    hits: PercolateHits,
}

#[derive(Debug, Deserialize)]
struct PercolateHits {
    hits: Vec<PercolateHit>,
}

#[derive(Debug, Deserialize)]
struct PercolateHit {
    #[serde(rename = "_source")]
    source: IndexedDocumentTerm,
}

#[derive(Debug, Clone)]
pub struct Tagger {
    index: IndexClient,
    terms_index: String,
    from: usize,
    size: usize,
}

impl Tagger {
    pub fn new(index: IndexClient, terms_index: &str, size: usize) -> Self {
        Self {
            index,
            terms_index: terms_index.to_string(),
            from: 0,
            size,
        }
    }

    pub fn from_config(index: IndexClient, config: &SearchConfig) -> Self {
        Self::new(index, &config.terms_index, config.percolate_size)
    }

    /// Every term whose query matches `title` or `contents`.
    pub async fn tag(&self, title: Option<&str>, contents: Option<&str>) -> Result<Vec<IndexedDocumentTerm>> {
        let document = json!({
            "title": title.unwrap_or_default(),
            "contents": contents.unwrap_or_default(),
        });
        let resp = self
            .index
            .percolate(&self.terms_index, &document, self.from, self.size)
            .await?;
        terms_from_response(resp)
    }
}

/// Map percolate hits to tags, one per hit. No hits is an empty list.
pub fn terms_from_response(resp: Value) -> Result<Vec<IndexedDocumentTerm>> {
    let parsed: PercolateResponse = validate("percolate", resp)?;
    Ok(parsed.hits.hits.into_iter().map(|h| h.source).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn zero_hits_is_an_untagged_document() {
        let resp = json!({"hits": {"total": {"value": 0}, "hits": []}});
        assert!(terms_from_response(resp).unwrap().is_empty());
    }

    #[test]
    fn each_hit_becomes_one_term() {
        let resp = json!({"hits": {"hits": [
            {"_id": "1", "_source": {
                "label": "seawater", "uri": "http://example.org/seawater",
                "source_terminology": "eov", "namedGraphUri": "http://g/eov",
                "suggest": ["seawater"], "query": {"match_all": {}}
            }},
            {"_id": "2", "_source": {
                "label": "sea ice", "uri": "http://example.org/sea-ice",
                "source_terminology": "eov", "namedGraphUri": "http://g/eov"
            }}
        ]}});
        let terms = terms_from_response(resp).unwrap();
        assert_eq!(terms.len(), 2);
        assert_eq!(terms[0].label, "seawater");
        assert_eq!(terms[1].uri, "http://example.org/sea-ice");
        assert_eq!(terms[1].named_graph_uri, "http://g/eov");
        assert_eq!(terms[1].source_terminology, "eov");
    }

    #[test]
    fn malformed_response_is_a_validation_error() {
        let err = terms_from_response(json!({"hits": {"hits": [{"_id": "1"}]}})).unwrap_err();
        assert!(matches!(err, Error::Validation { context: "percolate", .. }));
    }
}
