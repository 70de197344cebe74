//! Keyword search and term suggestions.
//!
//! [`parse_params`] turns the public endpoint's query parameters into
//! [`SearchOptions`]. Parameter names follow the public API:
//!
//! | Parameter | Meaning |
//! |-----------|---------|
//! | `keywords` | comma-separated keywords (required) |
//! | `term` / `terms` | comma-separated term labels to filter on |
//! | `termURI` / `termURIs` | comma-separated term URIs to filter on |
//! | `from`, `size` | result window |
//! | `sort` | comma-separated `field:direction` pairs |
//! | `fields` | comma-separated fields searched by the keywords |
//! | `synonyms`, `refereed`, `endorsed` | boolean flags |
//!
//! A request without keywords, or with an unparsable number, yields `None`;
//! the server answers that with an empty JSON object and HTTP 200.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::SearchConfig;
use crate::error::{validate, Result};
use crate::index_client::{IndexClient, SearchResponse};
use crate::models::SearchOptions;
use crate::query::build_search_body;
use crate::synonyms::SynonymResolver;

/// Parse endpoint parameters. `None` means "answer with an empty result".
pub fn parse_params(params: &HashMap<String, String>) -> Option<SearchOptions> {
    let keywords = list(params.get("keywords"));
    if keywords.is_empty() {
        return None;
    }

    let mut opts = SearchOptions {
        keywords,
        terms: first_list(params, &["term", "terms"]),
        term_uris: first_list(params, &["termURI", "termURIs"]),
        sort: list(params.get("sort")),
        synonyms: flag(params.get("synonyms")),
        refereed: flag(params.get("refereed")),
        endorsed: flag(params.get("endorsed")),
        ..SearchOptions::default()
    };
    if let Some(from) = params.get("from") {
        opts.from = from.trim().parse().ok()?;
    }
    if let Some(size) = params.get("size") {
        opts.size = size.trim().parse().ok()?;
    }
    let fields = list(params.get("fields"));
    if !fields.is_empty() {
        opts.fields = fields;
    }
    Some(opts)
}

fn list(raw: Option<&String>) -> Vec<String> {
    raw.map(|s| {
        s.split(',')
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

fn first_list(params: &HashMap<String, String>, names: &[&str]) -> Vec<String> {
    names
        .iter()
        .map(|n| list(params.get(*n)))
        .find(|v| !v.is_empty())
        .unwrap_or_default()
}

/// A bare `?refereed` counts as set.
fn flag(raw: Option<&String>) -> bool {
    match raw.map(|s| s.trim().to_ascii_lowercase()) {
        Some(v) => matches!(v.as_str(), "" | "1" | "true" | "yes" | "on"),
        None => false,
    }
}

/// One completion suggestion: a label and every term URI carrying it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Suggestion {
    pub label: String,
    pub uris: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SuggestResponse {
    suggest: SuggestGroups,
}

#[derive(Debug, Deserialize)]
struct SuggestGroups {
    terms: Vec<SuggestEntry>,
}

#[derive(Debug, Deserialize)]
struct SuggestEntry {
    options: Vec<SuggestOption>,
}

#[derive(Debug, Deserialize)]
struct SuggestOption {
    #[serde(rename = "_source")]
    source: SuggestSource,
}

#[derive(Debug, Deserialize)]
struct SuggestSource {
    label: String,
    #[serde(default)]
    uri: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Searcher {
    index: IndexClient,
    documents_index: String,
    terms_index: String,
    synonyms: Option<SynonymResolver>,
}

impl Searcher {
    pub fn new(index: IndexClient, config: &SearchConfig, synonyms: Option<SynonymResolver>) -> Self {
        Self {
            index,
            documents_index: config.documents_index.clone(),
            terms_index: config.terms_index.clone(),
            synonyms,
        }
    }

    /// Run a keyword search and return the store's response.
    ///
    /// With `synonyms` set and a resolver configured, keywords are expanded
    /// first; any expansion failure fails the search.
    pub async fn search(&self, mut opts: SearchOptions) -> Result<Value> {
        if opts.synonyms {
            match &self.synonyms {
                Some(resolver) => opts.keywords = resolver.expand(&opts.keywords).await?,
                None => tracing::warn!("synonym expansion requested but no graph store is configured"),
            }
        }
        let body = build_search_body(&opts);
        let resp = self.index.search(&self.documents_index, &body).await?;
        let parsed: SearchResponse = validate("search", resp.clone())?;
        tracing::debug!(
            keywords = ?opts.keywords,
            total = parsed.hits.total_value(),
            "search finished"
        );
        Ok(resp)
    }

    pub async fn suggest(&self, prefix: &str, size: usize) -> Result<Vec<Suggestion>> {
        let prefix = prefix.trim();
        if prefix.is_empty() {
            return Ok(Vec::new());
        }
        let resp = self.index.suggest(&self.terms_index, prefix, size).await?;
        suggestions_from_response(resp)
    }
}

/// Group completion options by label, keeping first-seen order.
pub fn suggestions_from_response(resp: Value) -> Result<Vec<Suggestion>> {
    let parsed: SuggestResponse = validate("suggest", resp)?;
    let mut out: Vec<Suggestion> = Vec::new();
    for option in parsed.suggest.terms.into_iter().flat_map(|e| e.options) {
        let SuggestSource { label, uri } = option.source;
        let pos = match out.iter().position(|s| s.label == label) {
            Some(pos) => pos,
            None => {
                out.push(Suggestion {
                    label,
                    uris: Vec::new(),
                });
                out.len() - 1
            }
        };
        if let Some(uri) = uri {
            if !out[pos].uris.contains(&uri) {
                out[pos].uris.push(uri);
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn missing_or_blank_keywords_yield_none() {
        assert!(parse_params(&params(&[])).is_none());
        assert!(parse_params(&params(&[("keywords", " , ")])).is_none());
        assert!(parse_params(&params(&[("term", "alpha")])).is_none());
    }

    #[test]
    fn full_parameter_set_is_parsed() {
        let opts = parse_params(&params(&[
            ("keywords", "ocean, sea"),
            ("term", "alpha,beta"),
            ("termURI", "uri://alpha"),
            ("from", "10"),
            ("size", "5"),
            ("sort", "title:asc,date:desc"),
            ("fields", "title"),
            ("synonyms", "true"),
            ("refereed", ""),
            ("endorsed", "false"),
        ]))
        .unwrap();
        assert_eq!(opts.keywords, vec!["ocean", "sea"]);
        assert_eq!(opts.terms, vec!["alpha", "beta"]);
        assert_eq!(opts.term_uris, vec!["uri://alpha"]);
        assert_eq!((opts.from, opts.size), (10, 5));
        assert_eq!(opts.sort, vec!["title:asc", "date:desc"]);
        assert_eq!(opts.fields, vec!["title"]);
        assert!(opts.synonyms);
        assert!(opts.refereed);
        assert!(!opts.endorsed);
    }

    #[test]
    fn plural_aliases_are_accepted() {
        let opts = parse_params(&params(&[("keywords", "ocean"), ("terms", "alpha"), ("termURIs", "u")])).unwrap();
        assert_eq!(opts.terms, vec!["alpha"]);
        assert_eq!(opts.term_uris, vec!["u"]);
    }

    #[test]
    fn defaults_apply_and_bad_numbers_reject() {
        let opts = parse_params(&params(&[("keywords", "ocean")])).unwrap();
        assert_eq!(opts.size, 20);
        assert_eq!(opts.fields, vec!["_bitstreamText", "title"]);
        assert!(parse_params(&params(&[("keywords", "ocean"), ("size", "many")])).is_none());
    }

    #[test]
    fn suggestions_group_uris_by_label() {
        let resp = json!({
            "suggest": { "terms": [{ "text": "sea", "options": [
                { "text": "seawater", "_source": { "label": "seawater", "uri": "u1" } },
                { "text": "seawater", "_source": { "label": "seawater", "uri": "u2" } },
                { "text": "sea ice", "_source": { "label": "sea ice", "uri": "u3" } },
                { "text": "seawater", "_source": { "label": "seawater", "uri": "u1" } }
            ]}]}
        });
        let out = suggestions_from_response(resp).unwrap();
        assert_eq!(
            out,
            vec![
                Suggestion { label: "seawater".into(), uris: vec!["u1".into(), "u2".into()] },
                Suggestion { label: "sea ice".into(), uris: vec!["u3".into()] },
            ]
        );
    }

    #[test]
    fn malformed_suggest_response_is_a_validation_error() {
        let err = suggestions_from_response(json!({ "hits": {} })).unwrap_err();
        assert!(matches!(err, crate::error::Error::Validation { .. }));
    }
}
