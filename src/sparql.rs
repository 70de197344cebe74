//! SPARQL client for the ontology graph store.
//!
//! Queries are sent form-encoded (`query=...`) and answered with the
//! standard JSON results format, from which only `results.bindings` is
//! read.

use std::collections::HashMap;

use serde::Deserialize;

use crate::config::GraphConfig;
use crate::error::{validate, Result};
use crate::http::{build_client, read_json};

const SERVICE: &str = "graph store";

/// One bound value in a result row.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RdfTerm {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
}

/// A result row: variable name → bound value.
pub type Binding = HashMap<String, RdfTerm>;

#[derive(Debug, Deserialize)]
struct SelectResponse {
    results: SelectResults,
}

#[derive(Debug, Deserialize)]
struct SelectResults {
    bindings: Vec<Binding>,
}

#[derive(Debug, Clone)]
pub struct SparqlClient {
    http: reqwest::Client,
    endpoint: String,
}

impl SparqlClient {
    pub fn new(endpoint: &str, timeout_secs: u64) -> Result<Self> {
        Ok(Self {
            http: build_client(timeout_secs)?,
            endpoint: endpoint.to_string(),
        })
    }

    pub fn from_config(config: &GraphConfig) -> Result<Self> {
        Self::new(&config.endpoint, config.timeout_secs)
    }

    /// Run a `SELECT` query and return its bindings.
    pub async fn select(&self, query: &str) -> Result<Vec<Binding>> {
        let resp = self
            .http
            .post(&self.endpoint)
            .header("accept", "application/sparql-results+json")
            .form(&[("query", query)])
            .send()
            .await?;
        let parsed: SelectResponse = validate("sparql select", read_json(resp, SERVICE).await?)?;
        Ok(parsed.results.bindings)
    }
}

/// Value of `var` in `binding`, if bound.
pub fn value<'a>(binding: &'a Binding, var: &str) -> Option<&'a str> {
    binding.get(var).map(|t| t.value.as_str())
}

/// Escape a string for use inside a double-quoted SPARQL literal.
pub fn escape_literal(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_quotes_and_backslashes() {
        assert_eq!(escape_literal(r#"a "b" \c"#), r#"a \"b\" \\c"#);
        assert_eq!(escape_literal("line\nbreak"), "line\\nbreak");
    }

    #[test]
    fn reads_bound_values() {
        let raw = serde_json::json!({
            "label": {"type": "literal", "value": "seawater"},
            "uri": {"type": "uri", "value": "http://example.org/seawater"}
        });
        let b: Binding = serde_json::from_value(raw).unwrap();
        assert_eq!(value(&b, "label"), Some("seawater"));
        assert_eq!(value(&b, "missing"), None);
    }
}
