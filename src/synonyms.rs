//! Synonym expansion of search keywords through the ontology graph.
//!
//! Each keyword is looked up with one query matching two patterns:
//!
//! 1. literal exact-synonym / alternative-label annotations on a node whose
//!    `rdfs:label` equals the keyword;
//! 2. the preferred label of any concept declared equivalent to a concept
//!    whose preferred label equals the keyword, in either direction.
//!
//! Queries run concurrently and the first failure aborts the expansion. The
//! union of every result is appended to the original keywords in sorted
//! order, so the expanded list does not depend on completion order.

use std::collections::BTreeSet;

use futures::future::try_join_all;

use crate::error::Result;
use crate::sparql::{self, escape_literal, SparqlClient};

#[derive(Debug, Clone)]
pub struct SynonymResolver {
    graph: SparqlClient,
}

impl SynonymResolver {
    pub fn new(graph: SparqlClient) -> Self {
        Self { graph }
    }

    /// Synonyms of one keyword, excluding the keyword itself.
    pub async fn synonyms(&self, keyword: &str) -> Result<BTreeSet<String>> {
        let bindings = self.graph.select(&synonym_query(keyword)).await?;
        Ok(bindings
            .iter()
            .filter_map(|b| sparql::value(b, "synonym"))
            .filter(|s| !s.is_empty() && *s != keyword)
            .map(str::to_string)
            .collect())
    }

    /// `keywords` followed by every synonym not already among them.
    pub async fn expand(&self, keywords: &[String]) -> Result<Vec<String>> {
        let found = try_join_all(keywords.iter().map(|k| self.synonyms(k))).await?;
        let union: BTreeSet<String> = found.into_iter().flatten().collect();

        let mut expanded = keywords.to_vec();
        for synonym in union {
            if !expanded.contains(&synonym) {
                expanded.push(synonym);
            }
        }
        tracing::debug!(
            keywords = keywords.len(),
            expanded = expanded.len(),
            "expanded keywords with synonyms"
        );
        Ok(expanded)
    }
}

pub fn synonym_query(keyword: &str) -> String {
    let kw = escape_literal(keyword);
    format!(
        r#"PREFIX rdfs: <http://www.w3.org/2000/01/rdf-schema#>
PREFIX owl: <http://www.w3.org/2002/07/owl#>
PREFIX skos: <http://www.w3.org/2004/02/skos/core#>
PREFIX oboInOwl: <http://www.geneontology.org/formats/oboInOwl#>
SELECT DISTINCT ?synonym WHERE {{
  {{
    ?node rdfs:label ?label .
    FILTER(str(?label) = "{kw}")
    VALUES ?property {{ oboInOwl:hasExactSynonym skos:altLabel }}
    ?node ?property ?synonym .
    FILTER(isLiteral(?synonym))
  }}
  UNION
  {{
    ?concept skos:prefLabel ?label .
    FILTER(str(?label) = "{kw}")
    ?concept (owl:sameAs|^owl:sameAs|skos:exactMatch|^skos:exactMatch) ?other .
    ?other skos:prefLabel ?synonym .
  }}
}}"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_embeds_escaped_keyword_in_both_patterns() {
        let q = synonym_query(r#"sea "ice""#);
        assert_eq!(q.matches(r#"FILTER(str(?label) = "sea \"ice\"")"#).count(), 2);
        assert!(q.contains("UNION"));
        assert!(q.contains("oboInOwl:hasExactSynonym"));
        assert!(q.contains("owl:sameAs"));
    }

    #[test]
    fn equivalence_is_followed_both_ways() {
        let q = synonym_query("ocean");
        assert!(q.contains("^owl:sameAs"));
        assert!(q.contains("^skos:exactMatch"));
    }
}
