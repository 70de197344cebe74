//! Keyword search query construction.
//!
//! [`build_search_body`] is a pure translation from [`SearchOptions`] to the
//! index store's query DSL:
//!
//! - keywords → one `query_string` clause in `must`, each keyword quoted as
//!   a phrase and OR-combined;
//! - `terms` / `term_uris` → nested filters on `_terms.label` / `_terms.uri`;
//! - `refereed` / `endorsed` → `exists` filters;
//! - sort pairs, always followed by `_score` as the last tiebreak;
//! - highlighting on the extracted text, which is itself excluded from
//!   `_source` together with the raw metadata and bitstream arrays.

use serde_json::{json, Value};

use crate::indices::{field_name, ENDORSED_FIELD, EXCLUDED_SOURCE_FIELDS, REFEREED_FIELD, TERMS_FIELD, TEXT_FIELD};
use crate::models::SearchOptions;

pub fn build_search_body(opts: &SearchOptions) -> Value {
    let fields: Vec<String> = opts.fields.iter().map(|f| field_name(f)).collect();
    let must = if opts.keywords.is_empty() {
        vec![json!({ "match_all": {} })]
    } else {
        vec![json!({
            "query_string": {
                "query": phrase_query(&opts.keywords),
                "fields": fields,
                "default_operator": "OR",
            }
        })]
    };

    let mut filter = Vec::new();
    for label in &opts.terms {
        filter.push(nested_term(json!({ "match_phrase": { "_terms.label": label } })));
    }
    for uri in &opts.term_uris {
        filter.push(nested_term(json!({ "term": { "_terms.uri": uri } })));
    }
    if opts.refereed {
        filter.push(json!({ "exists": { "field": REFEREED_FIELD } }));
    }
    if opts.endorsed {
        filter.push(json!({ "exists": { "field": ENDORSED_FIELD } }));
    }

    json!({
        "from": opts.from,
        "size": opts.size,
        "query": {
            "bool": {
                "must": must,
                "filter": filter,
            }
        },
        "highlight": {
            "fields": {
                TEXT_FIELD: { "fragment_size": 150, "number_of_fragments": 3 }
            }
        },
        "sort": sort_clauses(&opts.sort),
        "_source": {
            "excludes": EXCLUDED_SOURCE_FIELDS,
        }
    })
}

fn nested_term(query: Value) -> Value {
    json!({
        "nested": {
            "path": TERMS_FIELD,
            "query": query,
        }
    })
}

/// `["ocean", "sea ice"]` → `"ocean" "sea ice"`.
fn phrase_query(keywords: &[String]) -> String {
    keywords
        .iter()
        .map(|k| format!("\"{}\"", k.replace('\\', "\\\\").replace('"', "\\\"")))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Map `field:direction` pairs, then append the relevance tiebreak.
fn sort_clauses(sort: &[String]) -> Vec<Value> {
    let mut clauses: Vec<Value> = sort
        .iter()
        .filter_map(|entry| {
            let (field, direction) = match entry.split_once(':') {
                Some((f, d)) => (f.trim(), d.trim().to_ascii_lowercase()),
                None => (entry.trim(), "asc".to_string()),
            };
            if field.is_empty() || field == "_score" {
                return None;
            }
            let direction = match direction.as_str() {
                "desc" => "desc",
                _ => "asc",
            };
            let field = field_name(field);
            Some(json!({ field: direction }))
        })
        .collect();
    clauses.push(json!("_score"));
    clauses
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_options() -> SearchOptions {
        SearchOptions {
            keywords: vec!["ocean".into(), "sea".into()],
            terms: vec!["alpha".into()],
            term_uris: vec!["uri://alpha".into()],
            from: 0,
            size: 20,
            sort: vec!["title:asc".into()],
            fields: vec!["title".into()],
            synonyms: false,
            refereed: true,
            endorsed: true,
        }
    }

    #[test]
    fn keywords_become_one_disjunctive_phrase_query() {
        let body = build_search_body(&full_options());
        let must = body["query"]["bool"]["must"].as_array().unwrap();
        assert_eq!(must.len(), 1);
        let qs = &must[0]["query_string"];
        assert_eq!(qs["query"], "\"ocean\" \"sea\"");
        assert_eq!(qs["fields"], json!(["title"]));
        assert_eq!(qs["default_operator"], "OR");
    }

    #[test]
    fn filters_are_anded_in_stable_order() {
        let body = build_search_body(&full_options());
        let filter = body["query"]["bool"]["filter"].as_array().unwrap();
        assert_eq!(filter.len(), 4);
        assert_eq!(filter[0]["nested"]["path"], "_terms");
        assert_eq!(filter[0]["nested"]["query"]["match_phrase"]["_terms.label"], "alpha");
        assert_eq!(filter[1]["nested"]["query"]["term"]["_terms.uri"], "uri://alpha");
        assert_eq!(filter[2]["exists"]["field"], REFEREED_FIELD);
        assert_eq!(filter[3]["exists"]["field"], ENDORSED_FIELD);
    }

    #[test]
    fn sort_ends_with_score_and_large_fields_are_excluded() {
        let body = build_search_body(&full_options());
        assert_eq!(body["sort"], json!([{ "title": "asc" }, "_score"]));
        assert_eq!(body["from"], 0);
        assert_eq!(body["size"], 20);
        let excludes = body["_source"]["excludes"].as_array().unwrap();
        for field in ["_bitstreamText", "metadata", "bitstreams"] {
            assert!(excludes.iter().any(|e| e == field), "missing {}", field);
        }
        assert!(body["highlight"]["fields"].get("_bitstreamText").is_some());
    }

    #[test]
    fn empty_options_are_still_well_formed() {
        let body = build_search_body(&SearchOptions::default());
        assert_eq!(body["query"]["bool"]["must"], json!([{ "match_all": {} }]));
        assert_eq!(body["query"]["bool"]["filter"], json!([]));
        assert_eq!(body["sort"], json!(["_score"]));
    }

    #[test]
    fn sort_parsing_defaults_and_lowercases() {
        let clauses = sort_clauses(&["date:DESC".into(), "handle".into(), ":asc".into()]);
        assert_eq!(clauses, vec![json!({"date": "desc"}), json!({"handle": "asc"}), json!("_score")]);
    }

    #[test]
    fn metadata_keys_map_to_index_fields() {
        let opts = SearchOptions {
            keywords: vec!["ocean".into()],
            fields: vec!["dc.description.abstract".into(), "_bitstreamText".into()],
            sort: vec!["dc.date.issued:desc".into()],
            ..SearchOptions::default()
        };
        let body = build_search_body(&opts);
        assert_eq!(
            body["query"]["bool"]["must"][0]["query_string"]["fields"],
            json!(["dc_description_abstract", "_bitstreamText"])
        );
        assert_eq!(body["sort"][0], json!({ "dc_date_issued": "desc" }));
    }

    #[test]
    fn quotes_inside_keywords_are_escaped() {
        assert_eq!(phrase_query(&["say \"hi\"".into()]), "\"say \\\"hi\\\"\"");
    }
}
