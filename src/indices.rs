//! Index mappings and bootstrap.
//!
//! Two indices back the system: the documents index (one entry per
//! repository item) and the terms index (one percolator query per ontology
//! label, also feeding the completion suggester).

use serde_json::{json, Value};

use crate::config::SearchConfig;
use crate::error::Result;
use crate::index_client::IndexClient;

/// Field holding text extracted from a document's primary bitstream.
pub const TEXT_FIELD: &str = "_bitstreamText";
/// Nested field holding the percolation tags of a document.
pub const TERMS_FIELD: &str = "_terms";
/// Field whose presence marks a peer-reviewed document (`dc.description.refereed`).
pub const REFEREED_FIELD: &str = "dc_description_refereed";
/// Field whose presence marks an externally endorsed document (`dc.description.endorsement`).
pub const ENDORSED_FIELD: &str = "dc_description_endorsement";
/// Fields never returned from a search unless asked for explicitly.
pub const EXCLUDED_SOURCE_FIELDS: [&str; 3] = [TEXT_FIELD, "metadata", "bitstreams"];

/// Documents index field for a metadata key or a requested field name.
///
/// Dots become underscores: the index store reads dots as object paths, and
/// `dc.description` cannot be a leaf next to `dc.description.abstract`.
/// Internal fields starting with `_` are left as they are.
pub fn field_name(key: &str) -> String {
    if key.starts_with('_') {
        return key.to_string();
    }
    key.replace('.', "_")
}

pub fn documents_mapping() -> Value {
    json!({
        "mappings": {
            "properties": {
                "uuid": { "type": "keyword" },
                "handle": { "type": "keyword" },
                "lastModified": { "type": "keyword" },
                "title": {
                    "type": "text",
                    "fields": { "keyword": { "type": "keyword", "ignore_above": 512 } }
                },
                TEXT_FIELD: { "type": "text" },
                TERMS_FIELD: {
                    "type": "nested",
                    "properties": {
                        "label": { "type": "text", "fields": { "keyword": { "type": "keyword" } } },
                        "uri": { "type": "keyword" },
                        "source_terminology": { "type": "keyword" },
                        "namedGraphUri": { "type": "keyword" }
                    }
                },
                "metadata": { "type": "object", "enabled": false },
                "bitstreams": { "type": "object", "enabled": false }
            }
        }
    })
}

/// The percolator index. `title` and `contents` must be mapped here too so
/// candidate documents are analysed the same way stored queries expect.
pub fn terms_mapping() -> Value {
    json!({
        "mappings": {
            "properties": {
                "query": { "type": "percolator" },
                "label": { "type": "text", "fields": { "keyword": { "type": "keyword" } } },
                "suggest": { "type": "completion" },
                "title": { "type": "text" },
                "contents": { "type": "text" },
                "uri": { "type": "keyword" },
                "source_terminology": { "type": "keyword" },
                "namedGraphUri": { "type": "keyword" }
            }
        }
    })
}

/// Create both indices if they are missing.
pub async fn ensure_indices(client: &IndexClient, config: &SearchConfig) -> Result<()> {
    for (index, mapping) in [
        (&config.documents_index, documents_mapping()),
        (&config.terms_index, terms_mapping()),
    ] {
        if client.create_index_if_absent(index, &mapping).await? {
            tracing::info!(index = %index, "created index");
        } else {
            tracing::info!(index = %index, "index already present");
        }
    }
    Ok(())
}

/// Drop and recreate both indices. Everything indexed is lost.
pub async fn reset_indices(client: &IndexClient, config: &SearchConfig) -> Result<()> {
    for index in [&config.documents_index, &config.terms_index] {
        if client.delete_index(index).await? {
            tracing::warn!(index = %index, "deleted index");
        }
    }
    ensure_indices(client, config).await
}
