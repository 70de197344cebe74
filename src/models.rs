//! Core data models used throughout ontotag.
//!
//! Repository snapshots ([`DocumentItem`]) are read-only inputs; every stage
//! re-reads them rather than mutating them. [`IndexedDocument`] is the one
//! long-lived projection written to the documents index.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Metadata key holding a document's title.
pub const TITLE_KEY: &str = "dc.title";

/// An item snapshot as served by the source repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentItem {
    pub uuid: Uuid,
    #[serde(default)]
    pub handle: String,
    /// Repository-formatted timestamp, kept verbatim.
    #[serde(default)]
    pub last_modified: Option<String>,
    #[serde(default)]
    pub metadata: Vec<Metadata>,
    #[serde(default)]
    pub bitstreams: Vec<Bitstream>,
}

impl DocumentItem {
    /// All values stored under `key`, in repository order.
    pub fn values<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.metadata
            .iter()
            .filter(move |m| m.key == key)
            .map(|m| m.value.as_str())
    }

    pub fn title(&self) -> Option<&str> {
        self.values(TITLE_KEY).next()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bitstream {
    #[serde(default)]
    pub bundle_name: String,
    #[serde(default)]
    pub mime_type: String,
    pub retrieve_link: String,
    #[serde(default)]
    pub check_sum: Option<CheckSum>,
}

/// Content fingerprint. Only logged, never verified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckSum {
    pub value: String,
}

/// One entry of the repository's RSS feed.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedEntry {
    pub handle: String,
    pub link: String,
    pub title: Option<String>,
    pub published: DateTime<Utc>,
}

/// An ontology term as read from the graph store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Term {
    pub label: String,
    pub uri: String,
}

/// A term matched against a document by percolation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedDocumentTerm {
    pub label: String,
    pub uri: String,
    pub source_terminology: String,
    #[serde(rename = "namedGraphUri")]
    pub named_graph_uri: String,
}

/// The document written to (and overwritten in) the documents index.
///
/// Metadata keys are flattened into top-level multi-valued fields named by
/// [`field_name`](crate::indices::field_name); the raw
/// `metadata` and `bitstreams` arrays are kept alongside for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexedDocument {
    pub uuid: Uuid,
    pub handle: String,
    pub last_modified: Option<String>,
    pub title: Option<String>,
    pub metadata: Vec<Metadata>,
    pub bitstreams: Vec<Bitstream>,
    #[serde(rename = "_bitstreamText", skip_serializing_if = "Option::is_none")]
    pub bitstream_text: Option<String>,
    #[serde(rename = "_terms")]
    pub terms: Vec<IndexedDocumentTerm>,
    #[serde(flatten)]
    pub fields: BTreeMap<String, Vec<String>>,
}

/// A parsed keyword search request.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchOptions {
    pub keywords: Vec<String>,
    pub terms: Vec<String>,
    pub term_uris: Vec<String>,
    pub from: u32,
    pub size: u32,
    pub sort: Vec<String>,
    pub fields: Vec<String>,
    pub synonyms: bool,
    pub refereed: bool,
    pub endorsed: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            keywords: Vec::new(),
            terms: Vec::new(),
            term_uris: Vec::new(),
            from: 0,
            size: 20,
            sort: Vec::new(),
            fields: vec!["_bitstreamText".to_string(), "title".to_string()],
            synonyms: false,
            refereed: false,
            endorsed: false,
        }
    }
}
