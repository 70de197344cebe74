//! Indexed document retrieval by id.
//!
//! Used by `ontotag get` and `GET /documents/{id}`. The extracted text is
//! excluded from the returned source; it can be large and is only there
//! for full-text matching.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{validate, Result};
use crate::index_client::IndexClient;
use crate::indices::TEXT_FIELD;

#[derive(Debug, Clone, Serialize)]
pub struct DocumentResponse {
    pub id: String,
    pub document: Value,
}

#[derive(Debug, Deserialize)]
struct GetResponse {
    #[serde(rename = "_id")]
    id: String,
    #[serde(default)]
    found: bool,
    #[serde(rename = "_source", default)]
    source: Value,
}

/// Fetch one document. `Ok(None)` when the index has no such id.
pub async fn get_document(index: &IndexClient, documents_index: &str, id: &str) -> Result<Option<DocumentResponse>> {
    let Some(raw) = index.get_document(documents_index, id, &[TEXT_FIELD]).await? else {
        return Ok(None);
    };
    let parsed: GetResponse = validate("get document", raw)?;
    if !parsed.found {
        return Ok(None);
    }
    Ok(Some(DocumentResponse {
        id: parsed.id,
        document: parsed.source,
    }))
}
