//! Search-index client.
//!
//! A thin, retry-free wrapper over the index store's REST surface. Every
//! call returns the raw parsed response; callers validate the shape with
//! [`validate`](crate::error::validate) right after the call. The scroll
//! helpers are the exception: they need the cursor, so they validate
//! internally.
//!
//! # Endpoints used
//!
//! | Operation | Request |
//! |-----------|---------|
//! | search / open scroll | `POST {index}/_search[?scroll=Nm]` |
//! | next scroll | `POST _search/scroll` |
//! | close scroll | `DELETE _search/scroll/{id}` |
//! | bulk | `POST _bulk` (NDJSON) |
//! | create / exists / delete index | `PUT` / `HEAD` / `DELETE {index}` |
//! | index document | `POST {index}/_doc[/{id}]` |
//! | get document | `GET {index}/_doc/{id}` |
//! | partial update | `POST {index}/_update/{id}` |
//! | count | `GET {index}/_count` |
//! | refresh | `POST {index}/_refresh` |
//! | delete by query | `POST {index}/_delete_by_query` |

use std::future::Future;
use std::time::Duration;

use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::config::SearchConfig;
use crate::error::{validate, Error, Result};
use crate::http::{build_client, ensure_success, is_not_found, join_url, read_json, upstream, uri_encode};

const SERVICE: &str = "index store";

#[derive(Debug, Clone)]
pub struct IndexClient {
    http: reqwest::Client,
    base_url: String,
}

/// Options for opening a full-index scan.
#[derive(Debug, Clone)]
pub struct ScrollOptions {
    /// `_source` fields to return; empty means the whole source.
    pub includes: Vec<String>,
    pub timeout_minutes: u32,
    pub page_size: usize,
}

impl Default for ScrollOptions {
    fn default() -> Self {
        Self {
            includes: Vec::new(),
            timeout_minutes: 60,
            page_size: 500,
        }
    }
}

/// Server-side scroll context id. Each page may hand out a new one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrollCursor {
    id: String,
}

impl ScrollCursor {
    pub fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug)]
pub struct ScrollPage {
    pub cursor: ScrollCursor,
    pub hits: Vec<Hit>,
}

/// One search hit.
#[derive(Debug, Clone, Deserialize)]
pub struct Hit {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_score", default)]
    pub score: Option<f64>,
    #[serde(rename = "_source", default)]
    pub source: Value,
    #[serde(default)]
    pub highlight: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct Hits {
    #[serde(default)]
    pub total: Option<Value>,
    pub hits: Vec<Hit>,
}

impl Hits {
    /// Total hit count, whichever of the two total formats the store used.
    pub fn total_value(&self) -> u64 {
        match &self.total {
            Some(Value::Number(n)) => n.as_u64().unwrap_or(0),
            Some(Value::Object(o)) => o.get("value").and_then(Value::as_u64).unwrap_or(0),
            _ => self.hits.len() as u64,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SearchResponse {
    pub hits: Hits,
}

#[derive(Debug, Deserialize)]
struct ScrollResponse {
    #[serde(rename = "_scroll_id")]
    scroll_id: String,
    hits: Hits,
}

#[derive(Debug, Deserialize)]
pub struct BulkResponse {
    pub errors: bool,
    #[serde(default)]
    pub items: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct CountResponse {
    count: u64,
}

#[derive(Debug, Deserialize)]
struct DeleteByQueryResponse {
    deleted: u64,
}

/// One instruction in a bulk request.
#[derive(Debug, Clone, PartialEq)]
pub enum BulkOperation {
    Index {
        index: String,
        id: String,
        document: Value,
    },
    Delete {
        index: String,
        id: String,
    },
}

impl BulkOperation {
    fn write_ndjson(&self, out: &mut String) {
        match self {
            BulkOperation::Index {
                index,
                id,
                document,
            } => {
                out.push_str(&json!({"index": {"_index": index, "_id": id}}).to_string());
                out.push('\n');
                out.push_str(&document.to_string());
                out.push('\n');
            }
            BulkOperation::Delete { index, id } => {
                out.push_str(&json!({"delete": {"_index": index, "_id": id}}).to_string());
                out.push('\n');
            }
        }
    }
}

/// Encode operations as the newline-delimited bulk body.
pub fn bulk_body(operations: &[BulkOperation]) -> String {
    let mut body = String::new();
    for op in operations {
        op.write_ndjson(&mut body);
    }
    body
}

impl IndexClient {
    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self> {
        Ok(Self {
            http: build_client(timeout_secs)?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &SearchConfig) -> Result<Self> {
        Self::new(&config.url, config.timeout_secs)
    }

    fn url(&self, path: &str) -> String {
        join_url(&self.base_url, path)
    }

    /// `POST {index}/_search` with an arbitrary body.
    pub async fn search(&self, index: &str, body: &Value) -> Result<Value> {
        let resp = self
            .http
            .post(self.url(&format!("{}/_search", index)))
            .json(body)
            .send()
            .await?;
        read_json(resp, SERVICE).await
    }

    /// Start a full scan of `index`.
    pub async fn open_scroll(&self, index: &str, opts: &ScrollOptions) -> Result<ScrollPage> {
        let mut body = json!({
            "size": opts.page_size,
            "sort": ["_doc"],
        });
        if !opts.includes.is_empty() {
            body["_source"] = json!({ "includes": opts.includes });
        }
        let resp = self
            .http
            .post(self.url(&format!("{}/_search", index)))
            .query(&[("scroll", format!("{}m", opts.timeout_minutes))])
            .json(&body)
            .send()
            .await?;
        let parsed: ScrollResponse = validate("scroll", read_json(resp, SERVICE).await?)?;
        Ok(ScrollPage {
            cursor: ScrollCursor {
                id: parsed.scroll_id,
            },
            hits: parsed.hits.hits,
        })
    }

    /// Fetch the page after `cursor`. Always pass the cursor from the
    /// previous page, never the one the scan was opened with.
    pub async fn next_scroll(&self, cursor: &ScrollCursor, timeout_minutes: u32) -> Result<ScrollPage> {
        let resp = self
            .http
            .post(self.url("_search/scroll"))
            .json(&json!({
                "scroll": format!("{}m", timeout_minutes),
                "scroll_id": cursor.id,
            }))
            .send()
            .await?;
        let parsed: ScrollResponse = validate("scroll", read_json(resp, SERVICE).await?)?;
        Ok(ScrollPage {
            cursor: ScrollCursor {
                id: parsed.scroll_id,
            },
            hits: parsed.hits.hits,
        })
    }

    /// Release a scroll context. A context the store no longer knows is
    /// treated as already closed.
    pub async fn close_scroll(&self, cursor: &ScrollCursor) -> Result<()> {
        let resp = self
            .http
            .delete(self.url(&format!("_search/scroll/{}", uri_encode(&cursor.id))))
            .send()
            .await?;
        if is_not_found(resp.status()) {
            return Ok(());
        }
        ensure_success(resp, SERVICE).await?;
        Ok(())
    }

    /// Visit every document in `index`, one page at a time.
    ///
    /// The scroll is closed exactly once on every exit path, including when
    /// `visit` fails part-way through a page. Returns the number of hits
    /// visited.
    pub async fn scroll_each<F, Fut>(&self, index: &str, opts: &ScrollOptions, mut visit: F) -> Result<usize>
    where
        F: FnMut(Hit) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let ScrollPage { mut cursor, mut hits } = self.open_scroll(index, opts).await?;
        let mut visited = 0usize;

        let outcome: Result<()> = async {
            while !hits.is_empty() {
                for hit in std::mem::take(&mut hits) {
                    visit(hit).await?;
                    visited += 1;
                }
                let page = self.next_scroll(&cursor, opts.timeout_minutes).await?;
                cursor = page.cursor;
                hits = page.hits;
            }
            Ok(())
        }
        .await;

        let closed = self.close_scroll(&cursor).await;
        match (outcome, closed) {
            (Ok(()), Ok(())) => Ok(visited),
            (Ok(()), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(close_err)) => {
                tracing::warn!(index, error = %close_err, "failed to close scroll after scan error");
                Err(e)
            }
        }
    }

    /// Submit a batch of independent index/delete operations.
    ///
    /// A non-2xx response fails the whole batch. Per-item errors inside a 2xx
    /// response are logged, not parsed further; ids are deterministic so the
    /// caller can simply resubmit.
    pub async fn bulk(&self, operations: &[BulkOperation]) -> Result<BulkResponse> {
        let resp = self
            .http
            .post(self.url("_bulk"))
            .header("content-type", "application/x-ndjson")
            .body(bulk_body(operations))
            .send()
            .await?;
        let parsed: BulkResponse = validate("bulk", read_json(resp, SERVICE).await?)?;
        if parsed.errors {
            tracing::warn!(
                operations = operations.len(),
                "bulk request reported item-level errors"
            );
        }
        Ok(parsed)
    }

    /// Run `document` against every stored query in `index`.
    pub async fn percolate(&self, index: &str, document: &Value, from: usize, size: usize) -> Result<Value> {
        let body = json!({
            "from": from,
            "size": size,
            "query": {
                "percolate": {
                    "field": "query",
                    "document": document,
                }
            }
        });
        self.search(index, &body).await
    }

    /// Prefix completion over the `suggest` field of `index`.
    pub async fn suggest(&self, index: &str, prefix: &str, size: usize) -> Result<Value> {
        let body = json!({
            "_source": ["label", "uri", "source_terminology"],
            "suggest": {
                "terms": {
                    "prefix": prefix,
                    "completion": {
                        "field": "suggest",
                        "size": size,
                        "skip_duplicates": true,
                    }
                }
            }
        });
        self.search(index, &body).await
    }

    pub async fn count(&self, index: &str) -> Result<u64> {
        let resp = self
            .http
            .get(self.url(&format!("{}/_count", index)))
            .send()
            .await?;
        let parsed: CountResponse = validate("count", read_json(resp, SERVICE).await?)?;
        Ok(parsed.count)
    }

    /// Fetch one document. A 404 is `Ok(None)`.
    pub async fn get_document(&self, index: &str, id: &str, source_excludes: &[&str]) -> Result<Option<Value>> {
        let mut req = self
            .http
            .get(self.url(&format!("{}/_doc/{}", index, uri_encode(id))));
        if !source_excludes.is_empty() {
            req = req.query(&[("_source_excludes", source_excludes.join(","))]);
        }
        let resp = req.send().await?;
        if is_not_found(resp.status()) {
            return Ok(None);
        }
        read_json(resp, SERVICE).await.map(Some)
    }

    /// Write a whole document. With an id this is an overwrite.
    pub async fn index_document(&self, index: &str, id: Option<&str>, document: &Value) -> Result<Value> {
        let path = match id {
            Some(id) => format!("{}/_doc/{}", index, uri_encode(id)),
            None => format!("{}/_doc", index),
        };
        let resp = self.http.post(self.url(&path)).json(document).send().await?;
        read_json(resp, SERVICE).await
    }

    /// Merge `partial` into an existing document.
    pub async fn update_document(&self, index: &str, id: &str, partial: &Value) -> Result<Value> {
        let resp = self
            .http
            .post(self.url(&format!("{}/_update/{}", index, uri_encode(id))))
            .json(&json!({ "doc": partial }))
            .send()
            .await?;
        read_json(resp, SERVICE).await
    }

    pub async fn index_exists(&self, index: &str) -> Result<bool> {
        let resp = self.http.head(self.url(index)).send().await?;
        match resp.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(upstream(resp, SERVICE).await),
        }
    }

    /// Create `index` with `mapping`. Returns `false` if it already existed.
    pub async fn create_index_if_absent(&self, index: &str, mapping: &Value) -> Result<bool> {
        let resp = self.http.put(self.url(index)).json(mapping).send().await?;
        if resp.status().is_success() {
            return Ok(true);
        }
        match upstream(resp, SERVICE).await {
            Error::Upstream { body, .. } if body.contains("resource_already_exists_exception") => {
                tracing::debug!(index, "index already exists");
                Ok(false)
            }
            other => Err(other),
        }
    }

    /// Drop `index`. Returns `false` if there was nothing to drop.
    pub async fn delete_index(&self, index: &str) -> Result<bool> {
        let resp = self.http.delete(self.url(index)).send().await?;
        if is_not_found(resp.status()) {
            return Ok(false);
        }
        ensure_success(resp, SERVICE).await?;
        Ok(true)
    }

    pub async fn refresh(&self, index: &str) -> Result<()> {
        let resp = self
            .http
            .post(self.url(&format!("{}/_refresh", index)))
            .send()
            .await?;
        ensure_success(resp, SERVICE).await?;
        Ok(())
    }

    /// Delete every document matching `query`. Returns the deleted count.
    pub async fn delete_by_query(&self, index: &str, query: &Value) -> Result<u64> {
        let resp = self
            .http
            .post(self.url(&format!("{}/_delete_by_query", index)))
            .json(&json!({ "query": query }))
            .send()
            .await?;
        let parsed: DeleteByQueryResponse =
            validate("delete_by_query", read_json(resp, SERVICE).await?)?;
        Ok(parsed.deleted)
    }

    /// Cheap liveness probe with its own short timeout.
    pub async fn ping(&self, timeout: Duration) -> Result<()> {
        let resp = self
            .http
            .get(self.url(""))
            .timeout(timeout)
            .send()
            .await?;
        ensure_success(resp, SERVICE).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bulk_body_is_newline_delimited() {
        let ops = vec![
            BulkOperation::Index {
                index: "terms".into(),
                id: "a".into(),
                document: json!({"label": "ocean"}),
            },
            BulkOperation::Delete {
                index: "terms".into(),
                id: "b".into(),
            },
        ];
        let body = bulk_body(&ops);
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(body.ends_with('\n'));
        let action: Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(action["index"]["_id"], "a");
        let delete: Value = serde_json::from_str(lines[2]).unwrap();
        assert_eq!(delete["delete"]["_index"], "terms");
    }

    #[test]
    fn hits_total_handles_both_formats() {
        let h: Hits = serde_json::from_value(json!({"total": {"value": 7}, "hits": []})).unwrap();
        assert_eq!(h.total_value(), 7);
        let h: Hits = serde_json::from_value(json!({"total": 3, "hits": []})).unwrap();
        assert_eq!(h.total_value(), 3);
    }
}
