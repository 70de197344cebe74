//! Bulk retagging of already indexed documents.
//!
//! After the terms index changes, existing documents carry stale `_terms`.
//! [`retag_all`] scrolls the whole documents index, percolates each
//! document's title and extracted text again, and partially updates its
//! tags. A failure on one document is logged and counted; the scan goes on
//! and the scroll is always released.

use std::sync::atomic::{AtomicUsize, Ordering};

use serde::Serialize;
use serde_json::json;

use crate::config::SearchConfig;
use crate::error::Result;
use crate::index_client::{Hit, IndexClient, ScrollOptions};
use crate::indices::{TERMS_FIELD, TEXT_FIELD};
use crate::tagger::Tagger;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RetagReport {
    pub visited: usize,
    pub updated: usize,
    pub failed: usize,
}

pub async fn retag_all(index: &IndexClient, tagger: &Tagger, config: &SearchConfig) -> Result<RetagReport> {
    let opts = ScrollOptions {
        includes: vec!["title".to_string(), TEXT_FIELD.to_string()],
        timeout_minutes: config.scroll_timeout_minutes,
        page_size: config.scroll_page_size,
    };
    let updated = AtomicUsize::new(0);
    let failed = AtomicUsize::new(0);

    let visited = {
        let (updated, failed) = (&updated, &failed);
        let documents_index = config.documents_index.as_str();
        index
            .scroll_each(documents_index, &opts, move |hit| async move {
                match retag_one(index, tagger, documents_index, &hit).await {
                    Ok(()) => {
                        updated.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        tracing::warn!(document_id = %hit.id, error = %e, "retagging failed");
                        failed.fetch_add(1, Ordering::Relaxed);
                    }
                }
                Ok(())
            })
            .await?
    };

    let report = RetagReport {
        visited,
        updated: updated.into_inner(),
        failed: failed.into_inner(),
    };
    tracing::info!(
        visited = report.visited,
        updated = report.updated,
        failed = report.failed,
        "retag finished"
    );
    Ok(report)
}

async fn retag_one(index: &IndexClient, tagger: &Tagger, documents_index: &str, hit: &Hit) -> Result<()> {
    let title = hit.source.get("title").and_then(|v| v.as_str());
    let text = hit.source.get(TEXT_FIELD).and_then(|v| v.as_str());
    let terms = tagger.tag(title, text).await?;
    index
        .update_document(documents_index, &hit.id, &json!({ TERMS_FIELD: terms }))
        .await?;
    Ok(())
}
