//! Ingestion pipeline stages.
//!
//! Each stage reacts to one event for one document and either writes an
//! object (whose creation drives the next stage) or publishes to a topic:
//!
//! ```text
//! schedule ──available-document──▶ metadata ──metadata/{id}.json──▶ bitstream
//!                                                                     │    │
//!                                       (no primary bitstream) ◀──────┘    │
//!                                                │          bitstreams/{id}.{ext}
//!                                                │                         ▼
//!  index ◀──text-extracted── extracted/{id}.txt ◀───────────────── extractor
//! ```
//!
//! Every stage is keyed by document id and overwrites rather than appends,
//! so handling a redelivered event again is harmless.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::bus::{Bus, Event, ObjectKey, Topic};
use crate::error::{Error, Result};
use crate::extract::{extension_for, mime_for, Extractor};
use crate::index_client::IndexClient;
use crate::indices::field_name;
use crate::models::{Bitstream, DocumentItem, IndexedDocument, IndexedDocumentTerm};
use crate::object_store::NotifyingStore;
use crate::repository::Repository;
use crate::tagger::Tagger;

/// Bundle holding a repository item's original uploads.
const PRIMARY_BUNDLE: &str = "ORIGINAL";

/// How far a document got in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DocState {
    Scheduled,
    MetadataFetched,
    BitstreamFetched,
    TextExtracted,
    Indexed,
    Failed,
}

impl DocState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocState::Scheduled => "scheduled",
            DocState::MetadataFetched => "metadata_fetched",
            DocState::BitstreamFetched => "bitstream_fetched",
            DocState::TextExtracted => "text_extracted",
            DocState::Indexed => "indexed",
            DocState::Failed => "failed",
        }
    }

    /// Position along the happy path. `Scheduled` and `Failed` start or end
    /// a run and rank 0.
    pub fn rank(&self) -> i64 {
        match self {
            DocState::Scheduled | DocState::Failed => 0,
            DocState::MetadataFetched => 1,
            DocState::BitstreamFetched => 2,
            DocState::TextExtracted => 3,
            DocState::Indexed => 4,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "scheduled" => DocState::Scheduled,
            "metadata_fetched" => DocState::MetadataFetched,
            "bitstream_fetched" => DocState::BitstreamFetched,
            "text_extracted" => DocState::TextExtracted,
            "indexed" => DocState::Indexed,
            "failed" => DocState::Failed,
            _ => return None,
        })
    }
}

/// A feed entry picked up by a scheduler pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledEntry {
    pub published: DateTime<Utc>,
    /// `None` when the handle did not resolve; such an entry has nothing
    /// left to process.
    pub document_id: Option<String>,
}

/// Result of one scheduler pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleReport {
    pub published: usize,
    pub skipped: usize,
    /// Every entry newer than the watermark, in feed order.
    pub entries: Vec<ScheduledEntry>,
}

impl ScheduleReport {
    /// Newest publish date seen in this pass.
    pub fn newest(&self) -> Option<DateTime<Utc>> {
        self.entries.iter().map(|e| e.published).max()
    }
}

/// The watermark once every entry has settled.
///
/// This is the newest publish date such that every entry published at or
/// before it is done. An entry that is not done holds the watermark below
/// its own date, so the next pass announces it again.
pub fn processed_watermark<F>(entries: &[ScheduledEntry], mut is_done: F) -> Option<DateTime<Utc>>
where
    F: FnMut(&str) -> bool,
{
    let blocked = entries
        .iter()
        .filter(|e| e.document_id.as_deref().is_some_and(|id| !is_done(id)))
        .map(|e| e.published)
        .min();
    entries
        .iter()
        .map(|e| e.published)
        .filter(|p| blocked.map_or(true, |b| *p < b))
        .max()
}

/// Shared dependencies of every stage.
#[derive(Clone)]
pub struct Stages {
    pub repository: Arc<dyn Repository>,
    pub store: NotifyingStore,
    pub extractor: Arc<dyn Extractor>,
    pub tagger: Tagger,
    pub index: IndexClient,
    pub documents_index: String,
    pub content_mime_types: Vec<String>,
    pub bus: Bus,
}

impl Stages {
    // ============ Scheduler ============

    /// Publish `available-document` for every feed entry newer than
    /// `watermark`.
    ///
    /// Fails without publishing anything if a newer entry could not be
    /// resolved. The watermark is not moved here: see
    /// [`processed_watermark`].
    pub async fn schedule_feed(&self, watermark: Option<DateTime<Utc>>) -> Result<ScheduleReport> {
        let entries = self.repository.get_feed().await?;
        let mut report = ScheduleReport {
            published: 0,
            skipped: 0,
            entries: Vec::new(),
        };

        for entry in entries.iter().filter(|e| watermark.map_or(true, |w| e.published > w)) {
            let document_id = match self.repository.find(&entry.handle).await? {
                Some(item) => Some(item.uuid.to_string()),
                None => {
                    tracing::warn!(handle = %entry.handle, "feed entry not found in repository");
                    report.skipped += 1;
                    None
                }
            };
            report.entries.push(ScheduledEntry {
                published: entry.published,
                document_id,
            });
        }

        for id in report.entries.iter().filter_map(|e| e.document_id.as_deref()) {
            self.bus.publish(Event::published(Topic::AvailableDocument, id));
            report.published += 1;
        }
        tracing::info!(
            published = report.published,
            skipped = report.skipped,
            "scheduled feed entries"
        );
        Ok(report)
    }

    /// Publish `available-document` for every item in the repository.
    pub async fn schedule_all(&self, page_size: usize) -> Result<usize> {
        let mut offset = 0;
        let mut published = 0;
        loop {
            let items = self.repository.get_items(offset, page_size).await?;
            if items.is_empty() {
                break;
            }
            for item in &items {
                self.bus
                    .publish(Event::published(Topic::AvailableDocument, item.uuid.to_string()));
            }
            published += items.len();
            offset += items.len();
            if items.len() < page_size {
                break;
            }
        }
        tracing::info!(published, "scheduled all repository items");
        Ok(published)
    }

    // ============ Metadata ============

    /// Fetch the item snapshot and store it as `metadata/{id}.json`.
    pub async fn fetch_metadata(&self, document_id: &str) -> Result<DocState> {
        let item = self
            .repository
            .get_item(document_id)
            .await?
            .ok_or_else(|| Error::not_found("item", document_id))?;
        let bytes = serde_json::to_vec(&item)?;
        self.store
            .put(&ObjectKey::Metadata(document_id.to_string()), bytes)
            .await?;
        tracing::info!(document_id, handle = %item.handle, "stored metadata");
        Ok(DocState::MetadataFetched)
    }

    // ============ Bitstream ============

    /// Download the primary bitstream, or index straight away if there is
    /// none.
    pub async fn fetch_bitstream(&self, document_id: &str) -> Result<DocState> {
        let item = self.load_item(document_id).await?;
        let Some(bitstream) = primary_bitstream(&item, &self.content_mime_types) else {
            tracing::info!(document_id, "no primary bitstream, indexing without text");
            return self.index_document(document_id).await;
        };

        let Some(bytes) = self.repository.get_bitstream(&bitstream.retrieve_link).await? else {
            tracing::warn!(
                document_id,
                link = %bitstream.retrieve_link,
                "primary bitstream vanished, indexing without text"
            );
            return self.index_document(document_id).await;
        };

        tracing::info!(
            document_id,
            mime_type = %bitstream.mime_type,
            bytes = bytes.len(),
            checksum = bitstream.check_sum.as_ref().map(|c| c.value.as_str()).unwrap_or("-"),
            "downloaded bitstream"
        );
        let key = ObjectKey::Bitstream(
            document_id.to_string(),
            extension_for(&bitstream.mime_type).to_string(),
        );
        self.store.put(&key, bytes).await?;
        Ok(DocState::BitstreamFetched)
    }

    // ============ Extraction ============

    /// Run the extractor on a stored bitstream and store the text.
    pub async fn extract(&self, document_id: &str, extension: &str) -> Result<DocState> {
        let key = ObjectKey::Bitstream(document_id.to_string(), extension.to_string());
        let bytes = self
            .store
            .get(&key)
            .await?
            .ok_or_else(|| Error::not_found("bitstream object", key.path()))?;
        let text = self
            .extractor
            .extract(document_id, bytes, mime_for(extension))
            .await?;
        self.store
            .put(&ObjectKey::ExtractedText(document_id.to_string()), text.into_bytes())
            .await?;
        Ok(DocState::TextExtracted)
    }

    /// Extracted text landed in storage: announce it.
    pub fn announce_text(&self, document_id: &str) {
        self.bus
            .publish(Event::published(Topic::TextExtracted, document_id));
    }

    // ============ Indexing ============

    /// Tag the document and overwrite its entry in the documents index.
    pub async fn index_document(&self, document_id: &str) -> Result<DocState> {
        let item = self.load_item(document_id).await?;
        let text = self
            .store
            .get(&ObjectKey::ExtractedText(document_id.to_string()))
            .await?
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned());

        let terms = self.tagger.tag(item.title(), text.as_deref()).await?;
        let doc = build_indexed_document(&item, text, terms);
        self.index
            .index_document(&self.documents_index, Some(document_id), &serde_json::to_value(&doc)?)
            .await?;
        tracing::info!(document_id, terms = doc.terms.len(), "indexed document");
        Ok(DocState::Indexed)
    }

    /// The stored metadata snapshot, falling back to the repository.
    async fn load_item(&self, document_id: &str) -> Result<DocumentItem> {
        if let Some(bytes) = self
            .store
            .get(&ObjectKey::Metadata(document_id.to_string()))
            .await?
        {
            return Ok(serde_json::from_slice(&bytes)?);
        }
        tracing::debug!(document_id, "no stored metadata, asking repository");
        self.repository
            .get_item(document_id)
            .await?
            .ok_or_else(|| Error::not_found("item", document_id))
    }
}

/// The bitstream to extract text from, if any.
///
/// Only bitstreams of a configured content type qualify; one in the
/// `ORIGINAL` bundle wins over any other bundle.
pub fn primary_bitstream<'a>(item: &'a DocumentItem, content_mime_types: &[String]) -> Option<&'a Bitstream> {
    let mut candidates = item
        .bitstreams
        .iter()
        .filter(|b| content_mime_types.iter().any(|m| m == &b.mime_type));
    let first = candidates.clone().next();
    candidates
        .find(|b| b.bundle_name == PRIMARY_BUNDLE)
        .or(first)
}

/// Project a snapshot, its text, and its tags into the indexed form.
pub fn build_indexed_document(
    item: &DocumentItem,
    text: Option<String>,
    terms: Vec<IndexedDocumentTerm>,
) -> IndexedDocument {
    let mut fields: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for m in &item.metadata {
        fields.entry(field_name(&m.key)).or_default().push(m.value.clone());
    }
    IndexedDocument {
        uuid: item.uuid,
        handle: item.handle.clone(),
        last_modified: item.last_modified.clone(),
        title: item.title().map(str::to_string),
        metadata: item.metadata.clone(),
        bitstreams: item.bitstreams.clone(),
        bitstream_text: text,
        terms,
        fields,
    }
}
