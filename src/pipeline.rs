//! Pipeline runner and per-document state tracking.
//!
//! The runner pulls [`Envelope`]s off the bus and hands each to the stage
//! it triggers, concurrently, up to `pipeline.concurrency` at a time:
//!
//! | Event | Stage |
//! |-------|-------|
//! | `available-document(id)` | [`Stages::fetch_metadata`] |
//! | created `metadata/{id}.json` | [`Stages::fetch_bitstream`] |
//! | created `bitstreams/{id}.{ext}` | [`Stages::extract`] |
//! | created `extracted/{id}.txt` | [`Stages::announce_text`] |
//! | `text-extracted(id)` | [`Stages::index_document`] |
//!
//! A failed stage is redelivered with `delivery + 1` after
//! `pipeline.redelivery_delay_ms`, up to `pipeline.max_deliveries`. After
//! that, or immediately for a missing input, the document is marked
//! `failed`. Stages that may index a document never run twice at once for
//! the same document: the second envelope is deferred and resent.
//!
//! The feed watermark only moves past entries whose documents reached
//! `indexed` (see [`Pipeline::settle_watermark`]).

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use tokio::sync::Semaphore;

use crate::bus::{Bus, Envelope, Event, ObjectKey, Subscription, Topic};
use crate::config::PipelineConfig;
use crate::db;
use crate::error::{Error, Result};
use crate::stages::{processed_watermark, DocState, ScheduledEntry, Stages};

/// Counters for one runner session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub handled: usize,
    pub redelivered: usize,
    pub deferred: usize,
    pub failed: usize,
}

#[derive(Default)]
struct Counters {
    handled: AtomicUsize,
    redelivered: AtomicUsize,
    deferred: AtomicUsize,
    failed: AtomicUsize,
}

impl Counters {
    fn snapshot(&self) -> RunSummary {
        RunSummary {
            handled: self.handled.load(Ordering::SeqCst),
            redelivered: self.redelivered.load(Ordering::SeqCst),
            deferred: self.deferred.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
        }
    }
}

#[derive(Clone)]
pub struct Pipeline {
    stages: Arc<Stages>,
    pool: SqlitePool,
    bus: Bus,
    max_deliveries: u32,
    redelivery_delay: Duration,
    semaphore: Arc<Semaphore>,
    indexing: Arc<Mutex<HashSet<String>>>,
    pending: Arc<Mutex<Option<Vec<ScheduledEntry>>>>,
    counters: Arc<Counters>,
}

impl Pipeline {
    pub fn new(stages: Stages, pool: SqlitePool, config: &PipelineConfig) -> Self {
        Self {
            bus: stages.bus.clone(),
            stages: Arc::new(stages),
            pool,
            max_deliveries: config.max_deliveries.max(1),
            redelivery_delay: Duration::from_millis(config.redelivery_delay_ms),
            semaphore: Arc::new(Semaphore::new(config.concurrency.max(1))),
            indexing: Arc::new(Mutex::new(HashSet::new())),
            pending: Arc::new(Mutex::new(None)),
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn stages(&self) -> &Stages {
        &self.stages
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// Publish `available-document` for explicit document ids.
    pub fn submit(&self, document_ids: &[String]) {
        for id in document_ids {
            self.bus
                .publish(Event::published(Topic::AvailableDocument, id.as_str()));
        }
    }

    /// Run one scheduler pass over the feed, or over every item with `full`.
    ///
    /// A feed pass is remembered until [`Pipeline::settle_watermark`] has
    /// seen its documents through. While that earlier pass is still running,
    /// no new one starts. The watermark is left alone with `full`.
    pub async fn schedule(&self, full: bool, page_size: usize) -> Result<usize> {
        if full {
            return self.stages.schedule_all(page_size).await;
        }
        if self.has_pending() {
            if self.bus.in_flight() > 0 {
                tracing::debug!("previous feed pass still running, skipping");
                return Ok(0);
            }
            self.settle_watermark().await?;
        }

        let watermark = db::get_watermark(&self.pool).await?;
        let report = self.stages.schedule_feed(watermark).await?;
        if !report.entries.is_empty() {
            *self.pending.lock().unwrap_or_else(|e| e.into_inner()) = Some(report.entries);
        }
        Ok(report.published)
    }

    fn has_pending(&self) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Advance the feed watermark past the last feed pass's entries that
    /// reached `indexed`.
    ///
    /// Call once the pass's documents have run, e.g. after
    /// [`Pipeline::run_until_idle`]. Entries that failed keep the watermark
    /// below their publish date. Returns the watermark that was persisted.
    pub async fn settle_watermark(&self) -> Result<Option<DateTime<Utc>>> {
        let pending = self.pending.lock().unwrap_or_else(|e| e.into_inner()).take();
        let Some(entries) = pending else {
            return Ok(None);
        };

        let mut done = HashSet::new();
        for id in entries.iter().filter_map(|e| e.document_id.as_deref()) {
            if let Some(record) = get_state(&self.pool, id).await? {
                if record.state == DocState::Indexed.as_str() {
                    done.insert(id.to_string());
                }
            }
        }
        let unfinished = entries
            .iter()
            .filter(|e| e.document_id.as_ref().is_some_and(|id| !done.contains(id)))
            .count();
        if unfinished > 0 {
            tracing::warn!(unfinished, "feed entries not indexed, they will be scheduled again");
        }

        let Some(watermark) = processed_watermark(&entries, |id| done.contains(id)) else {
            return Ok(None);
        };
        let current = db::get_watermark(&self.pool).await?;
        if current.is_some_and(|c| c >= watermark) {
            return Ok(None);
        }
        db::set_watermark(&self.pool, watermark).await?;
        tracing::info!(watermark = %watermark.to_rfc3339(), "feed watermark advanced");
        Ok(Some(watermark))
    }

    /// Handle events until nothing is queued, running, or awaiting
    /// redelivery.
    pub async fn run_until_idle(&self, sub: &mut Subscription) -> RunSummary {
        self.run(sub, true).await;
        self.counters.snapshot()
    }

    /// Handle events until the bus closes.
    pub async fn run_forever(&self, sub: &mut Subscription) -> RunSummary {
        self.run(sub, false).await;
        self.counters.snapshot()
    }

    async fn run(&self, sub: &mut Subscription, until_idle: bool) {
        loop {
            if until_idle && self.bus.in_flight() == 0 {
                break;
            }
            tokio::select! {
                envelope = sub.recv() => {
                    let Some(envelope) = envelope else { break };
                    let permit = match self.semaphore.clone().acquire_owned().await {
                        Ok(p) => p,
                        Err(_) => break,
                    };
                    let runner = self.clone();
                    tokio::spawn(async move {
                        runner.handle(envelope).await;
                        drop(permit);
                    });
                }
                _ = self.bus.idle(), if until_idle => {}
            }
        }
    }

    async fn handle(&self, envelope: Envelope) {
        let document_id = envelope.event.document_id().to_string();

        let guard = if may_index(&envelope.event) {
            match IndexGuard::acquire(&self.indexing, &document_id) {
                Some(g) => Some(g),
                None => {
                    tracing::debug!(document_id = %document_id, "indexing in progress, deferring");
                    self.counters.deferred.fetch_add(1, Ordering::SeqCst);
                    self.resend_later(envelope.clone());
                    self.bus.complete();
                    return;
                }
            }
        } else {
            None
        };

        let outcome = self.dispatch(&envelope.event).await;
        drop(guard);
        self.counters.handled.fetch_add(1, Ordering::SeqCst);

        match outcome {
            Ok(Some(state)) => self.record(&document_id, state, None).await,
            Ok(None) => {}
            Err(e) if e.is_not_found() => {
                tracing::error!(document_id = %document_id, event = %envelope.event, error = %e, "missing input, giving up");
                self.fail(&document_id, &e).await;
            }
            Err(e) if envelope.delivery < self.max_deliveries => {
                tracing::warn!(
                    document_id = %document_id,
                    event = %envelope.event,
                    delivery = envelope.delivery,
                    error = %e,
                    "stage failed, redelivering"
                );
                self.counters.redelivered.fetch_add(1, Ordering::SeqCst);
                self.resend_later(Envelope {
                    event: envelope.event.clone(),
                    delivery: envelope.delivery + 1,
                });
            }
            Err(e) => {
                tracing::error!(
                    document_id = %document_id,
                    event = %envelope.event,
                    delivery = envelope.delivery,
                    error = %e,
                    "stage failed, out of deliveries"
                );
                self.fail(&document_id, &e).await;
            }
        }
        self.bus.complete();
    }

    async fn dispatch(&self, event: &Event) -> Result<Option<DocState>> {
        match event {
            Event::Published {
                topic: Topic::AvailableDocument,
                document_id,
            } => {
                self.record(document_id, DocState::Scheduled, None).await;
                self.stages.fetch_metadata(document_id).await.map(Some)
            }
            Event::Published {
                topic: Topic::TextExtracted,
                document_id,
            } => self.stages.index_document(document_id).await.map(Some),
            Event::ObjectCreated { key } => match key {
                ObjectKey::Metadata(id) => self.stages.fetch_bitstream(id).await.map(Some),
                ObjectKey::Bitstream(id, ext) => self.stages.extract(id, ext).await.map(Some),
                ObjectKey::ExtractedText(id) => {
                    self.stages.announce_text(id);
                    Ok(None)
                }
            },
        }
    }

    /// Resend `envelope` after the redelivery delay, keeping the bus busy
    /// in the meantime.
    fn resend_later(&self, envelope: Envelope) {
        self.bus.reserve();
        let bus = self.bus.clone();
        let delay = self.redelivery_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            bus.resend_reserved(envelope);
        });
    }

    async fn fail(&self, document_id: &str, error: &Error) {
        self.counters.failed.fetch_add(1, Ordering::SeqCst);
        self.record(document_id, DocState::Failed, Some(&error.to_string()))
            .await;
    }

    async fn record(&self, document_id: &str, state: DocState, last_error: Option<&str>) {
        if let Err(e) = record_state(&self.pool, document_id, state, last_error).await {
            tracing::warn!(document_id, state = state.as_str(), error = %e, "failed to record pipeline state");
        }
    }
}

/// Whether handling `event` can write to the documents index.
fn may_index(event: &Event) -> bool {
    matches!(
        event,
        Event::Published {
            topic: Topic::TextExtracted,
            ..
        } | Event::ObjectCreated {
            key: ObjectKey::Metadata(_)
        }
    )
}

/// Marks a document as being indexed until dropped.
struct IndexGuard {
    set: Arc<Mutex<HashSet<String>>>,
    document_id: String,
}

impl IndexGuard {
    fn acquire(set: &Arc<Mutex<HashSet<String>>>, document_id: &str) -> Option<Self> {
        let mut active = set.lock().unwrap_or_else(|e| e.into_inner());
        if !active.insert(document_id.to_string()) {
            return None;
        }
        Some(Self {
            set: set.clone(),
            document_id: document_id.to_string(),
        })
    }
}

impl Drop for IndexGuard {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.document_id);
    }
}

// ============ State store ============

/// The recorded state of one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateRecord {
    pub document_id: String,
    pub state: String,
    pub updated_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

/// Upsert a document's state.
///
/// `scheduled` and `failed` always win. A stage state only replaces a state
/// at the same or an earlier stage: a stage records its state after its
/// output already triggered the next stage, so the later stage may have
/// written first. A successful state clears the previous error.
pub async fn record_state(
    pool: &SqlitePool,
    document_id: &str,
    state: DocState,
    last_error: Option<&str>,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO pipeline_state (document_id, state, updated_at, last_error) VALUES (?, ?, ?, ?)
        ON CONFLICT(document_id) DO UPDATE SET
            state = excluded.state,
            updated_at = excluded.updated_at,
            last_error = excluded.last_error
        WHERE excluded.state IN ('scheduled', 'failed')
           OR (CASE pipeline_state.state
                   WHEN 'metadata_fetched' THEN 1
                   WHEN 'bitstream_fetched' THEN 2
                   WHEN 'text_extracted' THEN 3
                   WHEN 'indexed' THEN 4
                   ELSE 0
               END) <= ?
        "#,
    )
    .bind(document_id)
    .bind(state.as_str())
    .bind(Utc::now().timestamp())
    .bind(last_error)
    .bind(state.rank())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get_state(pool: &SqlitePool, document_id: &str) -> Result<Option<StateRecord>> {
    let row = sqlx::query(
        "SELECT document_id, state, updated_at, last_error FROM pipeline_state WHERE document_id = ?",
    )
    .bind(document_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|row| {
        let ts: i64 = row.get("updated_at");
        StateRecord {
            document_id: row.get("document_id"),
            state: row.get("state"),
            updated_at: DateTime::from_timestamp(ts, 0).unwrap_or_default(),
            last_error: row.get("last_error"),
        }
    }))
}

/// Number of documents in each state, largest first.
pub async fn state_counts(pool: &SqlitePool) -> Result<Vec<(String, i64)>> {
    let rows = sqlx::query(
        "SELECT state, COUNT(*) AS n FROM pipeline_state GROUP BY state ORDER BY n DESC, state ASC",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows
        .iter()
        .map(|row| (row.get::<String, _>("state"), row.get::<i64, _>("n")))
        .collect())
}
