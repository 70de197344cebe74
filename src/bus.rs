//! In-process event bus connecting the pipeline stages.
//!
//! Two kinds of signal move documents forward: explicit publications on a
//! named [`Topic`], and [`Event::ObjectCreated`] notifications emitted when a
//! stage writes an object. Both carry the document id, which is the
//! idempotency key of every stage.
//!
//! Delivery is at-least-once. Every event travels in an [`Envelope`]
//! counting its delivery attempts; the runner redelivers failed envelopes.
//! The bus also counts events that are queued or being handled, which is
//! how [`Pipeline::run_until_idle`](crate::pipeline::Pipeline::run_until_idle)
//! knows the chain has settled.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Notify};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Scheduler → metadata stage.
    AvailableDocument,
    /// Extraction destination → indexing stage.
    TextExtracted,
}

impl Topic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::AvailableDocument => "available-document",
            Topic::TextExtracted => "text-extracted",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a stage's output lives in the object store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ObjectKey {
    /// `metadata/{id}.json`
    Metadata(String),
    /// `bitstreams/{id}.{ext}`
    Bitstream(String, String),
    /// `extracted/{id}.txt`
    ExtractedText(String),
}

impl ObjectKey {
    pub fn path(&self) -> String {
        match self {
            ObjectKey::Metadata(id) => format!("metadata/{}.json", id),
            ObjectKey::Bitstream(id, ext) => format!("bitstreams/{}.{}", id, ext),
            ObjectKey::ExtractedText(id) => format!("extracted/{}.txt", id),
        }
    }

    /// Inverse of [`path`](Self::path). Unknown layouts are `None`.
    pub fn parse(path: &str) -> Option<Self> {
        let (dir, file) = path.split_once('/')?;
        let (id, ext) = file.rsplit_once('.')?;
        if id.is_empty() || id.contains('/') {
            return None;
        }
        match (dir, ext) {
            ("metadata", "json") => Some(ObjectKey::Metadata(id.to_string())),
            ("extracted", "txt") => Some(ObjectKey::ExtractedText(id.to_string())),
            ("bitstreams", ext) if !ext.is_empty() => {
                Some(ObjectKey::Bitstream(id.to_string(), ext.to_string()))
            }
            _ => None,
        }
    }

    pub fn document_id(&self) -> &str {
        match self {
            ObjectKey::Metadata(id) | ObjectKey::Bitstream(id, _) | ObjectKey::ExtractedText(id) => id,
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Published { topic: Topic, document_id: String },
    ObjectCreated { key: ObjectKey },
}

impl Event {
    pub fn published(topic: Topic, document_id: impl Into<String>) -> Self {
        Event::Published {
            topic,
            document_id: document_id.into(),
        }
    }

    pub fn document_id(&self) -> &str {
        match self {
            Event::Published { document_id, .. } => document_id,
            Event::ObjectCreated { key } => key.document_id(),
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Published { topic, document_id } => write!(f, "{}({})", topic, document_id),
            Event::ObjectCreated { key } => write!(f, "created({})", key),
        }
    }
}

/// An event plus its delivery attempt, starting at 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub event: Event,
    pub delivery: u32,
}

/// Sending half of the bus. Cheap to clone.
#[derive(Clone)]
pub struct Bus {
    tx: mpsc::UnboundedSender<Envelope>,
    in_flight: Arc<AtomicUsize>,
    idle: Arc<Notify>,
}

/// Receiving half of the bus, owned by the pipeline runner.
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<Envelope>,
}

impl Subscription {
    pub(crate) async fn recv(&mut self) -> Option<Envelope> {
        self.rx.recv().await
    }
}

impl Bus {
    pub fn new() -> (Bus, Subscription) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Bus {
                tx,
                in_flight: Arc::new(AtomicUsize::new(0)),
                idle: Arc::new(Notify::new()),
            },
            Subscription { rx },
        )
    }

    /// Publish a first delivery of `event`.
    pub fn publish(&self, event: Event) {
        tracing::debug!(event = %event, "publish");
        self.send(Envelope { event, delivery: 1 });
    }

    /// Queue `envelope` as is. Used for redeliveries, which the caller has
    /// already counted with [`reserve`](Self::reserve).
    pub(crate) fn resend_reserved(&self, envelope: Envelope) {
        if let Err(e) = self.tx.send(envelope) {
            tracing::warn!(event = %e.0.event, "bus closed, dropping redelivery");
            self.complete();
        }
    }

    /// Count an event that will be sent later.
    pub(crate) fn reserve(&self) {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
    }

    /// Mark one event as fully handled.
    pub(crate) fn complete(&self) {
        if self.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_one();
        }
    }

    /// Events queued, being handled, or waiting for redelivery.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub(crate) async fn idle(&self) {
        self.idle.notified().await
    }

    fn send(&self, envelope: Envelope) {
        self.reserve();
        self.resend_reserved(envelope);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_keys_round_trip_through_paths() {
        for key in [
            ObjectKey::Metadata("a1".into()),
            ObjectKey::Bitstream("a1".into(), "pdf".into()),
            ObjectKey::ExtractedText("a1".into()),
        ] {
            assert_eq!(ObjectKey::parse(&key.path()), Some(key.clone()));
            assert_eq!(key.document_id(), "a1");
        }
    }

    #[test]
    fn foreign_paths_are_not_object_keys() {
        assert_eq!(ObjectKey::parse("metadata/a1.txt"), None);
        assert_eq!(ObjectKey::parse("other/a1.json"), None);
        assert_eq!(ObjectKey::parse("metadata/.json"), None);
        assert_eq!(ObjectKey::parse("bitstreams/x/y.pdf"), None);
        assert_eq!(ObjectKey::parse("noslash"), None);
    }

    #[test]
    fn topics_use_wire_names() {
        assert_eq!(Topic::AvailableDocument.to_string(), "available-document");
        assert_eq!(Topic::TextExtracted.to_string(), "text-extracted");
    }

    #[tokio::test]
    async fn in_flight_tracks_publish_and_complete() {
        let (bus, mut sub) = Bus::new();
        bus.publish(Event::published(Topic::AvailableDocument, "d1"));
        assert_eq!(bus.in_flight(), 1);
        let env = sub.recv().await.unwrap();
        assert_eq!(env.delivery, 1);
        assert_eq!(env.event.document_id(), "d1");
        bus.complete();
        assert_eq!(bus.in_flight(), 0);
    }
}
