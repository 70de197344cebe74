//! Term sync progress reporting.
//!
//! Reports observable progress during `ontotag sync-terms` so users see which
//! terminology is being paged and how far the offset has moved. Progress is
//! emitted on **stderr** so stdout remains parseable for scripts.

use std::io::Write;

/// A single progress event for term sync.
#[derive(Clone, Debug)]
pub enum SyncProgressEvent {
    /// A page is being requested from the graph store.
    Paging { terminology: String, offset: u64 },
    /// A page was loaded: `fetched` raw bindings so far, `indexed` kept terms.
    Loaded {
        terminology: String,
        fetched: u64,
        indexed: u64,
    },
}

/// Reports sync progress. Implementations write to stderr (human or JSON).
pub trait SyncProgressReporter: Send + Sync {
    fn report(&self, event: SyncProgressEvent);
}

/// Human-friendly progress on stderr: "sync eov  1,500 fetched  1,212 indexed".
pub struct StderrProgress;

impl SyncProgressReporter for StderrProgress {
    fn report(&self, event: SyncProgressEvent) {
        let line = match &event {
            SyncProgressEvent::Paging {
                terminology,
                offset,
            } => {
                format!("sync {}  paging from offset {}\n", terminology, format_number(*offset))
            }
            SyncProgressEvent::Loaded {
                terminology,
                fetched,
                indexed,
            } => format!(
                "sync {}  {} fetched  {} indexed\n",
                terminology,
                format_number(*fetched),
                format_number(*indexed)
            ),
        };
        let mut err = std::io::stderr().lock();
        let _ = err.write_all(line.as_bytes());
        let _ = err.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl SyncProgressReporter for JsonProgress {
    fn report(&self, event: SyncProgressEvent) {
        let obj = match &event {
            SyncProgressEvent::Paging {
                terminology,
                offset,
            } => serde_json::json!({
                "event": "progress",
                "terminology": terminology,
                "phase": "paging",
                "offset": offset
            }),
            SyncProgressEvent::Loaded {
                terminology,
                fetched,
                indexed,
            } => serde_json::json!({
                "event": "progress",
                "terminology": terminology,
                "phase": "loaded",
                "fetched": fetched,
                "indexed": indexed
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut err = std::io::stderr().lock();
            let _ = writeln!(err, "{}", line);
            let _ = err.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl SyncProgressReporter for NoProgress {
    fn report(&self, _event: SyncProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn SyncProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }
}
