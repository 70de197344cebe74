//! Error taxonomy shared by every library module.
//!
//! Absence is not an error: lookups that can legitimately miss (items,
//! metadata, indexed documents, stored objects) return `Ok(None)`. The
//! [`Error::NotFound`] variant is reserved for stages that *require* an
//! input that is not there.

use serde::de::DeserializeOwned;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("{service} returned HTTP {status}: {body}")]
    Upstream {
        service: &'static str,
        status: u16,
        body: String,
    },

    #[error("unexpected {context} response: {source}")]
    Validation {
        context: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("extraction failed: {0}")]
    Extraction(String),

    #[error("malformed feed: {0}")]
    Feed(String),
}

impl Error {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Error::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    /// True for transport timeouts, so the server can report a stalled
    /// dependency differently from a hard failure.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Http(e) if e.is_timeout())
    }
}

/// Check a raw response against its expected shape.
///
/// On mismatch the raw body is logged in full and a [`Error::Validation`]
/// is returned; nothing is coerced.
pub fn validate<T: DeserializeOwned>(context: &'static str, body: serde_json::Value) -> Result<T> {
    let raw = body.to_string();
    serde_json::from_value(body).map_err(|source| {
        tracing::error!(context, body = %raw, error = %source, "response failed validation");
        Error::Validation { context, source }
    })
}

/// Truncate an upstream body for inclusion in an error message.
pub(crate) fn snippet(body: &str) -> String {
    body.chars().take(500).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Ack {
        acknowledged: bool,
    }

    #[test]
    fn validate_accepts_matching_shape() {
        let ack: Ack = validate("ack", serde_json::json!({"acknowledged": true})).unwrap();
        assert!(ack.acknowledged);
    }

    #[test]
    fn validate_rejects_wrong_shape() {
        let err = validate::<Ack>("ack", serde_json::json!({"ok": 1})).unwrap_err();
        assert!(matches!(err, Error::Validation { context: "ack", .. }));
    }

    #[test]
    fn snippet_truncates() {
        let long = "x".repeat(900);
        assert_eq!(snippet(&long).len(), 500);
    }
}
