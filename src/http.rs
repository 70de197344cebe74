//! Shared `reqwest` plumbing for the remote services ontotag talks to.
//!
//! None of these helpers retry. A non-2xx status becomes
//! [`Error::Upstream`](crate::error::Error::Upstream) carrying a truncated
//! body; the full body goes to the log.

use std::time::Duration;

use reqwest::{Response, StatusCode};
use serde_json::Value;

use crate::error::{snippet, Error, Result};

/// Build a client whose every request is bounded by `timeout_secs`.
pub(crate) fn build_client(timeout_secs: u64) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .user_agent(concat!("ontotag/", env!("CARGO_PKG_VERSION")))
        .build()?)
}

/// Pass 2xx responses through, turn anything else into an upstream error.
pub(crate) async fn ensure_success(resp: Response, service: &'static str) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    Err(upstream(resp, service).await)
}

/// Consume a non-2xx response into [`Error::Upstream`].
pub(crate) async fn upstream(resp: Response, service: &'static str) -> Error {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    tracing::debug!(service, status = status.as_u16(), body = %body, "upstream failure");
    Error::Upstream {
        service,
        status: status.as_u16(),
        body: snippet(&body),
    }
}

/// Read a 2xx response body as JSON.
pub(crate) async fn read_json(resp: Response, service: &'static str) -> Result<Value> {
    let resp = ensure_success(resp, service).await?;
    let text = resp.text().await?;
    serde_json::from_str(&text).map_err(|source| {
        tracing::error!(service, body = %text, "response is not JSON");
        Error::Validation {
            context: service,
            source,
        }
    })
}

pub(crate) fn is_not_found(status: StatusCode) -> bool {
    status == StatusCode::NOT_FOUND
}

/// URI-encode a string per RFC 3986.
///
/// Encodes everything except the unreserved set `A-Z a-z 0-9 - _ . ~`.
pub(crate) fn uri_encode(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            _ => {
                result.push_str(&format!("%{:02X}", byte));
            }
        }
    }
    result
}

/// Join a base URL and a path without doubling or dropping the slash.
pub(crate) fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uri_encode_keeps_unreserved() {
        assert_eq!(uri_encode("abc-_.~123"), "abc-_.~123");
        assert_eq!(uri_encode("a b/c=="), "a%20b%2Fc%3D%3D");
    }

    #[test]
    fn join_url_normalizes_slashes() {
        assert_eq!(join_url("http://es:9200/", "/docs/_search"), "http://es:9200/docs/_search");
        assert_eq!(join_url("http://es:9200", "docs"), "http://es:9200/docs");
    }
}
