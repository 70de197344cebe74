//! Source repository access.
//!
//! [`Repository`] is the read-only view of the document repository the
//! pipeline needs. [`DspaceRepository`] implements it over the DSpace 6 REST
//! API and the site-wide RSS 2.0 feed.
//!
//! | Operation | Request |
//! |-----------|---------|
//! | `find` | `GET {base}/rest/handle/{handle}?expand=metadata,bitstreams` |
//! | `get_item` | `GET {base}/rest/items/{id}?expand=metadata,bitstreams` |
//! | `get_items` | `GET {base}/rest/items?offset=&limit=&expand=...` |
//! | `get_metadata` | `GET {base}/rest/items/{id}/metadata` |
//! | `get_bitstream` | `GET {base}{retrieveLink}` |
//! | `get_feed` | `GET {feed_url}` |
//!
//! A 404 on any lookup is `Ok(None)`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quick_xml::events::Event;
use quick_xml::Reader;

use crate::config::RepositoryConfig;
use crate::error::{validate, Error, Result};
use crate::http::{build_client, ensure_success, is_not_found, join_url, read_json};
use crate::models::{DocumentItem, FeedEntry, Metadata};

const SERVICE: &str = "repository";
const EXPAND: &str = "metadata,bitstreams";

#[async_trait]
pub trait Repository: Send + Sync {
    /// Resolve a persistent handle to its item.
    async fn find(&self, handle: &str) -> Result<Option<DocumentItem>>;

    async fn get_item(&self, id: &str) -> Result<Option<DocumentItem>>;

    /// One page of all items, in repository order.
    async fn get_items(&self, offset: usize, limit: usize) -> Result<Vec<DocumentItem>>;

    async fn get_metadata(&self, id: &str) -> Result<Option<Vec<Metadata>>>;

    /// Download a bitstream by its `retrieveLink`.
    async fn get_bitstream(&self, link: &str) -> Result<Option<Vec<u8>>>;

    async fn get_feed(&self) -> Result<Vec<FeedEntry>>;
}

pub struct DspaceRepository {
    http: reqwest::Client,
    base_url: String,
    feed_url: String,
}

impl DspaceRepository {
    pub fn new(config: &RepositoryConfig) -> Result<Self> {
        Ok(Self {
            http: build_client(config.timeout_secs)?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            feed_url: config.feed_url(),
        })
    }

    fn rest(&self, path: &str) -> String {
        join_url(&self.base_url, &format!("rest/{}", path.trim_start_matches('/')))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: String,
        query: &[(&str, String)],
        context: &'static str,
    ) -> Result<Option<T>> {
        let resp = self
            .http
            .get(url)
            .header("accept", "application/json")
            .query(query)
            .send()
            .await?;
        if is_not_found(resp.status()) {
            return Ok(None);
        }
        let body = read_json(resp, SERVICE).await?;
        validate(context, body).map(Some)
    }
}

#[async_trait]
impl Repository for DspaceRepository {
    async fn find(&self, handle: &str) -> Result<Option<DocumentItem>> {
        self.get_json(
            self.rest(&format!("handle/{}", handle)),
            &[("expand", EXPAND.to_string())],
            "repository item",
        )
        .await
    }

    async fn get_item(&self, id: &str) -> Result<Option<DocumentItem>> {
        self.get_json(
            self.rest(&format!("items/{}", id)),
            &[("expand", EXPAND.to_string())],
            "repository item",
        )
        .await
    }

    async fn get_items(&self, offset: usize, limit: usize) -> Result<Vec<DocumentItem>> {
        let items: Option<Vec<DocumentItem>> = self
            .get_json(
                self.rest("items"),
                &[
                    ("offset", offset.to_string()),
                    ("limit", limit.to_string()),
                    ("expand", EXPAND.to_string()),
                ],
                "repository items",
            )
            .await?;
        Ok(items.unwrap_or_default())
    }

    async fn get_metadata(&self, id: &str) -> Result<Option<Vec<Metadata>>> {
        self.get_json(self.rest(&format!("items/{}/metadata", id)), &[], "repository metadata")
            .await
    }

    async fn get_bitstream(&self, link: &str) -> Result<Option<Vec<u8>>> {
        let resp = self.http.get(join_url(&self.base_url, link)).send().await?;
        if is_not_found(resp.status()) {
            return Ok(None);
        }
        let resp = ensure_success(resp, SERVICE).await?;
        Ok(Some(resp.bytes().await?.to_vec()))
    }

    async fn get_feed(&self) -> Result<Vec<FeedEntry>> {
        let resp = self.http.get(&self.feed_url).send().await?;
        let resp = ensure_success(resp, SERVICE).await?;
        let body = resp.text().await?;
        parse_feed(&body)
    }
}

// ============ RSS ============

#[derive(Default)]
struct PendingEntry {
    link: String,
    title: String,
    pub_date: String,
    dc_date: String,
}

/// Parse an RSS 2.0 document into feed entries.
///
/// Entries without a `/handle/` link or a readable date are skipped with a
/// warning; they cannot be scheduled.
pub fn parse_feed(xml: &str) -> Result<Vec<FeedEntry>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut entries = Vec::new();
    let mut current: Option<PendingEntry> = None;
    let mut field: Option<Vec<u8>> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = e.local_name().as_ref().to_vec();
                if name == b"item" {
                    current = Some(PendingEntry::default());
                } else if current.is_some() {
                    field = Some(name);
                }
            }
            Ok(Event::Text(t)) => {
                if let (Some(entry), Some(name)) = (current.as_mut(), field.as_deref()) {
                    let text = t
                        .unescape()
                        .map_err(|e| Error::Feed(e.to_string()))?;
                    push_field(entry, name, &text);
                }
            }
            Ok(Event::CData(c)) => {
                if let (Some(entry), Some(name)) = (current.as_mut(), field.as_deref()) {
                    push_field(entry, name, &String::from_utf8_lossy(&c.into_inner()));
                }
            }
            Ok(Event::End(e)) => {
                if e.local_name().as_ref() == b"item" {
                    if let Some(pending) = current.take() {
                        if let Some(entry) = finish_entry(pending) {
                            entries.push(entry);
                        }
                    }
                }
                field = None;
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(Error::Feed(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(entries)
}

fn push_field(entry: &mut PendingEntry, name: &[u8], text: &str) {
    let slot = match name {
        b"link" => &mut entry.link,
        b"title" => &mut entry.title,
        b"pubDate" => &mut entry.pub_date,
        b"date" => &mut entry.dc_date,
        _ => return,
    };
    slot.push_str(text.trim());
}

fn finish_entry(pending: PendingEntry) -> Option<FeedEntry> {
    let Some(handle) = handle_from_link(&pending.link) else {
        tracing::warn!(link = %pending.link, "feed entry has no handle link");
        return None;
    };
    let Some(published) = parse_date(&pending.pub_date).or_else(|| parse_date(&pending.dc_date)) else {
        tracing::warn!(handle = %handle, "feed entry has no readable date");
        return None;
    };
    Some(FeedEntry {
        handle,
        link: pending.link,
        title: (!pending.title.is_empty()).then_some(pending.title),
        published,
    })
}

/// `http://repo/handle/11329/1001` → `11329/1001`.
pub fn handle_from_link(link: &str) -> Option<String> {
    let (_, rest) = link.split_once("/handle/")?;
    let handle = rest.trim_end_matches('/');
    (!handle.is_empty()).then(|| handle.to_string())
}

fn parse_date(s: &str) -> Option<DateTime<Utc>> {
    if s.is_empty() {
        return None;
    }
    DateTime::parse_from_rfc2822(s)
        .or_else(|_| DateTime::parse_from_rfc3339(s))
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:dc="http://purl.org/dc/elements/1.1/">
  <channel>
    <title>Repository</title>
    <link>http://repo.example.org</link>
    <item>
      <title>Seawater &amp; salinity</title>
      <link>http://repo.example.org/handle/11329/1001</link>
      <pubDate>Thu, 04 Mar 2021 10:11:12 GMT</pubDate>
    </item>
    <item>
      <title><![CDATA[Sea ice <draft>]]></title>
      <link>http://repo.example.org/handle/11329/1002</link>
      <dc:date>2021-03-05T08:00:00Z</dc:date>
    </item>
    <item>
      <title>No handle</title>
      <link>http://repo.example.org/about</link>
      <pubDate>Thu, 04 Mar 2021 10:11:12 GMT</pubDate>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn parses_items_and_skips_unschedulable_ones() {
        let entries = parse_feed(FEED).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].handle, "11329/1001");
        assert_eq!(entries[0].title.as_deref(), Some("Seawater & salinity"));
        assert_eq!(
            entries[0].published,
            Utc.with_ymd_and_hms(2021, 3, 4, 10, 11, 12).unwrap()
        );
        assert_eq!(entries[1].title.as_deref(), Some("Sea ice <draft>"));
        assert_eq!(
            entries[1].published,
            Utc.with_ymd_and_hms(2021, 3, 5, 8, 0, 0).unwrap()
        );
    }

    #[test]
    fn channel_fields_are_ignored() {
        let entries = parse_feed(FEED).unwrap();
        assert!(entries.iter().all(|e| e.link != "http://repo.example.org"));
    }

    #[test]
    fn handle_is_taken_after_marker() {
        assert_eq!(
            handle_from_link("http://r/handle/123/45/").as_deref(),
            Some("123/45")
        );
        assert_eq!(handle_from_link("http://r/items/1"), None);
    }
}
