//! Text extraction from downloaded bitstreams.
//!
//! [`Extractor`] turns a bitstream into plain UTF-8 text. Two backends:
//!
//! - [`LocalExtractor`] parses PDF (`pdf-extract`) and DOCX (`zip` +
//!   `quick-xml`) in-process on a blocking thread;
//! - [`TikaExtractor`] sends the bytes to an Apache Tika server
//!   (`PUT {url}/tika`, `Accept: text/plain`).
//!
//! The extractor-invocation stage stores the result as `extracted/{id}.txt`.

use std::io::Read;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::ExtractorConfig;
use crate::error::{Error, Result};
use crate::http::{build_client, ensure_success, join_url};

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, document_id: &str, bytes: Vec<u8>, mime_type: &str) -> Result<String>;
}

pub fn from_config(config: &ExtractorConfig) -> Result<Arc<dyn Extractor>> {
    match config.backend.as_str() {
        "local" => Ok(Arc::new(LocalExtractor)),
        "tika" => {
            let url = config
                .url
                .as_deref()
                .ok_or_else(|| Error::Config("extractor.url is required for tika".to_string()))?;
            Ok(Arc::new(TikaExtractor::new(url, config.timeout_secs)?))
        }
        other => Err(Error::Config(format!("unknown extractor backend: {}", other))),
    }
}

/// File extension used when storing a bitstream of `mime_type`.
pub fn extension_for(mime_type: &str) -> &'static str {
    match mime_type {
        MIME_PDF => "pdf",
        MIME_DOCX => "docx",
        "application/msword" => "doc",
        "text/plain" => "txt",
        "text/html" => "html",
        _ => "bin",
    }
}

/// Inverse of [`extension_for`].
pub fn mime_for(extension: &str) -> &'static str {
    match extension {
        "pdf" => MIME_PDF,
        "docx" => MIME_DOCX,
        "doc" => "application/msword",
        "txt" => "text/plain",
        "html" => "text/html",
        _ => "application/octet-stream",
    }
}

// ============ Local ============

pub struct LocalExtractor;

#[async_trait]
impl Extractor for LocalExtractor {
    async fn extract(&self, document_id: &str, bytes: Vec<u8>, mime_type: &str) -> Result<String> {
        let mime = mime_type.to_string();
        let text = tokio::task::spawn_blocking(move || extract_text(&bytes, &mime))
            .await
            .map_err(|e| Error::Extraction(format!("extraction task failed: {}", e)))??;
        tracing::debug!(document_id, chars = text.len(), "extracted text locally");
        Ok(text)
    }
}

/// Extract plain text from `bytes` of the given content type.
pub fn extract_text(bytes: &[u8], content_type: &str) -> Result<String> {
    match content_type {
        MIME_PDF => pdf_extract::extract_text_from_mem(bytes)
            .map_err(|e| Error::Extraction(format!("PDF: {}", e))),
        MIME_DOCX => extract_docx(bytes),
        "text/plain" => Ok(String::from_utf8_lossy(bytes).into_owned()),
        other => Err(Error::Extraction(format!("unsupported content-type: {}", other))),
    }
}

fn ooxml_error(e: impl std::fmt::Display) -> Error {
    Error::Extraction(format!("DOCX: {}", e))
}

fn extract_docx(bytes: &[u8]) -> Result<String> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(ooxml_error)?;
    let entry = archive.by_name("word/document.xml").map_err(ooxml_error)?;
    let mut doc_xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut doc_xml)
        .map_err(ooxml_error)?;
    if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ooxml_error("word/document.xml exceeds size limit"));
    }
    paragraph_text(&doc_xml)
}

/// Concatenate `w:t` runs, one line per `w:p` paragraph.
fn paragraph_text(xml: &[u8]) -> Result<String> {
    use quick_xml::events::Event;

    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(false);
    let mut buf = Vec::new();
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::Text(te)) if in_text => {
                out.push_str(&te.unescape().map_err(ooxml_error)?);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" if !out.is_empty() && !out.ends_with('\n') => out.push('\n'),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ooxml_error(e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(out.trim_end().to_string())
}

// ============ Tika ============

pub struct TikaExtractor {
    http: reqwest::Client,
    url: String,
}

impl TikaExtractor {
    pub fn new(url: &str, timeout_secs: u64) -> Result<Self> {
        Ok(Self {
            http: build_client(timeout_secs)?,
            url: join_url(url, "tika"),
        })
    }
}

#[async_trait]
impl Extractor for TikaExtractor {
    async fn extract(&self, document_id: &str, bytes: Vec<u8>, mime_type: &str) -> Result<String> {
        let resp = self
            .http
            .put(&self.url)
            .header("content-type", mime_type)
            .header("accept", "text/plain")
            .body(bytes)
            .send()
            .await?;
        let text = ensure_success(resp, "extraction service").await?.text().await?;
        tracing::debug!(document_id, chars = text.len(), "extracted text with tika");
        Ok(text)
    }
}
