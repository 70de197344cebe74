//! TOML configuration.
//!
//! The whole process is configured from one file, loaded once in `main` and
//! passed down explicitly. See `config/ontotag.example.toml`.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    pub search: SearchConfig,
    #[serde(default)]
    pub graph: GraphConfig,
    #[serde(default)]
    pub repository: RepositoryConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub extractor: ExtractorConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/ontotag.sqlite"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    pub url: String,
    #[serde(default = "default_documents_index")]
    pub documents_index: String,
    #[serde(default = "default_terms_index")]
    pub terms_index: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_health_timeout_secs")]
    pub health_timeout_secs: u64,
    #[serde(default = "default_scroll_page_size")]
    pub scroll_page_size: usize,
    #[serde(default = "default_scroll_timeout_minutes")]
    pub scroll_timeout_minutes: u32,
    #[serde(default = "default_percolate_size")]
    pub percolate_size: usize,
}

fn default_documents_index() -> String {
    "documents".to_string()
}
fn default_terms_index() -> String {
    "terms".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_health_timeout_secs() -> u64 {
    3
}
fn default_scroll_page_size() -> usize {
    500
}
fn default_scroll_timeout_minutes() -> u32 {
    60
}
fn default_percolate_size() -> usize {
    300
}

#[derive(Debug, Deserialize, Clone)]
pub struct GraphConfig {
    #[serde(default = "default_graph_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_graph_page_size")]
    pub page_size: usize,
    #[serde(default = "default_stopwords")]
    pub stopwords: Vec<String>,
    #[serde(default)]
    pub terminologies: Vec<TerminologyConfig>,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            endpoint: default_graph_endpoint(),
            timeout_secs: default_timeout_secs(),
            page_size: default_graph_page_size(),
            stopwords: default_stopwords(),
            terminologies: Vec::new(),
        }
    }
}

fn default_graph_endpoint() -> String {
    "http://localhost:3030/ontologies/query".to_string()
}
fn default_graph_page_size() -> usize {
    500
}
fn default_stopwords() -> Vec<String> {
    ["and", "are", "for", "from", "not", "the", "this", "that", "with", "was"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// One ontology mirrored into the terms index.
#[derive(Debug, Deserialize, Clone)]
pub struct TerminologyConfig {
    pub name: String,
    pub named_graph: String,
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub query_file: Option<PathBuf>,
}

impl TerminologyConfig {
    /// The term-listing query template, without `LIMIT`/`OFFSET`.
    pub fn query_template(&self) -> Result<String> {
        match (&self.query, &self.query_file) {
            (Some(q), None) => Ok(q.clone()),
            (None, Some(path)) => std::fs::read_to_string(path).with_context(|| {
                format!(
                    "Failed to read query file for terminology '{}': {}",
                    self.name,
                    path.display()
                )
            }),
            _ => bail!(
                "terminology '{}' needs exactly one of query or query_file",
                self.name
            ),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RepositoryConfig {
    #[serde(default = "default_repository_url")]
    pub base_url: String,
    #[serde(default)]
    pub feed_url: Option<String>,
    #[serde(default = "default_content_mime_types")]
    pub content_mime_types: Vec<String>,
    #[serde(default = "default_repository_page_size")]
    pub page_size: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            base_url: default_repository_url(),
            feed_url: None,
            content_mime_types: default_content_mime_types(),
            page_size: default_repository_page_size(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl RepositoryConfig {
    pub fn feed_url(&self) -> String {
        self.feed_url
            .clone()
            .unwrap_or_else(|| format!("{}/feed/rss_2.0/site", self.base_url.trim_end_matches('/')))
    }
}

fn default_repository_url() -> String {
    "http://localhost:8080".to_string()
}
fn default_content_mime_types() -> Vec<String> {
    vec![
        "application/pdf".to_string(),
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document".to_string(),
    ]
}
fn default_repository_page_size() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_storage_backend")]
    pub backend: String,
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
    #[serde(default)]
    pub s3: Option<S3StorageConfig>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            root: default_storage_root(),
            s3: None,
        }
    }
}

fn default_storage_backend() -> String {
    "filesystem".to_string()
}
fn default_storage_root() -> PathBuf {
    PathBuf::from("./data/objects")
}

#[derive(Debug, Deserialize, Clone)]
pub struct S3StorageConfig {
    pub bucket: String,
    #[serde(default)]
    pub prefix: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub endpoint_url: Option<String>,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExtractorConfig {
    #[serde(default = "default_extractor_backend")]
    pub backend: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_extractor_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            backend: default_extractor_backend(),
            url: None,
            timeout_secs: default_extractor_timeout_secs(),
        }
    }
}

fn default_extractor_backend() -> String {
    "local".to_string()
}
fn default_extractor_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_max_deliveries")]
    pub max_deliveries: u32,
    #[serde(default = "default_redelivery_delay_ms")]
    pub redelivery_delay_ms: u64,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            max_deliveries: default_max_deliveries(),
            redelivery_delay_ms: default_redelivery_delay_ms(),
            poll_interval_secs: default_poll_interval_secs(),
        }
    }
}

fn default_concurrency() -> usize {
    8
}
fn default_max_deliveries() -> u32 {
    3
}
fn default_redelivery_delay_ms() -> u64 {
    500
}
fn default_poll_interval_secs() -> u64 {
    900
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:7331".to_string(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.search.url.trim().is_empty() {
        bail!("search.url must not be empty");
    }
    if config.search.scroll_page_size == 0 {
        bail!("search.scroll_page_size must be > 0");
    }
    if config.search.percolate_size == 0 {
        bail!("search.percolate_size must be >= 1");
    }
    if config.graph.page_size == 0 {
        bail!("graph.page_size must be > 0");
    }
    if config.repository.page_size == 0 {
        bail!("repository.page_size must be > 0");
    }
    if config.pipeline.max_deliveries == 0 {
        bail!("pipeline.max_deliveries must be >= 1");
    }
    if config.pipeline.concurrency == 0 {
        bail!("pipeline.concurrency must be >= 1");
    }
    if config.pipeline.poll_interval_secs == 0 {
        bail!("pipeline.poll_interval_secs must be > 0");
    }

    for t in &config.graph.terminologies {
        if t.query.is_some() == t.query_file.is_some() {
            bail!(
                "terminology '{}' needs exactly one of query or query_file",
                t.name
            );
        }
    }

    match config.storage.backend.as_str() {
        "filesystem" | "memory" => {}
        "s3" => {
            if config.storage.s3.is_none() {
                bail!("storage.s3 must be configured when storage.backend is 's3'");
            }
        }
        other => bail!(
            "Unknown storage backend: '{}'. Must be filesystem, s3, or memory.",
            other
        ),
    }

    match config.extractor.backend.as_str() {
        "local" => {}
        "tika" => {
            if config.extractor.url.is_none() {
                bail!("extractor.url must be set when extractor.backend is 'tika'");
            }
        }
        other => bail!(
            "Unknown extractor backend: '{}'. Must be local or tika.",
            other
        ),
    }

    Ok(())
}
