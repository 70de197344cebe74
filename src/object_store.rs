//! Durable object storage for stage outputs.
//!
//! Stages hand each other data through objects (metadata snapshots,
//! bitstreams, extracted text) rather than through events. Three backends
//! implement [`ObjectStore`]:
//!
//! | Backend | Type | Notes |
//! |---------|------|-------|
//! | `filesystem` | [`FsObjectStore`] | keys are relative paths under a root directory |
//! | `memory` | [`MemoryObjectStore`] | tests and one-shot runs |
//! | `s3` | [`S3ObjectStore`] | S3 REST API, AWS Signature V4, MinIO/LocalStack via `endpoint_url` |
//!
//! [`NotifyingStore`] wraps any backend and publishes
//! [`Event::ObjectCreated`] after each successful put. That is the only way
//! object creation is observed by the pipeline.
//!
//! S3 credentials are read from `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`
//! and optionally `AWS_SESSION_TOKEN` when the store is built.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

use crate::bus::{Bus, Event, ObjectKey};
use crate::config::{S3StorageConfig, StorageConfig};
use crate::error::{Error, Result};
use crate::http::{build_client, ensure_success, is_not_found, upstream, uri_encode};

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()>;

    /// `Ok(None)` when the key does not exist.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    async fn exists(&self, key: &str) -> Result<bool>;
}

/// Build the backend named in the configuration.
pub fn from_config(config: &StorageConfig) -> Result<Arc<dyn ObjectStore>> {
    match config.backend.as_str() {
        "filesystem" => Ok(Arc::new(FsObjectStore::new(&config.root))),
        "memory" => Ok(Arc::new(MemoryObjectStore::default())),
        "s3" => {
            let s3 = config
                .s3
                .as_ref()
                .ok_or_else(|| Error::Config("storage.s3 is not configured".to_string()))?;
            Ok(Arc::new(S3ObjectStore::new(s3.clone(), AwsCredentials::from_env()?)?))
        }
        other => Err(Error::Config(format!("unknown storage backend: {}", other))),
    }
}

// ============ Notify-on-create ============

/// Publishes [`Event::ObjectCreated`] for every successful put whose key is
/// a pipeline [`ObjectKey`].
#[derive(Clone)]
pub struct NotifyingStore {
    inner: Arc<dyn ObjectStore>,
    bus: Bus,
}

impl NotifyingStore {
    pub fn new(inner: Arc<dyn ObjectStore>, bus: Bus) -> Self {
        Self { inner, bus }
    }

    pub async fn put(&self, key: &ObjectKey, bytes: Vec<u8>) -> Result<()> {
        self.inner.put(&key.path(), bytes).await?;
        self.bus.publish(Event::ObjectCreated { key: key.clone() });
        Ok(())
    }

    pub async fn get(&self, key: &ObjectKey) -> Result<Option<Vec<u8>>> {
        self.inner.get(&key.path()).await
    }

    pub async fn exists(&self, key: &ObjectKey) -> Result<bool> {
        self.inner.exists(&key.path()).await
    }
}

// ============ Filesystem ============

pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        if key.split('/').any(|part| part.is_empty() || part == "." || part == "..") {
            return Err(Error::Config(format!("invalid object key: {}", key)));
        }
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        // Write then rename so readers never see a partial object.
        let tmp = path.with_extension("partial");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match tokio::fs::read(self.path_for(key)?).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.path_for(key)?).await?)
    }
}

// ============ Memory ============

#[derive(Default)]
pub struct MemoryObjectStore {
    objects: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryObjectStore {
    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        self.objects.write().await.insert(key.to_string(), bytes);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.objects.read().await.get(key).cloned())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.objects.read().await.contains_key(key))
    }
}

// ============ S3 ============

const S3_SERVICE: &str = "object store";

type HmacSha256 = Hmac<Sha256>;

/// AWS credentials loaded from environment variables.
#[derive(Clone)]
pub struct AwsCredentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
}

impl AwsCredentials {
    pub fn new(access_key_id: &str, secret_access_key: &str, session_token: Option<&str>) -> Self {
        Self {
            access_key_id: access_key_id.to_string(),
            secret_access_key: secret_access_key.to_string(),
            session_token: session_token.map(str::to_string),
        }
    }

    pub fn from_env() -> Result<Self> {
        let var = |name: &str| {
            std::env::var(name)
                .map_err(|_| Error::Config(format!("{} environment variable not set", name)))
        };
        Ok(Self {
            access_key_id: var("AWS_ACCESS_KEY_ID")?,
            secret_access_key: var("AWS_SECRET_ACCESS_KEY")?,
            session_token: std::env::var("AWS_SESSION_TOKEN").ok(),
        })
    }
}

pub struct S3ObjectStore {
    http: reqwest::Client,
    config: S3StorageConfig,
    creds: AwsCredentials,
}

impl S3ObjectStore {
    pub fn new(config: S3StorageConfig, creds: AwsCredentials) -> Result<Self> {
        Ok(Self {
            http: build_client(60)?,
            config,
            creds,
        })
    }

    /// Scheme, host, and canonical URI for `key`.
    ///
    /// AWS uses virtual-hosted addressing; custom endpoints use path-style
    /// addressing, which is what MinIO and LocalStack expect.
    fn locate(&self, key: &str) -> (String, String, String) {
        let full_key = if self.config.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}/{}", self.config.prefix.trim_end_matches('/'), key)
        };
        let encoded_key = full_key.split('/').map(uri_encode).collect::<Vec<_>>().join("/");
        match &self.config.endpoint_url {
            Some(endpoint) => {
                let scheme = if endpoint.starts_with("http://") { "http" } else { "https" };
                let host = endpoint
                    .trim_start_matches("https://")
                    .trim_start_matches("http://")
                    .trim_end_matches('/')
                    .to_string();
                let uri = format!("/{}/{}", uri_encode(&self.config.bucket), encoded_key);
                (scheme.to_string(), host, uri)
            }
            None => (
                "https".to_string(),
                format!("{}.s3.{}.amazonaws.com", self.config.bucket, self.config.region),
                format!("/{}", encoded_key),
            ),
        }
    }

    fn signed(&self, method: reqwest::Method, key: &str, body: &[u8]) -> reqwest::RequestBuilder {
        let (scheme, host, canonical_uri) = self.locate(key);
        let now = Utc::now();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date_stamp = now.format("%Y%m%d").to_string();
        let payload_hash = hex_sha256(body);

        let authorization = sign_v4(&SigningInput {
            method: method.as_str(),
            host: &host,
            canonical_uri: &canonical_uri,
            payload_hash: &payload_hash,
            amz_date: &amz_date,
            date_stamp: &date_stamp,
            region: &self.config.region,
            creds: &self.creds,
        });

        let mut req = self
            .http
            .request(method, format!("{}://{}{}", scheme, host, canonical_uri))
            .header("Authorization", authorization)
            .header("x-amz-content-sha256", payload_hash)
            .header("x-amz-date", amz_date);
        if let Some(ref token) = self.creds.session_token {
            req = req.header("x-amz-security-token", token);
        }
        req
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        let req = self.signed(reqwest::Method::PUT, key, &bytes);
        let resp = req.body(bytes).send().await?;
        ensure_success(resp, S3_SERVICE).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let resp = self.signed(reqwest::Method::GET, key, b"").send().await?;
        if is_not_found(resp.status()) {
            return Ok(None);
        }
        let resp = ensure_success(resp, S3_SERVICE).await?;
        Ok(Some(resp.bytes().await?.to_vec()))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let resp = self.signed(reqwest::Method::HEAD, key, b"").send().await?;
        match resp.status() {
            s if s.is_success() => Ok(true),
            s if is_not_found(s) => Ok(false),
            _ => Err(upstream(resp, S3_SERVICE).await),
        }
    }
}

// ============ AWS SigV4 Helpers ============

struct SigningInput<'a> {
    method: &'a str,
    host: &'a str,
    canonical_uri: &'a str,
    payload_hash: &'a str,
    amz_date: &'a str,
    date_stamp: &'a str,
    region: &'a str,
    creds: &'a AwsCredentials,
}

/// The `Authorization` header value for a request without query parameters.
fn sign_v4(input: &SigningInput<'_>) -> String {
    let mut headers = vec![
        ("host", input.host.to_string()),
        ("x-amz-content-sha256", input.payload_hash.to_string()),
        ("x-amz-date", input.amz_date.to_string()),
    ];
    if let Some(ref token) = input.creds.session_token {
        headers.push(("x-amz-security-token", token.clone()));
    }
    headers.sort_by(|a, b| a.0.cmp(b.0));

    let signed_headers = headers.iter().map(|(k, _)| *k).collect::<Vec<_>>().join(";");
    let canonical_headers: String = headers.iter().map(|(k, v)| format!("{}:{}\n", k, v)).collect();

    let canonical_request = format!(
        "{}\n{}\n\n{}\n{}\n{}",
        input.method, input.canonical_uri, canonical_headers, signed_headers, input.payload_hash
    );

    let credential_scope = format!("{}/{}/s3/aws4_request", input.date_stamp, input.region);
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{}\n{}\n{}",
        input.amz_date,
        credential_scope,
        hex_sha256(canonical_request.as_bytes())
    );

    let signing_key = derive_signing_key(&input.creds.secret_access_key, input.date_stamp, input.region, "s3");
    let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes()));

    format!(
        "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
        input.creds.access_key_id, credential_scope, signed_headers, signature
    )
}

fn hex_sha256(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// ```text
/// kDate    = HMAC("AWS4" + secret, dateStamp)
/// kRegion  = HMAC(kDate, region)
/// kService = HMAC(kRegion, service)
/// kSigning = HMAC(kService, "aws4_request")
/// ```
fn derive_signing_key(secret_key: &str, date_stamp: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(format!("AWS4{}", secret_key).as_bytes(), date_stamp.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fs_store_round_trips_and_reports_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());
        assert_eq!(store.get("metadata/a.json").await.unwrap(), None);
        assert!(!store.exists("metadata/a.json").await.unwrap());

        store.put("metadata/a.json", b"{}".to_vec()).await.unwrap();
        assert_eq!(store.get("metadata/a.json").await.unwrap(), Some(b"{}".to_vec()));
        assert!(store.exists("metadata/a.json").await.unwrap());
        assert!(!dir.path().join("metadata/a.partial").exists());
    }

    #[tokio::test]
    async fn fs_store_rejects_escaping_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());
        assert!(store.put("../x.json", vec![]).await.is_err());
        assert!(store.get("a//b").await.is_err());
    }

    #[tokio::test]
    async fn notifying_store_announces_puts() {
        let (bus, mut sub) = Bus::new();
        let store = NotifyingStore::new(Arc::new(MemoryObjectStore::default()), bus.clone());
        let key = ObjectKey::ExtractedText("d1".into());
        store.put(&key, b"text".to_vec()).await.unwrap();

        let env = sub.recv().await.unwrap();
        assert_eq!(env.event, Event::ObjectCreated { key: key.clone() });
        assert!(store.exists(&key).await.unwrap());
    }

    #[test]
    fn signing_key_matches_aws_example() {
        // Published AWS SigV4 example (IAM, us-east-1, 2015-08-30).
        let key = derive_signing_key(
            "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY",
            "20150830",
            "us-east-1",
            "iam",
        );
        assert_eq!(
            hex::encode(key),
            "c4afb1cc5771d871763a393e44b703571b55cc28424d1a5e86da6ed3c154a4b9"
        );
    }

    #[test]
    fn custom_endpoints_use_path_style() {
        let store = S3ObjectStore::new(
            S3StorageConfig {
                bucket: "docs".into(),
                prefix: "ontotag/".into(),
                region: "us-east-1".into(),
                endpoint_url: Some("http://localhost:9000".into()),
            },
            AwsCredentials::new("id", "secret", None),
        )
        .unwrap();
        let (scheme, host, uri) = store.locate("metadata/a b.json");
        assert_eq!(scheme, "http");
        assert_eq!(host, "localhost:9000");
        assert_eq!(uri, "/docs/ontotag/metadata/a%20b.json");
    }
}
