use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::info;

use crate::config::{StorageBackend, StorageConfig};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Storage misconfigured: {0}")]
    Misconfigured(String),

    #[error("Unsupported content type '{0}'")]
    UnsupportedType(String),

    #[error("Object '{0}' not found")]
    NotFound(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub key: String,
    pub url: String,
}

/// Binary object storage for concession proofs and expense bills.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn store(&self, bytes: Vec<u8>, mime: &str) -> Result<StoredObject, StorageError>;

    /// Read back a stored object
    async fn fetch(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    /// Time-limited URL for a stored key
    fn sign(&self, key: &str, ttl: Duration) -> String;

    /// Check the `expires` and `signature` query values of a signed URL
    fn verify(&self, key: &str, expires: i64, signature: &str) -> bool;
}

fn extension_for(mime: &str) -> Result<&'static str, StorageError> {
    match mime {
        "application/pdf" => Ok("pdf"),
        "image/png" => Ok("png"),
        "image/jpeg" | "image/jpg" => Ok("jpg"),
        "image/webp" => Ok("webp"),
        other => Err(StorageError::UnsupportedType(other.to_string())),
    }
}

/// Mime type served back for a stored key
pub fn mime_for_key(key: &str) -> &'static str {
    match key.rsplit_once('.').map(|(_, ext)| ext) {
        Some("pdf") => "application/pdf",
        Some("png") => "image/png",
        Some("jpg") => "image/jpeg",
        Some("webp") => "image/webp",
        _ => "application/octet-stream",
    }
}

/// Content-addressed key: identical uploads share one object
fn content_key(bytes: &[u8], mime: &str) -> Result<String, StorageError> {
    let digest = Sha256::digest(bytes);
    Ok(format!("{:x}.{}", digest, extension_for(mime)?))
}

/// Keys are `<hex digest>.<ext>`; anything else never names a stored object
fn is_content_key(key: &str) -> bool {
    match key.split_once('.') {
        Some((digest, ext)) => {
            digest.len() == 64
                && digest.bytes().all(|b| b.is_ascii_hexdigit())
                && !ext.is_empty()
                && ext.bytes().all(|b| b.is_ascii_alphanumeric())
        }
        None => false,
    }
}

/// Equality that inspects every byte regardless of where the first mismatch is
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Signs public URLs as `<base>/<key>?expires=<unix>&signature=<sha256>`.
#[derive(Debug, Clone)]
pub struct UrlSigner {
    base_url: String,
    signing_key: String,
}

impl UrlSigner {
    pub fn new(base_url: impl Into<String>, signing_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            signing_key: signing_key.into(),
        }
    }

    pub fn url(&self, key: &str) -> String {
        format!("{}/{}", self.base_url, key)
    }

    fn signature(&self, key: &str, expires: i64) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.signing_key.as_bytes());
        hasher.update(b":");
        hasher.update(key.as_bytes());
        hasher.update(b":");
        hasher.update(expires.to_string().as_bytes());
        format!("{:x}", hasher.finalize())
    }

    pub fn sign(&self, key: &str, ttl: Duration) -> String {
        let expires = Utc::now().timestamp() + ttl.as_secs() as i64;
        format!(
            "{}?expires={}&signature={}",
            self.url(key),
            expires,
            self.signature(key, expires)
        )
    }

    pub fn verify(&self, key: &str, expires: i64, signature: &str) -> bool {
        expires >= Utc::now().timestamp()
            && constant_time_eq(self.signature(key, expires).as_bytes(), signature.as_bytes())
    }
}

/// Objects written under a local directory.
pub struct LocalObjectStorage {
    root: PathBuf,
    signer: UrlSigner,
}

impl LocalObjectStorage {
    pub fn new(root: impl Into<PathBuf>, signer: UrlSigner) -> Self {
        Self {
            root: root.into(),
            signer,
        }
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

#[async_trait]
impl ObjectStorage for LocalObjectStorage {
    async fn store(&self, bytes: Vec<u8>, mime: &str) -> Result<StoredObject, StorageError> {
        let key = content_key(&bytes, mime)?;
        tokio::fs::create_dir_all(&self.root).await?;
        tokio::fs::write(self.path_for(&key), &bytes).await?;
        info!(key = %key, size = bytes.len(), "Stored object locally");
        Ok(StoredObject {
            url: self.signer.url(&key),
            key,
        })
    }

    async fn fetch(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        if !is_content_key(key) {
            return Err(StorageError::NotFound(key.to_string()));
        }
        match tokio::fs::read(self.path_for(key)).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StorageError::NotFound(key.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    fn sign(&self, key: &str, ttl: Duration) -> String {
        self.signer.sign(key, ttl)
    }

    fn verify(&self, key: &str, expires: i64, signature: &str) -> bool {
        self.signer.verify(key, expires, signature)
    }
}

/// Objects PUT to a bucket-style HTTP endpoint.
pub struct HttpObjectStorage {
    client: reqwest::Client,
    endpoint: String,
    signer: UrlSigner,
}

impl HttpObjectStorage {
    pub fn new(endpoint: impl Into<String>, signer: UrlSigner) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            signer,
        }
    }
}

#[async_trait]
impl ObjectStorage for HttpObjectStorage {
    async fn store(&self, bytes: Vec<u8>, mime: &str) -> Result<StoredObject, StorageError> {
        let key = content_key(&bytes, mime)?;
        let size = bytes.len();
        self.client
            .put(format!("{}/{}", self.endpoint, key))
            .header(reqwest::header::CONTENT_TYPE, mime)
            .body(bytes)
            .send()
            .await?
            .error_for_status()?;
        info!(key = %key, size, "Stored object over HTTP");
        Ok(StoredObject {
            url: self.signer.url(&key),
            key,
        })
    }

    async fn fetch(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        if !is_content_key(key) {
            return Err(StorageError::NotFound(key.to_string()));
        }
        let response = self.client.get(format!("{}/{}", self.endpoint, key)).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(StorageError::NotFound(key.to_string()));
        }
        let bytes = response.error_for_status()?.bytes().await?;
        Ok(bytes.to_vec())
    }

    fn sign(&self, key: &str, ttl: Duration) -> String {
        self.signer.sign(key, ttl)
    }

    fn verify(&self, key: &str, expires: i64, signature: &str) -> bool {
        self.signer.verify(key, expires, signature)
    }
}

pub fn build_storage(config: &StorageConfig) -> Result<Arc<dyn ObjectStorage>, StorageError> {
    if config.signing_key.is_empty() {
        return Err(StorageError::Misconfigured("STORAGE_SIGNING_KEY is not set".into()));
    }
    let signer = UrlSigner::new(&config.public_base_url, &config.signing_key);
    match config.backend {
        StorageBackend::Local => Ok(Arc::new(LocalObjectStorage::new(&config.local_root, signer))),
        StorageBackend::Http => {
            let endpoint = config
                .http_endpoint
                .as_deref()
                .ok_or_else(|| StorageError::Misconfigured("STORAGE_HTTP_ENDPOINT is not set".into()))?;
            Ok(Arc::new(HttpObjectStorage::new(endpoint, signer)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn local_store_is_content_addressed() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalObjectStorage::new(dir.path(), UrlSigner::new("http://files.test/", "k"));

        let first = storage.store(b"proof".to_vec(), "application/pdf").await.unwrap();
        let second = storage.store(b"proof".to_vec(), "application/pdf").await.unwrap();
        assert_eq!(first, second);
        assert!(first.key.ends_with(".pdf"));
        assert_eq!(first.url, format!("http://files.test/{}", first.key));
        assert_eq!(tokio::fs::read(storage.path_for(&first.key)).await.unwrap(), b"proof");
    }

    #[tokio::test]
    async fn unknown_types_are_refused() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalObjectStorage::new(dir.path(), UrlSigner::new("http://files.test", "k"));
        let err = storage.store(b"#!/bin/sh".to_vec(), "text/x-shellscript").await.unwrap_err();
        assert!(matches!(err, StorageError::UnsupportedType(_)));
    }

    #[test]
    fn signed_urls_verify_until_expiry() {
        let signer = UrlSigner::new("http://files.test", "secret");
        let url = signer.sign("abc.pdf", Duration::from_secs(60));
        let query = url.split('?').nth(1).unwrap();
        let mut expires = 0i64;
        let mut signature = "";
        for pair in query.split('&') {
            match pair.split_once('=') {
                Some(("expires", v)) => expires = v.parse().unwrap(),
                Some(("signature", v)) => signature = v,
                _ => {}
            }
        }
        assert!(signer.verify("abc.pdf", expires, signature));
        assert!(!signer.verify("other.pdf", expires, signature));
        assert!(!UrlSigner::new("http://files.test", "other").verify("abc.pdf", expires, signature));
        assert!(!signer.verify("abc.pdf", expires - 3600, &signer.signature("abc.pdf", expires - 3600)));
    }

    #[tokio::test]
    async fn local_fetch_reads_stored_objects_only() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalObjectStorage::new(dir.path(), UrlSigner::new("http://files.test", "k"));
        let stored = storage.store(b"bill".to_vec(), "image/png").await.unwrap();

        assert_eq!(storage.fetch(&stored.key).await.unwrap(), b"bill");
        assert_eq!(mime_for_key(&stored.key), "image/png");

        let missing = format!("{}.pdf", "0".repeat(64));
        assert!(matches!(storage.fetch(&missing).await, Err(StorageError::NotFound(_))));
        assert!(matches!(storage.fetch("../Cargo.toml").await, Err(StorageError::NotFound(_))));
    }

    #[test]
    fn signature_comparison_needs_every_byte() {
        assert!(constant_time_eq(b"abcdef", b"abcdef"));
        assert!(!constant_time_eq(b"abcdef", b"abcdeg"));
        assert!(!constant_time_eq(b"abcdef", b"bbcdef"));
        assert!(!constant_time_eq(b"abcdef", b"abcde"));

        let signer = UrlSigner::new("http://files.test", "secret");
        let expires = Utc::now().timestamp() + 60;
        let signature = signer.signature("abc.pdf", expires);
        assert!(signer.verify("abc.pdf", expires, &signature));
        assert!(!signer.verify("abc.pdf", expires, &signature[..signature.len() - 1]));
        assert!(!signer.verify("abc.pdf", expires, ""));
    }
}
