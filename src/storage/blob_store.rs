//! Blob Store
//!
//! Durable object storage for files produced during a turn. Keys are tenant
//! scoped (`{tenant}/{chat_id}/{file_name}`).
//!
//! `S3BlobStore` signs `PUT` requests with AWS Signature Version 4 and
//! returns the object's public URL.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::models::settings::BlobConfig;
use crate::utils::error::{AppError, AppResult};

/// Object storage capability
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `bytes` at `key`, returning a URL the user can open.
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> AppResult<String>;
}

/// Build a tenant-scoped object key.
///
/// Path separators and control characters in any part are replaced so a
/// part can never escape its prefix.
pub fn blob_key(tenant: &str, chat_id: &str, file_name: &str) -> String {
    fn clean(part: &str) -> String {
        let cleaned: String = part
            .trim()
            .chars()
            .map(|c| if c == '/' || c == '\\' || c.is_control() { '_' } else { c })
            .collect();
        match cleaned.as_str() {
            "" | "." | ".." => "_".to_string(),
            _ => cleaned,
        }
    }
    format!("{}/{}/{}", clean(tenant), clean(chat_id), clean(file_name))
}

// ============================================================================
// SigV4
// ============================================================================

fn sha256_hex(data: &[u8]) -> String {
    Sha256::digest(data)
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> AppResult<Vec<u8>> {
    let mut mac = Hmac::<Sha256>::new_from_slice(key)
        .map_err(|e| AppError::internal(format!("hmac key rejected: {}", e)))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Derive the SigV4 signing key for one day, region and service.
pub fn derive_signing_key(
    secret: &str,
    date_stamp: &str,
    region: &str,
    service: &str,
) -> AppResult<Vec<u8>> {
    let k_date = hmac_sha256(format!("AWS4{}", secret).as_bytes(), date_stamp.as_bytes())?;
    let k_region = hmac_sha256(&k_date, region.as_bytes())?;
    let k_service = hmac_sha256(&k_region, service.as_bytes())?;
    hmac_sha256(&k_service, b"aws4_request")
}

/// Percent-encode each path segment, keeping `/` separators.
fn encode_path(path: &str) -> String {
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Headers for a signed request.
#[derive(Debug, Clone, PartialEq)]
pub struct SignedHeaders {
    pub authorization: String,
    pub amz_date: String,
    pub content_sha256: String,
}

/// Sign a request with an empty query string.
#[allow(clippy::too_many_arguments)]
pub fn sign_request(
    method: &str,
    host: &str,
    canonical_uri: &str,
    payload: &[u8],
    access_key: &str,
    secret_key: &str,
    region: &str,
    now: DateTime<Utc>,
) -> AppResult<SignedHeaders> {
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let date_stamp = now.format("%Y%m%d").to_string();
    let content_sha256 = sha256_hex(payload);

    let signed_headers = "host;x-amz-content-sha256;x-amz-date";
    let canonical_headers = format!(
        "host:{}\nx-amz-content-sha256:{}\nx-amz-date:{}\n",
        host, content_sha256, amz_date
    );
    let canonical_request = format!(
        "{}\n{}\n\n{}\n{}\n{}",
        method, canonical_uri, canonical_headers, signed_headers, content_sha256
    );

    let scope = format!("{}/{}/s3/aws4_request", date_stamp, region);
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{}\n{}\n{}",
        amz_date,
        scope,
        sha256_hex(canonical_request.as_bytes())
    );

    let signing_key = derive_signing_key(secret_key, &date_stamp, region, "s3")?;
    let signature: String = hmac_sha256(&signing_key, string_to_sign.as_bytes())?
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect();

    Ok(SignedHeaders {
        authorization: format!(
            "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
            access_key, scope, signed_headers, signature
        ),
        amz_date,
        content_sha256,
    })
}

// ============================================================================
// S3
// ============================================================================

/// S3 (or S3-compatible) object store
pub struct S3BlobStore {
    client: reqwest::Client,
    config: BlobConfig,
    access_key: String,
    secret_key: String,
}

impl S3BlobStore {
    pub fn new(config: BlobConfig) -> AppResult<Self> {
        let access_key = config
            .access_key_id
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| AppError::config("blob.access_key_id is not set"))?;
        let secret_key = config
            .secret_access_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| AppError::config("blob.secret_access_key is not set"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            client,
            config,
            access_key,
            secret_key,
        })
    }

    /// Host and canonical path for an object.
    ///
    /// Virtual-hosted style on AWS; path style when an endpoint is configured.
    fn locate(&self, key: &str) -> AppResult<(String, String, String)> {
        let encoded_key = encode_path(key);
        match &self.config.endpoint {
            Some(endpoint) => {
                let url = url::Url::parse(endpoint)
                    .map_err(|e| AppError::config(format!("bad blob.endpoint: {}", e)))?;
                let host = match (url.host_str(), url.port()) {
                    (Some(h), Some(p)) => format!("{}:{}", h, p),
                    (Some(h), None) => h.to_string(),
                    _ => return Err(AppError::config("blob.endpoint has no host")),
                };
                let path = format!("/{}/{}", self.config.bucket, encoded_key);
                Ok((format!("{}://{}", url.scheme(), host), host, path))
            }
            None => {
                let host = format!(
                    "{}.s3.{}.amazonaws.com",
                    self.config.bucket, self.config.region
                );
                Ok((format!("https://{}", host), host, format!("/{}", encoded_key)))
            }
        }
    }

    fn public_url(&self, origin: &str, path: &str, key: &str) -> String {
        match &self.config.public_base_url {
            Some(base) => format!("{}/{}", base.trim_end_matches('/'), encode_path(key)),
            None => format!("{}{}", origin, path),
        }
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> AppResult<String> {
        let (origin, host, path) = self.locate(key)?;
        let signed = sign_request(
            "PUT",
            &host,
            &path,
            &bytes,
            &self.access_key,
            &self.secret_key,
            &self.config.region,
            Utc::now(),
        )?;

        let size = bytes.len();
        let response = self
            .client
            .put(format!("{}{}", origin, path))
            .header("authorization", signed.authorization)
            .header("x-amz-date", signed.amz_date)
            .header("x-amz-content-sha256", signed.content_sha256)
            .header("content-type", content_type)
            .body(bytes)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::storage(format!(
                "blob upload returned HTTP {}: {}",
                status.as_u16(),
                body
            )));
        }

        tracing::info!(key, size, "blob uploaded");
        Ok(self.public_url(&origin, &path, key))
    }
}

// ============================================================================
// In-memory
// ============================================================================

/// Stored object, kept for assertions
#[derive(Debug, Clone, PartialEq)]
pub struct StoredBlob {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// Process-local blob store
#[derive(Default)]
pub struct MemoryBlobStore {
    objects: DashMap<String, StoredBlob>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<StoredBlob> {
        self.objects.get(key).map(|o| o.value().clone())
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.iter().map(|o| o.key().clone()).collect()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> AppResult<String> {
        self.objects.insert(
            key.to_string(),
            StoredBlob {
                bytes,
                content_type: content_type.to_string(),
            },
        );
        Ok(format!("memory://{}", key))
    }
}
