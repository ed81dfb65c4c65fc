//! S3-compatible primary tier.
//!
//! Implements the remote object store contract (`putObject`, `getObject`,
//! `headObject`, `deleteObject`) over the S3 REST API with AWS Signature V4
//! authentication, using only pure-Rust dependencies (`hmac`, `sha2`) for
//! signing. Custom endpoints are supported for S3-compatible services
//! (MinIO, LocalStack).
//!
//! Credentials are read from environment variables:
//! - `AWS_ACCESS_KEY_ID` — required
//! - `AWS_SECRET_ACCESS_KEY` — required
//! - `AWS_SESSION_TOKEN` — optional (temporary credentials / IAM roles)
//!
//! Every request carries the configured timeout; timeouts surface as
//! [`EngineError::StorageTimeout`], other transport failures as
//! [`EngineError::StorageUnavailable`]. No call in this module blocks
//! indefinitely.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::Method;
use sha2::{Digest, Sha256};
use std::time::Duration;

use crate::config::PrimaryTierConfig;
use crate::error::{EngineError, EngineResult};
use crate::tier::ObjectTier;

type HmacSha256 = Hmac<Sha256>;

pub struct S3Tier {
    bucket: String,
    prefix: String,
    region: String,
    endpoint_url: Option<String>,
    creds: AwsCredentials,
    client: reqwest::Client,
}

struct AwsCredentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
}

impl AwsCredentials {
    fn from_env() -> Result<Self> {
        let access_key_id = std::env::var("AWS_ACCESS_KEY_ID")
            .context("AWS_ACCESS_KEY_ID environment variable not set")?;
        let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY")
            .context("AWS_SECRET_ACCESS_KEY environment variable not set")?;
        let session_token = std::env::var("AWS_SESSION_TOKEN").ok();

        Ok(Self {
            access_key_id,
            secret_access_key,
            session_token,
        })
    }
}

impl S3Tier {
    pub fn new(config: &PrimaryTierConfig, timeout_secs: u64) -> Result<Self> {
        let bucket = config
            .bucket
            .clone()
            .context("storage.primary.bucket is required for the s3 tier")?;
        let creds = AwsCredentials::from_env()?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build S3 HTTP client")?;

        Ok(Self {
            bucket,
            prefix: config.prefix.clone(),
            region: config.region.clone(),
            endpoint_url: config.endpoint_url.clone(),
            creds,
            client,
        })
    }

    fn host(&self) -> String {
        match &self.endpoint_url {
            Some(endpoint) => endpoint
                .trim_start_matches("https://")
                .trim_start_matches("http://")
                .trim_end_matches('/')
                .to_string(),
            None => format!("{}.s3.{}.amazonaws.com", self.bucket, self.region),
        }
    }

    fn scheme(&self) -> &'static str {
        match &self.endpoint_url {
            Some(endpoint) if endpoint.starts_with("http://") => "http",
            _ => "https",
        }
    }

    fn object_key(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}/{}", self.prefix.trim_end_matches('/'), key)
        }
    }

    /// Build a signed request for one object. SigV4 over a single object
    /// path with no query string, per-method payload hash.
    fn signed_request(&self, method: Method, key: &str, body: &[u8]) -> reqwest::RequestBuilder {
        let host = self.host();
        let full_key = self.object_key(key);
        let encoded_key = full_key
            .split('/')
            .map(uri_encode)
            .collect::<Vec<_>>()
            .join("/");
        let canonical_uri = format!("/{}", encoded_key);
        let url = format!("{}://{}{}", self.scheme(), host, canonical_uri);

        let now = Utc::now();
        let date_stamp = now.format("%Y%m%d").to_string();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let payload_hash = hex_sha256(body);

        let mut headers = vec![
            ("host".to_string(), host.clone()),
            ("x-amz-content-sha256".to_string(), payload_hash.clone()),
            ("x-amz-date".to_string(), amz_date.clone()),
        ];
        if let Some(ref token) = self.creds.session_token {
            headers.push(("x-amz-security-token".to_string(), token.clone()));
        }
        headers.sort_by(|a, b| a.0.cmp(&b.0));

        let signed_headers: String = headers
            .iter()
            .map(|(k, _)| k.as_str())
            .collect::<Vec<_>>()
            .join(";");
        let canonical_headers: String = headers
            .iter()
            .map(|(k, v)| format!("{}:{}\n", k, v))
            .collect();

        let canonical_request = format!(
            "{}\n{}\n\n{}\n{}\n{}",
            method.as_str(),
            canonical_uri,
            canonical_headers,
            signed_headers,
            payload_hash
        );

        let credential_scope = format!("{}/{}/s3/aws4_request", date_stamp, self.region);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            amz_date,
            credential_scope,
            hex_sha256(canonical_request.as_bytes())
        );

        let signing_key = derive_signing_key(
            &self.creds.secret_access_key,
            &date_stamp,
            &self.region,
            "s3",
        );
        let signature = hex_hmac_sha256(&signing_key, string_to_sign.as_bytes());

        let authorization = format!(
            "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
            self.creds.access_key_id, credential_scope, signed_headers, signature
        );

        let mut builder = self
            .client
            .request(method, &url)
            .header("Authorization", authorization)
            .header("x-amz-content-sha256", payload_hash)
            .header("x-amz-date", amz_date);

        if let Some(ref token) = self.creds.session_token {
            builder = builder.header("x-amz-security-token", token);
        }

        builder
    }

    fn transport_error(&self, err: reqwest::Error) -> EngineError {
        if err.is_timeout() {
            EngineError::StorageTimeout
        } else {
            EngineError::StorageUnavailable(format!("s3: {}", err))
        }
    }
}

#[async_trait]
impl ObjectTier for S3Tier {
    fn label(&self) -> &str {
        "s3"
    }

    async fn get(&self, key: &str) -> EngineResult<Option<Vec<u8>>> {
        let resp = self
            .signed_request(Method::GET, key, b"")
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        match resp.status().as_u16() {
            200 => {
                let bytes = resp.bytes().await.map_err(|e| self.transport_error(e))?;
                Ok(Some(bytes.to_vec()))
            }
            404 => Ok(None),
            status => Err(EngineError::StorageUnavailable(format!(
                "S3 GetObject failed (HTTP {}) for key '{}'",
                status, key
            ))),
        }
    }

    async fn put(&self, key: &str, bytes: &[u8]) -> EngineResult<()> {
        let resp = self
            .signed_request(Method::PUT, key, bytes)
            .body(bytes.to_vec())
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(EngineError::StorageUnavailable(format!(
                "S3 PutObject failed (HTTP {}) for key '{}'",
                resp.status(),
                key
            )))
        }
    }

    async fn exists(&self, key: &str) -> EngineResult<bool> {
        let resp = self
            .signed_request(Method::HEAD, key, b"")
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        match resp.status().as_u16() {
            200 => Ok(true),
            404 => Ok(false),
            status => Err(EngineError::StorageUnavailable(format!(
                "S3 HeadObject failed (HTTP {}) for key '{}'",
                status, key
            ))),
        }
    }

    async fn delete(&self, key: &str) -> EngineResult<()> {
        let resp = self
            .signed_request(Method::DELETE, key, b"")
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        // S3 returns 204 for deletes, including of absent keys.
        match resp.status().as_u16() {
            200 | 204 | 404 => Ok(()),
            status => Err(EngineError::StorageUnavailable(format!(
                "S3 DeleteObject failed (HTTP {}) for key '{}'",
                status, key
            ))),
        }
    }
}

// ============ AWS SigV4 helpers ============

fn hex_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn hex_hmac_sha256(key: &[u8], data: &[u8]) -> String {
    hex::encode(hmac_sha256(key, data))
}

/// Derive the SigV4 signing key:
/// `HMAC(HMAC(HMAC(HMAC("AWS4"+secret, date), region), service), "aws4_request")`.
fn derive_signing_key(secret_key: &str, date_stamp: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(
        format!("AWS4{}", secret_key).as_bytes(),
        date_stamp.as_bytes(),
    );
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

/// RFC 3986 URI encoding as required by SigV4 canonical requests.
fn uri_encode(s: &str) -> String {
    let mut result = String::new();
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uri_encode_passes_unreserved() {
        assert_eq!(uri_encode("documents/abc"), "documents%2Fabc");
        assert_eq!(uri_encode("a-b_c.d~e"), "a-b_c.d~e");
        assert_eq!(uri_encode("v 1"), "v%201");
    }

    #[test]
    fn test_signing_key_is_deterministic() {
        let a = derive_signing_key("secret", "20260101", "us-east-1", "s3");
        let b = derive_signing_key("secret", "20260101", "us-east-1", "s3");
        assert_eq!(a, b);
        let c = derive_signing_key("secret", "20260102", "us-east-1", "s3");
        assert_ne!(a, c);
    }

    #[test]
    fn test_hex_sha256_empty_payload() {
        // Known SHA-256 of the empty string, used for GET/HEAD payloads.
        assert_eq!(
            hex_sha256(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
