//! Minimal S3 client: signed PUT, GET and ListObjectsV2 over reqwest.
//!
//! Requests are signed with AWS Signature Version 4. With a custom endpoint
//! (MinIO, R2, LocalStack) the bucket goes into the path; against AWS it is
//! addressed virtual-host style.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use log::{debug, error};
use reqwest::{Client, Method, StatusCode, Url};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use sha2::{Digest, Sha256};

use super::{validate_key, Listing, ObjectInfo, ObjectMetadata, ObjectStore};
use crate::config::StorageConfig;
use crate::error::{ConfigError, StorageError};
use crate::sanitize::truncate_for_log;

type HmacSha256 = Hmac<Sha256>;

const SERVICE: &str = "s3";
const ALGORITHM: &str = "AWS4-HMAC-SHA256";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";
/// Longest validity SigV4 allows for a presigned URL.
pub const MAX_PRESIGN_EXPIRY: Duration = Duration::from_secs(7 * 24 * 60 * 60);

pub struct S3Credentials {
    pub access_key_id: SecretString,
    pub secret_access_key: SecretString,
    pub session_token: Option<SecretString>,
}

pub struct S3Store {
    client: Client,
    bucket: String,
    region: String,
    endpoint: Option<String>,
    credentials: S3Credentials,
}

impl std::fmt::Debug for S3Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Store")
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl S3Store {
    pub fn new(
        bucket: &str,
        region: &str,
        endpoint: Option<&str>,
        credentials: S3Credentials,
    ) -> Result<Self, StorageError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| StorageError::Http(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            bucket: bucket.to_string(),
            region: region.to_string(),
            endpoint: endpoint.map(|e| e.trim_end_matches('/').to_string()),
            credentials,
        })
    }

    pub fn from_config(config: &StorageConfig) -> Result<Self, ConfigError> {
        let s3 = &config.s3;
        let missing = |what: &str, e: &dyn std::fmt::Display| ConfigError::MissingCredential {
            name: format!("S3 {} ({})", what, e),
        };

        let credentials = S3Credentials {
            access_key_id: s3
                .access_key_id
                .resolve()
                .map_err(|e| missing("access key id", &e))?,
            secret_access_key: s3
                .secret_access_key
                .resolve()
                .map_err(|e| missing("secret access key", &e))?,
            session_token: s3
                .session_token
                .resolve_optional()
                .map_err(|e| missing("session token", &e))?,
        };

        Self::new(
            &config.bucket,
            &s3.region,
            s3.endpoint.as_deref(),
            credentials,
        )
        .map_err(|e| ConfigError::Validation {
            message: e.to_string(),
        })
    }

    /// Base URL and canonical path for `key` (empty key addresses the bucket).
    fn locate(&self, key: &str) -> Result<(Url, String), StorageError> {
        let encoded_key = uri_encode(key, false);
        let (base, path) = match &self.endpoint {
            Some(endpoint) => (
                endpoint.clone(),
                format!("/{}/{}", uri_encode(&self.bucket, true), encoded_key),
            ),
            None => (
                format!("https://{}.s3.{}.amazonaws.com", self.bucket, self.region),
                format!("/{}", encoded_key),
            ),
        };

        let url = Url::parse(&format!("{}{}", base, path))
            .map_err(|e| StorageError::Http(format!("Invalid S3 URL: {}", e)))?;
        let canonical_path = url.path().to_string();
        Ok((url, canonical_path))
    }

    /// Presigned GET URL for `key`, signed as of `now`.
    pub fn presign_get_at(
        &self,
        key: &str,
        expires: Duration,
        now: DateTime<Utc>,
    ) -> Result<Url, StorageError> {
        validate_key(key)?;
        let (url, _) = self.locate(key)?;
        presign(
            url,
            &now.format("%Y%m%dT%H%M%SZ").to_string(),
            expires,
            &self.region,
            &self.credentials,
        )
    }

    async fn send(
        &self,
        method: Method,
        key: &str,
        query: &[(&str, &str)],
        body: Vec<u8>,
        extra_headers: Vec<(String, String)>,
    ) -> Result<reqwest::Response, StorageError> {
        let (mut url, canonical_path) = self.locate(key)?;
        let canonical_query = canonical_query(query);
        if !canonical_query.is_empty() {
            url.set_query(Some(&canonical_query));
        }

        let now = Utc::now();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let payload_hash = hex::encode(Sha256::digest(&body));

        let mut headers = extra_headers;
        headers.push(("host".to_string(), host_header(&url)?));
        headers.push(("x-amz-content-sha256".to_string(), payload_hash.clone()));
        headers.push(("x-amz-date".to_string(), amz_date.clone()));
        if let Some(token) = &self.credentials.session_token {
            headers.push((
                "x-amz-security-token".to_string(),
                token.expose_secret().to_string(),
            ));
        }
        headers.sort_by(|a, b| a.0.cmp(&b.0));

        let request = CanonicalRequest {
            method: method.as_str(),
            path: &canonical_path,
            query: &canonical_query,
            headers: &headers,
            payload_hash: &payload_hash,
        };
        let authorization = sign(
            &request,
            &amz_date,
            &self.region,
            self.credentials.access_key_id.expose_secret(),
            self.credentials.secret_access_key.expose_secret(),
        )?;

        let mut builder = self.client.request(method, url);
        for (name, value) in &headers {
            if name != "host" {
                builder = builder.header(name.as_str(), value.as_str());
            }
        }

        builder
            .header("authorization", authorization)
            .body(body)
            .send()
            .await
            .map_err(|e| StorageError::Http(format!("S3 request failed: {}", e)))
    }

    async fn fail(key: &str, response: reqwest::Response) -> StorageError {
        let status = response.status();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        let body = truncate_for_log(&body);
        error!("S3 returned {} for {}: {}", status, key, body);
        StorageError::Backend {
            key: key.to_string(),
            message: format!("S3 returned {}: {}", status, body),
        }
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn put(
        &self,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
        metadata: &ObjectMetadata,
    ) -> Result<(), StorageError> {
        validate_key(key)?;

        let mut headers = vec![("content-type".to_string(), content_type.to_string())];
        for (name, value) in metadata {
            headers.push((
                format!("x-amz-meta-{}", name.to_ascii_lowercase().replace('_', "-")),
                header_safe(value),
            ));
        }

        let size = body.len();
        let response = self.send(Method::PUT, key, &[], body, headers).await?;
        if !response.status().is_success() {
            return Err(Self::fail(key, response).await);
        }

        debug!("Uploaded {} bytes to s3://{}/{}", size, self.bucket, key);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        validate_key(key)?;

        let response = self.send(Method::GET, key, &[], Vec::new(), Vec::new()).await?;
        match response.status() {
            StatusCode::NOT_FOUND => Err(StorageError::NotFound(key.to_string())),
            status if status.is_success() => response
                .bytes()
                .await
                .map(|b| b.to_vec())
                .map_err(|e| StorageError::Http(format!("Failed to read S3 body: {}", e))),
            _ => Err(Self::fail(key, response).await),
        }
    }

    async fn list(&self, prefix: &str, delimiter: Option<char>) -> Result<Listing, StorageError> {
        let delimiter = delimiter.map(String::from);
        let mut listing = Listing::default();
        let mut continuation: Option<String> = None;

        loop {
            let mut query: Vec<(&str, &str)> = vec![("list-type", "2"), ("prefix", prefix)];
            if let Some(d) = &delimiter {
                query.push(("delimiter", d.as_str()));
            }
            if let Some(token) = &continuation {
                query.push(("continuation-token", token.as_str()));
            }

            let response = self.send(Method::GET, "", &query, Vec::new(), Vec::new()).await?;
            if !response.status().is_success() {
                return Err(Self::fail(prefix, response).await);
            }
            let body = response
                .text()
                .await
                .map_err(|e| StorageError::Http(format!("Failed to read S3 body: {}", e)))?;

            let page = parse_list_response(&body)?;
            listing.objects.extend(page.contents.into_iter().map(|o| ObjectInfo {
                last_modified: o
                    .last_modified
                    .as_deref()
                    .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
                    .map(|t| t.with_timezone(&Utc)),
                key: o.key,
                size: o.size,
            }));
            listing
                .common_prefixes
                .extend(page.common_prefixes.into_iter().map(|p| p.prefix));

            match page.next_continuation_token {
                Some(token) if page.is_truncated => continuation = Some(token),
                _ => break,
            }
        }

        Ok(listing)
    }

    fn bucket(&self) -> &str {
        &self.bucket
    }

    fn presign_get(&self, key: &str, expires: Duration) -> Result<Option<String>, StorageError> {
        let url = self.presign_get_at(key, expires, Utc::now())?;
        debug!("Presigned s3://{}/{} for {}s", self.bucket, key, expires.as_secs());
        Ok(Some(url.to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct ListBucketResult {
    #[serde(rename = "IsTruncated", default)]
    is_truncated: bool,
    #[serde(rename = "NextContinuationToken", default)]
    next_continuation_token: Option<String>,
    #[serde(rename = "Contents", default)]
    contents: Vec<ListedObject>,
    #[serde(rename = "CommonPrefixes", default)]
    common_prefixes: Vec<ListedPrefix>,
}

#[derive(Debug, Deserialize)]
struct ListedObject {
    #[serde(rename = "Key")]
    key: String,
    #[serde(rename = "Size", default)]
    size: u64,
    #[serde(rename = "LastModified", default)]
    last_modified: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListedPrefix {
    #[serde(rename = "Prefix")]
    prefix: String,
}

fn parse_list_response(body: &str) -> Result<ListBucketResult, StorageError> {
    quick_xml::de::from_str(body)
        .map_err(|e| StorageError::Http(format!("Malformed ListObjectsV2 response: {}", e)))
}

struct CanonicalRequest<'a> {
    method: &'a str,
    path: &'a str,
    query: &'a str,
    /// Lowercase names, sorted by name.
    headers: &'a [(String, String)],
    payload_hash: &'a str,
}

impl CanonicalRequest<'_> {
    fn signed_headers(&self) -> String {
        self.headers
            .iter()
            .map(|(name, _)| name.as_str())
            .collect::<Vec<_>>()
            .join(";")
    }

    fn render(&self) -> String {
        let headers: String = self
            .headers
            .iter()
            .map(|(name, value)| format!("{}:{}\n", name, value.trim()))
            .collect();

        format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            self.method,
            self.path,
            self.query,
            headers,
            self.signed_headers(),
            self.payload_hash
        )
    }
}

fn hmac(key: &[u8], data: &[u8]) -> Result<Vec<u8>, StorageError> {
    let mut mac =
        HmacSha256::new_from_slice(key).map_err(|e| StorageError::Signing(e.to_string()))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Credential scope and hex signature of `request`.
fn signature(
    request: &CanonicalRequest<'_>,
    amz_date: &str,
    region: &str,
    secret_access_key: &str,
) -> Result<(String, String), StorageError> {
    let date = amz_date.get(..8).ok_or_else(|| {
        StorageError::Signing(format!("Malformed request date: {}", amz_date))
    })?;
    let scope = format!("{}/{}/{}/aws4_request", date, region, SERVICE);

    let string_to_sign = format!(
        "{}\n{}\n{}\n{}",
        ALGORITHM,
        amz_date,
        scope,
        hex::encode(Sha256::digest(request.render().as_bytes()))
    );

    let k_date = hmac(format!("AWS4{}", secret_access_key).as_bytes(), date.as_bytes())?;
    let k_region = hmac(&k_date, region.as_bytes())?;
    let k_service = hmac(&k_region, SERVICE.as_bytes())?;
    let k_signing = hmac(&k_service, b"aws4_request")?;
    let signature = hex::encode(hmac(&k_signing, string_to_sign.as_bytes())?);

    Ok((scope, signature))
}

/// Produces the `Authorization` header value for `request`.
fn sign(
    request: &CanonicalRequest<'_>,
    amz_date: &str,
    region: &str,
    access_key_id: &str,
    secret_access_key: &str,
) -> Result<String, StorageError> {
    let (scope, signature) = signature(request, amz_date, region, secret_access_key)?;

    Ok(format!(
        "{} Credential={}/{}, SignedHeaders={}, Signature={}",
        ALGORITHM,
        access_key_id,
        scope,
        request.signed_headers(),
        signature
    ))
}

/// Query-string SigV4: everything the server needs goes into the URL and only
/// `host` is signed. The payload is left unsigned.
fn presign(
    mut url: Url,
    amz_date: &str,
    expires: Duration,
    region: &str,
    credentials: &S3Credentials,
) -> Result<Url, StorageError> {
    let expires = expires.as_secs();
    if expires == 0 || expires > MAX_PRESIGN_EXPIRY.as_secs() {
        return Err(StorageError::Signing(format!(
            "Presigned URL expiry must be between 1 and {} seconds, got {}",
            MAX_PRESIGN_EXPIRY.as_secs(),
            expires
        )));
    }

    let date = amz_date.get(..8).ok_or_else(|| {
        StorageError::Signing(format!("Malformed request date: {}", amz_date))
    })?;
    let credential = format!(
        "{}/{}/{}/{}/aws4_request",
        credentials.access_key_id.expose_secret(),
        date,
        region,
        SERVICE
    );
    let expires = expires.to_string();

    let mut params: Vec<(&str, &str)> = vec![
        ("X-Amz-Algorithm", ALGORITHM),
        ("X-Amz-Credential", credential.as_str()),
        ("X-Amz-Date", amz_date),
        ("X-Amz-Expires", expires.as_str()),
        ("X-Amz-SignedHeaders", "host"),
    ];
    if let Some(token) = &credentials.session_token {
        params.push(("X-Amz-Security-Token", token.expose_secret()));
    }
    let query = canonical_query(&params);

    let headers = vec![("host".to_string(), host_header(&url)?)];
    let canonical_path = url.path().to_string();
    let request = CanonicalRequest {
        method: "GET",
        path: &canonical_path,
        query: &query,
        headers: &headers,
        payload_hash: UNSIGNED_PAYLOAD,
    };
    let (_, signature) = signature(
        &request,
        amz_date,
        region,
        credentials.secret_access_key.expose_secret(),
    )?;

    url.set_query(Some(&format!("{}&X-Amz-Signature={}", query, signature)));
    Ok(url)
}

/// RFC 3986 encoding as S3 expects it: only unreserved characters pass,
/// `/` is kept unless `encode_slash` is set.
fn uri_encode(input: &str, encode_slash: bool) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            b'/' if !encode_slash => out.push('/'),
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

fn canonical_query(params: &[(&str, &str)]) -> String {
    let mut encoded: Vec<(String, String)> = params
        .iter()
        .map(|(k, v)| (uri_encode(k, true), uri_encode(v, true)))
        .collect();
    encoded.sort();
    encoded
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

fn host_header(url: &Url) -> Result<String, StorageError> {
    let host = url
        .host_str()
        .ok_or_else(|| StorageError::Http(format!("S3 URL has no host: {}", url)))?;
    Ok(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

/// Metadata values travel as HTTP headers; anything outside visible ASCII is percent-encoded.
fn header_safe(value: &str) -> String {
    if value.bytes().all(|b| (0x20..0x7f).contains(&b)) {
        value.to_string()
    } else {
        uri_encode(value, false)
    }
}
