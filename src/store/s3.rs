//! S3-compatible [`DocumentStore`].
//!
//! Talks to the S3 REST API directly with AWS Signature V4 authentication.
//! Folders are emulated with `ListObjectsV2` and `delimiter=/`: common
//! prefixes become folders, contents become files. Pagination follows
//! `NextContinuationToken`.
//!
//! # Configuration
//!
//! ```toml
//! [store]
//! kind = "s3"
//! prefix = "knowledge-base"
//!
//! [store.s3]
//! bucket = "planpath-codes"
//! region = "us-west-2"
//! # endpoint_url = "http://localhost:9000"   # MinIO
//! ```
//!
//! # Environment Variables
//!
//! - `AWS_ACCESS_KEY_ID`: required
//! - `AWS_SECRET_ACCESS_KEY`: required
//! - `AWS_SESSION_TOKEN`: optional (temporary credentials / IAM roles)

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::StatusCode;
use sha2::{Digest, Sha256};

use super::{file_name, join_path, DocumentStore, Listing, StoreEntry, StoreError};
use crate::config::S3StoreConfig;

type HmacSha256 = Hmac<Sha256>;

pub struct S3Store {
    config: S3StoreConfig,
    creds: AwsCredentials,
    client: reqwest::Client,
}

impl S3Store {
    /// Creates a store with credentials read from the environment.
    pub fn from_env(config: S3StoreConfig) -> Result<Self> {
        Ok(Self {
            config,
            creds: AwsCredentials::from_env()?,
            client: reqwest::Client::new(),
        })
    }

    /// Signs and sends a GET request for `canonical_uri` with the given
    /// (unsorted) query parameters.
    async fn signed_get(
        &self,
        canonical_uri: &str,
        query_params: &[(String, String)],
    ) -> Result<reqwest::Response, StoreError> {
        let host = s3_host(&self.config);
        let now = Utc::now();
        let date_stamp = now.format("%Y%m%d").to_string();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();

        let mut sorted_params = query_params.to_vec();
        sorted_params.sort_by(|a, b| a.0.cmp(&b.0));
        let canonical_querystring: String = sorted_params
            .iter()
            .map(|(k, v)| format!("{}={}", uri_encode(k), uri_encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        let payload_hash = hex_sha256(b"");

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
            "GET\n{}\n{}\n{}\n{}\n{}",
            canonical_uri, canonical_querystring, canonical_headers, signed_headers, payload_hash
        );

        let credential_scope = format!("{}/{}/s3/aws4_request", date_stamp, self.config.region);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            amz_date,
            credential_scope,
            hex_sha256(canonical_request.as_bytes())
        );

        let signing_key = derive_signing_key(
            &self.creds.secret_access_key,
            &date_stamp,
            &self.config.region,
            "s3",
        )?;
        let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes())?);

        let authorization = format!(
            "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
            self.creds.access_key_id, credential_scope, signed_headers, signature
        );

        let scheme = endpoint_scheme(&self.config);
        let mut url = format!("{}://{}{}", scheme, host, canonical_uri);
        if !canonical_querystring.is_empty() {
            url.push('?');
            url.push_str(&canonical_querystring);
        }

        let mut req = self
            .client
            .get(&url)
            .header("Authorization", &authorization)
            .header("x-amz-content-sha256", &payload_hash)
            .header("x-amz-date", &amz_date);
        if let Some(ref token) = self.creds.session_token {
            req = req.header("x-amz-security-token", token);
        }

        req.send().await.map_err(|e| {
            StoreError::Unavailable(format!("request to s3://{} failed: {}", self.config.bucket, e))
        })
    }

    /// Base URI for requests: path-style when a custom endpoint is used.
    fn bucket_uri(&self) -> String {
        if self.config.endpoint_url.is_some() {
            format!("/{}", self.config.bucket)
        } else {
            String::new()
        }
    }
}

#[async_trait]
impl DocumentStore for S3Store {
    fn kind(&self) -> &str {
        "s3"
    }

    async fn list(&self, path: &str) -> Result<Listing, StoreError> {
        let folder = join_path(&[path]);
        let prefix = if folder.is_empty() {
            String::new()
        } else {
            format!("{}/", folder)
        };

        let mut listing = Listing::default();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut params = vec![
                ("list-type".to_string(), "2".to_string()),
                ("max-keys".to_string(), "1000".to_string()),
                ("delimiter".to_string(), "/".to_string()),
            ];
            if !prefix.is_empty() {
                params.push(("prefix".to_string(), prefix.clone()));
            }
            if let Some(ref token) = continuation_token {
                params.push(("continuation-token".to_string(), token.clone()));
            }

            let canonical_uri = format!("{}/", self.bucket_uri());
            let resp = self.signed_get(&canonical_uri, &params).await?;
            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                return Err(classify_status(status, &folder, &body));
            }

            let xml = resp
                .text()
                .await
                .map_err(|e| StoreError::Unavailable(e.to_string()))?;
            let page = parse_list_response(&xml);

            for key in page.keys {
                if key.ends_with('/') {
                    continue;
                }
                listing.files.push(StoreEntry {
                    name: file_name(&key).to_string(),
                    path: key,
                });
            }
            for common in page.prefixes {
                let trimmed = common.trim_end_matches('/').to_string();
                listing.folders.push(StoreEntry {
                    name: file_name(&trimmed).to_string(),
                    path: trimmed,
                });
            }

            if page.is_truncated && page.next_token.is_some() {
                continuation_token = page.next_token;
            } else {
                break;
            }
        }

        if listing.files.is_empty() && listing.folders.is_empty() {
            return Err(StoreError::NotFound(folder));
        }
        Ok(listing)
    }

    async fn get_bytes(&self, path: &str) -> Result<Vec<u8>, StoreError> {
        let key = join_path(&[path]);
        let encoded_key = key.split('/').map(uri_encode).collect::<Vec<_>>().join("/");
        let canonical_uri = format!("{}/{}", self.bucket_uri(), encoded_key);

        let resp = self.signed_get(&canonical_uri, &[]).await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(classify_status(status, &key, &body));
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

/// Maps an S3 error status onto the store error taxonomy.
fn classify_status(status: StatusCode, path: &str, body: &str) -> StoreError {
    if status == StatusCode::NOT_FOUND {
        StoreError::NotFound(path.to_string())
    } else if status == StatusCode::FORBIDDEN || status.is_server_error() {
        StoreError::Unavailable(format!(
            "S3 returned HTTP {} for '{}': {}",
            status,
            path,
            body.chars().take(300).collect::<String>()
        ))
    } else {
        StoreError::Other(anyhow::anyhow!(
            "S3 returned HTTP {} for '{}'",
            status,
            path
        ))
    }
}

// ============ AWS Credentials ============

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

// ============ AWS SigV4 Helpers ============

fn s3_host(config: &S3StoreConfig) -> String {
    if let Some(ref endpoint) = config.endpoint_url {
        endpoint
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .trim_end_matches('/')
            .to_string()
    } else {
        format!("{}.s3.{}.amazonaws.com", config.bucket, config.region)
    }
}

fn endpoint_scheme(config: &S3StoreConfig) -> &'static str {
    match config.endpoint_url {
        Some(ref endpoint) if endpoint.starts_with("http://") => "http",
        _ => "https",
    }
}

fn hex_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>, StoreError> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| StoreError::Other(anyhow::anyhow!("invalid HMAC key: {}", e)))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// ```text
/// kDate    = HMAC("AWS4" + secret, dateStamp)
/// kRegion  = HMAC(kDate, region)
/// kService = HMAC(kRegion, service)
/// kSigning = HMAC(kService, "aws4_request")
/// ```
fn derive_signing_key(
    secret_key: &str,
    date_stamp: &str,
    region: &str,
    service: &str,
) -> Result<Vec<u8>, StoreError> {
    let k_date = hmac_sha256(
        format!("AWS4{}", secret_key).as_bytes(),
        date_stamp.as_bytes(),
    )?;
    let k_region = hmac_sha256(&k_date, region.as_bytes())?;
    let k_service = hmac_sha256(&k_region, service.as_bytes())?;
    hmac_sha256(&k_service, b"aws4_request")
}

/// RFC 3986 encoding of everything except `A-Z a-z 0-9 - _ . ~`.
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

// ============ XML Parsing ============

/// One page of a `ListObjectsV2` response.
#[derive(Debug, Default)]
struct ListPage {
    keys: Vec<String>,
    prefixes: Vec<String>,
    is_truncated: bool,
    next_token: Option<String>,
}

fn parse_list_response(xml: &str) -> ListPage {
    let mut page = ListPage {
        is_truncated: extract_xml_value(xml, "IsTruncated")
            .map(|v| v == "true")
            .unwrap_or(false),
        next_token: extract_xml_value(xml, "NextContinuationToken"),
        ..Default::default()
    };

    for block in xml_blocks(xml, "Contents") {
        if let Some(key) = extract_xml_value(block, "Key") {
            page.keys.push(unescape_xml(&key));
        }
    }
    for block in xml_blocks(xml, "CommonPrefixes") {
        if let Some(prefix) = extract_xml_value(block, "Prefix") {
            page.prefixes.push(unescape_xml(&prefix));
        }
    }
    page
}

/// Inner text of every top-level `<tag>...</tag>` block.
fn xml_blocks<'a>(xml: &'a str, tag: &str) -> Vec<&'a str> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let mut blocks = Vec::new();
    let mut remaining = xml;
    while let Some(start) = remaining.find(&open) {
        let block_start = start + open.len();
        match remaining[block_start..].find(&close) {
            Some(end) => {
                blocks.push(&remaining[block_start..block_start + end]);
                remaining = &remaining[block_start + end + close.len()..];
            }
            None => break,
        }
    }
    blocks
}

fn extract_xml_value(xml: &str, tag: &str) -> Option<String> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let start = xml.find(&open)? + open.len();
    let end = xml[start..].find(&close)?;
    Some(xml[start..start + end].to_string())
}

fn unescape_xml(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
