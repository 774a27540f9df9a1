//! Google Cloud Storage client over the JSON API

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use serde::Deserialize;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

use super::{BlobInfo, BlobStore};
use crate::config::StorageConfig;
use crate::error::StorageError;

const TOKEN_ENV: &str = "GOOGLE_OAUTH_ACCESS_TOKEN";
const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

pub struct GcsStore {
    endpoint: String,
    agent: ureq::Agent,
    configured_token: Option<String>,
    resolved_token: OnceLock<Option<String>>,
    verify_checksum: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectList {
    #[serde(default)]
    items: Vec<GcsObject>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GcsObject {
    name: String,
    bucket: String,
    updated: DateTime<Utc>,
    size: Option<String>,
    md5_hash: Option<String>,
}

impl From<GcsObject> for BlobInfo {
    fn from(obj: GcsObject) -> Self {
        BlobInfo {
            name: obj.name,
            bucket: obj.bucket,
            updated: obj.updated,
            size: obj.size.and_then(|s| s.parse().ok()),
            md5_hash: obj.md5_hash,
        }
    }
}

#[derive(Debug, Deserialize)]
struct MetadataToken {
    access_token: String,
}

impl GcsStore {
    pub fn from_config(config: &StorageConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(10))
            .timeout_read(Duration::from_secs(config.timeout_secs))
            .build();

        Self {
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            agent,
            configured_token: config.access_token.clone().filter(|t| !t.is_empty()),
            resolved_token: OnceLock::new(),
            verify_checksum: config.verify_checksum,
        }
    }

    /// Bearer token from config, environment, or the instance metadata server
    fn token(&self) -> Option<&str> {
        self.resolved_token
            .get_or_init(|| {
                if let Some(token) = &self.configured_token {
                    return Some(token.clone());
                }
                if let Ok(token) = std::env::var(TOKEN_ENV) {
                    if !token.is_empty() {
                        return Some(token);
                    }
                }
                match fetch_metadata_token() {
                    Ok(token) => Some(token),
                    Err(e) => {
                        tracing::debug!(error = %e, "No metadata server token, using anonymous access");
                        None
                    }
                }
            })
            .as_deref()
    }

    fn get(&self, url: &str) -> ureq::Request {
        let request = self.agent.get(url);
        match self.token() {
            Some(token) => request.set("Authorization", &format!("Bearer {}", token)),
            None => request,
        }
    }

    fn bucket_url(&self, bucket: &str) -> String {
        format!("{}/storage/v1/b/{}", self.endpoint, urlencoding::encode(bucket))
    }

    fn object_url(&self, bucket: &str, name: &str) -> String {
        format!("{}/o/{}", self.bucket_url(bucket), urlencoding::encode(name))
    }

    fn ensure_bucket(&self, bucket: &str) -> Result<(), StorageError> {
        self.get(&self.bucket_url(bucket))
            .call()
            .map_err(|e| map_ureq_error(bucket, e))?;
        Ok(())
    }
}

impl BlobStore for GcsStore {
    fn list_blobs(&self, bucket: &str, prefix: &str) -> Result<Vec<BlobInfo>, StorageError> {
        self.ensure_bucket(bucket)?;

        let url = format!("{}/o", self.bucket_url(bucket));
        let mut blobs = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self.get(&url).query("prefix", prefix);
            if let Some(token) = &page_token {
                request = request.query("pageToken", token);
            }

            let page: ObjectList = request
                .call()
                .map_err(|e| map_ureq_error(bucket, e))?
                .into_json()
                .map_err(|e| StorageError::Parse(e.to_string()))?;

            blobs.extend(page.items.into_iter().map(BlobInfo::from));

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        tracing::debug!(bucket = %bucket, prefix = %prefix, count = blobs.len(), "Listed blobs");
        Ok(blobs)
    }

    fn download(&self, blob: &BlobInfo, dest: &Path) -> Result<(), StorageError> {
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let response = self
            .get(&self.object_url(&blob.bucket, &blob.name))
            .query("alt", "media")
            .call()
            .map_err(|e| match map_ureq_error(&blob.bucket, e) {
                StorageError::BucketNotFound(bucket) => StorageError::ObjectNotFound {
                    bucket,
                    name: blob.name.clone(),
                },
                other => other,
            })?;

        // Write next to the target and rename, so a failed download never
        // leaves a truncated model behind
        let partial = dest.with_extension("part");
        let digest = match write_hashed(&mut response.into_reader(), &partial) {
            Ok(digest) => digest,
            Err(e) => {
                let _ = std::fs::remove_file(&partial);
                return Err(e.into());
            }
        };

        if self.verify_checksum {
            if let Some(expected) = &blob.md5_hash {
                if let Err(e) = verify_md5(&blob.name, expected, &digest) {
                    let _ = std::fs::remove_file(&partial);
                    return Err(e);
                }
            }
        }

        std::fs::rename(&partial, dest)?;
        tracing::info!(blob = %blob.name, path = ?dest, "Model downloaded");
        Ok(())
    }

    fn store_name(&self) -> &'static str {
        "gcs"
    }
}

/// Copy a stream to a file, returning the MD5 digest of what was written
fn write_hashed(reader: &mut impl Read, path: &Path) -> std::io::Result<Vec<u8>> {
    let mut file = File::create(path)?;
    let mut hasher = Md5::new();
    let mut buffer = [0u8; 64 * 1024];

    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
        file.write_all(&buffer[..bytes_read])?;
    }
    file.flush()?;

    Ok(hasher.finalize().to_vec())
}

fn verify_md5(name: &str, expected: &str, digest: &[u8]) -> Result<(), StorageError> {
    let actual = BASE64.encode(digest);
    if actual == expected {
        Ok(())
    } else {
        Err(StorageError::Integrity {
            name: name.to_string(),
            expected: expected.to_string(),
            actual,
        })
    }
}

fn map_ureq_error(bucket: &str, error: ureq::Error) -> StorageError {
    match error {
        ureq::Error::Status(status, response) => {
            let message = response.into_string().unwrap_or_default();
            map_status(bucket, status, message)
        }
        ureq::Error::Transport(t) => StorageError::Transport(t.to_string()),
    }
}

fn map_status(bucket: &str, status: u16, message: String) -> StorageError {
    match status {
        404 => StorageError::BucketNotFound(bucket.to_string()),
        401 | 403 => StorageError::Auth(message),
        _ => StorageError::Http { status, message },
    }
}

fn fetch_metadata_token() -> Result<String, StorageError> {
    let agent = ureq::AgentBuilder::new()
        .timeout(Duration::from_secs(2))
        .build();

    let token: MetadataToken = agent
        .get(METADATA_TOKEN_URL)
        .set("Metadata-Flavor", "Google")
        .call()
        .map_err(|e| StorageError::Auth(e.to_string()))?
        .into_json()
        .map_err(|e| StorageError::Parse(e.to_string()))?;

    Ok(token.access_token)
}
