//! Object storage for trained model artifacts.
//!
//! Models are published as blobs under a common prefix; the newest one by
//! update time is the one served.

mod gcs;

pub use gcs::GcsStore;

use chrono::{DateTime, Utc};
use std::path::Path;

use crate::error::StorageError;

/// Metadata of a stored object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobInfo {
    pub name: String,
    pub bucket: String,
    pub updated: DateTime<Utc>,
    pub size: Option<u64>,
    /// Base64-encoded MD5 of the content, when the store reports one
    pub md5_hash: Option<String>,
}

/// Trait for object stores that can list and download model blobs
pub trait BlobStore: Send + Sync {
    /// List blobs in `bucket` whose name starts with `prefix`
    fn list_blobs(&self, bucket: &str, prefix: &str) -> Result<Vec<BlobInfo>, StorageError>;

    /// Download a blob to `dest`, replacing any existing file
    fn download(&self, blob: &BlobInfo, dest: &Path) -> Result<(), StorageError>;

    /// Get the store name for logs
    fn store_name(&self) -> &'static str;
}

/// Pick the most recently updated blob, skipping folder placeholders.
///
/// Among blobs with the same timestamp the one listed first wins.
pub fn select_latest(blobs: &[BlobInfo]) -> Option<&BlobInfo> {
    blobs
        .iter()
        .filter(|b| !b.name.ends_with('/'))
        .rev()
        .max_by_key(|b| b.updated)
}
