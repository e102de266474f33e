//! Read-only access to the hierarchical document store.
//!
//! The [`DocumentStore`] trait is the only contract the retrieval pipeline
//! has with blob storage: list a folder, fetch a file's bytes. Three backends
//! are provided:
//!
//! | Backend | Use |
//! |---------|-----|
//! | [`MemoryStore`] | Tests and embedding in other programs |
//! | [`FilesystemStore`] | A knowledge base checked out on local disk |
//! | [`S3Store`] | S3-compatible object storage (AWS, MinIO, LocalStack) |
//!
//! Paths are `/`-separated and relative to the store root, e.g.
//! `knowledge-base/State/California/title24.pdf`.

pub mod fs;
pub mod memory;
pub mod s3;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use crate::config::Config;

pub use fs::FilesystemStore;
pub use memory::MemoryStore;
pub use s3::S3Store;

/// A file or folder returned by [`DocumentStore::list`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreEntry {
    pub name: String,
    pub path: String,
}

/// Contents of one folder (direct children only).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Listing {
    pub files: Vec<StoreEntry>,
    pub folders: Vec<StoreEntry>,
}

/// Errors a store backend can report.
///
/// Callers branch on the variant: a missing folder is expected while
/// walking jurisdictions, an unreachable store is not.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Hierarchical blob storage, read-only.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Short backend label used in logs (e.g. `"filesystem"`).
    fn kind(&self) -> &str;

    /// Lists the direct children of `path`.
    ///
    /// Returns [`StoreError::NotFound`] when the folder does not exist or
    /// holds nothing.
    async fn list(&self, path: &str) -> Result<Listing, StoreError>;

    /// Fetches the raw bytes of the file at `path`.
    async fn get_bytes(&self, path: &str) -> Result<Vec<u8>, StoreError>;
}

/// Joins store path segments with `/`, skipping empty segments and trimming
/// stray separators.
pub fn join_path(segments: &[&str]) -> String {
    segments
        .iter()
        .map(|s| s.trim_matches('/'))
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// Last `/`-separated segment of a store path.
pub fn file_name(path: &str) -> &str {
    path.trim_end_matches('/').rsplit('/').next().unwrap_or(path)
}

/// Builds the store backend selected by `[store].kind`.
pub fn open_store(config: &Config) -> Result<Arc<dyn DocumentStore>> {
    match config.store.kind.as_str() {
        "filesystem" => Ok(Arc::new(FilesystemStore::new(
            config.store.root.clone(),
            &config.store.exclude_globs,
        )?)),
        "s3" => {
            let s3_config = config
                .store
                .s3
                .clone()
                .ok_or_else(|| anyhow::anyhow!("store.s3 is not configured"))?;
            Ok(Arc::new(S3Store::from_env(s3_config)?))
        }
        other => anyhow::bail!("Unknown store kind: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_skips_empty_segments() {
        assert_eq!(
            join_path(&["knowledge-base/", "State", "", "/California"]),
            "knowledge-base/State/California"
        );
    }

    #[test]
    fn file_name_is_last_segment() {
        assert_eq!(file_name("a/b/c.pdf"), "c.pdf");
        assert_eq!(file_name("a/b/"), "b");
        assert_eq!(file_name("solo.txt"), "solo.txt");
    }
}
