//! Local filesystem [`DocumentStore`].
//!
//! Store paths map onto directories below a root. Listings are one level
//! deep, sorted by file name, and skip entries matching the configured
//! exclude globs (hidden files by default). Directory walks run on the
//! blocking pool.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use globset::{Glob, GlobSet, GlobSetBuilder};
use walkdir::WalkDir;

use super::{join_path, DocumentStore, Listing, StoreEntry, StoreError};

pub struct FilesystemStore {
    root: PathBuf,
    excludes: Arc<GlobSet>,
}

impl FilesystemStore {
    pub fn new(root: PathBuf, exclude_globs: &[String]) -> Result<Self> {
        Ok(Self {
            root,
            excludes: Arc::new(build_globset(exclude_globs)?),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, StoreError> {
        let rel = join_path(&[path]);
        if rel.split('/').any(|seg| seg == "..") {
            return Err(StoreError::NotFound(rel));
        }
        Ok(self.root.join(rel))
    }
}

#[async_trait]
impl DocumentStore for FilesystemStore {
    fn kind(&self) -> &str {
        "filesystem"
    }

    async fn list(&self, path: &str) -> Result<Listing, StoreError> {
        let folder = join_path(&[path]);
        let dir = self.resolve(&folder)?;
        let root = self.root.clone();
        let excludes = Arc::clone(&self.excludes);
        tokio::task::spawn_blocking(move || list_dir(&root, &dir, &folder, &excludes))
            .await
            .map_err(|e| StoreError::Other(anyhow::anyhow!("listing task failed: {}", e)))?
    }

    async fn get_bytes(&self, path: &str) -> Result<Vec<u8>, StoreError> {
        let file = self.resolve(path)?;
        match tokio::fs::read(&file).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(StoreError::NotFound(join_path(&[path])))
            }
            Err(e) => Err(StoreError::Other(anyhow::anyhow!(
                "failed to read {}: {}",
                file.display(),
                e
            ))),
        }
    }
}

/// Lists one directory level. Runs on the blocking pool.
fn list_dir(root: &Path, dir: &Path, folder: &str, excludes: &GlobSet) -> Result<Listing, StoreError> {
    if !root.is_dir() {
        return Err(StoreError::Unavailable(format!(
            "filesystem store root does not exist: {}",
            root.display()
        )));
    }
    if !dir.is_dir() {
        return Err(StoreError::NotFound(folder.to_string()));
    }

    let mut listing = Listing::default();
    let walker = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name();

    for entry in walker {
        let entry = entry.map_err(|e| StoreError::Other(e.into()))?;
        let name = entry.file_name().to_string_lossy().to_string();
        let store_path = join_path(&[folder, &name]);
        if excludes.is_match(&store_path) || excludes.is_match(&name) {
            continue;
        }

        let item = StoreEntry {
            name,
            path: store_path,
        };
        if entry.file_type().is_dir() {
            listing.folders.push(item);
        } else if entry.file_type().is_file() {
            listing.files.push(item);
        }
    }

    if listing.files.is_empty() && listing.folders.is_empty() {
        return Err(StoreError::NotFound(folder.to_string()));
    }
    Ok(listing)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
