//! In-memory [`DocumentStore`] for tests and embedding.
//!
//! Files live in a `BTreeMap` keyed by path behind a `std::sync::RwLock`, so
//! listings come back in lexicographic order. Folders are implied by file
//! paths, as in object storage. A store marked down answers every call with
//! [`StoreError::Unavailable`].

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;

use super::{join_path, DocumentStore, Listing, StoreEntry, StoreError};

/// In-memory document store.
pub struct MemoryStore {
    files: RwLock<BTreeMap<String, Vec<u8>>>,
    down: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            files: RwLock::new(BTreeMap::new()),
            down: AtomicBool::new(false),
        }
    }

    /// A store that is down from the start.
    pub fn unavailable() -> Self {
        let store = Self::new();
        store.set_down(true);
        store
    }

    /// Simulates an outage (`true`) or recovery (`false`).
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    fn check_up(&self) -> Result<(), StoreError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store is down".into()));
        }
        Ok(())
    }

    /// Adds or replaces a file.
    pub fn insert(&self, path: &str, bytes: impl Into<Vec<u8>>) {
        let path = join_path(&[path]);
        self.files
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(path, bytes.into());
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with_file(self, path: &str, bytes: impl Into<Vec<u8>>) -> Self {
        self.insert(path, bytes);
        self
    }

    pub fn len(&self) -> usize {
        self.files.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    fn kind(&self) -> &str {
        "memory"
    }

    async fn list(&self, path: &str) -> Result<Listing, StoreError> {
        self.check_up()?;
        let folder = join_path(&[path]);
        let prefix = if folder.is_empty() {
            String::new()
        } else {
            format!("{}/", folder)
        };

        let files = self.files.read().unwrap_or_else(|e| e.into_inner());
        let mut listing = Listing::default();
        let mut seen_folders = BTreeSet::new();

        for key in files.keys().filter(|k| k.starts_with(&prefix)) {
            let rest = &key[prefix.len()..];
            match rest.split_once('/') {
                Some((child, _)) => {
                    if seen_folders.insert(child.to_string()) {
                        listing.folders.push(StoreEntry {
                            name: child.to_string(),
                            path: format!("{}{}", prefix, child),
                        });
                    }
                }
                None => listing.files.push(StoreEntry {
                    name: rest.to_string(),
                    path: key.clone(),
                }),
            }
        }

        if listing.files.is_empty() && listing.folders.is_empty() {
            return Err(StoreError::NotFound(folder));
        }
        Ok(listing)
    }

    async fn get_bytes(&self, path: &str) -> Result<Vec<u8>, StoreError> {
        self.check_up()?;
        let key = join_path(&[path]);
        self.files
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&key)
            .cloned()
            .ok_or(StoreError::NotFound(key))
    }
}
