//! Jurisdiction-aware context assembly.
//!
//! The assembler turns a [`JurisdictionPath`] and a building type into one
//! budgeted block of reference text for the analysis step. Each named level
//! maps to a folder under the knowledge-base prefix:
//!
//! ```text
//! knowledge-base/State/<state>/...
//! knowledge-base/County/<county>/...
//! knowledge-base/City/<city>/...
//! ```
//!
//! Files in a folder are fetched and extracted concurrently (bounded by
//! `[assembly].concurrency`), but their contributions are appended in listing
//! order, so the output is the same as a sequential walk. Folder blocks are
//! always concatenated State, County, City.
//!
//! Missing folders and unreadable files are skipped. Only a store that is
//! unreachable for every attempted level fails the whole call.

use std::sync::Arc;

use futures::stream::{self, StreamExt};

use crate::config::Config;
use crate::extract::{extract_relevant, sentinel_text, ExtractError};
use crate::models::{
    DocumentRef, JurisdictionLevel, JurisdictionOptions, JurisdictionPath, ListedDocument,
    MediaKind,
};
use crate::relevance::KeywordSet;
use crate::store::{file_name, join_path, DocumentStore, StoreEntry, StoreError};

/// Returned instead of an empty context when no jurisdiction folder yielded
/// any text.
pub const NO_DOCUMENTS_MARKER: &str = "No jurisdiction-specific documents were found in the knowledge base. Rely on general building code knowledge (IBC/IRC) for this analysis.";

#[derive(Debug, thiserror::Error)]
pub enum AssembleError {
    #[error("document store unavailable: {0}")]
    StoreUnavailable(String),
}

/// What listing one jurisdiction folder produced.
enum FolderOutcome {
    Assembled(String),
    Missing,
    Unavailable(String),
    Failed,
}

/// Builds context blocks from a [`DocumentStore`].
pub struct ContextAssembler {
    store: Arc<dyn DocumentStore>,
    prefix: String,
    max_pdf_pages: usize,
    fallback_pages: usize,
    file_chars: usize,
    folder_chars: usize,
    explicit_document_chars: usize,
    concurrency: usize,
}

impl ContextAssembler {
    pub fn new(store: Arc<dyn DocumentStore>, config: &Config) -> Self {
        Self {
            store,
            prefix: config.store.prefix.clone(),
            max_pdf_pages: config.extraction.max_pdf_pages,
            fallback_pages: config.relevance.fallback_pages,
            file_chars: config.budget.file_chars,
            folder_chars: config.budget.folder_chars,
            explicit_document_chars: config.budget.explicit_document_chars,
            concurrency: config.assembly.concurrency.max(1),
        }
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// Knowledge-base prefix the jurisdiction folders live under.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn level_folder(&self, level: JurisdictionLevel, name: &str) -> String {
        join_path(&[&self.prefix, level.folder_name(), name])
    }

    /// Assembles the reference context for a plan review.
    ///
    /// With `explicit_document_path`, only that document is used and the
    /// jurisdiction is ignored. A document that cannot be fetched yields a
    /// placeholder line rather than an error.
    pub async fn assemble_context(
        &self,
        jurisdiction: &JurisdictionPath,
        building_type: &str,
        explicit_document_path: Option<&str>,
    ) -> Result<String, AssembleError> {
        let keywords = Arc::new(KeywordSet::from_building_type(building_type));

        if let Some(path) = explicit_document_path.filter(|p| !p.trim().is_empty()) {
            return Ok(self.explicit_document(path, keywords).await);
        }

        let mut blocks = Vec::with_capacity(3);
        let mut attempted = 0usize;
        let mut unavailable = Vec::new();

        for (level, name) in jurisdiction.named_levels() {
            attempted += 1;
            match self.folder_context(level, name, keywords.clone()).await {
                FolderOutcome::Assembled(block) => blocks.push(block),
                FolderOutcome::Missing | FolderOutcome::Failed => {}
                FolderOutcome::Unavailable(reason) => unavailable.push(reason),
            }
        }

        if attempted > 0 && unavailable.len() == attempted {
            return Err(AssembleError::StoreUnavailable(unavailable.remove(0)));
        }

        let context: String = blocks.concat();
        if context.is_empty() {
            tracing::info!(
                state = ?jurisdiction.state,
                county = ?jurisdiction.county,
                city = ?jurisdiction.city,
                "no jurisdiction documents found"
            );
            return Ok(NO_DOCUMENTS_MARKER.to_string());
        }

        tracing::debug!(chars = context.chars().count(), "context assembled");
        Ok(context)
    }

    async fn explicit_document(&self, path: &str, keywords: Arc<KeywordSet>) -> String {
        let name = file_name(path).to_string();
        let bytes = match self.store.get_bytes(path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(path, error = %e, "reference document could not be loaded");
                return format!("[Reference document '{}' could not be loaded: {}]", path, e);
            }
        };

        let filtered = self
            .extract_blocking(
                bytes,
                MediaKind::from_name(&name),
                keywords,
                self.explicit_document_chars,
            )
            .await;
        format!("--- Reference document: {} ---\n{}\n", name, filtered)
    }

    async fn folder_context(
        &self,
        level: JurisdictionLevel,
        name: &str,
        keywords: Arc<KeywordSet>,
    ) -> FolderOutcome {
        let folder = self.level_folder(level, name);
        let listing = match self.store.list(&folder).await {
            Ok(listing) => listing,
            Err(StoreError::NotFound(_)) => {
                tracing::debug!(%level, folder, "jurisdiction folder not found");
                return FolderOutcome::Missing;
            }
            Err(StoreError::Unavailable(reason)) => {
                tracing::warn!(%level, folder, reason, "store unavailable while listing");
                return FolderOutcome::Unavailable(reason);
            }
            Err(e) => {
                tracing::warn!(%level, folder, error = %e, "failed to list jurisdiction folder");
                return FolderOutcome::Failed;
            }
        };

        let mut results = stream::iter(listing.files)
            .map(|entry| {
                let keywords = keywords.clone();
                async move {
                    let text = self.fetch_relevant(&entry, keywords).await;
                    (entry, text)
                }
            })
            .buffered(self.concurrency);

        let mut block = String::new();
        let mut used = 0usize;
        while let Some((entry, text)) = results.next().await {
            if used >= self.folder_chars {
                tracing::debug!(%level, folder, "folder budget reached");
                break;
            }
            let Some(text) = text else { continue };
            let contribution = format!("\n--- {}: {} ---\n{}\n", level, entry.name, text);
            let contribution = truncate_chars(&contribution, self.folder_chars - used);
            used += contribution.chars().count();
            block.push_str(contribution);
        }

        FolderOutcome::Assembled(block)
    }

    async fn fetch_relevant(&self, entry: &StoreEntry, keywords: Arc<KeywordSet>) -> Option<String> {
        let bytes = match self.store.get_bytes(&entry.path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(path = %entry.path, error = %e, "skipping unreadable document");
                return None;
            }
        };
        let kind = MediaKind::from_name(&entry.name);
        Some(
            self.extract_blocking(bytes, kind, keywords, self.file_chars)
                .await,
        )
    }

    async fn extract_blocking(
        &self,
        bytes: Vec<u8>,
        kind: MediaKind,
        keywords: Arc<KeywordSet>,
        char_budget: usize,
    ) -> String {
        let max_pages = self.max_pdf_pages;
        let fallback_pages = self.fallback_pages;
        let task = tokio::task::spawn_blocking(move || {
            extract_relevant(&bytes, kind, &keywords, char_budget, max_pages, fallback_pages)
        });
        match task.await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(error = %e, "extraction task failed");
                sentinel_text(&ExtractError::Pdf(e.to_string()))
            }
        }
    }

    /// Files directly under each named jurisdiction folder, tagged with their
    /// level. Folders that cannot be listed contribute nothing.
    pub async fn list_documents(&self, jurisdiction: &JurisdictionPath) -> Vec<ListedDocument> {
        let mut documents = Vec::new();
        for (level, name) in jurisdiction.named_levels() {
            let folder = self.level_folder(level, name);
            match self.store.list(&folder).await {
                Ok(listing) => {
                    documents.extend(listing.files.into_iter().map(|entry| ListedDocument {
                        level,
                        document: DocumentRef::new(entry.name, entry.path),
                    }));
                }
                Err(StoreError::NotFound(_)) => {
                    tracing::debug!(%level, folder, "jurisdiction folder not found");
                }
                Err(e) => {
                    tracing::warn!(%level, folder, error = %e, "failed to list documents");
                }
            }
        }
        documents
    }

    /// Names of the jurisdictions that have a folder in the knowledge base.
    pub async fn list_jurisdiction_options(&self) -> JurisdictionOptions {
        JurisdictionOptions {
            states: self.subfolder_names(JurisdictionLevel::State).await,
            counties: self.subfolder_names(JurisdictionLevel::County).await,
            cities: self.subfolder_names(JurisdictionLevel::City).await,
        }
    }

    async fn subfolder_names(&self, level: JurisdictionLevel) -> Vec<String> {
        let folder = join_path(&[&self.prefix, level.folder_name()]);
        match self.store.list(&folder).await {
            Ok(listing) => listing.folders.into_iter().map(|f| f.name).collect(),
            Err(StoreError::NotFound(_)) => Vec::new(),
            Err(e) => {
                tracing::warn!(%level, error = %e, "failed to list jurisdictions");
                Vec::new()
            }
        }
    }
}

/// Longest prefix of `s` holding at most `max_chars` characters.
fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn assembler(store: MemoryStore) -> ContextAssembler {
        ContextAssembler::new(Arc::new(store), &Config::minimal())
    }

    fn el_segundo() -> JurisdictionPath {
        JurisdictionPath::new(Some("California"), Some(""), Some("El Segundo"))
    }

    #[tokio::test]
    async fn state_match_and_city_fallback() {
        let store = MemoryStore::new()
            .with_file(
                "knowledge-base/State/California/title24.txt",
                "egress window requirement section R310",
            )
            .with_file(
                "knowledge-base/City/El Segundo/forms.txt",
                "parking permit form",
            );
        let ctx = assembler(store)
            .assemble_context(&el_segundo(), "residential", None)
            .await
            .unwrap();

        assert_eq!(
            ctx,
            "\n--- State: title24.txt ---\n[Page 1]\negress window requirement section R310\n\n\n\
             \n--- City: forms.txt ---\nparking permit form\n"
        );
        assert!(!ctx.contains("County"));
    }

    #[tokio::test]
    async fn no_folders_yields_marker() {
        let ctx = assembler(MemoryStore::new())
            .assemble_context(&el_segundo(), "residential", None)
            .await
            .unwrap();
        assert_eq!(ctx, NO_DOCUMENTS_MARKER);
    }

    #[tokio::test]
    async fn empty_jurisdiction_yields_marker() {
        let ctx = assembler(MemoryStore::new())
            .assemble_context(&JurisdictionPath::default(), "residential", None)
            .await
            .unwrap();
        assert_eq!(ctx, NO_DOCUMENTS_MARKER);
    }

    #[tokio::test]
    async fn levels_are_concatenated_state_county_city() {
        let store = MemoryStore::new()
            .with_file("knowledge-base/City/Austin/c.txt", "city code")
            .with_file("knowledge-base/County/Travis/b.txt", "county code")
            .with_file("knowledge-base/State/Texas/a.txt", "state code");
        let j = JurisdictionPath::new(Some("Texas"), Some("Travis"), Some("Austin"));
        let ctx = assembler(store)
            .assemble_context(&j, "commercial", None)
            .await
            .unwrap();
        let s = ctx.find("--- State:").unwrap();
        let co = ctx.find("--- County:").unwrap();
        let ci = ctx.find("--- City:").unwrap();
        assert!(s < co && co < ci);
    }

    #[tokio::test]
    async fn folder_budget_is_never_exceeded() {
        let mut config = Config::minimal();
        config.budget.folder_chars = 120;
        config.budget.file_chars = 1000;
        let store = MemoryStore::new();
        for i in 0..5 {
            store.insert(
                &format!("knowledge-base/State/Ohio/{}.txt", i),
                "fire separation ".repeat(10),
            );
        }
        let asm = ContextAssembler::new(Arc::new(store), &config);
        let j = JurisdictionPath::new(Some("Ohio"), None, None);
        let ctx = asm.assemble_context(&j, "office", None).await.unwrap();
        assert_eq!(ctx.chars().count(), 120);
        assert!(ctx.starts_with("\n--- State: 0.txt ---\n"));
    }

    #[tokio::test]
    async fn concurrency_does_not_change_output() {
        let store = || {
            let s = MemoryStore::new();
            for i in 0..9 {
                s.insert(
                    &format!("knowledge-base/State/Utah/{:02}.txt", i),
                    format!("zoning page {}", i),
                );
            }
            s
        };
        let j = JurisdictionPath::new(Some("Utah"), None, None);

        let mut sequential = Config::minimal();
        sequential.assembly.concurrency = 1;
        let a = ContextAssembler::new(Arc::new(store()), &sequential)
            .assemble_context(&j, "residential", None)
            .await
            .unwrap();

        let mut wide = Config::minimal();
        wide.assembly.concurrency = 8;
        let b = ContextAssembler::new(Arc::new(store()), &wide)
            .assemble_context(&j, "residential", None)
            .await
            .unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn explicit_document_overrides_jurisdiction() {
        let store = MemoryStore::new()
            .with_file("uploads/plan-notes.txt", "stair riser height 7 in")
            .with_file("knowledge-base/State/California/a.txt", "egress");
        let ctx = assembler(store)
            .assemble_context(&el_segundo(), "residential", Some("uploads/plan-notes.txt"))
            .await
            .unwrap();
        assert_eq!(
            ctx,
            "--- Reference document: plan-notes.txt ---\n[Page 1]\nstair riser height 7 in\n\n\n"
        );
    }

    #[tokio::test]
    async fn missing_explicit_document_yields_placeholder() {
        let ctx = assembler(MemoryStore::new())
            .assemble_context(&el_segundo(), "residential", Some("uploads/gone.pdf"))
            .await
            .unwrap();
        assert!(ctx.starts_with("[Reference document 'uploads/gone.pdf' could not be loaded:"));
    }

    #[tokio::test]
    async fn unparseable_pdf_contributes_sentinel() {
        let store = MemoryStore::new().with_file("knowledge-base/State/Iowa/bad.pdf", "garbage");
        let j = JurisdictionPath::new(Some("Iowa"), None, None);
        let ctx = assembler(store)
            .assemble_context(&j, "residential", None)
            .await
            .unwrap();
        assert!(ctx.contains("--- State: bad.pdf ---"));
        assert!(ctx.contains("[Text extraction failed:"));
    }

    #[tokio::test]
    async fn unreachable_store_is_an_error() {
        let asm = ContextAssembler::new(Arc::new(MemoryStore::unavailable()), &Config::minimal());
        let err = asm
            .assemble_context(&el_segundo(), "residential", None)
            .await
            .unwrap_err();
        assert!(matches!(err, AssembleError::StoreUnavailable(_)));
        assert!(asm.list_documents(&el_segundo()).await.is_empty());
    }

    #[tokio::test]
    async fn lists_state_documents_with_level() {
        let store = MemoryStore::new()
            .with_file("knowledge-base/State/Texas/a.pdf", "a")
            .with_file("knowledge-base/State/Texas/b.txt", "b")
            .with_file("knowledge-base/State/Texas/amendments/c.txt", "c");
        let j = JurisdictionPath::new(Some("Texas"), Some(""), Some(""));
        let docs = assembler(store).list_documents(&j).await;
        assert_eq!(docs.len(), 2);
        assert!(docs.iter().all(|d| d.level == JurisdictionLevel::State));
        assert_eq!(docs[0].document.media_kind, MediaKind::Pdf);
        assert_eq!(docs[1].document.path, "knowledge-base/State/Texas/b.txt");
    }

    #[tokio::test]
    async fn jurisdiction_options_are_subfolders() {
        let store = MemoryStore::new()
            .with_file("knowledge-base/State/Texas/a.txt", "a")
            .with_file("knowledge-base/State/California/b.txt", "b")
            .with_file("knowledge-base/City/Austin/c.txt", "c");
        let opts = assembler(store).list_jurisdiction_options().await;
        assert_eq!(opts.states, vec!["California", "Texas"]);
        assert!(opts.counties.is_empty());
        assert_eq!(opts.cities, vec!["Austin"]);
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("abc", 0), "");
    }
}
