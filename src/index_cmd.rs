//! `planpath index build`: produce the semantic index JSON from the store.
//!
//! Every file below the knowledge-base prefix is extracted, split into
//! overlapping character windows, and embedded in batches. Each chunk's
//! `source` is the file path relative to the prefix (for example
//! `City/El Segundo/ch1.pdf`), which is what jurisdiction filtering in
//! [`crate::index`] matches against.

use std::path::Path;

use anyhow::{bail, Context, Result};

use crate::chunk::chunk_text;
use crate::config::Config;
use crate::embedding::{create_provider, EmbeddingProvider};
use crate::extract::try_extract_text;
use crate::models::{CodeChunk, MediaKind};
use crate::progress::{IndexProgressEvent, IndexProgressReporter, ProgressMode};
use crate::store::{open_store, DocumentStore, StoreEntry, StoreError};

/// Outcome of [`build_index`].
#[derive(Debug, Default)]
pub struct IndexBuild {
    pub chunks: Vec<CodeChunk>,
    pub documents: u64,
    pub failed_documents: u64,
    pub failed_chunks: u64,
}

/// Lists every file under `prefix`, depth first, in listing order.
pub async fn walk_files(store: &dyn DocumentStore, prefix: &str) -> Result<Vec<StoreEntry>> {
    let mut files = Vec::new();
    let mut pending = vec![prefix.to_string()];

    while let Some(folder) = pending.pop() {
        let listing = match store.list(&folder).await {
            Ok(listing) => listing,
            Err(StoreError::NotFound(_)) if folder != prefix => continue,
            Err(e) => return Err(anyhow::Error::new(e).context(format!("failed to list {}", folder))),
        };
        files.extend(listing.files);
        // Reversed so the stack pops folders in listing order.
        pending.extend(listing.folders.into_iter().rev().map(|f| f.path));
    }

    Ok(files)
}

fn relative_source(path: &str, prefix: &str) -> String {
    let prefix = format!("{}/", prefix.trim_matches('/'));
    path.strip_prefix(prefix.as_str()).unwrap_or(path).to_string()
}

/// Extracts, chunks, and embeds every document in the knowledge base.
///
/// Documents that cannot be fetched or parsed are skipped and counted. A failed
/// embedding batch drops that batch's chunks. Chunk ids are assigned
/// sequentially over the chunks that were embedded.
pub async fn build_index(
    store: &dyn DocumentStore,
    provider: &dyn EmbeddingProvider,
    config: &Config,
    reporter: &dyn IndexProgressReporter,
) -> Result<IndexBuild> {
    let prefix = config.store.prefix.clone();
    reporter.report(IndexProgressEvent::Discovering {
        prefix: prefix.clone(),
    });
    let files = walk_files(store, &prefix).await?;

    let mut build = IndexBuild::default();
    let mut pending: Vec<(String, String)> = Vec::new();
    let total_files = files.len() as u64;

    for (n, entry) in files.iter().enumerate() {
        let bytes = match store.get_bytes(&entry.path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(path = %entry.path, error = %e, "skipping document");
                build.failed_documents += 1;
                continue;
            }
        };

        let kind = MediaKind::from_name(&entry.name);
        let max_pages = config.chunking.max_pages;
        let doc = match tokio::task::spawn_blocking(move || try_extract_text(&bytes, kind, max_pages))
            .await
        {
            Ok(Ok(doc)) => doc,
            Ok(Err(e)) => {
                tracing::warn!(path = %entry.path, error = %e, "skipping unparseable document");
                build.failed_documents += 1;
                continue;
            }
            Err(e) => {
                tracing::warn!(path = %entry.path, error = %e, "extraction task failed");
                build.failed_documents += 1;
                continue;
            }
        };

        let source = relative_source(&entry.path, &prefix);
        let windows = chunk_text(
            &doc.full_text,
            config.chunking.chunk_chars,
            config.chunking.overlap_chars,
        );
        tracing::debug!(source, pages = doc.pages.len(), chunks = windows.len(), "document chunked");
        pending.extend(windows.into_iter().map(|text| (text, source.clone())));
        build.documents += 1;

        reporter.report(IndexProgressEvent::Extracting {
            n: n as u64 + 1,
            total: total_files,
        });
    }

    let total_chunks = pending.len() as u64;
    let mut embedded = 0u64;
    for batch in pending.chunks(config.embedding.batch_size.max(1)) {
        let texts: Vec<String> = batch.iter().map(|(text, _)| text.clone()).collect();
        match provider.embed(&texts).await {
            Ok(vectors) if vectors.len() == batch.len() => {
                for ((text, source), embedding) in batch.iter().zip(vectors) {
                    build.chunks.push(CodeChunk {
                        id: build.chunks.len() as u64,
                        text: text.clone(),
                        source: source.clone(),
                        embedding,
                    });
                }
            }
            Ok(vectors) => {
                tracing::warn!(
                    expected = batch.len(),
                    got = vectors.len(),
                    "embedding batch size mismatch"
                );
                build.failed_chunks += batch.len() as u64;
            }
            Err(e) => {
                tracing::warn!(error = %e, "embedding batch failed");
                build.failed_chunks += batch.len() as u64;
            }
        }
        embedded += batch.len() as u64;
        reporter.report(IndexProgressEvent::Embedding {
            n: embedded,
            total: total_chunks,
        });
    }

    Ok(build)
}

/// Writes `chunks` as a JSON array, creating parent directories.
pub async fn write_index(path: &Path, chunks: &[CodeChunk]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let json = serde_json::to_vec(chunks)?;
    tokio::fs::write(path, json)
        .await
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

/// CLI entry point for `planpath index build`.
pub async fn run_index_build(
    config: &Config,
    output: Option<&Path>,
    progress: ProgressMode,
) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    }

    let store = open_store(config)?;
    let provider = create_provider(&config.embedding)?;
    let reporter = progress.reporter();

    let build = build_index(store.as_ref(), provider.as_ref(), config, reporter.as_ref()).await?;

    let output = output
        .map(Path::to_path_buf)
        .unwrap_or_else(|| config.index.path.clone().into());
    write_index(&output, &build.chunks).await?;

    println!("index build");
    println!("  model: {}", provider.model_name());
    println!("  documents: {}", build.documents);
    println!("  failed documents: {}", build.failed_documents);
    println!("  chunks: {}", build.chunks.len());
    println!("  failed chunks: {}", build.failed_chunks);
    println!("  written to: {}", output.display());
    Ok(())
}
