//! Semantic retrieval over a precomputed knowledge-base index.
//!
//! The index is a JSON array of [`CodeChunk`]s produced by `planpath index
//! build`. It is read from a local path or an `http(s)://` URL the first
//! time it is needed and then shared read-only behind an `Arc`.
//!
//! Both lazy resources (the chunk list and the embedding provider) sit in a
//! `tokio::sync::Mutex<Option<Arc<_>>>`. The lock serializes the first load,
//! so concurrent searches never build the embedder twice. A failed load is
//! not cached and is retried by the next call. [`SemanticIndex::reset`]
//! drops both.
//!
//! Ranking is split out as the pure function [`rank_chunks`].

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::Mutex;

use crate::config::{EmbeddingConfig, IndexConfig};
use crate::embedding::{
    cosine_similarity, create_provider, embed_query, l2_normalize, EmbeddingProvider,
};
use crate::models::{CodeChunk, JurisdictionFilter, ScoredChunk};

pub struct SemanticIndex {
    location: String,
    top_k: usize,
    embedding: EmbeddingConfig,
    preset_embedder: Option<Arc<dyn EmbeddingProvider>>,
    chunks: Mutex<Option<Arc<Vec<CodeChunk>>>>,
    embedder: Mutex<Option<Arc<dyn EmbeddingProvider>>>,
}

impl SemanticIndex {
    pub fn new(index: &IndexConfig, embedding: &EmbeddingConfig) -> Self {
        Self {
            location: index.path.clone(),
            top_k: index.top_k,
            embedding: embedding.clone(),
            preset_embedder: None,
            chunks: Mutex::new(None),
            embedder: Mutex::new(None),
        }
    }

    /// Uses `provider` for queries instead of building one from config.
    pub fn with_embedder(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.preset_embedder = Some(provider);
        self
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    /// Configured default for `top_k`.
    pub fn default_top_k(&self) -> usize {
        self.top_k
    }

    /// Returns the cached index, loading it on first use.
    ///
    /// A load failure is logged and yields an empty index. Nothing is cached
    /// in that case, so the next call tries again.
    pub async fn load_index(&self) -> Arc<Vec<CodeChunk>> {
        let mut slot = self.chunks.lock().await;
        if let Some(chunks) = slot.as_ref() {
            return chunks.clone();
        }

        match read_index(&self.location).await {
            Ok(chunks) => {
                tracing::info!(location = %self.location, chunks = chunks.len(), "knowledge base index loaded");
                let chunks = Arc::new(chunks);
                *slot = Some(chunks.clone());
                chunks
            }
            Err(e) => {
                tracing::warn!(location = %self.location, error = %format!("{:#}", e), "failed to load knowledge base index");
                Arc::new(Vec::new())
            }
        }
    }

    async fn embedder(&self) -> Result<Arc<dyn EmbeddingProvider>> {
        if let Some(provider) = &self.preset_embedder {
            return Ok(provider.clone());
        }

        let mut slot = self.embedder.lock().await;
        if let Some(provider) = slot.as_ref() {
            return Ok(provider.clone());
        }
        let provider: Arc<dyn EmbeddingProvider> = Arc::from(create_provider(&self.embedding)?);
        tracing::debug!(model = provider.model_name(), "embedding provider ready");
        *slot = Some(provider.clone());
        Ok(provider)
    }

    /// Top `top_k` chunks for `query`, optionally restricted to a
    /// jurisdiction. See [`rank_chunks`] for filtering and ordering.
    pub async fn search(
        &self,
        query: &str,
        top_k: usize,
        filter: Option<&JurisdictionFilter>,
    ) -> Result<Vec<ScoredChunk>> {
        let chunks = self.load_index().await;
        if chunks.is_empty() {
            return Ok(Vec::new());
        }

        let provider = self.embedder().await?;
        let mut query_vec = embed_query(provider.as_ref(), query)
            .await
            .context("failed to embed query")?;
        l2_normalize(&mut query_vec);

        let results = rank_chunks(&chunks, &query_vec, top_k, filter);
        tracing::debug!(query, results = results.len(), "semantic search");
        Ok(results)
    }

    /// Drops the cached index and embedder.
    pub async fn reset(&self) {
        *self.chunks.lock().await = None;
        *self.embedder.lock().await = None;
    }
}

async fn read_index(location: &str) -> Result<Vec<CodeChunk>> {
    let bytes = if location.starts_with("http://") || location.starts_with("https://") {
        let response = reqwest::get(location)
            .await
            .with_context(|| format!("failed to fetch {}", location))?
            .error_for_status()
            .with_context(|| format!("failed to fetch {}", location))?;
        response.bytes().await?.to_vec()
    } else {
        tokio::fs::read(location)
            .await
            .with_context(|| format!("failed to read {}", location))?
    };

    serde_json::from_slice(&bytes).with_context(|| format!("invalid index JSON in {}", location))
}

/// Lower-cased, non-empty jurisdiction names from a filter.
fn filter_terms(filter: &JurisdictionFilter) -> Vec<String> {
    [&filter.city, &filter.county, &filter.state]
        .into_iter()
        .flatten()
        .map(|name| name.trim().to_lowercase())
        .filter(|name| !name.is_empty())
        .collect()
}

/// Scores `chunks` against `query_vec` and returns the best `top_k`.
///
/// With a filter, only chunks whose `source` contains one of the filter's
/// names (case-insensitive substring) are ranked. If none do, every chunk
/// is ranked. Results are ordered by descending score; NaN scores sort last
/// and ties keep index order.
pub fn rank_chunks(
    chunks: &[CodeChunk],
    query_vec: &[f32],
    top_k: usize,
    filter: Option<&JurisdictionFilter>,
) -> Vec<ScoredChunk> {
    let terms = filter.map(filter_terms).unwrap_or_default();

    let mut candidates: Vec<&CodeChunk> = if terms.is_empty() {
        Vec::new()
    } else {
        chunks
            .iter()
            .filter(|chunk| {
                let source = chunk.source.to_lowercase();
                terms.iter().any(|term| source.contains(term.as_str()))
            })
            .collect()
    };
    if candidates.is_empty() {
        if !terms.is_empty() {
            tracing::debug!(?terms, "no chunks match jurisdiction, searching whole index");
        }
        candidates = chunks.iter().collect();
    }

    let mut scored: Vec<(f32, &CodeChunk)> = candidates
        .into_iter()
        .map(|chunk| (cosine_similarity(query_vec, &chunk.embedding), chunk))
        .collect();

    let rank_key = |score: f32| if score.is_nan() { f32::NEG_INFINITY } else { score };
    scored.sort_by(|a, b| rank_key(b.0).total_cmp(&rank_key(a.0)));

    scored
        .into_iter()
        .take(top_k)
        .map(|(score, chunk)| ScoredChunk {
            chunk: chunk.clone(),
            score,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn chunk(id: u64, source: &str, embedding: Vec<f32>) -> CodeChunk {
        CodeChunk {
            id,
            text: format!("chunk {}", id),
            source: source.to_string(),
            embedding,
        }
    }

    fn sample() -> Vec<CodeChunk> {
        vec![
            chunk(0, "State/California/title24.pdf", vec![1.0, 0.0]),
            chunk(1, "City/El Segundo/ch1.pdf", vec![0.8, 0.6]),
            chunk(2, "State/New York/bc.pdf", vec![0.0, 1.0]),
            chunk(3, "County/Yorkshire/notes.txt", vec![0.6, 0.8]),
        ]
    }

    /// Maps every query to a fixed vector and counts calls.
    struct FixedEmbedder {
        vector: Vec<f32>,
        calls: AtomicUsize,
    }

    impl FixedEmbedder {
        fn new(vector: Vec<f32>) -> Arc<Self> {
            Arc::new(Self {
                vector,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl EmbeddingProvider for FixedEmbedder {
        fn model_name(&self) -> &str {
            "fixed"
        }
        fn dims(&self) -> usize {
            self.vector.len()
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(texts.iter().map(|_| self.vector.clone()).collect())
        }
    }

    fn index_at(path: &std::path::Path, embedder: Arc<FixedEmbedder>) -> SemanticIndex {
        let cfg = IndexConfig {
            path: path.to_string_lossy().to_string(),
            top_k: 5,
        };
        SemanticIndex::new(&cfg, &EmbeddingConfig::default()).with_embedder(embedder)
    }

    #[test]
    fn ranks_by_descending_similarity() {
        let results = rank_chunks(&sample(), &[1.0, 0.0], 2, None);
        let ids: Vec<u64> = results.iter().map(|r| r.chunk.id).collect();
        assert_eq!(ids, vec![0, 1]);
        assert!((results[0].score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn filter_restricts_candidates() {
        let filter = JurisdictionFilter {
            state: Some("California".into()),
            county: Some("".into()),
            city: Some("El Segundo".into()),
        };
        let results = rank_chunks(&sample(), &[0.0, 1.0], 10, Some(&filter));
        let ids: Vec<u64> = results.iter().map(|r| r.chunk.id).collect();
        assert_eq!(ids, vec![1, 0]);
    }

    #[test]
    fn filter_substring_is_loose() {
        let filter = JurisdictionFilter {
            city: Some("york".into()),
            ..Default::default()
        };
        let results = rank_chunks(&sample(), &[1.0, 0.0], 10, Some(&filter));
        let ids: Vec<u64> = results.iter().map(|r| r.chunk.id).collect();
        assert_eq!(ids, vec![3, 2]);
    }

    #[test]
    fn unmatched_filter_ranks_like_no_filter() {
        let filter = JurisdictionFilter {
            state: Some("Alaska".into()),
            ..Default::default()
        };
        let with = rank_chunks(&sample(), &[0.6, 0.8], 3, Some(&filter));
        let without = rank_chunks(&sample(), &[0.6, 0.8], 3, None);
        let ids = |r: &[ScoredChunk]| r.iter().map(|c| c.chunk.id).collect::<Vec<_>>();
        assert_eq!(ids(&with), ids(&without));
    }

    #[test]
    fn nan_scores_sort_last_and_ties_keep_order() {
        let chunks = vec![
            chunk(0, "a", vec![0.0, 0.0]),
            chunk(1, "b", vec![1.0, 0.0]),
            chunk(2, "c", vec![2.0, 0.0]),
        ];
        let results = rank_chunks(&chunks, &[1.0, 0.0], 3, None);
        let ids: Vec<u64> = results.iter().map(|r| r.chunk.id).collect();
        assert_eq!(ids, vec![1, 2, 0]);
        assert!(results[2].score.is_nan());
    }

    #[tokio::test]
    async fn search_loads_file_and_normalizes_query() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("kb.json");
        std::fs::write(&path, serde_json::to_vec(&sample()).unwrap()).unwrap();

        let embedder = FixedEmbedder::new(vec![10.0, 0.0]);
        let index = index_at(&path, embedder.clone());
        let results = index.search("egress width", 1, None).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.id, 0);
        assert!((results[0].score - 1.0).abs() < 1e-6);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_index_skips_embedder() {
        let tmp = tempfile::TempDir::new().unwrap();
        let embedder = FixedEmbedder::new(vec![1.0]);
        let index = index_at(&tmp.path().join("missing.json"), embedder.clone());
        assert!(index.search("anything", 5, None).await.unwrap().is_empty());
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failed_load_is_retried() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("kb.json");
        let index = index_at(&path, FixedEmbedder::new(vec![1.0, 0.0]));

        assert!(index.load_index().await.is_empty());
        std::fs::write(&path, serde_json::to_vec(&sample()).unwrap()).unwrap();
        assert_eq!(index.load_index().await.len(), 4);
    }

    #[tokio::test]
    async fn index_is_cached_until_reset() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("kb.json");
        std::fs::write(&path, serde_json::to_vec(&sample()).unwrap()).unwrap();
        let index = index_at(&path, FixedEmbedder::new(vec![1.0, 0.0]));

        assert_eq!(index.load_index().await.len(), 4);
        std::fs::write(&path, b"[]").unwrap();
        assert_eq!(index.load_index().await.len(), 4);
        index.reset().await;
        assert!(index.load_index().await.is_empty());
    }
}
