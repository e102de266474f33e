//! TOML configuration parsing and validation.
//!
//! Every section except `[store]` is optional and falls back to the defaults
//! below. See `config/planpath.example.toml` for a complete file.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub store: StoreConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub relevance: RelevanceConfig,
    #[serde(default)]
    pub budget: BudgetConfig,
    #[serde(default)]
    pub assembly: AssemblyConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    /// `"filesystem"` or `"s3"`.
    #[serde(default = "default_store_kind")]
    pub kind: String,
    /// Local directory that holds the knowledge base (filesystem store).
    #[serde(default = "default_store_root")]
    pub root: PathBuf,
    /// Prefix under which the `State/`, `County/`, `City/` folders live.
    #[serde(default = "default_prefix")]
    pub prefix: String,
    /// Entries matching these globs are hidden from listings.
    #[serde(default = "default_exclude_globs")]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub s3: Option<S3StoreConfig>,
}

fn default_store_kind() -> String {
    "filesystem".to_string()
}
fn default_store_root() -> PathBuf {
    PathBuf::from(".")
}
fn default_prefix() -> String {
    "knowledge-base".to_string()
}
fn default_exclude_globs() -> Vec<String> {
    vec!["**/.*".to_string(), ".*".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct S3StoreConfig {
    pub bucket: String,
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint for S3-compatible services (MinIO, LocalStack).
    #[serde(default)]
    pub endpoint_url: Option<String>,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExtractionConfig {
    #[serde(default = "default_max_pdf_pages")]
    pub max_pdf_pages: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            max_pdf_pages: default_max_pdf_pages(),
        }
    }
}

fn default_max_pdf_pages() -> usize {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct RelevanceConfig {
    /// Pages returned verbatim when no page matches any keyword.
    #[serde(default = "default_fallback_pages")]
    pub fallback_pages: usize,
}

impl Default for RelevanceConfig {
    fn default() -> Self {
        Self {
            fallback_pages: default_fallback_pages(),
        }
    }
}

fn default_fallback_pages() -> usize {
    3
}

/// Character budgets for the context assembler.
#[derive(Debug, Deserialize, Clone)]
pub struct BudgetConfig {
    #[serde(default = "default_file_chars")]
    pub file_chars: usize,
    #[serde(default = "default_folder_chars")]
    pub folder_chars: usize,
    #[serde(default = "default_explicit_document_chars")]
    pub explicit_document_chars: usize,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            file_chars: default_file_chars(),
            folder_chars: default_folder_chars(),
            explicit_document_chars: default_explicit_document_chars(),
        }
    }
}

fn default_file_chars() -> usize {
    15_000
}
fn default_folder_chars() -> usize {
    30_000
}
fn default_explicit_document_chars() -> usize {
    60_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct AssemblyConfig {
    /// Documents fetched and extracted concurrently within one folder.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for AssemblyConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
        }
    }
}

fn default_concurrency() -> usize {
    4
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// Local path or `http(s)://` URL of the knowledge base index JSON.
    #[serde(default = "default_index_path")]
    pub path: String,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            path: default_index_path(),
            top_k: default_top_k(),
        }
    }
}

fn default_index_path() -> String {
    "./public/knowledge_base.json".to_string()
}
fn default_top_k() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_chars")]
    pub chunk_chars: usize,
    #[serde(default = "default_overlap_chars")]
    pub overlap_chars: usize,
    /// Page cap used when extracting documents for the index build.
    #[serde(default = "default_index_max_pages")]
    pub max_pages: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_chars: default_chunk_chars(),
            overlap_chars: default_overlap_chars(),
            max_pages: default_index_max_pages(),
        }
    }
}

fn default_chunk_chars() -> usize {
    1000
}
fn default_overlap_chars() -> usize {
    100
}
fn default_index_max_pages() -> usize {
    500
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "local".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AnalysisConfig {
    /// `"disabled"` or `"openai"`.
    #[serde(default = "default_analysis_provider")]
    pub provider: String,
    #[serde(default = "default_analysis_model")]
    pub model: String,
    /// Base URL of an OpenAI-compatible API.
    #[serde(default = "default_analysis_url")]
    pub url: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_analysis_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            provider: default_analysis_provider(),
            model: default_analysis_model(),
            url: default_analysis_url(),
            max_retries: default_max_retries(),
            timeout_secs: default_analysis_timeout_secs(),
        }
    }
}

fn default_analysis_provider() -> String {
    "disabled".to_string()
}
fn default_analysis_model() -> String {
    "gpt-4o".to_string()
}
fn default_analysis_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_analysis_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7341".to_string()
}
fn default_request_timeout_secs() -> u64 {
    120
}

impl Config {
    /// Configuration used when no config file exists: a filesystem store
    /// rooted at the current directory and every other section defaulted.
    pub fn minimal() -> Self {
        Self {
            store: StoreConfig {
                kind: default_store_kind(),
                root: default_store_root(),
                prefix: default_prefix(),
                exclude_globs: default_exclude_globs(),
                s3: None,
            },
            extraction: ExtractionConfig::default(),
            relevance: RelevanceConfig::default(),
            budget: BudgetConfig::default(),
            assembly: AssemblyConfig::default(),
            index: IndexConfig::default(),
            chunking: ChunkingConfig::default(),
            embedding: EmbeddingConfig::default(),
            analysis: AnalysisConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    match config.store.kind.as_str() {
        "filesystem" => {}
        "s3" => {
            if config.store.s3.is_none() {
                anyhow::bail!("store.s3 must be configured when store.kind is 's3'");
            }
        }
        other => anyhow::bail!(
            "Unknown store kind: '{}'. Must be filesystem or s3.",
            other
        ),
    }

    if config.extraction.max_pdf_pages == 0 {
        anyhow::bail!("extraction.max_pdf_pages must be > 0");
    }

    let budget = &config.budget;
    if budget.file_chars == 0 || budget.folder_chars == 0 || budget.explicit_document_chars == 0 {
        anyhow::bail!("budget values must be > 0");
    }

    if config.assembly.concurrency == 0 {
        anyhow::bail!("assembly.concurrency must be >= 1");
    }

    if config.index.top_k == 0 {
        anyhow::bail!("index.top_k must be >= 1");
    }

    if config.chunking.chunk_chars == 0 {
        anyhow::bail!("chunking.chunk_chars must be > 0");
    }
    if config.chunking.overlap_chars >= config.chunking.chunk_chars {
        anyhow::bail!("chunking.overlap_chars must be smaller than chunking.chunk_chars");
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "local" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }
    if matches!(config.embedding.provider.as_str(), "openai" | "ollama") {
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
    }
    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }

    match config.analysis.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown analysis provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    Ok(())
}
