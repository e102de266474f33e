//! CLI command implementations.
//!
//! Each `run_*` function backs one `planpath` subcommand. Results go to
//! stdout (JSON for structured data, plain text for assembled context);
//! logs go to stderr.

use std::path::Path;

use anyhow::{Context, Result};

use crate::analysis::{check_plan, create_analyzer};
use crate::assemble::ContextAssembler;
use crate::config::Config;
use crate::index::SemanticIndex;
use crate::models::{JurisdictionFilter, JurisdictionPath};
use crate::store::open_store;

fn assembler(config: &Config) -> Result<ContextAssembler> {
    Ok(ContextAssembler::new(open_store(config)?, config))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// `planpath jurisdictions`
pub async fn run_jurisdictions(config: &Config) -> Result<()> {
    let options = assembler(config)?.list_jurisdiction_options().await;
    print_json(&options)
}

/// `planpath documents`
pub async fn run_documents(config: &Config, jurisdiction: &JurisdictionPath) -> Result<()> {
    let documents = assembler(config)?.list_documents(jurisdiction).await;
    if documents.is_empty() {
        tracing::info!("no documents filed under this jurisdiction");
    }
    print_json(&documents)
}

/// `planpath context`
pub async fn run_context(
    config: &Config,
    jurisdiction: &JurisdictionPath,
    building_type: &str,
    document: Option<&str>,
) -> Result<()> {
    let context = assembler(config)?
        .assemble_context(jurisdiction, building_type, document)
        .await?;
    println!("{}", context);
    Ok(())
}

/// `planpath search`
pub async fn run_search(
    config: &Config,
    query: &str,
    top_k: Option<usize>,
    filter: Option<&JurisdictionFilter>,
) -> Result<()> {
    if query.trim().is_empty() {
        anyhow::bail!("query must not be empty");
    }
    let index = SemanticIndex::new(&config.index, &config.embedding);
    let top_k = top_k.unwrap_or(config.index.top_k);
    let results = index.search(query, top_k, filter).await?;

    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }
    for (rank, result) in results.iter().enumerate() {
        println!(
            "{}. [{:.3}] {} (chunk {})",
            rank + 1,
            result.score,
            result.chunk.source,
            result.chunk.id
        );
        let preview: String = result.chunk.text.chars().take(200).collect();
        println!("    {}", preview.replace('\n', " "));
    }
    Ok(())
}

/// `planpath analyze`
pub async fn run_analyze(
    config: &Config,
    image: &Path,
    jurisdiction: &JurisdictionPath,
    building_type: &str,
    document: Option<&str>,
) -> Result<()> {
    let bytes = tokio::fs::read(image)
        .await
        .with_context(|| format!("failed to read {}", image.display()))?;
    let media_type = media_type_for(image);

    let assembler = assembler(config)?;
    let analyzer = create_analyzer(&config.analysis)?;
    let conflicts = check_plan(
        &assembler,
        analyzer.as_ref(),
        &bytes,
        media_type,
        jurisdiction,
        building_type,
        document,
    )
    .await?;
    print_json(&conflicts)
}

/// MIME type for a plan image, from its extension.
pub fn media_type_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        _ => "image/png",
    }
}
