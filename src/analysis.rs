//! Plan conflict analysis.
//!
//! A [`ConflictAnalyzer`] takes a plan image plus the assembled reference
//! context and returns the potential code conflicts it finds. The only real
//! backend is an OpenAI-compatible chat-completions endpoint with vision
//! input. [`check_plan`] ties context assembly and analysis together.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;

use crate::assemble::{AssembleError, ContextAssembler};
use crate::config::AnalysisConfig;
use crate::embedding::post_json_with_retry;
use crate::models::{Conflict, JurisdictionPath};

const SYSTEM_PROMPT: &str = "You are an expert building code compliance auditor. \
Compare the attached building plan against the reference code text. \
Report each potential violation as an object with fields \
\"id\", \"description\", \"severity\" (one of \"high\", \"medium\", \"low\") and \"codeReference\". \
Respond with a JSON object of the form {\"conflicts\": [...]}. \
If nothing is found, return {\"conflicts\": []}.";

/// Everything an analyzer needs for one plan.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub image_base64: String,
    /// MIME type of the image, e.g. `image/png`.
    pub media_type: String,
    pub context: String,
    pub building_type: String,
    /// Human-readable location, e.g. `"El Segundo, California"`.
    pub location: String,
}

#[async_trait]
pub trait ConflictAnalyzer: Send + Sync {
    fn name(&self) -> &str;
    async fn analyze(&self, request: &AnalysisRequest) -> Result<Vec<Conflict>>;
}

/// Fails every request. Used when `analysis.provider = "disabled"`.
pub struct DisabledAnalyzer;

#[async_trait]
impl ConflictAnalyzer for DisabledAnalyzer {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn analyze(&self, _request: &AnalysisRequest) -> Result<Vec<Conflict>> {
        bail!("Plan analysis is disabled. Set [analysis] provider = \"openai\" in config.")
    }
}

/// Vision analysis through an OpenAI-compatible `POST /chat/completions`.
///
/// Requires `OPENAI_API_KEY`. Retries 429 and 5xx responses with
/// exponential backoff (1s, 2s, 4s, ... capped at 32s).
pub struct OpenAiAnalyzer {
    model: String,
    base_url: String,
    api_key: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAiAnalyzer {
    pub fn new(config: &AnalysisConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(config: &AnalysisConfig, api_key: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            model: config.model.clone(),
            base_url: config.url.trim_end_matches('/').to_string(),
            api_key,
            max_retries: config.max_retries,
            client,
        })
    }

    fn request_body(&self, request: &AnalysisRequest) -> serde_json::Value {
        let user_text = format!(
            "Location: {}\nBuilding type: {}\n\nReference code text:\n{}",
            request.location, request.building_type, request.context
        );
        let data_uri = format!(
            "data:{};base64,{}",
            request.media_type, request.image_base64
        );
        serde_json::json!({
            "model": self.model,
            "temperature": 0.2,
            "response_format": {"type": "json_object"},
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": [
                    {"type": "text", "text": user_text},
                    {"type": "image_url", "image_url": {"url": data_uri}}
                ]}
            ]
        })
    }
}

#[async_trait]
impl ConflictAnalyzer for OpenAiAnalyzer {
    fn name(&self) -> &str {
        &self.model
    }

    async fn analyze(&self, request: &AnalysisRequest) -> Result<Vec<Conflict>> {
        let body = self.request_body(request);
        let url = format!("{}/chat/completions", self.base_url);
        let json = post_json_with_retry(
            &self.client,
            &url,
            Some(&self.api_key),
            &body,
            self.max_retries,
            "OpenAI",
        )
        .await?;
        parse_completion(&json)
    }
}

#[derive(Deserialize)]
struct ConflictList {
    #[serde(default)]
    conflicts: Vec<Conflict>,
}

/// Pulls the conflict list out of a chat-completions response.
///
/// Conflicts without an id get a generated one.
fn parse_completion(json: &serde_json::Value) -> Result<Vec<Conflict>> {
    let content = json
        .pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .ok_or_else(|| anyhow::anyhow!("Invalid completion response: missing message content"))?;

    let list: ConflictList =
        serde_json::from_str(content).context("analysis response is not a conflict list")?;

    Ok(list
        .conflicts
        .into_iter()
        .map(|mut c| {
            if c.id.trim().is_empty() {
                c.id = uuid::Uuid::new_v4().to_string();
            }
            c
        })
        .collect())
}

/// Builds the analyzer selected by `analysis.provider`.
pub fn create_analyzer(config: &AnalysisConfig) -> Result<Box<dyn ConflictAnalyzer>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledAnalyzer)),
        "openai" => Ok(Box::new(OpenAiAnalyzer::new(config)?)),
        other => bail!("Unknown analysis provider: {}", other),
    }
}

/// Why a plan check produced no result.
#[derive(Debug, thiserror::Error)]
pub enum CheckError {
    #[error("Could not load reference documents for this jurisdiction: {0}")]
    Context(#[from] AssembleError),
    #[error("Plan analysis failed: {0:#}")]
    Analysis(anyhow::Error),
}

/// `"City, County, State"` from whichever names are present.
pub fn location_label(jurisdiction: &JurisdictionPath) -> String {
    let mut names: Vec<&str> = jurisdiction
        .named_levels()
        .into_iter()
        .map(|(_, name)| name)
        .collect();
    names.reverse();
    names.join(", ")
}

/// Assembles context for `jurisdiction` and analyzes the plan image.
///
/// A context failure is reported as [`CheckError::Context`], never as an
/// empty conflict list.
pub async fn check_plan(
    assembler: &ContextAssembler,
    analyzer: &dyn ConflictAnalyzer,
    image_bytes: &[u8],
    media_type: &str,
    jurisdiction: &JurisdictionPath,
    building_type: &str,
    explicit_document_path: Option<&str>,
) -> Result<Vec<Conflict>, CheckError> {
    let context = assembler
        .assemble_context(jurisdiction, building_type, explicit_document_path)
        .await?;

    let request = AnalysisRequest {
        image_base64: base64::engine::general_purpose::STANDARD.encode(image_bytes),
        media_type: media_type.to_string(),
        context,
        building_type: building_type.to_string(),
        location: location_label(jurisdiction),
    };

    tracing::info!(
        analyzer = analyzer.name(),
        location = %request.location,
        context_chars = request.context.chars().count(),
        "analyzing plan"
    );
    let conflicts = analyzer
        .analyze(&request)
        .await
        .map_err(CheckError::Analysis)?;
    tracing::info!(conflicts = conflicts.len(), "plan analysis finished");
    Ok(conflicts)
}
