//! Core data models used throughout PlanPath.
//!
//! These types represent the jurisdictions, stored documents, extracted pages,
//! semantic index chunks, and analysis results that flow through the
//! retrieval and context-assembly pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A (state, county, city) triple naming the regulatory bodies whose
/// documents apply to a plan.
///
/// The three levels are independent lookups. Nothing checks that a city
/// belongs to the given county or state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JurisdictionPath {
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub county: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
}

impl JurisdictionPath {
    pub fn new(state: Option<&str>, county: Option<&str>, city: Option<&str>) -> Self {
        Self {
            state: state.map(str::to_string),
            county: county.map(str::to_string),
            city: city.map(str::to_string),
        }
    }

    /// Returns the trimmed name for a level, treating empty names as absent.
    pub fn name_for(&self, level: JurisdictionLevel) -> Option<&str> {
        let raw = match level {
            JurisdictionLevel::State => self.state.as_deref(),
            JurisdictionLevel::County => self.county.as_deref(),
            JurisdictionLevel::City => self.city.as_deref(),
        };
        raw.map(str::trim).filter(|s| !s.is_empty())
    }

    /// Levels that carry a name, in State, County, City order.
    pub fn named_levels(&self) -> Vec<(JurisdictionLevel, &str)> {
        JurisdictionLevel::ALL
            .iter()
            .filter_map(|level| self.name_for(*level).map(|name| (*level, name)))
            .collect()
    }
}

/// One level of the jurisdiction hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum JurisdictionLevel {
    State,
    County,
    City,
}

impl JurisdictionLevel {
    /// All levels in concatenation order.
    pub const ALL: [JurisdictionLevel; 3] = [
        JurisdictionLevel::State,
        JurisdictionLevel::County,
        JurisdictionLevel::City,
    ];

    /// Folder name used under the knowledge-base prefix.
    pub fn folder_name(&self) -> &'static str {
        match self {
            JurisdictionLevel::State => "State",
            JurisdictionLevel::County => "County",
            JurisdictionLevel::City => "City",
        }
    }
}

impl fmt::Display for JurisdictionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.folder_name())
    }
}

/// How the bytes of a stored document should be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Pdf,
    Text,
    Docx,
}

impl MediaKind {
    /// Infers the media kind from a file name suffix (case-insensitive).
    ///
    /// Anything that is not `.pdf` or `.docx` is treated as text.
    pub fn from_name(name: &str) -> Self {
        let lower = name.to_lowercase();
        if lower.ends_with(".pdf") {
            MediaKind::Pdf
        } else if lower.ends_with(".docx") {
            MediaKind::Docx
        } else {
            MediaKind::Text
        }
    }
}

/// A reference to a document in the store. Identity is `path`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRef {
    pub name: String,
    pub path: String,
    pub media_kind: MediaKind,
}

impl DocumentRef {
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        let name = name.into();
        let media_kind = MediaKind::from_name(&name);
        Self {
            name,
            path: path.into(),
            media_kind,
        }
    }
}

/// A document found under one of the jurisdiction folders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListedDocument {
    #[serde(rename = "type")]
    pub level: JurisdictionLevel,
    #[serde(flatten)]
    pub document: DocumentRef,
}

/// One page of extracted text. `index` is 1-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub index: usize,
    pub text: String,
}

/// Result of text extraction.
#[derive(Debug, Clone, Default)]
pub struct ExtractedDocument {
    /// Scanned pages, in order. Never more than the configured page cap.
    pub pages: Vec<Page>,
    /// Scanned page texts joined with blank lines.
    pub full_text: String,
    /// Page count of the source document before the scan cap.
    pub total_pages: usize,
}

impl ExtractedDocument {
    pub fn from_pages(pages: Vec<Page>, total_pages: usize) -> Self {
        let full_text = pages
            .iter()
            .map(|p| p.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        Self {
            pages,
            full_text,
            total_pages,
        }
    }
}

/// A precomputed unit of reference text with its embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeChunk {
    pub id: u64,
    pub text: String,
    pub source: String,
    pub embedding: Vec<f32>,
}

/// A [`CodeChunk`] scored against a query vector.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredChunk {
    #[serde(flatten)]
    pub chunk: CodeChunk,
    pub score: f32,
}

/// Jurisdiction names used to pre-filter semantic search candidates.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JurisdictionFilter {
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub county: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
}

impl From<&JurisdictionPath> for JurisdictionFilter {
    fn from(path: &JurisdictionPath) -> Self {
        Self {
            state: path.state.clone(),
            county: path.county.clone(),
            city: path.city.clone(),
        }
    }
}

/// Jurisdiction names available in the knowledge base.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JurisdictionOptions {
    pub states: Vec<String>,
    pub counties: Vec<String>,
    pub cities: Vec<String>,
}

/// How serious a reported conflict is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    High,
    Medium,
    Low,
}

/// A potential building-code conflict reported by the analysis call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    #[serde(default)]
    pub id: String,
    pub description: String,
    pub severity: Severity,
    #[serde(default)]
    pub code_reference: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_kind_from_suffix() {
        assert_eq!(MediaKind::from_name("Title24.PDF"), MediaKind::Pdf);
        assert_eq!(MediaKind::from_name("zoning.docx"), MediaKind::Docx);
        assert_eq!(MediaKind::from_name("notes.txt"), MediaKind::Text);
        assert_eq!(MediaKind::from_name("README"), MediaKind::Text);
    }

    #[test]
    fn empty_names_count_as_absent() {
        let j = JurisdictionPath::new(Some("California"), Some("  "), Some("El Segundo"));
        let levels: Vec<_> = j.named_levels().into_iter().map(|(l, _)| l).collect();
        assert_eq!(levels, vec![JurisdictionLevel::State, JurisdictionLevel::City]);
        assert_eq!(j.name_for(JurisdictionLevel::County), None);
    }

    #[test]
    fn listed_document_serializes_level_as_type() {
        let doc = ListedDocument {
            level: JurisdictionLevel::State,
            document: DocumentRef::new("a.pdf", "knowledge-base/State/Texas/a.pdf"),
        };
        let json = serde_json::to_value(&doc).unwrap();
        assert_eq!(json["type"], "State");
        assert_eq!(json["media_kind"], "pdf");
        assert_eq!(json["path"], "knowledge-base/State/Texas/a.pdf");
    }

    #[test]
    fn conflict_uses_camel_case_reference() {
        let c: Conflict = serde_json::from_str(
            r#"{"id":"c1","description":"Stair too narrow","severity":"high","codeReference":"IBC 1011.2"}"#,
        )
        .unwrap();
        assert_eq!(c.severity, Severity::High);
        assert_eq!(c.code_reference, "IBC 1011.2");
    }
}
