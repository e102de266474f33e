//! # PlanPath
//!
//! Jurisdiction-aware building code retrieval and context assembly for
//! automated plan review.
//!
//! Given where a project is (state, county, city) and what it is (a
//! building type), PlanPath pulls the applicable regulatory documents out
//! of a hierarchical knowledge base, keeps the pages that look relevant,
//! and packs them into a budgeted block of reference text for an analysis
//! model. A precomputed embedding index offers semantic search over the
//! same material.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────┐   ┌─────────────┐   ┌───────────┐
//! │    Store    │──▶│   Extract   │──▶│  Relevance  │──▶│ Assemble  │──▶ analysis
//! │ FS/S3/Mem   │   │ PDF/DOCX/TXT│   │  keywords   │   │  budgets  │
//! └──────┬──────┘   └─────────────┘   └─────────────┘   └───────────┘
//!        │  index build (chunk + embed)
//!        ▼
//!  knowledge_base.json ──▶ SemanticIndex ──▶ search
//! ```
//!
//! ## Knowledge base layout
//!
//! ```text
//! knowledge-base/State/<state>/...
//! knowledge-base/County/<county>/...
//! knowledge-base/City/<city>/...
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`store`] | Read-only document store backends |
//! | [`extract`] | Page-segmented text extraction |
//! | [`relevance`] | Keyword relevance filtering |
//! | [`assemble`] | Jurisdiction context assembly and document listing |
//! | [`chunk`] | Text chunking for the index |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`index`] | Semantic retrieval over the index file |
//! | [`index_cmd`] | Index build |
//! | [`progress`] | Index build progress reporting |
//! | [`analysis`] | Plan conflict analysis |
//! | [`server`] | HTTP API |
//! | [`commands`] | CLI command implementations |

pub mod analysis;
pub mod assemble;
pub mod chunk;
pub mod commands;
pub mod config;
pub mod embedding;
pub mod extract;
pub mod index;
pub mod index_cmd;
pub mod models;
pub mod progress;
pub mod relevance;
pub mod server;
pub mod store;
