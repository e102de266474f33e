//! HTTP API tests. Each test binds the router to an ephemeral port and talks
//! to it with `reqwest`.

use std::sync::Arc;
use std::time::Duration;

use planpath::analysis::DisabledAnalyzer;
use planpath::assemble::{ContextAssembler, NO_DOCUMENTS_MARKER};
use planpath::config::{Config, IndexConfig};
use planpath::index::SemanticIndex;
use planpath::server::{router, AppState};
use planpath::store::MemoryStore;

async fn spawn(store: MemoryStore, index_path: &str) -> String {
    let config = Config::minimal();
    let index_cfg = IndexConfig {
        path: index_path.to_string(),
        top_k: 5,
    };
    let state = AppState {
        assembler: Arc::new(ContextAssembler::new(Arc::new(store), &config)),
        index: Arc::new(SemanticIndex::new(&index_cfg, &config.embedding)),
        analyzer: Arc::new(DisabledAnalyzer),
        request_timeout: Duration::from_secs(10),
    };

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router(state)).await.unwrap();
    });
    format!("http://{}", addr)
}

fn texas_store() -> MemoryStore {
    MemoryStore::new()
        .with_file("knowledge-base/State/Texas/a.pdf", "not really a pdf")
        .with_file("knowledge-base/State/Texas/b.txt", "stair width 36 in")
        .with_file("knowledge-base/City/Austin/c.txt", "zoning")
}

#[tokio::test]
async fn health_reports_version() {
    let base = spawn(MemoryStore::new(), "/nonexistent/kb.json").await;
    let body: serde_json::Value = reqwest::get(format!("{}/health", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn jurisdictions_and_documents() {
    let base = spawn(texas_store(), "/nonexistent/kb.json").await;
    let client = reqwest::Client::new();

    let opts: serde_json::Value = client
        .get(format!("{}/jurisdictions", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(opts["states"], serde_json::json!(["Texas"]));
    assert_eq!(opts["cities"], serde_json::json!(["Austin"]));

    let docs: serde_json::Value = client
        .post(format!("{}/documents", base))
        .json(&serde_json::json!({"state": "Texas", "county": "", "city": ""}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let docs = docs["documents"].as_array().unwrap();
    assert_eq!(docs.len(), 2);
    assert!(docs.iter().all(|d| d["type"] == "State"));
}

#[tokio::test]
async fn context_endpoint_assembles_and_falls_back_to_marker() {
    let base = spawn(texas_store(), "/nonexistent/kb.json").await;
    let client = reqwest::Client::new();

    let body: serde_json::Value = client
        .post(format!("{}/context", base))
        .json(&serde_json::json!({
            "jurisdiction": {"state": "Texas"},
            "buildingType": "residential"
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let ctx = body["context"].as_str().unwrap();
    assert!(ctx.contains("--- State: b.txt ---"));
    assert!(ctx.contains("stair width 36 in"));

    let body: serde_json::Value = client
        .post(format!("{}/context", base))
        .json(&serde_json::json!({
            "jurisdiction": {"state": "Vermont"},
            "buildingType": "residential"
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["context"], NO_DOCUMENTS_MARKER);
}

#[tokio::test]
async fn search_validates_query_and_handles_missing_index() {
    let base = spawn(MemoryStore::new(), "/nonexistent/kb.json").await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/search", base))
        .json(&serde_json::json!({"query": "  "}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let err: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(err["error"]["code"], "bad_request");

    let resp = client
        .post(format!("{}/search", base))
        .json(&serde_json::json!({"query": "egress window", "jurisdiction": {"city": "El Segundo"}}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["results"], serde_json::json!([]));
}

#[tokio::test]
async fn analyze_rejects_bad_image_and_reports_disabled_analyzer() {
    let base = spawn(texas_store(), "/nonexistent/kb.json").await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/analyze", base))
        .json(&serde_json::json!({
            "imageBase64": "%%%",
            "jurisdiction": {"state": "Texas"},
            "buildingType": "residential"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let resp = client
        .post(format!("{}/analyze", base))
        .json(&serde_json::json!({
            "imageBase64": "cG5n",
            "jurisdiction": {"state": "Texas"},
            "buildingType": "residential"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 502);
    let err: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(err["error"]["code"], "analysis_failed");
}
