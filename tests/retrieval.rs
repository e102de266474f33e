//! End-to-end retrieval tests against an on-disk knowledge base.
//!
//! PDFs are synthesized with `lopdf` and DOCX files with `zip`, then laid
//! out under `knowledge-base/{State,County,City}/<name>/` in a temp dir.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};
use tempfile::TempDir;

use planpath::assemble::{ContextAssembler, NO_DOCUMENTS_MARKER};
use planpath::config::Config;
use planpath::extract::extract_text;
use planpath::models::{JurisdictionLevel, JurisdictionPath, MediaKind};
use planpath::store::FilesystemStore;

/// A PDF with one page per entry in `pages`.
fn pdf_with_pages(pages: &[&str]) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            "F1" => font_id,
        },
    });

    let mut kids: Vec<Object> = Vec::new();
    for text in pages {
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 12.into()]),
                Operation::new("Td", vec![72.into(), 700.into()]),
                Operation::new("Tj", vec![Object::string_literal(*text)]),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => resources_id,
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    let pages_dict = dictionary! {
        "Type" => "Pages",
        "Kids" => kids,
        "Count" => count,
        "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
    };
    doc.objects.insert(pages_id, Object::Dictionary(pages_dict));
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut buf = Vec::new();
    doc.save_to(&mut buf).unwrap();
    buf
}

fn docx_with_paragraphs(paragraphs: &[&str]) -> Vec<u8> {
    use std::io::Write;
    let body: String = paragraphs
        .iter()
        .map(|p| format!("<w:p><w:r><w:t>{}</w:t></w:r></w:p>", p))
        .collect();
    let xml = format!(
        "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body>{}</w:body></w:document>",
        body
    );

    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
        zip.start_file("word/document.xml", zip::write::SimpleFileOptions::default())
            .unwrap();
        zip.write_all(xml.as_bytes()).unwrap();
        zip.finish().unwrap();
    }
    buf
}

fn put(root: &Path, rel: &str, bytes: &[u8]) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, bytes).unwrap();
}

fn assembler_for(root: &Path, config: &Config) -> ContextAssembler {
    let store = FilesystemStore::new(root.to_path_buf(), &config.store.exclude_globs).unwrap();
    ContextAssembler::new(Arc::new(store), config)
}

#[tokio::test]
async fn california_el_segundo_residential() {
    let tmp = TempDir::new().unwrap();
    put(
        tmp.path(),
        "knowledge-base/State/California/title24.pdf",
        &pdf_with_pages(&["egress window requirement section R310"]),
    );
    put(
        tmp.path(),
        "knowledge-base/City/El Segundo/forms.txt",
        b"parking permit form",
    );

    let asm = assembler_for(tmp.path(), &Config::minimal());
    let j = JurisdictionPath::new(Some("California"), Some(""), Some("El Segundo"));
    let ctx = asm.assemble_context(&j, "residential", None).await.unwrap();

    let state = ctx.find("--- State: title24.pdf ---").expect("state block");
    let city = ctx.find("--- City: forms.txt ---").expect("city block");
    assert!(state < city);
    assert!(ctx.contains("[Page 1]"));
    assert!(ctx.contains("R310"));
    assert!(ctx.contains("\nparking permit form\n"));
    assert!(!ctx.contains("County"));
}

#[tokio::test]
async fn texas_documents_are_tagged_state() {
    let tmp = TempDir::new().unwrap();
    put(tmp.path(), "knowledge-base/State/Texas/energy.pdf", &pdf_with_pages(&["energy code"]));
    put(tmp.path(), "knowledge-base/State/Texas/fire.txt", b"fire code");
    put(tmp.path(), "knowledge-base/State/Texas/.DS_Store", b"junk");

    let asm = assembler_for(tmp.path(), &Config::minimal());
    let j = JurisdictionPath::new(Some("Texas"), Some(""), Some(""));
    let docs = asm.list_documents(&j).await;

    let names: Vec<_> = docs.iter().map(|d| d.document.name.as_str()).collect();
    assert_eq!(names, vec!["energy.pdf", "fire.txt"]);
    assert!(docs.iter().all(|d| d.level == JurisdictionLevel::State));

    let json = serde_json::to_value(&docs).unwrap();
    assert_eq!(json[0]["type"], "State");
    assert_eq!(json[0]["media_kind"], "pdf");
}

#[tokio::test]
async fn empty_knowledge_base_returns_marker() {
    let tmp = TempDir::new().unwrap();
    fs::create_dir_all(tmp.path().join("knowledge-base")).unwrap();
    let asm = assembler_for(tmp.path(), &Config::minimal());
    let j = JurisdictionPath::new(Some("Nevada"), Some("Clark"), Some("Henderson"));
    let ctx = asm.assemble_context(&j, "warehouse", None).await.unwrap();
    assert_eq!(ctx, NO_DOCUMENTS_MARKER);
}

#[tokio::test]
async fn only_relevant_pdf_pages_are_kept() {
    let tmp = TempDir::new().unwrap();
    put(
        tmp.path(),
        "knowledge-base/County/Travis/amendments.pdf",
        &pdf_with_pages(&[
            "Table of contents",
            "Adopted by the commissioners court",
            "Automatic sprinkler systems shall be installed",
        ]),
    );

    let asm = assembler_for(tmp.path(), &Config::minimal());
    let j = JurisdictionPath::new(None, Some("Travis"), None);
    let ctx = asm.assemble_context(&j, "assembly hall", None).await.unwrap();

    assert!(ctx.contains("[Page 3]"));
    assert!(ctx.contains("sprinkler"));
    assert!(!ctx.contains("Table of contents"));
    assert!(!ctx.contains("[Page 1]"));
}

#[tokio::test]
async fn docx_documents_are_extracted() {
    let tmp = TempDir::new().unwrap();
    put(
        tmp.path(),
        "knowledge-base/City/Austin/setbacks.docx",
        &docx_with_paragraphs(&["Front setback: 25 ft", "Side setback: 5 ft"]),
    );

    let asm = assembler_for(tmp.path(), &Config::minimal());
    let j = JurisdictionPath::new(None, None, Some("Austin"));
    let ctx = asm.assemble_context(&j, "residential", None).await.unwrap();
    assert!(ctx.contains("--- City: setbacks.docx ---"));
    assert!(ctx.contains("Front setback: 25 ft\nSide setback: 5 ft"));
}

#[tokio::test]
async fn explicit_pdf_reference_document() {
    let tmp = TempDir::new().unwrap();
    put(
        tmp.path(),
        "uploads/owner-spec.pdf",
        &pdf_with_pages(&["Guardrail height 42 inches"]),
    );

    let asm = assembler_for(tmp.path(), &Config::minimal());
    let ctx = asm
        .assemble_context(&JurisdictionPath::default(), "residential", Some("uploads/owner-spec.pdf"))
        .await
        .unwrap();
    assert!(ctx.starts_with("--- Reference document: owner-spec.pdf ---\n[Page 1]\n"));
    assert!(ctx.contains("Guardrail"));
}

#[test]
fn pdf_scan_stops_at_page_cap() {
    let bytes = pdf_with_pages(&["one", "two", "three", "four", "five"]);
    let doc = extract_text(&bytes, MediaKind::Pdf, 2);
    assert_eq!(doc.pages.len(), 2);
    assert_eq!(doc.total_pages, 5);
    assert_eq!(doc.pages[1].index, 2);
    assert!(doc.pages[0].text.contains("one"));
    assert!(!doc.full_text.contains("three"));
}

#[tokio::test]
async fn missing_store_root_is_reported() {
    let tmp = TempDir::new().unwrap();
    let asm = assembler_for(&tmp.path().join("not-mounted"), &Config::minimal());
    let j = JurisdictionPath::new(Some("Oregon"), None, None);
    assert!(asm.assemble_context(&j, "residential", None).await.is_err());
    assert!(asm.list_jurisdiction_options().await.states.is_empty());
}
