//! Page-segmented text extraction for stored documents.
//!
//! PDFs are scanned page by page through `lopdf`, up to a page cap, so large
//! code books cost a bounded amount of work. When the page tree cannot be
//! read, `pdf-extract` gets a second try on the whole document. DOCX files
//! are read from `word/document.xml`. Everything else is decoded as UTF-8.
//!
//! [`extract_text`] never fails: a document that cannot be parsed comes back
//! as a single sentinel page so the assembler can carry on with its siblings.

use std::io::Read;

use crate::models::{ExtractedDocument, MediaKind, Page};
use crate::relevance::{filter_relevant, KeywordSet};

/// Maximum decompressed bytes read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("DOCX extraction failed: {0}")]
    Docx(String),
}

/// Text used in place of a document that could not be parsed.
pub fn sentinel_text(err: &ExtractError) -> String {
    format!("[Text extraction failed: {}]", err)
}

/// Extracts pages from `bytes`, substituting a sentinel page on failure.
pub fn extract_text(bytes: &[u8], kind: MediaKind, max_pages: usize) -> ExtractedDocument {
    match try_extract_text(bytes, kind, max_pages) {
        Ok(doc) => doc,
        Err(e) => {
            tracing::warn!(error = %e, ?kind, "text extraction failed");
            ExtractedDocument::from_pages(
                vec![Page {
                    index: 1,
                    text: sentinel_text(&e),
                }],
                1,
            )
        }
    }
}

pub fn try_extract_text(
    bytes: &[u8],
    kind: MediaKind,
    max_pages: usize,
) -> Result<ExtractedDocument, ExtractError> {
    match kind {
        MediaKind::Text => Ok(single_page(String::from_utf8_lossy(bytes).into_owned())),
        MediaKind::Pdf => extract_pdf(bytes, max_pages),
        MediaKind::Docx => extract_docx(bytes).map(single_page),
    }
}

/// Extracts and keeps only the keyword-relevant pages of a document.
pub fn extract_relevant(
    bytes: &[u8],
    kind: MediaKind,
    keywords: &KeywordSet,
    char_budget: usize,
    max_pages: usize,
    fallback_pages: usize,
) -> String {
    let doc = extract_text(bytes, kind, max_pages);
    filter_relevant(&doc.pages, keywords, char_budget, fallback_pages)
}

fn single_page(text: String) -> ExtractedDocument {
    ExtractedDocument::from_pages(vec![Page { index: 1, text }], 1)
}

fn extract_pdf(bytes: &[u8], max_pages: usize) -> Result<ExtractedDocument, ExtractError> {
    let doc = match lopdf::Document::load_mem(bytes) {
        Ok(doc) => doc,
        Err(load_err) => {
            tracing::debug!(error = %load_err, "lopdf could not load document, trying pdf-extract");
            let text = pdf_extract::extract_text_from_mem(bytes)
                .map_err(|e| ExtractError::Pdf(format!("{} (after: {})", e, load_err)))?;
            return Ok(single_page(text));
        }
    };

    let page_numbers: Vec<u32> = doc.get_pages().keys().copied().collect();
    let total_pages = page_numbers.len();

    let mut pages = Vec::with_capacity(total_pages.min(max_pages));
    for (i, page_number) in page_numbers.iter().take(max_pages).enumerate() {
        let text = match doc.extract_text(&[*page_number]) {
            Ok(text) => text,
            Err(e) => {
                tracing::debug!(page = page_number, error = %e, "page text unavailable");
                String::new()
            }
        };
        pages.push(Page {
            index: i + 1,
            text,
        });
    }

    if total_pages > max_pages {
        tracing::debug!(total_pages, max_pages, "PDF scan capped");
    }

    Ok(ExtractedDocument::from_pages(pages, total_pages))
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Docx(e.to_string()))?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|_| ExtractError::Docx("word/document.xml not found".to_string()))?;

    let mut doc_xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut doc_xml)
        .map_err(|e| ExtractError::Docx(e.to_string()))?;
    if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractError::Docx(
            "word/document.xml exceeds size limit".to_string(),
        ));
    }
    extract_paragraph_text(&doc_xml)
}

/// Collects `<w:t>` runs, one line per `<w:p>` paragraph.
fn extract_paragraph_text(xml: &[u8]) -> Result<String, ExtractError> {
    use quick_xml::events::Event;

    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::Text(te)) if in_text => {
                out.push_str(te.unescape().unwrap_or_default().as_ref());
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Docx(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out.trim_end().to_string())
}
