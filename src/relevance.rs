//! Keyword relevance filtering over extracted pages.
//!
//! A page is relevant when its lower-cased text contains any keyword as a
//! plain substring. Matching is intentionally not word-boundary aware:
//! `"exit"` also hits `"exiting"` and `"fire"` hits `"fireplace"`, which
//! trades precision for recall.
//!
//! When nothing matches, the first few pages are returned verbatim so a
//! document that exists is never silently dropped from the context.

use std::collections::BTreeSet;

use crate::models::Page;

/// Terms that mark regulatory text in general.
pub const BASE_KEYWORDS: &[&str] = &[
    "code",
    "regulation",
    "requirement",
    "compliance",
    "standard",
    "ordinance",
    "zoning",
];

/// Terms for the plan features reviewers check most often.
pub const DOMAIN_KEYWORDS: &[&str] = &[
    "height",
    "setback",
    "egress",
    "occupancy",
    "fire",
    "exit",
    "stair",
    "accessib",
    "sprinkler",
    "ventilation",
    "structural",
    "guardrail",
    "window",
];

/// Lower-cased, de-duplicated keywords. Iteration order is sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeywordSet {
    words: BTreeSet<String>,
}

impl KeywordSet {
    /// Building-type tokens longer than two characters plus the base and
    /// domain vocabularies.
    pub fn from_building_type(building_type: &str) -> Self {
        let mut words: BTreeSet<String> = building_type
            .to_lowercase()
            .split_whitespace()
            .filter(|token| token.chars().count() > 2)
            .map(str::to_string)
            .collect();
        words.extend(BASE_KEYWORDS.iter().map(|w| w.to_string()));
        words.extend(DOMAIN_KEYWORDS.iter().map(|w| w.to_string()));
        Self { words }
    }

    /// A set containing exactly `words` (lower-cased).
    pub fn from_words<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            words: words
                .into_iter()
                .map(|w| w.as_ref().to_lowercase())
                .filter(|w| !w.is_empty())
                .collect(),
        }
    }

    pub fn contains(&self, word: &str) -> bool {
        self.words.contains(word)
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.words.iter().map(String::as_str)
    }

    /// True if `text` contains any keyword as a substring, ignoring case.
    pub fn matches(&self, text: &str) -> bool {
        let lower = text.to_lowercase();
        self.words.iter().any(|w| lower.contains(w.as_str()))
    }
}

/// Concatenates the keyword-relevant pages of a document.
///
/// Relevant pages are emitted in order as `"[Page n]\n<text>\n\n"`. The
/// budget is checked before each page: once the output holds `char_budget`
/// characters no further page is started, so the result can overrun the
/// budget by at most one page.
///
/// If no page matches, the first `fallback_pages` page texts are returned
/// joined by blank lines, without markers.
pub fn filter_relevant(
    pages: &[Page],
    keywords: &KeywordSet,
    char_budget: usize,
    fallback_pages: usize,
) -> String {
    if pages.is_empty() {
        return String::new();
    }

    let mut out = String::new();
    let mut used = 0usize;
    let mut matched = 0usize;

    for page in pages {
        if !keywords.matches(&page.text) {
            continue;
        }
        matched += 1;
        if used >= char_budget {
            break;
        }
        let block = format!("[Page {}]\n{}\n\n", page.index, page.text);
        used += block.chars().count();
        out.push_str(&block);
    }

    if matched == 0 {
        return fallback_prefix(pages, fallback_pages);
    }
    out
}

/// The first `count` page texts, verbatim.
pub fn fallback_prefix(pages: &[Page], count: usize) -> String {
    pages
        .iter()
        .take(count)
        .map(|p| p.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}
