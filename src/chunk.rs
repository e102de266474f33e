//! Sliding-window text chunker for the semantic index.
//!
//! Splits extracted document text into fixed windows of `chunk_chars`
//! characters. Consecutive windows share `overlap_chars` characters so a
//! requirement that straddles a boundary appears whole in at least one
//! chunk. Windows are cut on `char` boundaries, never inside a UTF-8
//! sequence.

/// Split `text` into overlapping character windows.
///
/// Windows start every `chunk_chars - overlap_chars` characters. The last
/// window may be shorter. Whitespace-only windows are dropped, so empty text
/// yields no chunks.
pub fn chunk_text(text: &str, chunk_chars: usize, overlap_chars: usize) -> Vec<String> {
    if text.is_empty() || chunk_chars == 0 {
        return Vec::new();
    }
    let step = chunk_chars.saturating_sub(overlap_chars).max(1);

    // Byte offset of every char, plus the end of the string.
    let mut offsets: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
    let char_count = offsets.len();
    offsets.push(text.len());

    let mut chunks = Vec::new();
    let mut start = 0usize;
    while start < char_count {
        let end = (start + chunk_chars).min(char_count);
        let window = &text[offsets[start]..offsets[end]];
        if !window.trim().is_empty() {
            chunks.push(window.to_string());
        }
        if end == char_count {
            break;
        }
        start += step;
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = chunk_text("Hello, world!", 1000, 100);
        assert_eq!(chunks, vec!["Hello, world!"]);
    }

    #[test]
    fn test_empty_text() {
        assert!(chunk_text("", 1000, 100).is_empty());
        assert!(chunk_text("   \n  ", 1000, 100).is_empty());
    }

    #[test]
    fn test_windows_overlap() {
        let text: String = ('a'..='j').collect();
        let chunks = chunk_text(&text, 4, 1);
        assert_eq!(chunks, vec!["abcd", "defg", "ghij"]);
    }

    #[test]
    fn test_last_window_is_shorter() {
        let chunks = chunk_text("abcdefg", 4, 0);
        assert_eq!(chunks, vec!["abcd", "efg"]);
    }

    #[test]
    fn test_default_sizes() {
        let text = "x".repeat(2500);
        let chunks = chunk_text(&text, 1000, 100);
        // Starts at 0, 900, 1800.
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 1000);
        assert_eq!(chunks[2].len(), 700);
    }

    #[test]
    fn test_multibyte_boundaries() {
        let text = "é".repeat(10);
        let chunks = chunk_text(&text, 3, 1);
        assert!(chunks.iter().all(|c| c.chars().count() <= 3));
        assert_eq!(chunks.first().map(|c| c.chars().count()), Some(3));
    }

    #[test]
    fn test_deterministic() {
        let text = "Section R310 emergency escape and rescue openings. ".repeat(40);
        assert_eq!(chunk_text(&text, 200, 20), chunk_text(&text, 200, 20));
    }
}
