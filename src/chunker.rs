//! Paragraph-packing text chunker.
//!
//! Splits extracted document text into bounded, overlapping retrieval units.
//! Paragraphs (non-empty trimmed lines) are greedily packed into a buffer up
//! to `max_chars`; when a buffer overflows, the last `overlap` characters of
//! the emitted chunk seed the next one so neighboring chunks share context.
//!
//! Pure function of its input: identical input yields identical output.

use anyhow::{bail, Result};

pub const DEFAULT_MAX_CHARS: usize = 1200;
pub const DEFAULT_OVERLAP: usize = 150;

/// Split `text` into chunks of at most `max_chars` characters with an
/// `overlap`-character carry-over between consecutive chunks.
///
/// A single paragraph longer than `max_chars` is the one case where the bound
/// cannot hold: its `max_chars`-character prefix is emitted as-is and the
/// remainder (starting at `max_chars - overlap`) seeds the next buffer.
///
/// # Errors
///
/// `overlap >= max_chars` is a degenerate configuration (the carry-over would
/// never shrink) and is rejected rather than silently mishandled.
pub fn chunk_text(text: &str, max_chars: usize, overlap: usize) -> Result<Vec<String>> {
    if max_chars == 0 {
        bail!("max_chars must be > 0");
    }
    if overlap >= max_chars {
        bail!("overlap ({}) must be < max_chars ({})", overlap, max_chars);
    }

    let paragraphs = text
        .lines()
        .map(str::trim)
        .filter(|p| !p.is_empty());

    let mut chunks: Vec<String> = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut current_len: usize = 0;

    for para in paragraphs {
        let para_len = para.chars().count();

        if current_len + para_len + 1 <= max_chars {
            current.push(para.to_string());
            current_len += para_len + 1;
            continue;
        }

        if !current.is_empty() {
            let emitted = current.join("\n");
            let tail = last_chars(&emitted, overlap).to_string();
            chunks.push(emitted);
            current_len = tail.chars().count() + para_len + 1;
            current = vec![tail, para.to_string()];
        } else {
            // Single over-long paragraph: hard cut at max_chars, carry the
            // tail starting at max_chars - overlap into the next buffer.
            chunks.push(first_chars(para, max_chars).to_string());
            let tail = chars_from(para, max_chars - overlap).to_string();
            current_len = tail.chars().count();
            current = vec![tail];
        }
    }

    if !current.is_empty() {
        chunks.push(current.join("\n"));
    }

    Ok(chunks)
}

/// Byte offset of the `n`-th character, or `s.len()` when `s` has fewer.
fn char_offset(s: &str, n: usize) -> usize {
    s.char_indices().nth(n).map(|(i, _)| i).unwrap_or(s.len())
}

fn first_chars(s: &str, n: usize) -> &str {
    &s[..char_offset(s, n)]
}

fn chars_from(s: &str, n: usize) -> &str {
    &s[char_offset(s, n)..]
}

fn last_chars(s: &str, n: usize) -> &str {
    let total = s.chars().count();
    chars_from(s, total.saturating_sub(n))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_text_single_chunk() {
        let chunks = chunk_text("Hello, world!", 1200, 150).unwrap();
        assert_eq!(chunks, vec!["Hello, world!"]);
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        assert!(chunk_text("", 1200, 150).unwrap().is_empty());
        assert!(chunk_text("   \n\n  ", 1200, 150).unwrap().is_empty());
    }

    #[test]
    fn paragraphs_pack_until_limit() {
        let text = "First paragraph.\nSecond paragraph.\nThird paragraph.";
        let chunks = chunk_text(text, 1200, 150).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0], text);
    }

    #[test]
    fn overflow_emits_and_carries_overlap() {
        let a = "a".repeat(40);
        let b = "b".repeat(40);
        let text = format!("{a}\n{b}");
        let chunks = chunk_text(&text, 50, 10).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], a);
        // Second chunk starts with the last 10 chars of the first.
        assert!(chunks[1].starts_with(&"a".repeat(10)));
        assert!(chunks[1].ends_with(&b));
    }

    #[test]
    fn overlap_is_suffix_of_previous_chunk() {
        let paras: Vec<String> = (0..30).map(|i| format!("paragraph number {i} right here")).collect();
        let text = paras.join("\n");
        let chunks = chunk_text(&text, 120, 30).unwrap();
        assert!(chunks.len() > 1);
        for pair in chunks.windows(2) {
            let head: String = pair[1].chars().take(30).collect();
            // Either the carried overlap is a suffix of the previous chunk,
            // or no carry happened and the next chunk starts a fresh paragraph.
            assert!(
                pair[0].ends_with(&head) || pair[1].starts_with("paragraph"),
                "chunk boundary lost its overlap: {:?} -> {:?}",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn every_chunk_respects_bound() {
        let paras: Vec<String> = (0..50).map(|i| format!("sentence {i} with some words")).collect();
        let text = paras.join("\n");
        for chunk in chunk_text(&text, 100, 20).unwrap() {
            assert!(chunk.chars().count() <= 100, "oversized chunk: {chunk:?}");
        }
    }

    #[test]
    fn oversized_paragraph_hard_truncates() {
        let para = "x".repeat(300);
        let chunks = chunk_text(&para, 100, 20).unwrap();
        assert_eq!(chunks[0].chars().count(), 100);
        // Tail resumes at max_chars - overlap.
        assert_eq!(chunks[1].chars().count(), 300 - 80);
    }

    #[test]
    fn multibyte_text_never_splits_codepoints() {
        let para = "é".repeat(300);
        let chunks = chunk_text(&para, 100, 20).unwrap();
        assert_eq!(chunks[0].chars().count(), 100);
        for c in &chunks {
            assert!(c.chars().all(|ch| ch == 'é'));
        }
    }

    #[test]
    fn chunking_is_deterministic() {
        let text = "Alpha\nBeta\nGamma\nDelta";
        let c1 = chunk_text(text, 12, 4).unwrap();
        let c2 = chunk_text(text, 12, 4).unwrap();
        assert_eq!(c1, c2);
    }

    #[test]
    fn paragraph_order_is_preserved() {
        let paras: Vec<String> = (0..20).map(|i| format!("para{i:02}")).collect();
        let text = paras.join("\n");
        let chunks = chunk_text(&text, 30, 8).unwrap();
        let joined = chunks.join("\n");
        let mut last_pos = 0usize;
        for p in &paras {
            let pos = joined[last_pos..]
                .find(p.as_str())
                .map(|i| i + last_pos)
                .unwrap_or_else(|| panic!("paragraph {p} lost"));
            last_pos = pos;
        }
    }

    #[test]
    fn degenerate_overlap_rejected() {
        assert!(chunk_text("hello", 10, 10).is_err());
        assert!(chunk_text("hello", 10, 20).is_err());
        assert!(chunk_text("hello", 0, 0).is_err());
    }
}
