//! Anchored, human-readable excerpt construction.
//!
//! Given stitched chunk context and the query text, builds a best-effort
//! snippet: whitespace is normalized, the earliest query-term occurrence
//! anchors a window, and the window edges are nudged to nearby sentence
//! boundaries. Ellipsis markers signal clipping. Excerpts are heuristic,
//! with no exact-quote guarantee.
//!
//! All offsets are character offsets, so multibyte text is never split
//! mid-codepoint.

pub const DEFAULT_MAX_LEN: usize = 420;

const WINDOW_BEFORE: usize = 180;
const WINDOW_AFTER: usize = 220;
const BOUNDARY_SCAN: usize = 120;
const MAX_QUERY_TOKENS: usize = 8;
const MIN_TOKEN_LEN: usize = 4;

const ELLIPSIS: char = '…';
const TERMINATORS: [&str; 3] = [". ", "! ", "? "];

/// Collapse all whitespace runs to single spaces and trim.
pub fn normalize_ws(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Build an excerpt of at most roughly `max_len` characters from `source_text`,
/// anchored on the earliest case-insensitive occurrence of a query term.
pub fn make_excerpt(source_text: &str, query: &str, max_len: usize) -> String {
    let text = normalize_ws(source_text);
    if text.is_empty() {
        return String::new();
    }

    let chars: Vec<char> = text.chars().collect();
    let lower: Vec<char> = chars.iter().map(|c| lower_char(*c)).collect();

    let tokens = query_tokens(query);

    // Earliest anchor across all kept tokens.
    let mut pos: Option<usize> = None;
    for token in &tokens {
        let needle: Vec<char> = token.chars().collect();
        if let Some(p) = find_sub(&lower, &needle) {
            pos = Some(pos.map_or(p, |prev| prev.min(p)));
        }
    }

    let Some(pos) = pos else {
        return head_snippet(&chars, max_len);
    };

    let len = chars.len();
    let mut start = pos.saturating_sub(WINDOW_BEFORE);
    let mut end = (pos + WINDOW_AFTER).min(len);

    // Nudge the start forward to just past the nearest sentence terminator
    // within the scan zone before the window.
    let zone_start = start.saturating_sub(BOUNDARY_SCAN);
    let left_zone = &chars[zone_start..(start + 1).min(len)];
    let left_cut = TERMINATORS
        .iter()
        .filter_map(|t| rfind_sub(left_zone, &t.chars().collect::<Vec<_>>()))
        .max();
    if let Some(cut) = left_cut {
        start = zone_start + cut + 2;
    }

    // Nudge the end forward to just past the earliest terminator after the
    // window.
    let right_zone = &chars[end..(end + BOUNDARY_SCAN).min(len)];
    let right_cut = TERMINATORS
        .iter()
        .filter_map(|t| find_sub(right_zone, &t.chars().collect::<Vec<_>>()))
        .min();
    if let Some(cut) = right_cut {
        end += cut + 1;
    }

    let snippet: String = chars[start..end].iter().collect();
    let mut snippet = snippet.trim().to_string();
    if start > 0 {
        snippet.insert(0, ELLIPSIS);
    }
    if end < len {
        snippet.push(ELLIPSIS);
    }
    snippet
}

/// Query terms that anchor the excerpt: word tokens of length >= 4,
/// lowercased, deduplicated preserving first occurrence, capped at 8.
fn query_tokens(query: &str) -> Vec<String> {
    let normalized = normalize_ws(query);
    let mut tokens: Vec<String> = Vec::new();
    for word in normalized
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|w| w.chars().count() >= MIN_TOKEN_LEN)
    {
        let lowered: String = word.chars().map(lower_char).collect();
        if !tokens.contains(&lowered) {
            tokens.push(lowered);
            if tokens.len() >= MAX_QUERY_TOKENS {
                break;
            }
        }
    }
    tokens
}

/// First `max_len` characters, trimmed back to the last space boundary and
/// ellipsized when the text was actually truncated.
fn head_snippet(chars: &[char], max_len: usize) -> String {
    if chars.len() <= max_len {
        return chars.iter().collect();
    }
    let head = &chars[..max_len];
    let cut = rfind_char(head, ' ').unwrap_or(head.len());
    let mut snippet: String = chars[..cut].iter().collect();
    snippet.push(ELLIPSIS);
    snippet
}

/// Lowercase mapping that preserves a 1:1 character alignment (takes the
/// first char of a multi-char lowering).
fn lower_char(c: char) -> char {
    c.to_lowercase().next().unwrap_or(c)
}

fn find_sub(haystack: &[char], needle: &[char]) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn rfind_sub(haystack: &[char], needle: &[char]) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    haystack.windows(needle.len()).rposition(|w| w == needle)
}

fn rfind_char(chars: &[char], target: char) -> Option<usize> {
    chars.iter().rposition(|c| *c == target)
}
