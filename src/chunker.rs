//! Smart-chunk splitter (C5)
//!
//! Recursive character splitter with hierarchical separators: paragraph
//! break, line break, CJK sentence terminators, space, and finally a hard
//! character cut. Long rambling entries dilute a rare mention, so records
//! are re-cut into small overlapping windows that concentrate salience while
//! preserving sentence boundaries. Sizes are measured in chars, not bytes —
//! journal content is largely CJK.

use std::collections::VecDeque;

use crate::record::{JournalRecord, SubChunk};

/// Maximum window size in chars.
pub const CHUNK_SIZE: usize = 600;
/// Overlap carried between consecutive windows, in chars.
pub const CHUNK_OVERLAP: usize = 100;

/// Separator hierarchy, most to least semantic. The empty string is the
/// terminal hard cut.
const SEPARATORS: &[&str] = &["\n\n", "\n", "。", "！", "？", "；", " ", ""];

/// Split a record into indexable sub-chunks.
///
/// A record that fits in one window is passed through unchanged with its own
/// ID; anything that prevents a usable split falls back to the same
/// unsplit chunk.
pub fn split_record(record: &JournalRecord) -> Vec<SubChunk> {
    let windows = split_text(&record.content);
    if windows.len() <= 1 {
        return vec![SubChunk::whole(record)];
    }
    let total = windows.len() as u32;
    windows
        .into_iter()
        .enumerate()
        .map(|(k, content)| SubChunk::part(record, content, k as u32, total))
        .collect()
}

/// Split text into windows of at most [`CHUNK_SIZE`] chars with
/// [`CHUNK_OVERLAP`] chars of carried context. Separators are retained so
/// that the windows cover the input.
pub fn split_text(text: &str) -> Vec<String> {
    split_with(text, CHUNK_SIZE, CHUNK_OVERLAP)
}

/// Split with explicit size/overlap. Exposed for tests; production callers
/// use [`split_text`].
pub fn split_with(text: &str, size: usize, overlap: usize) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }
    if char_len(text) <= size {
        return vec![text.to_string()];
    }
    split_recursive(text, SEPARATORS, size, overlap)
}

fn split_recursive(text: &str, separators: &[&str], size: usize, overlap: usize) -> Vec<String> {
    let (sep, rest) = pick_separator(text, separators);
    if sep.is_empty() {
        return hard_split(text, size, overlap);
    }

    let pieces = split_keep_separator(text, sep);
    let mut chunks = Vec::new();
    let mut fitting: Vec<String> = Vec::new();

    for piece in pieces {
        if char_len(&piece) <= size {
            fitting.push(piece);
        } else {
            // Oversized piece: flush what fits, then descend a separator level
            if !fitting.is_empty() {
                merge_pieces(&fitting, size, overlap, &mut chunks);
                fitting.clear();
            }
            chunks.extend(split_recursive(&piece, rest, size, overlap));
        }
    }
    if !fitting.is_empty() {
        merge_pieces(&fitting, size, overlap, &mut chunks);
    }
    chunks
}

/// First separator that occurs in the text; the empty string always matches.
fn pick_separator<'a>(text: &str, separators: &'a [&'a str]) -> (&'a str, &'a [&'a str]) {
    for (i, sep) in separators.iter().enumerate() {
        if sep.is_empty() || text.contains(sep) {
            return (sep, &separators[i + 1..]);
        }
    }
    ("", &[])
}

/// Split on `sep`, keeping the separator attached to the preceding piece so
/// concatenating pieces reproduces the input.
fn split_keep_separator(text: &str, sep: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut rest = text;
    while let Some(idx) = rest.find(sep) {
        let end = idx + sep.len();
        out.push(rest[..end].to_string());
        rest = &rest[end..];
    }
    if !rest.is_empty() {
        out.push(rest.to_string());
    }
    out
}

/// Greedily pack consecutive pieces into windows of at most `size` chars,
/// carrying roughly `overlap` chars of trailing pieces into the next window.
fn merge_pieces(pieces: &[String], size: usize, overlap: usize, out: &mut Vec<String>) {
    let mut window: VecDeque<&str> = VecDeque::new();
    let mut total = 0usize;

    for piece in pieces {
        let len = char_len(piece);
        if total + len > size && !window.is_empty() {
            out.push(window.iter().copied().collect());
            // Drop leading pieces until only the overlap budget remains and
            // the incoming piece fits.
            while total > overlap || (total + len > size && !window.is_empty()) {
                match window.pop_front() {
                    Some(front) => total -= char_len(front),
                    None => break,
                }
            }
        }
        window.push_back(piece.as_str());
        total += len;
    }
    if !window.is_empty() {
        out.push(window.iter().copied().collect());
    }
}

/// Terminal cut: fixed-size char windows stepping `size - overlap`.
fn hard_split(text: &str, size: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let step = size.saturating_sub(overlap).max(1);
    let mut out = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let end = (start + size).min(chars.len());
        out.push(chars[start..end].iter().collect());
        if end >= chars.len() {
            break;
        }
        start += step;
    }
    out
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}
