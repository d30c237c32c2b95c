//! Overlapping-window text chunker.
//!
//! Splits normalized document text into [`TextWindow`]s of at most
//! `chunk_size` characters, where each window after the first starts
//! exactly `overlap` characters before the end of its predecessor.
//!
//! # Algorithm
//!
//! 1. If the remaining text fits in one window, emit it and stop.
//! 2. Otherwise the hard end is `start + chunk_size`. Search backwards from
//!    it, within a tolerance of `chunk_size / 5` characters, for the best
//!    boundary: a paragraph break, then a sentence end, then any
//!    whitespace.
//! 3. If no boundary exists within tolerance, cut at the hard end.
//! 4. The next window starts at `end - overlap`.
//!
//! Sizes are counted in Unicode scalar values; window offsets are byte
//! offsets so callers can slice the source string directly.
//!
//! # Guarantees
//!
//! - Empty input yields no windows.
//! - Every window is at most `chunk_size` characters.
//! - Consecutive windows share exactly `overlap` characters.
//! - [`reconstruct`] over the windows returns the input unchanged.
//!
//! # Example
//!
//! ```rust
//! use ragline_core::chunk::{chunk_text, reconstruct};
//!
//! let text = "Alpha beta gamma. Delta epsilon zeta. Eta theta iota.";
//! let windows = chunk_text(text, 20, 5);
//! let pieces: Vec<&str> = windows.iter().map(|w| w.slice(text)).collect();
//! assert_eq!(reconstruct(&pieces, 5), text);
//! ```

use sha2::{Digest, Sha256};

/// A window over the chunked text, as byte offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextWindow {
    pub index: usize,
    pub start: usize,
    pub end: usize,
}

impl TextWindow {
    pub fn slice<'a>(&self, text: &'a str) -> &'a str {
        &text[self.start..self.end]
    }
}

/// Split `text` into overlapping windows.
///
/// `overlap` is clamped below `chunk_size` and `chunk_size` is at least 1,
/// so the window start always advances.
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<TextWindow> {
    if text.is_empty() {
        return Vec::new();
    }

    let size = chunk_size.max(1);
    let overlap = overlap.min(size - 1);
    let tolerance = (size / 5).max(1);

    let chars: Vec<char> = text.chars().collect();
    // bounds[i] is the byte offset of char i; bounds[n] == text.len()
    let bounds: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let n = chars.len();

    let mut windows = Vec::new();
    let mut start = 0usize;

    loop {
        if n - start <= size {
            windows.push(TextWindow {
                index: windows.len(),
                start: bounds[start],
                end: bounds[n],
            });
            break;
        }

        let hard_end = start + size;
        let lowest = (start + overlap + 1).max(hard_end.saturating_sub(tolerance));
        let end = find_boundary(&chars, lowest, hard_end).unwrap_or(hard_end);

        windows.push(TextWindow {
            index: windows.len(),
            start: bounds[start],
            end: bounds[end],
        });
        start = end - overlap;
    }

    windows
}

/// Best window end in `lowest..=highest`, by boundary strength.
fn find_boundary(chars: &[char], lowest: usize, highest: usize) -> Option<usize> {
    if lowest > highest {
        return None;
    }
    let candidates = || (lowest..=highest).rev();

    let paragraph = |p: usize| p >= 2 && chars[p - 1] == '\n' && chars[p - 2] == '\n';
    let sentence = |p: usize| {
        p >= 2 && chars[p - 1].is_whitespace() && matches!(chars[p - 2], '.' | '!' | '?')
    };
    let space = |p: usize| {
        chars[p - 1].is_whitespace() || chars.get(p).is_some_and(|c| c.is_whitespace())
    };

    candidates()
        .find(|&p| paragraph(p))
        .or_else(|| candidates().find(|&p| sentence(p)))
        .or_else(|| candidates().find(|&p| space(p)))
}

/// Concatenate window texts, dropping the `overlap`-character prefix of
/// every window after the first.
pub fn reconstruct(windows: &[&str], overlap: usize) -> String {
    let mut out = String::new();
    for (i, window) in windows.iter().enumerate() {
        if i == 0 {
            out.push_str(window);
        } else {
            out.extend(window.chars().skip(overlap));
        }
    }
    out
}

/// Normalize extracted text once, before redaction and chunking.
///
/// - Line endings become `\n`.
/// - Runs of spaces, tabs and other control characters collapse to a
///   single space; lines are trimmed.
/// - Runs of blank lines collapse to one blank line (a paragraph break).
/// - Leading and trailing blank lines are dropped.
pub fn normalize_text(raw: &str) -> String {
    let unified = raw.replace("\r\n", "\n").replace('\r', "\n");

    let mut out = String::with_capacity(unified.len());
    let mut pending_blank = false;

    for line in unified.split('\n') {
        let collapsed = line
            .split(|c: char| c.is_whitespace() || c.is_control())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ");

        if collapsed.is_empty() {
            pending_blank = true;
            continue;
        }
        if !out.is_empty() {
            out.push_str(if pending_blank { "\n\n" } else { "\n" });
        }
        pending_blank = false;
        out.push_str(&collapsed);
    }

    out
}

/// Hex SHA-256 of a chunk's text.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
