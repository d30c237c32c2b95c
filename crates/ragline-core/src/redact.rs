//! PII redaction policy.
//!
//! The [`PiiDetector`] trait is the boundary to an external detection
//! service. [`RedactionPolicy`] decides which detected spans are redacted
//! (configured categories, confidence at or above the threshold), merges
//! overlapping spans, and replaces each merged span with a
//! category-tagged placeholder such as `[REDACTED:PERSON]`.
//!
//! The result keeps a mapping from redacted-text offsets back to source
//! offsets so chunk metadata can point into the original document.

use std::collections::BTreeSet;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{PiiSpan, RedactionSpan};

const PLACEHOLDER_OPEN: &str = "[REDACTED:";

/// Placeholder token replacing a redacted span.
pub fn placeholder(category: &str) -> String {
    format!("{}{}]", PLACEHOLDER_OPEN, category.to_ascii_uppercase())
}

/// External PII detection capability.
#[async_trait]
pub trait PiiDetector: Send + Sync {
    fn name(&self) -> &str;

    /// Detect PII in `text`. Span offsets count characters.
    async fn detect(&self, text: &str, categories: &[String]) -> Result<Vec<PiiSpan>>;
}

/// One merged span that was replaced, in both coordinate systems.
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedRedaction {
    /// Byte range in the input text.
    pub source_start: usize,
    pub source_end: usize,
    /// Byte range of the placeholder in the redacted text.
    pub redacted_start: usize,
    pub redacted_end: usize,
    pub category: String,
    pub confidence: f32,
}

/// Which end of a placeholder an offset inside it maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bias {
    Start,
    End,
}

/// Redacted text plus the spans that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Redacted {
    pub text: String,
    pub applied: Vec<AppliedRedaction>,
}

impl Redacted {
    pub fn unchanged(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            applied: Vec::new(),
        }
    }

    /// Map a byte offset in the redacted text to the input text.
    pub fn to_source(&self, pos: usize, bias: Bias) -> usize {
        let mut delta: isize = 0;
        for a in &self.applied {
            if pos <= a.redacted_start {
                break;
            }
            if pos < a.redacted_end {
                return match bias {
                    Bias::Start => a.source_start,
                    Bias::End => a.source_end,
                };
            }
            delta += (a.source_end - a.source_start) as isize
                - (a.redacted_end - a.redacted_start) as isize;
        }
        (pos as isize + delta) as usize
    }

    /// Redactions whose placeholder intersects the redacted byte range
    /// `start..end`, expressed in source offsets.
    pub fn spans_between(&self, start: usize, end: usize) -> Vec<RedactionSpan> {
        self.applied
            .iter()
            .filter(|a| a.redacted_start < end && a.redacted_end > start)
            .map(|a| RedactionSpan {
                start: a.source_start,
                end: a.source_end,
                category: a.category.clone(),
                confidence: a.confidence,
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
struct Candidate {
    start: usize,
    end: usize,
    category: String,
    confidence: f32,
}

/// Category set and confidence threshold for redaction.
#[derive(Debug, Clone, PartialEq)]
pub struct RedactionPolicy {
    categories: BTreeSet<String>,
    threshold: f32,
}

impl RedactionPolicy {
    pub fn new<I, S>(categories: I, threshold: f32) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            categories: categories
                .into_iter()
                .map(|c| c.as_ref().trim().to_ascii_uppercase())
                .filter(|c| !c.is_empty())
                .collect(),
            threshold,
        }
    }

    pub fn categories(&self) -> Vec<String> {
        self.categories.iter().cloned().collect()
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn accepts(&self, span: &PiiSpan) -> bool {
        span.length > 0
            && span.confidence >= self.threshold
            && self
                .categories
                .contains(&span.category.to_ascii_uppercase())
    }

    /// Redact `text` using the detector's `spans`.
    ///
    /// Spans outside the policy, empty, or out of bounds are ignored.
    /// Spans that fall entirely inside an existing placeholder are ignored
    /// too, so applying the policy to its own output changes nothing.
    pub fn apply(&self, text: &str, spans: &[PiiSpan]) -> Redacted {
        let bounds: Vec<usize> = text
            .char_indices()
            .map(|(i, _)| i)
            .chain(std::iter::once(text.len()))
            .collect();
        let char_count = bounds.len() - 1;
        let existing = placeholder_ranges(text);

        let mut candidates: Vec<Candidate> = Vec::new();
        for span in spans.iter().filter(|s| self.accepts(s)) {
            let Some(end_char) = span.offset.checked_add(span.length) else {
                continue;
            };
            if end_char > char_count {
                continue;
            }
            let mut start = bounds[span.offset];
            let mut end = bounds[end_char];

            if existing.iter().any(|&(s, e)| s <= start && end <= e) {
                continue;
            }
            for &(s, e) in &existing {
                if s < end && start < e {
                    start = start.min(s);
                    end = end.max(e);
                }
            }

            candidates.push(Candidate {
                start,
                end,
                category: span.category.to_ascii_uppercase(),
                confidence: span.confidence,
            });
        }

        let merged = merge(candidates);
        if merged.is_empty() {
            return Redacted::unchanged(text);
        }

        let mut out = String::with_capacity(text.len());
        let mut applied = Vec::with_capacity(merged.len());
        let mut cursor = 0;
        for c in merged {
            out.push_str(&text[cursor..c.start]);
            let token = placeholder(&c.category);
            let redacted_start = out.len();
            out.push_str(&token);
            applied.push(AppliedRedaction {
                source_start: c.start,
                source_end: c.end,
                redacted_start,
                redacted_end: out.len(),
                category: c.category,
                confidence: c.confidence,
            });
            cursor = c.end;
        }
        out.push_str(&text[cursor..]);

        Redacted { text: out, applied }
    }
}

/// Union overlapping or touching spans. A merged span takes the category
/// of its most confident member.
fn merge(mut candidates: Vec<Candidate>) -> Vec<Candidate> {
    candidates.sort_by_key(|c| (c.start, c.end));

    let mut merged: Vec<Candidate> = Vec::with_capacity(candidates.len());
    for c in candidates {
        match merged.last_mut() {
            Some(last) if c.start <= last.end => {
                last.end = last.end.max(c.end);
                if c.confidence > last.confidence {
                    last.confidence = c.confidence;
                    last.category = c.category;
                }
            }
            _ => merged.push(c),
        }
    }
    merged
}

/// Byte ranges of placeholders already present in `text`.
fn placeholder_ranges(text: &str) -> Vec<(usize, usize)> {
    let mut ranges = Vec::new();
    let mut from = 0;
    while let Some(found) = text[from..].find(PLACEHOLDER_OPEN) {
        let start = from + found;
        let body_start = start + PLACEHOLDER_OPEN.len();
        let body_len = text[body_start..]
            .find(|c: char| !(c.is_ascii_uppercase() || c == '_'))
            .unwrap_or(text.len() - body_start);
        let close = body_start + body_len;
        if body_len > 0 && text[close..].starts_with(']') {
            ranges.push((start, close + 1));
            from = close + 1;
        } else {
            from = body_start;
        }
    }
    ranges
}
