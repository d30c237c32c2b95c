//! Core data models used throughout ragline.
//!
//! These types represent the documents, chunks, jobs, and report payloads
//! that flow through the ingestion and retrieval pipeline.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identity of a document: a filename scoped by its knowledge base.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentKey {
    pub knowledge_base_id: String,
    pub filename: String,
}

impl DocumentKey {
    pub fn new(knowledge_base_id: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            knowledge_base_id: knowledge_base_id.into(),
            filename: filename.into(),
        }
    }

    /// Lowercase extension of the filename including the leading dot
    /// (e.g. `".pdf"`), or `None` when the name has no extension.
    pub fn extension(&self) -> Option<String> {
        let name = self.filename.rsplit('/').next().unwrap_or(&self.filename);
        let dot = name.rfind('.')?;
        if dot == 0 || dot + 1 == name.len() {
            return None;
        }
        Some(name[dot..].to_ascii_lowercase())
    }
}

impl fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.knowledge_base_id, self.filename)
    }
}

/// A region of text reported by the PII detector.
///
/// `offset` and `length` count Unicode scalar values, matching the
/// convention of the detection services.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PiiSpan {
    pub offset: usize,
    pub length: usize,
    pub category: String,
    pub confidence: f32,
}

/// A redaction applied to a chunk, kept for audit.
///
/// `start`/`end` are byte offsets into the normalized source text of the
/// document, so an auditor holding the original object can recover the
/// redacted value. The stored chunk text never contains it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedactionSpan {
    pub start: usize,
    pub end: usize,
    pub category: String,
    pub confidence: f32,
}

/// A stored unit of retrieval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Position within the document, contiguous from 0.
    pub index: i64,
    /// Redacted text.
    pub text: String,
    /// SHA-256 of `text`.
    pub hash: String,
    pub vector: Vec<f32>,
    /// Byte range in the normalized source text this chunk was cut from.
    pub source_start: usize,
    pub source_end: usize,
    pub redactions: Vec<RedactionSpan>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobState {
    /// `pending` and `running` jobs hold the per-document ingestion slot.
    pub fn is_active(self) -> bool {
        matches!(self, JobState::Pending | JobState::Running)
    }

    pub fn is_terminal(self) -> bool {
        !self.is_active()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status record of one document's ingestion run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionJob {
    pub id: String,
    pub key: DocumentKey,
    pub state: JobState,
    /// Number of successful ingestions of this document so far.
    pub revision: u64,
    pub error: Option<String>,
    /// Failure class (see [`Error::kind`](crate::error::Error::kind)).
    pub error_kind: Option<String>,
    pub chunk_count: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A chunk returned by a similarity query, with its owning document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredChunk {
    pub knowledge_base_id: String,
    pub filename: String,
    pub chunk: Chunk,
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub filename: String,
    pub chunk_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeBaseStats {
    pub knowledge_base_id: String,
    pub total_documents: usize,
    pub total_chunks: usize,
    pub files: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QaPair {
    pub question: String,
    pub answer: String,
}

/// One role/text element of a generation prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: String,
    pub text: String,
}

impl PromptMessage {
    pub fn new(role: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRequest {
    pub knowledge_base_id: String,
    #[serde(default)]
    pub prompt: Vec<PromptMessage>,
    #[serde(default)]
    pub qas: Vec<QaPair>,
    /// Optional assessment scores by category, rendered into the prompt.
    #[serde(default)]
    pub scores: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

/// Output of the generation capability.
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub text: String,
    pub usage: Option<TokenUsage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportResponse {
    pub message: String,
    /// Sorted, distinct filenames whose chunks were used as context.
    pub references: Vec<String>,
    pub knowledge_base_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}
