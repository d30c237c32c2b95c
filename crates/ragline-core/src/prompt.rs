//! Generation capability trait and report prompt assembly.
//!
//! Prompt assembly is pure: given the caller's prompt messages, the
//! question/answer pairs, optional scores, and retrieved context, it
//! produces the message list sent to the [`Generator`].

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{Generation, PromptMessage, QaPair};

/// External text generation capability.
#[async_trait]
pub trait Generator: Send + Sync {
    fn model_name(&self) -> &str;
    async fn generate(&self, messages: &[PromptMessage]) -> Result<Generation>;
}

pub const RAG_TEMPLATE: &str = "Context:\n{context}\n\n\
Based on the above context, please analyze the following Q&A pairs and generate a comprehensive report:\n\n\
{qas}\n\n{scores}";

pub const NO_CONTEXT_TEMPLATE: &str = "No relevant context was found in the knowledge base.\n\n\
Please analyze the following Q&A pairs and generate a comprehensive report:\n\n\
{qas}\n\n{scores}";

pub const TRUNCATION_NOTE: &str = "[... content truncated ...]";

const CONTEXT_SEPARATOR: &str = "\n\n---\n\n";

/// One retrieved passage and the document it came from.
#[derive(Debug, Clone, Copy)]
pub struct ContextItem<'a> {
    pub filename: &'a str,
    pub text: &'a str,
}

/// Rendered context plus the filenames of the passages that made it in.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextBlock {
    pub text: String,
    pub filenames: Vec<String>,
}

pub fn format_qas(qas: &[QaPair]) -> String {
    if qas.is_empty() {
        return "No Q&A pairs provided.".to_string();
    }
    qas.iter()
        .map(|qa| format!("Question: {}\nAnswer: {}", qa.question, qa.answer))
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn format_scores(scores: &BTreeMap<String, f64>) -> String {
    if scores.is_empty() {
        return "No scores provided.".to_string();
    }
    if scores.len() == 1 {
        if let Some(overall) = scores.get("overall") {
            return format!("Overall Score: {}", overall);
        }
    }
    let lines: Vec<String> = scores
        .iter()
        .map(|(category, score)| format!("{} Score: {}", title_case(category), score))
        .collect();
    format!("Scores:\n{}", lines.join("\n"))
}

fn title_case(s: &str) -> String {
    s.split(|c: char| c == '_' || c.is_whitespace())
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

/// Render context items in rank order, each tagged with its source file.
///
/// Items are added until `max_chars` (0 = unlimited) would be exceeded.
/// The first item is always included, cut to fit if necessary; any cut or
/// omission is marked with [`TRUNCATION_NOTE`].
pub fn format_context(items: &[ContextItem<'_>], max_chars: usize) -> ContextBlock {
    let mut text = String::new();
    let mut used = 0usize;
    let mut filenames: Vec<String> = Vec::new();

    for (i, item) in items.iter().enumerate() {
        let entry = format!("Context {} (Source: {}):\n{}", i + 1, item.filename, item.text);
        let separator = if i == 0 { "" } else { CONTEXT_SEPARATOR };
        let entry_len = separator.chars().count() + entry.chars().count();

        if max_chars > 0 && used + entry_len > max_chars {
            if i == 0 {
                let keep = max_chars.saturating_sub(TRUNCATION_NOTE.chars().count() + 1);
                text.extend(entry.chars().take(keep));
                text.push('\n');
                filenames.push(item.filename.to_string());
            } else {
                text.push_str(CONTEXT_SEPARATOR);
            }
            text.push_str(TRUNCATION_NOTE);
            break;
        }

        text.push_str(separator);
        text.push_str(&entry);
        used += entry_len;
        if !filenames.iter().any(|f| f == item.filename) {
            filenames.push(item.filename.to_string());
        }
    }

    filenames.sort();
    filenames.dedup();
    ContextBlock { text, filenames }
}

/// Fill the report template. `None` context selects the no-context form.
pub fn render_report_body(context: Option<&str>, qas: &str, scores: &str) -> String {
    match context {
        Some(context) => fill_template(
            RAG_TEMPLATE,
            &[("context", context), ("qas", qas), ("scores", scores)],
        ),
        None => fill_template(NO_CONTEXT_TEMPLATE, &[("qas", qas), ("scores", scores)]),
    }
}

/// Substitute `{name}` placeholders in a single pass over `template`.
///
/// Values are inserted verbatim and never rescanned, so a value that
/// itself contains `{qas}` stays literal. Unknown placeholders are kept.
fn fill_template(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let value = after.find('}').and_then(|close| {
            let name = &after[..close];
            values
                .iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| (*value, close))
        });
        match value {
            Some((value, close)) => {
                out.push_str(value);
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// The caller's prompt messages in order, followed by the report body as
/// a final user message.
pub fn assemble_messages(prompt: &[PromptMessage], body: String) -> Vec<PromptMessage> {
    let mut messages: Vec<PromptMessage> = prompt
        .iter()
        .filter(|m| !m.text.trim().is_empty())
        .cloned()
        .collect();
    messages.push(PromptMessage::new("user", body));
    messages
}

/// Retrieval query used when a report request carries no questions:
/// the caller's user messages, or all messages if there are none.
pub fn synthesize_query(prompt: &[PromptMessage]) -> Option<String> {
    let join = |msgs: Vec<&PromptMessage>| {
        msgs.iter()
            .map(|m| m.text.trim())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    };

    let user = join(prompt.iter().filter(|m| m.role == "user").collect());
    let query = if user.is_empty() {
        join(prompt.iter().collect())
    } else {
        user
    };
    (!query.is_empty()).then_some(query)
}
