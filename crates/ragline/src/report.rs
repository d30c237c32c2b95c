//! Grounded report generation.
//!
//! A report request is answered in five steps:
//!
//! 1. Refuse with [`Error::NoContextFound`] if the knowledge base holds no
//!    chunks at all.
//! 2. Redact PII from the supplied answers.
//! 3. Retrieve once per distinct question (or once for a query built from
//!    the prompt when there are no questions). A failed retrieval is
//!    logged and skipped.
//! 4. Merge the results, dropping duplicate chunks, and render them as
//!    source-tagged context within the character budget.
//! 5. Call the generator with the caller's prompt plus the report body.
//!
//! `references` lists the distinct filenames whose chunks made it into
//! the rendered context.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::{join_all, try_join_all};
use tracing::{info, warn};

use ragline_core::models::{QaPair, ReportRequest, ReportResponse, ScoredChunk};
use ragline_core::prompt::{
    assemble_messages, format_context, format_qas, format_scores, render_report_body,
    synthesize_query, ContextItem, Generator,
};
use ragline_core::store::{compare_scored, VectorStore};
use ragline_core::{Error, Result};

use crate::pii::PiiRedactor;
use crate::retrieval::RetrievalEngine;

pub struct ReportGenerator {
    retrieval: Arc<RetrievalEngine>,
    store: Arc<dyn VectorStore>,
    redactor: Arc<PiiRedactor>,
    generator: Arc<dyn Generator>,
    max_context_chars: usize,
}

impl ReportGenerator {
    pub fn new(
        retrieval: Arc<RetrievalEngine>,
        store: Arc<dyn VectorStore>,
        redactor: Arc<PiiRedactor>,
        generator: Arc<dyn Generator>,
        max_context_chars: usize,
    ) -> Self {
        Self {
            retrieval,
            store,
            redactor,
            generator,
            max_context_chars,
        }
    }

    pub async fn generate(&self, request: &ReportRequest) -> Result<ReportResponse> {
        let kb = request.knowledge_base_id.as_str();
        info!(
            knowledge_base_id = kb,
            qas = request.qas.len(),
            prompt_messages = request.prompt.len(),
            "report requested"
        );

        if self.store.count_chunks(kb).await? == 0 {
            return Err(Error::NoContextFound(kb.to_string()));
        }

        let qas = self.redact_answers(&request.qas).await?;
        let retrieved = self.gather_context(kb, request).await;

        let items: Vec<ContextItem<'_>> = retrieved
            .iter()
            .map(|c| ContextItem {
                filename: &c.filename,
                text: &c.chunk.text,
            })
            .collect();
        let context = (!items.is_empty()).then(|| format_context(&items, self.max_context_chars));

        let body = render_report_body(
            context.as_ref().map(|c| c.text.as_str()),
            &format_qas(&qas),
            &format_scores(&request.scores),
        );
        let messages = assemble_messages(&request.prompt, body);
        let generation = self.generator.generate(&messages).await?;

        let references = context.map(|c| c.filenames).unwrap_or_default();
        info!(
            knowledge_base_id = kb,
            context_chunks = retrieved.len(),
            references = references.len(),
            message_chars = generation.text.chars().count(),
            "report generated"
        );

        Ok(ReportResponse {
            message: generation.text,
            references,
            knowledge_base_id: request.knowledge_base_id.clone(),
            usage: generation.usage,
        })
    }

    async fn redact_answers(&self, qas: &[QaPair]) -> Result<Vec<QaPair>> {
        try_join_all(qas.iter().map(|qa| async move {
            let answer = self.redactor.redact_text(&qa.answer).await?;
            Ok::<_, Error>(QaPair {
                question: qa.question.clone(),
                answer,
            })
        }))
        .await
    }

    /// Ranked, de-duplicated chunks for every query of the request.
    async fn gather_context(&self, kb: &str, request: &ReportRequest) -> Vec<ScoredChunk> {
        let mut queries: Vec<String> = Vec::new();
        for qa in &request.qas {
            let question = qa.question.trim();
            if !question.is_empty() && !queries.iter().any(|q| q == question) {
                queries.push(question.to_string());
            }
        }
        if queries.is_empty() {
            queries.extend(synthesize_query(&request.prompt));
        }

        let results = join_all(queries.iter().map(|q| self.retrieval.retrieve(kb, q))).await;

        let mut best: HashMap<(String, i64), ScoredChunk> = HashMap::new();
        for (query, result) in queries.iter().zip(results) {
            match result {
                Ok(chunks) => {
                    for chunk in chunks {
                        let key = (chunk.filename.clone(), chunk.chunk.index);
                        match best.get(&key) {
                            Some(existing) if existing.score >= chunk.score => {}
                            _ => {
                                best.insert(key, chunk);
                            }
                        }
                    }
                }
                Err(e) => warn!(
                    knowledge_base_id = kb,
                    query_chars = query.chars().count(),
                    error = %e,
                    "retrieval failed, continuing without it"
                ),
            }
        }

        let mut merged: Vec<ScoredChunk> = best.into_values().collect();
        merged.sort_by(compare_scored);
        merged
    }
}
