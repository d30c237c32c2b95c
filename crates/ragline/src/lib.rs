//! # ragline
//!
//! **Document ingestion with PII redaction, vector retrieval, and grounded
//! report generation.**
//!
//! ragline turns documents held in an object store into redacted, embedded
//! chunks scoped by knowledge base, then answers report requests by
//! retrieving those chunks and handing them to a text-generation model as
//! source-tagged context.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌────────────────────────┐   ┌──────────────┐
//! │ Object store │──▶│ Parse → Redact → Chunk │──▶│ Vector store │
//! │  S3 / files  │   │        → Embed         │   │ SQLite / mem │
//! └──────────────┘   └────────────────────────┘   └──────┬───────┘
//!                                                         │
//!                        ┌────────────────────────────────┘
//!                        ▼
//!                 ┌──────────────┐   ┌──────────────┐
//!                 │  Retrieval   │──▶│    Report    │
//!                 └──────────────┘   └──────────────┘
//! ```
//!
//! ## Data Flow
//!
//! 1. The **orchestrator** ([`ingest`]) admits one job per
//!    `(knowledge_base_id, filename)` ([`jobs`]) and hands it to a worker.
//! 2. The worker fetches the bytes ([`object_store`]), extracts text with
//!    the parser registered for the extension ([`formats`]), and redacts
//!    PII from the whole document ([`pii`]).
//! 3. The redacted text is chunked and embedded ([`embedding`]); the
//!    document's chunk set is replaced atomically in the vector store
//!    ([`sqlite_store`]).
//! 4. [`retrieval`] embeds a query and returns the top-k chunks of one
//!    knowledge base.
//! 5. [`report`] redacts the caller's answers, retrieves per question, and
//!    calls the generation model ([`generation`]).
//!
//! Every external call runs through a [`retry::ServiceGate`], which caps
//! concurrency per service and retries transient failures with backoff.
//!
//! ## Quick Start
//!
//! ```bash
//! ragline init                          # create the database
//! ragline ingest acme handbook.pdf      # ingest one document
//! ragline stats acme                    # documents and chunks
//! ragline report --request req.json     # grounded report
//! ragline redact "Call John Smith"      # redact free text
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`service`] | `RagService` facade wiring every component |
//! | [`ingest`] | Ingestion pipeline and worker pool |
//! | [`jobs`] | Per-document job registry with compare-and-swap transitions |
//! | [`formats`] | Format parsers: PDF, DOCX, DOC, Markdown, HTML, CSV, text |
//! | [`object_store`] | S3 (SigV4) and filesystem object stores |
//! | [`pii`] | Comprehend and HTTP PII detectors, document redaction |
//! | [`embedding`] | OpenAI-compatible embedding client |
//! | [`generation`] | OpenAI-compatible chat completion client |
//! | [`retrieval`] | Query embedding and top-k retrieval |
//! | [`report`] | Grounded report generation |
//! | [`retry`] | Concurrency gates and exponential backoff |
//! | [`aws`] | AWS credentials and Signature V4 |
//! | [`sqlite_store`] | SQLite-backed vector store |
//! | [`db`] | SQLite connection pool with WAL mode |
//! | [`migrate`] | Database schema migrations (idempotent) |
//!
//! ## Configuration
//!
//! ragline is configured via a TOML file (default: `config/ragline.toml`).
//! See [`config`] for all available options and [`config::load_config`] for
//! validation rules.

pub mod aws;
pub mod config;
pub mod db;
pub mod embedding;
pub mod formats;
pub mod generation;
pub mod ingest;
pub mod jobs;
pub mod migrate;
pub mod object_store;
pub mod pii;
pub mod report;
pub mod retrieval;
pub mod retry;
pub mod service;
pub mod sqlite_store;

pub use ragline_core::{models, store, Error, Result};
pub use service::{RagService, ServiceParts};
