//! # ragline core
//!
//! Runtime-agnostic logic for ragline: data models, the error taxonomy,
//! text normalization and chunking, redaction policy, vector math, prompt
//! assembly, and the capability traits (vector store, embedder, PII
//! detector, generator, object store) the application wires together.
//!
//! This crate contains no tokio, sqlx, HTTP, or filesystem I/O.

pub mod chunk;
pub mod embedding;
pub mod error;
pub mod models;
pub mod prompt;
pub mod redact;
pub mod source;
pub mod store;

pub use error::{Error, Result};
