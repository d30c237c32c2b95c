//! Multi-format text extraction.
//!
//! Each supported file extension maps to one [`FormatParser`] in a
//! [`ParserRegistry`]. Parsers turn raw object bytes into plain text with
//! paragraph boundaries preserved as blank lines; normalization happens
//! afterwards, once, in the ingestion pipeline.
//!
//! # Built-in parsers
//!
//! | Extension | Parser | Module |
//! |-----------|--------|--------|
//! | `.pdf` | [`PdfParser`] | [`office`] |
//! | `.docx` | [`DocxParser`] | [`office`] |
//! | `.doc` | [`LegacyDocParser`] | [`office`] |
//! | `.txt` | [`PlainTextParser`] | [`plain`] |
//! | `.csv` | [`CsvParser`] | [`plain`] |
//! | `.md`, `.markdown` | [`MarkdownParser`] | [`markup`] |
//! | `.html`, `.htm` | [`HtmlParser`] | [`markup`] |

pub mod markup;
pub mod office;
pub mod plain;

use std::collections::HashMap;
use std::sync::Arc;

use ragline_core::{Error, Result};

pub use markup::{HtmlParser, MarkdownParser};
pub use office::{DocxParser, LegacyDocParser, PdfParser};
pub use plain::{CsvParser, PlainTextParser};

/// Extracts plain text from one document format.
///
/// Parsing is CPU-bound and synchronous; the pipeline runs it on a
/// blocking thread.
pub trait FormatParser: Send + Sync {
    fn name(&self) -> &'static str;

    /// Lowercase extensions handled, with leading dot.
    fn extensions(&self) -> &'static [&'static str];

    /// Fails with [`Error::ParseFailure`] on malformed content.
    fn parse(&self, bytes: &[u8]) -> Result<String>;
}

/// Extension-keyed table of parsers.
#[derive(Default, Clone)]
pub struct ParserRegistry {
    parsers: HashMap<String, Arc<dyn FormatParser>>,
}

impl ParserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in parser.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(PdfParser));
        registry.register(Arc::new(DocxParser));
        registry.register(Arc::new(LegacyDocParser));
        registry.register(Arc::new(PlainTextParser));
        registry.register(Arc::new(CsvParser));
        registry.register(Arc::new(MarkdownParser));
        registry.register(Arc::new(HtmlParser));
        registry
    }

    /// Register a parser for all of its extensions, replacing any parser
    /// previously registered for them.
    pub fn register(&mut self, parser: Arc<dyn FormatParser>) {
        for ext in parser.extensions() {
            self.parsers.insert(ext.to_ascii_lowercase(), parser.clone());
        }
    }

    /// Parser for an extension such as `".pdf"` (case-insensitive).
    pub fn get(&self, extension: &str) -> Result<Arc<dyn FormatParser>> {
        self.parsers
            .get(&extension.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| Error::UnsupportedFormat(extension.to_string()))
    }

    /// Sorted list of supported extensions.
    pub fn supported_extensions(&self) -> Vec<String> {
        let mut exts: Vec<String> = self.parsers.keys().cloned().collect();
        exts.sort();
        exts
    }

    pub fn len(&self) -> usize {
        self.parsers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parsers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_extensions() {
        let registry = ParserRegistry::with_builtins();
        assert_eq!(
            registry.supported_extensions(),
            vec![".csv", ".doc", ".docx", ".htm", ".html", ".markdown", ".md", ".pdf", ".txt"]
        );
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let registry = ParserRegistry::with_builtins();
        assert_eq!(registry.get(".PDF").unwrap().name(), "pdf");
        assert_eq!(registry.get(".htm").unwrap().name(), "html");
    }

    #[test]
    fn test_unknown_extension_is_unsupported() {
        let registry = ParserRegistry::with_builtins();
        assert!(matches!(
            registry.get(".exe"),
            Err(Error::UnsupportedFormat(_))
        ));
    }

    struct Shout;

    impl FormatParser for Shout {
        fn name(&self) -> &'static str {
            "shout"
        }
        fn extensions(&self) -> &'static [&'static str] {
            &[".txt"]
        }
        fn parse(&self, bytes: &[u8]) -> Result<String> {
            Ok(String::from_utf8_lossy(bytes).to_uppercase())
        }
    }

    #[test]
    fn test_register_overrides_builtin() {
        let mut registry = ParserRegistry::with_builtins();
        let before = registry.len();
        registry.register(Arc::new(Shout));
        assert_eq!(registry.len(), before);
        assert_eq!(registry.get(".txt").unwrap().parse(b"hi").unwrap(), "HI");
    }
}
