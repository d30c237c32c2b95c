//! Binary office formats: PDF, DOCX, and legacy Word `.doc`.

use std::io::Read;
use std::panic::{catch_unwind, AssertUnwindSafe};

use quick_xml::events::Event;
use ragline_core::{Error, Result};

use super::FormatParser;

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const OLE_MAGIC: &[u8] = &[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

/// Shortest text run kept when scanning a binary Word file.
const MIN_RUN_CHARS: usize = 8;

/// Compound-file stream names and template markers that look like prose.
const OLE_BOILERPLATE: &[&str] = &[
    "Root Entry",
    "WordDocument",
    "SummaryInformation",
    "DocumentSummaryInformation",
    "CompObj",
    "Microsoft Word",
    "Microsoft Office Word",
    "Normal.dot",
    "Word.Document",
    "MSWordDoc",
];

pub struct PdfParser;

impl FormatParser for PdfParser {
    fn name(&self) -> &'static str {
        "pdf"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &[".pdf"]
    }

    fn parse(&self, bytes: &[u8]) -> Result<String> {
        // pdf-extract panics on some malformed inputs.
        match catch_unwind(AssertUnwindSafe(|| pdf_extract::extract_text_from_mem(bytes))) {
            Ok(Ok(text)) => Ok(text),
            Ok(Err(e)) => Err(Error::ParseFailure(format!("PDF extraction failed: {}", e))),
            Err(_) => Err(Error::ParseFailure(
                "PDF extraction failed: malformed document".to_string(),
            )),
        }
    }
}

pub struct DocxParser;

impl FormatParser for DocxParser {
    fn name(&self) -> &'static str {
        "docx"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &[".docx"]
    }

    fn parse(&self, bytes: &[u8]) -> Result<String> {
        extract_docx(bytes)
    }
}

/// Word 97-2003 documents. Files that are really DOCX under a `.doc`
/// name are read as DOCX.
pub struct LegacyDocParser;

impl FormatParser for LegacyDocParser {
    fn name(&self) -> &'static str {
        "doc"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &[".doc"]
    }

    fn parse(&self, bytes: &[u8]) -> Result<String> {
        if bytes.starts_with(ZIP_MAGIC) {
            return extract_docx(bytes);
        }
        if !bytes.starts_with(OLE_MAGIC) {
            return Err(Error::ParseFailure(
                "not a Word document (missing compound file header)".to_string(),
            ));
        }

        let mut runs = scan_utf16_runs(&bytes[OLE_MAGIC.len()..]);
        runs.extend(scan_byte_runs(&bytes[OLE_MAGIC.len()..]));
        if runs.is_empty() {
            return Err(Error::ParseFailure(
                "no text found in Word document".to_string(),
            ));
        }
        Ok(runs.join("\n\n"))
    }
}

fn ooxml_err(e: impl std::fmt::Display) -> Error {
    Error::ParseFailure(format!("OOXML extraction failed: {}", e))
}

fn extract_docx(bytes: &[u8]) -> Result<String> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(ooxml_err)?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|_| ooxml_err("word/document.xml not found"))?;

    let mut doc_xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut doc_xml)
        .map_err(ooxml_err)?;
    if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ooxml_err("word/document.xml exceeds size limit"));
    }

    extract_paragraphs(&doc_xml)
}

/// Collect `w:t` text, one blank-line separated block per `w:p`.
fn extract_paragraphs(xml: &[u8]) -> Result<String> {
    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => out.push_str("\n\n"),
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"tab" => out.push(' '),
                b"br" | b"cr" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Text(te)) if in_text => {
                out.push_str(te.unescape().map_err(ooxml_err)?.as_ref());
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ooxml_err(e)),
            _ => {}
        }
        buf.clear();
    }

    Ok(out)
}

fn is_text_char(c: char) -> bool {
    (c as u32) < 0x2000
        && (c.is_alphanumeric() || c.is_ascii_punctuation() || c == ' ' || c == '\t')
}

/// A run looks like prose if it has two words and is not OLE plumbing.
fn keep_run(run: &str) -> bool {
    let trimmed = run.trim();
    trimmed.chars().count() >= MIN_RUN_CHARS
        && trimmed.contains(' ')
        && trimmed.chars().any(|c| c.is_alphabetic())
        && !OLE_BOILERPLATE.iter().any(|b| trimmed.starts_with(b))
}

fn flush_run(run: &mut String, runs: &mut Vec<String>) {
    if keep_run(run) {
        runs.push(run.trim().to_string());
    }
    run.clear();
}

/// UTF-16LE text runs (Word's unicode piece storage). `\r` is Word's
/// paragraph mark.
fn scan_utf16_runs(bytes: &[u8]) -> Vec<String> {
    let mut runs = Vec::new();
    let mut run = String::new();
    for pair in bytes.chunks_exact(2) {
        let unit = u16::from_le_bytes([pair[0], pair[1]]);
        match char::from_u32(unit as u32) {
            Some('\r') | Some('\n') | Some('\u{0b}') => run.push('\n'),
            Some(c) if is_text_char(c) => run.push(c),
            _ => flush_run(&mut run, &mut runs),
        }
    }
    flush_run(&mut run, &mut runs);
    runs
}

/// Single-byte text runs (Word's compressed cp1252 piece storage).
fn scan_byte_runs(bytes: &[u8]) -> Vec<String> {
    let mut runs = Vec::new();
    let mut run = String::new();
    for &b in bytes {
        match b {
            b'\r' | b'\n' | 0x0b => run.push('\n'),
            0x20..=0x7e | b'\t' => run.push(b as char),
            _ => flush_run(&mut run, &mut runs),
        }
    }
    flush_run(&mut run, &mut runs);
    runs
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn docx_bytes(document_xml: &str) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        writer
            .start_file("word/document.xml", zip::write::SimpleFileOptions::default())
            .unwrap();
        writer.write_all(document_xml.as_bytes()).unwrap();
        writer.finish().unwrap().into_inner()
    }

    const DOCUMENT_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
  <w:body>
    <w:p><w:r><w:t xml:space="preserve">Quarterly </w:t></w:r><w:r><w:t>review &amp; audit</w:t></w:r></w:p>
    <w:p><w:r><w:t>Second</w:t><w:tab/><w:t>paragraph.</w:t></w:r></w:p>
  </w:body>
</w:document>"#;

    fn utf16le(s: &str) -> Vec<u8> {
        s.encode_utf16().flat_map(|u| u.to_le_bytes()).collect()
    }

    #[test]
    fn test_invalid_pdf_returns_parse_failure() {
        let err = PdfParser.parse(b"not a pdf").unwrap_err();
        assert!(matches!(err, Error::ParseFailure(_)));
    }

    #[test]
    fn test_invalid_zip_returns_parse_failure() {
        let err = DocxParser.parse(b"not a zip").unwrap_err();
        assert!(matches!(err, Error::ParseFailure(_)));
    }

    #[test]
    fn test_docx_without_document_xml() {
        let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        writer
            .start_file("other.xml", zip::write::SimpleFileOptions::default())
            .unwrap();
        writer.write_all(b"<x/>").unwrap();
        let bytes = writer.finish().unwrap().into_inner();
        let err = DocxParser.parse(&bytes).unwrap_err();
        assert!(err.to_string().contains("word/document.xml"));
    }

    #[test]
    fn test_docx_paragraphs_and_runs() {
        let text = DocxParser.parse(&docx_bytes(DOCUMENT_XML)).unwrap();
        assert_eq!(text, "Quarterly review & audit\n\nSecond paragraph.\n\n");
    }

    #[test]
    fn test_doc_extension_accepts_docx_content() {
        let text = LegacyDocParser.parse(&docx_bytes(DOCUMENT_XML)).unwrap();
        assert!(text.contains("Quarterly review & audit"));
    }

    #[test]
    fn test_legacy_doc_text_runs() {
        let mut bytes = OLE_MAGIC.to_vec();
        bytes.extend(std::iter::repeat(0u8).take(64));
        bytes.extend(utf16le("Root Entry"));
        bytes.extend([0u8, 0, 0xff, 0xff]);
        bytes.extend(utf16le("The quarterly audit found no issues.\r"));
        bytes.extend([0u8, 0, 0xff, 0xff]);
        bytes.extend(b"Budget approved by the finance board.");
        bytes.extend([0u8, 1, 2, 3]);

        let text = LegacyDocParser.parse(&bytes).unwrap();
        assert!(text.contains("The quarterly audit found no issues."));
        assert!(text.contains("Budget approved by the finance board."));
        assert!(!text.contains("Root Entry"));
    }

    #[test]
    fn test_legacy_doc_rejects_unknown_bytes() {
        let err = LegacyDocParser.parse(b"plain bytes").unwrap_err();
        assert!(matches!(err, Error::ParseFailure(_)));
    }

    #[test]
    fn test_legacy_doc_without_text() {
        let mut bytes = OLE_MAGIC.to_vec();
        bytes.extend([0u8; 128]);
        assert!(LegacyDocParser.parse(&bytes).is_err());
    }
}
