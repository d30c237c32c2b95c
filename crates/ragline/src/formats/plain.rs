//! Plain text and CSV.

use ragline_core::{Error, Result};

use super::FormatParser;

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];
const UTF16LE_BOM: &[u8] = &[0xFF, 0xFE];
const UTF16BE_BOM: &[u8] = &[0xFE, 0xFF];

/// Decode text bytes: UTF-8 (BOM optional) or BOM-marked UTF-16.
pub(crate) fn decode_utf8(bytes: &[u8]) -> Result<String> {
    if let Some(rest) = bytes.strip_prefix(UTF8_BOM) {
        return utf8(rest);
    }
    if let Some(rest) = bytes.strip_prefix(UTF16LE_BOM) {
        return utf16(rest, u16::from_le_bytes);
    }
    if let Some(rest) = bytes.strip_prefix(UTF16BE_BOM) {
        return utf16(rest, u16::from_be_bytes);
    }
    utf8(bytes)
}

fn utf8(bytes: &[u8]) -> Result<String> {
    String::from_utf8(bytes.to_vec())
        .map_err(|e| Error::ParseFailure(format!("invalid UTF-8 text: {}", e)))
}

fn utf16(bytes: &[u8], unit: fn([u8; 2]) -> u16) -> Result<String> {
    if bytes.len() % 2 != 0 {
        return Err(Error::ParseFailure("truncated UTF-16 text".to_string()));
    }
    let units: Vec<u16> = bytes.chunks_exact(2).map(|p| unit([p[0], p[1]])).collect();
    String::from_utf16(&units).map_err(|e| Error::ParseFailure(format!("invalid UTF-16 text: {}", e)))
}

pub struct PlainTextParser;

impl FormatParser for PlainTextParser {
    fn name(&self) -> &'static str {
        "text"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &[".txt"]
    }

    fn parse(&self, bytes: &[u8]) -> Result<String> {
        decode_utf8(bytes)
    }
}

/// Comma-separated values. The first record is the header; each data row
/// becomes one line of `header: value` pairs so that retrieval sees
/// column names next to their values.
pub struct CsvParser;

impl FormatParser for CsvParser {
    fn name(&self) -> &'static str {
        "csv"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &[".csv"]
    }

    fn parse(&self, bytes: &[u8]) -> Result<String> {
        let content = decode_utf8(bytes)?;
        let mut records = read_records(&content)?.into_iter();

        let header = match records.next() {
            Some(header) => header,
            None => return Ok(String::new()),
        };

        let mut lines = Vec::new();
        for record in records {
            let pairs: Vec<String> = record
                .iter()
                .enumerate()
                .filter(|(_, value)| !value.trim().is_empty())
                .map(|(i, value)| {
                    let name = header
                        .get(i)
                        .map(|h| h.trim().to_string())
                        .filter(|h| !h.is_empty())
                        .unwrap_or_else(|| format!("column {}", i + 1));
                    format!("{}: {}", name, value.trim())
                })
                .collect();
            if !pairs.is_empty() {
                lines.push(pairs.join("; "));
            }
        }

        if lines.is_empty() {
            return Ok(header.join(", "));
        }
        Ok(lines.join("\n"))
    }
}

/// RFC 4180 records: quoted fields may contain commas, newlines, and
/// doubled quotes. Rows may differ in length. Blank lines are skipped.
fn read_records(content: &str) -> Result<Vec<Vec<String>>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(content.as_bytes());

    let mut records = Vec::new();
    for record in reader.records() {
        let record =
            record.map_err(|e| Error::ParseFailure(format!("malformed CSV: {}", e)))?;
        if record.iter().any(|f| !f.is_empty()) {
            records.push(record.iter().map(str::to_string).collect());
        }
    }
    Ok(records)
}
