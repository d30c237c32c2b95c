//! Markup formats: Markdown and HTML, stripped to visible text.

use pulldown_cmark::{Event, Options, Parser, Tag, TagEnd};
use scraper::{ElementRef, Html, Node};

use ragline_core::Result;

use super::plain::decode_utf8;
use super::FormatParser;

pub struct MarkdownParser;

impl FormatParser for MarkdownParser {
    fn name(&self) -> &'static str {
        "markdown"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &[".md", ".markdown"]
    }

    fn parse(&self, bytes: &[u8]) -> Result<String> {
        Ok(markdown_to_text(&decode_utf8(bytes)?))
    }
}

/// Render Markdown as plain text. Block elements end with a blank line;
/// inline markup, raw HTML, and link targets are dropped.
pub fn markdown_to_text(content: &str) -> String {
    let parser = Parser::new_ext(content, Options::ENABLE_TABLES | Options::ENABLE_STRIKETHROUGH);
    let mut out = String::new();

    for event in parser {
        match event {
            Event::Text(text) | Event::Code(text) => out.push_str(&text),
            Event::SoftBreak => out.push(' '),
            Event::HardBreak => out.push('\n'),
            Event::Start(Tag::Item) => out.push_str("- "),
            Event::End(TagEnd::Item) | Event::End(TagEnd::TableRow) | Event::End(TagEnd::TableHead) => {
                out.push('\n')
            }
            Event::End(TagEnd::TableCell) => out.push_str(" | "),
            Event::End(TagEnd::Paragraph)
            | Event::End(TagEnd::Heading(_))
            | Event::End(TagEnd::CodeBlock)
            | Event::End(TagEnd::List(_))
            | Event::End(TagEnd::Table) => out.push_str("\n\n"),
            Event::Rule => out.push_str("\n\n"),
            _ => {}
        }
    }

    out
}

pub struct HtmlParser;

impl FormatParser for HtmlParser {
    fn name(&self) -> &'static str {
        "html"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &[".html", ".htm"]
    }

    fn parse(&self, bytes: &[u8]) -> Result<String> {
        Ok(html_to_text(&String::from_utf8_lossy(bytes)))
    }
}

const SKIPPED_ELEMENTS: &[&str] = &[
    "head", "script", "style", "noscript", "template", "svg", "iframe", "object",
];

const BLOCK_ELEMENTS: &[&str] = &[
    "address", "article", "aside", "blockquote", "dd", "div", "dl", "dt", "fieldset",
    "figcaption", "figure", "footer", "form", "h1", "h2", "h3", "h4", "h5", "h6", "header",
    "hr", "main", "nav", "ol", "p", "pre", "section", "table", "ul",
];

/// Visible text of an HTML document with block elements separated by
/// blank lines.
pub fn html_to_text(content: &str) -> String {
    let document = Html::parse_document(content);
    let mut out = String::new();
    walk(document.root_element(), &mut out);
    out
}

fn walk(element: ElementRef<'_>, out: &mut String) {
    let name = element.value().name();
    if SKIPPED_ELEMENTS.contains(&name) {
        return;
    }

    let block = BLOCK_ELEMENTS.contains(&name);
    if block {
        out.push_str("\n\n");
    }

    for child in element.children() {
        if let Some(child_element) = ElementRef::wrap(child) {
            walk(child_element, out);
        } else if let Node::Text(text) = child.value() {
            push_collapsed(out, text);
        }
    }

    match name {
        "br" => out.push('\n'),
        "li" | "tr" => out.push('\n'),
        "td" | "th" => out.push(' '),
        _ => {}
    }
    if block {
        out.push_str("\n\n");
    }
}

/// Append text with HTML whitespace semantics: any run of whitespace,
/// including source newlines, is a single space.
fn push_collapsed(out: &mut String, text: &str) {
    let starts_with_space = text.starts_with(char::is_whitespace);
    let ends_with_space = text.ends_with(char::is_whitespace);
    let words: Vec<&str> = text.split_whitespace().collect();

    if words.is_empty() {
        if !text.is_empty() {
            out.push(' ');
        }
        return;
    }
    if starts_with_space {
        out.push(' ');
    }
    out.push_str(&words.join(" "));
    if ends_with_space {
        out.push(' ');
    }
}
