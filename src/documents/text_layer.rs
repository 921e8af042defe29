// src/documents/text_layer.rs
//! Physical inspection and text-layer decoding for the three container formats
//! that carry their own text (PDF, HTML, plain text). Images never do.

use lopdf::{Document, Object};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{node::Node, ElementRef, Html, Selector};

use crate::documents::models::{DocumentFormat, PhysicalProperties};
use crate::utils::error::TextLayerError;

// --- Byte-level fallbacks for PDFs lopdf refuses to load ---
static PDF_PAGE_RE: Lazy<regex::bytes::Regex> = Lazy::new(|| {
    regex::bytes::Regex::new(r"/Type\s*/Page\b").expect("Failed to compile PDF_PAGE_RE")
});

static PDF_PRODUCER_RE: Lazy<regex::bytes::Regex> = Lazy::new(|| {
    regex::bytes::Regex::new(r"/Producer\s*\(([^)]{1,200})\)").expect("Failed to compile PDF_PRODUCER_RE")
});

static HTML_PAGE_BREAK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)page-break-(?:before|after)\s*:\s*always").expect("Failed to compile HTML_PAGE_BREAK_RE")
});

static META_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("meta[name]").expect("Failed to compile META_SELECTOR")
});

const BLOCK_TAGS: &[&str] = &[
    "address", "article", "blockquote", "br", "div", "footer", "h1", "h2", "h3", "h4", "h5", "h6",
    "header", "hr", "li", "ol", "p", "pre", "section", "table", "tbody", "thead", "tr", "ul",
];

const SKIPPED_TAGS: &[&str] = &["head", "noscript", "script", "style", "title"];

/// Sniffs the container format from the leading bytes.
pub fn detect_format(bytes: &[u8]) -> DocumentFormat {
    let head = &bytes[..bytes.len().min(1024)];

    if head.windows(5).any(|w| w == b"%PDF-") {
        return DocumentFormat::Pdf;
    }
    if head.starts_with(b"\x89PNG")
        || head.starts_with(b"\xFF\xD8\xFF")
        || head.starts_with(b"II*\0")
        || head.starts_with(b"MM\0*")
    {
        return DocumentFormat::Image;
    }

    match std::str::from_utf8(bytes) {
        Ok(text) => {
            let head = text.get(..text.len().min(512)).unwrap_or(text);
            let lowered = head.to_ascii_lowercase();
            if lowered.contains("<html") || lowered.contains("<!doctype html") {
                DocumentFormat::Html
            } else {
                DocumentFormat::PlainText
            }
        }
        // Unknown binary payloads can only be read by OCR.
        Err(_) => DocumentFormat::Image,
    }
}

/// Inspects the document once: physical properties plus the decoded text layer (if any).
///
/// `has_text_layer` requires at least `min_text_chars` non-whitespace characters;
/// a thinner layer is still returned so a direct-text attempt can try it.
pub fn analyze(bytes: &[u8], min_text_chars: usize) -> (PhysicalProperties, Result<String, TextLayerError>) {
    let format = detect_format(bytes);
    let byte_size = bytes.len() as u64;

    let (page_count, is_encrypted, producer_tool, text) = match format {
        DocumentFormat::Pdf => analyze_pdf(bytes),
        DocumentFormat::Html => {
            let html = String::from_utf8_lossy(bytes);
            let pages = HTML_PAGE_BREAK_RE.find_iter(&html).count() as u32 + 1;
            let (producer, text) = html_text(&html);
            (pages, false, producer, non_empty(text))
        }
        DocumentFormat::PlainText => {
            let text = String::from_utf8_lossy(bytes);
            let pages = text.matches('\x0c').count() as u32 + 1;
            (pages, false, None, non_empty(text.replace('\x0c', "\n")))
        }
        DocumentFormat::Image => (1, false, None, Err(TextLayerError::NoTextLayer)),
    };

    let has_text_layer = match &text {
        Ok(t) => t.chars().filter(|c| !c.is_whitespace()).count() >= min_text_chars,
        Err(_) => false,
    };

    let properties = PhysicalProperties {
        format,
        page_count,
        byte_size,
        has_text_layer,
        is_encrypted,
        producer_tool,
    };
    tracing::debug!(
        "Inspected document: {:?}, {} pages, {} bytes, text layer: {}, encrypted: {}",
        properties.format,
        properties.page_count,
        properties.byte_size,
        properties.has_text_layer,
        properties.is_encrypted
    );
    (properties, text)
}

/// Decodes the document's own text layer.
pub fn read_text(bytes: &[u8]) -> Result<String, TextLayerError> {
    analyze(bytes, 0).1
}

fn non_empty(text: String) -> Result<String, TextLayerError> {
    if text.trim().is_empty() {
        Err(TextLayerError::NoTextLayer)
    } else {
        Ok(text)
    }
}

type PdfAnalysis = (u32, bool, Option<String>, Result<String, TextLayerError>);

fn analyze_pdf(bytes: &[u8]) -> PdfAnalysis {
    let doc = match Document::load_mem(bytes) {
        Ok(doc) => doc,
        Err(e) => {
            tracing::debug!("lopdf could not load document ({}), falling back to byte scan", e);
            let encrypted = bytes.windows(8).any(|w| w == b"/Encrypt");
            let pages = PDF_PAGE_RE.find_iter(bytes).count() as u32;
            let producer = PDF_PRODUCER_RE
                .captures(bytes)
                .and_then(|c| c.get(1))
                .map(|m| String::from_utf8_lossy(m.as_bytes()).trim().to_string());
            let text = if encrypted {
                Err(TextLayerError::Encrypted)
            } else {
                Err(TextLayerError::Pdf(e.to_string()))
            };
            return (pages, encrypted, producer, text);
        }
    };

    let encrypted = doc.is_encrypted();
    let page_numbers: Vec<u32> = doc.get_pages().keys().copied().collect();
    let producer = pdf_producer(&doc);

    let text = if encrypted {
        Err(TextLayerError::Encrypted)
    } else {
        doc.extract_text(&page_numbers)
            .map_err(|e| TextLayerError::Pdf(e.to_string()))
            .and_then(non_empty)
    };

    (page_numbers.len() as u32, encrypted, producer, text)
}

fn pdf_producer(doc: &Document) -> Option<String> {
    let info = match doc.trailer.get(b"Info").ok()? {
        Object::Reference(id) => doc.get_dictionary(*id).ok()?,
        Object::Dictionary(dict) => dict,
        _ => return None,
    };
    let raw = info.get(b"Producer").ok()?.as_str().ok()?;
    let producer = decode_pdf_string(raw);
    let producer = producer.trim();
    (!producer.is_empty()).then(|| producer.to_string())
}

/// PDF text strings are either PDFDocEncoding (treated as Latin-1 here) or UTF-16BE with a BOM.
fn decode_pdf_string(raw: &[u8]) -> String {
    if raw.starts_with(&[0xFE, 0xFF]) {
        let units: Vec<u16> = raw[2..]
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        String::from_utf16_lossy(&units)
    } else {
        raw.iter().map(|&b| b as char).collect()
    }
}

/// Flattens an HTML filing into lines: block elements break lines, table cells on one
/// row are joined with two spaces. Returns the generator meta tag as producer.
fn html_text(html: &str) -> (Option<String>, String) {
    let document = Html::parse_document(html);

    let producer = document
        .select(&META_SELECTOR)
        .find(|meta| {
            meta.value()
                .attr("name")
                .map(|name| name.eq_ignore_ascii_case("generator"))
                .unwrap_or(false)
        })
        .and_then(|meta| meta.value().attr("content"))
        .map(|content| content.trim().to_string())
        .filter(|content| !content.is_empty());

    let mut raw = String::new();
    walk(document.root_element(), &mut raw);

    let text = raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n");
    (producer, text)
}

fn walk(element: ElementRef<'_>, out: &mut String) {
    let name = element.value().name();
    if SKIPPED_TAGS.contains(&name) {
        return;
    }

    let is_block = BLOCK_TAGS.contains(&name);
    if is_block {
        out.push('\n');
    }
    if (name == "td" || name == "th") && !out.is_empty() && !out.ends_with('\n') {
        out.push_str("  ");
    }

    for child in element.children() {
        if let Some(child_element) = ElementRef::wrap(child) {
            walk(child_element, out);
        } else if let Node::Text(text_node) = child.value() {
            push_text(out, &text_node.text);
        }
    }

    if is_block {
        out.push('\n');
    }
}

fn push_text(out: &mut String, raw: &str) {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        return;
    }
    let starts_with_space = raw.starts_with(char::is_whitespace);
    if starts_with_space && !out.is_empty() && !out.ends_with('\n') && !out.ends_with(' ') {
        out.push(' ');
    }
    out.push_str(&collapsed);
    if raw.ends_with(char::is_whitespace) {
        out.push(' ');
    }
}
