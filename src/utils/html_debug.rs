// src/utils/html_debug.rs
use std::fs;
use std::path::Path;

use regex::Regex;

use crate::utils::error::StorageError;

/// A highlighted span of the document text: byte offsets plus the rule label.
#[derive(Debug, Clone, PartialEq)]
pub struct Highlight {
    pub start: usize,
    pub end: usize,
    pub label: String,
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Renders the document text as a standalone HTML page with rule matches highlighted.
/// Overlapping matches are dropped after the first one in document order.
pub fn render_rule_trace(text: &str, highlights: &[Highlight]) -> String {
    let mut sorted = highlights.to_vec();
    sorted.sort_by_key(|h| (h.start, std::cmp::Reverse(h.end)));

    let mut html = String::from("<!DOCTYPE html>\n<html>\n<head>\n<style>\n");
    html.push_str("body { font-family: monospace; white-space: pre-wrap; }\n");
    html.push_str(".rule { background-color: #90EE90; }\n");
    html.push_str(".rule-labeled { background-color: #ADD8E6; }\n");
    html.push_str(".rule-block { background-color: #FFFF00; }\n");
    html.push_str("</style>\n</head>\n<body>\n");

    let mut last_pos = 0;
    for highlight in sorted {
        if highlight.start < last_pos || highlight.end > text.len() || highlight.start >= highlight.end {
            continue;
        }
        html.push_str(&escape(&text[last_pos..highlight.start]));

        let css_class = if highlight.label.starts_with("block") {
            "rule-block"
        } else if highlight.label.contains(".labeled") {
            "rule-labeled"
        } else {
            "rule"
        };
        html.push_str(&format!(
            "<span class=\"{}\" title=\"{} [{}-{}]\">",
            css_class,
            escape(&highlight.label),
            highlight.start,
            highlight.end
        ));
        html.push_str(&escape(&text[highlight.start..highlight.end]));
        html.push_str("</span>");
        last_pos = highlight.end;
    }
    if last_pos < text.len() {
        html.push_str(&escape(&text[last_pos..]));
    }

    html.push_str("\n</body>\n</html>");
    html
}

/// Finds every match of each `(pattern, label)` pair in the text.
/// Patterns that fail to compile are skipped with a warning.
pub fn collect_highlights(text: &str, patterns: &[(String, String)]) -> Vec<Highlight> {
    let mut highlights = Vec::new();
    for (pattern, label) in patterns {
        let re = match Regex::new(pattern) {
            Ok(re) => re,
            Err(e) => {
                tracing::warn!("Skipping debug pattern '{}': {}", pattern, e);
                continue;
            }
        };
        for mat in re.find_iter(text) {
            if mat.start() == mat.end() {
                continue;
            }
            highlights.push(Highlight {
                start: mat.start(),
                end: mat.end(),
                label: label.clone(),
            });
        }
    }
    highlights
}

/// Writes an annotated copy of the document text showing where each extraction rule matched.
pub fn write_rule_trace(
    text: &str,
    path: &Path,
    patterns: &[(String, String)],
) -> Result<(), StorageError> {
    let highlights = collect_highlights(text, patterns);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, render_rule_trace(text, &highlights))?;
    tracing::info!(
        "Saved rule trace with {} highlights to {}",
        highlights.len(),
        path.display()
    );
    Ok(())
}
