// src/extractors/blocks.rs
//! Repeated-block matcher for variable-length tables (transaction lines, holdings).
//!
//! Rows are located structurally: the table region runs from the line after a
//! header match to the first end-marker line, each line matching the anchor
//! pattern opens a block, and the lines that follow are attached to it as
//! continuations. The same field rules then run on every block on its own, so a
//! malformed row never stops the rows after it.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::extractors::rules::FieldRules;
use crate::extractors::{FieldValue, SubRecord};

const EXCERPT_CHARS: usize = 120;

/// A repeated block that yielded none of its required fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockError {
    pub kind: String,
    /// Position of the block among all located blocks.
    pub index: usize,
    /// First line of the block in the document text, zero-based.
    pub line: usize,
    pub reason: String,
    pub excerpt: String,
}

/// A located block: its text and where it starts.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub index: usize,
    pub line: usize,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct BlockMatcher {
    pub kind: &'static str,
    pub table_start: Regex,
    pub table_end: Regex,
    pub anchor: Regex,
    /// Join an unlabeled line sitting directly above an anchor line onto that row
    /// (asset names wrapped by the form renderer). Never applies above the first row.
    pub merge_wrapped_prefix: bool,
    pub fields: Vec<FieldRules>,
}

impl BlockMatcher {
    pub fn locate(&self, text: &str) -> Vec<Block> {
        let lines: Vec<&str> = text.lines().collect();
        let Some(header) = lines.iter().position(|line| self.table_start.is_match(line.trim())) else {
            return Vec::new();
        };

        let region: Vec<(usize, &str)> = lines
            .iter()
            .enumerate()
            .skip(header + 1)
            .map(|(n, line)| (n, line.trim()))
            .take_while(|(_, line)| !self.table_end.is_match(line))
            .filter(|(_, line)| !line.is_empty())
            .collect();

        let mut blocks: Vec<Block> = Vec::new();
        let mut pending_prefix: Option<(usize, &str)> = None;

        for (pos, &(line_no, line)) in region.iter().enumerate() {
            if self.anchor.is_match(line) {
                let (start, text) = match pending_prefix.take() {
                    Some((prefix_line, prefix)) => (prefix_line, format!("{} {}", prefix, line)),
                    None => (line_no, line.to_string()),
                };
                blocks.push(Block {
                    index: blocks.len(),
                    line: start,
                    text,
                });
                continue;
            }

            let next_is_anchor = region
                .get(pos + 1)
                .map(|(_, next)| self.anchor.is_match(next))
                .unwrap_or(false);
            if self.merge_wrapped_prefix && next_is_anchor && !blocks.is_empty() && !line.contains(':') {
                pending_prefix = Some((line_no, line));
                continue;
            }

            match blocks.last_mut() {
                Some(block) => {
                    block.text.push('\n');
                    block.text.push_str(line);
                }
                // Column headings and notes above the first row.
                None => tracing::trace!("Skipping {} table line before first row: '{}'", self.kind, line),
            }
        }

        blocks
    }

    /// Applies the field rules to every located block.
    pub fn extract(&self, text: &str, required: &[&str]) -> (Vec<SubRecord>, Vec<BlockError>) {
        let mut records = Vec::new();
        let mut errors = Vec::new();

        for block in self.locate(text) {
            let fields: Vec<FieldValue> = self
                .fields
                .iter()
                .filter_map(|rules| rules.apply(&block.text))
                .collect();

            let has_required = fields
                .iter()
                .any(|f| required.contains(&f.field_name.as_str()));
            if !has_required {
                tracing::debug!(
                    "Malformed {} block {} at line {}: no required field matched",
                    self.kind,
                    block.index,
                    block.line
                );
                errors.push(BlockError {
                    kind: self.kind.to_string(),
                    index: block.index,
                    line: block.line,
                    reason: format!("none of the required fields {:?} matched", required),
                    excerpt: block.text.chars().take(EXCERPT_CHARS).collect(),
                });
                continue;
            }

            records.push(SubRecord {
                kind: self.kind.to_string(),
                index: block.index,
                fields,
            });
        }

        (records, errors)
    }
}
