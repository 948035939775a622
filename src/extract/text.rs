//! Text extractor: paragraph-shaped blocks from `.txt`/`.text`/`.log`/
//! `.readme` files (and extensionless files that decode as UTF-8 in the
//! first kilobyte). Grounded on `filters/text_filter.py` and §4.4.

use std::collections::HashMap;
use std::path::Path;
use std::time::Instant;

use chrono::Utc;
use regex::Regex;
use std::sync::OnceLock;

use crate::error::IngestError;
use crate::ids::{block_id, file_hash};
use crate::model::{Block, BlockKind, FileStructure, Span};

const RECOGNIZED_EXTENSIONS: &[&str] = &["txt", "text", "log", "readme"];
const MIN_PARAGRAPH_LENGTH: usize = 20;

pub struct TextExtractor;

impl TextExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl Default for TextExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl super::BlockExtractor for TextExtractor {
    fn name(&self) -> &'static str {
        "text_filter"
    }

    fn version(&self) -> &'static str {
        "1.0.0"
    }

    fn can_process(&self, path: &Path) -> bool {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("").to_ascii_lowercase();
        if RECOGNIZED_EXTENSIONS.contains(&ext.as_str()) {
            return true;
        }
        ext.is_empty()
    }

    fn parse(&self, path: &Path, content: Option<&str>, bytes: &[u8]) -> Result<FileStructure, IngestError> {
        let started = Instant::now();
        let owned;
        let content = match content {
            Some(c) => c,
            None => {
                owned = decode_with_fallback(bytes);
                &owned
            }
        };

        let blocks = extract_blocks(content);
        let total_characters = blocks.iter().map(|b| b.content.chars().count()).sum();

        Ok(FileStructure {
            file_path: path.display().to_string(),
            file_size: bytes.len() as u64,
            file_hash: file_hash(bytes),
            modified_at: Utc::now(),
            blocks,
            language: None,
            encoding: "utf-8".to_string(),
            filter_name: self.name().to_string(),
            filter_version: self.version().to_string(),
            parsed_at: Utc::now(),
            processing_time: started.elapsed().as_secs_f64(),
            total_characters,
        })
    }
}

/// Fallback decode order per §6: `latin-1, cp1252, iso-8859-1, replace`.
/// `String::from_utf8_lossy` covers the terminal "replace" case; the
/// intermediate single-byte encodings are all supersets of ASCII that map
/// byte-for-byte to the first 256 Unicode scalars, which is what a lossy
/// Latin-1 decode does.
pub(crate) fn decode_with_fallback(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}

fn blank_line_separator() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n\s*\n+").unwrap())
}

fn underline_heading() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(=+|-+)$").unwrap())
}

fn extract_blocks(content: &str) -> Vec<Block> {
    let paragraphs = split_into_paragraphs(content);
    let mut blocks = Vec::new();
    let mut search_from = 0usize;

    for paragraph in paragraphs {
        let trimmed = paragraph.trim();
        if trimmed.is_empty() {
            continue;
        }
        if !should_include_paragraph(trimmed) {
            continue;
        }

        let start_offset = match content[search_from..].find(&paragraph) {
            Some(pos) => search_from + pos,
            None => search_from,
        };
        let end_offset = start_offset + paragraph.len();
        search_from = end_offset;

        let start_line = content[..start_offset].matches('\n').count();
        let end_line = content[..end_offset].matches('\n').count();

        let kind = classify_paragraph(trimmed);
        let importance = calculate_importance(trimmed);
        let level = if let BlockKind::Heading { level } = kind {
            level
        } else {
            0
        };

        blocks.push(Block {
            block_id: block_id(&kind, trimmed, start_line, start_offset),
            content: trimmed.to_string(),
            kind,
            language: None,
            span: Span {
                start_line,
                end_line,
                start_offset,
                end_offset,
            },
            level,
            parent_id: None,
            title: None,
            metadata: HashMap::new(),
            tags: Vec::new(),
            complexity_score: 0.0,
            importance_score: importance,
        });
    }

    blocks
}

fn split_into_paragraphs(content: &str) -> Vec<String> {
    blank_line_separator()
        .split(content)
        .map(|s| s.to_string())
        .filter(|s| !s.trim().is_empty())
        .collect()
}

/// §4.4: include if `len >= min_paragraph_length`; keep overlong
/// paragraphs (split later); reject paragraphs whose alphanumeric density
/// is < 50% of the minimum.
fn should_include_paragraph(paragraph: &str) -> bool {
    if paragraph.len() < MIN_PARAGRAPH_LENGTH {
        return false;
    }
    let alnum = paragraph.chars().filter(|c| c.is_alphanumeric()).count();
    let density = alnum as f64 / paragraph.len().max(1) as f64;
    density >= 0.5
}

fn classify_paragraph(paragraph: &str) -> BlockKind {
    let first_line = paragraph.lines().next().unwrap_or(paragraph);

    if is_list_item(first_line) {
        return BlockKind::ListItem;
    }
    if paragraph.starts_with('>') || paragraph.starts_with('"') {
        return BlockKind::Quote;
    }
    if underline_heading_level(paragraph).is_some() {
        return BlockKind::Heading {
            level: underline_heading_level(paragraph).unwrap(),
        };
    }
    if is_all_caps_heading(paragraph) {
        return BlockKind::Heading { level: 1 };
    }
    if is_title_like(paragraph) {
        return BlockKind::Title;
    }
    BlockKind::Paragraph
}

fn is_list_item(line: &str) -> bool {
    let trimmed = line.trim_start();
    if let Some(rest) = trimmed.strip_prefix(['*', '-', '+']) {
        return rest.starts_with(' ');
    }
    let digits: String = trimmed.chars().take_while(|c| c.is_ascii_digit()).collect();
    !digits.is_empty() && trimmed[digits.len()..].starts_with(". ")
}

/// Underlined lines: `===` -> level 1, `---` -> level 2.
fn underline_heading_level(paragraph: &str) -> Option<u32> {
    let lines: Vec<&str> = paragraph.lines().collect();
    if lines.len() < 2 {
        return None;
    }
    let underline = lines[1].trim();
    if !underline_heading().is_match(underline) {
        return None;
    }
    if underline.starts_with('=') {
        Some(1)
    } else {
        Some(2)
    }
}

fn is_all_caps_heading(paragraph: &str) -> bool {
    paragraph.len() > 5
        && paragraph.len() < 100
        && paragraph.chars().filter(|c| c.is_alphabetic()).all(|c| c.is_uppercase())
        && paragraph.chars().any(|c| c.is_alphabetic())
}

fn is_title_like(paragraph: &str) -> bool {
    let words: Vec<&str> = paragraph.split_whitespace().collect();
    if words.len() > 10 || paragraph.len() >= 100 || paragraph.ends_with('.') {
        return false;
    }
    words.iter().all(|w| {
        w.chars()
            .next()
            .map(|c| c.is_uppercase() || !c.is_alphabetic())
            .unwrap_or(true)
    })
}

/// §4.4: seeded at 0.5, boosts for length, `?`/`!`, and keywords, capped
/// at 1.0.
fn calculate_importance(paragraph: &str) -> f64 {
    let mut score: f64 = 0.5;
    let length_factor = (paragraph.len() as f64 / 500.0).min(1.0);
    score += length_factor * 0.2;
    if paragraph.contains('?') {
        score += 0.1;
    }
    if paragraph.contains('!') {
        score += 0.05;
    }
    let keywords = ["important", "note", "warning", "attention", "todo", "fixme"];
    let lower = paragraph.to_ascii_lowercase();
    if keywords.iter().any(|k| lower.contains(k)) {
        score += 0.15;
    }
    score.min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::BlockExtractor;

    #[test]
    fn splits_paragraphs_on_blank_lines() {
        let content = "This is a fairly long opening paragraph about something.\n\nAnd a second one that is also long enough to pass the filter.\n";
        let blocks = extract_blocks(content);
        assert_eq!(blocks.len(), 2);
    }

    #[test]
    fn short_paragraphs_are_rejected() {
        let content = "short\n";
        let blocks = extract_blocks(content);
        assert!(blocks.is_empty());
    }

    #[test]
    fn underlined_text_is_classified_as_heading() {
        let paragraph = "Title Of Section\n================";
        assert_eq!(classify_paragraph(paragraph), BlockKind::Heading { level: 1 });
    }

    #[test]
    fn question_boosts_importance() {
        let plain = calculate_importance("A reasonably long paragraph without punctuation marks at all here.");
        let question = calculate_importance("A reasonably long paragraph with a question mark at the end here?");
        assert!(question > plain);
    }

    #[test]
    fn can_process_matches_recognized_extensions_and_extensionless() {
        let extractor = TextExtractor::new();
        assert!(extractor.can_process(Path::new("notes.txt")));
        assert!(extractor.can_process(Path::new("README")));
        assert!(!extractor.can_process(Path::new("main.py")));
    }
}
