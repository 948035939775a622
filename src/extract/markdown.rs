//! Markdown extractor: headings, lists, block-quotes, fenced code, tables.
//! Heading level carries into `Block.level`; link/image occurrences attach
//! into `metadata`.

use std::collections::HashMap;
use std::path::Path;
use std::time::Instant;

use chrono::Utc;
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

use crate::error::IngestError;
use crate::ids::{block_id, file_hash};
use crate::model::{Block, BlockKind, FileStructure, Span};

use super::text::decode_with_fallback;

pub struct MarkdownExtractor;

impl MarkdownExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl Default for MarkdownExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl super::BlockExtractor for MarkdownExtractor {
    fn name(&self) -> &'static str {
        "markdown_filter"
    }

    fn version(&self) -> &'static str {
        "1.0.0"
    }

    fn can_process(&self, path: &Path) -> bool {
        matches!(
            path.extension().and_then(|e| e.to_str()).map(|s| s.to_ascii_lowercase()).as_deref(),
            Some("md") | Some("markdown")
        )
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

fn heading_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(#{1,6})\s+(.*)$").unwrap())
}

fn list_item_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*([\*\-\+]|\d+\.)\s+").unwrap())
}

fn link_or_image_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(!?)\[([^\]]*)\]\(([^)]+)\)").unwrap())
}

fn table_row_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*\|.*\|\s*$").unwrap())
}

fn extract_blocks(content: &str) -> Vec<Block> {
    let lines: Vec<&str> = content.lines().collect();
    let mut blocks = Vec::new();
    let mut offsets = Vec::with_capacity(lines.len() + 1);
    let mut acc = 0usize;
    for line in &lines {
        offsets.push(acc);
        acc += line.len() + 1;
    }
    offsets.push(acc);

    let mut i = 0usize;
    while i < lines.len() {
        let line = lines[i];
        let trimmed = line.trim();

        if trimmed.is_empty() {
            i += 1;
            continue;
        }

        if let Some(caps) = heading_re().captures(trimmed) {
            let level = caps[1].len() as u32;
            let title = caps[2].trim().to_string();
            push_block(
                &mut blocks,
                BlockKind::Heading { level },
                title.clone(),
                Some(title),
                i,
                i,
                offsets[i],
                offsets[i + 1],
                level,
            );
            i += 1;
            continue;
        }

        if trimmed.starts_with("```") {
            let lang = trimmed.trim_start_matches('`').trim();
            let language = if lang.is_empty() { None } else { Some(lang.to_string()) };
            let start = i;
            i += 1;
            while i < lines.len() && !lines[i].trim_start().starts_with("```") {
                i += 1;
            }
            let end = i.min(lines.len().saturating_sub(1));
            let content_block = lines[start..=end.min(lines.len() - 1)].join("\n");
            push_block(
                &mut blocks,
                BlockKind::CodeBlock { language },
                content_block,
                None,
                start,
                end,
                offsets[start],
                offsets[(end + 1).min(lines.len())],
                0,
            );
            i += 1;
            continue;
        }

        if trimmed.starts_with('>') {
            let start = i;
            let mut buf = Vec::new();
            while i < lines.len() && lines[i].trim_start().starts_with('>') {
                buf.push(lines[i]);
                i += 1;
            }
            let end = i - 1;
            push_block(
                &mut blocks,
                BlockKind::Quote,
                buf.join("\n"),
                None,
                start,
                end,
                offsets[start],
                offsets[(end + 1).min(lines.len())],
                0,
            );
            continue;
        }

        if list_item_re().is_match(line) {
            let start = i;
            let mut buf = Vec::new();
            while i < lines.len() && (list_item_re().is_match(lines[i]) || lines[i].starts_with(' ')) && !lines[i].trim().is_empty() {
                buf.push(lines[i]);
                i += 1;
            }
            let end = (i - 1).max(start);
            push_block(
                &mut blocks,
                BlockKind::ListItem,
                buf.join("\n"),
                None,
                start,
                end,
                offsets[start],
                offsets[(end + 1).min(lines.len())],
                0,
            );
            continue;
        }

        if table_row_re().is_match(line) {
            let start = i;
            let mut buf = Vec::new();
            while i < lines.len() && table_row_re().is_match(lines[i]) {
                buf.push(lines[i]);
                i += 1;
            }
            let end = i - 1;
            push_block(
                &mut blocks,
                BlockKind::Table,
                buf.join("\n"),
                None,
                start,
                end,
                offsets[start],
                offsets[(end + 1).min(lines.len())],
                0,
            );
            continue;
        }

        // Plain paragraph: accumulate until a blank line or a structural marker.
        let start = i;
        let mut buf = Vec::new();
        while i < lines.len()
            && !lines[i].trim().is_empty()
            && !heading_re().is_match(lines[i].trim())
            && !lines[i].trim_start().starts_with("```")
        {
            buf.push(lines[i]);
            i += 1;
        }
        let end = (i - 1).max(start);
        push_block(
            &mut blocks,
            BlockKind::Paragraph,
            buf.join("\n"),
            None,
            start,
            end,
            offsets[start],
            offsets[(end + 1).min(lines.len())],
            0,
        );
    }

    blocks
}

#[allow(clippy::too_many_arguments)]
fn push_block(
    blocks: &mut Vec<Block>,
    kind: BlockKind,
    content: String,
    title: Option<String>,
    start_line: usize,
    end_line: usize,
    start_offset: usize,
    end_offset: usize,
    level: u32,
) {
    if content.trim().is_empty() {
        return;
    }

    let mut metadata = HashMap::new();
    let links: Vec<Value> = link_or_image_re()
        .captures_iter(&content)
        .map(|c| {
            serde_json::json!({
                "is_image": &c[1] == "!",
                "text": &c[2],
                "target": &c[3],
            })
        })
        .collect();
    if !links.is_empty() {
        metadata.insert("links".to_string(), Value::Array(links));
    }

    let id = block_id(&kind, &content, start_line, start_offset);
    blocks.push(Block {
        block_id: id,
        content,
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
        title,
        metadata,
        tags: Vec::new(),
        complexity_score: 0.0,
        importance_score: 0.5,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::BlockExtractor;

    #[test]
    fn scenario_one_markdown_single_file() {
        // "# Title\n\nHello world.\n\n## Sub\n\nAlpha beta.\n"
        let content = "# Title\n\nHello world.\n\n## Sub\n\nAlpha beta.\n";
        let blocks = extract_blocks(content);
        assert_eq!(blocks.len(), 4);
        assert_eq!(blocks[0].kind, BlockKind::Heading { level: 1 });
        assert_eq!(blocks[0].title.as_deref(), Some("Title"));
        assert_eq!(blocks[1].kind, BlockKind::Paragraph);
        assert_eq!(blocks[1].content, "Hello world.");
        assert_eq!(blocks[2].kind, BlockKind::Heading { level: 2 });
        assert_eq!(blocks[3].content, "Alpha beta.");
    }

    #[test]
    fn fenced_code_block_captures_language() {
        let content = "```rust\nfn main() {}\n```\n";
        let blocks = extract_blocks(content);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].kind, BlockKind::CodeBlock { language: Some("rust".to_string()) });
    }

    #[test]
    fn links_and_images_attach_to_metadata() {
        let content = "See [docs](https://example.com) and ![logo](logo.png) for details, please.\n";
        let blocks = extract_blocks(content);
        assert_eq!(blocks.len(), 1);
        assert!(blocks[0].metadata.contains_key("links"));
    }

    #[test]
    fn can_process_matches_md_extension() {
        let extractor = MarkdownExtractor::new();
        assert!(extractor.can_process(Path::new("README.md")));
        assert!(!extractor.can_process(Path::new("README.txt")));
    }
}
