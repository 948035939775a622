//! C5 Chunker: converts a `FileStructure`'s blocks into size-bounded
//! `Chunk`s suitable for vector storage. Grounded in full on
//! `pipeline/chunker.py`'s `TextBlockChunker`.

use std::collections::HashMap;
use std::sync::OnceLock;

use chrono::Utc;
use regex::Regex;
use serde_json::{json, Value};

use crate::config::ChunkerConfig;
use crate::extract::is_draft_file;
use crate::ids::chunk_id;
use crate::model::{Block, BlockKind, Chunk, ChunkStatus, ChunkType, FileStructure};

pub struct Chunker {
    config: ChunkerConfig,
}

/// Snaps a byte offset down to the nearest char boundary so slicing never
/// faults on multibyte UTF-8 content. Equi-stride split points and
/// truncation offsets are plain arithmetic over `max_chunk_size`/`overlap_size`
/// byte counts and have no a-priori relationship to codepoint boundaries.
fn floor_char_boundary(content: &str, idx: usize) -> usize {
    if idx >= content.len() {
        return content.len();
    }
    let mut i = idx;
    while i > 0 && !content.is_char_boundary(i) {
        i -= 1;
    }
    i
}

impl Chunker {
    pub fn new(config: ChunkerConfig) -> Self {
        Self { config }
    }

    /// `ChunkFileStructure(structure) -> Vec<Chunk>`.
    pub fn chunk_file_structure(&self, structure: &FileStructure) -> Vec<Chunk> {
        let filtered = self.filter_blocks(&structure.blocks);

        let mut chunks = if self.config.preserve_structure {
            self.chunk_with_structure(&filtered, structure)
        } else {
            self.chunk_by_size(&filtered, structure)
        };

        self.post_process(&mut chunks, structure);
        chunks
    }

    fn filter_blocks<'a>(&self, blocks: &'a [Block]) -> Vec<&'a Block> {
        blocks
            .iter()
            .filter(|b| b.importance_score >= self.config.min_importance_score)
            .filter(|b| b.complexity_score >= self.config.min_complexity_score)
            .filter(|b| b.content.len() >= self.config.min_chunk_size || b.importance_score >= 0.7)
            .collect()
    }

    fn chunk_with_structure(&self, blocks: &[&Block], structure: &FileStructure) -> Vec<Chunk> {
        let mut chunks = Vec::new();

        for block in blocks {
            if block.content.len() <= self.config.max_chunk_size {
                chunks.push(self.create_chunk_from_block(block, structure, false));
            } else if self.config.split_large_blocks {
                chunks.extend(self.split_large_block(block, structure));
            } else {
                chunks.push(self.create_chunk_from_block(block, structure, true));
            }
        }

        if self.config.merge_small_blocks {
            chunks = self.merge_small_chunks(chunks);
        }

        chunks
    }

    fn chunk_by_size(&self, blocks: &[&Block], structure: &FileStructure) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        let mut accumulated: Vec<&Block> = Vec::new();
        let mut accumulated_size = 0usize;

        for block in blocks {
            let size = block.content.len();
            if accumulated_size + size > self.config.max_chunk_size && !accumulated.is_empty() {
                chunks.push(self.create_chunk_from_blocks(&accumulated, structure));
                accumulated.clear();
                accumulated_size = 0;
            }
            accumulated.push(block);
            accumulated_size += size;
        }

        if !accumulated.is_empty() {
            chunks.push(self.create_chunk_from_blocks(&accumulated, structure));
        }

        chunks
    }

    fn split_large_block(&self, block: &Block, structure: &FileStructure) -> Vec<Chunk> {
        let content = &block.content;
        let mut split_points = self.find_split_points(content, &block.kind);

        if split_points.is_empty() {
            let mut pos = self.config.max_chunk_size;
            let stride = self.config.max_chunk_size.saturating_sub(self.config.overlap_size).max(1);
            while pos < content.len() {
                split_points.push(floor_char_boundary(content, pos));
                pos += stride;
            }
        }

        let mut chunks = Vec::new();
        let mut start = 0usize;
        for (i, split_point) in split_points.iter().enumerate() {
            let end = floor_char_boundary(content, (split_point + self.config.overlap_size).min(content.len()));
            let piece = &content[start..end];
            chunks.push(self.build_chunk(
                piece,
                block,
                structure,
                block.span.start_offset + start,
                block.span.start_offset + end,
                block.title.as_ref().map(|t| format!("{t} (part {})", i + 1)),
            ));
            start = *split_point;
            if start >= content.len() {
                break;
            }
        }

        chunks
    }

    /// For code-shaped blocks, split on `def `/`class `/`async def `
    /// boundaries; otherwise split on blank-line paragraph boundaries
    /// (`_find_split_points`).
    fn find_split_points(&self, content: &str, kind: &BlockKind) -> Vec<usize> {
        let pattern = if matches!(kind, BlockKind::Function { .. } | BlockKind::Class { .. } | BlockKind::Method { .. } | BlockKind::CodeBlock { .. }) {
            code_boundary_re()
        } else {
            paragraph_boundary_re()
        };

        let min = self.config.min_chunk_size;
        pattern
            .find_iter(content)
            .map(|m| m.start())
            .filter(|&pos| pos >= min && pos <= content.len().saturating_sub(min))
            .collect()
    }

    fn create_chunk_from_block(&self, block: &Block, structure: &FileStructure, truncate: bool) -> Chunk {
        let content = if truncate && block.content.len() > self.config.max_chunk_size {
            &block.content[..floor_char_boundary(&block.content, self.config.max_chunk_size)]
        } else {
            &block.content
        };
        self.build_chunk(
            content,
            block,
            structure,
            block.span.start_offset,
            block.span.end_offset,
            block.title.clone(),
        )
    }

    fn create_chunk_from_blocks(&self, blocks: &[&Block], structure: &FileStructure) -> Chunk {
        let combined: String = blocks.iter().map(|b| b.content.as_str()).collect::<Vec<_>>().join("\n\n");
        let primary = blocks[0];
        let last = blocks[blocks.len() - 1];

        let avg_importance = blocks.iter().map(|b| b.importance_score).sum::<f64>() / blocks.len() as f64;
        let avg_complexity = blocks.iter().map(|b| b.complexity_score).sum::<f64>() / blocks.len() as f64;

        let title = blocks
            .iter()
            .take(3)
            .filter_map(|b| b.title.clone())
            .collect::<Vec<_>>()
            .join(", ");
        let title = if title.is_empty() { None } else { Some(format!("Combined: {title}")) };

        let chunk_type = self.determine_chunk_type(primary, structure);
        let source_id = crate::ids::source_id(&structure.file_path);

        let mut metadata = HashMap::new();
        self.stamp_metadata(&mut metadata, primary, structure, true);
        metadata.extend(primary.metadata.clone());

        Chunk {
            chunk_id: chunk_id(),
            source_id,
            source_path: structure.file_path.clone(),
            content: normalize_text(&combined),
            ordinal: primary.span.start_line,
            start_offset: primary.span.start_offset,
            end_offset: last.span.end_offset,
            source_lines_start: primary.span.start_line,
            source_lines_end: last.span.end_line,
            chunk_type,
            status: ChunkStatus::New,
            language: primary.language.clone().or_else(|| structure.language.clone()),
            category: Some(category_for_language(structure.language.as_deref())),
            title,
            quality_score: avg_importance,
            coverage: (combined.len() as f64 / self.config.max_chunk_size.max(1) as f64).min(1.0),
            cohesion: avg_complexity,
            block_type: format!("{:?}", primary.kind),
            tags: blocks.iter().flat_map(|b| b.tags.clone()).collect(),
            metadata,
            embedding: Vec::new(),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn build_chunk(
        &self,
        content: &str,
        block: &Block,
        structure: &FileStructure,
        start_offset: usize,
        end_offset: usize,
        title: Option<String>,
    ) -> Chunk {
        let chunk_type = self.determine_chunk_type(block, structure);
        let source_id = crate::ids::source_id(&structure.file_path);
        let mut tags = block.tags.clone();
        tags.push(format!("{:?}", block.kind));

        let mut metadata = HashMap::new();
        self.stamp_metadata(&mut metadata, block, structure, false);
        metadata.extend(block.metadata.clone());

        Chunk {
            chunk_id: chunk_id(),
            source_id,
            source_path: structure.file_path.clone(),
            content: normalize_text(content),
            ordinal: block.span.start_line,
            start_offset,
            end_offset,
            source_lines_start: block.span.start_line,
            source_lines_end: block.span.end_line,
            chunk_type,
            status: ChunkStatus::New,
            language: block.language.clone().or_else(|| structure.language.clone()),
            category: Some(category_for_language(structure.language.as_deref())),
            title,
            quality_score: self.calculate_quality_score(block, content),
            coverage: (content.len() as f64 / self.config.max_chunk_size.max(1) as f64).min(1.0),
            cohesion: block.complexity_score,
            block_type: format!("{:?}", block.kind),
            tags,
            metadata,
            embedding: Vec::new(),
        }
    }

    /// `score = importance`, scaled by completeness when truncated,
    /// then averaged against a length factor against 70% of `max_chunk_size`.
    fn calculate_quality_score(&self, block: &Block, content: &str) -> f64 {
        let mut score = block.importance_score;
        if content.len() < block.content.len() {
            let completeness = content.len() as f64 / block.content.len().max(1) as f64;
            score *= completeness;
        }
        let ideal_length = self.config.max_chunk_size as f64 * 0.7;
        let length_factor = (content.len() as f64 / ideal_length.max(1.0)).min(1.0);
        ((score + length_factor) / 2.0).min(1.0)
    }

    fn determine_chunk_type(&self, block: &Block, structure: &FileStructure) -> ChunkType {
        if is_draft_file(std::path::Path::new(&structure.file_path)) {
            return ChunkType::Draft;
        }
        match block.kind {
            BlockKind::Docstring => ChunkType::Message,
            _ => block.kind.chunk_type(),
        }
    }

    /// Merges adjacent chunks when the combined size stays within budget
    /// and the first chunk is still small (`_merge_small_chunks`).
    fn merge_small_chunks(&self, chunks: Vec<Chunk>) -> Vec<Chunk> {
        if chunks.is_empty() {
            return chunks;
        }

        let mut merged = Vec::new();
        let mut iter = chunks.into_iter();
        let mut current = iter.next().unwrap();

        for next in iter {
            let combined_size = current.content.len() + next.content.len();
            let adjacent = current.source_path == next.source_path
                && (next.start_offset as i64 - current.end_offset as i64).unsigned_abs() < 100;

            if combined_size <= self.config.max_chunk_size && current.content.len() < self.config.min_chunk_size * 2 && adjacent {
                current = self.merge_two_chunks(current, next);
            } else {
                merged.push(current);
                current = next;
            }
        }
        merged.push(current);
        merged
    }

    fn merge_two_chunks(&self, a: Chunk, b: Chunk) -> Chunk {
        let merged_body = format!("{}\n\n{}", a.content, b.content);
        let title = match (&a.title, &b.title) {
            (Some(t1), Some(t2)) => Some(format!("Merged: {t1} + {t2}")),
            (Some(t1), None) => Some(format!("Merged: {t1}")),
            (None, Some(t2)) => Some(format!("Merged: {t2}")),
            (None, None) => None,
        };
        let mut tags = a.tags.clone();
        tags.extend(b.tags.clone());
        tags.sort();
        tags.dedup();

        let mut metadata = a.metadata;
        metadata.insert("is_combined_chunk".to_string(), json!(true));

        Chunk {
            chunk_id: a.chunk_id,
            source_id: a.source_id,
            source_path: a.source_path,
            content: normalize_text(&merged_body),
            ordinal: a.ordinal,
            start_offset: a.start_offset,
            end_offset: b.end_offset,
            source_lines_start: a.source_lines_start,
            source_lines_end: b.source_lines_end,
            chunk_type: a.chunk_type,
            status: a.status,
            language: a.language,
            category: a.category,
            title,
            quality_score: (a.quality_score + b.quality_score) / 2.0,
            coverage: (merged_body.len() as f64 / self.config.max_chunk_size.max(1) as f64).min(1.0),
            cohesion: (a.cohesion + b.cohesion) / 2.0,
            block_type: a.block_type,
            tags,
            metadata,
            embedding: Vec::new(),
        }
    }

    /// Stamps the chunk-emission envelope's metadata keys (§6): block
    /// shape, the source file's size/hash, which filter produced it, the
    /// chunker config that shaped it, and when it was chunked.
    fn stamp_metadata(
        &self,
        metadata: &mut HashMap<String, Value>,
        block: &Block,
        structure: &FileStructure,
        is_combined_chunk: bool,
    ) {
        metadata.insert("block_type".to_string(), json!(format!("{:?}", block.kind)));
        metadata.insert("block_level".to_string(), json!(block.level));
        metadata.insert("is_combined_chunk".to_string(), json!(is_combined_chunk));
        metadata.insert("file_size".to_string(), json!(structure.file_size));
        metadata.insert("file_hash".to_string(), json!(structure.file_hash));
        metadata.insert("filter_name".to_string(), json!(structure.filter_name));
        metadata.insert("filter_version".to_string(), json!(structure.filter_version));
        metadata.insert("chunked_at".to_string(), json!(Utc::now().to_rfc3339()));
        metadata.insert(
            "chunker_config".to_string(),
            json!({
                "max_chunk_size": self.config.max_chunk_size,
                "overlap_size": self.config.overlap_size,
                "preserve_structure": self.config.preserve_structure,
            }),
        );
        metadata.insert("block_id".to_string(), json!(block.block_id));
    }

    /// Assigns dense per-file ordinals and unique chunk ids (Open Question
    /// 1: renumber densely post-merge rather than keep the source block's
    /// `start_line`, see `DESIGN.md`).
    fn post_process(&self, chunks: &mut [Chunk], _structure: &FileStructure) {
        chunks.sort_by_key(|c| (c.source_lines_start, c.start_offset));
        for (i, chunk) in chunks.iter_mut().enumerate() {
            chunk.ordinal = i;
        }
    }
}

fn code_boundary_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n\s*(def |class |async def )").unwrap())
}

fn paragraph_boundary_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n\s*\n").unwrap())
}

/// Collapses whitespace runs to a single space; for code-shaped content,
/// collapses runs of 3+ blank lines to exactly one instead (`_normalize_text`).
fn normalize_text(content: &str) -> String {
    let looks_like_code = ["def ", "class ", "import ", "function"].iter().any(|k| content.contains(k));
    if looks_like_code {
        static TRIPLE_BLANK: OnceLock<Regex> = OnceLock::new();
        let re = TRIPLE_BLANK.get_or_init(|| Regex::new(r"\n\s*\n\s*\n+").unwrap());
        re.replace_all(content, "\n\n").trim().to_string()
    } else {
        static WHITESPACE: OnceLock<Regex> = OnceLock::new();
        let re = WHITESPACE.get_or_init(|| Regex::new(r"\s+").unwrap());
        re.replace_all(content, " ").trim().to_string()
    }
}

fn category_for_language(language: Option<&str>) -> String {
    match language {
        Some("python") | Some("javascript") | Some("typescript") | Some("java") | Some("cpp") | Some("rust") | Some("go") => "code".to_string(),
        Some("markdown") => "documentation".to_string(),
        Some("html") | Some("css") => "web".to_string(),
        Some("json") => "data".to_string(),
        Some("yaml") => "configuration".to_string(),
        _ => "text".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::HashMap;

    fn block(content: &str, kind: BlockKind, importance: f64, start_line: usize) -> Block {
        Block {
            block_id: format!("b{start_line}"),
            content: content.to_string(),
            kind,
            language: Some("python".to_string()),
            span: crate::model::Span {
                start_line,
                end_line: start_line,
                start_offset: 0,
                end_offset: content.len(),
            },
            level: 0,
            parent_id: None,
            title: Some(format!("block {start_line}")),
            metadata: HashMap::new(),
            tags: Vec::new(),
            complexity_score: 0.2,
            importance_score: importance,
        }
    }

    fn structure(blocks: Vec<Block>) -> FileStructure {
        FileStructure {
            file_path: "/tmp/sample.py".to_string(),
            file_size: 100,
            file_hash: "hash".to_string(),
            modified_at: Utc::now(),
            blocks,
            language: Some("python".to_string()),
            encoding: "utf-8".to_string(),
            filter_name: "python_filter".to_string(),
            filter_version: "1.0.0".to_string(),
            parsed_at: Utc::now(),
            processing_time: 0.01,
            total_characters: 100,
        }
    }

    #[test]
    fn low_importance_blocks_are_filtered_out() {
        let chunker = Chunker::new(ChunkerConfig {
            min_importance_score: 0.5,
            ..ChunkerConfig::default()
        });
        let structure = structure(vec![
            block("a".repeat(300).as_str(), BlockKind::Paragraph, 0.1, 0),
            block("b".repeat(300).as_str(), BlockKind::Paragraph, 0.9, 1),
        ]);
        let chunks = chunker.chunk_file_structure(&structure);
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn ordinals_are_dense_after_processing() {
        let chunker = Chunker::new(ChunkerConfig::default());
        let structure = structure(vec![
            block(&"x".repeat(300), BlockKind::Paragraph, 0.9, 0),
            block(&"y".repeat(300), BlockKind::Paragraph, 0.9, 5),
        ]);
        let chunks = chunker.chunk_file_structure(&structure);
        let ordinals: Vec<usize> = chunks.iter().map(|c| c.ordinal).collect();
        assert_eq!(ordinals, (0..chunks.len()).collect::<Vec<_>>());
    }

    #[test]
    fn draft_file_forces_draft_chunk_type() {
        let chunker = Chunker::new(ChunkerConfig::default());
        let mut structure = structure(vec![block(&"z".repeat(300), BlockKind::Function { name: "f".into() }, 0.9, 0)]);
        structure.file_path = "/tmp/draft_notes.py".to_string();
        let chunks = chunker.chunk_file_structure(&structure);
        assert_eq!(chunks[0].chunk_type, ChunkType::Draft);
    }

    #[test]
    fn large_block_is_split_with_overlap() {
        let chunker = Chunker::new(ChunkerConfig {
            max_chunk_size: 50,
            min_chunk_size: 10,
            overlap_size: 5,
            ..ChunkerConfig::default()
        });
        let content = "word ".repeat(40);
        let structure = structure(vec![block(&content, BlockKind::Paragraph, 0.9, 0)]);
        let chunks = chunker.chunk_file_structure(&structure);
        assert!(chunks.len() > 1);
    }

    #[test]
    fn same_file_chunks_share_source_id() {
        let chunker = Chunker::new(ChunkerConfig::default());
        let structure = structure(vec![
            block(&"x".repeat(300), BlockKind::Paragraph, 0.9, 0),
            block(&"y".repeat(300), BlockKind::Paragraph, 0.9, 5),
        ]);
        let chunks = chunker.chunk_file_structure(&structure);
        assert_eq!(chunks[0].source_id, chunks[1].source_id);
    }

    #[test]
    fn chunk_metadata_carries_the_emission_envelope_keys() {
        let chunker = Chunker::new(ChunkerConfig::default());
        let structure = structure(vec![block(&"x".repeat(300), BlockKind::Paragraph, 0.9, 0)]);
        let chunks = chunker.chunk_file_structure(&structure);

        let meta = &chunks[0].metadata;
        assert_eq!(meta["file_hash"], "hash");
        assert_eq!(meta["filter_name"], "python_filter");
        assert_eq!(meta["filter_version"], "1.0.0");
        assert_eq!(meta["is_combined_chunk"], false);
        assert_eq!(meta["block_id"], "b0");
        assert_eq!(meta["chunker_config"]["max_chunk_size"], chunker.config.max_chunk_size);
        assert!(meta.contains_key("chunked_at"));
        assert!(chunks[0].embedding.is_empty());
    }

    #[test]
    fn combined_chunk_metadata_marks_is_combined() {
        let chunker = Chunker::new(ChunkerConfig {
            preserve_structure: false,
            ..ChunkerConfig::default()
        });
        let structure = structure(vec![
            block(&"x".repeat(10), BlockKind::Paragraph, 0.9, 0),
            block(&"y".repeat(10), BlockKind::Paragraph, 0.9, 1),
        ]);
        let chunks = chunker.chunk_file_structure(&structure);
        assert_eq!(chunks[0].metadata["is_combined_chunk"], true);
    }
}
