//! Python-family source-code extractor (C4's "Python-family exemplar").
//! Grounded on `filters/python_filter.py`: rather than binding a
//! native tree-sitter grammar, this builds directly on the indentation/
//! regex scan the Python reference itself falls back to when AST parsing
//! fails (`_extract_blocks_fallback`/`_find_block_end`), promoted here to
//! the primary (and only) extraction strategy.

use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;
use std::time::Instant;

use chrono::Utc;
use regex::Regex;
use serde_json::json;

use crate::config::ExtractorConfig;
use crate::error::IngestError;
use crate::ids::{block_id, file_hash};
use crate::model::{Block, BlockKind, FileStructure, Span};

const RECOGNIZED_EXTENSIONS: &[&str] = &["py", "pyw", "py3"];

pub struct PythonExtractor {
    config: ExtractorConfig,
}

impl PythonExtractor {
    pub fn new(config: ExtractorConfig) -> Self {
        Self { config }
    }
}

impl super::BlockExtractor for PythonExtractor {
    fn name(&self) -> &'static str {
        "python_filter"
    }

    fn version(&self) -> &'static str {
        "1.0.0"
    }

    fn can_process(&self, path: &Path) -> bool {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("").to_ascii_lowercase();
        RECOGNIZED_EXTENSIONS.contains(&ext.as_str())
    }

    fn parse(&self, path: &Path, content: Option<&str>, bytes: &[u8]) -> Result<FileStructure, IngestError> {
        let started = Instant::now();
        let owned;
        let content = match content {
            Some(c) => c,
            None => {
                owned = super::text::decode_with_fallback(bytes);
                &owned
            }
        };

        let mut blocks = extract_module_docstring(content, &self.config);
        blocks.extend(extract_definitions(content, &self.config));
        blocks.extend(extract_main_guard(content));
        if self.config.include_imports {
            blocks.extend(extract_imports(content));
        }
        if self.config.include_comments {
            blocks.extend(extract_comments(content));
        }
        blocks.sort_by_key(|b| (b.span.start_line, b.span.start_offset));

        let total_characters = blocks.iter().map(|b| b.content.chars().count()).sum();

        Ok(FileStructure {
            file_path: path.display().to_string(),
            file_size: bytes.len() as u64,
            file_hash: file_hash(bytes),
            modified_at: Utc::now(),
            blocks,
            language: Some("python".to_string()),
            encoding: "utf-8".to_string(),
            filter_name: self.name().to_string(),
            filter_version: self.version().to_string(),
            parsed_at: Utc::now(),
            processing_time: started.elapsed().as_secs_f64(),
            total_characters,
        })
    }
}

fn def_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(?P<indent>[ \t]*)(?P<async>async\s+)?def\s+(?P<name>\w+)\s*\(").unwrap())
}

fn class_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(?P<indent>[ \t]*)class\s+(?P<name>\w+)\s*(\((?P<bases>[^)]*)\))?\s*:").unwrap())
}

fn import_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*(import\s+\w|from\s+[\w.]+\s+import\s)").unwrap())
}

fn decorator_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*@\w").unwrap())
}

fn main_guard_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"^if\s+__name__\s*==\s*['"]__main__['"]\s*:"#).unwrap())
}

fn offset_for_line(lines: &[&str], line_num: usize) -> usize {
    lines[..line_num.min(lines.len())].iter().map(|l| l.len() + 1).sum()
}

/// Module docstring: a bare string literal as the first non-blank,
/// non-comment line.
fn extract_module_docstring(content: &str, config: &ExtractorConfig) -> Vec<Block> {
    if !config.include_docstrings {
        return Vec::new();
    }
    let lines: Vec<&str> = content.split('\n').collect();
    let mut idx = 0;
    while idx < lines.len() && lines[idx].trim().is_empty() {
        idx += 1;
    }
    if idx >= lines.len() {
        return Vec::new();
    }
    let first = lines[idx].trim_start();
    let quote = if first.starts_with("\"\"\"") {
        "\"\"\""
    } else if first.starts_with("'''") {
        "'''"
    } else {
        return Vec::new();
    };

    let start_line = idx;
    let mut end_line = idx;
    let after_open = &lines[idx].trim_start()[quote.len()..];
    if after_open.trim_end().ends_with(quote) && !after_open.trim().is_empty() {
        // single-line docstring
    } else {
        let mut j = idx + 1;
        while j < lines.len() && !lines[j].contains(quote) {
            j += 1;
        }
        end_line = j.min(lines.len() - 1);
    }

    let raw: String = lines[start_line..=end_line].join("\n");
    let docstring = raw.trim_matches(|c: char| c.is_whitespace()).trim_matches('"').trim_matches('\'').trim().to_string();
    if docstring.is_empty() {
        return Vec::new();
    }

    vec![docstring_block(&docstring, start_line, end_line, "Module docstring")]
}

fn docstring_block(docstring: &str, start_line: usize, end_line: usize, title: &str) -> Block {
    let kind = BlockKind::Docstring;
    let mut metadata = HashMap::new();
    metadata.insert("is_docstring".to_string(), json!(true));
    Block {
        block_id: block_id(&kind, docstring, start_line, 0),
        content: docstring.to_string(),
        kind,
        language: Some("python".to_string()),
        span: Span {
            start_line,
            end_line,
            start_offset: 0,
            end_offset: docstring.len(),
        },
        level: 1,
        parent_id: None,
        title: Some(title.to_string()),
        metadata,
        tags: Vec::new(),
        complexity_score: 0.0,
        importance_score: 0.7,
    }
}

/// Cyclomatic complexity, scanned by keyword occurrence rather than AST
/// node type: base 1, +1 per `if`/`while`/`for`/`async for`/`and`/`or`/
/// `except`/`with`.
fn calculate_complexity(body: &str) -> u32 {
    let mut complexity = 1u32;
    for line in body.lines() {
        let trimmed = line.trim_start();
        let keyword_starts = [
            "if ", "if(", "elif ", "elif(", "while ", "while(", "for ", "for(", "async for ", "except", "with ", "with(",
        ];
        if keyword_starts.iter().any(|k| trimmed.starts_with(k)) {
            complexity += 1;
        }
        complexity += line.matches(" and ").count() as u32;
        complexity += line.matches(" or ").count() as u32;
    }
    complexity
}

/// Base 0.5, +0.3 for `main`, +0.1 public, +0.1 decorated, +0.1
/// complexity > 5, +0.05 type-annotated.
fn calculate_function_importance(name: &str, complexity: u32, decorated: bool, signature: &str, returns: bool) -> f64 {
    let mut score: f64 = 0.5;
    if name == "main" {
        score += 0.3;
    }
    if !name.starts_with('_') {
        score += 0.1;
    }
    if decorated {
        score += 0.1;
    }
    if complexity > 5 {
        score += 0.1;
    }
    if returns || signature.contains(':') {
        score += 0.05;
    }
    score.min(1.0)
}

fn find_block_end(lines: &[&str], start_line: usize, base_indent: usize) -> usize {
    for (i, line) in lines.iter().enumerate().skip(start_line + 1) {
        if line.trim().is_empty() {
            continue;
        }
        let current_indent = line.len() - line.trim_start().len();
        if current_indent <= base_indent {
            return i - 1;
        }
    }
    lines.len() - 1
}

fn preceding_decorators(lines: &[&str], def_line: usize) -> usize {
    let mut count = 0;
    let mut i = def_line;
    while i > 0 {
        i -= 1;
        if decorator_re().is_match(lines[i]) {
            count += 1;
        } else if lines[i].trim().is_empty() {
            continue;
        } else {
            break;
        }
    }
    count
}

fn nesting_level(lines: &[&str], line_idx: usize, indent_of_line: usize) -> usize {
    // Level = count of enclosing `def`/`class` headers at strictly lower
    // indentation, matching `_get_node_level`'s function/class-only count.
    let mut level = 0;
    let mut i = line_idx;
    let mut current_indent = indent_of_line;
    while i > 0 && current_indent > 0 {
        i -= 1;
        let line = lines[i];
        if line.trim().is_empty() {
            continue;
        }
        let indent = line.len() - line.trim_start().len();
        if indent < current_indent {
            if def_re().is_match(line) || class_re().is_match(line) {
                level += 1;
                current_indent = indent;
            } else {
                current_indent = indent;
            }
        }
    }
    level
}

fn extract_definitions(content: &str, config: &ExtractorConfig) -> Vec<Block> {
    let lines: Vec<&str> = content.split('\n').collect();
    let mut blocks = Vec::new();

    for (i, line) in lines.iter().enumerate() {
        if let Some(caps) = class_re().captures(line) {
            let indent = caps.name("indent").map(|m| m.len()).unwrap_or(0);
            let name = caps["name"].to_string();
            let end_line = find_block_end(&lines, i, indent);
            let header_end_offset = offset_for_line(&lines, i) + line.len();
            let bases: Vec<String> = caps
                .name("bases")
                .map(|m| m.as_str().split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect())
                .unwrap_or_default();
            let decorated = preceding_decorators(&lines, i) > 0;
            let level = nesting_level(&lines, i, indent) as u32;

            let kind = BlockKind::Class { name: name.clone() };
            let mut metadata = HashMap::new();
            metadata.insert("class_name".to_string(), json!(name));
            metadata.insert("base_classes".to_string(), json!(bases));
            metadata.insert("has_decorators".to_string(), json!(decorated));

            blocks.push(Block {
                block_id: block_id(&kind, line, i, offset_for_line(&lines, i)),
                content: line.to_string(),
                kind,
                language: Some("python".to_string()),
                span: Span {
                    start_line: i,
                    end_line: i,
                    start_offset: offset_for_line(&lines, i),
                    end_offset: header_end_offset,
                },
                level,
                parent_id: None,
                title: Some(format!("class {name}")),
                metadata,
                tags: Vec::new(),
                complexity_score: 0.0,
                importance_score: 0.8,
            });

            if config.include_docstrings {
                if let Some(doc) = body_docstring(&lines, i, end_line) {
                    blocks.push(docstring_block(&doc.0, doc.1, doc.2, &format!("{name} docstring")));
                }
            }
            continue;
        }

        if let Some(caps) = def_re().captures(line) {
            let indent = caps.name("indent").map(|m| m.len()).unwrap_or(0);
            let is_async = caps.name("async").is_some();
            let name = caps["name"].to_string();
            let end_line = find_block_end(&lines, i, indent);

            let body: String = lines[i..=end_line].join("\n");
            let complexity = calculate_complexity(&body);
            let decorated = preceding_decorators(&lines, i) > 0;
            let returns = line.contains("->");
            let importance = calculate_function_importance(&name, complexity, decorated, line, returns);

            // Short functions are dropped unless otherwise important (same
            // 0.7 threshold the chunker uses to keep undersized-but-important
            // blocks alive).
            if end_line.saturating_sub(i) < config.min_function_lines && importance < 0.7 {
                continue;
            }

            let level = nesting_level(&lines, i, indent) as u32;
            let is_method = level > 0;

            let args_count = line
                .split_once('(')
                .and_then(|(_, rest)| rest.rsplit_once(')'))
                .map(|(params, _)| params.split(',').filter(|s| !s.trim().is_empty()).count())
                .unwrap_or(0);

            let kind = if is_method {
                BlockKind::Method { name: name.clone() }
            } else {
                BlockKind::Function { name: name.clone() }
            };
            let mut metadata = HashMap::new();
            metadata.insert("function_name".to_string(), json!(name));
            metadata.insert("is_async".to_string(), json!(is_async));
            metadata.insert("complexity".to_string(), json!(complexity));
            metadata.insert("args_count".to_string(), json!(args_count));
            metadata.insert("has_decorators".to_string(), json!(decorated));
            metadata.insert("returns".to_string(), json!(returns));

            blocks.push(Block {
                block_id: block_id(&kind, &body, i, offset_for_line(&lines, i)),
                content: body,
                kind,
                language: Some("python".to_string()),
                span: Span {
                    start_line: i,
                    end_line,
                    start_offset: offset_for_line(&lines, i),
                    end_offset: offset_for_line(&lines, end_line + 1),
                },
                level,
                parent_id: None,
                title: Some(format!("{}def {name}", if is_async { "async " } else { "" })),
                metadata,
                tags: Vec::new(),
                complexity_score: (complexity as f64 / config.complexity_threshold.max(1) as f64).min(1.0),
                importance_score: importance,
            });

            if config.include_docstrings {
                if let Some(doc) = body_docstring(&lines, i, end_line) {
                    blocks.push(docstring_block(&doc.0, doc.1, doc.2, &format!("{name} docstring")));
                }
            }
        }
    }

    blocks
}

/// First statement of a function/class body, if it is a bare string
/// literal.
fn body_docstring(lines: &[&str], header_line: usize, body_end: usize) -> Option<(String, usize, usize)> {
    let mut idx = header_line + 1;
    while idx <= body_end && lines.get(idx).map(|l| l.trim().is_empty()).unwrap_or(true) {
        idx += 1;
    }
    let line = lines.get(idx)?;
    let trimmed = line.trim_start();
    let quote = if trimmed.starts_with("\"\"\"") {
        "\"\"\""
    } else if trimmed.starts_with("'''") {
        "'''"
    } else {
        return None;
    };

    let mut end = idx;
    let after_open = &trimmed[quote.len()..];
    if !(after_open.trim_end().ends_with(quote) && !after_open.trim().is_empty()) {
        let mut j = idx + 1;
        while j <= body_end && !lines[j].contains(quote) {
            j += 1;
        }
        end = j.min(body_end);
    }

    let raw = lines[idx..=end].join("\n");
    let docstring = raw.trim().trim_matches('"').trim_matches('\'').trim().to_string();
    if docstring.is_empty() {
        None
    } else {
        Some((docstring, idx, end))
    }
}

fn extract_imports(content: &str) -> Vec<Block> {
    let lines: Vec<&str> = content.split('\n').collect();
    let mut blocks = Vec::new();
    for (i, line) in lines.iter().enumerate() {
        if import_re().is_match(line) {
            let kind = BlockKind::Import;
            let mut metadata = HashMap::new();
            metadata.insert("is_import".to_string(), json!(true));
            blocks.push(Block {
                block_id: block_id(&kind, line, i, 0),
                content: line.trim().to_string(),
                kind,
                language: Some("python".to_string()),
                span: Span {
                    start_line: i,
                    end_line: i,
                    start_offset: 0,
                    end_offset: line.len(),
                },
                level: 0,
                parent_id: None,
                title: None,
                metadata,
                tags: Vec::new(),
                complexity_score: 0.0,
                importance_score: 0.3,
            });
        }
    }
    blocks
}

/// Consecutive `#`-prefixed lines (shebang excluded), 2+ lines only.
fn extract_comments(content: &str) -> Vec<Block> {
    let lines: Vec<&str> = content.split('\n').collect();
    let mut blocks = Vec::new();
    let mut buf: Vec<String> = Vec::new();
    let mut start_line = 0usize;

    let mut flush = |buf: &mut Vec<String>, end_line: usize, blocks: &mut Vec<Block>| {
        if buf.len() >= 2 {
            let content = buf.join("\n");
            let kind = BlockKind::Comment;
            let mut metadata = HashMap::new();
            metadata.insert("is_comment".to_string(), json!(true));
            metadata.insert("lines_count".to_string(), json!(buf.len()));
            blocks.push(Block {
                block_id: block_id(&kind, &content, start_line, 0),
                content: content.clone(),
                kind,
                language: Some("python".to_string()),
                span: Span {
                    start_line,
                    end_line,
                    start_offset: 0,
                    end_offset: content.len(),
                },
                level: 0,
                parent_id: None,
                title: None,
                metadata,
                tags: Vec::new(),
                complexity_score: 0.0,
                importance_score: 0.4,
            });
        }
        buf.clear();
    };

    for (i, line) in lines.iter().enumerate() {
        let trimmed = line.trim();
        if trimmed.starts_with('#') && !trimmed.starts_with("#!") {
            if buf.is_empty() {
                start_line = i;
            }
            buf.push(trimmed.trim_start_matches('#').trim().to_string());
        } else {
            flush(&mut buf, i.saturating_sub(1), &mut blocks);
        }
    }
    flush(&mut buf, lines.len().saturating_sub(1), &mut blocks);

    blocks
}

fn extract_main_guard(content: &str) -> Vec<Block> {
    let lines: Vec<&str> = content.split('\n').collect();
    for (i, line) in lines.iter().enumerate() {
        if main_guard_re().is_match(line.trim_start()) {
            let indent = line.len() - line.trim_start().len();
            let end_line = find_block_end(&lines, i, indent);
            let content_block = lines[i..=end_line].join("\n");
            let kind = BlockKind::CodeBlock { language: Some("python".to_string()) };
            let mut metadata = HashMap::new();
            metadata.insert("is_main_guard".to_string(), json!(true));
            return vec![Block {
                block_id: block_id(&kind, &content_block, i, offset_for_line(&lines, i)),
                content: content_block,
                kind,
                language: Some("python".to_string()),
                span: Span {
                    start_line: i,
                    end_line,
                    start_offset: offset_for_line(&lines, i),
                    end_offset: offset_for_line(&lines, end_line + 1),
                },
                level: 0,
                parent_id: None,
                title: Some("Main execution block".to_string()),
                metadata,
                tags: Vec::new(),
                complexity_score: 0.0,
                importance_score: 0.7,
            }];
        }
    }
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::BlockExtractor;

    const SAMPLE: &str = r#""""Module docstring describing the thing."""
import os
from collections import OrderedDict


def helper(x, y):
    """Adds two numbers."""
    if x > 0:
        return x + y
    return y


class Widget(Base):
    """A widget."""

    def render(self):
        for i in range(10):
            if i % 2 == 0:
                print(i)


if __name__ == '__main__':
    helper(1, 2)
"#;

    #[test]
    fn can_process_matches_python_extensions() {
        let extractor = PythonExtractor::new(ExtractorConfig::default());
        assert!(extractor.can_process(Path::new("main.py")));
        assert!(!extractor.can_process(Path::new("main.rs")));
    }

    #[test]
    fn extracts_module_docstring() {
        let config = ExtractorConfig::default();
        let blocks = extract_module_docstring(SAMPLE, &config);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].kind, BlockKind::Docstring);
    }

    #[test]
    fn extracts_function_and_class() {
        let config = ExtractorConfig::default();
        let blocks = extract_definitions(SAMPLE, &config);
        let has_function = blocks.iter().any(|b| matches!(&b.kind, BlockKind::Function { name } if name == "helper"));
        let has_class = blocks.iter().any(|b| matches!(&b.kind, BlockKind::Class { name } if name == "Widget"));
        let has_method = blocks.iter().any(|b| matches!(&b.kind, BlockKind::Method { name } if name == "render"));
        assert!(has_function, "expected a Function block for helper");
        assert!(has_class, "expected a Class block for Widget");
        assert!(has_method, "expected a Method block for render");
    }

    #[test]
    fn short_functions_are_dropped_below_min_function_lines() {
        let config = ExtractorConfig {
            min_function_lines: 10,
            ..ExtractorConfig::default()
        };
        let blocks = extract_definitions(SAMPLE, &config);
        assert!(blocks.iter().all(|b| !matches!(&b.kind, BlockKind::Function { .. })));
    }

    #[test]
    fn main_guard_is_extracted_as_code_block() {
        let blocks = extract_main_guard(SAMPLE);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].title.as_deref(), Some("Main execution block"));
    }

    #[test]
    fn imports_are_extracted_when_enabled() {
        let blocks = extract_imports(SAMPLE);
        assert_eq!(blocks.len(), 2);
        assert!(blocks.iter().all(|b| b.kind == BlockKind::Import));
    }

    #[test]
    fn complexity_counts_branches_and_boolean_operators() {
        let body = "def f():\n    if a and b:\n        return 1\n    for x in y:\n        pass\n";
        let complexity = calculate_complexity(body);
        assert!(complexity >= 4);
    }

    #[test]
    fn main_function_gets_importance_boost() {
        let plain = calculate_function_importance("helper", 1, false, "def helper(x):", false);
        let main = calculate_function_importance("main", 1, false, "def main():", false);
        assert!(main > plain);
    }

    #[test]
    fn parse_produces_sorted_blocks() {
        let extractor = PythonExtractor::new(ExtractorConfig::default());
        let structure = extractor.parse(Path::new("sample.py"), Some(SAMPLE), SAMPLE.as_bytes()).unwrap();
        let lines: Vec<usize> = structure.blocks.iter().map(|b| b.span.start_line).collect();
        let mut sorted = lines.clone();
        sorted.sort();
        assert_eq!(lines, sorted);
        assert_eq!(structure.language.as_deref(), Some("python"));
    }
}
