use crate::model::{SymbolEntry, SymbolKind};
use blake3::Hasher;
use serde::Serialize;

const PYTHON_BRANCH_KEYWORDS: &[&str] = &[
    "if", "elif", "for", "while", "except", "case", "and", "or", "with",
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FileMetrics {
    pub loc: usize,
    pub blank: usize,
    pub comment: usize,
    pub code: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SymbolMetrics {
    pub name: String,
    pub kind: SymbolKind,
    pub line: usize,
    pub loc: usize,
    pub complexity: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duplication_hash: Option<String>,
}

pub fn compute_file_metrics(source: &str) -> FileMetrics {
    let mut metrics = FileMetrics::default();
    let mut in_docstring: Option<&str> = None;
    for line in source.lines() {
        metrics.loc += 1;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            metrics.blank += 1;
            continue;
        }
        if let Some(quote) = in_docstring {
            metrics.comment += 1;
            if trimmed.contains(quote) {
                in_docstring = None;
            }
            continue;
        }
        if trimmed.starts_with('#') {
            metrics.comment += 1;
            continue;
        }
        if let Some(quote) = ["\"\"\"", "'''"].into_iter().find(|q| trimmed.starts_with(q)) {
            metrics.comment += 1;
            if !trimmed[3..].contains(quote) {
                in_docstring = Some(quote);
            }
            continue;
        }
        metrics.code += 1;
    }
    metrics
}

/// Per-callable size and branch estimate. Nested bodies count toward their
/// enclosing function since they share its line range.
pub fn compute_symbol_metrics(source: &str, symbols: &[SymbolEntry]) -> Vec<SymbolMetrics> {
    let lines: Vec<&str> = source.lines().collect();
    let mut metrics = Vec::new();
    for symbol in symbols {
        if symbol.kind == SymbolKind::Class {
            continue;
        }
        let loc = (symbol.end_line.saturating_sub(symbol.line) + 1).max(1);
        let snippet = slice_lines(&lines, symbol.line, symbol.end_line);
        metrics.push(SymbolMetrics {
            name: symbol.name.clone(),
            kind: symbol.kind,
            line: symbol.line,
            loc,
            complexity: complexity_for(&snippet),
            duplication_hash: duplication_hash(&snippet),
        });
    }
    metrics
}

fn slice_lines(lines: &[&str], start: usize, end: usize) -> String {
    if start == 0 || start > lines.len() {
        return String::new();
    }
    let end = end.min(lines.len()).max(start);
    lines[start - 1..end].join("\n")
}

pub fn complexity_for(snippet: &str) -> usize {
    let code: String = snippet
        .lines()
        .map(|line| match line.find('#') {
            Some(idx) => &line[..idx],
            None => line,
        })
        .collect::<Vec<_>>()
        .join("\n");
    1 + count_keyword_hits(&code, PYTHON_BRANCH_KEYWORDS)
}

fn count_keyword_hits(snippet: &str, keywords: &[&str]) -> usize {
    let mut count = 0;
    let mut token = String::new();
    for ch in snippet.chars() {
        if ch.is_alphanumeric() || ch == '_' {
            token.push(ch);
        } else if !token.is_empty() {
            if keywords.contains(&token.as_str()) {
                count += 1;
            }
            token.clear();
        }
    }
    if !token.is_empty() && keywords.contains(&token.as_str()) {
        count += 1;
    }
    count
}

fn duplication_hash(snippet: &str) -> Option<String> {
    let normalized: String = snippet.chars().filter(|ch| !ch.is_whitespace()).collect();
    if normalized.is_empty() {
        return None;
    }
    let mut hasher = Hasher::new();
    hasher.update(normalized.as_bytes());
    Some(hasher.finalize().to_hex().to_string())
}
