use crate::indexer::extract::LanguageExtractor;
use crate::indexer::python::PythonExtractor;
use crate::metrics;
use crate::model::{SymbolEntry, SymbolKind};
use anyhow::Result;
use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt::Write as _;
use std::sync::LazyLock;

const COMPLEXITY_THRESHOLD: usize = 10;
const LENGTH_THRESHOLD: usize = 50;
const MAX_MISSING_DOCSTRINGS: usize = 15;
const MAX_MAGIC_NUMBERS: usize = 10;
const MAX_DUPLICATE_LINES: usize = 10;
const MIN_DUPLICATE_LINE_LEN: usize = 20;
const ISSUE_PENALTY: u32 = 5;

static FUNCTION_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z_][a-z0-9_]*$").expect("valid regex"));
static CLASS_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z][a-zA-Z0-9]*$").expect("valid regex"));
static IMPORT_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^import\s+(.+)$").expect("valid regex"));
static STRING_LITERAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""[^"]*"|'[^']*'"#).expect("valid regex"));
static NUMBER_LITERAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|[^\w.])(-?\d+(?:\.\d+)?)\b").expect("valid regex")
});

#[derive(Debug, Clone, Serialize)]
pub struct ComplexFunction {
    pub name: String,
    pub line: usize,
    pub complexity: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct LongFunction {
    pub name: String,
    pub line: usize,
    pub lines: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct NamedFinding {
    pub kind: SymbolKind,
    pub name: String,
    pub line: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct LineFinding {
    pub value: String,
    pub line: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct DuplicateLine {
    pub line: usize,
    pub duplicate_of: usize,
}

/// Structural quality findings for one Python file.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QualityAnalysis {
    pub path: String,
    pub complexity: Vec<ComplexFunction>,
    pub long_functions: Vec<LongFunction>,
    pub missing_docstrings: Vec<NamedFinding>,
    pub naming_issues: Vec<NamedFinding>,
    pub duplicate_imports: Vec<LineFinding>,
    pub magic_numbers: Vec<LineFinding>,
    pub duplicate_lines: Vec<DuplicateLine>,
    /// Complexity and length findings; these alone drive the score.
    pub issues: Vec<String>,
    pub score: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QualityAnalysis {
    /// Short text embedded in rewrite requests.
    pub fn summary(&self) -> String {
        if let Some(error) = &self.error {
            return format!("Analysis unavailable: {error}");
        }
        let mut out = String::new();
        let _ = writeln!(out, "Score: {}/100", self.score);
        let _ = writeln!(out, "Issues: {}", self.issues.len());
        if !self.complexity.is_empty() {
            let _ = writeln!(out, "Complex functions: {}", self.complexity.len());
        }
        let suggestions = suggest_improvements(self);
        if !suggestions.is_empty() {
            let top: Vec<&str> = suggestions.iter().take(3).copied().collect();
            let _ = write!(out, "Suggestions: {}", top.join(", "));
        }
        out.trim_end().to_string()
    }
}

pub struct Analyzer {
    extractor: PythonExtractor,
}

impl Analyzer {
    pub fn new() -> Result<Self> {
        Ok(Self {
            extractor: PythonExtractor::new()?,
        })
    }

    pub fn analyze(&mut self, code: &str, path: &str) -> QualityAnalysis {
        let mut analysis = QualityAnalysis {
            path: path.to_string(),
            ..Default::default()
        };
        let extracted = match self.extractor.extract(path, code) {
            Ok(extracted) => extracted,
            Err(err) => {
                analysis.error = Some(err.to_string());
                return analysis;
            }
        };

        for symbol in metrics::compute_symbol_metrics(code, &extracted.symbols) {
            if symbol.complexity > COMPLEXITY_THRESHOLD {
                analysis.issues.push(format!(
                    "line {}: function '{}' is too complex ({})",
                    symbol.line, symbol.name, symbol.complexity
                ));
                analysis.complexity.push(ComplexFunction {
                    name: symbol.name.clone(),
                    line: symbol.line,
                    complexity: symbol.complexity,
                });
            }
            let length = symbol.loc - 1;
            if length > LENGTH_THRESHOLD {
                analysis.issues.push(format!(
                    "line {}: function '{}' is too long ({length} lines)",
                    symbol.line, symbol.name
                ));
                analysis.long_functions.push(LongFunction {
                    name: symbol.name,
                    line: symbol.line,
                    lines: length,
                });
            }
        }

        analysis.missing_docstrings = missing_docstrings(&extracted.symbols);
        analysis.naming_issues = naming_issues(&extracted.symbols);
        analysis.duplicate_imports = duplicate_imports(code);
        analysis.magic_numbers = magic_numbers(code);
        analysis.duplicate_lines = duplicate_lines(code);
        let penalty = analysis.issues.len() as u32 * ISSUE_PENALTY;
        analysis.score = 100u32.saturating_sub(penalty);
        analysis
    }
}

pub fn suggest_improvements(analysis: &QualityAnalysis) -> Vec<&'static str> {
    let mut suggestions = Vec::new();
    if !analysis.complexity.is_empty() {
        suggestions.push("Split complex functions into smaller ones");
    }
    if !analysis.long_functions.is_empty() {
        suggestions.push("Break up long functions (>50 lines)");
    }
    if !analysis.missing_docstrings.is_empty() {
        suggestions.push("Add docstrings to public functions");
    }
    if !analysis.magic_numbers.is_empty() {
        suggestions.push("Replace magic numbers with named constants");
    }
    if !analysis.duplicate_lines.is_empty() {
        suggestions.push("Extract duplicated code into reusable functions");
    }
    suggestions
}

fn missing_docstrings(symbols: &[SymbolEntry]) -> Vec<NamedFinding> {
    symbols
        .iter()
        .filter(|symbol| symbol.docstring.is_none())
        .take(MAX_MISSING_DOCSTRINGS)
        .map(|symbol| NamedFinding {
            kind: symbol.kind,
            name: symbol.name.clone(),
            line: symbol.line,
        })
        .collect()
}

fn naming_issues(symbols: &[SymbolEntry]) -> Vec<NamedFinding> {
    symbols
        .iter()
        .filter(|symbol| {
            let pattern = match symbol.kind {
                SymbolKind::Class => &*CLASS_NAME,
                SymbolKind::Function | SymbolKind::Method => &*FUNCTION_NAME,
            };
            !pattern.is_match(&symbol.name)
        })
        .map(|symbol| NamedFinding {
            kind: symbol.kind,
            name: symbol.name.clone(),
            line: symbol.line,
        })
        .collect()
}

fn duplicate_imports(code: &str) -> Vec<LineFinding> {
    let mut seen = std::collections::HashSet::new();
    let mut duplicates = Vec::new();
    for (idx, line) in code.lines().enumerate() {
        let Some(caps) = IMPORT_LINE.captures(line.trim()) else {
            continue;
        };
        for part in caps[1].split(',') {
            let Some(module) = part.split_whitespace().next() else {
                continue;
            };
            if !seen.insert(module.to_string()) {
                duplicates.push(LineFinding {
                    value: module.to_string(),
                    line: idx + 1,
                });
            }
        }
    }
    duplicates
}

fn magic_numbers(code: &str) -> Vec<LineFinding> {
    let mut found = Vec::new();
    for (idx, line) in code.lines().enumerate() {
        let code_part = match line.find('#') {
            Some(pos) => &line[..pos],
            None => line,
        };
        let code_part = STRING_LITERAL.replace_all(code_part, "\"\"");
        for caps in NUMBER_LITERAL.captures_iter(&code_part) {
            let literal = &caps[1];
            if is_conventional_number(literal) {
                continue;
            }
            found.push(LineFinding {
                value: literal.to_string(),
                line: idx + 1,
            });
            if found.len() >= MAX_MAGIC_NUMBERS {
                return found;
            }
        }
    }
    found
}

fn is_conventional_number(literal: &str) -> bool {
    match literal.parse::<f64>() {
        Ok(value) => [0.0, 1.0, -1.0, 2.0].contains(&value),
        Err(_) => true,
    }
}

fn duplicate_lines(code: &str) -> Vec<DuplicateLine> {
    let mut seen: HashMap<&str, usize> = HashMap::new();
    let mut duplicates = Vec::new();
    for (idx, line) in code.lines().enumerate() {
        let stripped = line.trim();
        if stripped.len() <= MIN_DUPLICATE_LINE_LEN || stripped.starts_with('#') {
            continue;
        }
        match seen.entry(stripped) {
            Entry::Occupied(first) => {
                duplicates.push(DuplicateLine {
                    line: idx + 1,
                    duplicate_of: *first.get(),
                });
                if duplicates.len() >= MAX_DUPLICATE_LINES {
                    break;
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(idx + 1);
            }
        }
    }
    duplicates
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analyze(code: &str) -> QualityAnalysis {
        Analyzer::new().unwrap().analyze(code, "sample.py")
    }

    #[test]
    fn clean_file_scores_full_marks() {
        let analysis = analyze("def add(a, b):\n    \"\"\"Sum.\"\"\"\n    return a + b\n");
        assert_eq!(analysis.score, 100);
        assert!(analysis.issues.is_empty());
        assert!(analysis.missing_docstrings.is_empty());
        assert!(suggest_improvements(&analysis).is_empty());
    }

    #[test]
    fn flags_complexity_and_penalises_score() {
        let mut code = String::from("def busy(x):\n");
        for i in 0..11 {
            code.push_str(&format!("    if x == {i}:\n        return {i}\n"));
        }
        let analysis = analyze(&code);
        assert_eq!(analysis.complexity.len(), 1);
        assert_eq!(analysis.complexity[0].complexity, 12);
        assert_eq!(analysis.score, 95);
        assert!(analysis.summary().contains("Complex functions: 1"));
        assert!(!analysis.magic_numbers.is_empty());
        assert!(analysis.magic_numbers.len() <= MAX_MAGIC_NUMBERS);
    }

    #[test]
    fn reports_naming_imports_and_duplicates() {
        let code = "import os\nimport os\n\nclass bad_name:\n    pass\n\ndef CamelFn():\n    value = compute_something(42)\n    value = compute_something(42)\n";
        let analysis = analyze(code);
        assert_eq!(analysis.duplicate_imports.len(), 1);
        assert_eq!(analysis.duplicate_imports[0].line, 2);
        let names: Vec<_> = analysis.naming_issues.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["bad_name", "CamelFn"]);
        assert_eq!(analysis.duplicate_lines.len(), 1);
        assert_eq!(analysis.duplicate_lines[0].duplicate_of, 8);
        assert_eq!(analysis.magic_numbers.len(), 2);
    }

    #[test]
    fn syntax_error_sets_error() {
        let analysis = analyze("def broken(:\n    pass\n");
        assert!(analysis.error.is_some());
        assert!(analysis.summary().starts_with("Analysis unavailable"));
    }
}
