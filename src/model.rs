use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SymbolKind {
    Function,
    Class,
    Method,
}

impl SymbolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SymbolKind::Function => "function",
            SymbolKind::Class => "class",
            SymbolKind::Method => "method",
        }
    }
}

impl fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One extracted function, class, or method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolEntry {
    pub kind: SymbolKind,
    pub name: String,
    /// Project-relative path of the declaring file.
    pub file: String,
    /// 1-based line of the declaration.
    pub line: usize,
    pub end_line: usize,
    /// Parameter names for callables, method names for classes.
    pub members: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docstring: Option<String>,
    /// Enclosing class for methods.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
}

/// Everything extracted from one file. Built in one go: a file that fails to
/// parse keeps an empty index with `parse_error` set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileIndex {
    pub path: String,
    pub hash: String,
    pub symbols: Vec<SymbolEntry>,
    pub imports: BTreeSet<String>,
    pub calls: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parse_error: Option<String>,
}

impl FileIndex {
    pub fn empty(path: &str, hash: &str, parse_error: Option<String>) -> Self {
        Self {
            path: path.to_string(),
            hash: hash.to_string(),
            parse_error,
            ..Default::default()
        }
    }

    pub fn functions(&self) -> impl Iterator<Item = &SymbolEntry> {
        self.symbols
            .iter()
            .filter(|s| s.kind == SymbolKind::Function)
    }

    pub fn classes(&self) -> impl Iterator<Item = &SymbolEntry> {
        self.symbols.iter().filter(|s| s.kind == SymbolKind::Class)
    }

    pub fn methods_of<'a>(&'a self, class: &'a str) -> impl Iterator<Item = &'a SymbolEntry> {
        self.symbols.iter().filter(move |s| {
            s.kind == SymbolKind::Method && s.parent.as_deref() == Some(class)
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SymbolHit {
    pub file: String,
    pub kind: SymbolKind,
    pub name: String,
    pub line: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ComplexityReport {
    pub symbols: usize,
    pub imports: usize,
    pub dependencies: usize,
    pub score: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct GraphSummary {
    pub total_files: usize,
    pub total_symbols: usize,
    pub total_imports: usize,
    pub parse_failures: usize,
    pub heuristic_edges: usize,
    pub files: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct IndexStats {
    pub scanned: usize,
    pub parsed: usize,
    pub cached: usize,
    pub parse_failures: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MentionKind {
    File,
    Class,
    Function,
    Method,
}

/// An inline `@token` reference. For methods the token is `Class.method`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Mention {
    pub kind: MentionKind,
    pub token: String,
}

impl Mention {
    pub fn new(kind: MentionKind, token: impl Into<String>) -> Self {
        Self {
            kind,
            token: token.into(),
        }
    }

    /// `@Token` as typed by the user.
    pub fn raw(&self) -> String {
        format!("@{}", self.token)
    }

    /// Symbol name this mention points at: the class for method mentions,
    /// the token itself for class and function mentions.
    pub fn symbol_name(&self) -> Option<&str> {
        match self.kind {
            MentionKind::File => None,
            MentionKind::Class | MentionKind::Function => Some(&self.token),
            MentionKind::Method => self.token.split_once('.').map(|(class, _)| class),
        }
    }

    pub fn method_parts(&self) -> Option<(&str, &str)> {
        if self.kind != MentionKind::Method {
            return None;
        }
        self.token.split_once('.')
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SymbolLocation {
    pub file: String,
    pub line: usize,
    pub excerpt: String,
}

/// Mention resolution output. Unresolved mentions are simply absent.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ResolvedContext {
    pub files: IndexMap<String, String>,
    pub symbols: IndexMap<String, Vec<SymbolLocation>>,
    pub context: String,
}

impl ResolvedContext {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.symbols.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Suggestion {
    pub kind: MentionKind,
    pub text: String,
    pub description: String,
}
