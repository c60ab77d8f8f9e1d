use crate::cache::TieredCache;
use crate::completion::TextCompletion;
use crate::indexer::ContextGraph;
use crate::indexer::scan::{self, ScanOptions};
use crate::model::{FileIndex, SymbolEntry, SymbolKind};
use crate::util;
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

pub const PROJECT_MAP_FILE: &str = "project_map.json";

const SUMMARY_MAX_LINES: usize = 30;
const SUMMARY_DESCRIPTION_CHARS: usize = 80;
const SUMMARY_MAX_NAMES: usize = 4;
const DESCRIPTION_TTL: Duration = Duration::from_secs(7 * 24 * 3600);
const FILE_PREVIEW_BYTES: usize = 1000;
const OTHER_PREVIEW_BYTES: usize = 500;
const SNIPPET_MAX_LINES: usize = 40;
const MAX_OTHER_FILE_SIZE: u64 = 256 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Python,
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolDescription {
    pub name: String,
    pub line: usize,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassDescription {
    pub name: String,
    pub line: usize,
    pub description: String,
    pub methods: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapEntry {
    pub kind: EntryKind,
    pub path: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub functions: Vec<SymbolDescription>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub classes: Vec<ClassDescription>,
}

/// Project index artifact: every file with its symbols and a short
/// description of each. Produced by `index`, required by `edit`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectMap {
    pub root: String,
    pub generated_at: i64,
    pub files: Vec<MapEntry>,
}

impl ProjectMap {
    pub fn path_for(repo_root: &Path) -> PathBuf {
        util::state_dir(repo_root).join(PROJECT_MAP_FILE)
    }

    /// Builds the map from an indexed graph. With a describer, symbols
    /// lacking a docstring get a generated one-sentence description.
    pub fn build(
        graph: &ContextGraph,
        describer: Option<&dyn TextCompletion>,
        cache: &TieredCache,
    ) -> Result<Self> {
        let root = graph.root();
        let describer = Describer { describer, cache };
        let mut files = Vec::new();
        for file in scan::scan_repo(root, ScanOptions::default())? {
            let entry = match graph.file(&file.rel_path) {
                Some(index) => python_entry(root, index, &describer),
                None => other_entry(&file, &describer),
            };
            files.push(entry);
        }
        Ok(Self {
            root: root.display().to_string(),
            generated_at: util::now_unix_secs(),
            files,
        })
    }

    pub fn save(&self, repo_root: &Path) -> Result<PathBuf> {
        let path = Self::path_for(repo_root);
        let json = serde_json::to_string_pretty(self)?;
        util::write_string(&path, &json)?;
        Ok(path)
    }

    pub fn load(repo_root: &Path) -> Result<Self> {
        let path = Self::path_for(repo_root);
        if !path.exists() {
            bail!(
                "project map not found at {}; run `chromabuddy index` first",
                path.display()
            );
        }
        let raw = util::read_to_string(&path)?;
        serde_json::from_str(&raw).with_context(|| format!("parse {}", path.display()))
    }

    pub fn entry(&self, path: &str) -> Option<&MapEntry> {
        self.files.iter().find(|entry| entry.path == path)
    }

    /// One line per file for target selection, capped at 30 lines:
    /// `path | description | funcs: .. | classes: .. | score: N`.
    pub fn context_summary(&self, graph: &ContextGraph) -> String {
        let mut lines = Vec::new();
        for entry in self.files.iter().take(SUMMARY_MAX_LINES) {
            let description: String = entry
                .description
                .chars()
                .take(SUMMARY_DESCRIPTION_CHARS)
                .collect();
            let mut parts = vec![entry.path.clone(), description];
            if !entry.functions.is_empty() {
                let names: Vec<&str> = entry
                    .functions
                    .iter()
                    .take(SUMMARY_MAX_NAMES)
                    .map(|f| f.name.as_str())
                    .collect();
                parts.push(format!("funcs: {}", names.join(", ")));
            }
            if !entry.classes.is_empty() {
                let names: Vec<&str> = entry
                    .classes
                    .iter()
                    .take(SUMMARY_MAX_NAMES)
                    .map(|c| c.name.as_str())
                    .collect();
                parts.push(format!("classes: {}", names.join(", ")));
            }
            if graph.file(&entry.path).is_some() {
                parts.push(format!("score: {}", graph.complexity_score(&entry.path).score));
            }
            lines.push(parts.join(" | "));
        }
        lines.join("\n")
    }
}

struct Describer<'a> {
    describer: Option<&'a dyn TextCompletion>,
    cache: &'a TieredCache,
}

impl Describer<'_> {
    /// Generated description for `content`, or empty when no describer is
    /// configured or the call fails.
    fn describe(&self, prompt: &str, content: &str) -> String {
        let Some(describer) = self.describer else {
            return String::new();
        };
        let key = format!("describe:{}", util::blake3_hex(content.as_bytes()));
        if let Some(hit) = self.cache.get(&key, DESCRIPTION_TTL) {
            return hit;
        }
        let system = "You write concise descriptions of source code.";
        match describer.complete(system, &format!("{prompt}\n\n{content}")) {
            Ok(text) => {
                let text = first_line(&text);
                self.cache.set(&key, &text, DESCRIPTION_TTL);
                text
            }
            Err(err) => {
                debug!("description request failed: {err}");
                String::new()
            }
        }
    }
}

fn python_entry(root: &Path, index: &FileIndex, describer: &Describer<'_>) -> MapEntry {
    let source = util::read_to_string(&util::to_abs_path(root, &index.path)).unwrap_or_default();
    let lines: Vec<&str> = source.lines().collect();

    let mut description = describer.describe(
        "Describe the purpose of this Python file in at most two sentences.",
        &util::truncate_str_bytes(&source, FILE_PREVIEW_BYTES),
    );
    if description.is_empty() {
        description = format!(
            "{} functions, {} classes",
            index.functions().count(),
            index.classes().count()
        );
    }
    if index.parse_error.is_some() {
        description.push_str(" [file contains syntax errors]");
    }

    let symbol_description = |symbol: &SymbolEntry| -> String {
        if let Some(doc) = &symbol.docstring {
            return first_line(doc);
        }
        let end = symbol.end_line.min(symbol.line + SNIPPET_MAX_LINES - 1);
        let snippet = util::line_window(&lines, symbol.line.saturating_sub(1), end);
        describer.describe(
            &format!("Describe what this {} does in one sentence.", symbol.kind),
            &snippet,
        )
    };

    let functions = index
        .functions()
        .map(|symbol| SymbolDescription {
            name: symbol.name.clone(),
            line: symbol.line,
            description: symbol_description(symbol),
        })
        .collect();
    let classes = index
        .classes()
        .map(|symbol| ClassDescription {
            name: symbol.name.clone(),
            line: symbol.line,
            description: symbol_description(symbol),
            methods: index
                .symbols
                .iter()
                .filter(|s| s.kind == SymbolKind::Method && s.parent.as_deref() == Some(&symbol.name))
                .map(|s| s.name.clone())
                .collect(),
        })
        .collect();

    MapEntry {
        kind: EntryKind::Python,
        path: index.path.clone(),
        description,
        functions,
        classes,
    }
}

fn other_entry(file: &scan::ScannedFile, describer: &Describer<'_>) -> MapEntry {
    let description = if file.size > MAX_OTHER_FILE_SIZE {
        String::new()
    } else {
        match util::read_to_string(&file.abs_path) {
            Ok(content) => {
                let preview = util::truncate_str_bytes(&content, OTHER_PREVIEW_BYTES);
                let generated = describer.describe(
                    &format!("Describe the purpose of the file '{}' in one sentence.", file.file_name()),
                    &preview,
                );
                if generated.is_empty() {
                    first_line(&preview)
                } else {
                    generated
                }
            }
            Err(err) => {
                warn!("unreadable file {}: {err:#}", file.rel_path);
                "binary or unreadable file".to_string()
            }
        }
    };
    MapEntry {
        kind: EntryKind::Other,
        path: file.rel_path.clone(),
        description,
        functions: Vec::new(),
        classes: Vec::new(),
    }
}

fn first_line(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("")
        .to_string()
}
