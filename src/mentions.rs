use crate::indexer::ContextGraph;
use crate::indexer::scan::{self, ScanOptions};
use crate::model::{
    Mention, MentionKind, ResolvedContext, SymbolKind, SymbolLocation, Suggestion,
};
use crate::util;
use regex::Regex;
use serde::Serialize;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::debug;

/// Searched before falling back to a full walk.
pub const CONVENTIONAL_DIRS: &[&str] = &["src", "core", "lib", "tests"];

const LINES_BEFORE: usize = 2;
const LINES_AFTER: usize = 20;
const MAX_SUGGESTIONS: usize = 10;
const PROMPT_SEPARATOR_WIDTH: usize = 60;

// Tried in order at every `@`; the first shape that matches wins.
static FILE_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^@([\w/\\.-]+\.(?:py|pyi|json|md|txt|toml|ya?ml|cfg|ini))\b")
        .expect("valid regex")
});
static METHOD_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^@([A-Z]\w*)\.([a-z_]\w*)").expect("valid regex"));
static CLASS_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^@([A-Z]\w*)").expect("valid regex"));
static FUNCTION_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^@([a-z_]\w*)").expect("valid regex"));

/// Extracts `@` mentions from free text in order of appearance, without
/// duplicates.
pub fn parse(text: &str) -> Vec<Mention> {
    let mut mentions: Vec<Mention> = Vec::new();
    for (idx, _) in text.match_indices('@') {
        let Some(mention) = parse_at(&text[idx..]) else {
            continue;
        };
        if !mentions.contains(&mention) {
            mentions.push(mention);
        }
    }
    mentions
}

fn parse_at(rest: &str) -> Option<Mention> {
    if let Some(caps) = FILE_TOKEN.captures(rest) {
        return Some(Mention::new(MentionKind::File, &caps[1]));
    }
    if let Some(caps) = METHOD_TOKEN.captures(rest) {
        return Some(Mention::new(
            MentionKind::Method,
            format!("{}.{}", &caps[1], &caps[2]),
        ));
    }
    if let Some(caps) = CLASS_TOKEN.captures(rest) {
        return Some(Mention::new(MentionKind::Class, &caps[1]));
    }
    FUNCTION_TOKEN
        .captures(rest)
        .map(|caps| Mention::new(MentionKind::Function, &caps[1]))
}

/// Symbol names referenced by a set of mentions. A method mention also
/// names its class.
pub fn symbol_names(mentions: &[Mention]) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for mention in mentions {
        let Some(name) = mention.symbol_name() else {
            continue;
        };
        if !names.iter().any(|existing| existing == name) {
            names.push(name.to_string());
        }
    }
    names
}

#[derive(Debug, Clone, Serialize)]
pub struct Expansion {
    pub prompt: String,
    pub mentions: Vec<Mention>,
    pub files_count: usize,
    pub symbols_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved: Option<ResolvedContext>,
}

pub struct MentionResolver<'a> {
    root: PathBuf,
    graph: &'a ContextGraph,
}

impl<'a> MentionResolver<'a> {
    pub fn new(graph: &'a ContextGraph) -> Self {
        Self {
            root: graph.root().to_path_buf(),
            graph,
        }
    }

    /// Never fails: mentions that cannot be located are left out.
    pub fn resolve(&self, mentions: &[Mention]) -> ResolvedContext {
        let mut resolved = ResolvedContext::default();
        for mention in mentions.iter().filter(|m| m.kind == MentionKind::File) {
            if resolved.files.contains_key(&mention.token) {
                continue;
            }
            match self.find_file(&mention.token) {
                Some((path, content)) => {
                    debug!("resolved {} to {path}", mention.raw());
                    resolved.files.insert(mention.token.clone(), content);
                }
                None => debug!("unresolved file mention {}", mention.raw()),
            }
        }

        for name in symbol_names(mentions) {
            let locations = self.find_declarations(&name);
            if !locations.is_empty() {
                resolved.symbols.insert(name, locations);
            }
        }
        for mention in mentions {
            let Some((class, method)) = mention.method_parts() else {
                continue;
            };
            let locations = self.find_method(class, method);
            if !locations.is_empty() {
                resolved.symbols.insert(mention.token.clone(), locations);
            }
        }

        resolved.context = render_context(&resolved);
        resolved
    }

    /// Tries `root/token` and the conventional subdirectories, then walks the
    /// project for a file named `token` or containing it. First hit wins.
    pub fn find_file(&self, token: &str) -> Option<(String, String)> {
        let token = token.replace('\\', "/");
        let mut candidates = vec![self.root.join(&token)];
        candidates.extend(CONVENTIONAL_DIRS.iter().map(|dir| self.root.join(dir).join(&token)));
        for candidate in candidates {
            if let Some(found) = self.read_within_root(&candidate) {
                return Some(found);
            }
        }

        let files = scan::scan_repo(&self.root, ScanOptions::default()).ok()?;
        let suffix = format!("/{token}");
        files
            .iter()
            .filter(|file| {
                let name = file.file_name();
                name == token || name.contains(&token) || file.rel_path.ends_with(&suffix)
            })
            .find_map(|file| self.read_within_root(&file.abs_path))
    }

    fn read_within_root(&self, path: &Path) -> Option<(String, String)> {
        if !path.is_file() {
            return None;
        }
        let canonical = std::fs::canonicalize(path).ok()?;
        let rel = util::normalize_rel_path(&self.root, &canonical).ok()?;
        let content = util::read_to_string(&canonical).ok()?;
        Some((rel, content))
    }

    /// Text scan of every indexed file for `class NAME` / `def NAME`, each
    /// hit reported with a fixed window of surrounding lines.
    pub fn find_declarations(&self, name: &str) -> Vec<SymbolLocation> {
        let mut locations = Vec::new();
        for path in self.graph.files().keys() {
            let Ok(content) = util::read_to_string(&util::to_abs_path(&self.root, path)) else {
                continue;
            };
            let lines: Vec<&str> = content.lines().collect();
            for (idx, line) in lines.iter().enumerate() {
                if declares(line, "class", name) || declares(line, "def", name) {
                    locations.push(location(path, &lines, idx));
                }
            }
        }
        locations
    }

    /// `def method` inside each declaration of `class`.
    fn find_method(&self, class: &str, method: &str) -> Vec<SymbolLocation> {
        let mut locations = Vec::new();
        for hit in self.graph.find_symbol(class) {
            if hit.kind != SymbolKind::Class {
                continue;
            }
            let Some(index) = self.graph.file(&hit.file) else {
                continue;
            };
            let Ok(content) = util::read_to_string(&util::to_abs_path(&self.root, &hit.file)) else {
                continue;
            };
            let lines: Vec<&str> = content.lines().collect();
            for symbol in index.methods_of(class).filter(|s| s.name == method) {
                locations.push(location(&hit.file, &lines, symbol.line.saturating_sub(1)));
            }
        }
        locations
    }

    /// Completion candidates for a partial `@token`: matching Python files,
    /// then matching class and function names.
    pub fn suggest(&self, partial: &str) -> Vec<Suggestion> {
        let Some(query) = partial.strip_prefix('@') else {
            return Vec::new();
        };
        let query = query.to_lowercase();
        let mut suggestions = Vec::new();
        for path in self.graph.files().keys() {
            let name = path.rsplit('/').next().unwrap_or(path);
            if name.to_lowercase().contains(&query) {
                suggestions.push(Suggestion {
                    kind: MentionKind::File,
                    text: format!("@{path}"),
                    description: format!("File: {path}"),
                });
            }
        }
        for (kind, mention_kind, label) in [
            (SymbolKind::Class, MentionKind::Class, "Class"),
            (SymbolKind::Function, MentionKind::Function, "Function"),
        ] {
            for name in self.graph.symbol_names(kind) {
                if !name.to_lowercase().contains(&query) {
                    continue;
                }
                let file = self
                    .graph
                    .find_symbol(&name)
                    .into_iter()
                    .next()
                    .map(|hit| hit.file)
                    .unwrap_or_default();
                suggestions.push(Suggestion {
                    kind: mention_kind,
                    text: format!("@{name}"),
                    description: format!("{label} in {file}"),
                });
            }
        }
        suggestions.truncate(MAX_SUGGESTIONS);
        suggestions
    }

    /// Prepends the resolved context to `prompt`. Text without mentions is
    /// returned unchanged.
    pub fn expand_prompt(&self, prompt: &str) -> Expansion {
        let mentions = parse(prompt);
        if mentions.is_empty() {
            return Expansion {
                prompt: prompt.to_string(),
                mentions,
                files_count: 0,
                symbols_count: 0,
                resolved: None,
            };
        }
        let resolved = self.resolve(&mentions);
        let expanded = format!(
            "{}\n\n{}\n\nUSER REQUEST:\n{prompt}",
            resolved.context,
            "=".repeat(PROMPT_SEPARATOR_WIDTH)
        );
        Expansion {
            prompt: expanded,
            files_count: resolved.files.len(),
            symbols_count: resolved.symbols.len(),
            mentions,
            resolved: Some(resolved),
        }
    }
}

fn declares(line: &str, keyword: &str, name: &str) -> bool {
    let trimmed = line.trim_start();
    let trimmed = trimmed.strip_prefix("async ").unwrap_or(trimmed);
    let Some(rest) = trimmed.strip_prefix(keyword) else {
        return false;
    };
    let Some(rest) = rest.strip_prefix(' ') else {
        return false;
    };
    let Some(after) = rest.trim_start().strip_prefix(name) else {
        return false;
    };
    !after
        .chars()
        .next()
        .is_some_and(|ch| ch.is_alphanumeric() || ch == '_')
}

fn location(path: &str, lines: &[&str], idx: usize) -> SymbolLocation {
    let start = idx.saturating_sub(LINES_BEFORE);
    let end = (idx + LINES_AFTER).min(lines.len());
    SymbolLocation {
        file: path.to_string(),
        line: idx + 1,
        excerpt: util::line_window(lines, start, end),
    }
}

pub fn render_context(resolved: &ResolvedContext) -> String {
    let mut out = String::new();
    if !resolved.files.is_empty() {
        out.push_str("=== MENTIONED FILES ===\n\n");
        for (token, content) in &resolved.files {
            let _ = write!(
                out,
                "### @{token}\n```{}\n{content}\n```\n\n",
                util::fence_language(token)
            );
        }
    }
    if !resolved.symbols.is_empty() {
        out.push_str("=== MENTIONED SYMBOLS ===\n\n");
        for (symbol, locations) in &resolved.symbols {
            let _ = writeln!(out, "### @{symbol}");
            for loc in locations {
                let _ = write!(
                    out,
                    "File: {} (line {})\n```{}\n{}\n```\n\n",
                    loc.file,
                    loc.line,
                    util::fence_language(&loc.file),
                    loc.excerpt
                );
            }
        }
    }
    out
}
