use crate::cache::TieredCache;
use crate::model::{
    ComplexityReport, FileIndex, GraphSummary, IndexStats, SymbolHit, SymbolKind,
};
use anyhow::Result;
use indexmap::IndexMap;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub mod extract;
pub mod graph;
pub mod python;
pub mod scan;

use extract::LanguageExtractor;
use graph::{DependencyGraph, RelatedFile};

/// Indexes are keyed by content hash, so they stay valid as long as the file
/// is unchanged. The TTL only bounds how long stale records linger.
const INDEX_CACHE_TTL: Duration = Duration::from_secs(7 * 24 * 3600);

/// Symbol tables for every Python file of a project plus the heuristic
/// dependency graph derived from their imports.
pub struct ContextGraph {
    root: PathBuf,
    files: IndexMap<String, FileIndex>,
    dependencies: DependencyGraph,
    stats: IndexStats,
}

impl ContextGraph {
    pub fn build(root: &Path, options: scan::ScanOptions, cache: Option<&TieredCache>) -> Result<Self> {
        let started = Instant::now();
        let root = std::fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
        let scanned = scan::scan_sources(&root, options)?;
        let mut extractor = python::PythonExtractor::new()?;
        let mut stats = IndexStats {
            scanned: scanned.len(),
            ..Default::default()
        };

        let mut files = IndexMap::new();
        for file in &scanned {
            let index = index_file(&mut extractor, file, cache, &mut stats);
            files.insert(file.rel_path.clone(), index);
        }

        let dependencies = DependencyGraph::build(&files);
        info!(
            files = stats.scanned,
            parsed = stats.parsed,
            cached = stats.cached,
            failures = stats.parse_failures,
            edges = dependencies.edges().len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "indexed project"
        );
        Ok(Self {
            root,
            files,
            dependencies,
            stats,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn stats(&self) -> IndexStats {
        self.stats
    }

    pub fn files(&self) -> &IndexMap<String, FileIndex> {
        &self.files
    }

    pub fn file(&self, path: &str) -> Option<&FileIndex> {
        self.files.get(path)
    }

    pub fn dependencies(&self) -> &DependencyGraph {
        &self.dependencies
    }

    /// `{file}` for depth 0, otherwise every file reachable within `depth`
    /// hops along either edge direction.
    pub fn related_files(&self, file: &str, depth: usize) -> BTreeSet<String> {
        self.dependencies.related_files(file, depth)
    }

    pub fn related_with_distance(&self, file: &str, depth: usize) -> Vec<RelatedFile> {
        self.dependencies.related_with_distance(file, depth)
    }

    /// Exact-name lookup across all indexed files, in path order.
    pub fn find_symbol(&self, name: &str) -> Vec<SymbolHit> {
        let mut hits = Vec::new();
        for index in self.files.values() {
            for symbol in &index.symbols {
                if symbol.name != name {
                    continue;
                }
                hits.push(SymbolHit {
                    file: symbol.file.clone(),
                    kind: symbol.kind,
                    name: symbol.name.clone(),
                    line: symbol.line,
                });
            }
        }
        hits
    }

    /// `symbols * 2 + imports + dependencies * 3`. Unknown files score zero.
    pub fn complexity_score(&self, file: &str) -> ComplexityReport {
        let Some(index) = self.files.get(file) else {
            return ComplexityReport {
                symbols: 0,
                imports: 0,
                dependencies: 0,
                score: 0,
            };
        };
        let symbols = index.symbols.len();
        let imports = index.imports.len();
        let dependencies = self.dependencies.dependency_count(file);
        ComplexityReport {
            symbols,
            imports,
            dependencies,
            score: symbols * 2 + imports + dependencies * 3,
        }
    }

    pub fn summary(&self) -> GraphSummary {
        GraphSummary {
            total_files: self.files.len(),
            total_symbols: self.files.values().map(|f| f.symbols.len()).sum(),
            total_imports: self.files.values().map(|f| f.imports.len()).sum(),
            parse_failures: self
                .files
                .values()
                .filter(|f| f.parse_error.is_some())
                .count(),
            heuristic_edges: self.dependencies.edges().len(),
            files: self.files.keys().cloned().collect(),
        }
    }

    /// Symbol names of one kind, deduplicated, across the project.
    pub fn symbol_names(&self, kind: SymbolKind) -> BTreeSet<String> {
        self.files
            .values()
            .flat_map(|f| f.symbols.iter())
            .filter(|s| s.kind == kind)
            .map(|s| s.name.clone())
            .collect()
    }
}

fn index_file(
    extractor: &mut python::PythonExtractor,
    file: &scan::ScannedFile,
    cache: Option<&TieredCache>,
    stats: &mut IndexStats,
) -> FileIndex {
    let bytes = match std::fs::read(&file.abs_path) {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!("read error {}: {err}", file.rel_path);
            stats.parse_failures += 1;
            return FileIndex::empty(&file.rel_path, "", Some(format!("read error: {err}")));
        }
    };
    let hash = scan::hash_content(&bytes);
    let cache_key = format!("index:{}:{hash}", file.rel_path);
    if let Some(cache) = cache {
        if let Some(index) = cache.get_json::<FileIndex>(&cache_key, INDEX_CACHE_TTL) {
            stats.cached += 1;
            if index.parse_error.is_some() {
                stats.parse_failures += 1;
            }
            return index;
        }
    }

    let index = match String::from_utf8(bytes) {
        Ok(source) => match extractor.extract(&file.rel_path, &source) {
            Ok(extracted) => {
                stats.parsed += 1;
                FileIndex {
                    path: file.rel_path.clone(),
                    hash,
                    symbols: extracted.symbols,
                    imports: extracted.imports,
                    calls: extracted.calls,
                    parse_error: None,
                }
            }
            Err(err) => {
                debug!("parse failure {}: {err}", file.rel_path);
                stats.parse_failures += 1;
                FileIndex::empty(&file.rel_path, &hash, Some(err.to_string()))
            }
        },
        Err(_) => {
            stats.parse_failures += 1;
            FileIndex::empty(&file.rel_path, &hash, Some("not valid UTF-8".to_string()))
        }
    };
    if let Some(cache) = cache {
        cache.set_json(&cache_key, &index, INDEX_CACHE_TTL);
    }
    index
}
