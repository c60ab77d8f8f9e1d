use crate::indexer::python::module_name_from_rel_path;
use crate::model::FileIndex;
use indexmap::IndexMap;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// A file-to-file relation inferred from an import name. Approximate: it is
/// never a resolved module path, only a name match.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct HeuristicEdge {
    pub from: String,
    pub to: String,
    /// Import name that produced the match.
    pub via_import: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelatedFile {
    pub path: String,
    pub distance: usize,
}

#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    edges: Vec<HeuristicEdge>,
    forward: BTreeMap<String, BTreeSet<String>>,
    reverse: BTreeMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    /// Second pass over a complete set of indexes: an import matches a file
    /// when one dotted name is a suffix of the other at a segment boundary.
    pub fn build(files: &IndexMap<String, FileIndex>) -> Self {
        let modules: Vec<(String, String)> = files
            .keys()
            .map(|path| (path.clone(), module_name_from_rel_path(path)))
            .filter(|(_, module)| !module.is_empty())
            .collect();

        let mut graph = DependencyGraph::default();
        for (path, index) in files {
            for import in &index.imports {
                for (target, module) in &modules {
                    if target == path {
                        continue;
                    }
                    if !dotted_suffix_match(import, module) {
                        continue;
                    }
                    graph.insert(HeuristicEdge {
                        from: path.clone(),
                        to: target.clone(),
                        via_import: import.clone(),
                    });
                }
            }
        }
        graph.edges.sort();
        graph
    }

    fn insert(&mut self, edge: HeuristicEdge) {
        let added = self
            .forward
            .entry(edge.from.clone())
            .or_default()
            .insert(edge.to.clone());
        if !added {
            return;
        }
        self.reverse
            .entry(edge.to.clone())
            .or_default()
            .insert(edge.from.clone());
        self.edges.push(edge);
    }

    pub fn edges(&self) -> &[HeuristicEdge] {
        &self.edges
    }

    pub fn dependencies_of(&self, file: &str) -> impl Iterator<Item = &String> {
        self.forward.get(file).into_iter().flatten()
    }

    pub fn dependents_of(&self, file: &str) -> impl Iterator<Item = &String> {
        self.reverse.get(file).into_iter().flatten()
    }

    pub fn dependency_count(&self, file: &str) -> usize {
        self.forward.get(file).map(|set| set.len()).unwrap_or(0)
    }

    /// Bounded breadth-first walk over both edge directions. Every file is
    /// visited once so cycles terminate; `depth == 0` yields only `file`.
    pub fn related_with_distance(&self, file: &str, depth: usize) -> Vec<RelatedFile> {
        let mut visited: BTreeMap<String, usize> = BTreeMap::new();
        let mut queue = VecDeque::new();
        visited.insert(file.to_string(), 0);
        queue.push_back((file.to_string(), 0usize));

        while let Some((current, distance)) = queue.pop_front() {
            if distance >= depth {
                continue;
            }
            let neighbours = self
                .dependencies_of(&current)
                .chain(self.dependents_of(&current));
            for next in neighbours {
                if visited.contains_key(next) {
                    continue;
                }
                visited.insert(next.clone(), distance + 1);
                queue.push_back((next.clone(), distance + 1));
            }
        }

        let mut related: Vec<RelatedFile> = visited
            .into_iter()
            .map(|(path, distance)| RelatedFile { path, distance })
            .collect();
        related.sort_by(|a, b| a.distance.cmp(&b.distance).then_with(|| a.path.cmp(&b.path)));
        related
    }

    pub fn related_files(&self, file: &str, depth: usize) -> BTreeSet<String> {
        self.related_with_distance(file, depth)
            .into_iter()
            .map(|related| related.path)
            .collect()
    }
}

fn dotted_suffix_match(import: &str, module: &str) -> bool {
    is_segment_suffix(module, import) || is_segment_suffix(import, module)
}

fn is_segment_suffix(full: &str, suffix: &str) -> bool {
    if suffix.is_empty() || !full.ends_with(suffix) {
        return false;
    }
    let prefix_len = full.len() - suffix.len();
    prefix_len == 0 || full.as_bytes()[prefix_len - 1] == b'.'
}
