use serde::Serialize;
use similar::{ChangeTag, TextDiff};
use std::collections::VecDeque;

pub const DIFF_CONTEXT_LINES: usize = 3;
pub const MAX_SNAPSHOTS: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LineTag {
    Add,
    Del,
    Hunk,
    Context,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiffLine {
    pub tag: LineTag,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DiffStats {
    pub old_lines: usize,
    pub new_lines: usize,
    pub delta: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileDiff {
    pub path: String,
    pub unified: String,
    pub lines: Vec<DiffLine>,
    pub stats: DiffStats,
}

impl FileDiff {
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Terminal rendering used when asking for approval.
    pub fn render(&self) -> String {
        let rule = "=".repeat(60);
        let mut out = format!(
            "{rule}\nFile: {}\nDelta: {:+} lines\n{rule}\n",
            self.path, self.stats.delta
        );
        for line in &self.lines {
            let rendered = match line.tag {
                LineTag::Add => format!("  + {}", line.text),
                LineTag::Del => format!("  - {}", line.text),
                LineTag::Hunk => format!("\n{}", line.text),
                LineTag::Context => format!("    {}", line.text),
            };
            out.push_str(&rendered);
            out.push('\n');
        }
        out.push_str(&rule);
        out
    }
}

/// Unified diff between two versions of `path`.
pub fn compare(old_content: &str, new_content: &str, path: &str) -> FileDiff {
    let diff = TextDiff::from_lines(old_content, new_content);
    let mut unified = String::new();
    let mut lines = Vec::new();

    for group in diff.grouped_ops(DIFF_CONTEXT_LINES) {
        if unified.is_empty() {
            unified.push_str(&format!("--- a/{path}\n+++ b/{path}\n"));
        }
        let (old_start, old_count, new_start, new_count) = group.iter().fold(
            (usize::MAX, 0usize, usize::MAX, 0usize),
            |(os, oc, ns, nc), op| {
                let old_range = op.old_range();
                let new_range = op.new_range();
                (
                    os.min(old_range.start),
                    oc + old_range.len(),
                    ns.min(new_range.start),
                    nc + new_range.len(),
                )
            },
        );
        let header = format!(
            "@@ -{},{} +{},{} @@",
            old_start + 1,
            old_count,
            new_start + 1,
            new_count
        );
        unified.push_str(&header);
        unified.push('\n');
        lines.push(DiffLine {
            tag: LineTag::Hunk,
            text: header,
        });

        for op in &group {
            for change in diff.iter_changes(op) {
                let (prefix, tag) = match change.tag() {
                    ChangeTag::Delete => ("-", LineTag::Del),
                    ChangeTag::Insert => ("+", LineTag::Add),
                    ChangeTag::Equal => (" ", LineTag::Context),
                };
                let text = change.value().trim_end_matches(['\n', '\r']).to_string();
                unified.push_str(prefix);
                unified.push_str(&text);
                unified.push('\n');
                lines.push(DiffLine { tag, text });
            }
        }
    }

    FileDiff {
        path: path.to_string(),
        unified,
        lines,
        stats: stats(old_content, new_content),
    }
}

fn stats(old_content: &str, new_content: &str) -> DiffStats {
    let old_lines = old_content.lines().count();
    let new_lines = new_content.lines().count();
    DiffStats {
        old_lines,
        new_lines,
        delta: new_lines as i64 - old_lines as i64,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub path: String,
    pub content: String,
    pub taken_at: i64,
}

/// Pre-write contents of recently edited files, oldest dropped first.
#[derive(Debug, Clone)]
pub struct SnapshotHistory {
    snapshots: VecDeque<Snapshot>,
    capacity: usize,
}

impl Default for SnapshotHistory {
    fn default() -> Self {
        Self::with_capacity(MAX_SNAPSHOTS)
    }
}

impl SnapshotHistory {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            snapshots: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn save(&mut self, path: &str, content: &str) {
        self.snapshots.push_back(Snapshot {
            path: path.to_string(),
            content: content.to_string(),
            taken_at: crate::util::now_unix_secs(),
        });
        while self.snapshots.len() > self.capacity {
            self.snapshots.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// Content of `path` as it was `steps` snapshots ago; `steps == 1` is
    /// the state before the latest write.
    pub fn rollback(&self, path: &str, steps: usize) -> Option<&str> {
        if steps == 0 {
            return None;
        }
        self.snapshots
            .iter()
            .rev()
            .filter(|snapshot| snapshot.path == path)
            .nth(steps - 1)
            .map(|snapshot| snapshot.content.as_str())
    }

    pub fn paths(&self) -> Vec<&str> {
        let mut paths: Vec<&str> = Vec::new();
        for snapshot in self.snapshots.iter().rev() {
            if !paths.contains(&snapshot.path.as_str()) {
                paths.push(&snapshot.path);
            }
        }
        paths
    }
}
