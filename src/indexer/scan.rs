use crate::util;
use anyhow::{Context, Result};
use ignore::WalkBuilder;
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Directory names never descended into.
pub const SKIPPED_DIRS: &[&str] = &[
    util::STATE_DIR,
    ".git",
    ".hg",
    ".svn",
    "__pycache__",
    ".mypy_cache",
    ".pytest_cache",
    ".ruff_cache",
    ".tox",
    "venv",
    ".venv",
    "env",
    "node_modules",
    "build",
    "dist",
    "target",
];

#[derive(Debug, Clone)]
pub struct ScannedFile {
    pub rel_path: String,
    pub abs_path: PathBuf,
    pub size: u64,
    pub language: Option<&'static str>,
}

impl ScannedFile {
    pub fn is_python(&self) -> bool {
        self.language == Some("python")
    }

    pub fn file_name(&self) -> &str {
        self.rel_path.rsplit('/').next().unwrap_or(&self.rel_path)
    }
}

struct LanguageSpec {
    name: &'static str,
    extensions: &'static [&'static str],
}

static LANGUAGE_SPECS: &[LanguageSpec] = &[LanguageSpec {
    name: "python",
    extensions: &["py", "pyi"],
}];

#[derive(Debug, Clone, Copy, Default)]
pub struct ScanOptions {
    /// Include files ignored by .gitignore.
    pub no_ignore: bool,
    /// Include hidden files (dot-files) other than the skipped directories.
    pub hidden: bool,
}

impl ScanOptions {
    pub fn new(no_ignore: bool) -> Self {
        Self {
            no_ignore,
            hidden: false,
        }
    }
}

/// Every regular file under `repo_root`, sorted by relative path.
pub fn scan_repo(repo_root: &Path, options: ScanOptions) -> Result<Vec<ScannedFile>> {
    let mut files = Vec::new();
    let mut builder = WalkBuilder::new(repo_root);
    if options.no_ignore {
        builder
            .ignore(false)
            .git_ignore(false)
            .git_global(false)
            .git_exclude(false)
            .parents(false);
    } else {
        builder
            .ignore(true)
            .git_ignore(true)
            .git_global(true)
            .git_exclude(true)
            .parents(true)
            .require_git(false);
    }
    let walker = builder
        .hidden(!options.hidden)
        .filter_entry(|entry| !is_skipped_entry(entry))
        .build();

    for entry in walker {
        let entry = match entry {
            Ok(value) => value,
            Err(err) => {
                warn!("walk error: {err}");
                continue;
            }
        };
        if !entry.file_type().map(|ft| ft.is_file()).unwrap_or(false) {
            continue;
        }
        let path = entry.path();
        let rel_path = util::normalize_rel_path(repo_root, path)?;
        let size = fs::metadata(path)
            .with_context(|| format!("stat {}", path.display()))?
            .len();
        files.push(ScannedFile {
            rel_path,
            abs_path: path.to_path_buf(),
            size,
            language: detect_language(path),
        });
    }
    files.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
    Ok(files)
}

/// Python sources only.
pub fn scan_sources(repo_root: &Path, options: ScanOptions) -> Result<Vec<ScannedFile>> {
    Ok(scan_repo(repo_root, options)?
        .into_iter()
        .filter(ScannedFile::is_python)
        .collect())
}

fn is_skipped_entry(entry: &ignore::DirEntry) -> bool {
    if !entry.file_type().map(|ft| ft.is_dir()).unwrap_or(false) {
        return false;
    }
    let name = entry.file_name();
    SKIPPED_DIRS.iter().any(|dir| name == OsStr::new(dir))
}

fn detect_language(path: &Path) -> Option<&'static str> {
    let ext = path.extension().and_then(|ext| ext.to_str())?;
    for spec in LANGUAGE_SPECS {
        if spec.extensions.iter().any(|candidate| *candidate == ext) {
            return Some(spec.name);
        }
    }
    None
}

pub fn language_for_path(path: &Path) -> Option<&'static str> {
    detect_language(path)
}

pub fn hash_content(content: &[u8]) -> String {
    util::blake3_hex(content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skips_conventional_noise_directories() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        for rel in [
            "app.py",
            "pkg/util.py",
            "__pycache__/app.cpython-312.pyc",
            "venv/lib/site.py",
            ".git/config",
            "README.md",
        ] {
            let path = root.join(rel);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(&path, "x = 1\n").unwrap();
        }

        let all: Vec<_> = scan_repo(root, ScanOptions::default())
            .unwrap()
            .into_iter()
            .map(|f| f.rel_path)
            .collect();
        assert_eq!(all, vec!["README.md", "app.py", "pkg/util.py"]);

        let sources: Vec<_> = scan_sources(root, ScanOptions::default())
            .unwrap()
            .into_iter()
            .map(|f| f.rel_path)
            .collect();
        assert_eq!(sources, vec!["app.py", "pkg/util.py"]);
    }

    #[test]
    fn language_detection() {
        assert_eq!(language_for_path(Path::new("a/b.py")), Some("python"));
        assert_eq!(language_for_path(Path::new("a/b.pyi")), Some("python"));
        assert_eq!(language_for_path(Path::new("a/b.rs")), None);
    }
}
