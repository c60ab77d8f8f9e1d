use crate::analyzer::{self, Analyzer};
use crate::cache::TieredCache;
use crate::completion::TextCompletion;
use crate::config::Config;
use crate::diff::SnapshotHistory;
use crate::indexer::ContextGraph;
use crate::indexer::scan::ScanOptions;
use crate::mentions::MentionResolver;
use crate::pipeline::{Approver, EditPipeline, PipelineOptions};
use crate::project_map::ProjectMap;
use crate::session::SessionLog;
use crate::util;
use crate::verify::Verifier;
use anyhow::{Context, Result};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const HELP: &str = "\
Commands:
  /help                      show this help
  /stats                     index, cache and session statistics
  /cache [stats|clear]       inspect or clear the cache
  /analyze <file>            quality report for one file
  /scan                      re-index the project and rewrite the project map
  /memory                    recent requests and frequently edited files
  /config [show|set <k> <v>] show or change configuration
  /undo <file>               restore the file as it was before the last edit
  exit                       leave
Anything else is sent as an edit request; @mentions are expanded first.";

const MEMORY_LIMIT: usize = 5;

enum Flow {
    Continue,
    Exit,
}

/// Interactive loop over one project. Holds the state that outlives a
/// single request: the index, the snapshot history and the session log.
pub struct ChatSession<'a> {
    root: PathBuf,
    config: Config,
    cache: TieredCache,
    completion: &'a dyn TextCompletion,
    approver: &'a dyn Approver,
    verifier: Option<&'a dyn Verifier>,
    graph: ContextGraph,
    project_map: ProjectMap,
    session: Option<SessionLog>,
    snapshots: SnapshotHistory,
}

impl<'a> ChatSession<'a> {
    /// Indexes `root` and loads the project map, building it when absent.
    pub fn open(
        root: &Path,
        config: Config,
        cache: TieredCache,
        completion: &'a dyn TextCompletion,
        approver: &'a dyn Approver,
    ) -> Result<Self> {
        let graph = ContextGraph::build(root, ScanOptions::default(), Some(&cache))?;
        let root = graph.root().to_path_buf();
        let project_map = match ProjectMap::load(&root) {
            Ok(map) => map,
            Err(_) => {
                info!("no project map yet; building one");
                let map = ProjectMap::build(&graph, None, &cache)?;
                map.save(&root)?;
                map
            }
        };
        let session = match SessionLog::for_repo(&root) {
            Ok(log) => Some(log),
            Err(err) => {
                warn!("session log unavailable: {err:#}");
                None
            }
        };
        Ok(Self {
            root,
            config,
            cache,
            completion,
            approver,
            verifier: None,
            graph,
            project_map,
            session,
            snapshots: SnapshotHistory::default(),
        })
    }

    pub fn with_verifier(mut self, verifier: &'a dyn Verifier) -> Self {
        self.verifier = Some(verifier);
        self
    }

    pub fn graph(&self) -> &ContextGraph {
        &self.graph
    }

    pub fn snapshots(&self) -> &SnapshotHistory {
        &self.snapshots
    }

    /// Reads lines until `exit` or end of input.
    pub fn run<R: BufRead, W: Write>(&mut self, input: R, out: &mut W) -> Result<()> {
        writeln!(out, "chromabuddy chat in {} (/help for commands)", self.root.display())?;
        for line in input.lines() {
            let line = line.context("read input")?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match self.handle(line, out) {
                Ok(Flow::Exit) => break,
                Ok(Flow::Continue) => {}
                Err(err) => writeln!(out, "error: {err:#}")?,
            }
            out.flush()?;
        }
        Ok(())
    }

    fn handle<W: Write>(&mut self, line: &str, out: &mut W) -> Result<Flow> {
        if matches!(line, "exit" | "quit" | "/exit" | "/quit") {
            return Ok(Flow::Exit);
        }
        let Some(command) = line.strip_prefix('/') else {
            self.request(line, out)?;
            return Ok(Flow::Continue);
        };
        let mut parts = command.split_whitespace();
        let name = parts.next().unwrap_or_default();
        let args: Vec<&str> = parts.collect();
        match name {
            "help" => writeln!(out, "{HELP}")?,
            "stats" => self.stats(out)?,
            "cache" => match args.first().copied().unwrap_or("stats") {
                "clear" => writeln!(out, "removed {} cached entries", self.cache.clear())?,
                _ => writeln!(out, "{}", self.cache.stats())?,
            },
            "analyze" => match args.first() {
                Some(file) => self.analyze(file, out)?,
                None => writeln!(out, "usage: /analyze <file>")?,
            },
            "scan" => self.rescan(out)?,
            "memory" => self.memory(out)?,
            "config" => self.config_command(&args, out)?,
            "undo" => match args.first() {
                Some(file) => self.undo(file, out)?,
                None => writeln!(out, "usage: /undo <file>")?,
            },
            other => writeln!(out, "unknown command /{other}; try /help")?,
        }
        Ok(Flow::Continue)
    }

    fn request<W: Write>(&mut self, text: &str, out: &mut W) -> Result<()> {
        let expansion = MentionResolver::new(&self.graph).expand_prompt(text);
        if !expansion.mentions.is_empty() {
            writeln!(
                out,
                "context: {} file(s), {} symbol(s)",
                expansion.files_count, expansion.symbols_count
            )?;
        }
        let mut pipeline = EditPipeline::new(
            &self.graph,
            &self.project_map,
            &self.cache,
            self.completion,
            self.approver,
        )
        .with_options(PipelineOptions::from_config(&self.config));
        if let Some(verifier) = self.verifier {
            pipeline = pipeline.with_verifier(verifier);
        }
        let task = pipeline.run(&expansion.prompt, &mut self.snapshots);

        if let Some(intent) = &task.intent {
            writeln!(out, "intent: {intent}")?;
        }
        for change in &task.changes {
            match &change.detail {
                Some(detail) => writeln!(out, "  {} {}: {detail}", change.status, change.path)?,
                None => writeln!(out, "  {} {}", change.status, change.path)?,
            }
        }
        writeln!(out, "{}", task.summary())?;
        if let Some(session) = self.session.as_mut() {
            if let Err(err) = session.record(&task) {
                warn!("failed to record interaction: {err:#}");
            }
        }
        Ok(())
    }

    fn stats<W: Write>(&self, out: &mut W) -> Result<()> {
        let summary = self.graph.summary();
        writeln!(
            out,
            "files: {}, symbols: {}, imports: {}, edges: {}, parse failures: {}",
            summary.total_files,
            summary.total_symbols,
            summary.total_imports,
            summary.heuristic_edges,
            summary.parse_failures
        )?;
        writeln!(out, "cache: {}", self.cache.stats())?;
        if let Some(session) = &self.session {
            let stats = session.stats()?;
            writeln!(
                out,
                "session: {} interactions, {:.1}% successful, {} files tracked",
                stats.total_interactions, stats.success_rate, stats.files_tracked
            )?;
        }
        Ok(())
    }

    fn analyze<W: Write>(&self, file: &str, out: &mut W) -> Result<()> {
        let path = util::to_abs_path(&self.root, file);
        let code = util::read_to_string(&path)?;
        let analysis = Analyzer::new()?.analyze(&code, file);
        writeln!(out, "{}", analysis.summary())?;
        for suggestion in analyzer::suggest_improvements(&analysis) {
            writeln!(out, "  - {suggestion}")?;
        }
        Ok(())
    }

    fn rescan<W: Write>(&mut self, out: &mut W) -> Result<()> {
        self.graph = ContextGraph::build(&self.root, ScanOptions::default(), Some(&self.cache))?;
        self.project_map = ProjectMap::build(&self.graph, None, &self.cache)?;
        let path = self.project_map.save(&self.root)?;
        let stats = self.graph.stats();
        writeln!(
            out,
            "indexed {} file(s) ({} cached, {} parse failures); map written to {}",
            stats.scanned,
            stats.cached,
            stats.parse_failures,
            path.display()
        )?;
        Ok(())
    }

    fn memory<W: Write>(&self, out: &mut W) -> Result<()> {
        let Some(session) = &self.session else {
            writeln!(out, "session log unavailable")?;
            return Ok(());
        };
        writeln!(out, "recent:")?;
        for record in session.recent(MEMORY_LIMIT)? {
            let mark = if record.success { "ok" } else { "--" };
            writeln!(out, "  [{mark}] {} ({})", record.request, record.summary)?;
        }
        writeln!(out, "frequent files:")?;
        for file in session.frequent_files(MEMORY_LIMIT)? {
            writeln!(out, "  {} ({} edits)", file.path, file.edits)?;
        }
        Ok(())
    }

    fn config_command<W: Write>(&mut self, args: &[&str], out: &mut W) -> Result<()> {
        match args {
            [] | ["show"] => {
                writeln!(out, "{}", serde_json::to_string_pretty(&self.config.redacted())?)?;
            }
            ["set", key, value @ ..] if !value.is_empty() => {
                self.config.set_value(key, &value.join(" "))?;
                let path = self.config.save(&self.root)?;
                writeln!(out, "{key} updated in {}", path.display())?;
            }
            _ => writeln!(out, "usage: /config [show|set <key> <value>]")?,
        }
        Ok(())
    }

    fn undo<W: Write>(&mut self, file: &str, out: &mut W) -> Result<()> {
        let Some(previous) = self.snapshots.rollback(file, 1) else {
            writeln!(out, "no snapshot for {file}")?;
            return Ok(());
        };
        util::write_string(&util::to_abs_path(&self.root, file), previous)?;
        writeln!(out, "restored {file}")?;
        Ok(())
    }
}
