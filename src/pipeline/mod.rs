use crate::analyzer::Analyzer;
use crate::cache::TieredCache;
use crate::completion::{CallError, TextCompletion, extract_code_block};
use crate::config::Config;
use crate::diff::{self, FileDiff, SnapshotHistory};
use crate::indexer::ContextGraph;
use crate::project_map::ProjectMap;
use crate::util;
use crate::verify::Verifier;
use std::fmt::Write as _;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

pub mod task;

pub use task::{EditTask, FileChange, FileStatus, TaskStage};

pub const INTENT_TTL: Duration = Duration::from_secs(3600);
pub const TARGETS_TTL: Duration = Duration::from_secs(1800);
pub const REWRITE_TTL: Duration = Duration::from_secs(600);

/// Related files added per explicitly chosen target.
const RELATED_PER_TARGET: usize = 3;
const RELATED_DEPTH: usize = 1;
const PLAN_CODE_BYTES: usize = 3000;
const ERROR_EXCERPT_BYTES: usize = 500;
const MAX_SYMBOLS_LISTED: usize = 10;

const INTENT_SYSTEM: &str =
    "Summarize the developer's intent as one clear, technical sentence.";
const TARGETS_SYSTEM: &str =
    "List only the names of the files most relevant to the task, separated by commas.";
const PLAN_SYSTEM: &str = "Analyze the code and state the file, the line or function, \
     and the exact change to make. Use at most three sentences.";
const REWRITE_SYSTEM: &str = "You are an expert Python programmer. Rewrite files precisely, \
     keeping every structure and piece of logic that is still needed.";
const FIX_SYSTEM: &str = "You are an expert Python debugger. Fix the code so the error goes away.";

/// Decides whether a proposed change may be written.
pub trait Approver {
    fn approve(&self, diff: &FileDiff) -> bool;
}

/// Approves everything; used when diff approval is disabled.
pub struct AutoApprove;

impl Approver for AutoApprove {
    fn approve(&self, _diff: &FileDiff) -> bool {
        true
    }
}

/// Prints the diff to stderr and reads a yes/no answer from stdin.
pub struct ConsoleApprover;

impl Approver for ConsoleApprover {
    fn approve(&self, diff: &FileDiff) -> bool {
        let mut stderr = io::stderr().lock();
        let _ = writeln!(stderr, "\n{}", diff.render());
        let _ = write!(stderr, "Apply changes to {}? [y/N]: ", diff.path);
        let _ = stderr.flush();
        let mut answer = String::new();
        if io::stdin().lock().read_line(&mut answer).is_err() {
            return false;
        }
        matches!(
            answer.trim().to_lowercase().as_str(),
            "y" | "yes" | "s" | "sim"
        )
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PipelineOptions {
    pub max_targets: usize,
    /// Total verification runs per file, including the first.
    pub max_attempts: u32,
    pub verify: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            max_targets: 5,
            max_attempts: 3,
            verify: true,
        }
    }
}

impl PipelineOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_targets: config.max_targets,
            max_attempts: config.auto_fix_attempts,
            verify: config.auto_test,
        }
    }
}

enum VerifyResult {
    Passed { attempts: u32 },
    Exhausted { attempts: u32, output: String },
    CorrectionFailed { attempts: u32, detail: String },
}

/// Request -> intent -> targets -> rewrite -> diff -> approval -> write ->
/// verify, with a counted correction loop per file.
pub struct EditPipeline<'a> {
    graph: &'a ContextGraph,
    project_map: &'a ProjectMap,
    cache: &'a TieredCache,
    completion: &'a dyn TextCompletion,
    approver: &'a dyn Approver,
    verifier: Option<&'a dyn Verifier>,
    options: PipelineOptions,
}

impl<'a> EditPipeline<'a> {
    pub fn new(
        graph: &'a ContextGraph,
        project_map: &'a ProjectMap,
        cache: &'a TieredCache,
        completion: &'a dyn TextCompletion,
        approver: &'a dyn Approver,
    ) -> Self {
        Self {
            graph,
            project_map,
            cache,
            completion,
            approver,
            verifier: None,
            options: PipelineOptions::default(),
        }
    }

    pub fn with_verifier(mut self, verifier: &'a dyn Verifier) -> Self {
        self.verifier = Some(verifier);
        self
    }

    pub fn with_options(mut self, options: PipelineOptions) -> Self {
        self.options = options;
        self
    }

    fn root(&self) -> &Path {
        self.graph.root()
    }

    /// Canonical path of an existing `target` file inside the project root.
    fn contained_file(&self, target: &str) -> Option<PathBuf> {
        let abs = std::fs::canonicalize(util::to_abs_path(self.root(), target)).ok()?;
        (abs.starts_with(self.root()) && abs.is_file()).then_some(abs)
    }

    /// Runs the whole pipeline. Collaborator failures end the affected step
    /// only; every target reports its own outcome.
    pub fn run(&self, request: &str, snapshots: &mut SnapshotHistory) -> EditTask {
        let mut task = EditTask::new(request);

        let intent = match self.resolve_intent(request) {
            Ok(intent) => intent,
            Err(err) => {
                warn!("intent request failed: {err}");
                task.fail(format!("could not resolve intent: {err}"));
                return task;
            }
        };
        task.intent = Some(intent.clone());
        task.advance(TaskStage::IntentResolved);

        let targets = match self.select_targets(&intent) {
            Ok(targets) => targets,
            Err(err) => {
                warn!("target selection failed: {err}");
                task.fail(format!("could not select target files: {err}"));
                return task;
            }
        };
        if targets.is_empty() {
            task.fail("no target files selected");
            return task;
        }
        info!(targets = ?targets, "selected targets");
        task.targets = targets;
        task.advance(TaskStage::TargetsSelected);

        task.plan = self.edit_plan(&intent, &task.targets);

        let mut analyzer = match Analyzer::new() {
            Ok(analyzer) => Some(analyzer),
            Err(err) => {
                warn!("quality analysis unavailable: {err:#}");
                None
            }
        };
        for target in task.targets.clone() {
            let change = self.process_file(&mut task, &target, &intent, analyzer.as_mut(), snapshots);
            debug!(file = %change.path, status = %change.status, "file outcome");
            task.changes.push(change);
        }
        task.advance(TaskStage::Done);
        task
    }

    /// One-sentence restatement of the request, cached by the raw text.
    pub fn resolve_intent(&self, request: &str) -> Result<String, CallError> {
        let key = format!("intent:{request}");
        if let Some(hit) = self.cache.get(&key, INTENT_TTL) {
            debug!("intent cache hit");
            return Ok(hit);
        }
        let intent = self
            .completion
            .complete(INTENT_SYSTEM, &format!("Intent: {request}"))?
            .trim()
            .to_string();
        if intent.is_empty() {
            return Err(CallError::EmptyResponse);
        }
        self.cache.set(&key, &intent, INTENT_TTL);
        Ok(intent)
    }

    /// Ranked candidates from the collaborator, grown by related files and
    /// capped. Explicit picks keep their order ahead of related ones.
    pub fn select_targets(&self, intent: &str) -> Result<Vec<String>, CallError> {
        let key = format!("targets:{intent}:{}", self.root().display());
        let ranked = match self.cache.get(&key, TARGETS_TTL) {
            Some(hit) => hit,
            None => {
                let summary = self.project_map.context_summary(self.graph);
                let response = self
                    .completion
                    .complete(TARGETS_SYSTEM, &format!("Task: {intent}\n\nFiles:\n{summary}"))?;
                self.cache.set(&key, &response, TARGETS_TTL);
                response
            }
        };

        let explicit: Vec<String> = parse_file_list(&ranked)
            .iter()
            .map(|name| self.resolve_target(name))
            .collect();
        let mut targets: Vec<String> = Vec::new();
        for target in &explicit {
            if !targets.contains(target) {
                targets.push(target.clone());
            }
        }
        for target in &explicit {
            if self.graph.file(target).is_none() {
                continue;
            }
            let related = self
                .graph
                .related_with_distance(target, RELATED_DEPTH)
                .into_iter()
                .filter(|r| r.distance > 0)
                .take(RELATED_PER_TARGET);
            for related in related {
                if !targets.contains(&related.path) {
                    targets.push(related.path);
                }
            }
        }
        targets.truncate(self.options.max_targets);
        Ok(targets)
    }

    /// Maps a name from the collaborator to a project path. Unknown names
    /// are kept so they surface as `not_found`.
    fn resolve_target(&self, name: &str) -> String {
        let name = name.trim_start_matches("./");
        if self.graph.file(name).is_some() || self.project_map.entry(name).is_some() {
            return name.to_string();
        }
        let paths = self
            .graph
            .files()
            .keys()
            .chain(self.project_map.files.iter().map(|entry| &entry.path));
        let mut contains = None;
        for path in paths {
            let file_name = path.rsplit('/').next().unwrap_or(path);
            if file_name == name || path.ends_with(&format!("/{name}")) {
                return path.clone();
            }
            if contains.is_none() && file_name.contains(name) {
                contains = Some(path.clone());
            }
        }
        contains.unwrap_or_else(|| name.to_string())
    }

    /// Short "where and what" note embedded in each rewrite request. Empty
    /// when the collaborator fails.
    fn edit_plan(&self, intent: &str, targets: &[String]) -> String {
        let mut code = String::new();
        for target in targets {
            let Some(abs) = self.contained_file(target) else {
                continue;
            };
            let Ok(content) = util::read_to_string(&abs) else {
                continue;
            };
            let symbols: Vec<&str> = self
                .graph
                .file(target)
                .map(|index| {
                    index
                        .symbols
                        .iter()
                        .take(MAX_SYMBOLS_LISTED)
                        .map(|s| s.name.as_str())
                        .collect()
                })
                .unwrap_or_default();
            let _ = write!(
                code,
                "\n### {target}\nSymbols: {}\n```{}\n{content}\n```\n",
                symbols.join(", "),
                util::fence_language(target)
            );
        }
        let code = util::truncate_str_bytes(&code, PLAN_CODE_BYTES);
        match self
            .completion
            .complete(PLAN_SYSTEM, &format!("Task: {intent}\n\nCode:\n{code}"))
        {
            Ok(plan) => plan.trim().to_string(),
            Err(err) => {
                warn!("edit plan request failed: {err}");
                String::new()
            }
        }
    }

    fn process_file(
        &self,
        task: &mut EditTask,
        target: &str,
        intent: &str,
        analyzer: Option<&mut Analyzer>,
        snapshots: &mut SnapshotHistory,
    ) -> FileChange {
        let Some(abs) = self.contained_file(target) else {
            return FileChange::new(target, FileStatus::NotFound);
        };
        let current = match util::read_to_string(&abs) {
            Ok(content) => content,
            Err(err) => {
                return FileChange::new(target, FileStatus::Error).with_detail(format!("{err:#}"));
            }
        };

        let analysis = match analyzer {
            Some(analyzer) => analyzer.analyze(&current, target).summary(),
            None => String::new(),
        };
        let proposed = match self.rewrite(target, &current, intent, &task.plan, &analysis) {
            Ok(code) => code,
            Err(err) => {
                return FileChange::new(target, FileStatus::Error)
                    .with_detail(format!("rewrite request failed: {err}"));
            }
        };
        task.advance(TaskStage::ContentAssembled);
        if proposed.trim().is_empty() || proposed == current {
            return FileChange::new(target, FileStatus::Unchanged);
        }

        let diff = diff::compare(&current, &proposed, target);
        task.advance(TaskStage::ChangeProposed);
        if !self.approver.approve(&diff) {
            return FileChange::new(target, FileStatus::Rejected).with_diff(diff);
        }

        snapshots.save(target, &current);
        if let Err(err) = util::write_string(&abs, &proposed) {
            return FileChange::new(target, FileStatus::Error)
                .with_detail(format!("{err:#}"))
                .with_diff(diff);
        }
        task.advance(TaskStage::Applied);
        let detail = format!("{} lines ({:+})", diff.stats.new_lines, diff.stats.delta);

        let Some(verifier) = self.verifier.filter(|_| self.options.verify) else {
            return FileChange::new(target, FileStatus::Modified)
                .with_detail(detail)
                .with_diff(diff);
        };
        match self.verify_with_corrections(verifier, &abs, intent) {
            VerifyResult::Passed { attempts } => {
                task.advance(TaskStage::Verified);
                FileChange::new(target, FileStatus::Modified)
                    .with_attempts(attempts)
                    .with_detail(detail)
                    .with_diff(diff)
            }
            VerifyResult::Exhausted { attempts, output } => {
                FileChange::new(target, FileStatus::Error)
                    .with_attempts(attempts)
                    .with_detail(format!(
                        "verification failed after {attempts} attempt(s): {}",
                        util::truncate_str_bytes(output.trim(), ERROR_EXCERPT_BYTES)
                    ))
                    .with_diff(diff)
            }
            VerifyResult::CorrectionFailed { attempts, detail } => {
                FileChange::new(target, FileStatus::Error)
                    .with_attempts(attempts)
                    .with_detail(detail)
                    .with_diff(diff)
            }
        }
    }

    /// Complete replacement content for `target`, cached by (path, intent).
    fn rewrite(
        &self,
        target: &str,
        current: &str,
        intent: &str,
        plan: &str,
        analysis: &str,
    ) -> Result<String, CallError> {
        let key = format!("rewrite:{target}:{intent}");
        if let Some(hit) = self.cache.get(&key, REWRITE_TTL) {
            debug!(file = target, "rewrite cache hit");
            return Ok(hit);
        }
        let language = util::fence_language(target);
        let prompt = format!(
            "FULL FILE: {target}\n```{language}\n{current}\n```\n\n\
             QUALITY ANALYSIS:\n{analysis}\n\n\
             TASK: {intent}\n\nDetails: {plan}\n\n\
             Return the COMPLETE modified file only, with no explanations. \
             Keep existing formatting, imports and structure, and preserve \
             important comments and docstrings.\n\nMODIFIED FILE:"
        );
        let response = self.completion.complete(REWRITE_SYSTEM, &prompt)?;
        let code = match_trailing_newline(&extract_code_block(&response, language), current);
        if !code.trim().is_empty() {
            self.cache.set(&key, &code, REWRITE_TTL);
        }
        Ok(code)
    }

    /// Plain counted loop: run, and on failure feed the output back for a
    /// correction, until a run passes or `max_attempts` runs have failed.
    fn verify_with_corrections(
        &self,
        verifier: &dyn Verifier,
        path: &Path,
        intent: &str,
    ) -> VerifyResult {
        let max_attempts = self.options.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let outcome = verifier.verify(path);
            if outcome.success {
                return VerifyResult::Passed { attempts: attempt };
            }
            debug!(path = %path.display(), attempt, "verification failed");
            if attempt >= max_attempts {
                return VerifyResult::Exhausted {
                    attempts: attempt,
                    output: outcome.output,
                };
            }
            if let Err(detail) = self.correct(path, &outcome.output, intent) {
                return VerifyResult::CorrectionFailed {
                    attempts: attempt,
                    detail,
                };
            }
            attempt += 1;
        }
    }

    fn correct(&self, path: &Path, error: &str, intent: &str) -> Result<(), String> {
        let broken = util::read_to_string(path).map_err(|err| format!("{err:#}"))?;
        let language = util::fence_language(&path.to_string_lossy());
        let prompt = format!(
            "CURRENT CODE:\n```{language}\n{broken}\n```\n\nERROR:\n{}\n\n\
             ORIGINAL INTENT: {intent}\n\nReturn the complete corrected code in ```{language} ... ```",
            util::truncate_str_bytes(error, ERROR_EXCERPT_BYTES)
        );
        let response = self
            .completion
            .complete(FIX_SYSTEM, &prompt)
            .map_err(|err| format!("correction request failed: {err}"))?;
        let fixed = match_trailing_newline(&extract_code_block(&response, language), &broken);
        if fixed.trim().is_empty() {
            return Err("correction was empty".to_string());
        }
        util::write_string(path, &fixed).map_err(|err| format!("{err:#}"))
    }
}

/// Comma- or newline-separated names, with list decoration stripped.
pub fn parse_file_list(text: &str) -> Vec<String> {
    text.split([',', '\n'])
        .map(|part| {
            part.trim()
                .trim_start_matches(['-', '*'])
                .trim()
                .trim_matches(['`', '"', '\'', '@'])
                .trim()
                .to_string()
        })
        .filter(|name| !name.is_empty())
        .collect()
}

fn match_trailing_newline(code: &str, original: &str) -> String {
    let mut code = code.to_string();
    if !code.is_empty() && original.ends_with('\n') && !code.ends_with('\n') {
        code.push('\n');
    }
    code
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_list_parsing_strips_decoration() {
        assert_eq!(
            parse_file_list("main.py, `utils.py`,\n- pkg/io.py\n\n"),
            vec!["main.py", "utils.py", "pkg/io.py"]
        );
    }

    #[test]
    fn trailing_newline_follows_original() {
        assert_eq!(match_trailing_newline("x = 1", "x = 0\n"), "x = 1\n");
        assert_eq!(match_trailing_newline("x = 1", "x = 0"), "x = 1");
        assert_eq!(match_trailing_newline("", "x\n"), "");
    }
}
