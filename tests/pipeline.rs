use chromabuddy::cache::TieredCache;
use chromabuddy::completion::{CallError, TextCompletion};
use chromabuddy::diff::{FileDiff, SnapshotHistory};
use chromabuddy::indexer::ContextGraph;
use chromabuddy::indexer::scan::ScanOptions;
use chromabuddy::pipeline::{
    Approver, AutoApprove, EditPipeline, FileStatus, PipelineOptions, TaskStage,
};
use chromabuddy::project_map::ProjectMap;
use chromabuddy::verify::{Verifier, VerifyOutcome};
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};

const ORIGINAL: &str = "def run():\n    return 1\n";

/// Replies in order; an exhausted script or an `Err` entry is a failed call.
struct Scripted {
    replies: RefCell<VecDeque<Result<String, CallError>>>,
    calls: Cell<usize>,
}

impl Scripted {
    fn new(replies: Vec<Result<&str, CallError>>) -> Self {
        Self {
            replies: RefCell::new(
                replies
                    .into_iter()
                    .map(|reply| reply.map(str::to_string))
                    .collect(),
            ),
            calls: Cell::new(0),
        }
    }

    fn ok(replies: &[&str]) -> Self {
        Self::new(replies.iter().map(|r| Ok(*r)).collect())
    }

    fn remaining(&self) -> usize {
        self.replies.borrow().len()
    }
}

impl TextCompletion for Scripted {
    fn complete(&self, _system: &str, _user: &str) -> Result<String, CallError> {
        self.calls.set(self.calls.get() + 1);
        self.replies
            .borrow_mut()
            .pop_front()
            .unwrap_or(Err(CallError::EmptyResponse))
    }
}

struct FixedVerifier {
    pass: bool,
    runs: Cell<u32>,
}

impl FixedVerifier {
    fn new(pass: bool) -> Self {
        Self {
            pass,
            runs: Cell::new(0),
        }
    }
}

impl Verifier for FixedVerifier {
    fn verify(&self, _path: &Path) -> VerifyOutcome {
        self.runs.set(self.runs.get() + 1);
        if self.pass {
            VerifyOutcome::passed("ok")
        } else {
            VerifyOutcome::failed("NameError: name 'x' is not defined")
        }
    }
}

struct RejectAll;

impl Approver for RejectAll {
    fn approve(&self, _diff: &FileDiff) -> bool {
        false
    }
}

/// Fails verification for files named `bad.py`.
struct FailsByName {
    runs: RefCell<Vec<String>>,
}

impl FailsByName {
    fn new() -> Self {
        Self {
            runs: RefCell::new(Vec::new()),
        }
    }

    fn runs_for(&self, name: &str) -> usize {
        self.runs.borrow().iter().filter(|run| *run == name).count()
    }
}

impl Verifier for FailsByName {
    fn verify(&self, path: &Path) -> VerifyOutcome {
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        let failed = name == "bad.py";
        self.runs.borrow_mut().push(name);
        if failed {
            VerifyOutcome::failed("SyntaxError: invalid syntax")
        } else {
            VerifyOutcome::passed("ok")
        }
    }
}

/// Rejects every diff for `skip.py`.
struct RejectsByName;

impl Approver for RejectsByName {
    fn approve(&self, diff: &FileDiff) -> bool {
        diff.path != "skip.py"
    }
}

struct Project {
    dir: tempfile::TempDir,
    root: PathBuf,
    graph: ContextGraph,
    map: ProjectMap,
    cache: TieredCache,
}

impl Project {
    fn new(files: &[(&str, &str)]) -> Self {
        Self::rooted_at(".", files)
    }

    /// Writes `files` relative to a fresh temp dir and indexes `root` below it.
    fn rooted_at(root: &str, files: &[(&str, &str)]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        for (rel, content) in files {
            let path = dir.path().join(rel);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, content).unwrap();
        }
        let root = dir.path().join(root);
        std::fs::create_dir_all(&root).unwrap();
        let cache = TieredCache::in_memory();
        let graph = ContextGraph::build(&root, ScanOptions::default(), None).unwrap();
        let map = ProjectMap::build(&graph, None, &cache).unwrap();
        Self {
            dir,
            root,
            graph,
            map,
            cache,
        }
    }

    fn read(&self, rel: &str) -> String {
        std::fs::read_to_string(self.root.join(rel)).unwrap()
    }
}

fn options(max_attempts: u32) -> PipelineOptions {
    PipelineOptions {
        max_attempts,
        ..PipelineOptions::default()
    }
}

#[test]
fn approved_change_is_written_and_verified() {
    let project = Project::new(&[("app.py", ORIGINAL)]);
    let completion = Scripted::ok(&[
        "Make run return 2.",
        "app.py",
        "Change the return value of run.",
        "Here it is:\n```python\ndef run():\n    return 2\n```",
    ]);
    let verifier = FixedVerifier::new(true);
    let pipeline = EditPipeline::new(
        &project.graph,
        &project.map,
        &project.cache,
        &completion,
        &AutoApprove,
    )
    .with_verifier(&verifier)
    .with_options(options(3));

    let mut snapshots = SnapshotHistory::default();
    let task = pipeline.run("make run return 2", &mut snapshots);

    assert!(task.error.is_none(), "{:?}", task.error);
    assert_eq!(task.stage, TaskStage::Done);
    assert_eq!(task.intent.as_deref(), Some("Make run return 2."));
    assert_eq!(task.targets, vec!["app.py"]);
    assert_eq!(task.plan, "Change the return value of run.");
    assert_eq!(task.changes.len(), 1);

    let change = &task.changes[0];
    assert_eq!(change.status, FileStatus::Modified);
    assert_eq!(change.attempts, 1);
    let diff = change.diff.as_ref().unwrap();
    assert!(diff.unified.contains("-    return 1"));
    assert!(diff.unified.contains("+    return 2"));
    assert_eq!(diff.stats.delta, 0);

    assert_eq!(project.read("app.py"), "def run():\n    return 2\n");
    assert_eq!(snapshots.rollback("app.py", 1), Some(ORIGINAL));
    assert_eq!(verifier.runs.get(), 1);
    assert!(task.succeeded());
}

#[test]
fn failing_verification_stops_after_max_attempts() {
    let project = Project::new(&[("app.py", ORIGINAL)]);
    let completion = Scripted::ok(&[
        "Make run return x.",
        "app.py",
        "",
        "```python\ndef run():\n    return x\n```",
        "```python\ndef run():\n    return y\n```",
        "```python\ndef run():\n    return z\n```",
    ]);
    let verifier = FixedVerifier::new(false);
    let pipeline = EditPipeline::new(
        &project.graph,
        &project.map,
        &project.cache,
        &completion,
        &AutoApprove,
    )
    .with_verifier(&verifier)
    .with_options(options(3));

    let task = pipeline.run("use x", &mut SnapshotHistory::default());

    let change = &task.changes[0];
    assert_eq!(change.status, FileStatus::Error);
    assert_eq!(change.attempts, 3);
    assert!(change.detail.as_deref().unwrap().contains("NameError"));
    assert_eq!(verifier.runs.get(), 3);
    assert_eq!(project.read("app.py"), "def run():\n    return z\n");
    assert_eq!(completion.remaining(), 0);
    assert!(!task.succeeded());
}

#[test]
fn failed_correction_ends_the_loop() {
    let project = Project::new(&[("app.py", ORIGINAL)]);
    let completion = Scripted::new(vec![
        Ok("Break run."),
        Ok("app.py"),
        Ok("plan"),
        Ok("```python\ndef run():\n    return x\n```"),
        Err(CallError::Transport("connection reset".to_string())),
    ]);
    let verifier = FixedVerifier::new(false);
    let pipeline = EditPipeline::new(
        &project.graph,
        &project.map,
        &project.cache,
        &completion,
        &AutoApprove,
    )
    .with_verifier(&verifier)
    .with_options(options(3));

    let task = pipeline.run("break it", &mut SnapshotHistory::default());
    let change = &task.changes[0];
    assert_eq!(change.status, FileStatus::Error);
    assert_eq!(change.attempts, 1);
    assert!(change.detail.as_deref().unwrap().contains("correction request failed"));
    assert_eq!(verifier.runs.get(), 1);
}

#[test]
fn rejected_change_leaves_file_untouched() {
    let project = Project::new(&[("app.py", ORIGINAL)]);
    let completion = Scripted::ok(&[
        "Make run return 2.",
        "app.py",
        "plan",
        "```python\ndef run():\n    return 2\n```",
    ]);
    let verifier = FixedVerifier::new(true);
    let pipeline = EditPipeline::new(
        &project.graph,
        &project.map,
        &project.cache,
        &completion,
        &RejectAll,
    )
    .with_verifier(&verifier);

    let mut snapshots = SnapshotHistory::default();
    let task = pipeline.run("make run return 2", &mut snapshots);
    assert_eq!(task.changes[0].status, FileStatus::Rejected);
    assert!(task.changes[0].diff.is_some());
    assert_eq!(project.read("app.py"), ORIGINAL);
    assert!(snapshots.is_empty());
    assert_eq!(verifier.runs.get(), 0);
}

#[test]
fn unknown_targets_are_reported_not_found() {
    let project = Project::new(&[("app.py", ORIGINAL)]);
    let completion = Scripted::ok(&["Touch files.", "ghost.py, app.py", "plan", ORIGINAL]);
    let pipeline = EditPipeline::new(
        &project.graph,
        &project.map,
        &project.cache,
        &completion,
        &AutoApprove,
    );

    let task = pipeline.run("touch files", &mut SnapshotHistory::default());
    assert_eq!(task.targets, vec!["ghost.py", "app.py"]);
    assert_eq!(task.changes[0].status, FileStatus::NotFound);
    assert_eq!(task.changes[1].status, FileStatus::Unchanged);
    assert_eq!(task.summary(), "2 file(s), 1 unchanged, 1 not_found");
}

#[test]
fn collaborator_failures_end_the_task_cleanly() {
    let project = Project::new(&[("app.py", ORIGINAL)]);

    let completion = Scripted::new(vec![Err(CallError::Status {
        code: 500,
        body: "boom".to_string(),
    })]);
    let pipeline = EditPipeline::new(
        &project.graph,
        &project.map,
        &project.cache,
        &completion,
        &AutoApprove,
    );
    let task = pipeline.run("anything", &mut SnapshotHistory::default());
    assert!(task.error.as_deref().unwrap().contains("intent"));
    assert!(task.changes.is_empty());
    assert_eq!(task.stage, TaskStage::Done);

    let completion = Scripted::new(vec![Ok("Do a thing."), Err(CallError::EmptyResponse)]);
    let pipeline = EditPipeline::new(
        &project.graph,
        &project.map,
        &project.cache,
        &completion,
        &AutoApprove,
    );
    let task = pipeline.run("something else", &mut SnapshotHistory::default());
    assert_eq!(task.intent.as_deref(), Some("Do a thing."));
    assert!(task.error.as_deref().unwrap().contains("target"));
    assert_eq!(project.read("app.py"), ORIGINAL);
}

#[test]
fn related_files_extend_targets_up_to_the_cap() {
    let project = Project::new(&[
        ("main.py", "import utils\n\ndef main():\n    return utils.helper()\n"),
        ("utils.py", "def helper():\n    return 1\n"),
        ("other.py", "def unrelated():\n    return 0\n"),
    ]);

    let completion = Scripted::ok(&["main.py"]);
    let pipeline = EditPipeline::new(
        &project.graph,
        &project.map,
        &project.cache,
        &completion,
        &AutoApprove,
    );
    let targets = pipeline.select_targets("Refactor main.").unwrap();
    assert_eq!(targets, vec!["main.py", "utils.py"]);

    let completion = Scripted::ok(&[]);
    let capped = EditPipeline::new(
        &project.graph,
        &project.map,
        &project.cache,
        &completion,
        &AutoApprove,
    )
    .with_options(PipelineOptions {
        max_targets: 1,
        ..PipelineOptions::default()
    });
    assert_eq!(capped.select_targets("Refactor main.").unwrap(), vec!["main.py"]);
    assert_eq!(completion.calls.get(), 0);
}

#[test]
fn repeated_request_is_served_from_the_cache() {
    let project = Project::new(&[("app.py", ORIGINAL)]);
    let completion = Scripted::ok(&[
        "Make run return 2.",
        "app.py",
        "plan",
        "```python\ndef run():\n    return 2\n```",
        "plan again",
    ]);
    let pipeline = EditPipeline::new(
        &project.graph,
        &project.map,
        &project.cache,
        &completion,
        &AutoApprove,
    );
    let first = pipeline.run("make run return 2", &mut SnapshotHistory::default());
    assert_eq!(first.changes[0].status, FileStatus::Modified);

    let second = pipeline.run("make run return 2", &mut SnapshotHistory::default());
    assert_eq!(second.changes[0].status, FileStatus::Unchanged);
    assert_eq!(completion.calls.get(), 5);
    assert!(project.cache.stats().hits >= 3);
}

#[test]
fn targets_outside_the_project_are_not_found() {
    let secret = "TOKEN = 'keep me'\n";
    let project = Project::rooted_at(
        "proj",
        &[("secret.py", secret), ("proj/app.py", ORIGINAL)],
    );
    let completion = Scripted::ok(&[
        "Edit.",
        "../secret.py",
        "plan",
        "```python\nPWNED = 1\n```",
    ]);
    let pipeline = EditPipeline::new(
        &project.graph,
        &project.map,
        &project.cache,
        &completion,
        &AutoApprove,
    )
    .with_options(PipelineOptions {
        verify: false,
        ..PipelineOptions::default()
    });

    let mut snapshots = SnapshotHistory::default();
    let task = pipeline.run("edit the secret", &mut snapshots);
    assert_eq!(task.targets, vec!["../secret.py"]);
    assert_eq!(task.changes.len(), 1);
    assert_eq!(task.changes[0].status, FileStatus::NotFound);
    assert_eq!(
        std::fs::read_to_string(project.dir.path().join("secret.py")).unwrap(),
        secret
    );
    assert_eq!(project.read("app.py"), ORIGINAL);
    assert!(snapshots.is_empty());
}

#[test]
fn failing_file_does_not_block_its_sibling() {
    let project = Project::new(&[("good.py", ORIGINAL), ("bad.py", ORIGINAL)]);
    let completion = Scripted::ok(&[
        "Change both files.",
        "good.py, bad.py",
        "plan",
        "```python\ndef run():\n    return 2\n```",
        "```python\ndef run(:\n    return 2\n```",
        "```python\ndef run(::\n    return 2\n```",
    ]);
    let verifier = FailsByName::new();
    let pipeline = EditPipeline::new(
        &project.graph,
        &project.map,
        &project.cache,
        &completion,
        &AutoApprove,
    )
    .with_verifier(&verifier)
    .with_options(options(2));

    let task = pipeline.run("change both files", &mut SnapshotHistory::default());
    assert_eq!(task.targets, vec!["good.py", "bad.py"]);
    assert_eq!(task.changes.len(), 2);

    let good = &task.changes[0];
    assert_eq!(good.path, "good.py");
    assert_eq!(good.status, FileStatus::Modified);
    assert_eq!(good.attempts, 1);
    assert_eq!(project.read("good.py"), "def run():\n    return 2\n");

    let bad = &task.changes[1];
    assert_eq!(bad.path, "bad.py");
    assert_eq!(bad.status, FileStatus::Error);
    assert_eq!(bad.attempts, 2);
    assert!(bad.detail.as_deref().unwrap().contains("SyntaxError"));

    assert_eq!(verifier.runs_for("good.py"), 1);
    assert_eq!(verifier.runs_for("bad.py"), 2);
    assert_eq!(completion.remaining(), 0);
    assert!(!task.succeeded());
    assert_eq!(task.summary(), "2 file(s), 1 modified, 1 error");
}

#[test]
fn rejected_file_does_not_block_its_sibling() {
    let project = Project::new(&[("skip.py", ORIGINAL), ("keep.py", ORIGINAL)]);
    let completion = Scripted::ok(&[
        "Change both files.",
        "skip.py, keep.py",
        "plan",
        "```python\ndef run():\n    return 3\n```",
        "```python\ndef run():\n    return 2\n```",
    ]);
    let verifier = FixedVerifier::new(true);
    let pipeline = EditPipeline::new(
        &project.graph,
        &project.map,
        &project.cache,
        &completion,
        &RejectsByName,
    )
    .with_verifier(&verifier);

    let mut snapshots = SnapshotHistory::default();
    let task = pipeline.run("change both files", &mut snapshots);
    assert_eq!(task.changes.len(), 2);
    assert_eq!(task.changes[0].path, "skip.py");
    assert_eq!(task.changes[0].status, FileStatus::Rejected);
    assert_eq!(task.changes[1].path, "keep.py");
    assert_eq!(task.changes[1].status, FileStatus::Modified);

    assert_eq!(project.read("skip.py"), ORIGINAL);
    assert_eq!(project.read("keep.py"), "def run():\n    return 2\n");
    assert_eq!(snapshots.rollback("keep.py", 1), Some(ORIGINAL));
    assert_eq!(snapshots.rollback("skip.py", 1), None);
    assert_eq!(verifier.runs.get(), 1);
}
