use crate::diff::FileDiff;
use serde::Serialize;
use std::fmt;
use tracing::debug;

/// Linear progress of one request. Per-file approval and verification
/// outcomes live on [`FileChange`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStage {
    RequestReceived,
    IntentResolved,
    TargetsSelected,
    ContentAssembled,
    ChangeProposed,
    Applied,
    Verified,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Modified,
    Rejected,
    Unchanged,
    NotFound,
    Error,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Modified => "modified",
            FileStatus::Rejected => "rejected",
            FileStatus::Unchanged => "unchanged",
            FileStatus::NotFound => "not_found",
            FileStatus::Error => "error",
        }
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FileChange {
    pub path: String,
    pub status: FileStatus,
    /// Verification runs performed for this file.
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff: Option<FileDiff>,
}

impl FileChange {
    pub fn new(path: &str, status: FileStatus) -> Self {
        Self {
            path: path.to_string(),
            status,
            attempts: 0,
            detail: None,
            diff: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_diff(mut self, diff: FileDiff) -> Self {
        self.diff = Some(diff);
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }
}

/// One pipeline run, from request to per-file outcomes.
#[derive(Debug, Clone, Serialize)]
pub struct EditTask {
    pub request: String,
    pub stage: TaskStage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,
    pub targets: Vec<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub plan: String,
    pub changes: Vec<FileChange>,
    /// Set when a task-level step (intent, targets) could not complete.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: i64,
}

impl EditTask {
    pub fn new(request: &str) -> Self {
        Self {
            request: request.to_string(),
            stage: TaskStage::RequestReceived,
            intent: None,
            targets: Vec::new(),
            plan: String::new(),
            changes: Vec::new(),
            error: None,
            started_at: crate::util::now_unix_secs(),
        }
    }

    /// Moves forward only; revisiting an earlier stage for another file is
    /// a no-op.
    pub fn advance(&mut self, stage: TaskStage) {
        if stage > self.stage {
            debug!(from = ?self.stage, to = ?stage, "task stage");
            self.stage = stage;
        }
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.error = Some(message.into());
        self.stage = TaskStage::Done;
    }

    pub fn count(&self, status: FileStatus) -> usize {
        self.changes.iter().filter(|c| c.status == status).count()
    }

    pub fn modified_files(&self) -> impl Iterator<Item = &str> {
        self.changes
            .iter()
            .filter(|c| c.status == FileStatus::Modified)
            .map(|c| c.path.as_str())
    }

    /// At least one file changed and nothing ended in error.
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
            && self.count(FileStatus::Modified) > 0
            && self.count(FileStatus::Error) == 0
    }

    pub fn summary(&self) -> String {
        if let Some(error) = &self.error {
            return format!("failed: {error}");
        }
        let mut parts = vec![format!("{} file(s)", self.changes.len())];
        for status in [
            FileStatus::Modified,
            FileStatus::Rejected,
            FileStatus::Unchanged,
            FileStatus::NotFound,
            FileStatus::Error,
        ] {
            let n = self.count(status);
            if n > 0 {
                parts.push(format!("{n} {status}"));
            }
        }
        parts.join(", ")
    }
}
