use crate::pipeline::{EditTask, FileStatus};
use crate::util;
use anyhow::{Context, Result};
use rusqlite::{Connection, params};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

mod migrations;

pub const SESSION_FILE: &str = "session.sqlite";
/// Older interactions are pruned past this count.
pub const MAX_INTERACTIONS: usize = 100;

#[derive(Debug, Clone, Serialize)]
pub struct FileOutcome {
    pub path: String,
    pub status: String,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InteractionRecord {
    pub id: i64,
    pub created: i64,
    pub request: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,
    pub success: bool,
    pub summary: String,
    pub files: Vec<FileOutcome>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FrequentFile {
    pub path: String,
    pub edits: i64,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct SessionStats {
    pub total_interactions: usize,
    /// Percentage of successful interactions.
    pub success_rate: f64,
    pub files_tracked: usize,
}

/// Durable log of pipeline runs for one project.
pub struct SessionLog {
    path: PathBuf,
    conn: Connection,
}

impl SessionLog {
    pub fn for_repo(repo_root: &Path) -> Result<Self> {
        Self::open(&util::state_dir(repo_root).join(SESSION_FILE))
    }

    pub fn open(path: &Path) -> Result<Self> {
        util::ensure_parent_dir(path)?;
        let conn = Connection::open(path)
            .with_context(|| format!("open sqlite db at {}", path.display()))?;
        conn.busy_timeout(Duration::from_secs(30))?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            ",
        )?;
        migrations::migrate(&conn)?;
        Ok(Self {
            path: path.to_path_buf(),
            conn,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&mut self, task: &EditTask) -> Result<i64> {
        let now = util::now_unix_secs();
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO interactions (created, request, intent, success, summary)
             VALUES (?, ?, ?, ?, ?)",
            params![
                now,
                task.request,
                task.intent,
                task.succeeded(),
                task.summary()
            ],
        )?;
        let id = tx.last_insert_rowid();
        {
            let mut insert_file = tx.prepare(
                "INSERT INTO interaction_files (interaction_id, path, status, attempts, detail)
                 VALUES (?, ?, ?, ?, ?)",
            )?;
            let mut bump = tx.prepare(
                "INSERT INTO frequent_files (path, edits, last_edited) VALUES (?, 1, ?)
                 ON CONFLICT(path) DO UPDATE SET
                    edits = edits + 1,
                    last_edited = excluded.last_edited",
            )?;
            for change in &task.changes {
                insert_file.execute(params![
                    id,
                    change.path,
                    change.status.as_str(),
                    change.attempts,
                    change.detail
                ])?;
                if change.status == FileStatus::Modified {
                    bump.execute(params![change.path, now])?;
                }
            }
        }
        tx.execute(
            "DELETE FROM interactions WHERE id NOT IN (
                SELECT id FROM interactions ORDER BY id DESC LIMIT ?
             )",
            [MAX_INTERACTIONS as i64],
        )?;
        tx.commit()?;
        Ok(id)
    }

    /// Most recent interactions first.
    pub fn recent(&self, limit: usize) -> Result<Vec<InteractionRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, created, request, intent, success, summary
             FROM interactions ORDER BY id DESC LIMIT ?",
        )?;
        let rows = stmt.query_map([limit as i64], |row| {
            Ok(InteractionRecord {
                id: row.get(0)?,
                created: row.get(1)?,
                request: row.get(2)?,
                intent: row.get(3)?,
                success: row.get(4)?,
                summary: row.get(5)?,
                files: Vec::new(),
            })
        })?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }

        let mut files_stmt = self.conn.prepare(
            "SELECT path, status, attempts, detail FROM interaction_files
             WHERE interaction_id = ? ORDER BY id",
        )?;
        for record in &mut records {
            let rows = files_stmt.query_map([record.id], |row| {
                Ok(FileOutcome {
                    path: row.get(0)?,
                    status: row.get(1)?,
                    attempts: row.get(2)?,
                    detail: row.get(3)?,
                })
            })?;
            for row in rows {
                record.files.push(row?);
            }
        }
        Ok(records)
    }

    pub fn frequent_files(&self, limit: usize) -> Result<Vec<FrequentFile>> {
        let mut stmt = self.conn.prepare(
            "SELECT path, edits FROM frequent_files
             ORDER BY edits DESC, last_edited DESC, path LIMIT ?",
        )?;
        let rows = stmt.query_map([limit as i64], |row| {
            Ok(FrequentFile {
                path: row.get(0)?,
                edits: row.get(1)?,
            })
        })?;
        let mut files = Vec::new();
        for row in rows {
            files.push(row?);
        }
        Ok(files)
    }

    pub fn stats(&self) -> Result<SessionStats> {
        let (total, successes): (i64, i64) = self.conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(success), 0) FROM interactions",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        let files_tracked: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM frequent_files", [], |row| row.get(0))?;
        let success_rate = if total > 0 {
            successes as f64 / total as f64 * 100.0
        } else {
            0.0
        };
        Ok(SessionStats {
            total_interactions: total as usize,
            success_rate,
            files_tracked: files_tracked as usize,
        })
    }
}
