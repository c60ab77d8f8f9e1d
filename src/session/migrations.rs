use anyhow::Result;
use rusqlite::{Connection, OptionalExtension};

pub const SCHEMA_VERSION: i64 = 1;

pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        BEGIN;
        CREATE TABLE IF NOT EXISTS meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS interactions (
            id INTEGER PRIMARY KEY,
            created INTEGER NOT NULL,
            request TEXT NOT NULL,
            intent TEXT,
            success INTEGER NOT NULL,
            summary TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS interaction_files (
            id INTEGER PRIMARY KEY,
            interaction_id INTEGER NOT NULL,
            path TEXT NOT NULL,
            status TEXT NOT NULL,
            attempts INTEGER NOT NULL DEFAULT 0,
            detail TEXT,
            FOREIGN KEY(interaction_id) REFERENCES interactions(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_interaction_files_interaction
            ON interaction_files(interaction_id);

        CREATE TABLE IF NOT EXISTS frequent_files (
            path TEXT PRIMARY KEY,
            edits INTEGER NOT NULL DEFAULT 0,
            last_edited INTEGER NOT NULL
        );
        COMMIT;
        ",
    )?;

    let existing: i64 = conn
        .query_row(
            "SELECT value FROM meta WHERE key = 'schema_version'",
            [],
            |row| row.get::<_, String>(0),
        )
        .optional()?
        .and_then(|value| value.parse().ok())
        .unwrap_or(0);

    if existing < SCHEMA_VERSION {
        conn.execute(
            "INSERT INTO meta (key, value) VALUES ('schema_version', ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            [SCHEMA_VERSION.to_string()],
        )?;
    }

    Ok(())
}
