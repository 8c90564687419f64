//! SQL migration definitions for the corpus database.
//!
//! Migrations are applied in order on initialization. Every statement is
//! guarded (`IF NOT EXISTS`, `OR IGNORE`) so two processes initializing the
//! same file before any writes both succeed.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema: papers",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One row per paper id, replaced wholesale on every write
CREATE TABLE IF NOT EXISTS papers (
    id              TEXT PRIMARY KEY,
    relevance_score INTEGER NOT NULL CHECK (relevance_score BETWEEN 0 AND 10),
    is_relevant     INTEGER NOT NULL,
    summary         TEXT NOT NULL,
    artifact_path   TEXT NOT NULL DEFAULT '',
    write_seq       INTEGER NOT NULL,
    updated_at      TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_papers_relevant
    ON papers(is_relevant, relevance_score DESC, write_seq);

INSERT OR IGNORE INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
