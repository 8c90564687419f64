//! libSQL-backed corpus store (embedded, offline mode).
//!
//! The [`CorpusStore`] keeps one row per paper id. Writes are single-statement
//! upserts, so a reader never observes a half-written entry and an interrupted
//! run leaves a valid, partially-populated store.
//!
//! **Access rules:**
//! - Pipeline: read-write (sole writer per run) via [`CorpusStore::initialize`]
//! - Inspection (`paperscout corpus`): read-only via [`CorpusStore::open_readonly`]

mod migrations;

use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use libsql::{Connection, Database, params};
use paperscout_shared::{CorpusEntry, EvaluationRecord, PaperScoutError, RelevantEntry, Result};

/// How long a connection waits on another connection's write lock.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
const MIGRATION_ATTEMPTS: usize = 3;
const MIGRATION_RETRY_BACKOFF: Duration = Duration::from_millis(50);

/// Primary storage handle wrapping a libSQL database.
pub struct CorpusStore {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

impl CorpusStore {
    /// Open or create the store at `path`, applying the schema if absent.
    ///
    /// Safe to call repeatedly: existing rows are kept.
    pub async fn initialize(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| PaperScoutError::io(parent, e))?;
            }
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;

        let conn = db.connect().map_err(storage_err)?;
        conn.busy_timeout(BUSY_TIMEOUT).map_err(storage_err)?;

        let store = Self {
            db,
            conn,
            readonly: false,
        };
        store.run_migrations().await?;
        tracing::debug!(path = %path.display(), "corpus store initialized");
        Ok(store)
    }

    /// Open an existing store at `path` in read-only mode.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;

        let conn = db.connect().map_err(storage_err)?;
        conn.busy_timeout(BUSY_TIMEOUT).map_err(storage_err)?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    /// Run pending schema migrations.
    ///
    /// The version check and the migrations share one `BEGIN IMMEDIATE`
    /// transaction, so concurrent initializers of the same file serialize on
    /// the write lock and only the first applies the schema.
    async fn run_migrations(&self) -> Result<()> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.migrate_locked().await {
                Ok(()) => return Ok(()),
                Err(e) if is_busy(&e) && attempt < MIGRATION_ATTEMPTS => {
                    tracing::debug!(attempt, error = %e, "store busy, retrying migrations");
                    tokio::time::sleep(MIGRATION_RETRY_BACKOFF * attempt as u32).await;
                }
                Err(e) => {
                    return Err(PaperScoutError::Storage(format!("migrations failed: {e}")));
                }
            }
        }
    }

    async fn migrate_locked(&self) -> std::result::Result<(), libsql::Error> {
        self.conn.execute("BEGIN IMMEDIATE", params![]).await?;

        let result = self.apply_pending().await;
        match result {
            Ok(()) => {
                self.conn.execute("COMMIT", params![]).await?;
                Ok(())
            }
            Err(e) => {
                if let Err(rollback) = self.conn.execute("ROLLBACK", params![]).await {
                    tracing::warn!(error = %rollback, "rollback after failed migration failed");
                }
                Err(e)
            }
        }
    }

    async fn apply_pending(&self) -> std::result::Result<(), libsql::Error> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                if let Err(e) = self.conn.execute_batch(migration.sql).await {
                    tracing::error!(version = migration.version, error = %e, "migration failed");
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(PaperScoutError::Storage(
                "corpus store is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Write or fully replace the entry for `entry.id()`.
    ///
    /// Every write takes the next `write_seq`, which orders ties in
    /// [`read_relevant`](Self::read_relevant).
    pub async fn upsert(&self, entry: &CorpusEntry) -> Result<()> {
        self.check_writable()?;
        entry.record.validate()?;

        let record = &entry.record;
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO papers (id, relevance_score, is_relevant, summary, artifact_path, write_seq, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, (SELECT COALESCE(MAX(write_seq), 0) + 1 FROM papers), ?6)
                 ON CONFLICT(id) DO UPDATE SET
                   relevance_score = excluded.relevance_score,
                   is_relevant = excluded.is_relevant,
                   summary = excluded.summary,
                   artifact_path = excluded.artifact_path,
                   write_seq = excluded.write_seq,
                   updated_at = excluded.updated_at",
                params![
                    record.id.as_str(),
                    i64::from(record.relevance_score),
                    i64::from(record.is_relevant),
                    record.summary.as_str(),
                    entry.artifact_path.as_str(),
                    now.as_str(),
                ],
            )
            .await
            .map_err(storage_err)?;

        tracing::debug!(
            id = %record.id,
            score = record.relevance_score,
            relevant = record.is_relevant,
            "upserted paper"
        );
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Relevant papers scoring at least `min_score`, best first.
    ///
    /// Equal scores come back in write order, earliest first.
    pub async fn read_relevant(&self, min_score: u8) -> Result<Vec<RelevantEntry>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, summary, relevance_score FROM papers
                 WHERE is_relevant = 1 AND relevance_score >= ?1
                 ORDER BY relevance_score DESC, write_seq ASC",
                params![i64::from(min_score)],
            )
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            results.push(RelevantEntry {
                id: row.get::<String>(0).map_err(storage_err)?,
                summary: row.get::<String>(1).map_err(storage_err)?,
                relevance_score: score_from_row(&row, 2)?,
            });
        }
        Ok(results)
    }

    /// Like [`read_relevant`](Self::read_relevant) against the store file at
    /// `path`; a store that does not exist yet reads as empty.
    pub async fn read_relevant_at(path: &Path, min_score: u8) -> Result<Vec<RelevantEntry>> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "corpus store not found, nothing to read");
            return Ok(Vec::new());
        }
        Self::open_readonly(path).await?.read_relevant(min_score).await
    }

    /// Fetch a single entry by id.
    pub async fn get(&self, id: &str) -> Result<Option<CorpusEntry>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, relevance_score, is_relevant, summary, artifact_path
                 FROM papers WHERE id = ?1",
                params![id],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await.map_err(storage_err)? {
            Some(row) => Ok(Some(row_to_entry(&row)?)),
            None => Ok(None),
        }
    }

    /// All entries, in write order.
    pub async fn list(&self) -> Result<Vec<CorpusEntry>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, relevance_score, is_relevant, summary, artifact_path
                 FROM papers ORDER BY write_seq",
                params![],
            )
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            results.push(row_to_entry(&row)?);
        }
        Ok(results)
    }

    /// Number of stored papers.
    pub async fn count(&self) -> Result<u64> {
        let mut rows = self
            .conn
            .query("SELECT COUNT(*) FROM papers", params![])
            .await
            .map_err(storage_err)?;

        match rows.next().await.map_err(storage_err)? {
            Some(row) => Ok(row.get::<i64>(0).map_err(storage_err)?.max(0) as u64),
            None => Ok(0),
        }
    }
}

fn storage_err(e: libsql::Error) -> PaperScoutError {
    PaperScoutError::Storage(e.to_string())
}

const SQLITE_BUSY: std::ffi::c_int = 5;
const SQLITE_LOCKED: std::ffi::c_int = 6;

/// Lock contention that outlasted the busy timeout.
fn is_busy(e: &libsql::Error) -> bool {
    match e {
        libsql::Error::SqliteFailure(code, _) => {
            matches!(code & 0xff, SQLITE_BUSY | SQLITE_LOCKED)
        }
        other => other.to_string().contains("database is locked"),
    }
}

fn score_from_row(row: &libsql::Row, idx: i32) -> Result<u8> {
    let raw = row.get::<i64>(idx).map_err(storage_err)?;
    u8::try_from(raw)
        .map_err(|_| PaperScoutError::Storage(format!("stored relevance_score {raw} is invalid")))
}

/// Convert a database row to a [`CorpusEntry`].
fn row_to_entry(row: &libsql::Row) -> Result<CorpusEntry> {
    Ok(CorpusEntry {
        record: EvaluationRecord {
            id: row.get::<String>(0).map_err(storage_err)?,
            relevance_score: score_from_row(row, 1)?,
            is_relevant: row.get::<i64>(2).map_err(storage_err)? != 0,
            summary: row.get::<String>(3).map_err(storage_err)?,
        },
        artifact_path: row.get::<String>(4).unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn temp_path() -> std::path::PathBuf {
        std::env::temp_dir().join(format!("ps_test_{}.db", Uuid::now_v7()))
    }

    /// Create a temp file store for testing.
    async fn test_store() -> CorpusStore {
        CorpusStore::initialize(&temp_path())
            .await
            .expect("open test db")
    }

    fn entry(id: &str, score: u8, relevant: bool, summary: &str) -> CorpusEntry {
        CorpusEntry::new(
            EvaluationRecord::new(id, score, relevant, summary).unwrap(),
            "",
        )
    }

    fn ids(entries: &[RelevantEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.id.as_str()).collect()
    }

    #[tokio::test]
    async fn initialize_and_migrate() {
        let store = test_store().await;
        assert_eq!(store.get_schema_version().await, 1);
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn reinitialize_keeps_rows() {
        let path = temp_path();
        let s1 = CorpusStore::initialize(&path).await.expect("first open");
        s1.upsert(&entry("A", 9, true, "s1")).await.unwrap();
        drop(s1);

        let s2 = CorpusStore::initialize(&path).await.expect("second open");
        assert_eq!(s2.get_schema_version().await, 1);
        assert_eq!(s2.count().await.unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_initialize_before_writes() {
        for _ in 0..5 {
            let path = temp_path();
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    let path = path.clone();
                    tokio::spawn(async move { CorpusStore::initialize(&path).await })
                })
                .collect();

            for handle in handles {
                let store = handle.await.unwrap().unwrap();
                assert_eq!(store.get_schema_version().await, 1);
            }

            let store = CorpusStore::initialize(&path).await.unwrap();
            store.upsert(&entry("A", 9, true, "s")).await.unwrap();
            assert_eq!(store.count().await.unwrap(), 1);
        }
    }

    #[tokio::test]
    async fn upsert_replaces_by_id() {
        let store = test_store().await;
        store.upsert(&entry("A", 9, true, "s1")).await.unwrap();
        store.upsert(&entry("A", 4, false, "s2")).await.unwrap();

        assert_eq!(store.count().await.unwrap(), 1);
        let found = store.get("A").await.unwrap().expect("entry A");
        assert_eq!(found.record.relevance_score, 4);
        assert!(!found.record.is_relevant);
        assert_eq!(found.record.summary, "s2");
    }

    #[tokio::test]
    async fn upsert_records_artifact_path() {
        let store = test_store().await;
        let mut e = entry("2301.0001", 8, true, "summary");
        e.artifact_path = "output/papers/2301.0001.md".into();
        store.upsert(&e).await.unwrap();

        let found = store.get("2301.0001").await.unwrap().unwrap();
        assert_eq!(found.artifact_path, "output/papers/2301.0001.md");
        assert_eq!(found, e);
    }

    #[tokio::test]
    async fn upsert_rejects_malformed_entry() {
        let store = test_store().await;
        let bad = CorpusEntry::new(
            EvaluationRecord {
                id: "A".into(),
                relevance_score: 12,
                is_relevant: true,
                summary: "s".into(),
            },
            "",
        );
        let err = store.upsert(&bad).await.unwrap_err();
        assert!(matches!(err, PaperScoutError::Validation { .. }));
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn read_relevant_filters_and_orders() {
        let store = test_store().await;
        store.upsert(&entry("A", 9, true, "a")).await.unwrap();
        store.upsert(&entry("B", 3, true, "b")).await.unwrap();
        store.upsert(&entry("C", 7, true, "c")).await.unwrap();
        store.upsert(&entry("D", 10, false, "d")).await.unwrap();

        let relevant = store.read_relevant(5).await.unwrap();
        assert_eq!(ids(&relevant), vec!["A", "C"]);
        assert_eq!(relevant[0].relevance_score, 9);
        assert_eq!(relevant[1].summary, "c");
    }

    #[tokio::test]
    async fn ties_follow_write_order() {
        let store = test_store().await;
        store.upsert(&entry("X", 6, true, "x")).await.unwrap();
        store.upsert(&entry("Y", 6, true, "y")).await.unwrap();
        store.upsert(&entry("Z", 6, true, "z")).await.unwrap();
        assert_eq!(ids(&store.read_relevant(0).await.unwrap()), vec!["X", "Y", "Z"]);

        // Rewriting X makes it the latest write.
        store.upsert(&entry("X", 6, true, "x2")).await.unwrap();
        assert_eq!(ids(&store.read_relevant(0).await.unwrap()), vec!["Y", "Z", "X"]);
    }

    #[tokio::test]
    async fn read_relevant_empty_store() {
        let store = test_store().await;
        assert!(store.read_relevant(0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn read_relevant_at_missing_file_is_empty() {
        let path = temp_path();
        let result = CorpusStore::read_relevant_at(&path, 5).await.unwrap();
        assert!(result.is_empty());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn read_relevant_at_existing_file() {
        let path = temp_path();
        let store = CorpusStore::initialize(&path).await.unwrap();
        store.upsert(&entry("A", 8, true, "a")).await.unwrap();
        drop(store);

        let result = CorpusStore::read_relevant_at(&path, 5).await.unwrap();
        assert_eq!(ids(&result), vec!["A"]);
    }

    #[tokio::test]
    async fn list_in_write_order() {
        let store = test_store().await;
        store.upsert(&entry("B", 2, false, "b")).await.unwrap();
        store.upsert(&entry("A", 9, true, "a")).await.unwrap();
        let all = store.list().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id(), "B");
        assert_eq!(all[1].id(), "A");
    }

    #[tokio::test]
    async fn readonly_rejects_writes() {
        let path = temp_path();
        let rw = CorpusStore::initialize(&path).await.unwrap();
        rw.upsert(&entry("A", 5, true, "a")).await.unwrap();
        drop(rw);

        let ro = CorpusStore::open_readonly(&path).await.unwrap();
        let result = ro.upsert(&entry("B", 5, true, "b")).await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("read-only"));
        assert_eq!(ro.read_relevant(0).await.unwrap().len(), 1);
    }
}
