use std::str::FromStr;

use chrono::{DateTime, Utc};
use fg_core::{Error, Result, SnapshotId, SnapshotRecord, SnapshotStatus};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use uuid::Uuid;

/// Intermediate row type for mapping between database rows and
/// `SnapshotRecord`.
#[derive(sqlx::FromRow)]
struct SnapshotRow {
    id: String,
    repo_url: String,
    repo_name: String,
    version: String,
    backend: String,
    status: String,
    node_count: Option<i64>,
    edge_count: Option<i64>,
    fuzzer_names: String,
    language: Option<String>,
    analysis_duration_sec: Option<f64>,
    size_bytes: Option<i64>,
    error: Option<String>,
    created_at: DateTime<Utc>,
    last_accessed_at: DateTime<Utc>,
    access_count: i64,
}

impl SnapshotRow {
    fn into_record(self) -> Result<SnapshotRecord> {
        let id = Uuid::parse_str(&self.id)
            .map_err(|e| Error::Internal(format!("bad snapshot id {}: {e}", self.id)))?;
        let status = self
            .status
            .parse::<SnapshotStatus>()
            .map_err(Error::Internal)?;
        let fuzzer_names: Vec<String> =
            serde_json::from_str(&self.fuzzer_names).unwrap_or_default();
        Ok(SnapshotRecord {
            id,
            repo_url: self.repo_url,
            repo_name: self.repo_name,
            version: self.version,
            backend: self.backend,
            status,
            node_count: self.node_count,
            edge_count: self.edge_count,
            fuzzer_names,
            language: self.language,
            analysis_duration_sec: self.analysis_duration_sec,
            size_bytes: self.size_bytes,
            error: self.error,
            created_at: self.created_at,
            last_accessed_at: self.last_accessed_at,
            access_count: self.access_count,
        })
    }
}

const SELECT_COLUMNS: &str = "id, repo_url, repo_name, version, backend, status, \
     node_count, edge_count, fuzzer_names, language, analysis_duration_sec, \
     size_bytes, error, created_at, last_accessed_at, access_count";

/// SQLite-backed catalog of snapshot metadata.
///
/// Sole source of truth for cache hits, in-progress builders, and eviction
/// candidates. The unique index on `(repo_url, version, backend)` is the
/// admission lock.
#[derive(Clone)]
pub struct Catalog {
    pool: SqlitePool,
}

impl Catalog {
    /// Open (or create) the catalog database and ensure its schema.
    pub async fn connect(url: &str) -> Result<Self> {
        let opts = SqliteConnectOptions::from_str(url)
            .map_err(|e| Error::Internal(format!("bad catalog url {url}: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(5));
        // An in-memory database is private to its connection; a larger pool
        // would hand every caller a different empty database.
        let max_connections = if url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(opts)
            .await?;
        let catalog = Self { pool };
        catalog.ensure_schema().await?;
        Ok(catalog)
    }

    /// Underlying pool, exposed for integration tests and operators.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS snapshots (
                id TEXT PRIMARY KEY,
                repo_url TEXT NOT NULL,
                repo_name TEXT NOT NULL,
                version TEXT NOT NULL,
                backend TEXT NOT NULL,
                status TEXT NOT NULL,
                node_count INTEGER,
                edge_count INTEGER,
                fuzzer_names TEXT NOT NULL DEFAULT '[]',
                language TEXT,
                analysis_duration_sec REAL,
                size_bytes INTEGER,
                error TEXT,
                created_at TEXT NOT NULL,
                last_accessed_at TEXT NOT NULL,
                access_count INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_snapshots_key \
             ON snapshots(repo_url, version, backend)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_snapshots_last_accessed \
             ON snapshots(last_accessed_at)",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Try to insert a fresh `building` row for the key.
    ///
    /// Returns the new record when this caller won the insert race, `None`
    /// when another row (any status) already holds the key. Most callers
    /// want `acquire_or_wait`; this is the raw insert beneath it.
    pub async fn try_insert_building(
        &self,
        repo_url: &str,
        version: &str,
        backend: &str,
    ) -> Result<Option<SnapshotRecord>> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let repo_name = fg_core::repo_name_from_url(repo_url);
        let result = sqlx::query(
            r#"
            INSERT INTO snapshots (
                id, repo_url, repo_name, version, backend, status,
                fuzzer_names, created_at, last_accessed_at, access_count
            )
            VALUES ($1, $2, $3, $4, $5, 'building', '[]', $6, $7, 0)
            ON CONFLICT (repo_url, version, backend) DO NOTHING
            "#,
        )
        .bind(id.to_string())
        .bind(repo_url)
        .bind(&repo_name)
        .bind(version)
        .bind(backend)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.get(id).await
    }

    /// Fetch a record by id.
    pub async fn get(&self, id: SnapshotId) -> Result<Option<SnapshotRecord>> {
        let row: Option<SnapshotRow> = sqlx::query_as(&format!(
            "SELECT {SELECT_COLUMNS} FROM snapshots WHERE id = $1"
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.map(SnapshotRow::into_record).transpose()
    }

    /// Fetch the record holding a `(repo_url, version, backend)` key.
    pub async fn find(
        &self,
        repo_url: &str,
        version: &str,
        backend: &str,
    ) -> Result<Option<SnapshotRecord>> {
        let row: Option<SnapshotRow> = sqlx::query_as(&format!(
            "SELECT {SELECT_COLUMNS} FROM snapshots \
             WHERE repo_url = $1 AND version = $2 AND backend = $3"
        ))
        .bind(repo_url)
        .bind(version)
        .bind(backend)
        .fetch_optional(&self.pool)
        .await?;
        row.map(SnapshotRow::into_record).transpose()
    }

    /// Transition `building → completed`, populating result metadata.
    ///
    /// Re-marking an already-completed row is a no-op; any other current
    /// state is a rejected transition.
    #[allow(clippy::too_many_arguments)]
    pub async fn mark_completed(
        &self,
        id: SnapshotId,
        node_count: i64,
        edge_count: i64,
        fuzzer_names: &[String],
        language: Option<&str>,
        analysis_duration_sec: f64,
        size_bytes: i64,
    ) -> Result<()> {
        let names = serde_json::to_string(fuzzer_names)
            .map_err(|e| Error::Internal(format!("serialize fuzzer_names: {e}")))?;
        let result = sqlx::query(
            r#"
            UPDATE snapshots SET
                status = 'completed',
                node_count = $2,
                edge_count = $3,
                fuzzer_names = $4,
                language = $5,
                analysis_duration_sec = $6,
                size_bytes = $7,
                error = NULL
            WHERE id = $1 AND status = 'building'
            "#,
        )
        .bind(id.to_string())
        .bind(node_count)
        .bind(edge_count)
        .bind(&names)
        .bind(language)
        .bind(analysis_duration_sec)
        .bind(size_bytes)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(());
        }
        match self.get(id).await? {
            Some(rec) if rec.status == SnapshotStatus::Completed => Ok(()),
            Some(rec) => Err(Error::InvalidTransition(format!(
                "mark_completed({id}): status is {}, expected building",
                rec.status
            ))),
            None => Err(Error::SnapshotNotFound(id.to_string())),
        }
    }

    /// Transition `building → failed`, recording the error message.
    pub async fn mark_failed(&self, id: SnapshotId, error: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE snapshots SET status = 'failed', error = $2 \
             WHERE id = $1 AND status = 'building'",
        )
        .bind(id.to_string())
        .bind(error)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(());
        }
        match self.get(id).await? {
            Some(rec) if rec.status == SnapshotStatus::Failed => Ok(()),
            Some(rec) => Err(Error::InvalidTransition(format!(
                "mark_failed({id}): status is {}, expected building",
                rec.status
            ))),
            None => Err(Error::SnapshotNotFound(id.to_string())),
        }
    }

    /// Record a cache access: bump `access_count`, refresh
    /// `last_accessed_at`.
    pub async fn touch(&self, id: SnapshotId) -> Result<()> {
        sqlx::query(
            "UPDATE snapshots SET access_count = access_count + 1, last_accessed_at = $2 \
             WHERE id = $1",
        )
        .bind(id.to_string())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Delete a catalog row by id. Idempotent.
    pub async fn delete(&self, id: SnapshotId) -> Result<()> {
        sqlx::query("DELETE FROM snapshots WHERE id = $1")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Delete a `failed` row so the key can be re-admitted. Returns whether
    /// a row was removed.
    pub(crate) async fn delete_failed(&self, id: SnapshotId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM snapshots WHERE id = $1 AND status = 'failed'")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    /// All `completed` rows, least recently accessed first.
    pub async fn list_completed_lru(&self) -> Result<Vec<SnapshotRecord>> {
        let rows: Vec<SnapshotRow> = sqlx::query_as(&format!(
            "SELECT {SELECT_COLUMNS} FROM snapshots WHERE status = 'completed' \
             ORDER BY last_accessed_at ASC"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(SnapshotRow::into_record).collect()
    }

    /// All `completed` rows for one repository, least recently accessed
    /// first.
    pub async fn list_completed_for_repo(&self, repo_url: &str) -> Result<Vec<SnapshotRecord>> {
        let rows: Vec<SnapshotRow> = sqlx::query_as(&format!(
            "SELECT {SELECT_COLUMNS} FROM snapshots \
             WHERE status = 'completed' AND repo_url = $1 \
             ORDER BY last_accessed_at ASC"
        ))
        .bind(repo_url)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(SnapshotRow::into_record).collect()
    }

    /// Distinct repo URLs with at least one `completed` snapshot.
    pub async fn completed_repo_urls(&self) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT DISTINCT repo_url FROM snapshots WHERE status = 'completed'",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|r| r.0).collect())
    }

    /// Total `size_bytes` across `completed` snapshots.
    pub async fn total_completed_size(&self) -> Result<i64> {
        let row: (Option<i64>,) = sqlx::query_as(
            "SELECT SUM(size_bytes) FROM snapshots WHERE status = 'completed'",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0.unwrap_or(0))
    }
}
