use std::collections::HashMap;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::Utc;
use fg_core::{
    CallEdgeRecord, Error, FunctionRecord, FuzzerInfo, ReachesRecord, Result, SnapshotId,
};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Sqlite;

use crate::model::{FunctionNode, NodeKind};

/// Intermediate row type for mapping between database rows and
/// `FunctionNode`.
#[derive(sqlx::FromRow)]
pub(crate) struct FunctionRow {
    pub id: i64,
    pub kind: String,
    pub name: String,
    pub file_path: String,
    pub start_line: Option<i64>,
    pub end_line: Option<i64>,
    pub content: Option<String>,
    pub language: Option<String>,
    pub return_type: Option<String>,
    pub parameters: Option<String>,
    pub is_entry_point: bool,
    pub confidence: f64,
    pub cyclomatic_complexity: Option<i64>,
}

impl FunctionRow {
    pub(crate) fn into_node(self) -> FunctionNode {
        FunctionNode {
            id: self.id,
            kind: self.kind.parse::<NodeKind>().unwrap_or_else(|e| {
                tracing::warn!("{e}, defaulting to Function");
                NodeKind::Function
            }),
            name: self.name,
            file_path: self.file_path,
            start_line: self.start_line,
            end_line: self.end_line,
            content: self.content,
            language: self.language,
            return_type: self.return_type,
            parameters: self.parameters,
            is_entry_point: self.is_entry_point,
            confidence: self.confidence,
            cyclomatic_complexity: self.cyclomatic_complexity,
        }
    }
}

pub(crate) const FUNCTION_COLUMNS: &str = "id, kind, name, file_path, start_line, end_line, \
     content, language, return_type, parameters, is_entry_point, confidence, \
     cyclomatic_complexity";

/// Name → candidate `(row id, file_path)` pairs for one snapshot. Used to
/// resolve string endpoints against committed nodes.
pub(crate) type ResolutionMap = HashMap<String, Vec<(i64, String)>>;

/// SQLite-backed property graph, scoped by `snapshot_id` on every row.
///
/// Sole writer of graph content and sole executor of snapshot-scoped
/// queries; cross-snapshot edges are unrepresentable because endpoints
/// are resolved within one snapshot's rows.
#[derive(Clone)]
pub struct GraphStore {
    pool: SqlitePool,
}

impl GraphStore {
    /// Open (or create) the graph database and ensure its schema.
    pub async fn connect(url: &str) -> Result<Self> {
        let opts = SqliteConnectOptions::from_str(url)
            .map_err(|e| Error::Internal(format!("bad graph url {url}: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(5));
        let max_connections = if url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(opts)
            .await?;
        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn ensure_schema(&self) -> Result<()> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS snapshot_nodes (
                id TEXT PRIMARY KEY,
                repo_url TEXT NOT NULL,
                version TEXT NOT NULL,
                backend TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS functions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                snapshot_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                name TEXT NOT NULL,
                file_path TEXT NOT NULL DEFAULT '',
                start_line INTEGER,
                end_line INTEGER,
                content TEXT,
                language TEXT,
                return_type TEXT,
                parameters TEXT,
                is_entry_point INTEGER NOT NULL DEFAULT 0,
                confidence REAL NOT NULL DEFAULT 1.0,
                cyclomatic_complexity INTEGER,
                UNIQUE (snapshot_id, name, file_path)
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_functions_snapshot \
             ON functions(snapshot_id, name)",
            r#"
            CREATE TABLE IF NOT EXISTS fuzzers (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                snapshot_id TEXT NOT NULL,
                name TEXT NOT NULL,
                entry_function TEXT NOT NULL,
                entry_file_path TEXT NOT NULL,
                files TEXT NOT NULL DEFAULT '[]',
                focus TEXT,
                UNIQUE (snapshot_id, name)
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_fuzzers_snapshot ON fuzzers(snapshot_id)",
            r#"
            CREATE TABLE IF NOT EXISTS call_edges (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                snapshot_id TEXT NOT NULL,
                caller_id INTEGER NOT NULL,
                callee_id INTEGER NOT NULL,
                call_type TEXT NOT NULL,
                confidence REAL NOT NULL DEFAULT 1.0,
                backend TEXT NOT NULL,
                UNIQUE (snapshot_id, caller_id, callee_id, call_type)
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_call_edges_caller \
             ON call_edges(snapshot_id, caller_id)",
            "CREATE INDEX IF NOT EXISTS idx_call_edges_callee \
             ON call_edges(snapshot_id, callee_id)",
            r#"
            CREATE TABLE IF NOT EXISTS reaches (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                snapshot_id TEXT NOT NULL,
                fuzzer_id INTEGER NOT NULL,
                function_id INTEGER NOT NULL,
                depth INTEGER NOT NULL CHECK (depth >= 1),
                UNIQUE (snapshot_id, fuzzer_id, function_id)
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_reaches_fuzzer \
             ON reaches(snapshot_id, fuzzer_id)",
        ];
        for stmt in statements {
            sqlx::query(stmt).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Create the Snapshot root node. Idempotent.
    pub async fn create_snapshot_node(
        &self,
        id: SnapshotId,
        repo_url: &str,
        version: &str,
        backend: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO snapshot_nodes (id, repo_url, version, backend, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(id.to_string())
        .bind(repo_url)
        .bind(version)
        .bind(backend)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Batch-import function nodes (and their implicit CONTAINS edges).
    ///
    /// A record with an empty `file_path` is stored under the `external`
    /// sub-label: a leaf whose body was not analyzed. Re-importing the
    /// same records is a no-op. Returns the number of nodes created.
    pub async fn import_functions(
        &self,
        id: SnapshotId,
        functions: &[FunctionRecord],
    ) -> Result<u64> {
        let sid = id.to_string();
        let mut tx = self.pool.begin().await?;
        let mut created = 0;
        for rec in functions {
            if rec.name.is_empty() {
                tracing::warn!("skipping function with empty name in {sid}");
                continue;
            }
            let kind = if rec.file_path.is_empty() {
                NodeKind::External
            } else {
                NodeKind::Function
            };
            let result = sqlx::query(
                r#"
                INSERT INTO functions (
                    snapshot_id, kind, name, file_path, start_line, end_line,
                    content, language, return_type, parameters, is_entry_point,
                    confidence, cyclomatic_complexity
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
                ON CONFLICT (snapshot_id, name, file_path) DO NOTHING
                "#,
            )
            .bind(&sid)
            .bind(kind.to_string())
            .bind(&rec.name)
            .bind(&rec.file_path)
            .bind(rec.start_line)
            .bind(rec.end_line)
            .bind(&rec.content)
            .bind(&rec.language)
            .bind(&rec.return_type)
            .bind(&rec.parameters)
            .bind(rec.is_entry_point)
            .bind(rec.confidence)
            .bind(rec.cyclomatic_complexity)
            .execute(&mut *tx)
            .await?;
            created += result.rows_affected();
        }
        tx.commit().await?;
        Ok(created)
    }

    /// Batch-import CALLS edges.
    ///
    /// Endpoints are resolved by `(name, file_path)` where provided, else
    /// by name; a callee absent from the committed function set is
    /// materialized as an External node rather than dropped. Returns the
    /// number of edges created.
    pub async fn import_edges(&self, id: SnapshotId, edges: &[CallEdgeRecord]) -> Result<u64> {
        let sid = id.to_string();
        let mut map = self.load_resolution_map(&sid).await?;
        let mut tx = self.pool.begin().await?;
        let mut created = 0;
        for edge in edges {
            let Some(caller_id) = resolve_endpoint(
                &map,
                &edge.caller_name,
                edge.caller_file_path.as_deref(),
                None,
            ) else {
                tracing::warn!(
                    "dropping edge from unknown caller {} in {sid}",
                    edge.caller_name
                );
                continue;
            };
            let callee_id = match resolve_endpoint(
                &map,
                &edge.callee_name,
                edge.callee_file_path.as_deref(),
                edge.caller_file_path.as_deref(),
            ) {
                Some(cid) => cid,
                None => {
                    let cid =
                        insert_external(&mut tx, &sid, &edge.callee_name).await?;
                    map.entry(edge.callee_name.clone())
                        .or_default()
                        .push((cid, String::new()));
                    cid
                }
            };
            let result = sqlx::query(
                r#"
                INSERT INTO call_edges (
                    snapshot_id, caller_id, callee_id, call_type, confidence, backend
                )
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (snapshot_id, caller_id, callee_id, call_type) DO NOTHING
                "#,
            )
            .bind(&sid)
            .bind(caller_id)
            .bind(callee_id)
            .bind(edge.call_type.to_string())
            .bind(edge.confidence)
            .bind(&edge.backend)
            .execute(&mut *tx)
            .await?;
            created += result.rows_affected();
        }
        tx.commit().await?;
        Ok(created)
    }

    /// Batch-import fuzzers.
    ///
    /// For each fuzzer this creates the Fuzzer node, a dedicated entry
    /// Function node keyed by the harness's primary file path (the
    /// mechanism by which same-named entry symbols coexist), the ENTRY
    /// edge, and direct CALLS edges from the entry function to each
    /// declared library-function target. Returns the number of fuzzers
    /// created.
    pub async fn import_fuzzers(&self, id: SnapshotId, fuzzers: &[FuzzerInfo]) -> Result<u64> {
        let sid = id.to_string();
        let mut map = self.load_resolution_map(&sid).await?;
        let mut tx = self.pool.begin().await?;
        let mut created = 0;
        for fz in fuzzers {
            let entry_file = fz.primary_file_path().ok_or_else(|| {
                Error::Input(format!("fuzzer {} declares no source files", fz.name))
            })?;

            // The fuzzer's own copy of the entry function.
            sqlx::query(
                r#"
                INSERT INTO functions (
                    snapshot_id, kind, name, file_path, is_entry_point, confidence
                )
                VALUES ($1, 'function', $2, $3, 1, 1.0)
                ON CONFLICT (snapshot_id, name, file_path) DO NOTHING
                "#,
            )
            .bind(&sid)
            .bind(&fz.entry_function)
            .bind(entry_file)
            .execute(&mut *tx)
            .await?;
            let entry_id: (i64,) = sqlx::query_as(
                "SELECT id FROM functions \
                 WHERE snapshot_id = $1 AND name = $2 AND file_path = $3",
            )
            .bind(&sid)
            .bind(&fz.entry_function)
            .bind(entry_file)
            .fetch_one(&mut *tx)
            .await?;
            map.entry(fz.entry_function.clone())
                .or_default()
                .push((entry_id.0, entry_file.to_string()));

            let files = serde_json::to_string(&fz.files)
                .map_err(|e| Error::Internal(format!("serialize fuzzer files: {e}")))?;
            let result = sqlx::query(
                r#"
                INSERT INTO fuzzers (
                    snapshot_id, name, entry_function, entry_file_path, files, focus
                )
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (snapshot_id, name) DO NOTHING
                "#,
            )
            .bind(&sid)
            .bind(&fz.name)
            .bind(&fz.entry_function)
            .bind(entry_file)
            .bind(&files)
            .bind(&fz.focus)
            .execute(&mut *tx)
            .await?;
            created += result.rows_affected();

            // Bridge the harness entry into the library.
            for target in &fz.library_calls {
                let callee_id = match resolve_endpoint(&map, target, None, Some(entry_file)) {
                    Some(cid) => cid,
                    None => {
                        let cid = insert_external(&mut tx, &sid, target).await?;
                        map.entry(target.clone())
                            .or_default()
                            .push((cid, String::new()));
                        cid
                    }
                };
                sqlx::query(
                    r#"
                    INSERT INTO call_edges (
                        snapshot_id, caller_id, callee_id, call_type, confidence, backend
                    )
                    VALUES ($1, $2, $3, 'direct', 1.0, 'harness')
                    ON CONFLICT (snapshot_id, caller_id, callee_id, call_type) DO NOTHING
                    "#,
                )
                .bind(&sid)
                .bind(entry_id.0)
                .bind(callee_id)
                .execute(&mut *tx)
                .await?;
            }
        }
        tx.commit().await?;
        Ok(created)
    }

    /// Batch-import REACHES triples. Returns the number created.
    pub async fn import_reaches(&self, id: SnapshotId, reaches: &[ReachesRecord]) -> Result<u64> {
        let sid = id.to_string();
        let map = self.load_resolution_map(&sid).await?;
        let fuzzer_ids: HashMap<String, i64> = sqlx::query_as::<_, (String, i64)>(
            "SELECT name, id FROM fuzzers WHERE snapshot_id = $1",
        )
        .bind(&sid)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .collect();

        let mut tx = self.pool.begin().await?;
        let mut created = 0;
        for r in reaches {
            let Some(&fuzzer_id) = fuzzer_ids.get(&r.fuzzer_name) else {
                tracing::warn!("dropping REACHES for unknown fuzzer {}", r.fuzzer_name);
                continue;
            };
            let Some(function_id) = resolve_endpoint(
                &map,
                &r.function_name,
                r.function_file_path.as_deref(),
                None,
            ) else {
                tracing::warn!("dropping REACHES to unknown function {}", r.function_name);
                continue;
            };
            if r.depth < 1 {
                tracing::warn!("dropping REACHES with depth {} to {}", r.depth, r.function_name);
                continue;
            }
            let result = sqlx::query(
                r#"
                INSERT INTO reaches (snapshot_id, fuzzer_id, function_id, depth)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (snapshot_id, fuzzer_id, function_id) DO NOTHING
                "#,
            )
            .bind(&sid)
            .bind(fuzzer_id)
            .bind(function_id)
            .bind(r.depth)
            .execute(&mut *tx)
            .await?;
            created += result.rows_affected();
        }
        tx.commit().await?;
        Ok(created)
    }

    /// Delete the full subtree of one snapshot: all nodes and incident
    /// edges scoped by its id, plus the root node. Idempotent.
    pub async fn delete_snapshot(&self, id: SnapshotId) -> Result<()> {
        let sid = id.to_string();
        let mut tx = self.pool.begin().await?;
        for table in ["reaches", "call_edges", "fuzzers", "functions"] {
            sqlx::query(&format!("DELETE FROM {table} WHERE snapshot_id = $1"))
                .bind(&sid)
                .execute(&mut *tx)
                .await?;
        }
        sqlx::query("DELETE FROM snapshot_nodes WHERE id = $1")
            .bind(&sid)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Non-root node count: function + fuzzer nodes.
    pub async fn count_nodes(&self, id: SnapshotId) -> Result<i64> {
        let sid = id.to_string();
        let functions: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM functions WHERE snapshot_id = $1")
                .bind(&sid)
                .fetch_one(&self.pool)
                .await?;
        let fuzzers: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM fuzzers WHERE snapshot_id = $1")
                .bind(&sid)
                .fetch_one(&self.pool)
                .await?;
        Ok(functions.0 + fuzzers.0)
    }

    /// Edge count: CALLS + REACHES + one ENTRY per fuzzer.
    pub async fn count_edges(&self, id: SnapshotId) -> Result<i64> {
        let sid = id.to_string();
        let calls: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM call_edges WHERE snapshot_id = $1")
                .bind(&sid)
                .fetch_one(&self.pool)
                .await?;
        let reaches: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM reaches WHERE snapshot_id = $1")
                .bind(&sid)
                .fetch_one(&self.pool)
                .await?;
        let fuzzers: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM fuzzers WHERE snapshot_id = $1")
                .bind(&sid)
                .fetch_one(&self.pool)
                .await?;
        Ok(calls.0 + reaches.0 + fuzzers.0)
    }

    pub(crate) async fn load_resolution_map(&self, sid: &str) -> Result<ResolutionMap> {
        let rows: Vec<(i64, String, String)> = sqlx::query_as(
            "SELECT id, name, file_path FROM functions WHERE snapshot_id = $1",
        )
        .bind(sid)
        .fetch_all(&self.pool)
        .await?;
        let mut map: ResolutionMap = HashMap::new();
        for (id, name, file_path) in rows {
            map.entry(name).or_default().push((id, file_path));
        }
        Ok(map)
    }
}

async fn insert_external(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    sid: &str,
    name: &str,
) -> Result<i64> {
    sqlx::query(
        r#"
        INSERT INTO functions (snapshot_id, kind, name, file_path)
        VALUES ($1, 'external', $2, '')
        ON CONFLICT (snapshot_id, name, file_path) DO NOTHING
        "#,
    )
    .bind(sid)
    .bind(name)
    .execute(&mut **tx)
    .await?;
    let row: (i64,) = sqlx::query_as(
        "SELECT id FROM functions WHERE snapshot_id = $1 AND name = $2 AND file_path = ''",
    )
    .bind(sid)
    .bind(name)
    .fetch_one(&mut **tx)
    .await?;
    Ok(row.0)
}

/// Resolve a string endpoint against the snapshot's committed functions.
///
/// `(name, file_path)` binds exactly. A bare name with a unique candidate
/// binds; with several candidates the caller's own file wins, else the
/// lexicographically-first `file_path` (with a warning).
pub(crate) fn resolve_endpoint(
    map: &ResolutionMap,
    name: &str,
    file_path: Option<&str>,
    caller_file: Option<&str>,
) -> Option<i64> {
    let candidates = map.get(name)?;
    if let Some(path) = file_path {
        return candidates.iter().find(|(_, fp)| fp == path).map(|(id, _)| *id);
    }
    match candidates.as_slice() {
        [] => None,
        [(id, _)] => Some(*id),
        many => {
            if let Some(cf) = caller_file {
                if let Some((id, _)) = many.iter().find(|(_, fp)| fp == cf) {
                    return Some(*id);
                }
            }
            let (id, fp) = many.iter().min_by(|a, b| a.1.cmp(&b.1))?;
            tracing::warn!("ambiguous endpoint {name}: picked {fp}");
            Some(*id)
        }
    }
}

/// Eviction's view of the graph store.
#[async_trait]
impl fg_catalog::GraphPurge for GraphStore {
    async fn delete_snapshot_subtree(&self, id: SnapshotId) -> Result<()> {
        self.delete_snapshot(id).await
    }

    async fn node_count(&self, id: SnapshotId) -> Result<i64> {
        self.count_nodes(id).await
    }
}
