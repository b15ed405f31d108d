use std::collections::BTreeMap;

use fg_core::{
    CallType, Error, FuzzerFile, FuzzerInfo, Result, SnapshotId, SnapshotStatistics,
};
use serde_json::Value;
use sqlx::{Column, FromRow, Row, TypeInfo, ValueRef};

use crate::model::{CallNeighbor, FunctionNode, ReachedFunction};
use crate::store::{FunctionRow, GraphStore, FUNCTION_COLUMNS};

#[derive(sqlx::FromRow)]
struct FuzzerRow {
    name: String,
    entry_function: String,
    entry_file_path: String,
    files: String,
    focus: Option<String>,
}

impl GraphStore {
    /// Exact metadata fetch for one function.
    ///
    /// A bare name that resolves to several functions is an
    /// `AmbiguousFunction` error — callers must supply `file_path` to
    /// disambiguate. A miss returns `Ok(None)`.
    pub async fn get_function_metadata(
        &self,
        id: SnapshotId,
        name: &str,
        file_path: Option<&str>,
    ) -> Result<Option<FunctionNode>> {
        let sid = id.to_string();
        let rows: Vec<FunctionRow> = if let Some(path) = file_path {
            sqlx::query_as(&format!(
                "SELECT {FUNCTION_COLUMNS} FROM functions \
                 WHERE snapshot_id = $1 AND name = $2 AND file_path = $3"
            ))
            .bind(&sid)
            .bind(name)
            .bind(path)
            .fetch_all(self.pool())
            .await?
        } else {
            sqlx::query_as(&format!(
                "SELECT {FUNCTION_COLUMNS} FROM functions \
                 WHERE snapshot_id = $1 AND name = $2"
            ))
            .bind(&sid)
            .bind(name)
            .fetch_all(self.pool())
            .await?
        };

        match rows.len() {
            0 => Ok(None),
            1 => Ok(rows.into_iter().next().map(FunctionRow::into_node)),
            n => Err(Error::AmbiguousFunction(format!(
                "{name} matches {n} functions; supply file_path"
            ))),
        }
    }

    /// All functions defined in one file, ordered by start line.
    pub async fn list_function_info_by_file(
        &self,
        id: SnapshotId,
        file_path: &str,
    ) -> Result<Vec<FunctionNode>> {
        let rows: Vec<FunctionRow> = sqlx::query_as(&format!(
            "SELECT {FUNCTION_COLUMNS} FROM functions \
             WHERE snapshot_id = $1 AND file_path = $2 \
             ORDER BY start_line"
        ))
        .bind(id.to_string())
        .bind(file_path)
        .fetch_all(self.pool())
        .await?;
        Ok(rows.into_iter().map(FunctionRow::into_node).collect())
    }

    /// Glob search over function names (`*` and `?` wildcards).
    pub async fn search_functions(
        &self,
        id: SnapshotId,
        pattern: &str,
    ) -> Result<Vec<FunctionNode>> {
        let like = glob_to_like(pattern);
        let rows: Vec<FunctionRow> = sqlx::query_as(&format!(
            "SELECT {FUNCTION_COLUMNS} FROM functions \
             WHERE snapshot_id = $1 AND name LIKE $2 ESCAPE '\\' \
             ORDER BY name, file_path"
        ))
        .bind(id.to_string())
        .bind(&like)
        .fetch_all(self.pool())
        .await?;
        Ok(rows.into_iter().map(FunctionRow::into_node).collect())
    }

    /// Functions calling the given function.
    pub async fn get_callers(
        &self,
        id: SnapshotId,
        name: &str,
        file_path: Option<&str>,
    ) -> Result<Vec<CallNeighbor>> {
        let Some(target) = self.get_function_metadata(id, name, file_path).await? else {
            return Ok(Vec::new());
        };
        self.neighbors(id, target.id, "callee_id", "caller_id").await
    }

    /// Functions called by the given function.
    pub async fn get_callees(
        &self,
        id: SnapshotId,
        name: &str,
        file_path: Option<&str>,
    ) -> Result<Vec<CallNeighbor>> {
        let Some(source) = self.get_function_metadata(id, name, file_path).await? else {
            return Ok(Vec::new());
        };
        self.neighbors(id, source.id, "caller_id", "callee_id").await
    }

    async fn neighbors(
        &self,
        id: SnapshotId,
        node_id: i64,
        match_col: &str,
        select_col: &str,
    ) -> Result<Vec<CallNeighbor>> {
        let columns: String = FUNCTION_COLUMNS
            .split(", ")
            .map(|c| format!("f.{c}"))
            .collect::<Vec<_>>()
            .join(", ");
        let rows = sqlx::query(&format!(
            "SELECT {columns}, e.call_type, e.confidence AS edge_confidence, e.backend \
             FROM call_edges e JOIN functions f ON f.id = e.{select_col} \
             WHERE e.snapshot_id = $1 AND e.{match_col} = $2 \
             ORDER BY f.name, f.file_path"
        ))
        .bind(id.to_string())
        .bind(node_id)
        .fetch_all(self.pool())
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let function = FunctionRow::from_row(&row)?.into_node();
            let call_type: String = row.try_get("call_type")?;
            out.push(CallNeighbor {
                function,
                call_type: call_type.parse::<CallType>().unwrap_or(CallType::Direct),
                confidence: row.try_get("edge_confidence")?,
                backend: row.try_get("backend")?,
            });
        }
        Ok(out)
    }

    /// Functions one fuzzer reaches, optionally filtered to an exact
    /// depth or a depth cap, shallowest first.
    pub async fn reachable_functions_by_one_fuzzer(
        &self,
        id: SnapshotId,
        fuzzer_name: &str,
        depth_eq: Option<i64>,
        max_depth: Option<i64>,
    ) -> Result<Vec<ReachedFunction>> {
        let columns: String = FUNCTION_COLUMNS
            .split(", ")
            .map(|c| format!("f.{c}"))
            .collect::<Vec<_>>()
            .join(", ");
        let mut sql = format!(
            "SELECT {columns}, r.depth FROM reaches r \
             JOIN fuzzers fz ON fz.id = r.fuzzer_id \
             JOIN functions f ON f.id = r.function_id \
             WHERE r.snapshot_id = $1 AND fz.name = $2"
        );
        if depth_eq.is_some() {
            sql.push_str(" AND r.depth = $3");
        } else if max_depth.is_some() {
            sql.push_str(" AND r.depth <= $3");
        }
        sql.push_str(" ORDER BY r.depth, f.name");

        let mut query = sqlx::query(&sql).bind(id.to_string()).bind(fuzzer_name);
        if let Some(d) = depth_eq.or(max_depth) {
            query = query.bind(d);
        }
        let rows = query.fetch_all(self.pool()).await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(ReachedFunction {
                function: FunctionRow::from_row(&row)?.into_node(),
                depth: row.try_get("depth")?,
            });
        }
        Ok(out)
    }

    /// Library functions no fuzzer reaches. Entry-point copies and
    /// externals are not listed.
    pub async fn unreached_functions_by_all_fuzzers(
        &self,
        id: SnapshotId,
    ) -> Result<Vec<FunctionNode>> {
        let rows: Vec<FunctionRow> = sqlx::query_as(&format!(
            "SELECT {FUNCTION_COLUMNS} FROM functions \
             WHERE snapshot_id = $1 AND kind = 'function' AND is_entry_point = 0 \
               AND id NOT IN (SELECT function_id FROM reaches WHERE snapshot_id = $1) \
             ORDER BY file_path, name"
        ))
        .bind(id.to_string())
        .fetch_all(self.pool())
        .await?;
        Ok(rows.into_iter().map(FunctionRow::into_node).collect())
    }

    /// All fuzzers with their file paths but without harness sources.
    pub async fn list_fuzzer_info_no_code(&self, id: SnapshotId) -> Result<Vec<FuzzerInfo>> {
        let rows: Vec<FuzzerRow> = sqlx::query_as(
            "SELECT name, entry_function, entry_file_path, files, focus \
             FROM fuzzers WHERE snapshot_id = $1 ORDER BY name",
        )
        .bind(id.to_string())
        .fetch_all(self.pool())
        .await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let mut info = self.fuzzer_row_to_info(id, row).await?;
            for file in &mut info.files {
                file.source.clear();
            }
            out.push(info);
        }
        Ok(out)
    }

    /// Full metadata for one fuzzer, harness sources included.
    pub async fn get_fuzzer_metadata(
        &self,
        id: SnapshotId,
        fuzzer_name: &str,
    ) -> Result<Option<FuzzerInfo>> {
        let row: Option<FuzzerRow> = sqlx::query_as(
            "SELECT name, entry_function, entry_file_path, files, focus \
             FROM fuzzers WHERE snapshot_id = $1 AND name = $2",
        )
        .bind(id.to_string())
        .bind(fuzzer_name)
        .fetch_optional(self.pool())
        .await?;
        match row {
            Some(row) => Ok(Some(self.fuzzer_row_to_info(id, row).await?)),
            None => Ok(None),
        }
    }

    async fn fuzzer_row_to_info(&self, id: SnapshotId, row: FuzzerRow) -> Result<FuzzerInfo> {
        let files: Vec<FuzzerFile> = serde_json::from_str(&row.files).unwrap_or_default();
        let library_calls: Vec<String> = sqlx::query_as::<_, (String,)>(
            "SELECT DISTINCT f.name FROM call_edges e \
             JOIN functions entry ON entry.id = e.caller_id \
             JOIN functions f ON f.id = e.callee_id \
             WHERE e.snapshot_id = $1 AND e.backend = 'harness' \
               AND entry.name = $2 AND entry.file_path = $3 \
             ORDER BY f.name",
        )
        .bind(id.to_string())
        .bind(&row.entry_function)
        .bind(&row.entry_file_path)
        .fetch_all(self.pool())
        .await?
        .into_iter()
        .map(|r| r.0)
        .collect();
        Ok(FuzzerInfo {
            name: row.name,
            entry_function: row.entry_function,
            files,
            focus: row.focus,
            library_calls,
        })
    }

    /// Names of all External leaves in the snapshot.
    pub async fn list_external_function_names(&self, id: SnapshotId) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM functions \
             WHERE snapshot_id = $1 AND kind = 'external' ORDER BY name",
        )
        .bind(id.to_string())
        .fetch_all(self.pool())
        .await?;
        Ok(rows.into_iter().map(|r| r.0).collect())
    }

    /// Counts and the REACHES depth distribution for one snapshot.
    pub async fn get_snapshot_statistics(&self, id: SnapshotId) -> Result<SnapshotStatistics> {
        let sid = id.to_string();
        let by_kind: Vec<(String, i64)> = sqlx::query_as(
            "SELECT kind, COUNT(*) FROM functions WHERE snapshot_id = $1 GROUP BY kind",
        )
        .bind(&sid)
        .fetch_all(self.pool())
        .await?;
        let mut stats = SnapshotStatistics::default();
        for (kind, count) in by_kind {
            match kind.as_str() {
                "external" => stats.external_count = count,
                _ => stats.function_count += count,
            }
        }
        let fuzzers: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM fuzzers WHERE snapshot_id = $1")
                .bind(&sid)
                .fetch_one(self.pool())
                .await?;
        stats.fuzzer_count = fuzzers.0;
        let calls: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM call_edges WHERE snapshot_id = $1")
                .bind(&sid)
                .fetch_one(self.pool())
                .await?;
        stats.call_edge_count = calls.0;
        let depths: Vec<(i64, i64)> = sqlx::query_as(
            "SELECT depth, COUNT(*) FROM reaches WHERE snapshot_id = $1 GROUP BY depth",
        )
        .bind(&sid)
        .fetch_all(self.pool())
        .await?;
        let mut distribution = BTreeMap::new();
        for (depth, count) in depths {
            stats.reaches_count += count;
            distribution.insert(depth, count);
        }
        stats.depth_distribution = distribution;
        Ok(stats)
    }

    /// Escape hatch: run an arbitrary SQL query with JSON-typed
    /// parameters, returning rows as JSON objects.
    pub async fn raw_query(&self, sql: &str, params: &[Value]) -> Result<Vec<Value>> {
        let mut query = sqlx::query(sql);
        for p in params {
            query = match p {
                Value::Null => query.bind(None::<String>),
                Value::Bool(b) => query.bind(*b),
                Value::Number(n) if n.is_i64() => query.bind(n.as_i64().unwrap_or(0)),
                Value::Number(n) => query.bind(n.as_f64().unwrap_or(0.0)),
                Value::String(s) => query.bind(s.clone()),
                other => query.bind(other.to_string()),
            };
        }
        let rows = query.fetch_all(self.pool()).await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let mut obj = serde_json::Map::new();
            for col in row.columns() {
                let idx = col.ordinal();
                let raw = row.try_get_raw(idx)?;
                let value = if raw.is_null() {
                    Value::Null
                } else {
                    match raw.type_info().name() {
                        "INTEGER" => row
                            .try_get::<i64, _>(idx)
                            .map(Value::from)
                            .unwrap_or(Value::Null),
                        "REAL" => row
                            .try_get::<f64, _>(idx)
                            .map(Value::from)
                            .unwrap_or(Value::Null),
                        "BOOLEAN" => row
                            .try_get::<bool, _>(idx)
                            .map(Value::from)
                            .unwrap_or(Value::Null),
                        _ => row
                            .try_get::<String, _>(idx)
                            .map(Value::from)
                            .unwrap_or(Value::Null),
                    }
                };
                obj.insert(col.name().to_string(), value);
            }
            out.push(Value::Object(obj));
        }
        Ok(out)
    }
}

/// Translate a `*`/`?` glob into a SQL LIKE pattern, escaping LIKE's own
/// metacharacters.
fn glob_to_like(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    for c in pattern.chars() {
        match c {
            '*' => out.push('%'),
            '?' => out.push('_'),
            '%' | '_' | '\\' => {
                out.push('\\');
                out.push(c);
            }
            other => out.push(other),
        }
    }
    out
}
