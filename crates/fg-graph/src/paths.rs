use std::collections::{HashMap, HashSet, VecDeque};

use fg_core::{CallType, Result, SnapshotId};

use crate::model::{FunctionNode, Subtree, SubtreeEdge};
use crate::store::{FunctionRow, GraphStore, FUNCTION_COLUMNS};

/// Outgoing CALLS adjacency for one snapshot, keyed by caller row id.
pub type CallAdjacency = HashMap<i64, Vec<i64>>;

impl GraphStore {
    /// Load the full outgoing CALLS adjacency of a snapshot into memory.
    ///
    /// Parallel edges collapse to one neighbor entry; hop-based
    /// traversals do not care how a call is dispatched.
    pub async fn load_call_adjacency(&self, id: SnapshotId) -> Result<CallAdjacency> {
        let rows: Vec<(i64, i64)> = sqlx::query_as(
            "SELECT DISTINCT caller_id, callee_id FROM call_edges WHERE snapshot_id = $1",
        )
        .bind(id.to_string())
        .fetch_all(self.pool())
        .await?;
        let mut adjacency: CallAdjacency = HashMap::new();
        for (caller, callee) in rows {
            adjacency.entry(caller).or_default().push(callee);
        }
        Ok(adjacency)
    }

    /// `(fuzzer_name, entry function row id)` for every fuzzer of the
    /// snapshot.
    pub async fn list_fuzzer_entry_nodes(&self, id: SnapshotId) -> Result<Vec<(String, i64)>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT fz.name, f.id FROM fuzzers fz \
             JOIN functions f ON f.snapshot_id = fz.snapshot_id \
                AND f.name = fz.entry_function AND f.file_path = fz.entry_file_path \
             WHERE fz.snapshot_id = $1 ORDER BY fz.name",
        )
        .bind(id.to_string())
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    /// Row id → `(name, file_path)` for every function node of the
    /// snapshot.
    pub async fn function_identities(
        &self,
        id: SnapshotId,
    ) -> Result<HashMap<i64, (String, String)>> {
        let rows: Vec<(i64, String, String)> = sqlx::query_as(
            "SELECT id, name, file_path FROM functions WHERE snapshot_id = $1",
        )
        .bind(id.to_string())
        .fetch_all(self.pool())
        .await?;
        Ok(rows
            .into_iter()
            .map(|(id, name, fp)| (id, (name, fp)))
            .collect())
    }

    /// All paths of the minimum CALLS length between two functions.
    ///
    /// Returns `None` when the target is unreachable (or lies beyond
    /// `max_depth`). `max_depth = -1` and `max_results = -1` mean
    /// unbounded.
    #[allow(clippy::too_many_arguments)]
    pub async fn shortest_path(
        &self,
        id: SnapshotId,
        from_name: &str,
        from_file_path: Option<&str>,
        to_name: &str,
        to_file_path: Option<&str>,
        max_depth: i64,
        max_results: i64,
    ) -> Result<Option<Vec<Vec<FunctionNode>>>> {
        let Some(src) = self.get_function_metadata(id, from_name, from_file_path).await? else {
            return Ok(None);
        };
        let Some(dst) = self.get_function_metadata(id, to_name, to_file_path).await? else {
            return Ok(None);
        };
        let adjacency = self.load_call_adjacency(id).await?;

        // BFS layering from the source.
        let mut dist: HashMap<i64, i64> = HashMap::from([(src.id, 0)]);
        let mut queue = VecDeque::from([src.id]);
        while let Some(u) = queue.pop_front() {
            let d = dist[&u];
            if u == dst.id {
                break;
            }
            if max_depth >= 0 && d >= max_depth {
                continue;
            }
            for &v in adjacency.get(&u).into_iter().flatten() {
                if !dist.contains_key(&v) {
                    dist.insert(v, d + 1);
                    queue.push_back(v);
                }
            }
        }
        let Some(&target_dist) = dist.get(&dst.id) else {
            return Ok(None);
        };
        if src.id == dst.id {
            return Ok(Some(vec![vec![src]]));
        }

        // Walk the BFS layering backwards to enumerate every shortest
        // path, newest hop first.
        let mut preds: HashMap<i64, Vec<i64>> = HashMap::new();
        for (&u, neighbors) in &adjacency {
            if let Some(&du) = dist.get(&u) {
                for &v in neighbors {
                    if dist.get(&v) == Some(&(du + 1)) {
                        preds.entry(v).or_default().push(u);
                    }
                }
            }
        }
        let mut paths: Vec<Vec<i64>> = Vec::new();
        let mut stack = vec![vec![dst.id]];
        while let Some(partial) = stack.pop() {
            if max_results >= 0 && paths.len() as i64 >= max_results {
                break;
            }
            let head = *partial.last().expect("partial path is never empty");
            if head == src.id {
                let mut path = partial.clone();
                path.reverse();
                paths.push(path);
                continue;
            }
            if (partial.len() as i64) > target_dist {
                continue;
            }
            for &p in preds.get(&head).into_iter().flatten() {
                let mut next = partial.clone();
                next.push(p);
                stack.push(next);
            }
        }

        let nodes = self.materialize_nodes(id, &paths).await?;
        Ok(Some(nodes))
    }

    /// All simple CALLS paths between two functions, ordered by length
    /// ascending. Iterative deepening keeps the enumeration shallow when
    /// `max_results` is small.
    #[allow(clippy::too_many_arguments)]
    pub async fn get_all_paths(
        &self,
        id: SnapshotId,
        from_name: &str,
        from_file_path: Option<&str>,
        to_name: &str,
        to_file_path: Option<&str>,
        max_depth: i64,
        max_results: i64,
    ) -> Result<Vec<Vec<FunctionNode>>> {
        let Some(src) = self.get_function_metadata(id, from_name, from_file_path).await? else {
            return Ok(Vec::new());
        };
        let Some(dst) = self.get_function_metadata(id, to_name, to_file_path).await? else {
            return Ok(Vec::new());
        };
        let adjacency = self.load_call_adjacency(id).await?;

        // A simple path cannot exceed the node count.
        let node_bound = adjacency
            .keys()
            .chain(adjacency.values().flatten())
            .collect::<HashSet<_>>()
            .len() as i64;
        let depth_cap = if max_depth >= 0 {
            max_depth.min(node_bound)
        } else {
            node_bound
        };

        let mut paths: Vec<Vec<i64>> = Vec::new();
        for length in 1..=depth_cap {
            if max_results >= 0 && paths.len() as i64 >= max_results {
                break;
            }
            collect_paths_of_length(
                &adjacency,
                src.id,
                dst.id,
                length,
                max_results,
                &mut paths,
            );
        }
        if max_results >= 0 {
            paths.truncate(max_results as usize);
        }
        self.materialize_nodes(id, &paths).await
    }

    /// Local N-hop subgraph around one function, for visualization.
    pub async fn get_subtree(
        &self,
        id: SnapshotId,
        name: &str,
        file_path: Option<&str>,
        depth: i64,
    ) -> Result<Option<Subtree>> {
        let Some(root) = self.get_function_metadata(id, name, file_path).await? else {
            return Ok(None);
        };
        let rows: Vec<(i64, i64, String)> = sqlx::query_as(
            "SELECT caller_id, callee_id, call_type FROM call_edges WHERE snapshot_id = $1",
        )
        .bind(id.to_string())
        .fetch_all(self.pool())
        .await?;
        let mut adjacency: HashMap<i64, Vec<(i64, CallType)>> = HashMap::new();
        for (caller, callee, call_type) in rows {
            let ct = call_type.parse::<CallType>().unwrap_or(CallType::Direct);
            adjacency.entry(caller).or_default().push((callee, ct));
        }

        let mut seen = HashSet::from([root.id]);
        let mut frontier = VecDeque::from([(root.id, 0i64)]);
        let mut edges = Vec::new();
        while let Some((u, d)) = frontier.pop_front() {
            if d >= depth {
                continue;
            }
            for &(v, ct) in adjacency.get(&u).into_iter().flatten() {
                edges.push(SubtreeEdge {
                    caller_id: u,
                    callee_id: v,
                    call_type: ct,
                });
                if seen.insert(v) {
                    frontier.push_back((v, d + 1));
                }
            }
        }

        let ids: Vec<i64> = seen.into_iter().collect();
        let by_id = self.fetch_nodes_by_ids(id, &ids).await?;
        let mut nodes: Vec<FunctionNode> = by_id.into_values().collect();
        nodes.sort_by(|a, b| (&a.name, &a.file_path).cmp(&(&b.name, &b.file_path)));
        Ok(Some(Subtree { nodes, edges }))
    }

    async fn materialize_nodes(
        &self,
        id: SnapshotId,
        paths: &[Vec<i64>],
    ) -> Result<Vec<Vec<FunctionNode>>> {
        let ids: Vec<i64> = paths
            .iter()
            .flatten()
            .copied()
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let by_id = self.fetch_nodes_by_ids(id, &ids).await?;
        let mut out = Vec::with_capacity(paths.len());
        for path in paths {
            let mut nodes = Vec::with_capacity(path.len());
            for node_id in path {
                if let Some(node) = by_id.get(node_id) {
                    nodes.push(node.clone());
                }
            }
            out.push(nodes);
        }
        out.sort_by_key(|p| p.len());
        Ok(out)
    }

    pub(crate) async fn fetch_nodes_by_ids(
        &self,
        id: SnapshotId,
        ids: &[i64],
    ) -> Result<HashMap<i64, FunctionNode>> {
        let sid = id.to_string();
        let mut out = HashMap::with_capacity(ids.len());
        for chunk in ids.chunks(500) {
            let placeholders: Vec<String> =
                (0..chunk.len()).map(|i| format!("${}", i + 2)).collect();
            let sql = format!(
                "SELECT {FUNCTION_COLUMNS} FROM functions \
                 WHERE snapshot_id = $1 AND id IN ({})",
                placeholders.join(", ")
            );
            let mut query = sqlx::query_as::<_, FunctionRow>(&sql).bind(&sid);
            for node_id in chunk {
                query = query.bind(node_id);
            }
            for row in query.fetch_all(self.pool()).await? {
                let node = row.into_node();
                out.insert(node.id, node);
            }
        }
        Ok(out)
    }
}

/// Depth-first enumeration of simple paths with an exact edge count.
fn collect_paths_of_length(
    adjacency: &CallAdjacency,
    src: i64,
    dst: i64,
    length: i64,
    max_results: i64,
    paths: &mut Vec<Vec<i64>>,
) {
    let mut path = vec![src];
    let mut on_path = HashSet::from([src]);
    dfs(adjacency, dst, length, max_results, &mut path, &mut on_path, paths);
}

fn dfs(
    adjacency: &CallAdjacency,
    dst: i64,
    length: i64,
    max_results: i64,
    path: &mut Vec<i64>,
    on_path: &mut HashSet<i64>,
    paths: &mut Vec<Vec<i64>>,
) {
    if max_results >= 0 && paths.len() as i64 >= max_results {
        return;
    }
    let current = *path.last().expect("path is never empty");
    let edges_used = path.len() as i64 - 1;
    if edges_used == length {
        if current == dst {
            paths.push(path.clone());
        }
        return;
    }
    for &next in adjacency.get(&current).into_iter().flatten() {
        if on_path.contains(&next) {
            continue;
        }
        path.push(next);
        on_path.insert(next);
        dfs(adjacency, dst, length, max_results, path, on_path, paths);
        on_path.remove(&next);
        path.pop();
    }
}
