//! Per-fuzzer transitive reachability.
//!
//! Materialized rather than computed on demand: reachability queries are
//! in the hot path for downstream consumers, and a precomputed
//! `(fuzzer, function, min_depth)` triple turns them into one indexed
//! edge lookup.

use std::collections::{HashMap, HashSet, VecDeque};

use fg_core::{ReachesRecord, Result, SnapshotId};
use fg_graph::{CallAdjacency, GraphStore};

/// Compute REACHES triples for every fuzzer of an already-committed
/// snapshot (library graph plus fuzzer entry edges).
pub async fn compute_reaches(
    store: &GraphStore,
    snapshot_id: SnapshotId,
    hop_cap: u32,
) -> Result<Vec<ReachesRecord>> {
    let adjacency = store.load_call_adjacency(snapshot_id).await?;
    let entries = store.list_fuzzer_entry_nodes(snapshot_id).await?;
    let identities = store.function_identities(snapshot_id).await?;

    let mut records = Vec::new();
    for (fuzzer_name, entry_id) in entries {
        let depths = bounded_bfs(&adjacency, entry_id, hop_cap);
        let mut reached: Vec<(i64, i64)> = depths.into_iter().collect();
        reached.sort();
        for (node_id, depth) in reached {
            let Some((name, file_path)) = identities.get(&node_id) else {
                continue;
            };
            records.push(ReachesRecord {
                fuzzer_name: fuzzer_name.clone(),
                function_name: name.clone(),
                function_file_path: Some(file_path.clone()),
                depth,
            });
        }
    }
    Ok(records)
}

/// Bounded BFS from one entry node, recording the minimum hop count per
/// reached node.
///
/// The entry node itself is not a target at depth 0; a cycle returning
/// to it is recorded at its observed depth like any other reachable
/// node.
pub fn bounded_bfs(adjacency: &CallAdjacency, entry: i64, hop_cap: u32) -> HashMap<i64, i64> {
    let mut depths: HashMap<i64, i64> = HashMap::new();
    let mut visited: HashSet<i64> = HashSet::from([entry]);
    let mut queue: VecDeque<(i64, i64)> = VecDeque::from([(entry, 0)]);

    while let Some((node, depth)) = queue.pop_front() {
        if depth >= hop_cap as i64 {
            continue;
        }
        for &next in adjacency.get(&node).into_iter().flatten() {
            if next == entry {
                depths.entry(entry).or_insert(depth + 1);
                continue;
            }
            if visited.insert(next) {
                depths.insert(next, depth + 1);
                queue.push_back((next, depth + 1));
            }
        }
    }
    depths
}
