use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use fg_core::{Result, SnapshotId, SnapshotRecord};

use crate::store::Catalog;

/// Graph-side operations eviction needs: subtree deletion and a node
/// census for detecting half-evicted snapshots.
#[async_trait]
pub trait GraphPurge: Send + Sync + 'static {
    async fn delete_snapshot_subtree(&self, id: SnapshotId) -> Result<()>;
    async fn node_count(&self, id: SnapshotId) -> Result<i64>;
}

/// Log-side operation eviction needs: removal of a snapshot's streams.
#[async_trait]
pub trait LogPurge: Send + Sync + 'static {
    async fn remove_logs(&self, id: SnapshotId) -> Result<()>;
}

/// Eviction policy thresholds, lifted from the engine configuration.
#[derive(Debug, Clone)]
pub struct EvictionPolicy {
    pub disk_capacity_bytes: u64,
    pub disk_high_water: f64,
    pub disk_low_water: f64,
    pub per_repo_cap: i64,
    pub snapshot_ttl_days: i64,
}

/// Applies the three eviction policies in order: disk pressure, per-repo
/// retention cap, TTL. Never evicts `building` snapshots — every
/// candidate list is drawn from `completed` rows only.
pub struct Evictor {
    catalog: Catalog,
    graph: Arc<dyn GraphPurge>,
    logs: Arc<dyn LogPurge>,
    policy: EvictionPolicy,
}

impl Evictor {
    pub fn new(
        catalog: Catalog,
        graph: Arc<dyn GraphPurge>,
        logs: Arc<dyn LogPurge>,
        policy: EvictionPolicy,
    ) -> Self {
        Self {
            catalog,
            graph,
            logs,
            policy,
        }
    }

    /// Fully evict one snapshot: graph subtree, then log streams, then
    /// the catalog row — serialized in that order so an interruption
    /// leaves at worst a row whose graph is gone, which the next pass
    /// treats as already evicted.
    pub async fn evict(&self, id: SnapshotId) -> Result<()> {
        tracing::info!(snapshot_id = %id, "evicting snapshot");
        self.graph.delete_snapshot_subtree(id).await?;
        self.logs.remove_logs(id).await?;
        self.catalog.delete(id).await?;
        Ok(())
    }

    /// One full sweep of all policies. Invoked on the background schedule
    /// and before admission of a new build.
    pub async fn run_once(&self) -> Result<u64> {
        let mut evicted = 0;
        evicted += self.sweep_orphans().await?;
        evicted += self.disk_pressure().await?;
        evicted += self.per_repo_cap().await?;
        evicted += self.ttl().await?;
        Ok(evicted)
    }

    /// Alias making call sites read as what they are.
    pub async fn run_pre_admission(&self) -> Result<u64> {
        self.run_once().await
    }

    /// A `completed` row whose graph has zero nodes was interrupted after
    /// the graph delete; finish the job.
    async fn sweep_orphans(&self) -> Result<u64> {
        let mut cleaned = 0;
        for rec in self.catalog.list_completed_lru().await? {
            if self.graph.node_count(rec.id).await? == 0 {
                tracing::warn!(snapshot_id = %rec.id, "cleaning half-evicted snapshot");
                self.logs.remove_logs(rec.id).await?;
                self.catalog.delete(rec.id).await?;
                cleaned += 1;
            }
        }
        Ok(cleaned)
    }

    /// Evict by ascending `last_accessed_at` until usage falls below the
    /// low-water mark, once it has crossed the high-water mark.
    async fn disk_pressure(&self) -> Result<u64> {
        let high = (self.policy.disk_capacity_bytes as f64 * self.policy.disk_high_water) as i64;
        let low = (self.policy.disk_capacity_bytes as f64 * self.policy.disk_low_water) as i64;
        let mut usage = self.catalog.total_completed_size().await?;
        if usage <= high {
            return Ok(0);
        }
        tracing::info!(usage, high, "disk pressure eviction triggered");
        let mut evicted = 0;
        for rec in self.catalog.list_completed_lru().await? {
            if usage <= low {
                break;
            }
            usage -= rec.size_bytes.unwrap_or(0);
            self.evict(rec.id).await?;
            evicted += 1;
        }
        Ok(evicted)
    }

    /// Keep at most `per_repo_cap` completed snapshots per repository,
    /// evicting the LRU excess.
    async fn per_repo_cap(&self) -> Result<u64> {
        let mut evicted = 0;
        for repo_url in self.catalog.completed_repo_urls().await? {
            let recs = self.catalog.list_completed_for_repo(&repo_url).await?;
            let excess = recs.len().saturating_sub(self.policy.per_repo_cap as usize);
            for rec in recs.into_iter().take(excess) {
                self.evict(rec.id).await?;
                evicted += 1;
            }
        }
        Ok(evicted)
    }

    /// Evict completed snapshots unaccessed for longer than the TTL.
    async fn ttl(&self) -> Result<u64> {
        let cutoff = Utc::now() - chrono::Duration::days(self.policy.snapshot_ttl_days);
        let mut evicted = 0;
        for rec in self.catalog.list_completed_lru().await? {
            if rec.last_accessed_at < cutoff {
                self.evict(rec.id).await?;
                evicted += 1;
            }
        }
        Ok(evicted)
    }

    /// Spawn the recurring sweep as a background task.
    pub fn spawn_interval(self: Arc<Self>, period: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = self.run_once().await {
                    tracing::error!("eviction sweep failed: {e}");
                }
            }
        })
    }
}

/// Candidate ordering helper used by operators inspecting eviction state.
pub fn lru_order(records: &mut [SnapshotRecord]) {
    records.sort_by_key(|r| r.last_accessed_at);
}
