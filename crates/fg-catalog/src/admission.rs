use std::time::Duration;

use chrono::Utc;
use fg_core::{Error, Result, SnapshotId, SnapshotRecord, SnapshotStatus};

use crate::store::Catalog;

/// Resolution of an admission attempt for one snapshot key.
#[derive(Debug, Clone)]
pub enum AcquireOutcome {
    /// A `completed` snapshot already exists; access metadata refreshed.
    Hit(SnapshotRecord),
    /// Another builder owns a live `building` row; caller should poll.
    Wait(SnapshotRecord),
    /// This caller inserted the `building` row and must perform the build.
    Own(SnapshotRecord),
}

impl Catalog {
    /// Rendezvous for concurrent clients requesting the same snapshot.
    ///
    /// At most one caller per key observes `Own`; losers of the insert
    /// race observe the winner's row and switch to waiting. Stale
    /// `building` rows past `stale_deadline` are reaped to `failed`, and
    /// `failed` rows are deleted before a fresh insert.
    pub async fn acquire_or_wait(
        &self,
        repo_url: &str,
        version: &str,
        backend: &str,
        stale_deadline: Duration,
    ) -> Result<AcquireOutcome> {
        // Bounded retries: every loop iteration either resolves or removes
        // the row that blocked the previous one.
        for _ in 0..4 {
            match self.find(repo_url, version, backend).await? {
                Some(rec) => match rec.status {
                    SnapshotStatus::Completed => {
                        self.touch(rec.id).await?;
                        let rec = self
                            .get(rec.id)
                            .await?
                            .ok_or_else(|| Error::SnapshotNotFound(rec.id.to_string()))?;
                        return Ok(AcquireOutcome::Hit(rec));
                    }
                    SnapshotStatus::Building => {
                        let age = Utc::now().signed_duration_since(rec.created_at);
                        let deadline = chrono::Duration::from_std(stale_deadline)
                            .unwrap_or(chrono::Duration::MAX);
                        if age >= deadline {
                            tracing::warn!(
                                snapshot_id = %rec.id,
                                "reaping stale building row (age {}s)",
                                age.num_seconds()
                            );
                            self.mark_failed(
                                rec.id,
                                "builder timed out: stale building row reaped",
                            )
                            .await?;
                            continue;
                        }
                        return Ok(AcquireOutcome::Wait(rec));
                    }
                    SnapshotStatus::Failed => {
                        self.delete_failed(rec.id).await?;
                        continue;
                    }
                },
                None => {
                    if let Some(rec) =
                        self.try_insert_building(repo_url, version, backend).await?
                    {
                        return Ok(AcquireOutcome::Own(rec));
                    }
                    // Lost the insert race; observe the winner's row.
                    continue;
                }
            }
        }
        Err(Error::Internal(format!(
            "admission for {repo_url}@{version} ({backend}) did not settle"
        )))
    }

    /// Block until the snapshot reaches `completed` or `failed`.
    ///
    /// `failed` returns the record without raising so the waiter may
    /// retry admission; exceeding `overall_deadline` raises
    /// `Error::Timeout`. A row that disappears mid-wait (evicted) is
    /// `Error::SnapshotNotFound`.
    pub async fn wait_until_ready(
        &self,
        id: SnapshotId,
        poll_interval: Duration,
        overall_deadline: Duration,
    ) -> Result<SnapshotRecord> {
        let started = tokio::time::Instant::now();
        loop {
            let rec = self
                .get(id)
                .await?
                .ok_or_else(|| Error::SnapshotNotFound(id.to_string()))?;
            match rec.status {
                SnapshotStatus::Completed | SnapshotStatus::Failed => return Ok(rec),
                SnapshotStatus::Building => {
                    if started.elapsed() >= overall_deadline {
                        return Err(Error::Timeout(format!(
                            "snapshot {id} still building after {}s",
                            overall_deadline.as_secs()
                        )));
                    }
                    tokio::time::sleep(poll_interval).await;
                }
            }
        }
    }
}
