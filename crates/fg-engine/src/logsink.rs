use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Utc;
use fg_core::{Phase, Result, SnapshotId};
use tokio::io::AsyncWriteExt;

/// Per-snapshot, per-phase append-only log streams.
///
/// One directory per `snapshot_id`, one file per phase. Streams are
/// retained with the snapshot and deleted when it is evicted.
#[derive(Clone)]
pub struct LogSink {
    root: PathBuf,
}

impl LogSink {
    /// `root` is typically `<data_dir>/logs`.
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn snapshot_dir(&self, id: SnapshotId) -> PathBuf {
        self.root.join(id.to_string())
    }

    /// Path of one phase's stream.
    pub fn phase_path(&self, id: SnapshotId, phase: Phase) -> PathBuf {
        self.snapshot_dir(id).join(format!("{}.log", phase.as_str()))
    }

    /// Append one timestamped line to a phase stream.
    pub async fn append(&self, id: SnapshotId, phase: Phase, line: &str) -> Result<()> {
        let dir = self.snapshot_dir(id);
        tokio::fs::create_dir_all(&dir).await?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.phase_path(id, phase))
            .await?;
        let stamped = format!("{} {line}\n", Utc::now().to_rfc3339());
        file.write_all(stamped.as_bytes()).await?;
        Ok(())
    }

    /// Read one phase's stream in full. Missing stream reads as empty.
    pub async fn read(&self, id: SnapshotId, phase: Phase) -> Result<String> {
        match tokio::fs::read_to_string(self.phase_path(id, phase)).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete all streams of one snapshot. Idempotent.
    pub async fn remove(&self, id: SnapshotId) -> Result<()> {
        match tokio::fs::remove_dir_all(self.snapshot_dir(id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Eviction's view of the log sink.
#[async_trait]
impl fg_catalog::LogPurge for LogSink {
    async fn remove_logs(&self, id: SnapshotId) -> Result<()> {
        self.remove(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn append_read_remove() {
        let dir = tempfile::tempdir().unwrap();
        let sink = LogSink::new(dir.path().join("logs"));
        let id = Uuid::new_v4();

        sink.append(id, Phase::Probe, "classified language: c").await.unwrap();
        sink.append(id, Phase::Probe, "build system: cmake").await.unwrap();
        sink.append(id, Phase::Bitcode, "linking 12 blobs").await.unwrap();

        let probe = sink.read(id, Phase::Probe).await.unwrap();
        assert_eq!(probe.lines().count(), 2);
        assert!(probe.contains("classified language"));

        sink.remove(id).await.unwrap();
        assert!(sink.read(id, Phase::Probe).await.unwrap().is_empty());
        // Idempotent.
        sink.remove(id).await.unwrap();
    }
}
