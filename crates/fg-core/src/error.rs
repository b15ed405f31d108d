use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid input: {0}")]
    Input(String),

    #[error("Probe failed: {0}")]
    Probe(String),

    #[error("Build command resolution failed: {0}")]
    BuildCommand(String),

    #[error("Build failed: {0}")]
    Build(String),

    #[error("Analysis backend failed: {0}")]
    AnalysisBackend(String),

    #[error("Harness parse failed: {0}")]
    HarnessParse(String),

    #[error("Ambiguous function name: {0}")]
    AmbiguousFunction(String),

    #[error("Snapshot not found: {0}")]
    SnapshotNotFound(String),

    #[error("Invalid state transition: {0}")]
    InvalidTransition(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
