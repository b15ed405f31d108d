use std::path::PathBuf;
use std::time::Duration;

/// Process-wide immutable runtime configuration.
///
/// Constructed once at startup and passed explicitly into component
/// constructors; there are no ambient mutable singletons.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// SQLite URL of the catalog database.
    pub catalog_url: String,
    /// SQLite URL of the graph database.
    pub graph_url: String,
    /// Root directory for build workspaces and per-snapshot log streams.
    pub data_dir: PathBuf,

    /// A `building` row older than this is reaped to `failed` on the next
    /// admission attempt.
    pub stale_build_deadline: Duration,
    /// Cadence at which waiters poll the catalog.
    pub poll_interval: Duration,
    /// Overall cap on `wait_until_ready`.
    pub wait_deadline: Duration,

    /// Subprocess cap for the target project's native build.
    pub build_timeout: Duration,
    /// Subprocess cap for the pointer analyzer.
    pub analyze_timeout: Duration,

    /// Hop cap for per-fuzzer reachability BFS.
    pub reaches_hop_cap: u32,

    /// Storage capacity the eviction watermarks are measured against.
    pub disk_capacity_bytes: u64,
    pub disk_high_water: f64,
    pub disk_low_water: f64,
    /// Max `completed` snapshots kept per `repo_url`.
    pub per_repo_cap: i64,
    /// `completed` snapshots unaccessed for this many days are evicted.
    pub snapshot_ttl_days: i64,
    /// Cadence of the background eviction sweep.
    pub eviction_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            catalog_url: "sqlite://fuzzgraph-catalog.db".to_string(),
            graph_url: "sqlite://fuzzgraph-graph.db".to_string(),
            data_dir: PathBuf::from("./data"),
            stale_build_deadline: Duration::from_secs(30 * 60),
            poll_interval: Duration::from_secs(5),
            wait_deadline: Duration::from_secs(30 * 60),
            build_timeout: Duration::from_secs(30 * 60),
            analyze_timeout: Duration::from_secs(20 * 60),
            reaches_hop_cap: 50,
            disk_capacity_bytes: 100 * 1024 * 1024 * 1024,
            disk_high_water: 0.80,
            disk_low_water: 0.70,
            per_repo_cap: 5,
            snapshot_ttl_days: 90,
            eviction_interval: Duration::from_secs(60 * 60),
        }
    }
}

impl EngineConfig {
    /// Configuration rooted in a scratch directory, with file-backed
    /// SQLite databases under it. Intended for tests and local runs.
    pub fn for_tests(dir: &std::path::Path) -> Self {
        Self {
            catalog_url: format!("sqlite://{}?mode=rwc", dir.join("catalog.db").display()),
            graph_url: format!("sqlite://{}?mode=rwc", dir.join("graph.db").display()),
            data_dir: dir.join("data"),
            poll_interval: Duration::from_millis(20),
            ..Self::default()
        }
    }
}
