use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── ID types ──
pub type SnapshotId = Uuid;

/// Canonical entry symbol every fuzz harness defines.
pub const FUZZ_ENTRY_SYMBOL: &str = "LLVMFuzzerTestOneInput";

// ── Snapshot lifecycle ──
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SnapshotStatus {
    Building,
    Completed,
    Failed,
}

impl std::fmt::Display for SnapshotStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Building => "building",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

impl FromStr for SnapshotStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "building" => Ok(Self::Building),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown SnapshotStatus: {other}")),
        }
    }
}

/// One catalog row per `(repo_url, version, backend)`.
///
/// The stringified `id` is the `snapshot_id` every graph row and log
/// stream is scoped by.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub id: SnapshotId,
    pub repo_url: String,
    pub repo_name: String,
    pub version: String,
    pub backend: String,
    pub status: SnapshotStatus,
    pub node_count: Option<i64>,
    pub edge_count: Option<i64>,
    pub fuzzer_names: Vec<String>,
    pub language: Option<String>,
    pub analysis_duration_sec: Option<f64>,
    pub size_bytes: Option<i64>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub access_count: i64,
}

// ── Call graph ──
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallType {
    Direct,
    Fptr,
}

impl std::fmt::Display for CallType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Direct => "direct",
            Self::Fptr => "fptr",
        };
        write!(f, "{s}")
    }
}

impl FromStr for CallType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "direct" => Ok(Self::Direct),
            "fptr" => Ok(Self::Fptr),
            other => Err(format!("unknown CallType: {other}")),
        }
    }
}

/// A defined function bound for the graph store.
///
/// Identity within a snapshot is `(name, file_path)` — the pair keeps
/// same-named functions from distinct translation units apart, including
/// the per-fuzzer copies of the entry symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionRecord {
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

impl FunctionRecord {
    pub fn named(name: impl Into<String>, file_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            file_path: file_path.into(),
            start_line: None,
            end_line: None,
            content: None,
            language: None,
            return_type: None,
            parameters: None,
            is_entry_point: false,
            confidence: 1.0,
            cyclomatic_complexity: None,
        }
    }
}

/// A call edge with string endpoints, before resolution against the
/// committed function set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallEdgeRecord {
    pub caller_name: String,
    pub caller_file_path: Option<String>,
    pub callee_name: String,
    pub callee_file_path: Option<String>,
    pub call_type: CallType,
    pub confidence: f64,
    pub backend: String,
}

// ── Fuzzers ──
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FuzzerFile {
    pub path: String,
    pub source: String,
}

/// An entry harness. `library_calls` is the set of library functions the
/// harness invokes directly or transitively from its entry function.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FuzzerInfo {
    pub name: String,
    pub entry_function: String,
    pub files: Vec<FuzzerFile>,
    pub focus: Option<String>,
    pub library_calls: Vec<String>,
}

impl FuzzerInfo {
    /// Path of the harness's primary source file — the `file_path` under
    /// which the fuzzer's own copy of the entry function is stored.
    pub fn primary_file_path(&self) -> Option<&str> {
        self.files.first().map(|f| f.path.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReachesRecord {
    pub fuzzer_name: String,
    pub function_name: String,
    pub function_file_path: Option<String>,
    pub depth: i64,
}

// ── Probe ──
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectInfo {
    pub language: String,
    pub build_system: String,
    pub source_files: Vec<String>,
    pub diff_files: Option<Vec<String>>,
    pub has_compile_commands: bool,
    pub has_clang_config: bool,
    pub git_commit: Option<String>,
}

// ── Build command ──
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BuildCommandSource {
    User,
    AutoDetect,
}

impl std::fmt::Display for BuildCommandSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::User => "user",
            Self::AutoDetect => "auto_detect",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildCommand {
    pub commands: Vec<String>,
    pub build_system: String,
    pub source: BuildCommandSource,
    pub confidence: f64,
}

// ── Bitcode / debug metadata ──
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionMeta {
    /// The possibly-mangled or cloned IR symbol.
    pub ir_name: String,
    /// The source-level identifier.
    pub original_name: String,
    /// Project-relative source path.
    pub file_path: String,
    pub start_line: i64,
    pub end_line: Option<i64>,
    pub content: Option<String>,
}

// ── Analysis backend ──
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Capability {
    FunctionExtraction,
    DirectCalls,
    FunctionPointerTargets,
    ComplexityMetrics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendDescriptor {
    pub name: String,
    pub supported_languages: Vec<String>,
    pub capabilities: Vec<Capability>,
    pub precision_score: f64,
    pub speed_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub functions: Vec<FunctionRecord>,
    pub edges: Vec<CallEdgeRecord>,
    pub language: String,
    pub backend: String,
    pub duration_sec: f64,
    pub warnings: Vec<String>,
}

// ── Orchestrator interface ──

/// Work ticket handed to the orchestrator by a consumer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkTicket {
    pub repo_url: String,
    /// Must be a tag or immutable commit, never a branch.
    pub version: String,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub build_script: Option<String>,
    #[serde(default)]
    pub backend: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    /// `{fuzzer_name → [source_file_path]}`; no auto-detection.
    pub fuzzer_sources: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub diff_files: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisOutput {
    pub snapshot_id: String,
    pub repo_url: String,
    pub version: String,
    pub backend: String,
    pub function_count: i64,
    pub edge_count: i64,
    pub fuzzer_names: Vec<String>,
    pub cached: bool,
}

// ── Phase progress ──
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Probe,
    BuildCmd,
    Bitcode,
    Svf,
    FuzzerParse,
    AiRefine,
    Import,
}

impl Phase {
    /// Log-stream file name for this phase.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Probe => "probe",
            Self::BuildCmd => "build_cmd",
            Self::Bitcode => "bitcode",
            Self::Svf => "svf",
            Self::FuzzerParse => "fuzzer_parse",
            Self::AiRefine => "ai_refine",
            Self::Import => "import",
        }
    }

    pub const ALL: [Phase; 7] = [
        Phase::Probe,
        Phase::BuildCmd,
        Phase::Bitcode,
        Phase::Svf,
        Phase::FuzzerParse,
        Phase::AiRefine,
        Phase::Import,
    ];
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseProgress {
    pub phase: Phase,
    pub status: PhaseStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub detail: Option<String>,
    pub error: Option<String>,
}

// ── Graph statistics ──
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnapshotStatistics {
    pub function_count: i64,
    pub external_count: i64,
    pub fuzzer_count: i64,
    pub call_edge_count: i64,
    pub reaches_count: i64,
    /// `depth → number of REACHES edges at that depth`.
    pub depth_distribution: BTreeMap<i64, i64>,
}

/// Derive a repository name from its URL (final path segment, `.git`
/// suffix stripped).
pub fn repo_name_from_url(repo_url: &str) -> String {
    repo_url
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(repo_url)
        .trim_end_matches(".git")
        .to_string()
}
