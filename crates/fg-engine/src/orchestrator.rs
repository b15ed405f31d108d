use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use fg_catalog::{AcquireOutcome, Catalog, EvictionPolicy, Evictor};
use fg_core::{
    AnalysisOutput, EngineConfig, Error, Phase, PhaseProgress, PhaseStatus, Result,
    SnapshotId, SnapshotRecord, SnapshotStatus, WorkTicket, FUZZ_ENTRY_SYMBOL,
};
use fg_graph::GraphStore;

use crate::backend::svf::SvfBackend;
use crate::backend::{select_backend, AnalysisRequest, PointerAnalysisBackend};
use crate::bitcode::BitcodeBuilder;
use crate::build_cmd::resolve_build_command;
use crate::executor::run_command;
use crate::harness::parse_fuzzers;
use crate::logsink::LogSink;
use crate::probe::probe;
use crate::reaches::compute_reaches;
use crate::refine::{refine_or_keep, NoopRefiner, Refiner};

/// Well-known branch names; `version` must be a tag or immutable commit.
const BRANCH_NAMES: &[&str] = &["main", "master", "HEAD", "trunk", "develop"];

/// Drives the six-phase analysis state machine: admission through the
/// catalog, probe → build command → bitcode → pointer analysis → harness
/// parse → reachability, then the ordered commit into the graph store.
///
/// Single-threaded per snapshot build; concurrent builds of different
/// keys share nothing but the catalog and the graph store.
pub struct Orchestrator {
    config: EngineConfig,
    catalog: Catalog,
    graph: GraphStore,
    logs: LogSink,
    backends: Vec<Arc<dyn PointerAnalysisBackend>>,
    refiner: Arc<dyn Refiner>,
    evictor: Arc<Evictor>,
}

impl Orchestrator {
    /// Wire the default component set: the SVF backend and the no-op
    /// refiner.
    pub fn new(config: EngineConfig, catalog: Catalog, graph: GraphStore) -> Self {
        let logs = LogSink::new(config.data_dir.join("logs"));
        let policy = EvictionPolicy {
            disk_capacity_bytes: config.disk_capacity_bytes,
            disk_high_water: config.disk_high_water,
            disk_low_water: config.disk_low_water,
            per_repo_cap: config.per_repo_cap,
            snapshot_ttl_days: config.snapshot_ttl_days,
        };
        let evictor = Arc::new(Evictor::new(
            catalog.clone(),
            Arc::new(graph.clone()),
            Arc::new(logs.clone()),
            policy,
        ));
        let backends: Vec<Arc<dyn PointerAnalysisBackend>> =
            vec![Arc::new(SvfBackend::new(config.analyze_timeout))];
        Self {
            config,
            catalog,
            graph,
            logs,
            backends,
            refiner: Arc::new(NoopRefiner),
            evictor,
        }
    }

    pub fn evictor(&self) -> Arc<Evictor> {
        Arc::clone(&self.evictor)
    }

    pub fn logs(&self) -> &LogSink {
        &self.logs
    }

    /// Analyze one work ticket, going through cache admission first.
    pub async fn analyze(&self, ticket: &WorkTicket) -> Result<AnalysisOutput> {
        validate_ticket(ticket)?;
        let backend_name = ticket
            .backend
            .clone()
            .unwrap_or_else(|| "svf".to_string());

        if let Err(e) = self.evictor.run_pre_admission().await {
            tracing::warn!("pre-admission eviction failed: {e}");
        }

        let outcome = self
            .catalog
            .acquire_or_wait(
                &ticket.repo_url,
                &ticket.version,
                &backend_name,
                self.config.stale_build_deadline,
            )
            .await?;

        match outcome {
            AcquireOutcome::Hit(rec) => Ok(cached_output(&rec)),
            AcquireOutcome::Wait(rec) => {
                let rec = self
                    .catalog
                    .wait_until_ready(rec.id, self.config.poll_interval, self.config.wait_deadline)
                    .await?;
                match rec.status {
                    SnapshotStatus::Completed => {
                        self.catalog.touch(rec.id).await?;
                        Ok(cached_output(&rec))
                    }
                    _ => Err(Error::Internal(format!(
                        "snapshot {} failed while waiting: {}",
                        rec.id,
                        rec.error.unwrap_or_else(|| "unknown error".to_string())
                    ))),
                }
            }
            AcquireOutcome::Own(rec) => {
                let workspace = self
                    .config
                    .data_dir
                    .join("builds")
                    .join(rec.id.to_string());
                tokio::fs::create_dir_all(&workspace).await?;
                let result = self.run_build(&rec, ticket, &workspace, &backend_name).await;
                if let Err(e) = tokio::fs::remove_dir_all(&workspace).await {
                    tracing::warn!("failed to remove build workspace: {e}");
                }
                result
            }
        }
    }

    /// Execute all phases for an owned `building` row. Any phase error
    /// marks the catalog row `failed` and re-raises.
    async fn run_build(
        &self,
        rec: &SnapshotRecord,
        ticket: &WorkTicket,
        workspace: &Path,
        backend_name: &str,
    ) -> Result<AnalysisOutput> {
        let id = rec.id;
        let started = Instant::now();

        // Phase 1: probe (checking out the tree first when needed).
        self.phase_running(id, Phase::Probe).await;
        let project_root = match self.checkout(ticket, workspace, id).await {
            Ok(root) => root,
            Err(e) => return self.fail(id, Phase::Probe, e).await,
        };
        let mut info = match probe(&project_root, ticket.diff_files.clone()) {
            Ok(info) => info,
            Err(e) => return self.fail(id, Phase::Probe, e).await,
        };
        if let Some(language) = &ticket.language {
            info.language = language.clone();
        }
        self.phase_completed(
            id,
            Phase::Probe,
            &format!(
                "language={} build_system={} sources={}",
                info.language,
                info.build_system,
                info.source_files.len()
            ),
        )
        .await;

        // Phase 2: build-command resolution.
        self.phase_running(id, Phase::BuildCmd).await;
        let build_cmd = match resolve_build_command(&info, ticket.build_script.as_deref()) {
            Ok(cmd) => cmd,
            Err(e) => return self.fail(id, Phase::BuildCmd, e).await,
        };
        self.phase_completed(
            id,
            Phase::BuildCmd,
            &format!("source={} confidence={}", build_cmd.source, build_cmd.confidence),
        )
        .await;

        // Phase 3: library-only whole-program bitcode.
        self.phase_running(id, Phase::Bitcode).await;
        let harness_sources: Vec<String> = ticket
            .fuzzer_sources
            .values()
            .flatten()
            .cloned()
            .collect();
        let builder = BitcodeBuilder::new(self.config.build_timeout);
        let bitcode = match builder
            .build(&project_root, workspace, &build_cmd, &harness_sources, &self.logs, id)
            .await
        {
            Ok(out) => out,
            Err(e) => return self.fail(id, Phase::Bitcode, e).await,
        };
        self.phase_completed(
            id,
            Phase::Bitcode,
            &format!("{} function metas", bitcode.function_metas.len()),
        )
        .await;

        // Phase 4a: pointer analysis.
        self.phase_running(id, Phase::Svf).await;
        let backend = match select_backend(&self.backends, &info.language, Some(backend_name)) {
            Ok(b) => b,
            Err(e) => return self.fail(id, Phase::Svf, e).await,
        };
        let missing = backend.check_prerequisites(&project_root).await;
        if !missing.is_empty() {
            let e = Error::AnalysisBackend(format!(
                "backend {} is missing prerequisites: {}",
                backend.descriptor().name,
                missing.join(", ")
            ));
            return self.fail(id, Phase::Svf, e).await;
        }
        let analysis = match backend
            .analyze(AnalysisRequest {
                bc_path: &bitcode.bc_path,
                workspace,
                language: &info.language,
                function_metas: &bitcode.function_metas,
                logs: &self.logs,
                snapshot_id: id,
            })
            .await
        {
            Ok(result) => result,
            Err(e) => return self.fail(id, Phase::Svf, e).await,
        };
        self.phase_completed(
            id,
            Phase::Svf,
            &format!("{} functions {} edges", analysis.functions.len(), analysis.edges.len()),
        )
        .await;

        // Reserved refinement hook; degrades silently.
        self.phase_running(id, Phase::AiRefine).await;
        let analysis = refine_or_keep(self.refiner.as_ref(), analysis).await;
        self.phase_completed(id, Phase::AiRefine, "noop").await;

        // Phase 4b: harness parsing.
        self.phase_running(id, Phase::FuzzerParse).await;
        let library_functions: std::collections::HashSet<String> = analysis
            .functions
            .iter()
            .map(|f| f.name.clone())
            .collect();
        let fuzzers = match parse_fuzzers(
            &project_root,
            &ticket.fuzzer_sources,
            &library_functions,
            FUZZ_ENTRY_SYMBOL,
        ) {
            Ok(fuzzers) => fuzzers,
            Err(e) => return self.fail(id, Phase::FuzzerParse, e).await,
        };
        self.phase_completed(id, Phase::FuzzerParse, &format!("{} fuzzers", fuzzers.len()))
            .await;

        // Phases 5 and 6: reachability and the ordered commit.
        self.phase_running(id, Phase::Import).await;
        let output = match self
            .commit(id, rec, &analysis, &fuzzers, started.elapsed().as_secs_f64(), &info.language)
            .await
        {
            Ok(output) => output,
            Err(e) => return self.fail(id, Phase::Import, e).await,
        };
        self.phase_completed(id, Phase::Import, "committed").await;
        Ok(output)
    }

    /// Commit order: Functions → Externals → CALLS → Fuzzers + ENTRY +
    /// per-fuzzer CALLS → REACHES → catalog.
    async fn commit(
        &self,
        id: SnapshotId,
        rec: &SnapshotRecord,
        analysis: &fg_core::AnalysisResult,
        fuzzers: &[fg_core::FuzzerInfo],
        duration_sec: f64,
        language: &str,
    ) -> Result<AnalysisOutput> {
        self.graph
            .create_snapshot_node(id, &rec.repo_url, &rec.version, &rec.backend)
            .await?;

        let (defined, external): (Vec<_>, Vec<_>) = analysis
            .functions
            .iter()
            .cloned()
            .partition(|f| !f.file_path.is_empty());
        self.graph.import_functions(id, &defined).await?;
        self.graph.import_functions(id, &external).await?;
        self.graph.import_edges(id, &analysis.edges).await?;
        self.graph.import_fuzzers(id, fuzzers).await?;

        let reaches = compute_reaches(&self.graph, id, self.config.reaches_hop_cap).await?;
        self.graph.import_reaches(id, &reaches).await?;

        let node_count = self.graph.count_nodes(id).await?;
        let edge_count = self.graph.count_edges(id).await?;
        let fuzzer_names: Vec<String> = fuzzers.iter().map(|f| f.name.clone()).collect();
        let size_bytes = estimate_snapshot_size(analysis, node_count, edge_count);
        self.catalog
            .mark_completed(
                id,
                node_count,
                edge_count,
                &fuzzer_names,
                Some(language),
                duration_sec,
                size_bytes,
            )
            .await?;

        // Fuzzer nodes are counted in the catalog's node_count but are
        // not functions.
        let function_count = node_count - fuzzers.len() as i64;
        Ok(AnalysisOutput {
            snapshot_id: id.to_string(),
            repo_url: rec.repo_url.clone(),
            version: rec.version.clone(),
            backend: rec.backend.clone(),
            function_count,
            edge_count,
            fuzzer_names,
            cached: false,
        })
    }

    /// Resolve the working tree: a ticket-provided checkout, or a shallow
    /// clone of `repo_url` at `version`.
    async fn checkout(
        &self,
        ticket: &WorkTicket,
        workspace: &Path,
        id: SnapshotId,
    ) -> Result<PathBuf> {
        if let Some(path) = &ticket.path {
            let root = PathBuf::from(path);
            if !root.is_dir() {
                return Err(Error::Probe(format!(
                    "ticket path {path} is not a directory"
                )));
            }
            return Ok(root);
        }
        let dest = workspace.join("checkout");
        self.logs
            .append(
                id,
                Phase::Probe,
                &format!("cloning {}@{}", ticket.repo_url, ticket.version),
            )
            .await?;
        let dest_str = dest.display().to_string();
        let out = run_command(
            "git",
            &[
                "clone",
                "--depth",
                "1",
                "--branch",
                &ticket.version,
                &ticket.repo_url,
                &dest_str,
            ],
            workspace,
            self.config.build_timeout,
            &HashMap::new(),
        )
        .await;
        if !out.success() {
            return Err(Error::Probe(format!(
                "clone of {}@{} failed: {}",
                ticket.repo_url,
                ticket.version,
                out.stderr_tail(3)
            )));
        }
        Ok(dest)
    }

    async fn phase_running(&self, id: SnapshotId, phase: Phase) {
        self.emit(
            id,
            PhaseProgress {
                phase,
                status: PhaseStatus::Running,
                started_at: Some(Utc::now()),
                finished_at: None,
                detail: None,
                error: None,
            },
        )
        .await;
    }

    async fn phase_completed(&self, id: SnapshotId, phase: Phase, detail: &str) {
        self.emit(
            id,
            PhaseProgress {
                phase,
                status: PhaseStatus::Completed,
                started_at: None,
                finished_at: Some(Utc::now()),
                detail: Some(detail.to_string()),
                error: None,
            },
        )
        .await;
    }

    /// Outer failure handler: record the failed phase event, transition
    /// the catalog row, re-raise.
    async fn fail<T>(&self, id: SnapshotId, phase: Phase, error: Error) -> Result<T> {
        self.emit(
            id,
            PhaseProgress {
                phase,
                status: PhaseStatus::Failed,
                started_at: None,
                finished_at: Some(Utc::now()),
                detail: None,
                error: Some(error.to_string()),
            },
        )
        .await;
        if let Err(e) = self.catalog.mark_failed(id, &error.to_string()).await {
            tracing::error!("mark_failed({id}) did not apply: {e}");
        }
        Err(error)
    }

    async fn emit(&self, id: SnapshotId, progress: PhaseProgress) {
        let line = serde_json::to_string(&progress)
            .unwrap_or_else(|e| format!("{{\"error\":\"progress serialization: {e}\"}}"));
        if let Err(e) = self.logs.append(id, progress.phase, &line).await {
            tracing::warn!("progress event dropped: {e}");
        }
    }
}

fn cached_output(rec: &SnapshotRecord) -> AnalysisOutput {
    let node_count = rec.node_count.unwrap_or(0);
    AnalysisOutput {
        snapshot_id: rec.id.to_string(),
        repo_url: rec.repo_url.clone(),
        version: rec.version.clone(),
        backend: rec.backend.clone(),
        function_count: node_count - rec.fuzzer_names.len() as i64,
        edge_count: rec.edge_count.unwrap_or(0),
        fuzzer_names: rec.fuzzer_names.clone(),
        cached: true,
    }
}

/// Reject malformed tickets before any catalog row exists.
pub fn validate_ticket(ticket: &WorkTicket) -> Result<()> {
    if ticket.repo_url.trim().is_empty() {
        return Err(Error::Input("repo_url is required".to_string()));
    }
    let version = ticket.version.trim();
    if version.is_empty() {
        return Err(Error::Input("version is required".to_string()));
    }
    if BRANCH_NAMES.contains(&version) || version.starts_with("refs/heads/") {
        return Err(Error::Input(format!(
            "version {version:?} is a branch; use a tag or immutable commit"
        )));
    }
    if ticket.fuzzer_sources.is_empty() {
        return Err(Error::Input(
            "fuzzer_sources is required; fuzzers are not auto-detected".to_string(),
        ));
    }
    for (name, files) in &ticket.fuzzer_sources {
        if name.trim().is_empty() {
            return Err(Error::Input("fuzzer name must be non-empty".to_string()));
        }
        if files.is_empty() {
            return Err(Error::Input(format!(
                "fuzzer {name} declares no source files"
            )));
        }
    }
    Ok(())
}

/// Rough stored footprint of one snapshot: function bodies dominate, with
/// small fixed costs per node and edge.
fn estimate_snapshot_size(
    analysis: &fg_core::AnalysisResult,
    node_count: i64,
    edge_count: i64,
) -> i64 {
    let content: i64 = analysis
        .functions
        .iter()
        .map(|f| f.content.as_ref().map_or(0, |c| c.len() as i64))
        .sum();
    content + node_count * 128 + edge_count * 48
}
