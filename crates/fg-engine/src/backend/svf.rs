//! Default v1 backend: whole-program inclusion-based pointer analysis
//! over `library.bc`, driven through SVF's `wpa` tool. The emitted DOT
//! call graph distinguishes statically resolved calls from targets
//! recovered through function-pointer flow.

use std::collections::HashMap;
use std::path::Path;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use fg_core::{
    AnalysisResult, BackendDescriptor, CallEdgeRecord, CallType, Capability, Error,
    FunctionMeta, FunctionRecord, Phase, Result,
};

use super::{AnalysisRequest, PointerAnalysisBackend};
use crate::executor::run_command;

/// Confidence attached to edges resolved through pointer flow; direct
/// edges always carry 1.0. Low-confidence edges are retained, never
/// dropped — a missing edge hides reachable code, an extra edge merely
/// widens exploration.
const FPTR_CONFIDENCE: f64 = 0.9;

pub struct SvfBackend {
    descriptor: BackendDescriptor,
    analyze_timeout: Duration,
}

impl SvfBackend {
    pub fn new(analyze_timeout: Duration) -> Self {
        Self {
            descriptor: BackendDescriptor {
                name: "svf".to_string(),
                supported_languages: vec!["c".to_string(), "c++".to_string()],
                capabilities: vec![
                    Capability::FunctionExtraction,
                    Capability::DirectCalls,
                    Capability::FunctionPointerTargets,
                ],
                precision_score: 0.9,
                speed_score: 0.5,
            },
            analyze_timeout,
        }
    }
}

#[async_trait]
impl PointerAnalysisBackend for SvfBackend {
    fn descriptor(&self) -> &BackendDescriptor {
        &self.descriptor
    }

    async fn check_prerequisites(&self, _project_path: &Path) -> Vec<String> {
        let mut missing = Vec::new();
        if !tool_on_path("wpa") {
            missing.push("wpa".to_string());
        }
        missing
    }

    async fn analyze(&self, request: AnalysisRequest<'_>) -> Result<AnalysisResult> {
        let started = Instant::now();
        let bc = request.bc_path.display().to_string();
        request
            .logs
            .append(request.snapshot_id, Phase::Svf, &format!("$ wpa -ander -dump-callgraph {bc}"))
            .await?;
        let out = run_command(
            "wpa",
            &["-ander", "-dump-callgraph", &bc],
            request.workspace,
            self.analyze_timeout,
            &HashMap::new(),
        )
        .await;
        if !out.success() {
            request
                .logs
                .append(request.snapshot_id, Phase::Svf, &out.stderr_tail(40))
                .await?;
            return Err(Error::AnalysisBackend(format!(
                "wpa failed: {}",
                out.stderr_tail(3)
            )));
        }

        // `wpa -dump-callgraph` writes the final graph into the working
        // directory.
        let dot_path = request.workspace.join("callgraph_final.dot");
        let dot = tokio::fs::read_to_string(&dot_path).await.map_err(|e| {
            Error::AnalysisBackend(format!("missing analyzer output {}: {e}", dot_path.display()))
        })?;
        let graph = parse_callgraph_dot(&dot)?;
        let mut result = join_with_metas(graph, request.function_metas, request.language);
        if result.functions.is_empty() {
            return Err(Error::AnalysisBackend(
                "analyzer reported no functions".to_string(),
            ));
        }
        result.duration_sec = started.elapsed().as_secs_f64();
        for warning in &result.warnings {
            request
                .logs
                .append(request.snapshot_id, Phase::Svf, warning)
                .await?;
        }
        request
            .logs
            .append(
                request.snapshot_id,
                Phase::Svf,
                &format!(
                    "{} functions, {} edges",
                    result.functions.len(),
                    result.edges.len()
                ),
            )
            .await?;
        Ok(result)
    }
}

/// Call graph as parsed from the analyzer's DOT output: IR symbol per
/// node, plus `(caller, callee, is_fptr)` edges.
#[derive(Debug, Default, PartialEq)]
pub(crate) struct DotCallGraph {
    pub nodes: HashMap<String, String>,
    pub edges: Vec<(String, String, bool)>,
}

/// Parse the SVF call-graph DOT format.
///
/// Node lines carry a `fun: <symbol>` label; edge lines connect node
/// tokens, with dashed/dotted styling marking indirect (function-pointer)
/// calls.
pub(crate) fn parse_callgraph_dot(dot: &str) -> Result<DotCallGraph> {
    let mut graph = DotCallGraph::default();
    for line in dot.lines() {
        let line = line.trim();
        if !line.starts_with("Node") {
            continue;
        }
        if let Some((src, rest)) = line.split_once(" -> ") {
            let dst: String = rest
                .chars()
                .take_while(|c| c.is_ascii_alphanumeric() || *c == 'x')
                .collect();
            if dst.is_empty() {
                continue;
            }
            let is_fptr = rest.contains("dashed") || rest.contains("dotted");
            graph
                .edges
                .push((src.trim().to_string(), dst, is_fptr));
        } else if let Some(fun_idx) = line.find("fun: ") {
            let node: String = line
                .chars()
                .take_while(|c| !c.is_whitespace() && *c != '[')
                .collect();
            let symbol: String = line[fun_idx + "fun: ".len()..]
                .chars()
                .take_while(|c| !matches!(c, '\\' | '}' | '"' | ' '))
                .collect();
            if !node.is_empty() && !symbol.is_empty() {
                graph.nodes.insert(node, symbol);
            }
        }
    }
    if graph.nodes.is_empty() {
        return Err(Error::AnalysisBackend(
            "analyzer call graph has no function nodes".to_string(),
        ));
    }
    Ok(graph)
}

/// Union the analyzer's function set with the extracted debug metadata,
/// joining by IR symbol name. Functions without metadata keep their IR
/// name and an empty path (they commit as externals); edges keep every
/// target the analyzer reported.
pub(crate) fn join_with_metas(
    graph: DotCallGraph,
    metas: &[FunctionMeta],
    language: &str,
) -> AnalysisResult {
    let by_ir: HashMap<&str, &FunctionMeta> =
        metas.iter().map(|m| (m.ir_name.as_str(), m)).collect();

    let mut warnings = Vec::new();
    let mut functions = Vec::new();
    let mut identity: HashMap<&str, (String, Option<String>)> = HashMap::new();
    let mut symbols: Vec<(&String, &String)> = graph.nodes.iter().collect();
    symbols.sort();
    for (node, symbol) in symbols {
        match by_ir.get(symbol.as_str()) {
            Some(meta) => {
                let mut rec = FunctionRecord::named(&meta.original_name, &meta.file_path);
                rec.start_line = Some(meta.start_line);
                rec.end_line = meta.end_line;
                rec.content = meta.content.clone();
                rec.language = Some(language.to_string());
                functions.push(rec);
                identity.insert(
                    node.as_str(),
                    (meta.original_name.clone(), Some(meta.file_path.clone())),
                );
            }
            None => {
                warnings.push(format!("no debug metadata for {symbol}; kept as external"));
                functions.push(FunctionRecord::named(symbol, ""));
                identity.insert(node.as_str(), (symbol.clone(), None));
            }
        }
    }

    let mut edges = Vec::new();
    for (src, dst, is_fptr) in &graph.edges {
        let (Some(caller), Some(callee)) =
            (identity.get(src.as_str()), identity.get(dst.as_str()))
        else {
            continue;
        };
        let call_type = if *is_fptr { CallType::Fptr } else { CallType::Direct };
        edges.push(CallEdgeRecord {
            caller_name: caller.0.clone(),
            caller_file_path: caller.1.clone(),
            callee_name: callee.0.clone(),
            callee_file_path: callee.1.clone(),
            call_type,
            confidence: if *is_fptr { FPTR_CONFIDENCE } else { 1.0 },
            backend: "svf".to_string(),
        });
    }

    AnalysisResult {
        functions,
        edges,
        language: language.to_string(),
        backend: "svf".to_string(),
        duration_sec: 0.0,
        warnings,
    }
}

fn tool_on_path(tool: &str) -> bool {
    let Ok(path) = std::env::var("PATH") else {
        return false;
    };
    path.split(':').any(|dir| Path::new(dir).join(tool).is_file())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_DOT: &str = r#"digraph "Call Graph" {
    label="Call Graph";

    Node0x1 [shape=record,label="{CallGraphNode ID: 0 \{fun: dispatch\}}"];
    Node0x2 [shape=record,label="{CallGraphNode ID: 1 \{fun: cb\}}"];
    Node0x3 [shape=record,label="{CallGraphNode ID: 2 \{fun: parse_header\}}"];
    Node0x1 -> Node0x2[style=dashed];
    Node0x3 -> Node0x1[style=solid];
}
"#;

    fn meta(ir: &str, original: &str, file: &str) -> FunctionMeta {
        FunctionMeta {
            ir_name: ir.to_string(),
            original_name: original.to_string(),
            file_path: file.to_string(),
            start_line: 1,
            end_line: Some(3),
            content: Some("{}".to_string()),
        }
    }

    #[test]
    fn dot_nodes_and_edges_parse() {
        let graph = parse_callgraph_dot(SAMPLE_DOT).unwrap();
        assert_eq!(graph.nodes.len(), 3);
        assert_eq!(graph.nodes.get("Node0x1").unwrap(), "dispatch");
        assert_eq!(graph.edges.len(), 2);
        assert_eq!(graph.edges[0], ("Node0x1".to_string(), "Node0x2".to_string(), true));
        assert_eq!(graph.edges[1], ("Node0x3".to_string(), "Node0x1".to_string(), false));
    }

    #[test]
    fn empty_graph_is_backend_error() {
        assert!(parse_callgraph_dot("digraph G {}\n").is_err());
    }

    #[test]
    fn join_unions_analyzer_functions_with_metadata() {
        let graph = parse_callgraph_dot(SAMPLE_DOT).unwrap();
        let metas = vec![
            meta("dispatch", "dispatch", "src/table.c"),
            meta("cb", "cb", "src/table.c"),
        ];
        let result = join_with_metas(graph, &metas, "c");

        assert_eq!(result.functions.len(), 3);
        // parse_header has no metadata: kept, flagged, committed external.
        let orphan = result
            .functions
            .iter()
            .find(|f| f.name == "parse_header")
            .unwrap();
        assert!(orphan.file_path.is_empty());
        assert_eq!(result.warnings.len(), 1);

        let fptr = result
            .edges
            .iter()
            .find(|e| e.call_type == CallType::Fptr)
            .unwrap();
        assert_eq!(fptr.caller_name, "dispatch");
        assert_eq!(fptr.callee_name, "cb");
        assert!((fptr.confidence - FPTR_CONFIDENCE).abs() < 1e-9);

        let direct = result
            .edges
            .iter()
            .find(|e| e.call_type == CallType::Direct)
            .unwrap();
        assert_eq!(direct.confidence, 1.0);
        assert_eq!(direct.callee_name, "dispatch");
    }
}
