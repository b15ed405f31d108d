pub mod svf;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use fg_core::{AnalysisResult, BackendDescriptor, Error, FunctionMeta, Result, SnapshotId};

use crate::logsink::LogSink;

/// Everything a backend needs to analyze one snapshot's library bitcode.
pub struct AnalysisRequest<'a> {
    pub bc_path: &'a Path,
    pub workspace: &'a Path,
    pub language: &'a str,
    pub function_metas: &'a [FunctionMeta],
    pub logs: &'a LogSink,
    pub snapshot_id: SnapshotId,
}

/// A pluggable whole-program pointer-analysis backend.
///
/// Backends are a tagged-variant set described by their descriptor;
/// selection is a pure function of descriptors and project state.
#[async_trait]
pub trait PointerAnalysisBackend: Send + Sync {
    fn descriptor(&self) -> &BackendDescriptor;

    /// Names of missing prerequisites (tools, files); empty when the
    /// backend can run.
    async fn check_prerequisites(&self, project_path: &Path) -> Vec<String>;

    async fn analyze(&self, request: AnalysisRequest<'_>) -> Result<AnalysisResult>;
}

/// Pick a backend: an explicit request binds by name, otherwise the
/// highest-precision backend supporting the project language wins.
pub fn select_backend(
    backends: &[Arc<dyn PointerAnalysisBackend>],
    language: &str,
    requested: Option<&str>,
) -> Result<Arc<dyn PointerAnalysisBackend>> {
    if let Some(name) = requested {
        return backends
            .iter()
            .find(|b| b.descriptor().name == name)
            .cloned()
            .ok_or_else(|| Error::Input(format!("unknown backend {name:?}")));
    }
    backends
        .iter()
        .filter(|b| {
            b.descriptor()
                .supported_languages
                .iter()
                .any(|l| l == language)
        })
        .max_by(|a, b| {
            a.descriptor()
                .precision_score
                .total_cmp(&b.descriptor().precision_score)
        })
        .cloned()
        .ok_or_else(|| {
            Error::AnalysisBackend(format!("no backend supports language {language:?}"))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use fg_core::Capability;

    struct StubBackend(BackendDescriptor);

    #[async_trait]
    impl PointerAnalysisBackend for StubBackend {
        fn descriptor(&self) -> &BackendDescriptor {
            &self.0
        }

        async fn check_prerequisites(&self, _project_path: &Path) -> Vec<String> {
            Vec::new()
        }

        async fn analyze(&self, _request: AnalysisRequest<'_>) -> Result<AnalysisResult> {
            unreachable!("stub")
        }
    }

    fn stub(name: &str, languages: &[&str], precision: f64) -> Arc<dyn PointerAnalysisBackend> {
        Arc::new(StubBackend(BackendDescriptor {
            name: name.to_string(),
            supported_languages: languages.iter().map(|s| s.to_string()).collect(),
            capabilities: vec![Capability::FunctionExtraction, Capability::DirectCalls],
            precision_score: precision,
            speed_score: 0.5,
        }))
    }

    #[test]
    fn explicit_request_binds_by_name() {
        let backends = vec![stub("a", &["c"], 0.5), stub("b", &["c"], 0.9)];
        let picked = select_backend(&backends, "c", Some("a")).unwrap();
        assert_eq!(picked.descriptor().name, "a");
        assert!(select_backend(&backends, "c", Some("zzz")).is_err());
    }

    #[test]
    fn highest_precision_supporting_language_wins() {
        let backends = vec![
            stub("low", &["c", "c++"], 0.5),
            stub("high", &["c"], 0.9),
            stub("other_lang", &["go"], 1.0),
        ];
        let picked = select_backend(&backends, "c", None).unwrap();
        assert_eq!(picked.descriptor().name, "high");

        let err = match select_backend(&backends, "rust", None) {
            Err(e) => e,
            Ok(_) => panic!("expected error"),
        };
        assert!(matches!(err, Error::AnalysisBackend(_)));
    }
}
