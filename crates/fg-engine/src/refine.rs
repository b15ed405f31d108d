use async_trait::async_trait;
use fg_core::{AnalysisResult, Result};

/// Post-analysis refinement hook, reserved for the LLM-assisted refiner.
///
/// This is the sole component allowed to swallow its own failures: any
/// error or timeout degrades silently to the unrefined result.
#[async_trait]
pub trait Refiner: Send + Sync {
    async fn refine(&self, result: AnalysisResult) -> Result<AnalysisResult>;
}

/// v1 refiner: returns its input unchanged.
pub struct NoopRefiner;

#[async_trait]
impl Refiner for NoopRefiner {
    async fn refine(&self, result: AnalysisResult) -> Result<AnalysisResult> {
        Ok(result)
    }
}

/// Apply a refiner, degrading to the unrefined result on any failure.
pub async fn refine_or_keep(refiner: &dyn Refiner, result: AnalysisResult) -> AnalysisResult {
    let fallback = result.clone();
    match refiner.refine(result).await {
        Ok(refined) => refined,
        Err(e) => {
            tracing::warn!("refiner failed, keeping unrefined result: {e}");
            fallback
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fg_core::Error;

    struct FailingRefiner;

    #[async_trait]
    impl Refiner for FailingRefiner {
        async fn refine(&self, _result: AnalysisResult) -> Result<AnalysisResult> {
            Err(Error::Internal("model unavailable".to_string()))
        }
    }

    fn result() -> AnalysisResult {
        AnalysisResult {
            functions: vec![],
            edges: vec![],
            language: "c".to_string(),
            backend: "svf".to_string(),
            duration_sec: 1.0,
            warnings: vec![],
        }
    }

    #[tokio::test]
    async fn noop_passes_through() {
        let refined = refine_or_keep(&NoopRefiner, result()).await;
        assert_eq!(refined.backend, "svf");
    }

    #[tokio::test]
    async fn failure_degrades_silently() {
        let refined = refine_or_keep(&FailingRefiner, result()).await;
        assert_eq!(refined.language, "c");
    }
}
