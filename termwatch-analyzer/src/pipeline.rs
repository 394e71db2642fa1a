//! Analysis orchestration: concurrent fan-out over the four analyzers
//! and aggregation into a single outcome.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use termwatch_common::config::AnalysisConfig;
use termwatch_common::{Error, Result};

use crate::diff;
use crate::models::AnalysisOutcome;
use crate::provider::CompletionProvider;
use crate::sentiment::{NeutralToneEstimator, ToneEstimator};
use crate::severity::SeverityAssessor;
use crate::store::PolicyStore;
use crate::structure;

/// Shared orchestration handle used by the worker loop and the HTTP
/// handlers alike.
///
/// Constructed once at startup; [`AnalyzerContext::initialize`] must run
/// before the context serves analyses, and readiness is surfaced to the
/// readiness endpoint.
pub struct AnalyzerContext {
    store: PolicyStore,
    provider: Arc<dyn CompletionProvider>,
    assessor: SeverityAssessor,
    tone: Arc<dyn ToneEstimator>,
    model_name: String,
    structure_model: String,
    min_confidence_threshold: f64,
    ready: AtomicBool,
}

impl AnalyzerContext {
    pub fn new(
        store: PolicyStore,
        provider: Arc<dyn CompletionProvider>,
        analysis: &AnalysisConfig,
    ) -> Self {
        Self {
            assessor: SeverityAssessor::new(Arc::clone(&provider)),
            tone: Arc::new(NeutralToneEstimator),
            model_name: provider.model().to_string(),
            structure_model: analysis.structure_model.clone(),
            min_confidence_threshold: analysis.min_confidence_threshold,
            ready: AtomicBool::new(false),
            store,
            provider,
        }
    }

    /// Substitute a different tone estimator.
    pub fn with_tone_estimator(mut self, tone: Arc<dyn ToneEstimator>) -> Self {
        self.tone = tone;
        self
    }

    /// Prepare the context for serving analyses and mark it ready.
    pub async fn initialize(&self) {
        tracing::info!(
            model = %self.model_name,
            structure_model = %self.structure_model,
            "Initializing analyzer context"
        );
        self.ready.store(true, Ordering::SeqCst);
        tracing::info!("Analyzer context initialized");
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub fn store(&self) -> &PolicyStore {
        &self.store
    }

    pub fn provider(&self) -> Arc<dyn CompletionProvider> {
        Arc::clone(&self.provider)
    }

    pub fn min_confidence_threshold(&self) -> f64 {
        self.min_confidence_threshold
    }

    /// Run the four analyzers concurrently over one change and aggregate
    /// their results.
    ///
    /// The individual analyzers degrade internally (the severity assessor
    /// falls back, the others cannot fail), so the only error path here
    /// is an aborted analyzer task.
    pub async fn analyze_texts(
        &self,
        previous: &str,
        current: &str,
        platform_name: &str,
        document_type: &str,
    ) -> Result<AnalysisOutcome> {
        tracing::info!(
            platform = %platform_name,
            document_type = %document_type,
            "Analyzing change"
        );
        let started = Instant::now();

        let diff_task = {
            let (previous, current) = (previous.to_string(), current.to_string());
            tokio::spawn(async move { diff::diff_lines(&previous, &current) })
        };
        let severity_task = {
            let assessor = self.assessor.clone();
            let (previous, current) = (previous.to_string(), current.to_string());
            let platform = platform_name.to_string();
            tokio::spawn(async move { assessor.assess(&previous, &current, &platform).await })
        };
        let structure_task = {
            let current = current.to_string();
            tokio::spawn(async move { structure::extract_sections(&current) })
        };
        let tone_task = {
            let tone = Arc::clone(&self.tone);
            let (previous, current) = (previous.to_string(), current.to_string());
            tokio::spawn(async move { tone.estimate(&previous, &current).await })
        };

        let (key_changes, assessment, affected_sections, sentiment_shift) =
            tokio::join!(diff_task, severity_task, structure_task, tone_task);

        let key_changes =
            key_changes.map_err(|e| Error::Internal(format!("Diff analyzer task aborted: {e}")))?;
        let assessment = assessment
            .map_err(|e| Error::Internal(format!("Severity analyzer task aborted: {e}")))?;
        let affected_sections = affected_sections
            .map_err(|e| Error::Internal(format!("Structure analyzer task aborted: {e}")))?;
        let sentiment_shift =
            sentiment_shift.map_err(|e| Error::Internal(format!("Tone analyzer task aborted: {e}")))?;

        let outcome = AnalysisOutcome {
            severity: assessment.severity,
            confidence: assessment.confidence,
            change_summary: assessment.summary,
            impact_assessment: assessment.impact,
            affected_sections,
            requires_notification: assessment.severity.requires_notification(),
            key_changes,
            sentiment_shift,
            source: assessment.source,
            model_name: self.model_name.clone(),
            processing_time_ms: started.elapsed().as_millis() as u64,
        };

        tracing::info!(
            severity = %outcome.severity,
            confidence = outcome.confidence,
            elapsed_ms = outcome.processing_time_ms,
            "Analysis complete"
        );

        Ok(outcome)
    }
}
