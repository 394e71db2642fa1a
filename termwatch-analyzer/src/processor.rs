//! Per-change processing: input resolution, analysis, and transactional
//! application of outcomes.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use termwatch_common::{Error, Result};

use crate::models::{AnalysisOutcome, PolicyChange, Severity};
use crate::pipeline::AnalyzerContext;

/// Mirrored verdict fields for one change, as returned to callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisView {
    pub change_id: String,
    pub severity: Severity,
    pub confidence: f64,
    pub summary: String,
    pub impact: String,
    pub requires_notification: bool,
}

impl AnalysisView {
    fn from_change(change: &PolicyChange) -> Self {
        Self {
            change_id: change.id.clone(),
            severity: change.severity,
            confidence: change.confidence_score.unwrap_or(0.0),
            summary: change.change_summary.clone().unwrap_or_default(),
            impact: change.impact_assessment.clone().unwrap_or_default(),
            requires_notification: change.requires_member_notification,
        }
    }

    fn from_outcome(change_id: &str, outcome: &AnalysisOutcome) -> Self {
        Self {
            change_id: change_id.to_string(),
            severity: outcome.severity,
            confidence: outcome.confidence,
            summary: outcome.change_summary.clone(),
            impact: outcome.impact_assessment.clone(),
            requires_notification: outcome.requires_notification,
        }
    }
}

/// Runs the analysis pipeline for individual changes and persists the
/// outcomes.
#[derive(Clone)]
pub struct ChangeProcessor {
    context: Arc<AnalyzerContext>,
}

impl ChangeProcessor {
    pub fn new(context: Arc<AnalyzerContext>) -> Self {
        Self { context }
    }

    pub fn context(&self) -> &AnalyzerContext {
        &self.context
    }

    /// Analyze one change and persist the outcome.
    ///
    /// The caller must hold the claim on the change; the transactional
    /// apply releases it together with the field mirror.
    pub async fn process_change(&self, change: &PolicyChange) -> Result<AnalysisOutcome> {
        let store = self.context.store();

        let previous =
            self.resolve_snapshot_text(change.previous_snapshot_id.as_deref(), &change.id)?;
        let current =
            self.resolve_snapshot_text(change.current_snapshot_id.as_deref(), &change.id)?;

        let (platform_name, document_type) = match store.get_document(&change.policy_document_id)? {
            Some(document) => (document.platform_name, document.document_type),
            None => ("Platform".to_string(), "policy".to_string()),
        };

        let outcome = self
            .context
            .analyze_texts(&previous, &current, &platform_name, &document_type)
            .await?;
        store.apply_analysis(change, &outcome)?;

        if !outcome.severity.is_unknown()
            && outcome.confidence < self.context.min_confidence_threshold()
        {
            tracing::warn!(
                change_id = %change.id,
                confidence = outcome.confidence,
                threshold = self.context.min_confidence_threshold(),
                "Applied low-confidence analysis"
            );
        }

        tracing::info!(change_id = %change.id, severity = %outcome.severity, "Analyzed change");
        Ok(outcome)
    }

    /// Analyze a single change on request.
    ///
    /// Without `force`, an existing analysis record short-circuits to
    /// the stored verdict. When another path holds a fresh claim, the
    /// stored state is returned without computing; the claim holder
    /// wins.
    pub async fn analyze_on_demand(&self, change_id: &str, force: bool) -> Result<AnalysisView> {
        let store = self.context.store();
        let change = store
            .get_change(change_id)?
            .ok_or_else(|| Error::NotFound("Change not found".to_string()))?;

        if !force && store.has_analysis(change_id)? {
            tracing::debug!(change_id = %change_id, "Returning stored analysis");
            return Ok(AnalysisView::from_change(&change));
        }

        if !store.try_claim(change_id)? {
            tracing::info!(
                change_id = %change_id,
                "Change is claimed by another analysis path; returning stored state"
            );
            return Ok(AnalysisView::from_change(&change));
        }

        match self.process_change(&change).await {
            Ok(outcome) => Ok(AnalysisView::from_outcome(change_id, &outcome)),
            Err(e) => {
                if let Err(release_err) = store.release_claim(change_id) {
                    tracing::error!(
                        change_id = %change_id,
                        error = %release_err,
                        "Failed to release claim after processing failure"
                    );
                }
                Err(e)
            }
        }
    }

    /// Resolve a snapshot reference to its content text.
    ///
    /// A missing reference or a dangling one resolves to empty text so
    /// pure additions and deletions analyze as one-sided diffs.
    fn resolve_snapshot_text(&self, snapshot_id: Option<&str>, change_id: &str) -> Result<String> {
        match snapshot_id {
            Some(id) => match self.context.store().get_snapshot(id)? {
                Some(snapshot) => Ok(snapshot.content_text),
                None => {
                    tracing::warn!(
                        change_id = %change_id,
                        snapshot_id = %id,
                        "Snapshot reference not found; treating content as empty"
                    );
                    Ok(String::new())
                }
            },
            None => Ok(String::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewChange;
    use crate::provider::ScriptedProvider;
    use crate::store::PolicyStore;
    use termwatch_common::config::AnalysisConfig;

    const HIGH_RESPONSE: &str = r#"{
        "severity": "high",
        "confidence": 0.9,
        "summary": "Tightened rules",
        "impact": "Members must adapt",
        "key_points": []
    }"#;

    fn build_processor(provider: Arc<ScriptedProvider>) -> (ChangeProcessor, PolicyStore) {
        let store = PolicyStore::open_in_memory().unwrap();
        let context = Arc::new(AnalyzerContext::new(
            store.clone(),
            provider,
            &AnalysisConfig::default(),
        ));
        (ChangeProcessor::new(context), store)
    }

    fn seed_change(store: &PolicyStore, previous: &str, current: &str) -> PolicyChange {
        let document = store
            .record_document("ExampleNet", "terms_of_service", Some("Terms"))
            .unwrap();
        let before = store.record_snapshot(&document.id, previous).unwrap();
        let after = store.record_snapshot(&document.id, current).unwrap();
        store
            .record_change(NewChange {
                policy_document_id: document.id,
                previous_snapshot_id: Some(before.id),
                current_snapshot_id: Some(after.id),
                change_type: "content_change".to_string(),
            })
            .unwrap()
    }

    #[tokio::test]
    async fn test_process_change_applies_and_releases_claim() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.push_response(HIGH_RESPONSE);
        let (processor, store) = build_processor(provider);
        let change = seed_change(&store, "Rules:\nOld.", "Rules:\nNew.");
        assert!(store.try_claim(&change.id).unwrap());

        let outcome = processor.process_change(&change).await.unwrap();

        assert_eq!(outcome.severity, Severity::High);
        let stored = store.get_change(&change.id).unwrap().unwrap();
        assert_eq!(stored.severity, Severity::High);
        assert_eq!(stored.confidence_score, Some(0.9));
        assert!(stored.requires_member_notification);
        assert!(stored.claimed_at.is_none());
        assert_eq!(store.count_analyses(&change.id).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_on_demand_unknown_change() {
        let provider = Arc::new(ScriptedProvider::new());
        let (processor, _store) = build_processor(provider);

        let error = processor
            .analyze_on_demand("does-not-exist", false)
            .await
            .unwrap_err();

        assert!(error.is_not_found());
    }

    #[tokio::test]
    async fn test_on_demand_idempotent_without_force() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.push_response(HIGH_RESPONSE);
        let (processor, store) = build_processor(provider.clone());
        let change = seed_change(&store, "Old text.", "New text.");

        let first = processor.analyze_on_demand(&change.id, false).await.unwrap();
        // No scripted response left; a second computation would fall back
        let second = processor.analyze_on_demand(&change.id, false).await.unwrap();

        assert_eq!(first.severity, Severity::High);
        assert_eq!(second.severity, first.severity);
        assert_eq!(second.confidence, first.confidence);
        assert_eq!(second.summary, first.summary);
        assert_eq!(second.impact, first.impact);
        assert_eq!(store.count_analyses(&change.id).unwrap(), 1);
        assert_eq!(provider.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_on_demand_force_appends_new_record() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.push_response(HIGH_RESPONSE);
        provider.push_response(r#"{"severity": "low", "confidence": 0.6, "summary": "Minor"}"#);
        let (processor, store) = build_processor(provider);
        let change = seed_change(&store, "Old text.", "New text.");

        processor.analyze_on_demand(&change.id, false).await.unwrap();
        let reanalyzed = processor.analyze_on_demand(&change.id, true).await.unwrap();

        assert_eq!(reanalyzed.severity, Severity::Low);
        assert_eq!(store.count_analyses(&change.id).unwrap(), 2);
        let stored = store.get_change(&change.id).unwrap().unwrap();
        assert_eq!(stored.severity, Severity::Low);
    }

    #[tokio::test]
    async fn test_on_demand_yields_to_fresh_claim() {
        let provider = Arc::new(ScriptedProvider::new());
        let (processor, store) = build_processor(provider.clone());
        let change = seed_change(&store, "Old text.", "New text.");
        assert!(store.try_claim(&change.id).unwrap());

        let view = processor.analyze_on_demand(&change.id, false).await.unwrap();

        // Stored state observed, nothing computed
        assert_eq!(view.severity, Severity::Unknown);
        assert_eq!(view.confidence, 0.0);
        assert_eq!(store.count_analyses(&change.id).unwrap(), 0);
        assert!(provider.requests().is_empty());
    }

    #[tokio::test]
    async fn test_fallback_outcome_keeps_change_eligible() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.push_failure("model offline");
        let (processor, store) = build_processor(provider);
        let change = seed_change(&store, "Old text.", "New text.");

        let view = processor.analyze_on_demand(&change.id, false).await.unwrap();

        assert_eq!(view.severity, Severity::Unknown);
        assert_eq!(view.confidence, 0.0);
        assert!(!view.requires_notification);
        // Record appended, but severity stays unknown so the worker can retry
        assert_eq!(store.count_analyses(&change.id).unwrap(), 1);
        let stored = store.get_change(&change.id).unwrap().unwrap();
        assert!(stored.is_eligible());
        assert!(stored.claimed_at.is_none());
    }

    #[tokio::test]
    async fn test_missing_snapshots_analyze_as_empty() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.push_response(r#"{"severity": "low", "confidence": 0.8, "summary": "New doc"}"#);
        let (processor, store) = build_processor(provider);
        let document = store
            .record_document("ExampleNet", "privacy_policy", None)
            .unwrap();
        let after = store.record_snapshot(&document.id, "Brand new policy.").unwrap();
        let change = store
            .record_change(NewChange {
                policy_document_id: document.id,
                previous_snapshot_id: None,
                current_snapshot_id: Some(after.id),
                change_type: "document_added".to_string(),
            })
            .unwrap();

        let view = processor.analyze_on_demand(&change.id, false).await.unwrap();

        assert_eq!(view.severity, Severity::Low);
        assert_eq!(store.count_analyses(&change.id).unwrap(), 1);
    }
}
