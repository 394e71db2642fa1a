//! LLM-backed severity assessment for policy changes.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::models::{AssessmentSource, Severity};
use crate::provider::{CompletionProvider, CompletionRequest};

/// Characters of each document version included in the prompt.
///
/// A deliberate lossy bound; the excerpt is a prefix, not a summary.
pub const EXCERPT_CHARS: usize = 2000;

const SEVERITY_SYSTEM_PROMPT: &str = "You are an expert in social media policy analysis.";
const SEVERITY_TEMPERATURE: f64 = 0.3;

/// Structured severity verdict for one change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeverityAssessment {
    pub severity: Severity,
    pub confidence: f64,
    pub summary: String,
    pub impact: String,
    pub key_points: Vec<String>,
    #[serde(flatten)]
    pub source: AssessmentSource,
}

impl SeverityAssessment {
    /// The fixed floor substituted on any provider or validation error.
    pub fn fallback(reason: impl Into<String>) -> Self {
        Self {
            severity: Severity::Unknown,
            confidence: 0.0,
            summary: "Analysis failed".to_string(),
            impact: "Unable to assess".to_string(),
            key_points: Vec::new(),
            source: AssessmentSource::Fallback {
                reason: reason.into(),
            },
        }
    }
}

/// Assesses change severity by sending document excerpts to the
/// completion provider.
#[derive(Clone)]
pub struct SeverityAssessor {
    provider: Arc<dyn CompletionProvider>,
}

impl SeverityAssessor {
    pub fn new(provider: Arc<dyn CompletionProvider>) -> Self {
        Self { provider }
    }

    /// Assess one change. Never fails: any provider or validation error
    /// degrades to [`SeverityAssessment::fallback`].
    pub async fn assess(
        &self,
        previous: &str,
        current: &str,
        platform_name: &str,
    ) -> SeverityAssessment {
        let request = CompletionRequest {
            system: SEVERITY_SYSTEM_PROMPT.to_string(),
            prompt: build_severity_prompt(previous, current, platform_name),
            temperature: SEVERITY_TEMPERATURE,
            json_response: true,
        };

        let response = match self.provider.complete(request).await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(error = %e, "Severity assessment request failed");
                return SeverityAssessment::fallback(e.to_string());
            }
        };

        match parse_assessment(&response.content) {
            Ok(assessment) => assessment,
            Err(e) => {
                tracing::error!(error = %e, "Severity assessment response did not validate");
                SeverityAssessment::fallback(format!("{e:#}"))
            }
        }
    }
}

fn build_severity_prompt(previous: &str, current: &str, platform_name: &str) -> String {
    format!(
        r#"Analyze this policy change for {platform_name}.

Previous version (excerpt):
{previous}

Current version (excerpt):
{current}

Assess:
1. Severity (critical/high/medium/low)
2. Impact on members and content creators
3. Key changes that matter
4. Whether members need immediate notification

Respond in JSON format:
{{
    "severity": "critical|high|medium|low",
    "confidence": 0.0-1.0,
    "summary": "Brief summary of changes",
    "impact": "How this affects members",
    "key_points": ["point 1", "point 2"]
}}"#,
        previous = excerpt(previous, EXCERPT_CHARS),
        current = excerpt(current, EXCERPT_CHARS),
    )
}

/// Truncate to at most `max_chars` codepoints without splitting a character.
pub(crate) fn excerpt(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => &text[..cut],
        None => text,
    }
}

/// Extract a JSON object from a response that may wrap it in markdown
/// fences or surrounding prose.
pub(crate) fn extract_json(content: &str) -> Result<String> {
    if let Some(start) = content.find("```json") {
        let start = start + 7;
        if let Some(end) = content[start..].find("```") {
            return Ok(content[start..start + end].trim().to_string());
        }
    }

    if let Some(start) = content.find('{') {
        let mut depth = 0;
        let mut end = start;
        for (i, c) in content[start..].char_indices() {
            match c {
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        end = start + i + 1;
                        break;
                    }
                }
                _ => {}
            }
        }
        if depth == 0 {
            return Ok(content[start..end].to_string());
        }
    }

    anyhow::bail!("Could not find JSON in response")
}

/// Validate a provider response into an assessment.
///
/// Severity and confidence are load-bearing and mandatory; summary,
/// impact and key points tolerate absence.
fn parse_assessment(content: &str) -> Result<SeverityAssessment> {
    let json_str = extract_json(content)?;
    let parsed: serde_json::Value =
        serde_json::from_str(&json_str).context("Assessment response is not valid JSON")?;

    let severity_raw = parsed
        .get("severity")
        .and_then(|v| v.as_str())
        .context("Assessment response missing severity")?;
    let severity = Severity::parse(severity_raw)
        .with_context(|| format!("Unrecognized severity value: {severity_raw}"))?;

    let confidence = parsed
        .get("confidence")
        .and_then(|v| v.as_f64())
        .context("Assessment response missing confidence")?
        .clamp(0.0, 1.0);

    let summary = parsed
        .get("summary")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();
    let impact = parsed
        .get("impact")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();
    let key_points = parsed
        .get("key_points")
        .and_then(|v| v.as_array())
        .map(|points| {
            points
                .iter()
                .filter_map(|p| p.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default();

    Ok(SeverityAssessment {
        severity,
        confidence,
        summary,
        impact,
        key_points,
        source: AssessmentSource::Model,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ScriptedProvider;

    const VALID_RESPONSE: &str = r#"{
        "severity": "high",
        "confidence": 0.85,
        "summary": "Monetization rules tightened",
        "impact": "Creators face stricter review",
        "key_points": ["New appeal window", "Stricter review"]
    }"#;

    #[test]
    fn test_parse_raw_json() {
        let assessment = parse_assessment(VALID_RESPONSE).unwrap();

        assert_eq!(assessment.severity, Severity::High);
        assert_eq!(assessment.confidence, 0.85);
        assert_eq!(assessment.summary, "Monetization rules tightened");
        assert_eq!(assessment.key_points.len(), 2);
        assert!(!assessment.source.is_fallback());
    }

    #[test]
    fn test_parse_fenced_json() {
        let content = format!("Here is my assessment:\n```json\n{VALID_RESPONSE}\n```\nDone.");

        let assessment = parse_assessment(&content).unwrap();

        assert_eq!(assessment.severity, Severity::High);
    }

    #[test]
    fn test_parse_json_with_surrounding_prose() {
        let content = format!("The verdict follows. {VALID_RESPONSE} Let me know.");

        let assessment = parse_assessment(&content).unwrap();

        assert_eq!(assessment.severity, Severity::High);
    }

    #[test]
    fn test_missing_severity_rejected() {
        let result = parse_assessment(r#"{"confidence": 0.9}"#);

        assert!(result.is_err());
    }

    #[test]
    fn test_unrecognized_severity_rejected() {
        let result =
            parse_assessment(r#"{"severity": "catastrophic", "confidence": 0.9}"#);

        assert!(result.unwrap_err().to_string().contains("catastrophic"));
    }

    #[test]
    fn test_missing_confidence_rejected() {
        let result = parse_assessment(r#"{"severity": "low"}"#);

        assert!(result.is_err());
    }

    #[test]
    fn test_confidence_clamped() {
        let high = parse_assessment(r#"{"severity": "low", "confidence": 1.7}"#).unwrap();
        let low = parse_assessment(r#"{"severity": "low", "confidence": -0.4}"#).unwrap();

        assert_eq!(high.confidence, 1.0);
        assert_eq!(low.confidence, 0.0);
    }

    #[test]
    fn test_optional_fields_default() {
        let assessment =
            parse_assessment(r#"{"severity": "medium", "confidence": 0.6}"#).unwrap();

        assert_eq!(assessment.summary, "");
        assert_eq!(assessment.impact, "");
        assert!(assessment.key_points.is_empty());
    }

    #[test]
    fn test_extract_json_rejects_prose() {
        assert!(extract_json("no json here at all").is_err());
    }

    #[test]
    fn test_extract_json_rejects_unbalanced() {
        assert!(extract_json(r#"{"severity": "high""#).is_err());
    }

    #[test]
    fn test_excerpt_char_limit() {
        let text = "é".repeat(30);

        assert_eq!(excerpt(&text, 10).chars().count(), 10);
        assert_eq!(excerpt("short", 2000), "short");
    }

    #[test]
    fn test_fallback_shape() {
        let fallback = SeverityAssessment::fallback("provider offline");

        assert_eq!(fallback.severity, Severity::Unknown);
        assert_eq!(fallback.confidence, 0.0);
        assert_eq!(fallback.summary, "Analysis failed");
        assert_eq!(fallback.impact, "Unable to assess");
        assert!(fallback.key_points.is_empty());
        assert!(fallback.source.is_fallback());
    }

    #[tokio::test]
    async fn test_assess_happy_path() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.push_response(VALID_RESPONSE);
        let assessor = SeverityAssessor::new(provider.clone());

        let assessment = assessor
            .assess("old policy text", "new policy text", "ExampleNet")
            .await;

        assert_eq!(assessment.severity, Severity::High);
        assert!(!assessment.source.is_fallback());

        let requests = provider.requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].prompt.contains("ExampleNet"));
        assert!(requests[0].prompt.contains("old policy text"));
        assert!(requests[0].prompt.contains("new policy text"));
        assert_eq!(requests[0].temperature, SEVERITY_TEMPERATURE);
        assert!(requests[0].json_response);
    }

    #[tokio::test]
    async fn test_assess_truncates_excerpts() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.push_response(VALID_RESPONSE);
        let assessor = SeverityAssessor::new(provider.clone());

        let long_text = "a".repeat(EXCERPT_CHARS + 500);
        assessor.assess(&long_text, "short", "ExampleNet").await;

        let prompt = &provider.requests()[0].prompt;
        assert!(!prompt.contains(&long_text));
        assert!(prompt.contains(&"a".repeat(EXCERPT_CHARS)));
    }

    #[tokio::test]
    async fn test_assess_falls_back_on_provider_error() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.push_failure("model offline");
        let assessor = SeverityAssessor::new(provider);

        let assessment = assessor.assess("old", "new", "ExampleNet").await;

        assert_eq!(assessment.severity, Severity::Unknown);
        assert_eq!(assessment.confidence, 0.0);
        match &assessment.source {
            AssessmentSource::Fallback { reason } => {
                assert!(reason.contains("model offline"));
            }
            AssessmentSource::Model => panic!("expected fallback source"),
        }
    }

    #[tokio::test]
    async fn test_assess_falls_back_on_malformed_response() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.push_response("I could not produce a structured answer.");
        let assessor = SeverityAssessor::new(provider);

        let assessment = assessor.assess("old", "new", "ExampleNet").await;

        assert_eq!(assessment.severity, Severity::Unknown);
        assert!(assessment.source.is_fallback());
    }
}
