//! Domain models for policy change analysis.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Severity
// ============================================================================

/// Categorical assessment of how consequential a policy change is.
///
/// `Unknown` means the change has not been successfully analyzed yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Unknown,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Whether this severity requires member notification.
    ///
    /// The notification flag on a change is always derived from this,
    /// never set independently.
    pub const fn requires_notification(self) -> bool {
        matches!(self, Self::Critical | Self::High)
    }

    /// True when the change has not been successfully analyzed.
    pub const fn is_unknown(self) -> bool {
        matches!(self, Self::Unknown)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    /// Parse a severity label. Returns `None` for unrecognized values.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "unknown" => Some(Self::Unknown),
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }

    /// Parse a stored severity label, treating unrecognized values as unknown.
    pub fn parse_lossy(s: &str) -> Self {
        Self::parse(s).unwrap_or(Self::Unknown)
    }
}

impl Default for Severity {
    fn default() -> Self {
        Self::Unknown
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Diff Entries
// ============================================================================

/// Whether a diff entry added or removed a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Addition,
    Deletion,
}

/// A single changed line, positioned within the unified diff stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffEntry {
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    /// The changed line's text
    pub content: String,
    /// Position in the diff stream (equal lines advance the position)
    pub line: usize,
}

// ============================================================================
// Sentiment
// ============================================================================

/// Coarse tone-shift signal between two document versions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentimentShift {
    pub previous_tone: String,
    pub current_tone: String,
    pub shift: String,
    pub confidence: f64,
}

impl SentimentShift {
    /// The neutral no-change signal.
    pub fn no_change() -> Self {
        Self {
            previous_tone: "neutral".into(),
            current_tone: "neutral".into(),
            shift: "no_change".into(),
            confidence: 0.5,
        }
    }
}

// ============================================================================
// Assessment Source
// ============================================================================

/// Whether a severity assessment came from the model or from the designed
/// fallback substituted on provider failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "lowercase")]
pub enum AssessmentSource {
    /// The model produced a valid assessment.
    Model,
    /// The provider failed or returned output that did not validate.
    Fallback { reason: String },
}

impl AssessmentSource {
    pub const fn is_fallback(&self) -> bool {
        matches!(self, Self::Fallback { .. })
    }
}

// ============================================================================
// Analysis Outcome
// ============================================================================

/// The aggregated verdict of one analysis run for one change.
///
/// Serialized in full as the payload of the persisted analysis record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisOutcome {
    pub severity: Severity,
    pub confidence: f64,
    pub change_summary: String,
    pub impact_assessment: String,
    pub affected_sections: Vec<String>,
    /// Derived from severity, never set independently
    pub requires_notification: bool,
    pub key_changes: Vec<DiffEntry>,
    pub sentiment_shift: SentimentShift,
    #[serde(flatten)]
    pub source: AssessmentSource,
    pub model_name: String,
    pub processing_time_ms: u64,
}

// ============================================================================
// Policy Change
// ============================================================================

/// One detected divergence between two snapshots of a policy document.
///
/// Created by the external detection process with severity `unknown`;
/// mutated exactly by the change processor when an analysis is applied;
/// never deleted, only marked `false_positive` by human review.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyChange {
    pub id: String,
    pub policy_document_id: String,
    pub previous_snapshot_id: Option<String>,
    pub current_snapshot_id: Option<String>,
    pub detected_at: DateTime<Utc>,
    pub change_type: String,
    pub severity: Severity,
    pub confidence_score: Option<f64>,
    pub affected_sections: Vec<String>,
    pub change_summary: Option<String>,
    pub impact_assessment: Option<String>,
    pub requires_member_notification: bool,
    pub notification_sent_at: Option<DateTime<Utc>>,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub review_notes: Option<String>,
    pub false_positive: bool,
    /// In-progress mark taken by an analysis path before processing
    pub claimed_at: Option<DateTime<Utc>>,
}

impl PolicyChange {
    /// Whether this change is eligible for worker analysis.
    pub fn is_eligible(&self) -> bool {
        self.severity.is_unknown() && !self.false_positive
    }
}

/// Fields supplied by the detection process when recording a change.
#[derive(Debug, Clone)]
pub struct NewChange {
    pub policy_document_id: String,
    pub previous_snapshot_id: Option<String>,
    pub current_snapshot_id: Option<String>,
    pub change_type: String,
}

/// Summary row for the unanalyzed-changes listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnanalyzedChange {
    pub id: String,
    pub detected_at: DateTime<Utc>,
    pub change_type: String,
}

// ============================================================================
// Analysis Record
// ============================================================================

/// Immutable output of one aggregation run, persisted append-only.
///
/// A change may have zero, one, or many records; re-analysis appends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub id: String,
    pub policy_change_id: String,
    pub detected_at: DateTime<Utc>,
    pub analysis_type: String,
    pub model_name: String,
    /// Full structured outcome payload
    pub result: serde_json::Value,
    pub confidence_score: f64,
    pub processing_time_ms: u64,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Guidance Drafts
// ============================================================================

/// Editorial lifecycle of a guidance draft.
///
/// `draft → reviewed → approved → published`, with `archived` reachable
/// from any other state. Only `draft` creation happens in this service;
/// later transitions are external editorial actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DraftStatus {
    Draft,
    Reviewed,
    Approved,
    Published,
    Archived,
}

impl DraftStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Reviewed => "reviewed",
            Self::Approved => "approved",
            Self::Published => "published",
            Self::Archived => "archived",
        }
    }

    /// Parse a status label. Returns `None` for unrecognized values.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "draft" => Some(Self::Draft),
            "reviewed" => Some(Self::Reviewed),
            "approved" => Some(Self::Approved),
            "published" => Some(Self::Published),
            "archived" => Some(Self::Archived),
            _ => None,
        }
    }

    /// Whether the editorial state machine permits this transition.
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Draft, Self::Reviewed)
                | (Self::Reviewed, Self::Approved)
                | (Self::Approved, Self::Published)
                | (Self::Draft, Self::Archived)
                | (Self::Reviewed, Self::Archived)
                | (Self::Approved, Self::Archived)
                | (Self::Published, Self::Archived)
        )
    }
}

impl fmt::Display for DraftStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A generated member-facing communication derived from one or more changes.
///
/// References changes by identifier only; owns none of them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuidanceDraft {
    pub id: String,
    pub title: String,
    pub summary: Option<String>,
    pub content_markdown: String,
    pub content_html: Option<String>,
    pub draft_type: String,
    pub status: DraftStatus,
    pub related_changes: Vec<String>,
    pub target_platforms: Vec<String>,
    pub generated_by: String,
    pub ai_model: String,
    pub drafted_by: String,
    pub drafted_at: DateTime<Utc>,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub approved_by: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub published_at: Option<DateTime<Utc>>,
    pub archived_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Summary row for the draft listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DraftSummary {
    pub id: String,
    pub title: String,
    pub status: DraftStatus,
    pub drafted_at: DateTime<Utc>,
    pub generated_by: String,
}

// ============================================================================
// Documents & Snapshots
// ============================================================================

/// A monitored policy document, carrying the labels used as prompt context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyDocument {
    pub id: String,
    pub platform_name: String,
    pub document_type: String,
    pub title: Option<String>,
}

/// One captured version of a document's text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicySnapshot {
    pub id: String,
    pub policy_document_id: String,
    pub captured_at: DateTime<Utc>,
    pub content_text: String,
    pub checksum: String,
}

impl PolicySnapshot {
    /// SHA-256 hex checksum of snapshot content.
    pub fn calculate_checksum(content: &str) -> String {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        hex::encode(hasher.finalize())
    }
}
