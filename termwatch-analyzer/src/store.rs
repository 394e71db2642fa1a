//! SQLite-backed persistence for the analyzer.
//!
//! Provides durable storage for:
//! - Monitored documents and their content snapshots
//! - Detected policy changes and their claim state
//! - Append-only analysis results
//! - Guidance drafts
//!
//! All multi-statement writes run inside a single transaction; a failed
//! apply leaves the change untouched.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::models::{
    AnalysisOutcome, AnalysisRecord, DraftStatus, DraftSummary, GuidanceDraft, NewChange,
    PolicyChange, PolicyDocument, PolicySnapshot, Severity, UnanalyzedChange,
};

/// Claims older than this are considered abandoned and may be taken over.
pub const CLAIM_TTL_SECS: i64 = 300;

const CHANGE_COLUMNS: &str = "id, policy_document_id, previous_snapshot_id, current_snapshot_id, \
     detected_at, change_type, severity, confidence_score, affected_sections, change_summary, \
     impact_assessment, requires_member_notification, notification_sent_at, reviewed_by, \
     reviewed_at, review_notes, false_positive, claimed_at";

const DRAFT_COLUMNS: &str = "id, title, summary, content_markdown, content_html, draft_type, \
     status, related_changes, target_platforms, generated_by, ai_model, drafted_by, drafted_at, \
     reviewed_by, reviewed_at, approved_by, approved_at, published_at, archived_at, created_at, \
     updated_at";

/// Store for policy documents, changes, analysis results, and drafts.
#[derive(Clone)]
pub struct PolicyStore {
    conn: Arc<Mutex<Connection>>,
}

impl PolicyStore {
    /// Open (or create) the store at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create data directory {}", parent.display()))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database {}", path.display()))?;

        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory store (tests and local experiments).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS documents (
                id              TEXT PRIMARY KEY,
                platform_name   TEXT NOT NULL,
                document_type   TEXT NOT NULL,
                title           TEXT
            );
            CREATE TABLE IF NOT EXISTS snapshots (
                id                  TEXT PRIMARY KEY,
                policy_document_id  TEXT NOT NULL,
                captured_at         TEXT NOT NULL,
                content_text        TEXT NOT NULL,
                checksum            TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_snapshots_document ON snapshots(policy_document_id);
            CREATE TABLE IF NOT EXISTS policy_changes (
                id                           TEXT PRIMARY KEY,
                policy_document_id           TEXT NOT NULL,
                previous_snapshot_id         TEXT,
                current_snapshot_id          TEXT,
                detected_at                  TEXT NOT NULL,
                change_type                  TEXT NOT NULL,
                severity                     TEXT NOT NULL DEFAULT 'unknown',
                confidence_score             REAL,
                affected_sections            TEXT NOT NULL DEFAULT '[]',
                change_summary               TEXT,
                impact_assessment            TEXT,
                requires_member_notification INTEGER NOT NULL DEFAULT 0,
                notification_sent_at         TEXT,
                reviewed_by                  TEXT,
                reviewed_at                  TEXT,
                review_notes                 TEXT,
                false_positive               INTEGER NOT NULL DEFAULT 0,
                claimed_at                   TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_changes_eligibility
                ON policy_changes(severity, false_positive);
            CREATE TABLE IF NOT EXISTS analysis_results (
                id                  TEXT PRIMARY KEY,
                policy_change_id    TEXT NOT NULL,
                detected_at         TEXT NOT NULL,
                analysis_type       TEXT NOT NULL,
                model_name          TEXT NOT NULL,
                result              TEXT NOT NULL,
                confidence_score    REAL NOT NULL,
                processing_time_ms  INTEGER NOT NULL,
                created_at          TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_results_change
                ON analysis_results(policy_change_id);
            CREATE TABLE IF NOT EXISTS guidance_drafts (
                id               TEXT PRIMARY KEY,
                title            TEXT NOT NULL,
                summary          TEXT,
                content_markdown TEXT NOT NULL,
                content_html     TEXT,
                draft_type       TEXT NOT NULL DEFAULT 'regular',
                status           TEXT NOT NULL DEFAULT 'draft',
                related_changes  TEXT NOT NULL DEFAULT '[]',
                target_platforms TEXT NOT NULL DEFAULT '[]',
                generated_by     TEXT NOT NULL,
                ai_model         TEXT NOT NULL,
                drafted_by       TEXT NOT NULL,
                drafted_at       TEXT NOT NULL,
                reviewed_by      TEXT,
                reviewed_at      TEXT,
                approved_by      TEXT,
                approved_at      TEXT,
                published_at     TEXT,
                archived_at      TEXT,
                created_at       TEXT NOT NULL,
                updated_at       TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_drafts_drafted_at
                ON guidance_drafts(drafted_at);",
        )
        .context("Failed to initialize analyzer schema")
    }

    // ========================================================================
    // Documents & Snapshots
    // ========================================================================

    /// Record a monitored document.
    pub fn record_document(
        &self,
        platform_name: &str,
        document_type: &str,
        title: Option<&str>,
    ) -> Result<PolicyDocument> {
        let document = PolicyDocument {
            id: Uuid::new_v4().to_string(),
            platform_name: platform_name.to_string(),
            document_type: document_type.to_string(),
            title: title.map(String::from),
        };

        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("{}", e))?;
        conn.execute(
            "INSERT INTO documents (id, platform_name, document_type, title)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                document.id,
                document.platform_name,
                document.document_type,
                document.title
            ],
        )
        .context("Failed to insert document")?;

        Ok(document)
    }

    /// Look up a document by id.
    pub fn get_document(&self, id: &str) -> Result<Option<PolicyDocument>> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("{}", e))?;
        let mut stmt = conn.prepare(
            "SELECT id, platform_name, document_type, title FROM documents WHERE id = ?1",
        )?;

        let mut rows = stmt.query_map(params![id], |row| {
            Ok(PolicyDocument {
                id: row.get(0)?,
                platform_name: row.get(1)?,
                document_type: row.get(2)?,
                title: row.get(3)?,
            })
        })?;

        rows.next().transpose().context("Failed to read document")
    }

    /// Record a captured document snapshot. The checksum is computed here.
    pub fn record_snapshot(&self, document_id: &str, content: &str) -> Result<PolicySnapshot> {
        let snapshot = PolicySnapshot {
            id: Uuid::new_v4().to_string(),
            policy_document_id: document_id.to_string(),
            captured_at: Utc::now(),
            content_text: content.to_string(),
            checksum: PolicySnapshot::calculate_checksum(content),
        };

        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("{}", e))?;
        conn.execute(
            "INSERT INTO snapshots (id, policy_document_id, captured_at, content_text, checksum)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                snapshot.id,
                snapshot.policy_document_id,
                snapshot.captured_at.to_rfc3339(),
                snapshot.content_text,
                snapshot.checksum
            ],
        )
        .context("Failed to insert snapshot")?;

        Ok(snapshot)
    }

    /// Look up a snapshot by id.
    pub fn get_snapshot(&self, id: &str) -> Result<Option<PolicySnapshot>> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("{}", e))?;
        let mut stmt = conn.prepare(
            "SELECT id, policy_document_id, captured_at, content_text, checksum
             FROM snapshots WHERE id = ?1",
        )?;

        let mut rows = stmt.query_map(params![id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;

        match rows.next().transpose().context("Failed to read snapshot")? {
            Some((id, policy_document_id, captured_at_raw, content_text, checksum)) => {
                Ok(Some(PolicySnapshot {
                    id,
                    policy_document_id,
                    captured_at: Self::parse_rfc3339(&captured_at_raw)?,
                    content_text,
                    checksum,
                }))
            }
            None => Ok(None),
        }
    }

    // ========================================================================
    // Policy Changes
    // ========================================================================

    /// Record a newly detected change with severity `unknown`.
    pub fn record_change(&self, new: NewChange) -> Result<PolicyChange> {
        let change = PolicyChange {
            id: Uuid::new_v4().to_string(),
            policy_document_id: new.policy_document_id,
            previous_snapshot_id: new.previous_snapshot_id,
            current_snapshot_id: new.current_snapshot_id,
            detected_at: Utc::now(),
            change_type: new.change_type,
            severity: Severity::Unknown,
            confidence_score: None,
            affected_sections: Vec::new(),
            change_summary: None,
            impact_assessment: None,
            requires_member_notification: false,
            notification_sent_at: None,
            reviewed_by: None,
            reviewed_at: None,
            review_notes: None,
            false_positive: false,
            claimed_at: None,
        };

        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("{}", e))?;
        conn.execute(
            "INSERT INTO policy_changes
                (id, policy_document_id, previous_snapshot_id, current_snapshot_id,
                 detected_at, change_type)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                change.id,
                change.policy_document_id,
                change.previous_snapshot_id,
                change.current_snapshot_id,
                change.detected_at.to_rfc3339(),
                change.change_type
            ],
        )
        .context("Failed to insert policy change")?;

        tracing::debug!(change_id = %change.id, "Recorded policy change");
        Ok(change)
    }

    /// Look up a change by id.
    pub fn get_change(&self, id: &str) -> Result<Option<PolicyChange>> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("{}", e))?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {CHANGE_COLUMNS} FROM policy_changes WHERE id = ?1"
        ))?;

        let mut rows = stmt.query_map(params![id], ChangeRow::from_row)?;
        match rows.next().transpose().context("Failed to read change")? {
            Some(raw) => Ok(Some(raw.into_change()?)),
            None => Ok(None),
        }
    }

    /// Fetch changes by id, preserving input order and skipping unknown ids.
    pub fn get_changes(&self, ids: &[String]) -> Result<Vec<PolicyChange>> {
        let mut changes = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(change) = self.get_change(id)? {
                changes.push(change);
            }
        }
        Ok(changes)
    }

    /// List changes still awaiting analysis, oldest first.
    pub fn list_unanalyzed(&self, limit: usize) -> Result<Vec<UnanalyzedChange>> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("{}", e))?;
        let mut stmt = conn.prepare(
            "SELECT id, detected_at, change_type FROM policy_changes
             WHERE severity = 'unknown' AND false_positive = 0
             ORDER BY detected_at ASC LIMIT ?1",
        )?;

        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut changes = Vec::new();
        for row in rows {
            let (id, detected_at_raw, change_type) = row?;
            changes.push(UnanalyzedChange {
                id,
                detected_at: Self::parse_rfc3339(&detected_at_raw)?,
                change_type,
            });
        }

        Ok(changes)
    }

    /// Record a human review verdict dismissing a change as a false positive.
    pub fn mark_false_positive(&self, id: &str, reviewer: &str, notes: Option<&str>) -> Result<bool> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("{}", e))?;
        let changed = conn
            .execute(
                "UPDATE policy_changes
                 SET false_positive = 1, reviewed_by = ?1, reviewed_at = ?2, review_notes = ?3
                 WHERE id = ?4",
                params![reviewer, Utc::now().to_rfc3339(), notes, id],
            )
            .context("Failed to mark false positive")?;

        Ok(changed > 0)
    }

    // ========================================================================
    // Claims
    // ========================================================================

    /// Atomically claim up to `limit` eligible changes for processing.
    ///
    /// Eligible means severity `unknown`, not a false positive, and not
    /// freshly claimed by another path. Claims older than [`CLAIM_TTL_SECS`]
    /// are treated as abandoned and taken over.
    pub fn claim_batch(&self, limit: usize) -> Result<Vec<PolicyChange>> {
        let now = Utc::now();
        let stale_cutoff = (now - Duration::seconds(CLAIM_TTL_SECS)).to_rfc3339();

        let mut conn = self.conn.lock().map_err(|e| anyhow::anyhow!("{}", e))?;
        let tx = conn.transaction().context("Failed to begin claim batch")?;

        let mut claimed = Vec::new();
        {
            let mut stmt = tx.prepare(&format!(
                "SELECT {CHANGE_COLUMNS} FROM policy_changes
                 WHERE severity = 'unknown' AND false_positive = 0
                   AND (claimed_at IS NULL OR claimed_at < ?1)
                 ORDER BY detected_at ASC LIMIT ?2"
            ))?;

            let rows = stmt.query_map(params![stale_cutoff, limit as i64], ChangeRow::from_row)?;
            for row in rows {
                claimed.push(row?.into_change()?);
            }
        }

        for change in &mut claimed {
            tx.execute(
                "UPDATE policy_changes SET claimed_at = ?1 WHERE id = ?2",
                params![now.to_rfc3339(), change.id],
            )
            .context("Failed to claim change")?;
            change.claimed_at = Some(now);
        }

        tx.commit().context("Failed to commit claim batch")?;

        if !claimed.is_empty() {
            tracing::debug!(count = claimed.len(), "Claimed changes for analysis");
        }
        Ok(claimed)
    }

    /// Try to claim a single change. Returns false when another path holds
    /// a fresh claim.
    pub fn try_claim(&self, id: &str) -> Result<bool> {
        let now = Utc::now();
        let stale_cutoff = (now - Duration::seconds(CLAIM_TTL_SECS)).to_rfc3339();

        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("{}", e))?;
        let changed = conn
            .execute(
                "UPDATE policy_changes SET claimed_at = ?1
                 WHERE id = ?2 AND (claimed_at IS NULL OR claimed_at < ?3)",
                params![now.to_rfc3339(), id, stale_cutoff],
            )
            .context("Failed to claim change")?;

        Ok(changed > 0)
    }

    /// Release a claim without applying a result (the failure path).
    pub fn release_claim(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("{}", e))?;
        conn.execute(
            "UPDATE policy_changes SET claimed_at = NULL WHERE id = ?1",
            params![id],
        )
        .context("Failed to release claim")?;

        tracing::debug!(change_id = %id, "Released claim");
        Ok(())
    }

    // ========================================================================
    // Analysis Results
    // ========================================================================

    /// Whether any analysis record exists for the change.
    pub fn has_analysis(&self, change_id: &str) -> Result<bool> {
        Ok(self.count_analyses(change_id)? > 0)
    }

    /// Number of analysis records appended for the change.
    pub fn count_analyses(&self, change_id: &str) -> Result<u64> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("{}", e))?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM analysis_results WHERE policy_change_id = ?1",
                params![change_id],
                |row| row.get(0),
            )
            .context("Failed to count analysis results")?;

        Ok(count as u64)
    }

    /// Apply an analysis outcome to a change as a single transactional unit:
    /// update the change's mirrored fields, append an immutable result
    /// record, and clear the claim.
    pub fn apply_analysis(
        &self,
        change: &PolicyChange,
        outcome: &AnalysisOutcome,
    ) -> Result<AnalysisRecord> {
        let record = AnalysisRecord {
            id: Uuid::new_v4().to_string(),
            policy_change_id: change.id.clone(),
            detected_at: change.detected_at,
            analysis_type: "comprehensive".into(),
            model_name: outcome.model_name.clone(),
            result: serde_json::to_value(outcome)
                .context("Failed to serialize analysis outcome")?,
            confidence_score: outcome.confidence,
            processing_time_ms: outcome.processing_time_ms,
            created_at: Utc::now(),
        };

        let sections = serde_json::to_string(&outcome.affected_sections)
            .context("Failed to serialize affected sections")?;

        let mut conn = self.conn.lock().map_err(|e| anyhow::anyhow!("{}", e))?;
        let tx = conn.transaction().context("Failed to begin analysis apply")?;

        tx.execute(
            "UPDATE policy_changes
             SET severity = ?1, confidence_score = ?2, change_summary = ?3,
                 impact_assessment = ?4, requires_member_notification = ?5,
                 affected_sections = ?6, claimed_at = NULL
             WHERE id = ?7",
            params![
                outcome.severity.as_str(),
                outcome.confidence,
                outcome.change_summary,
                outcome.impact_assessment,
                outcome.requires_notification,
                sections,
                change.id
            ],
        )
        .context("Failed to update change fields")?;

        tx.execute(
            "INSERT INTO analysis_results
                (id, policy_change_id, detected_at, analysis_type, model_name,
                 result, confidence_score, processing_time_ms, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                record.id,
                record.policy_change_id,
                record.detected_at.to_rfc3339(),
                record.analysis_type,
                record.model_name,
                record.result.to_string(),
                record.confidence_score,
                record.processing_time_ms as i64,
                record.created_at.to_rfc3339()
            ],
        )
        .context("Failed to append analysis record")?;

        tx.commit().context("Failed to commit analysis apply")?;

        Ok(record)
    }

    // ========================================================================
    // Guidance Drafts
    // ========================================================================

    /// Persist a new guidance draft.
    pub fn insert_draft(&self, draft: &GuidanceDraft) -> Result<()> {
        let related = serde_json::to_string(&draft.related_changes)
            .context("Failed to serialize related changes")?;
        let platforms = serde_json::to_string(&draft.target_platforms)
            .context("Failed to serialize target platforms")?;

        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("{}", e))?;
        conn.execute(
            &format!(
                "INSERT INTO guidance_drafts ({DRAFT_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13,
                         ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21)"
            ),
            params![
                draft.id,
                draft.title,
                draft.summary,
                draft.content_markdown,
                draft.content_html,
                draft.draft_type,
                draft.status.as_str(),
                related,
                platforms,
                draft.generated_by,
                draft.ai_model,
                draft.drafted_by,
                draft.drafted_at.to_rfc3339(),
                draft.reviewed_by,
                draft.reviewed_at.map(|t| t.to_rfc3339()),
                draft.approved_by,
                draft.approved_at.map(|t| t.to_rfc3339()),
                draft.published_at.map(|t| t.to_rfc3339()),
                draft.archived_at.map(|t| t.to_rfc3339()),
                draft.created_at.to_rfc3339(),
                draft.updated_at.to_rfc3339()
            ],
        )
        .context("Failed to insert guidance draft")?;

        Ok(())
    }

    /// Look up a draft by id.
    pub fn get_draft(&self, id: &str) -> Result<Option<GuidanceDraft>> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("{}", e))?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {DRAFT_COLUMNS} FROM guidance_drafts WHERE id = ?1"
        ))?;

        let mut rows = stmt.query_map(params![id], DraftRow::from_row)?;
        match rows.next().transpose().context("Failed to read draft")? {
            Some(raw) => Ok(Some(raw.into_draft()?)),
            None => Ok(None),
        }
    }

    /// List draft summaries, newest first, optionally filtered by status.
    pub fn list_drafts(
        &self,
        status: Option<DraftStatus>,
        limit: usize,
    ) -> Result<Vec<DraftSummary>> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("{}", e))?;

        let mut summaries = Vec::new();
        let map_row = |row: &rusqlite::Row<'_>| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        };

        let rows: Vec<(String, String, String, String, String)> = match status {
            Some(status) => {
                let mut stmt = conn.prepare(
                    "SELECT id, title, status, drafted_at, generated_by FROM guidance_drafts
                     WHERE status = ?1 ORDER BY drafted_at DESC LIMIT ?2",
                )?;
                let rows = stmt.query_map(params![status.as_str(), limit as i64], map_row)?;
                rows.collect::<rusqlite::Result<_>>()?
            }
            None => {
                let mut stmt = conn.prepare(
                    "SELECT id, title, status, drafted_at, generated_by FROM guidance_drafts
                     ORDER BY drafted_at DESC LIMIT ?1",
                )?;
                let rows = stmt.query_map(params![limit as i64], map_row)?;
                rows.collect::<rusqlite::Result<_>>()?
            }
        };

        for (id, title, status_raw, drafted_at_raw, generated_by) in rows {
            summaries.push(DraftSummary {
                id,
                title,
                status: DraftStatus::parse(&status_raw).unwrap_or(DraftStatus::Draft),
                drafted_at: Self::parse_rfc3339(&drafted_at_raw)?,
                generated_by,
            });
        }

        Ok(summaries)
    }

    /// Parse an RFC3339 timestamp.
    fn parse_rfc3339(raw: &str) -> Result<DateTime<Utc>> {
        let parsed = DateTime::parse_from_rfc3339(raw)
            .with_context(|| format!("Invalid RFC3339 timestamp: {raw}"))?;
        Ok(parsed.with_timezone(&Utc))
    }

    /// Directly set a claim timestamp (test support for stale-claim paths).
    #[cfg(test)]
    pub(crate) fn set_claimed_at(&self, id: &str, claimed_at: DateTime<Utc>) -> Result<()> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("{}", e))?;
        conn.execute(
            "UPDATE policy_changes SET claimed_at = ?1 WHERE id = ?2",
            params![claimed_at.to_rfc3339(), id],
        )?;
        Ok(())
    }

    /// Corrupt a snapshot timestamp (test support for per-item failure paths).
    #[cfg(test)]
    pub(crate) fn corrupt_snapshot_timestamp(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("{}", e))?;
        conn.execute(
            "UPDATE snapshots SET captured_at = 'not-a-timestamp' WHERE id = ?1",
            params![id],
        )?;
        Ok(())
    }

    /// Break the schema (test support for systemic failure paths).
    #[cfg(test)]
    pub(crate) fn drop_changes_table(&self) -> Result<()> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("{}", e))?;
        conn.execute("DROP TABLE policy_changes", [])?;
        Ok(())
    }
}

// ============================================================================
// Row Mapping
// ============================================================================

struct ChangeRow {
    id: String,
    policy_document_id: String,
    previous_snapshot_id: Option<String>,
    current_snapshot_id: Option<String>,
    detected_at: String,
    change_type: String,
    severity: String,
    confidence_score: Option<f64>,
    affected_sections: String,
    change_summary: Option<String>,
    impact_assessment: Option<String>,
    requires_member_notification: bool,
    notification_sent_at: Option<String>,
    reviewed_by: Option<String>,
    reviewed_at: Option<String>,
    review_notes: Option<String>,
    false_positive: bool,
    claimed_at: Option<String>,
}

impl ChangeRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            policy_document_id: row.get(1)?,
            previous_snapshot_id: row.get(2)?,
            current_snapshot_id: row.get(3)?,
            detected_at: row.get(4)?,
            change_type: row.get(5)?,
            severity: row.get(6)?,
            confidence_score: row.get(7)?,
            affected_sections: row.get(8)?,
            change_summary: row.get(9)?,
            impact_assessment: row.get(10)?,
            requires_member_notification: row.get(11)?,
            notification_sent_at: row.get(12)?,
            reviewed_by: row.get(13)?,
            reviewed_at: row.get(14)?,
            review_notes: row.get(15)?,
            false_positive: row.get(16)?,
            claimed_at: row.get(17)?,
        })
    }

    fn into_change(self) -> Result<PolicyChange> {
        let affected_sections: Vec<String> = serde_json::from_str(&self.affected_sections)
            .context("Invalid affected sections payload")?;

        Ok(PolicyChange {
            id: self.id,
            policy_document_id: self.policy_document_id,
            previous_snapshot_id: self.previous_snapshot_id,
            current_snapshot_id: self.current_snapshot_id,
            detected_at: PolicyStore::parse_rfc3339(&self.detected_at)?,
            change_type: self.change_type,
            severity: Severity::parse_lossy(&self.severity),
            confidence_score: self.confidence_score,
            affected_sections,
            change_summary: self.change_summary,
            impact_assessment: self.impact_assessment,
            requires_member_notification: self.requires_member_notification,
            notification_sent_at: parse_optional_timestamp(self.notification_sent_at)?,
            reviewed_by: self.reviewed_by,
            reviewed_at: parse_optional_timestamp(self.reviewed_at)?,
            review_notes: self.review_notes,
            false_positive: self.false_positive,
            claimed_at: parse_optional_timestamp(self.claimed_at)?,
        })
    }
}

struct DraftRow {
    id: String,
    title: String,
    summary: Option<String>,
    content_markdown: String,
    content_html: Option<String>,
    draft_type: String,
    status: String,
    related_changes: String,
    target_platforms: String,
    generated_by: String,
    ai_model: String,
    drafted_by: String,
    drafted_at: String,
    reviewed_by: Option<String>,
    reviewed_at: Option<String>,
    approved_by: Option<String>,
    approved_at: Option<String>,
    published_at: Option<String>,
    archived_at: Option<String>,
    created_at: String,
    updated_at: String,
}

impl DraftRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            title: row.get(1)?,
            summary: row.get(2)?,
            content_markdown: row.get(3)?,
            content_html: row.get(4)?,
            draft_type: row.get(5)?,
            status: row.get(6)?,
            related_changes: row.get(7)?,
            target_platforms: row.get(8)?,
            generated_by: row.get(9)?,
            ai_model: row.get(10)?,
            drafted_by: row.get(11)?,
            drafted_at: row.get(12)?,
            reviewed_by: row.get(13)?,
            reviewed_at: row.get(14)?,
            approved_by: row.get(15)?,
            approved_at: row.get(16)?,
            published_at: row.get(17)?,
            archived_at: row.get(18)?,
            created_at: row.get(19)?,
            updated_at: row.get(20)?,
        })
    }

    fn into_draft(self) -> Result<GuidanceDraft> {
        let related_changes: Vec<String> = serde_json::from_str(&self.related_changes)
            .context("Invalid related changes payload")?;
        let target_platforms: Vec<String> = serde_json::from_str(&self.target_platforms)
            .context("Invalid target platforms payload")?;

        Ok(GuidanceDraft {
            id: self.id,
            title: self.title,
            summary: self.summary,
            content_markdown: self.content_markdown,
            content_html: self.content_html,
            draft_type: self.draft_type,
            status: DraftStatus::parse(&self.status).unwrap_or(DraftStatus::Draft),
            related_changes,
            target_platforms,
            generated_by: self.generated_by,
            ai_model: self.ai_model,
            drafted_by: self.drafted_by,
            drafted_at: PolicyStore::parse_rfc3339(&self.drafted_at)?,
            reviewed_by: self.reviewed_by,
            reviewed_at: parse_optional_timestamp(self.reviewed_at)?,
            approved_by: self.approved_by,
            approved_at: parse_optional_timestamp(self.approved_at)?,
            published_at: parse_optional_timestamp(self.published_at)?,
            archived_at: parse_optional_timestamp(self.archived_at)?,
            created_at: PolicyStore::parse_rfc3339(&self.created_at)?,
            updated_at: PolicyStore::parse_rfc3339(&self.updated_at)?,
        })
    }
}

fn parse_optional_timestamp(raw: Option<String>) -> Result<Option<DateTime<Utc>>> {
    match raw {
        Some(raw) => Ok(Some(PolicyStore::parse_rfc3339(&raw)?)),
        None => Ok(None),
    }
}
