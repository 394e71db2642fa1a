//! Member guidance drafting from analyzed policy changes.

use std::sync::Arc;

use anyhow::{Context, Result as AnyResult};
use chrono::Utc;
use termwatch_common::{Error, Result};
use uuid::Uuid;

use crate::models::{DraftStatus, GuidanceDraft, PolicyChange};
use crate::provider::{CompletionProvider, CompletionRequest};
use crate::severity::extract_json;
use crate::store::PolicyStore;

/// Maximum change summaries included in the drafting prompt.
pub const MAX_GUIDANCE_CHANGES: usize = 10;

const GUIDANCE_SYSTEM_PROMPT: &str =
    "You are the union communications team writing guidance for members.";
const GUIDANCE_TEMPERATURE: f64 = 0.7;

/// Drafts member guidance for a set of related changes and persists the
/// result in `draft` status.
#[derive(Clone)]
pub struct GuidanceGenerator {
    store: PolicyStore,
    provider: Arc<dyn CompletionProvider>,
}

impl GuidanceGenerator {
    pub fn new(store: PolicyStore, provider: Arc<dyn CompletionProvider>) -> Self {
        Self { store, provider }
    }

    /// Generate and persist a guidance draft.
    ///
    /// Changes are fetched by id; unknown ids are skipped, and a fully
    /// unknown set is a not-found error. Provider failures degrade to a
    /// templated draft rather than an error.
    pub async fn generate(
        &self,
        change_ids: &[String],
        platform_name: &str,
        draft_type: &str,
    ) -> Result<GuidanceDraft> {
        let changes = self.store.get_changes(change_ids)?;
        if changes.is_empty() {
            return Err(Error::NotFound("No changes found".to_string()));
        }

        let request = CompletionRequest {
            system: GUIDANCE_SYSTEM_PROMPT.to_string(),
            prompt: build_guidance_prompt(&changes, platform_name),
            temperature: GUIDANCE_TEMPERATURE,
            json_response: true,
        };

        let copy = match self.provider.complete(request).await {
            Ok(response) => match parse_guidance_response(&response.content) {
                Ok(copy) => copy,
                Err(e) => {
                    tracing::error!(error = %e, "Guidance response did not validate; using template");
                    GuidanceCopy::template(platform_name)
                }
            },
            Err(e) => {
                tracing::error!(error = %e, "Guidance generation request failed; using template");
                GuidanceCopy::template(platform_name)
            }
        };

        let now = Utc::now();
        let draft = GuidanceDraft {
            id: Uuid::new_v4().to_string(),
            title: copy.title,
            summary: Some(copy.summary),
            content_markdown: copy.content_markdown,
            content_html: None,
            draft_type: draft_type.to_string(),
            status: DraftStatus::Draft,
            related_changes: changes.iter().map(|c| c.id.clone()).collect(),
            target_platforms: vec![platform_name.to_string()],
            generated_by: "ai".to_string(),
            ai_model: self.provider.model().to_string(),
            drafted_by: "termwatch-analyzer".to_string(),
            drafted_at: now,
            reviewed_by: None,
            reviewed_at: None,
            approved_by: None,
            approved_at: None,
            published_at: None,
            archived_at: None,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_draft(&draft)?;

        tracing::info!(
            draft_id = %draft.id,
            related = draft.related_changes.len(),
            "Created guidance draft"
        );

        Ok(draft)
    }
}

fn build_guidance_prompt(changes: &[PolicyChange], platform_name: &str) -> String {
    let changes_text = changes
        .iter()
        .take(MAX_GUIDANCE_CHANGES)
        .map(|change| {
            format!(
                "- {}",
                change
                    .change_summary
                    .as_deref()
                    .unwrap_or("Policy change detected")
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"Write member guidance about recent {platform_name} policy changes.

Changes detected:
{changes_text}

Create:
1. A clear title
2. A brief summary (2-3 sentences)
3. Detailed guidance (3-5 paragraphs) covering:
   - What changed
   - Why it matters to members
   - Practical recommendations
   - What to watch for

Tone: Professional, clear, actionable
Audience: Working members and content creators

Respond in JSON format:
{{
    "title": "...",
    "summary": "...",
    "content_markdown": "..."
}}"#
    )
}

struct GuidanceCopy {
    title: String,
    summary: String,
    content_markdown: String,
}

impl GuidanceCopy {
    /// Templated copy substituted when the provider fails or returns
    /// output that does not validate.
    fn template(platform_name: &str) -> Self {
        Self {
            title: format!("{platform_name} Policy Update"),
            summary: "Recent policy changes detected.".to_string(),
            content_markdown: "Please review the changes manually.".to_string(),
        }
    }
}

fn parse_guidance_response(content: &str) -> AnyResult<GuidanceCopy> {
    let json_str = extract_json(content)?;
    let parsed: serde_json::Value =
        serde_json::from_str(&json_str).context("Guidance response is not valid JSON")?;

    let field = |name: &str| -> AnyResult<String> {
        parsed
            .get(name)
            .and_then(|v| v.as_str())
            .map(String::from)
            .with_context(|| format!("Guidance response missing {name}"))
    };

    Ok(GuidanceCopy {
        title: field("title")?,
        summary: field("summary")?,
        content_markdown: field("content_markdown")?,
    })
}
