//! HTTP API surface for the analyzer service.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use termwatch_common::Error;

use crate::guidance::GuidanceGenerator;
use crate::models::{DraftStatus, DraftSummary, GuidanceDraft, UnanalyzedChange};
use crate::pipeline::AnalyzerContext;
use crate::processor::{AnalysisView, ChangeProcessor};

// ============================================================================
// Response Envelope
// ============================================================================

/// Uniform envelope for API payloads.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

fn error_response<T: Serialize>(e: &Error) -> (StatusCode, Json<ApiResponse<T>>) {
    let status =
        StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let message = match e {
        Error::NotFound(message) | Error::InvalidInput(message) => message.clone(),
        _ => e.to_string(),
    };
    (status, Json(ApiResponse::error(message)))
}

// ============================================================================
// State
// ============================================================================

/// Shared handler state.
pub struct ServiceState {
    pub context: Arc<AnalyzerContext>,
    pub processor: ChangeProcessor,
    pub guidance: GuidanceGenerator,
    /// Bounds concurrent on-demand analyses and guidance generations.
    pub analysis_permits: Arc<Semaphore>,
}

/// Assemble handler state around an analyzer context.
pub fn create_state(context: Arc<AnalyzerContext>, max_concurrent_analyses: usize) -> Arc<ServiceState> {
    Arc::new(ServiceState {
        processor: ChangeProcessor::new(Arc::clone(&context)),
        guidance: GuidanceGenerator::new(context.store().clone(), context.provider()),
        analysis_permits: Arc::new(Semaphore::new(max_concurrent_analyses)),
        context,
    })
}

/// Build the API router.
pub fn build_router(state: Arc<ServiceState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/api/v1/analysis/analyze", post(analyze))
        .route("/api/v1/analysis/changes/unanalyzed", get(list_unanalyzed))
        .route("/api/v1/guidance/generate", post(generate_guidance))
        .route("/api/v1/guidance/drafts", get(list_drafts))
        .route("/api/v1/guidance/drafts/:id", get(get_draft))
        .with_state(state)
}

// ============================================================================
// Requests & Responses
// ============================================================================

#[derive(Debug, Deserialize)]
struct AnalyzeRequest {
    change_id: String,
    #[serde(default)]
    force_reanalysis: bool,
}

#[derive(Debug, Deserialize)]
struct GuidanceRequest {
    change_ids: Vec<String>,
    platform_name: String,
    #[serde(default = "default_draft_type")]
    draft_type: String,
}

fn default_draft_type() -> String {
    "regular".to_string()
}

#[derive(Debug, Deserialize)]
struct UnanalyzedQuery {
    #[serde(default = "default_limit")]
    limit: usize,
}

#[derive(Debug, Deserialize)]
struct DraftsQuery {
    #[serde(default)]
    status: Option<String>,
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    50
}

#[derive(Debug, Serialize, Deserialize)]
struct UnanalyzedListResponse {
    changes: Vec<UnanalyzedChange>,
    count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
struct DraftListResponse {
    drafts: Vec<DraftSummary>,
    count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
struct GuidanceResponse {
    draft_id: String,
    title: String,
    summary: String,
    content: String,
    status: DraftStatus,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
}

#[derive(Debug, Serialize)]
struct ReadyResponse {
    status: &'static str,
}

// ============================================================================
// Handlers
// ============================================================================

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: "termwatch-analyzer",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn ready(State(state): State<Arc<ServiceState>>) -> (StatusCode, Json<ReadyResponse>) {
    if state.context.is_ready() {
        (StatusCode::OK, Json(ReadyResponse { status: "ready" }))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadyResponse {
                status: "initializing",
            }),
        )
    }
}

async fn analyze(
    State(state): State<Arc<ServiceState>>,
    Json(request): Json<AnalyzeRequest>,
) -> (StatusCode, Json<ApiResponse<AnalysisView>>) {
    let _permit = match state.analysis_permits.acquire().await {
        Ok(permit) => permit,
        Err(_) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::error("Analysis limiter closed")),
            )
        }
    };

    match state
        .processor
        .analyze_on_demand(&request.change_id, request.force_reanalysis)
        .await
    {
        Ok(view) => (StatusCode::OK, Json(ApiResponse::success(view))),
        Err(e) => {
            if !e.is_not_found() {
                tracing::error!(change_id = %request.change_id, error = %e, "On-demand analysis failed");
            }
            error_response(&e)
        }
    }
}

async fn list_unanalyzed(
    State(state): State<Arc<ServiceState>>,
    Query(query): Query<UnanalyzedQuery>,
) -> (StatusCode, Json<ApiResponse<UnanalyzedListResponse>>) {
    match state.context.store().list_unanalyzed(query.limit) {
        Ok(changes) => {
            let count = changes.len();
            (
                StatusCode::OK,
                Json(ApiResponse::success(UnanalyzedListResponse {
                    changes,
                    count,
                })),
            )
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to list unanalyzed changes");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::error(e.to_string())),
            )
        }
    }
}

async fn generate_guidance(
    State(state): State<Arc<ServiceState>>,
    Json(request): Json<GuidanceRequest>,
) -> (StatusCode, Json<ApiResponse<GuidanceResponse>>) {
    let _permit = match state.analysis_permits.acquire().await {
        Ok(permit) => permit,
        Err(_) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::error("Analysis limiter closed")),
            )
        }
    };

    match state
        .guidance
        .generate(
            &request.change_ids,
            &request.platform_name,
            &request.draft_type,
        )
        .await
    {
        Ok(draft) => (
            StatusCode::OK,
            Json(ApiResponse::success(GuidanceResponse {
                draft_id: draft.id,
                title: draft.title,
                summary: draft.summary.unwrap_or_default(),
                content: draft.content_markdown,
                status: draft.status,
            })),
        ),
        Err(e) => {
            if !e.is_not_found() {
                tracing::error!(error = %e, "Guidance generation failed");
            }
            error_response(&e)
        }
    }
}

async fn list_drafts(
    State(state): State<Arc<ServiceState>>,
    Query(query): Query<DraftsQuery>,
) -> (StatusCode, Json<ApiResponse<DraftListResponse>>) {
    let status_raw = query.status.as_deref().filter(|s| !s.is_empty());
    let status = match status_raw {
        Some(raw) => match DraftStatus::parse(raw) {
            Some(status) => Some(status),
            None => {
                return error_response(&Error::InvalidInput(format!(
                    "Unknown draft status: {raw}"
                )))
            }
        },
        None => None,
    };

    match state.context.store().list_drafts(status, query.limit) {
        Ok(drafts) => {
            let count = drafts.len();
            (
                StatusCode::OK,
                Json(ApiResponse::success(DraftListResponse { drafts, count })),
            )
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to list drafts");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::error(e.to_string())),
            )
        }
    }
}

async fn get_draft(
    State(state): State<Arc<ServiceState>>,
    Path(id): Path<String>,
) -> (StatusCode, Json<ApiResponse<GuidanceDraft>>) {
    match state.context.store().get_draft(&id) {
        Ok(Some(draft)) => (StatusCode::OK, Json(ApiResponse::success(draft))),
        Ok(None) => error_response(&Error::NotFound("Draft not found".to_string())),
        Err(e) => {
            tracing::error!(draft_id = %id, error = %e, "Failed to load draft");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::error(e.to_string())),
            )
        }
    }
}
