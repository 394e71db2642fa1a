//! Termwatch Analyzer - Policy-change analysis service.
//!
//! This crate provides:
//! - Concurrent analysis pipeline (diff, severity, structure, tone)
//! - Perpetual background worker with claim-based batch processing
//! - LLM-backed severity assessment and guidance drafting
//! - HTTP API for on-demand analysis and draft management

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod diff;
pub mod guidance;
pub mod models;
pub mod pipeline;
pub mod processor;
pub mod provider;
pub mod routes;
pub mod sentiment;
pub mod severity;
pub mod store;
pub mod structure;
pub mod worker;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::HeaderValue;
use termwatch_common::config::Config;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

pub use guidance::GuidanceGenerator;
pub use pipeline::AnalyzerContext;
pub use processor::{AnalysisView, ChangeProcessor};
pub use provider::{
    CompletionProvider, CompletionRequest, CompletionResponse, OpenAiProvider, ProviderError,
    ScriptedProvider,
};
pub use routes::{build_router, create_state, ApiResponse, ServiceState};
pub use sentiment::{NeutralToneEstimator, ToneEstimator};
pub use severity::{SeverityAssessment, SeverityAssessor};
pub use store::PolicyStore;
pub use worker::{AnalysisWorker, WorkerPhase};

// ============================================================================
// Analyzer Service
// ============================================================================

/// Analyzer service that runs the HTTP server and the background
/// analysis worker.
pub struct AnalyzerService {
    config: Config,
}

impl AnalyzerService {
    /// Create a new analyzer service.
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Start the analyzer service. Returns after a shutdown signal once
    /// the worker has stopped.
    pub async fn start(&self) -> anyhow::Result<()> {
        tracing::info!("Starting termwatch analyzer service");

        let store = PolicyStore::open(&self.config.database.resolve_path())?;

        if self.config.provider.api_key.is_none() {
            tracing::warn!(
                "No provider API key configured; analyses will degrade to fallback results"
            );
        }
        let provider: Arc<dyn CompletionProvider> = Arc::new(OpenAiProvider::new(
            self.config.provider.api_key.as_deref().unwrap_or(""),
            &self.config.provider.api_base,
            &self.config.provider.model,
        ));

        let context = Arc::new(AnalyzerContext::new(store, provider, &self.config.analysis));
        context.initialize().await;

        let mut worker = AnalysisWorker::new(Arc::clone(&context));
        worker.start().await?;

        let state = create_state(
            Arc::clone(&context),
            self.config.analysis.max_concurrent_analyses,
        );
        let router = build_router(state).layer(build_cors(&self.config.service.cors_origins));

        let addr = SocketAddr::from(([127, 0, 0, 1], self.config.service.port));
        tracing::info!("Starting termwatch analyzer HTTP server on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        worker.stop().await;
        tracing::info!("Analyzer service stopped");

        Ok(())
    }
}

/// CORS layer honoring the configured origins; `"*"` allows any.
fn build_cors(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|origin| origin == "*") {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }

    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(parsed))
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Resolve on SIGTERM or SIGINT.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for interrupt signal");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("Shutdown signal received");
}
