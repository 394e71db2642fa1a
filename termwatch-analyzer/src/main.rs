//! Termwatch Analyzer - Main entry point.

use anyhow::Result;
use termwatch_analyzer::AnalyzerService;
use termwatch_common::config::Config;
use termwatch_common::logging::init_logging;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load_with_env()?;

    // Initialize logging
    init_logging(&config.service.log_level, &config.service.log_format);

    tracing::info!("Termwatch Analyzer v{}", env!("CARGO_PKG_VERSION"));

    // Start the analyzer service
    let service = AnalyzerService::new(config);
    service.start().await
}
