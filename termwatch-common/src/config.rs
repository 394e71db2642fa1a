//! Configuration management for termwatch services.
//!
//! All termwatch services share a configuration file at `~/.termwatch/config.json`.
//!
//! # Configuration Priority
//!
//! 1. Explicit config file values
//! 2. Environment variables
//! 3. Default values
//!
//! # Environment Variable Mapping
//!
//! - `TERMWATCH_PORT` → service.port
//! - `TERMWATCH_LOG_LEVEL` → service.log_level
//! - `TERMWATCH_LOG_FORMAT` → service.log_format
//! - `TERMWATCH_DATABASE_PATH` → database.path
//! - `TERMWATCH_MODEL` → provider.model
//! - `OPENAI_API_KEY` → provider.api_key
//! - `OPENAI_API_BASE` → provider.api_base

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new().map_or_else(
        || PathBuf::from(".termwatch"),
        |dirs| dirs.home_dir().join(".termwatch"),
    )
}

/// Get the configuration file path.
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

// ============================================================================
// Service Configuration
// ============================================================================

/// HTTP service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Port the analyzer service listens on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Base log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log output format: "pretty" or "json".
    #[serde(default = "default_log_format")]
    pub log_format: String,

    /// Allowed cross-origin request sources. `"*"` allows any origin.
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            cors_origins: default_cors_origins(),
        }
    }
}

fn default_port() -> u16 {
    3002
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "pretty".into()
}

fn default_cors_origins() -> Vec<String> {
    vec!["*".into()]
}

// ============================================================================
// Database Configuration
// ============================================================================

/// SQLite store configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    /// Defaults to `~/.termwatch/termwatch.db` when unset.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl DatabaseConfig {
    /// Resolve the effective database path.
    pub fn resolve_path(&self) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| config_dir().join("termwatch.db"))
    }
}

// ============================================================================
// Provider Configuration
// ============================================================================

/// LLM provider configuration (OpenAI-compatible API).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// API key. Analysis degrades to fallback results when missing.
    #[serde(default)]
    pub api_key: Option<String>,

    /// API base URL.
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Model name used for severity assessment and guidance generation.
    #[serde(default = "default_model")]
    pub model: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: default_api_base(),
            model: default_model(),
        }
    }
}

fn default_api_base() -> String {
    "https://api.openai.com".into()
}

fn default_model() -> String {
    "gpt-4".into()
}

// ============================================================================
// Analysis Configuration
// ============================================================================

/// Analysis pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Assessments below this confidence are flagged as low-confidence in logs.
    #[serde(default = "default_min_confidence")]
    pub min_confidence_threshold: f64,

    /// Identifier of the structure-extraction model.
    #[serde(default = "default_structure_model")]
    pub structure_model: String,

    /// Maximum number of concurrent on-demand analyses.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_analyses: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            min_confidence_threshold: default_min_confidence(),
            structure_model: default_structure_model(),
            max_concurrent_analyses: default_max_concurrent(),
        }
    }
}

fn default_min_confidence() -> f64 {
    0.70
}

fn default_structure_model() -> String {
    "heuristic-v1".into()
}

fn default_max_concurrent() -> usize {
    5
}

// ============================================================================
// Root Configuration
// ============================================================================

/// Root configuration for termwatch services.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// HTTP service settings
    #[serde(default)]
    pub service: ServiceConfig,

    /// SQLite store settings
    #[serde(default)]
    pub database: DatabaseConfig,

    /// LLM provider settings
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Analysis pipeline settings
    #[serde(default)]
    pub analysis: AnalysisConfig,
}

impl Config {
    /// Load configuration from the default path.
    pub fn load() -> Result<Self> {
        let path = config_path();
        if !path.exists() {
            tracing::info!("Config file not found, using defaults");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &PathBuf) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Load configuration with environment variable fallbacks.
    pub fn load_with_env() -> Result<Self> {
        let mut config = Self::load()?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(port) = std::env::var("TERMWATCH_PORT") {
            if let Ok(p) = port.parse() {
                self.service.port = p;
            }
        }
        if let Ok(level) = std::env::var("TERMWATCH_LOG_LEVEL") {
            self.service.log_level = level;
        }
        if let Ok(format) = std::env::var("TERMWATCH_LOG_FORMAT") {
            self.service.log_format = format;
        }
        if let Ok(path) = std::env::var("TERMWATCH_DATABASE_PATH") {
            self.database.path = Some(PathBuf::from(path));
        }
        if let Ok(model) = std::env::var("TERMWATCH_MODEL") {
            self.provider.model = model;
        }
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            self.provider.api_key = Some(key);
        }
        if let Ok(base) = std::env::var("OPENAI_API_BASE") {
            self.provider.api_base = base;
        }
    }
}
