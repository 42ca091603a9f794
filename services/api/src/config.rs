//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::Level;
use uuid::Uuid;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// How free-text (mock exam) answers get their marks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MarkingMode {
    /// Mark-scheme keywords, computed in-process.
    Keyword,
    /// An LLM compares the answer with the sample answer.
    Llm,
    /// Every free-text answer waits for a trusted grader.
    Review,
}

impl std::str::FromStr for MarkingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "keyword" => Ok(MarkingMode::Keyword),
            "llm" => Ok(MarkingMode::Llm),
            "review" => Ok(MarkingMode::Review),
            other => Err(format!("'{}' is not one of keyword, llm, review", other)),
        }
    }
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    /// `None` runs against the in-memory store.
    pub database_url: Option<String>,
    pub log_level: Level,
    pub openai_api_key: Option<String>,
    pub generator_model: String,
    pub marking_model: String,
    pub marking_mode: MarkingMode,
    pub generator_timeout: Duration,
    pub max_items_per_request: u32,
    pub grader_ids: HashSet<Uuid>,
    pub webhook_secret: Option<String>,
    pub cors_origin: String,
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        Err(_) => Ok(default),
    }
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination.
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        // --- Load Server and Database Settings ---
        let bind_address_str =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
        let bind_address = bind_address_str.parse::<SocketAddr>().map_err(|e| {
            ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string())
        })?;

        let database_url = std::env::var("DATABASE_URL").ok().filter(|u| !u.is_empty());

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        // --- Load API Keys (as optional) ---
        let openai_api_key = std::env::var("OPENAI_API_KEY").ok();

        // --- Load Adapter-specific Settings ---
        let generator_model =
            std::env::var("GENERATOR_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());
        let marking_model =
            std::env::var("MARKING_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());
        let marking_mode = parse_var("MARKING_MODE", MarkingMode::Keyword)?;
        if marking_mode == MarkingMode::Llm && openai_api_key.is_none() {
            return Err(ConfigError::MissingVar("OPENAI_API_KEY".to_string()));
        }

        // --- Load Engine Limits ---
        let generator_timeout = Duration::from_secs(parse_var("GENERATOR_TIMEOUT_SECS", 60u64)?);
        let max_items_per_request = parse_var("MAX_ITEMS_PER_REQUEST", 20u32)?;
        if max_items_per_request == 0 {
            return Err(ConfigError::InvalidValue(
                "MAX_ITEMS_PER_REQUEST".to_string(),
                "must be at least 1".to_string(),
            ));
        }

        // --- Load Trust Settings ---
        let grader_ids = std::env::var("GRADER_IDS")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                Uuid::parse_str(s).map_err(|e| {
                    ConfigError::InvalidValue("GRADER_IDS".to_string(), format!("'{}': {}", s, e))
                })
            })
            .collect::<Result<HashSet<_>, _>>()?;
        let webhook_secret = std::env::var("WEBHOOK_SECRET").ok().filter(|s| !s.is_empty());
        let cors_origin =
            std::env::var("CORS_ORIGIN").unwrap_or_else(|_| "http://localhost:5173".to_string());

        Ok(Self {
            bind_address,
            database_url,
            log_level,
            openai_api_key,
            generator_model,
            marking_model,
            marking_mode,
            generator_timeout,
            max_items_per_request,
            grader_ids,
            webhook_secret,
            cors_origin,
        })
    }

    /// A configuration for tests and local runs: in-memory store, keyword marking.
    pub fn for_local() -> Self {
        Self {
            bind_address: SocketAddr::from(([127, 0, 0, 1], 3000)),
            database_url: None,
            log_level: Level::INFO,
            openai_api_key: None,
            generator_model: "gpt-4o-mini".to_string(),
            marking_model: "gpt-4o-mini".to_string(),
            marking_mode: MarkingMode::Keyword,
            generator_timeout: Duration::from_secs(60),
            max_items_per_request: 20,
            grader_ids: HashSet::new(),
            webhook_secret: None,
            cors_origin: "http://localhost:5173".to_string(),
        }
    }
}
