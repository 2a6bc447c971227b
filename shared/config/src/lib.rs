use std::env;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingVar(&'static str),
    #[error("invalid value for {name}: {value}")]
    InvalidVar { name: &'static str, value: String },
}

/// Process configuration, loaded once at startup from the environment.
/// Missing credentials are a fatal configuration error, never a
/// per-request failure.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub openai_api_key: String,
    pub openai_base_url: Option<String>,
    pub chat_model: String,
    pub embedding_model: String,
    pub serper_api_key: String,
    pub backend_host: String,
    pub backend_port: u16,
    /// When set, dedup lookups go through Qdrant instead of the in-memory
    /// index.
    pub qdrant_url: Option<String>,
    /// Minimum cosine similarity for a dedup hit. Unset accepts whatever
    /// the nearest neighbor is, however weak.
    pub dedup_min_similarity: Option<f32>,
    pub related_questions_enabled: bool,
    pub backfill_interval_secs: u64,
    pub backfill_batch_size: usize,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            openai_api_key: require("OPENAI_API_KEY")?,
            openai_base_url: optional("OPENAI_BASE_URL"),
            chat_model: optional("OPENAI_CHAT_MODEL").unwrap_or_else(|| "gpt-3.5-turbo".to_string()),
            embedding_model: optional("OPENAI_EMBEDDING_MODEL")
                .unwrap_or_else(|| "text-embedding-3-small".to_string()),
            serper_api_key: require("SERPER_API_KEY")?,
            backend_host: optional("BACKEND_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            backend_port: parse_optional("BACKEND_PORT")?.unwrap_or(8080),
            qdrant_url: optional("QDRANT_URL"),
            dedup_min_similarity: parse_optional("DEDUP_MIN_SIMILARITY")?,
            related_questions_enabled: parse_optional("RELATED_QUESTIONS")?.unwrap_or(true),
            backfill_interval_secs: parse_optional("EMBEDDING_BACKFILL_INTERVAL_SECS")?.unwrap_or(15),
            backfill_batch_size: parse_optional("EMBEDDING_BACKFILL_BATCH_SIZE")?.unwrap_or(10),
        })
    }
}

fn require(name: &'static str) -> Result<String, ConfigError> {
    optional(name).ok_or(ConfigError::MissingVar(name))
}

fn optional(name: &'static str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_optional<T: std::str::FromStr>(name: &'static str) -> Result<Option<T>, ConfigError> {
    match optional(name) {
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidVar { name, value }),
        None => Ok(None),
    }
}
