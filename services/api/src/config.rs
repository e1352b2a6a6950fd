//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use std::net::SocketAddr;
use std::time::Duration;
use tracing::Level;

use inbox_assistant_core::similarity::{SimilarityConfig, SimilarityStrategy};

pub const GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";
pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/openai";
pub const OLLAMA_BASE_URL: &str = "http://localhost:11434";

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChatProviderKind {
    Groq,
    Gemini,
    Ollama,
}

impl ChatProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatProviderKind::Groq => "groq",
            ChatProviderKind::Gemini => "gemini",
            ChatProviderKind::Ollama => "ollama",
        }
    }
}

/// One OpenAI-compatible chat backend. Ollama's `model` may be left for runtime resolution.
#[derive(Clone, Debug)]
pub struct ChatProviderConfig {
    pub kind: ChatProviderKind,
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EmbeddingProviderKind {
    Ollama,
    Remote,
}

#[derive(Clone, Debug)]
pub struct OllamaConfig {
    pub base_url: String,
    pub embed_model: String,
}

#[derive(Clone, Debug)]
pub struct RemoteEmbeddingConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub database_url: String,
    pub log_level: Level,
    pub cors_origin: String,
    /// Chat backends in priority order.
    pub chat_providers: Vec<ChatProviderConfig>,
    pub embedding_providers: Vec<EmbeddingProviderKind>,
    pub ollama: OllamaConfig,
    pub remote_embedding: Option<RemoteEmbeddingConfig>,
    pub similarity: SimilarityConfig,
    pub business_name: String,
    pub reply_signature: String,
    pub sync_timeout: Duration,
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
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let var_or = |key: &str, default: &str| var(key).unwrap_or_else(|| default.to_string());

        // --- Load Server and Database Settings ---
        let bind_address = parse(&var_or("BIND_ADDRESS", "0.0.0.0:3000"), "BIND_ADDRESS")?;

        let database_url = var("DATABASE_URL").ok_or_else(|| ConfigError::MissingVar("DATABASE_URL".to_string()))?;

        let log_level_str = var_or("RUST_LOG", "INFO");
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let cors_origin = var_or("CORS_ORIGIN", "http://localhost:3000");

        // --- Load Chat Providers ---
        let ollama_base = var_or("OLLAMA_BASE_URL", OLLAMA_BASE_URL).trim_end_matches('/').to_string();
        let mut chat_providers = Vec::new();
        for name in list(&var_or("LLM_PROVIDERS", "ollama")) {
            let provider = match name.as_str() {
                "groq" => ChatProviderConfig {
                    kind: ChatProviderKind::Groq,
                    base_url: var_or("GROQ_BASE_URL", GROQ_BASE_URL),
                    api_key: Some(var("GROQ_API_KEY").ok_or_else(|| ConfigError::MissingVar("GROQ_API_KEY".to_string()))?),
                    model: Some(var_or("GROQ_MODEL", "openai/gpt-oss-120b")),
                },
                "gemini" => ChatProviderConfig {
                    kind: ChatProviderKind::Gemini,
                    base_url: var_or("GEMINI_BASE_URL", GEMINI_BASE_URL),
                    api_key: Some(
                        var("GEMINI_API_KEY").ok_or_else(|| ConfigError::MissingVar("GEMINI_API_KEY".to_string()))?,
                    ),
                    model: Some(var_or("GEMINI_MODEL", "gemini-2.0-flash")),
                },
                "ollama" => ChatProviderConfig {
                    kind: ChatProviderKind::Ollama,
                    base_url: format!("{ollama_base}/v1"),
                    api_key: None,
                    model: var("OLLAMA_CHAT_MODEL"),
                },
                other => {
                    return Err(ConfigError::InvalidValue(
                        "LLM_PROVIDERS".to_string(),
                        format!("unknown provider '{other}'"),
                    ))
                }
            };
            chat_providers.push(provider);
        }

        // --- Load Embedding Providers ---
        let mut embedding_providers = Vec::new();
        for name in list(&var_or("EMBEDDING_PROVIDERS", "ollama")) {
            let kind = match name.as_str() {
                "ollama" => EmbeddingProviderKind::Ollama,
                "remote" => EmbeddingProviderKind::Remote,
                other => {
                    return Err(ConfigError::InvalidValue(
                        "EMBEDDING_PROVIDERS".to_string(),
                        format!("unknown provider '{other}'"),
                    ))
                }
            };
            embedding_providers.push(kind);
        }

        let remote_embedding = match var("EMBEDDING_BASE_URL") {
            Some(base_url) => Some(RemoteEmbeddingConfig {
                base_url: base_url.trim_end_matches('/').to_string(),
                api_key: var("EMBEDDING_API_KEY"),
                model: var_or("EMBEDDING_MODEL", "text-embedding-3-small"),
            }),
            None if embedding_providers.contains(&EmbeddingProviderKind::Remote) => {
                return Err(ConfigError::MissingVar("EMBEDDING_BASE_URL".to_string()))
            }
            None => None,
        };

        let ollama = OllamaConfig {
            base_url: ollama_base,
            embed_model: var_or("OLLAMA_EMBED_MODEL", "nomic-embed-text"),
        };

        // --- Load Pipeline Tuning ---
        let defaults = SimilarityConfig::default();
        let strategy = match var_or("SIMILARITY_STRATEGY", "embedding-first").to_lowercase().as_str() {
            "embedding-first" => SimilarityStrategy::EmbeddingFirst,
            "judge-first" => SimilarityStrategy::JudgeFirst,
            other => {
                return Err(ConfigError::InvalidValue(
                    "SIMILARITY_STRATEGY".to_string(),
                    format!("expected embedding-first or judge-first, got '{other}'"),
                ))
            }
        };
        let similarity = SimilarityConfig {
            pool_cap: parse_or(var("SIMILARITY_POOL_CAP"), "SIMILARITY_POOL_CAP", defaults.pool_cap)?,
            accept_threshold: parse_or(
                var("SIMILARITY_ACCEPT_THRESHOLD"),
                "SIMILARITY_ACCEPT_THRESHOLD",
                defaults.accept_threshold,
            )?,
            floor_threshold: parse_or(
                var("SIMILARITY_FLOOR_THRESHOLD"),
                "SIMILARITY_FLOOR_THRESHOLD",
                defaults.floor_threshold,
            )?,
            strategy,
            ..defaults
        };
        if similarity.floor_threshold > similarity.accept_threshold {
            return Err(ConfigError::InvalidValue(
                "SIMILARITY_FLOOR_THRESHOLD".to_string(),
                "must not exceed SIMILARITY_ACCEPT_THRESHOLD".to_string(),
            ));
        }

        let sync_timeout = Duration::from_millis(parse_or(var("SYNC_TIMEOUT_MS"), "SYNC_TIMEOUT_MS", 3000u64)?);

        Ok(Self {
            bind_address,
            database_url,
            log_level,
            cors_origin,
            chat_providers,
            embedding_providers,
            ollama,
            remote_embedding,
            similarity,
            business_name: var("BUSINESS_NAME").unwrap_or_default(),
            reply_signature: var("REPLY_SIGNATURE").unwrap_or_default(),
            sync_timeout,
        })
    }
}

fn list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse<T>(value: &str, key: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidValue(key.to_string(), e.to_string()))
}

fn parse_or<T>(value: Option<String>, key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match value {
        Some(v) => parse(&v, key),
        None => Ok(default),
    }
}
