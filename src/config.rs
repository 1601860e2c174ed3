//! Application Settings
//!
//! Fixed settings loaded once at startup from the environment (with `.env`
//! support). The resulting `Settings` value is immutable for the process
//! lifetime; there is no hot reload.

use serde::{Deserialize, Serialize};
use std::env;
use std::fmt::Display;
use std::str::FromStr;
use thiserror::Error;

/// Default Gemini generation model.
pub const DEFAULT_MODEL: &str = "gemini-pro";
/// Default Gemini embedding model (full resource name).
pub const DEFAULT_EMBEDDING_MODEL: &str = "models/embedding-001";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("GEMINI_API_KEY is not set")]
    MissingApiKey,
    #[error("invalid setting {name}: {message}")]
    Invalid { name: &'static str, message: String },
}

/// Harm categories accepted by the generation service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HarmCategory {
    HarmCategoryHarassment,
    HarmCategoryHateSpeech,
    HarmCategorySexuallyExplicit,
    HarmCategoryDangerousContent,
}

/// Block level applied to a harm category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BlockThreshold {
    BlockNone,
    BlockOnlyHigh,
    BlockMediumAndAbove,
    BlockLowAndAbove,
}

/// A per-category safety policy entry, serialized in the wire format the
/// generation service expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetySetting {
    pub category: HarmCategory,
    pub threshold: BlockThreshold,
}

/// Application settings and configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// API key for the embedding/generation service. Never serialized.
    #[serde(skip_serializing, default)]
    pub api_key: String,

    // Model configuration
    pub model_name: String,
    pub embedding_model: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub top_p: f32,
    pub top_k: u32,

    // Chunking and retrieval
    /// Chunk window size in tokens.
    pub chunk_size: usize,
    /// Tokens shared between consecutive chunks. Must be < chunk_size.
    pub chunk_overlap: usize,
    pub retrieval_top_k: usize,

    // Service call policy
    /// Texts per embedding request.
    pub embed_batch_size: usize,
    /// Attempts per external call before giving up.
    pub retry_attempts: u32,
    /// Base delay for exponential backoff between attempts.
    pub retry_base_delay_ms: u64,
    pub request_timeout_secs: u64,

    pub safety_settings: Vec<SafetySetting>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            api_key: String::new(),
            model_name: DEFAULT_MODEL.to_string(),
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            temperature: 0.7,
            max_output_tokens: 500,
            top_p: 0.95,
            top_k: 40,
            chunk_size: 1024,
            chunk_overlap: 20,
            retrieval_top_k: 3,
            embed_batch_size: 16,
            retry_attempts: 3,
            retry_base_delay_ms: 500,
            request_timeout_secs: 30,
            safety_settings: vec![
                SafetySetting {
                    category: HarmCategory::HarmCategoryHarassment,
                    threshold: BlockThreshold::BlockMediumAndAbove,
                },
                SafetySetting {
                    category: HarmCategory::HarmCategoryHateSpeech,
                    threshold: BlockThreshold::BlockMediumAndAbove,
                },
            ],
        }
    }
}

/// Parse an environment override, falling back to `default` when unset.
fn env_parse<T>(name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            message: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

fn env_string(name: &str, default: &str) -> String {
    env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

impl Settings {
    /// Load settings from the environment (reading `.env` first).
    ///
    /// Fails with `ConfigError` if the API key is absent or any setting is
    /// malformed. Re-invocation after the environment changes is undefined.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let api_key = env::var("GEMINI_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or(ConfigError::MissingApiKey)?;

        let defaults = Settings::default();
        let settings = Settings {
            api_key,
            model_name: env_string("MODEL_NAME", &defaults.model_name),
            embedding_model: env_string("EMBEDDING_MODEL", &defaults.embedding_model),
            temperature: env_parse("TEMPERATURE", defaults.temperature)?,
            max_output_tokens: env_parse("MAX_TOKENS", defaults.max_output_tokens)?,
            top_p: env_parse("TOP_P", defaults.top_p)?,
            top_k: env_parse("TOP_K", defaults.top_k)?,
            chunk_size: env_parse("CHUNK_SIZE", defaults.chunk_size)?,
            chunk_overlap: env_parse("CHUNK_OVERLAP", defaults.chunk_overlap)?,
            retrieval_top_k: env_parse("RETRIEVAL_TOP_K", defaults.retrieval_top_k)?,
            embed_batch_size: env_parse("EMBED_BATCH_SIZE", defaults.embed_batch_size)?,
            retry_attempts: env_parse("RETRY_ATTEMPTS", defaults.retry_attempts)?,
            retry_base_delay_ms: env_parse("RETRY_BASE_DELAY_MS", defaults.retry_base_delay_ms)?,
            request_timeout_secs: env_parse(
                "REQUEST_TIMEOUT_SECS",
                defaults.request_timeout_secs,
            )?,
            safety_settings: defaults.safety_settings,
        };

        settings.validate()?;
        Ok(settings)
    }

    /// Check the cross-field invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::Invalid {
                name: "CHUNK_SIZE",
                message: "must be positive".to_string(),
            });
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(ConfigError::Invalid {
                name: "CHUNK_OVERLAP",
                message: format!(
                    "overlap {} must be smaller than chunk size {}",
                    self.chunk_overlap, self.chunk_size
                ),
            });
        }
        if self.retrieval_top_k == 0 {
            return Err(ConfigError::Invalid {
                name: "RETRIEVAL_TOP_K",
                message: "must be at least 1".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.temperature) {
            return Err(ConfigError::Invalid {
                name: "TEMPERATURE",
                message: format!("{} is outside [0, 1]", self.temperature),
            });
        }
        if self.max_output_tokens == 0 {
            return Err(ConfigError::Invalid {
                name: "MAX_TOKENS",
                message: "must be positive".to_string(),
            });
        }
        if self.embed_batch_size == 0 {
            return Err(ConfigError::Invalid {
                name: "EMBED_BATCH_SIZE",
                message: "must be positive".to_string(),
            });
        }
        if self.retry_attempts == 0 {
            return Err(ConfigError::Invalid {
                name: "RETRY_ATTEMPTS",
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}
