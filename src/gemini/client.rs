//! Gemini HTTP Client
//!
//! Direct HTTP client for the Gemini REST API. Uses reqwest instead of
//! third-party wrapper crates for stability and full API control. Transient
//! failures are retried with bounded exponential backoff; every request
//! carries an explicit timeout.

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::types::{
    BatchEmbedContentsRequest, BatchEmbedContentsResponse, Content, EmbedContentRequest,
    ErrorResponse, FinishReason, GenerateContentRequest, GenerateContentResponse,
    GenerationConfig,
};
use crate::config::{SafetySetting, Settings};
use crate::provider::{Embedder, GenerationOutcome, Generator, ServiceError};

/// Public endpoint for the Gemini API.
const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Connect timeout, separate from the per-request timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

impl From<reqwest::Error> for ServiceError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ServiceError::Timeout
        } else {
            ServiceError::Transport(e.to_string())
        }
    }
}

/// Bounded exponential backoff policy for transient failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Delay before retrying after a failed `attempt` (0-based): doubles
    /// per attempt starting from the base delay.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt)
    }
}

/// Gemini HTTP client. Implements both `Embedder` and `Generator`.
#[derive(Clone)]
pub struct GeminiClient {
    http: Client,
    base_url: String,
    api_key: String,
    model: String,
    embedding_model: String,
    generation: GenerationConfig,
    safety: Vec<SafetySetting>,
    batch_size: usize,
    retry: RetryPolicy,
}

impl GeminiClient {
    pub fn new(settings: &Settings) -> Self {
        Self::with_base_url(settings, DEFAULT_BASE_URL)
    }

    /// Build a client against a non-default endpoint.
    pub fn with_base_url(settings: &Settings, base_url: &str) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());
        GeminiClient {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
            model: settings.model_name.clone(),
            embedding_model: settings.embedding_model.clone(),
            generation: GenerationConfig {
                temperature: settings.temperature,
                max_output_tokens: settings.max_output_tokens,
                top_p: settings.top_p,
                top_k: settings.top_k,
            },
            safety: settings.safety_settings.clone(),
            batch_size: settings.embed_batch_size,
            retry: RetryPolicy {
                attempts: settings.retry_attempts,
                base_delay: Duration::from_millis(settings.retry_base_delay_ms),
            },
        }
    }

    /// Run `call`, retrying transient failures up to the policy limit.
    async fn with_retry<T, F, Fut>(&self, what: &'static str, mut call: F) -> Result<T, ServiceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        let mut attempt = 0u32;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt + 1 < self.retry.attempts => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        what,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient service failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Map a non-success response to the error taxonomy.
    async fn check_status(response: Response) -> Result<Response, ServiceError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorResponse>(&text)
            .map(|e| e.error.message)
            .unwrap_or(text);
        Err(classify_status(status, message))
    }

    async fn verify_once(&self) -> Result<(), ServiceError> {
        debug!("Verifying API key");
        let response = self
            .http
            .get(format!("{}/v1beta/models", self.base_url))
            .query(&[("pageSize", "1")])
            .header("x-goog-api-key", &self.api_key)
            .send()
            .await?;
        Self::check_status(response).await?;
        Ok(())
    }

    async fn embed_batch_once(&self, batch: &[String]) -> Result<Vec<Vec<f32>>, ServiceError> {
        let body = BatchEmbedContentsRequest {
            requests: batch
                .iter()
                .map(|text| EmbedContentRequest {
                    model: self.embedding_model.clone(),
                    content: Content::text(text),
                })
                .collect(),
        };

        debug!(count = batch.len(), "Requesting embeddings");
        let response = self
            .http
            .post(format!(
                "{}/v1beta/{}:batchEmbedContents",
                self.base_url, self.embedding_model
            ))
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        let response = Self::check_status(response).await?;
        let parsed: BatchEmbedContentsResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::Decode(e.to_string()))?;

        if parsed.embeddings.len() != batch.len() {
            return Err(ServiceError::Missing("an embedding for every input"));
        }
        Ok(parsed.embeddings.into_iter().map(|e| e.values).collect())
    }

    async fn generate_once(&self, prompt: &str) -> Result<GenerationOutcome, ServiceError> {
        let body = GenerateContentRequest {
            contents: vec![Content::user(prompt)],
            generation_config: self.generation.clone(),
            safety_settings: self.safety.clone(),
        };

        debug!(model = %self.model, "Requesting generation");
        let response = self
            .http
            .post(format!(
                "{}/v1beta/models/{}:generateContent",
                self.base_url, self.model
            ))
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        let response = Self::check_status(response).await?;
        let parsed: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::Decode(e.to_string()))?;

        outcome_from_response(parsed)
    }
}

/// Classify an HTTP failure. Credential rejections are fatal; rate limits
/// and server errors stay retryable via `ServiceError::is_transient`.
fn classify_status(status: StatusCode, message: String) -> ServiceError {
    let code = status.as_u16();
    let credential_rejected = code == 401
        || code == 403
        || (code == 400 && message.to_ascii_lowercase().contains("api key"));
    if credential_rejected {
        ServiceError::Auth(message)
    } else {
        ServiceError::Status {
            status: code,
            message,
        }
    }
}

/// Turn a generation response into an outcome, surfacing safety blocks as a
/// distinct success rather than exposing partial model output.
fn outcome_from_response(
    response: GenerateContentResponse,
) -> Result<GenerationOutcome, ServiceError> {
    if let Some(feedback) = &response.prompt_feedback {
        if let Some(reason) = &feedback.block_reason {
            info!(reason = %reason, "Prompt blocked by the service");
            return Ok(GenerationOutcome::Blocked {
                reason: reason.clone(),
            });
        }
    }

    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or(ServiceError::Missing("candidates"))?;

    if candidate.finish_reason == Some(FinishReason::Safety) {
        info!("Candidate withheld by the safety filter");
        return Ok(GenerationOutcome::Blocked {
            reason: "SAFETY".to_string(),
        });
    }

    let text = candidate
        .content
        .map(|c| {
            c.parts
                .into_iter()
                .map(|p| p.text)
                .collect::<Vec<_>>()
                .join("")
        })
        .filter(|t| !t.is_empty())
        .ok_or(ServiceError::Missing("candidate content"))?;

    Ok(GenerationOutcome::Answer(text))
}

#[async_trait]
impl Embedder for GeminiClient {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ServiceError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let batch_vectors = self
                .with_retry("batchEmbedContents", || self.embed_batch_once(batch))
                .await?;
            vectors.extend(batch_vectors);
        }
        info!(count = vectors.len(), "Embedded texts");
        Ok(vectors)
    }

    async fn verify(&self) -> Result<(), ServiceError> {
        self.with_retry("models", || self.verify_once()).await
    }
}

#[async_trait]
impl Generator for GeminiClient {
    async fn generate(&self, prompt: &str) -> Result<GenerationOutcome, ServiceError> {
        self.with_retry("generateContent", || self.generate_once(prompt))
            .await
    }
}
