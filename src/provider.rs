//! External service capability interfaces.
//!
//! The pipeline depends on these traits rather than on a concrete client, so
//! the hosted embedding/generation services can be swapped for deterministic
//! fakes in tests. The Gemini client implements both.

use async_trait::async_trait;
use thiserror::Error;

/// Errors from an external embedding or generation call, mapped away from
/// the transport layer. Which service raised it is determined by the call
/// site; no raw provider error escapes past this type.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("authentication rejected: {0}")]
    Auth(String),
    #[error("request timed out")]
    Timeout,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("service returned HTTP {status}: {message}")]
    Status { status: u16, message: String },
    #[error("malformed response: {0}")]
    Decode(String),
    #[error("response missing {0}")]
    Missing(&'static str),
}

impl ServiceError {
    /// Whether a retry may succeed. Auth and decode failures are final.
    pub fn is_transient(&self) -> bool {
        match self {
            ServiceError::Timeout | ServiceError::Transport(_) => true,
            ServiceError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// Outcome of a generation call. A safety block is a successful call with a
/// distinct result, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationOutcome {
    Answer(String),
    Blocked {
        /// Provider-reported reason code (e.g. "SAFETY"), never raw output.
        reason: String,
    },
}

/// Computes fixed-dimensionality embedding vectors for text.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts. The output order matches the input order and
    /// every vector has the same dimensionality.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ServiceError>;

    /// Verify the credentials behind this provider. Local providers have
    /// nothing to check.
    async fn verify(&self) -> Result<(), ServiceError> {
        Ok(())
    }
}

/// Produces an answer for a fully rendered prompt.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<GenerationOutcome, ServiceError>;
}
