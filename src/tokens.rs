//! Token counting and token-stream access using tiktoken-rs.
//!
//! Uses cl100k_base encoding. Chunk boundaries are defined over this token
//! stream, so encoding must be deterministic: the same text always yields the
//! same token sequence.

use lazy_static::lazy_static;
use thiserror::Error;
use tiktoken_rs::{cl100k_base, CoreBPE};

lazy_static! {
    /// The encoder is expensive to construct; build it once per process.
    static ref CL100K: Result<CoreBPE, String> = cl100k_base().map_err(|e| e.to_string());
}

#[derive(Error, Debug)]
pub enum TokenizerError {
    #[error("tokenizer unavailable: {0}")]
    Unavailable(String),
    #[error("token stream is not valid text: {0}")]
    Decode(String),
}

fn encoder() -> Result<&'static CoreBPE, TokenizerError> {
    CL100K
        .as_ref()
        .map_err(|e| TokenizerError::Unavailable(e.clone()))
}

/// Encode text into its cl100k token stream.
pub fn encode(text: &str) -> Result<Vec<usize>, TokenizerError> {
    Ok(encoder()?.encode_with_special_tokens(text))
}

/// Decode a slice of the token stream back into text.
///
/// Fails if the slice boundary splits a multi-byte character across tokens;
/// cl100k keeps ordinary text intact, so this only surfaces on unusual input.
pub fn decode(tokens: &[usize]) -> Result<String, TokenizerError> {
    encoder()?
        .decode(tokens.to_vec())
        .map_err(|e| TokenizerError::Decode(e.to_string()))
}

/// Count tokens in text, falling back to a quick estimate if the encoder
/// cannot be built.
pub fn count_tokens(text: &str) -> u32 {
    if text.is_empty() {
        return 0;
    }
    match encoder() {
        Ok(bpe) => bpe.encode_with_special_tokens(text).len() as u32,
        Err(_) => estimate_tokens_quick(text),
    }
}

/// Estimate tokens without encoding (~4 chars per token on average).
pub fn estimate_tokens_quick(text: &str) -> u32 {
    (text.len() as f64 / 4.0).ceil() as u32
}
