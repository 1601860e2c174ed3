//! Gemini REST API Module
//!
//! HTTP client and wire types for the hosted embedding and generation
//! endpoints.

pub mod client;
pub mod types;

pub use client::GeminiClient;
pub use types::FinishReason;
