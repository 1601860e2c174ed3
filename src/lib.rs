// Sourcebook Library
// Exports core modules for use by both the library consumers and the CLI binary

pub mod config;
pub mod documents;
pub mod gemini;
pub mod index;
pub mod pipeline;
pub mod provider;
pub mod store;
pub mod tokens;

// Re-export commonly used types for callers
pub use config::{BlockThreshold, ConfigError, HarmCategory, SafetySetting, Settings};
pub use documents::{
    chunk_document, load_documents, Chunk, ChunkError, Document, DocumentFormat, DocumentSource,
    LoadError, LoadFailure, LoadOutcome,
};
pub use gemini::GeminiClient;
pub use index::{cosine_similarity, IndexEntry, IndexError, ScoredChunk, VectorIndex};
pub use pipeline::{
    AddReport, DocumentFailure, IndexReport, PipelineError, PipelineState, PipelineStats,
    QueryResult, RagPipeline,
};
pub use provider::{Embedder, GenerationOutcome, Generator, ServiceError};
pub use store::{SessionRecord, StoreError};
pub use tokens::{count_tokens, estimate_tokens_quick};
