//! Document Module
//!
//! Loading and chunking of source documents.

pub mod chunker;
pub mod loader;

// Re-export key public types
pub use chunker::{chunk_document, Chunk, ChunkError};
pub use loader::{
    load_documents, Document, DocumentFormat, DocumentSource, LoadError, LoadFailure,
    LoadOutcome,
};
