//! Document Chunking
//!
//! Splits documents into overlapping token windows for embedding and
//! retrieval. Boundaries are defined over the cl100k token stream, so
//! chunking is deterministic: the same document and settings always produce
//! the same chunks, and the windows tile the document with exactly the
//! configured overlap (the last window may be shorter).

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::loader::Document;
use crate::tokens::{self, TokenizerError};

#[derive(Error, Debug)]
pub enum ChunkError {
    #[error("tokenizer error: {0}")]
    Tokenizer(#[from] TokenizerError),
    #[error("overlap {overlap} must be smaller than chunk size {chunk_size}")]
    InvalidWindow { chunk_size: usize, overlap: usize },
}

/// A retrieval unit cut from a document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    /// Identifier of the source document.
    pub doc_id: String,
    /// Display name of the source, carried for citation.
    pub source: String,
    /// Sequence index within the document.
    pub index: u32,
    /// Decoded window text.
    pub content: String,
    /// Start offset into the document's token stream (inclusive).
    pub start_token: usize,
    /// End offset into the document's token stream (exclusive).
    pub end_token: usize,
    pub token_count: u32,
}

impl Chunk {
    /// Identity of a chunk within an index: one document never contributes
    /// two chunks with the same sequence index.
    pub fn identity(&self) -> String {
        format!("{}_{}", self.doc_id, self.index)
    }
}

/// Split a document into token windows of `chunk_size` with `overlap`
/// tokens shared between consecutive windows. An empty document yields no
/// chunks; a document at or under `chunk_size` yields exactly one.
pub fn chunk_document(
    document: &Document,
    chunk_size: usize,
    overlap: usize,
) -> Result<Vec<Chunk>, ChunkError> {
    if chunk_size == 0 || overlap >= chunk_size {
        return Err(ChunkError::InvalidWindow {
            chunk_size,
            overlap,
        });
    }

    let stream = tokens::encode(&document.content)?;
    if stream.is_empty() {
        return Ok(Vec::new());
    }

    let stride = chunk_size - overlap;
    let mut chunks = Vec::new();
    let mut start = 0usize;
    let mut index = 0u32;

    loop {
        let end = (start + chunk_size).min(stream.len());
        let content = tokens::decode(&stream[start..end])?;
        chunks.push(Chunk {
            doc_id: document.id.clone(),
            source: document.source.clone(),
            index,
            content,
            start_token: start,
            end_token: end,
            token_count: (end - start) as u32,
        });

        if end == stream.len() {
            break;
        }
        start += stride;
        index += 1;
    }

    Ok(chunks)
}
