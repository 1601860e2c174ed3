//! Vector Index
//!
//! In-memory mapping from chunks to embedding vectors with exact cosine
//! top-k retrieval. Entries keep insertion order; an index value is
//! immutable once built — `extended` returns a new merged index, so readers
//! holding the previous one are never disturbed.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

use crate::documents::Chunk;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("vector dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
    #[error("duplicate chunk identity: {0}")]
    DuplicateChunk(String),
    #[error("no entries to index")]
    Empty,
}

/// A chunk paired with its embedding vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexEntry {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
}

/// A retrieved chunk with its similarity score.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

/// Calculate cosine similarity between two vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

/// Exact-scan vector index over chunk embeddings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorIndex {
    dimension: usize,
    entries: Vec<IndexEntry>,
}

impl VectorIndex {
    /// Build a new index from scratch. All vectors must share one
    /// dimensionality and no two entries may carry the same chunk identity.
    pub fn build(entries: Vec<IndexEntry>) -> Result<Self, IndexError> {
        let dimension = entries.first().map(|e| e.vector.len()).ok_or(IndexError::Empty)?;

        let mut seen = HashSet::with_capacity(entries.len());
        for entry in &entries {
            if entry.vector.len() != dimension {
                return Err(IndexError::DimensionMismatch {
                    expected: dimension,
                    got: entry.vector.len(),
                });
            }
            if !seen.insert(entry.chunk.identity()) {
                return Err(IndexError::DuplicateChunk(entry.chunk.identity()));
            }
        }

        Ok(VectorIndex { dimension, entries })
    }

    /// Merge new entries into a copy of this index. An incoming entry whose
    /// chunk identity already exists replaces the old one in place (keeping
    /// its original position); everything else appends, so the merged index
    /// never holds two entries for one chunk.
    pub fn extended(&self, new_entries: Vec<IndexEntry>) -> Result<Self, IndexError> {
        let mut entries = self.entries.clone();
        let mut positions: HashMap<String, usize> = entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.chunk.identity(), i))
            .collect();

        for entry in new_entries {
            if entry.vector.len() != self.dimension {
                return Err(IndexError::DimensionMismatch {
                    expected: self.dimension,
                    got: entry.vector.len(),
                });
            }
            match positions.get(&entry.chunk.identity()) {
                Some(&i) => entries[i] = entry,
                None => {
                    positions.insert(entry.chunk.identity(), entries.len());
                    entries.push(entry);
                }
            }
        }

        Ok(VectorIndex {
            dimension: self.dimension,
            entries,
        })
    }

    /// Retrieve at most `top_k` chunks by descending cosine similarity.
    /// Ties keep insertion order (the sort is stable).
    pub fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<ScoredChunk>, IndexError> {
        if query.len() != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                got: query.len(),
            });
        }

        let mut scored: Vec<ScoredChunk> = self
            .entries
            .iter()
            .map(|entry| ScoredChunk {
                chunk: entry.chunk.clone(),
                score: cosine_similarity(query, &entry.vector),
            })
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        Ok(scored)
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of distinct source documents represented.
    pub fn document_count(&self) -> usize {
        let mut doc_ids: Vec<&str> = self.entries.iter().map(|e| e.chunk.doc_id.as_str()).collect();
        doc_ids.sort_unstable();
        doc_ids.dedup();
        doc_ids.len()
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }
}
