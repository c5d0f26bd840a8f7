pub mod sqlite_store;

pub use sqlite_store::SqliteStore;

use corpus_model::{ChunkRecord, DocumentId};
use serde::Serialize;

/// A chunk paired with a retrieval score (larger is better).
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: ChunkRecord,
    pub score: f32,
}

/// One row per stored document, taken from its first chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentSummary {
    pub doc_id: DocumentId,
    pub domain: String,
    pub title: String,
    pub publish_date: Option<String>,
    pub tags: Vec<String>,
}

/// Corpus-level counters reported by `SqliteStore::stats`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoreStats {
    pub total_chunks: u64,
    pub total_documents: u64,
    pub unique_domains: u64,
    pub earliest_date: Option<String>,
    pub latest_date: Option<String>,
    pub embedding_dimension: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Record rejected before any mutation took place.
    #[error("invalid chunk: {0}")]
    Validation(String),
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    /// A chunk with this id already exists; the stored row is unchanged.
    #[error("duplicate chunk id: {0}")]
    DuplicateId(String),
    #[error("backend error: {0}")]
    Backend(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Backend(e.to_string())
    }
}
