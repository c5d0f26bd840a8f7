//! Shared models used across crates

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable identifier for a source document (its normalized URL).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(pub String);

impl DocumentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Unique id for a chunk within a store, formed as `{doc_id}#{chunk_index}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChunkId(pub String);

impl ChunkId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn from_parts(doc_id: &DocumentId, chunk_index: u32) -> Self {
        Self(format!("{}#{}", doc_id.0, chunk_index))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ChunkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Source document metadata carried by every chunk of that document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMeta {
    /// Canonical URL of the source page.
    pub url: String,
    /// Host portion of the URL, lowercased.
    pub domain: String,
    /// Page title; may be empty when extraction found none.
    pub title: String,
    /// Publication date as ISO `YYYY-MM-DD`, when known.
    pub publish_date: Option<String>,
    /// Free-form topic tags attached at ingestion time.
    pub tags: Vec<String>,
}

impl DocumentMeta {
    pub fn new(url: impl Into<String>, domain: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            domain: domain.into(),
            title: title.into(),
            publish_date: None,
            tags: Vec::new(),
        }
    }
}

/// A single chunk of text derived from a source document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub chunk_id: ChunkId,
    pub doc_id: DocumentId,
    /// Zero-based position of this chunk within its document.
    pub chunk_index: u32,
    /// Number of chunks the document was split into.
    pub total_chunks: u32,
    /// Text content of the chunk.
    pub content: String,
    /// Source document metadata.
    pub meta: DocumentMeta,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("chunk content is empty")]
    EmptyContent,
    #[error("chunk_index {chunk_index} is out of range for total_chunks {total_chunks}")]
    IndexOutOfRange { chunk_index: u32, total_chunks: u32 },
    #[error("chunk_id '{0}' does not match doc_id and chunk_index")]
    IdMismatch(String),
}

impl ChunkRecord {
    pub fn new(
        doc_id: DocumentId,
        chunk_index: u32,
        total_chunks: u32,
        content: impl Into<String>,
        meta: DocumentMeta,
    ) -> Self {
        let chunk_id = ChunkId::from_parts(&doc_id, chunk_index);
        Self {
            chunk_id,
            doc_id,
            chunk_index,
            total_chunks,
            content: content.into(),
            meta,
        }
    }

    /// Structural checks applied before a chunk is persisted.
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.content.trim().is_empty() {
            return Err(ModelError::EmptyContent);
        }
        if self.chunk_index >= self.total_chunks {
            return Err(ModelError::IndexOutOfRange {
                chunk_index: self.chunk_index,
                total_chunks: self.total_chunks,
            });
        }
        let expected = ChunkId::from_parts(&self.doc_id, self.chunk_index);
        if self.chunk_id != expected {
            return Err(ModelError::IdMismatch(self.chunk_id.0.clone()));
        }
        Ok(())
    }
}
