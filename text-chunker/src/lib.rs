//! Fixed-size overlapping chunker for normalized page text.
//!
//! Windows are measured in characters, not bytes, so multi-byte text
//! splits at character boundaries. Consecutive windows share `overlap`
//! characters; removing the first `overlap` characters of every chunk
//! after the first reconstructs the input exactly.

use corpus_model::{ChunkRecord, DocumentId, DocumentMeta};
use thiserror::Error;

#[derive(Debug, Clone, Copy)]
pub struct ChunkParams {
    /// Window size in characters.
    pub chunk_size: usize,
    /// Characters shared between consecutive windows.
    pub overlap: usize,
}

impl Default for ChunkParams {
    fn default() -> Self {
        Self { chunk_size: 1000, overlap: 200 }
    }
}

impl ChunkParams {
    pub fn validate(&self) -> Result<(), ChunkError> {
        if self.chunk_size == 0 || self.overlap >= self.chunk_size {
            return Err(ChunkError::InvalidParams {
                chunk_size: self.chunk_size,
                overlap: self.overlap,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChunkError {
    #[error("text is empty after normalization")]
    EmptyText,
    #[error("invalid chunk params: chunk_size={chunk_size}, overlap={overlap}")]
    InvalidParams { chunk_size: usize, overlap: usize },
}

/// Collapse whitespace runs to single spaces and drop control characters.
pub fn normalize_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_space = false;
    for ch in text.chars() {
        if ch.is_whitespace() {
            pending_space = true;
            continue;
        }
        if ch.is_control() {
            continue;
        }
        if pending_space && !out.is_empty() {
            out.push(' ');
        }
        pending_space = false;
        out.push(ch);
    }
    out
}

/// Split `text` into overlapping windows and stamp each with document
/// metadata and its position. Deterministic for identical inputs.
pub fn chunk(
    doc_id: &DocumentId,
    text: &str,
    meta: &DocumentMeta,
    params: ChunkParams,
) -> Result<Vec<ChunkRecord>, ChunkError> {
    params.validate()?;
    if text.trim().is_empty() {
        return Err(ChunkError::EmptyText);
    }

    // Byte offset of every character plus the end sentinel, so windows
    // expressed in characters slice at valid boundaries.
    let mut offsets: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
    offsets.push(text.len());
    let n_chars = offsets.len() - 1;

    let step = params.chunk_size - params.overlap;
    let mut pieces: Vec<(usize, usize)> = Vec::new();
    let mut start = 0usize;
    loop {
        let end = (start + params.chunk_size).min(n_chars);
        pieces.push((offsets[start], offsets[end]));
        if end == n_chars {
            break;
        }
        start += step;
    }

    let total = pieces.len() as u32;
    let records = pieces
        .into_iter()
        .enumerate()
        .map(|(i, (lo, hi))| {
            ChunkRecord::new(doc_id.clone(), i as u32, total, &text[lo..hi], meta.clone())
        })
        .collect();
    Ok(records)
}
