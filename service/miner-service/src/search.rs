//! Hybrid retrieval: vector and keyword candidates fetched separately,
//! min-max normalized within their own pools, then fused by weighted sum.

use std::collections::HashMap;

use corpus_model::ChunkRecord;
use corpus_store::{ScoredChunk, SqliteStore};
use embedding_provider::Embedder;
use serde::Serialize;
use tracing::{debug, warn};

use crate::ServiceError;

#[derive(Debug, Clone, Copy)]
pub struct FusionOptions {
    /// Weight of the normalized vector score; keyword gets `1 - vector_weight`.
    pub vector_weight: f32,
    /// Each source fetches `n_results * fetch_factor` candidates before fusion.
    pub fetch_factor: usize,
    /// Degrade hybrid search to keyword-only when the embedder fails.
    pub degrade_to_keyword: bool,
}

impl Default for FusionOptions {
    fn default() -> Self {
        Self { vector_weight: 0.7, fetch_factor: 10, degrade_to_keyword: false }
    }
}

/// One fused search hit, flattened for callers.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub chunk_id: String,
    pub content: String,
    pub title: String,
    pub url: String,
    pub domain: String,
    pub publish_date: Option<String>,
    pub tags: Vec<String>,
    pub chunk_index: u32,
    pub total_chunks: u32,
    pub relevance_score: f32,
}

impl SearchResult {
    fn from_chunk(chunk: ChunkRecord, relevance_score: f32) -> Self {
        Self {
            chunk_id: chunk.chunk_id.0,
            content: chunk.content,
            title: chunk.meta.title,
            url: chunk.meta.url,
            domain: chunk.meta.domain,
            publish_date: chunk.meta.publish_date,
            tags: chunk.meta.tags,
            chunk_index: chunk.chunk_index,
            total_chunks: chunk.total_chunks,
            relevance_score,
        }
    }
}

pub struct HybridSearchEngine<'a> {
    store: &'a SqliteStore,
    embedder: &'a dyn Embedder,
    opts: FusionOptions,
}

impl<'a> HybridSearchEngine<'a> {
    pub fn new(store: &'a SqliteStore, embedder: &'a dyn Embedder, opts: FusionOptions) -> Self {
        Self { store, embedder, opts }
    }

    /// Run a query. With `hybrid` false only the vector source is used;
    /// otherwise vector and keyword scores are fused. Empty queries are
    /// rejected; queries matching nothing return an empty list.
    pub fn search(
        &self,
        query: &str,
        n_results: usize,
        hybrid: bool,
    ) -> Result<Vec<SearchResult>, ServiceError> {
        if query.trim().is_empty() {
            return Err(ServiceError::InvalidQuery("query must not be empty".into()));
        }
        if n_results == 0 {
            return Ok(Vec::new());
        }
        let pool_k = n_results.saturating_mul(self.opts.fetch_factor).max(n_results);

        let mut degraded = false;
        let vector_hits: Vec<ScoredChunk> = match self.embedder.embed(query) {
            Ok(qvec) => self.store.vector_query(&qvec, pool_k)?,
            Err(e) if hybrid && self.opts.degrade_to_keyword => {
                warn!(error = %e, "embedder failed; degrading to keyword-only");
                degraded = true;
                Vec::new()
            }
            Err(e) => return Err(ServiceError::Embed(e.to_string())),
        };
        let keyword_hits: Vec<ScoredChunk> = if hybrid {
            self.store.keyword_query(query, pool_k)?
        } else {
            Vec::new()
        };

        let vector_norm = min_max_normalize(&vector_hits);
        let keyword_norm = min_max_normalize(&keyword_hits);

        // Dedup by chunk id; chunks seen by only one source score 0 on the other.
        let mut candidates: HashMap<String, ChunkRecord> = HashMap::new();
        for hit in vector_hits.into_iter().chain(keyword_hits.into_iter()) {
            candidates.entry(hit.chunk.chunk_id.as_str().to_string()).or_insert(hit.chunk);
        }

        let alpha = self.opts.vector_weight;
        let mut fused: Vec<SearchResult> = candidates
            .into_iter()
            .map(|(id, chunk)| {
                let v = vector_norm.get(&id).copied().unwrap_or(0.0);
                let k = keyword_norm.get(&id).copied().unwrap_or(0.0);
                let score = if degraded {
                    k
                } else if hybrid {
                    alpha * v + (1.0 - alpha) * k
                } else {
                    v
                };
                SearchResult::from_chunk(chunk, score)
            })
            .collect();

        fused.sort_by(|a, b| {
            b.relevance_score
                .partial_cmp(&a.relevance_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| cmp_dates_missing_last(&a.publish_date, &b.publish_date))
                .then_with(|| a.domain.cmp(&b.domain))
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        fused.truncate(n_results);
        debug!(query = query, hybrid = hybrid, results = fused.len(), "search complete");
        Ok(fused)
    }
}

/// Scale a candidate pool's scores onto [0, 1]. A pool whose scores are
/// all equal maps to 1.0 so single-hit pools keep full weight.
fn min_max_normalize(hits: &[ScoredChunk]) -> HashMap<String, f32> {
    let mut out = HashMap::with_capacity(hits.len());
    if hits.is_empty() {
        return out;
    }
    let mut min = f32::INFINITY;
    let mut max = f32::NEG_INFINITY;
    for h in hits {
        min = min.min(h.score);
        max = max.max(h.score);
    }
    let range = max - min;
    for h in hits {
        let norm = if range <= f32::EPSILON { 1.0 } else { (h.score - min) / range };
        out.insert(h.chunk.chunk_id.as_str().to_string(), norm);
    }
    out
}

/// Earlier dates sort first; chunks without a date sort after dated ones.
fn cmp_dates_missing_last(a: &Option<String>, b: &Option<String>) -> std::cmp::Ordering {
    match (a, b) {
        (Some(x), Some(y)) => x.cmp(y),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    }
}
