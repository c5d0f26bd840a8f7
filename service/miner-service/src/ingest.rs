//! Ingestion pipeline: normalize, chunk, embed, store. Documents are
//! fanned out to a fixed worker pool over a bounded queue; each document
//! succeeds or fails on its own.

use std::sync::mpsc;
use std::sync::{Arc, Mutex};

use corpus_model::{ChunkRecord, DocumentId, DocumentMeta};
use corpus_store::SqliteStore;
use embedding_provider::Embedder;
use serde::{Deserialize, Serialize};
use text_chunker::{chunk, normalize_text, ChunkParams};
use tracing::{info, warn};
use url::Url;

use crate::config::MinerConfig;
use crate::trends::parse_date_flexible;
use crate::{CancelToken, ServiceError};

/// A scraped page as it arrives from the crawler, before normalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawDocument {
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub publish_date: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub text: String,
}

#[derive(Debug)]
pub enum DocStatus {
    /// Number of chunks written for the document.
    Stored(usize),
    /// Normalized text fell below the minimum length.
    SkippedShort,
}

/// Per-document result emitted by the worker pool.
#[derive(Debug)]
pub struct IngestOutcome {
    pub url: String,
    pub result: Result<DocStatus, ServiceError>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub docs_ingested: u64,
    pub docs_skipped: u64,
    pub docs_failed: u64,
    pub docs_canceled: u64,
    pub chunks_stored: u64,
    /// (url, error) for each failed document.
    pub failures: Vec<(String, String)>,
}

/// Run the pool. The store must already exist at `cfg.db_path`; each
/// worker opens its own connection, so writes serialize through SQLite
/// while readers keep their WAL snapshots.
pub fn ingest_documents(
    cfg: &MinerConfig,
    embedder: Arc<dyn Embedder>,
    docs: Vec<RawDocument>,
    cancel: Option<CancelToken>,
) -> Result<IngestReport, ServiceError> {
    if docs.is_empty() {
        return Ok(IngestReport::default());
    }

    let (job_tx, job_rx) = mpsc::sync_channel::<RawDocument>(cfg.workers * 2);
    let job_rx = Arc::new(Mutex::new(job_rx));
    let (out_tx, out_rx) = mpsc::channel::<IngestOutcome>();

    let mut handles = Vec::with_capacity(cfg.workers);
    for _ in 0..cfg.workers {
        let job_rx = Arc::clone(&job_rx);
        let out_tx = out_tx.clone();
        let embedder = Arc::clone(&embedder);
        let cfg = cfg.clone();
        let cancel = cancel.clone();
        handles.push(std::thread::spawn(move || loop {
            let job = {
                let guard = match job_rx.lock() {
                    Ok(g) => g,
                    Err(_) => return,
                };
                guard.recv()
            };
            let Ok(doc) = job else { return };
            let url = doc.url.clone();
            let result = if cancel.as_ref().is_some_and(|c| c.is_canceled()) {
                Err(ServiceError::Canceled)
            } else {
                process_document(&cfg, embedder.as_ref(), doc)
            };
            if out_tx.send(IngestOutcome { url, result }).is_err() {
                return;
            }
        }));
    }
    drop(out_tx);

    let total = docs.len();
    for doc in docs {
        if cancel.as_ref().is_some_and(|c| c.is_canceled()) {
            break;
        }
        if job_tx.send(doc).is_err() {
            break;
        }
    }
    drop(job_tx);

    let mut report = IngestReport::default();
    for outcome in out_rx {
        match outcome.result {
            Ok(DocStatus::Stored(chunks)) => {
                report.docs_ingested += 1;
                report.chunks_stored += chunks as u64;
            }
            Ok(DocStatus::SkippedShort) => report.docs_skipped += 1,
            Err(ServiceError::Canceled) => report.docs_canceled += 1,
            Err(e) => {
                warn!(url = %outcome.url, error = %e, "document ingestion failed");
                report.docs_failed += 1;
                report.failures.push((outcome.url, e.to_string()));
            }
        }
    }
    for h in handles {
        let _ = h.join();
    }

    info!(
        total = total,
        ingested = report.docs_ingested,
        skipped = report.docs_skipped,
        failed = report.docs_failed,
        chunks = report.chunks_stored,
        "ingestion finished"
    );
    Ok(report)
}

/// Normalize one document and write its chunks in a single transaction.
fn process_document(
    cfg: &MinerConfig,
    embedder: &dyn Embedder,
    doc: RawDocument,
) -> Result<DocStatus, ServiceError> {
    let meta = normalize_document(&doc)?;
    let text = normalize_text(&doc.text);
    if text.chars().count() < cfg.min_chunk_chars {
        return Ok(DocStatus::SkippedShort);
    }

    let doc_id = DocumentId::new(meta.url.clone());
    let params = ChunkParams { chunk_size: cfg.chunk_size, overlap: cfg.chunk_overlap };
    let chunks = chunk(&doc_id, &text, &meta, params).map_err(|e| ServiceError::Chunk(e.to_string()))?;

    let texts: Vec<&str> = chunks.iter().map(|c| c.content.as_str()).collect();
    let vectors = embedder
        .embed_batch(&texts)
        .map_err(|e| ServiceError::Embed(e.to_string()))?;
    let items: Vec<(ChunkRecord, Vec<f32>)> = chunks.into_iter().zip(vectors).collect();

    let mut store = SqliteStore::open(&cfg.db_path)?;
    store.add_batch(&items)?;
    Ok(DocStatus::Stored(items.len()))
}

/// Derive canonical metadata from the raw document. The URL must parse;
/// its host becomes the domain with any `www.` prefix dropped. Tags are
/// lowercased and deduplicated, dates normalized to `YYYY-MM-DD`.
pub fn normalize_document(doc: &RawDocument) -> Result<DocumentMeta, ServiceError> {
    let url = doc.url.trim();
    let parsed = Url::parse(url)
        .map_err(|e| ServiceError::InvalidDocument(format!("bad url '{url}': {e}")))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| ServiceError::InvalidDocument(format!("url '{url}' has no host")))?;
    let domain = host.to_lowercase();
    let domain = domain.strip_prefix("www.").unwrap_or(&domain).to_string();

    let publish_date = doc
        .publish_date
        .as_deref()
        .and_then(parse_date_flexible)
        .map(|d| d.format("%Y-%m-%d").to_string());

    let mut tags: Vec<String> = Vec::new();
    for t in &doc.tags {
        let t = t.trim().to_lowercase();
        if !t.is_empty() && !tags.contains(&t) {
            tags.push(t);
        }
    }

    Ok(DocumentMeta {
        url: url.to_string(),
        domain,
        title: doc.title.trim().to_string(),
        publish_date,
        tags,
    })
}
