//! Retrieval and analytics service over the chunk corpus: hybrid
//! search, publication trends, and the ingestion worker pool.

pub mod config;
pub mod ingest;
pub mod search;
pub mod trends;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use corpus_store::{SqliteStore, StoreError, StoreStats};
use embedding_provider::{Embedder, HashEmbedder, HashEmbedderConfig};
use tracing::info;

pub use config::MinerConfig;
pub use ingest::{IngestReport, RawDocument};
pub use search::{FusionOptions, HybridSearchEngine, SearchResult};
pub use trends::{CooccurrencePair, Granularity, TrendAnalyzer, TrendQuery, TrendReport};

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("invalid query: {0}")]
    InvalidQuery(String),
    #[error("invalid document: {0}")]
    InvalidDocument(String),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("embedder error: {0}")]
    Embed(String),
    #[error("chunking error: {0}")]
    Chunk(String),
    #[error("config error: {0}")]
    Config(String),
    #[error("io error: {0}")]
    Io(String),
    #[error("canceled")]
    Canceled,
}

/// Cooperative cancellation handle shared across long-running operations.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Facade owning the configuration and the embedder. The store is opened
/// per operation, so concurrent readers each get their own WAL snapshot
/// while SQLite serializes the writers.
pub struct MinerService {
    cfg: MinerConfig,
    embedder: Arc<dyn Embedder>,
}

impl MinerService {
    pub fn new(cfg: MinerConfig, embedder: Arc<dyn Embedder>) -> Result<Self, ServiceError> {
        cfg.validate()?;
        if let Some(dir) = cfg.db_path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| ServiceError::Io(e.to_string()))?;
        }
        // Fix the store's dimension up front so every later open agrees.
        drop(SqliteStore::create(&cfg.db_path, cfg.embedding_dimension)?);
        info!(db = %cfg.db_path.display(), dimension = cfg.embedding_dimension, "service ready");
        Ok(Self { cfg, embedder })
    }

    /// Build the service with the hash-seeded embedder from config.
    pub fn from_config(cfg: MinerConfig) -> Result<Self, ServiceError> {
        let embedder = HashEmbedder::new(HashEmbedderConfig {
            dimension: cfg.embedding_dimension,
            max_input_length: cfg.max_input_length,
            embedding_model_id: cfg.embedding_model_id.clone(),
            ..HashEmbedderConfig::default()
        })
        .map_err(|e| ServiceError::Embed(e.to_string()))?;
        Self::new(cfg, Arc::new(embedder))
    }

    pub fn config(&self) -> &MinerConfig {
        &self.cfg
    }

    fn open_store(&self) -> Result<SqliteStore, ServiceError> {
        Ok(SqliteStore::open(&self.cfg.db_path)?)
    }

    pub fn search(
        &self,
        query: &str,
        n_results: usize,
        hybrid: bool,
    ) -> Result<Vec<SearchResult>, ServiceError> {
        let store = self.open_store()?;
        let opts = FusionOptions {
            vector_weight: self.cfg.vector_weight,
            fetch_factor: self.cfg.fetch_factor,
            degrade_to_keyword: self.cfg.degrade_to_keyword,
        };
        HybridSearchEngine::new(&store, self.embedder.as_ref(), opts).search(query, n_results, hybrid)
    }

    pub fn trends(&self, query: &TrendQuery) -> Result<TrendReport, ServiceError> {
        let store = self.open_store()?;
        TrendAnalyzer::new(&store).compute_trends(query)
    }

    pub fn cooccurrence(&self, min_count: u64) -> Result<Vec<CooccurrencePair>, ServiceError> {
        let store = self.open_store()?;
        TrendAnalyzer::new(&store).compute_cooccurrence(min_count)
    }

    pub fn ingest(
        &self,
        docs: Vec<RawDocument>,
        cancel: Option<CancelToken>,
    ) -> Result<IngestReport, ServiceError> {
        ingest::ingest_documents(&self.cfg, Arc::clone(&self.embedder), docs, cancel)
    }

    pub fn stats(&self) -> Result<StoreStats, ServiceError> {
        Ok(self.open_store()?.stats()?)
    }

    /// Drop every stored chunk; the store keeps its dimension marker.
    pub fn reset(&self) -> Result<usize, ServiceError> {
        let mut store = self.open_store()?;
        Ok(store.reset()?)
    }
}
