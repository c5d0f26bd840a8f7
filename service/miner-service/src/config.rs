//! Service configuration merged from defaults, `miner.toml`, and
//! `MINER_*` environment variables (later sources win).

use std::path::PathBuf;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::ServiceError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MinerConfig {
    /// Path of the SQLite corpus database.
    pub db_path: PathBuf,
    pub embedding_dimension: usize,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    /// Documents whose normalized text is shorter than this are skipped.
    pub min_chunk_chars: usize,
    /// Weight of the vector score in hybrid fusion; keyword gets the rest.
    pub vector_weight: f32,
    /// Candidate pool multiplier per retrieval source.
    pub fetch_factor: usize,
    /// When true, a failing embedder degrades hybrid search to keyword-only
    /// instead of returning an error.
    pub degrade_to_keyword: bool,
    /// Ingestion worker threads.
    pub workers: usize,
    pub max_input_length: usize,
    pub embedding_model_id: String,
}

impl Default for MinerConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("target/data/corpus.db"),
            embedding_dimension: 384,
            chunk_size: 1000,
            chunk_overlap: 200,
            min_chunk_chars: 100,
            vector_weight: 0.7,
            fetch_factor: 10,
            degrade_to_keyword: false,
            workers: 4,
            max_input_length: 8192,
            embedding_model_id: "hash-seeded-v1".into(),
        }
    }
}

impl MinerConfig {
    pub fn load() -> Result<Self, ServiceError> {
        Self::load_from("miner.toml")
    }

    pub fn load_from(path: &str) -> Result<Self, ServiceError> {
        let cfg: MinerConfig = Figment::from(Serialized::defaults(MinerConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("MINER_"))
            .extract()
            .map_err(|e| ServiceError::Config(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ServiceError> {
        if self.embedding_dimension == 0 {
            return Err(ServiceError::Config("embedding_dimension must be non-zero".into()));
        }
        if self.chunk_size == 0 || self.chunk_overlap >= self.chunk_size {
            return Err(ServiceError::Config(format!(
                "chunk_overlap {} must be smaller than chunk_size {}",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if !(0.0..=1.0).contains(&self.vector_weight) {
            return Err(ServiceError::Config("vector_weight must be within [0, 1]".into()));
        }
        if self.workers == 0 {
            return Err(ServiceError::Config("workers must be at least 1".into()));
        }
        Ok(())
    }
}
