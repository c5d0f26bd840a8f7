pub mod embedder;

pub use embedder::{Embedder, EmbedderError, EmbedderInfo, HashEmbedder, HashEmbedderConfig, ProviderKind};
