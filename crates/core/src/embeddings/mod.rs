pub mod batcher;
pub mod local;
pub mod remote;

pub use batcher::{validate_embedding, BatchOutcome, EmbeddingBatcher};
pub use local::{
    LocalModelProvider, CHARACTER_NGRAM_MODEL, DEFAULT_LOCAL_DIMENSION, DEFAULT_LOCAL_MODEL,
};
pub use remote::{RemoteApiProvider, DEFAULT_REMOTE_MODEL};

use crate::config::{EmbeddingBackend, IngestConfig};
use crate::error::IngestError;
use std::time::Duration;
use tracing::info;

pub trait EmbeddingProvider {
    fn dimension(&self) -> usize;

    fn model_name(&self) -> &str;

    /// Vectors line up with `texts`. A short result or an empty vector means
    /// no embedding for that input.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, IngestError>;
}

impl<P: EmbeddingProvider + ?Sized> EmbeddingProvider for Box<P> {
    fn dimension(&self) -> usize {
        (**self).dimension()
    }

    fn model_name(&self) -> &str {
        (**self).model_name()
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, IngestError> {
        (**self).embed_batch(texts)
    }
}

pub fn provider_from_config(
    config: &IngestConfig,
) -> Result<Box<dyn EmbeddingProvider>, IngestError> {
    let provider: Box<dyn EmbeddingProvider> = match config.embedding_backend {
        EmbeddingBackend::Local => Box::new(LocalModelProvider::load(
            config.model_for_backend(),
            config.embedding_dimension,
        )?),
        EmbeddingBackend::Remote => {
            let api_key = config.openai_api_key.clone().ok_or_else(|| {
                IngestError::Configuration(
                    "OPENAI_API_KEY is required for the remote embedding backend".to_string(),
                )
            })?;
            Box::new(RemoteApiProvider::new(
                &api_key,
                &config.openai_base_url,
                config
                    .model_for_backend()
                    .unwrap_or(DEFAULT_REMOTE_MODEL)
                    .to_string(),
                config.embedding_dimension,
                Duration::from_secs(config.embedding_timeout_secs),
                config.embedding_max_retries,
            )?)
        }
    };

    info!(
        model = provider.model_name(),
        dimension = provider.dimension(),
        "embedding provider ready"
    );
    Ok(provider)
}
