use crate::error::IngestError;
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::Path;

pub const DEFAULT_CONFIG_FILE: &str = "ingest";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkUnit {
    Words,
    Characters,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    #[serde(alias = "sentence-transformers", alias = "fastembed")]
    Local,
    #[serde(alias = "openai")]
    Remote,
}

// Flat keys, so the same names work in a file and as environment variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub max_text_length: usize,
    pub chunk_unit: ChunkUnit,
    pub chunk_separators: Vec<String>,

    pub batch_size: usize,
    pub embedding_batch_size: usize,
    pub memory_log_interval: usize,

    pub embedding_backend: EmbeddingBackend,
    /// Shorthand for `embedding_backend = "remote"`.
    pub use_openai_embeddings: bool,
    pub embedding_model: Option<String>,
    pub embedding_dimension: Option<usize>,
    pub openai_api_key: Option<String>,
    /// Remote model used when `embedding_model` is unset.
    pub openai_model: Option<String>,
    pub openai_base_url: String,
    pub embedding_timeout_secs: u64,
    pub embedding_max_retries: usize,

    pub milvus_host: String,
    pub milvus_port: u16,
    pub milvus_user: Option<String>,
    pub milvus_password: Option<String>,
    pub milvus_token: Option<String>,
    pub collection_name: String,
    pub index_type: String,
    pub metric_type: String,
    pub index_nlist: usize,
    pub nprobe: usize,
    pub store_timeout_secs: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1_000,
            chunk_overlap: 200,
            max_text_length: 8_192,
            chunk_unit: ChunkUnit::Words,
            chunk_separators: vec![". ".to_string(), " ".to_string()],
            batch_size: 100,
            embedding_batch_size: 50,
            memory_log_interval: 10,
            embedding_backend: EmbeddingBackend::Local,
            use_openai_embeddings: false,
            embedding_model: None,
            embedding_dimension: None,
            openai_api_key: None,
            openai_model: None,
            openai_base_url: "https://api.openai.com/v1".to_string(),
            embedding_timeout_secs: 60,
            embedding_max_retries: 3,
            milvus_host: "localhost".to_string(),
            milvus_port: 19_530,
            milvus_user: None,
            milvus_password: None,
            milvus_token: None,
            collection_name: "pdf_documents".to_string(),
            index_type: "IVF_FLAT".to_string(),
            metric_type: "COSINE".to_string(),
            index_nlist: 1_024,
            nprobe: 10,
            store_timeout_secs: 30,
        }
    }
}

impl IngestConfig {
    pub fn load(path: Option<&Path>) -> Result<Self, IngestError> {
        Self::load_with(path, Environment::default())
    }

    fn load_with(path: Option<&Path>, environment: Environment) -> Result<Self, IngestError> {
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let config = Config::builder()
            .add_source(file)
            .add_source(environment.try_parsing(true))
            .build()?;

        let mut loaded: Self = config.try_deserialize()?;
        if loaded.use_openai_embeddings {
            loaded.embedding_backend = EmbeddingBackend::Remote;
        }
        loaded.validate()?;
        Ok(loaded)
    }

    pub fn model_for_backend(&self) -> Option<&str> {
        let model = match self.embedding_backend {
            EmbeddingBackend::Local => self.embedding_model.as_deref(),
            EmbeddingBackend::Remote => self
                .embedding_model
                .as_deref()
                .or(self.openai_model.as_deref()),
        };
        model.map(str::trim).filter(|model| !model.is_empty())
    }

    pub fn validate(&self) -> Result<(), IngestError> {
        if self.chunk_size == 0 {
            return Err(IngestError::Configuration(
                "chunk_size must be greater than zero".to_string(),
            ));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(IngestError::Configuration(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if self.max_text_length == 0 {
            return Err(IngestError::Configuration(
                "max_text_length must be greater than zero".to_string(),
            ));
        }
        if self.batch_size == 0 || self.embedding_batch_size == 0 {
            return Err(IngestError::Configuration(format!(
                "batch sizes must be greater than zero (batch_size={}, embedding_batch_size={})",
                self.batch_size, self.embedding_batch_size
            )));
        }
        if self.chunk_unit == ChunkUnit::Characters
            && self.chunk_separators.iter().any(String::is_empty)
        {
            return Err(IngestError::Configuration(
                "chunk_separators may not contain empty strings".to_string(),
            ));
        }
        if self.embedding_dimension == Some(0) {
            return Err(IngestError::Configuration(
                "embedding_dimension must be greater than zero".to_string(),
            ));
        }
        if self.embedding_backend == EmbeddingBackend::Remote
            && self
                .openai_api_key
                .as_deref()
                .map_or(true, |key| key.trim().is_empty())
        {
            return Err(IngestError::Configuration(
                "OPENAI_API_KEY is required for the remote embedding backend".to_string(),
            ));
        }
        Ok(())
    }

    pub fn milvus_endpoint(&self) -> String {
        let host = self.milvus_host.trim_end_matches('/');
        if host.starts_with("http://") || host.starts_with("https://") {
            format!("{host}:{}", self.milvus_port)
        } else {
            format!("http://{host}:{}", self.milvus_port)
        }
    }
}
