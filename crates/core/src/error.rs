use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("failed to open pdf {path}: {details}")]
    PdfOpen { path: String, details: String },

    #[error("extraction failed on page {page}: {details}")]
    Extraction { page: u32, details: String },

    #[error("embedding error: {0}")]
    Embedding(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("storage error from {backend}: {details}")]
    Storage { backend: String, details: String },

    #[error("cannot reach vector store: {0}")]
    Connection(String),

    #[error("regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl IngestError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration(_) | Self::Connection(_))
    }

    pub(crate) fn storage(backend: &str, details: impl Into<String>) -> Self {
        Self::Storage {
            backend: backend.to_string(),
            details: details.into(),
        }
    }
}

impl From<config::ConfigError> for IngestError {
    fn from(value: config::ConfigError) -> Self {
        Self::Configuration(value.to_string())
    }
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
