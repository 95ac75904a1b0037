pub mod chunking;
pub mod cleaner;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod memory;
pub mod models;
pub mod pipeline;
pub mod stores;
pub mod stream;
pub mod traits;

#[cfg(test)]
mod test_support;

pub use chunking::{Chunker, ChunkingConfig, TextWindow};
pub use cleaner::TextCleaner;
pub use config::{ChunkUnit, EmbeddingBackend, IngestConfig};
pub use embeddings::{
    provider_from_config, validate_embedding, BatchOutcome, EmbeddingBatcher, EmbeddingProvider,
    LocalModelProvider, RemoteApiProvider, CHARACTER_NGRAM_MODEL, DEFAULT_LOCAL_MODEL,
};
pub use error::{IngestError, Result};
pub use extractor::{LopdfExtractor, PageSource, PdfExtractor, RawPage};
pub use models::{
    Chunk, CollectionSchema, CollectionStats, CollectionStatus, DocumentOutcome, DropReason,
    DroppedChunk, EmbeddedChunk, FieldSpec, FieldType, IngestStage, IngestionReport, Page,
    PageStats, SearchHit,
};
pub use pipeline::{
    digest_file, discover_pdf_files, BatchingConfig, IngestionPipeline, ProgressEvent,
    ProgressObserver, StorageStats,
};
pub use stores::{InMemoryStore, MilvusConfig, MilvusStore};
pub use stream::{PageStream, StreamOptions};
pub use traits::VectorStore;
