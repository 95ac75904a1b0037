use crate::chunking::{Chunker, ChunkingConfig};
use crate::config::IngestConfig;
use crate::embeddings::{validate_embedding, EmbeddingBatcher, EmbeddingProvider};
use crate::error::IngestError;
use crate::extractor::PdfExtractor;
use crate::models::{
    Chunk, CollectionSchema, CollectionStats, CollectionStatus, DocumentOutcome, DropReason,
    IngestStage, IngestionReport, PageStats, SearchHit, DOCUMENT_ID_MAX_LENGTH,
};
use crate::stream::StreamOptions;
use crate::traits::VectorStore;
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchingConfig {
    pub batch_size: usize,
    pub embedding_batch_size: usize,
}

impl From<&IngestConfig> for BatchingConfig {
    fn from(value: &IngestConfig) -> Self {
        Self {
            batch_size: value.batch_size,
            embedding_batch_size: value.embedding_batch_size,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProgressEvent<'a> {
    PageProcessed {
        document_id: &'a str,
        page_number: u32,
        chunks: usize,
    },
    BatchFlushed {
        document_id: &'a str,
        batch_index: usize,
        stored: usize,
        dropped: usize,
        failed: usize,
    },
}

pub type ProgressObserver = Box<dyn FnMut(&ProgressEvent<'_>)>;

#[derive(Debug, Clone, PartialEq)]
pub struct StorageStats {
    pub collection: CollectionStats,
    pub embedding_model: String,
    pub embedding_dimension: usize,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub batch_size: usize,
    pub embedding_batch_size: usize,
}

/// Drives pages through chunking, embedding, and storage in bounded batches.
pub struct IngestionPipeline<X, P, S>
where
    X: PdfExtractor,
    P: EmbeddingProvider,
    S: VectorStore,
{
    extractor: X,
    chunker: Chunker,
    batcher: EmbeddingBatcher<P>,
    store: S,
    batching: BatchingConfig,
    stream_options: StreamOptions,
    progress: Option<ProgressObserver>,
}

impl<X, P, S> IngestionPipeline<X, P, S>
where
    X: PdfExtractor,
    P: EmbeddingProvider,
    S: VectorStore,
{
    pub fn new(
        config: &IngestConfig,
        extractor: X,
        provider: P,
        store: S,
    ) -> Result<Self, IngestError> {
        config.validate()?;
        let batching = BatchingConfig::from(config);

        Ok(Self {
            extractor,
            chunker: Chunker::new(ChunkingConfig::from(config))?,
            batcher: EmbeddingBatcher::new(provider, batching.embedding_batch_size)?,
            store,
            batching,
            stream_options: StreamOptions::from(config),
            progress: None,
        })
    }

    pub fn with_progress(mut self, observer: ProgressObserver) -> Self {
        self.progress = Some(observer);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn schema(&self) -> CollectionSchema {
        CollectionSchema::for_chunks(
            self.batcher.provider().dimension(),
            self.chunker.config().max_text_length,
        )
    }

    pub fn connect(&mut self) -> Result<(), IngestError> {
        self.store.connect()
    }

    pub fn initialize(&mut self) -> Result<CollectionStatus, IngestError> {
        self.connect()?;
        let schema = self.schema();
        let status = self.store.ensure_collection(&schema)?;
        info!(
            status = ?status,
            dimension = self.batcher.provider().dimension(),
            model = self.batcher.provider().model_name(),
            "vector store ready"
        );
        Ok(status)
    }

    /// `Err` only when the document cannot be processed at all or the store
    /// is unusable; everything else is tallied into the report.
    pub fn ingest(
        &mut self,
        path: &Path,
        document_id: Option<&str>,
    ) -> Result<IngestionReport, IngestError> {
        if !path.is_file() {
            return Err(IngestError::NotFound(path.display().to_string()));
        }

        let document_id = resolve_document_id(document_id);
        let mut report = IngestionReport {
            document_id: document_id.clone(),
            source_path: path.display().to_string(),
            checksum: digest_file(path)?,
            pages: PageStats::default(),
            chunks_generated: 0,
            chunks_stored: 0,
            chunks_dropped_embedding: 0,
            chunks_dropped_validation: 0,
            chunks_failed_storage: 0,
            batches_flushed: 0,
            stage: IngestStage::NotStarted,
            failure: None,
            started_at: Utc::now(),
            finished_at: Utc::now(),
        };
        info!(document_id = %document_id, path = %path.display(), "ingesting document");

        enter(&mut report, IngestStage::Extracting);
        let mut pages = match self.extractor.pages(path, self.stream_options) {
            Ok(pages) => pages,
            Err(err) => {
                enter(&mut report, IngestStage::Error);
                error!(document_id = %document_id, error = %err, "cannot open document");
                return Err(err);
            }
        };

        let mut buffer: Vec<Chunk> = Vec::with_capacity(self.batching.batch_size);
        let mut next_chunk_id = 0u64;

        for page in pages.by_ref() {
            enter(&mut report, IngestStage::Chunking);
            let mut page_chunks = 0usize;

            for window in self.chunker.chunk(&page.text, next_chunk_id) {
                next_chunk_id = window.chunk_id + 1;
                page_chunks += 1;
                buffer.push(window.into_chunk(&document_id, page.page_number));

                if buffer.len() >= self.batching.batch_size {
                    let flushed = flush(
                        &mut self.batcher,
                        &mut self.store,
                        &mut self.progress,
                        &mut buffer,
                        &mut report,
                    );
                    if let Err(err) = flushed {
                        enter(&mut report, IngestStage::Error);
                        return Err(err);
                    }
                    enter(&mut report, IngestStage::Chunking);
                }
            }

            report.chunks_generated += page_chunks;
            if let Some(observer) = self.progress.as_mut() {
                observer(&ProgressEvent::PageProcessed {
                    document_id: &document_id,
                    page_number: page.page_number,
                    chunks: page_chunks,
                });
            }
            enter(&mut report, IngestStage::Extracting);
        }

        let flushed = flush(
            &mut self.batcher,
            &mut self.store,
            &mut self.progress,
            &mut buffer,
            &mut report,
        );
        if let Err(err) = flushed {
            enter(&mut report, IngestStage::Error);
            return Err(err);
        }

        report.pages = pages.stats();
        report.finished_at = Utc::now();
        if report.succeeded() {
            enter(&mut report, IngestStage::Done);
        } else {
            report.failure = Some(if report.chunks_generated == 0 {
                "no text could be extracted from the document".to_string()
            } else {
                "no chunks were stored".to_string()
            });
            enter(&mut report, IngestStage::Error);
        }

        info!(
            document_id = %document_id,
            pages = report.pages.total,
            pages_with_text = report.pages.yielded,
            chunks_generated = report.chunks_generated,
            chunks_stored = report.chunks_stored,
            success_rate = report.success_rate(),
            elapsed_ms = report.elapsed().as_millis() as u64,
            "document finished"
        );
        Ok(report)
    }

    // Keys are file names. Only fatal errors stop the run.
    pub fn ingest_directory(
        &mut self,
        directory: &Path,
    ) -> Result<BTreeMap<String, DocumentOutcome>, IngestError> {
        if !directory.is_dir() {
            return Err(IngestError::NotFound(directory.display().to_string()));
        }

        let files = discover_pdf_files(directory);
        if files.is_empty() {
            warn!(directory = %directory.display(), "no pdf files found");
        }

        let mut outcomes = BTreeMap::new();
        for path in files {
            let file_name = path
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_default();
            let document_id = path
                .file_stem()
                .map(|stem| stem.to_string_lossy().to_string())
                .unwrap_or_else(|| file_name.clone());

            let started = Instant::now();
            let outcome = match self.ingest(&path, Some(&document_id)) {
                Ok(report) => DocumentOutcome {
                    document_id: report.document_id.clone(),
                    success: report.succeeded(),
                    processing_time: started.elapsed(),
                    error: report.failure.clone(),
                    report: Some(report),
                },
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    warn!(file = %file_name, error = %err, "document failed, continuing");
                    DocumentOutcome {
                        document_id,
                        success: false,
                        processing_time: started.elapsed(),
                        report: None,
                        error: Some(err.to_string()),
                    }
                }
            };
            outcomes.insert(file_name, outcome);
        }

        let succeeded = outcomes.values().filter(|outcome| outcome.success).count();
        info!(
            directory = %directory.display(),
            documents = outcomes.len(),
            succeeded,
            failed = outcomes.len() - succeeded,
            "directory finished"
        );
        Ok(outcomes)
    }

    /// Connects without creating or migrating the collection. `Some(false)`
    /// means it was built with other embedding or text settings.
    pub fn attach(&mut self) -> Result<Option<bool>, IngestError> {
        self.connect()?;
        let matches = self.store.collection_matches(&self.schema())?;
        match matches {
            Some(true) => debug!("collection matches current settings"),
            Some(false) => warn!(
                model = self.batcher.provider().model_name(),
                dimension = self.batcher.provider().dimension(),
                "collection was built with different settings"
            ),
            None => info!("collection does not exist yet"),
        }
        Ok(matches)
    }

    pub fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchHit>, IngestError> {
        let provider = self.batcher.provider();
        let embedding = provider
            .embed_batch(&[query])?
            .into_iter()
            .next()
            .ok_or_else(|| IngestError::Embedding("no embedding returned for query".into()))?;
        validate_embedding(&embedding, provider.dimension())?;
        self.store.search(&embedding, top_k)
    }

    pub fn storage_stats(&self) -> Result<StorageStats, IngestError> {
        let chunking = self.chunker.config();
        Ok(StorageStats {
            collection: self.store.stats()?,
            embedding_model: self.batcher.provider().model_name().to_string(),
            embedding_dimension: self.batcher.provider().dimension(),
            chunk_size: chunking.chunk_size,
            chunk_overlap: chunking.overlap,
            batch_size: self.batching.batch_size,
            embedding_batch_size: self.batching.embedding_batch_size,
        })
    }

    pub fn clear(&mut self) -> Result<bool, IngestError> {
        let dropped = self.store.drop_collection()?;
        if dropped {
            info!("collection cleared");
        } else {
            info!("no collection to clear");
        }
        Ok(dropped)
    }

    pub fn close(&mut self) {
        self.store.close();
    }
}

fn flush<P: EmbeddingProvider, S: VectorStore>(
    batcher: &mut EmbeddingBatcher<P>,
    store: &mut S,
    progress: &mut Option<ProgressObserver>,
    buffer: &mut Vec<Chunk>,
    report: &mut IngestionReport,
) -> Result<(), IngestError> {
    if buffer.is_empty() {
        return Ok(());
    }

    let batch_index = report.batches_flushed;
    report.batches_flushed += 1;

    enter(report, IngestStage::Embedding);
    let outcome = batcher.embed_chunks(std::mem::take(buffer));
    let dropped_embedding = outcome.dropped_for(DropReason::EmbeddingFailed)
        + outcome.dropped_for(DropReason::MissingEmbedding);
    let dropped_validation = outcome.dropped_for(DropReason::InvalidEmbedding);
    report.chunks_dropped_embedding += dropped_embedding;
    report.chunks_dropped_validation += dropped_validation;

    enter(report, IngestStage::Storing);
    let records = outcome.embedded;
    let (stored, failed) = if records.is_empty() {
        (0, 0)
    } else {
        match store.insert(&records) {
            Ok(inserted) => {
                let stored = inserted.min(records.len());
                (stored, records.len() - stored)
            }
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => {
                warn!(
                    document_id = %report.document_id,
                    batch_index,
                    chunk_count = records.len(),
                    error = %err,
                    "batch insert failed"
                );
                (0, records.len())
            }
        }
    };
    report.chunks_stored += stored;
    report.chunks_failed_storage += failed;

    debug!(
        document_id = %report.document_id,
        batch_index,
        stored,
        dropped = dropped_embedding + dropped_validation,
        failed,
        "batch flushed"
    );
    if let Some(observer) = progress.as_mut() {
        observer(&ProgressEvent::BatchFlushed {
            document_id: &report.document_id,
            batch_index,
            stored,
            dropped: dropped_embedding + dropped_validation,
            failed,
        });
    }
    Ok(())
}

fn enter(report: &mut IngestionReport, stage: IngestStage) {
    if report.stage != stage {
        debug!(document_id = %report.document_id, from = ?report.stage, to = ?stage, "stage");
        report.stage = stage;
    }
}

fn resolve_document_id(supplied: Option<&str>) -> String {
    let mut document_id = supplied
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    if let Some((cut, _)) = document_id.char_indices().nth(DOCUMENT_ID_MAX_LENGTH) {
        document_id.truncate(cut);
    }
    document_id
}

pub fn discover_pdf_files(directory: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(directory)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .path()
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
        })
        .map(|entry| entry.into_path())
        .collect();

    files.sort_unstable();
    files
}

pub fn digest_file(path: &Path) -> Result<String, IngestError> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}
