use super::EmbeddingProvider;
use crate::error::IngestError;
use crate::models::{Chunk, DropReason, DroppedChunk, EmbeddedChunk};
use tracing::{debug, warn};

#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub embedded: Vec<EmbeddedChunk>,
    pub dropped: Vec<DroppedChunk>,
}

impl BatchOutcome {
    pub fn dropped_for(&self, reason: DropReason) -> usize {
        self.dropped
            .iter()
            .filter(|dropped| dropped.reason == reason)
            .count()
    }

    fn drop_chunk(&mut self, chunk: &Chunk, reason: DropReason) {
        self.dropped.push(DroppedChunk {
            chunk_id: chunk.chunk_id,
            page_number: chunk.page_number,
            reason,
        });
    }
}

pub fn validate_embedding(embedding: &[f32], dimension: usize) -> Result<(), IngestError> {
    if embedding.is_empty() {
        return Err(IngestError::Validation("embedding is empty".to_string()));
    }
    if let Some(position) = embedding.iter().position(|value| !value.is_finite()) {
        return Err(IngestError::Validation(format!(
            "embedding value at {position} is not a finite number"
        )));
    }
    if embedding.len() != dimension {
        return Err(IngestError::Validation(format!(
            "embedding dimension {} != {}",
            embedding.len(),
            dimension
        )));
    }
    Ok(())
}

pub struct EmbeddingBatcher<P: EmbeddingProvider> {
    provider: P,
    batch_size: usize,
    batches_sent: usize,
}

impl<P: EmbeddingProvider> EmbeddingBatcher<P> {
    pub fn new(provider: P, batch_size: usize) -> Result<Self, IngestError> {
        if batch_size == 0 {
            return Err(IngestError::Configuration(
                "embedding batch size must be greater than zero".to_string(),
            ));
        }
        Ok(Self {
            provider,
            batch_size,
            batches_sent: 0,
        })
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    // Every chunk ends up either embedded or in `dropped`.
    pub fn embed_chunks(&mut self, chunks: Vec<Chunk>) -> BatchOutcome {
        let dimension = self.provider.dimension();
        let mut outcome = BatchOutcome {
            embedded: Vec::with_capacity(chunks.len()),
            dropped: Vec::new(),
        };

        let mut pending = chunks.into_iter().peekable();
        while pending.peek().is_some() {
            let batch: Vec<Chunk> = pending.by_ref().take(self.batch_size).collect();
            let batch_index = self.batches_sent;
            self.batches_sent += 1;

            let vectors = {
                let texts: Vec<&str> = batch.iter().map(|chunk| chunk.text.as_str()).collect();
                self.provider.embed_batch(&texts)
            };

            let vectors = match vectors {
                Ok(vectors) => vectors,
                Err(error) => {
                    warn!(
                        batch_index,
                        chunk_count = batch.len(),
                        %error,
                        "embedding batch failed, dropping its chunks"
                    );
                    for chunk in &batch {
                        outcome.drop_chunk(chunk, DropReason::EmbeddingFailed);
                    }
                    continue;
                }
            };

            if vectors.len() < batch.len() {
                warn!(
                    batch_index,
                    requested = batch.len(),
                    received = vectors.len(),
                    "embedding provider returned fewer vectors than requested"
                );
            } else if vectors.len() > batch.len() {
                warn!(
                    batch_index,
                    requested = batch.len(),
                    received = vectors.len(),
                    "ignoring surplus embedding vectors"
                );
            }

            let mut vectors = vectors.into_iter();
            for chunk in batch {
                let Some(embedding) = vectors.next().filter(|vector| !vector.is_empty()) else {
                    warn!(
                        chunk_id = chunk.chunk_id,
                        page_number = chunk.page_number,
                        document_id = %chunk.document_id,
                        "missing embedding for chunk"
                    );
                    outcome.drop_chunk(&chunk, DropReason::MissingEmbedding);
                    continue;
                };

                match validate_embedding(&embedding, dimension) {
                    Ok(()) => outcome.embedded.push(EmbeddedChunk { chunk, embedding }),
                    Err(error) => {
                        warn!(
                            chunk_id = chunk.chunk_id,
                            page_number = chunk.page_number,
                            document_id = %chunk.document_id,
                            %error,
                            "dropping chunk with invalid embedding"
                        );
                        outcome.drop_chunk(&chunk, DropReason::InvalidEmbedding);
                    }
                }
            }

            debug!(batch_index, embedded = outcome.embedded.len(), "embedding batch done");
        }

        outcome
    }
}
