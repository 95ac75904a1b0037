use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DOCUMENT_ID_MAX_LENGTH: usize = 100;

/// One cleaned page of a source PDF. Dropped once it has been chunked.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub page_number: u32,
    pub text: String,
    pub width: f32,
    pub height: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: u64,
    pub document_id: String,
    pub page_number: u32,
    pub text: String,
    pub start_offset: usize,
    pub end_offset: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddedChunk {
    #[serde(flatten)]
    pub chunk: Chunk,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
    Int64,
    VarChar { max_length: usize },
    FloatVector { dimension: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub field_type: FieldType,
    pub primary_key: bool,
    pub auto_id: bool,
}

impl FieldSpec {
    fn new(name: &str, field_type: FieldType) -> Self {
        Self {
            name: name.to_string(),
            field_type,
            primary_key: false,
            auto_id: false,
        }
    }
}

/// Field layout of the chunk collection, in storage order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionSchema {
    pub fields: Vec<FieldSpec>,
    pub description: String,
}

impl CollectionSchema {
    pub fn for_chunks(dimension: usize, max_text_length: usize) -> Self {
        let mut id = FieldSpec::new("id", FieldType::Int64);
        id.primary_key = true;
        id.auto_id = true;

        Self {
            fields: vec![
                id,
                FieldSpec::new(
                    "document_id",
                    FieldType::VarChar {
                        max_length: DOCUMENT_ID_MAX_LENGTH,
                    },
                ),
                FieldSpec::new("page_number", FieldType::Int64),
                FieldSpec::new("chunk_id", FieldType::Int64),
                FieldSpec::new(
                    "text",
                    FieldType::VarChar {
                        max_length: max_text_length,
                    },
                ),
                FieldSpec::new("embedding", FieldType::FloatVector { dimension }),
            ],
            description: "PDF document chunks with embeddings".to_string(),
        }
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|field| field.name.as_str()).collect()
    }

    pub fn vector_dimension(&self) -> Option<usize> {
        self.fields.iter().find_map(|field| match field.field_type {
            FieldType::FloatVector { dimension } => Some(dimension),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionStatus {
    Created,
    Verified,
    Recreated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub document_id: String,
    pub page_number: u32,
    pub chunk_id: u64,
    pub text: String,
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionStats {
    pub row_count: u64,
    pub collection_name: String,
}

/// Per-document lifecycle. `Error` absorbs from any stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IngestStage {
    NotStarted,
    Extracting,
    Chunking,
    Embedding,
    Storing,
    Done,
    Error,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageStats {
    pub total: usize,
    pub yielded: usize,
    pub blank: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DropReason {
    EmbeddingFailed,
    MissingEmbedding,
    InvalidEmbedding,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DroppedChunk {
    pub chunk_id: u64,
    pub page_number: u32,
    pub reason: DropReason,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionReport {
    pub document_id: String,
    pub source_path: String,
    pub checksum: String,
    pub pages: PageStats,
    pub chunks_generated: usize,
    pub chunks_stored: usize,
    pub chunks_dropped_embedding: usize,
    pub chunks_dropped_validation: usize,
    pub chunks_failed_storage: usize,
    pub batches_flushed: usize,
    pub stage: IngestStage,
    pub failure: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl IngestionReport {
    pub fn succeeded(&self) -> bool {
        self.chunks_stored > 0
    }

    pub fn success_rate(&self) -> f64 {
        if self.chunks_generated == 0 {
            0.0
        } else {
            self.chunks_stored as f64 / self.chunks_generated as f64
        }
    }

    pub fn elapsed(&self) -> Duration {
        (self.finished_at - self.started_at)
            .to_std()
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentOutcome {
    pub document_id: String,
    pub success: bool,
    pub processing_time: Duration,
    pub report: Option<IngestionReport>,
    pub error: Option<String>,
}
