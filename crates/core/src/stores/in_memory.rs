use crate::error::IngestError;
use crate::models::{
    CollectionSchema, CollectionStats, CollectionStatus, EmbeddedChunk, SearchHit,
    DOCUMENT_ID_MAX_LENGTH,
};
use crate::traits::VectorStore;
use std::cmp::Ordering;
use std::collections::HashSet;
use tracing::{debug, warn};

const BACKEND: &str = "memory";

#[derive(Debug)]
pub struct InMemoryStore {
    collection_name: String,
    connected: bool,
    schema: Option<CollectionSchema>,
    rows: Vec<EmbeddedChunk>,
    failing_inserts: HashSet<usize>,
    insert_calls: usize,
}

impl InMemoryStore {
    pub fn new(collection_name: impl Into<String>) -> Self {
        Self {
            collection_name: collection_name.into(),
            connected: false,
            schema: None,
            rows: Vec::new(),
            failing_inserts: HashSet::new(),
            insert_calls: 0,
        }
    }

    /// Makes the `call`-th insert (0-based) fail with a storage error.
    pub fn failing_insert(mut self, call: usize) -> Self {
        self.failing_inserts.insert(call);
        self
    }

    /// Starts from an existing collection, as if created by an earlier run.
    pub fn with_schema(mut self, schema: CollectionSchema) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn schema(&self) -> Option<&CollectionSchema> {
        self.schema.as_ref()
    }

    pub fn rows(&self) -> &[EmbeddedChunk] {
        &self.rows
    }

    fn require_connection(&self) -> Result<(), IngestError> {
        if self.connected {
            Ok(())
        } else {
            Err(IngestError::Connection(
                "in-memory store used before connect()".to_string(),
            ))
        }
    }
}

fn cosine_similarity(left: &[f32], right: &[f32]) -> f32 {
    if left.len() != right.len() {
        return 0.0;
    }
    let dot: f32 = left.iter().zip(right).map(|(a, b)| a * b).sum();
    let left_norm = left.iter().map(|v| v * v).sum::<f32>().sqrt();
    let right_norm = right.iter().map(|v| v * v).sum::<f32>().sqrt();
    if left_norm == 0.0 || right_norm == 0.0 {
        0.0
    } else {
        dot / (left_norm * right_norm)
    }
}

impl VectorStore for InMemoryStore {
    fn connect(&mut self) -> Result<(), IngestError> {
        self.connected = true;
        Ok(())
    }

    fn ensure_collection(
        &mut self,
        schema: &CollectionSchema,
    ) -> Result<CollectionStatus, IngestError> {
        self.require_connection()?;
        let status = match &self.schema {
            None => CollectionStatus::Created,
            Some(existing) if existing == schema => CollectionStatus::Verified,
            Some(existing) => {
                warn!(
                    collection = %self.collection_name,
                    expected = ?schema.field_names(),
                    found = ?existing.field_names(),
                    "collection schema mismatch, dropping and recreating"
                );
                self.rows.clear();
                CollectionStatus::Recreated
            }
        };
        self.schema = Some(schema.clone());
        Ok(status)
    }

    fn collection_matches(&self, schema: &CollectionSchema) -> Result<Option<bool>, IngestError> {
        self.require_connection()?;
        Ok(self.schema.as_ref().map(|existing| existing == schema))
    }

    fn insert(&mut self, records: &[EmbeddedChunk]) -> Result<usize, IngestError> {
        self.require_connection()?;
        let call = self.insert_calls;
        self.insert_calls += 1;

        let Some(schema) = &self.schema else {
            return Err(IngestError::storage(BACKEND, "collection not initialized"));
        };
        if self.failing_inserts.contains(&call) {
            return Err(IngestError::storage(BACKEND, format!("insert {call} rejected")));
        }

        let dimension = schema.vector_dimension();
        if let Some(bad) = records
            .iter()
            .find(|record| Some(record.embedding.len()) != dimension)
        {
            return Err(IngestError::storage(
                BACKEND,
                format!(
                    "chunk {} has dimension {}, collection expects {:?}",
                    bad.chunk.chunk_id,
                    bad.embedding.len(),
                    dimension
                ),
            ));
        }

        self.rows.extend(records.iter().cloned().map(|mut record| {
            let document_id = &mut record.chunk.document_id;
            if let Some((cut, _)) = document_id.char_indices().nth(DOCUMENT_ID_MAX_LENGTH) {
                document_id.truncate(cut);
            }
            record
        }));
        debug!(inserted = records.len(), total = self.rows.len(), "stored rows in memory");
        Ok(records.len())
    }

    fn search(
        &self,
        query_embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<SearchHit>, IngestError> {
        self.require_connection()?;
        let mut hits: Vec<SearchHit> = self
            .rows
            .iter()
            .map(|row| SearchHit {
                document_id: row.chunk.document_id.clone(),
                page_number: row.chunk.page_number,
                chunk_id: row.chunk.chunk_id,
                text: row.chunk.text.clone(),
                score: cosine_similarity(query_embedding, &row.embedding),
            })
            .collect();
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        hits.truncate(top_k);
        Ok(hits)
    }

    fn stats(&self) -> Result<CollectionStats, IngestError> {
        self.require_connection()?;
        Ok(CollectionStats {
            row_count: self.rows.len() as u64,
            collection_name: self.collection_name.clone(),
        })
    }

    fn drop_collection(&mut self) -> Result<bool, IngestError> {
        self.require_connection()?;
        self.rows.clear();
        Ok(self.schema.take().is_some())
    }

    fn close(&mut self) {
        self.connected = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chunk, FieldSpec, FieldType};

    fn record(chunk_id: u64, embedding: Vec<f32>) -> EmbeddedChunk {
        EmbeddedChunk {
            chunk: Chunk {
                chunk_id,
                document_id: "doc".to_string(),
                page_number: 1,
                text: format!("chunk {chunk_id}"),
                start_offset: 0,
                end_offset: 2,
            },
            embedding,
        }
    }

    fn connected(store: InMemoryStore) -> InMemoryStore {
        let mut store = store;
        store.connect().unwrap();
        store
    }

    #[test]
    fn schema_mismatch_drops_and_recreates() -> Result<(), IngestError> {
        let legacy = CollectionSchema {
            fields: vec![
                FieldSpec {
                    name: "id".to_string(),
                    field_type: FieldType::Int64,
                    primary_key: true,
                    auto_id: true,
                },
                FieldSpec {
                    name: "vector".to_string(),
                    field_type: FieldType::FloatVector { dimension: 2 },
                    primary_key: false,
                    auto_id: false,
                },
            ],
            description: "old layout".to_string(),
        };
        let mut store = connected(InMemoryStore::new("pdf_documents").with_schema(legacy));
        store.insert(&[record(0, vec![1.0, 0.0])])?;

        let expected = CollectionSchema::for_chunks(3, 8_192);
        let status = store.ensure_collection(&expected)?;

        assert_eq!(status, CollectionStatus::Recreated);
        assert_eq!(store.schema().map(|s| s.field_names()), Some(expected.field_names()));
        assert_eq!(store.stats()?.row_count, 0);
        assert_eq!(store.ensure_collection(&expected)?, CollectionStatus::Verified);
        Ok(())
    }

    #[test]
    fn search_ranks_by_cosine_similarity() -> Result<(), IngestError> {
        let mut store = connected(InMemoryStore::new("pdf_documents"));
        store.ensure_collection(&CollectionSchema::for_chunks(2, 100))?;
        store.insert(&[
            record(0, vec![0.0, 1.0]),
            record(1, vec![1.0, 0.1]),
            record(2, vec![0.7, 0.7]),
        ])?;

        let hits = store.search(&[1.0, 0.0], 2)?;
        let ids: Vec<u64> = hits.iter().map(|hit| hit.chunk_id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert!(hits[0].score > hits[1].score);
        Ok(())
    }

    #[test]
    fn injected_insert_failure_is_a_storage_error() -> Result<(), IngestError> {
        let mut store = connected(InMemoryStore::new("pdf_documents").failing_insert(0));
        store.ensure_collection(&CollectionSchema::for_chunks(2, 100))?;

        let first = store.insert(&[record(0, vec![1.0, 0.0])]);
        assert!(matches!(first, Err(IngestError::Storage { .. })));
        assert_eq!(store.insert(&[record(1, vec![1.0, 0.0])])?, 1);
        assert_eq!(store.stats()?.row_count, 1);
        Ok(())
    }

    #[test]
    fn use_before_connect_is_rejected() {
        let store = InMemoryStore::new("pdf_documents");
        assert!(matches!(store.stats(), Err(IngestError::Connection(_))));
    }

    #[test]
    fn drop_reports_whether_a_collection_existed() -> Result<(), IngestError> {
        let mut store = connected(InMemoryStore::new("pdf_documents"));
        assert!(!store.drop_collection()?);
        store.ensure_collection(&CollectionSchema::for_chunks(2, 100))?;
        assert!(store.drop_collection()?);
        Ok(())
    }
}
