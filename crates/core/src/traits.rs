use crate::error::IngestError;
use crate::models::{CollectionSchema, CollectionStats, CollectionStatus, EmbeddedChunk, SearchHit};

// A failed `insert` fails the whole batch. `Connection` errors end the run;
// every other error is scoped to the call that raised it.
pub trait VectorStore {
    fn connect(&mut self) -> Result<(), IngestError>;

    /// Creates the collection if absent; a mismatching one is dropped and recreated.
    fn ensure_collection(
        &mut self,
        schema: &CollectionSchema,
    ) -> Result<CollectionStatus, IngestError>;

    /// `None` when no collection exists. Never drops or creates anything.
    fn collection_matches(&self, schema: &CollectionSchema) -> Result<Option<bool>, IngestError>;

    fn insert(&mut self, records: &[EmbeddedChunk]) -> Result<usize, IngestError>;

    fn search(&self, query_embedding: &[f32], top_k: usize)
        -> Result<Vec<SearchHit>, IngestError>;

    fn stats(&self) -> Result<CollectionStats, IngestError>;

    fn drop_collection(&mut self) -> Result<bool, IngestError>;

    fn close(&mut self);
}

impl<S: VectorStore + ?Sized> VectorStore for Box<S> {
    fn connect(&mut self) -> Result<(), IngestError> {
        (**self).connect()
    }

    fn ensure_collection(
        &mut self,
        schema: &CollectionSchema,
    ) -> Result<CollectionStatus, IngestError> {
        (**self).ensure_collection(schema)
    }

    fn collection_matches(&self, schema: &CollectionSchema) -> Result<Option<bool>, IngestError> {
        (**self).collection_matches(schema)
    }

    fn insert(&mut self, records: &[EmbeddedChunk]) -> Result<usize, IngestError> {
        (**self).insert(records)
    }

    fn search(
        &self,
        query_embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<SearchHit>, IngestError> {
        (**self).search(query_embedding, top_k)
    }

    fn stats(&self) -> Result<CollectionStats, IngestError> {
        (**self).stats()
    }

    fn drop_collection(&mut self) -> Result<bool, IngestError> {
        (**self).drop_collection()
    }

    fn close(&mut self) {
        (**self).close()
    }
}
