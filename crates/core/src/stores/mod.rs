pub mod in_memory;
pub mod milvus;

pub use in_memory::InMemoryStore;
pub use milvus::{MilvusConfig, MilvusStore};
