use crate::config::IngestConfig;
use crate::error::IngestError;
use crate::models::{
    CollectionSchema, CollectionStats, CollectionStatus, EmbeddedChunk, FieldType, SearchHit,
    DOCUMENT_ID_MAX_LENGTH,
};
use crate::traits::VectorStore;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info, warn};

const BACKEND: &str = "milvus";
const OUTPUT_FIELDS: [&str; 4] = ["document_id", "page_number", "chunk_id", "text"];

#[derive(Debug, Clone)]
pub struct MilvusConfig {
    pub endpoint: String,
    pub collection_name: String,
    pub user: Option<String>,
    pub password: Option<String>,
    pub token: Option<String>,
    pub index_type: String,
    pub metric_type: String,
    pub nlist: usize,
    pub nprobe: usize,
    pub max_text_length: usize,
    pub timeout: Duration,
}

impl From<&IngestConfig> for MilvusConfig {
    fn from(value: &IngestConfig) -> Self {
        Self {
            endpoint: value.milvus_endpoint(),
            collection_name: value.collection_name.clone(),
            user: value.milvus_user.clone(),
            password: value.milvus_password.clone(),
            token: value.milvus_token.clone(),
            index_type: value.index_type.clone(),
            metric_type: value.metric_type.clone(),
            nlist: value.index_nlist,
            nprobe: value.nprobe,
            max_text_length: value.max_text_length,
            timeout: Duration::from_secs(value.store_timeout_secs),
        }
    }
}

impl MilvusConfig {
    fn credential(&self) -> Option<String> {
        if let Some(token) = self.token.as_deref().filter(|token| !token.is_empty()) {
            return Some(token.to_string());
        }
        match (self.user.as_deref(), self.password.as_deref()) {
            (Some(user), Some(password)) if !user.is_empty() => Some(format!("{user}:{password}")),
            _ => None,
        }
    }
}

pub struct MilvusStore {
    config: MilvusConfig,
    client: Client,
    connected: bool,
    schema: Option<CollectionSchema>,
}

impl MilvusStore {
    pub fn new(config: MilvusConfig) -> Result<Self, IngestError> {
        let mut headers = HeaderMap::new();
        if let Some(credential) = config.credential() {
            let value = HeaderValue::from_str(&format!("Bearer {credential}")).map_err(|_| {
                IngestError::Configuration("milvus credentials contain invalid characters".into())
            })?;
            headers.insert(AUTHORIZATION, value);
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            config,
            client,
            connected: false,
            schema: None,
        })
    }

    pub fn collection_name(&self) -> &str {
        &self.config.collection_name
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v2/vectordb/{path}", self.config.endpoint.trim_end_matches('/'))
    }

    /// Posts `body` and returns the `data` member of a successful reply.
    /// Transport failures are storage errors here; only `connect` turns them
    /// into connection errors.
    fn call(&self, path: &str, body: Value) -> Result<Value, IngestError> {
        let response = self
            .client
            .post(self.url(path))
            .json(&body)
            .send()
            .map_err(|err| IngestError::storage(BACKEND, format!("{path}: {err}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(IngestError::storage(BACKEND, format!("{path}: {status} {body}")));
        }

        let parsed: Value = response
            .json()
            .map_err(|err| IngestError::storage(BACKEND, format!("{path}: {err}")))?;
        let code = parsed.pointer("/code").and_then(Value::as_i64).unwrap_or(0);
        if code != 0 {
            let message = parsed
                .pointer("/message")
                .and_then(Value::as_str)
                .unwrap_or("no message");
            return Err(IngestError::storage(
                BACKEND,
                format!("{path}: code {code}: {message}"),
            ));
        }

        Ok(parsed.get("data").cloned().unwrap_or(Value::Null))
    }

    fn require_connection(&self) -> Result<(), IngestError> {
        if self.connected {
            Ok(())
        } else {
            Err(IngestError::Connection(
                "milvus store used before connect()".to_string(),
            ))
        }
    }

    fn has_collection(&self) -> Result<bool, IngestError> {
        let data = self.call(
            "collections/has",
            json!({ "collectionName": self.config.collection_name }),
        )?;
        Ok(data.pointer("/has").and_then(Value::as_bool).unwrap_or(false))
    }

    fn describe(&self) -> Result<(Vec<String>, Option<usize>), IngestError> {
        let data = self.call(
            "collections/describe",
            json!({ "collectionName": self.config.collection_name }),
        )?;
        let fields = data
            .pointer("/fields")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let names = fields
            .iter()
            .filter_map(|field| field.pointer("/name").and_then(Value::as_str))
            .map(str::to_string)
            .collect();

        let dimension = fields.iter().find_map(|field| {
            field
                .pointer("/params")
                .and_then(Value::as_array)?
                .iter()
                .find(|param| param.pointer("/key").and_then(Value::as_str) == Some("dim"))
                .and_then(|param| param.get("value"))
                .and_then(|value| {
                    value
                        .as_u64()
                        .or_else(|| value.as_str().and_then(|raw| raw.parse().ok()))
                })
                .map(|dim| dim as usize)
        });

        Ok((names, dimension))
    }

    fn live_schema_matches(&self, schema: &CollectionSchema) -> Result<bool, IngestError> {
        let (existing, dimension) = self.describe()?;
        let matches = existing == schema.field_names() && dimension == schema.vector_dimension();
        if !matches {
            debug!(
                collection = %self.config.collection_name,
                expected = ?schema.field_names(),
                found = ?existing,
                expected_dimension = ?schema.vector_dimension(),
                found_dimension = ?dimension,
                "collection schema differs"
            );
        }
        Ok(matches)
    }

    fn create(&self, schema: &CollectionSchema) -> Result<(), IngestError> {
        let fields: Vec<Value> = schema.fields.iter().map(field_definition).collect();
        let vector_field = schema
            .fields
            .iter()
            .find(|field| matches!(field.field_type, FieldType::FloatVector { .. }))
            .map(|field| field.name.as_str())
            .ok_or_else(|| {
                IngestError::Configuration("collection schema has no vector field".to_string())
            })?;

        self.call(
            "collections/create",
            json!({
                "collectionName": self.config.collection_name,
                "description": schema.description,
                "schema": {
                    "autoId": true,
                    "enableDynamicField": false,
                    "fields": fields,
                },
                "indexParams": [{
                    "fieldName": vector_field,
                    "indexName": vector_field,
                    "metricType": self.config.metric_type,
                    "params": {
                        "index_type": self.config.index_type,
                        "nlist": self.config.nlist,
                    },
                }],
            }),
        )?;

        info!(
            collection = %self.config.collection_name,
            index_type = %self.config.index_type,
            metric_type = %self.config.metric_type,
            "created collection with vector index"
        );
        Ok(())
    }

    fn drop_existing(&self) -> Result<(), IngestError> {
        self.call(
            "collections/drop",
            json!({ "collectionName": self.config.collection_name }),
        )?;
        Ok(())
    }

    fn row(&self, record: &EmbeddedChunk) -> Value {
        let chunk = &record.chunk;
        json!({
            "document_id": truncate_chars(&chunk.document_id, DOCUMENT_ID_MAX_LENGTH),
            "page_number": chunk.page_number,
            "chunk_id": chunk.chunk_id,
            "text": truncate_chars(&chunk.text, self.config.max_text_length),
            "embedding": record.embedding,
        })
    }
}

fn field_definition(field: &crate::models::FieldSpec) -> Value {
    let mut definition = json!({
        "fieldName": field.name,
        "isPrimary": field.primary_key,
    });
    let (data_type, params) = match field.field_type {
        FieldType::Int64 => ("Int64", None),
        FieldType::VarChar { max_length } => ("VarChar", Some(json!({ "max_length": max_length }))),
        FieldType::FloatVector { dimension } => ("FloatVector", Some(json!({ "dim": dimension }))),
    };
    definition["dataType"] = json!(data_type);
    if let Some(params) = params {
        definition["elementTypeParams"] = params;
    }
    definition
}

fn truncate_chars(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((cut, _)) => &text[..cut],
        None => text,
    }
}

impl VectorStore for MilvusStore {
    fn connect(&mut self) -> Result<(), IngestError> {
        match self.call("collections/list", json!({})) {
            Ok(_) => {
                self.connected = true;
                info!(endpoint = %self.config.endpoint, "connected to milvus");
                Ok(())
            }
            Err(err) => {
                self.connected = false;
                Err(IngestError::Connection(format!(
                    "{}: {err}",
                    self.config.endpoint
                )))
            }
        }
    }

    fn ensure_collection(
        &mut self,
        schema: &CollectionSchema,
    ) -> Result<CollectionStatus, IngestError> {
        self.require_connection()?;

        let status = if self.has_collection()? {
            if !self.live_schema_matches(schema)? {
                warn!(
                    collection = %self.config.collection_name,
                    "collection schema mismatch, dropping and recreating"
                );
                self.drop_existing()?;
                self.create(schema)?;
                CollectionStatus::Recreated
            } else {
                self.call(
                    "collections/load",
                    json!({ "collectionName": self.config.collection_name }),
                )?;
                info!(collection = %self.config.collection_name, "collection schema verified");
                CollectionStatus::Verified
            }
        } else {
            self.create(schema)?;
            CollectionStatus::Created
        };

        self.schema = Some(schema.clone());
        Ok(status)
    }

    fn collection_matches(&self, schema: &CollectionSchema) -> Result<Option<bool>, IngestError> {
        self.require_connection()?;
        if !self.has_collection()? {
            return Ok(None);
        }
        let matches = self.live_schema_matches(schema)?;
        if matches {
            self.call(
                "collections/load",
                json!({ "collectionName": self.config.collection_name }),
            )?;
        }
        Ok(Some(matches))
    }

    fn insert(&mut self, records: &[EmbeddedChunk]) -> Result<usize, IngestError> {
        self.require_connection()?;
        if self.schema.is_none() {
            return Err(IngestError::storage(BACKEND, "collection not initialized"));
        }
        if records.is_empty() {
            return Ok(0);
        }

        let rows: Vec<Value> = records.iter().map(|record| self.row(record)).collect();
        let data = self.call(
            "entities/insert",
            json!({
                "collectionName": self.config.collection_name,
                "data": rows,
            }),
        )?;

        let inserted = data
            .pointer("/insertCount")
            .and_then(Value::as_u64)
            .map(|count| count as usize)
            .unwrap_or(records.len());
        debug!(inserted, collection = %self.config.collection_name, "inserted rows");
        Ok(inserted)
    }

    fn search(
        &self,
        query_embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<SearchHit>, IngestError> {
        self.require_connection()?;

        let data = self.call(
            "entities/search",
            json!({
                "collectionName": self.config.collection_name,
                "data": [query_embedding],
                "annsField": "embedding",
                "limit": top_k,
                "outputFields": OUTPUT_FIELDS,
                "searchParams": {
                    "metricType": self.config.metric_type,
                    "params": { "nprobe": self.config.nprobe },
                },
            }),
        )?;

        let hits = data.as_array().cloned().unwrap_or_default();
        Ok(hits
            .iter()
            .map(|hit| SearchHit {
                document_id: hit
                    .pointer("/document_id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                page_number: hit
                    .pointer("/page_number")
                    .and_then(Value::as_u64)
                    .unwrap_or_default() as u32,
                chunk_id: hit
                    .pointer("/chunk_id")
                    .and_then(Value::as_u64)
                    .unwrap_or_default(),
                text: hit
                    .pointer("/text")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                score: hit
                    .pointer("/distance")
                    .or_else(|| hit.pointer("/score"))
                    .and_then(Value::as_f64)
                    .unwrap_or(0.0) as f32,
            })
            .collect())
    }

    fn stats(&self) -> Result<CollectionStats, IngestError> {
        self.require_connection()?;
        let data = self.call(
            "collections/get_stats",
            json!({ "collectionName": self.config.collection_name }),
        )?;
        let row_count = data
            .pointer("/rowCount")
            .and_then(|value| {
                value
                    .as_u64()
                    .or_else(|| value.as_str().and_then(|raw| raw.parse().ok()))
            })
            .unwrap_or(0);

        Ok(CollectionStats {
            row_count,
            collection_name: self.config.collection_name.clone(),
        })
    }

    fn drop_collection(&mut self) -> Result<bool, IngestError> {
        self.require_connection()?;
        if !self.has_collection()? {
            return Ok(false);
        }
        self.drop_existing()?;
        self.schema = None;
        info!(collection = %self.config.collection_name, "dropped collection");
        Ok(true)
    }

    fn close(&mut self) {
        if self.connected {
            info!(endpoint = %self.config.endpoint, "disconnected from milvus");
        }
        self.connected = false;
        self.schema = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Chunk;
    use crate::test_support::CannedServer;
    use std::net::TcpListener;

    const OK: &str = r#"{"code":0,"data":{}}"#;

    fn config(endpoint: &str) -> MilvusConfig {
        MilvusConfig {
            endpoint: endpoint.to_string(),
            user: Some("root".to_string()),
            password: Some("Milvus".to_string()),
            max_text_length: 16,
            timeout: Duration::from_secs(5),
            ..MilvusConfig::from(&IngestConfig::default())
        }
    }

    fn responses(bodies: &[&str]) -> Vec<(u16, String)> {
        bodies.iter().map(|body| (200, body.to_string())).collect()
    }

    fn record(document_id: &str, text: &str) -> EmbeddedChunk {
        EmbeddedChunk {
            chunk: Chunk {
                chunk_id: 7,
                document_id: document_id.to_string(),
                page_number: 2,
                text: text.to_string(),
                start_offset: 0,
                end_offset: 3,
            },
            embedding: vec![0.5, 0.5, 0.0],
        }
    }

    #[test]
    fn unreachable_server_is_a_connection_error() -> Result<(), Box<dyn std::error::Error>> {
        let port = TcpListener::bind("127.0.0.1:0")?.local_addr()?.port();
        let mut store = MilvusStore::new(config(&format!("http://127.0.0.1:{port}")))?;

        let result = store.connect();
        assert!(matches!(result, Err(IngestError::Connection(_))));
        assert!(matches!(
            store.stats(),
            Err(IngestError::Connection(_))
        ));
        Ok(())
    }

    #[test]
    fn missing_collection_is_created_with_index() -> Result<(), Box<dyn std::error::Error>> {
        let server = CannedServer::start(responses(&[
            r#"{"code":0,"data":[]}"#,
            r#"{"code":0,"data":{"has":false}}"#,
            OK,
        ]));
        let mut store = MilvusStore::new(config(&server.base_url))?;
        store.connect()?;

        let status = store.ensure_collection(&CollectionSchema::for_chunks(3, 16))?;
        assert_eq!(status, CollectionStatus::Created);

        let requests = server.requests();
        let paths: Vec<&str> = requests.iter().map(|r| r.path.as_str()).collect();
        assert_eq!(
            paths,
            vec![
                "/v2/vectordb/collections/list",
                "/v2/vectordb/collections/has",
                "/v2/vectordb/collections/create",
            ]
        );
        let create: Value = serde_json::from_str(&requests[2].body)?;
        assert_eq!(create["collectionName"], "pdf_documents");
        assert_eq!(create["indexParams"][0]["metricType"], "COSINE");
        assert_eq!(create["indexParams"][0]["params"]["index_type"], "IVF_FLAT");
        assert_eq!(create["schema"]["fields"][5]["elementTypeParams"]["dim"], 3);
        assert_eq!(
            requests[0].header("authorization"),
            Some("Bearer root:Milvus")
        );
        Ok(())
    }

    #[test]
    fn mismatched_collection_is_dropped_and_recreated() -> Result<(), Box<dyn std::error::Error>>
    {
        let server = CannedServer::start(responses(&[
            r#"{"code":0,"data":[]}"#,
            r#"{"code":0,"data":{"has":true}}"#,
            r#"{"code":0,"data":{"fields":[{"name":"id"},{"name":"text"},{"name":"embedding","params":[{"key":"dim","value":"3"}]}]}}"#,
            OK,
            OK,
        ]));
        let mut store = MilvusStore::new(config(&server.base_url))?;
        store.connect()?;

        let status = store.ensure_collection(&CollectionSchema::for_chunks(3, 16))?;
        assert_eq!(status, CollectionStatus::Recreated);
        let paths: Vec<String> = server.requests().into_iter().map(|r| r.path).collect();
        assert_eq!(paths[3], "/v2/vectordb/collections/drop");
        assert_eq!(paths[4], "/v2/vectordb/collections/create");
        Ok(())
    }

    #[test]
    fn matching_collection_is_verified() -> Result<(), Box<dyn std::error::Error>> {
        let server = CannedServer::start(responses(&[
            r#"{"code":0,"data":[]}"#,
            r#"{"code":0,"data":{"has":true}}"#,
            r#"{"code":0,"data":{"fields":[{"name":"id"},{"name":"document_id"},{"name":"page_number"},{"name":"chunk_id"},{"name":"text"},{"name":"embedding","params":[{"key":"dim","value":3}]}]}}"#,
            OK,
        ]));
        let mut store = MilvusStore::new(config(&server.base_url))?;
        store.connect()?;

        let status = store.ensure_collection(&CollectionSchema::for_chunks(3, 16))?;
        assert_eq!(status, CollectionStatus::Verified);
        assert_eq!(server.requests()[3].path, "/v2/vectordb/collections/load");
        Ok(())
    }

    #[test]
    fn schema_check_reports_without_migrating() -> Result<(), Box<dyn std::error::Error>> {
        let server = CannedServer::start(responses(&[
            r#"{"code":0,"data":[]}"#,
            r#"{"code":0,"data":{"has":true}}"#,
            r#"{"code":0,"data":{"fields":[{"name":"id"},{"name":"document_id"},{"name":"page_number"},{"name":"chunk_id"},{"name":"text"},{"name":"embedding","params":[{"key":"dim","value":"1536"}]}]}}"#,
            r#"{"code":0,"data":{"has":false}}"#,
        ]));
        let mut store = MilvusStore::new(config(&server.base_url))?;
        store.connect()?;

        let schema = CollectionSchema::for_chunks(384, 16);
        assert_eq!(store.collection_matches(&schema)?, Some(false));
        assert_eq!(store.collection_matches(&schema)?, None);

        let paths: Vec<String> = server.requests().into_iter().map(|r| r.path).collect();
        assert!(paths
            .iter()
            .all(|path| !path.ends_with("/drop") && !path.ends_with("/create")));
        Ok(())
    }

    #[test]
    fn insert_truncates_long_fields() -> Result<(), Box<dyn std::error::Error>> {
        let server = CannedServer::start(responses(&[
            r#"{"code":0,"data":[]}"#,
            r#"{"code":0,"data":{"has":false}}"#,
            OK,
            r#"{"code":0,"data":{"insertCount":1,"insertIds":[1]}}"#,
        ]));
        let mut store = MilvusStore::new(config(&server.base_url))?;
        store.connect()?;
        store.ensure_collection(&CollectionSchema::for_chunks(3, 16))?;

        let long_id = "d".repeat(140);
        let inserted = store.insert(&[record(&long_id, "text that is longer than sixteen")])?;
        assert_eq!(inserted, 1);

        let body: Value = serde_json::from_str(&server.requests()[3].body)?;
        let row = &body["data"][0];
        assert_eq!(row["document_id"].as_str().map(str::len), Some(100));
        assert_eq!(row["text"], "text that is lon");
        assert_eq!(row["chunk_id"], 7);
        assert_eq!(row["page_number"], 2);
        Ok(())
    }

    #[test]
    fn rejected_insert_is_a_storage_error() -> Result<(), Box<dyn std::error::Error>> {
        let server = CannedServer::start(responses(&[
            r#"{"code":0,"data":[]}"#,
            r#"{"code":0,"data":{"has":false}}"#,
            OK,
            r#"{"code":1100,"message":"invalid parameter"}"#,
        ]));
        let mut store = MilvusStore::new(config(&server.base_url))?;
        store.connect()?;
        store.ensure_collection(&CollectionSchema::for_chunks(3, 16))?;

        let result = store.insert(&[record("doc", "text")]);
        assert!(
            matches!(result, Err(IngestError::Storage { details, .. }) if details.contains("1100"))
        );
        Ok(())
    }

    #[test]
    fn insert_timeout_is_a_storage_error() -> Result<(), Box<dyn std::error::Error>> {
        let server = CannedServer::start(vec![
            (200, r#"{"code":0,"data":[]}"#.to_string()),
            (200, r#"{"code":0,"data":{"has":false}}"#.to_string()),
            (200, OK.to_string()),
            CannedServer::silent(),
        ]);
        let mut store = MilvusStore::new(MilvusConfig {
            timeout: Duration::from_secs(1),
            ..config(&server.base_url)
        })?;
        store.connect()?;
        store.ensure_collection(&CollectionSchema::for_chunks(3, 16))?;

        let err = store.insert(&[record("doc", "text")]).unwrap_err();
        assert!(matches!(err, IngestError::Storage { .. }));
        assert!(!err.is_fatal());
        Ok(())
    }

    #[test]
    fn search_hits_are_parsed() -> Result<(), Box<dyn std::error::Error>> {
        let server = CannedServer::start(responses(&[
            r#"{"code":0,"data":[]}"#,
            r#"{"code":0,"data":[{"id":11,"distance":0.92,"document_id":"manual","page_number":4,"chunk_id":12,"text":"relief valve"}]}"#,
        ]));
        let mut store = MilvusStore::new(config(&server.base_url))?;
        store.connect()?;

        let hits = store.search(&[0.1, 0.2, 0.3], 5)?;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].document_id, "manual");
        assert_eq!(hits[0].page_number, 4);
        assert_eq!(hits[0].chunk_id, 12);
        assert!((hits[0].score - 0.92).abs() < 1e-6);

        let body: Value = serde_json::from_str(&server.requests()[1].body)?;
        assert_eq!(body["limit"], 5);
        assert_eq!(body["searchParams"]["params"]["nprobe"], 10);
        Ok(())
    }
}
