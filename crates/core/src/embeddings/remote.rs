use super::EmbeddingProvider;
use crate::error::IngestError;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

pub const DEFAULT_REMOTE_MODEL: &str = "text-embedding-3-small";

fn known_dimension(model: &str) -> Option<usize> {
    match model {
        "text-embedding-3-small" | "text-embedding-ada-002" => Some(1_536),
        "text-embedding-3-large" => Some(3_072),
        _ => None,
    }
}

pub struct RemoteApiProvider {
    client: Client,
    endpoint: String,
    model: String,
    dimension: usize,
    requested_dimensions: Option<usize>,
    max_retries: usize,
    retry_base_delay: Duration,
}

impl RemoteApiProvider {
    pub fn new(
        api_key: &str,
        base_url: &str,
        model: String,
        dimension: Option<usize>,
        timeout: Duration,
        max_retries: usize,
    ) -> Result<Self, IngestError> {
        if api_key.trim().is_empty() {
            return Err(IngestError::Configuration("missing embedding API key".to_string()));
        }
        if model.trim().is_empty() {
            return Err(IngestError::Configuration("missing embedding model name".to_string()));
        }

        let resolved = dimension.or_else(|| known_dimension(&model)).ok_or_else(|| {
            IngestError::Configuration(format!(
                "unknown dimension for model '{model}', set EMBEDDING_DIMENSION"
            ))
        })?;

        let mut headers = HeaderMap::new();
        let auth = HeaderValue::from_str(&format!("Bearer {}", api_key.trim()))
            .map_err(|_| IngestError::Configuration("invalid embedding API key".to_string()))?;
        headers.insert(AUTHORIZATION, auth);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()?;

        let base = Url::parse(base_url)?;
        let endpoint = format!("{}/embeddings", base.as_str().trim_end_matches('/'));

        Ok(Self {
            client,
            endpoint,
            model,
            dimension: resolved,
            requested_dimensions: dimension,
            max_retries: max_retries.max(1),
            retry_base_delay: Duration::from_millis(500),
        })
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }

    fn should_retry(status: StatusCode) -> bool {
        status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
    }

    fn is_retryable_error(err: &reqwest::Error) -> bool {
        err.is_timeout() || err.is_connect() || err.is_request()
    }

    fn retry_backoff(&self, attempt: usize) -> Duration {
        let capped = attempt.min(5) as u32;
        self.retry_base_delay * (1 << capped)
    }
}

impl EmbeddingProvider for RemoteApiProvider {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, IngestError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = EmbeddingRequest {
            model: &self.model,
            input: texts,
            dimensions: self.requested_dimensions,
        };

        let mut attempt = 0usize;
        loop {
            match self.client.post(&self.endpoint).json(&request).send() {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let parsed: EmbeddingResponse = response.json().map_err(|err| {
                            IngestError::Embedding(format!("unreadable embedding response: {err}"))
                        })?;
                        debug!(
                            requested = texts.len(),
                            received = parsed.data.len(),
                            model = %self.model,
                            "embedding batch returned"
                        );
                        return Ok(place_by_index(parsed.data, texts.len()));
                    }

                    let body = response
                        .text()
                        .unwrap_or_else(|_| "<body unavailable>".to_string());
                    if Self::should_retry(status) && attempt + 1 < self.max_retries {
                        attempt += 1;
                        warn!(%status, attempt, "embedding request failed, retrying");
                        thread::sleep(self.retry_backoff(attempt));
                        continue;
                    }
                    return Err(IngestError::Embedding(format!(
                        "embedding request failed ({status}): {body}"
                    )));
                }
                Err(err) => {
                    if Self::is_retryable_error(&err) && attempt + 1 < self.max_retries {
                        attempt += 1;
                        warn!(error = %err, attempt, "embedding request errored, retrying");
                        thread::sleep(self.retry_backoff(attempt));
                        continue;
                    }
                    return Err(IngestError::Embedding(format!("embedding request error: {err}")));
                }
            }
        }
    }
}

// Slots the response left out stay empty; out-of-range indices are ignored.
fn place_by_index(data: Vec<EmbeddingData>, inputs: usize) -> Vec<Vec<f32>> {
    let mut vectors = vec![Vec::new(); inputs];
    for entry in data {
        match vectors.get_mut(entry.index) {
            Some(slot) => *slot = entry.embedding,
            None => warn!(index = entry.index, inputs, "embedding index out of range"),
        }
    }
    vectors
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::CannedServer;

    fn provider(base_url: &str, retries: usize) -> RemoteApiProvider {
        RemoteApiProvider::new(
            "sk-test",
            base_url,
            "custom-embedder".to_string(),
            Some(3),
            Duration::from_secs(5),
            retries,
        )
        .expect("provider should build")
        .with_retry_delay(Duration::from_millis(1))
    }

    #[test]
    fn unknown_model_without_dimension_is_rejected() {
        let result = RemoteApiProvider::new(
            "sk-test",
            "http://localhost:1",
            "mystery-model".to_string(),
            None,
            Duration::from_secs(1),
            1,
        );
        assert!(matches!(result, Err(IngestError::Configuration(_))));
    }

    #[test]
    fn vectors_are_returned_in_input_order() -> Result<(), IngestError> {
        let server = CannedServer::start(vec![(
            200,
            r#"{"data":[{"index":1,"embedding":[0.0,1.0,0.0]},{"index":0,"embedding":[1.0,0.0,0.0]}]}"#
                .to_string(),
        )]);

        let vectors = provider(&server.base_url, 1).embed_batch(&["first", "second"])?;
        assert_eq!(vectors, vec![vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0]]);

        let requests = server.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].path, "/embeddings");
        assert!(requests[0].body.contains("\"input\":[\"first\",\"second\"]"));
        assert!(requests[0].body.contains("\"dimensions\":3"));
        assert!(requests[0]
            .header("authorization")
            .is_some_and(|value| value == "Bearer sk-test"));
        Ok(())
    }

    #[test]
    fn omitted_index_leaves_only_its_slot_empty() -> Result<(), IngestError> {
        let server = CannedServer::start(vec![(
            200,
            r#"{"data":[{"index":2,"embedding":[0.0,0.0,1.0]},{"index":0,"embedding":[1.0,0.0,0.0]}]}"#
                .to_string(),
        )]);

        let vectors = provider(&server.base_url, 1).embed_batch(&["a", "b", "c"])?;
        assert_eq!(
            vectors,
            vec![vec![1.0, 0.0, 0.0], Vec::new(), vec![0.0, 0.0, 1.0]]
        );
        Ok(())
    }

    #[test]
    fn server_errors_are_retried() -> Result<(), IngestError> {
        let server = CannedServer::start(vec![
            (503, r#"{"error":"busy"}"#.to_string()),
            (200, r#"{"data":[{"index":0,"embedding":[0.5,0.5,0.5]}]}"#.to_string()),
        ]);

        let vectors = provider(&server.base_url, 3).embed_batch(&["retry me"])?;
        assert_eq!(vectors.len(), 1);
        assert_eq!(server.requests().len(), 2);
        Ok(())
    }

    #[test]
    fn client_errors_fail_the_batch() {
        let server = CannedServer::start(vec![(400, r#"{"error":"bad input"}"#.to_string())]);

        let result = provider(&server.base_url, 3).embed_batch(&["x"]);
        assert!(matches!(result, Err(IngestError::Embedding(message)) if message.contains("400")));
    }
}
