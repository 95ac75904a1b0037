//! Test doubles shared by the unit tests of several modules.

use crate::embeddings::EmbeddingProvider;
use crate::error::IngestError;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpListener;
use std::sync::{Arc, Mutex};
use std::thread;

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Status used by [`CannedServer::silent`]: read the request, never answer.
const NO_REPLY: u16 = 0;

/// Serves one canned response per incoming connection, in order, then stops.
pub struct CannedServer {
    pub base_url: String,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl CannedServer {
    pub fn start(responses: Vec<(u16, String)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind test listener");
        let address = listener.local_addr().expect("listener address");
        let requests = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&requests);

        thread::spawn(move || {
            let mut held = Vec::new();
            for (status, body) in responses {
                let Ok((stream, _)) = listener.accept() else {
                    return;
                };
                let mut reader = BufReader::new(stream);
                let Some(request) = read_request(&mut reader) else {
                    return;
                };
                recorded.lock().expect("request log").push(request);

                if status == NO_REPLY {
                    held.push(reader);
                    continue;
                }

                let response = format!(
                    "HTTP/1.1 {status} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    reason(status),
                    body.len()
                );
                let mut stream = reader.into_inner();
                let _ = stream.write_all(response.as_bytes());
                let _ = stream.flush();
            }
            if !held.is_empty() {
                // Keep unanswered connections open until the test process exits.
                let _ = listener.accept();
            }
        });

        Self {
            base_url: format!("http://{address}"),
            requests,
        }
    }

    /// A connection that is accepted and read but never answered.
    pub fn silent() -> (u16, String) {
        (NO_REPLY, String::new())
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().expect("request log").clone()
    }
}

fn read_request(reader: &mut BufReader<std::net::TcpStream>) -> Option<RecordedRequest> {
    let mut request_line = String::new();
    reader.read_line(&mut request_line).ok()?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next()?.to_string();
    let path = parts.next()?.to_string();

    let mut headers = Vec::new();
    loop {
        let mut line = String::new();
        reader.read_line(&mut line).ok()?;
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((key, value)) = line.split_once(':') {
            headers.push((key.trim().to_string(), value.trim().to_string()));
        }
    }

    let length = headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.parse::<usize>().ok())
        .unwrap_or(0);
    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).ok()?;

    Some(RecordedRequest {
        method,
        path,
        headers,
        body: String::from_utf8_lossy(&body).to_string(),
    })
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

pub struct ScriptedProvider {
    pub dimension: usize,
    pub failing_calls: HashSet<usize>,
    /// Call index -> number of vectors to return.
    pub short_calls: HashMap<usize, usize>,
    /// Call index -> dimension of every vector returned.
    pub wrong_dimension_calls: HashMap<usize, usize>,
    calls: RefCell<Vec<usize>>,
}

impl ScriptedProvider {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            failing_calls: HashSet::new(),
            short_calls: HashMap::new(),
            wrong_dimension_calls: HashMap::new(),
            calls: RefCell::new(Vec::new()),
        }
    }

    pub fn failing_on(mut self, call: usize) -> Self {
        self.failing_calls.insert(call);
        self
    }

    pub fn short_on(mut self, call: usize, returned: usize) -> Self {
        self.short_calls.insert(call, returned);
        self
    }

    pub fn call_sizes(&self) -> Vec<usize> {
        self.calls.borrow().clone()
    }
}

impl EmbeddingProvider for ScriptedProvider {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        "scripted"
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, IngestError> {
        let call = {
            let mut calls = self.calls.borrow_mut();
            calls.push(texts.len());
            calls.len() - 1
        };

        if self.failing_calls.contains(&call) {
            return Err(IngestError::Embedding(format!("quota exceeded on call {call}")));
        }

        let returned = self.short_calls.get(&call).copied().unwrap_or(texts.len());
        let dimension = self
            .wrong_dimension_calls
            .get(&call)
            .copied()
            .unwrap_or(self.dimension);

        Ok(texts
            .iter()
            .take(returned)
            .map(|text| {
                let mut vector = vec![0.0; dimension];
                if let Some(first) = vector.first_mut() {
                    *first = text.len() as f32;
                }
                vector
            })
            .collect())
    }
}
