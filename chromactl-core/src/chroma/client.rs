use std::time::Duration;

use reqwest::Method;
use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::Serialize;
use serde::de::DeserializeOwned;
use url::Url;

use super::ChromaError;
use super::types::{
    AddRecords, Collection, CreateCollection, DeleteRequest, GetRequest, GetResponse, QueryRequest,
    QueryResponse,
};
use crate::config::ChromaConfig;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Blocking client for one Chroma server.
pub struct ChromaClient {
    http: Client,
    base: Url,
}

impl ChromaClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ChromaError> {
        let base = Url::parse(base_url)
            .map_err(|e| ChromaError::InvalidUrl(format!("{base_url}: {e}")))?;
        if base.cannot_be_a_base() {
            return Err(ChromaError::InvalidUrl(base_url.to_string()));
        }
        let http = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(timeout)
            .build()
            .map_err(|e| ChromaError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http, base })
    }

    pub fn from_config(config: &ChromaConfig) -> Result<Self, ChromaError> {
        Self::new(
            &config.base_url(),
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    pub fn base_url(&self) -> &str {
        self.base.as_str().trim_end_matches('/')
    }

    /// `{base}/api/v1/{segments...}`, each segment percent-encoded.
    fn api_url(&self, segments: &[&str]) -> Result<Url, ChromaError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| ChromaError::InvalidUrl(self.base.to_string()))?
            .pop_if_empty()
            .extend(["api", "v1"])
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, segments: &[&str]) -> Result<RequestBuilder, ChromaError> {
        Ok(self.http.request(method, self.api_url(segments)?))
    }

    fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ChromaError> {
        let response = request
            .send()
            .map_err(|e| ChromaError::Network(e.to_string()))?;
        check_status(response)?
            .json()
            .map_err(|e| ChromaError::MalformedResponse(e.to_string()))
    }

    fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        segments: &[&str],
        body: &B,
    ) -> Result<T, ChromaError> {
        self.send(self.request(Method::POST, segments)?.json(body))
    }

    /// Liveness probe. Returns the server's nanosecond clock.
    pub fn heartbeat(&self) -> Result<u64, ChromaError> {
        let body: serde_json::Value = self.send(self.request(Method::GET, &["heartbeat"])?)?;
        body.get("nanosecond heartbeat")
            .and_then(serde_json::Value::as_u64)
            .ok_or_else(|| ChromaError::MalformedResponse(format!("unexpected heartbeat: {body}")))
    }

    pub fn version(&self) -> Result<String, ChromaError> {
        self.send(self.request(Method::GET, &["version"])?)
    }

    pub fn list_collections(&self) -> Result<Vec<Collection>, ChromaError> {
        self.send(self.request(Method::GET, &["collections"])?)
    }

    pub fn get_collection(&self, name: &str) -> Result<Collection, ChromaError> {
        self.send(self.request(Method::GET, &["collections", name])?)
    }

    pub fn create_collection(
        &self,
        name: &str,
        metadata: Option<serde_json::Map<String, serde_json::Value>>,
        get_or_create: bool,
    ) -> Result<Collection, ChromaError> {
        let body = CreateCollection {
            name: name.to_string(),
            metadata,
            get_or_create,
        };
        self.post(&["collections"], &body)
    }

    pub fn get_or_create_collection(&self, name: &str) -> Result<Collection, ChromaError> {
        self.create_collection(name, None, true)
    }

    pub fn delete_collection(&self, name: &str) -> Result<(), ChromaError> {
        let request = self.request(Method::DELETE, &["collections", name])?;
        let _: serde_json::Value = self.send(request)?;
        Ok(())
    }

    /// Wipe the whole database. Only honoured when the server allows resets.
    pub fn reset(&self) -> Result<bool, ChromaError> {
        self.send(self.request(Method::POST, &["reset"])?)
    }

    pub fn add(&self, collection_id: &str, records: &AddRecords) -> Result<(), ChromaError> {
        let _: serde_json::Value = self.post(&["collections", collection_id, "add"], records)?;
        Ok(())
    }

    pub fn upsert(&self, collection_id: &str, records: &AddRecords) -> Result<(), ChromaError> {
        let _: serde_json::Value = self.post(&["collections", collection_id, "upsert"], records)?;
        Ok(())
    }

    pub fn query(
        &self,
        collection_id: &str,
        request: &QueryRequest,
    ) -> Result<QueryResponse, ChromaError> {
        self.post(&["collections", collection_id, "query"], request)
    }

    pub fn get(
        &self,
        collection_id: &str,
        request: &GetRequest,
    ) -> Result<GetResponse, ChromaError> {
        self.post(&["collections", collection_id, "get"], request)
    }

    pub fn count(&self, collection_id: &str) -> Result<usize, ChromaError> {
        self.send(self.request(Method::GET, &["collections", collection_id, "count"])?)
    }

    /// Delete matching records. Returns the server's reply (ids removed, on
    /// servers that report them).
    pub fn delete(
        &self,
        collection_id: &str,
        request: &DeleteRequest,
    ) -> Result<serde_json::Value, ChromaError> {
        self.post(&["collections", collection_id, "delete"], request)
    }
}

fn check_status(response: Response) -> Result<Response, ChromaError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .unwrap_or_else(|_| "failed to read response body".to_string());
    let message = error_message(&body);
    if status == reqwest::StatusCode::NOT_FOUND || message.contains("does not exist") {
        return Err(ChromaError::NotFound(message));
    }
    Err(ChromaError::Http {
        status: status.as_u16(),
        message,
    })
}

/// Pull the human-readable part out of an error body. Newer servers send
/// `{"error": kind, "message": text}`, older ones `{"error": text}`.
fn error_message(body: &str) -> String {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(body) else {
        return body.to_string();
    };
    ["message", "error", "detail"]
        .iter()
        .find_map(|key| value.get(*key).and_then(serde_json::Value::as_str))
        .map(str::to_string)
        .unwrap_or_else(|| body.to_string())
}
