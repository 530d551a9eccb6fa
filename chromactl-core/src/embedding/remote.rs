//! Client for an HTTP embedding inference server.
//!
//! Protocol (served by `chromactl-embedd`):
//! - `GET  /health`     -> [`HealthStatus`]
//! - `POST /embed`      -> [`EmbedResponse`]
//! - `GET  /models`     -> [`ModelList`]
//! - `POST /load_model` -> [`LoadModelResponse`]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use reqwest::blocking::{Client, Response};
use serde::{Deserialize, Serialize};

use super::local::local_model;
use super::{EmbedError, Embedder};

const EMBED_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedRequest {
    pub texts: Vec<String>,
    #[serde(default = "default_server_model")]
    pub model_name: String,
    #[serde(default = "default_true")]
    pub normalize: bool,
}

fn default_true() -> bool {
    true
}

/// Model an inference server uses when a request does not name one.
pub const DEFAULT_SERVER_MODEL: &str = "bge-large";

fn default_server_model() -> String {
    DEFAULT_SERVER_MODEL.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedResponse {
    pub embeddings: Vec<Vec<f32>>,
    pub model_name: String,
    pub embedding_dim: usize,
    pub text_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthStatus {
    pub status: String,
    pub model_loaded: bool,
    #[serde(default)]
    pub available_models: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelList {
    pub available_models: BTreeMap<String, String>,
    pub current_model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadModelRequest {
    pub model_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoadModelResponse {
    pub status: String,
    pub model: String,
}

/// Output width the server is expected to produce for `model_name`.
pub fn dimensions_for(model_name: &str) -> usize {
    if let Some(spec) = local_model(model_name) {
        return spec.dimensions;
    }
    if model_name.contains("bge-large") {
        1024
    } else if model_name.contains("bge-base") {
        768
    } else if model_name.contains("bge-small") {
        384
    } else {
        768
    }
}

/// Embedder backed by a remote inference server.
pub struct RemoteEmbedder {
    http: Client,
    endpoint: String,
    model: String,
    normalize: bool,
    /// Width of the last successful reply; 0 until one arrives.
    observed_dim: AtomicUsize,
}

impl RemoteEmbedder {
    pub fn new(endpoint: &str, model: &str, normalize: bool) -> Result<Self, EmbedError> {
        let http = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(EMBED_TIMEOUT)
            .build()
            .map_err(|e| EmbedError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model: model.to_string(),
            normalize,
            observed_dim: AtomicUsize::new(0),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.endpoint, path)
    }

    /// `GET /health`.
    pub fn health_check(&self) -> Result<HealthStatus, EmbedError> {
        let response = self
            .http
            .get(self.url("health"))
            .send()
            .map_err(|e| EmbedError::Network(e.to_string()))?;
        parse_json(check_status(response)?)
    }

    /// `GET /models`.
    pub fn available_models(&self) -> Result<ModelList, EmbedError> {
        let response = self
            .http
            .get(self.url("models"))
            .send()
            .map_err(|e| EmbedError::Network(e.to_string()))?;
        parse_json(check_status(response)?)
    }

    /// Ask the server to switch models. On success later requests name the
    /// new model.
    pub fn load_model(&mut self, model_name: &str) -> Result<LoadModelResponse, EmbedError> {
        let response = self
            .http
            .post(self.url("load_model"))
            .json(&LoadModelRequest {
                model_name: model_name.to_string(),
            })
            .send()
            .map_err(|e| EmbedError::Network(e.to_string()))?;
        let loaded: LoadModelResponse = parse_json(check_status(response)?)?;
        self.model = model_name.to_string();
        self.observed_dim.store(0, Ordering::Relaxed);
        Ok(loaded)
    }
}

impl Embedder for RemoteEmbedder {
    fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let request = EmbedRequest {
            texts: texts.iter().map(|t| t.to_string()).collect(),
            model_name: self.model.clone(),
            normalize: self.normalize,
        };
        let response = self
            .http
            .post(self.url("embed"))
            .json(&request)
            .send()
            .map_err(|e| EmbedError::Network(e.to_string()))?;
        let body: EmbedResponse = parse_json(check_status(response)?)?;
        if body.embeddings.len() != texts.len() {
            return Err(EmbedError::MalformedResponse(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                body.embeddings.len()
            )));
        }
        let dim = body.embeddings.first().map_or(body.embedding_dim, Vec::len);
        if dim > 0 {
            self.observed_dim.store(dim, Ordering::Relaxed);
        }
        Ok(body.embeddings)
    }

    /// The width the server last answered with, else the width expected for
    /// the model name.
    fn dimensions(&self) -> usize {
        match self.observed_dim.load(Ordering::Relaxed) {
            0 => dimensions_for(&self.model),
            dim => dim,
        }
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn provider_type(&self) -> &str {
        "remote"
    }
}

fn check_status(response: Response) -> Result<Response, EmbedError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .unwrap_or_else(|_| "failed to read response body".to_string());
    Err(EmbedError::Network(format!("HTTP {status}: {body}")))
}

fn parse_json<T: serde::de::DeserializeOwned>(response: Response) -> Result<T, EmbedError> {
    response
        .json()
        .map_err(|e| EmbedError::MalformedResponse(e.to_string()))
}
