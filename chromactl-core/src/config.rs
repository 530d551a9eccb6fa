use serde::{Deserialize, Serialize};
use std::path::Path;

const DEFAULT_CHROMA_HOST: &str = "localhost";
const DEFAULT_CHROMA_PORT: u16 = 8000;
const DEFAULT_PERSIST_PATH: &str = "./chroma_db";
const DEFAULT_COLLECTION: &str = "hira_medical_docs";
const DEFAULT_CHROMA_COMMAND: &str = "chroma";
const DEFAULT_STARTUP_TIMEOUT_SECS: u64 = 30;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

const DEFAULT_EMBEDDING_MODEL: &str = "minilm";
const DEFAULT_EMBEDDING_ENDPOINT: &str = "http://localhost:8001";

const DEFAULT_EMBED_SERVER_HOST: &str = "0.0.0.0";
const DEFAULT_EMBED_SERVER_PORT: u16 = 8001;
const DEFAULT_EMBED_SERVER_MODEL: &str = "bge-large";

/// Errors produced while reading or validating the config file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {message}")]
    Read { path: String, message: String },
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Deserialize, Serialize, PartialEq, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub chroma: ChromaConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub embed_server: EmbedServerConfig,
}

#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct ChromaConfig {
    #[serde(default = "default_chroma_host")]
    pub host: String,
    #[serde(default = "default_chroma_port")]
    pub port: u16,
    /// Persist directory handed to `chroma run --path`.
    #[serde(default = "default_persist_path")]
    pub path: String,
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default = "default_chroma_command")]
    pub command: String,
    #[serde(default = "default_startup_timeout_secs")]
    pub startup_timeout_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for ChromaConfig {
    fn default() -> Self {
        Self {
            host: default_chroma_host(),
            port: default_chroma_port(),
            path: default_persist_path(),
            collection: default_collection(),
            command: default_chroma_command(),
            startup_timeout_secs: default_startup_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl ChromaConfig {
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

fn default_chroma_host() -> String {
    DEFAULT_CHROMA_HOST.to_string()
}

fn default_chroma_port() -> u16 {
    DEFAULT_CHROMA_PORT
}

fn default_persist_path() -> String {
    DEFAULT_PERSIST_PATH.to_string()
}

fn default_collection() -> String {
    DEFAULT_COLLECTION.to_string()
}

fn default_chroma_command() -> String {
    DEFAULT_CHROMA_COMMAND.to_string()
}

fn default_startup_timeout_secs() -> u64 {
    DEFAULT_STARTUP_TIMEOUT_SECS
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

/// Which backend turns text into vectors.
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone, Copy, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    /// In-process ONNX model.
    #[default]
    Local,
    /// HTTP inference server (see `chromactl-embedd`).
    Remote,
}

/// What to do when the embedding backend fails.
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone, Copy, Default)]
#[serde(rename_all = "lowercase")]
pub enum FallbackPolicy {
    /// Substitute random vectors of the model's dimension and keep going.
    #[default]
    Random,
    /// Surface the error to the caller.
    Error,
}

#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub provider: EmbeddingProvider,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_device")]
    pub device: String,
    #[serde(default = "default_normalize")]
    pub normalize: bool,
    #[serde(default = "default_embedding_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub fallback: FallbackPolicy,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::default(),
            model: default_embedding_model(),
            device: default_device(),
            normalize: default_normalize(),
            endpoint: default_embedding_endpoint(),
            fallback: FallbackPolicy::default(),
        }
    }
}

fn default_embedding_model() -> String {
    DEFAULT_EMBEDDING_MODEL.to_string()
}

fn default_device() -> String {
    "auto".to_string()
}

fn default_normalize() -> bool {
    true
}

fn default_embedding_endpoint() -> String {
    DEFAULT_EMBEDDING_ENDPOINT.to_string()
}

#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct EmbedServerConfig {
    #[serde(default = "default_embed_server_host")]
    pub host: String,
    #[serde(default = "default_embed_server_port")]
    pub port: u16,
    /// Model loaded at startup.
    #[serde(default = "default_embed_server_model")]
    pub model: String,
}

impl Default for EmbedServerConfig {
    fn default() -> Self {
        Self {
            host: default_embed_server_host(),
            port: default_embed_server_port(),
            model: default_embed_server_model(),
        }
    }
}

impl EmbedServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn default_embed_server_host() -> String {
    DEFAULT_EMBED_SERVER_HOST.to_string()
}

fn default_embed_server_port() -> u16 {
    DEFAULT_EMBED_SERVER_PORT
}

fn default_embed_server_model() -> String {
    DEFAULT_EMBED_SERVER_MODEL.to_string()
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::parse(&contents)
    }

    /// Read `path` if it exists, otherwise fall back to built-in defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::from_file(path)
        } else {
            log::debug!("config file {} not found, using defaults", path.display());
            Ok(Self::default())
        }
    }

    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(contents).map_err(|e| ConfigError::Invalid(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.chroma.port == 0 {
            return Err(ConfigError::Invalid("chroma.port must not be 0".into()));
        }
        if self.chroma.collection.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "chroma.collection must not be empty".into(),
            ));
        }
        if self.embedding.model.trim().is_empty() {
            return Err(ConfigError::Invalid("embedding.model must not be empty".into()));
        }
        if self.embedding.provider == EmbeddingProvider::Remote {
            let parsed = url::Url::parse(&self.embedding.endpoint).map_err(|e| {
                ConfigError::Invalid(format!(
                    "embedding.endpoint '{}' is not a valid URL: {e}",
                    self.embedding.endpoint
                ))
            })?;
            if parsed.scheme() != "http" && parsed.scheme() != "https" {
                return Err(ConfigError::Invalid(format!(
                    "embedding.endpoint must use http or https, got '{}'",
                    parsed.scheme()
                )));
            }
        }
        Ok(())
    }

    pub fn to_toml_string(&self) -> String {
        toml::to_string_pretty(self).expect("Config should always be serializable to TOML")
    }
}
