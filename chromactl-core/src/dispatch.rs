//! One-shot JSON command dispatch.
//!
//! A caller names a command and hands over a JSON argument blob; the reply is
//! always a JSON object with a `success` flag, never an error.

use std::path::{Component, Path};

use serde::Deserialize;
use serde_json::{Map, Value, json};

use crate::chroma::{ChromaClient, ChromaError};
use crate::config::Config;
use crate::document::Document;
use crate::embedding::{EmbedError, build_embedder};
use crate::manager::{CollectionManager, DEFAULT_N_RESULTS, ManagerError};

/// Commands understood by [`dispatch`].
pub const COMMANDS: &[&str] = &["add_documents", "search", "info", "delete"];

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("unknown command: {0}")]
    UnknownCommand(String),
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),
    #[error(transparent)]
    Manager(#[from] ManagerError),
}

impl From<ChromaError> for DispatchError {
    fn from(e: ChromaError) -> Self {
        Self::Manager(e.into())
    }
}

impl From<EmbedError> for DispatchError {
    fn from(e: EmbedError) -> Self {
        Self::Manager(e.into())
    }
}

/// Fields accepted in the argument blob. All are optional at parse time;
/// each command checks for the ones it needs.
#[derive(Debug, Default, Deserialize)]
pub struct DispatchArgs {
    pub db_path: Option<String>,
    pub model_name: Option<String>,
    pub device: Option<String>,
    pub documents: Option<Vec<Document>>,
    pub query: Option<String>,
    pub n_results: Option<usize>,
    pub filter_dict: Option<Value>,
}

impl DispatchArgs {
    pub fn parse(blob: &str) -> Result<Self, DispatchError> {
        if blob.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(blob).map_err(|e| DispatchError::InvalidArgs(e.to_string()))
    }

    /// `config` with the blob's embedding overrides applied.
    pub fn apply(&self, config: &Config) -> Config {
        let mut config = config.clone();
        if let Some(model) = &self.model_name {
            config.embedding.model = model.clone();
        }
        if let Some(device) = &self.device {
            config.embedding.device = device.clone();
        }
        config
    }

    /// The data path belongs to the running server, so a blob may only name
    /// the one already configured.
    pub fn check_db_path(&self, config: &Config) -> Result<(), DispatchError> {
        match &self.db_path {
            Some(path) if !same_path(path, &config.chroma.path) => {
                Err(DispatchError::InvalidArgs(format!(
                    "db_path '{path}' differs from the server's data path '{}'; \
                     start a server for that path and point the config at it",
                    config.chroma.path
                )))
            }
            _ => Ok(()),
        }
    }
}

fn same_path(a: &str, b: &str) -> bool {
    let parts = |p: &str| -> Vec<String> {
        Path::new(p)
            .components()
            .filter(|c| !matches!(c, Component::CurDir))
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect()
    };
    parts(a) == parts(b)
}

/// Run `command` against the collection named in `config` and wrap the
/// outcome in a `{"success": ...}` envelope.
pub fn dispatch(command: &str, blob: &str, config: &Config) -> Value {
    envelope(run(command, blob, config, open_manager))
}

fn open_manager(config: &Config) -> Result<CollectionManager, DispatchError> {
    let embedder = build_embedder(&config.embedding)?;
    let client = ChromaClient::from_config(&config.chroma)?;
    Ok(CollectionManager::open(
        client,
        &config.chroma.collection,
        embedder,
    )?)
}

fn run<F>(
    command: &str,
    blob: &str,
    config: &Config,
    open: F,
) -> Result<Map<String, Value>, DispatchError>
where
    F: FnOnce(&Config) -> Result<CollectionManager, DispatchError>,
{
    if !COMMANDS.contains(&command) {
        return Err(DispatchError::UnknownCommand(command.to_string()));
    }
    let args = DispatchArgs::parse(blob)?;
    args.check_db_path(config)?;
    let config = args.apply(config);
    log::debug!(
        "dispatching '{command}' (collection {}, model {})",
        config.chroma.collection,
        config.embedding.model
    );
    let manager = open(&config)?;

    match command {
        "add_documents" => {
            let documents = args
                .documents
                .ok_or_else(|| DispatchError::InvalidArgs("'documents' is required".into()))?;
            let outcome = manager.add_documents(&documents)?;
            Ok(Map::from_iter([("count".into(), json!(outcome.count))]))
        }
        "search" => {
            let query = args
                .query
                .ok_or_else(|| DispatchError::InvalidArgs("'query' is required".into()))?;
            let hits = manager.search(
                &query,
                args.n_results.unwrap_or(DEFAULT_N_RESULTS),
                args.filter_dict,
            )?;
            Ok(Map::from_iter([("results".into(), json!(hits))]))
        }
        "info" => {
            let info = manager.info()?;
            Ok(Map::from_iter([
                ("document_count".into(), json!(info.document_count)),
                ("embedding_dimension".into(), json!(info.embedding_dimension)),
                ("model_name".into(), json!(info.model_name)),
            ]))
        }
        "delete" => {
            manager.delete_collection()?;
            Ok(Map::new())
        }
        other => Err(DispatchError::UnknownCommand(other.to_string())),
    }
}

fn envelope(result: Result<Map<String, Value>, DispatchError>) -> Value {
    match result {
        Ok(mut fields) => {
            fields.insert("success".into(), Value::Bool(true));
            Value::Object(fields)
        }
        Err(e) => {
            log::error!("{e}");
            json!({ "success": false, "error": e.to_string() })
        }
    }
}
