//! HTTP handlers for the embedding inference protocol.

use std::sync::Arc;

use arc_swap::ArcSwap;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use chromactl_core::embedding::local::{LocalEmbedder, available_models, local_model};
use chromactl_core::embedding::remote::{
    EmbedRequest, EmbedResponse, HealthStatus, LoadModelRequest, LoadModelResponse, ModelList,
};
use chromactl_core::embedding::{EmbedError, Embedder, l2_normalize};

/// Builds an embedder for a model name. Runs on the blocking pool.
pub type ModelLoader = Arc<dyn Fn(&str) -> Result<Arc<dyn Embedder>, EmbedError> + Send + Sync>;

/// Loader over the local model runtime. Names the runtime cannot serve, and
/// loads that end up on a different model, are errors.
pub fn local_loader(device: String) -> ModelLoader {
    Arc::new(move |name: &str| {
        let Some(spec) = local_model(name) else {
            return Err(EmbedError::ModelLoad(format!("unknown model '{name}'")));
        };
        // Vectors are normalized per request, so models load un-normalized.
        let embedder = LocalEmbedder::new(name, &device, false)?;
        if embedder.model_name() != spec.canonical {
            return Err(EmbedError::ModelLoad(format!(
                "'{name}' could not be loaded (got {})",
                embedder.model_name()
            )));
        }
        Ok(Arc::new(embedder) as Arc<dyn Embedder>)
    })
}

/// The model currently serving requests, under the name it was requested by.
pub struct ActiveModel {
    pub name: String,
    pub embedder: Arc<dyn Embedder>,
}

pub struct AppState {
    pub active: ArcSwap<Option<ActiveModel>>,
    pub loader: ModelLoader,
    /// Held while a model loads so concurrent switches do not race.
    load_lock: tokio::sync::Mutex<()>,
}

impl AppState {
    pub fn new(loader: ModelLoader) -> Self {
        Self {
            active: ArcSwap::from_pointee(None),
            loader,
            load_lock: tokio::sync::Mutex::new(()),
        }
    }

    fn current(&self) -> Option<(String, Arc<dyn Embedder>)> {
        let guard = self.active.load();
        (**guard)
            .as_ref()
            .map(|m| (m.name.clone(), Arc::clone(&m.embedder)))
    }

    /// Make `name` the active model, loading it unless it already is.
    pub async fn ensure_model(&self, name: &str) -> Result<Arc<dyn Embedder>, EmbedError> {
        let _guard = self.load_lock.lock().await;
        if let Some((current, embedder)) = self.current() {
            if current == name {
                return Ok(embedder);
            }
        }

        log::info!("loading embedding model '{name}'");
        let loader = Arc::clone(&self.loader);
        let requested = name.to_string();
        let embedder = tokio::task::spawn_blocking(move || loader(&requested))
            .await
            .map_err(|e| EmbedError::ModelLoad(format!("loader task failed: {e}")))??;

        log::info!(
            "model '{name}' ready ({}, {} dims)",
            embedder.model_name(),
            embedder.dimensions()
        );
        self.active.store(Arc::new(Some(ActiveModel {
            name: name.to_string(),
            embedder: Arc::clone(&embedder),
        })));
        Ok(embedder)
    }
}

/// Error body, `{"detail": "..."}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    pub detail: String,
}

pub(crate) fn internal_error(detail: String) -> (StatusCode, Json<ApiError>) {
    log::error!("{detail}");
    (StatusCode::INTERNAL_SERVER_ERROR, Json(ApiError { detail }))
}

fn load_failed(model: &str, e: EmbedError) -> (StatusCode, Json<ApiError>) {
    internal_error(format!("failed to load model '{model}': {e}"))
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/embed", post(embed))
        .route("/models", get(models))
        .route("/load_model", post(load_model))
        .with_state(state)
}

/// `GET /health`
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "healthy".into(),
        model_loaded: state.current().is_some(),
        available_models: available_models()
            .into_iter()
            .map(|(alias, _)| alias.to_string())
            .collect(),
    })
}

/// `POST /embed`: switches models first when the request names another one.
pub async fn embed(
    State(state): State<Arc<AppState>>,
    Json(request): Json<EmbedRequest>,
) -> Result<Json<EmbedResponse>, (StatusCode, Json<ApiError>)> {
    let embedder = state
        .ensure_model(&request.model_name)
        .await
        .map_err(|e| load_failed(&request.model_name, e))?;

    let texts = request.texts;
    let normalize = request.normalize;
    let model_name = embedder.model_name().to_string();
    let embeddings = tokio::task::spawn_blocking(move || {
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
        let mut vectors = embedder.embed(&refs)?;
        if normalize {
            vectors.iter_mut().for_each(|v| l2_normalize(v));
        }
        Ok::<_, EmbedError>(vectors)
    })
    .await
    .map_err(|e| internal_error(format!("embedding task failed: {e}")))?
    .map_err(|e| internal_error(format!("embedding failed: {e}")))?;

    Ok(Json(EmbedResponse {
        embedding_dim: embeddings.first().map_or(0, Vec::len),
        text_count: embeddings.len(),
        embeddings,
        model_name,
    }))
}

/// `GET /models`
pub async fn models(State(state): State<Arc<AppState>>) -> Json<ModelList> {
    Json(ModelList {
        available_models: available_models()
            .into_iter()
            .map(|(alias, name)| (alias.to_string(), name.to_string()))
            .collect(),
        current_model: state.current().map(|(name, _)| name),
    })
}

/// `POST /load_model`
pub async fn load_model(
    State(state): State<Arc<AppState>>,
    Json(request): Json<LoadModelRequest>,
) -> Result<Json<LoadModelResponse>, (StatusCode, Json<ApiError>)> {
    state
        .ensure_model(&request.model_name)
        .await
        .map_err(|e| load_failed(&request.model_name, e))?;
    Ok(Json(LoadModelResponse {
        status: "success".into(),
        model: request.model_name,
    }))
}
