use std::sync::Mutex;

use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};

use super::{EmbedError, Embedder, l2_normalize, resolve_model};

/// A model the in-process runtime can serve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalModelSpec {
    /// Alias and full names that select this model.
    pub names: &'static [&'static str],
    pub canonical: &'static str,
    pub dimensions: usize,
}

impl LocalModelSpec {
    fn runtime_model(&self) -> EmbeddingModel {
        match self.canonical {
            "paraphrase-multilingual-mpnet-base-v2" => EmbeddingModel::ParaphraseMLMpnetBaseV2,
            "BAAI/bge-small-en-v1.5" => EmbeddingModel::BGESmallENV15,
            "BAAI/bge-base-en-v1.5" => EmbeddingModel::BGEBaseENV15,
            "BAAI/bge-large-en-v1.5" => EmbeddingModel::BGELargeENV15,
            "intfloat/multilingual-e5-small" => EmbeddingModel::MultilingualE5Small,
            "intfloat/multilingual-e5-base" => EmbeddingModel::MultilingualE5Base,
            "intfloat/multilingual-e5-large" => EmbeddingModel::MultilingualE5Large,
            _ => EmbeddingModel::AllMiniLML6V2,
        }
    }
}

const LOCAL_MODELS: &[LocalModelSpec] = &[
    LocalModelSpec {
        names: &["minilm", "all-MiniLM-L6-v2", "sentence-transformers/all-MiniLM-L6-v2"],
        canonical: "all-MiniLM-L6-v2",
        dimensions: 384,
    },
    LocalModelSpec {
        names: &["mpnet", "all-mpnet-base-v2", "paraphrase-multilingual-mpnet-base-v2"],
        canonical: "paraphrase-multilingual-mpnet-base-v2",
        dimensions: 768,
    },
    LocalModelSpec {
        names: &["bge-small", "BAAI/bge-small-en-v1.5"],
        canonical: "BAAI/bge-small-en-v1.5",
        dimensions: 384,
    },
    LocalModelSpec {
        names: &["bge-base", "BAAI/bge-base-en-v1.5"],
        canonical: "BAAI/bge-base-en-v1.5",
        dimensions: 768,
    },
    LocalModelSpec {
        names: &["bge", "bge-large", "BAAI/bge-large-en-v1.5"],
        canonical: "BAAI/bge-large-en-v1.5",
        dimensions: 1024,
    },
    LocalModelSpec {
        names: &["e5-small", "intfloat/e5-small-v2", "intfloat/multilingual-e5-small"],
        canonical: "intfloat/multilingual-e5-small",
        dimensions: 384,
    },
    LocalModelSpec {
        names: &["e5-base", "intfloat/e5-base-v2", "intfloat/multilingual-e5-base"],
        canonical: "intfloat/multilingual-e5-base",
        dimensions: 768,
    },
    LocalModelSpec {
        names: &["e5-large", "intfloat/e5-large-v2", "intfloat/multilingual-e5-large"],
        canonical: "intfloat/multilingual-e5-large",
        dimensions: 1024,
    },
];

const DEFAULT_MODEL: LocalModelSpec = LOCAL_MODELS[0];

/// Look up a locally servable model by alias or full name.
pub fn local_model(name: &str) -> Option<LocalModelSpec> {
    let full = resolve_model(name);
    LOCAL_MODELS
        .iter()
        .find(|spec| spec.names.contains(&name) || spec.names.contains(&full))
        .copied()
}

/// Names accepted by [`LocalEmbedder::new`], keyed by alias.
pub fn available_models() -> Vec<(&'static str, &'static str)> {
    LOCAL_MODELS
        .iter()
        .map(|spec| (spec.names[0], spec.canonical))
        .collect()
}

/// Local embedding provider using fastembed with ONNX runtime.
pub struct LocalEmbedder {
    model: Mutex<TextEmbedding>,
    spec: LocalModelSpec,
    normalize: bool,
}

impl LocalEmbedder {
    /// Load `model_name` (alias or full name).
    ///
    /// Models the runtime cannot serve fall back to all-MiniLM-L6-v2 with a
    /// warning. The runtime is CPU-only; `device = "cuda"` is accepted and
    /// ignored.
    pub fn new(model_name: &str, device: &str, normalize: bool) -> Result<Self, EmbedError> {
        match device {
            "auto" | "cpu" => {}
            "cuda" => log::warn!("device 'cuda' requested; the local runtime runs on CPU"),
            other => log::warn!("unknown device '{other}', using CPU"),
        }

        let spec = match local_model(model_name) {
            Some(spec) => spec,
            None => {
                log::warn!(
                    "model '{model_name}' is not available locally, falling back to {}",
                    DEFAULT_MODEL.canonical
                );
                DEFAULT_MODEL
            }
        };

        let model = match Self::load(spec) {
            Ok(model) => model,
            Err(e) if spec != DEFAULT_MODEL => {
                log::error!(
                    "failed to load {}: {e}; falling back to {}",
                    spec.canonical,
                    DEFAULT_MODEL.canonical
                );
                return Self::new(DEFAULT_MODEL.canonical, device, normalize);
            }
            Err(e) => return Err(e),
        };

        log::info!(
            "loaded local embedding model {} ({}d)",
            spec.canonical,
            spec.dimensions
        );
        Ok(Self {
            model: Mutex::new(model),
            spec,
            normalize,
        })
    }

    fn load(spec: LocalModelSpec) -> Result<TextEmbedding, EmbedError> {
        let options = InitOptions::new(spec.runtime_model()).with_show_download_progress(true);
        TextEmbedding::try_new(options).map_err(|e| EmbedError::ModelLoad(e.to_string()))
    }
}

impl Embedder for LocalEmbedder {
    fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let mut model = self
            .model
            .lock()
            .map_err(|_| EmbedError::EncodingFailed("model lock poisoned".into()))?;
        let mut vectors = model
            .embed(texts.to_vec(), None)
            .map_err(|e| EmbedError::EncodingFailed(e.to_string()))?;
        if self.normalize {
            vectors.iter_mut().for_each(|v| l2_normalize(v));
        }
        Ok(vectors)
    }

    fn dimensions(&self) -> usize {
        self.spec.dimensions
    }

    fn model_name(&self) -> &str {
        self.spec.canonical
    }

    fn provider_type(&self) -> &str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use std::sync::LazyLock;

    use super::*;
    use crate::embedding::cosine_similarity;

    #[test]
    fn lookup_by_alias_and_full_name_agree() {
        let by_alias = local_model("bge-base").unwrap();
        let by_name = local_model("BAAI/bge-base-en-v1.5").unwrap();
        assert_eq!(by_alias, by_name);
        assert_eq!(by_alias.dimensions, 768);
    }

    #[test]
    fn bge_alias_selects_large_model() {
        assert_eq!(local_model("bge").unwrap().dimensions, 1024);
    }

    #[test]
    fn unsupported_model_is_not_found() {
        assert!(local_model("pubmed").is_none());
        assert!(local_model("ada002").is_none());
    }

    #[test]
    fn available_models_lists_aliases() {
        let models = available_models();
        assert!(models.contains(&("minilm", "all-MiniLM-L6-v2")));
        assert_eq!(models.len(), LOCAL_MODELS.len());
    }

    // The tests below download the ONNX model on first use.

    static EMBEDDER: LazyLock<LocalEmbedder> =
        LazyLock::new(|| LocalEmbedder::new("minilm", "auto", true).unwrap());

    #[test]
    #[ignore]
    fn embed_single_text_returns_384_dims() {
        let result = EMBEDDER.embed(&["hello world"]).unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].len(), 384);
    }

    #[test]
    #[ignore]
    fn embeddings_are_normalized() {
        let result = EMBEDDER.embed(&["the cat sat on the mat"]).unwrap();
        let norm: f32 = result[0].iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-3, "norm = {norm}");
    }

    #[test]
    #[ignore]
    fn related_texts_score_higher_than_unrelated() {
        let result = EMBEDDER
            .embed(&[
                "Pembrolizumab is an immune checkpoint inhibitor.",
                "Keytruda is an immunotherapy used for lung cancer.",
                "The weather is nice today.",
            ])
            .unwrap();
        let related = cosine_similarity(&result[0], &result[1]);
        let unrelated = cosine_similarity(&result[0], &result[2]);
        assert!(related > unrelated, "related {related} <= unrelated {unrelated}");
    }

    #[test]
    #[ignore]
    fn unsupported_model_falls_back_to_minilm() {
        let embedder = LocalEmbedder::new("pubmed", "cuda", true).unwrap();
        assert_eq!(embedder.model_name(), "all-MiniLM-L6-v2");
        assert_eq!(embedder.dimensions(), 384);
    }

    #[test]
    #[ignore]
    fn empty_batch_returns_no_vectors() {
        assert!(EMBEDDER.embed(&[]).unwrap().is_empty());
    }
}
