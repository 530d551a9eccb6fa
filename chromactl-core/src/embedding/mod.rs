pub mod local;
pub mod remote;

use std::sync::Arc;

use rand::Rng;
use rand_distr::StandardNormal;

use crate::config::{EmbeddingConfig, EmbeddingProvider, FallbackPolicy};

/// Errors that can occur during embedding.
#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    /// Failed to load or initialize the embedding model.
    #[error("model load error: {0}")]
    ModelLoad(String),
    /// Failed to encode input texts into vectors.
    #[error("encoding failed: {0}")]
    EncodingFailed(String),
    /// The inference server could not be reached or answered with an error.
    #[error("network error: {0}")]
    Network(String),
    /// The inference server answered with something we could not use.
    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

/// Trait abstracting text-to-vector embedding.
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts into vectors.
    fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError>;

    /// Dimensionality of the output vectors.
    fn dimensions(&self) -> usize;

    /// Model identifier string.
    fn model_name(&self) -> &str;

    /// Provider type identifier (e.g., "local", "remote").
    fn provider_type(&self) -> &str;
}

/// Short model aliases accepted wherever a model name is.
pub const MODEL_ALIASES: &[(&str, &str)] = &[
    ("minilm", "all-MiniLM-L6-v2"),
    ("mpnet", "all-mpnet-base-v2"),
    ("pubmed", "microsoft/BiomedNLP-PubMedBERT-base-uncased-abstract"),
    ("ada002", "text-embedding-ada-002"),
    ("bge", "BAAI/bge-large-en-v1.5"),
    ("bge-large", "BAAI/bge-large-en-v1.5"),
    ("bge-base", "BAAI/bge-base-en-v1.5"),
    ("bge-small", "BAAI/bge-small-en-v1.5"),
    ("e5-large", "intfloat/e5-large-v2"),
    ("e5-base", "intfloat/e5-base-v2"),
    ("e5-small", "intfloat/e5-small-v2"),
];

/// Expand a model alias; names that are not aliases pass through unchanged.
pub fn resolve_model(name: &str) -> &str {
    MODEL_ALIASES
        .iter()
        .find(|(alias, _)| *alias == name)
        .map(|(_, full)| *full)
        .unwrap_or(name)
}

/// Cosine similarity of two vectors. Zero-length vectors score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Scale `v` to unit L2 norm in place.
pub fn l2_normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    let denom = norm + 1e-8;
    for x in v.iter_mut() {
        *x /= denom;
    }
}

/// `count` vectors of `dim` standard-normal samples.
pub fn random_vectors(count: usize, dim: usize) -> Vec<Vec<f32>> {
    let mut rng = rand::rng();
    (0..count)
        .map(|_| (0..dim).map(|_| rng.sample::<f32, _>(StandardNormal)).collect())
        .collect()
}

/// Embed two texts and return their cosine similarity.
pub fn similarity(embedder: &dyn Embedder, a: &str, b: &str) -> Result<f32, EmbedError> {
    let vectors = embedder.embed(&[a, b])?;
    match vectors.as_slice() {
        [va, vb] => Ok(cosine_similarity(va, vb)),
        other => Err(EmbedError::MalformedResponse(format!(
            "expected 2 vectors, got {}",
            other.len()
        ))),
    }
}

/// Wraps an embedder so that backend failures yield random vectors instead
/// of errors. Downstream storage keeps working; search quality degrades.
pub struct FallbackEmbedder<E> {
    inner: E,
}

impl<E: Embedder> FallbackEmbedder<E> {
    pub fn new(inner: E) -> Self {
        Self { inner }
    }
}

impl<E: Embedder> Embedder for FallbackEmbedder<E> {
    fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        match self.inner.embed(texts) {
            Ok(vectors) => Ok(vectors),
            Err(e) => {
                log::warn!(
                    "embedding with {} failed, substituting random vectors: {e}",
                    self.inner.model_name()
                );
                Ok(random_vectors(texts.len(), self.inner.dimensions()))
            }
        }
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    fn provider_type(&self) -> &str {
        self.inner.provider_type()
    }
}

fn with_policy<E: Embedder + 'static>(embedder: E, policy: FallbackPolicy) -> Arc<dyn Embedder> {
    match policy {
        FallbackPolicy::Random => Arc::new(FallbackEmbedder::new(embedder)),
        FallbackPolicy::Error => Arc::new(embedder),
    }
}

/// Build the embedder described by `config`.
pub fn build_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>, EmbedError> {
    match config.provider {
        EmbeddingProvider::Local => {
            let embedder =
                local::LocalEmbedder::new(&config.model, &config.device, config.normalize)?;
            Ok(with_policy(embedder, config.fallback))
        }
        EmbeddingProvider::Remote => {
            let embedder =
                remote::RemoteEmbedder::new(&config.endpoint, &config.model, config.normalize)?;
            Ok(with_policy(embedder, config.fallback))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{FailingEmbedder, MockEmbedder};

    #[test]
    fn aliases_resolve_to_full_names() {
        assert_eq!(resolve_model("minilm"), "all-MiniLM-L6-v2");
        assert_eq!(resolve_model("bge"), "BAAI/bge-large-en-v1.5");
        assert_eq!(resolve_model("e5-small"), "intfloat/e5-small-v2");
    }

    #[test]
    fn unknown_alias_passes_through() {
        assert_eq!(resolve_model("my-org/custom-model"), "my-org/custom-model");
    }

    #[test]
    fn cosine_of_identical_vectors_is_one() {
        let v = [0.3, 0.4, 0.5];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_of_orthogonal_vectors_is_zero() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
    }

    #[test]
    fn cosine_with_zero_vector_is_zero() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn l2_normalize_produces_unit_vector() {
        let mut v = vec![3.0, 4.0];
        l2_normalize(&mut v);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5, "norm = {norm}");
    }

    #[test]
    fn l2_normalize_leaves_zero_vector_alone() {
        let mut v = vec![0.0, 0.0];
        l2_normalize(&mut v);
        assert_eq!(v, vec![0.0, 0.0]);
    }

    #[test]
    fn random_vectors_have_requested_shape() {
        let vectors = random_vectors(3, 768);
        assert_eq!(vectors.len(), 3);
        assert!(vectors.iter().all(|v| v.len() == 768));
        assert!(vectors.iter().flatten().all(|x| x.is_finite()));
        assert_ne!(vectors[0], vectors[1]);
    }

    #[test]
    fn fallback_passes_through_successful_embeddings() {
        let embedder = FallbackEmbedder::new(MockEmbedder::new(4));
        let direct = MockEmbedder::new(4).embed(&["abc"]).unwrap();
        assert_eq!(embedder.embed(&["abc"]).unwrap(), direct);
    }

    #[test]
    fn fallback_substitutes_random_vectors_on_failure() {
        let embedder = FallbackEmbedder::new(FailingEmbedder::new(16));
        let vectors = embedder.embed(&["a", "b"]).unwrap();
        assert_eq!(vectors.len(), 2);
        assert!(vectors.iter().all(|v| v.len() == 16));
    }

    #[test]
    fn fallback_reports_inner_identity() {
        let embedder = FallbackEmbedder::new(FailingEmbedder::new(16));
        assert_eq!(embedder.dimensions(), 16);
        assert_eq!(embedder.model_name(), "failing-embedder");
        assert_eq!(embedder.provider_type(), "mock-failing");
    }

    #[test]
    fn fallback_with_empty_input_returns_empty() {
        let embedder = FallbackEmbedder::new(FailingEmbedder::new(16));
        assert!(embedder.embed(&[]).unwrap().is_empty());
    }

    #[test]
    fn similarity_uses_cosine_of_both_embeddings() {
        let embedder = MockEmbedder::new(8);
        let same = similarity(&embedder, "kitten", "kitten").unwrap();
        assert!((same - 1.0).abs() < 1e-6);
    }

    #[test]
    fn similarity_propagates_errors() {
        let embedder = FailingEmbedder::new(8);
        assert!(similarity(&embedder, "a", "b").is_err());
    }

    #[test]
    fn build_remote_embedder_with_error_policy() {
        let config = EmbeddingConfig {
            provider: EmbeddingProvider::Remote,
            model: "bge-small".into(),
            endpoint: "http://127.0.0.1:9".into(),
            fallback: FallbackPolicy::Error,
            ..EmbeddingConfig::default()
        };
        let embedder = build_embedder(&config).unwrap();
        assert_eq!(embedder.provider_type(), "remote");
        assert_eq!(embedder.dimensions(), 384);
        // Nothing listens on port 9; with the error policy the failure surfaces.
        assert!(embedder.embed(&["x"]).is_err());
    }

    #[test]
    fn build_remote_embedder_with_random_policy_never_fails() {
        let config = EmbeddingConfig {
            provider: EmbeddingProvider::Remote,
            model: "bge-base".into(),
            endpoint: "http://127.0.0.1:9".into(),
            fallback: FallbackPolicy::Random,
            ..EmbeddingConfig::default()
        };
        let embedder = build_embedder(&config).unwrap();
        let vectors = embedder.embed(&["x"]).unwrap();
        assert_eq!(vectors[0].len(), 768);
    }
}
