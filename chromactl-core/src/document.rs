//! Documents handed to the vector database and hits coming back from it.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Number of leading characters hashed when a document carries no id.
const ID_HASH_PREFIX_CHARS: usize = 50;
const ID_HASH_HEX_LEN: usize = 16;

/// A scalar metadata value. The database only accepts scalars.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(n) => write!(f, "{n}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Str(s) => f.write_str(s),
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<i64> for MetadataValue {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<f64> for MetadataValue {
    fn from(x: f64) -> Self {
        Self::Float(x)
    }
}

impl From<bool> for MetadataValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

pub type Metadata = BTreeMap<String, MetadataValue>;

/// Free text plus scalar metadata, in the shape the document pipeline emits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(rename = "pageContent")]
    pub page_content: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Document {
    pub fn new(page_content: impl Into<String>) -> Self {
        Self {
            page_content: page_content.into(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<MetadataValue>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

/// Identifier used when storing `doc` at position `index` of a batch.
///
/// `metadata.id` wins when present; otherwise the id is derived from the
/// position and a hash of the first characters of the content.
pub fn document_id(index: usize, doc: &Document) -> String {
    if let Some(id) = doc.metadata.get("id") {
        return id.to_string();
    }
    let prefix: String = doc.page_content.chars().take(ID_HASH_PREFIX_CHARS).collect();
    let digest = hex::encode(Sha256::digest(prefix.as_bytes()));
    format!("doc_{index}_{}", &digest[..ID_HASH_HEX_LEN])
}

/// Convert a raw engine distance into a similarity score.
///
/// Not clamped: the range depends on the collection's distance metric.
pub fn similarity_from_distance(distance: f32) -> f32 {
    1.0 - distance
}

/// One ranked search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    #[serde(rename = "pageContent")]
    pub page_content: String,
    pub metadata: Metadata,
    pub score: f32,
    pub distance: f32,
}

impl SearchHit {
    pub fn new(page_content: String, metadata: Metadata, distance: f32) -> Self {
        Self {
            page_content,
            metadata,
            score: similarity_from_distance(distance),
            distance,
        }
    }
}
