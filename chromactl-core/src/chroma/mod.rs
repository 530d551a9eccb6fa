//! Typed client for the Chroma vector database REST API (`/api/v1`).
//!
//! Indexing, ranking and persistence all happen inside the server; this
//! module only shapes requests and decodes responses.

mod client;
mod types;

pub use client::ChromaClient;
pub use types::{
    AddRecords, Collection, CreateCollection, DeleteRequest, GetRequest, GetResponse, Include,
    QueryRequest, QueryResponse,
};

/// Errors returned by [`ChromaClient`].
#[derive(Debug, thiserror::Error)]
pub enum ChromaError {
    /// Connection refused, timeout, DNS, and similar transport failures.
    #[error("network error: {0}")]
    Network(String),
    /// The server answered with a non-success status.
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },
    /// The collection (or route) does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// The response body could not be decoded.
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

impl ChromaError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
