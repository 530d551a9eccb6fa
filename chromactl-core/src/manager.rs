//! A handle on one collection plus the embedder that feeds it.
//!
//! The manager computes embeddings and reshapes requests and responses;
//! storage, indexing and ranking all stay inside the database server.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::chroma::{
    AddRecords, ChromaClient, ChromaError, Collection, GetRequest, Include, QueryRequest,
    QueryResponse,
};
use crate::document::{Document, Metadata, SearchHit, document_id};
use crate::embedding::{EmbedError, Embedder};

/// Results returned by [`CollectionManager::search`] when the caller does
/// not say otherwise.
pub const DEFAULT_N_RESULTS: usize = 5;

/// Characters of each document kept in a backup.
const BACKUP_PREVIEW_CHARS: usize = 200;

#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error(transparent)]
    Chroma(#[from] ChromaError),
    #[error(transparent)]
    Embed(#[from] EmbedError),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AddOutcome {
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionInfo {
    pub document_count: usize,
    pub embedding_dimension: usize,
    pub model_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionSummary {
    pub name: String,
    pub id: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionStatus {
    pub name: String,
    pub document_count: usize,
    pub server_url: String,
    /// Metadata of the first stored record, if any.
    pub sample_metadata: Option<Metadata>,
}

/// A record as stored in the collection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredRecord {
    pub id: String,
    pub document: Option<String>,
    pub metadata: Option<Metadata>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupEntry {
    pub id: String,
    pub metadata: Option<Metadata>,
    /// Leading characters of the document followed by `...`; empty when the
    /// record has no document.
    pub document: String,
}

/// Metadata export of a whole collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Backup {
    pub collection_name: String,
    pub document_count: usize,
    pub exported_at: DateTime<Utc>,
    pub documents: Vec<BackupEntry>,
}

pub struct CollectionManager {
    client: ChromaClient,
    collection: Collection,
    embedder: Arc<dyn Embedder>,
}

impl CollectionManager {
    /// Attach to `name`, creating the collection when it does not exist yet.
    pub fn open(
        client: ChromaClient,
        name: &str,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self, ManagerError> {
        let collection = match client.get_collection(name) {
            Ok(collection) => {
                log::info!("loaded existing collection '{name}'");
                collection
            }
            Err(e) if e.is_not_found() => {
                let collection = client.create_collection(name, None, true)?;
                log::info!("created collection '{name}'");
                collection
            }
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            client,
            collection,
            embedder,
        })
    }

    pub fn name(&self) -> &str {
        &self.collection.name
    }

    pub fn client(&self) -> &ChromaClient {
        &self.client
    }

    pub fn embedder(&self) -> &dyn Embedder {
        self.embedder.as_ref()
    }

    /// Embed and store `documents`. Content and metadata go to the server
    /// unchanged.
    pub fn add_documents(&self, documents: &[Document]) -> Result<AddOutcome, ManagerError> {
        if documents.is_empty() {
            return Ok(AddOutcome { count: 0 });
        }

        let texts: Vec<&str> = documents.iter().map(|d| d.page_content.as_str()).collect();
        let embeddings = self.embedder.embed(&texts)?;
        if embeddings.len() != documents.len() {
            return Err(EmbedError::MalformedResponse(format!(
                "expected {} embeddings, got {}",
                documents.len(),
                embeddings.len()
            ))
            .into());
        }

        let metadatas: Vec<Option<Metadata>> = documents
            .iter()
            .map(|d| (!d.metadata.is_empty()).then(|| d.metadata.clone()))
            .collect();
        let records = AddRecords {
            ids: documents
                .iter()
                .enumerate()
                .map(|(i, d)| document_id(i, d))
                .collect(),
            embeddings,
            metadatas: metadatas.iter().any(Option::is_some).then_some(metadatas),
            documents: Some(texts.iter().map(|t| t.to_string()).collect()),
        };
        self.client.add(&self.collection.id, &records)?;

        log::info!("added {} documents to '{}'", documents.len(), self.name());
        Ok(AddOutcome {
            count: documents.len(),
        })
    }

    /// Nearest `n_results` documents to `query`, best first.
    ///
    /// `filter` is passed through as the server's `where` clause.
    pub fn search(
        &self,
        query: &str,
        n_results: usize,
        filter: Option<serde_json::Value>,
    ) -> Result<Vec<SearchHit>, ManagerError> {
        if n_results == 0 {
            return Err(ManagerError::InvalidArgument(
                "n_results must be at least 1".into(),
            ));
        }
        let mut embeddings = self.embedder.embed(&[query])?;
        let Some(query_embedding) = embeddings.pop() else {
            return Err(EmbedError::MalformedResponse("no embedding for query".into()).into());
        };

        let request = QueryRequest {
            query_embeddings: vec![query_embedding],
            n_results,
            filter: filter.filter(|f| !is_empty_object(f)),
            where_document: None,
            include: vec![Include::Documents, Include::Metadatas, Include::Distances],
        };
        let response = self.client.query(&self.collection.id, &request)?;
        let hits = hits_from_response(response)?;

        log::info!("search returned {} results", hits.len());
        Ok(hits)
    }

    pub fn info(&self) -> Result<CollectionInfo, ManagerError> {
        Ok(CollectionInfo {
            document_count: self.client.count(&self.collection.id)?,
            embedding_dimension: self.embedder.dimensions(),
            model_name: self.embedder.model_name().to_string(),
        })
    }

    /// Drop the collection and everything in it.
    pub fn delete_collection(self) -> Result<(), ManagerError> {
        self.client.delete_collection(&self.collection.name)?;
        log::info!("deleted collection '{}'", self.collection.name);
        Ok(())
    }

    /// The first `limit` stored records.
    pub fn peek(&self, limit: usize) -> Result<Vec<StoredRecord>, ManagerError> {
        peek_records(&self.client, &self.collection, limit)
    }

    pub fn status(&self) -> Result<CollectionStatus, ManagerError> {
        collection_status(&self.client, &self.collection)
    }

    /// Export ids, metadata and a short preview of every stored document.
    pub fn backup(&self) -> Result<Backup, ManagerError> {
        backup_collection(&self.client, &self.collection)
    }
}

// Read-only views below need no embedder.

pub fn peek_records(
    client: &ChromaClient,
    collection: &Collection,
    limit: usize,
) -> Result<Vec<StoredRecord>, ManagerError> {
    let response = client.get(
        &collection.id,
        &GetRequest {
            limit: Some(limit),
            include: vec![Include::Documents, Include::Metadatas],
            ..GetRequest::default()
        },
    )?;
    Ok(records_from_get(response.ids, response.documents, response.metadatas))
}

/// Record count plus the metadata of the first stored record.
pub fn collection_status(
    client: &ChromaClient,
    collection: &Collection,
) -> Result<CollectionStatus, ManagerError> {
    let document_count = client.count(&collection.id)?;
    let sample_metadata = if document_count > 0 {
        peek_records(client, collection, 1)?
            .into_iter()
            .next()
            .and_then(|r| r.metadata)
    } else {
        None
    };
    Ok(CollectionStatus {
        name: collection.name.clone(),
        document_count,
        server_url: client.base_url().to_string(),
        sample_metadata,
    })
}

pub fn backup_collection(
    client: &ChromaClient,
    collection: &Collection,
) -> Result<Backup, ManagerError> {
    let response = client.get(
        &collection.id,
        &GetRequest {
            include: vec![Include::Documents, Include::Metadatas],
            ..GetRequest::default()
        },
    )?;
    let documents: Vec<BackupEntry> =
        records_from_get(response.ids, response.documents, response.metadatas)
            .into_iter()
            .map(|r| BackupEntry {
                id: r.id,
                metadata: r.metadata,
                document: r.document.as_deref().map(preview).unwrap_or_default(),
            })
            .collect();
    Ok(Backup {
        collection_name: collection.name.clone(),
        document_count: documents.len(),
        exported_at: Utc::now(),
        documents,
    })
}

/// Every collection on the server with its record count.
pub fn list_collections(client: &ChromaClient) -> Result<Vec<CollectionSummary>, ManagerError> {
    client
        .list_collections()?
        .into_iter()
        .map(|c| {
            let count = client.count(&c.id)?;
            Ok(CollectionSummary {
                name: c.name,
                id: c.id,
                count,
            })
        })
        .collect()
}

fn is_empty_object(value: &serde_json::Value) -> bool {
    value.as_object().is_some_and(|m| m.is_empty())
}

fn preview(document: &str) -> String {
    if document.is_empty() {
        return String::new();
    }
    let head: String = document.chars().take(BACKUP_PREVIEW_CHARS).collect();
    format!("{head}...")
}

/// Reshape the first result row of a query into hits.
fn hits_from_response(response: QueryResponse) -> Result<Vec<SearchHit>, ManagerError> {
    let Some(ids) = response.ids.into_iter().next() else {
        return Ok(Vec::new());
    };
    let distances = response
        .distances
        .and_then(|rows| rows.into_iter().next())
        .ok_or_else(|| ChromaError::MalformedResponse("query response has no distances".into()))?;
    if distances.len() != ids.len() {
        return Err(ChromaError::MalformedResponse(format!(
            "{} ids but {} distances",
            ids.len(),
            distances.len()
        ))
        .into());
    }
    let mut documents = response
        .documents
        .and_then(|rows| rows.into_iter().next())
        .unwrap_or_default()
        .into_iter();
    let mut metadatas = response
        .metadatas
        .and_then(|rows| rows.into_iter().next())
        .unwrap_or_default()
        .into_iter();

    Ok(distances
        .into_iter()
        .map(|distance| {
            let content = documents.next().flatten().unwrap_or_default();
            let metadata = metadatas.next().flatten().unwrap_or_default();
            SearchHit::new(content, metadata, distance)
        })
        .collect())
}

fn records_from_get(
    ids: Vec<String>,
    documents: Option<Vec<Option<String>>>,
    metadatas: Option<Vec<Option<Metadata>>>,
) -> Vec<StoredRecord> {
    let mut documents = documents.unwrap_or_default().into_iter();
    let mut metadatas = metadatas.unwrap_or_default().into_iter();
    ids.into_iter()
        .map(|id| StoredRecord {
            id,
            document: documents.next().flatten(),
            metadata: metadatas.next().flatten(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;
    use crate::document::MetadataValue;
    use crate::testutil::{
        CapturedRequest, FailingEmbedder, MockEmbedder, MockResponse, MockServer,
    };

    const COLLECTION: &str = r#"{"id":"c-1","name":"hira_medical_docs","metadata":null}"#;

    /// Answers the routes the manager uses with canned bodies.
    fn chroma_server(query_body: &'static str, get_body: &'static str) -> MockServer {
        MockServer::start(move |req: &CapturedRequest| {
            match (req.method.as_str(), req.path.as_str()) {
                ("GET", "/api/v1/collections/hira_medical_docs") => {
                    MockResponse::json(200, COLLECTION)
                }
                ("GET", "/api/v1/collections") => MockResponse::json(
                    200,
                    r#"[{"id":"c-1","name":"hira_medical_docs","metadata":null},{"id":"c-2","name":"other","metadata":null}]"#,
                ),
                ("POST", "/api/v1/collections/c-1/add") => MockResponse::json(201, "true"),
                ("POST", "/api/v1/collections/c-1/query") => MockResponse::json(200, query_body),
                ("POST", "/api/v1/collections/c-1/get") => MockResponse::json(200, get_body),
                ("GET", "/api/v1/collections/c-1/count") => MockResponse::json(200, "2"),
                ("GET", "/api/v1/collections/c-2/count") => MockResponse::json(200, "0"),
                ("DELETE", "/api/v1/collections/hira_medical_docs") => {
                    MockResponse::json(200, "null")
                }
                _ => MockResponse::json(404, r#"{"detail":"Not Found"}"#),
            }
        })
    }

    fn open(server: &MockServer, embedder: Arc<dyn Embedder>) -> CollectionManager {
        let client = ChromaClient::new(&server.url(), Duration::from_secs(5)).unwrap();
        CollectionManager::open(client, "hira_medical_docs", embedder).unwrap()
    }

    fn body_of(server: &MockServer, path: &str) -> serde_json::Value {
        let request = server
            .requests()
            .into_iter()
            .find(|r| r.path == path)
            .unwrap_or_else(|| panic!("no request to {path}"));
        serde_json::from_str(&request.body).unwrap()
    }

    #[test]
    fn open_creates_missing_collection() {
        let created = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&created);
        let server = MockServer::start(move |req| match req.method.as_str() {
            "GET" => MockResponse::json(
                500,
                r#"{"error":"ValueError('Collection hira_medical_docs does not exist.')"}"#,
            ),
            _ => {
                *flag.lock().unwrap() = true;
                MockResponse::json(200, COLLECTION)
            }
        });
        let manager = open(&server, Arc::new(MockEmbedder::new(4)));
        assert_eq!(manager.name(), "hira_medical_docs");
        assert!(*created.lock().unwrap());
    }

    #[test]
    fn open_propagates_other_errors() {
        let server = MockServer::start(|_| MockResponse::json(500, r#"{"error":"disk full"}"#));
        let client = ChromaClient::new(&server.url(), Duration::from_secs(5)).unwrap();
        let result = CollectionManager::open(client, "docs", Arc::new(MockEmbedder::new(4)));
        assert!(matches!(
            result,
            Err(ManagerError::Chroma(ChromaError::Http { status: 500, .. }))
        ));
    }

    #[test]
    fn add_documents_sends_ids_embeddings_and_content() {
        let server = chroma_server("{}", "{}");
        let manager = open(&server, Arc::new(MockEmbedder::new(4)));
        let docs = vec![
            Document::new("first document").with_metadata("id", "doc_1"),
            Document::new("second document").with_metadata("boardId", "HIRA"),
        ];

        let outcome = manager.add_documents(&docs).unwrap();
        assert_eq!(outcome, AddOutcome { count: 2 });

        let body = body_of(&server, "/api/v1/collections/c-1/add");
        assert_eq!(body["ids"][0], "doc_1");
        assert!(body["ids"][1].as_str().unwrap().starts_with("doc_1_"));
        assert_eq!(body["documents"][1], "second document");
        assert_eq!(body["metadatas"][1]["boardId"], "HIRA");
        assert_eq!(body["embeddings"].as_array().unwrap().len(), 2);
        assert_eq!(body["embeddings"][0].as_array().unwrap().len(), 4);
    }

    #[test]
    fn add_documents_without_metadata_omits_the_column() {
        let server = chroma_server("{}", "{}");
        let manager = open(&server, Arc::new(MockEmbedder::new(4)));
        manager.add_documents(&[Document::new("bare")]).unwrap();
        let body = body_of(&server, "/api/v1/collections/c-1/add");
        assert!(body.get("metadatas").is_none());
    }

    #[test]
    fn add_empty_batch_is_a_no_op() {
        let server = chroma_server("{}", "{}");
        let manager = open(&server, Arc::new(FailingEmbedder::new(4)));
        assert_eq!(manager.add_documents(&[]).unwrap().count, 0);
        assert!(
            server
                .requests()
                .iter()
                .all(|r| !r.path.ends_with("/add"))
        );
    }

    #[test]
    fn add_surfaces_embedding_failure() {
        let server = chroma_server("{}", "{}");
        let manager = open(&server, Arc::new(FailingEmbedder::new(4)));
        let result = manager.add_documents(&[Document::new("x")]);
        assert!(matches!(result, Err(ManagerError::Embed(_))));
    }

    #[test]
    fn search_converts_distances_to_scores() {
        let server = chroma_server(
            r#"{"ids":[["a","b"]],"documents":[["pembrolizumab criteria","other"]],"metadatas":[[{"boardId":"HIRA"},null]],"distances":[[0.25,0.75]],"embeddings":null}"#,
            "{}",
        );
        let manager = open(&server, Arc::new(MockEmbedder::new(4)));

        let hits = manager.search("pembrolizumab", 2, None).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].page_content, "pembrolizumab criteria");
        assert_eq!(hits[0].score, 0.75);
        assert_eq!(hits[0].distance, 0.25);
        assert_eq!(hits[0].metadata["boardId"], MetadataValue::Str("HIRA".into()));
        assert!(hits[1].metadata.is_empty());

        let body = body_of(&server, "/api/v1/collections/c-1/query");
        assert_eq!(body["n_results"], 2);
        assert!(body.get("where").is_none());
        assert_eq!(
            body["include"],
            serde_json::json!(["documents", "metadatas", "distances"])
        );
    }

    #[test]
    fn search_forwards_filter_as_where_clause() {
        let server = chroma_server(r#"{"ids":[[]],"distances":[[]]}"#, "{}");
        let manager = open(&server, Arc::new(MockEmbedder::new(4)));
        let filter = serde_json::json!({"boardId": "HIRAA030023010000"});
        let hits = manager.search("q", 5, Some(filter)).unwrap();
        assert!(hits.is_empty());
        let body = body_of(&server, "/api/v1/collections/c-1/query");
        assert_eq!(body["where"]["boardId"], "HIRAA030023010000");
    }

    #[test]
    fn empty_filter_is_dropped() {
        let server = chroma_server(r#"{"ids":[[]],"distances":[[]]}"#, "{}");
        let manager = open(&server, Arc::new(MockEmbedder::new(4)));
        manager.search("q", 5, Some(serde_json::json!({}))).unwrap();
        let body = body_of(&server, "/api/v1/collections/c-1/query");
        assert!(body.get("where").is_none());
    }

    #[test]
    fn search_on_empty_result_set_returns_no_hits() {
        let server = chroma_server(r#"{"ids":[],"distances":[]}"#, "{}");
        let manager = open(&server, Arc::new(MockEmbedder::new(4)));
        assert!(manager.search("q", 5, None).unwrap().is_empty());
    }

    #[test]
    fn search_without_distances_is_malformed() {
        let server = chroma_server(r#"{"ids":[["a"]],"documents":[["x"]]}"#, "{}");
        let manager = open(&server, Arc::new(MockEmbedder::new(4)));
        assert!(matches!(
            manager.search("q", 5, None),
            Err(ManagerError::Chroma(ChromaError::MalformedResponse(_)))
        ));
    }

    #[test]
    fn zero_results_requested_is_rejected() {
        let server = chroma_server("{}", "{}");
        let manager = open(&server, Arc::new(MockEmbedder::new(4)));
        assert!(matches!(
            manager.search("q", 0, None),
            Err(ManagerError::InvalidArgument(_))
        ));
    }

    #[test]
    fn info_reports_count_and_embedder_identity() {
        let server = chroma_server("{}", "{}");
        let manager = open(&server, Arc::new(MockEmbedder::new(16)));
        let info = manager.info().unwrap();
        assert_eq!(
            info,
            CollectionInfo {
                document_count: 2,
                embedding_dimension: 16,
                model_name: "test-embedder".into(),
            }
        );
    }

    #[test]
    fn delete_collection_deletes_by_name() {
        let server = chroma_server("{}", "{}");
        let manager = open(&server, Arc::new(MockEmbedder::new(4)));
        manager.delete_collection().unwrap();
        assert!(
            server
                .requests()
                .iter()
                .any(|r| r.method == "DELETE" && r.path == "/api/v1/collections/hira_medical_docs")
        );
    }

    #[test]
    fn status_includes_sample_metadata() {
        let server = chroma_server(
            "{}",
            r#"{"ids":["a"],"documents":["text"],"metadatas":[{"boardId":"HIRA"}]}"#,
        );
        let manager = open(&server, Arc::new(MockEmbedder::new(4)));
        let status = manager.status().unwrap();
        assert_eq!(status.document_count, 2);
        assert_eq!(status.server_url, server.url());
        assert_eq!(
            status.sample_metadata.unwrap()["boardId"],
            MetadataValue::Str("HIRA".into())
        );
        let body = body_of(&server, "/api/v1/collections/c-1/get");
        assert_eq!(body["limit"], 1);
    }

    #[test]
    fn backup_previews_documents() {
        let long = "가".repeat(250);
        let body: &'static str = Box::leak(
            format!(
                r#"{{"ids":["a","b"],"documents":["{long}",null],"metadatas":[{{"page":1}},null]}}"#
            )
            .into_boxed_str(),
        );
        let server = chroma_server("{}", body);
        let manager = open(&server, Arc::new(MockEmbedder::new(4)));

        let backup = manager.backup().unwrap();
        assert_eq!(backup.collection_name, "hira_medical_docs");
        assert_eq!(backup.document_count, 2);
        let first = &backup.documents[0];
        assert_eq!(first.document.chars().count(), 203);
        assert!(first.document.ends_with("..."));
        assert_eq!(first.metadata.as_ref().unwrap()["page"], MetadataValue::Int(1));
        assert_eq!(backup.documents[1].document, "");
        assert!(backup.documents[1].metadata.is_none());
    }

    #[test]
    fn status_and_backup_work_from_client_alone() {
        let server = chroma_server(
            "{}",
            r#"{"ids":["a"],"documents":["text"],"metadatas":[{"boardId":"HIRA"}]}"#,
        );
        let client = ChromaClient::new(&server.url(), Duration::from_secs(5)).unwrap();
        let collection = client.get_collection("hira_medical_docs").unwrap();

        let status = collection_status(&client, &collection).unwrap();
        assert_eq!(status.name, "hira_medical_docs");
        assert_eq!(status.document_count, 2);

        let backup = backup_collection(&client, &collection).unwrap();
        assert_eq!(backup.documents[0].document, "text...");
    }

    #[test]
    fn status_of_empty_collection_skips_the_sample() {
        let server = MockServer::start(|req| match req.path.as_str() {
            "/api/v1/collections/c-1/count" => MockResponse::json(200, "0"),
            _ => MockResponse::json(404, r#"{"detail":"Not Found"}"#),
        });
        let client = ChromaClient::new(&server.url(), Duration::from_secs(5)).unwrap();
        let collection = Collection {
            id: "c-1".into(),
            name: "empty".into(),
            metadata: None,
        };
        let status = collection_status(&client, &collection).unwrap();
        assert_eq!(status.document_count, 0);
        assert!(status.sample_metadata.is_none());
        assert_eq!(server.requests().len(), 1);
    }

    #[test]
    fn short_documents_still_get_ellipsis() {
        assert_eq!(preview("short"), "short...");
        assert_eq!(preview(""), "");
    }

    #[test]
    fn list_collections_counts_each() {
        let server = chroma_server("{}", "{}");
        let client = ChromaClient::new(&server.url(), Duration::from_secs(5)).unwrap();
        let summaries = list_collections(&client).unwrap();
        assert_eq!(
            summaries,
            vec![
                CollectionSummary {
                    name: "hira_medical_docs".into(),
                    id: "c-1".into(),
                    count: 2
                },
                CollectionSummary {
                    name: "other".into(),
                    id: "c-2".into(),
                    count: 0
                },
            ]
        );
    }
}
