//! Management commands: run the server, inspect, back up and probe a
//! collection.

use std::fmt::Write as _;
use std::path::Path;

use chromactl_core::chroma::ChromaClient;
use chromactl_core::config::Config;
use chromactl_core::embedding::{build_embedder, similarity as embed_similarity};
use chromactl_core::launcher::ChromaServer;
use chromactl_core::manager::{self, CollectionManager};

/// Query used by `chromactl search` when none is given.
pub const DEFAULT_TEST_QUERY: &str = "펨브롤리주맙";

const CONTENT_PREVIEW_CHARS: usize = 100;

fn load_config(config_path: &Path) -> Result<Config, String> {
    Config::load_or_default(config_path).map_err(|e| e.to_string())
}

fn connect(config: &Config) -> Result<ChromaClient, String> {
    ChromaClient::from_config(&config.chroma).map_err(|e| e.to_string())
}

fn open_manager(config: &Config) -> Result<CollectionManager, String> {
    let embedder = build_embedder(&config.embedding).map_err(|e| e.to_string())?;
    CollectionManager::open(connect(config)?, &config.chroma.collection, embedder)
        .map_err(|e| e.to_string())
}

fn to_json<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|e| format!("<unprintable: {e}>"))
}

pub fn serve(config_path: &Path) -> Result<String, String> {
    let config = load_config(config_path)?;
    let mut server = ChromaServer::start(&config.chroma).map_err(|e| e.to_string())?;

    let client = connect(&config)?;
    let collection = client
        .get_or_create_collection(&config.chroma.collection)
        .map_err(|e| e.to_string())?;
    let count = client.count(&collection.id).map_err(|e| e.to_string())?;

    println!("chroma server running");
    println!("  server:     {}", server.base_url());
    println!("  data:       {}", config.chroma.path);
    println!("  collection: {} ({count} documents)", collection.name);
    if let Some(pid) = server.pid() {
        println!("  pid:        {pid}");
    }
    println!("Press Ctrl+C to stop.");

    wait_for_ctrl_c()?;
    server.stop();
    Ok("Chroma server stopped.\n".to_string())
}

fn wait_for_ctrl_c() -> Result<(), String> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| format!("failed to start signal handler: {e}"))?;
    runtime
        .block_on(tokio::signal::ctrl_c())
        .map_err(|e| format!("failed to listen for Ctrl+C: {e}"))
}

pub fn status(config_path: &Path) -> Result<String, String> {
    let config = load_config(config_path)?;
    let client = connect(&config)?;
    let collection = client
        .get_or_create_collection(&config.chroma.collection)
        .map_err(|e| e.to_string())?;
    let status = manager::collection_status(&client, &collection).map_err(|e| e.to_string())?;

    let mut out = String::from("=== Chroma status ===\n");
    let _ = writeln!(out, "collection: {}", status.name);
    let _ = writeln!(out, "documents:  {}", status.document_count);
    let _ = writeln!(out, "data:       {}", config.chroma.path);
    let _ = writeln!(out, "server:     {}", status.server_url);
    if let Some(metadata) = &status.sample_metadata {
        let _ = writeln!(out, "sample metadata: {}", to_json(metadata));
    }
    Ok(out)
}

pub fn list(config_path: &Path) -> Result<String, String> {
    let config = load_config(config_path)?;
    let collections =
        manager::list_collections(&connect(&config)?).map_err(|e| e.to_string())?;
    if collections.is_empty() {
        return Ok("No collections.\n".to_string());
    }
    Ok(collections
        .iter()
        .map(|c| format!("{}: {} documents\n", c.name, c.count))
        .collect())
}

pub fn delete(config_path: &Path) -> Result<String, String> {
    let config = load_config(config_path)?;
    let name = &config.chroma.collection;
    connect(&config)?
        .delete_collection(name)
        .map_err(|e| format!("failed to delete collection '{name}': {e}"))?;
    Ok(format!("Deleted collection '{name}'.\n"))
}

pub fn backup(config_path: &Path, output: &Path) -> Result<String, String> {
    let config = load_config(config_path)?;
    let client = connect(&config)?;
    let collection = client
        .get_or_create_collection(&config.chroma.collection)
        .map_err(|e| e.to_string())?;
    let backup = manager::backup_collection(&client, &collection).map_err(|e| e.to_string())?;
    let json = serde_json::to_string_pretty(&backup).map_err(|e| e.to_string())?;
    std::fs::write(output, json)
        .map_err(|e| format!("failed to write {}: {e}", output.display()))?;
    Ok(format!(
        "Backed up {} documents to {}\n",
        backup.document_count,
        output.display()
    ))
}

pub fn search(config_path: &Path, query: &str, limit: usize) -> Result<String, String> {
    let config = load_config(config_path)?;
    let hits = open_manager(&config)?
        .search(query, limit, None)
        .map_err(|e| e.to_string())?;

    let mut out = format!("Search: '{query}'\n");
    if hits.is_empty() {
        out.push_str("No results.\n");
        return Ok(out);
    }
    let _ = writeln!(out, "{} results", hits.len());
    for (i, hit) in hits.iter().enumerate() {
        let preview: String = hit.page_content.chars().take(CONTENT_PREVIEW_CHARS).collect();
        let _ = writeln!(
            out,
            "\n{}. score {:.4} (distance {:.4})",
            i + 1,
            hit.score,
            hit.distance
        );
        let _ = writeln!(out, "   metadata: {}", to_json(&hit.metadata));
        let _ = writeln!(out, "   content:  {preview}...");
    }
    Ok(out)
}

pub fn similarity(config_path: &Path, a: &str, b: &str) -> Result<String, String> {
    let config = load_config(config_path)?;
    let embedder = build_embedder(&config.embedding).map_err(|e| e.to_string())?;
    let score = embed_similarity(embedder.as_ref(), a, b).map_err(|e| e.to_string())?;
    Ok(format!(
        "model:      {} ({}, {} dims)\nsimilarity: {score:.4}\n",
        embedder.model_name(),
        embedder.provider_type(),
        embedder.dimensions()
    ))
}
