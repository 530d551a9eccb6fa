mod api;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;

use chromactl_core::config::Config;
use chromactl_core::embedding::local::available_models;

/// Embedding inference server backed by the local model runtime.
#[derive(Parser)]
#[command(name = "chromactl-embedd")]
struct Args {
    /// Path to the config file
    #[arg(long, default_value = "chromactl.toml")]
    config: PathBuf,
    /// Override `embed_server.host`
    #[arg(long)]
    host: Option<String>,
    /// Override `embed_server.port`
    #[arg(long)]
    port: Option<u16>,
    /// Override the model loaded at startup
    #[arg(long)]
    model: Option<String>,
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let args = Args::parse();

    let mut config = Config::load_or_default(&args.config).unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        std::process::exit(1);
    });
    if let Some(host) = args.host {
        config.embed_server.host = host;
    }
    if let Some(port) = args.port {
        config.embed_server.port = port;
    }
    if let Some(model) = args.model {
        config.embed_server.model = model;
    }

    let loader = api::local_loader(config.embedding.device.clone());
    let state = Arc::new(api::AppState::new(loader));

    println!("available models:");
    for (alias, name) in available_models() {
        println!("  {alias}: {name}");
    }
    if let Err(e) = state.ensure_model(&config.embed_server.model).await {
        log::warn!(
            "failed to load default model '{}': {e}; serving without a model until one is \
             requested",
            config.embed_server.model
        );
    }

    let addr = config.embed_server.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| {
            eprintln!("Error: failed to bind to {addr}: {e}");
            std::process::exit(1);
        });
    println!("chromactl-embedd listening on http://{addr}");

    if let Err(e) = axum::serve(listener, api::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        eprintln!("Error: server error: {e}");
        std::process::exit(1);
    }
}

async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        log::error!("failed to install Ctrl+C handler: {e}");
        std::future::pending::<()>().await;
    }
    println!("\nShutting down...");
}
