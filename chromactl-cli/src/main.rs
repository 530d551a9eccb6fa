mod config_cmd;
mod manage;

use std::path::PathBuf;
use std::process;

use chromactl_core::config::Config;
use chromactl_core::dispatch::dispatch;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "chromactl", about = "Run and manage a Chroma vector database")]
struct Cli {
    /// Path to the config file
    #[arg(long, global = true, default_value = "chromactl.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one JSON command (add_documents, search, info, delete) and print a JSON result
    Exec {
        /// Command name
        command: String,
        /// JSON argument blob
        #[arg(default_value = "{}")]
        args: String,
    },
    /// Start a local Chroma server and keep it running until Ctrl+C
    Serve,
    /// Show the configured collection's status
    Status,
    /// List all collections with their document counts
    List,
    /// Delete the configured collection
    Delete,
    /// Export ids, metadata and document previews to a JSON file
    Backup {
        #[arg(long, default_value = "chroma_backup.json")]
        output: PathBuf,
    },
    /// Run a test search against the configured collection
    Search {
        #[arg(default_value = manage::DEFAULT_TEST_QUERY)]
        query: String,
        #[arg(long, default_value_t = 3)]
        limit: usize,
    },
    /// Embed two texts and print their cosine similarity
    Similarity { a: String, b: String },
    /// View and modify configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Pretty-print the effective config as TOML
    Show {
        /// Optional section name to display
        section: Option<String>,
    },
    /// Get a config value by dot notation
    Get {
        /// Dot-notation key (e.g., chroma.port)
        key: String,
    },
    /// Set a scalar config value
    Set {
        /// Dot-notation key (e.g., embedding.model)
        key: String,
        /// The value to set
        value: String,
    },
    /// Validate the config file
    Validate,
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Exec { command, args } => {
            let (output, ok) = exec(&cli.config, &command, &args);
            println!("{output}");
            if !ok {
                process::exit(1);
            }
            return;
        }
        Command::Serve => manage::serve(&cli.config),
        Command::Status => manage::status(&cli.config),
        Command::List => manage::list(&cli.config),
        Command::Delete => manage::delete(&cli.config),
        Command::Backup { output } => manage::backup(&cli.config, &output),
        Command::Search { query, limit } => manage::search(&cli.config, &query, limit),
        Command::Similarity { a, b } => manage::similarity(&cli.config, &a, &b),
        Command::Config { action } => match action {
            ConfigAction::Show { section } => {
                config_cmd::show_config(&cli.config, section.as_deref())
            }
            ConfigAction::Get { key } => config_cmd::get_value(&cli.config, &key),
            ConfigAction::Set { key, value } => config_cmd::set_value(&cli.config, &key, &value),
            ConfigAction::Validate => config_cmd::validate_config(&cli.config),
        },
    };

    match result {
        Ok(output) => print!("{output}"),
        Err(msg) => {
            eprintln!("Error: {msg}");
            process::exit(1);
        }
    }
}

/// Dispatch one JSON command. Returns the JSON line and whether it succeeded.
fn exec(config_path: &std::path::Path, command: &str, args: &str) -> (String, bool) {
    let output = match Config::load_or_default(config_path) {
        Ok(config) => dispatch(command, args, &config),
        Err(e) => serde_json::json!({ "success": false, "error": e.to_string() }),
    };
    let ok = output["success"] == serde_json::Value::Bool(true);
    (output.to_string(), ok)
}
