//! isoforge CLI tool.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use url::Url;

mod client;
mod commands;

use client::ApiClient;

#[derive(Parser)]
#[command(name = "isoforge")]
#[command(about = "Submit and follow archiso builds", long_about = None)]
#[command(version)]
struct Cli {
    /// API server URL
    #[arg(long, env = "ISOFORGE_API_URL", default_value = "http://localhost:8080")]
    api_url: Url,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Queue a new build
    Submit {
        /// JSON file with the build configuration
        #[arg(short, long)]
        file: Option<PathBuf>,
        /// Package to include; repeat for more
        #[arg(short, long = "package")]
        packages: Vec<String>,
    },
    /// Show server status
    Status,
    /// List active, queued and finished builds
    List,
    /// Show build details
    Show {
        /// Build ID
        id: String,
    },
    /// Print the build log
    Logs {
        /// Build ID
        id: String,
        /// Keep printing new lines until the build finishes
        #[arg(short, long)]
        follow: bool,
    },
    /// Download the ISO of a completed build
    Download {
        /// Build ID
        id: String,
        /// Destination file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let client = ApiClient::new(cli.api_url);

    match cli.command {
        Commands::Submit { file, packages } => {
            commands::builds::submit(&client, file.as_deref(), packages).await?;
        }
        Commands::Status => {
            commands::builds::status(&client).await?;
        }
        Commands::List => {
            commands::builds::list(&client).await?;
        }
        Commands::Show { id } => {
            commands::builds::show(&client, &id).await?;
        }
        Commands::Logs { id, follow } => {
            commands::builds::logs(&client, &id, follow).await?;
        }
        Commands::Download { id, output } => {
            commands::download::download(&client, &id, output).await?;
        }
    }

    Ok(())
}
