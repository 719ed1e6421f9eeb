use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "forge")]
#[command(about = "Generate cluster workload descriptors from images, templates and source", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate an application from images, templates, or source repositories
    New(commands::new::NewArgs),

    /// Search for components matching a term
    Search {
        /// Term to search for (image, template, or file path)
        term: String,

        /// Only accept exact matches
        #[arg(long)]
        precise: bool,

        /// Registry request timeout in seconds
        #[arg(long, default_value = "10")]
        timeout: u64,

        /// Allow insecure registry connections
        #[arg(long)]
        insecure: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::New(args) => commands::new::run(args).await,
        Commands::Search { term, precise, timeout, insecure } => {
            commands::search::run(&term, precise, timeout, insecure).await
        }
    }
}
