//! Contributions client CLI application
//!
//! Command-line interface for bulk submission, download and deletion of
//! contributed datasets against a contributions API.

use std::process;

use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use contribs_client::cli::{handle_delete, handle_download, handle_submit, Cli, Commands};
use contribs_client::errors::Result;

#[tokio::main]
async fn main() {
    let result = run().await;

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

/// Main application logic
async fn run() -> Result<()> {
    // Load environment variables from .env file if it exists
    dotenv::dotenv().ok();

    let cli = Cli::parse_args();
    init_logging(&cli);

    info!("contribs_client v{} starting", env!("CARGO_PKG_VERSION"));

    match &cli.command {
        Commands::Submit(args) => handle_submit(args.clone(), &cli.global).await,
        Commands::Download(args) => handle_download(args.clone(), &cli.global).await,
        Commands::Delete(args) => handle_delete(args.clone(), &cli.global).await,
    }
}

/// Initialize logging based on CLI verbosity settings
fn init_logging(cli: &Cli) {
    let log_level = cli.log_level();

    let filter = EnvFilter::from_default_env()
        .add_directive(format!("contribs_client={}", log_level).parse().unwrap());

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(cli.global.very_verbose)
        .init();
}
