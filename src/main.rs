// src/main.rs — kaizen entry point

use std::path::{Path, PathBuf};

use clap::Parser;

use kaizen::cli::{Cli, Commands};
use kaizen::infra::config::Config;
use kaizen::infra::{logger, paths};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load config (falls back to defaults if no config.toml)
    let config = if let Some(ref path) = cli.config {
        Config::load_from(Path::new(path))?
    } else {
        Config::load()?
    };

    // Initialize logging (respects RUST_LOG)
    logger::init_logging(&config.logging.level);

    match cli.command {
        Commands::Run {
            design,
            cycles,
            state,
            dry_run,
            yes,
        } => {
            let state_path = state.map(PathBuf::from).unwrap_or_else(paths::default_state_file);
            kaizen::cli::run::run_cycles(
                &config,
                Path::new(&design),
                cycles,
                &state_path,
                dry_run,
                yes,
                cli.quiet,
            )
            .await
        }
        Commands::Report { state } => {
            let state_path = state.map(PathBuf::from).unwrap_or_else(paths::default_state_file);
            kaizen::cli::report::run_report(&state_path)
        }
    }
}
