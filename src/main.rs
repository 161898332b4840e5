use clap::Parser;

use tabsync::cli::commands::{init, serve, tail};
use tabsync::cli::{Cli, Commands};
use tabsync::config::Settings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Settings::load_from(path),
        None => Settings::load(),
    }
    .unwrap_or_else(|e| {
        eprintln!("Configuration error: {e}");
        eprintln!("Using default settings");
        Settings::default()
    });

    tabsync::logging::init_with_config(&config.logging);

    match cli.command {
        Commands::Init { force } => init::run_init(force),
        Commands::Config => init::run_config(&config),
        Commands::Serve {
            bind,
            max_connections,
            debounce_ms,
        } => {
            let args = serve::ServeArgs {
                bind,
                max_connections,
                debounce_ms,
            };
            serve::run(args, config).await
        }
        Commands::Tail { root, url, json } => {
            tail::run(tail::TailArgs { root, url, json }, config).await
        }
    }
}
