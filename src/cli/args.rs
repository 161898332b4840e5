//! CLI argument parsing using clap.

use clap::{
    Parser, Subcommand,
    builder::styling::{AnsiColor, Effects, Styles},
};
use std::path::PathBuf;

fn clap_cargo_style() -> Styles {
    Styles::styled()
        .header(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

/// Workspace synchronization hub
#[derive(Parser)]
#[command(
    name = "tabsync",
    version = env!("CARGO_PKG_VERSION"),
    about = "Keep every open viewer tab in sync with the files on disk",
    next_line_help = true,
    styles = clap_cargo_style(),
    after_help = "Quick Start:\n  $ tabsync init                 # Write .tabsync/settings.toml\n  $ tabsync serve                # Start the hub on 127.0.0.1:8001\n  $ tabsync tail ./docs          # Print change events for a directory"
)]
pub struct Cli {
    /// Path to custom settings.toml file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize project
    #[command(about = "Set up .tabsync directory with default configuration")]
    Init {
        /// Force overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Show current configuration settings
    #[command(about = "Display active settings")]
    Config,

    /// Start the hub
    #[command(
        about = "Start the sync hub (WebSocket events + file API)",
        after_help = "Examples:\n  tabsync serve\n  tabsync serve --bind 0.0.0.0:8001 --max-connections 16"
    )]
    Serve {
        /// Address to bind (overrides config)
        #[arg(long, env = "TABSYNC_BIND")]
        bind: Option<String>,

        /// Connection ceiling (overrides config)
        #[arg(long)]
        max_connections: Option<usize>,

        /// Debounce window in milliseconds (overrides config)
        #[arg(long)]
        debounce_ms: Option<u64>,
    },

    /// Subscribe to a running hub and print events
    #[command(
        about = "Print change events for a directory",
        after_help = "Press Enter to retry after the hub rejected the connection."
    )]
    Tail {
        /// Directory to watch through the hub
        root: PathBuf,

        /// Hub WebSocket URL (overrides config)
        #[arg(long)]
        url: Option<String>,

        /// Print events as JSON lines
        #[arg(long)]
        json: bool,
    },
}
