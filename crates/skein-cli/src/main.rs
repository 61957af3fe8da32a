//! Skein command-line tool
//!
//! Renders page descriptions offline: templates and data are served from a
//! directory, the scheduler runs on its virtual clock, and the resulting
//! markup per anchor is printed as JSON.

mod commands;
mod engine;
mod page;
mod transport;

use clap::{Parser, Subcommand};
use commands::{check, render};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "skein")]
#[command(about = "Offline renderer for Skein page descriptions", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a page description and print the markup per anchor
    Render {
        /// Page description (TOML)
        page: PathBuf,
        /// Directory served to template and data requests (defaults to the
        /// page's directory)
        #[arg(short, long)]
        root: Option<PathBuf>,
        /// Runtime configuration (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Simulated response latency in milliseconds
        #[arg(long, default_value_t = 0)]
        latency: u64,
        /// Substitute `{{path}}` placeholders from node data
        #[arg(short, long)]
        placeholders: bool,
        /// Print the snapshot on one line
        #[arg(long)]
        compact: bool,
    },

    /// Validate a runtime configuration and page descriptions
    Check {
        /// Page descriptions to check against the configuration
        pages: Vec<PathBuf>,
        /// Runtime configuration (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Render {
            page,
            root,
            config,
            latency,
            placeholders,
            compact,
        } => render::execute(render::RenderArgs {
            page,
            root,
            config,
            latency,
            placeholders,
            compact,
        }),
        Commands::Check { pages, config } => check::execute(check::CheckArgs { config, pages }),
    }
}
