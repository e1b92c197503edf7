//! Command-line interface.
//!
//! This module contains the CLI parser and dispatches to command-specific modules.

mod scrape;
mod url;

use clap::{Parser, Subcommand};

pub use scrape::ScrapeArgs;

#[derive(Parser)]
#[command(name = "carreviews")]
#[command(about = "Consumer review scraper for cars.com research pages")]
#[command(version)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl consumer reviews and write them as JSON Lines
    Scrape(ScrapeArgs),

    /// Print the review listing URL and car info for a make/model/year
    Url {
        #[arg(long)]
        make: String,
        #[arg(long)]
        model: String,
        /// Model year, e.g. 2021
        #[arg(long)]
        year: String,
        /// Listing page number
        #[arg(long, default_value = "1")]
        page: u32,
    },
}

/// Run the CLI.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Scrape(args) => scrape::cmd_scrape(args).await,
        Commands::Url {
            make,
            model,
            year,
            page,
        } => url::cmd_url(&make, &model, &year, page),
    }
}
