mod config;
mod db;
mod error;
mod parser;
mod pipeline;
mod render;
mod utils;

use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use config::Settings;
use pipeline::RunOptions;

#[derive(Parser)]
#[command(name = "joblist_scraper", about = "Job board scraper feeding the jobs table")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the jobs table
    Init,
    /// Scrape the initial page range, then prompt for more pages
    Run {
        /// First page of the initial range (default from config)
        #[arg(long)]
        first_page: Option<u32>,
        /// Last page of the initial range, inclusive (default from config)
        #[arg(long)]
        last_page: Option<u32>,
        /// Exit after the initial range instead of prompting
        #[arg(long)]
        no_interactive: bool,
    },
    /// Scrape a single page and exit
    Page {
        /// Page number, 1 or higher
        #[arg(value_parser = clap::value_parser!(u32).range(1..))]
        number: u32,
    },
    /// Check the store and show listing counts
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let settings = Settings::load().context("Failed to load settings")?;
    info!(db = ?settings.db_path, renderer = ?settings.renderer, "Loaded settings");

    let result = match cli.command {
        Commands::Init => {
            let store = db::JobStore::open(&settings.db_path)?;
            store.init_schema()?;
            store.close()?;
            println!("Created jobs table in {:?}", settings.db_path);
            Ok(())
        }
        Commands::Run {
            first_page,
            last_page,
            no_interactive,
        } => {
            let opts = RunOptions {
                first_page: first_page.unwrap_or(settings.first_page).max(1),
                last_page: last_page.unwrap_or(settings.last_page),
                interactive: !no_interactive,
            };
            println!(
                "Scraping {} pages {}-{}{}",
                settings.base_url,
                opts.first_page,
                opts.last_page,
                if opts.interactive { ", then manual input" } else { "" }
            );
            let stats = pipeline::run(settings, opts).await?;
            stats.print();
            Ok(())
        }
        Commands::Page { number } => {
            let stats = pipeline::run_page(settings, number).await?;
            stats.print();
            Ok(())
        }
        Commands::Stats => {
            let store = db::JobStore::open(&settings.db_path)?;
            store.init_schema()?;
            store.ping().context("Store is not reachable")?;
            let s = store.stats()?;
            println!("Store:     {:?} (connected)", settings.db_path);
            println!("Listings:  {}", s.total);
            for (job_type, count) in &s.by_type {
                println!("  {:<11} {}", job_type, count);
            }
            if let Some(newest) = s.newest {
                println!("Newest:    {}", newest);
            }
            store.close()?;
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", utils::format_duration(elapsed));
    }

    result
}
