mod config;
mod discovery;
mod error;
mod extract;
mod fetch;
mod normalize;
mod pipeline;
mod record;
mod storage;

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use crate::config::{DiscoveryMode, Settings};
use crate::discovery::ProductLink;
use crate::fetch::{HttpFetcher, Renderer};
use crate::normalize::Normalizer;
use crate::storage::{sqlite, Sink, Storage};

#[derive(Parser)]
#[command(name = "catalog_scraper", about = "Product catalog scraper: link discovery and spec extraction")]
struct Cli {
    /// Configuration file (YAML, TOML or JSON); missing file means defaults
    #[arg(short, long, global = true, default_value = config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Discover product links on the listing pages and write the links file
    Links,
    /// Extract specs for the links in the links file and save them
    Specs {
        /// Max product pages to visit (default: all links)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Discover links, then extract and save in one pass
    Run {
        /// Max product pages to visit (default: all discovered)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Print the column mapping and table DDL the database sink would use
    Schema,
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
    let settings = config::load(&cli.config)?;
    info!(config = %cli.config.display(), category = %settings.category, "Loaded configuration");

    let result = match cli.command {
        Commands::Links => {
            let links = discover_links(&settings).await?;
            println!(
                "Discovered {} product links -> {}",
                links.len(),
                settings.links_path()
            );
            Ok(())
        }
        Commands::Specs { limit } => {
            let path = settings.links_path();
            let links = discovery::read_links(Path::new(&path))?;
            if links.is_empty() {
                warn!(path = %path, "Links file is empty; saving an empty batch");
            }
            scrape(&settings, take(links, limit)).await
        }
        Commands::Run { limit } => {
            let t_links = Instant::now();
            let links = discover_links(&settings).await?;
            println!(
                "Discovered {} product links in {:.1}s",
                links.len(),
                t_links.elapsed().as_secs_f64()
            );
            scrape(&settings, take(links, limit)).await
        }
        Commands::Schema => {
            print_schema(&settings)?;
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

/// Listing-API discovery reads JSON, so it goes through the plain HTTP fetcher.
async fn discover_links(settings: &Settings) -> Result<Vec<ProductLink>> {
    match settings.discovery.mode {
        DiscoveryMode::Heuristic => {
            let renderer = Renderer::from_settings(settings)?;
            pipeline::collect_links(settings, &renderer).await
        }
        DiscoveryMode::ListingApi => {
            let client = HttpFetcher::new(settings)?;
            pipeline::collect_links(settings, &client).await
        }
    }
}

async fn scrape(settings: &Settings, links: Vec<ProductLink>) -> Result<()> {
    let renderer = Renderer::from_settings(settings)?;
    let mut sink = Sink::open(settings)?;
    println!("Scraping {} product pages into {}...", links.len(), sink.describe());

    let t_scrape = Instant::now();
    let result = pipeline::scrape_specs(settings, &renderer, &mut sink, &links).await;
    sink.close()?;
    let summary = result?;

    println!(
        "Saved {} records ({} pages failed to fetch, {} failed to parse) in {:.1}s",
        summary.saved,
        summary.fetch_failed,
        summary.extract_failed,
        t_scrape.elapsed().as_secs_f64()
    );
    Ok(())
}

fn take(mut links: Vec<ProductLink>, limit: Option<usize>) -> Vec<ProductLink> {
    if let Some(n) = limit {
        links.truncate(n);
    }
    links
}

fn print_schema(settings: &Settings) -> Result<()> {
    let db = &settings.storage.database;
    let raw = Normalizer::from_settings(&settings.extract).columns();
    let invalid = sqlite::invalid_chars(&db.column_alphabet)?;
    let columns = sqlite::unique_columns(&raw, &invalid);

    println!("{:<32} | {}", "Field", "Column");
    println!("{}", "-".repeat(60));
    for (field, column) in raw.iter().zip(&columns) {
        println!("{:<32} | {}", field, column);
    }
    println!();
    for stmt in sqlite::schema_ddl(&db.table_name, &db.metadata_table, &columns) {
        println!("{};\n", stmt);
    }
    Ok(())
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
