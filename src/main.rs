use anyhow::{Context, Result, anyhow};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use cardwatch::config::AppConfig;
use cardwatch::models::DateTag;
use cardwatch::pipeline::PricePipeline;
use cardwatch::scheduler::RunScheduler;
use cardwatch::store::DatasetStore;
use cardwatch::utils::logging;

#[derive(Debug, Parser)]
#[command(name = "cardwatch", version, about = "Trading card price history scraper")]
struct Cli {
    /// Extra configuration file layered over config/default and config/local
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Scrape every category once and merge into the dataset
    Run {
        /// Date for the price column (defaults to today)
        #[arg(long)]
        date: Option<NaiveDate>,
        /// Restrict the run to these categories
        #[arg(long = "category")]
        categories: Vec<String>,
        /// Print the run summary as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run on the configured cron schedule until interrupted
    Schedule {
        /// Override scheduler.cron
        #[arg(long)]
        cron: Option<String>,
    },
    /// Print current prices, or the full history of one row
    Show {
        #[arg(long)]
        row: Option<usize>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut config = AppConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    let _log_guard = logging::init(&config.logging);

    match cli.command {
        Command::Run { date, categories, json } => {
            if !categories.is_empty() {
                config.scraper.categories = categories;
                config.validate()?;
            }
            let date = date.map(DateTag::from_date).unwrap_or_else(DateTag::today);

            let pipeline = PricePipeline::from_config(&config)?;
            let summary = pipeline.run_once(&date).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!(
                    "{}: {} observations, {} rows ({} new, {} images updated)",
                    summary.date, summary.observations, summary.rows, summary.stats.inserted, summary.stats.reconciled
                );
                for (category, error) in &summary.failed {
                    println!("  {} failed: {}", category, error);
                }
            }
            if !summary.saved {
                return Err(anyhow!("No category could be scraped; dataset unchanged"));
            }
        }
        Command::Schedule { cron } => {
            if let Some(cron) = cron {
                config.scheduler.cron = cron;
                config.validate()?;
            }

            info!("Starting cardwatch scheduler...");
            let pipeline = Arc::new(PricePipeline::from_config(&config)?);
            let mut scheduler = RunScheduler::new(pipeline, config.scheduler.clone()).await?;
            scheduler.start().await?;

            tokio::signal::ctrl_c().await?;
            info!("Shutting down...");
            scheduler.shutdown().await?;
        }
        Command::Show { row, limit } => {
            let store = DatasetStore::from_config(&config.storage);
            let history = store.load()?;

            match row {
                Some(position) => {
                    let card = history
                        .row(position)
                        .ok_or_else(|| anyhow!("No row {} ({} rows)", position, history.len()))?;
                    println!("{} {} {}", card.position_index, card.display_name, card.image_ref);
                    for (date, price) in history.series(position).unwrap_or_default() {
                        match price {
                            Some(price) => println!("  {}  {}", date, price),
                            None => println!("  {}  -", date),
                        }
                    }
                }
                None => {
                    let Some(latest) = history.latest_date() else {
                        println!("No price history at {}", store.price_path().display());
                        return Ok(());
                    };
                    println!("{} rows, current prices from {}", history.len(), latest);
                    for (position, card) in history.rows().iter().enumerate().take(limit) {
                        let price = history
                            .latest_price(position)
                            .map(|p| p.to_string())
                            .unwrap_or_else(|| "-".to_string());
                        println!("{:>5}  {:<12} {:<30} {}", position, card.position_index, card.display_name, price);
                    }
                }
            }
        }
    }

    Ok(())
}
