mod accounting;
mod cli;
mod config;
mod database;
mod display;
mod ethereum;
mod models;
mod report;
mod scanner;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use config::Config;
use database::Database;
use ethereum::format_address;
use log::{info, warn};
use models::BlockRecord;
use report::Report;
use scanner::Scanner;

fn print_report(report: &Report, currency: display::Currency, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        print!("{}", report.render(currency)?);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = Config::load()?;

    match cli.command {
        Commands::Scan {
            address,
            block_start,
            block_end,
            remove_prev_scan,
        } => {
            let database = Database::new(&config.database_url).await?;
            if remove_prev_scan {
                warn!("Deleting scan for address {}", format_address(address));
                database.delete_scan(&format_address(address)).await?;
            }
            let scanner = Scanner::new(config, database)?;
            scanner.scan_address(address, block_start, block_end).await?;
        }
        Commands::Scans => {
            let database = Database::new(&config.database_url).await?;
            let scans = database.get_all_scans().await?;
            println!("{}", serde_json::to_string_pretty(&scans)?);
        }
        Commands::Blocks { address, raw } => {
            let database = Database::new(&config.database_url).await?;
            let key = format_address(address);
            let blocks = database.get_blocks(&key).await?;
            let blocks = if raw {
                blocks
            } else {
                accounting::reconcile(&blocks, &key)?
            };
            println!("{}", serde_json::to_string_pretty(&blocks)?);
        }
        Commands::Traces { address, block } => {
            let database = Database::new(&config.database_url).await?;
            let key = format_address(address);
            let output = serde_json::json!({
                "transactions": database.get_txs(&key, block).await?,
                "traces": database.get_traces(&key, block).await?,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        Commands::Report {
            address,
            currency,
            json,
        } => {
            let database = Database::new(&config.database_url).await?;
            let key = format_address(address);
            let blocks = database.get_blocks(&key).await?;
            let report = Report::build(&blocks, &key)?;
            print_report(&report, currency, json)?;
        }
        Commands::Reconcile {
            file,
            address,
            currency,
            json,
        } => {
            let content = std::fs::read_to_string(&file)?;
            let mut records: Vec<BlockRecord> = serde_json::from_str(&content)?;
            records.sort_by_key(|record| record.block_number);
            info!("Loaded {} block records from {}", records.len(), file.display());

            let report = Report::build(&records, &format_address(address))?;
            print_report(&report, currency, json)?;
        }
    }

    Ok(())
}
