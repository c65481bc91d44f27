use clap::{Parser, Subcommand};
use ethers::types::Address;
use std::path::PathBuf;

use crate::display::Currency;

#[derive(Parser)]
#[command(name = "block-ledger")]
#[command(about = "Scan and reconcile per-block balance changes of Ethereum addresses")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Scan blocks for balance changes of an address
    Scan {
        #[arg(long)]
        address: Address,
        #[arg(long)]
        block_start: u64,
        #[arg(long)]
        block_end: Option<u64>,
        #[arg(long)]
        remove_prev_scan: bool,
    },
    /// List scans
    Scans,
    /// Print stored block records as JSON
    Blocks {
        #[arg(long)]
        address: Address,
        /// Skip reconciliation
        #[arg(long)]
        raw: bool,
    },
    /// Print stored transactions and call traces touching an address as JSON
    Traces {
        #[arg(long)]
        address: Address,
        /// Only this block
        #[arg(long)]
        block: Option<i64>,
    },
    /// Reconciliation table, totals and checks for a scanned address
    Report {
        #[arg(long)]
        address: Address,
        #[arg(long, value_enum, default_value_t = Currency::Eth)]
        currency: Currency,
        #[arg(long)]
        json: bool,
    },
    /// Reconcile block records read from a JSON file
    Reconcile {
        #[arg(short, long)]
        file: PathBuf,
        #[arg(long)]
        address: Address,
        #[arg(long, value_enum, default_value_t = Currency::Eth)]
        currency: Currency,
        #[arg(long)]
        json: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_arguments_parse() {
        let cli = Cli::try_parse_from([
            "block-ledger",
            "scan",
            "--address",
            "0x1111111111111111111111111111111111111111",
            "--block-start",
            "19000000",
            "--remove-prev-scan",
        ])
        .unwrap();

        match cli.command {
            Commands::Scan {
                address,
                block_start,
                block_end,
                remove_prev_scan,
            } => {
                assert_eq!(address, Address::repeat_byte(0x11));
                assert_eq!(block_start, 19_000_000);
                assert_eq!(block_end, None);
                assert!(remove_prev_scan);
            }
            _ => panic!("expected scan command"),
        }
    }

    #[test]
    fn report_currency_defaults_to_eth() {
        let cli = Cli::try_parse_from([
            "block-ledger",
            "report",
            "--address",
            "0x1111111111111111111111111111111111111111",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Report {
                currency: Currency::Eth,
                json: false,
                ..
            }
        ));
    }

    #[test]
    fn traces_can_be_limited_to_one_block() {
        let cli = Cli::try_parse_from([
            "block-ledger",
            "traces",
            "--address",
            "0x1111111111111111111111111111111111111111",
            "--block",
            "19000001",
        ])
        .unwrap();
        match cli.command {
            Commands::Traces { address, block } => {
                assert_eq!(address, Address::repeat_byte(0x11));
                assert_eq!(block, Some(19_000_001));
            }
            _ => panic!("expected traces command"),
        }
    }

    #[test]
    fn bad_address_is_rejected() {
        assert!(Cli::try_parse_from(["block-ledger", "blocks", "--address", "0xnothex"]).is_err());
    }
}
