use anyhow::Result;
use serde::Serialize;
use std::fmt::Write;

use crate::accounting::{
    check_balances, find_mismatches, parse_amount, reconcile, summarize, LedgerError,
};
use crate::display::{format_amount, format_ether, Currency};
use crate::models::{BalanceChecks, BlockRecord, BlocksSummary, Mismatch};

/// Reconciled view of one address's block history.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub address: String,
    pub blocks: Vec<BlockRecord>,
    pub summary: BlocksSummary,
    pub checks: BalanceChecks,
    /// Mismatches left after reconciliation.
    pub mismatches: Vec<Mismatch>,
}

impl Report {
    pub fn build(records: &[BlockRecord], tracked_address: &str) -> Result<Self, LedgerError> {
        let blocks = reconcile(records, tracked_address)?;
        let summary = summarize(&blocks)?;
        let checks = check_balances(&summary)?;
        let mismatches = find_mismatches(&blocks, tracked_address)?;

        Ok(Self {
            address: tracked_address.to_string(),
            blocks,
            summary,
            checks,
            mismatches,
        })
    }

    pub fn render(&self, currency: Currency) -> Result<String> {
        let mut out = String::new();
        let amount = |value| format_amount(value, currency);

        writeln!(out, "Address: {} ({})", self.address, currency.code())?;
        writeln!(
            out,
            "{:>5} {:>10} {:<26} {:>14} {:>14} {:>14} {:>14} {:>14} {:>14} {:>14}",
            "No",
            "Block",
            "Timestamp",
            "Balance",
            "Balance diff",
            "Consensus",
            "MEV",
            "Block reward",
            "Incoming",
            "Outgoing"
        )?;
        for (idx, block) in self.blocks.iter().enumerate() {
            let field = |name, value: &str| -> Result<String> {
                Ok(amount(parse_amount(block, name, value)?)?)
            };
            writeln!(
                out,
                "{:>5} {:>10} {:<26} {:>14} {:>14} {:>14} {:>14} {:>14} {:>14} {:>14}",
                idx,
                block.block_number,
                block.timestamp,
                field("balance", &block.balance)?,
                field("balanceDiff", &block.balance_diff)?,
                field("consensusReward", &block.consensus_reward)?,
                field("mevReward", &block.mev_reward)?,
                field("blockReward", &block.block_reward)?,
                field("amountIncoming", &block.amount_incoming)?,
                field("amountOutgoing", &block.amount_outgoing)?,
            )?;
        }

        let summary = &self.summary;
        writeln!(
            out,
            "{:>5} {:>10} {:<26} {:>14} {:>14} {:>14} {:>14} {:>14} {:>14} {:>14}",
            summary.total_entries,
            "-",
            "-",
            amount(summary.total_diff)?,
            amount(summary.total_sum_diff)?,
            amount(summary.total_consensus_reward)?,
            amount(summary.total_mev_reward)?,
            amount(summary.total_block_reward)?,
            amount(summary.total_amount_incoming)?,
            amount(summary.total_amount_outgoing)?,
        )?;

        let checks = &self.checks;
        writeln!(out)?;
        writeln!(out, "Checks")?;
        writeln!(
            out,
            "  Difference between last and first block: {} Wei",
            checks.balance_change
        )?;
        writeln!(out, "  Sum of changes: {} Wei", checks.sum_of_changes)?;
        writeln!(out, "  Sum of incoming: {}", amount(checks.sum_incoming)?)?;
        writeln!(out, "  Sum of outgoing: {}", amount(checks.sum_outgoing)?)?;
        writeln!(out, "  Balance sum: {}", amount(checks.balance_sum)?)?;
        writeln!(
            out,
            "  Status: {}",
            if checks.consistent { "OK" } else { "MISMATCH" }
        )?;

        for mismatch in &self.mismatches {
            writeln!(
                out,
                "  Block {}: diff {} ETH, explained {} ETH, unexplained {} ETH",
                mismatch.block_number,
                format_ether(mismatch.left),
                format_ether(mismatch.right),
                format_ether(mismatch.difference)
            )?;
        }

        Ok(out)
    }
}
