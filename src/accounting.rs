use log::{debug, warn};
use thiserror::Error;

use crate::models::{BalanceChecks, BlockRecord, BlocksSummary, Mismatch, Wei};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Invalid amount in {field} of block {block_number}: {value:?}")]
    InvalidAmount {
        field: &'static str,
        block_number: i64,
        value: String,
    },

    #[error("Amount overflow computing {field} of block {block_number}")]
    Overflow {
        field: &'static str,
        block_number: i64,
    },

    #[error("Amount overflow computing {0}")]
    TotalOverflow(&'static str),
}

/// Parsed monetary flows of a single record.
struct Flows {
    balance_diff: Wei,
    consensus_reward: Wei,
    mev_reward: Wei,
    block_reward: Wei,
    amount_incoming: Wei,
    amount_outgoing: Wei,
}

impl Flows {
    fn parse(record: &BlockRecord) -> Result<Self, LedgerError> {
        Ok(Self {
            balance_diff: parse_amount(record, "balanceDiff", &record.balance_diff)?,
            consensus_reward: parse_amount(record, "consensusReward", &record.consensus_reward)?,
            mev_reward: parse_amount(record, "mevReward", &record.mev_reward)?,
            block_reward: parse_amount(record, "blockReward", &record.block_reward)?,
            amount_incoming: parse_amount(record, "amountIncoming", &record.amount_incoming)?,
            amount_outgoing: parse_amount(record, "amountOutgoing", &record.amount_outgoing)?,
        })
    }

    /// consensus + mev + block + incoming - outgoing
    fn right(&self, block_number: i64) -> Result<Wei, LedgerError> {
        [self.mev_reward, self.block_reward, self.amount_incoming]
            .into_iter()
            .try_fold(self.consensus_reward, |sum, value| sum.checked_add(value))
            .and_then(|sum| sum.checked_sub(self.amount_outgoing))
            .ok_or(LedgerError::Overflow {
                field: "right side",
                block_number,
            })
    }
}

pub fn parse_amount(
    record: &BlockRecord,
    field: &'static str,
    value: &str,
) -> Result<Wei, LedgerError> {
    value.trim().parse::<Wei>().map_err(|_| LedgerError::InvalidAmount {
        field,
        block_number: record.block_number,
        value: value.to_string(),
    })
}

pub fn is_same_address(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

/// Returns `(left, right)` when the record's flows don't explain its balance change.
fn imbalance(record: &BlockRecord, flows: &Flows) -> Result<Option<(Wei, Wei)>, LedgerError> {
    let left = flows.balance_diff;
    let right = flows.right(record.block_number)?;
    Ok((left != right).then_some((left, right)))
}

fn difference(record: &BlockRecord, left: Wei, right: Wei) -> Result<Wei, LedgerError> {
    left.checked_sub(right).ok_or(LedgerError::Overflow {
        field: "difference",
        block_number: record.block_number,
    })
}

/// Repairs self-mined records whose block reward was booked as an incoming
/// transfer. Records mined by someone else are returned untouched; their
/// mismatches are only logged.
pub fn reconcile(
    records: &[BlockRecord],
    tracked_address: &str,
) -> Result<Vec<BlockRecord>, LedgerError> {
    records
        .iter()
        .map(|record| reconcile_record(record, tracked_address))
        .collect()
}

fn reconcile_record(
    record: &BlockRecord,
    tracked_address: &str,
) -> Result<BlockRecord, LedgerError> {
    let flows = Flows::parse(record)?;
    let Some((left, right)) = imbalance(record, &flows)? else {
        return Ok(record.clone());
    };

    if !is_same_address(&record.block_miner, tracked_address) {
        warn!(
            "Balance mismatch at block {}: diff={} right={}",
            record.block_number,
            difference(record, left, right)?,
            right
        );
        return Ok(record.clone());
    }

    // Incoming moves to MEV; the block reward absorbs whatever is left.
    let reclassified = Flows {
        mev_reward: flows.amount_incoming,
        block_reward: 0,
        amount_incoming: 0,
        ..flows
    };
    let block_reward = left
        .checked_sub(reclassified.right(record.block_number)?)
        .ok_or(LedgerError::Overflow {
            field: "blockReward",
            block_number: record.block_number,
        })?;
    debug!(
        "Block {} self-mined, reclassifying incoming {} as MEV reward, block reward {}",
        record.block_number, record.amount_incoming, block_reward
    );

    Ok(BlockRecord {
        block_reward: block_reward.to_string(),
        mev_reward: record.amount_incoming.clone(),
        amount_incoming: "0".to_string(),
        ..record.clone()
    })
}

pub fn find_mismatches(
    records: &[BlockRecord],
    tracked_address: &str,
) -> Result<Vec<Mismatch>, LedgerError> {
    let mut mismatches = Vec::new();
    for record in records {
        let flows = Flows::parse(record)?;
        if let Some((left, right)) = imbalance(record, &flows)? {
            mismatches.push(Mismatch {
                block_number: record.block_number,
                left,
                right,
                difference: difference(record, left, right)?,
                self_mined: is_same_address(&record.block_miner, tracked_address),
            });
        }
    }
    Ok(mismatches)
}

fn accumulate(total: Wei, value: Wei, field: &'static str) -> Result<Wei, LedgerError> {
    total
        .checked_add(value)
        .ok_or(LedgerError::TotalOverflow(field))
}

/// Totals over a record sequence ordered by block number. The first record
/// is the starting state, so only records after it contribute to the sums.
pub fn summarize(records: &[BlockRecord]) -> Result<BlocksSummary, LedgerError> {
    let mut summary = BlocksSummary {
        total_entries: records.len(),
        ..Default::default()
    };

    if let [first, .., last] = records {
        let start = parse_amount(first, "balance", &first.balance)?;
        let end = parse_amount(last, "balance", &last.balance)?;
        summary.total_diff = end
            .checked_sub(start)
            .ok_or(LedgerError::TotalOverflow("totalDiff"))?;
    }

    for record in records.iter().skip(1) {
        let flows = Flows::parse(record)?;
        summary.total_sum_diff =
            accumulate(summary.total_sum_diff, flows.balance_diff, "totalSumDiff")?;
        summary.total_consensus_reward = accumulate(
            summary.total_consensus_reward,
            flows.consensus_reward,
            "totalConsensusReward",
        )?;
        summary.total_mev_reward =
            accumulate(summary.total_mev_reward, flows.mev_reward, "totalMevReward")?;
        summary.total_block_reward =
            accumulate(summary.total_block_reward, flows.block_reward, "totalBlockReward")?;
        summary.total_amount_incoming = accumulate(
            summary.total_amount_incoming,
            flows.amount_incoming,
            "totalAmountIncoming",
        )?;
        summary.total_amount_outgoing = accumulate(
            summary.total_amount_outgoing,
            flows.amount_outgoing,
            "totalAmountOutgoing",
        )?;
    }

    Ok(summary)
}

pub fn check_balances(summary: &BlocksSummary) -> Result<BalanceChecks, LedgerError> {
    let sum_incoming = [
        summary.total_mev_reward,
        summary.total_block_reward,
        summary.total_amount_incoming,
    ]
    .into_iter()
    .try_fold(summary.total_consensus_reward, |total, value| {
        accumulate(total, value, "sumIncoming")
    })?;
    let balance_sum = sum_incoming
        .checked_sub(summary.total_amount_outgoing)
        .ok_or(LedgerError::TotalOverflow("balanceSum"))?;

    Ok(BalanceChecks {
        balance_change: summary.total_diff,
        sum_of_changes: summary.total_sum_diff,
        sum_incoming,
        sum_outgoing: summary.total_amount_outgoing,
        balance_sum,
        consistent: summary.total_diff == summary.total_sum_diff
            && summary.total_sum_diff == balance_sum,
    })
}
