use anyhow::Result;
use chrono::Utc;
use ethers::types::{Address, U256};
use log::{debug, error, info, warn};
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::{
    config::Config,
    database::Database,
    ethereum::{
        format_address, format_hash, to_wei, BlockActivity, CallTrace, ChainSource,
        EthereumClient,
    },
    models::{BlockRecord, ScanInfo, TraceRecord, TxRecord, Wei},
};

const WEI_PER_GWEI: Wei = 1_000_000_000;

/// Value that moved the tracked balance within one block.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BlockFlows {
    pub consensus_reward: Wei,
    pub mev_reward: Wei,
    pub amount_incoming: Wei,
    pub amount_outgoing: Wei,
}

impl BlockFlows {
    pub fn net(&self) -> Result<Wei> {
        self.consensus_reward
            .checked_add(self.mev_reward)
            .and_then(|sum| sum.checked_add(self.amount_incoming))
            .and_then(|sum| sum.checked_sub(self.amount_outgoing))
            .ok_or_else(|| anyhow::anyhow!("Block flows overflow"))
    }
}

fn add_wei(total: Wei, value: U256) -> Result<Wei> {
    total
        .checked_add(to_wei(value)?)
        .ok_or_else(|| anyhow::anyhow!("Block flows overflow"))
}

/// Classifies a block's withdrawals and call traces from the point of view of
/// `address`. Withdrawal amounts are in gwei. A call from the block miner to
/// the address is an MEV payment.
pub fn tally_block(address: Address, activity: &BlockActivity) -> Result<BlockFlows> {
    let mut flows = BlockFlows::default();

    for withdrawal in activity
        .withdrawals
        .iter()
        .filter(|withdrawal| withdrawal.address == address)
    {
        debug!("Withdrawal {} for block {}", withdrawal.index, activity.number);
        let amount = to_wei(withdrawal.amount)?
            .checked_mul(WEI_PER_GWEI)
            .ok_or_else(|| anyhow::anyhow!("Withdrawal amount overflow"))?;
        flows.consensus_reward = flows
            .consensus_reward
            .checked_add(amount)
            .ok_or_else(|| anyhow::anyhow!("Block flows overflow"))?;
    }

    for call in &activity.calls {
        if call.from == activity.miner && call.to == address {
            debug!("MEV payment of {} in block {}", call.value, activity.number);
            flows.mev_reward = add_wei(flows.mev_reward, call.value)?;
        } else if call.to == address {
            flows.amount_incoming = add_wei(flows.amount_incoming, call.value)?;
        } else if call.from == address {
            flows.amount_outgoing = add_wei(flows.amount_outgoing, call.value)?;
        }
    }

    Ok(flows)
}

/// Transactions of the block with at least one call from or to `address`,
/// together with all of their call traces.
pub fn touching_txs(
    address: Address,
    activity: &BlockActivity,
) -> (Vec<TxRecord>, Vec<TraceRecord>) {
    let key = format_address(address);
    let block_number = activity.number as i64;
    let mut txs = Vec::new();
    let mut traces = Vec::new();

    for tx in &activity.transactions {
        let calls: Vec<&CallTrace> = activity
            .calls
            .iter()
            .filter(|call| call.tx_hash == tx.hash)
            .collect();
        if !calls
            .iter()
            .any(|call| call.from == address || call.to == address)
        {
            continue;
        }

        debug!("Transaction {:?} touches {}", tx.hash, key);
        txs.push(TxRecord {
            address: key.clone(),
            tx_hash: format_hash(tx.hash),
            block_number,
            block_index: tx.index as i64,
            gas_used: tx.gas.to_string(),
        });
        traces.extend(calls.into_iter().map(|call| TraceRecord {
            address: key.clone(),
            tx_hash: format_hash(tx.hash),
            block_number,
            block_index: tx.index as i64,
            trace_index: call.trace_index as i64,
            from_addr: format_address(call.from),
            to_addr: format_address(call.to),
            value: call.value.to_string(),
            gas_used: call.gas.to_string(),
        }));
    }

    (txs, traces)
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScanStats {
    pub inspected: u64,
    pub stored: u64,
    pub skipped: u64,
}

pub struct Scanner<C: ChainSource = EthereumClient> {
    chain: C,
    database: Database,
    config: Config,
    balances: Mutex<HashMap<(Address, u64), U256>>,
}

impl Scanner<EthereumClient> {
    pub fn new(config: Config, database: Database) -> Result<Self> {
        let ethereum_client = EthereumClient::new(&config.ethereum_rpc_url)?;
        Ok(Self::with_chain(ethereum_client, config, database))
    }
}

impl<C: ChainSource> Scanner<C> {
    pub fn with_chain(chain: C, config: Config, database: Database) -> Self {
        Self {
            chain,
            database,
            config,
            balances: Mutex::new(HashMap::new()),
        }
    }

    #[cfg(test)]
    pub fn get_database(&self) -> &Database {
        &self.database
    }

    async fn cached_balance(&self, address: Address, block_number: u64) -> Result<U256> {
        if let Some(balance) = self.balances.lock().await.get(&(address, block_number)) {
            return Ok(*balance);
        }
        let balance = self.chain.get_balance(address, block_number).await?;
        self.balances
            .lock()
            .await
            .insert((address, block_number), balance);
        Ok(balance)
    }

    pub async fn scan_address(
        &self,
        address: Address,
        block_start: u64,
        block_end: Option<u64>,
    ) -> Result<ScanStats> {
        let latest_block = self.chain.get_latest_block_number().await?;
        let last_final = latest_block.saturating_sub(self.config.finality_blocks);
        let block_end = resolve_block_end(block_end, last_final)?;

        let key = format_address(address);
        let mut scan = match self.database.get_scan(&key).await? {
            Some(scan) => scan,
            None => {
                let timestamp = self.chain.get_block_timestamp(block_start).await?;
                let scan = ScanInfo {
                    address: key.clone(),
                    first_block_number: block_start as i64,
                    first_block_timestamp: timestamp,
                    next_block_number: block_start as i64,
                    next_block_timestamp: timestamp,
                };
                self.database.insert_scan(&scan).await?;
                info!("Created scan for {} starting at block {}", key, block_start);
                scan
            }
        };

        let mut block_num = scan.next_block_number as u64;
        let mut stats = ScanStats::default();
        if block_num >= block_end {
            info!("No blocks to scan");
            return Ok(stats);
        }

        info!("Scanning {} from block {} to {}", key, block_num, block_end);

        let mut last_checked = None;
        while block_num < block_end {
            if let Some(prev) = last_checked {
                let ahead = block_num + self.config.skip_window;
                if ahead < block_end
                    && self.cached_balance(address, prev).await?
                        == self.cached_balance(address, ahead).await?
                {
                    debug!("Balance unchanged from {} to {}, skipping", prev, ahead);
                    stats.skipped += ahead - block_num + 1;
                    block_num = ahead + 1;
                    last_checked = Some(ahead);
                    self.advance(&mut scan, block_num).await?;
                    continue;
                }
            }

            stats.inspected += 1;
            match self.inspect_block(address, block_num).await {
                Ok(Some(_)) => stats.stored += 1,
                Ok(None) => {}
                Err(e) => warn!("Error inspecting block {}: {}", block_num, e),
            }
            last_checked = Some(block_num);
            block_num += 1;
            self.advance(&mut scan, block_num).await?;
        }

        info!(
            "Finished scan of {}: {} inspected, {} stored, {} skipped",
            key, stats.inspected, stats.stored, stats.skipped
        );
        Ok(stats)
    }

    async fn advance(&self, scan: &mut ScanInfo, next_block: u64) -> Result<()> {
        scan.next_block_number = next_block as i64;
        scan.next_block_timestamp = self.chain.get_block_timestamp(next_block).await?;
        self.database.update_scan(scan).await
    }

    /// Records the block if the balance of `address` changed in it, along with
    /// the transactions that touched the address. The record is stored even
    /// when its flows don't explain the change; that case is then reported as
    /// an error.
    pub async fn inspect_block(
        &self,
        address: Address,
        block_number: u64,
    ) -> Result<Option<BlockRecord>> {
        if block_number == 0 {
            return Err(anyhow::anyhow!("Cannot inspect the genesis block"));
        }

        let balance_prev = to_wei(self.cached_balance(address, block_number - 1).await?)?;
        let balance = self.cached_balance(address, block_number).await?;
        let balance_diff = to_wei(balance)? - balance_prev;
        if balance_diff == 0 {
            debug!("Balance diff is 0 for block {}", block_number);
            return Ok(None);
        }
        info!("Block {} balance diff {}", block_number, balance_diff);

        let activity = self.chain.get_block_activity(block_number).await?;
        let flows = tally_block(address, &activity)?;

        let record = BlockRecord {
            address: format_address(address),
            block_number: block_number as i64,
            timestamp: activity.timestamp.to_rfc3339(),
            balance: balance.to_string(),
            balance_diff: balance_diff.to_string(),
            updated: Utc::now().to_rfc3339(),
            block_miner: format_address(activity.miner),
            consensus_reward: flows.consensus_reward.to_string(),
            mev_reward: flows.mev_reward.to_string(),
            block_reward: "0".to_string(),
            amount_incoming: flows.amount_incoming.to_string(),
            amount_outgoing: flows.amount_outgoing.to_string(),
        };
        self.database.upsert_block(&record).await?;

        let (txs, traces) = touching_txs(address, &activity);
        self.database
            .replace_block_txs(&record.address, record.block_number, &txs, &traces)
            .await?;

        let explained = flows.net()?;
        if explained != balance_diff {
            error!(
                "Flows do not match balance change at block {}: {} != {}",
                block_number, explained, balance_diff
            );
            return Err(anyhow::anyhow!(
                "Flows do not match balance change at block {}",
                block_number
            ));
        }

        Ok(Some(record))
    }
}

fn resolve_block_end(requested: Option<u64>, last_final: u64) -> Result<u64> {
    match requested {
        Some(end) if end > last_final => Err(anyhow::anyhow!(
            "Block end {} is too close to the chain head (last final block {})",
            end,
            last_final
        )),
        Some(end) => Ok(end),
        None => Ok(last_final),
    }
}
