use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ethers::prelude::*;
use ethers_core::types::{Action, Withdrawal, U64};
use ethers_providers::{Http, Middleware, Provider};
use log::debug;
use std::sync::Arc;

use crate::models::Wei;

/// A value transfer seen in a call trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallTrace {
    pub tx_hash: H256,
    pub trace_index: u64,
    pub from: Address,
    pub to: Address,
    pub value: U256,
    pub gas: U256,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxInfo {
    pub hash: H256,
    pub index: u64,
    pub gas: U256,
}

/// Everything in a block that can move the tracked balance.
#[derive(Debug, Clone)]
pub struct BlockActivity {
    pub number: u64,
    pub miner: Address,
    pub timestamp: DateTime<Utc>,
    pub withdrawals: Vec<Withdrawal>,
    pub transactions: Vec<TxInfo>,
    pub calls: Vec<CallTrace>,
}

/// The chain queries the scanner depends on.
#[async_trait]
pub trait ChainSource: Send + Sync {
    async fn get_latest_block_number(&self) -> Result<u64>;

    async fn get_block_timestamp(&self, block_number: u64) -> Result<DateTime<Utc>>;

    async fn get_balance(&self, address: Address, block_number: u64) -> Result<U256>;

    async fn get_block_activity(&self, block_number: u64) -> Result<BlockActivity>;
}

pub fn format_address(address: Address) -> String {
    format!("0x{:x}", address)
}

pub fn format_hash(hash: H256) -> String {
    format!("0x{:x}", hash)
}

pub fn to_wei(value: U256) -> Result<Wei> {
    if value > U256::from(Wei::MAX as u128) {
        return Err(anyhow::anyhow!("Amount {} does not fit in 128 bits", value));
    }
    Ok(value.as_u128() as Wei)
}

fn block_id(block_number: u64) -> BlockId {
    BlockId::Number(BlockNumber::Number(U64::from(block_number)))
}

pub struct EthereumClient {
    provider: Arc<Provider<Http>>,
}

impl EthereumClient {
    pub fn new(rpc_url: &str) -> Result<Self> {
        let provider = Provider::<Http>::try_from(rpc_url)?;
        Ok(Self {
            provider: Arc::new(provider),
        })
    }
}

#[async_trait]
impl ChainSource for EthereumClient {
    async fn get_latest_block_number(&self) -> Result<u64> {
        let block_number = self.provider.get_block_number().await?;
        Ok(block_number.as_u64())
    }

    async fn get_block_timestamp(&self, block_number: u64) -> Result<DateTime<Utc>> {
        let block = self
            .provider
            .get_block(block_id(block_number))
            .await?
            .ok_or_else(|| anyhow::anyhow!("Block {} not found", block_number))?;

        let timestamp = DateTime::from_timestamp(block.timestamp.as_u64() as i64, 0)
            .ok_or_else(|| anyhow::anyhow!("Invalid timestamp"))?;

        Ok(timestamp)
    }

    async fn get_balance(&self, address: Address, block_number: u64) -> Result<U256> {
        let balance = self
            .provider
            .get_balance(address, Some(block_id(block_number)))
            .await?;
        Ok(balance)
    }

    /// Fetches the block with its transactions and the call traces of every
    /// transaction. Needs a node with the `trace_` namespace enabled.
    async fn get_block_activity(&self, block_number: u64) -> Result<BlockActivity> {
        let block = self
            .provider
            .get_block_with_txs(block_id(block_number))
            .await?
            .ok_or_else(|| anyhow::anyhow!("Block {} not found", block_number))?;

        let miner = block
            .author
            .ok_or_else(|| anyhow::anyhow!("Missing miner for block {}", block_number))?;
        let timestamp = DateTime::from_timestamp(block.timestamp.as_u64() as i64, 0)
            .ok_or_else(|| anyhow::anyhow!("Invalid timestamp"))?;

        let mut transactions = Vec::new();
        let mut calls = Vec::new();
        for (tx_index, tx) in block.transactions.iter().enumerate() {
            transactions.push(TxInfo {
                hash: tx.hash,
                index: tx_index as u64,
                gas: tx.gas,
            });

            let traces = self.provider.trace_transaction(tx.hash).await?;
            for (trace_index, trace) in traces.into_iter().enumerate() {
                match trace.action {
                    Action::Call(call) => calls.push(CallTrace {
                        tx_hash: tx.hash,
                        trace_index: trace_index as u64,
                        from: call.from,
                        to: call.to,
                        value: call.value,
                        gas: call.gas,
                    }),
                    Action::Reward(_) => {
                        return Err(anyhow::anyhow!(
                            "Unexpected reward trace in transaction {:?}",
                            tx.hash
                        ));
                    }
                    other => debug!("Ignoring trace action {:?}", other),
                }
            }
        }

        Ok(BlockActivity {
            number: block_number,
            miner,
            timestamp,
            withdrawals: block.withdrawals.unwrap_or_default(),
            transactions,
            calls,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addresses_format_as_full_lowercase_hex() {
        let address: Address = "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48".parse().unwrap();
        assert_eq!(
            format_address(address),
            "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48"
        );
    }

    #[test]
    fn hashes_format_as_full_lowercase_hex() {
        assert_eq!(
            format_hash(H256::repeat_byte(0xab)),
            format!("0x{}", "ab".repeat(32))
        );
    }

    #[test]
    fn wei_conversion_rejects_values_beyond_i128() {
        assert_eq!(to_wei(U256::from(42u64)).unwrap(), 42);
        assert_eq!(to_wei(U256::from(Wei::MAX as u128)).unwrap(), Wei::MAX);
        assert!(to_wei(U256::from(Wei::MAX as u128) + 1).is_err());
    }
}
