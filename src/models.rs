use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use sqlx::FromRow;

/// Amount in wei. Signed because balance differences can be negative.
pub type Wei = i128;

/// One scanned block for a tracked address. Amounts stay decimal strings
/// on the wire and in the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct BlockRecord {
    pub address: String,
    pub block_number: i64,
    pub timestamp: String,
    pub balance: String,
    pub balance_diff: String,
    #[serde(default)]
    pub updated: String,
    pub block_miner: String,
    pub consensus_reward: String,
    pub mev_reward: String,
    pub block_reward: String,
    pub amount_incoming: String,
    pub amount_outgoing: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ScanInfo {
    pub address: String,
    pub first_block_number: i64,
    pub first_block_timestamp: DateTime<Utc>,
    pub next_block_number: i64,
    pub next_block_timestamp: DateTime<Utc>,
}

/// Transaction in a recorded block that moved value to or from the address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct TxRecord {
    pub address: String,
    pub tx_hash: String,
    pub block_number: i64,
    pub block_index: i64,
    pub gas_used: String,
}

/// Call trace of a stored transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct TraceRecord {
    pub address: String,
    pub tx_hash: String,
    pub block_number: i64,
    pub block_index: i64,
    pub trace_index: i64,
    pub from_addr: String,
    pub to_addr: String,
    pub value: String,
    pub gas_used: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlocksSummary {
    pub total_entries: usize,
    #[serde(serialize_with = "wei_as_string")]
    pub total_diff: Wei,
    #[serde(serialize_with = "wei_as_string")]
    pub total_sum_diff: Wei,
    #[serde(serialize_with = "wei_as_string")]
    pub total_consensus_reward: Wei,
    #[serde(serialize_with = "wei_as_string")]
    pub total_mev_reward: Wei,
    #[serde(serialize_with = "wei_as_string")]
    pub total_block_reward: Wei,
    #[serde(serialize_with = "wei_as_string")]
    pub total_amount_incoming: Wei,
    #[serde(serialize_with = "wei_as_string")]
    pub total_amount_outgoing: Wei,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceChecks {
    #[serde(serialize_with = "wei_as_string")]
    pub balance_change: Wei,
    #[serde(serialize_with = "wei_as_string")]
    pub sum_of_changes: Wei,
    #[serde(serialize_with = "wei_as_string")]
    pub sum_incoming: Wei,
    #[serde(serialize_with = "wei_as_string")]
    pub sum_outgoing: Wei,
    #[serde(serialize_with = "wei_as_string")]
    pub balance_sum: Wei,
    pub consistent: bool,
}

/// A record whose flows don't add up to its balance change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Mismatch {
    pub block_number: i64,
    #[serde(serialize_with = "wei_as_string")]
    pub left: Wei,
    #[serde(serialize_with = "wei_as_string")]
    pub right: Wei,
    #[serde(serialize_with = "wei_as_string")]
    pub difference: Wei,
    pub self_mined: bool,
}

fn wei_as_string<S: Serializer>(value: &Wei, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn block_record_uses_api_field_names() {
        let record: BlockRecord = serde_json::from_value(json!({
            "address": "0xabc",
            "blockNumber": 19000000,
            "timestamp": "2024-01-13T10:00:00Z",
            "balance": "1000000000000000000",
            "balanceDiff": "-21000",
            "blockMiner": "0xdef",
            "consensusReward": "0",
            "mevReward": "0",
            "blockReward": "0",
            "amountIncoming": "0",
            "amountOutgoing": "21000"
        }))
        .unwrap();

        assert_eq!(record.block_number, 19_000_000);
        assert_eq!(record.balance_diff, "-21000");
        assert_eq!(record.updated, "");

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["amountOutgoing"], "21000");
        assert_eq!(value["blockMiner"], "0xdef");
    }

    #[test]
    fn summary_serializes_amounts_as_decimal_strings() {
        let summary = BlocksSummary {
            total_entries: 2,
            total_diff: -5,
            total_sum_diff: 170_141_183_460_469_231_731_687_303_715_884_105_727,
            ..Default::default()
        };
        let value = serde_json::to_value(&summary).unwrap();
        assert_eq!(value["totalEntries"], 2);
        assert_eq!(value["totalDiff"], "-5");
        assert_eq!(
            value["totalSumDiff"],
            "170141183460469231731687303715884105727"
        );
        assert_eq!(value["totalMevReward"], "0");
    }
}
