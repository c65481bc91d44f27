use std::str::FromStr;

use anyhow::Result;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::SqlitePool;

use crate::models::{BlockRecord, ScanInfo, TraceRecord, TxRecord};

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await?;
        let db = Self { pool };
        db.create_tables().await?;
        Ok(db)
    }

    /// Private in-memory database; a single connection keeps every query on
    /// the same store.
    #[cfg(test)]
    pub async fn in_memory() -> Result<Self> {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let db = Self { pool };
        db.create_tables().await?;
        Ok(db)
    }

    async fn create_tables(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS scan (
                address TEXT PRIMARY KEY,
                first_block_number INTEGER NOT NULL,
                first_block_timestamp TEXT NOT NULL,
                next_block_number INTEGER NOT NULL,
                next_block_timestamp TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS block (
                address TEXT NOT NULL,
                block_number INTEGER NOT NULL,
                timestamp TEXT NOT NULL,
                balance TEXT NOT NULL,
                balance_diff TEXT NOT NULL,
                updated TEXT NOT NULL,
                block_miner TEXT NOT NULL,
                consensus_reward TEXT NOT NULL,
                mev_reward TEXT NOT NULL,
                block_reward TEXT NOT NULL,
                amount_incoming TEXT NOT NULL,
                amount_outgoing TEXT NOT NULL,
                PRIMARY KEY (address, block_number)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tx (
                address TEXT NOT NULL,
                tx_hash TEXT NOT NULL,
                block_number INTEGER NOT NULL,
                block_index INTEGER NOT NULL,
                gas_used TEXT NOT NULL,
                PRIMARY KEY (address, tx_hash)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tx_trace (
                address TEXT NOT NULL,
                tx_hash TEXT NOT NULL,
                block_number INTEGER NOT NULL,
                block_index INTEGER NOT NULL,
                trace_index INTEGER NOT NULL,
                from_addr TEXT NOT NULL,
                to_addr TEXT NOT NULL,
                value TEXT NOT NULL,
                gas_used TEXT NOT NULL,
                PRIMARY KEY (address, tx_hash, trace_index)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_tx_trace_block ON tx_trace(address, block_number)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_scan(&self, address: &str) -> Result<Option<ScanInfo>> {
        let scan = sqlx::query_as::<_, ScanInfo>("SELECT * FROM scan WHERE address = ?")
            .bind(address)
            .fetch_optional(&self.pool)
            .await?;
        Ok(scan)
    }

    pub async fn get_all_scans(&self) -> Result<Vec<ScanInfo>> {
        let scans = sqlx::query_as::<_, ScanInfo>("SELECT * FROM scan ORDER BY address")
            .fetch_all(&self.pool)
            .await?;
        Ok(scans)
    }

    pub async fn insert_scan(&self, scan: &ScanInfo) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO scan
            (address, first_block_number, first_block_timestamp, next_block_number, next_block_timestamp)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&scan.address)
        .bind(scan.first_block_number)
        .bind(scan.first_block_timestamp)
        .bind(scan.next_block_number)
        .bind(scan.next_block_timestamp)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn update_scan(&self, scan: &ScanInfo) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE scan SET
            first_block_number = ?,
            first_block_timestamp = ?,
            next_block_number = ?,
            next_block_timestamp = ?
            WHERE address = ?
            "#,
        )
        .bind(scan.first_block_number)
        .bind(scan.first_block_timestamp)
        .bind(scan.next_block_number)
        .bind(scan.next_block_timestamp)
        .bind(&scan.address)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Drops the scan and everything recorded for the address.
    pub async fn delete_scan(&self, address: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for table in ["tx_trace", "tx", "block", "scan"] {
            sqlx::query(&format!("DELETE FROM {} WHERE address = ?", table))
                .bind(address)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        Ok(())
    }

    /// Stores a block record, replacing an earlier one for the same block.
    pub async fn upsert_block(&self, block: &BlockRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO block
            (address, block_number, timestamp, balance, balance_diff, updated, block_miner,
             consensus_reward, mev_reward, block_reward, amount_incoming, amount_outgoing)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&block.address)
        .bind(block.block_number)
        .bind(&block.timestamp)
        .bind(&block.balance)
        .bind(&block.balance_diff)
        .bind(&block.updated)
        .bind(&block.block_miner)
        .bind(&block.consensus_reward)
        .bind(&block.mev_reward)
        .bind(&block.block_reward)
        .bind(&block.amount_incoming)
        .bind(&block.amount_outgoing)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Replaces the transactions and traces stored for one block.
    pub async fn replace_block_txs(
        &self,
        address: &str,
        block_number: i64,
        txs: &[TxRecord],
        traces: &[TraceRecord],
    ) -> Result<()> {
        let mut db_tx = self.pool.begin().await?;
        for table in ["tx_trace", "tx"] {
            sqlx::query(&format!(
                "DELETE FROM {} WHERE address = ? AND block_number = ?",
                table
            ))
            .bind(address)
            .bind(block_number)
            .execute(&mut *db_tx)
            .await?;
        }

        for tx in txs {
            sqlx::query(
                r#"
                INSERT OR REPLACE INTO tx
                (address, tx_hash, block_number, block_index, gas_used)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(&tx.address)
            .bind(&tx.tx_hash)
            .bind(tx.block_number)
            .bind(tx.block_index)
            .bind(&tx.gas_used)
            .execute(&mut *db_tx)
            .await?;
        }

        for trace in traces {
            sqlx::query(
                r#"
                INSERT OR REPLACE INTO tx_trace
                (address, tx_hash, block_number, block_index, trace_index, from_addr, to_addr, value, gas_used)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&trace.address)
            .bind(&trace.tx_hash)
            .bind(trace.block_number)
            .bind(trace.block_index)
            .bind(trace.trace_index)
            .bind(&trace.from_addr)
            .bind(&trace.to_addr)
            .bind(&trace.value)
            .bind(&trace.gas_used)
            .execute(&mut *db_tx)
            .await?;
        }

        db_tx.commit().await?;
        Ok(())
    }

    pub async fn get_txs(
        &self,
        address: &str,
        block_number: Option<i64>,
    ) -> Result<Vec<TxRecord>> {
        let txs = sqlx::query_as::<_, TxRecord>(
            r#"
            SELECT * FROM tx
            WHERE address = ? AND (? IS NULL OR block_number = ?)
            ORDER BY block_number ASC, block_index ASC
            "#,
        )
        .bind(address)
        .bind(block_number)
        .bind(block_number)
        .fetch_all(&self.pool)
        .await?;
        Ok(txs)
    }

    pub async fn get_traces(
        &self,
        address: &str,
        block_number: Option<i64>,
    ) -> Result<Vec<TraceRecord>> {
        let traces = sqlx::query_as::<_, TraceRecord>(
            r#"
            SELECT * FROM tx_trace
            WHERE address = ? AND (? IS NULL OR block_number = ?)
            ORDER BY block_number ASC, block_index ASC, trace_index ASC
            "#,
        )
        .bind(address)
        .bind(block_number)
        .bind(block_number)
        .fetch_all(&self.pool)
        .await?;
        Ok(traces)
    }

    pub async fn get_blocks(&self, address: &str) -> Result<Vec<BlockRecord>> {
        let blocks = sqlx::query_as::<_, BlockRecord>(
            "SELECT * FROM block WHERE address = ? ORDER BY block_number ASC",
        )
        .bind(address)
        .fetch_all(&self.pool)
        .await?;
        Ok(blocks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounting::tests::{record, OTHER_MINER, TRACKED};
    use chrono::{TimeZone, Utc};

    fn scan(address: &str, next_block_number: i64) -> ScanInfo {
        let timestamp = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        ScanInfo {
            address: address.to_string(),
            first_block_number: 100,
            first_block_timestamp: timestamp,
            next_block_number,
            next_block_timestamp: timestamp,
        }
    }

    #[tokio::test]
    async fn scan_roundtrip_and_progress() -> Result<()> {
        let db = Database::in_memory().await?;
        assert!(db.get_scan(TRACKED).await?.is_none());

        db.insert_scan(&scan(TRACKED, 100)).await?;
        let mut stored = db.get_scan(TRACKED).await?.unwrap();
        assert_eq!(stored, scan(TRACKED, 100));

        stored.next_block_number = 250;
        db.update_scan(&stored).await?;
        assert_eq!(db.get_scan(TRACKED).await?.unwrap().next_block_number, 250);
        assert_eq!(db.get_all_scans().await?.len(), 1);

        Ok(())
    }

    #[tokio::test]
    async fn blocks_come_back_in_block_order() -> Result<()> {
        let db = Database::in_memory().await?;
        db.upsert_block(&record(12, 120, -30, [0, 0, 0, 0, 30], OTHER_MINER))
            .await?;
        db.upsert_block(&record(10, 100, 100, [0, 0, 0, 100, 0], OTHER_MINER))
            .await?;
        db.upsert_block(&record(11, 150, 50, [40, 0, 0, 10, 0], TRACKED))
            .await?;

        let blocks = db.get_blocks(TRACKED).await?;
        let numbers: Vec<i64> = blocks.iter().map(|b| b.block_number).collect();
        assert_eq!(numbers, vec![10, 11, 12]);
        assert_eq!(blocks[1], record(11, 150, 50, [40, 0, 0, 10, 0], TRACKED));
        assert!(db.get_blocks(OTHER_MINER).await?.is_empty());

        Ok(())
    }

    #[tokio::test]
    async fn upsert_replaces_existing_block() -> Result<()> {
        let db = Database::in_memory().await?;
        db.upsert_block(&record(10, 100, 100, [0, 0, 0, 100, 0], OTHER_MINER))
            .await?;
        db.upsert_block(&record(10, 100, 100, [0, 0, 0, 90, 0], OTHER_MINER))
            .await?;

        let blocks = db.get_blocks(TRACKED).await?;
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].amount_incoming, "90");

        Ok(())
    }

    #[tokio::test]
    async fn delete_scan_removes_blocks() -> Result<()> {
        let db = Database::in_memory().await?;
        db.insert_scan(&scan(TRACKED, 101)).await?;
        db.upsert_block(&record(100, 100, 100, [0, 0, 0, 100, 0], OTHER_MINER))
            .await?;

        db.delete_scan(TRACKED).await?;
        assert!(db.get_scan(TRACKED).await?.is_none());
        assert!(db.get_blocks(TRACKED).await?.is_empty());

        Ok(())
    }

    fn tx(block_number: i64, block_index: i64, hash: &str) -> TxRecord {
        TxRecord {
            address: TRACKED.to_string(),
            tx_hash: hash.to_string(),
            block_number,
            block_index,
            gas_used: "21000".to_string(),
        }
    }

    fn trace(tx: &TxRecord, trace_index: i64, value: &str) -> TraceRecord {
        TraceRecord {
            address: tx.address.clone(),
            tx_hash: tx.tx_hash.clone(),
            block_number: tx.block_number,
            block_index: tx.block_index,
            trace_index,
            from_addr: OTHER_MINER.to_string(),
            to_addr: TRACKED.to_string(),
            value: value.to_string(),
            gas_used: "2300".to_string(),
        }
    }

    #[tokio::test]
    async fn block_txs_are_stored_and_read_back_in_order() -> Result<()> {
        let db = Database::in_memory().await?;
        let first = tx(10, 3, "0xaa");
        let second = tx(10, 1, "0xbb");
        let later = tx(11, 0, "0xcc");
        db.replace_block_txs(
            TRACKED,
            10,
            &[first.clone(), second.clone()],
            &[trace(&first, 1, "5"), trace(&first, 0, "7"), trace(&second, 0, "9")],
        )
        .await?;
        db.replace_block_txs(TRACKED, 11, &[later.clone()], &[trace(&later, 0, "1")])
            .await?;

        let txs = db.get_txs(TRACKED, Some(10)).await?;
        assert_eq!(txs, vec![second.clone(), first.clone()]);
        assert_eq!(db.get_txs(TRACKED, None).await?.len(), 3);

        let traces = db.get_traces(TRACKED, Some(10)).await?;
        let order: Vec<(&str, i64)> = traces
            .iter()
            .map(|t| (t.tx_hash.as_str(), t.trace_index))
            .collect();
        assert_eq!(order, vec![("0xbb", 0), ("0xaa", 0), ("0xaa", 1)]);
        assert_eq!(traces[2].value, "5");
        assert!(db.get_traces(OTHER_MINER, None).await?.is_empty());

        Ok(())
    }

    #[tokio::test]
    async fn replacing_block_txs_drops_stale_rows() -> Result<()> {
        let db = Database::in_memory().await?;
        let stale = tx(10, 0, "0xaa");
        let kept = tx(11, 0, "0xbb");
        db.replace_block_txs(TRACKED, 10, &[stale.clone()], &[trace(&stale, 0, "1")])
            .await?;
        db.replace_block_txs(TRACKED, 11, &[kept.clone()], &[trace(&kept, 0, "2")])
            .await?;

        db.replace_block_txs(TRACKED, 10, &[], &[]).await?;

        assert!(db.get_txs(TRACKED, Some(10)).await?.is_empty());
        assert!(db.get_traces(TRACKED, Some(10)).await?.is_empty());
        assert_eq!(db.get_txs(TRACKED, None).await?, vec![kept]);

        Ok(())
    }

    #[tokio::test]
    async fn delete_scan_removes_txs_and_traces() -> Result<()> {
        let db = Database::in_memory().await?;
        let stored = tx(10, 0, "0xaa");
        db.insert_scan(&scan(TRACKED, 11)).await?;
        db.replace_block_txs(TRACKED, 10, &[stored.clone()], &[trace(&stored, 0, "1")])
            .await?;

        db.delete_scan(TRACKED).await?;
        assert!(db.get_txs(TRACKED, None).await?.is_empty());
        assert!(db.get_traces(TRACKED, None).await?.is_empty());

        Ok(())
    }
}
