use alloy_primitives::{B256, Bytes};
use eyre::WrapErr;

use super::{Queries, from_db, to_db};
use crate::models::{AppState, Block, StoredTransaction};

impl Queries<'_> {
    pub async fn insert_block(&mut self, block: &Block) -> eyre::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO core_blocks (height, hash, proposer, chain_id, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(height) DO NOTHING;
            "#,
        )
        .bind(to_db(block.height))
        .bind(&block.hash)
        .bind(&block.proposer)
        .bind(&block.chain_id)
        .bind(block.created_at)
        .execute(&mut *self.conn)
        .await
        .wrap_err("insert block")?;
        Ok(())
    }

    pub async fn latest_block(&mut self) -> eyre::Result<Option<Block>> {
        let row = sqlx::query_as::<_, BlockRow>(
            r#"
            SELECT height, hash, proposer, chain_id, created_at
            FROM core_blocks
            ORDER BY height DESC
            LIMIT 1;
            "#,
        )
        .fetch_optional(&mut *self.conn)
        .await
        .wrap_err("fetch latest block")?;
        Ok(row.map(Into::into))
    }

    pub async fn block(&mut self, height: u64) -> eyre::Result<Option<Block>> {
        let row = sqlx::query_as::<_, BlockRow>(
            r#"
            SELECT height, hash, proposer, chain_id, created_at
            FROM core_blocks
            WHERE height = ?1;
            "#,
        )
        .bind(to_db(height))
        .fetch_optional(&mut *self.conn)
        .await
        .wrap_err("fetch block")?;
        Ok(row.map(Into::into))
    }

    /// Blocks proposed per consensus address in `[start, end]`.
    pub async fn proposer_counts(&mut self, start: u64, end: u64) -> eyre::Result<Vec<(String, u64)>> {
        let rows = sqlx::query_as::<_, (String, i64)>(
            r#"
            SELECT proposer, COUNT(*)
            FROM core_blocks
            WHERE height >= ?1 AND height <= ?2
            GROUP BY proposer
            ORDER BY proposer;
            "#,
        )
        .bind(to_db(start))
        .bind(to_db(end))
        .fetch_all(&mut *self.conn)
        .await
        .wrap_err("count proposed blocks")?;
        Ok(rows
            .into_iter()
            .map(|(proposer, count)| (proposer, from_db(count)))
            .collect())
    }

    pub async fn insert_app_state(&mut self, height: u64, app_hash: B256) -> eyre::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO core_app_state (height, app_hash)
            VALUES (?1, ?2)
            ON CONFLICT(height) DO UPDATE SET app_hash = excluded.app_hash;
            "#,
        )
        .bind(to_db(height))
        .bind(app_hash.as_slice())
        .execute(&mut *self.conn)
        .await
        .wrap_err("upsert app state")?;
        Ok(())
    }

    pub async fn latest_app_state(&mut self) -> eyre::Result<Option<AppState>> {
        let row = sqlx::query_as::<_, (i64, Vec<u8>)>(
            r#"
            SELECT height, app_hash
            FROM core_app_state
            ORDER BY height DESC
            LIMIT 1;
            "#,
        )
        .fetch_optional(&mut *self.conn)
        .await
        .wrap_err("fetch latest app state")?;
        row.map(|(height, app_hash)| {
            eyre::ensure!(app_hash.len() == 32, "app hash at {height} is {} bytes", app_hash.len());
            Ok(AppState {
                height: from_db(height),
                app_hash: B256::from_slice(&app_hash),
            })
        })
        .transpose()
    }

    pub async fn insert_transaction(&mut self, tx: &StoredTransaction) -> eyre::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO core_transactions
                (tx_hash, block_height, tx_index, result_code, transaction_bytes, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(tx_hash) DO NOTHING;
            "#,
        )
        .bind(&tx.tx_hash)
        .bind(to_db(tx.block_height))
        .bind(tx.tx_index as i64)
        .bind(tx.result_code as i64)
        .bind(tx.transaction.as_ref())
        .bind(tx.created_at)
        .execute(&mut *self.conn)
        .await
        .wrap_err("insert transaction")?;
        Ok(())
    }

    pub async fn transaction(&mut self, tx_hash: &str) -> eyre::Result<Option<StoredTransaction>> {
        let row = sqlx::query_as::<_, TransactionRow>(
            r#"
            SELECT tx_hash, block_height, tx_index, result_code, transaction_bytes, created_at
            FROM core_transactions
            WHERE tx_hash = ?1;
            "#,
        )
        .bind(tx_hash)
        .fetch_optional(&mut *self.conn)
        .await
        .wrap_err("fetch transaction")?;
        Ok(row.map(Into::into))
    }

    pub async fn block_transactions(&mut self, height: u64) -> eyre::Result<Vec<StoredTransaction>> {
        let rows = sqlx::query_as::<_, TransactionRow>(
            r#"
            SELECT tx_hash, block_height, tx_index, result_code, transaction_bytes, created_at
            FROM core_transactions
            WHERE block_height = ?1
            ORDER BY tx_index;
            "#,
        )
        .bind(to_db(height))
        .fetch_all(&mut *self.conn)
        .await
        .wrap_err("fetch block transactions")?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    pub async fn insert_tx_stat(
        &mut self,
        tx_hash: &str,
        tx_type: &str,
        block_height: u64,
        created_at: i64,
    ) -> eyre::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO core_tx_stats (tx_hash, tx_type, block_height, created_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(tx_hash) DO NOTHING;
            "#,
        )
        .bind(tx_hash)
        .bind(tx_type)
        .bind(to_db(block_height))
        .bind(created_at)
        .execute(&mut *self.conn)
        .await
        .wrap_err("insert tx stat")?;
        Ok(())
    }

    /// Number of finalized transactions of `tx_type`.
    pub async fn tx_stat_count(&mut self, tx_type: &str) -> eyre::Result<u64> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM core_tx_stats WHERE tx_type = ?1;
            "#,
        )
        .bind(tx_type)
        .fetch_one(&mut *self.conn)
        .await
        .wrap_err("count tx stats")?;
        Ok(from_db(count))
    }
}

#[derive(Debug, sqlx::FromRow)]
struct BlockRow {
    height: i64,
    hash: String,
    proposer: String,
    chain_id: String,
    created_at: i64,
}

impl From<BlockRow> for Block {
    fn from(row: BlockRow) -> Self {
        Self {
            height: from_db(row.height),
            hash: row.hash,
            proposer: row.proposer,
            chain_id: row.chain_id,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct TransactionRow {
    tx_hash: String,
    block_height: i64,
    tx_index: i64,
    result_code: i64,
    transaction_bytes: Vec<u8>,
    created_at: i64,
}

impl From<TransactionRow> for StoredTransaction {
    fn from(row: TransactionRow) -> Self {
        Self {
            tx_hash: row.tx_hash,
            block_height: from_db(row.block_height),
            tx_index: row.tx_index as u32,
            result_code: row.result_code as u32,
            transaction: Bytes::from(row.transaction_bytes),
            created_at: row.created_at,
        }
    }
}
