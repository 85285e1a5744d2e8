use eyre::WrapErr;
use std::str::FromStr;

use sqlx::{
    Sqlite, SqlitePool, Transaction,
    pool::PoolConnection,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
};
use tracing::info;

/// Table definitions, created in order at connect time.
const SCHEMA: &[(&str, &str)] = &[
    (
        "core_blocks",
        r#"
        CREATE TABLE IF NOT EXISTS core_blocks (
            height INTEGER NOT NULL PRIMARY KEY,
            hash TEXT NOT NULL,
            proposer TEXT NOT NULL,
            chain_id TEXT NOT NULL,
            created_at INTEGER NOT NULL
        );
        "#,
    ),
    (
        "core_app_state",
        r#"
        CREATE TABLE IF NOT EXISTS core_app_state (
            height INTEGER NOT NULL PRIMARY KEY,
            app_hash BLOB NOT NULL
        );
        "#,
    ),
    (
        "core_transactions",
        r#"
        CREATE TABLE IF NOT EXISTS core_transactions (
            tx_hash TEXT NOT NULL PRIMARY KEY,
            block_height INTEGER NOT NULL,
            tx_index INTEGER NOT NULL,
            result_code INTEGER NOT NULL,
            transaction_bytes BLOB NOT NULL,
            created_at INTEGER NOT NULL
        );
        "#,
    ),
    (
        "core_transactions_block_idx",
        r#"
        CREATE INDEX IF NOT EXISTS core_transactions_block_idx
            ON core_transactions(block_height, tx_index);
        "#,
    ),
    (
        "core_tx_stats",
        r#"
        CREATE TABLE IF NOT EXISTS core_tx_stats (
            tx_hash TEXT NOT NULL PRIMARY KEY,
            tx_type TEXT NOT NULL,
            block_height INTEGER NOT NULL,
            created_at INTEGER NOT NULL
        );
        "#,
    ),
    (
        "core_validators",
        r#"
        CREATE TABLE IF NOT EXISTS core_validators (
            eth_address TEXT NOT NULL PRIMARY KEY COLLATE NOCASE,
            consensus_address TEXT NOT NULL UNIQUE,
            consensus_pubkey BLOB NOT NULL,
            endpoint TEXT NOT NULL,
            node_type TEXT NOT NULL,
            sp_id TEXT NOT NULL,
            eth_block INTEGER NOT NULL,
            voting_power INTEGER NOT NULL,
            registered_at INTEGER NOT NULL
        );
        "#,
    ),
    (
        "core_plays",
        r#"
        CREATE TABLE IF NOT EXISTS core_plays (
            tx_hash TEXT NOT NULL,
            play_index INTEGER NOT NULL,
            user_id TEXT NOT NULL,
            track_id TEXT NOT NULL,
            played_at INTEGER NOT NULL,
            signature TEXT NOT NULL,
            city TEXT NOT NULL,
            region TEXT NOT NULL,
            country TEXT NOT NULL,
            block_height INTEGER NOT NULL,
            PRIMARY KEY (tx_hash, play_index)
        );
        "#,
    ),
    (
        "core_plays_track_idx",
        r#"
        CREATE INDEX IF NOT EXISTS core_plays_track_idx ON core_plays(track_id);
        "#,
    ),
    (
        "core_entities",
        r#"
        CREATE TABLE IF NOT EXISTS core_entities (
            entity_type TEXT NOT NULL,
            entity_id INTEGER NOT NULL,
            user_id INTEGER NOT NULL,
            action TEXT NOT NULL,
            metadata TEXT NOT NULL,
            signer TEXT NOT NULL,
            nonce TEXT NOT NULL,
            deleted INTEGER NOT NULL,
            tx_hash TEXT NOT NULL,
            block_height INTEGER NOT NULL,
            PRIMARY KEY (entity_type, entity_id)
        );
        "#,
    ),
    (
        "sla_rollups",
        r#"
        CREATE TABLE IF NOT EXISTS sla_rollups (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            tx_hash TEXT NOT NULL UNIQUE,
            block_start INTEGER NOT NULL,
            block_end INTEGER NOT NULL,
            time INTEGER NOT NULL
        );
        "#,
    ),
    (
        "sla_node_reports",
        r#"
        CREATE TABLE IF NOT EXISTS sla_node_reports (
            rollup_id INTEGER NOT NULL REFERENCES sla_rollups(id),
            address TEXT NOT NULL,
            blocks_proposed INTEGER NOT NULL,
            PRIMARY KEY (rollup_id, address)
        );
        "#,
    ),
    (
        "pos_challenges",
        r#"
        CREATE TABLE IF NOT EXISTS pos_challenges (
            block_height INTEGER NOT NULL PRIMARY KEY,
            block_hash TEXT NOT NULL,
            verifier_address TEXT NOT NULL,
            prover_addresses TEXT,
            status TEXT NOT NULL,
            outcome TEXT
        );
        "#,
    ),
    (
        "storage_proofs",
        r#"
        CREATE TABLE IF NOT EXISTS storage_proofs (
            block_height INTEGER NOT NULL,
            address TEXT NOT NULL,
            cid TEXT NOT NULL,
            proof_signature BLOB NOT NULL,
            prover_addresses TEXT NOT NULL,
            encrypted_proof BLOB NOT NULL,
            encrypted_secret BLOB NOT NULL,
            ephemeral_public_key BLOB NOT NULL,
            status TEXT NOT NULL,
            PRIMARY KEY (block_height, address)
        );
        "#,
    ),
    (
        "core_erns",
        r#"
        CREATE TABLE IF NOT EXISTS core_erns (
            address TEXT NOT NULL,
            nonce INTEGER NOT NULL,
            tx_hash TEXT NOT NULL,
            message_index INTEGER NOT NULL,
            sender TEXT NOT NULL,
            control_type TEXT NOT NULL,
            party_addresses TEXT NOT NULL,
            resource_addresses TEXT NOT NULL,
            release_addresses TEXT NOT NULL,
            deal_addresses TEXT NOT NULL,
            raw_message BLOB NOT NULL,
            raw_acknowledgment BLOB NOT NULL,
            block_height INTEGER NOT NULL,
            PRIMARY KEY (address, nonce)
        );
        "#,
    ),
    (
        "core_meads",
        r#"
        CREATE TABLE IF NOT EXISTS core_meads (
            address TEXT NOT NULL,
            nonce INTEGER NOT NULL,
            tx_hash TEXT NOT NULL,
            message_index INTEGER NOT NULL,
            sender TEXT NOT NULL,
            control_type TEXT NOT NULL,
            resource_addresses TEXT NOT NULL,
            release_addresses TEXT NOT NULL,
            raw_message BLOB NOT NULL,
            raw_acknowledgment BLOB NOT NULL,
            block_height INTEGER NOT NULL,
            PRIMARY KEY (address, nonce)
        );
        "#,
    ),
    (
        "core_pies",
        r#"
        CREATE TABLE IF NOT EXISTS core_pies (
            address TEXT NOT NULL,
            nonce INTEGER NOT NULL,
            tx_hash TEXT NOT NULL,
            message_index INTEGER NOT NULL,
            sender TEXT NOT NULL,
            control_type TEXT NOT NULL,
            party_addresses TEXT NOT NULL,
            raw_message BLOB NOT NULL,
            raw_acknowledgment BLOB NOT NULL,
            block_height INTEGER NOT NULL,
            PRIMARY KEY (address, nonce)
        );
        "#,
    ),
    (
        "core_rewards",
        r#"
        CREATE TABLE IF NOT EXISTS core_rewards (
            address TEXT NOT NULL PRIMARY KEY,
            reward_id TEXT NOT NULL,
            name TEXT NOT NULL,
            amount INTEGER NOT NULL,
            claim_authorities TEXT NOT NULL,
            deadline_block_height INTEGER NOT NULL,
            sender TEXT NOT NULL,
            tx_hash TEXT NOT NULL,
            block_height INTEGER NOT NULL
        );
        "#,
    ),
];

/// Handle on the node's SQLite database.
#[derive(Clone, Debug)]
pub struct StateStore {
    pool: SqlitePool,
}

impl StateStore {
    pub async fn connect(database_url: &str) -> eyre::Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .wrap_err("parse sqlite url")?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await
            .wrap_err("connect sqlite")?;
        let store = Self { pool };
        store.migrate().await?;
        info!(database_url, "state store ready");
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn migrate(&self) -> eyre::Result<()> {
        for (name, statement) in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .wrap_err_with(|| format!("create {name}"))?;
        }
        Ok(())
    }

    /// A pooled connection for reads outside of block processing.
    pub async fn reader(&self) -> eyre::Result<PoolConnection<Sqlite>> {
        self.pool.acquire().await.wrap_err("acquire connection")
    }

    /// Opens the transaction a block's mutations are written through.
    pub async fn begin(&self) -> eyre::Result<Transaction<'static, Sqlite>> {
        self.pool.begin().await.wrap_err("begin block transaction")
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
