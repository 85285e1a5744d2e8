use alloy_primitives::Bytes;
use eyre::WrapErr;

use super::{Queries, from_db, to_db};
use crate::models::Validator;

const SELECT_VALIDATOR: &str = r#"
    SELECT eth_address, consensus_address, consensus_pubkey, endpoint, node_type,
           sp_id, eth_block, voting_power, registered_at
    FROM core_validators
"#;

impl Queries<'_> {
    /// Inserts a validator. Returns `false` if the wallet or consensus
    /// address is already registered.
    pub async fn insert_validator(&mut self, validator: &Validator) -> eyre::Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO core_validators (
                eth_address, consensus_address, consensus_pubkey, endpoint, node_type,
                sp_id, eth_block, voting_power, registered_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT DO NOTHING;
            "#,
        )
        .bind(&validator.delegate_wallet)
        .bind(&validator.consensus_address)
        .bind(validator.consensus_pubkey.as_ref())
        .bind(&validator.endpoint)
        .bind(validator.node_type.as_str())
        .bind(&validator.sp_id)
        .bind(to_db(validator.eth_block))
        .bind(validator.voting_power)
        .bind(to_db(validator.registered_at))
        .execute(&mut *self.conn)
        .await
        .wrap_err("insert validator")?;
        Ok(result.rows_affected() > 0)
    }

    /// Returns `true` if a validator was removed.
    pub async fn delete_validator(&mut self, consensus_address: &str) -> eyre::Result<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM core_validators WHERE consensus_address = ?1;
            "#,
        )
        .bind(consensus_address)
        .execute(&mut *self.conn)
        .await
        .wrap_err("delete validator")?;
        Ok(result.rows_affected() > 0)
    }

    /// All validators sorted by consensus address.
    pub async fn validators(&mut self) -> eyre::Result<Vec<Validator>> {
        let rows = sqlx::query_as::<_, ValidatorRow>(&format!(
            "{SELECT_VALIDATOR} ORDER BY consensus_address;"
        ))
        .fetch_all(&mut *self.conn)
        .await
        .wrap_err("fetch validators")?;
        rows.into_iter().map(Validator::try_from).collect()
    }

    pub async fn validator_count(&mut self) -> eyre::Result<u64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM core_validators;")
            .fetch_one(&mut *self.conn)
            .await
            .wrap_err("count validators")?;
        Ok(from_db(count))
    }

    pub async fn validator_by_address(
        &mut self,
        consensus_address: &str,
    ) -> eyre::Result<Option<Validator>> {
        self.validator_where("consensus_address = ?1", consensus_address)
            .await
            .wrap_err("fetch validator by consensus address")
    }

    /// Wallet comparison ignores checksum casing.
    pub async fn validator_by_wallet(&mut self, wallet: &str) -> eyre::Result<Option<Validator>> {
        self.validator_where("eth_address = ?1 COLLATE NOCASE", wallet)
            .await
            .wrap_err("fetch validator by wallet")
    }

    pub async fn validator_by_endpoint(&mut self, endpoint: &str) -> eyre::Result<Option<Validator>> {
        self.validator_where("endpoint = ?1", endpoint)
            .await
            .wrap_err("fetch validator by endpoint")
    }

    async fn validator_where(&mut self, predicate: &str, value: &str) -> eyre::Result<Option<Validator>> {
        let row = sqlx::query_as::<_, ValidatorRow>(&format!(
            "{SELECT_VALIDATOR} WHERE {predicate} LIMIT 1;"
        ))
        .bind(value)
        .fetch_optional(&mut *self.conn)
        .await?;
        row.map(Validator::try_from).transpose()
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ValidatorRow {
    eth_address: String,
    consensus_address: String,
    consensus_pubkey: Vec<u8>,
    endpoint: String,
    node_type: String,
    sp_id: String,
    eth_block: i64,
    voting_power: i64,
    registered_at: i64,
}

impl TryFrom<ValidatorRow> for Validator {
    type Error = eyre::Error;

    fn try_from(row: ValidatorRow) -> Result<Self, Self::Error> {
        Ok(Self {
            node_type: row.node_type.parse().map_err(|err: String| eyre::eyre!(err))?,
            delegate_wallet: row.eth_address,
            consensus_address: row.consensus_address,
            consensus_pubkey: Bytes::from(row.consensus_pubkey),
            endpoint: row.endpoint,
            sp_id: row.sp_id,
            eth_block: from_db(row.eth_block),
            voting_power: row.voting_power,
            registered_at: from_db(row.registered_at),
        })
    }
}
