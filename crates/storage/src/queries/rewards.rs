use eyre::WrapErr;
use sqlx::types::Json;

use chorus_primitives::transaction::ClaimAuthority;

use super::{Queries, from_db, to_db};
use crate::models::Reward;

impl Queries<'_> {
    pub async fn insert_reward(&mut self, reward: &Reward) -> eyre::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO core_rewards (
                address, reward_id, name, amount, claim_authorities,
                deadline_block_height, sender, tx_hash, block_height
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(address) DO NOTHING;
            "#,
        )
        .bind(&reward.address)
        .bind(&reward.reward_id)
        .bind(&reward.name)
        .bind(to_db(reward.amount))
        .bind(Json(&reward.claim_authorities))
        .bind(to_db(reward.deadline_block_height))
        .bind(&reward.sender)
        .bind(&reward.tx_hash)
        .bind(to_db(reward.block_height))
        .execute(&mut *self.conn)
        .await
        .wrap_err("insert reward")?;
        Ok(())
    }

    pub async fn reward(&mut self, address: &str) -> eyre::Result<Option<Reward>> {
        let row = sqlx::query_as::<_, RewardRow>(
            r#"
            SELECT address, reward_id, name, amount, claim_authorities,
                   deadline_block_height, sender, tx_hash, block_height
            FROM core_rewards
            WHERE address = ?1;
            "#,
        )
        .bind(address)
        .fetch_optional(&mut *self.conn)
        .await
        .wrap_err("fetch reward")?;
        Ok(row.map(Into::into))
    }

    /// Rewards `wallet` is a claim authority of.
    pub async fn rewards_by_authority(&mut self, wallet: &str) -> eyre::Result<Vec<Reward>> {
        let rows = sqlx::query_as::<_, RewardRow>(
            r#"
            SELECT address, reward_id, name, amount, claim_authorities,
                   deadline_block_height, sender, tx_hash, block_height
            FROM core_rewards
            ORDER BY block_height, address;
            "#,
        )
        .fetch_all(&mut *self.conn)
        .await
        .wrap_err("fetch rewards")?;
        Ok(rows
            .into_iter()
            .map(Reward::from)
            .filter(|reward| reward.is_authority(wallet))
            .collect())
    }

    /// Overwrites the mutable fields of an existing reward.
    pub async fn update_reward(&mut self, reward: &Reward) -> eyre::Result<()> {
        sqlx::query(
            r#"
            UPDATE core_rewards
            SET name = ?2, amount = ?3, claim_authorities = ?4, deadline_block_height = ?5,
                tx_hash = ?6, block_height = ?7
            WHERE address = ?1;
            "#,
        )
        .bind(&reward.address)
        .bind(&reward.name)
        .bind(to_db(reward.amount))
        .bind(Json(&reward.claim_authorities))
        .bind(to_db(reward.deadline_block_height))
        .bind(&reward.tx_hash)
        .bind(to_db(reward.block_height))
        .execute(&mut *self.conn)
        .await
        .wrap_err("update reward")?;
        Ok(())
    }

    pub async fn delete_reward(&mut self, address: &str) -> eyre::Result<bool> {
        let result = sqlx::query("DELETE FROM core_rewards WHERE address = ?1;")
            .bind(address)
            .execute(&mut *self.conn)
            .await
            .wrap_err("delete reward")?;
        Ok(result.rows_affected() > 0)
    }
}

#[derive(Debug, sqlx::FromRow)]
struct RewardRow {
    address: String,
    reward_id: String,
    name: String,
    amount: i64,
    claim_authorities: Json<Vec<ClaimAuthority>>,
    deadline_block_height: i64,
    sender: String,
    tx_hash: String,
    block_height: i64,
}

impl From<RewardRow> for Reward {
    fn from(row: RewardRow) -> Self {
        Self {
            address: row.address,
            reward_id: row.reward_id,
            name: row.name,
            amount: from_db(row.amount),
            claim_authorities: row.claim_authorities.0,
            deadline_block_height: from_db(row.deadline_block_height),
            sender: row.sender,
            tx_hash: row.tx_hash,
            block_height: from_db(row.block_height),
        }
    }
}
