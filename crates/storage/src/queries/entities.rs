use eyre::WrapErr;

use super::{Queries, from_db, to_db};
use crate::models::{Entity, Play};

impl Queries<'_> {
    pub async fn insert_play(&mut self, play: &Play) -> eyre::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO core_plays (
                tx_hash, play_index, user_id, track_id, played_at, signature,
                city, region, country, block_height
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(tx_hash, play_index) DO NOTHING;
            "#,
        )
        .bind(&play.tx_hash)
        .bind(play.play_index as i64)
        .bind(&play.user_id)
        .bind(&play.track_id)
        .bind(play.played_at)
        .bind(&play.signature)
        .bind(&play.city)
        .bind(&play.region)
        .bind(&play.country)
        .bind(to_db(play.block_height))
        .execute(&mut *self.conn)
        .await
        .wrap_err("insert play")?;
        Ok(())
    }

    pub async fn plays_for_track(&mut self, track_id: &str) -> eyre::Result<Vec<Play>> {
        let rows = sqlx::query_as::<_, PlayRow>(
            r#"
            SELECT tx_hash, play_index, user_id, track_id, played_at, signature,
                   city, region, country, block_height
            FROM core_plays
            WHERE track_id = ?1
            ORDER BY block_height, tx_hash, play_index;
            "#,
        )
        .bind(track_id)
        .fetch_all(&mut *self.conn)
        .await
        .wrap_err("fetch plays")?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Records the latest action applied to an entity.
    pub async fn upsert_entity(&mut self, entity: &Entity) -> eyre::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO core_entities (
                entity_type, entity_id, user_id, action, metadata, signer, nonce,
                deleted, tx_hash, block_height
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(entity_type, entity_id) DO UPDATE SET
                user_id = excluded.user_id,
                action = excluded.action,
                metadata = excluded.metadata,
                signer = excluded.signer,
                nonce = excluded.nonce,
                deleted = excluded.deleted,
                tx_hash = excluded.tx_hash,
                block_height = excluded.block_height;
            "#,
        )
        .bind(&entity.entity_type)
        .bind(entity.entity_id)
        .bind(entity.user_id)
        .bind(&entity.action)
        .bind(&entity.metadata)
        .bind(&entity.signer)
        .bind(&entity.nonce)
        .bind(entity.deleted)
        .bind(&entity.tx_hash)
        .bind(to_db(entity.block_height))
        .execute(&mut *self.conn)
        .await
        .wrap_err("upsert entity")?;
        Ok(())
    }

    pub async fn entity(&mut self, entity_type: &str, entity_id: i64) -> eyre::Result<Option<Entity>> {
        let row = sqlx::query_as::<_, EntityRow>(
            r#"
            SELECT entity_type, entity_id, user_id, action, metadata, signer, nonce,
                   deleted, tx_hash, block_height
            FROM core_entities
            WHERE entity_type = ?1 AND entity_id = ?2;
            "#,
        )
        .bind(entity_type)
        .bind(entity_id)
        .fetch_optional(&mut *self.conn)
        .await
        .wrap_err("fetch entity")?;
        Ok(row.map(Into::into))
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PlayRow {
    tx_hash: String,
    play_index: i64,
    user_id: String,
    track_id: String,
    played_at: i64,
    signature: String,
    city: String,
    region: String,
    country: String,
    block_height: i64,
}

impl From<PlayRow> for Play {
    fn from(row: PlayRow) -> Self {
        Self {
            tx_hash: row.tx_hash,
            play_index: row.play_index as u32,
            user_id: row.user_id,
            track_id: row.track_id,
            played_at: row.played_at,
            signature: row.signature,
            city: row.city,
            region: row.region,
            country: row.country,
            block_height: from_db(row.block_height),
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct EntityRow {
    entity_type: String,
    entity_id: i64,
    user_id: i64,
    action: String,
    metadata: String,
    signer: String,
    nonce: String,
    deleted: bool,
    tx_hash: String,
    block_height: i64,
}

impl From<EntityRow> for Entity {
    fn from(row: EntityRow) -> Self {
        Self {
            entity_type: row.entity_type,
            entity_id: row.entity_id,
            user_id: row.user_id,
            action: row.action,
            metadata: row.metadata,
            signer: row.signer,
            nonce: row.nonce,
            deleted: row.deleted,
            tx_hash: row.tx_hash,
            block_height: from_db(row.block_height),
        }
    }
}
