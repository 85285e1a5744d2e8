use alloy_primitives::Bytes;
use eyre::WrapErr;
use sqlx::types::Json;

use super::{Queries, from_db, to_db};
use crate::models::{DdexRecord, ErnRecord, MeadRecord, PieRecord};

impl Queries<'_> {
    pub async fn insert_ern(&mut self, ern: &ErnRecord) -> eyre::Result<()> {
        let record = &ern.record;
        sqlx::query(
            r#"
            INSERT INTO core_erns (
                address, nonce, tx_hash, message_index, sender, control_type,
                party_addresses, resource_addresses, release_addresses, deal_addresses,
                raw_message, raw_acknowledgment, block_height
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            ON CONFLICT(address, nonce) DO NOTHING;
            "#,
        )
        .bind(&record.address)
        .bind(to_db(record.nonce))
        .bind(&record.tx_hash)
        .bind(record.message_index as i64)
        .bind(&record.sender)
        .bind(record.control_type.as_str())
        .bind(Json(&ern.party_addresses))
        .bind(Json(&ern.resource_addresses))
        .bind(Json(&ern.release_addresses))
        .bind(Json(&ern.deal_addresses))
        .bind(record.raw_message.as_ref())
        .bind(record.raw_acknowledgment.as_ref())
        .bind(to_db(record.block_height))
        .execute(&mut *self.conn)
        .await
        .wrap_err("insert ern")?;
        Ok(())
    }

    /// The highest nonce stored at `address`.
    pub async fn latest_ern(&mut self, address: &str) -> eyre::Result<Option<ErnRecord>> {
        let row = sqlx::query_as::<_, ErnRow>(
            r#"
            SELECT address, nonce, tx_hash, message_index, sender, control_type,
                   party_addresses, resource_addresses, release_addresses, deal_addresses,
                   raw_message, raw_acknowledgment, block_height
            FROM core_erns
            WHERE address = ?1
            ORDER BY nonce DESC
            LIMIT 1;
            "#,
        )
        .bind(address)
        .fetch_optional(&mut *self.conn)
        .await
        .wrap_err("fetch latest ern")?;
        row.map(ErnRow::into_record).transpose()
    }

    pub async fn insert_mead(&mut self, mead: &MeadRecord) -> eyre::Result<()> {
        let record = &mead.record;
        sqlx::query(
            r#"
            INSERT INTO core_meads (
                address, nonce, tx_hash, message_index, sender, control_type,
                resource_addresses, release_addresses, raw_message, raw_acknowledgment,
                block_height
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            ON CONFLICT(address, nonce) DO NOTHING;
            "#,
        )
        .bind(&record.address)
        .bind(to_db(record.nonce))
        .bind(&record.tx_hash)
        .bind(record.message_index as i64)
        .bind(&record.sender)
        .bind(record.control_type.as_str())
        .bind(Json(&mead.resource_addresses))
        .bind(Json(&mead.release_addresses))
        .bind(record.raw_message.as_ref())
        .bind(record.raw_acknowledgment.as_ref())
        .bind(to_db(record.block_height))
        .execute(&mut *self.conn)
        .await
        .wrap_err("insert mead")?;
        Ok(())
    }

    pub async fn latest_mead(&mut self, address: &str) -> eyre::Result<Option<MeadRecord>> {
        let row = sqlx::query_as::<_, MeadRow>(
            r#"
            SELECT address, nonce, tx_hash, message_index, sender, control_type,
                   resource_addresses, release_addresses, raw_message, raw_acknowledgment,
                   block_height
            FROM core_meads
            WHERE address = ?1
            ORDER BY nonce DESC
            LIMIT 1;
            "#,
        )
        .bind(address)
        .fetch_optional(&mut *self.conn)
        .await
        .wrap_err("fetch latest mead")?;
        row.map(MeadRow::into_record).transpose()
    }

    pub async fn insert_pie(&mut self, pie: &PieRecord) -> eyre::Result<()> {
        let record = &pie.record;
        sqlx::query(
            r#"
            INSERT INTO core_pies (
                address, nonce, tx_hash, message_index, sender, control_type,
                party_addresses, raw_message, raw_acknowledgment, block_height
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(address, nonce) DO NOTHING;
            "#,
        )
        .bind(&record.address)
        .bind(to_db(record.nonce))
        .bind(&record.tx_hash)
        .bind(record.message_index as i64)
        .bind(&record.sender)
        .bind(record.control_type.as_str())
        .bind(Json(&pie.party_addresses))
        .bind(record.raw_message.as_ref())
        .bind(record.raw_acknowledgment.as_ref())
        .bind(to_db(record.block_height))
        .execute(&mut *self.conn)
        .await
        .wrap_err("insert pie")?;
        Ok(())
    }

    pub async fn latest_pie(&mut self, address: &str) -> eyre::Result<Option<PieRecord>> {
        let row = sqlx::query_as::<_, PieRow>(
            r#"
            SELECT address, nonce, tx_hash, message_index, sender, control_type,
                   party_addresses, raw_message, raw_acknowledgment, block_height
            FROM core_pies
            WHERE address = ?1
            ORDER BY nonce DESC
            LIMIT 1;
            "#,
        )
        .bind(address)
        .fetch_optional(&mut *self.conn)
        .await
        .wrap_err("fetch latest pie")?;
        row.map(PieRow::into_record).transpose()
    }
}

#[derive(Debug, sqlx::FromRow)]
struct DdexRow {
    address: String,
    nonce: i64,
    tx_hash: String,
    message_index: i64,
    sender: String,
    control_type: String,
    raw_message: Vec<u8>,
    raw_acknowledgment: Vec<u8>,
    block_height: i64,
}

impl TryFrom<DdexRow> for DdexRecord {
    type Error = eyre::Error;

    fn try_from(row: DdexRow) -> Result<Self, Self::Error> {
        Ok(Self {
            control_type: row.control_type.parse().map_err(|err: String| eyre::eyre!(err))?,
            address: row.address,
            nonce: from_db(row.nonce),
            tx_hash: row.tx_hash,
            message_index: row.message_index as u32,
            sender: row.sender,
            raw_message: Bytes::from(row.raw_message),
            raw_acknowledgment: Bytes::from(row.raw_acknowledgment),
            block_height: from_db(row.block_height),
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ErnRow {
    #[sqlx(flatten)]
    record: DdexRow,
    party_addresses: Json<Vec<String>>,
    resource_addresses: Json<Vec<String>>,
    release_addresses: Json<Vec<String>>,
    deal_addresses: Json<Vec<String>>,
}

impl ErnRow {
    fn into_record(self) -> eyre::Result<ErnRecord> {
        Ok(ErnRecord {
            record: self.record.try_into()?,
            party_addresses: self.party_addresses.0,
            resource_addresses: self.resource_addresses.0,
            release_addresses: self.release_addresses.0,
            deal_addresses: self.deal_addresses.0,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct MeadRow {
    #[sqlx(flatten)]
    record: DdexRow,
    resource_addresses: Json<Vec<String>>,
    release_addresses: Json<Vec<String>>,
}

impl MeadRow {
    fn into_record(self) -> eyre::Result<MeadRecord> {
        Ok(MeadRecord {
            record: self.record.try_into()?,
            resource_addresses: self.resource_addresses.0,
            release_addresses: self.release_addresses.0,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PieRow {
    #[sqlx(flatten)]
    record: DdexRow,
    party_addresses: Json<Vec<String>>,
}

impl PieRow {
    fn into_record(self) -> eyre::Result<PieRecord> {
        Ok(PieRecord {
            record: self.record.try_into()?,
            party_addresses: self.party_addresses.0,
        })
    }
}
