use eyre::WrapErr;

use chorus_primitives::transaction::SlaRollup;

use super::{Queries, from_db, to_db};
use crate::models::{SlaReport, SlaRollupRecord};

impl Queries<'_> {
    /// Inserts a rollup and its reports. Returns the rollup id, or `None` if
    /// the transaction was already recorded.
    pub async fn insert_sla_rollup(
        &mut self,
        tx_hash: &str,
        rollup: &SlaRollup,
    ) -> eyre::Result<Option<i64>> {
        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO sla_rollups (tx_hash, block_start, block_end, time)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(tx_hash) DO NOTHING
            RETURNING id;
            "#,
        )
        .bind(tx_hash)
        .bind(to_db(rollup.block_start))
        .bind(to_db(rollup.block_end))
        .bind(rollup.timestamp)
        .fetch_optional(&mut *self.conn)
        .await
        .wrap_err("insert sla rollup")?;

        let Some(id) = id else {
            return Ok(None);
        };
        for report in &rollup.reports {
            sqlx::query(
                r#"
                INSERT INTO sla_node_reports (rollup_id, address, blocks_proposed)
                VALUES (?1, ?2, ?3);
                "#,
            )
            .bind(id)
            .bind(&report.address)
            .bind(to_db(report.blocks_proposed))
            .execute(&mut *self.conn)
            .await
            .wrap_err("insert sla node report")?;
        }
        Ok(Some(id))
    }

    pub async fn latest_sla_rollup(&mut self) -> eyre::Result<Option<SlaRollupRecord>> {
        let row = sqlx::query_as::<_, RollupRow>(
            r#"
            SELECT id, tx_hash, block_start, block_end, time
            FROM sla_rollups
            ORDER BY block_end DESC, id DESC
            LIMIT 1;
            "#,
        )
        .fetch_optional(&mut *self.conn)
        .await
        .wrap_err("fetch latest sla rollup")?;
        Ok(row.map(Into::into))
    }

    /// The rollup immediately before `id`.
    pub async fn previous_sla_rollup(&mut self, id: i64) -> eyre::Result<Option<SlaRollupRecord>> {
        let row = sqlx::query_as::<_, RollupRow>(
            r#"
            SELECT id, tx_hash, block_start, block_end, time
            FROM sla_rollups
            WHERE id < ?1
            ORDER BY id DESC
            LIMIT 1;
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *self.conn)
        .await
        .wrap_err("fetch previous sla rollup")?;
        Ok(row.map(Into::into))
    }

    /// Rollups whose window overlaps `[start, end]`, oldest first.
    pub async fn sla_rollups_in_range(
        &mut self,
        start: u64,
        end: u64,
    ) -> eyre::Result<Vec<SlaRollupRecord>> {
        let rows = sqlx::query_as::<_, RollupRow>(
            r#"
            SELECT id, tx_hash, block_start, block_end, time
            FROM sla_rollups
            WHERE block_end >= ?1 AND block_start <= ?2
            ORDER BY block_start;
            "#,
        )
        .bind(to_db(start))
        .bind(to_db(end))
        .fetch_all(&mut *self.conn)
        .await
        .wrap_err("fetch sla rollups in range")?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    pub async fn sla_reports(&mut self, rollup_id: i64) -> eyre::Result<Vec<SlaReport>> {
        let rows = sqlx::query_as::<_, ReportRow>(
            r#"
            SELECT rollup_id, address, blocks_proposed
            FROM sla_node_reports
            WHERE rollup_id = ?1
            ORDER BY address;
            "#,
        )
        .bind(rollup_id)
        .fetch_all(&mut *self.conn)
        .await
        .wrap_err("fetch sla reports")?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Every report filed for one validator, newest rollup first.
    pub async fn sla_reports_for_node(&mut self, address: &str) -> eyre::Result<Vec<SlaReport>> {
        let rows = sqlx::query_as::<_, ReportRow>(
            r#"
            SELECT rollup_id, address, blocks_proposed
            FROM sla_node_reports
            WHERE address = ?1
            ORDER BY rollup_id DESC;
            "#,
        )
        .bind(address)
        .fetch_all(&mut *self.conn)
        .await
        .wrap_err("fetch sla reports for node")?;
        Ok(rows.into_iter().map(Into::into).collect())
    }
}

#[derive(Debug, sqlx::FromRow)]
struct RollupRow {
    id: i64,
    tx_hash: String,
    block_start: i64,
    block_end: i64,
    time: i64,
}

impl From<RollupRow> for SlaRollupRecord {
    fn from(row: RollupRow) -> Self {
        Self {
            id: row.id,
            tx_hash: row.tx_hash,
            block_start: from_db(row.block_start),
            block_end: from_db(row.block_end),
            time: row.time,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ReportRow {
    rollup_id: i64,
    address: String,
    blocks_proposed: i64,
}

impl From<ReportRow> for SlaReport {
    fn from(row: ReportRow) -> Self {
        Self {
            rollup_id: row.rollup_id,
            address: row.address,
            blocks_proposed: from_db(row.blocks_proposed),
        }
    }
}
