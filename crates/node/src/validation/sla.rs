use std::collections::HashMap;

use chorus_primitives::transaction::{SlaNodeReport, SlaRollup};
use chorus_storage::Queries;
use eyre::WrapErr;

use super::{BlockContext, TxValidator, ValidationError};

/// The rollup a proposer must include at `height`, if one is due.
///
/// Counts blocks proposed since the previous rollup, including the block at
/// `height` itself, for every validator registered before `height`.
pub async fn expected_rollup(
    q: &mut Queries<'_>,
    interval: u64,
    height: u64,
    time: i64,
    proposer: &str,
) -> eyre::Result<Option<SlaRollup>> {
    if interval == 0 || height == 0 || !height.is_multiple_of(interval) {
        return Ok(None);
    }
    let previous_end = q
        .latest_sla_rollup()
        .await
        .wrap_err("fetch latest sla rollup")?
        .map_or(0, |rollup| rollup.block_end);
    if height <= previous_end {
        return Ok(None);
    }

    let block_start = previous_end + 1;
    let mut counts: HashMap<String, u64> = q
        .proposer_counts(block_start, height - 1)
        .await?
        .into_iter()
        .collect();
    *counts.entry(proposer.to_string()).or_default() += 1;

    // Registrations finalized earlier in this block are not yet part of the
    // set the proposer saw.
    let reports = q
        .validators()
        .await?
        .into_iter()
        .filter(|validator| validator.registered_at < height)
        .map(|validator| SlaNodeReport {
            blocks_proposed: counts
                .get(&validator.consensus_address)
                .copied()
                .unwrap_or_default(),
            address: validator.consensus_address,
        })
        .collect();

    Ok(Some(SlaRollup {
        timestamp: time,
        block_start,
        block_end: height,
        reports,
    }))
}

impl TxValidator {
    pub(super) async fn validate_rollup(
        &self,
        q: &mut Queries<'_>,
        ctx: &BlockContext,
        rollup: &SlaRollup,
    ) -> Result<(), ValidationError> {
        let expected = expected_rollup(
            q,
            self.network().sla_rollup_interval,
            ctx.height,
            ctx.time,
            &ctx.proposer,
        )
        .await?
        .ok_or(ValidationError::RollupNotDue(ctx.height))?;
        if expected != *rollup {
            return Err(ValidationError::RollupMismatch);
        }
        Ok(())
    }
}

pub(super) async fn finalize(q: &mut Queries<'_>, tx_hash: &str, rollup: &SlaRollup) -> eyre::Result<()> {
    if let Some(id) = q.insert_sla_rollup(tx_hash, rollup).await? {
        tracing::info!(
            id,
            block_start = rollup.block_start,
            block_end = rollup.block_end,
            validators = rollup.reports.len(),
            "sla rollup recorded"
        );
    }
    Ok(())
}
