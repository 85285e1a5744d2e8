//! Single validator block production for local networks.
//!
//! Stands in for the consensus engine: every tick it walks the application
//! through one full height with this node as proposer.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use alloy_primitives::B256;
use eyre::{WrapErr, bail};
use sha2::{Digest, Sha256};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::abci::{
    Application, ExecTxResult, FinalizeBlockRequest, InitChainRequest, Misbehavior,
    PrepareProposalRequest, ProcessProposalRequest, ProposalStatus, ValidatorUpdate,
};

/// Largest proposal the driver asks for.
pub const MAX_PROPOSAL_BYTES: u64 = 100 * 1024 * 1024;

/// `sha256(previous ‖ height)` with the height big endian.
pub fn block_hash(previous: &B256, height: u64) -> B256 {
    let mut hasher = Sha256::new();
    hasher.update(previous);
    hasher.update(height.to_be_bytes());
    B256::from_slice(&hasher.finalize())
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as i64)
        .unwrap_or_default()
}

/// Outcome of one produced height.
#[derive(Clone, Debug)]
pub struct ProducedBlock {
    pub height: u64,
    pub hash: B256,
    pub time: i64,
    pub tx_results: Vec<ExecTxResult>,
    pub validator_updates: Vec<ValidatorUpdate>,
    pub app_hash: B256,
    pub retain_height: u64,
}

/// Drives an [`Application`] as the only validator of its chain.
#[derive(Debug)]
pub struct SoloDriver<A> {
    app: A,
    proposer: String,
    interval: Duration,
    height: u64,
    last_hash: B256,
    misbehavior: Vec<Misbehavior>,
}

impl<A: Application> SoloDriver<A> {
    /// `proposer` is the consensus address every block is attributed to.
    pub fn new(app: A, proposer: String, interval: Duration) -> Self {
        Self {
            app,
            proposer,
            interval,
            height: 0,
            last_hash: B256::ZERO,
            misbehavior: Vec::new(),
        }
    }

    pub fn app(&self) -> &A {
        &self.app
    }

    pub fn app_mut(&mut self) -> &mut A {
        &mut self.app
    }

    /// Height of the last produced block.
    pub fn height(&self) -> u64 {
        self.height
    }

    /// Resumes from the application's last committed height, initializing the
    /// chain when nothing was committed yet.
    pub async fn start(
        &mut self,
        chain_id: &str,
        validators: Vec<ValidatorUpdate>,
    ) -> eyre::Result<u64> {
        let info = self.app.info().await.wrap_err("application info")?;
        self.height = info.last_block_height;
        if self.height == 0 {
            self.app
                .init_chain(InitChainRequest {
                    chain_id: chain_id.to_string(),
                    initial_height: 1,
                    time: unix_now(),
                    validators,
                })
                .await
                .wrap_err("init chain")?;
        } else {
            self.last_hash = info.last_block_app_hash;
        }
        info!(height = self.height, version = %info.version, "solo driver started");
        Ok(self.height)
    }

    /// Queues evidence against `validator_address` for the next block.
    pub fn report_misbehavior(&mut self, misbehavior: Misbehavior) {
        self.misbehavior.push(misbehavior);
    }

    pub async fn produce_block(&mut self) -> eyre::Result<ProducedBlock> {
        self.produce_block_at(unix_now()).await
    }

    pub async fn produce_block_at(&mut self, time: i64) -> eyre::Result<ProducedBlock> {
        let hash = block_hash(&self.last_hash, self.height + 1);
        self.produce_block_with_hash(time, hash).await
    }

    /// Runs the next height with a caller chosen block hash.
    pub async fn produce_block_with_hash(
        &mut self,
        time: i64,
        hash: B256,
    ) -> eyre::Result<ProducedBlock> {
        let height = self.height + 1;
        let misbehavior = std::mem::take(&mut self.misbehavior);

        let proposal = self
            .app
            .prepare_proposal(PrepareProposalRequest {
                max_tx_bytes: MAX_PROPOSAL_BYTES,
                txs: Vec::new(),
                misbehavior: misbehavior.clone(),
                height,
                time,
                proposer_address: self.proposer.clone(),
            })
            .await
            .wrap_err("prepare proposal")?;

        let verdict = self
            .app
            .process_proposal(ProcessProposalRequest {
                txs: proposal.txs.clone(),
                misbehavior: misbehavior.clone(),
                hash,
                height,
                time,
                proposer_address: self.proposer.clone(),
            })
            .await
            .wrap_err("process proposal")?;
        if verdict.status != ProposalStatus::Accept {
            self.misbehavior = misbehavior;
            bail!("own proposal at height {height} was not accepted: {:?}", verdict.status);
        }

        let finalized = self
            .app
            .finalize_block(FinalizeBlockRequest {
                txs: proposal.txs,
                misbehavior,
                hash,
                height,
                time,
                proposer_address: self.proposer.clone(),
            })
            .await
            .wrap_err("finalize block")?;
        let commit = self.app.commit().await.wrap_err("commit")?;

        self.height = height;
        self.last_hash = hash;
        debug!(height, txs = finalized.tx_results.len(), "solo block produced");
        Ok(ProducedBlock {
            height,
            hash,
            time,
            tx_results: finalized.tx_results,
            validator_updates: finalized.validator_updates,
            app_hash: finalized.app_hash,
            retain_height: commit.retain_height,
        })
    }

    /// Produces a block every interval until shutdown.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!(height = self.height, "solo driver stopped");
                    return;
                }
                _ = ticker.tick() => {
                    if let Err(err) = self.produce_block().await {
                        warn!(?err, height = self.height + 1, "failed producing block");
                    }
                }
            }
        }
    }
}
