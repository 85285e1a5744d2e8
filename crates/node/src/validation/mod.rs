//! Per-variant validation and finalization of block transactions.
//!
//! [`TxValidator::validate`] is pure over the state visible through the
//! [`Queries`] it is handed. [`TxValidator::finalize`] re-validates against the
//! block's own writes and then applies the transaction through the same
//! handle, so a transaction invalidated by an earlier one in its block fails
//! instead of corrupting state.

use alloy_primitives::{Address, B256};
use chorus_config::{Config, NetworkParams};
use chorus_primitives::{
    AddressContext, CryptoError, SignedTransaction,
    transaction::{SignError, Transaction},
};
use chorus_storage::Queries;

use crate::{abci::ValidatorUpdate, events::Event};

mod ddex;
mod entity;
mod membership;
pub mod ordering;
mod pos;
mod reward;
mod sla;

pub use ddex::Acknowledgment;
pub use pos::{SUBMISSION_DEADLINE, VERIFICATION_DEADLINE};
pub use sla::expected_rollup;

/// Furthest a membership change deadline may lie ahead of the current height.
pub const MAX_DEADLINE_WINDOW: u64 = 86_400;

/// Why a transaction is not acceptable at this point of the chain.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("transaction `{0}` is already finalized")]
    AlreadyFinalized(String),
    #[error("transaction expired at {expiration}, current height {height}")]
    Expired { expiration: u64, height: u64 },
    #[error("signature does not recover")]
    Signature(#[from] SignError),
    #[error("signed by `{actual}`, expected `{expected}`")]
    SignerMismatch { expected: String, actual: String },
    #[error("voting power {actual} does not match network power {expected}")]
    VotingPower { expected: i64, actual: i64 },
    #[error("consensus address `{claimed}` does not match public key address `{derived}`")]
    AddressMismatch { claimed: String, derived: String },
    #[error("validator `{0}` is already registered")]
    AlreadyRegistered(String),
    #[error("no registered validator `{0}`")]
    UnknownValidator(String),
    #[error("deadline {deadline} outside of [{height}, {height} + {MAX_DEADLINE_WINDOW}]")]
    DeadlineOutOfRange { deadline: u64, height: u64 },
    #[error("invalid attestation signature")]
    AttestationSignature(#[source] CryptoError),
    #[error("attestation carries {have} valid signatures, {need} required")]
    NotEnoughAttestations { have: usize, need: usize },
    #[error("self registration of `{0}` is closed, an attestation is required")]
    LegacyRegistrationClosed(String),
    #[error("no misbehavior reported for `{0}` in this block")]
    NoMisbehavior(String),
    #[error("no sla rollup is due at height {0}")]
    RollupNotDue(u64),
    #[error("sla rollup does not match the recomputed rollup")]
    RollupMismatch,
    #[error("no pos challenge at height {0}")]
    UnknownChallenge(u64),
    #[error("pos challenge at height {0} is closed")]
    ChallengeClosed(u64),
    #[error("proof for challenge {challenge} submitted at {height}, past the submission deadline")]
    SubmissionDeadline { challenge: u64, height: u64 },
    #[error("verification for challenge {challenge} submitted at {height}, before the submission deadline")]
    VerificationTooEarly { challenge: u64, height: u64 },
    #[error("verification for challenge {challenge} submitted at {height}, past the verification deadline")]
    VerificationDeadline { challenge: u64, height: u64 },
    #[error("prover `{0}` is not in the challenge replica set")]
    NotInReplicaSet(String),
    #[error("malformed proof signature")]
    ProofSignature(#[source] CryptoError),
    #[error("`{actual}` is not the verifier `{expected}` of the challenge")]
    NotVerifier { expected: String, actual: String },
    #[error("no storage proofs filed for challenge {0}")]
    NoProofs(u64),
    #[error("revealed proof matches no filed proof signature")]
    ProofMismatch,
    #[error("envelope chain id `{actual}` does not match `{expected}`")]
    ChainId { expected: String, actual: String },
    #[error("envelope carries no messages")]
    EmptyEnvelope,
    #[error("{message} message {index}: {reason}")]
    InvalidMessage {
        message: &'static str,
        index: usize,
        reason: &'static str,
    },
    #[error("nonce {actual} does not follow stored nonce, expected {expected}")]
    Nonce { expected: u64, actual: u64 },
    #[error("nothing stored at `{0}`")]
    UnknownAddress(String),
    #[error("`{0}` is not part of the stored message")]
    UnknownSubEntity(String),
    #[error("legacy release messages are not accepted")]
    LegacyRelease,
    #[error("unknown entity action `{0}`")]
    UnknownAction(String),
    #[error("reward {0}")]
    InvalidReward(&'static str),
    #[error("`{0}` is not a claim authority of the reward")]
    NotClaimAuthority(String),
    /// The state store could not answer. Not a verdict on the transaction.
    #[error("state store failure")]
    Store(#[from] eyre::Report),
}

impl ValidationError {
    /// Whether the error says nothing about the transaction itself.
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::Store(_))
    }
}

/// Which callback a transaction is checked for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Proposal,
    Finalize,
}

/// What a transaction is checked against besides state.
#[derive(Clone, Debug)]
pub struct BlockContext {
    pub height: u64,
    /// Unix seconds.
    pub time: i64,
    /// Zero while a proposal is still being built.
    pub hash: B256,
    pub proposer: String,
    /// Consensus addresses of validators the engine reported misbehaving.
    pub misbehavior: Vec<String>,
    pub phase: Phase,
}

/// Side effects of finalized transactions the adapter hands to the engine
/// and the event bus.
#[derive(Debug, Default)]
pub struct BlockEffects {
    validator_updates: Vec<(String, ValidatorUpdate)>,
    pub events: Vec<(String, Event)>,
}

impl BlockEffects {
    /// Records a new validator. The first update for an address wins.
    pub fn register(&mut self, consensus_address: &str, update: ValidatorUpdate) {
        if !self
            .validator_updates
            .iter()
            .any(|(address, _)| address == consensus_address)
        {
            self.validator_updates
                .push((consensus_address.to_string(), update));
        }
    }

    /// Drives a validator's power to zero, overriding earlier updates.
    pub fn deregister(&mut self, consensus_address: &str, mut update: ValidatorUpdate) {
        update.power = 0;
        match self
            .validator_updates
            .iter_mut()
            .find(|(address, _)| address == consensus_address)
        {
            Some((_, existing)) => *existing = update,
            None => self
                .validator_updates
                .push((consensus_address.to_string(), update)),
        }
    }

    pub fn publish(&mut self, topic: String, event: Event) {
        self.events.push((topic, event));
    }

    pub fn merge(&mut self, other: Self) {
        for (address, update) in other.validator_updates {
            if update.power == 0 {
                self.deregister(&address, update);
            } else {
                self.register(&address, update);
            }
        }
        self.events.extend(other.events);
    }

    pub fn validator_updates(&self) -> Vec<ValidatorUpdate> {
        self.validator_updates
            .iter()
            .map(|(_, update)| update.clone())
            .collect()
    }
}

/// Applies the network's transaction rules.
#[derive(Clone, Debug)]
pub struct TxValidator {
    chain_id: String,
    network: NetworkParams,
    genesis_validators: Vec<String>,
}

impl TxValidator {
    pub fn new(chain_id: String, network: NetworkParams, genesis_validators: Vec<String>) -> Self {
        Self {
            chain_id,
            network,
            genesis_validators,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.chain_id.clone(),
            config.network(),
            config.genesis_validators.clone(),
        )
    }

    pub fn chain_id(&self) -> &str {
        &self.chain_id
    }

    pub fn network(&self) -> &NetworkParams {
        &self.network
    }

    fn is_genesis_validator(&self, wallet: &str) -> bool {
        self.genesis_validators
            .iter()
            .any(|genesis| genesis.eq_ignore_ascii_case(wallet))
    }

    /// Checks `tx` against the state behind `q`, returning the recovered signer.
    pub async fn validate(
        &self,
        q: &mut Queries<'_>,
        ctx: &BlockContext,
        tx: &SignedTransaction,
    ) -> Result<Address, ValidationError> {
        if let Some(expiration) = tx.expiration
            && !tx.is_live_at(ctx.height)
        {
            return Err(ValidationError::Expired {
                expiration,
                height: ctx.height,
            });
        }
        let signer = tx.recover_signer()?;

        match &tx.transaction {
            Transaction::Plays(_) => {}
            Transaction::ManageEntity(entity) => entity::validate(&signer, entity)?,
            Transaction::ValidatorRegistration(registration) => {
                self.validate_legacy_registration(q, &signer, registration)
                    .await?
            }
            Transaction::ValidatorDeregistration(deregistration) => {
                self.validate_misbehavior_deregistration(q, ctx, deregistration)
                    .await?
            }
            Transaction::Attestation(attestation) => {
                self.validate_attestation(q, ctx, &signer, attestation)
                    .await?
            }
            Transaction::SlaRollup(rollup) => self.validate_rollup(q, ctx, rollup).await?,
            Transaction::StorageProof(proof) => {
                pos::validate_proof(q, ctx, &signer, proof).await?
            }
            Transaction::StorageProofVerification(verification) => {
                pos::validate_verification(q, ctx, &signer, verification).await?;
            }
            Transaction::Release(_) => return Err(ValidationError::LegacyRelease),
            Transaction::Envelope(envelope) => self.validate_envelope(q, envelope).await?,
            Transaction::Reward(message) => {
                reward::validate(q, ctx, &signer, message).await?;
            }
        }
        Ok(signer)
    }

    /// Re-validates `tx` and applies it through `q`.
    ///
    /// On error the caller must discard every write made through `q`.
    pub async fn finalize(
        &self,
        q: &mut Queries<'_>,
        ctx: &BlockContext,
        tx_hash: &str,
        tx: &SignedTransaction,
        effects: &mut BlockEffects,
    ) -> Result<(), ValidationError> {
        let signer = self.validate(q, ctx, tx).await?;
        let addresses = AddressContext {
            chain_id: &self.chain_id,
            height: ctx.height,
            tx_hash,
        };

        match &tx.transaction {
            Transaction::Plays(plays) => {
                entity::finalize_plays(q, ctx, tx_hash, plays, effects).await?
            }
            Transaction::ManageEntity(manage) => {
                entity::finalize(q, ctx, tx_hash, manage).await?
            }
            Transaction::ValidatorRegistration(registration) => {
                membership::finalize_legacy_registration(q, ctx, &signer, registration, effects)
                    .await?
            }
            Transaction::ValidatorDeregistration(deregistration) => {
                membership::remove_validator(
                    q,
                    ctx,
                    &deregistration.consensus_address,
                    &deregistration.consensus_pubkey,
                    effects,
                )
                .await?
            }
            Transaction::Attestation(attestation) => {
                membership::finalize_attestation(q, ctx, &signer, attestation, effects).await?
            }
            Transaction::SlaRollup(rollup) => sla::finalize(q, tx_hash, rollup).await?,
            Transaction::StorageProof(proof) => pos::finalize_proof(q, proof).await?,
            Transaction::StorageProofVerification(verification) => {
                pos::finalize_verification(q, ctx, &signer, verification).await?
            }
            Transaction::Release(_) => return Err(ValidationError::LegacyRelease),
            Transaction::Envelope(envelope) => {
                ddex::finalize(q, &addresses, envelope).await?
            }
            Transaction::Reward(message) => {
                reward::finalize(q, &addresses, &signer, message).await?
            }
        }
        Ok(())
    }
}
