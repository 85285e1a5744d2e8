//! Validator set changes: self registration, attested registration and
//! deregistration, and removal of misbehaving validators.

use alloy_primitives::{Address, Bytes};
use chorus_primitives::{
    consensus_address, rendezvous,
    transaction::{
        Attestation, AttestationBody, ValidatorDeregistration, ValidatorMisbehaviorDeregistration,
        ValidatorRegistration, ValidatorRegistrationLegacy,
    },
    wallet_string,
};
use chorus_storage::{Queries, models::Validator};
use std::collections::BTreeSet;
use tracing::info;

use super::{BlockContext, BlockEffects, MAX_DEADLINE_WINDOW, TxValidator, ValidationError};
use crate::{
    abci::ValidatorUpdate,
    events::{DEREGISTRATION_TOPIC, Event},
};

impl TxValidator {
    pub(super) async fn validate_legacy_registration(
        &self,
        q: &mut Queries<'_>,
        signer: &Address,
        registration: &ValidatorRegistrationLegacy,
    ) -> Result<(), ValidationError> {
        let wallet = wallet_string(signer);
        ensure_signer(&registration.delegate_wallet, &wallet)?;
        self.ensure_voting_power(registration.power)?;
        ensure_address(&registration.consensus_pubkey, &registration.consensus_address)?;

        if q.validator_count().await? > 0 && !self.is_genesis_validator(&wallet) {
            return Err(ValidationError::LegacyRegistrationClosed(wallet));
        }
        ensure_unregistered(q, &registration.consensus_address, &wallet).await
    }

    pub(super) async fn validate_misbehavior_deregistration(
        &self,
        q: &mut Queries<'_>,
        ctx: &BlockContext,
        deregistration: &ValidatorMisbehaviorDeregistration,
    ) -> Result<(), ValidationError> {
        let address = &deregistration.consensus_address;
        ensure_address(&deregistration.consensus_pubkey, address)?;
        ensure_registered(q, address).await?;
        if !ctx
            .misbehavior
            .iter()
            .any(|misbehaving| misbehaving.eq_ignore_ascii_case(address))
        {
            return Err(ValidationError::NoMisbehavior(address.clone()));
        }
        Ok(())
    }

    pub(super) async fn validate_attestation(
        &self,
        q: &mut Queries<'_>,
        ctx: &BlockContext,
        signer: &Address,
        attestation: &Attestation,
    ) -> Result<(), ValidationError> {
        ensure_deadline(attestation.body.deadline(), ctx.height)?;
        let params = &self.network().attestation;

        let (key, size, min) = match &attestation.body {
            AttestationBody::ValidatorRegistration(registration) => {
                self.validate_registration_body(q, signer, registration)
                    .await?;
                (
                    rendezvous::registration_key(registration.eth_block).to_vec(),
                    params.registration_rsize,
                    params.registration_min,
                )
            }
            AttestationBody::ValidatorDeregistration(deregistration) => {
                validate_deregistration_body(q, deregistration).await?;
                (
                    deregistration.consensus_pubkey.to_vec(),
                    params.deregistration_rsize,
                    params.deregistration_min,
                )
            }
        };

        let validators = q.validators().await?;
        let selected: BTreeSet<String> = rendezvous::select(
            validators.iter().map(|validator| &validator.delegate_wallet),
            &key,
            size,
        )
        .into_iter()
        .collect();
        let need = validators.len().min(min);

        let message = attestation
            .body
            .signing_bytes()
            .map_err(|err| ValidationError::Signature(err.into()))?;
        let mut attestors = BTreeSet::new();
        for signature in &attestation.signatures {
            let attestor = chorus_primitives::crypto::recover_wallet(signature, &message)
                .map_err(ValidationError::AttestationSignature)?;
            let attestor = wallet_string(&attestor);
            if selected.contains(&attestor) {
                attestors.insert(attestor);
            }
        }

        if attestors.len() < need {
            return Err(ValidationError::NotEnoughAttestations {
                have: attestors.len(),
                need,
            });
        }
        Ok(())
    }

    async fn validate_registration_body(
        &self,
        q: &mut Queries<'_>,
        signer: &Address,
        registration: &ValidatorRegistration,
    ) -> Result<(), ValidationError> {
        let wallet = wallet_string(signer);
        ensure_signer(&registration.delegate_wallet, &wallet)?;
        self.ensure_voting_power(registration.voting_power)?;
        ensure_address(&registration.consensus_pubkey, &registration.consensus_address)?;
        ensure_unregistered(q, &registration.consensus_address, &wallet).await
    }

    fn ensure_voting_power(&self, power: i64) -> Result<(), ValidationError> {
        let expected = self.network().validator_voting_power;
        if power != expected {
            return Err(ValidationError::VotingPower {
                expected,
                actual: power,
            });
        }
        Ok(())
    }
}

async fn validate_deregistration_body(
    q: &mut Queries<'_>,
    deregistration: &ValidatorDeregistration,
) -> Result<(), ValidationError> {
    ensure_address(&deregistration.consensus_pubkey, &deregistration.consensus_address)?;
    ensure_registered(q, &deregistration.consensus_address).await
}

pub(super) async fn finalize_legacy_registration(
    q: &mut Queries<'_>,
    ctx: &BlockContext,
    signer: &Address,
    registration: &ValidatorRegistrationLegacy,
    effects: &mut BlockEffects,
) -> eyre::Result<()> {
    let validator = Validator {
        delegate_wallet: wallet_string(signer),
        consensus_address: registration.consensus_address.clone(),
        consensus_pubkey: registration.consensus_pubkey.clone(),
        endpoint: registration.endpoint.clone(),
        node_type: registration.node_type,
        sp_id: registration.sp_id.clone(),
        eth_block: registration.eth_block,
        voting_power: registration.power,
        registered_at: ctx.height,
    };
    add_validator(q, validator, effects).await
}

pub(super) async fn finalize_attestation(
    q: &mut Queries<'_>,
    ctx: &BlockContext,
    signer: &Address,
    attestation: &Attestation,
    effects: &mut BlockEffects,
) -> eyre::Result<()> {
    match &attestation.body {
        AttestationBody::ValidatorRegistration(registration) => {
            let validator = Validator {
                delegate_wallet: wallet_string(signer),
                consensus_address: registration.consensus_address.clone(),
                consensus_pubkey: registration.consensus_pubkey.clone(),
                endpoint: registration.endpoint.clone(),
                node_type: registration.node_type,
                sp_id: registration.sp_id.clone(),
                eth_block: registration.eth_block,
                voting_power: registration.voting_power,
                registered_at: ctx.height,
            };
            add_validator(q, validator, effects).await
        }
        AttestationBody::ValidatorDeregistration(deregistration) => {
            remove_validator(
                q,
                ctx,
                &deregistration.consensus_address,
                &deregistration.consensus_pubkey,
                effects,
            )
            .await
        }
    }
}

async fn add_validator(
    q: &mut Queries<'_>,
    validator: Validator,
    effects: &mut BlockEffects,
) -> eyre::Result<()> {
    if q.insert_validator(&validator).await? {
        info!(
            address = %validator.consensus_address,
            wallet = %validator.delegate_wallet,
            endpoint = %validator.endpoint,
            "validator registered"
        );
        effects.register(
            &validator.consensus_address,
            ValidatorUpdate {
                pub_key: validator.consensus_pubkey.clone(),
                power: validator.voting_power,
            },
        );
    }
    Ok(())
}

/// Deletes a validator and faults the open challenges it was verifying.
pub(super) async fn remove_validator(
    q: &mut Queries<'_>,
    ctx: &BlockContext,
    consensus_address: &str,
    consensus_pubkey: &Bytes,
    effects: &mut BlockEffects,
) -> eyre::Result<()> {
    if !q.delete_validator(consensus_address).await? {
        return Ok(());
    }
    for challenge in q.open_challenges_verified_by(consensus_address).await? {
        q.fault_challenge(challenge.height).await?;
    }
    info!(address = %consensus_address, height = ctx.height, "validator deregistered");
    effects.deregister(
        consensus_address,
        ValidatorUpdate {
            pub_key: consensus_pubkey.clone(),
            power: 0,
        },
    );
    effects.publish(
        DEREGISTRATION_TOPIC.to_string(),
        Event::Deregistration {
            consensus_address: consensus_address.to_string(),
            height: ctx.height,
        },
    );
    Ok(())
}

fn ensure_signer(claimed: &str, signer: &str) -> Result<(), ValidationError> {
    if !claimed.eq_ignore_ascii_case(signer) {
        return Err(ValidationError::SignerMismatch {
            expected: claimed.to_string(),
            actual: signer.to_string(),
        });
    }
    Ok(())
}

fn ensure_address(pubkey: &[u8], claimed: &str) -> Result<(), ValidationError> {
    let derived = consensus_address(pubkey);
    if derived != claimed {
        return Err(ValidationError::AddressMismatch {
            claimed: claimed.to_string(),
            derived,
        });
    }
    Ok(())
}

fn ensure_deadline(deadline: u64, height: u64) -> Result<(), ValidationError> {
    if deadline < height || deadline > height.saturating_add(MAX_DEADLINE_WINDOW) {
        return Err(ValidationError::DeadlineOutOfRange { deadline, height });
    }
    Ok(())
}

async fn ensure_unregistered(
    q: &mut Queries<'_>,
    consensus_address: &str,
    wallet: &str,
) -> Result<(), ValidationError> {
    if q.validator_by_address(consensus_address).await?.is_some() {
        return Err(ValidationError::AlreadyRegistered(consensus_address.to_string()));
    }
    if q.validator_by_wallet(wallet).await?.is_some() {
        return Err(ValidationError::AlreadyRegistered(wallet.to_string()));
    }
    Ok(())
}

async fn ensure_registered(q: &mut Queries<'_>, consensus_address: &str) -> Result<(), ValidationError> {
    if q.validator_by_address(consensus_address).await?.is_none() {
        return Err(ValidationError::UnknownValidator(consensus_address.to_string()));
    }
    Ok(())
}
