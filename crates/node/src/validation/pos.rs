//! Storage proofs and their verification.

use alloy_primitives::Address;
use chorus_primitives::{
    crypto::verify_ed25519,
    transaction::{StorageProof, StorageProofVerification},
    wallet_string,
};
use chorus_storage::{
    Queries,
    models::{Challenge, ChallengeOutcome, ChallengeStatus, ProofStatus, StoredProof, Validator},
};

use super::{BlockContext, Phase, ValidationError};

/// Blocks after a challenge during which provers may file proofs.
pub const SUBMISSION_DEADLINE: u64 = 2;

/// Blocks after a challenge by which the verifier must reveal.
pub const VERIFICATION_DEADLINE: u64 = 6;

const ED25519_SIGNATURE_LEN: usize = 64;

pub(super) async fn validate_proof(
    q: &mut Queries<'_>,
    ctx: &BlockContext,
    signer: &Address,
    proof: &StorageProof,
) -> Result<(), ValidationError> {
    let prover = validator_by_signer(q, signer).await?;
    if !prover.consensus_address.eq_ignore_ascii_case(&proof.address) {
        return Err(ValidationError::SignerMismatch {
            expected: proof.address.clone(),
            actual: prover.consensus_address,
        });
    }

    let challenge = open_challenge(q, proof.height).await?;
    if ctx.height.saturating_sub(challenge.height) > SUBMISSION_DEADLINE {
        return Err(ValidationError::SubmissionDeadline {
            challenge: challenge.height,
            height: ctx.height,
        });
    }

    // The signed plaintext is only revealed by the verifier. Until then the
    // signature can only be checked for shape.
    if proof.proof_signature.len() != ED25519_SIGNATURE_LEN {
        return Err(ValidationError::ProofSignature(
            chorus_primitives::CryptoError::MalformedEd25519Signature,
        ));
    }
    chorus_primitives::crypto::x25519_public_key(&prover.consensus_pubkey)
        .map_err(ValidationError::ProofSignature)?;

    // Replica membership is not re-checked at finalize, where an earlier proof
    // in the same block may have fixed the set.
    if ctx.phase == Phase::Proposal
        && let Some(provers) = &challenge.prover_addresses
        && !provers
            .iter()
            .any(|address| address.eq_ignore_ascii_case(&proof.address))
    {
        return Err(ValidationError::NotInReplicaSet(proof.address.clone()));
    }
    Ok(())
}

pub(super) async fn validate_verification(
    q: &mut Queries<'_>,
    ctx: &BlockContext,
    signer: &Address,
    verification: &StorageProofVerification,
) -> Result<Vec<(StoredProof, bool)>, ValidationError> {
    let challenge = open_challenge(q, verification.height).await?;
    let verifier = validator_by_signer(q, signer).await?;
    if verifier.consensus_address != challenge.verifier_address {
        return Err(ValidationError::NotVerifier {
            expected: challenge.verifier_address,
            actual: verifier.consensus_address,
        });
    }

    let age = ctx.height.saturating_sub(challenge.height);
    if age <= SUBMISSION_DEADLINE {
        return Err(ValidationError::VerificationTooEarly {
            challenge: challenge.height,
            height: ctx.height,
        });
    }
    if age >= VERIFICATION_DEADLINE {
        return Err(ValidationError::VerificationDeadline {
            challenge: challenge.height,
            height: ctx.height,
        });
    }

    let proofs = q.storage_proofs(challenge.height).await?;
    if proofs.is_empty() {
        return Err(ValidationError::NoProofs(challenge.height));
    }
    let mut verdicts = Vec::with_capacity(proofs.len());
    for proof in proofs {
        let matches = match q.validator_by_address(&proof.address).await? {
            Some(prover) => verify_ed25519(
                &prover.consensus_pubkey,
                &verification.proof,
                &proof.proof_signature,
            )
            .is_ok(),
            None => false,
        };
        verdicts.push((proof, matches));
    }
    if !verdicts.iter().any(|(_, matches)| *matches) {
        return Err(ValidationError::ProofMismatch);
    }
    Ok(verdicts)
}

pub(super) async fn finalize_proof(q: &mut Queries<'_>, proof: &StorageProof) -> eyre::Result<()> {
    let stored = StoredProof {
        height: proof.height,
        address: proof.address.clone(),
        cid: proof.cid.clone(),
        proof_signature: proof.proof_signature.clone(),
        prover_addresses: proof.prover_addresses.clone(),
        encrypted_proof: proof.encrypted_proof.clone(),
        encrypted_secret: proof.encrypted_secret.clone(),
        ephemeral_public_key: proof.ephemeral_public_key.clone(),
        status: ProofStatus::Pending,
    };
    if !q.insert_storage_proof(&stored).await? {
        tracing::debug!(height = proof.height, prover = %proof.address, "duplicate storage proof ignored");
        return Ok(());
    }
    q.set_challenge_provers(proof.height, &proof.prover_addresses)
        .await
}

pub(super) async fn finalize_verification(
    q: &mut Queries<'_>,
    ctx: &BlockContext,
    signer: &Address,
    verification: &StorageProofVerification,
) -> Result<(), ValidationError> {
    let verdicts = validate_verification(q, ctx, signer, verification).await?;
    let matched = verdicts.iter().filter(|(_, matches)| *matches).count();

    for (proof, matches) in &verdicts {
        let status = if *matches {
            ProofStatus::Pass
        } else {
            ProofStatus::Fail
        };
        q.set_proof_status(proof.height, &proof.address, status)
            .await?;
    }
    let outcome = if matched * 2 > verdicts.len() {
        ChallengeOutcome::Positive
    } else {
        ChallengeOutcome::Negative
    };
    q.set_challenge_status(verification.height, ChallengeStatus::Verified, Some(outcome))
        .await?;
    tracing::info!(
        height = verification.height,
        matched,
        proofs = verdicts.len(),
        %outcome,
        "pos challenge verified"
    );
    Ok(())
}

async fn validator_by_signer(q: &mut Queries<'_>, signer: &Address) -> Result<Validator, ValidationError> {
    let wallet = wallet_string(signer);
    q.validator_by_wallet(&wallet)
        .await?
        .ok_or(ValidationError::UnknownValidator(wallet))
}

async fn open_challenge(q: &mut Queries<'_>, height: u64) -> Result<Challenge, ValidationError> {
    let challenge = q
        .challenge(height)
        .await?
        .ok_or(ValidationError::UnknownChallenge(height))?;
    match challenge.status {
        ChallengeStatus::Open | ChallengeStatus::Proved => Ok(challenge),
        ChallengeStatus::Verified | ChallengeStatus::Faulted => {
            Err(ValidationError::ChallengeClosed(height))
        }
    }
}
