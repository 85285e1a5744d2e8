use alloy_primitives::Bytes;
use serde::{Deserialize, Serialize};

/// A prover's answer to the proof-of-storage challenge at `height`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageProof {
    pub height: u64,
    pub cid: String,
    /// Consensus address of the prover.
    pub address: String,
    /// ed25519 signature by the prover's consensus key over the plaintext proof.
    pub proof_signature: Bytes,
    /// Consensus addresses of every node holding `cid`, the prover included.
    pub prover_addresses: Vec<String>,
    /// Proof bytes sealed with a one-off AES-GCM secret.
    pub encrypted_proof: Bytes,
    /// The AES-GCM secret sealed to the challenge verifier.
    pub encrypted_secret: Bytes,
    /// Ephemeral X25519 public key used to seal the secret.
    pub ephemeral_public_key: Bytes,
}

/// The verifier's reveal of the plaintext proof for the challenge at `height`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageProofVerification {
    pub height: u64,
    pub proof: Bytes,
}
