//! Sealing storage proofs so only the challenge verifier can read them.
//!
//! The proof is encrypted with AES-128-GCM under a fresh 16 byte secret. The
//! secret is then sealed to the verifier: an ephemeral X25519 key agrees on a
//! shared secret with the verifier's consensus key (converted to Montgomery
//! form), `sha256` of it keys ChaCha20-Poly1305. Both ciphers use the first 12
//! bytes of the challenge block hash as nonce, the key material is never reused.

use aes_gcm::{
    Aes128Gcm,
    aead::{Aead, KeyInit},
};
use alloy_primitives::{B256, Bytes};
use chacha20poly1305::ChaCha20Poly1305;
use chorus_primitives::{ConsensusKey, crypto::x25519_public_key};
use sha2::{Digest, Sha256};
use x25519_dalek::{PublicKey, StaticSecret};

use super::PosError;

/// Length of the AES-128 proof secret.
pub const SECRET_LEN: usize = 16;

const NONCE_LEN: usize = 12;

/// The three sealed fields a [`StorageProof`](chorus_primitives::transaction::StorageProof) carries.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SealedProof {
    pub encrypted_proof: Bytes,
    pub encrypted_secret: Bytes,
    pub ephemeral_public_key: Bytes,
}

/// Seals `proof` for the verifier whose ed25519 public key is `verifier`.
pub fn seal(proof: &[u8], block_hash: &B256, verifier: &[u8]) -> Result<SealedProof, PosError> {
    let secret: [u8; SECRET_LEN] = rand::random();
    let encrypted_proof = Aes128Gcm::new_from_slice(&secret)
        .map_err(|_| PosError::Cipher("proof key"))?
        .encrypt(nonce(block_hash), proof)
        .map_err(|_| PosError::Cipher("encrypt proof"))?;

    let verifier = PublicKey::from(x25519_public_key(verifier)?);
    let ephemeral = StaticSecret::random_from_rng(rand::rngs::OsRng);
    let ephemeral_public_key = PublicKey::from(&ephemeral);
    let encrypted_secret = secret_cipher(&ephemeral, &verifier)?
        .encrypt(nonce(block_hash), secret.as_slice())
        .map_err(|_| PosError::Cipher("seal secret"))?;

    Ok(SealedProof {
        encrypted_proof: encrypted_proof.into(),
        encrypted_secret: encrypted_secret.into(),
        ephemeral_public_key: Bytes::copy_from_slice(ephemeral_public_key.as_bytes()),
    })
}

/// Opens a proof sealed to `key`.
pub fn open(sealed: &SealedProof, block_hash: &B256, key: &ConsensusKey) -> Result<Vec<u8>, PosError> {
    let ephemeral: [u8; 32] = sealed
        .ephemeral_public_key
        .as_ref()
        .try_into()
        .map_err(|_| PosError::Cipher("ephemeral key length"))?;
    let own = StaticSecret::from(key.x25519_secret());
    let secret = secret_cipher(&own, &PublicKey::from(ephemeral))?
        .decrypt(nonce(block_hash), sealed.encrypted_secret.as_ref())
        .map_err(|_| PosError::Cipher("open secret"))?;

    Aes128Gcm::new_from_slice(&secret)
        .map_err(|_| PosError::Cipher("proof key"))?
        .decrypt(nonce(block_hash), sealed.encrypted_proof.as_ref())
        .map_err(|_| PosError::Cipher("decrypt proof"))
}

fn secret_cipher(own: &StaticSecret, other: &PublicKey) -> Result<ChaCha20Poly1305, PosError> {
    let shared = own.diffie_hellman(other);
    let key = Sha256::digest(shared.as_bytes());
    ChaCha20Poly1305::new_from_slice(&key).map_err(|_| PosError::Cipher("secret key"))
}

fn nonce(block_hash: &B256) -> &aes_gcm::Nonce<aes_gcm::aead::consts::U12> {
    aes_gcm::Nonce::from_slice(&block_hash[..NONCE_LEN])
}
