//! Delegate (secp256k1) and consensus (ed25519) keys.

use alloy_primitives::{Address, Bytes, Signature, SignatureError, keccak256};
use alloy_signer::SignerSync;
use alloy_signer_local::PrivateKeySigner;
use ed25519_dalek::{Signer as _, SigningKey, Verifier as _, VerifyingKey};
use sha2::{Digest, Sha256};

/// Length of a recoverable secp256k1 signature (`r ‖ s ‖ v`).
pub const SIGNATURE_LEN: usize = 65;

/// Length of a consensus address in bytes, before hex encoding.
pub const CONSENSUS_ADDRESS_LEN: usize = 20;

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("invalid secp256k1 signature")]
    InvalidSignature(#[source] SignatureError),

    #[error("failed signing message")]
    Signer(#[from] alloy_signer::Error),

    #[error("invalid private key: {0}")]
    InvalidPrivateKey(String),

    #[error("invalid ed25519 public key")]
    InvalidPublicKey,

    #[error("malformed ed25519 signature")]
    MalformedEd25519Signature,

    #[error("ed25519 signature does not match message")]
    Ed25519Mismatch,
}

/// The delegate wallet key a node signs transactions and attestations with.
#[derive(Clone, Debug)]
pub struct DelegateKey {
    signer: PrivateKeySigner,
}

impl DelegateKey {
    /// Parses a hex encoded secp256k1 private key, with or without `0x`.
    pub fn from_hex(key: &str) -> Result<Self, CryptoError> {
        let signer = key
            .trim()
            .parse::<PrivateKeySigner>()
            .map_err(|e| CryptoError::InvalidPrivateKey(e.to_string()))?;
        Ok(Self { signer })
    }

    pub fn random() -> Self {
        Self {
            signer: PrivateKeySigner::random(),
        }
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }

    /// Signs `keccak256(message)` and returns the 65 byte recoverable signature.
    pub fn sign(&self, message: &[u8]) -> Result<Bytes, CryptoError> {
        let signature = self.signer.sign_hash_sync(&keccak256(message))?;
        Ok(Bytes::copy_from_slice(&signature.as_bytes()))
    }
}

/// Recovers the wallet that produced `signature` over `message`.
pub fn recover_wallet(signature: &[u8], message: &[u8]) -> Result<Address, CryptoError> {
    let signature = Signature::from_raw(signature).map_err(CryptoError::InvalidSignature)?;
    signature
        .recover_address_from_prehash(&keccak256(message))
        .map_err(CryptoError::InvalidSignature)
}

/// The ed25519 key the consensus engine votes with.
///
/// The application uses it to sign storage proofs and to open secrets sealed
/// to this validator during proof-of-storage challenges.
#[derive(Clone)]
pub struct ConsensusKey {
    signing: SigningKey,
}

impl ConsensusKey {
    /// Parses a hex encoded 32 byte ed25519 seed.
    pub fn from_hex(seed: &str) -> Result<Self, CryptoError> {
        let bytes = const_hex::decode(seed.trim())
            .map_err(|e| CryptoError::InvalidPrivateKey(e.to_string()))?;
        let seed: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
            CryptoError::InvalidPrivateKey(format!("expected 32 bytes, got {}", bytes.len()))
        })?;
        Ok(Self::from_seed(seed))
    }

    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self {
            signing: SigningKey::from_bytes(&seed),
        }
    }

    pub fn random() -> Self {
        Self {
            signing: SigningKey::generate(&mut rand::rngs::OsRng),
        }
    }

    pub fn public_key(&self) -> [u8; 32] {
        self.signing.verifying_key().to_bytes()
    }

    pub fn address(&self) -> String {
        consensus_address(&self.public_key())
    }

    pub fn sign(&self, message: &[u8]) -> Bytes {
        Bytes::copy_from_slice(&self.signing.sign(message).to_bytes())
    }

    /// The clamped scalar usable as an X25519 static secret.
    pub fn x25519_secret(&self) -> [u8; 32] {
        self.signing.to_scalar_bytes()
    }
}

impl std::fmt::Debug for ConsensusKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsensusKey")
            .field("address", &self.address())
            .finish_non_exhaustive()
    }
}

/// Converts an ed25519 public key to its X25519 (Montgomery) form.
pub fn x25519_public_key(ed25519_public_key: &[u8]) -> Result<[u8; 32], CryptoError> {
    Ok(verifying_key(ed25519_public_key)?.to_montgomery().to_bytes())
}

/// Verifies an ed25519 signature produced by [`ConsensusKey::sign`].
pub fn verify_ed25519(public_key: &[u8], message: &[u8], signature: &[u8]) -> Result<(), CryptoError> {
    let key = verifying_key(public_key)?;
    let signature = ed25519_dalek::Signature::from_slice(signature)
        .map_err(|_| CryptoError::MalformedEd25519Signature)?;
    key.verify(message, &signature)
        .map_err(|_| CryptoError::Ed25519Mismatch)
}

fn verifying_key(public_key: &[u8]) -> Result<VerifyingKey, CryptoError> {
    let bytes: [u8; 32] = public_key
        .try_into()
        .map_err(|_| CryptoError::InvalidPublicKey)?;
    VerifyingKey::from_bytes(&bytes).map_err(|_| CryptoError::InvalidPublicKey)
}

/// Consensus address of an ed25519 public key: upper case hex of the first
/// 20 bytes of its SHA-256 digest.
pub fn consensus_address(public_key: &[u8]) -> String {
    let digest = Sha256::digest(public_key);
    const_hex::encode_upper(&digest[..CONSENSUS_ADDRESS_LEN])
}

/// Canonical string form of a wallet, as persisted and used for rendezvous.
pub fn wallet_string(wallet: &Address) -> String {
    wallet.to_checksum(None)
}
