//! Signed transactions and their canonical encoding.
//!
//! A transaction travels as the bincode encoding of [`SignedTransaction`]. The
//! delegate signature covers the same encoding with the signature left out, and
//! the transaction hash is the SHA-256 digest of the full encoding. Decoding
//! rejects trailing bytes so that every accepted byte string re-encodes to
//! itself.

use alloy_primitives::{Address, B256, Bytes};
use bincode::Options as _;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::crypto::{CryptoError, DelegateKey, recover_wallet};

mod ddex;
mod entity;
mod release;
mod reward;
mod sla;
mod storage;
mod validator;

pub use ddex::{
    Deal, Envelope, EnvelopeHeader, EnvelopeMessage, MediaEnrichmentDescription,
    MessageControlType, MessageHeader, NewReleaseMessage, Party, PartyIdentificationEnvelope,
    Release, Resource, ResourceKind,
};
pub use entity::{EntityAction, ManageEntity, TrackPlay, TrackPlays};
pub use release::{LegacyRelease, LegacyReleaseHeader};
pub use reward::{ClaimAuthority, CreateReward, DeleteReward, RewardMessage, UpdateReward};
pub use sla::{SlaNodeReport, SlaRollup};
pub use storage::{StorageProof, StorageProofVerification};
pub use validator::{
    Attestation, AttestationBody, NodeType, ValidatorDeregistration,
    ValidatorMisbehaviorDeregistration, ValidatorRegistration, ValidatorRegistrationLegacy,
};

/// Upper bound on a decoded transaction, matching the mempool's size cap.
pub const MAX_ENCODED_LEN: u64 = 300 * 1024;

/// SHA-256 of the canonical transaction bytes.
pub type TxHash = B256;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("failed encoding transaction")]
    Encode(#[source] bincode::Error),
    #[error("failed decoding transaction")]
    Decode(#[source] bincode::Error),
}

fn codec() -> impl bincode::Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_little_endian()
        .reject_trailing_bytes()
        .with_limit(MAX_ENCODED_LEN)
}

/// Encodes any wire type with the canonical options.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, CodecError> {
    codec().serialize(value).map_err(CodecError::Encode)
}

/// Decodes any wire type with the canonical options.
pub fn decode<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T, CodecError> {
    codec().deserialize(bytes).map_err(CodecError::Decode)
}

/// Hash of raw transaction bytes as they appear in the mempool and in blocks.
pub fn tx_hash(bytes: &[u8]) -> TxHash {
    B256::from_slice(&Sha256::digest(bytes))
}

/// A transaction with the envelope every variant shares.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTransaction {
    /// Client supplied identifier, used to make otherwise equal payloads distinct.
    pub request_id: String,
    /// Last block height at which the transaction may be included.
    pub expiration: Option<u64>,
    /// 65 byte secp256k1 signature by the submitter's delegate key.
    pub signature: Bytes,
    pub transaction: Transaction,
}

#[derive(Serialize)]
struct SigningPayload<'a> {
    request_id: &'a str,
    expiration: Option<u64>,
    transaction: &'a Transaction,
}

impl SignedTransaction {
    /// Creates an unsigned transaction.
    pub fn new(request_id: impl Into<String>, transaction: Transaction) -> Self {
        Self {
            request_id: request_id.into(),
            expiration: None,
            signature: Bytes::new(),
            transaction,
        }
    }

    pub fn with_expiration(mut self, expiration: u64) -> Self {
        self.expiration = Some(expiration);
        self
    }

    /// The bytes the delegate signature covers.
    pub fn signing_bytes(&self) -> Result<Vec<u8>, CodecError> {
        encode(&SigningPayload {
            request_id: &self.request_id,
            expiration: self.expiration,
            transaction: &self.transaction,
        })
    }

    pub fn sign(mut self, key: &DelegateKey) -> Result<Self, SignError> {
        let message = self.signing_bytes()?;
        self.signature = key.sign(&message)?;
        Ok(self)
    }

    /// Recovers the delegate wallet that signed this transaction.
    pub fn recover_signer(&self) -> Result<Address, SignError> {
        let message = self.signing_bytes()?;
        Ok(recover_wallet(&self.signature, &message)?)
    }

    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        encode(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        decode(bytes)
    }

    pub fn hash(&self) -> Result<TxHash, CodecError> {
        Ok(tx_hash(&self.encode()?))
    }

    pub fn kind(&self) -> TxKind {
        self.transaction.kind()
    }

    /// Whether the transaction may still be included at `height`.
    ///
    /// A transaction expiring at `height` is still includable.
    pub fn is_live_at(&self, height: u64) -> bool {
        self.expiration.is_none_or(|expiration| expiration >= height)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SignError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// Every transaction payload the network understands.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Transaction {
    Plays(TrackPlays),
    ManageEntity(ManageEntity),
    ValidatorRegistration(ValidatorRegistrationLegacy),
    ValidatorDeregistration(ValidatorMisbehaviorDeregistration),
    Attestation(Attestation),
    SlaRollup(SlaRollup),
    StorageProof(StorageProof),
    StorageProofVerification(StorageProofVerification),
    Release(LegacyRelease),
    Envelope(Envelope),
    Reward(RewardMessage),
}

impl Transaction {
    pub fn kind(&self) -> TxKind {
        match self {
            Self::Plays(_) => TxKind::Plays,
            Self::ManageEntity(_) => TxKind::ManageEntity,
            Self::ValidatorRegistration(_) => TxKind::ValidatorRegistration,
            Self::ValidatorDeregistration(_) => TxKind::ValidatorDeregistration,
            Self::Attestation(attestation) => match attestation.body {
                AttestationBody::ValidatorRegistration(_) => TxKind::AttestationRegistration,
                AttestationBody::ValidatorDeregistration(_) => TxKind::AttestationDeregistration,
            },
            Self::SlaRollup(_) => TxKind::SlaRollup,
            Self::StorageProof(_) => TxKind::StorageProof,
            Self::StorageProofVerification(_) => TxKind::StorageProofVerification,
            Self::Release(_) => TxKind::Release,
            Self::Envelope(_) => TxKind::Envelope,
            Self::Reward(RewardMessage::Create(_)) => TxKind::RewardCreate,
            Self::Reward(RewardMessage::Update(_)) => TxKind::RewardUpdate,
            Self::Reward(RewardMessage::Delete(_)) => TxKind::RewardDelete,
        }
    }
}

/// Flat classification of a transaction, used for ordering and statistics.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TxKind {
    Plays,
    ManageEntity,
    ValidatorRegistration,
    ValidatorDeregistration,
    AttestationRegistration,
    AttestationDeregistration,
    SlaRollup,
    StorageProof,
    StorageProofVerification,
    Release,
    Envelope,
    RewardCreate,
    RewardUpdate,
    RewardDelete,
}

impl TxKind {
    /// Stable name recorded in transaction statistics.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Plays => "plays",
            Self::ManageEntity => "manage_entity",
            Self::ValidatorRegistration => "validator_registration",
            Self::ValidatorDeregistration => "validator_deregistration",
            Self::AttestationRegistration => "attestation_registration",
            Self::AttestationDeregistration => "attestation_deregistration",
            Self::SlaRollup => "sla_rollup",
            Self::StorageProof => "storage_proof",
            Self::StorageProofVerification => "storage_proof_verification",
            Self::Release => "release",
            Self::Envelope => "envelope",
            Self::RewardCreate => "reward_create",
            Self::RewardUpdate => "reward_update",
            Self::RewardDelete => "reward_delete",
        }
    }
}

impl std::fmt::Display for TxKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
