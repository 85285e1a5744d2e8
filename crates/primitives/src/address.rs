//! Deterministic addresses for entities minted on chain.

use sha2::{Digest, Sha256};

/// Number of hex characters kept from the digest.
const ADDRESS_HEX_LEN: usize = 40;

/// What an entity address points at.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AddressKind {
    Ern,
    Party,
    Resource,
    Release,
    Deal,
    Mead,
    Pie,
    Reward,
}

impl AddressKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Ern => "ern",
            Self::Party => "party",
            Self::Resource => "resource",
            Self::Release => "release",
            Self::Deal => "deal",
            Self::Mead => "mead",
            Self::Pie => "pie",
            Self::Reward => "reward",
        }
    }
}

impl std::fmt::Display for AddressKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The location a transaction minted an entity at.
///
/// `addr = "0x" + hex(sha256("chain_id:height:tx_hash:kind:reference"))[..40]`
#[derive(Clone, Copy, Debug)]
pub struct AddressContext<'a> {
    pub chain_id: &'a str,
    pub height: u64,
    pub tx_hash: &'a str,
}

impl AddressContext<'_> {
    pub fn address(&self, kind: AddressKind, reference: &str) -> String {
        entity_address(self.chain_id, self.height, self.tx_hash, kind, reference)
    }
}

pub fn entity_address(
    chain_id: &str,
    height: u64,
    tx_hash: &str,
    kind: AddressKind,
    reference: &str,
) -> String {
    let preimage = format!("{chain_id}:{height}:{tx_hash}:{kind}:{reference}");
    let digest = const_hex::encode(Sha256::digest(preimage.as_bytes()));
    format!("0x{}", &digest[..ADDRESS_HEX_LEN])
}
