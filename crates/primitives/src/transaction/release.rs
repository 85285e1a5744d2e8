use alloy_primitives::Bytes;
use serde::{Deserialize, Serialize};

use super::ddex::{Release, Resource};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyReleaseHeader {
    pub message_id: String,
    /// Uncompressed secp256k1 public key of the sender.
    pub sender_public_key: Bytes,
}

/// Pre-envelope release notification.
///
/// Still decodable so that historical blocks replay, but never valid for new
/// blocks. Releases are published through [`super::Envelope`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyRelease {
    pub header: Option<LegacyReleaseHeader>,
    pub release_list: Vec<Release>,
    pub resource_list: Vec<Resource>,
}
