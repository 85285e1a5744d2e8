//! DDEX release, enrichment and party identification messages.

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageControlType {
    NewMessage,
    UpdatedMessage,
    TakedownMessage,
}

impl MessageControlType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::NewMessage => "new",
            Self::UpdatedMessage => "updated",
            Self::TakedownMessage => "takedown",
        }
    }
}

impl std::str::FromStr for MessageControlType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(Self::NewMessage),
            "updated" => Ok(Self::UpdatedMessage),
            "takedown" => Ok(Self::TakedownMessage),
            other => Err(format!("unknown control type `{other}`")),
        }
    }
}

/// Header shared by every DDEX message.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageHeader {
    pub message_id: String,
    /// Sender of the message.
    pub from: String,
    /// Address the message targets. Empty for new messages.
    pub to: String,
    pub nonce: u64,
    pub control_type: Option<MessageControlType>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Party {
    /// Empty when the party is introduced by this message.
    pub address: String,
    pub party_reference: String,
    pub name: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceKind {
    SoundRecording,
    Image,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub address: String,
    pub resource_reference: String,
    pub kind: ResourceKind,
    pub title: String,
    /// Content identifier of the stored media.
    pub cid: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
    pub address: String,
    pub release_reference: String,
    pub title: String,
    pub resource_references: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deal {
    pub address: String,
    pub release_reference: String,
    pub territory: String,
    pub use_type: String,
}

/// Electronic release notification (ERN).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewReleaseMessage {
    pub address: String,
    pub header: MessageHeader,
    pub party_list: Vec<Party>,
    pub resource_list: Vec<Resource>,
    pub release_list: Vec<Release>,
    pub deal_list: Vec<Deal>,
}

/// Media enrichment and description (MEAD).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaEnrichmentDescription {
    pub address: String,
    pub header: MessageHeader,
    pub resource_addresses: Vec<String>,
    pub release_addresses: Vec<String>,
    pub description: String,
}

/// Party identification and enrichment (PIE).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartyIdentificationEnvelope {
    pub address: String,
    pub header: MessageHeader,
    pub party_addresses: Vec<String>,
    pub identifiers: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnvelopeMessage {
    Ern(NewReleaseMessage),
    Mead(MediaEnrichmentDescription),
    Pie(PartyIdentificationEnvelope),
}

impl EnvelopeMessage {
    pub fn address(&self) -> &str {
        match self {
            Self::Ern(ern) => &ern.address,
            Self::Mead(mead) => &mead.address,
            Self::Pie(pie) => &pie.address,
        }
    }

    pub fn header(&self) -> &MessageHeader {
        match self {
            Self::Ern(ern) => &ern.header,
            Self::Mead(mead) => &mead.header,
            Self::Pie(pie) => &pie.header,
        }
    }

    /// Short lower case name, used in logs and errors.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Ern(_) => "ern",
            Self::Mead(_) => "mead",
            Self::Pie(_) => "pie",
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeHeader {
    /// Must equal the chain id of the network the envelope is submitted to.
    pub chain_id: String,
    pub from: String,
    pub to: String,
    pub nonce: u64,
}

/// A batch of DDEX messages submitted together.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub header: EnvelopeHeader,
    pub messages: Vec<EnvelopeMessage>,
}
