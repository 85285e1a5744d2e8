//! DDEX envelopes: ERN, MEAD and PIE messages with content addresses.

use alloy_primitives::Bytes;
use chorus_primitives::{
    AddressContext, AddressKind,
    transaction::{
        self, Envelope, EnvelopeMessage, MessageControlType, MessageHeader, NewReleaseMessage,
    },
};
use chorus_storage::{
    Queries,
    models::{DdexRecord, ErnRecord, MeadRecord, PieRecord},
};
use eyre::WrapErr;
use serde::{Deserialize, Serialize};

use super::{TxValidator, ValidationError};

/// Returned to the sender of a message: where everything it introduced lives.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Acknowledgment {
    pub message_index: u32,
    pub address: String,
    pub nonce: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub party_addresses: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resource_addresses: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub release_addresses: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deal_addresses: Vec<String>,
}

impl TxValidator {
    pub(super) async fn validate_envelope(
        &self,
        q: &mut Queries<'_>,
        envelope: &Envelope,
    ) -> Result<(), ValidationError> {
        if envelope.header.chain_id != self.chain_id() {
            return Err(ValidationError::ChainId {
                expected: self.chain_id().to_string(),
                actual: envelope.header.chain_id.clone(),
            });
        }
        if envelope.messages.is_empty() {
            return Err(ValidationError::EmptyEnvelope);
        }
        for (index, message) in envelope.messages.iter().enumerate() {
            validate_message(q, index, message).await?;
        }
        Ok(())
    }
}

async fn validate_message(
    q: &mut Queries<'_>,
    index: usize,
    message: &EnvelopeMessage,
) -> Result<(), ValidationError> {
    let invalid = |reason: &'static str| ValidationError::InvalidMessage {
        message: message.name(),
        index,
        reason,
    };
    let header = message.header();
    let address = message.address();

    match header.control_type.ok_or_else(|| invalid("missing control type"))? {
        MessageControlType::NewMessage => {
            if !address.is_empty() {
                return Err(invalid("new message must not carry an address"));
            }
            check_new_header(header).map_err(invalid)?;
            if let EnvelopeMessage::Ern(ern) = message
                && sub_addresses(ern).any(|sub| !sub.is_empty())
            {
                return Err(invalid("new message must not carry sub-entity addresses"));
            }
        }
        MessageControlType::UpdatedMessage => {
            if address.is_empty() {
                return Err(invalid("update must carry an address"));
            }
            if header.to != address {
                return Err(invalid("update must be addressed to its own address"));
            }
            let stored = latest(q, message)
                .await?
                .ok_or_else(|| ValidationError::UnknownAddress(address.to_string()))?;
            if header.nonce != stored.record.nonce + 1 {
                return Err(ValidationError::Nonce {
                    expected: stored.record.nonce + 1,
                    actual: header.nonce,
                });
            }
            if let EnvelopeMessage::Ern(ern) = message {
                check_known_sub_entities(ern, &stored)?;
            }
        }
        MessageControlType::TakedownMessage => {
            if address.is_empty() || latest(q, message).await?.is_none() {
                return Err(ValidationError::UnknownAddress(address.to_string()));
            }
        }
    }
    Ok(())
}

fn check_new_header(header: &MessageHeader) -> Result<(), &'static str> {
    if header.from.is_empty() {
        return Err("new message must name its sender");
    }
    if !header.to.is_empty() {
        return Err("new message must not be addressed");
    }
    if header.nonce != 1 {
        return Err("new message must start at nonce 1");
    }
    Ok(())
}

fn check_known_sub_entities(ern: &NewReleaseMessage, stored: &Stored) -> Result<(), ValidationError> {
    let known = [
        (
            ern.party_list.iter().map(|p| &p.address).collect::<Vec<_>>(),
            &stored.party_addresses,
        ),
        (
            ern.resource_list.iter().map(|r| &r.address).collect(),
            &stored.resource_addresses,
        ),
        (
            ern.release_list.iter().map(|r| &r.address).collect(),
            &stored.release_addresses,
        ),
        (
            ern.deal_list.iter().map(|d| &d.address).collect(),
            &stored.deal_addresses,
        ),
    ];
    for (addresses, stored) in known {
        if let Some(unknown) = addresses
            .into_iter()
            .find(|address| !address.is_empty() && !stored.contains(*address))
        {
            return Err(ValidationError::UnknownSubEntity(unknown.clone()));
        }
    }
    Ok(())
}

fn sub_addresses(ern: &NewReleaseMessage) -> impl Iterator<Item = &String> {
    ern.party_list
        .iter()
        .map(|p| &p.address)
        .chain(ern.resource_list.iter().map(|r| &r.address))
        .chain(ern.release_list.iter().map(|r| &r.address))
        .chain(ern.deal_list.iter().map(|d| &d.address))
}

/// The latest stored version of whatever `message` addresses, flattened to
/// the lists an update is checked against.
struct Stored {
    record: DdexRecord,
    party_addresses: Vec<String>,
    resource_addresses: Vec<String>,
    release_addresses: Vec<String>,
    deal_addresses: Vec<String>,
}

async fn latest(q: &mut Queries<'_>, message: &EnvelopeMessage) -> eyre::Result<Option<Stored>> {
    let address = message.address();
    Ok(match message {
        EnvelopeMessage::Ern(_) => q.latest_ern(address).await?.map(|ern| Stored {
            record: ern.record,
            party_addresses: ern.party_addresses,
            resource_addresses: ern.resource_addresses,
            release_addresses: ern.release_addresses,
            deal_addresses: ern.deal_addresses,
        }),
        EnvelopeMessage::Mead(_) => q.latest_mead(address).await?.map(|mead| Stored {
            record: mead.record,
            party_addresses: Vec::new(),
            resource_addresses: mead.resource_addresses,
            release_addresses: mead.release_addresses,
            deal_addresses: Vec::new(),
        }),
        EnvelopeMessage::Pie(_) => q.latest_pie(address).await?.map(|pie| Stored {
            record: pie.record,
            party_addresses: pie.party_addresses,
            resource_addresses: Vec::new(),
            release_addresses: Vec::new(),
            deal_addresses: Vec::new(),
        }),
    })
}

pub(super) async fn finalize(
    q: &mut Queries<'_>,
    addresses: &AddressContext<'_>,
    envelope: &Envelope,
) -> eyre::Result<()> {
    for (index, message) in envelope.messages.iter().enumerate() {
        let header = message.header();
        let control_type = header
            .control_type
            .ok_or_else(|| eyre::eyre!("{} message {index} has no control type", message.name()))?;
        if control_type == MessageControlType::TakedownMessage {
            tracing::info!(address = message.address(), kind = message.name(), "ddex takedown");
            continue;
        }

        let (message, ack) = mint(addresses, index, message.clone());
        let record = DdexRecord {
            address: ack.address.clone(),
            nonce: header.nonce,
            tx_hash: addresses.tx_hash.to_string(),
            message_index: ack.message_index,
            sender: header.from.clone(),
            control_type,
            raw_message: Bytes::from(
                transaction::encode(&message).wrap_err("encode ddex message")?,
            ),
            raw_acknowledgment: Bytes::from(
                serde_json::to_vec(&ack).wrap_err("encode acknowledgment")?,
            ),
            block_height: addresses.height,
        };
        match message {
            EnvelopeMessage::Ern(_) => {
                q.insert_ern(&ErnRecord {
                    record,
                    party_addresses: ack.party_addresses,
                    resource_addresses: ack.resource_addresses,
                    release_addresses: ack.release_addresses,
                    deal_addresses: ack.deal_addresses,
                })
                .await?
            }
            EnvelopeMessage::Mead(mead) => {
                q.insert_mead(&MeadRecord {
                    record,
                    resource_addresses: mead.resource_addresses,
                    release_addresses: mead.release_addresses,
                })
                .await?
            }
            EnvelopeMessage::Pie(pie) => {
                q.insert_pie(&PieRecord {
                    record,
                    party_addresses: pie.party_addresses,
                })
                .await?
            }
        }
    }
    Ok(())
}

/// Fills in every address the message leaves empty.
fn mint(
    addresses: &AddressContext<'_>,
    index: usize,
    mut message: EnvelopeMessage,
) -> (EnvelopeMessage, Acknowledgment) {
    let mint_into = |slot: &mut String, kind: AddressKind, reference: &str| {
        if slot.is_empty() {
            *slot = addresses.address(kind, reference);
        }
    };
    let index_ref = index.to_string();
    let mut ack = Acknowledgment {
        message_index: index as u32,
        nonce: message.header().nonce,
        ..Default::default()
    };

    match &mut message {
        EnvelopeMessage::Ern(ern) => {
            mint_into(&mut ern.address, AddressKind::Ern, &index_ref);
            for (position, party) in ern.party_list.iter_mut().enumerate() {
                mint_into(&mut party.address, AddressKind::Party, &format!("{index}.{position}"));
                ack.party_addresses.push(party.address.clone());
            }
            for (position, resource) in ern.resource_list.iter_mut().enumerate() {
                mint_into(
                    &mut resource.address,
                    AddressKind::Resource,
                    &format!("{index}.{position}"),
                );
                ack.resource_addresses.push(resource.address.clone());
            }
            for (position, release) in ern.release_list.iter_mut().enumerate() {
                mint_into(
                    &mut release.address,
                    AddressKind::Release,
                    &format!("{index}.{position}"),
                );
                ack.release_addresses.push(release.address.clone());
            }
            for (position, deal) in ern.deal_list.iter_mut().enumerate() {
                mint_into(&mut deal.address, AddressKind::Deal, &format!("{index}.{position}"));
                ack.deal_addresses.push(deal.address.clone());
            }
            ack.address = ern.address.clone();
        }
        EnvelopeMessage::Mead(mead) => {
            mint_into(&mut mead.address, AddressKind::Mead, &index_ref);
            ack.address = mead.address.clone();
        }
        EnvelopeMessage::Pie(pie) => {
            mint_into(&mut pie.address, AddressKind::Pie, &index_ref);
            ack.address = pie.address.clone();
        }
    }
    (message, ack)
}
