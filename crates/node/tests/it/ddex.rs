use alloy_primitives::Bytes;
use chorus_node::{abci::CODE_OK, validation::ValidationError};
use chorus_primitives::{
    AddressKind, entity_address,
    transaction::{
        Envelope, EnvelopeHeader, EnvelopeMessage, MessageControlType, MessageHeader,
        NewReleaseMessage, Party, Transaction,
    },
};
use chorus_storage::{Queries, models::ErnRecord};

use crate::utils::{CHAIN_ID, Identity, TestChain};

fn header(control_type: MessageControlType, to: &str, nonce: u64) -> MessageHeader {
    MessageHeader {
        message_id: format!("msg-{nonce}"),
        from: "label".into(),
        to: to.to_string(),
        nonce,
        control_type: Some(control_type),
    }
}

fn envelope(node: &Identity, ern: NewReleaseMessage) -> Bytes {
    node.sign(Transaction::Envelope(Envelope {
        header: EnvelopeHeader {
            chain_id: CHAIN_ID.to_string(),
            from: "label".into(),
            to: String::new(),
            nonce: 1,
        },
        messages: vec![EnvelopeMessage::Ern(ern)],
    }))
}

fn update(address: &str, to: &str, nonce: u64, parties: &[&str]) -> NewReleaseMessage {
    NewReleaseMessage {
        address: address.to_string(),
        header: header(MessageControlType::UpdatedMessage, to, nonce),
        party_list: parties
            .iter()
            .map(|address| Party {
                address: address.to_string(),
                name: "Artist".into(),
                ..Default::default()
            })
            .collect(),
        ..Default::default()
    }
}

fn takedown(address: &str) -> NewReleaseMessage {
    NewReleaseMessage {
        address: address.to_string(),
        header: header(MessageControlType::TakedownMessage, address, 2),
        ..Default::default()
    }
}

async fn stored_ern(chain: &TestChain, address: &str) -> ErnRecord {
    let mut conn = chain.reader().await;
    Queries::new(&mut conn)
        .latest_ern(address)
        .await
        .unwrap()
        .unwrap()
}

/// Finalizes a new release with one party and returns its address.
async fn release(chain: &mut TestChain, node: &Identity) -> String {
    let hash = chain.insert(envelope(
        node,
        NewReleaseMessage {
            header: header(MessageControlType::NewMessage, "", 1),
            party_list: vec![Party {
                name: "Artist".into(),
                ..Default::default()
            }],
            ..Default::default()
        },
    ));
    let block = chain.produce_block().await;
    assert_eq!(block.tx_results.len(), 1);
    assert_eq!(block.tx_results[0].code, CODE_OK);
    entity_address(CHAIN_ID, block.height, &hash.to_string(), AddressKind::Ern, "0")
}

#[tokio::test]
async fn update_must_follow_the_stored_release() {
    let node = Identity::new(1);
    let mut chain = TestChain::builder(node.clone()).build().await;
    let address = release(&mut chain, &node).await;
    let stored = stored_ern(&chain, &address).await;
    assert_eq!(stored.record.nonce, 1);
    let party = stored.party_addresses[0].clone();

    chain
        .validate(&envelope(&node, update(&address, &address, 2, &[&party, ""])))
        .await
        .unwrap();

    let err = chain
        .validate(&envelope(&node, update(&address, "0xelsewhere", 2, &[&party])))
        .await
        .unwrap_err();
    assert!(matches!(err, ValidationError::InvalidMessage { index: 0, .. }), "{err}");

    let err = chain
        .validate(&envelope(&node, update(&address, &address, 3, &[&party])))
        .await
        .unwrap_err();
    assert!(
        matches!(err, ValidationError::Nonce { expected: 2, actual: 3 }),
        "{err}"
    );

    let err = chain
        .validate(&envelope(&node, update(&address, &address, 2, &["0xnotaparty"])))
        .await
        .unwrap_err();
    assert!(matches!(err, ValidationError::UnknownSubEntity(ref unknown) if unknown == "0xnotaparty"));

    let err = chain
        .validate(&envelope(&node, update("0xmissing", "0xmissing", 2, &[])))
        .await
        .unwrap_err();
    assert!(matches!(err, ValidationError::UnknownAddress(_)), "{err}");

    chain.insert(envelope(&node, update(&address, &address, 2, &[&party, ""])));
    let block = chain.produce_block().await;
    assert_eq!(block.tx_results[0].code, CODE_OK);
    let updated = stored_ern(&chain, &address).await;
    assert_eq!(updated.record.nonce, 2);
    assert_eq!(updated.party_addresses.len(), 2);
    assert_eq!(updated.party_addresses[0], party);
}

#[tokio::test]
async fn takedown_needs_a_stored_release() {
    let node = Identity::new(1);
    let mut chain = TestChain::builder(node.clone()).build().await;
    let address = release(&mut chain, &node).await;

    chain
        .validate(&envelope(&node, takedown(&address)))
        .await
        .unwrap();
    for missing in ["", "0xmissing"] {
        let err = chain
            .validate(&envelope(&node, takedown(missing)))
            .await
            .unwrap_err();
        assert!(matches!(err, ValidationError::UnknownAddress(_)), "{err}");
    }
}
