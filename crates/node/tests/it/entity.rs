use chorus_node::{
    abci::{
        Application, CODE_FINALIZE_FAILED, CODE_OK, FinalizeBlockRequest, ProcessProposalRequest,
        ProposalStatus,
    },
    app::next_app_hash,
    events::{Event, play_topic, tx_finalized_topic},
};
use chorus_primitives::transaction::{ManageEntity, TrackPlay, TrackPlays, Transaction};
use chorus_storage::Queries;

use crate::utils::{Identity, TestChain};

fn manage(node: &Identity, entity_id: i64, action: &str) -> Transaction {
    Transaction::ManageEntity(ManageEntity {
        user_id: 1,
        entity_type: "Track".into(),
        entity_id,
        action: action.into(),
        metadata: format!(r#"{{"title":"track {entity_id}"}}"#),
        signature: String::new(),
        signer: node.wallet(),
        nonce: format!("{entity_id}-{action}"),
    })
}

#[tokio::test]
async fn entity_lifecycle_in_one_block() {
    let node = Identity::new(1);
    let mut chain = TestChain::builder(node.clone()).build().await;

    for (entity_id, action) in [(1, "Update"), (1, "Delete"), (1, "Create"), (2, "Create")] {
        chain.insert(node.sign(manage(&node, entity_id, action)));
    }
    let block = chain.produce_block().await;
    assert_eq!(block.tx_results.len(), 4);
    assert!(block.tx_results.iter().all(|result| result.code == CODE_OK));

    let order: Vec<_> = chain
        .block_transactions(block.height)
        .await
        .into_iter()
        .map(|tx| match tx.transaction {
            Transaction::ManageEntity(entity) => (entity.entity_id, entity.action),
            other => panic!("unexpected {:?}", other.kind()),
        })
        .collect();
    assert_eq!(
        order,
        [
            (1, "Create".to_string()),
            (2, "Create".to_string()),
            (1, "Update".to_string()),
            (1, "Delete".to_string()),
        ]
    );

    let mut conn = chain.reader().await;
    let mut q = Queries::new(&mut conn);
    let deleted = q.entity("Track", 1).await.unwrap().unwrap();
    assert!(deleted.deleted);
    assert_eq!(deleted.action, "Delete");
    let live = q.entity("Track", 2).await.unwrap().unwrap();
    assert!(!live.deleted);
    assert_eq!(q.tx_stat_count("manage_entity").await.unwrap(), 4);
}

#[tokio::test]
async fn plays_are_recorded_and_announced() {
    let node = Identity::new(1);
    let mut chain = TestChain::builder(node.clone()).build().await;
    let mut plays = chain.events.subscribe(&play_topic("42"));

    let tx = node.sign(Transaction::Plays(TrackPlays {
        plays: vec![TrackPlay {
            user_id: "7".into(),
            track_id: "42".into(),
            timestamp: 1_700_000_000,
            city: "Lisbon".into(),
            ..Default::default()
        }],
    }));
    let hash = chain.insert(tx);
    let mut finalized = chain.events.subscribe(&tx_finalized_topic(&hash.to_string()));
    let block = chain.produce_block().await;

    match plays.try_recv().unwrap() {
        Event::Play {
            track_id, height, ..
        } => {
            assert_eq!(track_id, "42");
            assert_eq!(height, block.height);
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert_eq!(
        finalized.try_recv().unwrap(),
        Event::TxFinalized {
            tx_hash: hash.to_string(),
            height: block.height,
            index: 0,
            code: CODE_OK,
        }
    );
    assert!(chain.mempool.is_empty());

    let mut conn = chain.reader().await;
    let stored = Queries::new(&mut conn).plays_for_track("42").await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].city, "Lisbon");
}

#[tokio::test]
async fn finalized_transactions_are_not_applied_twice() {
    let node = Identity::new(1);
    let mut chain = TestChain::builder(node.clone()).build().await;
    let tx = node.sign(manage(&node, 5, "Create"));
    chain.insert(tx.clone());
    let first = chain.produce_block().await;

    let height = chain.height() + 1;
    let time = chain.next_time();
    let app = chain.driver.app_mut();
    let replay = app
        .process_proposal(ProcessProposalRequest {
            txs: vec![tx.clone()],
            height,
            time,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(replay.status, ProposalStatus::Reject);

    let fresh = node.sign(manage(&node, 6, "Create"));
    let txs = vec![fresh.clone(), fresh];
    let response = app
        .finalize_block(FinalizeBlockRequest {
            txs: txs.clone(),
            height,
            time,
            ..Default::default()
        })
        .await
        .unwrap();
    let codes: Vec<_> = response.tx_results.iter().map(|result| result.code).collect();
    assert_eq!(codes, [CODE_OK, CODE_FINALIZE_FAILED]);
    assert_eq!(response.app_hash, next_app_hash(&first.app_hash, &txs));

    let commit = app.commit().await.unwrap();
    assert_eq!(commit.retain_height, 0);
    assert_eq!(app.height(), height);
    assert_eq!(chain.cache.current_height(), height);
}
