use chorus_node::abci::CODE_OK;
use chorus_primitives::transaction::{SlaNodeReport, Transaction, TxKind};
use chorus_storage::Queries;

use crate::utils::{Identity, TestChain, chain_with_validators};

/// Dev network rollup interval.
const INTERVAL: u64 = 16;

#[tokio::test]
async fn rollup_covers_the_first_window() {
    let node = Identity::new(1);
    let idle = Identity::new(2);
    let mut chain = chain_with_validators(&[node.clone(), idle.clone()]).await;
    chain.produce_blocks(INTERVAL - 2).await;
    assert_eq!(chain.height(), INTERVAL - 1);

    let block = chain.produce_block().await;
    assert_eq!(block.height, INTERVAL);
    assert_eq!(block.tx_results.len(), 1);
    assert_eq!(block.tx_results[0].code, CODE_OK);

    let txs = chain.block_transactions(INTERVAL).await;
    assert_eq!(txs[0].kind(), TxKind::SlaRollup);
    let Transaction::SlaRollup(rollup) = &txs[0].transaction else {
        unreachable!()
    };
    assert_eq!((rollup.block_start, rollup.block_end), (1, INTERVAL));
    assert_eq!(rollup.timestamp, block.time);
    let mut expected = vec![
        SlaNodeReport {
            address: node.address(),
            blocks_proposed: INTERVAL,
        },
        SlaNodeReport {
            address: idle.address(),
            blocks_proposed: 0,
        },
    ];
    expected.sort_by(|a, b| a.address.cmp(&b.address));
    assert_eq!(rollup.reports, expected);

    let mut conn = chain.reader().await;
    let mut q = Queries::new(&mut conn);
    let latest = q.latest_sla_rollup().await.unwrap().unwrap();
    assert_eq!((latest.block_start, latest.block_end), (1, INTERVAL));
    let reports = q.sla_reports(latest.id).await.unwrap();
    assert_eq!(reports.len(), 2);
    assert_eq!(
        reports
            .iter()
            .find(|report| report.address == node.address())
            .map(|report| report.blocks_proposed),
        Some(INTERVAL)
    );
    assert_eq!(q.tx_stat_count("sla_rollup").await.unwrap(), 1);
}

#[tokio::test]
async fn next_rollup_starts_after_the_previous() {
    let node = Identity::new(1);
    let mut chain = TestChain::builder(node.clone()).build().await;
    chain.produce_blocks(INTERVAL - 1).await;

    // Nobody is registered yet, so the first rollup reports nothing.
    let first = chain.produce_block().await;
    assert_eq!(first.tx_results.len(), 1);

    chain.insert(node.sign(node.legacy_registration(7)));
    chain.produce_blocks(INTERVAL).await;
    assert_eq!(chain.height(), 2 * INTERVAL);

    let txs = chain.block_transactions(2 * INTERVAL).await;
    let Transaction::SlaRollup(rollup) = &txs[0].transaction else {
        panic!("expected a rollup, got {:?}", txs[0].kind());
    };
    assert_eq!((rollup.block_start, rollup.block_end), (INTERVAL + 1, 2 * INTERVAL));
    assert_eq!(rollup.reports.len(), 1);
    assert_eq!(rollup.reports[0].blocks_proposed, INTERVAL);
}

#[tokio::test]
async fn registration_in_the_boundary_block_waits_for_the_next_rollup() {
    let node = Identity::new(1);
    let late = Identity::new(2);
    let mut chain = TestChain::builder(node.clone())
        .genesis([&node, &late])
        .build()
        .await;
    chain.insert(node.sign(node.legacy_registration(1)));
    chain.produce_blocks(INTERVAL - 1).await;
    assert_eq!(chain.height(), INTERVAL - 1);

    chain.insert(late.sign(late.legacy_registration(2)));
    let block = chain.produce_block().await;
    assert_eq!(block.height, INTERVAL);
    let kinds: Vec<_> = chain
        .block_transactions(INTERVAL)
        .await
        .iter()
        .map(|tx| tx.kind())
        .collect();
    assert_eq!(kinds, [TxKind::ValidatorRegistration, TxKind::SlaRollup]);
    assert!(block.tx_results.iter().all(|result| result.code == CODE_OK));

    let mut conn = chain.reader().await;
    let latest = Queries::new(&mut conn)
        .latest_sla_rollup()
        .await
        .unwrap()
        .unwrap();
    assert_eq!((latest.block_start, latest.block_end), (1, INTERVAL));
    drop(conn);

    chain.produce_blocks(INTERVAL).await;
    let txs = chain.block_transactions(2 * INTERVAL).await;
    let Transaction::SlaRollup(rollup) = &txs[0].transaction else {
        panic!("expected a rollup, got {:?}", txs[0].kind());
    };
    assert_eq!((rollup.block_start, rollup.block_end), (INTERVAL + 1, 2 * INTERVAL));
    let mut reported: Vec<_> = rollup
        .reports
        .iter()
        .map(|report| (report.address.clone(), report.blocks_proposed))
        .collect();
    reported.sort();
    let mut expected = vec![(node.address(), INTERVAL), (late.address(), 0)];
    expected.sort();
    assert_eq!(reported, expected);
}
