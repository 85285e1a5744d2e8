use std::{net::SocketAddr, path::Path, sync::Arc, time::Duration};

use chorus_config::Config;
use chorus_node::{
    NodeBuilder, NodeHandle,
    registry::{
        HttpRegistry, MemoryRegistry, RegistryApiServer, RegistryClient, ServiceProvider,
    },
    rpc::{CoreApiClient, FAILED_PRECONDITION},
};
use chorus_primitives::{
    crypto::recover_wallet,
    transaction::{AttestationBody, ManageEntity, NodeType, ValidatorRegistration},
    Transaction,
};
use jsonrpsee::{
    core::{ClientError, RpcResult},
    http_client::{HttpClient, HttpClientBuilder},
    server::{ServerBuilder, ServerConfigBuilder},
};

use crate::utils::{CHAIN_ID, Identity, POWER};

fn provider(identity: &Identity, eth_block: u64) -> ServiceProvider {
    ServiceProvider {
        endpoint: identity.endpoint(),
        delegate_wallet: identity.wallet(),
        node_type: NodeType::Content,
        sp_id: eth_block.to_string(),
        eth_block,
    }
}

async fn launch(node: &Identity, dir: &Path, registry: Arc<MemoryRegistry>) -> NodeHandle {
    let config = Config {
        rpc_listen: SocketAddr::from(([127, 0, 0, 1], 0)),
        solo: true,
        solo_block_interval_ms: 50,
        ..node.config(dir)
    };
    NodeBuilder::new(config)
        .with_registry(registry)
        .launch()
        .await
        .unwrap()
}

fn client(handle: &NodeHandle) -> HttpClient {
    HttpClientBuilder::default()
        .build(format!("http://{}", handle.local_addr()))
        .unwrap()
}

async fn wait_for_validators(handle: &NodeHandle, count: usize) {
    for _ in 0..200 {
        if handle.cache().validators().len() >= count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("validator set never reached {count}");
}

#[tokio::test]
async fn submitted_transaction_is_readable_over_rpc() {
    let node = Identity::new(1);
    let dir = tempfile::tempdir().unwrap();
    let handle = launch(&node, dir.path(), Arc::new(MemoryRegistry::default())).await;
    let client = client(&handle);

    assert_eq!(client.ping().await.unwrap(), "pong");
    let status = client.status().await.unwrap();
    assert_eq!(status.chain_id, CHAIN_ID);
    assert!(status.ready);

    let tx = node.sign(Transaction::ManageEntity(ManageEntity {
        user_id: 3,
        entity_type: "Playlist".into(),
        entity_id: 77,
        action: "Create".into(),
        metadata: r#"{"name":"mix"}"#.into(),
        signer: node.wallet(),
        nonce: "1".into(),
        ..Default::default()
    }));
    let location = client.send_transaction(tx.clone()).await.unwrap();
    assert_eq!(location.code, 0);
    assert!(location.height >= 1);

    // Resubmitting a finalized transaction returns where it landed.
    assert_eq!(client.send_transaction(tx).await.unwrap(), location);

    let hash = location.tx_hash.parse().unwrap();
    let stored = client.transaction(hash).await.unwrap();
    assert_eq!(stored.block_height, location.height);
    assert_eq!(stored.tx_index, location.index);

    let block = client.block(location.height).await.unwrap();
    assert_eq!(block.block.height, location.height);
    assert!(
        block
            .transactions
            .iter()
            .any(|tx| tx.tx_hash == location.tx_hash)
    );

    let entity = client.entity("Playlist".into(), 77).await.unwrap();
    assert_eq!(entity.user_id, 3);
    assert!(!entity.deleted);

    let health = client.health().await.unwrap();
    assert!(health.healthy);
    assert!(health.current_height >= location.height);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn listed_node_registers_itself() {
    let node = Identity::new(1);
    let dir = tempfile::tempdir().unwrap();
    let registry = Arc::new(MemoryRegistry::new(vec![provider(&node, 11)]));
    let handle = launch(&node, dir.path(), registry).await;

    wait_for_validators(&handle, 1).await;
    let validators = handle.cache().validators();
    assert_eq!(validators[0].consensus_address, node.address());
    assert_eq!(validators[0].endpoint, node.endpoint());
    assert_eq!(validators[0].eth_block, 11);
    assert_eq!(validators[0].voting_power, POWER);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn endorses_registrations_the_registry_confirms() {
    let node = Identity::new(1);
    let candidate = Identity::new(5);
    let stranger = Identity::new(6);
    let dir = tempfile::tempdir().unwrap();
    let registry = Arc::new(MemoryRegistry::new(vec![
        provider(&node, 11),
        provider(&candidate, 42),
    ]));
    let handle = launch(&node, dir.path(), registry).await;
    let client = client(&handle);

    let body = |identity: &Identity| ValidatorRegistration {
        consensus_address: identity.address(),
        consensus_pubkey: identity.pubkey(),
        delegate_wallet: identity.wallet(),
        endpoint: identity.endpoint(),
        node_type: NodeType::Content,
        sp_id: "42".into(),
        eth_block: 42,
        voting_power: POWER,
        deadline: handle.cache().current_height() + 100,
    };

    let registration = body(&candidate);
    let signature = client
        .registration_attestation(registration.clone())
        .await
        .unwrap();
    let message = AttestationBody::ValidatorRegistration(registration)
        .signing_bytes()
        .unwrap();
    assert_eq!(
        recover_wallet(&signature, &message).unwrap(),
        node.delegate.address()
    );

    match client.registration_attestation(body(&stranger)).await {
        Err(ClientError::Call(err)) => assert_eq!(err.code(), FAILED_PRECONDITION),
        other => panic!("unlisted registration endorsed: {other:?}"),
    }

    handle.shutdown().await.unwrap();
}

#[derive(Debug)]
struct StaticRegistry(Vec<ServiceProvider>);

#[async_trait::async_trait]
impl RegistryApiServer for StaticRegistry {
    async fn ready(&self) -> RpcResult<bool> {
        Ok(true)
    }

    async fn service_providers(&self) -> RpcResult<Vec<ServiceProvider>> {
        Ok(self.0.clone())
    }
}

#[tokio::test]
async fn http_registry_reads_a_remote_listing() {
    let listed = vec![provider(&Identity::new(1), 3), provider(&Identity::new(2), 4)];
    let server = ServerBuilder::new()
        .set_config(ServerConfigBuilder::default().http_only().build())
        .build("127.0.0.1:0")
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();
    let handle = server.start(StaticRegistry(listed.clone()).into_rpc());

    let registry = HttpRegistry::new(&format!("http://{addr}")).unwrap();
    assert!(registry.is_ready().await.unwrap());
    assert_eq!(registry.service_providers().await.unwrap(), listed);

    handle.stop().unwrap();
    handle.stopped().await;
}
