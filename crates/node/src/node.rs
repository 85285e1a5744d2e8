//! Wires the node's components together and runs their background tasks.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use alloy_primitives::Bytes;
use chorus_config::Config;
use chorus_primitives::wallet_string;
use chorus_storage::StateStore;
use chorus_transaction_pool::{Mempool, PoolConfig};
use eyre::WrapErr;
use jsonrpsee::server::{ServerBuilder, ServerConfigBuilder, ServerHandle};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tracing::{info, warn};

use crate::{
    abci::{Application, ValidatorUpdate},
    app::CoreApp,
    attest::Attestor,
    cache::Cache,
    events::EventBus,
    peers::Peers,
    pos::{PoSRequest, PosCoordinator},
    registry::{HttpRegistry, RegistryBridge, RegistryClient, RegistryView},
    rpc::{CoreApiServer, CoreRpc},
    solo::SoloDriver,
    submit::TxSubmitter,
};

/// How long shutdown waits for background tasks.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Configures and starts a node.
#[derive(Debug)]
pub struct NodeBuilder {
    config: Config,
    registry: Option<Arc<dyn RegistryClient>>,
    blob_store: Option<mpsc::Sender<PoSRequest>>,
}

impl NodeBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            registry: None,
            blob_store: None,
        }
    }

    /// Reads the registry through `registry` instead of the configured URL.
    pub fn with_registry(mut self, registry: Arc<dyn RegistryClient>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Channel to the local blob store answering storage challenges.
    pub fn with_blob_store(mut self, blob_store: mpsc::Sender<PoSRequest>) -> Self {
        self.blob_store = Some(blob_store);
        self
    }

    pub async fn launch(self) -> eyre::Result<NodeHandle> {
        let Self {
            config,
            registry,
            blob_store,
        } = self;
        config.validate().wrap_err("invalid configuration")?;
        let delegate_key = config.delegate_key()?;
        let consensus_key = config.consensus_key()?;
        let wallet = wallet_string(&delegate_key.address());

        let store = StateStore::connect(&config.database_url).await?;
        let cache = Cache::new();
        let mempool = Arc::new(Mempool::new(
            PoolConfig {
                max_txs: config.mempool.max_txs,
                max_tx_bytes: config.mempool.max_tx_bytes,
            },
            Arc::new(cache.clone()),
        ));
        let events = EventBus::new();
        let peers = Peers::new(wallet.clone());

        let registry = match registry {
            Some(registry) => registry,
            None => Arc::new(
                HttpRegistry::new(config.registry_url()).wrap_err("build registry client")?,
            ),
        };
        let registry = RegistryView::new(registry);
        let attestor = Attestor::new(
            delegate_key.clone(),
            registry.clone(),
            store.clone(),
            cache.clone(),
        );
        let submitter = TxSubmitter::new(delegate_key.clone(), mempool.clone(), peers.clone());
        let pos = PosCoordinator::new(consensus_key.clone(), submitter.clone(), blob_store);
        let mut app = CoreApp::new(
            &config,
            delegate_key,
            store.clone(),
            mempool.clone(),
            cache.clone(),
            events.clone(),
            pos,
        );

        let (shutdown, shutdown_rx) = watch::channel(false);
        let mut tasks = Vec::new();
        let mut application = None;
        if config.solo {
            let mut driver = SoloDriver::new(
                app,
                consensus_key.address(),
                Duration::from_millis(config.solo_block_interval_ms),
            );
            let genesis = vec![ValidatorUpdate {
                pub_key: Bytes::copy_from_slice(&consensus_key.public_key()),
                power: config.network().validator_voting_power,
            }];
            driver.start(&config.chain_id, genesis).await?;
            tasks.push(tokio::spawn(driver.run(shutdown_rx.clone())));
        } else {
            let info = app.info().await.wrap_err("load application state")?;
            info!(height = info.last_block_height, "awaiting consensus engine");
            application = Some(app);
        }
        cache.set_ready(true);

        let server = ServerBuilder::new()
            .set_config(ServerConfigBuilder::default().http_only().build())
            .build(config.rpc_listen)
            .await
            .wrap_err_with(|| format!("bind rpc server on {}", config.rpc_listen))?;
        let local_addr = server.local_addr()?;
        let rpc = CoreRpc::new(
            config.chain_id.clone(),
            store.clone(),
            cache.clone(),
            mempool.clone(),
            peers.clone(),
            events.clone(),
            attestor.clone(),
        );
        let server = server.start(rpc.into_rpc());
        info!(%local_addr, chain_id = %config.chain_id, %wallet, "rpc server started");

        tasks.push(tokio::spawn(
            peers.clone().run(store.clone(), shutdown_rx.clone()),
        ));
        let bridge = RegistryBridge::new(
            &config,
            &consensus_key,
            registry,
            store.clone(),
            cache.clone(),
            peers,
            attestor,
            submitter.clone(),
        );
        tasks.push(tokio::spawn(bridge.run(shutdown_rx)));

        Ok(NodeHandle {
            local_addr,
            server,
            shutdown,
            tasks,
            store,
            cache,
            mempool,
            events,
            submitter,
            application,
        })
    }
}

/// A running node.
#[derive(Debug)]
pub struct NodeHandle {
    local_addr: SocketAddr,
    server: ServerHandle,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
    store: StateStore,
    cache: Cache,
    mempool: Arc<Mempool>,
    events: EventBus,
    submitter: TxSubmitter,
    application: Option<CoreApp>,
}

impl NodeHandle {
    /// Address the RPC server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    pub fn mempool(&self) -> &Arc<Mempool> {
        &self.mempool
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn submitter(&self) -> &TxSubmitter {
        &self.submitter
    }

    /// The application for an external consensus engine to drive. `None`
    /// when the node produces its own blocks.
    pub fn take_application(&mut self) -> Option<CoreApp> {
        self.application.take()
    }

    /// Resolves once the RPC server stops.
    pub async fn stopped(&self) {
        self.server.clone().stopped().await
    }

    /// Stops background tasks and the RPC server, then closes the store.
    pub async fn shutdown(self) -> eyre::Result<()> {
        let _ = self.shutdown.send(true);
        if self.server.stop().is_err() {
            warn!("rpc server already stopped");
        }
        let wait = futures::future::join_all(self.tasks);
        if tokio::time::timeout(SHUTDOWN_TIMEOUT, wait).await.is_err() {
            warn!(timeout = ?SHUTDOWN_TIMEOUT, "background tasks did not stop in time");
        }
        self.store.close().await;
        info!("node stopped");
        Ok(())
    }
}
