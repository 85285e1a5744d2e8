//! The external service provider registry and the bridge that mirrors it
//! into the validator set.
//!
//! The registry is only ever read. Membership changes it implies are turned
//! into attested transactions and go through consensus like any other.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use chorus_primitives::transaction::NodeType;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

mod bridge;
mod client;

pub use bridge::{Backoff, RegistryBridge};
pub use client::{HttpRegistry, MemoryRegistry, RegistryApiClient, RegistryApiServer};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("registry rpc failed")]
    Rpc(#[from] jsonrpsee::core::ClientError),
    #[error("registry is not ready")]
    NotReady,
}

pub type Result<T, E = RegistryError> = std::result::Result<T, E>;

/// A node as listed by the registry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceProvider {
    pub endpoint: String,
    pub delegate_wallet: String,
    pub node_type: NodeType,
    pub sp_id: String,
    /// Ethereum block the endpoint was registered at.
    pub eth_block: u64,
}

/// Read access to the registry.
#[async_trait::async_trait]
pub trait RegistryClient: Send + Sync + std::fmt::Debug {
    async fn is_ready(&self) -> Result<bool>;

    /// Every currently registered service provider.
    async fn service_providers(&self) -> Result<Vec<ServiceProvider>>;
}

/// Registry contents at one point in time.
#[derive(Debug, Default)]
pub struct RegistrySnapshot {
    by_endpoint: HashMap<String, ServiceProvider>,
    /// Lower case wallets listed under more than one endpoint.
    duplicated_wallets: HashSet<String>,
}

impl RegistrySnapshot {
    pub fn new(providers: impl IntoIterator<Item = ServiceProvider>) -> Self {
        let mut by_endpoint = HashMap::new();
        let mut wallets = HashSet::new();
        let mut duplicated_wallets = HashSet::new();
        for provider in providers {
            let wallet = provider.delegate_wallet.to_ascii_lowercase();
            if !wallets.insert(wallet.clone()) {
                duplicated_wallets.insert(wallet);
            }
            by_endpoint.insert(provider.endpoint.clone(), provider);
        }
        Self {
            by_endpoint,
            duplicated_wallets,
        }
    }

    pub fn len(&self) -> usize {
        self.by_endpoint.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_endpoint.is_empty()
    }

    pub fn by_endpoint(&self, endpoint: &str) -> Option<&ServiceProvider> {
        self.by_endpoint.get(endpoint)
    }

    pub fn is_duplicated(&self, wallet: &str) -> bool {
        self.duplicated_wallets
            .contains(&wallet.to_ascii_lowercase())
    }

    /// Whether `endpoint` is registered to `wallet` at `eth_block`.
    pub fn confirms(&self, endpoint: &str, wallet: &str, eth_block: u64) -> bool {
        self.by_endpoint(endpoint).is_some_and(|provider| {
            provider.delegate_wallet.eq_ignore_ascii_case(wallet) && provider.eth_block == eth_block
        })
    }
}

/// Shared, periodically refreshed view of the registry.
///
/// Readers get the current snapshot without waiting on a refresh. A refresh
/// swaps the snapshot atomically.
#[derive(Clone, Debug)]
pub struct RegistryView {
    client: Arc<dyn RegistryClient>,
    snapshot: Arc<RwLock<Arc<RegistrySnapshot>>>,
}

impl RegistryView {
    pub fn new(client: Arc<dyn RegistryClient>) -> Self {
        Self {
            client,
            snapshot: Default::default(),
        }
    }

    pub fn client(&self) -> &Arc<dyn RegistryClient> {
        &self.client
    }

    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.snapshot.read().clone()
    }

    pub async fn refresh(&self) -> Result<Arc<RegistrySnapshot>> {
        let snapshot = Arc::new(RegistrySnapshot::new(
            self.client.service_providers().await?,
        ));
        *self.snapshot.write() = snapshot.clone();
        Ok(snapshot)
    }
}
