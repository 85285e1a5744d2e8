use std::time::Duration;

use jsonrpsee::{
    core::RpcResult,
    http_client::{HttpClient, HttpClientBuilder},
    proc_macros::rpc,
};
use parking_lot::Mutex;

use super::{RegistryClient, Result, ServiceProvider};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Methods the registry service exposes.
#[rpc(server, client, namespace = "registry")]
pub trait RegistryApi {
    #[method(name = "ready")]
    async fn ready(&self) -> RpcResult<bool>;

    #[method(name = "serviceProviders")]
    async fn service_providers(&self) -> RpcResult<Vec<ServiceProvider>>;
}

/// Registry reached over JSON-RPC.
#[derive(Clone, Debug)]
pub struct HttpRegistry {
    client: HttpClient,
}

impl HttpRegistry {
    pub fn new(url: &str) -> Result<Self> {
        let client = HttpClientBuilder::default()
            .request_timeout(REQUEST_TIMEOUT)
            .build(url)?;
        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl RegistryClient for HttpRegistry {
    async fn is_ready(&self) -> Result<bool> {
        Ok(RegistryApiClient::ready(&self.client).await?)
    }

    async fn service_providers(&self) -> Result<Vec<ServiceProvider>> {
        Ok(RegistryApiClient::service_providers(&self.client).await?)
    }
}

/// Registry held in memory. Backs local single node networks and tests.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    providers: Mutex<Vec<ServiceProvider>>,
}

impl MemoryRegistry {
    pub fn new(providers: Vec<ServiceProvider>) -> Self {
        Self {
            providers: Mutex::new(providers),
        }
    }

    /// Adds or replaces the provider at `provider.endpoint`.
    pub fn register(&self, provider: ServiceProvider) {
        let mut providers = self.providers.lock();
        providers.retain(|existing| existing.endpoint != provider.endpoint);
        providers.push(provider);
    }

    pub fn deregister(&self, endpoint: &str) {
        self.providers
            .lock()
            .retain(|provider| provider.endpoint != endpoint);
    }
}

#[async_trait::async_trait]
impl RegistryClient for MemoryRegistry {
    async fn is_ready(&self) -> Result<bool> {
        Ok(true)
    }

    async fn service_providers(&self) -> Result<Vec<ServiceProvider>> {
        Ok(self.providers.lock().clone())
    }
}
