//! Clients for every registered validator, derived from on chain state.
//!
//! The peer map is rebuilt from the validator table on a fixed tick. Callers
//! take a snapshot of the map and never hold the lock across an RPC.

use std::{collections::HashMap, sync::Arc, time::Duration};

use alloy_primitives::{Bytes, TxHash};
use chorus_primitives::transaction::{
    AttestationBody, ValidatorDeregistration, ValidatorRegistration,
};
use chorus_storage::{Queries, StateStore, models::Validator};
use futures::{
    StreamExt as _,
    future::join_all,
    stream::FuturesUnordered,
};
use jsonrpsee::{
    core::ClientError,
    http_client::{HttpClient, HttpClientBuilder},
};
use parking_lot::RwLock;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::{
    attest::{AttestError, Attestor},
    rpc::{CoreApiClient, StatusResponse},
};

/// How often the peer set is rebuilt from the validator table.
pub const REFRESH_INTERVAL: Duration = Duration::from_secs(5);

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound on collecting one round of attestations.
pub const ATTESTATION_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    #[error("no peer with wallet `{0}`")]
    UnknownPeer(String),
    #[error("peer rpc failed")]
    Rpc(#[from] ClientError),
    #[error("local attestation failed")]
    Attest(#[from] AttestError),
    #[error("collected {have} attestations, {need} required")]
    Quorum { have: usize, need: usize },
}

pub type Result<T, E = PeerError> = std::result::Result<T, E>;

#[derive(Clone, Debug)]
pub struct Peer {
    pub wallet: String,
    pub endpoint: String,
    client: HttpClient,
}

impl Peer {
    fn connect(validator: &Validator) -> Result<Self> {
        let client = HttpClientBuilder::default()
            .request_timeout(REQUEST_TIMEOUT)
            .build(&validator.endpoint)?;
        Ok(Self {
            wallet: validator.delegate_wallet.clone(),
            endpoint: validator.endpoint.clone(),
            client,
        })
    }

    pub fn client(&self) -> &HttpClient {
        &self.client
    }
}

type PeerMap = HashMap<String, Peer>;

/// The registered peers of this node, keyed by delegate wallet.
#[derive(Clone, Debug)]
pub struct Peers {
    self_wallet: String,
    peers: Arc<RwLock<Arc<PeerMap>>>,
}

impl Peers {
    pub fn new(self_wallet: String) -> Self {
        Self {
            self_wallet,
            peers: Default::default(),
        }
    }

    /// The current peer set. Cheap, and unaffected by later refreshes.
    pub fn snapshot(&self) -> Arc<PeerMap> {
        self.peers.read().clone()
    }

    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rebuilds the peer set from `validators`, reusing clients of peers whose
    /// endpoint did not change.
    pub fn update(&self, validators: &[Validator]) {
        let current = self.snapshot();
        let mut next = PeerMap::with_capacity(validators.len());
        for validator in validators {
            if validator
                .delegate_wallet
                .eq_ignore_ascii_case(&self.self_wallet)
            {
                continue;
            }
            if let Some(peer) = current
                .get(&validator.delegate_wallet)
                .filter(|peer| peer.endpoint == validator.endpoint)
            {
                next.insert(peer.wallet.clone(), peer.clone());
                continue;
            }
            match Peer::connect(validator) {
                Ok(peer) => {
                    info!(wallet = %peer.wallet, endpoint = %peer.endpoint, "peer added");
                    next.insert(peer.wallet.clone(), peer);
                }
                Err(err) => warn!(%err, endpoint = %validator.endpoint, "failed to create peer client"),
            }
        }
        for wallet in current.keys().filter(|wallet| !next.contains_key(*wallet)) {
            info!(%wallet, "peer removed");
        }
        *self.peers.write() = Arc::new(next);
    }

    /// Keeps the peer set in sync with the validator table until shutdown.
    pub async fn run(self, store: StateStore, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(REFRESH_INTERVAL);
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("peer refresh stopped");
                    return;
                }
                _ = ticker.tick() => {
                    match load_validators(&store).await {
                        Ok(validators) => self.update(&validators),
                        Err(err) => warn!(?err, "failed to load validators for peers"),
                    }
                }
            }
        }
    }

    fn peer(&self, wallet: &str) -> Result<Peer> {
        self.snapshot()
            .get(wallet)
            .cloned()
            .ok_or_else(|| PeerError::UnknownPeer(wallet.to_string()))
    }

    /// Relays `tx` to every peer. Returns how many accepted it.
    pub async fn forward(&self, tx: Bytes) -> usize {
        let peers = self.snapshot();
        let results = join_all(peers.values().map(|peer| {
            let tx = tx.clone();
            async move {
                let result: std::result::Result<TxHash, ClientError> =
                    peer.client.forward_transaction(tx).await;
                if let Err(err) = &result {
                    debug!(%err, wallet = %peer.wallet, "forward failed");
                }
                result.is_ok()
            }
        }))
        .await;
        results.into_iter().filter(|accepted| *accepted).count()
    }

    pub async fn get_registration_attestation(
        &self,
        wallet: &str,
        body: ValidatorRegistration,
    ) -> Result<Bytes> {
        Ok(self
            .peer(wallet)?
            .client
            .registration_attestation(body)
            .await?)
    }

    pub async fn get_deregistration_attestation(
        &self,
        wallet: &str,
        body: ValidatorDeregistration,
    ) -> Result<Bytes> {
        Ok(self
            .peer(wallet)?
            .client
            .deregistration_attestation(body)
            .await?)
    }

    pub async fn get_status(&self, wallet: &str) -> Result<StatusResponse> {
        Ok(self.peer(wallet)?.client.status().await?)
    }

    /// Collects signatures over `body` from the `selected` attestors.
    ///
    /// This node signs locally when it is selected. Failing attestors are
    /// skipped. Returns as soon as `min(min, selected.len())` signatures are in;
    /// answers arriving later are dropped.
    pub async fn gather_attestations(
        &self,
        attestor: &Attestor,
        body: &AttestationBody,
        selected: &[String],
        min: usize,
    ) -> Result<Vec<Bytes>> {
        let mut requests = selected
            .iter()
            .map(|wallet| async move {
                let result = if wallet.eq_ignore_ascii_case(&self.self_wallet) {
                    self.attest_locally(attestor, body).await
                } else {
                    match body {
                        AttestationBody::ValidatorRegistration(registration) => {
                            self.get_registration_attestation(wallet, registration.clone())
                                .await
                        }
                        AttestationBody::ValidatorDeregistration(deregistration) => {
                            self.get_deregistration_attestation(wallet, deregistration.clone())
                                .await
                        }
                    }
                };
                result
                    .inspect_err(|err| debug!(%err, %wallet, "attestor declined"))
                    .ok()
            })
            .collect::<FuturesUnordered<_>>();

        let need = min.min(selected.len());
        let mut signatures = Vec::with_capacity(need);
        let gather = async {
            while signatures.len() < need {
                match requests.next().await {
                    Some(signature) => signatures.extend(signature),
                    None => break,
                }
            }
        };
        if tokio::time::timeout(ATTESTATION_TIMEOUT, gather).await.is_err() {
            debug!(have = signatures.len(), need, "attestation round timed out");
        }
        if signatures.len() < need {
            return Err(PeerError::Quorum {
                have: signatures.len(),
                need,
            });
        }
        Ok(signatures)
    }

    async fn attest_locally(&self, attestor: &Attestor, body: &AttestationBody) -> Result<Bytes> {
        Ok(match body {
            AttestationBody::ValidatorRegistration(registration) => {
                attestor.endorse_registration(registration).await?
            }
            AttestationBody::ValidatorDeregistration(deregistration) => {
                attestor.endorse_deregistration(deregistration).await?
            }
        })
    }
}

async fn load_validators(store: &StateStore) -> eyre::Result<Vec<Validator>> {
    let mut conn = store.reader().await?;
    Queries::new(&mut *conn).validators().await
}
