use std::{
    collections::HashSet,
    sync::Arc,
    time::{Duration, Instant},
};

use alloy_primitives::Bytes;
use chorus_config::{Config, NetworkParams};
use chorus_primitives::{
    ConsensusKey, Transaction, TxHash, rendezvous,
    transaction::{
        Attestation, AttestationBody, ValidatorDeregistration, ValidatorRegistration,
        ValidatorRegistrationLegacy,
    },
    wallet_string,
};
use chorus_storage::{Queries, StateStore, models::Validator};
use eyre::WrapErr;
use parking_lot::Mutex;
use rand::Rng as _;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::{RegistrySnapshot, RegistryView};
use crate::{attest::Attestor, cache::Cache, peers::Peers, submit::TxSubmitter};

/// Blocks a membership attestation stays valid for after it is built.
pub const ATTESTATION_DEADLINE_BLOCKS: u64 = 120;

const POLL_INTERVAL: Duration = Duration::from_secs(5);
const CATCH_UP_CHECKS: u32 = 60;
const CATCH_UP_INTERVAL: Duration = Duration::from_secs(10);

/// Exponential retry delays bounded by an overall horizon.
#[derive(Clone, Debug)]
pub struct Backoff {
    delay: Duration,
    max: Duration,
    deadline: Instant,
}

impl Backoff {
    pub const INITIAL: Duration = Duration::from_secs(2);
    pub const MAX: Duration = Duration::from_secs(15);
    pub const HORIZON: Duration = Duration::from_secs(120 * 60);

    pub fn new(initial: Duration, max: Duration, horizon: Duration) -> Self {
        Self {
            delay: initial,
            max,
            deadline: Instant::now() + horizon,
        }
    }

    /// The delay before the next attempt, or `None` once the horizon passed.
    pub fn next_delay(&mut self) -> Option<Duration> {
        let remaining = self.deadline.checked_duration_since(Instant::now())?;
        if remaining.is_zero() {
            return None;
        }
        let delay = self.delay.min(remaining);
        self.delay = self.delay.saturating_mul(2).min(self.max);
        Some(delay)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Self::INITIAL, Self::MAX, Self::HORIZON)
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Registration {
    Submitted(TxHash),
    OnChain,
    NotListed,
    DuplicatedWallet,
}

/// Mirrors the registry into the validator set through attested transactions.
#[derive(Clone, Debug)]
pub struct RegistryBridge {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    registry: RegistryView,
    store: StateStore,
    cache: Cache,
    peers: Peers,
    attestor: Attestor,
    submitter: TxSubmitter,
    consensus_address: String,
    consensus_pubkey: Bytes,
    wallet: String,
    endpoint: String,
    network: NetworkParams,
    genesis: bool,
    /// Validators with a deregistration attempt in flight.
    pending: Mutex<HashSet<String>>,
}

impl RegistryBridge {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &Config,
        consensus_key: &ConsensusKey,
        registry: RegistryView,
        store: StateStore,
        cache: Cache,
        peers: Peers,
        attestor: Attestor,
        submitter: TxSubmitter,
    ) -> Self {
        let wallet = wallet_string(&submitter.key().address());
        Self {
            inner: Arc::new(Inner {
                registry,
                store,
                cache,
                peers,
                attestor,
                consensus_address: consensus_key.address(),
                consensus_pubkey: Bytes::copy_from_slice(&consensus_key.public_key()),
                genesis: config.is_genesis_validator(&wallet),
                wallet,
                endpoint: config.external_endpoint.clone(),
                network: config.network(),
                submitter,
                pending: Mutex::new(HashSet::new()),
            }),
        }
    }

    /// Registers this node once the registry and the local chain are ready,
    /// then keeps removing validators the registry dropped, until shutdown.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tokio::select! {
            _ = shutdown.changed() => {
                info!("registry bridge stopped");
                return;
            }
            _ = self.startup() => {}
        }

        let mut ticker = tokio::time::interval(POLL_INTERVAL);
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("registry bridge stopped");
                    return;
                }
                _ = ticker.tick() => {
                    if let Err(err) = self.sweep().await {
                        warn!(?err, "registry sweep failed");
                    }
                }
            }
        }
    }

    async fn startup(&self) {
        self.wait_ready().await;
        self.wait_caught_up().await;
        self.register_with_backoff(Backoff::default()).await;
    }

    async fn wait_ready(&self) {
        loop {
            match self.inner.registry.client().is_ready().await {
                Ok(true) => return,
                Ok(false) => debug!("registry not ready"),
                Err(err) => warn!(%err, "registry status check failed"),
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn wait_caught_up(&self) {
        for _ in 0..CATCH_UP_CHECKS {
            if !self.inner.cache.is_catching_up() {
                return;
            }
            tokio::time::sleep(CATCH_UP_INTERVAL).await;
        }
        warn!("node still catching up, registering anyway");
    }

    async fn register_with_backoff(&self, mut backoff: Backoff) {
        loop {
            match self.register().await {
                Ok(Registration::Submitted(hash)) => {
                    info!(%hash, endpoint = %self.inner.endpoint, "registration submitted");
                    return;
                }
                Ok(Registration::OnChain) => {
                    info!("node is already a validator");
                    return;
                }
                Ok(Registration::NotListed) => {
                    info!(endpoint = %self.inner.endpoint, "node is not in the registry, running unregistered");
                    return;
                }
                Ok(Registration::DuplicatedWallet) => {
                    warn!(wallet = %self.inner.wallet, "delegate wallet registered under several endpoints, refusing to register");
                    return;
                }
                Err(err) => {
                    let Some(delay) = backoff.next_delay() else {
                        warn!(?err, "registration failed, giving up");
                        return;
                    };
                    warn!(?err, ?delay, "registration failed, retrying");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn register(&self) -> eyre::Result<Registration> {
        let inner = &self.inner;
        let snapshot = inner.registry.refresh().await?;
        let Some(provider) = snapshot.by_endpoint(&inner.endpoint) else {
            return Ok(Registration::NotListed);
        };
        if !provider.delegate_wallet.eq_ignore_ascii_case(&inner.wallet) {
            warn!(registered = %provider.delegate_wallet, own = %inner.wallet, "registry lists another wallet for this endpoint");
            return Ok(Registration::NotListed);
        }
        if snapshot.is_duplicated(&inner.wallet) {
            return Ok(Registration::DuplicatedWallet);
        }

        let validators = load_validators(&inner.store).await?;
        if validators
            .iter()
            .any(|validator| validator.consensus_address == inner.consensus_address)
        {
            return Ok(Registration::OnChain);
        }

        if validators.is_empty() || inner.genesis {
            let registration = ValidatorRegistrationLegacy {
                endpoint: inner.endpoint.clone(),
                consensus_address: inner.consensus_address.clone(),
                consensus_pubkey: inner.consensus_pubkey.clone(),
                delegate_wallet: inner.wallet.clone(),
                node_type: provider.node_type,
                sp_id: provider.sp_id.clone(),
                eth_block: provider.eth_block,
                power: inner.network.validator_voting_power,
            };
            let hash = inner
                .submitter
                .submit(Transaction::ValidatorRegistration(registration))
                .await?;
            return Ok(Registration::Submitted(hash));
        }

        let body = ValidatorRegistration {
            consensus_address: inner.consensus_address.clone(),
            consensus_pubkey: inner.consensus_pubkey.clone(),
            delegate_wallet: inner.wallet.clone(),
            endpoint: inner.endpoint.clone(),
            node_type: provider.node_type,
            sp_id: provider.sp_id.clone(),
            eth_block: provider.eth_block,
            voting_power: inner.network.validator_voting_power,
            deadline: inner.cache.current_height() + ATTESTATION_DEADLINE_BLOCKS,
        };
        let params = inner.network.attestation;
        let selected = rendezvous::select(
            wallets(&validators),
            &rendezvous::registration_key(body.eth_block),
            params.registration_rsize,
        );
        let hash = self
            .attest_and_submit(
                AttestationBody::ValidatorRegistration(body),
                &selected,
                params.registration_min,
            )
            .await?;
        Ok(Registration::Submitted(hash))
    }

    async fn attest_and_submit(
        &self,
        body: AttestationBody,
        selected: &[String],
        min: usize,
    ) -> eyre::Result<TxHash> {
        let inner = &self.inner;
        let signatures = inner
            .peers
            .gather_attestations(&inner.attestor, &body, selected, min)
            .await
            .wrap_err("gather attestations")?;
        let hash = inner
            .submitter
            .submit(Transaction::Attestation(Attestation { signatures, body }))
            .await?;
        Ok(hash)
    }

    /// Starts a deregistration for every validator the registry dropped.
    async fn sweep(&self) -> eyre::Result<()> {
        let snapshot = self.inner.registry.refresh().await?;
        let validators = load_validators(&self.inner.store).await?;
        for validator in dropped(&snapshot, &validators) {
            if !self
                .inner
                .pending
                .lock()
                .insert(validator.consensus_address.clone())
            {
                continue;
            }
            info!(address = %validator.consensus_address, endpoint = %validator.endpoint, "validator left the registry");
            let bridge = self.clone();
            let validator = validator.clone();
            tokio::spawn(async move {
                let jitter = Duration::from_secs(rand::thread_rng().gen_range(10..=20));
                tokio::time::sleep(jitter).await;
                if let Err(err) = bridge.deregister(&validator).await {
                    warn!(?err, address = %validator.consensus_address, "deregistration failed");
                }
                bridge
                    .inner
                    .pending
                    .lock()
                    .remove(&validator.consensus_address);
            });
        }
        Ok(())
    }

    async fn deregister(&self, validator: &Validator) -> eyre::Result<()> {
        let inner = &self.inner;
        let validators = load_validators(&inner.store).await?;
        if !validators
            .iter()
            .any(|current| current.consensus_address == validator.consensus_address)
        {
            debug!(address = %validator.consensus_address, "validator already removed");
            return Ok(());
        }
        if inner
            .registry
            .refresh()
            .await?
            .by_endpoint(&validator.endpoint)
            .is_some()
        {
            debug!(endpoint = %validator.endpoint, "validator is back in the registry");
            return Ok(());
        }

        let body = ValidatorDeregistration {
            consensus_address: validator.consensus_address.clone(),
            consensus_pubkey: validator.consensus_pubkey.clone(),
            deadline: inner.cache.current_height() + ATTESTATION_DEADLINE_BLOCKS,
        };
        let params = inner.network.attestation;
        let selected = rendezvous::select(
            wallets(&validators),
            &body.consensus_pubkey,
            params.deregistration_rsize,
        );
        let hash = self
            .attest_and_submit(
                AttestationBody::ValidatorDeregistration(body),
                &selected,
                params.deregistration_min,
            )
            .await?;
        info!(%hash, address = %validator.consensus_address, "deregistration submitted");
        Ok(())
    }
}

/// On chain validators whose endpoint the registry no longer lists.
fn dropped<'a>(snapshot: &RegistrySnapshot, validators: &'a [Validator]) -> Vec<&'a Validator> {
    validators
        .iter()
        .filter(|validator| snapshot.by_endpoint(&validator.endpoint).is_none())
        .collect()
}

fn wallets(validators: &[Validator]) -> impl Iterator<Item = &str> {
    validators
        .iter()
        .map(|validator| validator.delegate_wallet.as_str())
}

async fn load_validators(store: &StateStore) -> eyre::Result<Vec<Validator>> {
    let mut conn = store.reader().await?;
    Queries::new(&mut *conn)
        .validators()
        .await
        .wrap_err("load validators")
}
