//! Endorsing membership changes requested by other nodes.

use alloy_primitives::Bytes;
use chorus_primitives::{
    CryptoError, DelegateKey,
    transaction::{AttestationBody, CodecError, ValidatorDeregistration, ValidatorRegistration},
};
use chorus_storage::{Queries, StateStore};
use eyre::WrapErr;
use tracing::info;

use crate::{
    cache::Cache,
    registry::{RegistryError, RegistryView},
    validation::MAX_DEADLINE_WINDOW,
};

#[derive(Debug, thiserror::Error)]
pub enum AttestError {
    #[error("deadline {deadline} outside of [{height}, {height} + {MAX_DEADLINE_WINDOW}]")]
    Deadline { deadline: u64, height: u64 },
    #[error("registry does not list `{endpoint}` for `{wallet}` at eth block {eth_block}")]
    NotRegistered {
        endpoint: String,
        wallet: String,
        eth_block: u64,
    },
    #[error("validator `{0}` is already on chain")]
    AlreadyOnChain(String),
    #[error("validator `{0}` is not on chain")]
    NotOnChain(String),
    #[error("registry still lists `{0}`")]
    StillRegistered(String),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("failed encoding attestation body")]
    Codec(#[from] CodecError),
    #[error("failed signing attestation")]
    Sign(#[from] CryptoError),
    #[error(transparent)]
    Store(#[from] eyre::Report),
}

/// Signs attestation bodies this node agrees with.
#[derive(Clone, Debug)]
pub struct Attestor {
    key: DelegateKey,
    registry: RegistryView,
    store: StateStore,
    cache: Cache,
}

impl Attestor {
    pub fn new(key: DelegateKey, registry: RegistryView, store: StateStore, cache: Cache) -> Self {
        Self {
            key,
            registry,
            store,
            cache,
        }
    }

    pub fn registry(&self) -> &RegistryView {
        &self.registry
    }

    /// Endorses a registration the registry confirms for a validator not yet
    /// on chain.
    pub async fn endorse_registration(&self, body: &ValidatorRegistration) -> Result<Bytes, AttestError> {
        self.ensure_deadline(body.deadline)?;
        let snapshot = self.registry.refresh().await?;
        if !snapshot.confirms(&body.endpoint, &body.delegate_wallet, body.eth_block) {
            return Err(AttestError::NotRegistered {
                endpoint: body.endpoint.clone(),
                wallet: body.delegate_wallet.clone(),
                eth_block: body.eth_block,
            });
        }
        let mut conn = self.store.reader().await?;
        if Queries::new(&mut *conn)
            .validator_by_address(&body.consensus_address)
            .await
            .wrap_err("lookup validator")?
            .is_some()
        {
            return Err(AttestError::AlreadyOnChain(body.consensus_address.clone()));
        }

        let signature = self.sign(AttestationBody::ValidatorRegistration(body.clone()))?;
        info!(endpoint = %body.endpoint, wallet = %body.delegate_wallet, "endorsed registration");
        Ok(signature)
    }

    /// Endorses removing an on chain validator the registry no longer lists.
    pub async fn endorse_deregistration(
        &self,
        body: &ValidatorDeregistration,
    ) -> Result<Bytes, AttestError> {
        self.ensure_deadline(body.deadline)?;
        let mut conn = self.store.reader().await?;
        let validator = Queries::new(&mut *conn)
            .validator_by_address(&body.consensus_address)
            .await
            .wrap_err("lookup validator")?
            .ok_or_else(|| AttestError::NotOnChain(body.consensus_address.clone()))?;
        drop(conn);

        let snapshot = self.registry.refresh().await?;
        if snapshot.by_endpoint(&validator.endpoint).is_some() {
            return Err(AttestError::StillRegistered(validator.endpoint));
        }

        let signature = self.sign(AttestationBody::ValidatorDeregistration(body.clone()))?;
        info!(address = %body.consensus_address, endpoint = %validator.endpoint, "endorsed deregistration");
        Ok(signature)
    }

    pub(crate) fn sign(&self, body: AttestationBody) -> Result<Bytes, AttestError> {
        Ok(self.key.sign(&body.signing_bytes()?)?)
    }

    fn ensure_deadline(&self, deadline: u64) -> Result<(), AttestError> {
        let height = self.cache.current_height();
        if deadline < height || deadline > height.saturating_add(MAX_DEADLINE_WINDOW) {
            return Err(AttestError::Deadline { deadline, height });
        }
        Ok(())
    }
}
