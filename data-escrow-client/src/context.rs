//! The handle every client operation runs against.

use data_escrow::{crypto::Credentials, did::Did, document::Document, types::Address};
use std::sync::Arc;
use tracing::debug;

use crate::{
    catalog::{MetadataCatalog, Provider, SecretStore},
    chain::Chain,
    config::Config,
    DataEscrowClientError, Result,
};

/// Collaborators, account and configuration of one participant.
///
/// Cheap to share: collaborators sit behind `Arc`s, and a context can be
/// used by several purchase flows at once.
pub struct EscrowContext {
    pub(crate) config: Config,
    pub(crate) credentials: Credentials,
    pub(crate) chain: Arc<dyn Chain>,
    pub(crate) catalog: Arc<dyn MetadataCatalog>,
    pub(crate) secret_store: Arc<dyn SecretStore>,
    pub(crate) provider: Option<Arc<dyn Provider>>,
}

impl EscrowContext {
    pub fn new(
        config: Config,
        credentials: Credentials,
        chain: Arc<dyn Chain>,
        catalog: Arc<dyn MetadataCatalog>,
        secret_store: Arc<dyn SecretStore>,
    ) -> Self {
        Self {
            config,
            credentials,
            chain,
            catalog,
            secret_store,
            provider: None,
        }
    }

    /// Announce new agreements to `provider` during purchases.
    pub fn with_provider(mut self, provider: Arc<dyn Provider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Address of the account this context signs and transacts as.
    pub fn account(&self) -> Address {
        self.credentials.address()
    }

    pub fn chain(&self) -> &Arc<dyn Chain> {
        &self.chain
    }

    /// Fetch a document from the catalog.
    pub async fn resolve(&self, did: &Did) -> Result<Document> {
        let document = self
            .catalog
            .resolve(did)
            .await?
            .ok_or(DataEscrowClientError::DocumentNotFound(*did))?;
        debug!(%did, services = document.services().len(), "Resolved document");
        Ok(document)
    }
}

impl std::fmt::Debug for EscrowContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EscrowContext")
            .field("account", &self.account())
            .field("config", &self.config)
            .field("provider", &self.provider.is_some())
            .finish()
    }
}
