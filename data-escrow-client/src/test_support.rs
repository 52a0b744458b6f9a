//! A small marketplace wired from the in-memory collaborators: one
//! publisher with a registered asset and one funded consumer.

use data_escrow::{
    conditions::AgreementKind,
    crypto::Credentials,
    document::Document,
    service::{FileEntry, MetadataAttributes, MetadataMain},
    types::Address,
};
use rand::rngs::OsRng;
use std::{collections::BTreeMap, sync::Arc};
use tracing::Level;

use crate::{
    assets::ProviderConfig,
    catalog::Provider,
    config::{AgreementConfig, Config, ContractsConfig, LoggingConfig},
    memory::{MemoryCatalog, MemoryChain, MemorySecretStore},
    EscrowContext,
};

pub(crate) fn test_contracts() -> ContractsConfig {
    ContractsConfig {
        escrow_access_template: Address::from([0x11; 20]),
        escrow_compute_template: Address::from([0x12; 20]),
        lock_reward_condition: Address::from([0x21; 20]),
        access_secret_store_condition: Address::from([0x22; 20]),
        compute_execution_condition: Address::from([0x23; 20]),
        escrow_reward: Address::from([0x24; 20]),
        did_registry: Address::from([0x31; 20]),
        token: Address::from([0x41; 20]),
    }
}

pub(crate) fn test_config() -> Config {
    Config {
        contracts: test_contracts(),
        agreement: AgreementConfig::default(),
        logging: LoggingConfig {
            stdout_log_level: Level::INFO,
            log_files: None,
        },
    }
}

pub(crate) fn metadata(price: &str) -> MetadataAttributes {
    MetadataAttributes {
        main: MetadataMain {
            name: "weather".to_string(),
            asset_type: "dataset".to_string(),
            date_created: "2019-02-08T08:13:49Z".to_string(),
            author: "Met Office".to_string(),
            license: "CC-BY".to_string(),
            price: price.to_string(),
            files: vec![FileEntry {
                index: 0,
                content_type: "text/csv".to_string(),
                checksum: Some("efb21".to_string()),
                content_length: Some("4535431".to_string()),
                url: Some("https://example.org/weather.csv".to_string()),
            }],
        },
        encrypted_files: None,
        additional_information: BTreeMap::new(),
    }
}

pub(crate) fn provider_config() -> ProviderConfig {
    ProviderConfig {
        metadata_endpoint: "http://catalog/api/v1/assets/ddo/{did}".to_string(),
        access_endpoint: "http://provider/api/v1/consume".to_string(),
        compute_endpoint: "http://provider/api/v1/compute".to_string(),
        secret_store_endpoint: Some("http://secret-store".to_string()),
        providers: vec![Address::from([0x51; 20])],
    }
}

pub(crate) struct Marketplace {
    /// Publisher's handle on the shared ledger.
    pub(crate) chain: MemoryChain,
    pub(crate) catalog: Arc<MemoryCatalog>,
    pub(crate) secret_store: Arc<MemorySecretStore>,
    pub(crate) publisher: EscrowContext,
    pub(crate) consumer: EscrowContext,
    /// The published asset, priced at 10.
    pub(crate) document: Document,
}

impl Marketplace {
    pub(crate) async fn new(consumer_balance: u128) -> anyhow::Result<Self> {
        Self::with_kind(AgreementKind::Access, consumer_balance).await
    }

    pub(crate) async fn with_kind(
        kind: AgreementKind,
        consumer_balance: u128,
    ) -> anyhow::Result<Self> {
        let contracts = test_contracts();
        let publisher_credentials = Credentials::generate(&mut OsRng);
        let chain = MemoryChain::new(contracts.clone(), publisher_credentials.address());
        chain.approve_template(contracts.escrow_access_template).await;
        chain.approve_template(contracts.escrow_compute_template).await;

        let catalog = Arc::new(MemoryCatalog::new());
        let secret_store = Arc::new(MemorySecretStore::new());
        let publisher = EscrowContext::new(
            test_config(),
            publisher_credentials,
            Arc::new(chain.clone()),
            catalog.clone(),
            secret_store.clone(),
        );
        let document = publisher
            .register_asset(&metadata("10"), &provider_config(), kind, 0)
            .await?;

        let consumer = consumer_context(&chain, &catalog, &secret_store, consumer_balance).await;
        Ok(Self {
            chain,
            catalog,
            secret_store,
            publisher,
            consumer,
            document,
        })
    }

    /// A fresh consumer account holding `balance` tokens.
    pub(crate) async fn new_consumer(&self, balance: u128) -> EscrowContext {
        consumer_context(&self.chain, &self.catalog, &self.secret_store, balance).await
    }

    /// The consumer's account, announcing agreements to `provider`.
    pub(crate) fn consumer_with_provider(&self, provider: Arc<dyn Provider>) -> EscrowContext {
        EscrowContext::new(
            self.consumer.config.clone(),
            self.consumer.credentials.clone(),
            Arc::new(self.chain.for_account(self.consumer.account())),
            self.catalog.clone(),
            self.secret_store.clone(),
        )
        .with_provider(provider)
    }
}

async fn consumer_context(
    chain: &MemoryChain,
    catalog: &Arc<MemoryCatalog>,
    secret_store: &Arc<MemorySecretStore>,
    balance: u128,
) -> EscrowContext {
    let credentials = Credentials::generate(&mut OsRng);
    chain.set_balance(credentials.address(), balance).await;
    EscrowContext::new(
        test_config(),
        credentials.clone(),
        Arc::new(chain.for_account(credentials.address())),
        catalog.clone(),
        secret_store.clone(),
    )
}
