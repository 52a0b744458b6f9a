//! Publishing assets and looking them up.

use data_escrow::{
    conditions::{AgreementKind, Condition, TemplateParameters},
    constants::service_index,
    did::Did,
    document::{Document, DocumentBuilder},
    service::{
        AgreementAttributes, AgreementMain, AuthorizationAttributes, AuthorizationMain,
        MetadataAttributes, ProvenanceAttributes, Service, ServiceKind,
    },
    types::Address,
};
use std::collections::HashSet;
use tracing::{info, instrument};

use crate::{
    chain::{event_topic, events, ContractCall, LogFilter},
    DataEscrowClientError, EscrowContext, Result,
};

/// Where the services of a newly published asset are reachable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    pub metadata_endpoint: String,
    pub access_endpoint: String,
    pub compute_endpoint: String,
    /// Adds an authorization service when set.
    pub secret_store_endpoint: Option<String>,
    /// Providers allowed to serve the asset, registered with the DID.
    pub providers: Vec<Address>,
}

impl EscrowContext {
    /// Publish an asset with one purchasable service of `kind`.
    ///
    /// The document is sealed under this context's account, its file URLs
    /// are encrypted through the secret store and replaced by the
    /// ciphertext, the DID is registered on-chain and the document is stored
    /// in the catalog.
    #[instrument(skip(self, metadata, provider_config), err(Debug))]
    pub async fn register_asset(
        &self,
        metadata: &MetadataAttributes,
        provider_config: &ProviderConfig,
        kind: AgreementKind,
        threshold: u32,
    ) -> Result<Document> {
        let price = &metadata.main.price;
        let builder = DocumentBuilder::new();
        let provisional_id = *builder.provisional_id();

        let metadata_service = Service {
            index: service_index::METADATA,
            service_endpoint: provider_config.metadata_endpoint.clone(),
            kind: ServiceKind::Metadata {
                attributes: MetadataAttributes {
                    encrypted_files: None,
                    ..metadata.clone()
                },
            },
        };
        let (agreement_index, agreement_service) =
            self.agreement_service(kind, provisional_id, price, provider_config)?;
        let provenance_service = Service {
            index: service_index::PROVENANCE,
            service_endpoint: provider_config.metadata_endpoint.clone(),
            kind: ServiceKind::Provenance {
                attributes: ProvenanceAttributes {
                    main: serde_json::json!({}),
                },
            },
        };

        let mut builder = builder
            .add_service(metadata_service)
            .add_service(agreement_service)
            .add_service(provenance_service);
        if let Some(endpoint) = &provider_config.secret_store_endpoint {
            builder = builder.add_service(Service {
                index: service_index::AUTHORIZATION,
                service_endpoint: endpoint.clone(),
                kind: ServiceKind::Authorization {
                    attributes: AuthorizationAttributes {
                        main: AuthorizationMain {
                            service: "SecretStore".to_string(),
                            threshold,
                        },
                    },
                },
            });
        }

        let mut document = builder.integrity_build(&self.credentials)?;
        let did = *document.id();

        // Conditions were built for the provisional id; rebind them.
        let conditions = self.conditions(kind, did, price)?;
        document.set_agreement_conditions(agreement_index, conditions)?;

        let urls: Vec<String> = metadata
            .main
            .files
            .iter()
            .filter_map(|file| file.url.clone())
            .collect();
        let encrypted_files = self
            .secret_store
            .encrypt(&did.hash_hex(), &serde_json::to_string(&urls)?, threshold)
            .await?;
        document.set_encrypted_files(encrypted_files)?;
        document.clean_file_urls()?;

        let receipt = self
            .chain
            .submit_transaction(ContractCall::RegisterDidAttribute {
                did,
                checksum: *did.hash(),
                providers: provider_config.providers.clone(),
                value: provider_config.metadata_endpoint.clone(),
            })
            .await?;
        if !receipt.is_success() {
            return Err(DataEscrowClientError::TransactionFailed(
                "register DID attribute".to_string(),
            ));
        }

        let document = self.catalog.create(document).await?;
        info!(%did, %kind, "Registered asset.");
        Ok(document)
    }

    fn conditions(&self, kind: AgreementKind, did: Did, price: &str) -> Result<Vec<Condition>> {
        let contracts = &self.config.contracts;
        Ok(kind.initialize_conditions(&TemplateParameters {
            did,
            price: price.to_string(),
            escrow_reward: contracts.escrow_reward,
            lock_reward: contracts.lock_reward_condition,
            release_condition: contracts.release_condition(kind),
        })?)
    }

    fn agreement_service(
        &self,
        kind: AgreementKind,
        did: Did,
        price: &str,
        provider_config: &ProviderConfig,
    ) -> Result<(u32, Service)> {
        let template = kind.service_agreement_template(self.conditions(kind, did, price)?);
        let template_id = self.config.contracts.template(kind);
        let (name, index, endpoint) = match kind {
            AgreementKind::Access => (
                "dataAssetAccessServiceAgreement",
                service_index::ACCESS,
                &provider_config.access_endpoint,
            ),
            AgreementKind::Compute => (
                "dataAssetComputingServiceAgreement",
                service_index::COMPUTING,
                &provider_config.compute_endpoint,
            ),
        };
        let attributes = AgreementAttributes {
            main: AgreementMain {
                name: name.to_string(),
                creator: self.account(),
                price: price.to_string(),
                timeout: template.max_timeout(),
            },
            service_agreement_template: template,
            provider: None,
        };
        let kind = match kind {
            AgreementKind::Access => ServiceKind::Access {
                template_id,
                attributes,
            },
            AgreementKind::Compute => ServiceKind::Computing {
                template_id,
                attributes,
            },
        };

        Ok((
            index,
            Service {
                index,
                service_endpoint: endpoint.clone(),
                kind,
            },
        ))
    }

    /// Identifiers of every asset `owner` registered, oldest first.
    #[instrument(skip(self), err(Debug))]
    pub async fn owner_assets(&self, owner: &Address) -> Result<Vec<Did>> {
        let filter = LogFilter::new(
            self.config.contracts.did_registry,
            vec![
                Some(event_topic(events::DID_ATTRIBUTE_REGISTERED)),
                None,
                Some(owner.to_topic()),
            ],
        );
        let logs = self.chain.query_logs(&filter).await?;

        let mut seen = HashSet::new();
        Ok(logs
            .iter()
            .filter_map(|entry| entry.topics.get(1))
            .map(|topic| Did::from_hash(*topic))
            .filter(|did| seen.insert(*did))
            .collect())
    }

    /// Decrypt the file URLs of `did`. Only succeeds if the secret store
    /// grants this account access.
    #[instrument(skip(self), err(Debug))]
    pub async fn file_urls(&self, did: &Did) -> Result<Vec<String>> {
        let document = self.resolve(did).await?;
        let encrypted_files = document
            .metadata()?
            .encrypted_files
            .as_deref()
            .ok_or(DataEscrowClientError::MissingEncryptedFiles(*did))?;
        let plaintext = self
            .secret_store
            .decrypt(&did.hash_hex(), encrypted_files)
            .await?;
        Ok(serde_json::from_str(&plaintext)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        catalog::MetadataCatalog,
        test_support::{metadata, provider_config, Marketplace},
    };
    use data_escrow::constants::conditions::EXEC_COMPUTE;

    #[tokio::test]
    async fn registered_asset_is_sealed_and_bound_to_its_id() -> anyhow::Result<()> {
        let market = Marketplace::new(0).await?;
        let document = &market.document;
        document.verify_integrity()?;
        assert_eq!(*document.publisher(), market.publisher.account());

        let info = document.basic_asset_info(service_index::ACCESS)?;
        assert_eq!(info.asset_id, *document.id().hash());
        assert_eq!(info.price, 10);

        let stored = market
            .catalog
            .resolve(document.id())
            .await?
            .ok_or_else(|| anyhow::anyhow!("not stored"))?;
        assert_eq!(&stored, document);
        assert!(document.authorization_service().is_some());
        Ok(())
    }

    #[tokio::test]
    async fn urls_are_encrypted_and_removed() -> anyhow::Result<()> {
        let market = Marketplace::new(0).await?;
        let published = market.document.metadata()?;
        assert!(published.main.files.iter().all(|file| file.url.is_none()));
        assert!(published.encrypted_files.is_some());

        let urls = market.consumer.file_urls(market.document.id()).await?;
        assert_eq!(urls, ["https://example.org/weather.csv"]);
        Ok(())
    }

    #[tokio::test]
    async fn owner_assets_lists_registrations() -> anyhow::Result<()> {
        let market = Marketplace::new(0).await?;
        let second = market
            .publisher
            .register_asset(&metadata("20"), &provider_config(), AgreementKind::Compute, 0)
            .await?;

        let owned = market.consumer.owner_assets(&market.publisher.account()).await?;
        assert_eq!(owned, vec![*market.document.id(), *second.id()]);
        assert!(market
            .consumer
            .owner_assets(&market.consumer.account())
            .await?
            .is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn compute_asset_uses_computing_service() -> anyhow::Result<()> {
        let market = Marketplace::with_kind(AgreementKind::Compute, 0).await?;
        let agreement = market.document.agreement_service(service_index::COMPUTING)?;
        assert_eq!(agreement.kind, AgreementKind::Compute);
        assert!(agreement.template().condition(EXEC_COMPUTE).is_ok());
        assert_eq!(agreement.attributes.main.timeout, 86400);
        assert_eq!(
            *agreement.template_id,
            market.publisher.config().contracts.escrow_compute_template
        );
        Ok(())
    }

    #[tokio::test]
    async fn missing_document_is_reported() -> anyhow::Result<()> {
        let market = Marketplace::new(0).await?;
        let result = market.consumer.file_urls(&Did::from_hash([3; 32])).await;
        assert!(matches!(
            result,
            Err(DataEscrowClientError::DocumentNotFound(_))
        ));
        Ok(())
    }
}
