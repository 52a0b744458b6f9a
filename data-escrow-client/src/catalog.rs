//! Off-chain collaborators: the metadata catalog that stores documents, the
//! secret store that encrypts file URLs and the provider that serves
//! purchased assets.

use async_trait::async_trait;
use data_escrow::{
    crypto::RecoverableSignature,
    did::Did,
    document::Document,
    types::{Address, AgreementId},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Document {0} is already registered")]
    AlreadyExists(Did),
    #[error("Catalog rejected the document: {0}")]
    InvalidDocument(String),
    #[error("Catalog transport error: {0}")]
    Transport(String),
}

#[derive(Debug, Error)]
pub enum SecretStoreError {
    #[error("Secret store refused access to document {0}")]
    AccessDenied(String),
    #[error("Unknown ciphertext for document {0}")]
    UnknownCiphertext(String),
    #[error("Secret store transport error: {0}")]
    Transport(String),
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Provider rejected the consumer: {0}")]
    Unauthorized(String),
    #[error("Provider rejected the request: {0}")]
    Rejected(String),
    #[error("Provider transport error: {0}")]
    Transport(String),
}

/// Stores and resolves published documents.
#[async_trait]
pub trait MetadataCatalog: Send + Sync + 'static {
    /// Look up a document. `Ok(None)` means the catalog has no such
    /// document.
    async fn resolve(&self, did: &Did) -> Result<Option<Document>, CatalogError>;

    /// Publish a sealed document and return it as stored.
    async fn create(&self, document: Document) -> Result<Document, CatalogError>;
}

/// Threshold-encrypts document secrets.
#[async_trait]
pub trait SecretStore: Send + Sync + 'static {
    async fn encrypt(
        &self,
        document_id: &str,
        plaintext: &str,
        threshold: u32,
    ) -> Result<String, SecretStoreError>;

    async fn decrypt(&self, document_id: &str, ciphertext: &str)
        -> Result<String, SecretStoreError>;
}

/// Announcement of a new agreement to the provider of the purchased service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeAgreement {
    pub did: Did,
    pub service_agreement_id: AgreementId,
    pub service_definition_id: u32,
    pub signature: RecoverableSignature,
    pub consumer_address: Address,
}

/// The provider that fulfills release conditions on the consumer's behalf.
#[async_trait]
pub trait Provider: Send + Sync + 'static {
    async fn initialize_agreement(&self, request: InitializeAgreement)
        -> Result<(), ProviderError>;
}
