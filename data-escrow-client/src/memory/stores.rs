use async_trait::async_trait;
use data_escrow::{
    did::Did,
    document::Document,
    encoding::{bytes_to_hex, keccak256},
};
use std::collections::HashMap;
use tokio::sync::{Mutex, RwLock};
use tracing::info;

use crate::catalog::{
    CatalogError, InitializeAgreement, MetadataCatalog, Provider, ProviderError, SecretStore,
    SecretStoreError,
};

/// Catalog holding documents in a map. Documents are checked with
/// [`Document::verify_integrity`] before they are accepted.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    documents: RwLock<HashMap<Did, Document>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetadataCatalog for MemoryCatalog {
    async fn resolve(&self, did: &Did) -> Result<Option<Document>, CatalogError> {
        Ok(self.documents.read().await.get(did).cloned())
    }

    async fn create(&self, document: Document) -> Result<Document, CatalogError> {
        document
            .verify_integrity()
            .map_err(|e| CatalogError::InvalidDocument(e.to_string()))?;

        let mut documents = self.documents.write().await;
        if documents.contains_key(document.id()) {
            return Err(CatalogError::AlreadyExists(*document.id()));
        }
        let _ = documents.insert(*document.id(), document.clone());
        info!(did = %document.id(), "Stored document.");
        Ok(document)
    }
}

/// Secret store keeping plaintexts in a map and handing out opaque
/// ciphertext handles. Decryption is only allowed for the document the
/// secret was stored under.
#[derive(Debug, Default)]
pub struct MemorySecretStore {
    secrets: Mutex<SecretMap>,
}

#[derive(Debug, Default)]
struct SecretMap {
    /// Map from ciphertext to (document id, plaintext).
    entries: HashMap<String, (String, String)>,
    counter: u64,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn encrypt(
        &self,
        document_id: &str,
        plaintext: &str,
        _threshold: u32,
    ) -> Result<String, SecretStoreError> {
        let mut secrets = self.secrets.lock().await;
        secrets.counter += 1;

        let mut preimage = document_id.as_bytes().to_vec();
        preimage.extend_from_slice(plaintext.as_bytes());
        preimage.extend_from_slice(&secrets.counter.to_be_bytes());
        let ciphertext = bytes_to_hex(keccak256(preimage));

        let _ = secrets.entries.insert(
            ciphertext.clone(),
            (document_id.to_string(), plaintext.to_string()),
        );
        Ok(ciphertext)
    }

    async fn decrypt(
        &self,
        document_id: &str,
        ciphertext: &str,
    ) -> Result<String, SecretStoreError> {
        let secrets = self.secrets.lock().await;
        match secrets.entries.get(ciphertext) {
            Some((owner, plaintext)) if owner == document_id => Ok(plaintext.clone()),
            Some(_) => Err(SecretStoreError::AccessDenied(document_id.to_string())),
            None => Err(SecretStoreError::UnknownCiphertext(document_id.to_string())),
        }
    }
}

/// Provider that records agreement announcements and either accepts them
/// or rejects the consumer.
#[derive(Debug, Default)]
pub struct MemoryProvider {
    unauthorized: Option<String>,
    requests: Mutex<Vec<InitializeAgreement>>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// A provider that answers every announcement with
    /// [`ProviderError::Unauthorized`].
    pub fn unauthorized(reason: impl Into<String>) -> Self {
        Self {
            unauthorized: Some(reason.into()),
            requests: Mutex::default(),
        }
    }

    pub async fn requests(&self) -> Vec<InitializeAgreement> {
        self.requests.lock().await.clone()
    }
}

#[async_trait]
impl Provider for MemoryProvider {
    async fn initialize_agreement(
        &self,
        request: InitializeAgreement,
    ) -> Result<(), ProviderError> {
        self.requests.lock().await.push(request);
        match &self.unauthorized {
            Some(reason) => Err(ProviderError::Unauthorized(reason.clone())),
            None => Ok(()),
        }
    }
}
