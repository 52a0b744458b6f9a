use data_escrow::{
    conditions::ConditionError, crypto::CryptoError, did::Did, did::DidFormatError,
    document::DocumentError, encoding::EncodingError, types::AgreementId, DataEscrowError,
};
use std::path::PathBuf;
use thiserror::Error;

use crate::{
    agreement::state::StateError,
    catalog::{CatalogError, ProviderError, SecretStoreError},
    chain::ChainError,
};

pub type Result<T> = std::result::Result<T, DataEscrowClientError>;

#[derive(Debug, Error)]
pub enum DataEscrowClientError {
    #[error("Service agreement {agreement_id} failed: {reason}")]
    ServiceAgreement {
        agreement_id: AgreementId,
        reason: String,
    },
    #[error("Insufficient token balance: balance is {balance}, price is {price}")]
    InsufficientBalance { balance: u128, price: u128 },
    #[error("Document {0} not found in catalog")]
    DocumentNotFound(Did),
    #[error("Transaction {0} was not successful")]
    TransactionFailed(String),
    #[error("Document {0} has no encrypted files")]
    MissingEncryptedFiles(Did),
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    #[error("Invalid log file path: {0:?}")]
    InvalidLogFilePath(PathBuf),

    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    SecretStore(#[from] SecretStoreError),
    #[error(transparent)]
    State(#[from] StateError),

    // Wrapped errors
    #[error(transparent)]
    DataEscrow(#[from] DataEscrowError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
    #[error(transparent)]
    Toml(#[from] toml::de::Error),
}

impl DataEscrowClientError {
    pub(crate) fn service_agreement(agreement_id: AgreementId, reason: impl Into<String>) -> Self {
        Self::ServiceAgreement {
            agreement_id,
            reason: reason.into(),
        }
    }
}

// Errors from the protocol crate are flattened into `DataEscrow`
impl From<ConditionError> for DataEscrowClientError {
    fn from(error: ConditionError) -> Self {
        Self::DataEscrow(error.into())
    }
}

impl From<CryptoError> for DataEscrowClientError {
    fn from(error: CryptoError) -> Self {
        Self::DataEscrow(error.into())
    }
}

impl From<DidFormatError> for DataEscrowClientError {
    fn from(error: DidFormatError) -> Self {
        Self::DataEscrow(error.into())
    }
}

impl From<DocumentError> for DataEscrowClientError {
    fn from(error: DocumentError) -> Self {
        Self::DataEscrow(error.into())
    }
}

impl From<EncodingError> for DataEscrowClientError {
    fn from(error: EncodingError) -> Self {
        Self::DataEscrow(error.into())
    }
}

/// Failure of an end-to-end purchase, tagged with the agreement it was for.
#[derive(Debug, Error)]
#[error("Order for agreement {agreement_id} failed: {source}")]
pub struct OrderError {
    pub agreement_id: AgreementId,
    #[source]
    pub source: DataEscrowClientError,
}

impl OrderError {
    pub fn new(agreement_id: AgreementId, source: impl Into<DataEscrowClientError>) -> Self {
        Self {
            agreement_id,
            source: source.into(),
        }
    }
}
