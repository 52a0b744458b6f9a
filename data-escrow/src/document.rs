//! The signed asset document (DDO).
//!
//! A [`Document`] can only be produced by [`DocumentBuilder::integrity_build`]
//! or by deserializing one that was. Building sorts the services, computes
//! one checksum per service, derives the identifier from the checksum map and
//! signs it. The identifier has no setter.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, info};

use crate::{
    conditions::{Condition, ConditionError},
    constants::{
        conditions::LOCK_REWARD,
        parameters::{AMOUNT, DOCUMENT_ID},
        AUTHENTICATION_TYPE, DID_CONTEXT, ETHEREUM_KEY_TYPE, INTEGRITY_PROOF_TYPE,
    },
    crypto::{CryptoError, Credentials, RecoverableSignature},
    did::Did,
    encoding::{keccak256, uint256_to_u128, AbiValue, EncodingError},
    service::{AgreementService, MetadataAttributes, Service, ServiceKind},
    types::Address,
};

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("Service with index {0} not found")]
    ServiceNotFound(u32),
    #[error("Service with index {0} is not an access or computing service")]
    NotAnAgreementService(u32),
    #[error("Document has no metadata service")]
    MissingMetadataService,
    #[error("Two services share index {0}")]
    DuplicateServiceIndex(u32),
    #[error("Document integrity check failed: {0}")]
    IntegrityMismatch(String),
    #[error("Document was signed by {recovered}, proof names {expected}")]
    SignerMismatch {
        expected: Address,
        recovered: Address,
    },
    #[error("Price {0} does not fit in 128 bits")]
    PriceOverflow(String),

    #[error(transparent)]
    Condition(#[from] ConditionError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Encoding(#[from] EncodingError),
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
}

/// Arguments of the reward fulfillment calls for one agreement service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BasicAssetInfo {
    pub asset_id: [u8; 32],
    pub price: u128,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKeyRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub key_type: String,
    pub owner: Address,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticationRecord {
    #[serde(rename = "type")]
    pub auth_type: String,
    pub public_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Proof {
    #[serde(rename = "type")]
    proof_type: String,
    #[serde(with = "time::serde::rfc3339")]
    created: OffsetDateTime,
    creator: Address,
    signature_value: RecoverableSignature,
    checksum: BTreeMap<String, String>,
}

impl Proof {
    pub fn proof_type(&self) -> &str {
        &self.proof_type
    }

    pub fn created(&self) -> OffsetDateTime {
        self.created
    }

    pub fn creator(&self) -> &Address {
        &self.creator
    }

    pub fn signature_value(&self) -> &RecoverableSignature {
        &self.signature_value
    }

    /// Service index → checksum.
    pub fn checksum(&self) -> &BTreeMap<String, String> {
        &self.checksum
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    #[serde(rename = "@context")]
    context: String,
    id: Did,
    #[serde(with = "time::serde::rfc3339")]
    created: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    updated: OffsetDateTime,
    public_key: Vec<PublicKeyRecord>,
    authentication: Vec<AuthenticationRecord>,
    service: Vec<Service>,
    proof: Proof,
}

impl Document {
    pub fn id(&self) -> &Did {
        &self.id
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    pub fn created(&self) -> OffsetDateTime {
        self.created
    }

    pub fn updated(&self) -> OffsetDateTime {
        self.updated
    }

    pub fn public_keys(&self) -> &[PublicKeyRecord] {
        &self.public_key
    }

    pub fn authentication(&self) -> &[AuthenticationRecord] {
        &self.authentication
    }

    /// Services, sorted by index.
    pub fn services(&self) -> &[Service] {
        &self.service
    }

    pub fn proof(&self) -> &Proof {
        &self.proof
    }

    /// The account that published and signed this document.
    pub fn publisher(&self) -> &Address {
        &self.proof.creator
    }

    pub fn service(&self, index: u32) -> Result<&Service, DocumentError> {
        self.service
            .iter()
            .find(|service| service.index == index)
            .ok_or(DocumentError::ServiceNotFound(index))
    }

    fn service_mut(&mut self, index: u32) -> Result<&mut Service, DocumentError> {
        self.service
            .iter_mut()
            .find(|service| service.index == index)
            .ok_or(DocumentError::ServiceNotFound(index))
    }

    pub fn metadata_service(&self) -> Result<&Service, DocumentError> {
        self.service
            .iter()
            .find(|service| matches!(service.kind, ServiceKind::Metadata { .. }))
            .ok_or(DocumentError::MissingMetadataService)
    }

    pub fn metadata(&self) -> Result<&MetadataAttributes, DocumentError> {
        match &self.metadata_service()?.kind {
            ServiceKind::Metadata { attributes } => Ok(attributes),
            _ => Err(DocumentError::MissingMetadataService),
        }
    }

    fn metadata_mut(&mut self) -> Result<&mut MetadataAttributes, DocumentError> {
        self.service
            .iter_mut()
            .find_map(|service| match &mut service.kind {
                ServiceKind::Metadata { attributes } => Some(attributes),
                _ => None,
            })
            .ok_or(DocumentError::MissingMetadataService)
    }

    /// The access or computing service at `index`.
    pub fn agreement_service(&self, index: u32) -> Result<AgreementService<'_>, DocumentError> {
        self.service(index)?
            .agreement()
            .ok_or(DocumentError::NotAnAgreementService(index))
    }

    pub fn authorization_service(&self) -> Option<&Service> {
        self.service
            .iter()
            .find(|service| matches!(service.kind, ServiceKind::Authorization { .. }))
    }

    /// Asset id and price as committed in the service's conditions.
    pub fn basic_asset_info(&self, index: u32) -> Result<BasicAssetInfo, DocumentError> {
        let agreement = self.agreement_service(index)?;
        let template = agreement.template();

        let amount = template.condition(LOCK_REWARD)?.parameter(AMOUNT)?;
        let price = match amount.typed_value()? {
            AbiValue::Uint256(value) => uint256_to_u128(&value)
                .ok_or_else(|| DocumentError::PriceOverflow(amount.value.clone()))?,
            other => {
                return Err(EncodingError::UnsupportedType(other.abi_type().to_string()).into())
            }
        };

        let document_id = template
            .condition(agreement.kind.release_condition())?
            .parameter(DOCUMENT_ID)?;
        let asset_id = match document_id.typed_value()? {
            AbiValue::Bytes32(bytes) => bytes,
            other => {
                return Err(EncodingError::UnsupportedType(other.abi_type().to_string()).into())
            }
        };

        Ok(BasicAssetInfo { asset_id, price })
    }

    /// Replace the conditions of an agreement service. Conditions are not
    /// covered by the service checksum, so the identifier is unaffected.
    pub fn set_agreement_conditions(
        &mut self,
        index: u32,
        conditions: Vec<Condition>,
    ) -> Result<(), DocumentError> {
        let attributes = self
            .service_mut(index)?
            .agreement_attributes_mut()
            .ok_or(DocumentError::NotAnAgreementService(index))?;
        attributes.service_agreement_template.conditions = conditions;
        self.updated = OffsetDateTime::now_utc();
        Ok(())
    }

    /// Attach the encrypted file list to the metadata service.
    pub fn set_encrypted_files(&mut self, encrypted_files: String) -> Result<(), DocumentError> {
        self.metadata_mut()?.encrypted_files = Some(encrypted_files);
        self.updated = OffsetDateTime::now_utc();
        Ok(())
    }

    /// Remove plaintext file URLs before the document is published.
    pub fn clean_file_urls(&mut self) -> Result<(), DocumentError> {
        let metadata = self.metadata_mut()?;
        metadata.main = metadata.main.without_urls();
        Ok(())
    }

    /// Check that the identifier is the hash of the sealed checksum map, that
    /// the map covers exactly this document's services, and that the proof was
    /// signed by its creator.
    pub fn verify_integrity(&self) -> Result<(), DocumentError> {
        let indexes: BTreeSet<String> = self
            .service
            .iter()
            .map(|service| service.index.to_string())
            .collect();
        let checksummed: BTreeSet<String> = self.proof.checksum.keys().cloned().collect();
        if indexes != checksummed {
            return Err(DocumentError::IntegrityMismatch(format!(
                "services {indexes:?} but checksums for {checksummed:?}"
            )));
        }

        let expected = Did::from_canonical_json(&serde_json::to_string(&self.proof.checksum)?);
        if expected != self.id {
            return Err(DocumentError::IntegrityMismatch(format!(
                "identifier {} does not match checksums ({expected})",
                self.id
            )));
        }

        let recovered = self
            .proof
            .signature_value
            .recover_signer(&keccak256(self.id.to_string()))?;
        if recovered != self.proof.creator {
            return Err(DocumentError::SignerMismatch {
                expected: self.proof.creator,
                recovered,
            });
        }
        Ok(())
    }
}

/// Collects services for a document that has not been sealed yet.
#[derive(Debug, Clone)]
pub struct DocumentBuilder {
    provisional_id: Did,
    services: Vec<Service>,
}

impl Default for DocumentBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentBuilder {
    /// Start a document under a random provisional identifier.
    pub fn new() -> Self {
        Self::with_provisional_id(Did::random())
    }

    pub fn with_provisional_id(provisional_id: Did) -> Self {
        Self {
            provisional_id,
            services: Vec::new(),
        }
    }

    /// The identifier checksums are computed under. Never the final id.
    pub fn provisional_id(&self) -> &Did {
        &self.provisional_id
    }

    pub fn add_service(mut self, service: Service) -> Self {
        self.services.push(service);
        self
    }

    /// Per-service checksums, keyed by the decimal service index.
    fn checksums(&self) -> Result<BTreeMap<String, String>, DocumentError> {
        let mut checksums = BTreeMap::new();
        for service in &self.services {
            let checksum = service.checksum(&self.provisional_id)?;
            if checksums.insert(service.index.to_string(), checksum).is_some() {
                return Err(DocumentError::DuplicateServiceIndex(service.index));
            }
        }
        Ok(checksums)
    }

    /// Seal the document: sort services, checksum them, derive the
    /// identifier from the checksum map and sign it with `credentials`.
    ///
    /// The result depends only on the services, the provisional id and the
    /// signing key; timestamps are recorded but never hashed.
    pub fn integrity_build(mut self, credentials: &Credentials) -> Result<Document, DocumentError> {
        self.services.sort_by_key(|service| service.index);

        let checksums = self.checksums()?;
        let id = Did::from_canonical_json(&serde_json::to_string(&checksums)?);
        debug!(%id, services = self.services.len(), "Computed document identifier");

        let signature = credentials.sign_message(id.to_string())?;
        let creator = credentials.address();
        let now = OffsetDateTime::now_utc();

        info!(%id, %creator, "Sealed document");
        Ok(Document {
            context: DID_CONTEXT.to_string(),
            id,
            created: now,
            updated: now,
            public_key: vec![PublicKeyRecord {
                id: id.to_string(),
                key_type: ETHEREUM_KEY_TYPE.to_string(),
                owner: creator,
            }],
            authentication: vec![AuthenticationRecord {
                auth_type: AUTHENTICATION_TYPE.to_string(),
                public_key: id.to_string(),
            }],
            service: self.services,
            proof: Proof {
                proof_type: INTEGRITY_PROOF_TYPE.to_string(),
                created: now,
                creator,
                signature_value: signature,
                checksum: checksums,
            },
        })
    }
}
