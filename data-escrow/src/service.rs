//! Services offered by an asset document.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strum::Display;

use crate::{
    conditions::{AgreementKind, ServiceAgreementTemplate},
    did::Did,
    encoding::{bytes_to_hex, keccak256},
    types::Address,
};

/// One entry of a document's `service` list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub index: u32,
    pub service_endpoint: String,
    #[serde(flatten)]
    pub kind: ServiceKind,
}

/// Closed set of service kinds, tagged by `type` in JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServiceKind {
    Metadata {
        attributes: MetadataAttributes,
    },
    #[serde(rename_all = "camelCase")]
    Access {
        template_id: Address,
        attributes: AgreementAttributes,
    },
    #[serde(rename_all = "camelCase")]
    Computing {
        template_id: Address,
        attributes: AgreementAttributes,
    },
    Authorization {
        attributes: AuthorizationAttributes,
    },
    Provenance {
        attributes: ProvenanceAttributes,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum ServiceType {
    Metadata,
    Access,
    Computing,
    Authorization,
    Provenance,
}

/// Borrowed view of an access or computing service.
#[derive(Debug, Clone, Copy)]
pub struct AgreementService<'a> {
    pub index: u32,
    pub kind: AgreementKind,
    pub template_id: &'a Address,
    pub attributes: &'a AgreementAttributes,
}

impl<'a> AgreementService<'a> {
    pub fn template(&self) -> &'a ServiceAgreementTemplate {
        &self.attributes.service_agreement_template
    }
}

impl Service {
    pub fn service_type(&self) -> ServiceType {
        match self.kind {
            ServiceKind::Metadata { .. } => ServiceType::Metadata,
            ServiceKind::Access { .. } => ServiceType::Access,
            ServiceKind::Computing { .. } => ServiceType::Computing,
            ServiceKind::Authorization { .. } => ServiceType::Authorization,
            ServiceKind::Provenance { .. } => ServiceType::Provenance,
        }
    }

    /// The agreement view of this service, if it is one that can be
    /// purchased.
    pub fn agreement(&self) -> Option<AgreementService<'_>> {
        let (kind, template_id, attributes) = match &self.kind {
            ServiceKind::Access {
                template_id,
                attributes,
            } => (AgreementKind::Access, template_id, attributes),
            ServiceKind::Computing {
                template_id,
                attributes,
            } => (AgreementKind::Compute, template_id, attributes),
            ServiceKind::Metadata { .. }
            | ServiceKind::Authorization { .. }
            | ServiceKind::Provenance { .. } => return None,
        };
        Some(AgreementService {
            index: self.index,
            kind,
            template_id,
            attributes,
        })
    }

    pub(crate) fn agreement_attributes_mut(&mut self) -> Option<&mut AgreementAttributes> {
        match &mut self.kind {
            ServiceKind::Access { attributes, .. } | ServiceKind::Computing { attributes, .. } => {
                Some(attributes)
            }
            ServiceKind::Metadata { .. }
            | ServiceKind::Authorization { .. }
            | ServiceKind::Provenance { .. } => None,
        }
    }

    /// Integrity checksum of this service under identifier `did`, as
    /// `0x`-prefixed hex.
    ///
    /// Only the `main` attributes participate, so conditions initialized
    /// after sealing do not change the checksum.
    pub fn checksum(&self, did: &Did) -> Result<String, serde_json::Error> {
        let mut preimage = match &self.kind {
            ServiceKind::Metadata { attributes } => attributes.main.checksum_preimage(),
            ServiceKind::Access { attributes, .. } | ServiceKind::Computing { attributes, .. } => {
                serde_json::to_vec(&attributes.main)?
            }
            ServiceKind::Authorization { attributes } => serde_json::to_vec(&attributes.main)?,
            ServiceKind::Provenance { attributes } => serde_json::to_vec(&attributes.main)?,
        };
        preimage.extend_from_slice(did.to_string().as_bytes());
        Ok(bytes_to_hex(keccak256(preimage)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataAttributes {
    pub main: MetadataMain,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_files: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub additional_information: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataMain {
    pub name: String,
    #[serde(rename = "type")]
    pub asset_type: String,
    #[serde(default)]
    pub date_created: String,
    pub author: String,
    pub license: String,
    pub price: String,
    #[serde(default)]
    pub files: Vec<FileEntry>,
}

impl MetadataMain {
    fn checksum_preimage(&self) -> Vec<u8> {
        let mut preimage: Vec<u8> = self
            .files
            .iter()
            .flat_map(|file| file.checksum.as_deref().unwrap_or_default().bytes())
            .collect();
        preimage.extend_from_slice(self.name.as_bytes());
        preimage.extend_from_slice(self.author.as_bytes());
        preimage.extend_from_slice(self.license.as_bytes());
        preimage
    }

    /// The files with their URLs removed, as published after encryption.
    pub fn without_urls(&self) -> Self {
        let mut main = self.clone();
        main.files.iter_mut().for_each(|file| file.url = None);
        main
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    pub index: u32,
    pub content_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_length: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgreementAttributes {
    pub main: AgreementMain,
    pub service_agreement_template: ServiceAgreementTemplate,
    /// Execution environment offered by a computing service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgreementMain {
    pub name: String,
    pub creator: Address,
    pub price: String,
    pub timeout: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationAttributes {
    pub main: AuthorizationMain,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationMain {
    pub service: String,
    #[serde(default)]
    pub threshold: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvenanceAttributes {
    #[serde(default)]
    pub main: serde_json::Value,
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::conditions::AgreementKind;
    use serde_json::json;

    fn metadata() -> Service {
        Service {
            index: 0,
            service_endpoint: "http://catalog/{did}".to_string(),
            kind: ServiceKind::Metadata {
                attributes: MetadataAttributes {
                    main: MetadataMain {
                        name: "weather".to_string(),
                        asset_type: "dataset".to_string(),
                        date_created: "2019-02-08T08:13:49Z".to_string(),
                        author: "Met Office".to_string(),
                        license: "CC-BY".to_string(),
                        price: "10".to_string(),
                        files: vec![FileEntry {
                            index: 0,
                            content_type: "text/csv".to_string(),
                            checksum: Some("efb21".to_string()),
                            content_length: None,
                            url: Some("https://example.org/weather.csv".to_string()),
                        }],
                    },
                    encrypted_files: None,
                    additional_information: BTreeMap::new(),
                },
            },
        }
    }

    #[test]
    fn service_kind_is_tagged_by_type() -> anyhow::Result<()> {
        let service = Service {
            index: 4,
            service_endpoint: "http://catalog".to_string(),
            kind: ServiceKind::Provenance {
                attributes: ProvenanceAttributes { main: json!({}) },
            },
        };
        let value = serde_json::to_value(&service)?;
        assert_eq!(value["type"], "provenance");
        assert_eq!(value["index"], 4);
        assert_eq!(value["serviceEndpoint"], "http://catalog");

        let parsed: Service = serde_json::from_value(value)?;
        assert_eq!(parsed, service);
        Ok(())
    }

    #[test]
    fn access_service_parses_camel_case() -> anyhow::Result<()> {
        let value = json!({
            "type": "access",
            "index": 1,
            "serviceEndpoint": "http://provider/consume",
            "templateId": "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed",
            "attributes": {
                "main": {
                    "name": "dataAssetAccessServiceAgreement",
                    "creator": "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed",
                    "price": "10",
                    "timeout": 3600
                },
                "serviceAgreementTemplate": {
                    "contractName": "EscrowAccessSecretStoreTemplate",
                    "conditions": []
                }
            }
        });
        let service: Service = serde_json::from_value(value)?;
        let agreement = service.agreement().ok_or_else(|| anyhow::anyhow!("no agreement"))?;
        assert_eq!(agreement.kind, AgreementKind::Access);
        assert_eq!(agreement.attributes.main.timeout, 3600);
        assert_eq!(service.service_type().to_string(), "access");
        Ok(())
    }

    #[test]
    fn unknown_service_type_is_rejected() {
        let value = json!({
            "type": "streaming",
            "index": 9,
            "serviceEndpoint": "http://x",
            "attributes": {}
        });
        assert!(serde_json::from_value::<Service>(value).is_err());
    }

    #[test]
    fn metadata_checksum_depends_on_identifier() -> anyhow::Result<()> {
        let service = metadata();
        let first = service.checksum(&Did::from_hash([1; 32]))?;
        let second = service.checksum(&Did::from_hash([2; 32]))?;
        assert_ne!(first, second);
        assert_eq!(first, service.checksum(&Did::from_hash([1; 32]))?);
        assert!(first.starts_with("0x") && first.len() == 66);
        Ok(())
    }

    #[test]
    fn metadata_checksum_ignores_urls() -> anyhow::Result<()> {
        let service = metadata();
        let mut stripped = service.clone();
        if let ServiceKind::Metadata { attributes } = &mut stripped.kind {
            attributes.main = attributes.main.without_urls();
        }
        let did = Did::from_hash([1; 32]);
        assert_eq!(service.checksum(&did)?, stripped.checksum(&did)?);
        assert!(service.agreement().is_none());
        Ok(())
    }
}
