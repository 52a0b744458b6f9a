//! Condition templates of the escrow agreements.
//!
//! A template is a JSON list of conditions with `{parameter.*}` and
//! `{contract.*}` placeholders. Initializing a template substitutes the
//! placeholders for one asset and parses the result into [`Condition`]s,
//! which are read-only from then on.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strum::{Display, EnumString};
use thiserror::Error;

use crate::{
    constants::conditions::{ACCESS_SECRET_STORE, ESCROW_REWARD, EXEC_COMPUTE, LOCK_REWARD},
    did::Did,
    encoding::{AbiType, AbiValue, EncodingError},
    types::Address,
};

const ACCESS_TEMPLATE: &str = include_str!("../templates/access_conditions.json");
const COMPUTE_TEMPLATE: &str = include_str!("../templates/compute_conditions.json");

#[derive(Debug, Error)]
pub enum ConditionError {
    #[error("Condition {0} not found in template")]
    ConditionNotFound(String),
    #[error("Parameter {parameter} not found in condition {condition}")]
    ParameterNotFound { condition: String, parameter: String },
    #[error("Template placeholder {0} has no value")]
    UnresolvedPlaceholder(String),
    #[error("No condition contract registered at {0}")]
    UnknownConditionContract(Address),
    #[error("Invalid condition template: {0}")]
    Template(#[from] serde_json::Error),
    #[error(transparent)]
    Encoding(#[from] EncodingError),
}

/// The two agreement flavours. Both use the lock/release/escrow shape and
/// differ only in the release condition and the template contract.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AgreementKind {
    Access,
    Compute,
}

impl AgreementKind {
    fn template_source(&self) -> &'static str {
        match self {
            AgreementKind::Access => ACCESS_TEMPLATE,
            AgreementKind::Compute => COMPUTE_TEMPLATE,
        }
    }

    /// Name of the condition whose fulfillment grants the consumer access.
    pub fn release_condition(&self) -> &'static str {
        match self {
            AgreementKind::Access => ACCESS_SECRET_STORE,
            AgreementKind::Compute => EXEC_COMPUTE,
        }
    }

    /// Name of the on-chain agreement template contract.
    pub fn template_contract(&self) -> &'static str {
        match self {
            AgreementKind::Access => "EscrowAccessSecretStoreTemplate",
            AgreementKind::Compute => "EscrowComputeExecutionTemplate",
        }
    }

    /// Values substituted into the template's placeholders.
    pub fn initialize_conditions(
        &self,
        parameters: &TemplateParameters,
    ) -> Result<Vec<Condition>, ConditionError> {
        let mut source = self.template_source().to_string();
        for (name, value) in parameters.placeholders(*self) {
            source = source.replace(&format!("{{{name}}}"), &value);
        }
        if let Some(placeholder) = find_placeholder(&source) {
            return Err(ConditionError::UnresolvedPlaceholder(placeholder));
        }
        Ok(serde_json::from_str(&source)?)
    }

    /// A complete agreement template for these conditions.
    pub fn service_agreement_template(
        &self,
        conditions: Vec<Condition>,
    ) -> ServiceAgreementTemplate {
        let release = self.release_condition();
        let mut condition_dependency = BTreeMap::new();
        let _ = condition_dependency.insert(LOCK_REWARD.to_string(), Vec::new());
        let _ = condition_dependency.insert(release.to_string(), Vec::new());
        let _ = condition_dependency.insert(
            ESCROW_REWARD.to_string(),
            vec![LOCK_REWARD.to_string(), release.to_string()],
        );

        ServiceAgreementTemplate {
            contract_name: self.template_contract().to_string(),
            events: vec![ConditionEvent {
                name: "AgreementCreated".to_string(),
                actor_type: "consumer".to_string(),
                handler: EventHandler {
                    module_name: "escrowAccessSecretStoreTemplate".to_string(),
                    function_name: "fulfillLockRewardCondition".to_string(),
                    version: "0.1".to_string(),
                },
            }],
            fulfillment_order: vec![
                format!("{LOCK_REWARD}.fulfill"),
                format!("{release}.fulfill"),
                format!("{ESCROW_REWARD}.fulfill"),
            ],
            condition_dependency,
            conditions,
        }
    }
}

fn find_placeholder(source: &str) -> Option<String> {
    ["{parameter.", "{contract."].iter().find_map(|marker| {
        let start = source.find(marker)?;
        let end = source[start..].find('}').map_or(source.len(), |i| start + i + 1);
        Some(source[start..end].to_string())
    })
}

/// Per-asset values for [`AgreementKind::initialize_conditions`].
#[derive(Debug, Clone)]
pub struct TemplateParameters {
    pub did: Did,
    pub price: String,
    pub escrow_reward: Address,
    pub lock_reward: Address,
    pub release_condition: Address,
}

impl TemplateParameters {
    fn placeholders(&self, kind: AgreementKind) -> Vec<(&'static str, String)> {
        let release_contract = match kind {
            AgreementKind::Access => "contract.AccessSecretStoreCondition.address",
            AgreementKind::Compute => "contract.ComputeExecutionCondition.address",
        };
        vec![
            ("parameter.did", self.did.to_string()),
            ("parameter.assetId", self.did.hash_hex()),
            ("parameter.price", self.price.clone()),
            ("contract.EscrowReward.address", self.escrow_reward.to_string()),
            ("contract.LockRewardCondition.address", self.lock_reward.to_string()),
            (release_contract, self.release_condition.to_string()),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceAgreementTemplate {
    pub contract_name: String,
    #[serde(default)]
    pub events: Vec<ConditionEvent>,
    #[serde(default)]
    pub fulfillment_order: Vec<String>,
    #[serde(default)]
    pub condition_dependency: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl ServiceAgreementTemplate {
    /// Look up a condition by name, ignoring ASCII case.
    pub fn condition(&self, name: &str) -> Result<&Condition, ConditionError> {
        self.conditions
            .iter()
            .find(|condition| condition.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| ConditionError::ConditionNotFound(name.to_string()))
    }

    /// The longest condition timeout, used as the service timeout.
    pub fn max_timeout(&self) -> u64 {
        self.conditions
            .iter()
            .map(|condition| condition.timeout)
            .max()
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    pub name: String,
    pub timelock: u64,
    pub timeout: u64,
    pub contract_name: String,
    pub function_name: String,
    pub parameters: Vec<ConditionParameter>,
    #[serde(default)]
    pub events: Vec<ConditionEvent>,
}

impl Condition {
    pub fn parameter(&self, name: &str) -> Result<&ConditionParameter, ConditionError> {
        self.parameters
            .iter()
            .find(|parameter| parameter.name == name)
            .ok_or_else(|| ConditionError::ParameterNotFound {
                condition: self.name.clone(),
                parameter: name.to_string(),
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionParameter {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: String,
    pub value: String,
}

impl ConditionParameter {
    pub fn abi_type(&self) -> Result<AbiType, EncodingError> {
        AbiType::parse(&self.param_type)
    }

    /// The template's own value, typed.
    pub fn typed_value(&self) -> Result<AbiValue, EncodingError> {
        AbiValue::parse(self.abi_type()?, &self.value)
    }

    /// Encode `value` with this parameter's declared type.
    pub fn encode_value(&self, value: &str) -> Result<Vec<u8>, EncodingError> {
        Ok(AbiValue::parse(self.abi_type()?, value)?.encode())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionEvent {
    pub name: String,
    pub actor_type: String,
    pub handler: EventHandler,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventHandler {
    pub module_name: String,
    pub function_name: String,
    pub version: String,
}
