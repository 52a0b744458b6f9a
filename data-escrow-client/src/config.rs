use data_escrow::{
    condition_ids::ConditionAddresses, conditions::AgreementKind, types::Address,
};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr};
use std::{
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};
use tracing::Level;

use crate::{DataEscrowClientError, Result};

/// Client configuration with all fields ready to use.
#[derive(Debug, Clone)]
pub struct Config {
    pub contracts: ContractsConfig,
    pub agreement: AgreementConfig,
    pub logging: LoggingConfig,
}

impl Config {
    pub fn from_file(config_path: impl AsRef<Path>) -> Result<Self> {
        let config_string = std::fs::read_to_string(&config_path)?;
        let config_file = ConfigFile::from_str(&config_string)?;
        Self::from_config_file(config_file)
    }

    pub fn from_config_file(config: ConfigFile) -> Result<Self> {
        config.contracts.validate()?;
        if config.agreement.creation_retries == 0 {
            return Err(DataEscrowClientError::InvalidConfig(
                "agreement.creation_retries must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            contracts: config.contracts,
            agreement: config.agreement,
            logging: config.logging,
        })
    }
}

/// Client configuration file format.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "snake_case")]
#[non_exhaustive]
pub struct ConfigFile {
    pub contracts: ContractsConfig,
    #[serde(default)]
    pub agreement: AgreementConfig,
    pub logging: LoggingConfig,
}

impl FromStr for ConfigFile {
    type Err = DataEscrowClientError;

    fn from_str(config_string: &str) -> Result<Self> {
        Ok(toml::from_str(config_string)?)
    }
}

/// Deployed contract addresses.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "snake_case")]
pub struct ContractsConfig {
    pub escrow_access_template: Address,
    pub escrow_compute_template: Address,
    pub lock_reward_condition: Address,
    pub access_secret_store_condition: Address,
    pub compute_execution_condition: Address,
    pub escrow_reward: Address,
    pub did_registry: Address,
    pub token: Address,
}

impl ContractsConfig {
    fn validate(&self) -> Result<()> {
        let named = [
            ("escrow_access_template", &self.escrow_access_template),
            ("escrow_compute_template", &self.escrow_compute_template),
            ("lock_reward_condition", &self.lock_reward_condition),
            (
                "access_secret_store_condition",
                &self.access_secret_store_condition,
            ),
            ("compute_execution_condition", &self.compute_execution_condition),
            ("escrow_reward", &self.escrow_reward),
            ("did_registry", &self.did_registry),
            ("token", &self.token),
        ];
        match named.iter().find(|(_, address)| address.is_zero()) {
            Some((name, _)) => Err(DataEscrowClientError::InvalidConfig(format!(
                "contracts.{name} is the zero address"
            ))),
            None => Ok(()),
        }
    }

    pub fn template(&self, kind: AgreementKind) -> Address {
        match kind {
            AgreementKind::Access => self.escrow_access_template,
            AgreementKind::Compute => self.escrow_compute_template,
        }
    }

    pub fn release_condition(&self, kind: AgreementKind) -> Address {
        match kind {
            AgreementKind::Access => self.access_secret_store_condition,
            AgreementKind::Compute => self.compute_execution_condition,
        }
    }

    /// Condition contracts an agreement of `kind` is bound to.
    pub fn condition_addresses(&self, kind: AgreementKind) -> ConditionAddresses {
        ConditionAddresses {
            lock_reward: self.lock_reward_condition,
            release_condition: self.release_condition(kind),
            escrow_reward: self.escrow_reward,
        }
    }

    /// The agreement kind whose template contract is deployed at `template`.
    pub fn kind_of_template(&self, template: &Address) -> Option<AgreementKind> {
        if *template == self.escrow_access_template {
            Some(AgreementKind::Access)
        } else if *template == self.escrow_compute_template {
            Some(AgreementKind::Compute)
        } else {
            None
        }
    }
}

/// Timing of the purchase flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "snake_case")]
pub struct AgreementConfig {
    /// How long to wait for the provider to grant access before refunding.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Number of times to check whether an agreement became visible after a
    /// failed creation receipt.
    pub creation_retries: u32,
    #[serde(with = "humantime_serde")]
    pub creation_retry_delay: Duration,
}

impl Default for AgreementConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            creation_retries: 5,
            creation_retry_delay: Duration::from_secs(2),
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "snake_case")]
pub struct LoggingConfig {
    #[serde_as(as = "DisplayFromStr")]
    pub stdout_log_level: Level,
    pub log_files: Option<LoggingFileConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "snake_case")]
pub struct LoggingFileConfig {
    pub all_logs_file_name: PathBuf,
    pub escrow_logs_file_name: PathBuf,
}
