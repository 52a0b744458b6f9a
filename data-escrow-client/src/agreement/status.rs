use data_escrow::{
    conditions::ConditionError,
    constants::conditions::{ACCESS_SECRET_STORE, ESCROW_REWARD, EXEC_COMPUTE, LOCK_REWARD},
    types::{Address, AgreementId},
};
use std::collections::BTreeMap;
use tracing::instrument;

use crate::{config::ContractsConfig, DataEscrowClientError, EscrowContext, Result};

/// On-chain state of every condition of one agreement, keyed by condition
/// name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgreementStatus {
    pub agreement_id: AgreementId,
    pub conditions: BTreeMap<String, u8>,
}

impl AgreementStatus {
    pub fn condition(&self, name: &str) -> Option<u8> {
        self.conditions.get(name).copied()
    }
}

fn condition_name(
    contracts: &ContractsConfig,
    contract: &Address,
) -> std::result::Result<&'static str, ConditionError> {
    let known = [
        (contracts.lock_reward_condition, LOCK_REWARD),
        (contracts.access_secret_store_condition, ACCESS_SECRET_STORE),
        (contracts.compute_execution_condition, EXEC_COMPUTE),
        (contracts.escrow_reward, ESCROW_REWARD),
    ];
    known
        .iter()
        .find(|(address, _)| address == contract)
        .map(|(_, name)| *name)
        .ok_or(ConditionError::UnknownConditionContract(*contract))
}

impl EscrowContext {
    #[instrument(skip(self), err(Debug))]
    pub async fn agreement_status(&self, agreement_id: &AgreementId) -> Result<AgreementStatus> {
        let agreement = self.chain.agreement(agreement_id).await?;
        if !agreement.exists() {
            return Err(DataEscrowClientError::service_agreement(
                *agreement_id,
                "agreement does not exist on-chain",
            ));
        }

        let mut conditions = BTreeMap::new();
        for condition_id in &agreement.condition_ids {
            let condition = self.chain.condition(condition_id).await?;
            let name = condition_name(&self.config.contracts, &condition.contract)?;
            let _ = conditions.insert(name.to_string(), condition.state);
        }

        Ok(AgreementStatus {
            agreement_id: *agreement_id,
            conditions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{chain::ConditionState, test_support::{test_contracts, Marketplace}};
    use data_escrow::constants::service_index;

    #[test]
    fn condition_contracts_are_named() -> anyhow::Result<()> {
        let contracts = test_contracts();
        assert_eq!(
            condition_name(&contracts, &contracts.compute_execution_condition)?,
            EXEC_COMPUTE
        );
        assert!(matches!(
            condition_name(&contracts, &Address::from([0xab; 20])),
            Err(ConditionError::UnknownConditionContract(_))
        ));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn status_follows_the_purchase() -> anyhow::Result<()> {
        let market = Marketplace::new(10).await?;
        market.chain.grant_access_on_lock(true).await;
        let result = market
            .consumer
            .purchase_asset(market.document.id(), service_index::ACCESS)
            .await?;

        let status = market.consumer.agreement_status(&result.agreement_id).await?;
        assert_eq!(status.conditions.len(), 3);
        assert_eq!(
            status.condition(LOCK_REWARD),
            Some(ConditionState::Fulfilled as u8)
        );
        assert_eq!(
            status.condition(ACCESS_SECRET_STORE),
            Some(ConditionState::Fulfilled as u8)
        );
        assert_eq!(
            status.condition(ESCROW_REWARD),
            Some(ConditionState::Unfulfilled as u8)
        );
        Ok(())
    }

    #[tokio::test]
    async fn unknown_agreement_has_no_status() -> anyhow::Result<()> {
        let market = Marketplace::new(10).await?;
        let result = market
            .consumer
            .agreement_status(&AgreementId::from([0x5a; 32]))
            .await;
        assert!(matches!(
            result,
            Err(DataEscrowClientError::ServiceAgreement { .. })
        ));
        Ok(())
    }
}
