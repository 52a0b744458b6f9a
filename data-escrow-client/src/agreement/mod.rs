//! Service agreements from the consumer's side: preparing and creating an
//! agreement, the full purchase flow, and reading agreement status.

pub mod events;
pub mod orchestrator;
pub mod state;
pub mod status;

use data_escrow::{
    condition_ids::{sign_agreement, ConditionIdDeriver, ConditionIds},
    conditions::AgreementKind,
    crypto::RecoverableSignature,
    did::Did,
    document::Document,
    types::{Address, AgreementId},
};
use tracing::{info, instrument};

use crate::{
    chain::ContractCall, config::ContractsConfig, logging::record_field, DataEscrowClientError,
    EscrowContext, Result,
};

pub use orchestrator::{AgreementOrchestrator, OrderResult};
pub use status::AgreementStatus;

/// Everything derived for one agreement before it goes on-chain.
#[derive(Debug, Clone)]
pub(crate) struct AgreementPlan {
    pub(crate) agreement_id: AgreementId,
    pub(crate) did: Did,
    pub(crate) kind: AgreementKind,
    pub(crate) template_id: Address,
    pub(crate) consumer: Address,
    pub(crate) publisher: Address,
    pub(crate) release_contract: Address,
    pub(crate) condition_ids: ConditionIds,
    pub(crate) timelocks: [u64; 3],
    pub(crate) timeouts: [u64; 3],
    pub(crate) agreement_hash: [u8; 32],
}

impl AgreementPlan {
    pub(crate) fn new(
        contracts: &ContractsConfig,
        document: &Document,
        service_index: u32,
        agreement_id: AgreementId,
        consumer: Address,
    ) -> Result<Self> {
        let service = document.agreement_service(service_index)?;
        let addresses = contracts.condition_addresses(service.kind);
        let deriver = ConditionIdDeriver::new(service);
        let condition_ids =
            deriver.derive(&agreement_id, &consumer, document.publisher(), &addresses)?;

        Ok(Self {
            agreement_id,
            did: *document.id(),
            kind: service.kind,
            template_id: *service.template_id,
            consumer,
            publisher: *document.publisher(),
            release_contract: addresses.release_condition,
            timelocks: deriver.timelocks()?,
            timeouts: deriver.timeouts()?,
            agreement_hash: deriver.agreement_hash(&agreement_id, &condition_ids)?,
            condition_ids,
        })
    }

    pub(crate) fn create_call(&self) -> ContractCall {
        ContractCall::CreateAgreement {
            template: self.template_id,
            agreement_id: self.agreement_id,
            did: self.did,
            condition_ids: self.condition_ids.ordered(),
            timelocks: self.timelocks,
            timeouts: self.timeouts,
            consumer: self.consumer,
        }
    }
}

impl EscrowContext {
    /// Pick a fresh agreement id for the service at `service_index` of `did`
    /// and sign the agreement hash as the consumer.
    ///
    /// The signature lets a provider create the agreement on the consumer's
    /// behalf.
    #[instrument(skip(self), err(Debug), fields(agreement_id))]
    pub async fn prepare_agreement(
        &self,
        did: &Did,
        service_index: u32,
    ) -> Result<(AgreementId, RecoverableSignature)> {
        let agreement_id = AgreementId::generate();
        record_field("agreement_id", &agreement_id);

        let document = self.resolve(did).await?;
        let plan = AgreementPlan::new(
            &self.config.contracts,
            &document,
            service_index,
            agreement_id,
            self.account(),
        )?;
        let signature = sign_agreement(&self.credentials, &plan.agreement_hash)?;
        Ok((agreement_id, signature))
    }

    /// Submit the agreement for `consumer` on-chain from this context's
    /// account. Returns whether the transaction succeeded.
    #[instrument(skip(self), err(Debug))]
    pub async fn create_agreement(
        &self,
        did: &Did,
        agreement_id: AgreementId,
        service_index: u32,
        consumer: Address,
    ) -> Result<bool> {
        let document = self.resolve(did).await?;
        let plan = AgreementPlan::new(
            &self.config.contracts,
            &document,
            service_index,
            agreement_id,
            consumer,
        )?;
        self.ensure_template_approved(&plan).await?;

        let receipt = self.chain.submit_transaction(plan.create_call()).await?;
        info!(status = receipt.is_success(), "Submitted agreement");
        Ok(receipt.is_success())
    }

    pub(crate) async fn ensure_template_approved(&self, plan: &AgreementPlan) -> Result<()> {
        if self.chain.is_template_approved(&plan.template_id).await? {
            Ok(())
        } else {
            Err(DataEscrowClientError::service_agreement(
                plan.agreement_id,
                format!("template {} is not approved", plan.template_id),
            ))
        }
    }
}
