//! The consumer purchase flow: create the agreement, lock the payment, wait
//! for the provider to fulfill the release condition and refund the payment
//! if it never does.

use data_escrow::{
    condition_ids::sign_agreement,
    did::Did,
    types::AgreementId,
};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::{
    agreement::{
        events::{fulfilled_filter, wait_for_fulfillment, FulfillmentOutcome},
        state::{PurchaseState, PurchaseStateMachine},
        AgreementPlan,
    },
    catalog::{InitializeAgreement, Provider, ProviderError},
    chain::ContractCall,
    error::OrderError,
    DataEscrowClientError, EscrowContext, Result,
};

/// Outcome of a purchase that ran to a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderResult {
    pub agreement_id: AgreementId,
    pub access_granted: bool,
    pub payment_refunded: bool,
}

/// Runs purchases against one [`EscrowContext`]. Each call to
/// [`purchase`](Self::purchase) is an independent flow with its own state,
/// so one orchestrator can drive several purchases concurrently.
#[derive(Debug, Clone, Copy)]
pub struct AgreementOrchestrator<'a> {
    context: &'a EscrowContext,
}

impl<'a> AgreementOrchestrator<'a> {
    pub fn new(context: &'a EscrowContext) -> Self {
        Self { context }
    }

    /// Purchase the service at `service_index` of `did` under a fresh
    /// agreement id.
    pub async fn purchase(
        &self,
        did: &Did,
        service_index: u32,
    ) -> std::result::Result<OrderResult, OrderError> {
        self.purchase_with_id(did, service_index, AgreementId::generate())
            .await
    }

    #[instrument(skip_all, err(Debug), fields(%did, %agreement_id, service_index))]
    pub async fn purchase_with_id(
        &self,
        did: &Did,
        service_index: u32,
        agreement_id: AgreementId,
    ) -> std::result::Result<OrderResult, OrderError> {
        self.run(did, service_index, agreement_id)
            .await
            .map_err(|e| OrderError::new(agreement_id, e))
    }

    async fn run(
        &self,
        did: &Did,
        service_index: u32,
        agreement_id: AgreementId,
    ) -> Result<OrderResult> {
        let context = self.context;
        let mut machine = PurchaseStateMachine::new(agreement_id);

        let document = context.resolve(did).await?;
        let plan = AgreementPlan::new(
            &context.config.contracts,
            &document,
            service_index,
            agreement_id,
            context.account(),
        )?;
        let price = document.basic_asset_info(service_index)?.price;
        info!(kind = %plan.kind, price = %price, "Starting purchase");

        context.ensure_template_approved(&plan).await?;
        let _ = machine.advance(PurchaseState::TemplateApproved)?;

        self.submit_agreement(&plan).await?;
        let _ = machine.advance(PurchaseState::AgreementSubmitted)?;

        self.lock_payment(&plan, price).await?;
        let _ = machine.advance(PurchaseState::PaymentLocked)?;

        if let Some(provider) = &context.provider {
            self.announce_to_provider(provider, &plan, service_index)
                .await?;
        }

        let mut subscription = context
            .chain
            .subscribe_logs(fulfilled_filter(plan.release_contract, &agreement_id))
            .await?;
        let outcome =
            wait_for_fulfillment(&mut subscription, context.config.agreement.timeout).await;
        subscription.unsubscribe();

        match outcome {
            FulfillmentOutcome::Fulfilled(_) => {
                let _ = machine.advance(PurchaseState::AccessGranted)?;
                info!("Access granted.");
                Ok(OrderResult {
                    agreement_id,
                    access_granted: true,
                    payment_refunded: false,
                })
            }
            FulfillmentOutcome::TimedOut => {
                warn!("Provider did not grant access in time. Refunding payment.");
                self.refund(&plan, price).await?;
                let _ = machine.advance(PurchaseState::Refunded)?;
                Ok(OrderResult {
                    agreement_id,
                    access_granted: false,
                    payment_refunded: true,
                })
            }
        }
    }

    /// Submit the agreement. A failed receipt is not final: the agreement
    /// may still appear on-chain, so poll for it before giving up.
    async fn submit_agreement(&self, plan: &AgreementPlan) -> Result<()> {
        let chain = &self.context.chain;
        let receipt = chain.submit_transaction(plan.create_call()).await?;
        if receipt.is_success() {
            debug!("Agreement created.");
            return Ok(());
        }

        warn!("Create agreement receipt failed. Waiting for the agreement to appear.");
        let config = &self.context.config.agreement;
        for attempt in 1..=config.creation_retries {
            tokio::time::sleep(config.creation_retry_delay).await;
            match chain.agreement(&plan.agreement_id).await {
                Ok(on_chain) if on_chain.exists() => {
                    info!(attempt, "Agreement is visible on-chain.");
                    return Ok(());
                }
                Ok(_) => debug!(attempt, "Agreement not visible yet."),
                Err(e) => warn!(attempt, error = ?e, "Agreement lookup failed."),
            }
        }

        Err(DataEscrowClientError::service_agreement(
            plan.agreement_id,
            "the create agreement transaction has failed",
        ))
    }

    async fn announce_to_provider(
        &self,
        provider: &Arc<dyn Provider>,
        plan: &AgreementPlan,
        service_index: u32,
    ) -> Result<()> {
        let request = InitializeAgreement {
            did: plan.did,
            service_agreement_id: plan.agreement_id,
            service_definition_id: service_index,
            signature: sign_agreement(&self.context.credentials, &plan.agreement_hash)?,
            consumer_address: plan.consumer,
        };

        match provider.initialize_agreement(request).await {
            Ok(()) => Ok(()),
            Err(ProviderError::Unauthorized(reason)) => {
                // The provider may have refused only because the agreement
                // already exists.
                if self.context.chain.agreement(&plan.agreement_id).await?.exists() {
                    warn!(%reason, "Provider refused the agreement, but it exists on-chain.");
                    Ok(())
                } else {
                    Err(DataEscrowClientError::service_agreement(
                        plan.agreement_id,
                        format!("provider refused the agreement: {reason}"),
                    ))
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn lock_payment(&self, plan: &AgreementPlan, price: u128) -> Result<()> {
        let chain = &self.context.chain;
        let contracts = &self.context.config.contracts;

        let approve = chain
            .submit_transaction(ContractCall::TokenApprove {
                token: contracts.token,
                spender: contracts.lock_reward_condition,
                amount: price,
            })
            .await?;
        if !approve.is_success() {
            return Err(DataEscrowClientError::TransactionFailed(
                "token approve".to_string(),
            ));
        }

        let balance = chain.token_balance(&plan.consumer).await?;
        if balance < price {
            return Err(DataEscrowClientError::InsufficientBalance { balance, price });
        }

        let lock = chain
            .submit_transaction(ContractCall::FulfillLockReward {
                agreement_id: plan.agreement_id,
                reward_address: contracts.escrow_reward,
                amount: price,
            })
            .await?;
        if !lock.is_success() {
            return Err(DataEscrowClientError::TransactionFailed(
                "lock reward".to_string(),
            ));
        }
        info!(price = %price, "Payment locked.");
        Ok(())
    }

    async fn refund(&self, plan: &AgreementPlan, price: u128) -> Result<()> {
        let call = ContractCall::FulfillEscrowReward {
            agreement_id: plan.agreement_id,
            amount: price,
            receiver: plan.publisher,
            sender: plan.consumer,
            lock_condition: plan.condition_ids.lock_reward,
            release_condition: plan.condition_ids.release,
        };
        match self.context.chain.submit_transaction(call).await {
            Ok(receipt) if receipt.is_success() => {
                info!("Payment refunded.");
                Ok(())
            }
            Ok(_) => Err(DataEscrowClientError::service_agreement(
                plan.agreement_id,
                "the refund transaction has failed",
            )),
            Err(e) => Err(DataEscrowClientError::service_agreement(
                plan.agreement_id,
                format!("the refund transaction has failed: {e}"),
            )),
        }
    }
}

impl EscrowContext {
    /// Run the full purchase flow for one service. See
    /// [`AgreementOrchestrator`].
    pub async fn purchase_asset(
        &self,
        did: &Did,
        service_index: u32,
    ) -> std::result::Result<OrderResult, OrderError> {
        AgreementOrchestrator::new(self)
            .purchase(did, service_index)
            .await
    }
}
