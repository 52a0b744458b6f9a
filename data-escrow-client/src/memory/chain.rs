use async_trait::async_trait;
use data_escrow::{
    did::Did,
    types::{Address, AgreementId, ConditionId},
};
use futures::StreamExt;
use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, PoisonError,
    },
};
use tokio::sync::{mpsc, Mutex};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info};

use crate::{
    chain::{
        event_topic, events, CallKind, Chain, ChainError, ConditionState, ContractCall, LogEntry,
        LogFilter, LogSubscription, OnChainAgreement, OnChainCondition, TransactionReceipt,
    },
    config::ContractsConfig,
};

/// A single-process ledger implementing the escrow contracts. Every clone
/// made with [`MemoryChain::for_account`] shares the ledger but sends
/// transactions from its own account.
#[derive(Clone)]
pub struct MemoryChain {
    account: Address,
    contracts: Arc<ContractsConfig>,
    ledger: Arc<Mutex<Ledger>>,
    subscribers: Arc<std::sync::Mutex<Subscribers>>,
    unsubscribed: Arc<AtomicUsize>,
}

/// Live log subscriptions keyed by id. A cancelled subscription removes its
/// own entry.
#[derive(Default)]
struct Subscribers {
    next_id: u64,
    live: HashMap<u64, (LogFilter, mpsc::UnboundedSender<LogEntry>)>,
}

impl Subscribers {
    fn register(&mut self, filter: LogFilter, sender: mpsc::UnboundedSender<LogEntry>) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        let _ = self.live.insert(id, (filter, sender));
        id
    }

    /// Send every matching entry and drop subscribers whose receiver is gone.
    fn broadcast(&mut self, entries: &[LogEntry]) {
        self.live.retain(|_, (filter, sender)| {
            !sender.is_closed()
                && entries
                    .iter()
                    .filter(|entry| filter.matches(entry))
                    .all(|entry| sender.send(entry.clone()).is_ok())
        });
    }
}

#[derive(Default)]
struct Ledger {
    block_number: u64,
    approved_templates: HashSet<Address>,
    agreements: HashMap<AgreementId, OnChainAgreement>,
    conditions: HashMap<ConditionId, OnChainCondition>,
    balances: HashMap<Address, u128>,
    /// Allowances keyed by (owner, spender).
    allowances: HashMap<(Address, Address), u128>,
    did_owners: HashMap<Did, Address>,
    calls: Vec<(Address, ContractCall)>,
    logs: Vec<LogEntry>,
    failing_calls: HashSet<CallKind>,
    grant_access_on_lock: bool,
    /// Lookups a newly created agreement stays invisible for.
    visibility_lag: u32,
    hidden_agreements: HashMap<AgreementId, u32>,
    failing_lookups: u32,
}

impl MemoryChain {
    pub fn new(contracts: ContractsConfig, account: Address) -> Self {
        Self {
            account,
            contracts: Arc::new(contracts),
            ledger: Arc::new(Mutex::new(Ledger::default())),
            subscribers: Arc::default(),
            unsubscribed: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A handle on the same ledger that transacts as `account`.
    pub fn for_account(&self, account: Address) -> Self {
        Self {
            account,
            ..self.clone()
        }
    }

    pub async fn approve_template(&self, template: Address) {
        let _ = self.ledger.lock().await.approved_templates.insert(template);
    }

    pub async fn revoke_template(&self, template: Address) {
        let _ = self.ledger.lock().await.approved_templates.remove(&template);
    }

    pub async fn set_balance(&self, owner: Address, amount: u128) {
        let _ = self.ledger.lock().await.balances.insert(owner, amount);
    }

    /// Make every future call of `kind` revert.
    pub async fn fail_calls(&self, kind: CallKind) {
        let _ = self.ledger.lock().await.failing_calls.insert(kind);
    }

    /// Fulfill the release condition as soon as the lock is paid, the way a
    /// well-behaved provider would.
    pub async fn grant_access_on_lock(&self, enabled: bool) {
        self.ledger.lock().await.grant_access_on_lock = enabled;
    }

    /// Report agreement creation as failed and hide new agreements for
    /// `lookups` reads, as a lagging node would.
    pub async fn set_agreement_visibility_lag(&self, lookups: u32) {
        self.ledger.lock().await.visibility_lag = lookups;
    }

    /// Fail the next `count` agreement reads with a transport error.
    pub async fn fail_agreement_lookups(&self, count: u32) {
        self.ledger.lock().await.failing_lookups = count;
    }

    /// Append a log as if a contract had emitted it.
    pub async fn emit_log(&self, address: Address, topics: Vec<[u8; 32]>, data: Vec<u8>) {
        let mut ledger = self.ledger.lock().await;
        ledger.block_number += 1;
        let first_log = ledger.logs.len();
        ledger.emit(address, topics, data);
        self.broadcast(&ledger.logs[first_log..]);
    }

    /// Every submitted call with the account that sent it, reverted ones
    /// included.
    pub async fn submitted_calls(&self) -> Vec<(Address, ContractCall)> {
        self.ledger.lock().await.calls.clone()
    }

    /// Number of subscriptions that have been cancelled.
    pub fn unsubscribed(&self) -> usize {
        self.unsubscribed.load(Ordering::SeqCst)
    }

    /// Number of subscriptions still registered with the ledger.
    pub fn live_subscriptions(&self) -> usize {
        self.subscribers().live.len()
    }

    fn subscribers(&self) -> std::sync::MutexGuard<'_, Subscribers> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Callers hold the ledger lock, which orders broadcasts against the
    /// history replay in `subscribe_logs`.
    fn broadcast(&self, entries: &[LogEntry]) {
        if !entries.is_empty() {
            self.subscribers().broadcast(entries);
        }
    }
}

impl Ledger {
    fn emit(&mut self, address: Address, topics: Vec<[u8; 32]>, data: Vec<u8>) {
        let entry = LogEntry {
            address,
            topics,
            data,
            block_number: self.block_number,
        };
        self.logs.push(entry);
    }

    fn balance(&self, owner: &Address) -> u128 {
        self.balances.get(owner).copied().unwrap_or_default()
    }

    fn credit(&mut self, owner: Address, amount: u128) {
        let balance = self.balances.entry(owner).or_default();
        *balance = balance.saturating_add(amount);
    }

    fn condition_state(&self, condition_id: &ConditionId) -> Option<ConditionState> {
        self.conditions.get(condition_id).map(|condition| match condition.state {
            1 => ConditionState::Unfulfilled,
            2 => ConditionState::Fulfilled,
            3 => ConditionState::Aborted,
            _ => ConditionState::Uninitialized,
        })
    }

    fn fulfill(
        &mut self,
        condition_id: ConditionId,
        agreement_id: &AgreementId,
        indexed: Address,
        data: Vec<u8>,
    ) {
        let Some(condition) = self.conditions.get_mut(&condition_id) else {
            return;
        };
        condition.state = ConditionState::Fulfilled as u8;
        let contract = condition.contract;

        let mut data = data;
        data.extend_from_slice(condition_id.as_bytes());
        self.emit(
            contract,
            vec![
                event_topic(events::FULFILLED),
                *agreement_id.as_bytes(),
                indexed.to_topic(),
            ],
            data,
        );
    }

    /// Apply `call` sent by `sender`. Returns whether the transaction
    /// succeeded.
    fn apply(&mut self, contracts: &ContractsConfig, sender: Address, call: &ContractCall) -> bool {
        if self.failing_calls.contains(&call.kind()) {
            return false;
        }

        match call {
            ContractCall::CreateAgreement {
                template,
                agreement_id,
                did,
                condition_ids,
                consumer,
                ..
            } => {
                let Some(kind) = contracts.kind_of_template(template) else {
                    return false;
                };
                if !self.approved_templates.contains(template)
                    || self.agreements.contains_key(agreement_id)
                {
                    return false;
                }

                let [release, lock, escrow] = *condition_ids;
                for (condition_id, contract) in [
                    (release, contracts.release_condition(kind)),
                    (lock, contracts.lock_reward_condition),
                    (escrow, contracts.escrow_reward),
                ] {
                    let _ = self.conditions.insert(
                        condition_id,
                        OnChainCondition {
                            contract,
                            state: ConditionState::Unfulfilled as u8,
                        },
                    );
                }
                let _ = self.agreements.insert(
                    *agreement_id,
                    OnChainAgreement {
                        did_hash: *did.hash(),
                        template_id: *template,
                        condition_ids: condition_ids.to_vec(),
                        consumer: *consumer,
                    },
                );
                self.emit(
                    *template,
                    vec![
                        event_topic(events::AGREEMENT_CREATED),
                        *agreement_id.as_bytes(),
                        *did.hash(),
                    ],
                    Vec::new(),
                );

                if self.visibility_lag > 0 {
                    let _ = self
                        .hidden_agreements
                        .insert(*agreement_id, self.visibility_lag);
                    return false;
                }
                true
            }

            ContractCall::TokenApprove {
                token,
                spender,
                amount,
            } => {
                if *token != contracts.token {
                    return false;
                }
                let _ = self.allowances.insert((sender, *spender), *amount);
                true
            }

            ContractCall::FulfillLockReward {
                agreement_id,
                reward_address,
                amount,
            } => {
                let Some(agreement) = self.agreements.get(agreement_id).cloned() else {
                    return false;
                };
                let allowance_key = (sender, contracts.lock_reward_condition);
                let allowance = self.allowances.get(&allowance_key).copied().unwrap_or_default();
                let balance = self.balance(&sender);
                if allowance < *amount || balance < *amount {
                    return false;
                }

                let _ = self.allowances.insert(allowance_key, allowance - amount);
                let _ = self.balances.insert(sender, balance - amount);
                self.credit(*reward_address, *amount);
                self.fulfill(agreement.condition_ids[1], agreement_id, sender, Vec::new());

                if self.grant_access_on_lock {
                    self.fulfill(
                        agreement.condition_ids[0],
                        agreement_id,
                        agreement.consumer,
                        agreement.did_hash.to_vec(),
                    );
                }
                true
            }

            ContractCall::FulfillEscrowReward {
                agreement_id,
                amount,
                receiver,
                sender: payer,
                lock_condition,
                release_condition,
            } => {
                let Some(agreement) = self.agreements.get(agreement_id).cloned() else {
                    return false;
                };
                let escrow_condition = agreement.condition_ids[2];
                if self.condition_state(lock_condition) != Some(ConditionState::Fulfilled)
                    || self.condition_state(&escrow_condition) != Some(ConditionState::Unfulfilled)
                    || self.balance(&contracts.escrow_reward) < *amount
                {
                    return false;
                }

                let recipient =
                    if self.condition_state(release_condition) == Some(ConditionState::Fulfilled) {
                        *receiver
                    } else {
                        *payer
                    };
                let escrow_balance = self.balance(&contracts.escrow_reward);
                let _ = self
                    .balances
                    .insert(contracts.escrow_reward, escrow_balance - amount);
                self.credit(recipient, *amount);
                self.fulfill(escrow_condition, agreement_id, recipient, Vec::new());
                true
            }

            ContractCall::RegisterDidAttribute {
                did,
                checksum,
                value,
                ..
            } => {
                if let Some(owner) = self.did_owners.get(did) {
                    if *owner != sender {
                        return false;
                    }
                }
                let _ = self.did_owners.insert(*did, sender);
                self.emit(
                    contracts.did_registry,
                    vec![
                        event_topic(events::DID_ATTRIBUTE_REGISTERED),
                        *did.hash(),
                        sender.to_topic(),
                        *checksum,
                    ],
                    value.as_bytes().to_vec(),
                );
                true
            }
        }
    }
}

#[async_trait]
impl Chain for MemoryChain {
    fn account(&self) -> Address {
        self.account
    }

    async fn submit_transaction(
        &self,
        call: ContractCall,
    ) -> Result<TransactionReceipt, ChainError> {
        let mut ledger = self.ledger.lock().await;
        ledger.block_number += 1;
        let first_log = ledger.logs.len();

        let status = ledger.apply(&self.contracts, self.account, &call);
        self.broadcast(&ledger.logs[first_log..]);
        let logs = if status {
            ledger.logs[first_log..].to_vec()
        } else {
            Vec::new()
        };
        debug!(kind = %call.kind(), sender = %self.account, status, "Applied transaction");
        ledger.calls.push((self.account, call));

        Ok(TransactionReceipt { status, logs })
    }

    async fn query_logs(&self, filter: &LogFilter) -> Result<Vec<LogEntry>, ChainError> {
        let ledger = self.ledger.lock().await;
        Ok(ledger
            .logs
            .iter()
            .filter(|entry| filter.matches(entry))
            .cloned()
            .collect())
    }

    async fn subscribe_logs(&self, filter: LogFilter) -> Result<LogSubscription, ChainError> {
        let mut ledger = self.ledger.lock().await;
        let (sender, receiver) = mpsc::unbounded_channel();
        for entry in ledger.logs.iter().filter(|entry| filter.matches(entry)) {
            // The receiver is still in scope.
            let _ = sender.send(entry.clone());
        }
        let id = self.subscribers().register(filter, sender);

        let subscribers = self.subscribers.clone();
        let unsubscribed = self.unsubscribed.clone();
        Ok(LogSubscription::new(
            UnboundedReceiverStream::new(receiver).boxed(),
            move || {
                let _ = subscribers
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .live
                    .remove(&id);
                let _ = unsubscribed.fetch_add(1, Ordering::SeqCst);
                info!("Log subscription cancelled.");
            },
        ))
    }

    async fn is_template_approved(&self, template: &Address) -> Result<bool, ChainError> {
        Ok(self
            .ledger
            .lock()
            .await
            .approved_templates
            .contains(template))
    }

    async fn agreement(&self, agreement_id: &AgreementId) -> Result<OnChainAgreement, ChainError> {
        let mut ledger = self.ledger.lock().await;
        if ledger.failing_lookups > 0 {
            ledger.failing_lookups -= 1;
            return Err(ChainError::Transport("connection reset".to_string()));
        }
        if let Some(remaining) = ledger.hidden_agreements.get_mut(agreement_id) {
            if *remaining > 0 {
                *remaining -= 1;
                return Ok(OnChainAgreement::missing());
            }
        }
        Ok(ledger
            .agreements
            .get(agreement_id)
            .cloned()
            .unwrap_or_else(OnChainAgreement::missing))
    }

    async fn condition(&self, condition_id: &ConditionId) -> Result<OnChainCondition, ChainError> {
        Ok(self
            .ledger
            .lock()
            .await
            .conditions
            .get(condition_id)
            .copied()
            .unwrap_or(OnChainCondition {
                contract: Address::ZERO,
                state: ConditionState::Uninitialized as u8,
            }))
    }

    async fn token_balance(&self, owner: &Address) -> Result<u128, ChainError> {
        Ok(self.ledger.lock().await.balance(owner))
    }
}
