//! The chain collaborator: contract transactions, contract views and event
//! logs.
//!
//! The client never signs or encodes transactions itself. An implementation
//! of [`Chain`] wraps an RPC connection with an unlocked account and turns
//! each [`ContractCall`] into a transaction from that account.

use async_trait::async_trait;
use data_escrow::{
    did::Did,
    encoding::keccak256,
    types::{Address, AgreementId, ConditionId},
};
use futures::{stream::BoxStream, StreamExt};
use strum::{Display, EnumDiscriminants};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("Chain transport error: {0}")]
    Transport(String),
    #[error("Chain RPC error: {0}")]
    Rpc(String),
}

/// Event signatures emitted by the escrow contracts.
pub mod events {
    pub const FULFILLED: &str = "Fulfilled(bytes32,bytes32,address,bytes32)";
    pub const AGREEMENT_CREATED: &str =
        "AgreementCreated(bytes32,bytes32,address,address,uint256,uint256)";
    pub const DID_ATTRIBUTE_REGISTERED: &str =
        "DIDAttributeRegistered(bytes32,address,bytes32,string,address,uint256)";
}

/// First topic of a log emitted for the event with `signature`.
pub fn event_topic(signature: &str) -> [u8; 32] {
    keccak256(signature)
}

/// On-chain state of a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[repr(u8)]
pub enum ConditionState {
    Uninitialized = 0,
    Unfulfilled = 1,
    Fulfilled = 2,
    Aborted = 3,
}

/// A state-changing contract call.
#[derive(Debug, Clone, PartialEq, Eq, EnumDiscriminants)]
#[strum_discriminants(name(CallKind), derive(Hash, Display))]
pub enum ContractCall {
    /// Create an agreement on a template contract.
    CreateAgreement {
        template: Address,
        agreement_id: AgreementId,
        did: Did,
        /// Condition ids in (release, lock, escrow) order.
        condition_ids: [ConditionId; 3],
        timelocks: [u64; 3],
        timeouts: [u64; 3],
        consumer: Address,
    },
    /// Allow `spender` to move `amount` of the payment `token`.
    TokenApprove {
        token: Address,
        spender: Address,
        amount: u128,
    },
    FulfillLockReward {
        agreement_id: AgreementId,
        reward_address: Address,
        amount: u128,
    },
    FulfillEscrowReward {
        agreement_id: AgreementId,
        amount: u128,
        receiver: Address,
        sender: Address,
        lock_condition: ConditionId,
        release_condition: ConditionId,
    },
    RegisterDidAttribute {
        did: Did,
        checksum: [u8; 32],
        providers: Vec<Address>,
        value: String,
    },
}

impl ContractCall {
    pub fn kind(&self) -> CallKind {
        self.into()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionReceipt {
    pub status: bool,
    pub logs: Vec<LogEntry>,
}

impl TransactionReceipt {
    pub fn is_success(&self) -> bool {
        self.status
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub address: Address,
    pub topics: Vec<[u8; 32]>,
    pub data: Vec<u8>,
    pub block_number: u64,
}

/// Selects logs by emitting contract and topics. A `None` topic matches
/// anything; a missing block bound means earliest or latest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFilter {
    pub address: Address,
    pub topics: Vec<Option<[u8; 32]>>,
    pub from_block: Option<u64>,
    pub to_block: Option<u64>,
}

impl LogFilter {
    pub fn new(address: Address, topics: Vec<Option<[u8; 32]>>) -> Self {
        Self {
            address,
            topics,
            from_block: None,
            to_block: None,
        }
    }

    pub fn matches(&self, entry: &LogEntry) -> bool {
        entry.address == self.address
            && self.from_block.map_or(true, |from| entry.block_number >= from)
            && self.to_block.map_or(true, |to| entry.block_number <= to)
            && self.topics.iter().enumerate().all(|(i, topic)| match topic {
                None => true,
                Some(topic) => entry.topics.get(i) == Some(topic),
            })
    }
}

/// A live log subscription. Dropping it, or calling
/// [`unsubscribe`](Self::unsubscribe), cancels the subscription.
pub struct LogSubscription {
    stream: BoxStream<'static, LogEntry>,
    on_unsubscribe: Option<Box<dyn FnOnce() + Send>>,
}

impl LogSubscription {
    pub fn new(
        stream: BoxStream<'static, LogEntry>,
        on_unsubscribe: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            stream,
            on_unsubscribe: Some(Box::new(on_unsubscribe)),
        }
    }

    /// The next matching log, or `None` once the chain closes the
    /// subscription.
    pub async fn next(&mut self) -> Option<LogEntry> {
        self.stream.next().await
    }

    pub fn unsubscribe(mut self) {
        self.cancel();
    }

    fn cancel(&mut self) {
        if let Some(on_unsubscribe) = self.on_unsubscribe.take() {
            on_unsubscribe();
        }
    }
}

impl Drop for LogSubscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for LogSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogSubscription")
            .field("active", &self.on_unsubscribe.is_some())
            .finish()
    }
}

/// An agreement as stored by the agreement store contract. Agreements that
/// were never created read back with a zero template id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnChainAgreement {
    pub did_hash: [u8; 32],
    pub template_id: Address,
    pub condition_ids: Vec<ConditionId>,
    pub consumer: Address,
}

impl OnChainAgreement {
    pub fn missing() -> Self {
        Self {
            did_hash: [0; 32],
            template_id: Address::ZERO,
            condition_ids: Vec::new(),
            consumer: Address::ZERO,
        }
    }

    pub fn exists(&self) -> bool {
        !self.template_id.is_zero()
    }
}

/// A condition as stored by the condition store contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OnChainCondition {
    /// Contract that fulfills the condition.
    pub contract: Address,
    pub state: u8,
}

#[async_trait]
pub trait Chain: Send + Sync + 'static {
    /// The account transactions are sent from.
    fn account(&self) -> Address;

    /// Send a transaction and wait for its receipt. A reverted transaction
    /// is a receipt with `status == false`, not an error.
    async fn submit_transaction(&self, call: ContractCall)
        -> Result<TransactionReceipt, ChainError>;

    /// Historical logs matching `filter`.
    async fn query_logs(&self, filter: &LogFilter) -> Result<Vec<LogEntry>, ChainError>;

    /// Matching logs from `filter.from_block` onwards, followed by new ones
    /// as they are mined.
    async fn subscribe_logs(&self, filter: LogFilter) -> Result<LogSubscription, ChainError>;

    async fn is_template_approved(&self, template: &Address) -> Result<bool, ChainError>;

    async fn agreement(&self, agreement_id: &AgreementId) -> Result<OnChainAgreement, ChainError>;

    async fn condition(&self, condition_id: &ConditionId) -> Result<OnChainCondition, ChainError>;

    async fn token_balance(&self, owner: &Address) -> Result<u128, ChainError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    fn entry(topics: Vec<[u8; 32]>, block_number: u64) -> LogEntry {
        LogEntry {
            address: Address::from([1; 20]),
            topics,
            data: Vec::new(),
            block_number,
        }
    }

    #[test]
    fn filter_matches_positional_topics() {
        let fulfilled = event_topic(events::FULFILLED);
        let filter = LogFilter::new(Address::from([1; 20]), vec![Some(fulfilled), None, Some([7; 32])]);

        assert!(filter.matches(&entry(vec![fulfilled, [0; 32], [7; 32]], 1)));
        assert!(!filter.matches(&entry(vec![fulfilled, [0; 32], [8; 32]], 1)));
        assert!(!filter.matches(&entry(vec![fulfilled], 1)));

        let mut other_contract = entry(vec![fulfilled, [0; 32], [7; 32]], 1);
        other_contract.address = Address::from([2; 20]);
        assert!(!filter.matches(&other_contract));
    }

    #[test]
    fn filter_respects_block_range() {
        let mut filter = LogFilter::new(Address::from([1; 20]), Vec::new());
        filter.from_block = Some(5);
        filter.to_block = Some(9);
        assert!(!filter.matches(&entry(Vec::new(), 4)));
        assert!(filter.matches(&entry(Vec::new(), 5)));
        assert!(!filter.matches(&entry(Vec::new(), 10)));
    }

    #[test]
    fn event_topics_are_distinct() {
        assert_ne!(
            event_topic(events::FULFILLED),
            event_topic(events::DID_ATTRIBUTE_REGISTERED)
        );
        assert_eq!(event_topic(events::FULFILLED), keccak256(events::FULFILLED));
    }

    #[tokio::test]
    async fn subscription_cancels_once() {
        let cancelled = Arc::new(AtomicUsize::new(0));
        let counter = cancelled.clone();
        let subscription = LogSubscription::new(futures::stream::empty().boxed(), move || {
            let _ = counter.fetch_add(1, Ordering::SeqCst);
        });
        subscription.unsubscribe();
        assert_eq!(cancelled.load(Ordering::SeqCst), 1);

        let counter = cancelled.clone();
        let subscription = LogSubscription::new(futures::stream::empty().boxed(), move || {
            let _ = counter.fetch_add(1, Ordering::SeqCst);
        });
        drop(subscription);
        assert_eq!(cancelled.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn call_kind_names() {
        let call = ContractCall::TokenApprove {
            token: Address::from([2; 20]),
            spender: Address::from([1; 20]),
            amount: 10,
        };
        assert_eq!(call.kind(), CallKind::TokenApprove);
        assert_eq!(call.kind().to_string(), "TokenApprove");
    }
}
