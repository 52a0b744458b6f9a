use data_escrow::types::{Address, AgreementId};
use std::time::Duration;
use tracing::{debug, warn};

use crate::chain::{event_topic, events, LogEntry, LogFilter, LogSubscription};

/// Logs of `Fulfilled` events for `agreement_id` emitted by the release
/// condition contract.
pub fn fulfilled_filter(release_contract: Address, agreement_id: &AgreementId) -> LogFilter {
    LogFilter::new(
        release_contract,
        vec![
            Some(event_topic(events::FULFILLED)),
            Some(*agreement_id.as_bytes()),
        ],
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FulfillmentOutcome {
    Fulfilled(LogEntry),
    TimedOut,
}

/// Wait for the first log on `subscription`, or for `timeout` to elapse,
/// whichever comes first. A subscription the chain closes early counts as
/// no event: the wait then runs until the timeout.
pub async fn wait_for_fulfillment(
    subscription: &mut LogSubscription,
    timeout: Duration,
) -> FulfillmentOutcome {
    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);

    let mut open = true;
    loop {
        tokio::select! {
            entry = subscription.next(), if open => match entry {
                Some(entry) => {
                    debug!(block = entry.block_number, "Received fulfillment event");
                    return FulfillmentOutcome::Fulfilled(entry);
                }
                None => {
                    warn!("Log subscription closed before the fulfillment event arrived");
                    open = false;
                }
            },
            _ = &mut deadline => return FulfillmentOutcome::TimedOut,
        }
    }
}
