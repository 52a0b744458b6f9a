//! States of a consumer purchase.
//!
//! ```text
//! Initiated -> TemplateApproved -> AgreementSubmitted -> PaymentLocked -+-> AccessGranted
//!                                                                       +-> Refunded
//! ```
//!
//! `AccessGranted` and `Refunded` are terminal. A flow leaves
//! `PaymentLocked` exactly once, so a purchase can never be both granted and
//! refunded.

use data_escrow::types::AgreementId;
use strum::Display;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StateError {
    #[error("Purchase is already {0}")]
    Terminal(PurchaseState),
    #[error("Purchase cannot move from {from} to {to}")]
    InvalidTransition {
        from: PurchaseState,
        to: PurchaseState,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum PurchaseState {
    Initiated,
    TemplateApproved,
    AgreementSubmitted,
    PaymentLocked,
    AccessGranted,
    Refunded,
}

impl PurchaseState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PurchaseState::AccessGranted | PurchaseState::Refunded)
    }

    fn can_advance_to(&self, next: PurchaseState) -> bool {
        use PurchaseState::*;
        matches!(
            (self, next),
            (Initiated, TemplateApproved)
                | (TemplateApproved, AgreementSubmitted)
                | (AgreementSubmitted, PaymentLocked)
                | (PaymentLocked, AccessGranted)
                | (PaymentLocked, Refunded)
        )
    }
}

/// Tracks the state of one purchase.
#[derive(Debug)]
pub struct PurchaseStateMachine {
    agreement_id: AgreementId,
    state: PurchaseState,
}

impl PurchaseStateMachine {
    pub fn new(agreement_id: AgreementId) -> Self {
        Self {
            agreement_id,
            state: PurchaseState::Initiated,
        }
    }

    pub fn state(&self) -> PurchaseState {
        self.state
    }

    pub fn advance(&mut self, next: PurchaseState) -> Result<PurchaseState, StateError> {
        if self.state.is_terminal() {
            return Err(StateError::Terminal(self.state));
        }
        if !self.state.can_advance_to(next) {
            return Err(StateError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        debug!(agreement_id = %self.agreement_id, from = %self.state, to = %next, "Purchase state changed");
        self.state = next;
        Ok(next)
    }
}
