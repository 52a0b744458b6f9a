//! Client engine of the data escrow marketplace.
//!
//! An [`EscrowContext`] bundles an account with its collaborators (chain,
//! metadata catalog, secret store and optionally a provider). Publishers
//! register assets through it; consumers purchase them with
//! [`EscrowContext::purchase_asset`], which creates the on-chain agreement,
//! locks the payment and either observes access being granted or refunds
//! the payment after the configured timeout.
#![warn(unused_results)]
#![warn(future_incompatible)]
#![warn(unused)]
#![forbid(rustdoc::broken_intra_doc_links)]

pub mod agreement;
pub mod assets;
pub mod catalog;
pub mod chain;
pub mod config;
pub mod context;
pub mod error;
pub mod logging;
pub mod memory;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::Config;
pub use context::EscrowContext;
pub use error::{DataEscrowClientError, OrderError, Result};
