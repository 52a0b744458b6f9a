//! Protocol primitives shared by every participant of the data escrow
//! marketplace: the packed ABI codec, Ethereum-style signing, asset
//! identifiers, the signed asset document, condition templates and the
//! condition-ID hash chain.
//!
//! ⚠️ __Usage__: This crate is designed as a dependency of
//! `data-escrow-client`. It performs no I/O and talks to no chain; anything
//! that needs a network lives in the client crate.
#![warn(unused_results)]
#![warn(future_incompatible)]
#![warn(unused)]
#![forbid(rustdoc::broken_intra_doc_links)]

pub mod condition_ids;
pub mod conditions;
pub mod constants;
pub mod crypto;
pub mod did;
pub mod document;
pub mod encoding;
pub mod error;
pub mod service;
pub mod types;

pub use error::DataEscrowError;
