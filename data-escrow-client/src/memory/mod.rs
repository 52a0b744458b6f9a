//! In-process implementations of the collaborator traits, for tests and
//! local development.

mod chain;
mod stores;

pub use chain::MemoryChain;
pub use stores::{MemoryCatalog, MemoryProvider, MemorySecretStore};
