//! Versioned persistent store: fork, commit, rollback and snapshots.

pub mod pmap;
#[allow(clippy::module_inception)]
mod transaction;
mod transaction_handle;

pub use pmap::PMap;
pub use transaction::{ForkOrigin, IndexEntries, Transaction};
pub use transaction_handle::TransactionHandle;
