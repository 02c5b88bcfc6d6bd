//! mirror-core: write-behind mirroring of pending transactions and recent
//! blocks into a key-value store.
//!
//! [`ChainMirror`] is the entry point for a host node. It wires a
//! [`TransactionMirror`] and a [`BlockMirror`] around one shared
//! [`BlockHeightCache`].

pub mod block_mirror;
pub mod chain;
pub mod dedup;
pub mod height;
pub mod metrics;
pub mod summary;
pub mod tx_mirror;

#[cfg(test)]
mod test_support;

pub use block_mirror::{BlockMirror, BlockStats, BlockWrite};
pub use chain::{ChainMirror, ChainStats, ReorgOutcome};
pub use dedup::DuplicateSuppressionCache;
pub use height::BlockHeightCache;
pub use metrics::MirrorMetrics;
pub use tx_mirror::{MirrorStats, TransactionMirror};
