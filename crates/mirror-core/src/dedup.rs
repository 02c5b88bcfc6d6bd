//! In-memory set of transaction hashes this process has already mirrored.
//!
//! Membership means "written at least once"; absence says nothing about
//! whether the record is still in the store. Entries only leave through
//! [`forget`](DuplicateSuppressionCache::forget) and
//! [`forget_batch`](DuplicateSuppressionCache::forget_batch), so hashes of
//! transactions that are never mined or removed stay for the life of the
//! process.

use alloy::primitives::B256;
use mirror_data::types::{parse_tx_key, TX_PREFIX};
use mirror_data::{MirrorBackend, MirrorResult};
use parking_lot::Mutex;
use std::collections::HashSet;

#[derive(Debug, Default)]
pub struct DuplicateSuppressionCache {
    seen: Mutex<HashSet<B256>>,
}

impl DuplicateSuppressionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, hash: &B256) -> bool {
        self.seen.lock().contains(hash)
    }

    /// Mark `hash` as seen. Returns `false` if it already was, which lets a
    /// writer claim a hash and skip duplicates in one step.
    pub fn mark_seen(&self, hash: B256) -> bool {
        self.seen.lock().insert(hash)
    }

    pub fn forget(&self, hash: &B256) {
        self.seen.lock().remove(hash);
    }

    pub fn forget_batch(&self, hashes: &[B256]) {
        let mut seen = self.seen.lock();
        for hash in hashes {
            seen.remove(hash);
        }
    }

    pub fn len(&self) -> usize {
        self.seen.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Mark every transaction record already in the store as seen.
    ///
    /// Keys that do not carry a well-formed 32-byte hash are ignored.
    ///
    /// # Errors
    /// Returns the store error if the prefix scan fails.
    #[tracing::instrument(skip_all)]
    pub async fn bootstrap(&self, backend: &dyn MirrorBackend) -> MirrorResult<usize> {
        let keys = backend.scan_prefix(TX_PREFIX).await?;
        let hashes: Vec<B256> = keys.iter().filter_map(|key| parse_tx_key(key)).collect();

        let mut seen = self.seen.lock();
        let before = seen.len();
        seen.extend(hashes);
        let loaded = seen.len() - before;
        drop(seen);

        tracing::info!(scanned = keys.len(), loaded, "bootstrapped duplicate cache");
        Ok(loaded)
    }
}
