//! Last observed chain height, shared by the block and transaction paths.

use parking_lot::RwLock;

/// Monotonic maximum of every height reported so far.
///
/// Readers (transaction writers stamping records) share the lock; only the
/// block path takes it exclusively.
#[derive(Debug, Default)]
pub struct BlockHeightCache {
    current: RwLock<u64>,
}

impl BlockHeightCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> u64 {
        *self.current.read()
    }

    /// Raise the cached height to `number` if it is higher. Returns whether
    /// the value changed.
    pub fn update_if_greater(&self, number: u64) -> bool {
        if number <= *self.current.read() {
            return false;
        }
        let mut current = self.current.write();
        if number > *current {
            *current = number;
            tracing::debug!(number, "updated current chain height");
            true
        } else {
            false
        }
    }
}
