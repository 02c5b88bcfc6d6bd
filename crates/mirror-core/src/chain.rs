//! Adapter from host chain notifications to the mirrors.
//!
//! Every handler swallows mirror failures after logging them: the mirror is
//! a best-effort index and must never abort block import or transaction
//! admission.

use alloy::consensus::TxEnvelope;
use alloy::primitives::B256;
use alloy::rpc::types::Log;
use mirror_data::{CanonicalBlock, MirrorConfig, MirrorResult, RedisBackend, SharedBackend};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;

use crate::block_mirror::{BlockMirror, BlockStats};
use crate::height::BlockHeightCache;
use crate::metrics::MirrorMetrics;
use crate::tx_mirror::{MirrorStats, TransactionMirror};

/// Counters of both mirrors, as reported by [`ChainMirror::stats`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ChainStats {
    pub transactions: MirrorStats,
    pub blocks: BlockStats,
}

/// What [`ChainMirror::on_reorg`] did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReorgOutcome {
    /// New canonical hashes removed from the pending mirror.
    pub removed: usize,
    /// Orphaned transactions mirrored as pending again.
    pub readmitted: usize,
}

#[derive(Debug)]
pub struct ChainMirror {
    txs: Arc<TransactionMirror>,
    blocks: BlockMirror,
    height: Arc<BlockHeightCache>,
}

impl ChainMirror {
    /// Connect to the configured Redis server and start the mirrors.
    ///
    /// # Errors
    /// Returns `Disabled` for a disabled config, `Connection` if the server
    /// does not answer, or `InvalidConfig`.
    pub async fn connect(config: &MirrorConfig) -> MirrorResult<Self> {
        let backend = RedisBackend::connect(config).await?;
        Self::with_backend(Arc::new(backend), config).await
    }

    /// Like [`connect`](Self::connect), but logs the failure and returns
    /// `None` so the host can carry on without a mirror.
    pub async fn connect_or_disable(config: &MirrorConfig) -> Option<Self> {
        match Self::connect(config).await {
            Ok(mirror) => Some(mirror),
            Err(err) if err.is_unavailable() => {
                tracing::warn!(%err, url = %config.url, "chain mirror unavailable, continuing without it");
                None
            }
            Err(err) => {
                tracing::error!(%err, url = %config.url, "chain mirror misconfigured, continuing without it");
                None
            }
        }
    }

    /// Start the mirrors on an existing store handle.
    ///
    /// # Errors
    /// Returns `InvalidConfig`, or `Connection` if the store does not answer.
    pub async fn with_backend(backend: SharedBackend, config: &MirrorConfig) -> MirrorResult<Self> {
        Self::with_metrics(backend, config, None).await
    }

    /// Like [`with_backend`](Self::with_backend), recording store latencies,
    /// queue depth and failures into `metrics`.
    ///
    /// # Errors
    /// Same as [`with_backend`](Self::with_backend).
    pub async fn with_metrics(
        backend: SharedBackend,
        config: &MirrorConfig,
        metrics: Option<MirrorMetrics>,
    ) -> MirrorResult<Self> {
        let height = Arc::new(BlockHeightCache::new());
        let txs = TransactionMirror::with_metrics(
            Arc::clone(&backend),
            Arc::clone(&height),
            config,
            metrics.clone(),
        )?;
        let blocks = BlockMirror::with_metrics(backend, Arc::clone(&height), config, metrics)?;
        txs.init().await?;

        Ok(Self {
            txs: Arc::new(txs),
            blocks,
            height,
        })
    }

    /// Mirror a new canonical block, then drop its transactions from the
    /// pending mirror.
    pub async fn on_new_canonical_block(&self, block: &CanonicalBlock, logs: &[Log]) {
        if let Err(err) = self.blocks.store_block(block, logs).await {
            tracing::error!(number = block.number, %err, "failed to mirror block");
        }
        if let Err(err) = self.txs.remove_txs(&block.tx_hashes()).await {
            tracing::error!(number = block.number, %err, "failed to remove mined transactions");
        }
    }

    pub async fn on_transaction_admitted(&self, tx: &TxEnvelope) {
        if let Err(err) = self.txs.store_tx(tx).await {
            tracing::error!(hash = %tx.tx_hash(), %err, "failed to mirror transaction");
        }
    }

    pub async fn on_transaction_mined(
        &self,
        hash: &B256,
        block_hash: &B256,
        block_number: u64,
        tx_index: u64,
        status: u64,
    ) {
        if let Err(err) = self
            .txs
            .update_tx_status(hash, block_hash, block_number, tx_index, status)
            .await
        {
            tracing::error!(hash = %hash, %err, "failed to update transaction status");
        }
    }

    /// Reconcile the pending mirror after a reorg.
    ///
    /// Every transaction of the new canonical branch is removed first. Only
    /// then are the orphans (in `old_txs` but not in `new_txs`) re-admitted,
    /// so a hash on both branches always ends up removed.
    #[tracing::instrument(skip_all, fields(old = old_txs.len(), new = new_txs.len()))]
    pub async fn on_reorg(&self, old_txs: &[TxEnvelope], new_txs: &[TxEnvelope]) -> ReorgOutcome {
        let new_hashes: Vec<B256> = new_txs.iter().map(|tx| *tx.tx_hash()).collect();
        let canonical: HashSet<B256> = new_hashes.iter().copied().collect();
        let mut outcome = ReorgOutcome::default();

        match self.txs.remove_txs(&new_hashes).await {
            Ok(()) => outcome.removed = new_hashes.len(),
            Err(err) => tracing::error!(%err, "failed to remove reorged-in transactions"),
        }

        let mut seen = HashSet::new();
        for tx in old_txs {
            let hash = *tx.tx_hash();
            if canonical.contains(&hash) || !seen.insert(hash) {
                continue;
            }
            self.txs.dedup().forget(&hash);
            match self.txs.store_tx(tx).await {
                Ok(()) => outcome.readmitted += 1,
                Err(err) => tracing::error!(hash = %hash, %err, "failed to re-admit orphaned transaction"),
            }
        }

        tracing::info!(
            removed = outcome.removed,
            readmitted = outcome.readmitted,
            "reconciled reorg"
        );
        outcome
    }

    pub fn stats(&self) -> ChainStats {
        ChainStats {
            transactions: self.txs.stats(),
            blocks: self.blocks.stats(),
        }
    }

    /// # Errors
    /// Returns the store error if the scan fails.
    pub async fn list_pending_transaction_keys(&self) -> MirrorResult<Vec<String>> {
        self.txs.list_pending_transaction_keys().await
    }

    pub fn transactions(&self) -> &Arc<TransactionMirror> {
        &self.txs
    }

    pub fn blocks(&self) -> &BlockMirror {
        &self.blocks
    }

    pub fn current_block_number(&self) -> u64 {
        self.height.get()
    }

    /// Drain and stop the transaction workers.
    pub async fn close(&self) {
        self.txs.close().await;
    }
}
