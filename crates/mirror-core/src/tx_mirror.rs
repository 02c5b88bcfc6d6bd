//! Write-behind mirror of pending transactions.
//!
//! Admission is never blocked on the store: [`TransactionMirror::store_tx`]
//! hands the transaction to a bounded queue drained by a fixed worker pool.
//! When the queue is full the caller performs the write itself, which bounds
//! memory at the cost of an occasional store round trip on the caller.

use alloy::consensus::TxEnvelope;
use alloy::primitives::B256;
use mirror_data::types::{hash_hex, tx_key, MinedStatus, TX_PREFIX};
use mirror_data::{MirrorConfig, MirrorError, MirrorResult, SharedBackend, TxRecord};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;

use crate::dedup::DuplicateSuppressionCache;
use crate::height::BlockHeightCache;
use crate::metrics::MirrorMetrics;
use crate::summary::build_tx_record;

type SharedReceiver = Arc<AsyncMutex<mpsc::Receiver<TxEnvelope>>>;

/// Counters reported by [`TransactionMirror::stats`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MirrorStats {
    pub processed: u64,
    pub errors: u64,
    pub queue_depth: usize,
    pub cache_size: usize,
    pub workers: usize,
    pub current_block_number: u64,
}

/// State shared between callers and workers.
struct Inner {
    backend: SharedBackend,
    dedup: DuplicateSuppressionCache,
    height: Arc<BlockHeightCache>,
    tx_ttl: Duration,
    processed: AtomicU64,
    errors: AtomicU64,
    metrics: Option<MirrorMetrics>,
}

impl Inner {
    /// Derive, stamp and write one record.
    ///
    /// The hash is claimed in the dedup cache before the write so a racing
    /// worker skips it, and released again if the write fails.
    async fn store_tx_sync(&self, tx: &TxEnvelope) -> MirrorResult<()> {
        let hash = *tx.tx_hash();
        if !self.dedup.mark_seen(hash) {
            return Ok(());
        }

        let record = build_tx_record(tx, self.height.get());
        let started = Instant::now();
        let result = self.write_record(&hash, &record).await;
        if let Some(metrics) = &self.metrics {
            metrics.record_tx_store(started.elapsed(), result.is_ok());
        }
        match result {
            Ok(()) => {
                self.processed.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(err) => {
                self.dedup.forget(&hash);
                self.errors.fetch_add(1, Ordering::Relaxed);
                Err(err)
            }
        }
    }

    /// A transaction was taken off the queue.
    fn dequeued(&self) {
        if let Some(metrics) = &self.metrics {
            metrics.queue_depth.dec();
        }
    }

    async fn write_record(&self, hash: &B256, record: &TxRecord) -> MirrorResult<()> {
        let key = tx_key(hash);
        self.backend.write_fields(&key, &record.to_fields()).await?;
        self.backend.expire(&key, self.tx_ttl).await
    }
}

pub struct TransactionMirror {
    inner: Arc<Inner>,
    sender: mpsc::Sender<TxEnvelope>,
    receiver: SharedReceiver,
    stop: watch::Sender<bool>,
    workers: parking_lot::Mutex<Vec<JoinHandle<()>>>,
    worker_count: usize,
    started: AtomicBool,
    closed: AtomicBool,
}

impl std::fmt::Debug for TransactionMirror {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionMirror")
            .field("workers", &self.worker_count)
            .field("started", &self.started.load(Ordering::Relaxed))
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl TransactionMirror {
    /// Build the mirror without touching the store. Nothing is written until
    /// [`init`](Self::init) starts the workers, except through the inline
    /// fallback.
    ///
    /// # Errors
    /// Returns `InvalidConfig` if `config` fails validation.
    pub fn new(
        backend: SharedBackend,
        height: Arc<BlockHeightCache>,
        config: &MirrorConfig,
    ) -> MirrorResult<Self> {
        Self::with_metrics(backend, height, config, None)
    }

    /// Like [`new`](Self::new), recording write latency, queue depth and
    /// failures into `metrics`.
    ///
    /// # Errors
    /// Returns `InvalidConfig` if `config` fails validation.
    pub fn with_metrics(
        backend: SharedBackend,
        height: Arc<BlockHeightCache>,
        config: &MirrorConfig,
        metrics: Option<MirrorMetrics>,
    ) -> MirrorResult<Self> {
        config.validate()?;
        let (sender, receiver) = mpsc::channel(config.queue_capacity);
        let (stop, _) = watch::channel(false);

        Ok(Self {
            inner: Arc::new(Inner {
                backend,
                dedup: DuplicateSuppressionCache::new(),
                height,
                tx_ttl: config.tx_ttl(),
                processed: AtomicU64::new(0),
                errors: AtomicU64::new(0),
                metrics,
            }),
            sender,
            receiver: Arc::new(AsyncMutex::new(receiver)),
            stop,
            workers: parking_lot::Mutex::new(Vec::new()),
            worker_count: config.workers,
            started: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }

    /// Check connectivity, seed the dedup cache from the store and start the
    /// worker pool. Calling it again is a no-op.
    ///
    /// # Errors
    /// Returns `Connection` if the store does not answer. A failed bootstrap
    /// is only logged.
    #[tracing::instrument(skip_all, fields(workers = self.worker_count))]
    pub async fn init(&self) -> MirrorResult<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Err(err) = self.inner.backend.ping().await {
            self.started.store(false, Ordering::SeqCst);
            return Err(match err {
                MirrorError::Connection(_) => err,
                other => MirrorError::Connection(other.to_string()),
            });
        }

        if let Err(err) = self.inner.dedup.bootstrap(self.inner.backend.as_ref()).await {
            tracing::warn!(%err, "duplicate cache bootstrap failed, starting empty");
        }

        let mut workers = self.workers.lock();
        for id in 0..self.worker_count {
            workers.push(tokio::spawn(run_worker(
                id,
                Arc::clone(&self.inner),
                Arc::clone(&self.receiver),
                self.stop.subscribe(),
            )));
        }
        tracing::info!(workers = self.worker_count, "transaction mirror started");
        Ok(())
    }

    /// Mirror a newly admitted transaction.
    ///
    /// Returns immediately for hashes already mirrored. Otherwise the
    /// transaction is queued, or written inline when the queue is full or
    /// the mirror is closed.
    ///
    /// # Errors
    /// Only the inline path can fail; queued writes report through the
    /// error counter and logs.
    #[tracing::instrument(skip_all, fields(hash = %tx.tx_hash()))]
    pub async fn store_tx(&self, tx: &TxEnvelope) -> MirrorResult<()> {
        if self.inner.dedup.contains(tx.tx_hash()) {
            return Ok(());
        }
        if self.closed.load(Ordering::SeqCst) {
            return self.inner.store_tx_sync(tx).await;
        }

        match self.sender.try_send(tx.clone()) {
            Ok(()) => {
                if let Some(metrics) = &self.inner.metrics {
                    metrics.queue_depth.inc();
                }
                // Nothing drains the queue once close has run.
                if self.closed.load(Ordering::SeqCst) {
                    self.drain_inline().await;
                }
                Ok(())
            }
            Err(TrySendError::Full(tx)) => {
                tracing::debug!("queue full, writing inline");
                self.inner.store_tx_sync(&tx).await
            }
            Err(TrySendError::Closed(tx)) => self.inner.store_tx_sync(&tx).await,
        }
    }

    /// Record inclusion details on a still-present record. A record that has
    /// already expired or been removed is left alone.
    ///
    /// # Errors
    /// Returns the store error if the update round trip fails.
    pub async fn update_tx_status(
        &self,
        hash: &B256,
        block_hash: &B256,
        block_number: u64,
        tx_index: u64,
        status: u64,
    ) -> MirrorResult<()> {
        let status = MinedStatus {
            block_hash: hash_hex(block_hash),
            block_number,
            tx_index,
            status,
        };
        let updated = self
            .inner
            .backend
            .set_fields_if_exists(&tx_key(hash), &status.to_fields())
            .await?;
        if !updated {
            tracing::debug!(hash = %hash, "status update for missing record ignored");
        }
        Ok(())
    }

    /// Delete one record and allow the hash to be mirrored again.
    ///
    /// # Errors
    /// Returns the store error if the delete fails.
    pub async fn remove_tx(&self, hash: &B256) -> MirrorResult<()> {
        self.remove_txs(std::slice::from_ref(hash)).await
    }

    /// Batched form of [`remove_tx`](Self::remove_tx).
    ///
    /// # Errors
    /// Returns the store error if the delete fails.
    pub async fn remove_txs(&self, hashes: &[B256]) -> MirrorResult<()> {
        if hashes.is_empty() {
            return Ok(());
        }
        self.inner.dedup.forget_batch(hashes);
        let keys: Vec<String> = hashes.iter().map(tx_key).collect();
        let deleted = self.inner.backend.delete(&keys).await?;
        tracing::debug!(requested = keys.len(), deleted, "removed transaction records");
        Ok(())
    }

    pub fn update_current_block_number(&self, number: u64) {
        self.inner.height.update_if_greater(number);
    }

    pub fn current_block_number(&self) -> u64 {
        self.inner.height.get()
    }

    pub fn dedup(&self) -> &DuplicateSuppressionCache {
        &self.inner.dedup
    }

    pub fn stats(&self) -> MirrorStats {
        MirrorStats {
            processed: self.inner.processed.load(Ordering::Relaxed),
            errors: self.inner.errors.load(Ordering::Relaxed),
            queue_depth: self.sender.max_capacity() - self.sender.capacity(),
            cache_size: self.inner.dedup.len(),
            workers: self.worker_count,
            current_block_number: self.inner.height.get(),
        }
    }

    /// Keys of every live transaction record. Linear in the keyspace.
    ///
    /// # Errors
    /// Returns the store error if the scan fails.
    pub async fn list_pending_transaction_keys(&self) -> MirrorResult<Vec<String>> {
        self.inner.backend.scan_prefix(TX_PREFIX).await
    }

    /// Stored record of `hash`, if one is live.
    ///
    /// # Errors
    /// Returns the store error, or `MalformedRecord` if the stored fields do
    /// not decode.
    pub async fn get_tx(&self, hash: &B256) -> MirrorResult<Option<TxRecord>> {
        let key = tx_key(hash);
        match self.inner.backend.read_fields(&key).await? {
            Some(fields) => TxRecord::from_fields(&key, &fields).map(Some),
            None => Ok(None),
        }
    }

    /// Stop the workers once the queue is drained and wait for them.
    ///
    /// Anything still queued afterwards (workers never started) is written
    /// inline. Later `store_tx` calls write inline as well.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.stop.send_replace(true);

        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.workers.lock());
        for handle in handles {
            if let Err(err) = handle.await {
                tracing::error!(%err, "transaction worker panicked");
            }
        }

        self.drain_inline().await;

        let stats = self.stats();
        tracing::info!(
            processed = stats.processed,
            errors = stats.errors,
            cache_size = stats.cache_size,
            "transaction mirror closed"
        );
    }
}

impl TransactionMirror {
    /// Write everything still queued on the caller's task.
    async fn drain_inline(&self) {
        let mut leftover = Vec::new();
        {
            let mut rx = self.receiver.lock().await;
            while let Ok(tx) = rx.try_recv() {
                self.inner.dequeued();
                leftover.push(tx);
            }
        }
        for tx in &leftover {
            if let Err(err) = self.inner.store_tx_sync(tx).await {
                tracing::error!(hash = %tx.tx_hash(), %err, "failed to mirror transaction");
            }
        }
    }
}

async fn run_worker(
    id: usize,
    inner: Arc<Inner>,
    queue: SharedReceiver,
    mut stop: watch::Receiver<bool>,
) {
    tracing::debug!(worker = id, "transaction worker started");
    loop {
        let next = {
            let mut rx = queue.lock().await;
            let stopping = *stop.borrow();
            if stopping {
                rx.try_recv().ok()
            } else {
                let received = tokio::select! {
                    tx = rx.recv() => Some(tx),
                    _ = stop.changed() => None,
                };
                match received {
                    Some(tx) => tx,
                    None => rx.try_recv().ok(),
                }
            }
        };

        let Some(tx) = next else {
            break;
        };
        inner.dequeued();
        if let Err(err) = inner.store_tx_sync(&tx).await {
            tracing::error!(worker = id, hash = %tx.tx_hash(), %err, "failed to mirror transaction");
        }
    }
    tracing::debug!(worker = id, "transaction worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;
    use mirror_data::{MemoryBackend, MirrorBackend};

    fn mirror_with(backend: Arc<MemoryBackend>, config: &MirrorConfig) -> TransactionMirror {
        TransactionMirror::new(backend, Arc::new(BlockHeightCache::new()), config)
            .expect("valid config")
    }

    #[tokio::test]
    async fn duplicate_store_writes_once() {
        let backend = Arc::new(MemoryBackend::new());
        let mirror = mirror_with(Arc::clone(&backend), &MirrorConfig::default());
        mirror.init().await.unwrap();

        let tx = test_support::legacy_tx(0);
        mirror.store_tx(&tx).await.unwrap();
        mirror.close().await;
        mirror.store_tx(&tx).await.unwrap();

        assert_eq!(backend.write_count(), 1);
        assert_eq!(mirror.stats().processed, 1);
    }

    #[tokio::test]
    async fn full_queue_falls_back_to_inline_write() {
        let backend = Arc::new(MemoryBackend::new());
        let config = MirrorConfig {
            queue_capacity: 2,
            ..MirrorConfig::default()
        };
        let mirror = mirror_with(Arc::clone(&backend), &config);

        for nonce in 0..3 {
            mirror.store_tx(&test_support::legacy_tx(nonce)).await.unwrap();
        }

        assert_eq!(mirror.stats().queue_depth, 2);
        assert_eq!(backend.write_count(), 1);
        let inline = test_support::legacy_tx(2);
        assert!(mirror.get_tx(inline.tx_hash()).await.unwrap().is_some());

        mirror.close().await;
        assert_eq!(backend.write_count(), 3);
    }

    #[tokio::test]
    async fn failed_write_is_counted_and_released() {
        let backend = Arc::new(MemoryBackend::new());
        let config = MirrorConfig {
            queue_capacity: 1,
            ..MirrorConfig::default()
        };
        let mirror = mirror_with(Arc::clone(&backend), &config);
        mirror.store_tx(&test_support::legacy_tx(0)).await.unwrap();

        backend.set_fail_writes(true);
        let tx = test_support::legacy_tx(1);
        assert!(mirror.store_tx(&tx).await.is_err());
        assert_eq!(mirror.stats().errors, 1);
        assert!(!mirror.dedup().contains(tx.tx_hash()));

        backend.set_fail_writes(false);
        mirror.close().await;
    }

    #[tokio::test]
    async fn records_are_stamped_with_current_height() {
        let backend = Arc::new(MemoryBackend::new());
        let mirror = mirror_with(backend, &MirrorConfig::default());
        mirror.update_current_block_number(12);
        mirror.update_current_block_number(9);
        mirror.init().await.unwrap();

        let tx = test_support::dynamic_fee_tx(0);
        mirror.store_tx(&tx).await.unwrap();
        mirror.close().await;

        let record = mirror.get_tx(tx.tx_hash()).await.unwrap().unwrap();
        assert_eq!(record.blockchain_number, 12);
        assert_eq!(mirror.current_block_number(), 12);
    }

    #[tokio::test]
    async fn status_update_is_noop_for_missing_record() {
        let backend = Arc::new(MemoryBackend::new());
        let mirror = mirror_with(Arc::clone(&backend), &MirrorConfig::default());
        let hash = B256::repeat_byte(7);

        mirror
            .update_tx_status(&hash, &B256::repeat_byte(8), 5, 0, 1)
            .await
            .unwrap();
        assert!(mirror.get_tx(&hash).await.unwrap().is_none());
        mirror.close().await;
    }

    #[tokio::test]
    async fn remove_clears_dedup_membership() {
        let backend = Arc::new(MemoryBackend::new());
        let mirror = mirror_with(Arc::clone(&backend), &MirrorConfig::default());
        mirror.init().await.unwrap();

        let tx = test_support::legacy_tx(3);
        mirror.store_tx(&tx).await.unwrap();
        mirror.close().await;
        assert!(mirror.dedup().contains(tx.tx_hash()));

        mirror.remove_tx(tx.tx_hash()).await.unwrap();
        assert!(!mirror.dedup().contains(tx.tx_hash()));
        assert!(mirror.list_pending_transaction_keys().await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn admissions_racing_close_are_all_written() {
        let backend = Arc::new(MemoryBackend::new());
        let mirror = Arc::new(mirror_with(Arc::clone(&backend), &MirrorConfig::default()));
        mirror.init().await.unwrap();
        let txs: Vec<TxEnvelope> = (0..200).map(test_support::legacy_tx).collect();

        let mut tasks = Vec::new();
        for tx in txs.clone() {
            let mirror = Arc::clone(&mirror);
            tasks.push(tokio::spawn(async move { mirror.store_tx(&tx).await }));
        }
        mirror.close().await;
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(mirror.stats().queue_depth, 0);
        assert_eq!(backend.write_count(), 200);
        for tx in &txs {
            assert!(mirror.get_tx(tx.tx_hash()).await.unwrap().is_some());
        }
    }

    #[tokio::test]
    async fn metrics_track_queue_and_latency() {
        let backend = Arc::new(MemoryBackend::new());
        let metrics = MirrorMetrics::new().unwrap();
        let mirror = TransactionMirror::with_metrics(
            backend.clone(),
            Arc::new(BlockHeightCache::new()),
            &MirrorConfig::default(),
            Some(metrics.clone()),
        )
        .unwrap();

        mirror.store_tx(&test_support::legacy_tx(0)).await.unwrap();
        mirror.store_tx(&test_support::legacy_tx(1)).await.unwrap();
        assert_eq!(metrics.queue_depth.get(), 2);

        backend.set_fail_writes(true);
        mirror.close().await;

        assert_eq!(metrics.queue_depth.get(), 0);
        assert_eq!(metrics.tx_store_seconds.get_sample_count(), 2);
        assert_eq!(metrics.tx_errors.get(), 2);
        assert_eq!(mirror.stats().errors, 2);
    }

    #[tokio::test]
    async fn init_seeds_dedup_from_store() {
        let backend = Arc::new(MemoryBackend::new());
        let tx = test_support::legacy_tx(0);
        backend
            .write_fields(&tx_key(tx.tx_hash()), &[("hash".to_string(), b"x".to_vec())])
            .await
            .unwrap();

        let mirror = mirror_with(Arc::clone(&backend), &MirrorConfig::default());
        mirror.init().await.unwrap();
        mirror.store_tx(&tx).await.unwrap();
        mirror.close().await;

        assert_eq!(backend.write_count(), 1);
        assert_eq!(mirror.stats().cache_size, 1);
    }
}
