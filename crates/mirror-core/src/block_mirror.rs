//! Lease-guarded writer of recent block summaries.
//!
//! Block records are a short-lived activity feed keyed by height. Each write
//! holds a per-height lease so two import paths racing on the same block do
//! not both serialize and write it.

use alloy::primitives::B256;
use alloy::rpc::types::Log;
use mirror_data::codec::compress_ratio;
use mirror_data::types::{block_key, hash_hex, lease_key, BLOCK_PREFIX};
use mirror_data::{
    BlockRecord, CanonicalBlock, Codec, FieldMap, LogSummary, MirrorConfig, MirrorError,
    MirrorResult, SharedBackend, TxSummary,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::height::BlockHeightCache;
use crate::metrics::MirrorMetrics;
use crate::summary::{block_gas_price, build_tx_summary, reconcile_logs};

/// Outcome of [`BlockMirror::store_block`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockWrite {
    Written,
    /// Another writer held the lease for this height.
    Skipped,
}

/// Outcome counts of [`BlockMirror::store_block`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BlockStats {
    pub written: u64,
    pub skipped: u64,
    /// Failed leases, encodings and writes.
    pub errors: u64,
}

#[derive(Debug, Default)]
struct BlockCounters {
    written: AtomicU64,
    skipped: AtomicU64,
    errors: AtomicU64,
}

/// Clones share their counters.
#[derive(Clone)]
pub struct BlockMirror {
    backend: SharedBackend,
    height: Arc<BlockHeightCache>,
    codec: Codec,
    block_ttl: Duration,
    lease_ttl: Duration,
    counters: Arc<BlockCounters>,
    metrics: Option<MirrorMetrics>,
}

impl std::fmt::Debug for BlockMirror {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockMirror")
            .field("codec", &self.codec)
            .field("block_ttl", &self.block_ttl)
            .field("lease_ttl", &self.lease_ttl)
            .finish_non_exhaustive()
    }
}

fn encode<T: Serialize>(codec: &Codec, what: &'static str, value: &T) -> MirrorResult<Vec<u8>> {
    let json =
        serde_json::to_vec(value).map_err(|source| MirrorError::Serialization { what, source })?;
    let packed = codec.compress(&json)?;
    if codec.is_enabled() {
        tracing::trace!(what, ratio = compress_ratio(&json, &packed), "compressed payload");
    }
    Ok(packed)
}

fn decode<T: DeserializeOwned>(codec: &Codec, what: &'static str, raw: &[u8]) -> MirrorResult<T> {
    let json = codec.decompress(raw)?;
    serde_json::from_slice(&json).map_err(|source| MirrorError::Serialization { what, source })
}

impl BlockMirror {
    /// # Errors
    /// Returns `InvalidConfig` if `config` fails validation.
    pub fn new(
        backend: SharedBackend,
        height: Arc<BlockHeightCache>,
        config: &MirrorConfig,
    ) -> MirrorResult<Self> {
        Self::with_metrics(backend, height, config, None)
    }

    /// Like [`new`](Self::new), recording write latency and failures into
    /// `metrics`.
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
        Ok(Self {
            backend,
            height,
            codec: Codec::new(config.compress_enabled),
            block_ttl: config.block_ttl(),
            lease_ttl: config.lease_ttl(),
            counters: Arc::default(),
            metrics,
        })
    }

    pub fn stats(&self) -> BlockStats {
        BlockStats {
            written: self.counters.written.load(Ordering::Relaxed),
            skipped: self.counters.skipped.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
        }
    }

    /// Build the stored record of `block`. Identical inputs give identical
    /// records.
    ///
    /// # Errors
    /// Returns `Serialization` or `Codec` if a payload cannot be encoded.
    pub fn build_record(&self, block: &CanonicalBlock, logs: &[Log]) -> MirrorResult<BlockRecord> {
        let txs: Vec<TxSummary> = block.transactions.iter().map(build_tx_summary).collect();
        let logs = reconcile_logs(block, logs);

        Ok(BlockRecord {
            blockhash: hash_hex(&block.hash),
            blocknumber: block.number,
            blockgasprice: block_gas_price(block),
            txs: encode(&self.codec, "transaction summaries", &txs)?,
            logs: encode(&self.codec, "log summaries", &logs)?,
        })
    }

    /// Mirror a canonical block and its logs.
    ///
    /// Returns [`BlockWrite::Skipped`] without touching the record when
    /// another writer holds the lease. On success the shared height cache is
    /// raised to the block's height.
    ///
    /// # Errors
    /// Returns the store error of a failed lease or write, or an encoding
    /// error. The lease is released either way. Every failure is counted.
    #[tracing::instrument(skip_all, fields(number = block.number, hash = %block.hash))]
    pub async fn store_block(&self, block: &CanonicalBlock, logs: &[Log]) -> MirrorResult<BlockWrite> {
        let started = Instant::now();
        let result = self.store_block_leased(block, logs).await;

        let counter = match &result {
            Ok(BlockWrite::Written) => &self.counters.written,
            Ok(BlockWrite::Skipped) => &self.counters.skipped,
            Err(_) => &self.counters.errors,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        if let Some(metrics) = &self.metrics {
            if !matches!(result, Ok(BlockWrite::Skipped)) {
                metrics.record_block_store(started.elapsed(), result.is_ok());
            }
        }
        result
    }

    async fn store_block_leased(
        &self,
        block: &CanonicalBlock,
        logs: &[Log],
    ) -> MirrorResult<BlockWrite> {
        let lease = lease_key(block.number);
        if !self.backend.try_acquire_lease(&lease, self.lease_ttl).await? {
            tracing::debug!("block lease held elsewhere, skipping");
            return Ok(BlockWrite::Skipped);
        }

        let result = self.write_block(block, logs).await;
        if let Err(err) = self.backend.release_lease(&lease).await {
            tracing::warn!(%err, "failed to release block lease");
        }
        result?;

        self.height.update_if_greater(block.number);
        Ok(BlockWrite::Written)
    }

    async fn write_block(&self, block: &CanonicalBlock, logs: &[Log]) -> MirrorResult<()> {
        let record = self.build_record(block, logs)?;
        let key = block_key(block.number);
        self.backend.write_fields(&key, &record.to_fields()).await?;
        self.backend.expire(&key, self.block_ttl).await?;
        tracing::debug!(txs = block.transactions.len(), logs = logs.len(), "stored block");
        Ok(())
    }

    /// Key of the live block record carrying `hash`. Inspects every live
    /// block record.
    ///
    /// # Errors
    /// Returns the store error if the scan or a read fails.
    pub async fn find_block_key_by_hash(&self, hash: &B256) -> MirrorResult<Option<String>> {
        let wanted = hash_hex(hash);
        for key in self.backend.scan_prefix(BLOCK_PREFIX).await? {
            let stored = self.backend.read_field(&key, "blockhash").await?;
            if stored.as_deref() == Some(wanted.as_bytes()) {
                return Ok(Some(key));
            }
        }
        Ok(None)
    }

    /// Selected fields of the block with `hash`; every field when `fields`
    /// is empty.
    ///
    /// # Errors
    /// Returns the store error if the lookup fails.
    pub async fn get_block_fields(&self, hash: &B256, fields: &[&str]) -> MirrorResult<Option<FieldMap>> {
        match self.find_block_key_by_hash(hash).await? {
            Some(key) => self.read_selected(&key, fields).await,
            None => Ok(None),
        }
    }

    /// Like [`get_block_fields`](Self::get_block_fields), by height.
    ///
    /// # Errors
    /// Returns the store error if the read fails.
    pub async fn get_block_fields_by_number(
        &self,
        number: u64,
        fields: &[&str],
    ) -> MirrorResult<Option<FieldMap>> {
        self.read_selected(&block_key(number), fields).await
    }

    async fn read_selected(&self, key: &str, fields: &[&str]) -> MirrorResult<Option<FieldMap>> {
        let Some(mut all) = self.backend.read_fields(key).await? else {
            return Ok(None);
        };
        if !fields.is_empty() {
            all.retain(|name, _| fields.contains(&name.as_str()));
        }
        Ok(Some(all))
    }

    /// Decoded log summaries of the block with `hash`.
    ///
    /// # Errors
    /// Returns the store error, or `Serialization`/`Codec` if the payload
    /// does not decode.
    pub async fn get_logs(&self, hash: &B256) -> MirrorResult<Option<Vec<LogSummary>>> {
        match self.find_block_key_by_hash(hash).await? {
            Some(key) => self.read_payload(&key, "logs", "log summaries").await,
            None => Ok(None),
        }
    }

    /// # Errors
    /// Same as [`get_logs`](Self::get_logs).
    pub async fn get_logs_by_number(&self, number: u64) -> MirrorResult<Option<Vec<LogSummary>>> {
        self.read_payload(&block_key(number), "logs", "log summaries").await
    }

    /// Decoded transaction summaries of the block at `number`.
    ///
    /// # Errors
    /// Same as [`get_logs`](Self::get_logs).
    pub async fn get_tx_summaries_by_number(&self, number: u64) -> MirrorResult<Option<Vec<TxSummary>>> {
        self.read_payload(&block_key(number), "txs", "transaction summaries").await
    }

    async fn read_payload<T: DeserializeOwned>(
        &self,
        key: &str,
        field: &str,
        what: &'static str,
    ) -> MirrorResult<Option<T>> {
        match self.backend.read_field(key, field).await? {
            Some(raw) => decode(&self.codec, what, &raw).map(Some),
            None => Ok(None),
        }
    }

    /// # Errors
    /// Returns the store error if the lookup fails.
    pub async fn block_exists(&self, number: u64) -> MirrorResult<bool> {
        self.backend.exists(&block_key(number)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;
    use mirror_data::{MemoryBackend, MirrorBackend};

    fn block_mirror(backend: Arc<MemoryBackend>, compress: bool) -> (BlockMirror, Arc<BlockHeightCache>) {
        let height = Arc::new(BlockHeightCache::new());
        let config = MirrorConfig {
            compress_enabled: compress,
            ..MirrorConfig::default()
        };
        let mirror = BlockMirror::new(backend, Arc::clone(&height), &config).expect("valid config");
        (mirror, height)
    }

    #[tokio::test]
    async fn rewriting_a_block_stores_identical_fields() {
        let backend = Arc::new(MemoryBackend::new());
        let (mirror, height) = block_mirror(Arc::clone(&backend), false);
        let block = test_support::block(10, vec![test_support::legacy_tx(0), test_support::dynamic_fee_tx(1)]);

        assert_eq!(mirror.store_block(&block, &[]).await.unwrap(), BlockWrite::Written);
        let first = backend.read_fields("block:10").await.unwrap().unwrap();
        assert_eq!(mirror.store_block(&block, &[]).await.unwrap(), BlockWrite::Written);
        let second = backend.read_fields("block:10").await.unwrap().unwrap();

        assert_eq!(first, second);
        assert_eq!(height.get(), 10);
        assert!(!backend.is_leased("lock:10"));
        assert!(backend.ttl("block:10").unwrap() <= Duration::from_secs(60));
    }

    #[tokio::test]
    async fn held_lease_skips_the_write() {
        let backend = Arc::new(MemoryBackend::new());
        let (mirror, height) = block_mirror(Arc::clone(&backend), false);
        backend
            .try_acquire_lease("lock:3", Duration::from_secs(5))
            .await
            .unwrap();

        let block = test_support::block(3, Vec::new());
        assert_eq!(mirror.store_block(&block, &[]).await.unwrap(), BlockWrite::Skipped);
        assert!(!mirror.block_exists(3).await.unwrap());
        assert_eq!(height.get(), 0);
        assert_eq!(mirror.stats(), BlockStats { written: 0, skipped: 1, errors: 0 });
    }

    #[tokio::test]
    async fn lookup_by_hash_and_number_agree() {
        let backend = Arc::new(MemoryBackend::new());
        let (mirror, _) = block_mirror(backend, true);
        let block = test_support::block(21, vec![test_support::creation_tx(0)]);
        mirror.store_block(&block, &[]).await.unwrap();
        mirror.store_block(&test_support::block(22, Vec::new()), &[]).await.unwrap();

        let by_hash = mirror
            .get_block_fields(&block.hash, &["blocknumber", "blockgasprice"])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_hash.len(), 2);
        assert_eq!(by_hash["blocknumber"], b"21".to_vec());

        let by_number = mirror.get_block_fields_by_number(21, &[]).await.unwrap().unwrap();
        assert_eq!(by_number.len(), 5);

        let txs = mirror.get_tx_summaries_by_number(21).await.unwrap().unwrap();
        assert_eq!(txs.len(), 1);
        assert!(txs[0].contract_address.is_some());
        assert_eq!(mirror.get_logs(&block.hash).await.unwrap(), Some(Vec::new()));
        assert!(mirror.get_block_fields(&B256::repeat_byte(0x55), &[]).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failed_write_releases_lease() {
        let backend = Arc::new(MemoryBackend::new());
        let (mirror, height) = block_mirror(Arc::clone(&backend), false);
        backend.set_fail_writes(true);

        assert!(mirror.store_block(&test_support::block(4, Vec::new()), &[]).await.is_err());
        assert!(!backend.is_leased("lock:4"));
        assert_eq!(mirror.stats(), BlockStats { written: 0, skipped: 0, errors: 1 });
        assert_eq!(height.get(), 0);
    }

    #[tokio::test]
    async fn metrics_time_writes_and_count_failures() {
        let backend = Arc::new(MemoryBackend::new());
        let metrics = MirrorMetrics::new().unwrap();
        let mirror = BlockMirror::with_metrics(
            backend.clone(),
            Arc::new(BlockHeightCache::new()),
            &MirrorConfig::default(),
            Some(metrics.clone()),
        )
        .unwrap();

        mirror.store_block(&test_support::block(1, Vec::new()), &[]).await.unwrap();
        backend.set_fail_writes(true);
        let _ = mirror.store_block(&test_support::block(2, Vec::new()), &[]).await;

        assert_eq!(metrics.block_store_seconds.get_sample_count(), 2);
        assert_eq!(metrics.block_errors.get(), 1);
        assert_eq!(mirror.clone().stats().written, 1);
    }
}
