//! Prometheus metrics for the mirror store paths.
//!
//! Nothing is registered by default. A host that exports metrics builds a
//! [`MirrorMetrics`], hands it to [`ChainMirror::with_metrics`] and registers
//! it with its own registry.
//!
//! [`ChainMirror::with_metrics`]: crate::chain::ChainMirror::with_metrics

use prometheus::{exponential_buckets, Histogram, HistogramOpts, IntCounter, IntGauge, Registry};
use std::time::Duration;

/// Latencies, queue depth and failure counts of the mirror.
#[derive(Clone, Debug)]
pub struct MirrorMetrics {
    /// Round trip of one pending transaction write, in seconds.
    pub tx_store_seconds: Histogram,
    /// Round trip of one block write, lease included, in seconds.
    pub block_store_seconds: Histogram,
    /// Transactions waiting in the worker queue.
    pub queue_depth: IntGauge,
    pub tx_errors: IntCounter,
    pub block_errors: IntCounter,
}

impl MirrorMetrics {
    /// # Errors
    /// Returns the prometheus error if a metric definition is rejected.
    pub fn new() -> prometheus::Result<Self> {
        // 100us to ~3s
        let store_buckets = exponential_buckets(0.0001, 2.0, 16)?;

        Ok(Self {
            tx_store_seconds: Histogram::with_opts(
                HistogramOpts::new(
                    "mirror_tx_store_seconds",
                    "Pending transaction write latency in seconds",
                )
                .buckets(store_buckets.clone()),
            )?,
            block_store_seconds: Histogram::with_opts(
                HistogramOpts::new("mirror_block_store_seconds", "Block write latency in seconds")
                    .buckets(store_buckets),
            )?,
            queue_depth: IntGauge::new(
                "mirror_tx_queue_depth",
                "Transactions waiting for a mirror worker",
            )?,
            tx_errors: IntCounter::new(
                "mirror_tx_errors_total",
                "Failed pending transaction writes",
            )?,
            block_errors: IntCounter::new("mirror_block_errors_total", "Failed block writes")?,
        })
    }

    /// Register every metric with `registry`.
    ///
    /// # Errors
    /// Returns the prometheus error if a name is already registered.
    pub fn register(&self, registry: &Registry) -> prometheus::Result<()> {
        registry.register(Box::new(self.tx_store_seconds.clone()))?;
        registry.register(Box::new(self.block_store_seconds.clone()))?;
        registry.register(Box::new(self.queue_depth.clone()))?;
        registry.register(Box::new(self.tx_errors.clone()))?;
        registry.register(Box::new(self.block_errors.clone()))?;
        Ok(())
    }

    #[inline]
    pub fn record_tx_store(&self, elapsed: Duration, ok: bool) {
        self.tx_store_seconds.observe(elapsed.as_secs_f64());
        if !ok {
            self.tx_errors.inc();
        }
    }

    #[inline]
    pub fn record_block_store(&self, elapsed: Duration, ok: bool) {
        self.block_store_seconds.observe(elapsed.as_secs_f64());
        if !ok {
            self.block_errors.inc();
        }
    }
}
