//! Backing store capability.
//!
//! The mirror only needs a handful of primitives from its key-value store:
//! multi-field records with a TTL, an exclusive TTL-bound lease, batched
//! deletion and prefix enumeration. [`RedisBackend`] is the production
//! implementation; [`MemoryBackend`] backs tests and benches.
//!
//! [`RedisBackend`]: crate::redis_store::RedisBackend
//! [`MemoryBackend`]: crate::memory::MemoryBackend

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::error::MirrorResult;
use crate::types::FieldMap;

/// Shared handle used by every mirror component.
pub type SharedBackend = Arc<dyn MirrorBackend>;

#[async_trait]
pub trait MirrorBackend: Send + Sync + 'static {
    /// Check the store answers.
    async fn ping(&self) -> MirrorResult<()>;

    /// Write all `fields` of `key` in one atomic round trip.
    async fn write_fields(&self, key: &str, fields: &[(String, Vec<u8>)]) -> MirrorResult<()>;

    /// Like [`write_fields`](Self::write_fields) but only if `key` still
    /// exists. Returns `false` when the record is gone.
    async fn set_fields_if_exists(
        &self,
        key: &str,
        fields: &[(String, Vec<u8>)],
    ) -> MirrorResult<bool>;

    async fn expire(&self, key: &str, ttl: Duration) -> MirrorResult<()>;

    /// Atomic set-if-absent with a TTL. `false` means someone else holds it.
    async fn try_acquire_lease(&self, key: &str, ttl: Duration) -> MirrorResult<bool>;

    async fn release_lease(&self, key: &str) -> MirrorResult<()>;

    /// Delete `keys` in one batch, returning how many existed.
    async fn delete(&self, keys: &[String]) -> MirrorResult<u64>;

    async fn exists(&self, key: &str) -> MirrorResult<bool>;

    async fn read_fields(&self, key: &str) -> MirrorResult<Option<FieldMap>>;

    async fn read_field(&self, key: &str, field: &str) -> MirrorResult<Option<Vec<u8>>>;

    /// Every live key starting with `prefix`. Cost is linear in the keyspace.
    async fn scan_prefix(&self, prefix: &str) -> MirrorResult<Vec<String>>;
}
