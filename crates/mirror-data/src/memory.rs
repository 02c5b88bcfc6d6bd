//! In-process store with lazy TTL expiry.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::error::{MirrorError, MirrorResult};
use crate::store::MirrorBackend;
use crate::types::FieldMap;

#[derive(Debug, Default)]
struct Record {
    fields: FieldMap,
    expires_at: Option<Instant>,
}

impl Record {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// `DashMap`-backed [`MirrorBackend`].
///
/// Expired records are dropped the next time they are touched. Write calls
/// are counted so callers can assert how many round trips a path issued.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    records: DashMap<String, Record>,
    leases: DashMap<String, Instant>,
    writes: AtomicU64,
    fail_writes: AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `write_fields` calls that reached the store.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Make every subsequent write fail, to exercise error accounting.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Relaxed);
    }

    /// Remaining TTL of `key`, if it has one.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        self.purge(key);
        let record = self.records.get(key)?;
        let at = record.expires_at?;
        Some(at.saturating_duration_since(Instant::now()))
    }

    pub fn is_leased(&self, key: &str) -> bool {
        let now = Instant::now();
        self.leases.remove_if(key, |_, at| *at <= now);
        self.leases.contains_key(key)
    }

    fn purge(&self, key: &str) {
        let now = Instant::now();
        self.records.remove_if(key, |_, record| record.is_expired(now));
    }

    fn check_writable(&self, key: &str) -> MirrorResult<()> {
        if self.fail_writes.load(Ordering::Relaxed) {
            return Err(MirrorError::write(key, "injected write failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl MirrorBackend for MemoryBackend {
    async fn ping(&self) -> MirrorResult<()> {
        Ok(())
    }

    async fn write_fields(&self, key: &str, fields: &[(String, Vec<u8>)]) -> MirrorResult<()> {
        self.check_writable(key)?;
        self.purge(key);
        self.writes.fetch_add(1, Ordering::Relaxed);
        let mut record = self.records.entry(key.to_string()).or_default();
        record.fields.extend(fields.iter().cloned());
        Ok(())
    }

    async fn set_fields_if_exists(
        &self,
        key: &str,
        fields: &[(String, Vec<u8>)],
    ) -> MirrorResult<bool> {
        self.check_writable(key)?;
        self.purge(key);
        match self.records.get_mut(key) {
            Some(mut record) => {
                self.writes.fetch_add(1, Ordering::Relaxed);
                record.fields.extend(fields.iter().cloned());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> MirrorResult<()> {
        self.check_writable(key)?;
        if let Some(mut record) = self.records.get_mut(key) {
            record.expires_at = Some(Instant::now() + ttl);
        }
        Ok(())
    }

    async fn try_acquire_lease(&self, key: &str, ttl: Duration) -> MirrorResult<bool> {
        let now = Instant::now();
        self.leases.remove_if(key, |_, at| *at <= now);
        match self.leases.entry(key.to_string()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(now + ttl);
                Ok(true)
            }
        }
    }

    async fn release_lease(&self, key: &str) -> MirrorResult<()> {
        self.leases.remove(key);
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> MirrorResult<u64> {
        let now = Instant::now();
        let removed = keys
            .iter()
            .filter_map(|key| self.records.remove(key))
            .filter(|(_, record)| !record.is_expired(now))
            .count();
        Ok(removed as u64)
    }

    async fn exists(&self, key: &str) -> MirrorResult<bool> {
        self.purge(key);
        Ok(self.records.contains_key(key))
    }

    async fn read_fields(&self, key: &str) -> MirrorResult<Option<FieldMap>> {
        self.purge(key);
        Ok(self.records.get(key).map(|record| record.fields.clone()))
    }

    async fn read_field(&self, key: &str, field: &str) -> MirrorResult<Option<Vec<u8>>> {
        self.purge(key);
        Ok(self
            .records
            .get(key)
            .and_then(|record| record.fields.get(field).cloned()))
    }

    async fn scan_prefix(&self, prefix: &str) -> MirrorResult<Vec<String>> {
        let now = Instant::now();
        self.records.retain(|_, record| !record.is_expired(now));
        let mut keys: Vec<String> = self
            .records
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}
