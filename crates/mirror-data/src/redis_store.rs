//! Redis implementation of [`MirrorBackend`].
//!
//! Uses a multiplexed [`ConnectionManager`], which is cheap to clone and safe
//! to share between the worker pool and the block path. Reconnects follow the
//! manager's exponential backoff; no further retry happens here.

use ::redis::aio::ConnectionManager;
use ::redis::{Client, IntoConnectionInfo, Script};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use crate::config::MirrorConfig;
use crate::error::{MirrorError, MirrorResult};
use crate::store::MirrorBackend;
use crate::types::FieldMap;

/// HSET only when the key is still present, so a late status update never
/// resurrects an expired record without a TTL.
const SET_IF_EXISTS: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 then
    redis.call('HSET', KEYS[1], unpack(ARGV))
    return 1
end
return 0
"#;

pub struct RedisBackend {
    manager: ConnectionManager,
    scan_count: usize,
    set_if_exists: Script,
}

impl RedisBackend {
    /// Connect and verify the server answers `PING`.
    ///
    /// # Errors
    /// Returns `Disabled` for a disabled config and `Connection` if the URL is
    /// invalid or the server is unreachable.
    #[tracing::instrument(skip_all, fields(url = %config.url))]
    pub async fn connect(config: &MirrorConfig) -> MirrorResult<Self> {
        if !config.is_enabled() {
            return Err(MirrorError::Disabled);
        }
        config.validate()?;

        let mut info = config
            .url
            .as_str()
            .into_connection_info()
            .map_err(|e| MirrorError::Connection(e.to_string()))?;
        info.redis.db = config.db;
        if config.username.is_some() {
            info.redis.username = config.username.clone();
        }
        if config.password.is_some() {
            info.redis.password = config.password.clone();
        }

        let client = Client::open(info).map_err(|e| MirrorError::Connection(e.to_string()))?;
        let manager = ConnectionManager::new_with_backoff(
            client,
            2,
            config.retry_delay_ms,
            config.max_retries,
        )
        .await
        .map_err(|e| MirrorError::Connection(e.to_string()))?;

        let backend = Self {
            manager,
            scan_count: config.scan_count,
            set_if_exists: Script::new(SET_IF_EXISTS),
        };
        backend.ping().await?;
        debug!("redis backend connected");
        Ok(backend)
    }

    fn conn(&self) -> ConnectionManager {
        self.manager.clone()
    }
}

#[async_trait]
impl MirrorBackend for RedisBackend {
    async fn ping(&self) -> MirrorResult<()> {
        let pong: String = ::redis::cmd("PING")
            .query_async(&mut self.conn())
            .await
            .map_err(|e| MirrorError::Connection(e.to_string()))?;
        if pong != "PONG" {
            return Err(MirrorError::Connection(format!(
                "unexpected PING response: {pong}"
            )));
        }
        Ok(())
    }

    async fn write_fields(&self, key: &str, fields: &[(String, Vec<u8>)]) -> MirrorResult<()> {
        let mut cmd = ::redis::cmd("HSET");
        cmd.arg(key);
        for (name, value) in fields {
            cmd.arg(name).arg(value.as_slice());
        }
        let _: i64 = cmd
            .query_async(&mut self.conn())
            .await
            .map_err(|e| MirrorError::write(key, e))?;
        Ok(())
    }

    async fn set_fields_if_exists(
        &self,
        key: &str,
        fields: &[(String, Vec<u8>)],
    ) -> MirrorResult<bool> {
        let mut invocation = self.set_if_exists.prepare_invoke();
        invocation.key(key);
        for (name, value) in fields {
            invocation.arg(name).arg(value.as_slice());
        }
        let updated: i64 = invocation
            .invoke_async(&mut self.conn())
            .await
            .map_err(|e| MirrorError::write(key, e))?;
        Ok(updated == 1)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> MirrorResult<()> {
        let _: i64 = ::redis::cmd("PEXPIRE")
            .arg(key)
            .arg(ttl.as_millis() as u64)
            .query_async(&mut self.conn())
            .await
            .map_err(|e| MirrorError::write(key, e))?;
        Ok(())
    }

    async fn try_acquire_lease(&self, key: &str, ttl: Duration) -> MirrorResult<bool> {
        let reply: Option<String> = ::redis::cmd("SET")
            .arg(key)
            .arg("1")
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut self.conn())
            .await
            .map_err(|e| MirrorError::write(key, e))?;
        Ok(reply.is_some())
    }

    async fn release_lease(&self, key: &str) -> MirrorResult<()> {
        let _: i64 = ::redis::cmd("DEL")
            .arg(key)
            .query_async(&mut self.conn())
            .await
            .map_err(|e| MirrorError::write(key, e))?;
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> MirrorResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let removed: u64 = ::redis::cmd("DEL")
            .arg(keys)
            .query_async(&mut self.conn())
            .await
            .map_err(|e| MirrorError::write(&keys.join(","), e))?;
        Ok(removed)
    }

    async fn exists(&self, key: &str) -> MirrorResult<bool> {
        let count: i64 = ::redis::cmd("EXISTS")
            .arg(key)
            .query_async(&mut self.conn())
            .await
            .map_err(|e| MirrorError::read(key, e))?;
        Ok(count > 0)
    }

    async fn read_fields(&self, key: &str) -> MirrorResult<Option<FieldMap>> {
        let map: HashMap<String, Vec<u8>> = ::redis::cmd("HGETALL")
            .arg(key)
            .query_async(&mut self.conn())
            .await
            .map_err(|e| MirrorError::read(key, e))?;
        if map.is_empty() {
            return Ok(None);
        }
        Ok(Some(map.into_iter().collect()))
    }

    async fn read_field(&self, key: &str, field: &str) -> MirrorResult<Option<Vec<u8>>> {
        ::redis::cmd("HGET")
            .arg(key)
            .arg(field)
            .query_async(&mut self.conn())
            .await
            .map_err(|e| MirrorError::read(key, e))
    }

    async fn scan_prefix(&self, prefix: &str) -> MirrorResult<Vec<String>> {
        let pattern = format!("{prefix}*");
        let mut conn = self.conn();
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();
        loop {
            let (next, batch): (u64, Vec<String>) = ::redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(self.scan_count)
                .query_async(&mut conn)
                .await
                .map_err(|e| MirrorError::read(&pattern, e))?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        // SCAN may return a key more than once across iterations.
        keys.sort();
        keys.dedup();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_config() -> MirrorConfig {
        MirrorConfig {
            url: "redis://127.0.0.1:6379".to_string(),
            ..MirrorConfig::default()
        }
    }

    #[tokio::test]
    async fn disabled_config_never_connects() {
        let config = MirrorConfig {
            enabled: false,
            ..local_config()
        };
        let err = RedisBackend::connect(&config).await.err().unwrap();
        assert!(matches!(err, MirrorError::Disabled));
    }

    #[tokio::test]
    async fn malformed_url_is_a_connection_error() {
        let config = MirrorConfig {
            url: "not a url".to_string(),
            ..MirrorConfig::default()
        };
        let err = RedisBackend::connect(&config).await.err().unwrap();
        assert!(matches!(err, MirrorError::Connection(_)));
    }

    #[tokio::test]
    #[ignore = "requires a Redis server on 127.0.0.1:6379"]
    async fn test_redis_lease_and_ttl_roundtrip() {
        let backend = RedisBackend::connect(&local_config()).await.unwrap();
        let ttl = Duration::from_secs(5);

        assert!(backend.try_acquire_lease("lock:test", ttl).await.unwrap());
        assert!(!backend.try_acquire_lease("lock:test", ttl).await.unwrap());
        backend.release_lease("lock:test").await.unwrap();

        let fields = vec![("hash".to_string(), b"0xab".to_vec())];
        backend.write_fields("tx:test", &fields).await.unwrap();
        backend
            .expire("tx:test", Duration::from_millis(200))
            .await
            .unwrap();
        assert!(backend.exists("tx:test").await.unwrap());
        assert!(backend
            .set_fields_if_exists("tx:test", &[("status".to_string(), b"1".to_vec())])
            .await
            .unwrap());

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(!backend.exists("tx:test").await.unwrap());
        assert!(!backend
            .set_fields_if_exists("tx:test", &[("status".to_string(), b"1".to_vec())])
            .await
            .unwrap());
    }
}
