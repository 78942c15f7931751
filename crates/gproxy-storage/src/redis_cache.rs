//! Redis-backed `Cache` (spec.md §1, §6): the RPM bucket, affinity, and
//! circuit-state keys this crate's `gproxy-provider-core::cache` callers
//! read/write are deliberately opaque byte blobs, so this is a thin wrapper
//! over `GET`/`SETEX`/`INCR`/`DEL` rather than a typed client.
//!
//! Grounded on `gateway_caching.rs`'s Redis backend in the pack's gateway
//! example: a `ConnectionManager` held across calls (it reconnects on its
//! own), commands issued with `redis::cmd` rather than typed helper methods.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use gproxy_provider_core::cache::Cache;

pub struct RedisCache {
    conn: ConnectionManager,
}

impl RedisCache {
    pub async fn connect(url: &str) -> redis::RedisResult<Self> {
        let client = redis::Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn get(&self, key: &str) -> Option<Vec<u8>> {
        let mut conn = self.conn.clone();
        match conn.get::<_, Option<Vec<u8>>>(key).await {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(%key, %err, "redis GET failed");
                None
            }
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl_secs: u64) {
        let mut conn = self.conn.clone();
        let result = if ttl_secs > 0 {
            conn.set_ex::<_, _, ()>(key, value, ttl_secs).await
        } else {
            conn.set::<_, _, ()>(key, value).await
        };
        if let Err(err) = result {
            tracing::warn!(%key, %err, "redis SET failed");
        }
    }

    async fn incr(&self, key: &str, ttl_secs: u64) -> u64 {
        let mut conn = self.conn.clone();
        match conn.incr::<_, _, u64>(key, 1u64).await {
            Ok(next) => {
                if next == 1 && ttl_secs > 0
                    && let Err(err) = conn.expire::<_, ()>(key, ttl_secs as i64).await
                {
                    tracing::warn!(%key, %err, "redis EXPIRE failed");
                }
                next
            }
            Err(err) => {
                tracing::warn!(%key, %err, "redis INCR failed");
                0
            }
        }
    }

    async fn delete(&self, key: &str) {
        let mut conn = self.conn.clone();
        if let Err(err) = conn.del::<_, ()>(key).await {
            tracing::warn!(%key, %err, "redis DEL failed");
        }
    }
}
