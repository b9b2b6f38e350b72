//! Redis implementation of the key-value port.
//!
//! TTLs use the millisecond commands (`SET PX`, `PEXPIRE`, `PTTL`) so
//! short session windows round-trip without losing precision. The
//! conditional write maps to `SET NX PX`, which Redis guarantees to be
//! atomic across instances.

use std::time::Duration;

use async_trait::async_trait;
use caas_auth::error::AuthError;
use caas_auth::storage::kv::{KeyTtl, KeyValueStore};
use caas_auth::AuthResult;
use deadpool_redis::Pool;
use redis::AsyncCommands;

/// [`KeyValueStore`] backed by a Redis connection pool.
pub struct RedisKvStore {
    pool: Pool,
}

impl RedisKvStore {
    /// Creates a store over an existing pool.
    #[must_use]
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    async fn conn(&self) -> AuthResult<deadpool_redis::Connection> {
        self.pool
            .get()
            .await
            .map_err(|e| AuthError::storage(format!("Failed to get Redis connection: {e}")))
    }
}

fn map_err(err: redis::RedisError) -> AuthError {
    AuthError::storage(format!("Redis error: {err}"))
}

/// Maps a `PTTL` reply to the port's TTL shape.
fn map_pttl(pttl_ms: i64) -> KeyTtl {
    match pttl_ms {
        -2 => KeyTtl::Missing,
        -1 => KeyTtl::NoExpiry,
        ms => KeyTtl::Expires(Duration::from_millis(ms.max(0) as u64)),
    }
}

#[async_trait]
impl KeyValueStore for RedisKvStore {
    async fn get(&self, key: &str) -> AuthResult<Option<String>> {
        let mut conn = self.conn().await?;
        conn.get(key).await.map_err(map_err)
    }

    async fn put(&self, key: &str, value: &str, ttl: Option<Duration>) -> AuthResult<()> {
        let mut conn = self.conn().await?;
        match ttl {
            Some(ttl) => {
                let mut cmd = redis::cmd("SET");
                cmd.arg(key).arg(value).arg("PX").arg(ttl.as_millis() as u64);
                let _: () = cmd.query_async(&mut conn).await.map_err(map_err)?;
                Ok(())
            }
            None => conn.set(key, value).await.map_err(map_err),
        }
    }

    async fn put_if_absent(&self, key: &str, value: &str, ttl: Duration) -> AuthResult<bool> {
        let mut conn = self.conn().await?;
        let mut cmd = redis::cmd("SET");
        cmd.arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64);
        let reply: Option<String> = cmd.query_async(&mut conn).await.map_err(map_err)?;
        Ok(reply.is_some())
    }

    async fn delete(&self, key: &str) -> AuthResult<bool> {
        let mut conn = self.conn().await?;
        let removed: i64 = conn.del(key).await.map_err(map_err)?;
        Ok(removed > 0)
    }

    async fn exists(&self, key: &str) -> AuthResult<bool> {
        let mut conn = self.conn().await?;
        conn.exists(key).await.map_err(map_err)
    }

    async fn ttl(&self, key: &str) -> AuthResult<KeyTtl> {
        let mut conn = self.conn().await?;
        let pttl_ms: i64 = redis::cmd("PTTL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(map_err)?;
        Ok(map_pttl(pttl_ms))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> AuthResult<bool> {
        let mut conn = self.conn().await?;
        let set: i64 = redis::cmd("PEXPIRE")
            .arg(key)
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await
            .map_err(map_err)?;
        Ok(set == 1)
    }

    async fn set_add(&self, key: &str, member: &str) -> AuthResult<()> {
        let mut conn = self.conn().await?;
        conn.sadd::<_, _, ()>(key, member).await.map_err(map_err)
    }

    async fn set_remove(&self, key: &str, member: &str) -> AuthResult<()> {
        let mut conn = self.conn().await?;
        conn.srem::<_, _, ()>(key, member).await.map_err(map_err)
    }

    async fn set_members(&self, key: &str) -> AuthResult<Vec<String>> {
        let mut conn = self.conn().await?;
        conn.smembers(key).await.map_err(map_err)
    }

    async fn set_len(&self, key: &str) -> AuthResult<usize> {
        let mut conn = self.conn().await?;
        let len: u64 = conn.scard(key).await.map_err(map_err)?;
        Ok(len as usize)
    }

    async fn scan_keys(&self, prefix: &str) -> AuthResult<Vec<String>> {
        let mut conn = self.conn().await?;
        let pattern = format!("{prefix}*");
        let mut keys = Vec::new();
        let mut iter = conn
            .scan_match::<_, String>(&pattern)
            .await
            .map_err(map_err)?;
        while let Some(key) = iter.next_item().await {
            keys.push(key);
        }
        keys.sort();
        keys.dedup();
        Ok(keys)
    }
}
