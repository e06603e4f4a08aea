//! Redis backend for the coordination store

use async_trait::async_trait;
use deadpool_redis::{Config as PoolConfig, Connection, Pool, Runtime};
use redis::{AsyncCommands, RedisError, Script};
use std::collections::HashMap;
use std::time::Duration;

use super::{CoordinationStore, StoreError, StoreResult};
use crate::config::StoreConfig;

/// Atomic ZREM + LPUSH used for delayed promotion
const PROMOTE_SCRIPT: &str = r#"
if redis.call('ZREM', KEYS[1], ARGV[1]) == 1 then
    redis.call('LPUSH', KEYS[2], ARGV[1])
    return 1
end
return 0
"#;

impl From<RedisError> for StoreError {
    fn from(err: RedisError) -> Self {
        if err.is_timeout() {
            StoreError::Timeout
        } else if err.is_connection_dropped() || err.is_connection_refusal() || err.is_io_error()
        {
            StoreError::Connection(err.to_string())
        } else {
            StoreError::Command(err.to_string())
        }
    }
}

impl From<deadpool_redis::PoolError> for StoreError {
    fn from(err: deadpool_redis::PoolError) -> Self {
        StoreError::Pool(err.to_string())
    }
}

/// Coordination store backed by a pooled Redis connection
pub struct RedisStore {
    pool: Pool,
    promote: Script,
}

impl RedisStore {
    /// Build the pool and verify connectivity with a PING
    pub async fn connect(config: &StoreConfig) -> StoreResult<Self> {
        let pool = PoolConfig::from_url(&config.url)
            .builder()
            .map_err(|e| StoreError::Connection(format!("invalid store url: {e}")))?
            .max_size(config.pool_size)
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| StoreError::Connection(format!("failed to build pool: {e}")))?;

        let store = Self {
            pool,
            promote: Script::new(PROMOTE_SCRIPT),
        };
        store.ping().await?;

        tracing::info!(url = %config.url, pool_size = config.pool_size, "Connected to Redis");
        Ok(store)
    }

    async fn conn(&self) -> StoreResult<Connection> {
        Ok(self.pool.get().await?)
    }
}

fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

#[async_trait]
impl CoordinationStore for RedisStore {
    async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        let _: String = redis::cmd("PING").query_async(&mut *conn).await?;
        Ok(())
    }

    async fn push(&self, list: &str, value: &str) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        let _: () = conn.lpush(list, value).await?;
        Ok(())
    }

    async fn push_oldest(&self, list: &str, value: &str) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        let _: () = conn.rpush(list, value).await?;
        Ok(())
    }

    async fn blocking_pop(&self, list: &str, timeout: Duration) -> StoreResult<Option<String>> {
        let mut conn = self.conn().await?;
        let popped: Option<(String, String)> = redis::cmd("BRPOP")
            .arg(list)
            .arg(timeout.as_secs_f64())
            .query_async(&mut *conn)
            .await?;
        Ok(popped.map(|(_, value)| value))
    }

    async fn list_len(&self, list: &str) -> StoreResult<usize> {
        let mut conn = self.conn().await?;
        Ok(conn.llen(list).await?)
    }

    async fn list_trim(&self, list: &str, keep: usize) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        if keep == 0 {
            let _: () = conn.del(list).await?;
        } else {
            // Newest values sit at the head
            let _: () = conn.ltrim(list, 0, keep as isize - 1).await?;
        }
        Ok(())
    }

    async fn list_recent(&self, list: &str, limit: usize) -> StoreResult<Vec<String>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.conn().await?;
        Ok(conn.lrange(list, 0, limit as isize - 1).await?)
    }

    async fn sorted_add(&self, key: &str, member: &str, score: f64) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        let _: () = conn.zadd(key, member, score).await?;
        Ok(())
    }

    async fn sorted_range_by_score(&self, key: &str, max: f64) -> StoreResult<Vec<(String, f64)>> {
        let mut conn = self.conn().await?;
        Ok(conn.zrangebyscore_withscores(key, "-inf", max).await?)
    }

    async fn sorted_remove(&self, key: &str, member: &str) -> StoreResult<bool> {
        let mut conn = self.conn().await?;
        let removed: i64 = conn.zrem(key, member).await?;
        Ok(removed > 0)
    }

    async fn sorted_len(&self, key: &str) -> StoreResult<usize> {
        let mut conn = self.conn().await?;
        Ok(conn.zcard(key).await?)
    }

    async fn promote_member(&self, key: &str, member: &str, list: &str) -> StoreResult<bool> {
        let mut conn = self.conn().await?;
        let moved: i64 = self
            .promote
            .key(key)
            .key(list)
            .arg(member)
            .invoke_async(&mut *conn)
            .await?;
        Ok(moved == 1)
    }

    async fn set_add(&self, key: &str, member: &str) -> StoreResult<bool> {
        let mut conn = self.conn().await?;
        let added: i64 = conn.sadd(key, member).await?;
        Ok(added > 0)
    }

    async fn set_contains(&self, key: &str, member: &str) -> StoreResult<bool> {
        let mut conn = self.conn().await?;
        Ok(conn.sismember(key, member).await?)
    }

    async fn set_remove(&self, key: &str, member: &str) -> StoreResult<bool> {
        let mut conn = self.conn().await?;
        let removed: i64 = conn.srem(key, member).await?;
        Ok(removed > 0)
    }

    async fn hash_set(&self, key: &str, fields: &[(String, String)]) -> StoreResult<()> {
        if fields.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn().await?;
        let _: () = conn.hset_multiple(key, fields).await?;
        Ok(())
    }

    async fn hash_get_all(&self, key: &str) -> StoreResult<HashMap<String, String>> {
        let mut conn = self.conn().await?;
        Ok(conn.hgetall(key).await?)
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.conn().await?;
        Ok(conn.get(key).await?)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        match ttl {
            Some(ttl) => {
                let _: () = conn.set_ex(key, value, ttl_secs(ttl)).await?;
            }
            None => {
                let _: () = conn.set(key, value).await?;
            }
        }
        Ok(())
    }

    async fn take(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.conn().await?;
        let value: Option<String> = redis::cmd("GETDEL").arg(key).query_async(&mut *conn).await?;
        Ok(value)
    }

    async fn incr(&self, key: &str) -> StoreResult<i64> {
        let mut conn = self.conn().await?;
        Ok(conn.incr(key, 1).await?)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        let _: () = conn.expire(key, ttl_secs(ttl) as i64).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        let _: () = conn.del(key).await?;
        Ok(())
    }
}
