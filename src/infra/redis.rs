//! Redis-backed [`KeyValueCache`].
//!
//! Every command runs on a cloned [`ConnectionManager`] handle under the
//! configured per-operation deadline. Conditional hash and lease operations
//! are Lua scripts so they stay atomic on the server.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use redis::{Client, RedisResult, Script, aio::ConnectionManager};
use tracing::info;

use crate::cache::{CacheError, KeyValueCache};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

static HINCR_EXISTING: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r"
        if redis.call('HEXISTS', KEYS[1], ARGV[1]) == 1 then
            return redis.call('HINCRBY', KEYS[1], ARGV[1], ARGV[2])
        end
        return false
        ",
    )
});

static HSET_GUARDED: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r"
        if redis.call('HEXISTS', KEYS[2], ARGV[1]) == 1 then
            redis.call('HSET', KEYS[1], ARGV[1], ARGV[2])
            return 1
        end
        return 0
        ",
    )
});

static HDEL_UNGUARDED: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r"
        if redis.call('HEXISTS', KEYS[2], ARGV[1]) == 0 then
            return redis.call('HDEL', KEYS[1], ARGV[1])
        end
        return 0
        ",
    )
});

static DELETE_IF_EQ:Lazy<Script> = Lazy::new(|| {
    Script::new(
        r"
        if redis.call('GET', KEYS[1]) == ARGV[1] then
            return redis.call('DEL', KEYS[1])
        end
        return 0
        ",
    )
});

#[derive(Clone)]
pub struct RedisCache {
    conn: ConnectionManager,
    op_timeout: Duration,
}

impl RedisCache {
    pub async fn connect(url: &str, op_timeout: Duration) -> Result<Self, CacheError> {
        let client = Client::open(url).map_err(CacheError::unavailable)?;
        let conn = tokio::time::timeout(CONNECT_TIMEOUT, client.get_connection_manager())
            .await
            .map_err(|_| CacheError::Timeout {
                op: "connect",
                after: CONNECT_TIMEOUT,
            })?
            .map_err(CacheError::unavailable)?;

        info!(
            target = "recipehub::infra::redis",
            op_timeout_ms = op_timeout.as_millis() as u64,
            "connected to redis"
        );
        Ok(Self { conn, op_timeout })
    }

    async fn run<T, F>(&self, op: &'static str, fut: F) -> Result<T, CacheError>
    where
        F: Future<Output = RedisResult<T>>,
    {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(result) => result.map_err(CacheError::unavailable),
            Err(_) => Err(CacheError::Timeout {
                op,
                after: self.op_timeout,
            }),
        }
    }
}

fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

#[async_trait]
impl KeyValueCache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.conn.clone();
        self.run("get", async move {
            redis::cmd("GET").arg(key).query_async(&mut conn).await
        })
        .await
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        self.run("set_ex", async move {
            redis::cmd("SET")
                .arg(key)
                .arg(value)
                .arg("EX")
                .arg(ttl_secs(ttl))
                .query_async(&mut conn)
                .await
        })
        .await
    }

    async fn replace_keep_ttl(&self, key: &str, value: &str) -> Result<bool, CacheError> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = self
            .run("replace_keep_ttl", async move {
                redis::cmd("SET")
                    .arg(key)
                    .arg(value)
                    .arg("XX")
                    .arg("KEEPTTL")
                    .query_async(&mut conn)
                    .await
            })
            .await?;
        Ok(reply.is_some())
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, CacheError> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = self
            .run("set_nx_ex", async move {
                redis::cmd("SET")
                    .arg(key)
                    .arg(value)
                    .arg("NX")
                    .arg("EX")
                    .arg(ttl_secs(ttl))
                    .query_async(&mut conn)
                    .await
            })
            .await?;
        Ok(reply.is_some())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let _removed: i64 = self
            .run("delete", async move {
                redis::cmd("DEL").arg(key).query_async(&mut conn).await
            })
            .await?;
        Ok(())
    }

    async fn delete_if_eq(&self, key: &str, expected: &str) -> Result<bool, CacheError> {
        let mut conn = self.conn.clone();
        let removed: i64 = self
            .run("delete_if_eq", async move {
                DELETE_IF_EQ
                    .key(key)
                    .arg(expected)
                    .invoke_async(&mut conn)
                    .await
            })
            .await?;
        Ok(removed == 1)
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<i64>, CacheError> {
        let mut conn = self.conn.clone();
        self.run("hget", async move {
            redis::cmd("HGET")
                .arg(key)
                .arg(field)
                .query_async(&mut conn)
                .await
        })
        .await
    }

    async fn hset(&self, key: &str, field: &str, value: i64) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let _added: i64 = self
            .run("hset", async move {
                redis::cmd("HSET")
                    .arg(key)
                    .arg(field)
                    .arg(value)
                    .query_async(&mut conn)
                    .await
            })
            .await?;
        Ok(())
    }

    async fn hset_nx(&self, key: &str, field: &str, value: i64) -> Result<bool, CacheError> {
        let mut conn = self.conn.clone();
        self.run("hset_nx", async move {
            redis::cmd("HSETNX")
                .arg(key)
                .arg(field)
                .arg(value)
                .query_async(&mut conn)
                .await
        })
        .await
    }

    async fn hincr_existing(
        &self,
        key: &str,
        field: &str,
        delta: i64,
    ) -> Result<Option<i64>, CacheError> {
        let mut conn = self.conn.clone();
        self.run("hincr_existing", async move {
            HINCR_EXISTING
                .key(key)
                .arg(field)
                .arg(delta)
                .invoke_async(&mut conn)
                .await
        })
        .await
    }

    async fn hset_guarded(
        &self,
        key: &str,
        guard: &str,
        field: &str,
        value: i64,
    ) -> Result<bool, CacheError> {
        let mut conn = self.conn.clone();
        let written: i64 = self
            .run("hset_guarded", async move {
                HSET_GUARDED
                    .key(key)
                    .key(guard)
                    .arg(field)
                    .arg(value)
                    .invoke_async(&mut conn)
                    .await
            })
            .await?;
        Ok(written == 1)
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let _removed: i64 = self
            .run("hdel", async move {
                redis::cmd("HDEL")
                    .arg(key)
                    .arg(field)
                    .query_async(&mut conn)
                    .await
            })
            .await?;
        Ok(())
    }

    async fn hdel_unguarded(
        &self,
        key: &str,
        guard: &str,
        field: &str,
    ) -> Result<bool, CacheError> {
        let mut conn = self.conn.clone();
        let removed: i64 = self
            .run("hdel_unguarded", async move {
                HDEL_UNGUARDED
                    .key(key)
                    .key(guard)
                    .arg(field)
                    .invoke_async(&mut conn)
                    .await
            })
            .await?;
        Ok(removed == 1)
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, i64>, CacheError> {
        let mut conn = self.conn.clone();
        self.run("hgetall", async move {
            redis::cmd("HGETALL").arg(key).query_async(&mut conn).await
        })
        .await
    }

    async fn ping(&self) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let _pong: String = self
            .run("ping", async move {
                redis::cmd("PING").query_async(&mut conn).await
            })
            .await?;
        Ok(())
    }
}
