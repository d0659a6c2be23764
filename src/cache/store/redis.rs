//! # Redis 存储后端
//!
//! 基于 `ConnectionManager` 的共享多路复用连接，断线后自动重连。

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::time::Duration;

use ::redis::{AsyncCommands, Client, RedisResult, aio::ConnectionManager};
use async_trait::async_trait;

use super::{KeyValueStore, StoreError, StoreResult};
use crate::config::RedisConfig;
use crate::logging::{LogComponent, LogStage};
use crate::{ldebug, linfo};

/// 单次 SCAN 的建议条数
const SCAN_COUNT: usize = 500;

/// 值匹配才删除，GET 与 DEL 在同一脚本内执行
const DELETE_IF_EQUALS: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
";

/// Redis 存储
#[derive(Clone)]
pub struct RedisStore {
    connection_manager: ConnectionManager,
    response_timeout: Duration,
    address: String,
}

impl RedisStore {
    /// 建立连接，超过 `connection_timeout` 视为连接失败
    pub async fn connect(config: &RedisConfig) -> StoreResult<Self> {
        let address = config.display_address();
        linfo!(
            "system",
            LogStage::Startup,
            LogComponent::Store,
            "connect_to_redis",
            &format!("正在连接 Redis 服务器: {address}")
        );

        let client = Client::open(config.build_url())?;
        let connect_timeout = Duration::from_secs(config.connection_timeout);
        let connection_manager = tokio::time::timeout(connect_timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| StoreError::Timeout(connect_timeout))??;

        linfo!(
            "system",
            LogStage::Startup,
            LogComponent::Store,
            "redis_connected",
            "Redis 连接建立成功"
        );

        Ok(Self {
            connection_manager,
            response_timeout: Duration::from_secs(config.response_timeout),
            address,
        })
    }

    /// 连接地址（已隐藏密码）
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    fn conn(&self) -> ConnectionManager {
        self.connection_manager.clone()
    }

    async fn timed<T, F>(&self, fut: F) -> StoreResult<T>
    where
        F: Future<Output = RedisResult<T>>,
    {
        match tokio::time::timeout(self.response_timeout, fut).await {
            Ok(result) => result.map_err(StoreError::from),
            Err(_) => Err(StoreError::Timeout(self.response_timeout)),
        }
    }
}

fn seconds_i64(ttl: u64) -> i64 {
    i64::try_from(ttl).unwrap_or(i64::MAX)
}

fn index(value: i64) -> isize {
    isize::try_from(value).unwrap_or(if value < 0 { isize::MIN } else { isize::MAX })
}

#[async_trait]
impl KeyValueStore for RedisStore {
    fn backend(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.conn();
        self.timed(conn.get(key)).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<u64>) -> StoreResult<()> {
        let mut conn = self.conn();
        match ttl {
            Some(ttl) => self.timed(conn.set_ex::<_, _, ()>(key, value, ttl)).await,
            None => self.timed(conn.set::<_, _, ()>(key, value)).await,
        }
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: u64) -> StoreResult<bool> {
        let mut conn = self.conn();
        let reply: Option<String> = self
            .timed(
                ::redis::cmd("SET")
                    .arg(key)
                    .arg(value)
                    .arg("NX")
                    .arg("EX")
                    .arg(ttl)
                    .query_async(&mut conn),
            )
            .await?;
        Ok(reply.is_some())
    }

    async fn delete_if_equals(&self, key: &str, expected: &str) -> StoreResult<bool> {
        let mut conn = self.conn();
        let script = ::redis::Script::new(DELETE_IF_EQUALS);
        let removed: i64 = self
            .timed(script.key(key).arg(expected).invoke_async(&mut conn))
            .await?;
        Ok(removed > 0)
    }

    async fn delete(&self, keys: &[String]) -> StoreResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn();
        self.timed(conn.del(keys)).await
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        let mut conn = self.conn();
        self.timed(conn.exists(key)).await
    }

    async fn mget(&self, keys: &[String]) -> StoreResult<Vec<Option<String>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn();
        self.timed(::redis::cmd("MGET").arg(keys).query_async(&mut conn))
            .await
    }

    async fn mset(&self, entries: &[(String, String)], ttl: Option<u64>) -> StoreResult<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut pipe = ::redis::pipe();
        pipe.atomic();
        for (key, value) in entries {
            match ttl {
                Some(ttl) => pipe.set_ex(key, value, ttl).ignore(),
                None => pipe.set(key, value).ignore(),
            };
        }
        let mut conn = self.conn();
        self.timed(pipe.query_async::<()>(&mut conn)).await
    }

    async fn expire(&self, key: &str, ttl: u64) -> StoreResult<bool> {
        let mut conn = self.conn();
        self.timed(conn.expire(key, seconds_i64(ttl))).await
    }

    async fn ttl(&self, key: &str) -> StoreResult<i64> {
        let mut conn = self.conn();
        self.timed(conn.ttl(key)).await
    }

    async fn incr(&self, key: &str, delta: i64) -> StoreResult<i64> {
        let mut conn = self.conn();
        self.timed(conn.incr(key, delta)).await
    }

    async fn scan(&self, pattern: &str) -> StoreResult<Vec<String>> {
        let mut conn = self.conn();
        let mut seen = HashSet::new();
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;

        loop {
            let (next, batch): (u64, Vec<String>) = self
                .timed(
                    ::redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(pattern)
                        .arg("COUNT")
                        .arg(SCAN_COUNT)
                        .query_async(&mut conn),
                )
                .await?;

            // SCAN 可能重复返回同一个键
            for key in batch {
                if seen.insert(key.clone()) {
                    keys.push(key);
                }
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        ldebug!(
            "system",
            LogStage::Cache,
            LogComponent::Store,
            "scan",
            &format!("SCAN {pattern} 找到 {} 个键", keys.len())
        );
        Ok(keys)
    }

    async fn lpush(&self, key: &str, values: &[String]) -> StoreResult<u64> {
        let mut conn = self.conn();
        self.timed(conn.lpush(key, values)).await
    }

    async fn ltrim(&self, key: &str, start: i64, stop: i64) -> StoreResult<()> {
        let mut conn = self.conn();
        self.timed(conn.ltrim::<_, ()>(key, index(start), index(stop)))
            .await
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> StoreResult<Vec<String>> {
        let mut conn = self.conn();
        self.timed(conn.lrange(key, index(start), index(stop))).await
    }

    async fn sadd(&self, key: &str, members: &[String]) -> StoreResult<u64> {
        let mut conn = self.conn();
        self.timed(conn.sadd(key, members)).await
    }

    async fn srem(&self, key: &str, members: &[String]) -> StoreResult<u64> {
        let mut conn = self.conn();
        self.timed(conn.srem(key, members)).await
    }

    async fn sismember(&self, key: &str, member: &str) -> StoreResult<bool> {
        let mut conn = self.conn();
        self.timed(conn.sismember(key, member)).await
    }

    async fn smembers(&self, key: &str) -> StoreResult<Vec<String>> {
        let mut conn = self.conn();
        self.timed(conn.smembers(key)).await
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> StoreResult<()> {
        let mut conn = self.conn();
        self.timed(conn.hset::<_, _, _, ()>(key, field, value))
            .await
    }

    async fn hgetall(&self, key: &str) -> StoreResult<HashMap<String, String>> {
        let mut conn = self.conn();
        self.timed(conn.hgetall(key)).await
    }

    async fn hincrby(&self, key: &str, field: &str, delta: i64) -> StoreResult<i64> {
        let mut conn = self.conn();
        self.timed(conn.hincr(key, field, delta)).await
    }

    async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.conn();
        let _: String = self
            .timed(::redis::Cmd::new().arg("PING").query_async(&mut conn))
            .await?;
        Ok(())
    }

    async fn shutdown(&self) -> StoreResult<()> {
        // ConnectionManager 随最后一个克隆释放，这里只记录
        linfo!(
            "system",
            LogStage::Shutdown,
            LogComponent::Store,
            "redis_shutdown",
            &format!("关闭 Redis 存储: {}", self.address)
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_saturates() {
        assert_eq!(index(-1), -1);
        assert_eq!(index(10), 10);
    }

    #[tokio::test]
    async fn test_connect_refused_is_error() {
        let config = RedisConfig {
            port: 1,
            connection_timeout: 1,
            ..RedisConfig::default()
        };
        assert!(RedisStore::connect(&config).await.is_err());
    }
}
