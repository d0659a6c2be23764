//! # 存储抽象层
//!
//! 引擎依赖的键值存储能力集合。值一律是原始字符串，信封、压缩与校验都在引擎一侧完成。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::{AppConfig, StoreType};
use crate::error::{CacheError, StartupError};

mod memory;
mod redis;

pub use memory::MemoryStore;
pub use redis::RedisStore;

/// 存储层原始错误，在引擎边界被分类为 [`CacheError`]
#[derive(Debug, Error)]
pub enum StoreError {
    /// Redis 客户端错误
    #[error(transparent)]
    Redis(#[from] ::redis::RedisError),

    /// 等待响应超过 `response_timeout`
    #[error("store response timed out after {0:?}")]
    Timeout(Duration),

    /// 其他后端错误（文本与 Redis 的报错措辞保持一致）
    #[error("{0}")]
    Backend(String),
}

/// 存储层结果类型
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// 键值存储能力
///
/// TTL 单位为秒。`ttl` 返回 `-2` 表示键不存在，`-1` 表示没有过期时间。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// 后端名称，用于日志
    fn backend(&self) -> &'static str;

    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    async fn set(&self, key: &str, value: &str, ttl: Option<u64>) -> StoreResult<()>;

    /// 原子的"不存在才写入"，成功写入返回 `true`
    async fn set_nx(&self, key: &str, value: &str, ttl: u64) -> StoreResult<bool>;

    /// 删除多个键，返回实际删除的数量
    async fn delete(&self, keys: &[String]) -> StoreResult<u64>;

    /// 仅当键的当前值等于 `expected` 时原子删除
    async fn delete_if_equals(&self, key: &str, expected: &str) -> StoreResult<bool>;

    async fn exists(&self, key: &str) -> StoreResult<bool>;

    /// 按输入顺序返回，未命中的位置为 `None`
    async fn mget(&self, keys: &[String]) -> StoreResult<Vec<Option<String>>>;

    async fn mset(&self, entries: &[(String, String)], ttl: Option<u64>) -> StoreResult<()>;

    /// 键不存在时返回 `false`
    async fn expire(&self, key: &str, ttl: u64) -> StoreResult<bool>;

    async fn ttl(&self, key: &str) -> StoreResult<i64>;

    async fn incr(&self, key: &str, delta: i64) -> StoreResult<i64>;

    /// 枚举匹配 glob 模式的键
    async fn scan(&self, pattern: &str) -> StoreResult<Vec<String>>;

    async fn lpush(&self, key: &str, values: &[String]) -> StoreResult<u64>;

    async fn ltrim(&self, key: &str, start: i64, stop: i64) -> StoreResult<()>;

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> StoreResult<Vec<String>>;

    async fn sadd(&self, key: &str, members: &[String]) -> StoreResult<u64>;

    async fn srem(&self, key: &str, members: &[String]) -> StoreResult<u64>;

    async fn sismember(&self, key: &str, member: &str) -> StoreResult<bool>;

    async fn smembers(&self, key: &str) -> StoreResult<Vec<String>>;

    async fn hset(&self, key: &str, field: &str, value: &str) -> StoreResult<()>;

    async fn hgetall(&self, key: &str) -> StoreResult<HashMap<String, String>>;

    async fn hincrby(&self, key: &str, field: &str, delta: i64) -> StoreResult<i64>;

    async fn ping(&self) -> StoreResult<()>;

    async fn shutdown(&self) -> StoreResult<()>;
}

/// 按配置创建存储后端
pub async fn connect_store(config: &AppConfig) -> Result<Arc<dyn KeyValueStore>, StartupError> {
    match config.store {
        StoreType::Memory => Ok(Arc::new(MemoryStore::new())),
        StoreType::Redis => {
            let redis_config = config.redis.as_ref().ok_or_else(|| {
                crate::error::ConfigError::invalid("redis", "store = \"redis\" 时必须提供 [redis] 配置")
            })?;
            let store = RedisStore::connect(redis_config)
                .await
                .map_err(|e| CacheError::from_store("connect", e, None))?;
            Ok(Arc::new(store))
        }
    }
}
