//! # 缓存引擎
//!
//! 组合键校验、TTL 策略、编解码、压缩和批量守卫，在一个共享的存储连接上提供缓存原语。
//! 引擎内部不做重试；校验类错误在任何 I/O 之前返回。

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::{Serialize, de::DeserializeOwned};

use super::batch::BatchGuard;
use super::codec::{self, CompressMode, Encoding, ValueCodec};
use super::compression::CompressionFilter;
use super::keys::KeyBuilder;
use super::single_flight::SingleFlight;
use super::stats::{CacheStats, StatsSnapshot};
use super::store::{KeyValueStore, StoreResult, connect_store};
use super::ttl::TtlPolicy;
use crate::config::{AppConfig, CacheConfig, SingleFlightMode};
use crate::error::{CacheError, ConfigError, Result, StartupError, ValidationKind};
use crate::logging::{LogComponent, LogStage};
use crate::{ldebug, linfo, lwarn};

/// 写入选项
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetOptions {
    /// 显式 TTL（秒），优先级最高
    pub ttl: Option<u64>,
    /// 数据层级名称，未指定 TTL 时用来查表
    pub tier: Option<String>,
    /// 载荷编码
    pub encoding: Encoding,
    /// 是否压缩
    pub compress: CompressMode,
}

impl SetOptions {
    #[must_use]
    pub fn with_ttl(ttl: u64) -> Self {
        Self {
            ttl: Some(ttl),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn for_tier(tier: impl Into<String>) -> Self {
        Self {
            tier: Some(tier.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn encoded_with(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    #[must_use]
    pub const fn compression(mut self, compress: CompressMode) -> Self {
        self.compress = compress;
        self
    }
}

pub(super) struct EngineInner {
    pub(super) config: CacheConfig,
    pub(super) store: Arc<dyn KeyValueStore>,
    pub(super) keys: KeyBuilder,
    pub(super) codec: ValueCodec,
    pub(super) ttl: TtlPolicy,
    pub(super) batch: BatchGuard,
    pub(super) stats: CacheStats,
    pub(super) flights: SingleFlight,
    /// 本实例持有的锁：锁名 -> 持有者令牌
    pub(super) lock_tokens: DashMap<String, String>,
}

/// 缓存引擎，克隆开销很小，所有克隆共享同一个存储连接
#[derive(Clone)]
pub struct CacheEngine {
    pub(super) inner: Arc<EngineInner>,
}

impl std::fmt::Debug for CacheEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheEngine")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl CacheEngine {
    /// 用已有的存储构造引擎，配置非法时拒绝构造
    pub fn new(config: CacheConfig, store: Arc<dyn KeyValueStore>) -> std::result::Result<Self, ConfigError> {
        config.validate()?;

        let inner = EngineInner {
            keys: KeyBuilder::new(config.max_key_length),
            codec: ValueCodec::new(CompressionFilter::from_config(&config)),
            ttl: TtlPolicy::from_config(&config),
            batch: BatchGuard::new(config.max_batch_size),
            stats: CacheStats::default(),
            flights: SingleFlight::new(),
            lock_tokens: DashMap::new(),
            store,
            config,
        };

        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// 按应用配置连接存储并构造引擎，存储不可达时启动失败
    pub async fn connect(config: &AppConfig) -> std::result::Result<Self, StartupError> {
        config.validate()?;
        let store = connect_store(config).await?;
        store
            .ping()
            .await
            .map_err(|e| CacheError::from_store("ping", e, None))?;

        linfo!(
            "system",
            LogStage::Startup,
            LogComponent::Engine,
            "engine_ready",
            &format!(
                "缓存引擎已就绪: store={}, single_flight={}",
                store.backend(),
                config.cache.single_flight
            )
        );

        Ok(Self::new(config.cache.clone(), store)?)
    }

    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn ttl_policy(&self) -> &TtlPolicy {
        &self.inner.ttl
    }

    #[must_use]
    pub fn key_builder(&self) -> &KeyBuilder {
        &self.inner.keys
    }

    #[must_use]
    pub fn codec(&self) -> &ValueCodec {
        &self.inner.codec
    }

    /// 统计快照
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// 调用方重试间隔建议
    #[must_use]
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.inner.config.retry_delay_ms)
    }

    /// 组合缓存键
    pub fn build_key(&self, prefix: &str, parts: &[Option<&str>]) -> Result<String> {
        self.inner.keys.build(prefix, parts)
    }

    /// 解析写入 TTL：显式值 > 层级 > 默认值
    pub fn resolve_ttl(&self, options: &SetOptions) -> Result<u64> {
        match (options.ttl, options.tier.as_deref()) {
            (Some(0), _) => Err(CacheError::validation(
                "resolve_ttl",
                ValidationKind::InvalidTtl,
                "TTL 必须大于 0",
            )),
            (Some(ttl), _) => Ok(ttl),
            (None, Some(tier)) => Ok(self.inner.ttl.resolve(tier)),
            (None, None) => Ok(self.inner.ttl.default_ttl()),
        }
    }

    pub(super) fn validate_key(&self, operation: &str, key: &str) -> Result<()> {
        self.inner.keys.validate(operation, key)
    }

    fn validate_keys(&self, operation: &str, keys: &[String]) -> Result<()> {
        keys.iter()
            .try_for_each(|key| self.inner.keys.validate(operation, key))
    }

    /// 执行一次存储 I/O：记录耗时、分类错误
    pub(super) async fn observe<T, F>(&self, operation: &'static str, key: Option<&str>, fut: F) -> Result<T>
    where
        F: Future<Output = StoreResult<T>>,
    {
        let started = Instant::now();
        let result = fut.await;
        let elapsed = started.elapsed();

        if elapsed.as_millis() > u128::from(self.inner.config.slow_operation_ms) {
            self.inner.stats.record_slow();
            lwarn!(
                "system",
                LogStage::Cache,
                LogComponent::Engine,
                operation,
                &format!("慢操作: {}ms", elapsed.as_millis()),
                key = key.unwrap_or("-")
            );
        }

        result.map_err(|e| {
            self.inner.stats.record_error();
            let err = CacheError::from_store(operation, e, key);
            ldebug!(
                "system",
                LogStage::Cache,
                LogComponent::Engine,
                operation,
                &format!("存储操作失败: {err}"),
                code = err.kind().code()
            );
            err
        })
    }

    /// 编码并检查值大小
    fn encode_value<T>(&self, operation: &str, key: &str, value: &T, options: &SetOptions) -> Result<String>
    where
        T: Serialize + ?Sized,
    {
        let raw = self
            .inner
            .codec
            .serialize(value, options.encoding, options.compress)
            .map_err(|e| e.with_key(key))?;

        let max = self.inner.config.max_value_bytes();
        if raw.len() > max {
            return Err(CacheError::validation(
                operation,
                ValidationKind::ValueSize,
                format!("值大小 {} 字节超过上限 {max} 字节", raw.len()),
            )
            .with_key(key));
        }
        Ok(raw)
    }

    fn decode_value<T>(&self, key: &str, raw: &str, encoding: Encoding) -> Result<T>
    where
        T: DeserializeOwned,
    {
        self.inner
            .codec
            .deserialize(raw, encoding)
            .map_err(|e| e.with_key(key))
    }

    /// 读取 JSON 编码的值
    pub async fn get<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: DeserializeOwned,
    {
        self.get_with(key, Encoding::Json).await
    }

    /// 按指定解码器读取
    pub async fn get_with<T>(&self, key: &str, encoding: Encoding) -> Result<Option<T>>
    where
        T: DeserializeOwned,
    {
        self.validate_key("get", key)?;
        let raw = self
            .observe("get", Some(key), self.inner.store.get(key))
            .await?;

        match raw {
            Some(raw) => {
                self.inner.stats.record_hit();
                ldebug!("system", LogStage::Cache, LogComponent::Engine, "cache_hit", &format!("缓存命中: {key}"));
                self.decode_value(key, &raw, encoding).map(Some)
            }
            None => {
                self.inner.stats.record_miss();
                ldebug!("system", LogStage::Cache, LogComponent::Engine, "cache_miss", &format!("缓存未命中: {key}"));
                Ok(None)
            }
        }
    }

    /// 写入值
    pub async fn set<T>(&self, key: &str, value: &T, options: SetOptions) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        self.validate_key("set", key)?;
        let ttl = self.resolve_ttl(&options)?;
        let raw = self.encode_value("set", key, value, &options)?;

        self.observe("set", Some(key), self.inner.store.set(key, &raw, Some(ttl)))
            .await?;
        self.inner.stats.record_write(1);
        ldebug!(
            "system",
            LogStage::Cache,
            LogComponent::Engine,
            "set_cache",
            &format!("设置缓存: key={key}, ttl={ttl}s, size={}", raw.len())
        );
        Ok(())
    }

    /// 删除单个键，返回键是否存在
    pub async fn delete(&self, key: &str) -> Result<bool> {
        self.validate_key("delete", key)?;
        let deleted = self
            .observe("delete", Some(key), self.inner.store.delete(&[key.to_string()]))
            .await?;
        self.inner.stats.record_delete(deleted);
        Ok(deleted > 0)
    }

    /// 删除多个键
    pub async fn delete_many(&self, keys: &[String]) -> Result<u64> {
        let keys = self.inner.batch.check("delete_many", keys)?;
        self.validate_keys("delete_many", keys)?;
        if keys.is_empty() {
            return Ok(0);
        }
        let deleted = self
            .observe("delete_many", None, self.inner.store.delete(keys))
            .await?;
        self.inner.stats.record_delete(deleted);
        Ok(deleted)
    }

    /// 按模式删除：先枚举匹配的键，再按批量上限分批删除
    pub async fn delete_by_pattern(&self, pattern: &str) -> Result<u64> {
        if pattern.trim().is_empty() {
            return Err(CacheError::validation(
                "delete_by_pattern",
                ValidationKind::KeyFormat,
                "删除模式不能为空",
            ));
        }

        let keys = self
            .observe("delete_by_pattern", Some(pattern), self.inner.store.scan(pattern))
            .await?;
        if keys.is_empty() {
            ldebug!(
                "system",
                LogStage::Cache,
                LogComponent::Engine,
                "no_matching_keys",
                &format!("没有找到匹配的缓存键: {pattern}")
            );
            return Ok(0);
        }

        let mut deleted = 0;
        for chunk in self.inner.batch.chunks(&keys) {
            let chunk = self.inner.batch.check("delete_by_pattern", chunk)?;
            deleted += self
                .observe("delete_by_pattern", Some(pattern), self.inner.store.delete(chunk))
                .await?;
        }

        self.inner.stats.record_delete(deleted);
        linfo!(
            "system",
            LogStage::Cache,
            LogComponent::Engine,
            "delete_by_pattern",
            &format!("按模式删除缓存: pattern={pattern}, deleted={deleted}")
        );
        Ok(deleted)
    }

    /// 批量读取，只返回命中的键
    pub async fn multi_get<T>(&self, keys: &[String]) -> Result<HashMap<String, T>>
    where
        T: DeserializeOwned,
    {
        let keys = self.inner.batch.check("multi_get", keys)?;
        self.validate_keys("multi_get", keys)?;
        if keys.is_empty() {
            return Ok(HashMap::new());
        }

        let values = self
            .observe("multi_get", None, self.inner.store.mget(keys))
            .await?;

        let mut found = HashMap::with_capacity(keys.len());
        for (key, raw) in keys.iter().zip(values) {
            if let Some(raw) = raw {
                found.insert(key.clone(), self.decode_value(key, &raw, Encoding::Json)?);
            }
        }

        let hits = found.len() as u64;
        self.inner.stats.record_hits(hits, keys.len() as u64 - hits);
        Ok(found)
    }

    /// 批量写入，所有条目使用同一个 TTL
    pub async fn multi_set<T>(&self, entries: &[(String, T)], options: SetOptions) -> Result<()>
    where
        T: Serialize,
    {
        let entries = self.inner.batch.check("multi_set", entries)?;
        let ttl = self.resolve_ttl(&options)?;

        let mut encoded = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            self.validate_key("multi_set", key)?;
            encoded.push((key.clone(), self.encode_value("multi_set", key, value, &options)?));
        }
        if encoded.is_empty() {
            return Ok(());
        }

        self.observe("multi_set", None, self.inner.store.mset(&encoded, Some(ttl)))
            .await?;
        self.inner.stats.record_write(encoded.len() as u64);
        Ok(())
    }

    /// 设置过期时间，键不存在时返回 `false`
    pub async fn expire(&self, key: &str, ttl_seconds: u64) -> Result<bool> {
        self.validate_key("expire", key)?;
        if ttl_seconds == 0 {
            return Err(CacheError::validation(
                "expire",
                ValidationKind::InvalidTtl,
                "TTL 必须大于 0",
            )
            .with_key(key));
        }
        self.observe("expire", Some(key), self.inner.store.expire(key, ttl_seconds))
            .await
    }

    /// 剩余 TTL（秒）；`-2` 表示键不存在，`-1` 表示没有过期时间
    pub async fn ttl(&self, key: &str) -> Result<i64> {
        self.validate_key("ttl", key)?;
        self.observe("ttl", Some(key), self.inner.store.ttl(key)).await
    }

    pub async fn exists(&self, key: &str) -> Result<bool> {
        self.validate_key("exists", key)?;
        self.observe("exists", Some(key), self.inner.store.exists(key))
            .await
    }

    /// 计数器加一，返回新值
    pub async fn increment(&self, key: &str) -> Result<i64> {
        self.increment_by(key, 1).await
    }

    pub async fn increment_by(&self, key: &str, delta: i64) -> Result<i64> {
        self.validate_key("increment", key)?;
        self.observe("increment", Some(key), self.inner.store.incr(key, delta))
            .await
    }

    /// 从左侧推入列表，元素以信封存储
    pub async fn push<T>(&self, key: &str, values: &[T]) -> Result<u64>
    where
        T: Serialize,
    {
        self.validate_key("push", key)?;
        let values = self.inner.batch.check("push", values)?;
        let options = SetOptions::default();
        let encoded = values
            .iter()
            .map(|value| self.encode_value("push", key, value, &options))
            .collect::<Result<Vec<_>>>()?;
        self.observe("push", Some(key), self.inner.store.lpush(key, &encoded))
            .await
    }

    /// 只保留闭区间 `[start, stop]`
    pub async fn trim(&self, key: &str, start: i64, stop: i64) -> Result<()> {
        self.validate_key("trim", key)?;
        self.observe("trim", Some(key), self.inner.store.ltrim(key, start, stop))
            .await
    }

    /// 读取闭区间 `[start, stop]`，支持负下标
    pub async fn range<T>(&self, key: &str, start: i64, stop: i64) -> Result<Vec<T>>
    where
        T: DeserializeOwned,
    {
        self.validate_key("range", key)?;
        let raws = self
            .observe("range", Some(key), self.inner.store.lrange(key, start, stop))
            .await?;
        raws.iter()
            .map(|raw| self.decode_value(key, raw, Encoding::Json))
            .collect()
    }

    /// 集合成员用规范 JSON 表示（不加信封），保证成员判断可比较
    fn encode_members<T>(&self, operation: &str, key: &str, members: &[T]) -> Result<Vec<String>>
    where
        T: Serialize,
    {
        members
            .iter()
            .map(|member| encode_member(operation, key, member))
            .collect()
    }

    /// 加入集合，返回新增成员数
    pub async fn add<T>(&self, key: &str, members: &[T]) -> Result<u64>
    where
        T: Serialize,
    {
        self.validate_key("add", key)?;
        let members = self.inner.batch.check("add", members)?;
        let encoded = self.encode_members("add", key, members)?;
        self.observe("add", Some(key), self.inner.store.sadd(key, &encoded))
            .await
    }

    /// 从集合移除，返回实际移除数
    pub async fn remove<T>(&self, key: &str, members: &[T]) -> Result<u64>
    where
        T: Serialize,
    {
        self.validate_key("remove", key)?;
        let members = self.inner.batch.check("remove", members)?;
        let encoded = self.encode_members("remove", key, members)?;
        self.observe("remove", Some(key), self.inner.store.srem(key, &encoded))
            .await
    }

    pub async fn is_member<T>(&self, key: &str, member: &T) -> Result<bool>
    where
        T: Serialize + ?Sized,
    {
        self.validate_key("is_member", key)?;
        let encoded = encode_member("is_member", key, member)?;
        self.observe("is_member", Some(key), self.inner.store.sismember(key, &encoded))
            .await
    }

    pub async fn members<T>(&self, key: &str) -> Result<Vec<T>>
    where
        T: DeserializeOwned,
    {
        self.validate_key("members", key)?;
        let raws = self
            .observe("members", Some(key), self.inner.store.smembers(key))
            .await?;
        raws.iter()
            .map(|raw| {
                serde_json::from_str(raw).map_err(|e| {
                    CacheError::serialization("members", format!("集合成员解码失败: {e}"))
                        .with_key(key)
                        .with_source(e)
                })
            })
            .collect()
    }

    /// 写入哈希字段，值以信封存储
    pub async fn hash_set<T>(&self, key: &str, field: &str, value: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        self.validate_key("hash_set", key)?;
        let raw = self.encode_value("hash_set", key, value, &SetOptions::default())?;
        self.observe("hash_set", Some(key), self.inner.store.hset(key, field, &raw))
            .await?;
        self.inner.stats.record_write(1);
        Ok(())
    }

    /// 读取整个哈希
    ///
    /// 由 [`hash_increment`](Self::hash_increment) 维护的计数字段是裸整数，按普通 JSON 解码。
    pub async fn hash_get_all<T>(&self, key: &str) -> Result<HashMap<String, T>>
    where
        T: DeserializeOwned,
    {
        self.validate_key("hash_get_all", key)?;
        let raws = self
            .observe("hash_get_all", Some(key), self.inner.store.hgetall(key))
            .await?;

        raws.into_iter()
            .map(|(field, raw)| -> Result<(String, T)> {
                let value = match codec::parse_envelope(&raw) {
                    Ok(envelope) => self
                        .inner
                        .codec
                        .decode_envelope(envelope, Encoding::Json)
                        .map_err(|e| e.with_key(key))?,
                    Err(_) => serde_json::from_str(&raw).map_err(|e| {
                        CacheError::serialization("hash_get_all", format!("哈希字段 {field} 解码失败: {e}"))
                            .with_key(key)
                            .with_source(e)
                    })?,
                };
                Ok((field, value))
            })
            .collect()
    }

    /// 哈希字段计数器
    pub async fn hash_increment(&self, key: &str, field: &str, delta: i64) -> Result<i64> {
        self.validate_key("hash_increment", key)?;
        self.observe(
            "hash_increment",
            Some(key),
            self.inner.store.hincrby(key, field, delta),
        )
        .await
    }

    /// 旁路缓存：命中直接返回；未命中调用 `factory` 计算、按解析出的 TTL 写入并返回
    ///
    /// 默认（`single_flight = "off"`）恰好一次读取，未命中时恰好一次计算和一次写入，
    /// 同一个键的并发未命中会各自计算。
    pub async fn get_or_compute<T, E, F, Fut>(
        &self,
        key: &str,
        factory: F,
        options: SetOptions,
    ) -> std::result::Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        E: From<CacheError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        // 在任何 I/O 之前完成校验
        self.validate_key("get_or_compute", key)?;
        self.resolve_ttl(&options)?;

        match self.inner.config.single_flight {
            SingleFlightMode::Off => self.compute_and_store(key, factory, options).await,
            SingleFlightMode::Local => {
                let _flight = self.inner.flights.acquire(key).await;
                self.compute_and_store(key, factory, options).await
            }
            SingleFlightMode::Distributed => self.compute_with_lock(key, factory, options).await,
        }
    }

    pub(super) async fn compute_and_store<T, E, F, Fut>(
        &self,
        key: &str,
        factory: F,
        options: SetOptions,
    ) -> std::result::Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        E: From<CacheError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        if let Some(cached) = self.get_with(key, options.encoding).await? {
            return Ok(cached);
        }
        self.compute_then_set(key, factory, options).await
    }

    pub(super) async fn compute_then_set<T, E, F, Fut>(
        &self,
        key: &str,
        factory: F,
        options: SetOptions,
    ) -> std::result::Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        E: From<CacheError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        let value = factory().await?;
        self.set(key, &value, options).await?;
        Ok(value)
    }

    /// 检查存储连通性
    pub async fn ping(&self) -> Result<()> {
        self.observe("ping", None, self.inner.store.ping()).await
    }

    /// 关闭存储连接
    pub async fn shutdown(&self) -> Result<()> {
        let snapshot = self.stats();
        self.observe("shutdown", None, self.inner.store.shutdown())
            .await?;
        linfo!(
            "system",
            LogStage::Shutdown,
            LogComponent::Engine,
            "engine_shutdown",
            &format!(
                "缓存引擎已关闭: hits={}, misses={}, errors={}",
                snapshot.hits, snapshot.misses, snapshot.errors
            )
        );
        Ok(())
    }
}

fn encode_member<T>(operation: &str, key: &str, member: &T) -> Result<String>
where
    T: Serialize + ?Sized,
{
    serde_json::to_string(member).map_err(|e| {
        CacheError::serialization(operation, format!("集合成员编码失败: {e}"))
            .with_key(key)
            .with_source(e)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::store::{MockKeyValueStore, StoreError};
    use crate::error::ErrorKind;

    fn engine_with(store: MockKeyValueStore) -> CacheEngine {
        CacheEngine::new(CacheConfig::default(), Arc::new(store)).unwrap()
    }

    #[test]
    fn test_invalid_config_refuses_to_start() {
        let config = CacheConfig {
            default_ttl: 0,
            ..CacheConfig::default()
        };
        assert!(CacheEngine::new(config, Arc::new(MockKeyValueStore::new())).is_err());
    }

    #[test]
    fn test_resolve_ttl_precedence() {
        let engine = engine_with(MockKeyValueStore::new());
        assert_eq!(engine.resolve_ttl(&SetOptions::default()).unwrap(), 300);
        assert_eq!(engine.resolve_ttl(&SetOptions::for_tier("strong")).unwrap(), 5);
        let explicit = SetOptions {
            ttl: Some(7),
            tier: Some("long".to_string()),
            ..SetOptions::default()
        };
        assert_eq!(engine.resolve_ttl(&explicit).unwrap(), 7);
        assert!(engine.resolve_ttl(&SetOptions::with_ttl(0)).is_err());
    }

    #[tokio::test]
    async fn test_oversized_batch_never_reaches_store() {
        // 没有设置任何期望，任何存储调用都会让测试失败
        let engine = engine_with(MockKeyValueStore::new());
        let keys: Vec<String> = (0..101).map(|i| format!("k:{i}")).collect();

        let err = engine.multi_get::<u32>(&keys).await.unwrap_err();
        assert_eq!(
            err.kind(),
            ErrorKind::Batch {
                batch_size: 101,
                max_allowed: 100
            }
        );

        let entries: Vec<(String, u32)> = keys.iter().map(|k| (k.clone(), 1)).collect();
        assert!(engine.multi_set(&entries, SetOptions::default()).await.is_err());
        assert!(engine.delete_many(&keys).await.is_err());
    }

    #[tokio::test]
    async fn test_long_key_never_reaches_store() {
        let engine = engine_with(MockKeyValueStore::new());
        let key = "k".repeat(251);
        let err = engine.set(&key, &1, SetOptions::default()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation(ValidationKind::KeyLength));
    }

    #[tokio::test]
    async fn test_store_error_is_classified_with_context() {
        let mut store = MockKeyValueStore::new();
        store
            .expect_get()
            .returning(|_| Err(StoreError::Backend("connect ECONNREFUSED 127.0.0.1:6379".into())));
        let engine = engine_with(store);

        let err = engine.get::<u32>("US:AAPL").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connection);
        assert_eq!(err.operation_name(), "get");
        assert_eq!(err.key(), Some("US:AAPL"));
        assert_eq!(engine.stats().errors, 1);
    }

    #[tokio::test]
    async fn test_set_uses_resolved_ttl() {
        let mut store = MockKeyValueStore::new();
        store
            .expect_set()
            .withf(|key, raw, ttl| key == "auth:token:x" && codec::is_valid_envelope(raw) && *ttl == Some(900))
            .times(1)
            .returning(|_, _, _| Ok(()));
        let engine = engine_with(store);

        engine
            .set("auth:token:x", &"session", SetOptions::for_tier("auth"))
            .await
            .unwrap();
        assert_eq!(engine.stats().writes, 1);
    }

    #[tokio::test]
    async fn test_oversized_value_is_rejected() {
        let config = CacheConfig {
            max_value_size_mb: 1,
            compression_enabled: false,
            ..CacheConfig::default()
        };
        let engine = CacheEngine::new(config, Arc::new(MockKeyValueStore::new())).unwrap();
        let big = "x".repeat(1024 * 1024 + 1);
        let err = engine.set("big", &big, SetOptions::default()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation(ValidationKind::ValueSize));
    }
}
